use std::fmt;
use std::sync::atomic::Ordering;

use crate::Multicast::Buffer::Ring;
use crate::Multicast::{Channel, ReaderHandle, WriterHandle};

/// Debug function for Channel
///
/// Prints the same columns as the stats snapshot, mask in hex.
pub fn debug_channel(channel: &Channel, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let stats = channel.stats();
    f.debug_struct("Channel")
        .field("channel_id", &stats.channel_id)
        .field("capacity", &stats.capacity)
        .field("max_msg_size", &stats.max_msg_size)
        .field("multicast_mask", &format_args!("{:#x}", stats.multicast_mask))
        .field("readers", &stats.reader_count)
        .field("timeout_ms", &stats.timeout_ms)
        .field("checksum", &format_args!("{}", stats.checksum_mode))
        .field("writer", &stats.writer_attached)
        .finish()
}

/// Debug function for Ring
///
/// Safely displays the mapping location and geometry without touching slot payloads
pub fn debug_ring(ring: &Ring, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Ring")
        .field("base", &format_args!("{:p}", ring.base))
        .field("mapped", &ring.mapped_size())
        .field("capacity", &ring.capacity())
        .field("max_msg_size", &ring.max_msg_size())
        .field("write_cursor", &ring.write_cursor().get())
        .field(
            "multicast_mask",
            &format_args!("{:#x}", ring.multicast_mask().load(Ordering::Relaxed)),
        )
        .field("initialized", &ring.is_initialized())
        .finish_non_exhaustive()
}

pub fn debug_reader(reader: &ReaderHandle, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ReaderHandle")
        .field("channel_id", &reader.channel_id())
        .field("bit", &reader.bit())
        .field("state", &reader.state())
        .field("next_read_idx", &reader.next_read_idx().get())
        .field("held", &reader.held().map(|idx| idx.get()))
        .finish()
}

pub fn debug_writer(writer: &WriterHandle, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WriterHandle")
        .field("channel_id", &writer.channel_id())
        .field("write_cursor", &writer.write_cursor().get())
        .field("cancelled", &writer.cancel_token().is_cancelled())
        .finish()
}
