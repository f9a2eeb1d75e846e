// Read-only snapshot of a channel, the same columns the kzimp /proc dump printed.

use crate::Core::checksum::ChecksumMode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStats {
    pub channel_id: u32,
    pub capacity: u32,
    pub max_msg_size: u32,
    /// Registered readers, including evicted ones that have not left yet.
    pub reader_count: u32,
    pub online_readers: u32,
    pub multicast_mask: u64,
    pub timeout_ms: u64,
    pub checksum_mode: ChecksumMode,
    pub write_cursor: u32,
    pub writer_attached: bool,
}
