use crossbeam_utils::CachePadded;
use std::sync::atomic::AtomicU32;

use crate::Core::bitmap::AtomicBitmap;

/// Identifies a mapped region as a kzimp ring ("KZIMP_MC").
pub const MAGIC_NUMBER: u64 = 0x4B5A_494D_505F_4D43;

/// Version of the in-memory layout below.
pub const LAYOUT_VERSION: u32 = 1;

/// Alignment of every slot, one cache line.
pub const SLOT_ALIGN: usize = 64;

/// The header located at the very beginning of a channel's shared region.
///
/// Immutable geometry first, then each piece of mutable shared state on its
/// own cache line so reader polling does not bounce the writer's lines.
#[repr(C, align(128))]
pub struct RingHeader {
    /// Must equal [`MAGIC_NUMBER`].
    pub magic: u64,

    /// The version of the memory layout.
    pub version: u32,

    /// Number of slots in the ring.
    pub capacity: u32,

    /// Upper bound on payload bytes per slot.
    pub max_msg_size: u32,

    /// `ChecksumMode` discriminant.
    pub checksum_mode: u32,

    /// Writer timeout before evicting unresponsive readers.
    pub timeout_ms: u64,

    /// Distance in bytes between consecutive slots.
    pub slot_stride: u64,

    /// Channel identifier, for diagnostics.
    pub channel_id: u32,

    /// Reserved/padding.
    pub reserved: u32,

    /// Bits of every online registered reader.
    pub multicast_mask: CachePadded<AtomicBitmap>,

    /// Next slot index the writer will use.
    pub write_cursor: CachePadded<AtomicU32>,

    /// Wake word readers sleep on; bumped after every publish and eviction.
    pub reader_signal: CachePadded<AtomicU32>,

    /// Wake word the writer sleeps on; bumped when a slot drains.
    pub writer_signal: CachePadded<AtomicU32>,
}

/// Per-slot control block. The payload bytes follow it directly.
#[repr(C, align(64))]
pub struct SlotHeader {
    /// Bit `i` set: reader `i` has not consumed the current message.
    pub pending: AtomicBitmap,

    /// Length of the current message.
    pub len: AtomicU32,

    /// Checksum of the current message (low 16 bits).
    pub checksum: AtomicU32,
}

/// Bytes between the start of a slot and its payload.
#[inline]
pub const fn payload_offset() -> usize {
    std::mem::size_of::<SlotHeader>()
}

/// Slot stride for a given payload capacity.
#[inline]
pub const fn slot_stride(max_msg_size: usize) -> usize {
    (payload_offset() + max_msg_size + SLOT_ALIGN - 1) & !(SLOT_ALIGN - 1)
}

/// Offset of slot 0 from the region start.
#[inline]
pub const fn slots_offset() -> usize {
    let header = std::mem::size_of::<RingHeader>();
    (header + SLOT_ALIGN - 1) & !(SLOT_ALIGN - 1)
}

/// Total region size for the given geometry, `None` on overflow.
pub fn region_size(capacity: u32, max_msg_size: u32) -> Option<usize> {
    slot_stride(max_msg_size as usize)
        .checked_mul(capacity as usize)?
        .checked_add(slots_offset())
}
