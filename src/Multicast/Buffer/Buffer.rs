// The slot ring of one multicast channel, mapped in shared memory.

use std::time::Duration;

use crate::Core::checksum::ChecksumMode;
use crate::Core::SharedMemory::SharedMemoryBackend;

/// Index of a slot in the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotIndex(pub u32);

impl SlotIndex {
    #[inline]
    pub fn get(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A view over a mapped ring: one [`RingHeader`](super::layout::RingHeader)
/// followed by `capacity` slots.
///
/// The mapping is owned by the view; geometry is cached locally so the hot
/// path never has to re-read the shared header.
///
/// ### Concurrency Design:
/// - **Writer**: may touch a slot's payload, `len` and `checksum` only while the
///   slot's `pending` bitmap is empty, then publishes by storing `pending`
///   with release ordering.
/// - **Readers**: observe their bit in `pending` with acquire ordering, read
///   the payload, then clear their bit. The reader that clears the last bit
///   wakes the writer.
pub struct Ring {
    /// Backing mapping; kept alive for as long as any handle holds the ring.
    pub(crate) shm: Box<dyn SharedMemoryBackend>,

    /// Start of the mapping, where the header lives.
    pub(crate) base: *mut u8,

    /// Number of slots.
    pub(crate) capacity: u32,

    /// Payload bytes per slot.
    pub(crate) max_msg_size: u32,

    /// Bytes between consecutive slots.
    pub(crate) stride: usize,

    pub(crate) checksum_mode: ChecksumMode,

    pub(crate) timeout: Duration,
}

unsafe impl Send for Ring {}
unsafe impl Sync for Ring {}
