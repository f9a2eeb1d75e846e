use std::ops::Deref;

use super::reader::ReaderHandle;
use super::Buffer::SlotIndex;
use crate::error::Result;

/// A message read in place, straight out of the ring.
///
/// The slot stays held until [`finish`](Self::finish). Dropping the view
/// without finishing keeps it held: the next `start_read` or `recv` on the
/// same reader returns the same message again.
///
/// The bytes are only protected by the reader's pending bit. If the writer
/// evicts this reader while the view is alive, it may refill the slot under
/// the view, so the contents seen through it are unreliable from then on.
/// `finish` reports that case as `Gone`; treat anything read from such a view
/// as garbage.
pub struct ZeroCopyView<'a> {
    reader: &'a mut ReaderHandle,
    idx: SlotIndex,
}

impl<'a> ZeroCopyView<'a> {
    pub(crate) fn new(reader: &'a mut ReaderHandle, idx: SlotIndex) -> Self {
        Self { reader, idx }
    }

    /// Slot the view points into.
    pub fn index(&self) -> SlotIndex {
        self.idx
    }

    /// Release the slot and advance the reader.
    ///
    /// Fails with `Gone` if the reader was evicted while holding the view,
    /// in which case the bytes seen through it may have been overwritten.
    pub fn finish(self) -> Result<()> {
        self.reader.finish_read(self.idx)
    }
}

impl Deref for ZeroCopyView<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.reader.held_payload(self.idx)
    }
}

impl AsRef<[u8]> for ZeroCopyView<'_> {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl std::fmt::Debug for ZeroCopyView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZeroCopyView")
            .field("idx", &self.idx)
            .field("len", &self.len())
            .finish()
    }
}
