// src/Multicast/reader.rs

use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::channel::{ChannelShared, ReaderControl, ReaderState};
use super::view::ZeroCopyView;
use super::Buffer::{Ring, SlotIndex};
use crate::error::{ChannelError, Result};
use crate::Core::futex::{wait_until, WaitMode, WaitOutcome};
use crate::Core::interrupt::CancelToken;

/// What `poll`-style readiness reports for a reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness {
    /// A message is waiting at the reader's cursor.
    pub readable: bool,
    /// The reader was evicted; further reads fail with `Gone`.
    pub hangup: bool,
}

/// One subscriber of a channel.
///
/// Each reader consumes every message published after it joined, in order,
/// at its own pace. Dropping the handle leaves the channel.
pub struct ReaderHandle {
    shared: Arc<ChannelShared>,
    ring: Arc<Ring>,
    control: Arc<ReaderControl>,
    next_read_idx: SlotIndex,
    /// Set once the first message has been seen; before that the starting
    /// slot is taken from the registry entry.
    started: bool,
    /// Slot acquired by `start_read` and not yet finished.
    held: Option<SlotIndex>,
    cancel: CancelToken,
    departed: bool,
}

impl ReaderHandle {
    pub(crate) fn new(
        shared: Arc<ChannelShared>,
        ring: Arc<Ring>,
        control: Arc<ReaderControl>,
        next_read_idx: SlotIndex,
    ) -> Self {
        Self {
            shared,
            ring,
            control,
            next_read_idx,
            started: false,
            held: None,
            cancel: CancelToken::new(),
            departed: false,
        }
    }

    /// Position of this reader in the multicast mask.
    pub fn bit(&self) -> u32 {
        self.control.bit
    }

    pub fn state(&self) -> ReaderState {
        self.control.state()
    }

    pub fn is_online(&self) -> bool {
        self.control.is_online()
    }

    pub fn channel_id(&self) -> u32 {
        self.shared.registry.lock().config.channel_id
    }

    /// Slot acquired by `start_read` and not finished yet.
    pub fn held(&self) -> Option<SlotIndex> {
        self.held
    }

    /// Slot this reader will consume next.
    pub fn next_read_idx(&self) -> SlotIndex {
        cursor(self.started, self.next_read_idx, &self.control, &self.ring)
    }

    /// Token whose cancellation interrupts this reader's waits.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn set_cancel_token(&mut self, token: CancelToken) {
        self.cancel = token;
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Receive the next message into `buf`, blocking until one is available.
    ///
    /// Returns the number of bytes copied, `min(buf.len(), message length)`;
    /// the rest of a longer message is discarded.
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.recv_with(buf, WaitMode::Blocking)
    }

    /// Like [`recv`](Self::recv) but fails with `WouldBlock` instead of waiting.
    pub fn try_recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.recv_with(buf, WaitMode::NonBlocking)
    }

    /// Like [`recv`](Self::recv) but gives up with `TimedOut` after `timeout`.
    pub fn recv_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let mode = Instant::now()
            .checked_add(timeout)
            .map_or(WaitMode::Blocking, WaitMode::Deadline);
        self.recv_with(buf, mode)
    }

    /// Receive the next message as an owned buffer.
    pub fn recv_vec(&mut self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.ring.max_msg_size() as usize];
        let n = self.recv(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    fn recv_with(&mut self, buf: &mut [u8], mode: WaitMode) -> Result<usize> {
        let idx = self.acquire(mode)?;

        // Safety: our bit is set on idx, so the writer is not refilling it
        let (verdict, copied) = unsafe {
            let verdict = self.ring.verify(idx);
            let data = self.ring.payload(idx);
            let n = data.len().min(buf.len());
            buf[..n].copy_from_slice(&data[..n]);
            (verdict, n)
        };

        // A corrupt message is still acknowledged so the writer is not stalled
        self.release(idx)?;

        if let Err(e) = verdict {
            log::warn!(
                "kzimp: Process {} in read has found an incorrect checksum: {}",
                std::process::id(),
                e
            );
            return Err(e);
        }
        Ok(copied)
    }

    /// True if a message is waiting at the reader's cursor.
    pub fn poll_readable(&self) -> bool {
        let idx = self.held.unwrap_or_else(|| self.next_read_idx());
        self.ring.pending(idx).test(self.control.bit)
    }

    pub fn readiness(&self) -> Readiness {
        Readiness {
            readable: self.poll_readable(),
            hangup: !self.is_online(),
        }
    }

    /// Acquire the next message in place, blocking until one is available.
    ///
    /// Every successful call must be paired with one
    /// [`finish_read`](Self::finish_read) (or [`ZeroCopyView::finish`]); until
    /// then the slot stays pending and holds up the writer like a slow reader.
    /// A view held past the channel timeout gets this reader evicted and its
    /// bytes may then be overwritten while still borrowed; see [`ZeroCopyView`].
    pub fn start_read(&mut self) -> Result<ZeroCopyView<'_>> {
        self.start_read_with(WaitMode::Blocking)
    }

    /// Like [`start_read`](Self::start_read) but fails with `WouldBlock` instead of waiting.
    pub fn try_start_read(&mut self) -> Result<ZeroCopyView<'_>> {
        self.start_read_with(WaitMode::NonBlocking)
    }

    fn start_read_with(&mut self, mode: WaitMode) -> Result<ZeroCopyView<'_>> {
        let idx = self.acquire(mode)?;
        if let Err(e) = unsafe { self.ring.verify(idx) } {
            log::warn!(
                "kzimp: Process {} in zero-copy read has found an incorrect checksum: {}",
                std::process::id(),
                e
            );
            self.release(idx)?;
            return Err(e);
        }
        Ok(ZeroCopyView::new(self, idx))
    }

    /// Release the slot acquired by `start_read` and advance.
    pub fn finish_read(&mut self, idx: SlotIndex) -> Result<()> {
        self.release(idx)
    }

    /// Payload of a held slot.
    pub(crate) fn held_payload(&self, idx: SlotIndex) -> &[u8] {
        debug_assert_eq!(self.held, Some(idx));
        // Safety: the slot is held, our bit keeps the writer out unless we get evicted
        unsafe { self.ring.payload(idx) }
    }

    /// Wait until our bit is set at the cursor and mark the slot held.
    fn acquire(&mut self, mode: WaitMode) -> Result<SlotIndex> {
        if !self.control.is_online() {
            // an evicted reader's held slot may already carry a newer message
            self.held = None;
            return Err(ChannelError::Gone);
        }
        if let Some(idx) = self.held {
            return Ok(idx);
        }

        let (started, next) = (self.started, self.next_read_idx);
        let ring = &self.ring;
        let control = &self.control;
        let bit = control.bit;

        let outcome = wait_until(ring.reader_signal(), mode, &self.cancel, || {
            ring.pending(cursor(started, next, control, ring)).test(bit) || !control.is_online()
        });

        match outcome {
            WaitOutcome::Ready => {}
            WaitOutcome::WouldBlock => return Err(ChannelError::WouldBlock),
            WaitOutcome::TimedOut => return Err(ChannelError::TimedOut),
            WaitOutcome::Interrupted => {
                log::warn!(
                    "kzimp: process {} in read has been interrupted",
                    std::process::id()
                );
                return Err(ChannelError::Interrupted);
            }
        }

        if !self.control.is_online() {
            log::warn!(
                "kzimp: Process {} in read is no longer active",
                std::process::id()
            );
            return Err(ChannelError::Gone);
        }

        // our bit is set, so the starting slot can no longer move
        let idx = self.next_read_idx();
        self.next_read_idx = idx;
        self.started = true;
        self.held = Some(idx);
        Ok(idx)
    }

    /// Clear our bit on a held slot, wake the writer if we were the last, advance.
    fn release(&mut self, idx: SlotIndex) -> Result<()> {
        if self.held != Some(idx) {
            return Err(ChannelError::NotHeld(idx.get()));
        }
        self.held = None;

        // the copy above must complete before we look at the eviction flag
        fence(Ordering::SeqCst);
        if !self.control.is_online() {
            // the writer already stripped our bit and may be refilling the slot
            log::warn!(
                "kzimp: Process {} in read is no longer active",
                std::process::id()
            );
            return Err(ChannelError::Gone);
        }

        let remaining = self.ring.pending(idx).clear(self.control.bit);
        if remaining == 0 {
            self.ring.wake_writer();
        }
        self.next_read_idx = self.ring.next_index(idx);
        Ok(())
    }

    /// Leave the channel. The bit is released and cleared from every slot.
    pub fn leave(mut self) {
        self.depart();
    }

    fn depart(&mut self) {
        if self.departed {
            return;
        }
        self.departed = true;
        self.held = None;
        self.shared.leave(&self.control);
    }

    pub(crate) fn ring(&self) -> &Ring {
        &self.ring
    }
}

#[inline]
fn cursor(started: bool, next: SlotIndex, control: &ReaderControl, ring: &Ring) -> SlotIndex {
    if started {
        next
    } else {
        control.start_idx(ring.capacity())
    }
}

impl Drop for ReaderHandle {
    fn drop(&mut self) {
        self.depart();
    }
}
