// In src/Multicast/writer.rs
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use super::channel::{ChannelShared, Claim};
use super::Buffer::SlotIndex;
use crate::error::{ChannelError, Result};
use crate::Core::futex::{wait_until, WaitMode, WaitOutcome};
use crate::Core::interrupt::CancelToken;

/// The single writer of a channel.
///
/// A send waits for every reader to release the slot at the write cursor. If
/// they do not within the channel timeout, the laggards are evicted and the
/// slot is overwritten. Dropping the handle gives up the writer role.
pub struct WriterHandle {
    shared: Arc<ChannelShared>,
    cancel: CancelToken,
}

impl WriterHandle {
    pub(crate) fn new(shared: Arc<ChannelShared>) -> Self {
        Self {
            shared,
            cancel: CancelToken::new(),
        }
    }

    /// Identifier of the channel this writer sends on.
    pub fn channel_id(&self) -> u32 {
        self.shared.registry.lock().config.channel_id
    }

    /// Slot the next message will be written to.
    pub fn write_cursor(&self) -> SlotIndex {
        self.shared.registry.lock().ring.write_cursor()
    }

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

    /// Send `message` to every online reader.
    ///
    /// Returns the number of bytes written, or `Ok(0)` if the message is
    /// empty or larger than the channel's maximum message size.
    pub fn send<T: AsRef<[u8]>>(&mut self, message: T) -> Result<usize> {
        let message = message.as_ref();
        let claim = match self.shared.claim(message.len(), false)? {
            Some(claim) => claim,
            None => return Ok(0),
        };

        if let Err(e) = self.wait_for_slot(&claim) {
            self.shared.rollback(&claim);
            return Err(e);
        }

        Ok(self.commit(&claim, message))
    }

    /// Like [`send`](Self::send) but fails with `WouldBlock` instead of
    /// waiting when the slot at the write cursor is still being read.
    pub fn try_send<T: AsRef<[u8]>>(&mut self, message: T) -> Result<usize> {
        let message = message.as_ref();
        match self.shared.claim(message.len(), true)? {
            Some(claim) => Ok(self.commit(&claim, message)),
            None => Ok(0),
        }
    }

    /// Wait for the claimed slot to drain, evicting whoever still holds it
    /// when the timeout expires.
    fn wait_for_slot(&self, claim: &Claim) -> Result<()> {
        let ring = &claim.ring;
        let pending = ring.pending(claim.idx);
        if pending.is_empty() {
            return Ok(());
        }

        let mode = Instant::now()
            .checked_add(ring.timeout)
            .map_or(WaitMode::Blocking, WaitMode::Deadline);
        let outcome = wait_until(
            ring.writer_signal(),
            mode,
            &self.cancel,
            || pending.is_empty(),
        );

        match outcome {
            WaitOutcome::Ready => Ok(()),
            WaitOutcome::TimedOut | WaitOutcome::WouldBlock => {
                log::debug!(
                    "kzimp: process {} in write timed out on slot {} (pending {:#x})",
                    std::process::id(),
                    claim.idx,
                    pending.load(Ordering::Acquire)
                );
                self.shared.evict(claim);
                Ok(())
            }
            WaitOutcome::Interrupted => {
                log::warn!(
                    "kzimp: process {} in write has been interrupted",
                    std::process::id()
                );
                Err(ChannelError::Interrupted)
            }
        }
    }

    fn commit(&self, claim: &Claim, message: &[u8]) -> usize {
        // Safety: the slot's pending bitmap is empty and we hold the writer role
        unsafe {
            claim.ring.fill_slot(claim.idx, message);
        }
        self.shared.publish(claim);
        message.len()
    }
}

impl Drop for WriterHandle {
    fn drop(&mut self) {
        self.shared.writer_attached.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Core::checksum::ChecksumMode;
    use crate::Multicast::Channel;
    use std::time::Duration;

    #[test]
    fn invalid_sizes_write_nothing() {
        let ch = Channel::create(2, 8, 100, ChecksumMode::None).unwrap();
        let mut w = ch.become_writer().unwrap();
        let mut r = ch.join_reader().unwrap();

        assert_eq!(w.send(b"").unwrap(), 0);
        assert_eq!(w.send([0u8; 9]).unwrap(), 0);
        assert_eq!(w.try_send([0u8; 9]).unwrap(), 0);
        assert_eq!(ch.stats().write_cursor, 0);
        assert!(!r.poll_readable());

        assert_eq!(w.send([7u8; 8]).unwrap(), 8);
        assert_eq!(r.recv_vec().unwrap(), vec![7u8; 8]);
    }

    #[test]
    fn send_without_readers_never_blocks() {
        let ch = Channel::create(2, 8, 5_000, ChecksumMode::None).unwrap();
        let mut w = ch.become_writer().unwrap();
        let start = Instant::now();
        for i in 0..10u8 {
            assert_eq!(w.send([i]).unwrap(), 1);
        }
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn try_send_reports_full_slot_without_consuming_it() {
        let ch = Channel::create(2, 8, 5_000, ChecksumMode::None).unwrap();
        let mut w = ch.become_writer().unwrap();
        let mut r = ch.join_reader().unwrap();

        w.try_send(b"a").unwrap();
        w.try_send(b"b").unwrap();
        assert!(matches!(w.try_send(b"c"), Err(ChannelError::WouldBlock)));
        assert_eq!(ch.stats().write_cursor, 0);

        let mut buf = [0u8; 8];
        assert_eq!(r.recv(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], b'a');
        w.try_send(b"c").unwrap();
        assert_eq!(r.recv(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], b'b');
        assert_eq!(r.recv(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], b'c');
    }

    #[test]
    fn cancelled_send_rolls_back() {
        let ch = Channel::create(1, 8, 5_000, ChecksumMode::None).unwrap();
        let token = CancelToken::new();
        let mut w = ch.become_writer().unwrap().with_cancel_token(token.clone());
        let mut r = ch.join_reader().unwrap();

        w.send(b"first").unwrap();
        token.cancel();
        assert!(matches!(w.send(b"second"), Err(ChannelError::Interrupted)));
        assert_eq!(ch.stats().write_cursor, 0);
        assert!(r.is_online());

        let mut buf = [0u8; 8];
        assert_eq!(r.recv(&mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"first");

        token.reset();
        w.send(b"third").unwrap();
        assert_eq!(r.recv(&mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"third");
    }

    #[test]
    fn reader_joined_during_cancelled_send_gets_next_message() {
        let ch = Channel::create(4, 8, 5_000, ChecksumMode::None).unwrap();
        let token = CancelToken::new();
        let mut w = ch.become_writer().unwrap().with_cancel_token(token.clone());
        let mut a = ch.join_reader().unwrap();
        for i in 1..=4u8 {
            w.send([b'0' + i]).unwrap();
        }

        let joiner_ch = ch.clone();
        let joiner_token = token.clone();
        let joiner = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            let b = joiner_ch.join_reader().unwrap();
            joiner_token.cancel();
            b
        });

        assert!(matches!(w.send(b"x"), Err(ChannelError::Interrupted)));
        let mut b = joiner.join().unwrap();
        assert_eq!(b.next_read_idx().get(), 0);

        let mut buf = [0u8; 8];
        for i in 1..=4u8 {
            assert_eq!(a.recv(&mut buf).unwrap(), 1);
            assert_eq!(buf[0], b'0' + i);
        }

        token.reset();
        w.send(b"5").unwrap();
        w.send(b"6").unwrap();
        for expected in [b'5', b'6'] {
            assert_eq!(b.try_recv(&mut buf).unwrap(), 1);
            assert_eq!(buf[0], expected);
            assert_eq!(a.try_recv(&mut buf).unwrap(), 1);
            assert_eq!(buf[0], expected);
        }
        assert!(matches!(b.try_recv(&mut buf), Err(ChannelError::WouldBlock)));
    }
}
