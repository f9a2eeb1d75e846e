// Channel: reader registry, writer role, and the locked half of the protocol
// (claim / publish / evict / leave). The lock-free half lives in the handles.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::builder::{ChannelBuilder, ChannelConfig};
use super::reader::ReaderHandle;
use super::writer::WriterHandle;
use super::Buffer::{Ring, SlotIndex};
use super::Structs::Stats::ChannelStats;
use crate::error::{ChannelError, Result};
use crate::Core::bitmap::{bit_mask, find_first_zero};
use crate::Core::checksum::ChecksumMode;

/// Lifecycle of a reader registration.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// Bit claimed, not yet visible to the writer.
    Joining = 0,
    /// Receives every message published after it joined.
    Online = 1,
    /// Evicted by the writer or departed. Terminal.
    Offline = 2,
}

impl ReaderState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Joining,
            1 => Self::Online,
            _ => Self::Offline,
        }
    }
}

/// Registry entry for one reader, shared between its handle and the writer's
/// eviction path.
pub(crate) struct ReaderControl {
    pub(crate) bit: u32,
    pub(crate) pid: u32,
    /// Sequence number of the first message this reader must receive. Moves
    /// back by one if the writer rolls back the claim it joined behind.
    start_seq: AtomicU64,
    state: AtomicU8,
}

impl ReaderControl {
    #[inline]
    pub(crate) fn start_seq(&self) -> u64 {
        self.start_seq.load(Ordering::Acquire)
    }

    /// Slot of the first message this reader must receive.
    #[inline]
    pub(crate) fn start_idx(&self, capacity: u32) -> SlotIndex {
        SlotIndex((self.start_seq() % u64::from(capacity)) as u32)
    }

    #[inline]
    pub(crate) fn state(&self) -> ReaderState {
        ReaderState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn set_state(&self, state: ReaderState) {
        self.state.store(state as u8, Ordering::Release);
    }

    #[inline]
    pub(crate) fn is_online(&self) -> bool {
        self.state() == ReaderState::Online
    }
}

/// Everything guarded by the channel lock.
pub(crate) struct Registry {
    pub(crate) ring: Arc<Ring>,
    pub(crate) config: ChannelConfig,
    pub(crate) readers: Vec<Arc<ReaderControl>>,
    /// Bits held by registered readers, online or evicted. A bit is free for
    /// reuse only after its holder has left.
    pub(crate) claimed: u64,
    /// Sequence number of the next message; the write cursor is this modulo
    /// the capacity.
    pub(crate) write_seq: u64,
    /// Bumped on every reconfiguration.
    pub(crate) generation: u32,
}

impl Registry {
    #[inline]
    fn cursor_of(&self, seq: u64) -> SlotIndex {
        SlotIndex((seq % u64::from(self.ring.capacity())) as u32)
    }
}

pub(crate) struct ChannelShared {
    pub(crate) registry: Mutex<Registry>,
    pub(crate) writer_attached: AtomicBool,
}

/// A slot reserved by the writer for one message.
pub(crate) struct Claim {
    pub(crate) ring: Arc<Ring>,
    pub(crate) seq: u64,
    pub(crate) idx: SlotIndex,
}

impl ChannelShared {
    /// Reserve the slot at the write cursor and advance the cursor.
    ///
    /// Returns `Ok(None)` when `len` does not fit the channel. With
    /// `require_free`, fails with `WouldBlock` instead of reserving a slot that
    /// still has pending readers.
    pub(crate) fn claim(&self, len: usize, require_free: bool) -> Result<Option<Claim>> {
        let mut reg = self.registry.lock();
        let ring = Arc::clone(&reg.ring);

        if len == 0 || len > ring.max_msg_size() as usize {
            log::error!(
                "kzimp: count is not valid: {} (process {} in write on channel {})",
                len,
                std::process::id(),
                reg.config.channel_id
            );
            return Ok(None);
        }

        let seq = reg.write_seq;
        let idx = reg.cursor_of(seq);
        if require_free && !ring.pending(idx).is_empty() {
            return Err(ChannelError::WouldBlock);
        }

        reg.write_seq = seq + 1;
        ring.set_write_cursor(reg.cursor_of(seq + 1));
        Ok(Some(Claim { ring, seq, idx }))
    }

    /// Undo a claim that will not be written, so readers never wait on a
    /// slot that is skipped.
    pub(crate) fn rollback(&self, claim: &Claim) {
        let mut reg = self.registry.lock();
        if Arc::ptr_eq(&reg.ring, &claim.ring) && reg.write_seq == claim.seq + 1 {
            reg.write_seq = claim.seq;
            claim.ring.set_write_cursor(claim.idx);

            // readers that joined behind the abandoned claim start at its slot
            for reader in reg.readers.iter() {
                let _ = reader.start_seq.compare_exchange(
                    claim.seq + 1,
                    claim.seq,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
            }
        }
    }

    /// Evict every reader still pending on the claimed slot.
    ///
    /// Their bits are removed from every slot and from the multicast mask and
    /// they go `Offline`; their bits stay claimed until they leave.
    pub(crate) fn evict(&self, claim: &Claim) {
        let reg = self.registry.lock();
        if !Arc::ptr_eq(&reg.ring, &claim.ring) {
            return;
        }

        let stale = claim.ring.pending(claim.idx).load(Ordering::Acquire);
        if stale == 0 {
            return;
        }

        claim.ring.clear_everywhere(stale);
        for reader in reg.readers.iter() {
            if stale & bit_mask(reader.bit) != 0 && reader.is_online() {
                reader.set_state(ReaderState::Offline);
                log::debug!(
                    "kzimp: process {} in write. Process {} (bit {}) is offline on channel {}",
                    std::process::id(),
                    reader.pid,
                    reader.bit,
                    reg.config.channel_id
                );
            }
        }
        drop(reg);

        // evicted readers may be asleep waiting for their bit
        claim.ring.wake_readers();
    }

    /// Publish the filled slot to every online reader that joined before it
    /// was claimed, then wake the readers.
    pub(crate) fn publish(&self, claim: &Claim) {
        {
            let reg = self.registry.lock();
            let mask = if Arc::ptr_eq(&reg.ring, &claim.ring) {
                reg.readers
                    .iter()
                    .filter(|r| r.is_online() && r.start_seq() <= claim.seq)
                    .fold(0u64, |mask, r| mask | bit_mask(r.bit))
            } else {
                // reconfigured while writing: nobody reads the old ring
                0
            };
            debug_assert_eq!(
                mask & !claim.ring.multicast_mask().load(Ordering::Acquire),
                0,
                "publishing to readers outside the multicast mask"
            );
            claim.ring.publish(claim.idx, mask);
        }
        claim.ring.wake_readers();
    }

    /// Register a new reader positioned at the write cursor.
    pub(crate) fn join(self: &Arc<Self>) -> Result<ReaderHandle> {
        let mut reg = self.registry.lock();
        let max = reg.config.max_readers;

        let bit = match find_first_zero(reg.claimed, max) {
            Some(bit) => bit,
            None => {
                log::error!(
                    "kzimp: Maximum number of readers on the channel {} has been reached: {}",
                    reg.config.channel_id,
                    reg.readers.len()
                );
                return Err(ChannelError::NoFreeSlot { max });
            }
        };

        let control = Arc::new(ReaderControl {
            bit,
            pid: std::process::id(),
            start_seq: AtomicU64::new(reg.write_seq),
            state: AtomicU8::new(ReaderState::Joining as u8),
        });
        let next_read_idx = reg.cursor_of(reg.write_seq);

        reg.claimed |= bit_mask(bit);
        reg.ring.multicast_mask().set(bit);
        reg.readers.push(Arc::clone(&control));
        control.set_state(ReaderState::Online);

        log::debug!(
            "kzimp: reader bit {} joined channel {} at slot {}",
            bit,
            reg.config.channel_id,
            next_read_idx
        );

        Ok(ReaderHandle::new(
            Arc::clone(self),
            Arc::clone(&reg.ring),
            control,
            next_read_idx,
        ))
    }

    /// Deregister a reader and strip its bit from the whole ring.
    pub(crate) fn leave(&self, control: &ReaderControl) {
        let mut reg = self.registry.lock();
        let before = reg.readers.len();
        reg.readers
            .retain(|r| !std::ptr::eq(Arc::as_ptr(r), control as *const ReaderControl));
        if reg.readers.len() == before {
            return;
        }

        let mask = bit_mask(control.bit);
        reg.claimed &= !mask;
        reg.ring.clear_everywhere(mask);
        control.set_state(ReaderState::Offline);

        log::debug!(
            "kzimp: reader bit {} left channel {}",
            control.bit,
            reg.config.channel_id
        );

        let ring = Arc::clone(&reg.ring);
        drop(reg);

        // the departed reader may have been the last one pending on the writer's slot
        ring.wake_writer();
    }
}

/// A multicast channel: one writer, up to 64 readers, a fixed ring of slots.
///
/// Cloning is cheap and yields another reference to the same channel. The
/// ring stays mapped for as long as the channel or any handle is alive.
#[derive(Clone)]
pub struct Channel {
    pub(crate) shared: Arc<ChannelShared>,
}

impl Channel {
    /// Create a channel with the given geometry, other settings at their defaults.
    pub fn create(
        capacity: u32,
        max_msg_size: u32,
        timeout_ms: u64,
        checksum_mode: ChecksumMode,
    ) -> Result<Self> {
        Self::with_config(ChannelConfig::new(
            capacity,
            max_msg_size,
            Duration::from_millis(timeout_ms),
            checksum_mode,
        ))
    }

    pub fn builder() -> ChannelBuilder {
        ChannelBuilder::new()
    }

    pub fn with_config(config: ChannelConfig) -> Result<Self> {
        config.validate()?;
        let ring = Ring::create(&config)?;

        log::info!(
            "kzimp: channel {} created: {} slots of {} bytes, timeout {} ms, checksum {}",
            config.channel_id,
            config.capacity,
            config.max_msg_size,
            config.timeout_ms(),
            config.checksum_mode
        );

        Ok(Self {
            shared: Arc::new(ChannelShared {
                registry: Mutex::new(Registry {
                    ring: Arc::new(ring),
                    config,
                    readers: Vec::new(),
                    claimed: 0,
                    write_seq: 0,
                    generation: 0,
                }),
                writer_attached: AtomicBool::new(false),
            }),
        })
    }

    pub fn id(&self) -> u32 {
        self.shared.registry.lock().config.channel_id
    }

    /// Current configuration.
    pub fn config(&self) -> ChannelConfig {
        self.shared.registry.lock().config.clone()
    }

    /// Subscribe a new reader. It receives only messages written after this call.
    pub fn join_reader(&self) -> Result<ReaderHandle> {
        self.shared.join()
    }

    /// Unsubscribe `reader`. Equivalent to [`ReaderHandle::leave`].
    pub fn leave_reader(&self, reader: ReaderHandle) {
        reader.leave();
    }

    /// Take the writer role. Only one writer may exist at a time.
    pub fn become_writer(&self) -> Result<WriterHandle> {
        if self
            .shared
            .writer_attached
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ChannelError::WriterExists);
        }
        Ok(WriterHandle::new(Arc::clone(&self.shared)))
    }

    pub fn has_writer(&self) -> bool {
        self.shared.writer_attached.load(Ordering::Acquire)
    }

    pub fn reader_count(&self) -> u32 {
        self.shared.registry.lock().readers.len() as u32
    }

    /// Replace the ring with a new geometry. Only allowed without readers.
    pub fn reconfigure(
        &self,
        capacity: u32,
        max_msg_size: u32,
        timeout_ms: u64,
        checksum_mode: ChecksumMode,
    ) -> Result<()> {
        let mut config = self.config();
        config.capacity = capacity;
        config.max_msg_size = max_msg_size;
        config.timeout = Duration::from_millis(timeout_ms);
        config.checksum_mode = checksum_mode;
        self.reconfigure_with(config)
    }

    /// Replace the whole configuration. Only allowed without readers.
    pub fn reconfigure_with(&self, config: ChannelConfig) -> Result<()> {
        config.validate()?;

        let mut reg = self.shared.registry.lock();
        if !reg.readers.is_empty() {
            return Err(ChannelError::ChannelBusy {
                readers: reg.readers.len() as u32,
            });
        }

        // a writer may still hold the old mapping, so a named ring gets a fresh file
        let generation = reg.generation + 1;
        let mut ring_config = config.clone();
        ring_config.shm_name = config
            .shm_name
            .as_ref()
            .map(|name| format!("{}-{}", name, generation));

        let ring = Ring::create(&ring_config)?;
        let old = std::mem::replace(&mut reg.ring, Arc::new(ring));
        reg.config = config;
        reg.claimed = 0;
        reg.write_seq = 0;
        reg.generation = generation;

        log::info!(
            "kzimp: channel {} reconfigured: {} slots of {} bytes, timeout {} ms, checksum {}",
            reg.config.channel_id,
            reg.config.capacity,
            reg.config.max_msg_size,
            reg.config.timeout_ms(),
            reg.config.checksum_mode
        );
        drop(reg);

        // a writer blocked on the old ring must not sleep out its full timeout
        old.wake_writer();
        Ok(())
    }

    /// Snapshot of the channel's configuration and registry.
    pub fn stats(&self) -> ChannelStats {
        let reg = self.shared.registry.lock();
        let ring = &reg.ring;
        ChannelStats {
            channel_id: reg.config.channel_id,
            capacity: ring.capacity(),
            max_msg_size: ring.max_msg_size(),
            reader_count: reg.readers.len() as u32,
            online_readers: reg.readers.iter().filter(|r| r.is_online()).count() as u32,
            multicast_mask: ring.multicast_mask().load(Ordering::Acquire),
            timeout_ms: reg.config.timeout_ms(),
            checksum_mode: reg.config.checksum_mode,
            write_cursor: ring.write_cursor().get(),
            writer_attached: self.has_writer(),
        }
    }

    /// Bits of readers registered but evicted.
    pub fn offline_mask(&self) -> u64 {
        let reg = self.shared.registry.lock();
        reg.readers
            .iter()
            .filter(|r| !r.is_online())
            .fold(0, |mask, r| mask | bit_mask(r.bit))
    }

    pub(crate) fn ring(&self) -> Arc<Ring> {
        Arc::clone(&self.shared.registry.lock().ring)
    }
}

/// Create a channel; see [`Channel::create`].
pub fn create_channel(
    capacity: u32,
    max_msg_size: u32,
    timeout_ms: u64,
    checksum_mode: ChecksumMode,
) -> Result<Channel> {
    Channel::create(capacity, max_msg_size, timeout_ms, checksum_mode)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(capacity: u32) -> Channel {
        Channel::create(capacity, 16, 100, ChecksumMode::HeaderAndPayload).unwrap()
    }

    #[test]
    fn create_rejects_zero_geometry() {
        assert!(matches!(
            Channel::create(0, 16, 100, ChecksumMode::None),
            Err(ChannelError::InvalidConfig(_))
        ));
        assert!(matches!(
            Channel::create(4, 0, 100, ChecksumMode::None),
            Err(ChannelError::InvalidConfig(_))
        ));
    }

    #[test]
    fn join_assigns_lowest_free_bit() {
        let ch = channel(4);
        let a = ch.join_reader().unwrap();
        let b = ch.join_reader().unwrap();
        let c = ch.join_reader().unwrap();
        assert_eq!((a.bit(), b.bit(), c.bit()), (0, 1, 2));
        assert_eq!(ch.stats().multicast_mask, 0b111);

        b.leave();
        assert_eq!(ch.stats().multicast_mask, 0b101);
        let d = ch.join_reader().unwrap();
        assert_eq!(d.bit(), 1);
        drop((a, c, d));
        assert_eq!(ch.reader_count(), 0);
        assert_eq!(ch.stats().multicast_mask, 0);
    }

    #[test]
    fn join_fails_when_bits_exhausted() {
        let ch = Channel::builder()
            .with_capacity(2)
            .with_max_msg_size(8)
            .with_max_readers(2)
            .build()
            .unwrap();
        let _a = ch.join_reader().unwrap();
        let _b = ch.join_reader().unwrap();
        assert!(matches!(
            ch.join_reader(),
            Err(ChannelError::NoFreeSlot { max: 2 })
        ));
    }

    #[test]
    fn sixty_four_readers_fit() {
        let ch = channel(2);
        let readers: Vec<_> = (0..64).map(|_| ch.join_reader().unwrap()).collect();
        assert_eq!(ch.stats().multicast_mask, u64::MAX);
        assert!(matches!(
            ch.join_reader(),
            Err(ChannelError::NoFreeSlot { max: 64 })
        ));
        drop(readers);
        assert_eq!(ch.reader_count(), 0);
    }

    #[test]
    fn single_writer_role() {
        let ch = channel(2);
        let w = ch.become_writer().unwrap();
        assert!(ch.has_writer());
        assert!(matches!(ch.become_writer(), Err(ChannelError::WriterExists)));
        drop(w);
        assert!(!ch.has_writer());
        assert!(ch.become_writer().is_ok());
    }

    #[test]
    fn reconfigure_requires_no_readers() {
        let ch = channel(4);
        let r = ch.join_reader().unwrap();
        assert!(matches!(
            ch.reconfigure(8, 32, 50, ChecksumMode::None),
            Err(ChannelError::ChannelBusy { readers: 1 })
        ));
        r.leave();

        ch.reconfigure(8, 32, 50, ChecksumMode::None).unwrap();
        let s = ch.stats();
        assert_eq!(s.capacity, 8);
        assert_eq!(s.max_msg_size, 32);
        assert_eq!(s.timeout_ms, 50);
        assert_eq!(s.checksum_mode, ChecksumMode::None);
        assert_eq!(s.write_cursor, 0);
        assert!(ch.reconfigure(0, 32, 50, ChecksumMode::None).is_err());
    }

    #[test]
    fn rollback_restores_cursor() {
        let ch = channel(4);
        let claim = ch.shared.claim(3, false).unwrap().unwrap();
        assert_eq!(ch.stats().write_cursor, 1);
        ch.shared.rollback(&claim);
        assert_eq!(ch.stats().write_cursor, 0);
        assert!(ch.shared.claim(0, false).unwrap().is_none());
        assert!(ch.shared.claim(17, false).unwrap().is_none());
    }

    #[test]
    fn rollback_moves_late_joiners_back() {
        let ch = channel(4);
        let early = ch.join_reader().unwrap();
        let claim = ch.shared.claim(3, false).unwrap().unwrap();
        let late = ch.join_reader().unwrap();
        assert_eq!(late.next_read_idx().get(), 1);

        ch.shared.rollback(&claim);
        assert_eq!(late.next_read_idx().get(), 0);
        assert_eq!(early.next_read_idx().get(), 0);
    }
}
