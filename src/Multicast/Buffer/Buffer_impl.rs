use std::ptr;
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use std::sync::atomic::{fence, Ordering};

use super::layout::{
    payload_offset, region_size, slot_stride, slots_offset, RingHeader, SlotHeader,
    LAYOUT_VERSION, MAGIC_NUMBER,
};
use super::Buffer::{Ring, SlotIndex};
use crate::error::{ChannelError, Result};
use crate::Core::bitmap::AtomicBitmap;
use crate::Core::futex;
use crate::Core::SharedMemory::create_shared_memory;
use crate::Multicast::builder::ChannelConfig;

impl Ring {
    /// Map and initialise a fresh ring for `config`.
    ///
    /// The mapping comes back zero-filled, so every slot starts with an empty
    /// pending bitmap and the write cursor at 0.
    pub fn create(config: &ChannelConfig) -> Result<Self> {
        config.validate()?;

        let size = region_size(config.capacity, config.max_msg_size).ok_or_else(|| {
            ChannelError::InvalidConfig(format!(
                "ring of {} x {} bytes does not fit in memory",
                config.capacity, config.max_msg_size
            ))
        })?;

        let shm = create_shared_memory(size, config.shm_name.as_deref()).map_err(|e| {
            log::error!(
                "kzimp: channel {} ring allocation of {} bytes failed: {}",
                config.channel_id,
                size,
                e
            );
            ChannelError::Io(e)
        })?;

        let base = shm.as_ptr();
        if (base as usize) % std::mem::align_of::<RingHeader>() != 0 {
            return Err(ChannelError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "Shared memory not properly aligned",
            )));
        }

        let stride = slot_stride(config.max_msg_size as usize);

        // Initialize header; the atomics are already zero in the fresh mapping
        unsafe {
            let header = base as *mut RingHeader;
            ptr::addr_of_mut!((*header).magic).write(MAGIC_NUMBER);
            ptr::addr_of_mut!((*header).version).write(LAYOUT_VERSION);
            ptr::addr_of_mut!((*header).capacity).write(config.capacity);
            ptr::addr_of_mut!((*header).max_msg_size).write(config.max_msg_size);
            ptr::addr_of_mut!((*header).checksum_mode).write(config.checksum_mode.as_u32());
            ptr::addr_of_mut!((*header).timeout_ms).write(config.timeout_ms());
            ptr::addr_of_mut!((*header).slot_stride).write(stride as u64);
            ptr::addr_of_mut!((*header).channel_id).write(config.channel_id);
        }

        Ok(Self {
            shm,
            base,
            capacity: config.capacity,
            max_msg_size: config.max_msg_size,
            stride,
            checksum_mode: config.checksum_mode,
            timeout: config.timeout,
        })
    }

    #[inline]
    pub fn header(&self) -> &RingHeader {
        unsafe { &*(self.base as *const RingHeader) }
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[inline]
    pub fn max_msg_size(&self) -> u32 {
        self.max_msg_size
    }

    /// Size of the mapped region in bytes.
    pub fn mapped_size(&self) -> usize {
        self.shm.size()
    }

    /// True if the header carries this crate's magic and layout version.
    pub fn is_initialized(&self) -> bool {
        let header = self.header();
        header.magic == MAGIC_NUMBER && header.version == LAYOUT_VERSION
    }

    #[inline]
    unsafe fn slot_ptr(&self, idx: u32) -> *mut u8 {
        debug_assert!(idx < self.capacity, "slot {} out of range {}", idx, self.capacity);
        self.base.add(slots_offset() + idx as usize * self.stride)
    }

    #[inline]
    pub fn slot(&self, idx: SlotIndex) -> &SlotHeader {
        unsafe { &*(self.slot_ptr(idx.0) as *const SlotHeader) }
    }

    #[inline]
    pub fn pending(&self, idx: SlotIndex) -> &AtomicBitmap {
        &self.slot(idx).pending
    }

    #[inline]
    pub fn next_index(&self, idx: SlotIndex) -> SlotIndex {
        SlotIndex((idx.0 + 1) % self.capacity)
    }

    #[inline]
    pub fn write_cursor(&self) -> SlotIndex {
        SlotIndex(self.header().write_cursor.load(Acquire))
    }

    #[inline]
    pub fn set_write_cursor(&self, idx: SlotIndex) {
        self.header().write_cursor.store(idx.0, Release);
    }

    #[inline]
    pub fn multicast_mask(&self) -> &AtomicBitmap {
        &self.header().multicast_mask
    }

    /// Fill slot `idx` with `payload`.
    ///
    /// # Safety
    /// The caller must hold the write side of the slot: its pending bitmap is
    /// empty and no other writer is active. `payload` must fit the slot.
    pub unsafe fn fill_slot(&self, idx: SlotIndex, payload: &[u8]) {
        debug_assert!(payload.len() <= self.max_msg_size as usize);
        debug_assert!(self.pending(idx).is_empty(), "writer overwriting a pending slot");

        let slot = self.slot_ptr(idx.0);
        ptr::copy_nonoverlapping(payload.as_ptr(), slot.add(payload_offset()), payload.len());

        let header = &*(slot as *const SlotHeader);
        header.len.store(payload.len() as u32, Relaxed);
        header
            .checksum
            .store(u32::from(self.checksum_mode.compute(payload)), Relaxed);
    }

    /// Publish the filled slot to the readers in `mask`.
    pub fn publish(&self, idx: SlotIndex, mask: u64) {
        // payload, len and checksum must be visible before any reader sees its bit
        fence(Ordering::Release);
        self.pending(idx).store(mask, Release);
    }

    /// Payload of slot `idx`, as last published.
    ///
    /// # Safety
    /// The caller's bit must be set in the slot's pending bitmap (observed with
    /// acquire ordering) so the writer cannot be refilling it.
    pub unsafe fn payload(&self, idx: SlotIndex) -> &[u8] {
        let slot = self.slot_ptr(idx.0);
        let len = (*(slot as *const SlotHeader)).len.load(Relaxed);
        let len = len.min(self.max_msg_size) as usize;
        std::slice::from_raw_parts(slot.add(payload_offset()), len)
    }

    /// Recompute the checksum of slot `idx` and compare it with the stored one.
    ///
    /// # Safety
    /// Same contract as [`Ring::payload`].
    pub unsafe fn verify(&self, idx: SlotIndex) -> Result<()> {
        if !self.checksum_mode.is_enabled() {
            return Ok(());
        }
        let stored = self.slot(idx).checksum.load(Relaxed) as u16;
        let computed = self.checksum_mode.compute(self.payload(idx));
        if stored == computed {
            Ok(())
        } else {
            Err(ChannelError::ChecksumError { stored, computed })
        }
    }

    /// Remove `mask` from every slot and from the multicast mask.
    ///
    /// Must run under the channel lock; it is how departed and evicted readers
    /// stop holding up the writer anywhere in the ring.
    pub fn clear_everywhere(&self, mask: u64) {
        if mask == 0 {
            return;
        }
        for i in 0..self.capacity {
            self.pending(SlotIndex(i)).clear_mask(mask);
        }
        self.multicast_mask().clear_mask(mask);
    }

    /// Wake every reader blocked on this ring.
    #[inline]
    pub fn wake_readers(&self) {
        futex::signal(&self.header().reader_signal);
    }

    /// Wake the writer blocked on this ring.
    #[inline]
    pub fn wake_writer(&self) {
        futex::signal(&self.header().writer_signal);
    }

    #[inline]
    pub fn reader_signal(&self) -> &std::sync::atomic::AtomicU32 {
        &self.header().reader_signal
    }

    #[inline]
    pub fn writer_signal(&self) -> &std::sync::atomic::AtomicU32 {
        &self.header().writer_signal
    }

    /// Mutable access to a slot's payload bytes, for corruption tests.
    #[cfg(test)]
    pub(crate) unsafe fn payload_mut(&self, idx: SlotIndex) -> &mut [u8] {
        let slot = self.slot_ptr(idx.0);
        std::slice::from_raw_parts_mut(slot.add(payload_offset()), self.max_msg_size as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Core::checksum::ChecksumMode;
    use std::time::Duration;

    fn ring(capacity: u32, max: u32, mode: ChecksumMode) -> Ring {
        Ring::create(&ChannelConfig::new(
            capacity,
            max,
            Duration::from_millis(100),
            mode,
        ))
        .unwrap()
    }

    #[test]
    fn fresh_ring_is_zeroed() {
        let r = ring(4, 16, ChecksumMode::None);
        assert!(r.is_initialized());
        assert_eq!(r.header().capacity, 4);
        assert_eq!(r.header().slot_stride as usize, r.stride);
        for i in 0..4 {
            assert!(r.pending(SlotIndex(i)).is_empty());
        }
        assert_eq!(r.write_cursor(), SlotIndex(0));
        assert!(r.mapped_size() >= region_size(4, 16).unwrap());
    }

    #[test]
    fn fill_publish_read() {
        let r = ring(2, 8, ChecksumMode::HeaderAndPayload);
        unsafe {
            r.fill_slot(SlotIndex(1), b"abc");
        }
        r.publish(SlotIndex(1), 0b11);
        assert!(r.pending(SlotIndex(1)).test(0));
        unsafe {
            assert_eq!(r.payload(SlotIndex(1)), b"abc");
            assert!(r.verify(SlotIndex(1)).is_ok());
            r.payload_mut(SlotIndex(1))[0] = b'x';
            assert!(matches!(
                r.verify(SlotIndex(1)),
                Err(ChannelError::ChecksumError { .. })
            ));
        }
    }

    #[test]
    fn clear_everywhere_strips_all_slots() {
        let r = ring(3, 8, ChecksumMode::None);
        r.multicast_mask().store(0b111, Relaxed);
        for i in 0..3 {
            r.publish(SlotIndex(i), 0b110);
        }
        r.clear_everywhere(0b010);
        for i in 0..3 {
            assert_eq!(r.pending(SlotIndex(i)).load(Relaxed), 0b100);
        }
        assert_eq!(r.multicast_mask().load(Relaxed), 0b101);
    }

    #[test]
    fn cursor_wraps() {
        let r = ring(3, 8, ChecksumMode::None);
        assert_eq!(r.next_index(SlotIndex(0)), SlotIndex(1));
        assert_eq!(r.next_index(SlotIndex(2)), SlotIndex(0));
    }
}
