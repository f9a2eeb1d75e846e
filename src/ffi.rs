use crate::error::ChannelError;
use crate::Core::checksum::ChecksumMode;
use crate::Multicast::Buffer::SlotIndex;
use crate::Multicast::Structs::ChannelStats;
use crate::Multicast::{Channel, ReaderHandle, WriterHandle};
use std::ptr;

// Error codes
pub const KZIMP_SUCCESS: i32 = 0;
pub const KZIMP_ERROR_NULL_POINTER: i32 = -1;
pub const KZIMP_ERROR_INVALID_ARG: i32 = -2;
pub const KZIMP_ERROR_NO_FREE_SLOT: i32 = -3;
pub const KZIMP_ERROR_WOULD_BLOCK: i32 = -4;
pub const KZIMP_ERROR_INTERRUPTED: i32 = -5;
pub const KZIMP_ERROR_GONE: i32 = -6;
pub const KZIMP_ERROR_CHECKSUM: i32 = -7;
pub const KZIMP_ERROR_BUSY: i32 = -8;
pub const KZIMP_ERROR_WRITER_EXISTS: i32 = -9;
pub const KZIMP_ERROR_TIMED_OUT: i32 = -10;
pub const KZIMP_ERROR_INTERNAL: i32 = -11;

// kzimp_poll readiness bits
pub const KZIMP_POLLIN: i32 = 0x1;
pub const KZIMP_POLLHUP: i32 = 0x2;

/// Handle to a channel (opaque pointer)
pub struct KzimpChannel {
    inner: Channel,
}

/// Handle to a subscribed reader (opaque pointer)
pub struct KzimpReader {
    inner: ReaderHandle,
}

/// Handle to the channel's writer (opaque pointer)
pub struct KzimpWriter {
    inner: WriterHandle,
}

/// Channel snapshot filled in by `kzimp_channel_stats`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KzimpStats {
    pub channel_id: u32,
    pub capacity: u32,
    pub max_msg_size: u32,
    pub reader_count: u32,
    pub online_readers: u32,
    pub checksum_mode: u32,
    pub multicast_mask: u64,
    pub timeout_ms: u64,
    pub write_cursor: u32,
    pub writer_attached: u32,
}

impl From<ChannelStats> for KzimpStats {
    fn from(s: ChannelStats) -> Self {
        Self {
            channel_id: s.channel_id,
            capacity: s.capacity,
            max_msg_size: s.max_msg_size,
            reader_count: s.reader_count,
            online_readers: s.online_readers,
            checksum_mode: s.checksum_mode.as_u32(),
            multicast_mask: s.multicast_mask,
            timeout_ms: s.timeout_ms,
            write_cursor: s.write_cursor,
            writer_attached: u32::from(s.writer_attached),
        }
    }
}

/// Map a channel error onto its C error code.
pub fn error_code(err: &ChannelError) -> i32 {
    match err {
        ChannelError::InvalidConfig(_) => KZIMP_ERROR_INVALID_ARG,
        ChannelError::NoFreeSlot { .. } => KZIMP_ERROR_NO_FREE_SLOT,
        ChannelError::WouldBlock => KZIMP_ERROR_WOULD_BLOCK,
        ChannelError::Interrupted => KZIMP_ERROR_INTERRUPTED,
        ChannelError::Gone => KZIMP_ERROR_GONE,
        ChannelError::ChecksumError { .. } => KZIMP_ERROR_CHECKSUM,
        ChannelError::ChannelBusy { .. } => KZIMP_ERROR_BUSY,
        ChannelError::WriterExists => KZIMP_ERROR_WRITER_EXISTS,
        ChannelError::TimedOut => KZIMP_ERROR_TIMED_OUT,
        ChannelError::NotHeld(_) => KZIMP_ERROR_INVALID_ARG,
        ChannelError::Signal(_) | ChannelError::Io(_) => KZIMP_ERROR_INTERNAL,
    }
}

fn parse_checksum_mode(raw: u32) -> Option<ChecksumMode> {
    ChecksumMode::from_u32(raw).ok()
}

// -----------------------------------------------------------------------------
// Channel API
// -----------------------------------------------------------------------------

/// Create a new channel.
///
/// # Arguments
/// * `capacity` - Number of slots.
/// * `max_msg_size` - Largest payload in bytes.
/// * `timeout_ms` - How long the writer waits before evicting slow readers.
/// * `checksum_mode` - 0 none, 1 header only, 2 header and payload.
///
/// # Returns
/// * Pointer to `KzimpChannel`, or NULL on failure.
#[no_mangle]
pub extern "C" fn kzimp_channel_new(
    capacity: u32,
    max_msg_size: u32,
    timeout_ms: u64,
    checksum_mode: u32,
) -> *mut KzimpChannel {
    let Some(mode) = parse_checksum_mode(checksum_mode) else {
        log::error!("kzimp ffi: unknown checksum mode {}", checksum_mode);
        return ptr::null_mut();
    };

    match Channel::create(capacity, max_msg_size, timeout_ms, mode) {
        Ok(channel) => Box::into_raw(Box::new(KzimpChannel { inner: channel })),
        Err(e) => {
            log::error!("kzimp ffi: failed to create channel: {}", e);
            ptr::null_mut()
        }
    }
}

/// Replace the channel's geometry. Fails with `KZIMP_ERROR_BUSY` while readers are attached.
#[no_mangle]
pub extern "C" fn kzimp_channel_reconfigure(
    handle: *mut KzimpChannel,
    capacity: u32,
    max_msg_size: u32,
    timeout_ms: u64,
    checksum_mode: u32,
) -> i32 {
    if handle.is_null() {
        return KZIMP_ERROR_NULL_POINTER;
    }
    let Some(mode) = parse_checksum_mode(checksum_mode) else {
        return KZIMP_ERROR_INVALID_ARG;
    };

    let channel = unsafe { &(*handle).inner };
    match channel.reconfigure(capacity, max_msg_size, timeout_ms, mode) {
        Ok(()) => KZIMP_SUCCESS,
        Err(e) => error_code(&e),
    }
}

/// Free a channel handle. Readers and writers created from it stay usable.
#[no_mangle]
pub extern "C" fn kzimp_channel_free(handle: *mut KzimpChannel) {
    if !handle.is_null() {
        unsafe {
            let _ = Box::from_raw(handle); // Dropped automatically
        }
    }
}

/// Copy a snapshot of the channel into `out`.
#[no_mangle]
pub extern "C" fn kzimp_channel_stats(handle: *mut KzimpChannel, out: *mut KzimpStats) -> i32 {
    if handle.is_null() || out.is_null() {
        return KZIMP_ERROR_NULL_POINTER;
    }
    let stats = unsafe { (*handle).inner.stats() };
    unsafe {
        out.write(KzimpStats::from(stats));
    }
    KZIMP_SUCCESS
}

// -----------------------------------------------------------------------------
// Reader API
// -----------------------------------------------------------------------------

/// Subscribe a new reader.
///
/// # Returns
/// * Pointer to `KzimpReader`, or NULL on failure.
#[no_mangle]
pub extern "C" fn kzimp_reader_join(handle: *mut KzimpChannel) -> *mut KzimpReader {
    if handle.is_null() {
        return ptr::null_mut();
    }
    let channel = unsafe { &(*handle).inner };
    match channel.join_reader() {
        Ok(reader) => Box::into_raw(Box::new(KzimpReader { inner: reader })),
        Err(e) => {
            log::error!("kzimp ffi: failed to join reader: {}", e);
            ptr::null_mut()
        }
    }
}

/// Receive a message.
///
/// # Arguments
/// * `handle` - Pointer to `KzimpReader`.
/// * `buffer` - Destination buffer.
/// * `buffer_len` - Size of the destination buffer.
/// * `nonblocking` - Non-zero to fail with `KZIMP_ERROR_WOULD_BLOCK` instead of waiting.
///
/// # Returns
/// * Bytes copied on success, negative error code otherwise.
#[no_mangle]
pub extern "C" fn kzimp_recv(
    handle: *mut KzimpReader,
    buffer: *mut u8,
    buffer_len: usize,
    nonblocking: i32,
) -> isize {
    if handle.is_null() || buffer.is_null() {
        return KZIMP_ERROR_NULL_POINTER as isize;
    }

    let reader = unsafe { &mut (*handle).inner };
    let buf = unsafe { std::slice::from_raw_parts_mut(buffer, buffer_len) };

    let res = if nonblocking != 0 {
        reader.try_recv(buf)
    } else {
        reader.recv(buf)
    };
    match res {
        Ok(n) => n as isize,
        Err(e) => error_code(&e) as isize,
    }
}

/// Readiness of a reader: `KZIMP_POLLIN` if a message is waiting,
/// `KZIMP_POLLHUP` if the reader has been evicted.
#[no_mangle]
pub extern "C" fn kzimp_poll(handle: *mut KzimpReader) -> i32 {
    if handle.is_null() {
        return KZIMP_ERROR_NULL_POINTER;
    }
    let readiness = unsafe { (*handle).inner.readiness() };
    let mut bits = 0;
    if readiness.readable {
        bits |= KZIMP_POLLIN;
    }
    if readiness.hangup {
        bits |= KZIMP_POLLHUP;
    }
    bits
}

/// Acquire the next message in place.
///
/// On success `*data` and `*len` describe the payload inside the ring and the
/// slot index is returned; pass it to `kzimp_finish_read`. The bytes stay
/// valid until then, unless the reader is evicted in the meantime.
#[no_mangle]
pub extern "C" fn kzimp_start_read(
    handle: *mut KzimpReader,
    data: *mut *const u8,
    len: *mut usize,
    nonblocking: i32,
) -> i32 {
    if handle.is_null() || data.is_null() || len.is_null() {
        return KZIMP_ERROR_NULL_POINTER;
    }

    let reader = unsafe { &mut (*handle).inner };
    let res = if nonblocking != 0 {
        reader.try_start_read()
    } else {
        reader.start_read()
    };
    match res {
        Ok(view) => {
            // dropping the view keeps the slot held
            unsafe {
                data.write(view.as_ptr());
                len.write(view.len());
            }
            view.index().get() as i32
        }
        Err(e) => error_code(&e),
    }
}

/// Release the slot returned by `kzimp_start_read`.
#[no_mangle]
pub extern "C" fn kzimp_finish_read(handle: *mut KzimpReader, idx: u32) -> i32 {
    if handle.is_null() {
        return KZIMP_ERROR_NULL_POINTER;
    }
    let reader = unsafe { &mut (*handle).inner };
    match reader.finish_read(SlotIndex(idx)) {
        Ok(()) => KZIMP_SUCCESS,
        Err(e) => error_code(&e),
    }
}

/// Leave the channel and free the reader handle.
#[no_mangle]
pub extern "C" fn kzimp_reader_leave(handle: *mut KzimpReader) {
    if !handle.is_null() {
        let reader = unsafe { *Box::from_raw(handle) };
        reader.inner.leave();
    }
}

// -----------------------------------------------------------------------------
// Writer API
// -----------------------------------------------------------------------------

/// Take the writer role.
///
/// # Returns
/// * Pointer to `KzimpWriter`, or NULL if the channel already has a writer.
#[no_mangle]
pub extern "C" fn kzimp_writer_new(handle: *mut KzimpChannel) -> *mut KzimpWriter {
    if handle.is_null() {
        return ptr::null_mut();
    }
    let channel = unsafe { &(*handle).inner };
    match channel.become_writer() {
        Ok(writer) => Box::into_raw(Box::new(KzimpWriter { inner: writer })),
        Err(e) => {
            log::error!("kzimp ffi: failed to become writer: {}", e);
            ptr::null_mut()
        }
    }
}

/// Send a message.
///
/// # Returns
/// * Bytes written (0 if `len` is 0 or too large), negative error code otherwise.
#[no_mangle]
pub extern "C" fn kzimp_send(
    handle: *mut KzimpWriter,
    data: *const u8,
    len: usize,
    nonblocking: i32,
) -> isize {
    if handle.is_null() || (data.is_null() && len != 0) {
        return KZIMP_ERROR_NULL_POINTER as isize;
    }

    let writer = unsafe { &mut (*handle).inner };
    let slice: &[u8] = if len == 0 {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(data, len) }
    };

    let res = if nonblocking != 0 {
        writer.try_send(slice)
    } else {
        writer.send(slice)
    };
    match res {
        Ok(n) => n as isize,
        Err(e) => error_code(&e) as isize,
    }
}

/// Give up the writer role and free the handle.
#[no_mangle]
pub extern "C" fn kzimp_writer_free(handle: *mut KzimpWriter) {
    if !handle.is_null() {
        unsafe {
            let _ = Box::from_raw(handle);
        }
    }
}
