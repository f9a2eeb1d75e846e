// Shared memory backend abstraction
// Linux uses memfd_create (or a named /dev/shm file) + mmap; other targets
// fall back to an aligned heap region so the ring logic stays portable.

use std::fmt::Debug;
use std::io;
use std::ptr::NonNull;

/// Alignment guaranteed for the start of every mapped region.
pub const REGION_ALIGN: usize = 128;

/// A zero-filled memory region a ring can be laid out in.
pub trait SharedMemoryBackend: Send + Sync + Debug {
    /// Start of the region, aligned to [`REGION_ALIGN`].
    fn as_ptr(&self) -> *mut u8;

    /// Usable bytes, already rounded up to [`REGION_ALIGN`].
    fn size(&self) -> usize;

    /// Get the underlying handle
    fn raw_handle(&self) -> RawHandle;
}

/// OS handle behind a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawHandle {
    /// memfd or /dev/shm file descriptor
    Fd(i32),
    /// Process-private heap region, no OS handle
    Heap,
}

/// Round `size` up to the region alignment.
#[inline]
pub fn align_region(size: usize) -> usize {
    (size + REGION_ALIGN - 1) & !(REGION_ALIGN - 1)
}

/// Create a new zero-filled shared memory region with the specified size
///
/// # Arguments
/// * `size` - Size of the shared memory region in bytes
/// * `name` - Optional name; when given the region is backed by `/dev/shm/<name>`
///   so other tools can map it, otherwise an anonymous memfd is used
#[cfg(target_os = "linux")]
pub fn create_shared_memory(
    size: usize,
    name: Option<&str>,
) -> io::Result<Box<dyn SharedMemoryBackend>> {
    Ok(Box::new(LinuxSharedMemory::create(size, name)?))
}

#[cfg(not(target_os = "linux"))]
pub fn create_shared_memory(
    size: usize,
    _name: Option<&str>,
) -> io::Result<Box<dyn SharedMemoryBackend>> {
    Ok(Box::new(HeapMemory::create(size)?))
}

#[cfg(target_os = "linux")]
#[derive(Debug)]
pub struct LinuxSharedMemory {
    ptr: NonNull<u8>,
    size: usize,
    fd: i32,
    path: Option<String>,
}

#[cfg(target_os = "linux")]
unsafe impl Send for LinuxSharedMemory {}
#[cfg(target_os = "linux")]
unsafe impl Sync for LinuxSharedMemory {}

#[cfg(target_os = "linux")]
impl LinuxSharedMemory {
    pub fn create(size: usize, name: Option<&str>) -> io::Result<Self> {
        use std::ffi::CString;
        use std::fs::OpenOptions;
        use std::os::fd::IntoRawFd;
        use std::os::unix::fs::OpenOptionsExt;

        if size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "shared memory region must not be empty",
            ));
        }
        let size = align_region(size);

        let (fd, path) = match name {
            Some(name) => {
                let path = format!("/dev/shm/{}", name);
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .mode(0o600)
                    .open(&path)
                    .map_err(|e| {
                        io::Error::new(
                            e.kind(),
                            format!("Failed to create shared memory file at {}: {}", path, e),
                        )
                    })?;
                (file.into_raw_fd(), Some(path))
            }
            None => {
                let c_name = CString::new("kzimp").map_err(|e| {
                    io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
                })?;
                let fd = unsafe { libc::memfd_create(c_name.as_ptr(), libc::MFD_CLOEXEC) };
                if fd < 0 {
                    return Err(io::Error::last_os_error());
                }
                (fd, None)
            }
        };

        // ftruncate zero-fills the region
        if unsafe { libc::ftruncate(fd, size as libc::off_t) } != 0 {
            let err = io::Error::last_os_error();
            Self::discard(fd, path.as_deref());
            return Err(err);
        }

        // mmap returns page-aligned addresses, which satisfies REGION_ALIGN
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            let err = io::Error::last_os_error();
            Self::discard(fd, path.as_deref());
            return Err(err);
        }

        let ptr = match NonNull::new(ptr as *mut u8) {
            Some(ptr) => ptr,
            None => {
                Self::discard(fd, path.as_deref());
                return Err(io::Error::new(io::ErrorKind::Other, "mmap returned null"));
            }
        };

        Ok(Self {
            ptr,
            size,
            fd,
            path,
        })
    }

    fn discard(fd: i32, path: Option<&str>) {
        unsafe {
            libc::close(fd);
        }
        if let Some(path) = path {
            let _ = std::fs::remove_file(path);
        }
    }

    /// Filesystem path of a named region.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }
}

#[cfg(target_os = "linux")]
impl Drop for LinuxSharedMemory {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size);
        }
        Self::discard(self.fd, self.path.as_deref());
    }
}

#[cfg(target_os = "linux")]
impl SharedMemoryBackend for LinuxSharedMemory {
    fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn size(&self) -> usize {
        self.size
    }

    fn raw_handle(&self) -> RawHandle {
        RawHandle::Fd(self.fd)
    }
}

/// Aligned, zeroed heap region used where no shared mapping is available.
#[derive(Debug)]
pub struct HeapMemory {
    ptr: NonNull<u8>,
    layout: std::alloc::Layout,
}

unsafe impl Send for HeapMemory {}
unsafe impl Sync for HeapMemory {}

impl HeapMemory {
    pub fn create(size: usize) -> io::Result<Self> {
        if size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "shared memory region must not be empty",
            ));
        }
        let layout = std::alloc::Layout::from_size_align(align_region(size), REGION_ALIGN)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::OutOfMemory,
                format!("Failed to allocate {} bytes", layout.size()),
            )
        })?;
        Ok(Self { ptr, layout })
    }
}

impl Drop for HeapMemory {
    fn drop(&mut self) {
        unsafe { std::alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

impl SharedMemoryBackend for HeapMemory {
    fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn size(&self) -> usize {
        self.layout.size()
    }

    fn raw_handle(&self) -> RawHandle {
        RawHandle::Heap
    }
}
