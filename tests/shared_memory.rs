// Shared memory backend tests
// Run with: cargo test --test shared_memory -- --nocapture

use kzimp::Core::SharedMemory::{align_region, REGION_ALIGN};
use kzimp::Core::{create_shared_memory, RawHandle};

#[test]
fn test_create_rounds_to_region_align() {
    for size in [1usize, 127, 128, 4096, 65536 + 3] {
        let shm = create_shared_memory(size, None).unwrap();
        assert_eq!(shm.size(), align_region(size));
        assert_eq!(shm.size() % REGION_ALIGN, 0);
        assert_eq!(shm.as_ptr() as usize % REGION_ALIGN, 0);
    }
}

#[test]
fn test_empty_region_rejected() {
    let err = create_shared_memory(0, None).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
}

#[test]
fn test_region_zero_initialized_and_writable() {
    let size = 8192;
    let shm = create_shared_memory(size, None).unwrap();

    unsafe {
        let slice = std::slice::from_raw_parts_mut(shm.as_ptr(), size);
        assert!(slice.iter().all(|&b| b == 0), "region should be zero-initialized");

        for (i, b) in slice.iter_mut().enumerate().take(100) {
            *b = (i % 256) as u8;
        }
        for (i, b) in slice.iter().enumerate().take(100) {
            assert_eq!(*b, (i % 256) as u8);
        }
    }
}

#[cfg(target_os = "linux")]
mod linux_tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_anonymous_region_has_fd() {
        let shm = create_shared_memory(4096, None).unwrap();
        match shm.raw_handle() {
            RawHandle::Fd(fd) => assert!(fd > 0, "File descriptor should be positive"),
            RawHandle::Heap => panic!("expected a memfd-backed region"),
        }
    }

    #[test]
    fn test_named_region_unlinked_on_drop() {
        let name = format!("kzimp-test-{}", std::process::id());
        let path = format!("/dev/shm/{}", name);
        {
            let shm = create_shared_memory(4096, Some(&name)).unwrap();
            assert!(Path::new(&path).exists());
            unsafe {
                *shm.as_ptr() = 0x42;
                assert_eq!(*shm.as_ptr(), 0x42);
            }
        }
        assert!(!Path::new(&path).exists());
    }
}

#[cfg(not(target_os = "linux"))]
mod heap_tests {
    use super::*;

    #[test]
    fn test_heap_fallback() {
        let shm = create_shared_memory(4096, Some("ignored")).unwrap();
        assert_eq!(shm.raw_handle(), RawHandle::Heap);
    }
}
