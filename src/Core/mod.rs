pub mod SharedMemory;
pub mod bitmap;
pub mod checksum;
pub mod futex;
pub mod interrupt;

pub use SharedMemory::{create_shared_memory, RawHandle, SharedMemoryBackend};
