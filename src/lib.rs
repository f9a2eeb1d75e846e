//! Single-writer, multi-reader multicast channels over a shared-memory ring.
//!
//! A writer publishes each message once into a fixed ring of slots; every
//! reader that was subscribed when the message was written receives it, in
//! order. A reader that falls a full ring behind for longer than the channel
//! timeout is evicted instead of stalling the writer.

// Module naming follows project convention (Core / Multicast / Debug)
#[allow(non_snake_case)]
pub mod Core;
#[allow(non_snake_case)]
pub mod Multicast;
#[allow(non_snake_case)]
pub mod Debug {
    pub mod StructDebug;
}

pub mod error;
pub mod ffi;

pub use error::{ChannelError, Result};
pub use Core::checksum::ChecksumMode;
pub use Core::interrupt::CancelToken;
pub use Multicast::Buffer::SlotIndex;
pub use Multicast::Structs::ChannelStats;
pub use Multicast::{
    create_channel, Channel, ChannelBuilder, ChannelConfig, ReaderHandle, ReaderState, Readiness,
    WriterHandle, ZeroCopyView,
};
