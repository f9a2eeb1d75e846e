mod builder;
mod channel;
mod debug;
mod reader;
mod view;
mod writer;

pub use builder::{
    ChannelBuilder, ChannelConfig, DEFAULT_CHANNEL_SIZE, DEFAULT_MAX_MSG_SIZE, DEFAULT_TIMEOUT_MS,
    ENV_CHANNEL_SIZE, ENV_COMPUTE_CHECKSUM, ENV_MAX_MSG_SIZE, ENV_TIMEOUT_MS,
};
pub use channel::{create_channel, Channel, ReaderState};
pub use reader::{ReaderHandle, Readiness};
pub use view::ZeroCopyView;
pub use writer::WriterHandle;

pub mod Buffer {
    pub mod Buffer;
    pub mod Buffer_impl;
    pub mod layout;
    pub use Buffer::{Ring, SlotIndex}; // re-export for stable path
}

pub mod Structs {
    pub mod Stats;
    pub use Stats::ChannelStats; // re-export for stable path
}
