//! Error types for channel operations.

use thiserror::Error;

/// Errors returned by channel, reader, and writer operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Creation or reconfiguration parameters are invalid.
    #[error("invalid channel configuration: {0}")]
    InvalidConfig(String),

    /// Every reader bit of the channel is already claimed.
    #[error("no free reader slot (max: {max})")]
    NoFreeSlot {
        /// Number of reader bits the channel offers.
        max: u32,
    },

    /// A non-blocking call had nothing to do.
    #[error("operation would block")]
    WouldBlock,

    /// A blocking wait was cancelled.
    #[error("wait interrupted")]
    Interrupted,

    /// The reader was evicted by the writer or has left the channel.
    #[error("reader is offline")]
    Gone,

    /// The message read does not match its checksum. The slot was still released.
    #[error("checksum mismatch (stored {stored:#06x}, computed {computed:#06x})")]
    ChecksumError {
        /// Checksum written alongside the message.
        stored: u16,
        /// Checksum recomputed by the reader.
        computed: u16,
    },

    /// Reconfiguration attempted while readers are registered.
    #[error("channel busy: {readers} reader(s) registered")]
    ChannelBusy {
        /// Number of readers currently registered.
        readers: u32,
    },

    /// The channel already has a writer.
    #[error("channel already has a writer")]
    WriterExists,

    /// A reader-side deadline passed with nothing to read.
    #[error("timed out waiting for a message")]
    TimedOut,

    /// A slot index handed to `finish_read` was not acquired by `start_read`.
    #[error("slot {0} is not held by this reader")]
    NotHeld(u32),

    /// The interrupt handler could not be installed.
    #[error("failed to install signal handler: {0}")]
    Signal(String),

    /// Mapping the shared ring failed.
    #[error("shared memory error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChannelError {
    /// Returns `true` if the caller may simply retry (possibly later).
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NoFreeSlot { .. }
                | Self::WouldBlock
                | Self::Interrupted
                | Self::ChecksumError { .. }
                | Self::ChannelBusy { .. }
                | Self::TimedOut
        )
    }

    /// Returns `true` if the handle that produced this error is permanently unusable.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Gone)
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ChannelError>;
