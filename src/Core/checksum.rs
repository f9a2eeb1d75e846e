// 16-bit one's complement sum (RFC 793 style) over the message header and,
// optionally, the payload.

use std::fmt;

use crate::error::{ChannelError, Result};

/// Bytes of the virtual header covered by the checksum: an empty bitmap
/// word, the message length, and a zeroed checksum field.
pub const HEADER_BYTES: usize = 8 + 4 + 2;

/// What a slot checksum covers.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumMode {
    /// No checksum is computed; every read verifies trivially.
    None = 0,
    /// Only the header (message length) is covered.
    HeaderOnly = 1,
    /// Header and payload are covered.
    #[default]
    HeaderAndPayload = 2,
}

impl ChecksumMode {
    pub fn from_u32(raw: u32) -> Result<Self> {
        match raw {
            0 => Ok(Self::None),
            1 => Ok(Self::HeaderOnly),
            2 => Ok(Self::HeaderAndPayload),
            other => Err(ChannelError::InvalidConfig(format!(
                "unknown checksum mode {}",
                other
            ))),
        }
    }

    #[inline]
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    #[inline]
    pub fn is_enabled(self) -> bool {
        self != Self::None
    }

    /// Checksum of a message of `payload.len()` bytes under this mode.
    pub fn compute(self, payload: &[u8]) -> u16 {
        match self {
            Self::None => 0,
            Self::HeaderOnly => ones_complement_sum(0, &header_bytes(payload.len())),
            Self::HeaderAndPayload => {
                ones_complement_sum(ones_complement_sum(0, &header_bytes(payload.len())), payload)
            }
        }
    }
}

impl fmt::Display for ChecksumMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::HeaderOnly => "header",
            Self::HeaderAndPayload => "header+payload",
        };
        f.write_str(name)
    }
}

fn header_bytes(len: usize) -> [u8; HEADER_BYTES] {
    let mut header = [0u8; HEADER_BYTES];
    header[8..12].copy_from_slice(&(len as u32).to_le_bytes());
    header
}

/// One's complement sum of the little-endian 16-bit words of `data`,
/// continuing from `prev`. A trailing odd byte is padded with zero.
pub fn ones_complement_sum(prev: u16, data: &[u8]) -> u16 {
    let mut sum = u32::from(prev);

    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum += u32::from(u16::from_le_bytes([word[0], word[1]]));
        // fold early so the accumulator never overflows on large payloads
        if sum > 0xFFFF_0000 {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }
    }
    if let [last] = words.remainder() {
        sum += u32::from(*last);
    }

    while sum > 0xFFFF {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum as u16
}
