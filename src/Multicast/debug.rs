// Debug impls proxy to crate::Debug::StructDebug so the formatting lives in one place.

use std::fmt;

use super::Buffer::Ring;
use super::{Channel, ReaderHandle, WriterHandle};
use crate::Debug::StructDebug;

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        StructDebug::debug_channel(self, f)
    }
}

impl fmt::Debug for Ring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        StructDebug::debug_ring(self, f)
    }
}

impl fmt::Debug for ReaderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        StructDebug::debug_reader(self, f)
    }
}

impl fmt::Debug for WriterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        StructDebug::debug_writer(self, f)
    }
}
