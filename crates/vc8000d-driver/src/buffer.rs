use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::{Bytes, BytesMut};

use crate::registry::{Resource, ResourceId};

/// `VABufferType` values the decoder distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferType {
    PictureParameter,
    IqMatrix,
    SliceParameter,
    SliceData,
    Image,
    Other(u32),
}

impl BufferType {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => BufferType::PictureParameter,
            1 => BufferType::IqMatrix,
            4 => BufferType::SliceParameter,
            5 => BufferType::SliceData,
            9 => BufferType::Image,
            other => BufferType::Other(other),
        }
    }

    pub fn raw(self) -> u32 {
        match self {
            BufferType::PictureParameter => 0,
            BufferType::IqMatrix => 1,
            BufferType::SliceParameter => 4,
            BufferType::SliceData => 5,
            BufferType::Image => 9,
            BufferType::Other(raw) => raw,
        }
    }
}

/// A parameter or data buffer (`VABufferID`).
///
/// The contents stay writable after creation through [`map`](Self::map), the
/// way clients fill buffers with `vaMapBuffer`.
#[derive(Debug)]
pub struct Buffer {
    id: ResourceId,
    context: Option<ResourceId>,
    buffer_type: BufferType,
    data: Mutex<BytesMut>,
}

impl Buffer {
    /// A buffer of `size` bytes, initialized from `init` when given and zeroed
    /// otherwise.
    pub fn new(
        id: ResourceId,
        context: Option<ResourceId>,
        buffer_type: BufferType,
        size: usize,
        init: Option<&[u8]>,
    ) -> Self {
        let data = match init {
            Some(bytes) => {
                assert_eq!(bytes.len(), size, "initial data does not match buffer size");
                BytesMut::from(bytes)
            }
            None => BytesMut::zeroed(size),
        };
        Buffer {
            id,
            context,
            buffer_type,
            data: Mutex::new(data),
        }
    }

    /// Owning context; `None` for image buffers.
    pub fn context(&self) -> Option<ResourceId> {
        self.context
    }

    pub fn buffer_type(&self) -> BufferType {
        self.buffer_type
    }

    pub fn size(&self) -> usize {
        self.map().len()
    }

    /// Exclusive access to the contents.
    pub fn map(&self) -> MutexGuard<'_, BytesMut> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the contents.
    pub fn bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.map())
    }
}

impl Resource for Buffer {
    fn id(&self) -> ResourceId {
        self.id
    }
}
