use std::io;

use h264_bitstream::ParamsError;
use thiserror::Error;

use crate::config::{Entrypoint, Profile};
use crate::registry::ResourceId;
use crate::session::{SessionState, SessionStep};

/// Status codes returned across the VA boundary. Values match `VAStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Status {
    Success = 0x00,
    OperationFailed = 0x01,
    AllocationFailed = 0x02,
    InvalidConfig = 0x04,
    InvalidContext = 0x05,
    InvalidSurface = 0x06,
    InvalidBuffer = 0x07,
    InvalidImage = 0x08,
    AttrNotSupported = 0x0a,
    MaxNumExceeded = 0x0b,
    UnsupportedProfile = 0x0c,
    UnsupportedEntrypoint = 0x0d,
    UnsupportedRtFormat = 0x0e,
    InvalidParameter = 0x12,
    Unimplemented = 0x14,
    InvalidImageFormat = 0x16,
    DecodingError = 0x17,
}

impl Status {
    pub fn code(self) -> u32 {
        self as u32
    }
}

impl<T> From<&Result<T, DriverError>> for Status {
    fn from(result: &Result<T, DriverError>) -> Self {
        match result {
            Ok(_) => Status::Success,
            Err(e) => e.status(),
        }
    }
}

/// Failure of one decode submission. The session is back in its idle state
/// whenever one of these is returned.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("no picture parameter buffer was enqueued")]
    MissingPictureParameters,
    #[error("no slice parameter buffer was enqueued")]
    MissingSliceParameters,
    #[error("malformed parameter buffer: {0}")]
    MalformedParameters(#[from] ParamsError),
    #[error("hardware decoder does not support the stream")]
    StreamNotSupported,
    #[error("hardware decoder failed with code {0}")]
    Hardware(i32),
    #[error("hardware decoder could not be initialized (code {0})")]
    EngineInit(i32),
}

impl DecodeError {
    pub fn status(&self) -> Status {
        match self {
            DecodeError::MissingPictureParameters
            | DecodeError::MissingSliceParameters
            | DecodeError::MalformedParameters(_) => Status::InvalidBuffer,
            DecodeError::StreamNotSupported | DecodeError::Hardware(_) => Status::DecodingError,
            DecodeError::EngineInit(_) => Status::OperationFailed,
        }
    }
}

/// Rejection of an untrusted request at the driver entry points.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("invalid config id {0}")]
    InvalidConfig(ResourceId),
    #[error("invalid context id {0}")]
    InvalidContext(ResourceId),
    #[error("invalid surface id {0}")]
    InvalidSurface(ResourceId),
    #[error("invalid buffer id {0}")]
    InvalidBuffer(ResourceId),
    #[error("invalid image id {0}")]
    InvalidImage(ResourceId),
    #[error("unsupported profile {0:?}")]
    UnsupportedProfile(Profile),
    #[error("unsupported entrypoint {entrypoint:?} for {profile:?}")]
    UnsupportedEntrypoint {
        profile: Profile,
        entrypoint: Entrypoint,
    },
    #[error("config attribute {attrib_type} does not support value {value:#x}")]
    AttrNotSupported { attrib_type: u32, value: u32 },
    #[error("unsupported render target format {0:#x}")]
    UnsupportedRtFormat(u32),
    #[error("unsupported image format {0:#010x}")]
    InvalidImageFormat(u32),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("{step:?} is out of order in session state {state:?}")]
    OutOfOrder {
        step: SessionStep,
        state: SessionState,
    },
    #[error("buffer object mapping failed: {0}")]
    Mapping(#[from] io::Error),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl DriverError {
    pub fn status(&self) -> Status {
        match self {
            DriverError::InvalidConfig(_) => Status::InvalidConfig,
            DriverError::InvalidContext(_) => Status::InvalidContext,
            DriverError::InvalidSurface(_) => Status::InvalidSurface,
            DriverError::InvalidBuffer(_) => Status::InvalidBuffer,
            DriverError::InvalidImage(_) => Status::InvalidImage,
            DriverError::UnsupportedProfile(_) => Status::UnsupportedProfile,
            DriverError::UnsupportedEntrypoint { .. } => Status::UnsupportedEntrypoint,
            DriverError::AttrNotSupported { .. } => Status::AttrNotSupported,
            DriverError::UnsupportedRtFormat(_) => Status::UnsupportedRtFormat,
            DriverError::InvalidImageFormat(_) => Status::InvalidImageFormat,
            DriverError::InvalidParameter(_) => Status::InvalidParameter,
            DriverError::OutOfOrder { .. } => Status::OperationFailed,
            DriverError::Mapping(_) => Status::AllocationFailed,
            DriverError::Decode(e) => e.status(),
        }
    }

    pub(crate) fn invalid_parameter(msg: impl Into<String>) -> Self {
        DriverError::InvalidParameter(msg.into())
    }
}
