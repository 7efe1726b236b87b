//! Interface to the hardware decoder engine.
//!
//! The engine follows the buffer-negotiation protocol of the VC8000D H.264
//! decoder: a submission reports how much of the stream it consumed and what
//! the caller must do next (resubmit, supply output buffers, collect
//! pictures). Decoded pictures are matched to their destination surface by
//! the `pic_id` the caller attached to the submission.

use bytes::{Bytes, BytesMut};
use h264_bitstream::HeaderProfile;

use crate::error::DecodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DpbFlags {
    #[default]
    RasterScan,
    Tiled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeMode {
    #[default]
    Normal,
    IntraOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorHandling {
    #[default]
    FastFreeze,
    PartialFreeze,
    Conceal,
}

/// Engine settings fixed at context creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderSettings {
    pub dpb_flags: DpbFlags,
    pub decode_mode: DecodeMode,
    pub error_handling: ErrorHandling,
    pub no_output_reordering: bool,
    pub use_adaptive_buffers: bool,
    /// Extra buffers kept on top of what the stream requires.
    pub guard_size: u32,
}

impl Default for DecoderSettings {
    fn default() -> Self {
        DecoderSettings {
            dpb_flags: DpbFlags::RasterScan,
            decode_mode: DecodeMode::Normal,
            error_handling: ErrorHandling::FastFreeze,
            no_output_reordering: true,
            use_adaptive_buffers: true,
            guard_size: 0,
        }
    }
}

/// Everything a factory needs to bring up an engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineParams {
    pub profile: HeaderProfile,
    pub picture_width: u32,
    pub picture_height: u32,
    pub settings: DecoderSettings,
}

/// One submission: the Annex B stream (or its unconsumed remainder).
#[derive(Debug, Clone, Copy)]
pub struct DecodeInput<'a> {
    pub stream: &'a [u8],
    pub pic_id: u32,
    pub skip_non_reference: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// Part of the stream was consumed; resubmit the rest.
    Ok,
    HeadersReady,
    PictureDecoded,
    PendingFlush,
    /// The whole submission has been processed.
    StreamProcessed,
    /// Output buffers must be added before decoding continues.
    WaitingForBuffer,
    StreamNotSupported,
    Error(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOutput {
    pub status: DecodeStatus,
    /// Bytes of the input consumed by this call.
    pub consumed: usize,
}

/// Output buffer requirements reported after `WaitingForBuffer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferInfo {
    pub next_buf_size: usize,
    pub buf_num: u32,
}

/// An output buffer handed to the engine.
#[derive(Debug)]
pub struct LinearBuffer {
    pub size: usize,
    pub data: BytesMut,
}

impl LinearBuffer {
    pub fn zeroed(size: usize) -> Self {
        LinearBuffer {
            size,
            data: BytesMut::zeroed(size),
        }
    }
}

/// A decoded NV12 picture ready for output.
#[derive(Debug, Clone)]
pub struct DecodedPicture {
    pub pic_id: u32,
    pub width: u32,
    pub height: u32,
    pub luma: Bytes,
    pub luma_stride: usize,
    pub chroma: Bytes,
    pub chroma_stride: usize,
}

/// One hardware decoder instance, owned by a single session.
pub trait HwDecoder: Send {
    fn decode(&mut self, input: &DecodeInput<'_>) -> DecodeOutput;

    /// Next picture in output order, if one is ready.
    fn next_picture(&mut self) -> Option<DecodedPicture>;

    /// Return a picture's output buffer to the engine.
    fn picture_consumed(&mut self, picture: &DecodedPicture);

    fn buffer_info(&self) -> BufferInfo;

    fn add_buffer(&mut self, buffer: LinearBuffer);

    fn abort(&mut self);
}

/// Creates engine instances; one per decode context.
pub trait EngineFactory: Send + Sync {
    fn create(&self, params: &EngineParams) -> Result<Box<dyn HwDecoder>, DecodeError>;
}

impl<F> EngineFactory for F
where
    F: Fn(&EngineParams) -> Result<Box<dyn HwDecoder>, DecodeError> + Send + Sync,
{
    fn create(&self, params: &EngineParams) -> Result<Box<dyn HwDecoder>, DecodeError> {
        self(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Idle;

    impl HwDecoder for Idle {
        fn decode(&mut self, input: &DecodeInput<'_>) -> DecodeOutput {
            DecodeOutput {
                status: DecodeStatus::StreamProcessed,
                consumed: input.stream.len(),
            }
        }

        fn next_picture(&mut self) -> Option<DecodedPicture> {
            None
        }

        fn picture_consumed(&mut self, _picture: &DecodedPicture) {}

        fn buffer_info(&self) -> BufferInfo {
            BufferInfo::default()
        }

        fn add_buffer(&mut self, _buffer: LinearBuffer) {}

        fn abort(&mut self) {}
    }

    #[test]
    fn test_default_settings() {
        let settings = DecoderSettings::default();
        assert_eq!(settings.dpb_flags, DpbFlags::RasterScan);
        assert_eq!(settings.error_handling, ErrorHandling::FastFreeze);
        assert!(settings.no_output_reordering);
        assert!(settings.use_adaptive_buffers);
    }

    #[test]
    fn test_closure_factory() {
        let factory = |params: &EngineParams| -> Result<Box<dyn HwDecoder>, DecodeError> {
            if params.picture_width == 0 {
                return Err(DecodeError::EngineInit(-1));
            }
            Ok(Box::new(Idle))
        };
        let mut params = EngineParams {
            profile: HeaderProfile::Main,
            picture_width: 64,
            picture_height: 64,
            settings: DecoderSettings::default(),
        };
        let mut engine = factory.create(&params).unwrap();
        let out = engine.decode(&DecodeInput {
            stream: &[0, 0, 0, 1],
            pic_id: 0,
            skip_non_reference: false,
        });
        assert_eq!(out.status, DecodeStatus::StreamProcessed);
        assert_eq!(out.consumed, 4);

        params.picture_width = 0;
        assert!(matches!(factory.create(&params), Err(DecodeError::EngineInit(-1))));
    }

    #[test]
    fn test_linear_buffer_zeroed() {
        let buf = LinearBuffer::zeroed(16);
        assert_eq!(buf.size, 16);
        assert!(buf.data.iter().all(|&b| b == 0));
    }
}
