use bytes::Bytes;
use tracing::{debug, trace};

use vc8000d_driver::{
    BufferInfo, DecodeError, DecodeInput, DecodeOutput, DecodeStatus, DecodedPicture,
    EngineFactory, EngineParams, HwDecoder, LinearBuffer,
};

/// Output buffers the loopback engine asks for before its first picture.
const DPB_BUFFERS: u32 = 2;

/// Creates engines that walk the hardware protocol without a decoder: every
/// submission yields one flat gray picture.
#[derive(Debug, Default)]
pub struct LoopbackFactory;

impl EngineFactory for LoopbackFactory {
    fn create(&self, params: &EngineParams) -> Result<Box<dyn HwDecoder>, DecodeError> {
        if params.picture_width == 0 || params.picture_height == 0 {
            return Err(DecodeError::EngineInit(-1));
        }
        debug!(
            profile = ?params.profile,
            width = params.picture_width,
            height = params.picture_height,
            "loopback engine created"
        );
        Ok(Box::new(LoopbackEngine {
            width: params.picture_width,
            height: params.picture_height,
            buffers: Vec::new(),
            decoded: None,
            ready: None,
        }))
    }
}

struct LoopbackEngine {
    width: u32,
    height: u32,
    buffers: Vec<LinearBuffer>,
    /// Picture decoded from the current submission, not yet handed out.
    decoded: Option<u32>,
    ready: Option<DecodedPicture>,
}

impl LoopbackEngine {
    fn gray_picture(&self, pic_id: u32) -> DecodedPicture {
        let (width, height) = (self.width as usize, self.height as usize);
        let stride = width.next_multiple_of(2);
        DecodedPicture {
            pic_id,
            width: self.width,
            height: self.height,
            luma: Bytes::from(vec![0x80; stride * height]),
            luma_stride: stride,
            chroma: Bytes::from(vec![0x80; stride * height.div_ceil(2)]),
            chroma_stride: stride,
        }
    }
}

impl HwDecoder for LoopbackEngine {
    fn decode(&mut self, input: &DecodeInput<'_>) -> DecodeOutput {
        if self.buffers.len() < DPB_BUFFERS as usize {
            return DecodeOutput {
                status: DecodeStatus::WaitingForBuffer,
                consumed: 0,
            };
        }
        if self.decoded.is_none() && !input.stream.is_empty() {
            trace!(pic_id = input.pic_id, len = input.stream.len(), "loopback decode");
            self.decoded = Some(input.pic_id);
            self.ready = Some(self.gray_picture(input.pic_id));
            return DecodeOutput {
                status: DecodeStatus::PictureDecoded,
                consumed: input.stream.len(),
            };
        }
        self.decoded = None;
        DecodeOutput {
            status: DecodeStatus::StreamProcessed,
            consumed: input.stream.len(),
        }
    }

    fn next_picture(&mut self) -> Option<DecodedPicture> {
        self.ready.take()
    }

    fn picture_consumed(&mut self, picture: &DecodedPicture) {
        trace!(pic_id = picture.pic_id, "picture consumed");
    }

    fn buffer_info(&self) -> BufferInfo {
        let frame = self.width.next_multiple_of(16) * self.height.next_multiple_of(16);
        BufferInfo {
            next_buf_size: (frame * 3 / 2) as usize,
            buf_num: DPB_BUFFERS - self.buffers.len() as u32,
        }
    }

    fn add_buffer(&mut self, buffer: LinearBuffer) {
        self.buffers.push(buffer);
    }

    fn abort(&mut self) {
        self.decoded = None;
        self.ready = None;
    }
}
