use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use h264_bitstream::{
    build_pps, build_sps, BitWriter, HeaderOptions, HeaderProfile, PictureParameters,
    SliceParameters, START_CODE,
};
use tracing::{debug, trace, warn};

use super::{DecodeSession, ReadyPicture, SessionOptions, SessionState, SessionStep};
use crate::buffer::{Buffer, BufferType};
use crate::engine::{DecodeInput, DecodeStatus, DecodedPicture, HwDecoder, LinearBuffer};
use crate::error::DecodeError;
use crate::registry::Resource;
use crate::render_target_cache::{PictureTag, RenderTargetCache};
use crate::surface::Surface;

/// Hardware H.264 session: rebuilds SPS/PPS from the VA parameter buffers and
/// feeds the engine one picture per `run`.
pub struct H264Session {
    engine: Box<dyn HwDecoder>,
    profile: HeaderProfile,
    picture_width: u32,
    picture_height: u32,
    state: SessionState,
    current_tag: PictureTag,
    render_target: Option<Arc<Surface>>,
    pic_params: Option<Arc<Buffer>>,
    iq_matrix: Option<Arc<Buffer>>,
    slice_params: Vec<Arc<Buffer>>,
    slice_data: Vec<Arc<Buffer>>,
    render_targets: RenderTargetCache<Weak<Surface>>,
    bitstream_dump: Option<PathBuf>,
}

impl H264Session {
    pub fn new(engine: Box<dyn HwDecoder>, profile: HeaderProfile, options: SessionOptions) -> Self {
        H264Session {
            engine,
            profile,
            picture_width: options.picture_width,
            picture_height: options.picture_height,
            state: SessionState::Idle,
            current_tag: 0,
            render_target: None,
            pic_params: None,
            iq_matrix: None,
            slice_params: Vec::new(),
            slice_data: Vec::new(),
            render_targets: RenderTargetCache::new(options.render_target_cache_size),
            bitstream_dump: options.bitstream_dump,
        }
    }

    /// Tag the next submission will carry.
    pub fn current_tag(&self) -> PictureTag {
        self.current_tag
    }

    /// Annex B bitstream for the enqueued picture.
    fn build_bitstream(&self) -> Result<Bytes, DecodeError> {
        let pic_buffer = self
            .pic_params
            .as_ref()
            .ok_or(DecodeError::MissingPictureParameters)?;
        let first_slice_buffer = self
            .slice_params
            .first()
            .ok_or(DecodeError::MissingSliceParameters)?;
        let pic = PictureParameters::parse(&pic_buffer.map())?;
        let first_slice = SliceParameters::parse(&first_slice_buffer.map())?;

        let mut writer = BitWriter::new();
        // Parameter sets only precede intra pictures.
        if first_slice.slice_type.is_intra() {
            let options = HeaderOptions {
                picture_width: self.picture_width,
                picture_height: self.picture_height,
                ..HeaderOptions::default()
            };
            build_sps(&mut writer, self.profile, &pic, &options);
            build_pps(&mut writer, &pic);
        }

        for slice in &self.slice_data {
            writer.append_bytes(&START_CODE);
            writer.append_bytes(&slice.map());
        }
        writer.flush();
        Ok(writer.into_bytes())
    }

    fn dump_bitstream(&self, stream: &[u8]) {
        let Some(path) = &self.bitstream_dump else {
            return;
        };
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| file.write_all(stream));
        if let Err(e) = result {
            warn!(path = %path.display(), %e, "failed to append bitstream dump");
        }
    }

    /// Drive the engine until it has processed the whole submission.
    fn decode(&mut self, stream: &[u8], tag: PictureTag) -> Result<Vec<ReadyPicture>, DecodeError> {
        let mut ready = Vec::new();
        let mut offset = 0;

        loop {
            let output = self.engine.decode(&DecodeInput {
                stream: &stream[offset..],
                pic_id: tag,
                skip_non_reference: false,
            });
            trace!(tag, status = ?output.status, consumed = output.consumed, "engine returned");
            offset = (offset + output.consumed).min(stream.len());

            match output.status {
                DecodeStatus::Ok | DecodeStatus::HeadersReady => {}
                DecodeStatus::WaitingForBuffer => {
                    let info = self.engine.buffer_info();
                    debug!(
                        next_buf_size = info.next_buf_size,
                        buf_num = info.buf_num,
                        "engine requested output buffers"
                    );
                    for _ in 0..info.buf_num {
                        self.engine.add_buffer(LinearBuffer::zeroed(info.next_buf_size));
                    }
                }
                DecodeStatus::PictureDecoded | DecodeStatus::PendingFlush => {
                    while let Some(picture) = self.engine.next_picture() {
                        ready.push(self.output_picture(&picture));
                        self.engine.picture_consumed(&picture);
                    }
                }
                DecodeStatus::StreamProcessed => return Ok(ready),
                DecodeStatus::StreamNotSupported => {
                    self.abort();
                    return Err(DecodeError::StreamNotSupported);
                }
                DecodeStatus::Error(code) => {
                    self.abort();
                    return Err(DecodeError::Hardware(code));
                }
            }
        }
    }

    fn abort(&mut self) {
        warn!(tag = self.current_tag, "aborting hardware decoder");
        self.engine.abort();
        self.state = SessionState::Aborted;
    }

    /// Copy a decoded picture into the surface it was tagged for.
    fn output_picture(&self, picture: &DecodedPicture) -> ReadyPicture {
        let surface = self
            .render_targets
            .peek(&picture.pic_id)
            .and_then(Weak::upgrade);

        let surface_id = match &surface {
            Some(surface) => {
                match surface.write_picture(picture) {
                    Ok(true) => {}
                    Ok(false) => trace!(surface = surface.id(), "render target has no mapping"),
                    Err(e) => warn!(surface = surface.id(), %e, "failed to write decoded picture"),
                }
                Some(surface.id())
            }
            None => {
                debug!(tag = picture.pic_id, "no live render target for picture");
                None
            }
        };

        ReadyPicture {
            tag: picture.pic_id,
            surface: surface_id,
            width: picture.width,
            height: picture.height,
        }
    }

    fn reset(&mut self) {
        self.pic_params = None;
        self.iq_matrix = None;
        self.slice_params.clear();
        self.slice_data.clear();
        self.render_target = None;
        self.state = SessionState::Idle;
    }
}

impl DecodeSession for H264Session {
    fn set_render_target(&mut self, surface: Arc<Surface>) {
        assert!(
            self.accepts(SessionStep::SetRenderTarget),
            "set_render_target in state {:?}",
            self.state
        );
        self.render_targets.put(self.current_tag, Arc::downgrade(&surface));
        self.render_target = Some(surface);
        self.state = SessionState::RenderTargetSet;
    }

    fn enqueue_work(&mut self, buffers: Vec<Arc<Buffer>>) {
        assert!(
            self.accepts(SessionStep::EnqueueWork),
            "enqueue_work without a render target or with work pending"
        );
        for buffer in buffers {
            match buffer.buffer_type() {
                BufferType::SliceData => self.slice_data.push(buffer),
                BufferType::PictureParameter => self.pic_params = Some(buffer),
                BufferType::IqMatrix => self.iq_matrix = Some(buffer),
                BufferType::SliceParameter => self.slice_params.push(buffer),
                other => debug!(id = buffer.id(), buffer_type = ?other, "ignoring buffer"),
            }
        }
        self.state = SessionState::WorkEnqueued;
    }

    fn run(&mut self) -> Result<Vec<ReadyPicture>, DecodeError> {
        assert!(self.accepts(SessionStep::Run), "run without enqueued work");

        let stream = match self.build_bitstream() {
            Ok(stream) => stream,
            Err(e) => {
                self.reset();
                return Err(e);
            }
        };
        self.dump_bitstream(&stream);

        let tag = self.current_tag;
        self.current_tag = self.current_tag.wrapping_add(1);
        self.state = SessionState::Running;
        debug!(
            tag,
            len = stream.len(),
            slices = self.slice_data.len(),
            iq_matrix = self.iq_matrix.is_some(),
            target = ?self.render_target.as_ref().map(|s| s.id()),
            "submitting picture"
        );

        let result = self.decode(&stream, tag);
        self.reset();
        result
    }

    fn state(&self) -> SessionState {
        self.state
    }

    fn accepts(&self, step: SessionStep) -> bool {
        match step {
            SessionStep::SetRenderTarget => {
                matches!(self.state, SessionState::Idle | SessionState::RenderTargetSet)
            }
            SessionStep::EnqueueWork => self.state == SessionState::RenderTargetSet,
            SessionStep::Run => self.state == SessionState::WorkEnqueued,
        }
    }
}
