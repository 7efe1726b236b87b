//! Per-context decode sessions.
//!
//! A session turns one picture's worth of parameter and slice buffers into an
//! Annex B bitstream, drives the hardware engine over it and writes the
//! decoded pixels into the destination surface.

mod h264;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

pub use h264::H264Session;

use crate::buffer::Buffer;
use crate::config::{Entrypoint, Profile};
use crate::engine::{DecoderSettings, EngineFactory, EngineParams};
use crate::error::{DecodeError, DriverError};
use crate::registry::ResourceId;
use crate::render_target_cache::PictureTag;
use crate::surface::Surface;

/// Which session implementation contexts get.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    #[default]
    Hardware,
    /// Accept every call and decode nothing.
    NoOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    RenderTargetSet,
    WorkEnqueued,
    Running,
    /// The engine rejected the stream; the session is reset before `run`
    /// returns.
    Aborted,
}

/// One call of the begin/render/end protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStep {
    SetRenderTarget,
    EnqueueWork,
    Run,
}

/// A picture the engine emitted during `run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyPicture {
    pub tag: PictureTag,
    /// Destination surface, if it was still alive.
    pub surface: Option<ResourceId>,
    pub width: u32,
    pub height: u32,
}

/// The begin/render/end protocol of one decode context.
///
/// Calls must arrive in the order `set_render_target`, `enqueue_work`, `run`.
/// Callers check [`accepts`](Self::accepts) first; a step the session does
/// not accept is a caller bug and panics.
pub trait DecodeSession: Send {
    fn set_render_target(&mut self, surface: Arc<Surface>);

    fn enqueue_work(&mut self, buffers: Vec<Arc<Buffer>>);

    fn run(&mut self) -> Result<Vec<ReadyPicture>, DecodeError>;

    fn state(&self) -> SessionState;

    /// Whether `step` is valid in the current state.
    fn accepts(&self, step: SessionStep) -> bool;
}

/// Session settings taken from the context and the driver configuration.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub picture_width: u32,
    pub picture_height: u32,
    pub decoder_settings: DecoderSettings,
    pub render_target_cache_size: usize,
    pub bitstream_dump: Option<PathBuf>,
}

/// Build the session for a new context.
pub fn open_session(
    mode: SessionMode,
    profile: Profile,
    entrypoint: Entrypoint,
    options: SessionOptions,
    factory: &dyn EngineFactory,
) -> Result<Box<dyn DecodeSession>, DriverError> {
    if mode == SessionMode::NoOp {
        debug!(?profile, "opening no-op session");
        return Ok(Box::new(NoOpSession));
    }

    if entrypoint != Entrypoint::Vld {
        return Err(DriverError::UnsupportedEntrypoint {
            profile,
            entrypoint,
        });
    }
    let header_profile = profile
        .header_profile()
        .ok_or(DriverError::UnsupportedProfile(profile))?;

    let engine = factory.create(&EngineParams {
        profile: header_profile,
        picture_width: options.picture_width,
        picture_height: options.picture_height,
        settings: options.decoder_settings,
    })?;
    debug!(
        ?profile,
        width = options.picture_width,
        height = options.picture_height,
        "opening hardware session"
    );
    Ok(Box::new(H264Session::new(engine, header_profile, options)))
}

/// Session that ignores everything it is given.
#[derive(Debug, Default)]
pub struct NoOpSession;

impl DecodeSession for NoOpSession {
    fn set_render_target(&mut self, _surface: Arc<Surface>) {}

    fn enqueue_work(&mut self, _buffers: Vec<Arc<Buffer>>) {}

    fn run(&mut self) -> Result<Vec<ReadyPicture>, DecodeError> {
        Ok(Vec::new())
    }

    fn state(&self) -> SessionState {
        SessionState::Idle
    }

    fn accepts(&self, _step: SessionStep) -> bool {
        true
    }
}
