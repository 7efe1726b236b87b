use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::warn;

use crate::buffer::Buffer;
use crate::config::Config;
use crate::error::DriverError;
use crate::registry::{Resource, ResourceId};
use crate::session::{DecodeSession, ReadyPicture, SessionState, SessionStep};
use crate::surface::Surface;

/// A decode context (`VAContextID`): one config, its render targets and the
/// session that decodes into them.
pub struct Context {
    id: ResourceId,
    config: Arc<Config>,
    picture_width: u32,
    picture_height: u32,
    flag: i32,
    render_targets: Vec<ResourceId>,
    session: Mutex<Box<dyn DecodeSession>>,
}

impl Context {
    pub fn new(
        id: ResourceId,
        config: Arc<Config>,
        picture_width: u32,
        picture_height: u32,
        flag: i32,
        render_targets: Vec<ResourceId>,
        session: Box<dyn DecodeSession>,
    ) -> Self {
        Context {
            id,
            config,
            picture_width,
            picture_height,
            flag,
            render_targets,
            session: Mutex::new(session),
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn picture_width(&self) -> u32 {
        self.picture_width
    }

    pub fn picture_height(&self) -> u32 {
        self.picture_height
    }

    pub fn flag(&self) -> i32 {
        self.flag
    }

    pub fn render_targets(&self) -> &[ResourceId] {
        &self.render_targets
    }

    pub fn begin_picture(&self, surface: Arc<Surface>) -> Result<(), DriverError> {
        let mut session = self.checked_session(SessionStep::SetRenderTarget)?;
        session.set_render_target(surface);
        Ok(())
    }

    pub fn render_picture(&self, buffers: Vec<Arc<Buffer>>) -> Result<(), DriverError> {
        let mut session = self.checked_session(SessionStep::EnqueueWork)?;
        session.enqueue_work(buffers);
        Ok(())
    }

    pub fn end_picture(&self) -> Result<Vec<ReadyPicture>, DriverError> {
        let mut session = self.checked_session(SessionStep::Run)?;
        Ok(session.run()?)
    }

    pub fn session_state(&self) -> SessionState {
        self.session().state()
    }

    fn session(&self) -> MutexGuard<'_, Box<dyn DecodeSession>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The locked session, if it accepts `step` now.
    fn checked_session(
        &self,
        step: SessionStep,
    ) -> Result<MutexGuard<'_, Box<dyn DecodeSession>>, DriverError> {
        let session = self.session();
        if !session.accepts(step) {
            let state = session.state();
            warn!(context = self.id, ?step, ?state, "rejecting out-of-order call");
            return Err(DriverError::OutOfOrder { step, state });
        }
        Ok(session)
    }
}

impl Resource for Context {
    fn id(&self) -> ResourceId {
        self.id
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("profile", &self.config.profile())
            .field("picture_width", &self.picture_width)
            .field("picture_height", &self.picture_height)
            .field("render_targets", &self.render_targets)
            .finish_non_exhaustive()
    }
}
