pub mod bo_mapping;
pub mod buffer;
pub mod config;
pub mod context;
pub mod driver;
pub mod engine;
pub mod error;
pub mod image;
pub mod registry;
pub mod render_target_cache;
pub mod session;
pub mod surface;

pub use bo_mapping::{
    system_mapper, BoAccess, BoImport, BoMapper, BoMapping, BoObject, BoPlane, HeapMapper,
    HeapRegion, MappedRegion,
};
#[cfg(target_os = "linux")]
pub use bo_mapping::DmaBufMapper;
pub use buffer::{Buffer, BufferType};
pub use config::{ConfigAttrib, Entrypoint, Profile};
pub use context::Context;
pub use driver::{Capabilities, Driver, DriverConfig};
pub use engine::{
    BufferInfo, DecodeInput, DecodeOutput, DecodeStatus, DecodedPicture, DecoderSettings,
    EngineFactory, EngineParams, HwDecoder, LinearBuffer,
};
pub use error::{DecodeError, DriverError, Status};
pub use image::{Image, ImageFormat, ImageLayout};
pub use registry::{Registry, Resource, ResourceId};
pub use render_target_cache::{PictureTag, RenderTargetCache};
pub use session::{DecodeSession, ReadyPicture, SessionMode, SessionState, SessionStep};
pub use surface::{DrmLayer, DrmObject, DrmPlane, DrmPrimeDescriptor, Surface, SurfaceAttrib};
