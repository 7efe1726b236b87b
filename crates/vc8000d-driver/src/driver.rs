//! The driver facade: the VA entry points over the resource registries.
//!
//! Every identifier coming in is untrusted and checked here; the layers below
//! treat an unknown id as a bug.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::BytesMut;
use h264_bitstream::HEADERS_ARE_APPROXIMATE;
use tracing::{debug, info, warn};

use crate::bo_mapping::BoMapper;
use crate::buffer::{Buffer, BufferType};
use crate::config::{
    fill_config_attributes, supported_entrypoints, supported_profiles, Config, ConfigAttrib,
    Entrypoint, Profile, RT_FORMAT_YUV420, RT_FORMAT_YUV420_10,
};
use crate::context::Context;
use crate::engine::{DecoderSettings, EngineFactory};
use crate::error::DriverError;
use crate::image::{Image, ImageFormat, ImageLayout, SUPPORTED_IMAGE_FORMATS};
use crate::registry::{Registry, Resource, ResourceId};
use crate::render_target_cache::DEFAULT_CAPACITY;
use crate::session::{open_session, ReadyPicture, SessionMode, SessionOptions, SessionState};
use crate::surface::{
    supported_surface_attributes, Surface, SurfaceAttrib, FOURCC_NV12, MAX_SURFACE_HEIGHT,
    MAX_SURFACE_WIDTH,
};

pub const VENDOR: &str = "Verisilicon libva driver";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    pub session_mode: SessionMode,
    /// Pictures that can be in flight per context before their render target
    /// is forgotten.
    pub render_target_cache_size: usize,
    pub decoder_settings: DecoderSettings,
    /// Append every submitted bitstream to this file.
    pub bitstream_dump: Option<PathBuf>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            session_mode: SessionMode::Hardware,
            render_target_cache_size: DEFAULT_CAPACITY,
            decoder_settings: DecoderSettings::default(),
            bitstream_dump: None,
        }
    }
}

/// Summary of what the driver can do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub vendor: &'static str,
    pub profiles: Vec<Profile>,
    pub image_formats: Vec<ImageFormat>,
    pub max_width: u32,
    pub max_height: u32,
    /// Regenerated SPS/PPS carry defaults for fields the parameter buffers
    /// do not describe.
    pub headers_approximate: bool,
}

pub struct Driver {
    config: DriverConfig,
    engines: Arc<dyn EngineFactory>,
    mapper: Arc<dyn BoMapper>,
    configs: Registry<Config>,
    surfaces: Registry<Surface>,
    contexts: Registry<Context>,
    buffers: Registry<Buffer>,
    images: Registry<Image>,
}

impl Driver {
    pub fn new(
        config: DriverConfig,
        engines: Arc<dyn EngineFactory>,
        mapper: Arc<dyn BoMapper>,
    ) -> Self {
        info!(
            vendor = VENDOR,
            session_mode = ?config.session_mode,
            cache_size = config.render_target_cache_size,
            "driver initialized"
        );
        Driver {
            config,
            engines,
            mapper,
            configs: Registry::new(),
            surfaces: Registry::new(),
            contexts: Registry::new(),
            buffers: Registry::new(),
            images: Registry::new(),
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            vendor: VENDOR,
            profiles: supported_profiles(),
            image_formats: SUPPORTED_IMAGE_FORMATS.to_vec(),
            max_width: MAX_SURFACE_WIDTH,
            max_height: MAX_SURFACE_HEIGHT,
            headers_approximate: HEADERS_ARE_APPROXIMATE,
        }
    }

    // Configs

    pub fn query_config_profiles(&self) -> Vec<Profile> {
        supported_profiles()
    }

    pub fn query_config_entrypoints(&self, profile: Profile) -> Result<Vec<Entrypoint>, DriverError> {
        let entrypoints = supported_entrypoints(profile);
        if entrypoints.is_empty() {
            return Err(DriverError::UnsupportedProfile(profile));
        }
        Ok(entrypoints)
    }

    pub fn get_config_attributes(
        &self,
        profile: Profile,
        entrypoint: Entrypoint,
        attribs: &mut [ConfigAttrib],
    ) -> Result<(), DriverError> {
        fill_config_attributes(profile, entrypoint, attribs)
    }

    pub fn create_config(
        &self,
        profile: Profile,
        entrypoint: Entrypoint,
        attribs: &[ConfigAttrib],
    ) -> Result<ResourceId, DriverError> {
        let id = self
            .configs
            .try_create(|id| Config::new(id, profile, entrypoint, attribs))?;
        debug!(id, ?profile, ?entrypoint, "created config");
        Ok(id)
    }

    /// Profile, entrypoint and effective attributes of a config.
    pub fn query_config_attributes(
        &self,
        id: ResourceId,
    ) -> Result<(Profile, Entrypoint, Vec<ConfigAttrib>), DriverError> {
        let config = self.configs.find(id).ok_or(DriverError::InvalidConfig(id))?;
        Ok((config.profile(), config.entrypoint(), config.attribs().to_vec()))
    }

    pub fn destroy_config(&self, id: ResourceId) -> Result<(), DriverError> {
        self.configs.remove(id).ok_or(DriverError::InvalidConfig(id))?;
        Ok(())
    }

    // Surfaces

    pub fn query_surface_attributes(&self, config: ResourceId) -> Result<Vec<SurfaceAttrib>, DriverError> {
        if !self.configs.exists(config) {
            return Err(DriverError::InvalidConfig(config));
        }
        Ok(supported_surface_attributes())
    }

    /// Create `count` surfaces sharing the same attributes. Either all of
    /// them are created or none.
    pub fn create_surfaces(
        &self,
        rt_format: u32,
        width: u32,
        height: u32,
        count: usize,
        attribs: &[SurfaceAttrib],
    ) -> Result<Vec<ResourceId>, DriverError> {
        if rt_format != RT_FORMAT_YUV420 && rt_format != RT_FORMAT_YUV420_10 {
            return Err(DriverError::UnsupportedRtFormat(rt_format));
        }
        if width > MAX_SURFACE_WIDTH || height > MAX_SURFACE_HEIGHT {
            return Err(DriverError::invalid_parameter(format!(
                "surface size {width}x{height} exceeds {MAX_SURFACE_WIDTH}x{MAX_SURFACE_HEIGHT}"
            )));
        }

        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            let created = self.surfaces.try_create(|id| {
                Surface::new(id, rt_format, width, height, attribs.to_vec(), self.mapper.as_ref())
            });
            match created {
                Ok(id) => ids.push(id),
                Err(e) => {
                    warn!(%e, created = ids.len(), "surface creation failed, rolling back");
                    for id in ids {
                        self.surfaces.destroy(id);
                    }
                    return Err(e);
                }
            }
        }
        debug!(?ids, width, height, imported = !attribs.is_empty(), "created surfaces");
        Ok(ids)
    }

    /// Destroy a list of surfaces; nothing is destroyed if any id is unknown.
    pub fn destroy_surfaces(&self, ids: &[ResourceId]) -> Result<(), DriverError> {
        if let Some(&bad) = ids.iter().find(|&&id| !self.surfaces.exists(id)) {
            return Err(DriverError::InvalidSurface(bad));
        }
        for &id in ids {
            self.surfaces.remove(id);
        }
        Ok(())
    }

    /// Decoding is synchronous, so a live surface is always ready.
    pub fn sync_surface(&self, id: ResourceId) -> Result<(), DriverError> {
        if !self.surfaces.exists(id) {
            return Err(DriverError::InvalidSurface(id));
        }
        Ok(())
    }

    // Contexts

    pub fn create_context(
        &self,
        config_id: ResourceId,
        picture_width: u32,
        picture_height: u32,
        flag: i32,
        render_targets: &[ResourceId],
    ) -> Result<ResourceId, DriverError> {
        let config = self
            .configs
            .find(config_id)
            .ok_or(DriverError::InvalidConfig(config_id))?;
        if let Some(&bad) = render_targets.iter().find(|&&id| !self.surfaces.exists(id)) {
            return Err(DriverError::InvalidSurface(bad));
        }

        let session = open_session(
            self.config.session_mode,
            config.profile(),
            config.entrypoint(),
            SessionOptions {
                picture_width,
                picture_height,
                decoder_settings: self.config.decoder_settings,
                render_target_cache_size: self.config.render_target_cache_size,
                bitstream_dump: self.config.bitstream_dump.clone(),
            },
            self.engines.as_ref(),
        )?;

        let render_targets = render_targets.to_vec();
        let id = self.contexts.create(|id| {
            Context::new(
                id,
                config,
                picture_width,
                picture_height,
                flag,
                render_targets,
                session,
            )
        });
        debug!(id, config_id, picture_width, picture_height, "created context");
        Ok(id)
    }

    pub fn destroy_context(&self, id: ResourceId) -> Result<(), DriverError> {
        self.contexts.remove(id).ok_or(DriverError::InvalidContext(id))?;
        Ok(())
    }

    // Buffers

    /// Create a buffer of `size * num_elements` bytes, copied from `data`
    /// when given.
    pub fn create_buffer(
        &self,
        context: ResourceId,
        buffer_type: BufferType,
        size: usize,
        num_elements: usize,
        data: Option<&[u8]>,
    ) -> Result<ResourceId, DriverError> {
        if !self.contexts.exists(context) {
            return Err(DriverError::InvalidContext(context));
        }
        let total = size
            .checked_mul(num_elements)
            .ok_or_else(|| DriverError::invalid_parameter("buffer size overflows"))?;
        if let Some(data) = data {
            if data.len() != total {
                return Err(DriverError::invalid_parameter(format!(
                    "buffer data is {} bytes, expected {total}",
                    data.len()
                )));
            }
        }
        let id = self
            .buffers
            .create(|id| Buffer::new(id, Some(context), buffer_type, total, data));
        Ok(id)
    }

    /// Run `f` with exclusive access to a buffer's contents.
    pub fn map_buffer<R>(
        &self,
        id: ResourceId,
        f: impl FnOnce(&mut BytesMut) -> R,
    ) -> Result<R, DriverError> {
        let buffer = self.buffers.find(id).ok_or(DriverError::InvalidBuffer(id))?;
        let mut data = buffer.map();
        Ok(f(&mut data))
    }

    /// Destroy a context buffer. Image buffers go with their image and are
    /// not valid here.
    pub fn destroy_buffer(&self, id: ResourceId) -> Result<(), DriverError> {
        self.buffers
            .remove_if(id, |buffer| buffer.context().is_some())
            .ok_or(DriverError::InvalidBuffer(id))?;
        Ok(())
    }

    // Decoding

    pub fn begin_picture(&self, context: ResourceId, render_target: ResourceId) -> Result<(), DriverError> {
        let surface = self
            .surfaces
            .find(render_target)
            .ok_or(DriverError::InvalidSurface(render_target))?;
        let context = self
            .contexts
            .find(context)
            .ok_or(DriverError::InvalidContext(context))?;
        context.begin_picture(surface)
    }

    pub fn render_picture(&self, context: ResourceId, buffers: &[ResourceId]) -> Result<(), DriverError> {
        let context = self
            .contexts
            .find(context)
            .ok_or(DriverError::InvalidContext(context))?;
        let buffers = buffers
            .iter()
            .map(|&id| self.buffers.find(id).ok_or(DriverError::InvalidBuffer(id)))
            .collect::<Result<Vec<_>, _>>()?;
        context.render_picture(buffers)
    }

    pub fn end_picture(&self, context: ResourceId) -> Result<Vec<ReadyPicture>, DriverError> {
        let context = self
            .contexts
            .find(context)
            .ok_or(DriverError::InvalidContext(context))?;
        context.end_picture()
    }

    pub fn session_state(&self, context: ResourceId) -> Result<SessionState, DriverError> {
        let context = self
            .contexts
            .find(context)
            .ok_or(DriverError::InvalidContext(context))?;
        Ok(context.session_state())
    }

    // Images

    pub fn query_image_formats(&self) -> Vec<ImageFormat> {
        SUPPORTED_IMAGE_FORMATS.to_vec()
    }

    /// Create an image and the buffer that holds its pixels.
    pub fn create_image(
        &self,
        format: &ImageFormat,
        width: u32,
        height: u32,
    ) -> Result<Arc<Image>, DriverError> {
        let layout = ImageLayout::for_format(format, width, height)?;
        let buffer = self.buffers.create_shared(|id| {
            Buffer::new(id, None, BufferType::Image, layout.data_size as usize, None)
        });
        let image = self
            .images
            .create_shared(|id| Image::new(id, *format, width, height, layout, buffer));
        debug!(id = image.id(), buffer = image.buffer(), width, height, "created image");
        Ok(image)
    }

    pub fn destroy_image(&self, id: ResourceId) -> Result<(), DriverError> {
        let image = self.images.remove(id).ok_or(DriverError::InvalidImage(id))?;
        // Only the image's own buffer; the id may have been reissued.
        self.buffers
            .remove_if(image.buffer(), |buffer| Arc::ptr_eq(buffer, image.backing()));
        Ok(())
    }

    /// Copy the top-left `width`x`height` area of an NV12 surface into an
    /// image. Surfaces without backing memory leave the image untouched.
    pub fn get_image(
        &self,
        surface: ResourceId,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        image: ResourceId,
    ) -> Result<(), DriverError> {
        let surface = self
            .surfaces
            .find(surface)
            .ok_or(DriverError::InvalidSurface(surface))?;
        let image = self.images.find(image).ok_or(DriverError::InvalidImage(image))?;
        if !surface.has_mapping() {
            return Ok(());
        }

        if x != 0 || y != 0 {
            return Err(DriverError::invalid_parameter(format!(
                "image origin ({x}, {y}) is not (0, 0)"
            )));
        }
        if width > surface.width() || height > surface.height() {
            return Err(DriverError::invalid_parameter(format!(
                "{width}x{height} area exceeds the {}x{} surface",
                surface.width(),
                surface.height()
            )));
        }
        if width > image.width() || height > image.height() {
            return Err(DriverError::invalid_parameter(format!(
                "{width}x{height} area exceeds the {}x{} image",
                image.width(),
                image.height()
            )));
        }
        if surface.fourcc() != FOURCC_NV12 {
            return Err(DriverError::InvalidImageFormat(surface.fourcc()));
        }
        if image.format().fourcc != FOURCC_NV12 {
            return Err(DriverError::InvalidImageFormat(image.format().fourcc));
        }

        let mut data = image.backing().map();
        surface.download_nv12(width, height, &mut data, image.layout())?;
        debug!(surface = surface.id(), image = image.id(), width, height, "downloaded surface");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bo_mapping::HeapMapper;
    use crate::config::{ATTRIB_NOT_SUPPORTED, CONFIG_ATTRIB_RT_FORMAT};
    use crate::engine::{EngineParams, HwDecoder};
    use crate::error::{DecodeError, Status};
    use crate::surface::{DrmPrimeDescriptor, FOURCC_YV12};

    fn no_engine(_params: &EngineParams) -> Result<Box<dyn HwDecoder>, DecodeError> {
        Err(DecodeError::EngineInit(-1))
    }

    fn noop_driver() -> Driver {
        let config = DriverConfig {
            session_mode: SessionMode::NoOp,
            ..DriverConfig::default()
        };
        Driver::new(config, Arc::new(no_engine), Arc::new(HeapMapper))
    }

    #[test]
    fn test_default_config() {
        let config = DriverConfig::default();
        assert_eq!(config.session_mode, SessionMode::Hardware);
        assert_eq!(config.render_target_cache_size, 128);
        assert_eq!(config.bitstream_dump, None);
    }

    #[test]
    fn test_capabilities() {
        let caps = noop_driver().capabilities();
        assert_eq!(caps.vendor, "Verisilicon libva driver");
        assert_eq!(caps.profiles.len(), 3);
        assert_eq!(caps.image_formats, vec![ImageFormat::NV12]);
        assert_eq!(caps.max_width, 4096);
        assert!(caps.headers_approximate);
    }

    #[test]
    fn test_config_lifecycle() {
        let driver = noop_driver();
        assert_eq!(
            driver.query_config_entrypoints(Profile::H264High).unwrap(),
            vec![Entrypoint::Vld]
        );
        assert!(driver.query_config_entrypoints(Profile::H264Baseline).is_err());

        let mut attribs = [ConfigAttrib::query(CONFIG_ATTRIB_RT_FORMAT), ConfigAttrib::query(3)];
        driver
            .get_config_attributes(Profile::H264Main, Entrypoint::Vld, &mut attribs)
            .unwrap();
        assert_eq!(attribs[0].value, RT_FORMAT_YUV420);
        assert_eq!(attribs[1].value, ATTRIB_NOT_SUPPORTED);

        let id = driver.create_config(Profile::H264Main, Entrypoint::Vld, &[]).unwrap();
        let (profile, entrypoint, attribs) = driver.query_config_attributes(id).unwrap();
        assert_eq!((profile, entrypoint), (Profile::H264Main, Entrypoint::Vld));
        assert_eq!(attribs, vec![ConfigAttrib::rt_format(RT_FORMAT_YUV420)]);

        driver.destroy_config(id).unwrap();
        let err = driver.destroy_config(id).unwrap_err();
        assert_eq!(err.status(), Status::InvalidConfig);
    }

    #[test]
    fn test_unsupported_config_statuses() {
        let driver = noop_driver();
        let err = driver
            .create_config(Profile::Other(19), Entrypoint::Vld, &[])
            .unwrap_err();
        assert_eq!(err.status(), Status::UnsupportedProfile);
        let err = driver
            .create_config(Profile::H264High, Entrypoint::Other(6), &[])
            .unwrap_err();
        assert_eq!(err.status(), Status::UnsupportedEntrypoint);
        let err = driver
            .create_config(Profile::H264High, Entrypoint::Vld, &[ConfigAttrib::new(6, 1)])
            .unwrap_err();
        assert_eq!(err.status(), Status::AttrNotSupported);
    }

    #[test]
    fn test_surfaces_roll_back_on_failure() {
        let driver = noop_driver();
        let ids = driver.create_surfaces(RT_FORMAT_YUV420, 64, 64, 3, &[]).unwrap();
        assert_eq!(ids, vec![0, 1, 2]);

        let mut desc = DrmPrimeDescriptor::nv12(-1, 64, 64);
        desc.fourcc = FOURCC_YV12;
        let err = driver
            .create_surfaces(RT_FORMAT_YUV420, 64, 64, 2, &desc.into_attribs())
            .unwrap_err();
        assert_eq!(err.status(), Status::InvalidImageFormat);
        assert!(!driver.surfaces.exists(3));

        let err = driver.create_surfaces(0x4, 64, 64, 1, &[]).unwrap_err();
        assert_eq!(err.status(), Status::UnsupportedRtFormat);
        let err = driver.create_surfaces(RT_FORMAT_YUV420, 8192, 64, 1, &[]).unwrap_err();
        assert_eq!(err.status(), Status::InvalidParameter);
    }

    #[test]
    fn test_destroy_surfaces_is_all_or_nothing() {
        let driver = noop_driver();
        let ids = driver.create_surfaces(RT_FORMAT_YUV420, 16, 16, 2, &[]).unwrap();
        let err = driver.destroy_surfaces(&[ids[0], 9]).unwrap_err();
        assert!(matches!(err, DriverError::InvalidSurface(9)));
        assert!(driver.sync_surface(ids[0]).is_ok());

        driver.destroy_surfaces(&ids).unwrap();
        assert!(driver.sync_surface(ids[0]).is_err());
    }

    #[test]
    fn test_context_checks_ids() {
        let driver = noop_driver();
        let config = driver.create_config(Profile::H264Main, Entrypoint::Vld, &[]).unwrap();
        let surfaces = driver.create_surfaces(RT_FORMAT_YUV420, 16, 16, 1, &[]).unwrap();

        let err = driver.create_context(5, 16, 16, 0, &surfaces).unwrap_err();
        assert!(matches!(err, DriverError::InvalidConfig(5)));
        let err = driver.create_context(config, 16, 16, 0, &[4]).unwrap_err();
        assert!(matches!(err, DriverError::InvalidSurface(4)));

        let ctx = driver.create_context(config, 16, 16, 1, &surfaces).unwrap();
        assert!(driver.begin_picture(ctx, 7).is_err());
        assert!(driver.render_picture(ctx, &[3]).is_err());
        assert!(driver.end_picture(ctx + 1).is_err());
        driver.destroy_context(ctx).unwrap();
        assert!(driver.destroy_context(ctx).is_err());
    }

    #[test]
    fn test_hardware_context_reports_engine_failure() {
        let driver = Driver::new(DriverConfig::default(), Arc::new(no_engine), Arc::new(HeapMapper));
        let config = driver.create_config(Profile::H264High, Entrypoint::Vld, &[]).unwrap();
        let err = driver.create_context(config, 16, 16, 0, &[]).unwrap_err();
        assert_eq!(err.status(), Status::OperationFailed);
        assert!(driver.contexts.is_empty());
    }

    #[test]
    fn test_buffer_creation_and_mapping() {
        let driver = noop_driver();
        let config = driver.create_config(Profile::H264Main, Entrypoint::Vld, &[]).unwrap();
        let ctx = driver.create_context(config, 16, 16, 0, &[]).unwrap();

        assert!(driver
            .create_buffer(ctx + 1, BufferType::SliceData, 4, 1, None)
            .is_err());
        let err = driver
            .create_buffer(ctx, BufferType::SliceData, 4, 2, Some(&[0u8; 4][..]))
            .unwrap_err();
        assert_eq!(err.status(), Status::InvalidParameter);
        assert!(driver
            .create_buffer(ctx, BufferType::SliceData, usize::MAX, 2, None)
            .is_err());

        let id = driver
            .create_buffer(ctx, BufferType::SliceData, 2, 2, Some(&[1, 2, 3, 4][..]))
            .unwrap();
        driver.map_buffer(id, |data| data[0] = 9).unwrap();
        let len = driver.map_buffer(id, |data| data.len()).unwrap();
        assert_eq!(len, 4);
        assert_eq!(&driver.buffers.get(id).bytes()[..], &[9, 2, 3, 4]);

        driver.destroy_buffer(id).unwrap();
        assert!(driver.map_buffer(id, |_| ()).is_err());
    }

    #[test]
    fn test_image_owns_its_buffer() {
        let driver = noop_driver();
        let image = driver.create_image(&ImageFormat::NV12, 8, 4).unwrap();
        assert_eq!(image.data_size(), 48);
        assert_eq!(image.num_planes(), 2);
        assert_eq!(driver.buffers.get(image.buffer()).size(), 48);

        driver.destroy_image(image.id()).unwrap();
        assert!(!driver.buffers.exists(image.buffer()));
        assert!(driver.destroy_image(image.id()).is_err());

        let yv12 = ImageFormat {
            fourcc: FOURCC_YV12,
            ..ImageFormat::NV12
        };
        let err = driver.create_image(&yv12, 8, 4).unwrap_err();
        assert_eq!(err.status(), Status::InvalidImageFormat);
    }

    #[test]
    fn test_image_buffer_is_not_a_context_buffer() {
        let driver = noop_driver();
        let config = driver.create_config(Profile::H264Main, Entrypoint::Vld, &[]).unwrap();
        let ctx = driver.create_context(config, 16, 16, 0, &[]).unwrap();
        let image = driver.create_image(&ImageFormat::NV12, 8, 4).unwrap();

        let err = driver.destroy_buffer(image.buffer()).unwrap_err();
        assert_eq!(err.status(), Status::InvalidBuffer);
        assert!(driver.buffers.exists(image.buffer()));

        let slice = driver
            .create_buffer(ctx, BufferType::SliceData, 4, 1, Some(&[1, 2, 3, 4][..]))
            .unwrap();
        driver.destroy_image(image.id()).unwrap();
        assert!(!driver.buffers.exists(image.buffer()));
        assert_eq!(driver.map_buffer(slice, |data| data.to_vec()).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_destroy_image_spares_reissued_buffer_id() {
        let driver = noop_driver();
        let config = driver.create_config(Profile::H264Main, Entrypoint::Vld, &[]).unwrap();
        let ctx = driver.create_context(config, 16, 16, 0, &[]).unwrap();
        let image = driver.create_image(&ImageFormat::NV12, 8, 4).unwrap();

        // Simulate the image buffer id being handed out again.
        driver.buffers.destroy(image.buffer());
        let reissued = driver
            .create_buffer(ctx, BufferType::SliceData, 4, 1, Some(&[5, 6, 7, 8][..]))
            .unwrap();
        assert_eq!(reissued, image.buffer());

        driver.destroy_image(image.id()).unwrap();
        assert_eq!(driver.map_buffer(reissued, |data| data.to_vec()).unwrap(), vec![5, 6, 7, 8]);
    }

    #[test]
    fn test_create_image_returns_registered_image() {
        let driver = noop_driver();
        let image = driver.create_image(&ImageFormat::NV12, 8, 4).unwrap();
        assert!(Arc::ptr_eq(&image, &driver.images.get(image.id())));
        assert!(Arc::ptr_eq(image.backing(), &driver.buffers.get(image.buffer())));
    }

    #[test]
    fn test_get_image() {
        let driver = noop_driver();
        let plain = driver.create_surfaces(RT_FORMAT_YUV420, 8, 4, 1, &[]).unwrap()[0];
        let imported = driver
            .create_surfaces(
                RT_FORMAT_YUV420,
                8,
                4,
                1,
                &DrmPrimeDescriptor::nv12(-1, 8, 4).into_attribs(),
            )
            .unwrap()[0];
        let image = driver.create_image(&ImageFormat::NV12, 8, 4).unwrap();

        // Plain surfaces have nothing to download.
        driver.get_image(plain, 0, 0, 8, 4, image.id()).unwrap();
        driver.get_image(imported, 0, 0, 8, 4, image.id()).unwrap();

        let err = driver.get_image(imported, 1, 0, 4, 4, image.id()).unwrap_err();
        assert_eq!(err.status(), Status::InvalidParameter);
        let err = driver.get_image(imported, 0, 0, 16, 4, image.id()).unwrap_err();
        assert_eq!(err.status(), Status::InvalidParameter);
        let err = driver.get_image(imported, 0, 0, 8, 4, 42).unwrap_err();
        assert_eq!(err.status(), Status::InvalidImage);
        let err = driver.get_image(42, 0, 0, 8, 4, image.id()).unwrap_err();
        assert_eq!(err.status(), Status::InvalidSurface);
    }
}
