use std::collections::HashSet;
use std::io;
use std::sync::{Mutex, PoisonError};

use tracing::{debug, trace};

use crate::bo_mapping::{BoImport, BoMapper, BoMapping, BoObject, BoPlane};
use crate::config::{RT_FORMAT_YUV420, RT_FORMAT_YUV420_10};
use crate::engine::DecodedPicture;
use crate::error::DriverError;
use crate::image::ImageLayout;
use crate::registry::{Resource, ResourceId};

pub const FOURCC_NV12: u32 = u32::from_le_bytes(*b"NV12");
pub const FOURCC_P010: u32 = u32::from_le_bytes(*b"P010");
pub const FOURCC_YV12: u32 = u32::from_le_bytes(*b"YV12");

/// `VA_SURFACE_ATTRIB_MEM_TYPE_DRM_PRIME_2`
pub const MEM_TYPE_DRM_PRIME_2: u32 = 0x4000_0000;

pub const MAX_SURFACE_WIDTH: u32 = 4096;
pub const MAX_SURFACE_HEIGHT: u32 = 4096;

/// Objects a DRM PRIME descriptor can carry.
const MAX_OBJECTS: usize = 4;
const NV12_PLANES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrmObject {
    pub fd: i32,
    pub size: u32,
    pub drm_format_modifier: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrmPlane {
    pub object_index: u32,
    pub offset: u32,
    pub pitch: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrmLayer {
    pub drm_format: u32,
    pub planes: Vec<DrmPlane>,
}

/// `VADRMPRIMESurfaceDescriptor`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrmPrimeDescriptor {
    pub fourcc: u32,
    pub width: u32,
    pub height: u32,
    pub objects: Vec<DrmObject>,
    pub layers: Vec<DrmLayer>,
}

impl DrmPrimeDescriptor {
    /// Single-object, linear NV12 buffer with the UV plane right after Y.
    pub fn nv12(fd: i32, width: u32, height: u32) -> Self {
        let pitch = width.next_multiple_of(2);
        let luma_size = pitch * height;
        DrmPrimeDescriptor {
            fourcc: FOURCC_NV12,
            width,
            height,
            objects: vec![DrmObject {
                fd,
                size: luma_size + pitch * height.div_ceil(2),
                drm_format_modifier: 0,
            }],
            layers: vec![DrmLayer {
                drm_format: FOURCC_NV12,
                planes: vec![
                    DrmPlane {
                        object_index: 0,
                        offset: 0,
                        pitch,
                    },
                    DrmPlane {
                        object_index: 0,
                        offset: luma_size,
                        pitch,
                    },
                ],
            }],
        }
    }

    /// Attribute list importing this descriptor.
    pub fn into_attribs(self) -> Vec<SurfaceAttrib> {
        vec![
            SurfaceAttrib::MemoryType(MEM_TYPE_DRM_PRIME_2),
            SurfaceAttrib::ExternalBufferDescriptor(self),
        ]
    }
}

/// `VASurfaceAttrib`, with the generic value decoded per type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceAttrib {
    PixelFormat(u32),
    MinWidth(u32),
    MaxWidth(u32),
    MinHeight(u32),
    MaxHeight(u32),
    MemoryType(u32),
    ExternalBufferDescriptor(DrmPrimeDescriptor),
    UsageHint(u32),
}

impl SurfaceAttrib {
    /// `VASurfaceAttribType`
    pub fn type_id(&self) -> u32 {
        match self {
            SurfaceAttrib::PixelFormat(_) => 1,
            SurfaceAttrib::MinWidth(_) => 2,
            SurfaceAttrib::MaxWidth(_) => 3,
            SurfaceAttrib::MinHeight(_) => 4,
            SurfaceAttrib::MaxHeight(_) => 5,
            SurfaceAttrib::MemoryType(_) => 6,
            SurfaceAttrib::ExternalBufferDescriptor(_) => 7,
            SurfaceAttrib::UsageHint(_) => 8,
        }
    }
}

/// Attributes reported by `vaQuerySurfaceAttributes`.
pub fn supported_surface_attributes() -> Vec<SurfaceAttrib> {
    vec![
        SurfaceAttrib::PixelFormat(FOURCC_NV12),
        SurfaceAttrib::PixelFormat(FOURCC_YV12),
        SurfaceAttrib::MaxWidth(MAX_SURFACE_WIDTH),
        SurfaceAttrib::MaxHeight(MAX_SURFACE_HEIGHT),
    ]
}

/// A render target (`VASurfaceID`).
///
/// Surfaces created with attributes are imported DRM PRIME buffers and keep a
/// CPU mapping of them; plain surfaces have no backing memory.
pub struct Surface {
    id: ResourceId,
    rt_format: u32,
    fourcc: u32,
    width: u32,
    height: u32,
    attribs: Vec<SurfaceAttrib>,
    mapping: Mutex<Option<BoMapping>>,
}

impl Surface {
    pub fn new(
        id: ResourceId,
        rt_format: u32,
        width: u32,
        height: u32,
        attribs: Vec<SurfaceAttrib>,
        mapper: &dyn BoMapper,
    ) -> Result<Self, DriverError> {
        if attribs.is_empty() {
            return Ok(Surface {
                id,
                rt_format,
                fourcc: 0,
                width,
                height,
                attribs,
                mapping: Mutex::new(None),
            });
        }

        let import = validate_import(rt_format, width, height, &attribs)?;
        let mapping = mapper.import(&import)?;
        debug!(
            id,
            width,
            height,
            objects = import.objects.len(),
            modifier = import.modifier,
            "imported surface"
        );

        Ok(Surface {
            id,
            rt_format,
            fourcc: import.fourcc,
            width,
            height,
            attribs,
            mapping: Mutex::new(Some(mapping)),
        })
    }

    pub fn rt_format(&self) -> u32 {
        self.rt_format
    }

    /// Pixel format of the imported buffer, 0 for plain surfaces.
    pub fn fourcc(&self) -> u32 {
        self.fourcc
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn attribs(&self) -> &[SurfaceAttrib] {
        &self.attribs
    }

    pub fn has_mapping(&self) -> bool {
        self.lock_mapping().is_some()
    }

    /// Copy a decoded picture into the mapped buffer. Returns `false` for
    /// surfaces without a mapping.
    pub fn write_picture(&self, picture: &DecodedPicture) -> io::Result<bool> {
        let mut guard = self.lock_mapping();
        let Some(mapping) = guard.as_mut() else {
            return Ok(false);
        };

        let bytes_per_sample = if self.fourcc == FOURCC_P010 { 2 } else { 1 };
        let width = picture.width.min(self.width) as usize;
        let height = picture.height.min(self.height) as usize;
        let chroma_row = width.next_multiple_of(2) * bytes_per_sample;

        let mut access = mapping.begin_access()?;
        let (dst_stride, dst_rows) = (access.stride(0), access.rows(0));
        copy_plane(
            &picture.luma,
            picture.luma_stride,
            access.plane_mut(0),
            dst_stride,
            width * bytes_per_sample,
            height.min(dst_rows),
        );
        let (dst_stride, dst_rows) = (access.stride(1), access.rows(1));
        copy_plane(
            &picture.chroma,
            picture.chroma_stride,
            access.plane_mut(1),
            dst_stride,
            chroma_row,
            height.div_ceil(2).min(dst_rows),
        );
        trace!(id = self.id, pic_id = picture.pic_id, width, height, "picture written to surface");
        Ok(true)
    }

    /// Copy the top-left `width`x`height` NV12 area into an image buffer laid
    /// out as `layout`. Returns `false` for surfaces without a mapping.
    pub fn download_nv12(
        &self,
        width: u32,
        height: u32,
        dst: &mut [u8],
        layout: &ImageLayout,
    ) -> io::Result<bool> {
        let mut guard = self.lock_mapping();
        let Some(mapping) = guard.as_mut() else {
            return Ok(false);
        };
        let access = mapping.begin_access()?;

        let (width, height) = (width as usize, height as usize);
        let rows = [height, height.div_ceil(2)];
        let row_bytes = [width, width.next_multiple_of(2)];
        for plane in 0..NV12_PLANES {
            let dst_plane = &layout.planes[plane];
            copy_plane(
                access.plane(plane),
                access.stride(plane),
                &mut dst[dst_plane.offset as usize..],
                dst_plane.stride as usize,
                row_bytes[plane],
                rows[plane],
            );
        }
        Ok(true)
    }

    fn lock_mapping(&self) -> std::sync::MutexGuard<'_, Option<BoMapping>> {
        self.mapping.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Resource for Surface {
    fn id(&self) -> ResourceId {
        self.id
    }
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("id", &self.id)
            .field("rt_format", &self.rt_format)
            .field("fourcc", &self.fourcc)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("mapped", &self.has_mapping())
            .finish()
    }
}

/// Check an imported surface description and turn it into a mapping request.
fn validate_import(
    rt_format: u32,
    width: u32,
    height: u32,
    attribs: &[SurfaceAttrib],
) -> Result<BoImport, DriverError> {
    let mut seen = HashSet::new();
    let mut memory_type = None;
    let mut descriptor = None;
    for attrib in attribs {
        if !seen.insert(attrib.type_id()) {
            return Err(DriverError::invalid_parameter(format!(
                "surface attribute {} given twice",
                attrib.type_id()
            )));
        }
        match attrib {
            SurfaceAttrib::MemoryType(t) => memory_type = Some(*t),
            SurfaceAttrib::ExternalBufferDescriptor(d) => descriptor = Some(d),
            _ => {}
        }
    }

    match memory_type {
        Some(MEM_TYPE_DRM_PRIME_2) => {}
        Some(other) => {
            return Err(DriverError::invalid_parameter(format!(
                "unsupported memory type {other:#x}"
            )))
        }
        None => return Err(DriverError::invalid_parameter("memory type missing")),
    }
    let desc = descriptor.ok_or_else(|| DriverError::invalid_parameter("buffer descriptor missing"))?;

    if width == 0 || height == 0 {
        return Err(DriverError::invalid_parameter("zero-sized surface"));
    }
    if desc.width != width || desc.height != height {
        return Err(DriverError::invalid_parameter(format!(
            "descriptor is {}x{}, surface is {width}x{height}",
            desc.width, desc.height
        )));
    }

    let expected_rt_format = match desc.fourcc {
        FOURCC_NV12 => RT_FORMAT_YUV420,
        FOURCC_P010 => RT_FORMAT_YUV420_10,
        other => return Err(DriverError::InvalidImageFormat(other)),
    };
    if rt_format != expected_rt_format {
        return Err(DriverError::UnsupportedRtFormat(rt_format));
    }

    if desc.objects.is_empty() || desc.objects.len() > MAX_OBJECTS {
        return Err(DriverError::invalid_parameter(format!(
            "{} buffer objects",
            desc.objects.len()
        )));
    }
    let modifier = desc.objects[0].drm_format_modifier;
    if desc.objects.iter().any(|o| o.drm_format_modifier != modifier) {
        return Err(DriverError::invalid_parameter("mixed format modifiers"));
    }

    let [layer] = desc.layers.as_slice() else {
        return Err(DriverError::invalid_parameter(format!(
            "{} layers, expected 1",
            desc.layers.len()
        )));
    };
    // DRM and VA share fourcc codes for NV12 and P010.
    if layer.drm_format != desc.fourcc {
        return Err(DriverError::invalid_parameter(format!(
            "layer format {:#010x} does not match {:#010x}",
            layer.drm_format, desc.fourcc
        )));
    }
    if layer.planes.len() != NV12_PLANES {
        return Err(DriverError::invalid_parameter(format!(
            "{} planes, expected {NV12_PLANES}",
            layer.planes.len()
        )));
    }

    let rows = [height as usize, (height as usize).div_ceil(2)];
    let mut planes = Vec::with_capacity(NV12_PLANES);
    for (plane, rows) in layer.planes.iter().zip(rows) {
        if plane.object_index as usize >= desc.objects.len() {
            return Err(DriverError::invalid_parameter(format!(
                "plane refers to object {}",
                plane.object_index
            )));
        }
        planes.push(BoPlane {
            object_index: plane.object_index as usize,
            offset: plane.offset as usize,
            stride: plane.pitch as usize,
            rows,
        });
    }

    Ok(BoImport {
        fourcc: desc.fourcc,
        width,
        height,
        modifier,
        objects: desc
            .objects
            .iter()
            .map(|o| BoObject {
                fd: o.fd,
                size: o.size,
            })
            .collect(),
        planes,
    })
}

/// Row-by-row copy between two strided planes.
fn copy_plane(
    src: &[u8],
    src_stride: usize,
    dst: &mut [u8],
    dst_stride: usize,
    row_bytes: usize,
    rows: usize,
) {
    let row_bytes = row_bytes.min(src_stride).min(dst_stride);
    if row_bytes == 0 {
        return;
    }
    if src_stride == row_bytes && dst_stride == row_bytes {
        let len = (row_bytes * rows).min(src.len()).min(dst.len());
        dst[..len].copy_from_slice(&src[..len]);
        return;
    }
    for (src_row, dst_row) in src
        .chunks(src_stride)
        .zip(dst.chunks_mut(dst_stride))
        .take(rows)
    {
        let n = row_bytes.min(src_row.len()).min(dst_row.len());
        dst_row[..n].copy_from_slice(&src_row[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bo_mapping::HeapMapper;
    use bytes::Bytes;

    fn nv12_descriptor(width: u32, height: u32) -> DrmPrimeDescriptor {
        DrmPrimeDescriptor::nv12(-1, width, height)
    }

    fn imported(desc: DrmPrimeDescriptor) -> Vec<SurfaceAttrib> {
        vec![
            SurfaceAttrib::MemoryType(MEM_TYPE_DRM_PRIME_2),
            SurfaceAttrib::ExternalBufferDescriptor(desc),
        ]
    }

    #[test]
    fn test_fourcc_values() {
        assert_eq!(FOURCC_NV12, 0x3231_564E);
        assert_eq!(FOURCC_P010, 0x3031_3050);
        assert_eq!(FOURCC_YV12, 0x3231_5659);
    }

    #[test]
    fn test_plain_surface_has_no_mapping() {
        let s = Surface::new(3, RT_FORMAT_YUV420, 64, 32, vec![], &HeapMapper).unwrap();
        assert_eq!(s.id(), 3);
        assert_eq!(s.fourcc(), 0);
        assert!(!s.has_mapping());
    }

    #[test]
    fn test_imported_surface_is_mapped() {
        let s = Surface::new(
            0,
            RT_FORMAT_YUV420,
            64,
            32,
            imported(nv12_descriptor(64, 32)),
            &HeapMapper,
        )
        .unwrap();
        assert_eq!(s.fourcc(), FOURCC_NV12);
        assert!(s.has_mapping());
    }

    #[test]
    fn test_import_rejections() {
        let new = |rt, attribs| Surface::new(0, rt, 64, 32, attribs, &HeapMapper);

        let dup = vec![
            SurfaceAttrib::MemoryType(MEM_TYPE_DRM_PRIME_2),
            SurfaceAttrib::MemoryType(MEM_TYPE_DRM_PRIME_2),
        ];
        assert!(matches!(new(RT_FORMAT_YUV420, dup), Err(DriverError::InvalidParameter(_))));

        let no_desc = vec![SurfaceAttrib::MemoryType(MEM_TYPE_DRM_PRIME_2)];
        assert!(new(RT_FORMAT_YUV420, no_desc).is_err());

        let no_mem_type = vec![SurfaceAttrib::ExternalBufferDescriptor(nv12_descriptor(64, 32))];
        assert!(new(RT_FORMAT_YUV420, no_mem_type).is_err());

        let wrong_size = imported(nv12_descriptor(32, 32));
        assert!(new(RT_FORMAT_YUV420, wrong_size).is_err());

        assert!(matches!(
            new(RT_FORMAT_YUV420_10, imported(nv12_descriptor(64, 32))),
            Err(DriverError::UnsupportedRtFormat(_))
        ));

        let mut desc = nv12_descriptor(64, 32);
        desc.fourcc = FOURCC_YV12;
        assert!(matches!(
            new(RT_FORMAT_YUV420, imported(desc)),
            Err(DriverError::InvalidImageFormat(_))
        ));

        let mut desc = nv12_descriptor(64, 32);
        desc.objects.push(DrmObject {
            fd: -1,
            size: 16,
            drm_format_modifier: 7,
        });
        assert!(new(RT_FORMAT_YUV420, imported(desc)).is_err());

        let mut desc = nv12_descriptor(64, 32);
        desc.layers[0].planes[1].object_index = 1;
        assert!(new(RT_FORMAT_YUV420, imported(desc)).is_err());

        let mut desc = nv12_descriptor(64, 32);
        desc.layers.push(desc.layers[0].clone());
        assert!(new(RT_FORMAT_YUV420, imported(desc)).is_err());
    }

    #[test]
    fn test_write_picture_strips_source_padding() {
        let s = Surface::new(
            0,
            RT_FORMAT_YUV420,
            4,
            2,
            imported(nv12_descriptor(4, 2)),
            &HeapMapper,
        )
        .unwrap();

        let picture = DecodedPicture {
            pic_id: 9,
            width: 4,
            height: 2,
            luma: Bytes::from_static(&[1, 2, 3, 4, 0, 0, 5, 6, 7, 8, 0, 0]),
            luma_stride: 6,
            chroma: Bytes::from_static(&[9, 9, 9, 9, 0, 0]),
            chroma_stride: 6,
        };
        assert!(s.write_picture(&picture).unwrap());

        let layout = ImageLayout::nv12(4, 2);
        let mut out = vec![0u8; layout.data_size as usize];
        assert!(s.download_nv12(4, 2, &mut out, &layout).unwrap());
        assert_eq!(out, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 9, 9, 9]);
    }
}
