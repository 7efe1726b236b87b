use std::sync::Arc;

use crate::buffer::Buffer;
use crate::error::DriverError;
use crate::registry::{Resource, ResourceId};
use crate::surface::FOURCC_NV12;

/// `VA_LSB_FIRST`
pub const LSB_FIRST: u32 = 1;

/// `VAImageFormat`, without the RGB mask fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageFormat {
    pub fourcc: u32,
    pub byte_order: u32,
    pub bits_per_pixel: u32,
}

impl ImageFormat {
    pub const NV12: ImageFormat = ImageFormat {
        fourcc: FOURCC_NV12,
        byte_order: LSB_FIRST,
        bits_per_pixel: 12,
    };
}

pub const SUPPORTED_IMAGE_FORMATS: &[ImageFormat] = &[ImageFormat::NV12];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImagePlane {
    pub stride: u32,
    pub offset: u32,
}

/// Plane geometry of a packed image buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageLayout {
    pub planes: [ImagePlane; 2],
    pub data_size: u32,
}

impl ImageLayout {
    /// Tightly packed NV12: Y rows of `width` bytes, then interleaved UV rows
    /// of `width` rounded up to even, half the height rounded up.
    pub fn nv12(width: u32, height: u32) -> Self {
        let uv_stride = width.next_multiple_of(2);
        let uv_offset = width * height;
        let uv_size = height.div_ceil(2) * uv_stride;
        ImageLayout {
            planes: [
                ImagePlane {
                    stride: width,
                    offset: 0,
                },
                ImagePlane {
                    stride: uv_stride,
                    offset: uv_offset,
                },
            ],
            data_size: uv_offset + uv_size,
        }
    }

    /// Layout for a requested format, rejecting everything but 8-bit NV12 and
    /// sizes that overflow the 32-bit `VAImage` fields.
    pub fn for_format(format: &ImageFormat, width: u32, height: u32) -> Result<Self, DriverError> {
        if format.fourcc != FOURCC_NV12 {
            return Err(DriverError::InvalidImageFormat(format.fourcc));
        }
        if format.byte_order != LSB_FIRST || format.bits_per_pixel != 12 {
            return Err(DriverError::invalid_parameter(format!(
                "NV12 image with byte order {} and {} bpp",
                format.byte_order, format.bits_per_pixel
            )));
        }
        if width == 0 || height == 0 || width > u32::from(u16::MAX) || height > u32::from(u16::MAX) {
            return Err(DriverError::invalid_parameter(format!(
                "image size {width}x{height}"
            )));
        }
        let fits = u64::from(width) * u64::from(height) * 3 / 2 + u64::from(width) < u64::from(u32::MAX);
        if !fits {
            return Err(DriverError::invalid_parameter(format!(
                "image size {width}x{height} overflows"
            )));
        }
        Ok(Self::nv12(width, height))
    }
}

/// A CPU-side image (`VAImageID`) whose pixels live in an image buffer.
#[derive(Debug)]
pub struct Image {
    id: ResourceId,
    format: ImageFormat,
    width: u32,
    height: u32,
    layout: ImageLayout,
    buffer: Arc<Buffer>,
}

impl Image {
    pub fn new(
        id: ResourceId,
        format: ImageFormat,
        width: u32,
        height: u32,
        layout: ImageLayout,
        buffer: Arc<Buffer>,
    ) -> Self {
        Image {
            id,
            format,
            width,
            height,
            layout,
            buffer,
        }
    }

    pub fn format(&self) -> &ImageFormat {
        &self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn layout(&self) -> &ImageLayout {
        &self.layout
    }

    pub fn num_planes(&self) -> usize {
        self.layout.planes.len()
    }

    pub fn data_size(&self) -> u32 {
        self.layout.data_size
    }

    /// Id of the image buffer holding the pixels; destroyed with the image.
    pub fn buffer(&self) -> ResourceId {
        self.buffer.id()
    }

    pub fn backing(&self) -> &Arc<Buffer> {
        &self.buffer
    }
}

impl Resource for Image {
    fn id(&self) -> ResourceId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nv12_layout_even() {
        let layout = ImageLayout::nv12(1920, 1080);
        assert_eq!(layout.planes[0], ImagePlane { stride: 1920, offset: 0 });
        assert_eq!(layout.planes[1], ImagePlane { stride: 1920, offset: 1920 * 1080 });
        assert_eq!(layout.data_size, 1920 * 1080 * 3 / 2);
    }

    #[test]
    fn test_nv12_layout_odd() {
        let layout = ImageLayout::nv12(5, 3);
        assert_eq!(layout.planes[1].stride, 6);
        assert_eq!(layout.planes[1].offset, 15);
        assert_eq!(layout.data_size, 15 + 2 * 6);
    }

    #[test]
    fn test_format_validation() {
        assert!(ImageLayout::for_format(&ImageFormat::NV12, 64, 64).is_ok());

        let yv12 = ImageFormat {
            fourcc: crate::surface::FOURCC_YV12,
            ..ImageFormat::NV12
        };
        assert!(matches!(
            ImageLayout::for_format(&yv12, 64, 64),
            Err(DriverError::InvalidImageFormat(_))
        ));

        let msb = ImageFormat {
            byte_order: 2,
            ..ImageFormat::NV12
        };
        assert!(ImageLayout::for_format(&msb, 64, 64).is_err());
        assert!(ImageLayout::for_format(&ImageFormat::NV12, 0, 64).is_err());
        assert!(ImageLayout::for_format(&ImageFormat::NV12, 70_000, 64).is_err());
    }
}
