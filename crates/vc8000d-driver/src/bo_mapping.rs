//! CPU mappings of the buffer objects backing imported surfaces.

use std::io;
#[cfg(target_os = "linux")]
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::Arc;

use bytes::BytesMut;
use tracing::warn;

/// One dma-buf object of an import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoObject {
    pub fd: i32,
    pub size: u32,
}

/// Where a plane lives inside the objects of an import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoPlane {
    pub object_index: usize,
    pub offset: usize,
    pub stride: usize,
    pub rows: usize,
}

impl BoPlane {
    /// Bytes from the start of the object to the end of the plane.
    pub fn end(&self) -> usize {
        self.offset + self.stride * self.rows
    }
}

/// Everything needed to map an externally allocated surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoImport {
    pub fourcc: u32,
    pub width: u32,
    pub height: u32,
    pub modifier: u64,
    pub objects: Vec<BoObject>,
    pub planes: Vec<BoPlane>,
}

/// Memory a mapping reads and writes through.
pub trait MappedRegion: Send {
    fn as_slice(&self) -> &[u8];
    fn as_mut_slice(&mut self) -> &mut [u8];

    /// Called before CPU access so caches can be made coherent.
    fn begin_cpu_access(&self) -> io::Result<()> {
        Ok(())
    }

    fn end_cpu_access(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Maps imports into CPU-accessible memory.
pub trait BoMapper: Send + Sync {
    fn import(&self, import: &BoImport) -> io::Result<BoMapping>;
}

/// A mapped buffer object. Unmapped when dropped.
pub struct BoMapping {
    regions: Vec<Box<dyn MappedRegion>>,
    planes: Vec<BoPlane>,
}

impl BoMapping {
    pub fn new(regions: Vec<Box<dyn MappedRegion>>, planes: Vec<BoPlane>) -> io::Result<Self> {
        for (i, plane) in planes.iter().enumerate() {
            let Some(region) = regions.get(plane.object_index) else {
                return Err(invalid_input(format!(
                    "plane {i} refers to missing object {}",
                    plane.object_index
                )));
            };
            if plane.end() > region.as_slice().len() {
                return Err(invalid_input(format!(
                    "plane {i} ends at {} past object size {}",
                    plane.end(),
                    region.as_slice().len()
                )));
            }
        }
        Ok(BoMapping { regions, planes })
    }

    pub fn num_planes(&self) -> usize {
        self.planes.len()
    }

    pub fn plane(&self, index: usize) -> BoPlane {
        self.planes[index]
    }

    /// Start cache-coherent CPU access; it ends when the guard is dropped.
    pub fn begin_access(&mut self) -> io::Result<BoAccess<'_>> {
        for region in &self.regions {
            region.begin_cpu_access()?;
        }
        Ok(BoAccess { mapping: self })
    }
}

/// Scoped CPU access to a [`BoMapping`].
pub struct BoAccess<'a> {
    mapping: &'a mut BoMapping,
}

impl BoAccess<'_> {
    pub fn stride(&self, plane: usize) -> usize {
        self.mapping.planes[plane].stride
    }

    pub fn rows(&self, plane: usize) -> usize {
        self.mapping.planes[plane].rows
    }

    pub fn plane(&self, plane: usize) -> &[u8] {
        let p = self.mapping.planes[plane];
        &self.mapping.regions[p.object_index].as_slice()[p.offset..p.end()]
    }

    pub fn plane_mut(&mut self, plane: usize) -> &mut [u8] {
        let p = self.mapping.planes[plane];
        &mut self.mapping.regions[p.object_index].as_mut_slice()[p.offset..p.end()]
    }
}

impl Drop for BoAccess<'_> {
    fn drop(&mut self) {
        for region in &self.mapping.regions {
            if let Err(e) = region.end_cpu_access() {
                warn!(%e, "ending CPU access failed");
            }
        }
    }
}

/// Heap-backed region, for software surfaces and tests.
pub struct HeapRegion(BytesMut);

impl HeapRegion {
    pub fn zeroed(len: usize) -> Self {
        HeapRegion(BytesMut::zeroed(len))
    }
}

impl MappedRegion for HeapRegion {
    fn as_slice(&self) -> &[u8] {
        &self.0
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

/// Ignores the file descriptors and backs every object with zeroed heap
/// memory of the declared size.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapMapper;

impl BoMapper for HeapMapper {
    fn import(&self, import: &BoImport) -> io::Result<BoMapping> {
        let regions = import
            .objects
            .iter()
            .map(|o| Box::new(HeapRegion::zeroed(o.size as usize)) as Box<dyn MappedRegion>)
            .collect();
        BoMapping::new(regions, import.planes.clone())
    }
}

/// The mapper for the platform: dma-buf on Linux, heap memory elsewhere.
pub fn system_mapper() -> Arc<dyn BoMapper> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(DmaBufMapper)
    }
    #[cfg(not(target_os = "linux"))]
    {
        Arc::new(HeapMapper)
    }
}

fn invalid_input(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg)
}

#[cfg(target_os = "linux")]
mod dma_buf {
    use super::*;

    /// `DMA_BUF_IOCTL_SYNC`, `_IOW('b', 0, struct dma_buf_sync)`.
    const DMA_BUF_IOCTL_SYNC: u64 = 0x4008_6200;
    const DMA_BUF_SYNC_RW: u64 = 0x3;
    const DMA_BUF_SYNC_START: u64 = 0x0;
    const DMA_BUF_SYNC_END: u64 = 0x4;

    #[repr(C)]
    struct DmaBufSync {
        flags: u64,
    }

    /// Shared mapping of one dma-buf fd.
    pub struct DmaBufRegion {
        fd: OwnedFd,
        ptr: *mut u8,
        len: usize,
    }

    // SAFETY: the mapping is owned by this region and only reachable through
    // `&self`/`&mut self`.
    unsafe impl Send for DmaBufRegion {}

    impl DmaBufRegion {
        /// Duplicate `fd` and map `len` bytes of it read-write.
        pub fn map(fd: RawFd, len: usize) -> io::Result<Self> {
            // SAFETY: fcntl does not touch memory; a negative result is checked.
            let dup = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 0) };
            if dup < 0 {
                return Err(io::Error::last_os_error());
            }
            // SAFETY: `dup` is a fresh descriptor we own.
            let fd = unsafe { OwnedFd::from_raw_fd(dup) };

            // SAFETY: lseek on an owned descriptor.
            let size = unsafe { libc::lseek(fd.as_raw_fd(), 0, libc::SEEK_END) };
            if size < 0 {
                return Err(io::Error::last_os_error());
            }
            if (size as u64) < len as u64 {
                return Err(invalid_input(format!(
                    "buffer object is {size} bytes, {len} needed"
                )));
            }

            // SAFETY: mapping a region of an fd we own; failure is checked.
            let ptr = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    len,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED,
                    fd.as_raw_fd(),
                    0,
                )
            };
            if ptr == libc::MAP_FAILED {
                return Err(io::Error::last_os_error());
            }

            Ok(DmaBufRegion {
                fd,
                ptr: ptr as *mut u8,
                len,
            })
        }

        fn sync(&self, flags: u64) -> io::Result<()> {
            let sync = DmaBufSync { flags };
            // SAFETY: the ioctl reads one `DmaBufSync` from a valid pointer.
            let ret = unsafe {
                libc::ioctl(
                    self.fd.as_raw_fd(),
                    DMA_BUF_IOCTL_SYNC as _,
                    &sync as *const DmaBufSync,
                )
            };
            if ret == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            // Not a dma-buf (e.g. a memfd): nothing to synchronize.
            if err.raw_os_error() == Some(libc::ENOTTY) {
                return Ok(());
            }
            Err(err)
        }
    }

    impl MappedRegion for DmaBufRegion {
        fn as_slice(&self) -> &[u8] {
            // SAFETY: `ptr` maps `len` bytes for the lifetime of `self`.
            unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
        }

        fn as_mut_slice(&mut self) -> &mut [u8] {
            // SAFETY: as above; `&mut self` makes the borrow exclusive.
            unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
        }

        fn begin_cpu_access(&self) -> io::Result<()> {
            self.sync(DMA_BUF_SYNC_START | DMA_BUF_SYNC_RW)
        }

        fn end_cpu_access(&self) -> io::Result<()> {
            self.sync(DMA_BUF_SYNC_END | DMA_BUF_SYNC_RW)
        }
    }

    impl Drop for DmaBufRegion {
        fn drop(&mut self) {
            // SAFETY: unmapping exactly the region mapped in `map`.
            unsafe {
                libc::munmap(self.ptr as *mut libc::c_void, self.len);
            }
        }
    }

    /// Maps dma-buf fds with `mmap`.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct DmaBufMapper;

    impl BoMapper for DmaBufMapper {
        fn import(&self, import: &BoImport) -> io::Result<BoMapping> {
            let mut regions: Vec<Box<dyn MappedRegion>> = Vec::with_capacity(import.objects.len());
            for (index, object) in import.objects.iter().enumerate() {
                // Only as much as the planes in this object reach.
                let len = import
                    .planes
                    .iter()
                    .filter(|p| p.object_index == index)
                    .map(BoPlane::end)
                    .max()
                    .unwrap_or(0)
                    .max(object.size as usize);
                regions.push(Box::new(DmaBufRegion::map(object.fd, len)?));
            }
            BoMapping::new(regions, import.planes.clone())
        }
    }
}

#[cfg(target_os = "linux")]
pub use dma_buf::{DmaBufMapper, DmaBufRegion};
