use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use tracing::debug;

/// Anonymous shared memory standing in for a dma-buf exported by a GPU
/// allocator. Mapping it through the driver exercises the same import path
/// as a real render target.
pub struct SurfaceMemory {
    fd: OwnedFd,
    len: usize,
}

impl SurfaceMemory {
    pub fn create(name: &str, len: usize) -> io::Result<Self> {
        let c_name = CString::new(name)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "name contains null"))?;

        // SAFETY: `c_name` is a valid NUL-terminated string for the duration
        // of the call.
        let raw = unsafe { libc::memfd_create(c_name.as_ptr(), libc::MFD_CLOEXEC) };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: memfd_create returned a fresh descriptor that nothing else owns.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        // SAFETY: `fd` is a valid open descriptor.
        if unsafe { libc::ftruncate(fd.as_raw_fd(), len as libc::off_t) } != 0 {
            return Err(io::Error::last_os_error());
        }

        debug!(name, len, "surface memory created");
        Ok(SurfaceMemory { fd, len })
    }

    /// The descriptor to put in a DRM PRIME descriptor. It stays owned here;
    /// the driver duplicates it on import.
    pub fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    pub fn size(&self) -> usize {
        self.len
    }
}
