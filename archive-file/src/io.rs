//! Direct I/O adapter: positional read/write against a file descriptor with an exclusive
//! advisory lock, calling into POSIX directly rather than going through buffered std I/O.

use std::fs::File;
use std::os::unix::io::AsRawFd;

use crate::error::{ArchiveError, Result};

/// A single open file descriptor, exclusively locked for the lifetime of this adapter.
pub struct FileIo {
    file: File,
    write_access: bool,
}

impl FileIo {
    /// Acquire a non-blocking exclusive advisory lock (`flock(2)`, `LOCK_EX | LOCK_NB`) over an
    /// already-open file. Returns `Unavailable` if some other archive object (in this process or
    /// another) already holds it.
    pub fn lock(file: File, write_access: bool) -> Result<Self> {
        let fd = file.as_raw_fd();
        let rc = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %std::io::Error::last_os_error(), "failed to acquire exclusive lock");
            return Err(ArchiveError::Unavailable);
        }
        Ok(FileIo { file, write_access })
    }

    pub fn write_access(&self) -> bool {
        self.write_access
    }

    /// Current size of the file, per `fstat`.
    pub fn file_size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Read up to `len` bytes starting at `offset`. A short read (EOF reached before `len` bytes)
    /// returns fewer bytes than requested; callers compare the returned length to `len`.
    pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let n = self.read_into(offset, &mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Read up to `buf.len()` bytes starting at `offset` directly into `buf`, returning the number
    /// of bytes actually read (short on EOF). Lets callers reuse an existing buffer, such as a
    /// page-cache slot, instead of allocating one per read.
    pub fn read_into(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let fd = self.file.as_raw_fd();
        let n = unsafe {
            libc::pread(
                fd,
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                offset as libc::off_t,
            )
        };
        if n < 0 {
            return Err(ArchiveError::Io(std::io::Error::last_os_error()));
        }
        Ok(n as usize)
    }

    /// Write `data` at `offset` in a single `pwrite` call.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        if !self.write_access {
            return Err(ArchiveError::Unsupported);
        }
        let fd = self.file.as_raw_fd();
        let n = unsafe {
            libc::pwrite(
                fd,
                data.as_ptr() as *const libc::c_void,
                data.len(),
                offset as libc::off_t,
            )
        };
        if n < 0 {
            return Err(ArchiveError::Io(std::io::Error::last_os_error()));
        }
        if n as usize != data.len() {
            return Err(ArchiveError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "short write while appending archive entry",
            )));
        }
        Ok(())
    }
}

// `flock` is released implicitly when the underlying `File` is dropped and the descriptor closed;
// there is no separate explicit unlock step to perform here.
