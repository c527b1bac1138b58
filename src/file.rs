//! Buffered file backend for IO handles
//!
//! Wraps a `std::fs::File` behind a small write buffer so log-line sized
//! writes do not each hit the kernel. Reads drain the buffer first so a
//! reader never observes the file behind its own writes.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

#[cfg(unix)]
use std::os::fd::{AsRawFd, RawFd};

use crate::error::{IoError, ObjectError};
use crate::interface::InterfaceCore;
use crate::io::{BlockingMode, Io, IoBackend, OpFlags};
use crate::object::Object;

const WRITE_BUFFER_SIZE: usize = 8 * 1024;

/// IO backend over a regular file.
pub struct FileStream {
    file: File,
    buffer: Vec<u8>,
}

impl FileStream {
    fn wrap(file: File, name: Option<&str>, associated: Option<&Object>) -> Result<Io, ObjectError> {
        let backend = FileStream {
            file,
            buffer: Vec::with_capacity(WRITE_BUFFER_SIZE),
        };
        Io::new(Box::new(backend), None, name, associated)
    }

    /// Open `path` for reading.
    pub fn open<P: AsRef<Path>>(
        path: P,
        name: Option<&str>,
        associated: Option<&Object>,
    ) -> Result<Io, ObjectError> {
        let file = File::open(path).map_err(|_| ObjectError::ConstructionFailed)?;
        Self::wrap(file, name, associated)
    }

    /// Create or truncate `path` for writing.
    pub fn create<P: AsRef<Path>>(
        path: P,
        name: Option<&str>,
        associated: Option<&Object>,
    ) -> Result<Io, ObjectError> {
        let file = File::create(path).map_err(|_| ObjectError::ConstructionFailed)?;
        Self::wrap(file, name, associated)
    }

    /// Open `path` for appending, creating it if needed.
    pub fn append<P: AsRef<Path>>(
        path: P,
        name: Option<&str>,
        associated: Option<&Object>,
    ) -> Result<Io, ObjectError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|_| ObjectError::ConstructionFailed)?;
        Self::wrap(file, name, associated)
    }

    fn drain_buffer(&mut self) -> Result<(), IoError> {
        if !self.buffer.is_empty() {
            self.file.write_all(&self.buffer)?;
            self.buffer.clear();
        }
        Ok(())
    }
}

impl IoBackend for FileStream {
    fn read(&mut self, _ctx: &InterfaceCore, buf: &mut [u8]) -> Result<usize, IoError> {
        self.drain_buffer()?;
        Ok(self.file.read(buf)?)
    }

    fn write(&mut self, _ctx: &InterfaceCore, buf: &[u8]) -> Result<usize, IoError> {
        if self.buffer.len() + buf.len() > WRITE_BUFFER_SIZE {
            self.drain_buffer()?;
        }
        if buf.len() >= WRITE_BUFFER_SIZE {
            self.file.write_all(buf)?;
        } else {
            self.buffer.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self, _ctx: &InterfaceCore, _flags: OpFlags) -> Result<(), IoError> {
        self.drain_buffer()?;
        Ok(self.file.flush()?)
    }

    fn sync(&mut self, _ctx: &InterfaceCore, _flags: OpFlags) -> Result<(), IoError> {
        self.drain_buffer()?;
        Ok(())
    }

    fn blocking(&self, _ctx: &InterfaceCore) -> Result<BlockingMode, IoError> {
        Ok(BlockingMode::Full)
    }

    #[cfg(unix)]
    fn descriptor(&self, _ctx: &InterfaceCore) -> Option<RawFd> {
        Some(self.file.as_raw_fd())
    }

    fn on_teardown(&mut self, _ctx: &InterfaceCore) {
        let _ = self.drain_buffer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.log");

        let io = FileStream::create(&path, Some("stream"), None).unwrap();
        io.write(b"one\n").unwrap();
        io.write(b"two\n").unwrap();
        // Still buffered; flushing pushes it to the file.
        io.flush(OpFlags::DEFAULTS).unwrap();
        io.release().unwrap();

        let io = FileStream::open(&path, None, None).unwrap();
        let mut buf = [0u8; 16];
        let n = io.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"one\ntwo\n");
        assert_eq!(io.blocking().unwrap(), BlockingMode::Full);
        io.release().unwrap();
    }

    #[test]
    fn test_teardown_drains_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drain.log");

        let io = FileStream::create(&path, None, None).unwrap();
        io.write(b"buffered line\n").unwrap();
        // No explicit flush: teardown must not lose the buffer.
        io.release().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"buffered line\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_descriptor_export() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fd.log");

        let io = FileStream::create(&path, None, None).unwrap();
        io.write(b"x").unwrap();
        let fd = io.export_descriptor(OpFlags::empty()).unwrap();
        assert!(fd >= 0);
        assert_eq!(io.exported_descriptor().unwrap(), fd);
        io.release_descriptor().unwrap();
        io.release().unwrap();
    }
}
