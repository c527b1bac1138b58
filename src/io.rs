//! IO - byte-stream dispatch over pluggable backends
//!
//! Design: one mutex per IO object serializes every operation against that
//! handle; concurrent callers block rather than race. A `touched` flag
//! records that internal buffers may disagree with the raw descriptor; only
//! a successful sync clears it, and the descriptor-export helpers refuse to
//! hand out a descriptor while it is set (syncing internally first). While a
//! descriptor is exported the handle must not be touched again, or the
//! exported descriptor becomes meaningless.

use std::any::Any;
use std::sync::Arc;

#[cfg(unix)]
use std::os::fd::RawFd;

use bitflags::bitflags;
use parking_lot::Mutex;

use crate::error::{IoError, ObjectError};
use crate::interface::InterfaceCore;
use crate::object::{Object, TypeDescriptor};

bitflags! {
    /// Flags refining IO operations.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpFlags: u32 {
        /// Operate on actual data.
        const DATA = 0x0001;
        /// Operate on metadata.
        const METADATA = 0x0002;
        /// The caller will not interact with the output side; buffer
        /// flushes may be skipped.
        const NO_WRITE = 0x0010;
        /// Get the referenced value.
        const GET = 0x0100;
        /// Set the referenced value.
        const SET = 0x0200;
        /// Use default behavior; other flags may be set in addition.
        const DEFAULTS = 0x8000;
    }
}

/// Blocking behavior of an IO handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockingMode {
    /// No blocking is done, like `O_NONBLOCK` on a POSIX system.
    None,
    /// Full blocking is done.
    Full,
}

/// Escape hatch for backend-specific control operations.
#[non_exhaustive]
pub enum ControlRequest<'a> {
    /// No-operation request.
    Nop,
    /// Backend-defined request carried as an opaque value.
    Custom(&'a mut dyn Any),
}

/// Dispatch trait for IO backends. Every method defaults to the
/// capability error, modeling a dispatch table with that slot empty.
pub trait IoBackend: Send {
    fn read(&mut self, _ctx: &InterfaceCore, _buf: &mut [u8]) -> Result<usize, IoError> {
        Err(IoError::Unsupported)
    }

    fn write(&mut self, _ctx: &InterfaceCore, _buf: &[u8]) -> Result<usize, IoError> {
        Err(IoError::Unsupported)
    }

    fn flush(&mut self, _ctx: &InterfaceCore, _flags: OpFlags) -> Result<(), IoError> {
        Err(IoError::Unsupported)
    }

    fn sync(&mut self, _ctx: &InterfaceCore, _flags: OpFlags) -> Result<(), IoError> {
        Err(IoError::Unsupported)
    }

    fn set_blocking(&mut self, _ctx: &InterfaceCore, _mode: BlockingMode) -> Result<(), IoError> {
        Err(IoError::Unsupported)
    }

    fn blocking(&self, _ctx: &InterfaceCore) -> Result<BlockingMode, IoError> {
        Err(IoError::Unsupported)
    }

    /// The raw descriptor usable in readiness system calls, if the backend
    /// has one.
    #[cfg(unix)]
    fn descriptor(&self, _ctx: &InterfaceCore) -> Option<RawFd> {
        None
    }

    fn control(
        &mut self,
        _ctx: &InterfaceCore,
        _flags: OpFlags,
        _request: &mut ControlRequest<'_>,
    ) -> Result<(), IoError> {
        Err(IoError::Unsupported)
    }

    /// Teardown hook, invoked once when the IO object dies while its
    /// operation mutex is held.
    fn on_teardown(&mut self, _ctx: &InterfaceCore) {}
}

struct IoInner {
    backend: Box<dyn IoBackend>,
    touched: bool,
    #[cfg(unix)]
    exported: Option<RawFd>,
}

struct IoPayload {
    core: InterfaceCore,
    inner: Mutex<IoInner>,
}

fn io_teardown(payload: &(dyn Any + Send + Sync)) {
    let Some(p) = payload.downcast_ref::<IoPayload>() else {
        return;
    };
    // Acquire the operation mutex so teardown serializes against any
    // in-flight operation on this handle.
    let mut inner = p.inner.lock();
    inner.backend.on_teardown(&p.core);
    drop(inner);
    p.core.release_backend_object();
}

/// Type descriptor for IO objects.
pub static IO_TYPE: TypeDescriptor = TypeDescriptor::new("io").with_teardown(io_teardown);

/// Handle to an IO object.
#[derive(Clone)]
pub struct Io {
    object: Object,
}

impl Io {
    /// Create an IO handle from a backend.
    ///
    /// The handle starts touched: nothing is known about the relation of
    /// backend buffers to the raw descriptor until the first sync.
    pub fn new(
        backend: Box<dyn IoBackend>,
        backend_object: Option<&Object>,
        name: Option<&str>,
        associated: Option<&Object>,
    ) -> Result<Io, ObjectError> {
        let core = InterfaceCore::new(backend_object)?;
        let payload = IoPayload {
            core,
            inner: Mutex::new(IoInner {
                backend,
                touched: true,
                #[cfg(unix)]
                exported: None,
            }),
        };
        let object = Object::new_with_payload(&IO_TYPE, payload, name, associated)?;
        Ok(Io { object })
    }

    /// Type-checked view of a generic handle as IO. Returns `None` for dead
    /// handles and other kinds; takes no ownership share.
    pub fn from_object(object: &Object) -> Option<Io> {
        object.is_valid(&IO_TYPE).then(|| Io {
            object: object.clone(),
        })
    }

    /// The underlying object handle.
    pub fn as_object(&self) -> &Object {
        &self.object
    }

    pub fn retain(&self) -> Result<(), ObjectError> {
        self.object.retain()
    }

    pub fn release(&self) -> Result<(), ObjectError> {
        self.object.release()
    }

    fn payload(&self) -> Result<Arc<IoPayload>, IoError> {
        self.object
            .payload()
            .and_then(|p| p.downcast::<IoPayload>().ok())
            .ok_or(IoError::InvalidHandle)
    }

    /// Read up to `buf.len()` bytes. A zero-length request succeeds with
    /// zero bytes moved and never reaches the backend.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, IoError> {
        let p = self.payload()?;
        if buf.is_empty() {
            return Ok(0);
        }
        let IoPayload { core, inner } = &*p;
        let mut inner = inner.lock();
        inner.touched = true;
        inner.backend.read(core, buf)
    }

    /// Write up to `buf.len()` bytes. A zero-length request succeeds with
    /// zero bytes moved and never reaches the backend.
    pub fn write(&self, buf: &[u8]) -> Result<usize, IoError> {
        let p = self.payload()?;
        if buf.is_empty() {
            return Ok(0);
        }
        let IoPayload { core, inner } = &*p;
        let mut inner = inner.lock();
        inner.touched = true;
        inner.backend.write(core, buf)
    }

    /// Flush internal buffers toward the underlying object. Queues the
    /// flush; data may not have reached the physical level on return.
    pub fn flush(&self, flags: OpFlags) -> Result<(), IoError> {
        let p = self.payload()?;
        let IoPayload { core, inner } = &*p;
        let mut inner = inner.lock();
        inner.touched = true;
        inner.backend.flush(core, flags)
    }

    /// Bring the handle into a state where the underlying object can be
    /// handed to other software. Flushes first; only a successful backend
    /// sync clears the touched flag.
    pub fn sync(&self, flags: OpFlags) -> Result<(), IoError> {
        let p = self.payload()?;
        let IoPayload { core, inner } = &*p;
        let mut inner = inner.lock();
        let _ = inner.backend.flush(core, flags);
        inner.backend.sync(core, flags)?;
        inner.touched = false;
        Ok(())
    }

    /// Change the blocking behavior.
    pub fn set_blocking(&self, mode: BlockingMode) -> Result<(), IoError> {
        let p = self.payload()?;
        let IoPayload { core, inner } = &*p;
        let mut inner = inner.lock();
        inner.touched = true;
        inner.backend.set_blocking(core, mode)
    }

    /// The current blocking behavior.
    pub fn blocking(&self) -> Result<BlockingMode, IoError> {
        let p = self.payload()?;
        let IoPayload { core, inner } = &*p;
        let inner = inner.lock();
        inner.backend.blocking(core)
    }

    /// Backend-specific control escape hatch.
    pub fn control(&self, flags: OpFlags, request: &mut ControlRequest<'_>) -> Result<(), IoError> {
        let p = self.payload()?;
        let IoPayload { core, inner } = &*p;
        let mut inner = inner.lock();
        inner.backend.control(core, flags, request)
    }

    /// Export the raw descriptor for registration with a readiness
    /// multiplexer.
    ///
    /// If the handle is touched — or the caller intends to watch the write
    /// side — a sync is forced first; a handle that is still touched after
    /// that cannot export. After a successful export the handle must not be
    /// touched until [`Io::release_descriptor`] is called.
    #[cfg(unix)]
    pub fn export_descriptor(&self, flags: OpFlags) -> Result<RawFd, IoError> {
        let p = self.payload()?;
        let IoPayload { core, inner: inner_mutex } = &*p;
        let mut inner = inner_mutex.lock();
        if inner.backend.descriptor(core).is_none() {
            return Err(IoError::Unsupported);
        }

        if inner.touched || !flags.contains(OpFlags::NO_WRITE) {
            drop(inner);
            self.sync(OpFlags::DEFAULTS | (flags & OpFlags::NO_WRITE))?;
            inner = inner_mutex.lock();
            if inner.touched {
                return Err(IoError::Busy);
            }
        }

        let fd = inner.backend.descriptor(core).ok_or(IoError::Unsupported)?;
        inner.exported = Some(fd);
        Ok(fd)
    }

    /// The currently exported descriptor. Fails if the handle has been
    /// touched since the export (the descriptor is no longer meaningful) or
    /// nothing is exported.
    #[cfg(unix)]
    pub fn exported_descriptor(&self) -> Result<RawFd, IoError> {
        let p = self.payload()?;
        let inner = p.inner.lock();
        if inner.touched {
            return Err(IoError::Busy);
        }
        inner.exported.ok_or(IoError::NotExported)
    }

    /// Return an exported descriptor to normal use.
    #[cfg(unix)]
    pub fn release_descriptor(&self) -> Result<(), IoError> {
        let p = self.payload()?;
        let mut inner = p.inner.lock();
        if inner.touched {
            return Err(IoError::Busy);
        }
        inner.exported.take().map(|_| ()).ok_or(IoError::NotExported)
    }

    /// Build a `pollfd` entry for this handle.
    ///
    /// Read-side interest is safe against buffered state; any other
    /// interest forces a full sync first, exactly as descriptor export
    /// does.
    #[cfg(unix)]
    pub fn as_pollfd(&self, events: libc::c_short) -> Result<libc::pollfd, IoError> {
        const SAFE_EVENTS: libc::c_short = libc::POLLIN | libc::POLLPRI | libc::POLLRDNORM;
        let is_safe = (events & !SAFE_EVENTS) == 0;
        let flags = if is_safe { OpFlags::NO_WRITE } else { OpFlags::empty() };
        let fd = self.export_descriptor(flags)?;
        Ok(libc::pollfd {
            fd,
            events,
            revents: 0,
        })
    }
}
