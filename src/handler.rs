//! Object handler - filtered dispatch of objects to a backend
//!
//! Design: each handler gates its backend behind a chain of filters held
//! under a read/write lock. The chain starts as two inline slots; pushing a
//! third filter promotes both occupants into a dynamically sized sequence,
//! and once that sequence exists it is used exclusively — promotion never
//! regresses. Lock mode is chosen dynamically in exactly one place
//! ([`lock_for_dispatch`]): a backend that declares itself thread-safe is
//! dispatched under a read lock as long as only the inline slots are in
//! use.

use std::any::Any;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::error::{FilterResult, HandlerError, ObjectError};
use crate::filter::Filter;
use crate::interface::InterfaceCore;
use crate::object::{Object, TypeDescriptor};

/// Dispatch trait for object-handler backends.
pub trait HandlerBackend: Send + Sync {
    /// Whether concurrent `handle` calls are acceptable to this backend.
    /// Read once at construction, like the rest of the dispatch table.
    fn is_thread_safe(&self) -> bool {
        false
    }

    /// Process one object that passed the filter chain.
    fn handle(&self, ctx: &InterfaceCore, object: &Object) -> FilterResult;

    /// Flush whatever the backend buffers. Trivial success models a
    /// dispatch table without the flush slot.
    fn flush(&self, _ctx: &InterfaceCore) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Replace the backend object this handler writes through. The default
    /// models a dispatch table without the slot.
    fn set_backend(&self, _ctx: &InterfaceCore, _backend: &Object) -> Result<(), HandlerError> {
        Err(HandlerError::Unsupported)
    }

    /// Teardown hook, invoked once when the handler object dies.
    fn on_teardown(&self, _ctx: &InterfaceCore) {}
}

#[derive(Default)]
struct FilterChain {
    slot_a: Option<Filter>,
    slot_b: Option<Filter>,
    promoted: Option<Vec<Filter>>,
}

struct HandlerPayload {
    core: InterfaceCore,
    backend: Box<dyn HandlerBackend>,
    thread_safe: bool,
    chain: RwLock<FilterChain>,
}

enum DispatchGuard<'a> {
    Read(RwLockReadGuard<'a, FilterChain>),
    Write(RwLockWriteGuard<'a, FilterChain>),
}

impl<'a> std::ops::Deref for DispatchGuard<'a> {
    type Target = FilterChain;

    fn deref(&self) -> &FilterChain {
        match self {
            Self::Read(g) => g,
            Self::Write(g) => g,
        }
    }
}

/// Double-checked lock escalation.
///
/// A thread-unsafe backend always takes the write lock. A thread-safe one
/// takes the read lock, then re-checks whether a promoted filter sequence
/// appeared concurrently; if so it releases and re-acquires as a writer.
/// This is sound because promotion is one-way: a promoted sequence observed
/// under the write lock cannot have vanished in between.
fn lock_for_dispatch(chain: &RwLock<FilterChain>, thread_safe: bool) -> DispatchGuard<'_> {
    if !thread_safe {
        return DispatchGuard::Write(chain.write());
    }
    let read = chain.read();
    if read.promoted.is_none() {
        return DispatchGuard::Read(read);
    }
    drop(read);
    DispatchGuard::Write(chain.write())
}

fn handler_teardown(payload: &(dyn Any + Send + Sync)) {
    let Some(p) = payload.downcast_ref::<HandlerPayload>() else {
        return;
    };
    // Take the write lock so teardown serializes against in-flight
    // dispatch before the filters go away.
    let mut chain = p.chain.write();
    for filter in chain.promoted.take().into_iter().flatten() {
        let _ = filter.release();
    }
    if let Some(a) = chain.slot_a.take() {
        let _ = a.release();
    }
    if let Some(b) = chain.slot_b.take() {
        let _ = b.release();
    }
    drop(chain);
    p.backend.on_teardown(&p.core);
    p.core.release_backend_object();
}

/// Type descriptor for object-handler objects.
pub static OBJECT_HANDLER_TYPE: TypeDescriptor =
    TypeDescriptor::new("objecthandler").with_teardown(handler_teardown);

/// Handle to an object-handler object.
#[derive(Clone)]
pub struct ObjectHandler {
    object: Object,
}

impl ObjectHandler {
    /// Create a handler from a backend.
    pub fn new(
        backend: Box<dyn HandlerBackend>,
        backend_object: Option<&Object>,
        name: Option<&str>,
        associated: Option<&Object>,
    ) -> Result<ObjectHandler, ObjectError> {
        let core = InterfaceCore::new(backend_object)?;
        let thread_safe = backend.is_thread_safe();
        let payload = HandlerPayload {
            core,
            backend,
            thread_safe,
            chain: RwLock::new(FilterChain::default()),
        };
        let object = Object::new_with_payload(&OBJECT_HANDLER_TYPE, payload, name, associated)?;
        Ok(ObjectHandler { object })
    }

    /// Type-checked view of a generic handle as an object handler. Returns
    /// `None` for dead handles and other kinds; takes no ownership share.
    pub fn from_object(object: &Object) -> Option<ObjectHandler> {
        object.is_valid(&OBJECT_HANDLER_TYPE).then(|| ObjectHandler {
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

    fn payload(&self) -> Result<Arc<HandlerPayload>, HandlerError> {
        self.object
            .payload()
            .and_then(|p| p.downcast::<HandlerPayload>().ok())
            .ok_or(HandlerError::InvalidHandle)
    }

    /// Run `object` through the filter chain and, if every filter passes,
    /// the backend.
    ///
    /// Filters are evaluated in insertion order; the first non-pass result
    /// short-circuits and the backend is not invoked. The lock (read or
    /// write, see [`lock_for_dispatch`]) is held for the whole dispatch and
    /// released on every exit path.
    pub fn handle(&self, object: &Object) -> FilterResult {
        let Ok(p) = self.payload() else {
            return FilterResult::Error;
        };
        let guard = lock_for_dispatch(&p.chain, p.thread_safe);

        if let Some(filters) = &guard.promoted {
            for filter in filters {
                let result = filter.test(object);
                if result != FilterResult::Pass {
                    return result;
                }
            }
        } else {
            if let Some(a) = &guard.slot_a {
                let result = a.test(object);
                if result != FilterResult::Pass {
                    return result;
                }
            }
            if let Some(b) = &guard.slot_b {
                let result = b.test(object);
                if result != FilterResult::Pass {
                    return result;
                }
            }
        }

        p.backend.handle(&p.core, object)
    }

    /// Append a filter to the chain, taking a strong reference on it.
    ///
    /// Under the write lock: if both inline slots are occupied and no
    /// promoted sequence exists yet, both occupants migrate into a new
    /// sequence in original order, then the new filter is appended to it.
    pub fn push_filter(&self, filter: &Filter) -> Result<(), HandlerError> {
        if !filter.as_object().is_alive() {
            return Err(HandlerError::InvalidHandle);
        }
        let p = self.payload()?;
        let mut chain = p.chain.write();

        if chain.promoted.is_none() && chain.slot_a.is_some() && chain.slot_b.is_some() {
            let mut sequence = Vec::with_capacity(3);
            sequence.extend(chain.slot_a.take());
            sequence.extend(chain.slot_b.take());
            chain.promoted = Some(sequence);
            debug!(
                handler = self.object.identity(),
                "filter chain promoted to dynamic sequence"
            );
        }

        filter
            .retain()
            .map_err(|_| HandlerError::InvalidHandle)?;
        let held = filter.clone();
        if let Some(sequence) = &mut chain.promoted {
            sequence.push(held);
        } else if chain.slot_a.is_none() {
            chain.slot_a = Some(held);
        } else {
            chain.slot_b = Some(held);
        }
        Ok(())
    }

    /// Flush the backend. Locked read-or-write by the thread-safety
    /// declaration; the filter chain is not consulted, so no escalation
    /// concern exists here.
    pub fn flush(&self) -> Result<(), HandlerError> {
        let p = self.payload()?;
        let _guard = if p.thread_safe {
            DispatchGuard::Read(p.chain.read())
        } else {
            DispatchGuard::Write(p.chain.write())
        };
        p.backend.flush(&p.core)
    }

    /// Replace the backend object, always under the write lock.
    ///
    /// The backend is flushed first and the swap only proceeds if that
    /// succeeds, so no buffered data is silently dropped across the swap.
    pub fn set_backend(&self, backend: &Object) -> Result<(), HandlerError> {
        let p = self.payload()?;
        let _guard = p.chain.write();
        p.backend.flush(&p.core)?;
        debug!(handler = self.object.identity(), "replacing handler backend");
        p.backend.set_backend(&p.core, backend)
    }
}
