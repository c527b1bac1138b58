//! Object core - reference-counted, dynamically-typed object model
//!
//! Design: every object is a shared shell holding its type descriptor and a
//! lock-guarded state record (strong/weak counts, display name, associated
//! object, payload). [`Object`] values are plain handles: copying one copies
//! the address only, never an ownership share. Ownership shares are the
//! explicit strong and weak counts mutated by [`Object::retain`],
//! [`Object::release`], [`Object::retain_weak`] and
//! [`Object::release_weak`].
//!
//! The payload lives exactly while the strong count is non-zero. When the
//! count reaches zero the teardown callback fires once, the payload, name
//! and associated object are cleared, and the shell becomes a tombstone:
//! surviving handles (typically weak holders) can still inspect the type and
//! render a marker string, but every payload-touching operation reports an
//! invalid handle instead of observing stale state.

pub mod descriptor;

use std::any::Any;
use std::ptr;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::error::{Comparison, ObjectError};

pub use self::descriptor::{
    CloneFlags, CompareFn, ConstructFn, ConvertFn, GetInterfaceFn, ObjectView, StringifyFn,
    TeardownFn, TypeDescriptor, BASE_TYPE, CONTROL_VERSION,
};

/// Opaque payload shared between an object and its in-flight operations.
pub type Payload = Arc<dyn Any + Send + Sync>;

struct State {
    strong: usize,
    weak: usize,
    name: Option<Arc<str>>,
    associated: Option<Object>,
    payload: Option<Payload>,
}

struct Shell {
    ty: &'static TypeDescriptor,
    state: Mutex<State>,
}

/// Handle to a reference-counted object.
///
/// Cloning a handle is an address copy; it does not take an ownership share.
/// See the module documentation for the ownership model.
#[derive(Clone)]
pub struct Object {
    shell: Arc<Shell>,
}

impl Object {
    /// Create an object with no payload.
    ///
    /// The strong count starts at one, owned by the caller. `name` is
    /// duplicated. If `associated` is given a strong reference to it is
    /// taken; failure to do so unwinds the construction.
    pub fn new(
        ty: &'static TypeDescriptor,
        name: Option<&str>,
        associated: Option<&Object>,
    ) -> Result<Object, ObjectError> {
        Self::new_raw(ty, None, name, associated)
    }

    /// Create an object carrying `payload`.
    ///
    /// Used by concrete kinds that build their payload up front rather than
    /// through a constructor callback.
    pub fn new_with_payload<P: Any + Send + Sync>(
        ty: &'static TypeDescriptor,
        payload: P,
        name: Option<&str>,
        associated: Option<&Object>,
    ) -> Result<Object, ObjectError> {
        Self::new_raw(ty, Some(Arc::new(payload)), name, associated)
    }

    /// Create an object through the descriptor's constructor callback.
    ///
    /// A descriptor without a constructor callback always fails. An error
    /// from the callback releases the partially built object through the
    /// normal teardown path and reports the uniform construction failure.
    pub fn new_with(
        ty: &'static TypeDescriptor,
        name: Option<&str>,
        associated: Option<&Object>,
        args: &dyn Any,
    ) -> Result<Object, ObjectError> {
        if !ty.check() {
            return Err(ObjectError::ConstructionFailed);
        }
        let construct = ty.construct.ok_or(ObjectError::ConstructionFailed)?;

        let obj = Self::new_raw(ty, None, name, associated)?;
        match construct(args) {
            Ok(payload) => {
                obj.shell.state.lock().payload = Some(Arc::from(payload));
                Ok(obj)
            }
            Err(_) => {
                let _ = obj.release();
                Err(ObjectError::ConstructionFailed)
            }
        }
    }

    fn new_raw(
        ty: &'static TypeDescriptor,
        payload: Option<Payload>,
        name: Option<&str>,
        associated: Option<&Object>,
    ) -> Result<Object, ObjectError> {
        if !ty.check() {
            return Err(ObjectError::ConstructionFailed);
        }

        let obj = Object {
            shell: Arc::new(Shell {
                ty,
                state: Mutex::new(State {
                    strong: 1,
                    weak: 0,
                    name: name.map(Arc::from),
                    associated: None,
                    payload,
                }),
            }),
        };

        if let Some(assoc) = associated {
            if assoc.retain().is_err() {
                let _ = obj.release();
                return Err(ObjectError::ConstructionFailed);
            }
            obj.shell.state.lock().associated = Some(assoc.clone());
        }

        trace!(ty = ty.name, identity = obj.identity(), "object constructed");
        Ok(obj)
    }

    /// The descriptor identifying this object's concrete kind.
    #[inline]
    pub fn type_descriptor(&self) -> &'static TypeDescriptor {
        self.shell.ty
    }

    /// Address-like identity, stable for the object's whole lifetime.
    #[inline]
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.shell) as *const () as usize
    }

    /// Whether this handle is of kind `ty`, alive or not.
    #[inline]
    pub fn has_type(&self, ty: &'static TypeDescriptor) -> bool {
        ptr::eq(self.shell.ty, ty)
    }

    /// Whether this handle is of kind `ty` and its payload is still live.
    /// A stale weak promotion fails this check and must be treated as absent.
    pub fn is_valid(&self, ty: &'static TypeDescriptor) -> bool {
        self.has_type(ty) && self.is_alive()
    }

    /// Whether the strong count is non-zero.
    pub fn is_alive(&self) -> bool {
        self.shell.state.lock().strong > 0
    }

    /// Current strong count. Diagnostic; racy by nature.
    pub fn strong_count(&self) -> usize {
        self.shell.state.lock().strong
    }

    /// Current weak count. Diagnostic; racy by nature.
    pub fn weak_count(&self) -> usize {
        self.shell.state.lock().weak
    }

    /// Take one additional strong ownership share.
    pub fn retain(&self) -> Result<(), ObjectError> {
        let mut st = self.shell.state.lock();
        if st.strong == 0 {
            return Err(ObjectError::RefcountMisuse);
        }
        st.strong += 1;
        Ok(())
    }

    /// Give up one strong ownership share.
    ///
    /// When the last share is given up the object is torn down: the teardown
    /// callback fires exactly once, then the associated object is released
    /// (cascading iteratively through associated chains), then name and
    /// payload are cleared. Surviving handles see a tombstone.
    pub fn release(&self) -> Result<(), ObjectError> {
        let mut cascade = Vec::new();
        let ret = self.release_with(&mut cascade);
        // Cascaded releases run on an explicit work list so a long chain of
        // associated objects cannot overflow the call stack.
        while let Some(next) = cascade.pop() {
            let _ = next.release_with(&mut cascade);
        }
        ret
    }

    fn release_with(&self, cascade: &mut Vec<Object>) -> Result<(), ObjectError> {
        let mut st = self.shell.state.lock();
        if st.strong == 0 {
            return Err(ObjectError::RefcountMisuse);
        }
        if st.strong > 1 {
            st.strong -= 1;
            return Ok(());
        }

        st.strong = 0;
        let payload = st.payload.take();
        let name = st.name.take();
        let associated = st.associated.take();
        drop(st);

        // Hooks run without the object lock held so a teardown callback can
        // never re-enter the lock it is called under.
        if let Some(cb) = self.shell.ty.teardown {
            if let Some(p) = &payload {
                cb(&**p);
            }
        }
        if let Some(assoc) = associated {
            cascade.push(assoc);
        }
        drop(payload);
        drop(name);

        trace!(ty = self.shell.ty.name, identity = self.identity(), "object torn down");
        Ok(())
    }

    /// Take a weak observation share. Valid on live and tombstoned objects.
    pub fn retain_weak(&self) {
        self.shell.state.lock().weak += 1;
    }

    /// Give up a weak observation share.
    pub fn release_weak(&self) -> Result<(), ObjectError> {
        let mut st = self.shell.state.lock();
        if st.weak == 0 {
            return Err(ObjectError::RefcountMisuse);
        }
        st.weak -= 1;
        Ok(())
    }

    /// The display name. Fails on a dead handle.
    pub fn name(&self) -> Result<Option<Arc<str>>, ObjectError> {
        let st = self.shell.state.lock();
        if st.strong == 0 {
            return Err(ObjectError::InvalidHandle);
        }
        Ok(st.name.clone())
    }

    /// The associated object, with a fresh strong reference taken for the
    /// caller. Fails on a dead handle.
    pub fn associated(&self) -> Result<Option<Object>, ObjectError> {
        let st = self.shell.state.lock();
        if st.strong == 0 {
            return Err(ObjectError::InvalidHandle);
        }
        match &st.associated {
            Some(assoc) => {
                if assoc.retain().is_err() {
                    return Ok(None);
                }
                Ok(Some(assoc.clone()))
            }
            None => Ok(None),
        }
    }

    /// Replace the associated object.
    ///
    /// An object may not associate itself: that would be an immediate strong
    /// cycle no release sequence could ever collect. The new reference is
    /// taken before the old one is given up, and the old one is released
    /// only after the lock is dropped so its teardown can safely touch this
    /// object.
    pub fn set_associated(&self, associated: Option<&Object>) -> Result<(), ObjectError> {
        if let Some(assoc) = associated {
            if Arc::ptr_eq(&self.shell, &assoc.shell) {
                return Err(ObjectError::SelfAssociation);
            }
            if assoc.retain().is_err() {
                return Err(ObjectError::ConstructionFailed);
            }
        }

        let mut st = self.shell.state.lock();
        if st.strong == 0 {
            drop(st);
            if let Some(assoc) = associated {
                let _ = assoc.release();
            }
            return Err(ObjectError::InvalidHandle);
        }
        let old = st.associated.take();
        st.associated = associated.cloned();
        drop(st);

        if let Some(old) = old {
            let _ = old.release();
        }
        Ok(())
    }

    /// The payload, shared with any in-flight operation. `None` on a dead
    /// handle or a kind that carries no payload.
    pub fn payload(&self) -> Option<Payload> {
        let st = self.shell.state.lock();
        if st.strong == 0 {
            return None;
        }
        st.payload.clone()
    }

    fn view<'a>(&self, st: &'a State) -> ObjectView<'a> {
        ObjectView {
            ty: self.shell.ty,
            identity: self.identity(),
            name: st.name.as_deref(),
            payload: st.payload.as_deref(),
        }
    }

    /// Copy this object.
    ///
    /// Flags listed as required are always adhered to; the implementation
    /// may use any additional allowed mode. `allowed` always absorbs
    /// `required`; if both are empty the default allowed set is substituted.
    /// A kind without a clone callback does not support copying.
    pub fn clone_object(
        &self,
        required: CloneFlags,
        allowed: CloneFlags,
        name: Option<&str>,
        associated: Option<&Object>,
    ) -> Result<Object, ObjectError> {
        let mut allowed = allowed | required;
        if allowed.is_empty() {
            allowed = CloneFlags::DEFAULT;
        }

        let st = self.shell.state.lock();
        if st.strong == 0 {
            return Err(ObjectError::InvalidHandle);
        }
        let cb = self.shell.ty.clone_obj.ok_or(ObjectError::Unsupported)?;
        cb(self.view(&st), required, allowed, name, associated).ok_or(ObjectError::ConstructionFailed)
    }

    /// Copy this object as another type.
    ///
    /// Converting to the object's own type behaves exactly like
    /// [`Object::clone_object`]. Otherwise the source kind's convert
    /// callback is tried first, then the target kind's.
    pub fn convert(
        &self,
        target: &'static TypeDescriptor,
        required: CloneFlags,
        allowed: CloneFlags,
        name: Option<&str>,
        associated: Option<&Object>,
    ) -> Result<Object, ObjectError> {
        let st = self.shell.state.lock();
        if st.strong == 0 {
            return Err(ObjectError::InvalidHandle);
        }
        if ptr::eq(self.shell.ty, target) {
            drop(st);
            return self.clone_object(required, allowed, name, associated);
        }

        let mut allowed = allowed | required;
        if allowed.is_empty() {
            allowed = CloneFlags::DEFAULT;
        }

        let view = self.view(&st);
        if self.shell.ty.convert.is_none() && target.convert.is_none() {
            return Err(ObjectError::Unsupported);
        }
        let mut ret = self
            .shell
            .ty
            .convert
            .and_then(|cb| cb(view, target, required, allowed, name, associated));
        if ret.is_none() {
            ret = target
                .convert
                .and_then(|cb| cb(view, target, required, allowed, name, associated));
        }
        ret.ok_or(ObjectError::ConstructionFailed)
    }

    /// Request a different interface view of the same underlying backend.
    ///
    /// Distinct from [`Object::convert`]: the represented value never
    /// changes. Each call may legitimately return a fresh handle to the same
    /// interface object; callers independently own what they receive.
    pub fn get_interface(
        &self,
        target: &'static TypeDescriptor,
        name: Option<&str>,
        associated: Option<&Object>,
    ) -> Result<Object, ObjectError> {
        let st = self.shell.state.lock();
        if st.strong == 0 {
            return Err(ObjectError::InvalidHandle);
        }

        let view = self.view(&st);
        if self.shell.ty.get_interface.is_none() && target.get_interface.is_none() {
            return Err(ObjectError::Unsupported);
        }
        let mut ret = self
            .shell
            .ty
            .get_interface
            .and_then(|cb| cb(view, target, name, associated));
        if ret.is_none() {
            ret = target
                .get_interface
                .and_then(|cb| cb(view, target, name, associated));
        }
        ret.ok_or(ObjectError::ConstructionFailed)
    }

    /// Render this object for debugging or presentation.
    ///
    /// A tombstoned object renders a distinguishable dead-weak marker
    /// without touching the (long gone) payload. Live objects delegate to
    /// the kind's stringify callback or a default renderer.
    pub fn stringify(&self) -> String {
        let st = self.shell.state.lock();
        if st.strong == 0 {
            return format!("{{{}@{:#x}, weak}}", self.shell.ty.name, self.identity());
        }
        if let Some(cb) = self.shell.ty.stringify {
            return cb(self.view(&st));
        }
        let assoc_identity = st.associated.as_ref().map_or(0, Object::identity);
        format!(
            "{{{}@{:#x}, strong, name=\"{}\", associated={:#x}}}",
            self.shell.ty.name,
            self.identity(),
            st.name.as_deref().unwrap_or(""),
            assoc_identity,
        )
    }

    /// Compare two objects.
    ///
    /// Identical handles compare [`Comparison::Same`] without locking.
    /// Otherwise both objects are locked in call order and `a`'s comparison
    /// callback is tried; if it cannot compare, `b`'s callback is consulted
    /// with the arguments swapped and the ordering relation inverted in the
    /// result.
    pub fn compare(a: &Object, b: &Object) -> Comparison {
        if Arc::ptr_eq(&a.shell, &b.shell) {
            return Comparison::Same;
        }

        let sa = a.shell.state.lock();
        let sb = b.shell.state.lock();
        if sa.strong == 0 || sb.strong == 0 {
            return Comparison::Error;
        }

        let va = a.view(&sa);
        let vb = b.view(&sb);

        let mut ret = match a.shell.ty.compare {
            Some(cb) => cb(va, vb),
            None => Comparison::Error,
        };
        if ret == Comparison::Error {
            if let Some(cb) = b.shell.ty.compare {
                // Arguments were swapped, so the ordering relation reverses.
                ret = match cb(vb, va) {
                    Comparison::ALessThanB => Comparison::AGreaterThanB,
                    Comparison::AGreaterThanB => Comparison::ALessThanB,
                    r @ (Comparison::Error | Comparison::Equal | Comparison::NotEqual) => r,
                    Comparison::Same => Comparison::Error,
                };
            }
        }
        ret
    }
}

impl std::fmt::Debug for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Object")
            .field("ty", &self.shell.ty.name)
            .field("identity", &self.identity())
            .finish()
    }
}

/// Render an optional handle, mapping the absent handle to a fixed marker.
pub fn stringify_handle(handle: Option<&Object>) -> String {
    match handle {
        Some(obj) => obj.stringify(),
        None => "{null}".to_string(),
    }
}
