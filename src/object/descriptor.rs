//! Type descriptors - immutable per-kind metadata driving object dispatch
//!
//! Design: one `static` descriptor per concrete object kind, constructed at
//! compile time and never mutated. Descriptor pointer identity is the sole
//! type-check mechanism; there is no subtype relation beyond the (unused)
//! flat parent slot. All polymorphic operations on objects route through the
//! optional callback slots declared here.

use std::any::Any;

use bitflags::bitflags;

use crate::error::{Comparison, ObjectError};
use crate::object::Object;

/// ABI version of the descriptor layout. Checked on every construction so a
/// hand-built descriptor from another era is rejected instead of misread.
pub const CONTROL_VERSION: u32 = 1;

bitflags! {
    /// Copy modes requested from [`Object::clone_object`] and
    /// [`Object::convert`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CloneFlags: u32 {
        /// Make a shallow copy of the object.
        const SHALLOW = 0x0001;
        /// Make a deep copy of the object.
        const DEEP = 0x0002;
        /// Make a copy sharing part of its state with the original, like
        /// duplicating a file handle.
        const DUP = 0x0004;
    }
}

impl CloneFlags {
    /// Allowed set substituted when both `required` and `allowed` are empty.
    pub const DEFAULT: CloneFlags = CloneFlags::SHALLOW.union(CloneFlags::DEEP);
}

/// Borrowed view of an object handed to descriptor callbacks while the
/// object's own lock is held. Callbacks must not re-enter lifecycle
/// operations on the viewed object.
#[derive(Clone, Copy)]
pub struct ObjectView<'a> {
    /// The concrete kind of the viewed object.
    pub ty: &'static TypeDescriptor,
    /// Address-like identity of the object, stable for its whole lifetime.
    pub identity: usize,
    /// The display name, if any.
    pub name: Option<&'a str>,
    /// The payload, if the kind carries one.
    pub payload: Option<&'a (dyn Any + Send + Sync)>,
}

impl<'a> ObjectView<'a> {
    /// Downcast the payload to a concrete type.
    pub fn payload_as<T: Any>(&self) -> Option<&'a T> {
        self.payload.and_then(|p| p.downcast_ref::<T>())
    }
}

/// Invoked once, exactly when the strong count transitions from one to zero.
/// Runs without the object lock held; the payload is dropped afterwards.
pub type TeardownFn = fn(payload: &(dyn Any + Send + Sync));

/// Invoked by [`Object::new_with`] to produce the payload from opaque
/// arguments. An error unwinds the partially built object.
pub type ConstructFn = fn(args: &dyn Any) -> Result<Box<dyn Any + Send + Sync>, ObjectError>;

/// Produces a copy of the viewed object, or `None` if the requested copy
/// modes cannot be satisfied.
pub type CloneFn = fn(
    src: ObjectView<'_>,
    required: CloneFlags,
    allowed: CloneFlags,
    name: Option<&str>,
    associated: Option<&Object>,
) -> Option<Object>;

/// Produces a copy of the viewed object as another type. Each callback must
/// handle both directions: converting out of its own type and into it.
pub type ConvertFn = fn(
    src: ObjectView<'_>,
    target: &'static TypeDescriptor,
    required: CloneFlags,
    allowed: CloneFlags,
    name: Option<&str>,
    associated: Option<&Object>,
) -> Option<Object>;

/// Produces a different interface view of the same underlying backend. Never
/// changes the represented value; each call may return a fresh handle that
/// the caller independently owns.
pub type GetInterfaceFn = fn(
    src: ObjectView<'_>,
    target: &'static TypeDescriptor,
    name: Option<&str>,
    associated: Option<&Object>,
) -> Option<Object>;

/// Renders the viewed object for debugging or presentation. The result is
/// not parseable back into the object.
pub type StringifyFn = fn(view: ObjectView<'_>) -> String;

/// Compares two live objects. `a` always belongs to the type the callback is
/// registered on; the handles are never the same object.
pub type CompareFn = fn(a: ObjectView<'_>, b: ObjectView<'_>) -> Comparison;

/// Immutable descriptor of one concrete object kind.
pub struct TypeDescriptor {
    /// Must equal [`CONTROL_VERSION`].
    pub control_version: u32,
    /// Display name of the kind.
    pub name: &'static str,
    /// Flat hierarchy: always `None` today, reserved.
    pub parent: Option<&'static TypeDescriptor>,
    pub teardown: Option<TeardownFn>,
    pub construct: Option<ConstructFn>,
    pub clone_obj: Option<CloneFn>,
    pub convert: Option<ConvertFn>,
    pub get_interface: Option<GetInterfaceFn>,
    pub stringify: Option<StringifyFn>,
    pub compare: Option<CompareFn>,
}

impl TypeDescriptor {
    /// Descriptor with every callback slot empty.
    pub const fn new(name: &'static str) -> Self {
        Self {
            control_version: CONTROL_VERSION,
            name,
            parent: None,
            teardown: None,
            construct: None,
            clone_obj: None,
            convert: None,
            get_interface: None,
            stringify: None,
            compare: None,
        }
    }

    pub const fn with_teardown(mut self, cb: TeardownFn) -> Self {
        self.teardown = Some(cb);
        self
    }

    pub const fn with_construct(mut self, cb: ConstructFn) -> Self {
        self.construct = Some(cb);
        self
    }

    pub const fn with_clone(mut self, cb: CloneFn) -> Self {
        self.clone_obj = Some(cb);
        self
    }

    pub const fn with_convert(mut self, cb: ConvertFn) -> Self {
        self.convert = Some(cb);
        self
    }

    pub const fn with_get_interface(mut self, cb: GetInterfaceFn) -> Self {
        self.get_interface = Some(cb);
        self
    }

    pub const fn with_stringify(mut self, cb: StringifyFn) -> Self {
        self.stringify = Some(cb);
        self
    }

    pub const fn with_compare(mut self, cb: CompareFn) -> Self {
        self.compare = Some(cb);
        self
    }

    /// Self-consistency check run before any construction.
    pub(crate) fn check(&self) -> bool {
        self.control_version == CONTROL_VERSION && !self.name.is_empty()
    }
}

/// Plain objects with no payload and no callbacks. Useful as associated
/// objects, markers, and in tests.
pub static BASE_TYPE: TypeDescriptor = TypeDescriptor::new("object");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_check() {
        assert!(BASE_TYPE.check());

        static BAD_VERSION: TypeDescriptor = TypeDescriptor {
            control_version: 0,
            ..TypeDescriptor::new("bad")
        };
        assert!(!BAD_VERSION.check());

        static NO_NAME: TypeDescriptor = TypeDescriptor::new("");
        assert!(!NO_NAME.check());
    }

    #[test]
    fn test_default_clone_flags() {
        assert_eq!(CloneFlags::DEFAULT, CloneFlags::SHALLOW | CloneFlags::DEEP);
        assert!(CloneFlags::DEFAULT.contains(CloneFlags::SHALLOW));
    }
}
