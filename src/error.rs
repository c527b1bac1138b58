//! Error taxonomy and small result enums shared across the crate
//!
//! Four classes of failure exist: invalid handles (null-like, type-mismatched
//! or already torn down), missing optional capabilities on a backend,
//! resource-acquisition failures during construction, and errors reported by
//! a backend itself, which are passed through unchanged.

use std::fmt;

/// Errors reported by the object core and by construction paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectError {
    /// The handle is dead or of the wrong type for the operation.
    InvalidHandle,
    /// A strong or weak count operation was applied to a handle whose
    /// count no longer permits it. A programming-error signal, not fatal.
    RefcountMisuse,
    /// Uniform "could not construct" signal: descriptor check, constructor
    /// callback, or a required reference acquisition failed. The partially
    /// built object has already been unwound.
    ConstructionFailed,
    /// An object may not be its own associated object.
    SelfAssociation,
    /// The type descriptor or backend does not provide this capability.
    Unsupported,
}

impl fmt::Display for ObjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidHandle => write!(f, "invalid object handle"),
            Self::RefcountMisuse => write!(f, "reference count operation on dead handle"),
            Self::ConstructionFailed => write!(f, "could not construct object"),
            Self::SelfAssociation => write!(f, "object cannot be its own associated object"),
            Self::Unsupported => write!(f, "operation not supported by this type"),
        }
    }
}

impl std::error::Error for ObjectError {}

/// Errors reported by IO handles.
#[derive(Debug)]
pub enum IoError {
    /// The handle is dead or not an IO object.
    InvalidHandle,
    /// The backend does not implement the requested operation.
    Unsupported,
    /// The handle has been touched since the last successful sync, so the
    /// raw descriptor view is not coherent.
    Busy,
    /// No descriptor is currently exported from this handle.
    NotExported,
    /// Error reported by the backend, passed through unchanged.
    Backend(std::io::Error),
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidHandle => write!(f, "invalid io handle"),
            Self::Unsupported => write!(f, "operation not supported by io backend"),
            Self::Busy => write!(f, "io handle touched since last sync"),
            Self::NotExported => write!(f, "no descriptor exported from io handle"),
            Self::Backend(e) => write!(f, "io backend error: {}", e),
        }
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Backend(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for IoError {
    fn from(e: std::io::Error) -> Self {
        Self::Backend(e)
    }
}

/// Errors reported by object handlers.
#[derive(Debug)]
pub enum HandlerError {
    /// The handle is dead or not an object-handler object.
    InvalidHandle,
    /// The backend does not implement the requested operation.
    Unsupported,
    /// Error reported by the backend, passed through unchanged.
    Backend(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidHandle => write!(f, "invalid object handler handle"),
            Self::Unsupported => write!(f, "operation not supported by handler backend"),
            Self::Backend(e) => write!(f, "handler backend error: {}", e),
        }
    }
}

impl std::error::Error for HandlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Backend(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// Result of testing an object against a filter, and of handler dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterResult {
    /// The test resulted in an error condition.
    Error,
    /// The object did not pass and should not be processed.
    Drop,
    /// The object passed and should be processed.
    Pass,
}

/// Result of comparing two objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// The objects could not be compared (different incompatible types,
    /// dead handles, or no comparison callback on either type).
    Error,
    /// Both objects represent the same value but are distinct objects.
    Equal,
    /// The objects are distinct and no ordering relation applies.
    NotEqual,
    /// Object A orders before object B.
    ALessThanB,
    /// Object A orders after object B.
    AGreaterThanB,
    /// Both handles address the very same object.
    Same,
}
