//! keel - object and abstraction layer for media-server services
//!
//! A thread-safe, explicitly reference-counted, dynamically-typed object
//! model ([`object`]) with three interface-kind abstractions composed on
//! top of it: byte-stream IO ([`io`]), boolean test filters ([`filter`])
//! and filtering object handlers ([`handler`]). The [`logmsg`] module
//! provides the concrete object family carried by the log pipeline, and
//! [`file`] a buffered file backend for IO handles.
//!
//! Callers construct a concrete backend, wrap it in the interface kind of
//! their choice, and interact only through the kind's public operations;
//! those dispatch through the backend trait. Per-object operations are
//! linearizable: each one holds the object's own lock for its full
//! duration. No ordering is guaranteed across distinct objects.

pub mod error;
pub mod object;

pub mod interface;

pub mod filter;
pub mod handler;
pub mod io;

pub mod file;
pub mod logmsg;

pub mod logging;

// Re-export commonly used items for convenience
pub use error::{Comparison, FilterResult, HandlerError, IoError, ObjectError};
pub use filter::{Filter, FilterBackend, FILTER_TYPE};
pub use handler::{HandlerBackend, ObjectHandler, OBJECT_HANDLER_TYPE};
pub use interface::InterfaceCore;
pub use io::{BlockingMode, ControlRequest, Io, IoBackend, OpFlags, IO_TYPE};
pub use logmsg::{LineFormat, LogLevel, LogMsg, LogMsgMask, LogMsgOptions, LOG_MSG_TYPE};
pub use object::{
    stringify_handle, CloneFlags, Object, ObjectView, TypeDescriptor, BASE_TYPE,
};

pub use logging::{init_dev_logging, init_logging, init_prod_logging, LogConfig, LogFormat, LogOutput};
