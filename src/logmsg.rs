//! Log messages - the concrete object family carried by the log pipeline
//!
//! A [`LogMsg`] is immutable once constructed: created by one call, read by
//! filters and handlers, destroyed on the last strong release. The module
//! also provides the two pipeline backends working on it: a formatter
//! (object-handler backend rendering each message as a text line into an IO
//! object) and a mask filter (filter backend dropping messages outside a
//! level window, option mask, time window or category).

use std::any::Any;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bitflags::bitflags;

use crate::error::{FilterResult, HandlerError, ObjectError};
use crate::filter::{Filter, FilterBackend};
use crate::handler::{HandlerBackend, ObjectHandler};
use crate::interface::InterfaceCore;
use crate::io::Io;
use crate::object::{Object, TypeDescriptor};

/// Log level of a message. Ordered: `CallError < None < Error < Warn <
/// Info < Debug`. `CallError` is a sentinel reporting a failed call, not a
/// message level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    CallError,
    None,
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    /// Fixed rendering token for log lines.
    pub fn label(self) -> &'static str {
        match self {
            Self::CallError => "<<<ERROR>>>",
            Self::None => "NONE",
            Self::Error => "EROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DBUG",
        }
    }
}

bitflags! {
    /// Message and delivery options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LogMsgOptions: u32 {
        /// Only useful for developing the software itself.
        const DEVEL = 0x001;
        /// Should be acknowledged by the user.
        const ASK_ACK = 0x002;
    }
}

/// Source and timing context of a message, cloned out of the object.
#[derive(Debug, Clone)]
pub struct LogMsgContext {
    /// Globally unique id correlating messages of the same kind.
    pub msgid: Option<String>,
    /// Category or module the message belongs to.
    pub category: Option<String>,
    /// Function that generated the message.
    pub function: Option<String>,
    /// Source file that generated the message.
    pub codefile: Option<String>,
    /// Source line that generated the message.
    pub codeline: Option<u32>,
    /// Timestamp of the message.
    pub timestamp: SystemTime,
}

struct LogMsgPayload {
    context: LogMsgContext,
    level: LogLevel,
    options: LogMsgOptions,
    referenced: Vec<Object>,
    message: String,
}

fn logmsg_teardown(payload: &(dyn Any + Send + Sync)) {
    let Some(p) = payload.downcast_ref::<LogMsgPayload>() else {
        return;
    };
    for obj in &p.referenced {
        let _ = obj.release();
    }
}

/// Type descriptor for log-message objects.
pub static LOG_MSG_TYPE: TypeDescriptor =
    TypeDescriptor::new("logmsg").with_teardown(logmsg_teardown);

/// Handle to an immutable log-message object.
#[derive(Clone)]
pub struct LogMsg {
    object: Object,
}

impl LogMsg {
    /// Start building a message at `level` with a pre-rendered text.
    pub fn build(level: LogLevel, message: impl Into<String>) -> LogMsgBuilder {
        LogMsgBuilder {
            level,
            message: message.into(),
            msgid: None,
            category: None,
            function: None,
            codefile: None,
            codeline: None,
            timestamp: None,
            options: LogMsgOptions::empty(),
            referenced: Vec::new(),
            name: None,
            associated: None,
        }
    }

    /// Type-checked view of a generic handle as a log message. Returns
    /// `None` for dead handles and other kinds; takes no ownership share.
    pub fn from_object(object: &Object) -> Option<LogMsg> {
        object.is_valid(&LOG_MSG_TYPE).then(|| LogMsg {
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

    fn payload(&self) -> Option<Arc<LogMsgPayload>> {
        self.object.payload()?.downcast::<LogMsgPayload>().ok()
    }

    /// Source and timing context of the message.
    pub fn context(&self) -> Option<LogMsgContext> {
        Some(self.payload()?.context.clone())
    }

    /// Level and rendered text of the message.
    pub fn message(&self) -> Option<(LogLevel, String)> {
        let p = self.payload()?;
        Some((p.level, p.message.clone()))
    }

    pub fn level(&self) -> Option<LogLevel> {
        Some(self.payload()?.level)
    }

    pub fn options(&self) -> Option<LogMsgOptions> {
        Some(self.payload()?.options)
    }

    /// Handles to the objects relevant to the context that generated this
    /// message. The handles carry no ownership share; retain them to keep
    /// any of them beyond the message's lifetime.
    pub fn referenced(&self) -> Option<Vec<Object>> {
        Some(self.payload()?.referenced.clone())
    }
}

/// Builder for [`LogMsg`] objects.
pub struct LogMsgBuilder {
    level: LogLevel,
    message: String,
    msgid: Option<String>,
    category: Option<String>,
    function: Option<String>,
    codefile: Option<String>,
    codeline: Option<u32>,
    timestamp: Option<SystemTime>,
    options: LogMsgOptions,
    referenced: Vec<Object>,
    name: Option<String>,
    associated: Option<Object>,
}

impl LogMsgBuilder {
    pub fn with_msgid(mut self, msgid: impl Into<String>) -> Self {
        self.msgid = Some(msgid.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_function(mut self, function: impl Into<String>) -> Self {
        self.function = Some(function.into());
        self
    }

    pub fn with_location(mut self, codefile: impl Into<String>, codeline: u32) -> Self {
        self.codefile = Some(codefile.into());
        self.codeline = Some(codeline);
        self
    }

    /// Timestamp of the message; the creation time is used when absent.
    pub fn with_timestamp(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_options(mut self, options: LogMsgOptions) -> Self {
        self.options = options;
        self
    }

    /// Objects relevant to the context generating the message. Strong
    /// references are taken when the message is created.
    pub fn with_referenced(mut self, objects: &[Object]) -> Self {
        self.referenced.extend(objects.iter().cloned());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_associated(mut self, associated: &Object) -> Self {
        self.associated = Some(associated.clone());
        self
    }

    /// Create the message object.
    pub fn create(self) -> Result<LogMsg, ObjectError> {
        let mut held = Vec::with_capacity(self.referenced.len());
        for obj in &self.referenced {
            if obj.retain().is_err() {
                for h in &held {
                    let _ = Object::release(h);
                }
                return Err(ObjectError::ConstructionFailed);
            }
            held.push(obj.clone());
        }

        let payload = LogMsgPayload {
            context: LogMsgContext {
                msgid: self.msgid,
                category: self.category,
                function: self.function,
                codefile: self.codefile,
                codeline: self.codeline,
                timestamp: self.timestamp.unwrap_or_else(SystemTime::now),
            },
            level: self.level,
            options: self.options,
            referenced: held,
            message: self.message,
        };

        let object = Object::new_with_payload(
            &LOG_MSG_TYPE,
            payload,
            self.name.as_deref(),
            self.associated.as_ref(),
        )?;
        Ok(LogMsg { object })
    }
}

/// Line format produced by [`formatter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineFormat {
    /// Timestamp, level, category/function and text.
    Normal,
    /// Everything: message id, option flags and source location included.
    Full,
}

struct FormatterBackend {
    format: LineFormat,
}

impl HandlerBackend for FormatterBackend {
    fn is_thread_safe(&self) -> bool {
        true
    }

    fn handle(&self, ctx: &InterfaceCore, object: &Object) -> FilterResult {
        // Objects that are not log messages are dropped, not errors.
        let Some(msg) = LogMsg::from_object(object) else {
            return FilterResult::Drop;
        };
        let Some(line) = render_line(&msg, self.format) else {
            return FilterResult::Drop;
        };
        if let Some(sink) = ctx.backend_object().and_then(|o| Io::from_object(&o)) {
            let _ = sink.write(line.as_bytes());
        }
        FilterResult::Pass
    }

    fn flush(&self, ctx: &InterfaceCore) -> Result<(), HandlerError> {
        if let Some(sink) = ctx.backend_object().and_then(|o| Io::from_object(&o)) {
            sink.flush(crate::io::OpFlags::DEFAULTS)
                .map_err(|e| HandlerError::Backend(Box::new(e)))?;
        }
        Ok(())
    }
}

fn render_line(msg: &LogMsg, format: LineFormat) -> Option<String> {
    let context = msg.context()?;
    let (level, text) = msg.message()?;
    let options = msg.options()?;
    let stamp = format_timestamp(context.timestamp);

    let line = match format {
        LineFormat::Normal => format!(
            "{} {} {}/{} {}\n",
            stamp,
            level.label(),
            context.category.as_deref().unwrap_or("-"),
            context.function.as_deref().unwrap_or("-"),
            text,
        ),
        LineFormat::Full => {
            let mut flags = [b' ', b' '];
            if options.contains(LogMsgOptions::DEVEL) {
                flags[0] = b'D';
            }
            if options.contains(LogMsgOptions::ASK_ACK) {
                flags[1] = b'A';
            }
            format!(
                "{} ({}) {} [{}{}] {}/{}({}:{}) {}\n",
                stamp,
                context.msgid.as_deref().unwrap_or(""),
                level.label(),
                flags[0] as char,
                flags[1] as char,
                context.category.as_deref().unwrap_or("-"),
                context.function.as_deref().unwrap_or("-"),
                context.codefile.as_deref().unwrap_or("-"),
                context.codeline.map_or(-1, |l| l as i64),
                text,
            )
        }
    };
    Some(line)
}

/// Render `[YYYY-MM-DD  HH:MM:SS UTC]` for a timestamp.
fn format_timestamp(ts: SystemTime) -> String {
    let secs = match ts.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    };
    let days = secs.div_euclid(86_400);
    let second_of_day = secs.rem_euclid(86_400);
    let (year, month, day) = civil_from_days(days);
    format!(
        "[{:04}-{:02}-{:02}  {:02}:{:02}:{:02} UTC]",
        year,
        month,
        day,
        second_of_day / 3600,
        (second_of_day / 60) % 60,
        second_of_day % 60,
    )
}

// Days-since-epoch to proleptic Gregorian calendar date.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month as u32, day as u32)
}

/// Create a formatter: an object handler rendering every passing log
/// message as a text line into `sink`.
pub fn formatter(
    sink: &Io,
    format: LineFormat,
    name: Option<&str>,
    associated: Option<&Object>,
) -> Result<ObjectHandler, ObjectError> {
    if !sink.as_object().is_valid(&crate::io::IO_TYPE) {
        return Err(ObjectError::InvalidHandle);
    }
    ObjectHandler::new(
        Box::new(FormatterBackend { format }),
        Some(sink.as_object()),
        name,
        associated,
    )
}

/// Acceptance mask applied by [`mask_filter`]. The default mask passes
/// everything.
#[derive(Debug, Clone)]
pub struct LogMsgMask {
    pub level_min: LogLevel,
    pub level_max: LogLevel,
    /// Options a message must have set.
    pub options_required: LogMsgOptions,
    /// Options a message must not have set.
    pub options_absent: LogMsgOptions,
    /// Inclusive lower timestamp bound, unbounded when absent.
    pub ts_min: Option<SystemTime>,
    /// Inclusive upper timestamp bound, unbounded when absent.
    pub ts_max: Option<SystemTime>,
    /// Exact category match, any when absent.
    pub category: Option<String>,
}

impl Default for LogMsgMask {
    fn default() -> Self {
        Self {
            level_min: LogLevel::CallError,
            level_max: LogLevel::Debug,
            options_required: LogMsgOptions::empty(),
            options_absent: LogMsgOptions::empty(),
            ts_min: None,
            ts_max: None,
            category: None,
        }
    }
}

impl LogMsgMask {
    pub fn with_levels(mut self, min: LogLevel, max: LogLevel) -> Self {
        self.level_min = min;
        self.level_max = max;
        self
    }

    pub fn with_options(mut self, required: LogMsgOptions, absent: LogMsgOptions) -> Self {
        self.options_required = required;
        self.options_absent = absent;
        self
    }

    pub fn with_time_window(mut self, min: Option<SystemTime>, max: Option<SystemTime>) -> Self {
        self.ts_min = min;
        self.ts_max = max;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

struct MaskFilterBackend {
    mask: LogMsgMask,
}

impl FilterBackend for MaskFilterBackend {
    fn test(&self, _ctx: &InterfaceCore, object: &Object) -> FilterResult {
        let Some(msg) = LogMsg::from_object(object) else {
            return FilterResult::Drop;
        };
        let (Some(level), Some(options), Some(context)) =
            (msg.level(), msg.options(), msg.context())
        else {
            return FilterResult::Drop;
        };
        let mask = &self.mask;

        if level < mask.level_min || level > mask.level_max {
            return FilterResult::Drop;
        }
        if !options.contains(mask.options_required) || options.intersects(mask.options_absent) {
            return FilterResult::Drop;
        }
        if mask.ts_min.is_some_and(|min| context.timestamp < min) {
            return FilterResult::Drop;
        }
        if mask.ts_max.is_some_and(|max| context.timestamp > max) {
            return FilterResult::Drop;
        }
        if let Some(category) = &mask.category {
            if context.category.as_deref() != Some(category.as_str()) {
                return FilterResult::Drop;
            }
        }
        FilterResult::Pass
    }
}

/// Create a filter passing exactly the log messages accepted by `mask`.
pub fn mask_filter(
    mask: LogMsgMask,
    name: Option<&str>,
    associated: Option<&Object>,
) -> Result<Filter, ObjectError> {
    Filter::new(Box::new(MaskFilterBackend { mask }), None, name, associated)
}
