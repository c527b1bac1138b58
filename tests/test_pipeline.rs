use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use keel::filter::{Filter, FilterBackend};
use keel::handler::{HandlerBackend, ObjectHandler};
use keel::interface::InterfaceCore;
use keel::io::{Io, IoBackend, OpFlags};
use keel::logmsg::{self, LineFormat, LogLevel, LogMsg, LogMsgMask, LogMsgOptions};
use keel::object::{Object, BASE_TYPE};
use keel::{FilterResult, IoError};

struct Verdict(FilterResult);

impl FilterBackend for Verdict {
    fn test(&self, _ctx: &InterfaceCore, _object: &Object) -> FilterResult {
        self.0
    }
}

fn verdict_filter(result: FilterResult) -> Filter {
    Filter::new(Box::new(Verdict(result)), None, None, None).unwrap()
}

struct CountingHandler {
    calls: Arc<AtomicUsize>,
    thread_safe: bool,
}

impl HandlerBackend for CountingHandler {
    fn is_thread_safe(&self) -> bool {
        self.thread_safe
    }

    fn handle(&self, _ctx: &InterfaceCore, _object: &Object) -> FilterResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        FilterResult::Pass
    }
}

#[test]
fn test_pass_drop_pass_chain_never_reaches_backend() {
    let calls = Arc::new(AtomicUsize::new(0));
    let handler = ObjectHandler::new(
        Box::new(CountingHandler {
            calls: Arc::clone(&calls),
            thread_safe: true,
        }),
        None,
        None,
        None,
    )
    .unwrap();

    for verdict in [FilterResult::Pass, FilterResult::Drop, FilterResult::Pass] {
        let filter = verdict_filter(verdict);
        handler.push_filter(&filter).unwrap();
        filter.release().unwrap();
    }

    let obj = Object::new(&BASE_TYPE, None, None).unwrap();
    for _ in 0..3 {
        assert_eq!(handler.handle(&obj), FilterResult::Drop);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    obj.release().unwrap();
    handler.release().unwrap();
}

#[test]
fn test_error_filter_short_circuits() {
    let calls = Arc::new(AtomicUsize::new(0));
    let handler = ObjectHandler::new(
        Box::new(CountingHandler {
            calls: Arc::clone(&calls),
            thread_safe: false,
        }),
        None,
        None,
        None,
    )
    .unwrap();

    let filter = verdict_filter(FilterResult::Error);
    handler.push_filter(&filter).unwrap();
    filter.release().unwrap();

    let obj = Object::new(&BASE_TYPE, None, None).unwrap();
    assert_eq!(handler.handle(&obj), FilterResult::Error);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    obj.release().unwrap();
    handler.release().unwrap();
}

#[test]
fn test_thread_unsafe_backend_serializes() {
    struct ExclusionProbe {
        inside: Arc<AtomicUsize>,
        violations: Arc<AtomicUsize>,
    }
    impl HandlerBackend for ExclusionProbe {
        fn handle(&self, _ctx: &InterfaceCore, _object: &Object) -> FilterResult {
            if self.inside.fetch_add(1, Ordering::SeqCst) != 0 {
                self.violations.fetch_add(1, Ordering::SeqCst);
            }
            std::thread::yield_now();
            self.inside.fetch_sub(1, Ordering::SeqCst);
            FilterResult::Pass
        }
    }

    let inside = Arc::new(AtomicUsize::new(0));
    let violations = Arc::new(AtomicUsize::new(0));
    let handler = ObjectHandler::new(
        Box::new(ExclusionProbe {
            inside: Arc::clone(&inside),
            violations: Arc::clone(&violations),
        }),
        None,
        None,
        None,
    )
    .unwrap();

    let obj = Object::new(&BASE_TYPE, None, None).unwrap();
    std::thread::scope(|s| {
        for _ in 0..4 {
            let handler = handler.clone();
            let obj = obj.clone();
            s.spawn(move || {
                for _ in 0..200 {
                    assert_eq!(handler.handle(&obj), FilterResult::Pass);
                }
            });
        }
    });

    assert_eq!(violations.load(Ordering::SeqCst), 0);
    obj.release().unwrap();
    handler.release().unwrap();
}

#[test]
fn test_concurrent_push_and_handle() {
    // A thread-safe backend dispatching while another thread promotes the
    // chain: the escalation protocol must keep every dispatch coherent.
    let calls = Arc::new(AtomicUsize::new(0));
    let handler = ObjectHandler::new(
        Box::new(CountingHandler {
            calls: Arc::clone(&calls),
            thread_safe: true,
        }),
        None,
        None,
        None,
    )
    .unwrap();
    let obj = Object::new(&BASE_TYPE, None, None).unwrap();

    std::thread::scope(|s| {
        let pusher = {
            let handler = handler.clone();
            s.spawn(move || {
                for _ in 0..5 {
                    let filter = verdict_filter(FilterResult::Pass);
                    handler.push_filter(&filter).unwrap();
                    filter.release().unwrap();
                }
            })
        };
        for _ in 0..2 {
            let handler = handler.clone();
            let obj = obj.clone();
            s.spawn(move || {
                for _ in 0..500 {
                    let result = handler.handle(&obj);
                    assert!(result == FilterResult::Pass);
                }
            });
        }
        pusher.join().unwrap();
    });

    assert_eq!(calls.load(Ordering::SeqCst), 1_000);
    obj.release().unwrap();
    handler.release().unwrap();
}

/// IO backend writing into a shared line buffer.
#[derive(Clone, Default)]
struct SharedSink {
    data: Arc<Mutex<Vec<u8>>>,
}

impl IoBackend for SharedSink {
    fn write(&mut self, _ctx: &InterfaceCore, buf: &[u8]) -> Result<usize, IoError> {
        self.data.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self, _ctx: &InterfaceCore, _flags: OpFlags) -> Result<(), IoError> {
        Ok(())
    }

    fn sync(&mut self, _ctx: &InterfaceCore, _flags: OpFlags) -> Result<(), IoError> {
        Ok(())
    }
}

#[test]
fn test_logmsg_pipeline_end_to_end() {
    let sink = SharedSink::default();
    let data = Arc::clone(&sink.data);
    let io = Io::new(Box::new(sink), None, Some("sink"), None).unwrap();

    let handler = logmsg::formatter(&io, LineFormat::Normal, Some("log"), None).unwrap();
    let filter = logmsg::mask_filter(
        LogMsgMask::default().with_levels(LogLevel::None, LogLevel::Info),
        None,
        None,
    )
    .unwrap();
    handler.push_filter(&filter).unwrap();
    filter.release().unwrap();

    let info = LogMsg::build(LogLevel::Info, "listener up")
        .with_category("net")
        .with_function("bind")
        .create()
        .unwrap();
    let debug = LogMsg::build(LogLevel::Debug, "noisy detail")
        .with_category("net")
        .with_function("bind")
        .create()
        .unwrap();

    assert_eq!(handler.handle(info.as_object()), FilterResult::Pass);
    assert_eq!(handler.handle(debug.as_object()), FilterResult::Drop);
    // Objects of a foreign kind are dropped by the mask, not the formatter.
    let alien = Object::new(&BASE_TYPE, None, None).unwrap();
    assert_eq!(handler.handle(&alien), FilterResult::Drop);

    let written = String::from_utf8(data.lock().clone()).unwrap();
    assert_eq!(written.lines().count(), 1);
    assert!(written.contains("INFO net/bind listener up"));
    assert!(!written.contains("noisy"));

    alien.release().unwrap();
    info.release().unwrap();
    debug.release().unwrap();
    handler.release().unwrap();
    // The formatter held the IO object alive; now only our handle remains.
    assert_eq!(io.as_object().strong_count(), 1);
    io.release().unwrap();
}

#[test]
fn test_formatter_requires_live_sink() {
    let sink = SharedSink::default();
    let io = Io::new(Box::new(sink), None, None, None).unwrap();
    io.release().unwrap();

    // A dead IO handle cannot become a formatter sink.
    assert!(logmsg::formatter(&io, LineFormat::Full, None, None).is_err());
}

#[test]
fn test_full_format_through_pipeline() {
    let sink = SharedSink::default();
    let data = Arc::clone(&sink.data);
    let io = Io::new(Box::new(sink), None, None, None).unwrap();
    let handler = logmsg::formatter(&io, LineFormat::Full, None, None).unwrap();

    let msg = LogMsg::build(LogLevel::Warn, "certificate expiring")
        .with_msgid("cert-expiry@example")
        .with_category("tls")
        .with_function("check_cert")
        .with_location("tls.rs", 311)
        .with_options(LogMsgOptions::ASK_ACK)
        .create()
        .unwrap();

    assert_eq!(handler.handle(msg.as_object()), FilterResult::Pass);
    let written = String::from_utf8(data.lock().clone()).unwrap();
    assert!(written.contains("(cert-expiry@example)"));
    assert!(written.contains("WARN"));
    assert!(written.contains("[ A]"));
    assert!(written.contains("tls/check_cert(tls.rs:311)"));

    msg.release().unwrap();
    handler.release().unwrap();
    io.release().unwrap();
}

#[test]
fn test_handler_flush_reaches_io_sink() {
    struct FlushProbe {
        flushes: Arc<AtomicUsize>,
    }
    impl IoBackend for FlushProbe {
        fn write(&mut self, _ctx: &InterfaceCore, buf: &[u8]) -> Result<usize, IoError> {
            Ok(buf.len())
        }
        fn flush(&mut self, _ctx: &InterfaceCore, _flags: OpFlags) -> Result<(), IoError> {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    let flushes = Arc::new(AtomicUsize::new(0));
    let io = Io::new(
        Box::new(FlushProbe {
            flushes: Arc::clone(&flushes),
        }),
        None,
        None,
        None,
    )
    .unwrap();
    let handler = logmsg::formatter(&io, LineFormat::Normal, None, None).unwrap();

    handler.flush().unwrap();
    assert_eq!(flushes.load(Ordering::SeqCst), 1);

    handler.release().unwrap();
    io.release().unwrap();
}
