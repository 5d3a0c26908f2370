//! Call-stack capture for events

use crate::event::{Frame, Stacktrace};
use std::path::{Path, PathBuf};

/// Maximum number of frames kept in a trace
pub const MAX_DEPTH: usize = 10;

/// Upper bound on raw frames collected before filtering
const RAW_FRAME_LIMIT: usize = 256;

const CAPTURE_ENTRY: &str = "raven_client::stacktrace::capture";

/// Frames of the stack walker itself, always above the capture entry
const CAPTURE_MACHINERY: &[&str] = &["backtrace::", "_Unwind_", CAPTURE_ENTRY];

/// Frames skipped wherever they appear: the client's own pipeline, the async
/// executor driving it and the call shims in between
const PASS_THROUGH: &[&str] = &[
    "raven_client::client::Client",
    "raven_client::encoder::",
    "raven_client::transport::",
    "tracing::instrument::",
    "tokio::",
    "std::thread::local::",
    "core::ops::function::",
    "alloc::boxed::Box<F,A> as core::ops::function::",
    "core::pin::Pin<P> as core::future::future::Future",
    "&mut F as core::future::future::Future",
    "core::future::",
];

/// Where caller code ends and the language runtime begins
const RUNTIME_PREFIXES: &[&str] = &[
    "std::rt::",
    "std::panicking::",
    "std::panic::",
    "std::sys::",
    "std::sys_common::",
    "std::thread::Builder",
    "core::panic::",
    "test::",
    "__rust_",
    "__libc_start",
];

const RUNTIME_SYMBOLS: &[&str] = &["main", "_start", "start_thread", "thread_start", "clone", "clone3"];

/// A resolved symbol before filtering
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFrame {
    /// Demangled name without the hash suffix
    pub name: Option<String>,
    pub path: Option<PathBuf>,
    pub lineno: Option<u32>,
}

/// Capture the stack of the calling thread.
///
/// Frames are ordered from the most recent call outward. A frame whose symbol
/// cannot be resolved ends the trace early.
#[inline(never)]
pub fn capture() -> Stacktrace {
    let mut raw = Vec::new();

    backtrace::trace(|frame| {
        let before = raw.len();
        backtrace::resolve_frame(frame, |symbol| {
            raw.push(RawFrame {
                name: symbol.name().map(|name| format!("{:#}", name)),
                path: symbol.filename().map(Path::to_path_buf),
                lineno: symbol.lineno(),
            });
        });
        if raw.len() == before {
            raw.push(RawFrame::default());
        }
        raw.len() < RAW_FRAME_LIMIT
    });

    Stacktrace {
        frames: frames_from_raw(raw),
    }
}

/// Filter raw symbols, innermost first, into event frames
pub fn frames_from_raw(raw: Vec<RawFrame>) -> Vec<Frame> {
    let start = raw
        .iter()
        .rposition(|frame| frame.name.as_deref().is_some_and(is_capture_machinery))
        .map_or(0, |index| index + 1);

    let mut frames = Vec::new();
    for raw_frame in raw.into_iter().skip(start) {
        if frames.len() == MAX_DEPTH {
            break;
        }
        let Some(name) = raw_frame.name.as_deref() else {
            break;
        };
        if is_runtime(name) {
            break;
        }
        if is_pass_through(name) {
            continue;
        }
        frames.push(to_frame(name, raw_frame.path.as_deref(), raw_frame.lineno));
    }

    frames
}

fn to_frame(name: &str, path: Option<&Path>, lineno: Option<u32>) -> Frame {
    let (module, function) = split_function(name);
    Frame {
        filename: path
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
        abs_path: path.map(|p| p.display().to_string()).unwrap_or_default(),
        lineno: lineno.unwrap_or(0),
        function,
        module,
    }
}

/// Strip the leading `<` of a qualified path like `<T as Trait>::f`
fn unqualified(name: &str) -> &str {
    name.strip_prefix('<').unwrap_or(name)
}

fn is_capture_machinery(name: &str) -> bool {
    let name = unqualified(name);
    CAPTURE_MACHINERY.iter().any(|prefix| {
        if *prefix == CAPTURE_ENTRY {
            name == CAPTURE_ENTRY || name.starts_with("raven_client::stacktrace::capture::")
        } else {
            name.starts_with(prefix)
        }
    })
}

fn is_pass_through(name: &str) -> bool {
    let name = unqualified(name);
    PASS_THROUGH.iter().any(|prefix| name.starts_with(prefix))
}

fn is_runtime(name: &str) -> bool {
    RUNTIME_SYMBOLS.contains(&name)
        || RUNTIME_PREFIXES
            .iter()
            .any(|prefix| unqualified(name).starts_with(prefix))
}

/// Split a symbol into `(module, function)`.
///
/// Methods keep the path enclosing their receiver type as the module and are
/// rendered as `(Type)::method`. Free functions have an empty module and keep
/// their full path.
pub fn split_function(name: &str) -> (String, String) {
    if let Some(end) = name.starts_with('<').then(|| matching_angle(name)).flatten() {
        let inner = &name[1..end];
        let rest = &name[end + 1..];
        let self_ty = inner.split(" as ").next().unwrap_or(inner);
        let segments = split_path(self_ty);
        let module = segments[..segments.len() - 1].join("::");
        let receiver = if module.is_empty() {
            inner
        } else {
            &inner[module.len() + 2..]
        };
        return (module, format!("({}){}", receiver, rest));
    }

    let segments = split_path(name);
    let receiver = segments
        .iter()
        .position(|segment| segment.starts_with(|c: char| c.is_ascii_uppercase()));

    match receiver {
        Some(index) if index + 1 < segments.len() => (
            segments[..index].join("::"),
            format!("({})::{}", segments[index], segments[index + 1..].join("::")),
        ),
        _ => (String::new(), name.to_string()),
    }
}

/// Index of the `>` closing the `<` at position 0
fn matching_angle(name: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (index, c) in name.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(index);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split on `::` outside of generic brackets
fn split_path(path: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let bytes = path.as_bytes();
    let mut index = 0;

    while index < bytes.len() {
        match bytes[index] {
            b'<' => depth += 1,
            b'>' => depth = depth.saturating_sub(1),
            b':' if depth == 0 && bytes.get(index + 1) == Some(&b':') => {
                segments.push(&path[start..index]);
                index += 2;
                start = index;
                continue;
            }
            _ => {}
        }
        index += 1;
    }
    segments.push(&path[start..]);
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    impl RawFrame {
        fn new(name: &str, path: &str, lineno: u32) -> Self {
            Self {
                name: Some(name.to_string()),
                path: Some(PathBuf::from(path)),
                lineno: Some(lineno),
            }
        }
    }

    fn walker_frames() -> Vec<RawFrame> {
        vec![
            RawFrame::new("backtrace::backtrace::libunwind::trace::trace_fn", "libunwind.rs", 93),
            RawFrame::new("_Unwind_Backtrace", "", 0),
            RawFrame::new("backtrace::backtrace::trace_unsynchronized", "mod.rs", 66),
            RawFrame::new("backtrace::backtrace::trace", "mod.rs", 53),
            RawFrame::new("raven_client::stacktrace::capture", "/src/stacktrace.rs", 70),
        ]
    }

    /// Client pipeline and a current-thread `block_on` between capture and caller
    fn client_and_executor_frames() -> Vec<RawFrame> {
        vec![
            RawFrame::new("raven_client::client::Client::capture::{{closure}}::{{closure}}", "/src/client.rs", 96),
            RawFrame::new(
                "<tracing::instrument::Instrumented<T> as core::future::future::Future>::poll",
                "instrument.rs",
                321,
            ),
            RawFrame::new("raven_client::client::Client::capture::{{closure}}", "/src/client.rs", 92),
            RawFrame::new("raven_client::client::Client::capture_message::{{closure}}", "/src/client.rs", 90),
            RawFrame::new(
                "tokio::runtime::park::CachedParkThread::block_on::{{closure}}",
                "park.rs",
                284,
            ),
            RawFrame::new("tokio::task::coop::with_budget", "mod.rs", 167),
            RawFrame::new("std::thread::local::LocalKey<T>::try_with", "local.rs", 315),
            RawFrame::new(
                "core::ops::function::impls::<impl core::ops::function::FnOnce<A> for &mut F>::call_once",
                "function.rs",
                305,
            ),
            RawFrame::new("tokio::runtime::park::CachedParkThread::block_on", "park.rs", 284),
            RawFrame::new("tokio::runtime::context::runtime::enter_runtime", "runtime.rs", 65),
            RawFrame::new("tokio::runtime::runtime::Runtime::block_on", "runtime.rs", 370),
        ]
    }

    #[test]
    fn test_nested_scopes_yield_four_frames() {
        let mut raw = walker_frames();
        raw.extend(client_and_executor_frames());
        raw.extend([
            RawFrame::new("app::tests::stacktrace::{{closure}}::{{closure}}", "/app/src/lib.rs", 40),
            RawFrame::new("app::tests::stacktrace::{{closure}}", "/app/src/lib.rs", 39),
            RawFrame::new("app::tests::stacktrace", "/app/src/lib.rs", 38),
            RawFrame::new("app::tests::stacktrace::{{closure}}", "/app/src/lib.rs", 36),
            RawFrame::new("core::ops::function::FnOnce::call_once", "function.rs", 250),
            RawFrame::new("test::__rust_begin_short_backtrace", "lib.rs", 600),
            RawFrame::new("test::run_test_in_process", "lib.rs", 620),
        ]);

        let frames = frames_from_raw(raw);

        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0].function, "app::tests::stacktrace::{{closure}}::{{closure}}");
        assert_eq!(frames[0].filename, "lib.rs");
        assert_eq!(frames[0].abs_path, "/app/src/lib.rs");
        assert_eq!(frames[0].lineno, 40);
        assert_eq!(frames[2].function, "app::tests::stacktrace");
        assert!(frames.iter().all(|f| !f.function.contains("capture")));
    }

    #[test]
    fn test_walk_stops_at_program_entry() {
        let mut raw = walker_frames();
        raw.extend(client_and_executor_frames());
        raw.extend([
            RawFrame::new("app::main::{{closure}}", "/app/src/main.rs", 12),
            RawFrame::new("app::main", "/app/src/main.rs", 9),
            RawFrame::new("core::ops::function::FnOnce::call_once", "function.rs", 250),
            RawFrame::new("std::sys::backtrace::__rust_begin_short_backtrace", "backtrace.rs", 152),
            RawFrame::new("std::rt::lang_start::{{closure}}", "rt.rs", 206),
            RawFrame::new("app::unreachable", "/app/src/lib.rs", 1),
            RawFrame::new("main", "", 0),
        ]);

        let functions: Vec<_> = frames_from_raw(raw).into_iter().map(|f| f.function).collect();
        assert_eq!(functions, ["app::main::{{closure}}", "app::main"]);
    }

    #[test]
    fn test_skipped_frames_do_not_count_towards_depth() {
        let mut raw = walker_frames();
        for _ in 0..3 {
            raw.extend(client_and_executor_frames());
        }
        for depth in 0..MAX_DEPTH as u32 {
            raw.push(RawFrame::new(&format!("app::recurse_{}", depth), "/app/src/lib.rs", depth));
        }

        let frames = frames_from_raw(raw);
        assert_eq!(frames.len(), MAX_DEPTH);
        assert_eq!(frames[MAX_DEPTH - 1].function, format!("app::recurse_{}", MAX_DEPTH - 1));
    }

    #[test]
    fn test_unresolved_frame_ends_walk() {
        let mut raw = walker_frames();
        raw.push(RawFrame::new("app::handler", "/app/src/lib.rs", 10));
        raw.push(RawFrame::default());
        raw.push(RawFrame::new("app::main", "/app/src/main.rs", 3));

        let frames = frames_from_raw(raw);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].function, "app::handler");
    }

    #[test]
    fn test_depth_is_bounded() {
        let mut raw = walker_frames();
        for depth in 0..20u32 {
            raw.push(RawFrame::new(&format!("app::recurse_{}", depth), "/app/src/lib.rs", depth));
        }

        let frames = frames_from_raw(raw);
        assert_eq!(frames.len(), MAX_DEPTH);
        assert_eq!(frames[0].function, "app::recurse_0");
    }

    #[test]
    fn test_split_free_function() {
        assert_eq!(
            split_function("app::handlers::process"),
            (String::new(), "app::handlers::process".to_string())
        );
    }

    #[test]
    fn test_split_method() {
        assert_eq!(
            split_function("app::handlers::Handler::process::{{closure}}"),
            ("app::handlers".to_string(), "(Handler)::process::{{closure}}".to_string())
        );
    }

    #[test]
    fn test_split_trait_method() {
        assert_eq!(
            split_function("<app::model::User as core::fmt::Display>::fmt"),
            ("app::model".to_string(), "(User as core::fmt::Display)::fmt".to_string())
        );
        assert_eq!(
            split_function("<app::Wrapper<alloc::string::String>>::get"),
            ("app".to_string(), "(Wrapper<alloc::string::String>)::get".to_string())
        );
    }

    #[inline(never)]
    fn outer() -> Stacktrace {
        inner()
    }

    #[inline(never)]
    fn inner() -> Stacktrace {
        capture()
    }

    #[test]
    fn test_live_capture_starts_at_caller() {
        let stacktrace = outer();

        assert!(stacktrace.len() >= 2, "{:?}", stacktrace);
        assert!(stacktrace.len() <= MAX_DEPTH);
        assert!(stacktrace.frames[0].function.ends_with("tests::inner"));
        assert!(stacktrace.frames[1].function.ends_with("tests::outer"));
        assert_eq!(stacktrace.frames[0].filename, "stacktrace.rs");
        assert!(stacktrace.frames[0].lineno > 0);
        assert!(
            stacktrace
                .frames
                .iter()
                .all(|f| !f.function.starts_with("backtrace::") && f.function != CAPTURE_ENTRY)
        );
    }
}
