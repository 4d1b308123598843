// logging.rs — Named debug streams
//
// The runtime and generated parsers log to named streams (`fibers`, `jit`,
// `grammar`, ...). Streams are off by default and enabled by the host at
// startup, typically from a CLI flag or the `SPICY_DEBUG` environment
// variable (colon-separated stream names). Each stream maps to a `tracing`
// target so hosts can also filter through their subscriber.

use std::collections::HashSet;
use std::sync::RwLock;

use once_cell::sync::Lazy;

static ENABLED: Lazy<RwLock<HashSet<String>>> = Lazy::new(|| RwLock::new(HashSet::new()));

/// Enable a debug stream by name. Unknown names are accepted; a stream that
/// nothing logs to is simply silent.
pub fn enable_stream(name: &str) {
    ENABLED.write().unwrap().insert(name.to_string());
}

/// Enable all streams in a colon-separated list, e.g. `"fibers:jit"`.
pub fn enable_streams(list: &str) {
    for name in list.split(':').filter(|s| !s.is_empty()) {
        enable_stream(name);
    }
}

pub fn stream_enabled(name: &str) -> bool {
    ENABLED.read().unwrap().contains(name)
}

/// Emit a debug record to a named stream. The stream name must be a literal
/// because it doubles as the `tracing` target.
#[macro_export]
macro_rules! rt_debug {
    ($stream:literal, $($arg:tt)*) => {
        if $crate::logging::stream_enabled($stream) {
            tracing::debug!(target: $stream, $($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streams_default_off() {
        assert!(!stream_enabled("no-such-stream"));
    }

    #[test]
    fn enable_list_splits_on_colons() {
        enable_streams("aaa:bbb:");
        assert!(stream_enabled("aaa"));
        assert!(stream_enabled("bbb"));
        assert!(!stream_enabled(""));
    }
}
