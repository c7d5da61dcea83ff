//! Tracing/logging setup shared by every binary and test harness.

pub mod subscriber;

pub use subscriber::LogFormat;

/// Initialize process-wide tracing, reading the format from `MESA_LOG_FORMAT`.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    subscriber::init(LogFormat::from_env());
}
