//! Line-by-line output callbacks
//!
//! A runner forwards every stdout/stderr line to an [`OutputSink`] while the
//! process is still running, so the CLI can stream step output live.

/// Which pipe a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Receives output lines as they arrive.
///
/// Object-safe; runners take it as `Option<&dyn OutputSink>`.
pub trait OutputSink: Send + Sync {
    fn on_line(&self, stream: OutputStream, line: &str);
}

/// Sink that drops every line
#[derive(Debug, Clone, Default)]
pub struct NoopSink;

impl OutputSink for NoopSink {
    fn on_line(&self, _stream: OutputStream, _line: &str) {}
}

impl<F> OutputSink for F
where
    F: Fn(OutputStream, &str) + Send + Sync,
{
    fn on_line(&self, stream: OutputStream, line: &str) {
        self(stream, line)
    }
}
