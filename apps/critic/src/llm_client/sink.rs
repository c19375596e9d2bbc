//! Observers for streamed completion text.
//!
//! The client reports fragments here for live display only; the analysis code
//! never sees this side channel.

use std::io::Write;

pub trait StreamSink: Send + Sync {
    /// Called once per non-empty fragment, in arrival order.
    fn on_fragment(&self, fragment: &str);

    /// Called after the last fragment of a successful call.
    fn on_finish(&self) {}
}

/// Echoes fragments to stdout as they arrive. Logs go to stderr, so the two
/// don't interleave on a terminal that separates them.
pub struct TerminalSink;

impl StreamSink for TerminalSink {
    fn on_fragment(&self, fragment: &str) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(fragment.as_bytes());
        let _ = out.flush();
    }

    fn on_finish(&self) {
        println!();
    }
}

/// Discards everything.
pub struct NullSink;

impl StreamSink for NullSink {
    fn on_fragment(&self, _fragment: &str) {}
}
