// src/cli/progress.rs — Terminal renderer for a foreground run

use std::io::Write;
use std::sync::Mutex;

use crate::pipeline::{LogChannel, ProgressSnapshot};
use crate::session::RunObserver;

pub fn format_log(channel: LogChannel, text: &str) -> String {
    format!("[{}] {}", channel, text)
}

pub fn format_progress(progress: ProgressSnapshot) -> String {
    format!(
        "[progress] {}/{} ({}%)",
        progress.current,
        progress.total,
        progress.percent()
    )
}

/// Writes narration and progress lines to a sink (stderr by default), so
/// stdout stays clean for the artifact path.
pub struct TerminalObserver<W: Write + Send> {
    out: Mutex<W>,
    quiet: bool,
}

impl TerminalObserver<std::io::Stderr> {
    pub fn stderr(quiet: bool) -> Self {
        Self::new(std::io::stderr(), quiet)
    }
}

impl<W: Write + Send> TerminalObserver<W> {
    pub fn new(out: W, quiet: bool) -> Self {
        Self {
            out: Mutex::new(out),
            quiet,
        }
    }

    fn line(&self, line: &str) {
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        let _ = writeln!(out, "{line}");
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl<W: Write + Send> RunObserver for TerminalObserver<W> {
    fn on_log(&self, _run_id: &str, channel: LogChannel, text: &str) {
        // Errors always reach the terminal.
        if self.quiet && channel != LogChannel::Error {
            return;
        }
        self.line(&format_log(channel, text));
    }

    fn on_progress(&self, _run_id: &str, progress: ProgressSnapshot) {
        if !self.quiet {
            self.line(&format_progress(progress));
        }
    }
}
