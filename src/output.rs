//! Record sink for completion and timing lines.
//!
//! Every line goes to the log at `info` level. If an output file was given,
//! the line is also appended to it and flushed immediately. I/O failures are
//! logged and otherwise ignored; they never fail an operation.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use spin::Mutex;

/// Append-only line writer.
pub struct OutputSink {
    tag: String,
    file: Mutex<Option<BufWriter<File>>>,
}

impl OutputSink {
    /// Sink that only logs.
    pub fn log_only(tag: &str) -> Self {
        Self {
            tag: tag.into(),
            file: Mutex::new(None),
        }
    }

    /// Sink that logs and appends to `path`. If the file cannot be opened the
    /// sink falls back to logging only.
    pub fn with_file(tag: &str, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let file = match OpenOptions::new().create(true).append(true).open(path) {
            Ok(f) => Some(BufWriter::new(f)),
            Err(e) => {
                warn!("[{tag}] output file {} could not be opened: {e}", path.display());
                None
            }
        };
        Self {
            tag: tag.into(),
            file: Mutex::new(file),
        }
    }

    /// Tag prefixed to logged lines.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Returns `true` while a file is attached.
    pub fn has_file(&self) -> bool {
        self.file.lock().is_some()
    }

    /// Writes one line.
    pub fn write_line(&self, line: &str) {
        info!("[{}] {}", self.tag, line);
        let mut file = self.file.lock();
        if let Some(w) = file.as_mut() {
            if let Err(e) = writeln!(w, "{line}").and_then(|()| w.flush()) {
                warn!("[{}] could not write to output file: {e}", self.tag);
            }
        }
    }

    /// Flushes and detaches the file. Later lines are only logged.
    pub fn close(&self) {
        if let Some(mut w) = self.file.lock().take() {
            if let Err(e) = w.flush() {
                warn!("[{}] output file could not be closed: {e}", self.tag);
            }
        }
    }
}

impl core::fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OutputSink")
            .field("tag", &self.tag)
            .field("has_file", &self.has_file())
            .finish()
    }
}
