//! Resource limits for sandbox runs

use serde::{Deserialize, Serialize};

/// Resource limits applied to every isolate a [`Sandbox`](crate::Sandbox) creates.
///
/// The wall-clock timeout is not part of the limits: it is supplied per run
/// by the caller, since the controller shrinks it as the total budget drains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// V8 heap ceiling in bytes
    pub max_memory_bytes: u64,
    /// Maximum captured output (stdout + stderr) in characters
    pub max_output_chars: usize,
    /// Maximum capability calls a single run may make
    pub max_capability_calls: usize,
    /// Maximum snippet size in bytes
    pub max_script_bytes: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory_bytes: 128 * 1024 * 1024, // 128 MB
            max_output_chars: 10_000,
            max_capability_calls: 50,
            max_script_bytes: 64 * 1024, // 64 KB
        }
    }
}

/// Helper for serializing Duration as milliseconds
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

/// Truncate `text` to at most `max_chars` characters.
///
/// Counts `char`s, not bytes, so the cut never lands inside a UTF-8 sequence.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Output stream a captured line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stream {
    Stdout,
    Stderr,
}

/// Line log for stdout and stderr that stops growing once a shared
/// character budget is spent.
///
/// Lines are kept in call order per stream. The line that crosses the
/// budget is cut at the exact boundary and every later line is dropped.
#[derive(Debug, Clone)]
pub(crate) struct OutputLog {
    stdout: Vec<String>,
    stderr: Vec<String>,
    remaining: usize,
    truncated: bool,
}

impl OutputLog {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: Vec::new(),
            remaining: limit,
            truncated: false,
        }
    }

    pub(crate) fn push(&mut self, stream: Stream, line: &str) {
        if self.remaining == 0 {
            if !line.is_empty() {
                self.truncated = true;
            }
            return;
        }

        let kept = truncate_chars(line, self.remaining);
        if kept.len() < line.len() {
            self.truncated = true;
        }
        self.remaining -= kept.chars().count();

        let lines = match stream {
            Stream::Stdout => &mut self.stdout,
            Stream::Stderr => &mut self.stderr,
        };
        lines.push(kept.to_string());
    }

    pub(crate) fn was_truncated(&self) -> bool {
        self.truncated
    }

    /// Consume the log, returning `(stdout, stderr)`.
    pub(crate) fn into_streams(self) -> (Vec<String>, Vec<String>) {
        (self.stdout, self.stderr)
    }
}
