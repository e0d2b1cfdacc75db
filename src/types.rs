use std::str::FromStr;
use serde::{Deserialize, Serialize};

/// How captured output is cut into incremental responses.
///
/// - `Size`: send once the pending buffer holds at least `chunk_size` bytes
///   (default; bounds memory regardless of line length).
/// - `Line`: send every complete line as soon as it is seen; a partial
///   trailing line waits for its newline or for the terminal response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkPolicy {
    Size,
    Line,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        ChunkPolicy::Size
    }
}

/// What to do with one output stream of the child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Stream the output back to the caller.
    Return,
    /// Persist the output to the job's capture file only.
    Capture,
    /// Persist to the capture file and stream back.
    CaptureAndReturn,
    /// Do not capture; the stream is connected to /dev/null.
    Discard,
}

impl Default for OutputMode {
    fn default() -> Self {
        OutputMode::Return
    }
}

impl OutputMode {
    pub fn returns(self) -> bool {
        matches!(self, OutputMode::Return | OutputMode::CaptureAndReturn)
    }

    pub fn captures(self) -> bool {
        matches!(self, OutputMode::Capture | OutputMode::CaptureAndReturn)
    }

    pub fn is_piped(self) -> bool {
        !matches!(self, OutputMode::Discard)
    }
}

impl FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "return" => Ok(OutputMode::Return),
            "capture" => Ok(OutputMode::Capture),
            "capture_and_return" => Ok(OutputMode::CaptureAndReturn),
            "discard" | "no" => Ok(OutputMode::Discard),
            other => Err(format!(
                "invalid output mode: {other} (expected \"return\", \"capture\", \"capture_and_return\" or \"discard\")"
            )),
        }
    }
}

/// Which child stream a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}
