// src/exec/pack.rs

//! Pending output and the chunk-boundary policy.

use crate::types::{ChunkPolicy, StreamKind};

/// Output captured but not yet sent, per stream.
///
/// Output is cut into messages according to the [`ChunkPolicy`]; a cut
/// never splits a UTF-8 character, so each message decodes on its own.
#[derive(Debug, Clone)]
pub struct ResponsePack {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    policy: ChunkPolicy,
    chunk_size: usize,
}

/// Text taken out of the pack for one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackSlice {
    pub stdout: String,
    pub stderr: String,
}

impl ResponsePack {
    pub fn new(policy: ChunkPolicy, chunk_size: usize) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: Vec::new(),
            policy,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn append(&mut self, stream: StreamKind, bytes: &[u8]) {
        match stream {
            StreamKind::Stdout => self.stdout.extend_from_slice(bytes),
            StreamKind::Stderr => self.stderr.extend_from_slice(bytes),
        }
    }

    /// Whether at least one stream has reached a chunk boundary.
    pub fn ready(&self) -> bool {
        self.ready_len(&self.stdout) > 0 || self.ready_len(&self.stderr) > 0
    }

    /// Take the ready prefix of each stream.
    pub fn take_ready(&mut self) -> PackSlice {
        let out = self.ready_len(&self.stdout);
        let err = self.ready_len(&self.stderr);
        PackSlice {
            stdout: drain_text(&mut self.stdout, out),
            stderr: drain_text(&mut self.stderr, err),
        }
    }

    /// Take everything pending, boundary or not.
    pub fn take_all(&mut self) -> PackSlice {
        let out = self.stdout.len();
        let err = self.stderr.len();
        PackSlice {
            stdout: drain_text(&mut self.stdout, out),
            stderr: drain_text(&mut self.stderr, err),
        }
    }

    fn ready_len(&self, buf: &[u8]) -> usize {
        match self.policy {
            ChunkPolicy::Size => self.size_cut(buf),
            ChunkPolicy::Line => match buf.iter().rposition(|&b| b == b'\n') {
                Some(idx) => idx + 1,
                // A line longer than a chunk is cut by size so memory stays bounded.
                None => self.size_cut(buf),
            },
        }
    }

    fn size_cut(&self, buf: &[u8]) -> usize {
        if buf.len() < self.chunk_size {
            0
        } else {
            char_boundary(buf, self.chunk_size)
        }
    }
}

/// Largest cut `<= max` that does not split a UTF-8 sequence.
///
/// If the sequence straddling `max` starts at 0 (tiny chunk sizes), the cut
/// moves forward past it instead, or is 0 while the sequence is still
/// incomplete. Invalid bytes are not a reason to move the cut; they are
/// replaced when the text is decoded.
pub(crate) fn char_boundary(buf: &[u8], max: usize) -> usize {
    let max = max.min(buf.len());
    match std::str::from_utf8(&buf[..max]) {
        Ok(_) => max,
        Err(e) if e.error_len().is_some() => max,
        Err(e) if e.valid_up_to() > 0 => e.valid_up_to(),
        Err(_) => {
            for end in max + 1..=buf.len().min(max + 3) {
                match std::str::from_utf8(&buf[..end]) {
                    Ok(_) => return end,
                    Err(e) if e.error_len().is_some() => return max,
                    Err(_) => continue,
                }
            }
            if buf.len() >= max + 3 { max } else { 0 }
        }
    }
}

fn drain_text(buf: &mut Vec<u8>, len: usize) -> String {
    if len == 0 {
        return String::new();
    }
    let bytes: Vec<u8> = buf.drain(..len).collect();
    String::from_utf8_lossy(&bytes).into_owned()
}
