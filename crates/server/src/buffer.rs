// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rolling, bounded, ANSI-aware view of recent PTY output.

use std::time::Instant;

use crate::ansi;
use crate::ring::RingBuffer;

/// Default ring capacity: 5 MiB of raw output per session.
pub const DEFAULT_CAPACITY: usize = 5 * 1024 * 1024;

/// Default byte cap applied to a single capture.
pub const DEFAULT_CAPTURE_BYTES: usize = 16 * 1024;

/// Per-session terminal buffer: raw byte ring plus a lazily regenerated
/// ANSI-free projection.
///
/// The raw ring is the source of truth; the stripped projection is
/// invalidated on every write and rebuilt on the next capture.
pub struct TerminalBuffer {
    ring: RingBuffer,
    stripped: Option<String>,
    last_capture_at: Option<Instant>,
}

impl TerminalBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: RingBuffer::new(capacity),
            stripped: None,
            last_capture_at: None,
        }
    }

    /// Append a chunk of raw PTY output.
    pub fn write(&mut self, data: &[u8]) {
        self.ring.write(data);
        self.stripped = None;
    }

    /// Raw retained bytes, oldest first.
    pub fn raw_snapshot(&self) -> Vec<u8> {
        self.ring.snapshot()
    }

    /// At most the last `max` raw bytes.
    pub fn raw_tail(&self, max: usize) -> Vec<u8> {
        self.ring.tail(max)
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn total_written(&self) -> u64 {
        self.ring.total_written()
    }

    pub fn last_capture_at(&self) -> Option<Instant> {
        self.last_capture_at
    }

    /// The full ANSI-stripped projection of the retained output.
    pub fn stripped(&mut self) -> &str {
        if self.stripped.is_none() {
            self.stripped = Some(ansi::strip(&self.ring.snapshot()));
        }
        self.stripped.as_deref().unwrap_or("")
    }

    /// Capture at most `lines` trailing logical lines of stripped output,
    /// capped at `max_bytes`. Byte truncation replaces the leading bytes
    /// with `"..."`.
    pub fn capture(&mut self, lines: usize, max_bytes: usize) -> String {
        self.last_capture_at = Some(Instant::now());
        let text = self.stripped();
        let tail = tail_lines(text, lines);
        cap_bytes(tail, max_bytes)
    }

    /// Drop retained output (used when recycling a session name).
    pub fn clear(&mut self) {
        self.ring.clear();
        self.stripped = None;
    }
}

/// Return the suffix of `text` holding the last `lines` logical lines.
///
/// A single trailing `\n` is treated as a line terminator, not as an empty
/// final line, matching `tail -n` semantics: the returned substring starts
/// immediately after the newline that separates it from the preceding
/// content (or at the oldest boundary).
fn tail_lines(text: &str, lines: usize) -> &str {
    if lines == 0 {
        return "";
    }
    let bytes = text.as_bytes();
    let mut end = bytes.len();
    if end > 0 && bytes[end - 1] == b'\n' {
        end -= 1;
    }
    let mut count = 0;
    for i in (0..end).rev() {
        if bytes[i] == b'\n' {
            count += 1;
            if count == lines {
                return &text[i + 1..];
            }
        }
    }
    text
}

/// Enforce the capture byte cap, replacing leading bytes with `"..."`.
fn cap_bytes(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_owned();
    }
    let marker = "...";
    if max_bytes <= marker.len() {
        return marker[..max_bytes].to_owned();
    }
    // Keep the trailing (max - marker) bytes, nudged forward to a char
    // boundary so the slice is valid UTF-8.
    let mut start = text.len() - (max_bytes - marker.len());
    while start < text.len() && !text.is_char_boundary(start) {
        start += 1;
    }
    format!("{marker}{}", &text[start..])
}

#[cfg(test)]
#[path = "buffer_tests.rs"]
mod tests;
