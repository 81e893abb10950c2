//! Line framing and hex classification
//!
//! Serial devices deliver an unframed character stream. [`StreamFramer`]
//! turns it into records: complete newline-terminated lines, plus any
//! newline-free tail that already looks like a hex payload.
//!
//! Hex detection is a heuristic. Any run of four or more characters drawn
//! from `0-9a-fA-F` (ignoring whitespace) is treated as hex, so a text line
//! such as `"faced"` is reported as hex too.

use core_runtime::events::DataRecord;

/// Minimum number of hex digits for a string to count as hex.
pub const MIN_HEX_DIGITS: usize = 4;

/// Whether `s`, with all whitespace removed, is at least
/// [`MIN_HEX_DIGITS`] characters of `0-9a-fA-F`.
pub fn is_hex_like(s: &str) -> bool {
    let mut digits = 0usize;
    for c in s.chars().filter(|c| !c.is_whitespace()) {
        if !c.is_ascii_hexdigit() {
            return false;
        }
        digits += 1;
    }
    digits >= MIN_HEX_DIGITS
}

/// Hex rendering of a record.
///
/// Hex-like input passes through uppercased with whitespace removed.
/// Anything else is encoded per character as its code point in uppercase
/// hex, at least two digits each.
pub fn to_hex(s: &str) -> String {
    if is_hex_like(s) {
        return s
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| c.to_ascii_uppercase())
            .collect();
    }

    s.chars()
        .map(|c| format!("{:02X}", u32::from(c)))
        .collect()
}

/// One framed unit before it is stamped with time and device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub raw_text: String,
    pub hex_text: String,
}

impl Frame {
    pub fn new(raw_text: impl Into<String>) -> Self {
        let raw_text = raw_text.into();
        let hex_text = to_hex(&raw_text);
        Self { raw_text, hex_text }
    }

    pub fn into_record(self, timestamp: i64, device_id: u32) -> DataRecord {
        DataRecord {
            raw_text: self.raw_text,
            hex_text: self.hex_text,
            timestamp,
            device_id,
        }
    }
}

/// Accumulates decoded text and emits frames at line boundaries.
///
/// The buffer always holds exactly the stream tail after the last emitted
/// boundary.
#[derive(Debug, Default)]
pub struct StreamFramer {
    buffer: String,
}

impl StreamFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and collect every frame it completes.
    pub fn push(&mut self, chunk: &str) -> Vec<Frame> {
        self.buffer.push_str(chunk);

        let mut frames = Vec::new();

        if let Some(last_newline) = self.buffer.rfind('\n') {
            let tail = self.buffer.split_off(last_newline + 1);
            let complete = std::mem::replace(&mut self.buffer, tail);

            frames.extend(
                complete
                    .split('\n')
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(Frame::new),
            );
        }

        // Newline-free hex telemetry is flushed without waiting for a terminator.
        if !self.buffer.is_empty() {
            let trimmed = self.buffer.trim();
            if is_hex_like(trimmed) {
                frames.push(Frame::new(trimmed));
                self.buffer.clear();
            }
        }

        frames
    }

    /// Text received but not yet emitted.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Drop any partial line.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
