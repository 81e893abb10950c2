//! Incremental UTF-8 decoding of transport chunks.
//!
//! Transports split the byte stream wherever they like, including in the
//! middle of a multi-byte character. The decoder holds back an incomplete
//! trailing sequence until the next chunk completes it.

/// Maximum length of a UTF-8 encoded character.
const MAX_SEQUENCE_LEN: usize = 4;

#[derive(Debug, Default)]
pub struct Utf8StreamDecoder {
    pending: Vec<u8>,
}

impl Utf8StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one chunk. Invalid sequences become U+FFFD.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        let mut out = String::with_capacity(bytes.len());
        let mut rest = bytes.as_slice();

        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());

                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            // Truncated sequence at the end of the chunk
                            debug_assert!(after.len() < MAX_SEQUENCE_LEN);
                            self.pending.extend_from_slice(after);
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    /// Bytes held back waiting for the rest of a character.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn reset(&mut self) {
        self.pending.clear();
    }
}
