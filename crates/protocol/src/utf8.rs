//! Reassembly of UTF-8 text split across pty output chunks.
//!
//! A pty read returns whatever bytes are available, so a multibyte
//! character can be cut in half at a chunk boundary. Encoding each chunk as
//! a JSON string independently would turn both halves into U+FFFD. The
//! reassembler holds back an incomplete trailing sequence and prepends it
//! to the next chunk.

/// Buffers the incomplete tail of a UTF-8 byte stream.
#[derive(Debug, Default, Clone)]
pub struct Utf8Reassembler {
    pending: Vec<u8>,
}

impl Utf8Reassembler {
    /// Creates an empty reassembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of bytes currently held back.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Feeds one chunk and returns the bytes that are safe to emit.
    ///
    /// The returned bytes never end inside a multibyte sequence. Invalid
    /// sequences in the middle of the stream are passed through unchanged.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<u8> {
        let mut data = std::mem::take(&mut self.pending);
        data.extend_from_slice(chunk);

        let mut start = 0;
        loop {
            match std::str::from_utf8(&data[start..]) {
                Ok(_) => break,
                Err(e) => {
                    let pos = start + e.valid_up_to();
                    match e.error_len() {
                        Some(len) => start = pos + len,
                        None => {
                            self.pending = data.split_off(pos);
                            break;
                        }
                    }
                }
            }
        }

        data
    }

    /// Flushes whatever is still held back, complete or not.
    pub fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.pending)
    }
}
