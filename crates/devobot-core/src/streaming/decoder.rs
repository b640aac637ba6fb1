//! Incremental decoder for a body made of concatenated JSON objects.
//!
//! Chunk boundaries never line up with object boundaries, so bytes are
//! buffered until a balanced object can be cut from the front. A fragment
//! that still fails to parse is dropped and decoding carries on.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use tracing::warn;

/// Byte offset of the brace closing the first balanced object in `buffer`.
///
/// Braces inside string literals are ignored; a backslash-escaped quote does
/// not end a string. Stray closing braces before any opening one are skipped.
pub fn find_object_end(buffer: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    // Only ASCII is inspected, which never occurs inside a multi-byte sequence
    for (index, byte) in buffer.bytes().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    return Some(index);
                }
            }
            _ => {}
        }
    }

    None
}

/// Push-in, pull-out decoder: feed raw chunks with [`push`](Self::push), take
/// complete values with [`next_object`](Self::next_object), and call
/// [`finish`](Self::finish) once the source has ended.
pub struct JsonObjectDecoder<T> {
    buffer: String,
    /// Tail of a multi-byte UTF-8 sequence split across chunks
    partial_utf8: Vec<u8>,
    dropped_fragments: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> JsonObjectDecoder<T> {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            partial_utf8: Vec::new(),
            dropped_fragments: 0,
            _marker: PhantomData,
        }
    }

    /// Append a raw chunk to the text buffer
    pub fn push(&mut self, chunk: &[u8]) {
        let mut bytes = std::mem::take(&mut self.partial_utf8);
        bytes.extend_from_slice(chunk);

        let mut rest = bytes.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    break;
                }
                Err(err) => {
                    let (valid, tail) = rest.split_at(err.valid_up_to());
                    self.buffer.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(invalid_len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            rest = &tail[invalid_len..];
                        }
                        None => {
                            // Incomplete sequence at the end, wait for the next chunk
                            self.partial_utf8 = tail.to_vec();
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Next complete value in the buffer, or `None` until more input arrives
    pub fn next_object(&mut self) -> Option<T> {
        while let Some(end) = find_object_end(&self.buffer) {
            let remainder = self.buffer.split_off(end + 1);
            let fragment = std::mem::replace(&mut self.buffer, remainder);

            match serde_json::from_str::<T>(&fragment) {
                Ok(value) => return Some(value),
                Err(err) => {
                    self.dropped_fragments += 1;
                    warn!(fragment = %fragment, error = %err, "Failed to parse streamed chunk");
                }
            }
        }
        None
    }

    /// Final attempt on whatever is left once the source has ended
    pub fn finish(&mut self) -> Option<T> {
        if !self.partial_utf8.is_empty() {
            let tail = std::mem::take(&mut self.partial_utf8);
            self.buffer.push_str(&String::from_utf8_lossy(&tail));
        }

        let remainder = std::mem::take(&mut self.buffer);
        let trimmed = remainder.trim();
        if trimmed.is_empty() {
            return None;
        }

        match serde_json::from_str::<T>(trimmed) {
            Ok(value) => Some(value),
            Err(err) => {
                self.dropped_fragments += 1;
                warn!(fragment = %trimmed, error = %err, "Failed to parse trailing buffer");
                None
            }
        }
    }

    /// Throw away buffered input without parsing it
    pub fn discard(&mut self) {
        self.buffer.clear();
        self.partial_utf8.clear();
    }

    /// Number of fragments dropped because they were not valid JSON
    pub fn dropped_fragments(&self) -> usize {
        self.dropped_fragments
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len() + self.partial_utf8.len()
    }
}

impl<T: DeserializeOwned> Default for JsonObjectDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Blocking iterator over the values decoded from an iterator of chunks
pub struct DecodeIter<I, T> {
    chunks: I,
    decoder: JsonObjectDecoder<T>,
    exhausted: bool,
}

pub fn decode_iter<I, T>(chunks: I) -> DecodeIter<I::IntoIter, T>
where
    I: IntoIterator,
    I::Item: AsRef<[u8]>,
    T: DeserializeOwned,
{
    DecodeIter {
        chunks: chunks.into_iter(),
        decoder: JsonObjectDecoder::new(),
        exhausted: false,
    }
}

impl<I, T> DecodeIter<I, T> {
    pub fn dropped_fragments(&self) -> usize {
        self.decoder.dropped_fragments
    }
}

impl<I, T> Iterator for DecodeIter<I, T>
where
    I: Iterator,
    I::Item: AsRef<[u8]>,
    T: DeserializeOwned,
{
    type Item = T;

    fn next(&mut self) -> Option<T> {
        loop {
            if let Some(value) = self.decoder.next_object() {
                return Some(value);
            }
            if self.exhausted {
                return None;
            }
            match self.chunks.next() {
                Some(chunk) => self.decoder.push(chunk.as_ref()),
                None => {
                    self.exhausted = true;
                    return self.decoder.finish();
                }
            }
        }
    }
}
