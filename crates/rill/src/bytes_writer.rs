// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use bytes::Bytes;

use crate::bytes_reader::BytesReader;
use crate::reader::Reader;
use crate::status::{Position, Status};
use crate::writer::{Writer, WriterBase};

/// A writer that accumulates everything in memory as one byte sequence.
///
/// The destination is the buffer itself, so writes never drain anywhere and
/// the result is available as shared [`Bytes`] once writing is finished.
#[derive(Debug, Default)]
pub struct BytesWriter {
    base: WriterBase,
}

impl BytesWriter {
    /// Creates an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The bytes written so far.
    #[must_use]
    pub fn written(&self) -> &[u8] {
        self.base.buffered()
    }

    /// Consumes the writer, returning everything written.
    #[must_use]
    pub fn into_bytes(mut self) -> Bytes {
        self.base.take_buffer().freeze()
    }
}

impl Writer for BytesWriter {
    fn base(&self) -> &WriterBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WriterBase {
        &mut self.base
    }

    fn push_slow(&mut self, min_length: usize, recommended_length: usize) -> bool {
        if !self.base.stream().ok() {
            return false;
        }
        if min_length as Position > Position::MAX - self.base.pos() {
            return self.base.stream_mut().fail(Status::position_overflow());
        }
        self.base.reserve(min_length.max(recommended_length.min(64 << 10)).max(256));
        true
    }

    fn supports_read_mode(&self) -> bool {
        true
    }

    fn read_mode(&mut self, initial_pos: Position) -> Option<Box<dyn Reader>> {
        if !self.base.stream().ok() {
            return None;
        }
        let mut reader = BytesReader::new(Bytes::copy_from_slice(self.base.buffered()));
        let _ = reader.seek(initial_pos);
        Some(Box::new(reader))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_written_bytes() {
        let mut w = BytesWriter::new();
        assert!(w.write(b"one "));
        assert!(w.write_str("two "));
        assert!(w.write_u8(b'3'));
        assert_eq!(w.pos(), 9);
        assert!(w.close());
        assert_eq!(&w.into_bytes()[..], b"one two 3");
    }

    #[test]
    fn read_mode_reflects_written_bytes() {
        let mut w = BytesWriter::new();
        assert!(w.write(b"payload"));
        let mut r = w.read_mode(3).expect("supported");
        assert_eq!(r.read_byte(), Some(b'l'));
        assert!(w.write(b" more"), "the writer stays usable");
    }
}
