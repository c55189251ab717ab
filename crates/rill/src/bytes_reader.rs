// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use bytes::Bytes;

use crate::reader::{Reader, ReaderBase};
use crate::status::{Position, Status};

/// A reader over an in-memory shared byte sequence.
///
/// The whole sequence is the buffer window, so every operation is a fast
/// path, random access always works, and [`read_bytes()`][Reader::read_bytes]
/// steals zero-copy slices. Independent readers share the same backing
/// memory.
#[derive(Debug)]
pub struct BytesReader {
    base: ReaderBase,
    data: Bytes,
}

impl BytesReader {
    /// Creates a reader over `data`, positioned at 0.
    #[must_use]
    pub fn new(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let mut base = ReaderBase::new();
        base.set_window(0, data.clone(), 0);
        Self { base, data }
    }
}

impl Reader for BytesReader {
    fn base(&self) -> &ReaderBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ReaderBase {
        &mut self.base
    }

    fn pull_slow(&mut self, min_length: usize, _recommended_length: usize) -> bool {
        // Everything there is to read is already in the window.
        self.base.available() >= min_length
    }

    fn seek_behind_buffer(&mut self, new_pos: Position) -> bool {
        if !self.base.stream().ok() {
            return false;
        }
        // The only way out of the window is past the end.
        debug_assert!(new_pos > self.base.limit_pos());
        let end = self.data.len();
        self.base.set_cursor(end);
        false
    }

    fn size(&mut self) -> Result<Position, Status> {
        Ok(self.data.len() as Position)
    }

    fn supports_random_access(&self) -> bool {
        true
    }

    fn supports_new_reader(&self) -> bool {
        true
    }

    fn new_reader(&mut self, initial_pos: Position) -> Option<Box<dyn Reader>> {
        let mut reader = Self::new(self.data.clone());
        let _ = reader.seek(initial_pos);
        Some(Box::new(reader))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_and_seeks_within_the_window() {
        let mut reader = BytesReader::new(&b"0123456789"[..]);
        assert_eq!(reader.size().ok(), Some(10));
        assert!(reader.supports_random_access());

        let mut dest = [0; 4];
        assert_eq!(reader.read(&mut dest), 4);
        assert_eq!(&dest, b"0123");

        assert!(reader.seek(8));
        assert_eq!(reader.read_byte(), Some(b'8'));
        assert!(reader.seek(2), "seeking backwards stays in the window");
        assert_eq!(reader.read_byte(), Some(b'2'));

        assert!(!reader.seek(100));
        assert!(reader.ok());
        assert_eq!(reader.pos(), 10);
    }

    #[test]
    fn new_reader_shares_the_backing_memory() {
        let mut reader = BytesReader::new(&b"abcdef"[..]);
        let mut other = reader.new_reader(3).expect("supported");
        assert_eq!(other.read_byte(), Some(b'd'));
        assert_eq!(reader.read_byte(), Some(b'a'));

        let slice = other.read_bytes(2);
        assert_eq!(&slice[..], b"ef");
    }

    #[test]
    fn seek_then_seek_then_read_matches_direct_seek() {
        let mut a = BytesReader::new(&b"streams are fun"[..]);
        let mut b = BytesReader::new(&b"streams are fun"[..]);

        assert!(a.seek(3));
        assert!(a.seek(8));
        assert!(b.seek(8));
        let mut da = [0; 3];
        let mut db = [0; 3];
        assert_eq!(a.read(&mut da), 3);
        assert_eq!(b.read(&mut db), 3);
        assert_eq!(da, db);
    }
}
