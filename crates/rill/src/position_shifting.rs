// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::reader::{Reader, ReaderBase};
use crate::status::{Position, Status};
use crate::writer::{FlushType, Writer, WriterBase};

fn underflow(new_pos: Position, base_pos: Position) -> Status {
    Status::invalid_argument(format!(
        "position {new_pos} underflows the shifted base position {base_pos}"
    ))
}

/// A reader presenting an inner reader with all positions shifted up by a
/// constant.
///
/// The buffer window is shared with the inner reader: the adapter mirrors
/// the inner window on every slow-path crossing and writes the cursor back
/// before delegating, so fast-path reads cost the same as on the inner
/// stream. Seeking below the shift base fails; positions overflowing the
/// position type fail `ResourceExhausted`.
#[derive(Debug)]
pub struct PositionShiftingReader<R: Reader> {
    base: ReaderBase,
    inner: R,
    base_pos: Position,
}

impl<R: Reader> PositionShiftingReader<R> {
    /// Presents `inner` with its positions shifted up by `base_pos`.
    #[must_use]
    pub fn new(inner: R, base_pos: Position) -> Self {
        let mut this = Self {
            base: ReaderBase::new(),
            inner,
            base_pos,
        };
        let _ = this.make_buffer();
        this
    }

    /// The amount added to every inner position.
    #[must_use]
    pub fn base_pos(&self) -> Position {
        self.base_pos
    }

    /// The inner reader. The adapter's cursor is written back first.
    pub fn inner_mut(&mut self) -> &mut R {
        self.sync_buffer();
        &mut self.inner
    }

    /// Consumes the adapter, returning the inner reader.
    #[must_use]
    pub fn into_inner(mut self) -> R {
        self.sync_buffer();
        self.inner
    }

    fn sync_buffer(&mut self) {
        self.inner.base_mut().set_cursor(self.base.cursor());
    }

    fn make_buffer(&mut self) -> bool {
        let inner_base = self.inner.base();
        let Some(shifted_start) = inner_base.start_pos().checked_add(self.base_pos) else {
            return self.base.stream_mut().fail(Status::position_overflow());
        };
        if shifted_start.checked_add(inner_base.window().len() as Position).is_none() {
            return self.base.stream_mut().fail(Status::position_overflow());
        }
        let window = inner_base.window().clone();
        let cursor = inner_base.cursor();
        self.base.set_window(shifted_start, window, cursor);
        true
    }

    fn inherit_failure(&mut self) -> bool {
        if let Some(status) = self.inner.status() {
            return self.base.stream_mut().fail(status.clone());
        }
        true
    }
}

impl<R: Reader> Reader for PositionShiftingReader<R> {
    fn base(&self) -> &ReaderBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ReaderBase {
        &mut self.base
    }

    fn pull_slow(&mut self, min_length: usize, recommended_length: usize) -> bool {
        if !self.base.stream().ok() {
            return false;
        }
        self.sync_buffer();
        let pulled = self.inner.pull_slow(min_length, recommended_length);
        if !self.inherit_failure() {
            return false;
        }
        self.make_buffer() && pulled
    }

    fn seek_behind_buffer(&mut self, new_pos: Position) -> bool {
        if !self.base.stream().ok() {
            return false;
        }
        if new_pos < self.base_pos {
            return self.base.stream_mut().fail(underflow(new_pos, self.base_pos));
        }
        self.sync_buffer();
        let sought = self.inner.seek(new_pos - self.base_pos);
        if !self.inherit_failure() {
            return false;
        }
        self.make_buffer() && sought
    }

    fn size(&mut self) -> Result<Position, Status> {
        let inner_size = self.inner.size()?;
        inner_size
            .checked_add(self.base_pos)
            .ok_or_else(Status::position_overflow)
    }

    fn supports_random_access(&self) -> bool {
        self.inner.supports_random_access()
    }

    fn supports_rewind(&self) -> bool {
        self.inner.supports_rewind()
    }

    fn supports_new_reader(&self) -> bool {
        self.inner.supports_new_reader()
    }

    fn tolerates_reading_ahead(&self) -> bool {
        self.inner.tolerates_reading_ahead()
    }

    fn new_reader(&mut self, initial_pos: Position) -> Option<Box<dyn Reader>> {
        if initial_pos < self.base_pos {
            let status = underflow(initial_pos, self.base_pos);
            let _ = self.base.stream_mut().fail(status);
            return None;
        }
        self.sync_buffer();
        let inner = self.inner.new_reader(initial_pos - self.base_pos)?;
        Some(Box::new(PositionShiftingReader::new(inner, self.base_pos)))
    }

    fn set_read_all_hint(&mut self, hint: bool) {
        self.inner.set_read_all_hint(hint);
    }

    fn done(&mut self) {
        self.sync_buffer();
        if !self.inner.close() {
            let _ = self.inherit_failure();
        }
    }
}

/// A writer presenting an inner writer with all positions shifted up by a
/// constant.
///
/// The buffer is physically moved between the adapter and the inner writer
/// at each slow-path crossing, so bytes written through the adapter land in
/// the inner writer's buffer without copying.
#[derive(Debug)]
pub struct PositionShiftingWriter<W: Writer> {
    base: WriterBase,
    inner: W,
    base_pos: Position,
    // Whether the shared buffer currently lives in `base` (as opposed to
    // having been handed back to the inner writer).
    holds_buffer: bool,
}

impl<W: Writer> PositionShiftingWriter<W> {
    /// Presents `inner` with its positions shifted up by `base_pos`.
    #[must_use]
    pub fn new(inner: W, base_pos: Position) -> Self {
        let mut this = Self {
            base: WriterBase::new(),
            inner,
            base_pos,
            holds_buffer: false,
        };
        let _ = this.make_buffer();
        this
    }

    /// The amount added to every inner position.
    #[must_use]
    pub fn base_pos(&self) -> Position {
        self.base_pos
    }

    /// Consumes the adapter, returning the inner writer with its buffer
    /// restored.
    #[must_use]
    pub fn into_inner(mut self) -> W {
        self.sync_buffer();
        self.inner
    }

    fn sync_buffer(&mut self) {
        if !self.holds_buffer {
            return;
        }
        self.holds_buffer = false;
        let start_pos = self.base.start_pos().saturating_sub(self.base_pos);
        let buf = self.base.take_buffer();
        self.inner.base_mut().set_buffer(buf, start_pos);
    }

    fn make_buffer(&mut self) -> bool {
        debug_assert!(!self.holds_buffer);
        let inner_base = self.inner.base();
        let Some(shifted_start) = inner_base.start_pos().checked_add(self.base_pos) else {
            return self.base.stream_mut().fail(Status::position_overflow());
        };
        if inner_base.pos().checked_add(self.base_pos).is_none() {
            return self.base.stream_mut().fail(Status::position_overflow());
        }
        let buf = self.inner.base_mut().take_buffer();
        self.base.set_buffer(buf, shifted_start);
        self.holds_buffer = true;
        true
    }

    fn inherit_failure(&mut self) -> bool {
        if let Some(status) = self.inner.status() {
            return self.base.stream_mut().fail(status.clone());
        }
        true
    }
}

impl<W: Writer> Writer for PositionShiftingWriter<W> {
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
        self.sync_buffer();
        let pushed = self.inner.push_slow(min_length, recommended_length);
        if !self.inherit_failure() {
            return false;
        }
        self.make_buffer() && pushed
    }

    fn write_bytes_slow(&mut self, src: bytes::Bytes) -> bool {
        if !self.base.stream().ok() {
            return false;
        }
        self.sync_buffer();
        let written = self.inner.write_bytes(src);
        if !self.inherit_failure() {
            return false;
        }
        self.make_buffer() && written
    }

    fn flush(&mut self, flush_type: FlushType) -> bool {
        if !self.base.stream().ok() {
            return false;
        }
        self.sync_buffer();
        let flushed = self.inner.flush(flush_type);
        if !self.inherit_failure() {
            return false;
        }
        self.make_buffer() && flushed
    }

    fn prefers_copying(&self) -> bool {
        self.inner.prefers_copying()
    }

    fn supports_truncate(&self) -> bool {
        self.inner.supports_truncate()
    }

    fn truncate(&mut self, new_size: Position) -> bool {
        if new_size < self.base_pos {
            return self.base.stream_mut().fail(underflow(new_size, self.base_pos));
        }
        self.sync_buffer();
        let truncated = self.inner.truncate(new_size - self.base_pos);
        if !self.inherit_failure() {
            return false;
        }
        self.make_buffer() && truncated
    }

    fn supports_read_mode(&self) -> bool {
        self.inner.supports_read_mode()
    }

    fn read_mode(&mut self, initial_pos: Position) -> Option<Box<dyn Reader>> {
        if initial_pos < self.base_pos {
            let status = underflow(initial_pos, self.base_pos);
            let _ = self.base.stream_mut().fail(status);
            return None;
        }
        self.sync_buffer();
        let reader = self.inner.read_mode(initial_pos - self.base_pos);
        let _ = self.make_buffer();
        let reader = reader?;
        Some(Box::new(PositionShiftingReader::new(reader, self.base_pos)))
    }

    fn done(&mut self) {
        self.sync_buffer();
        if !self.inner.close() {
            let _ = self.inherit_failure();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytes_reader::BytesReader;
    use crate::bytes_writer::BytesWriter;
    use crate::status::StatusKind;

    #[test]
    fn positions_are_rebased() {
        let inner = BytesReader::new(&b"0123456789"[..]);
        let mut reader = PositionShiftingReader::new(inner, 1000);

        assert_eq!(reader.pos(), 1000);
        assert_eq!(reader.read_byte(), Some(b'0'));
        assert_eq!(reader.pos(), 1001);
        assert_eq!(reader.size().ok(), Some(1010));
    }

    #[test]
    fn seeking_below_the_base_underflows() {
        let inner = BytesReader::new(&b"0123456789"[..]);
        let mut reader = PositionShiftingReader::new(inner, 1000);

        assert!(!reader.seek(500));
        assert_eq!(reader.status().map(Status::kind), Some(StatusKind::InvalidArgument));
    }

    #[test]
    fn seeking_at_the_base_succeeds() {
        let inner = BytesReader::new(&b"0123456789"[..]);
        let mut reader = PositionShiftingReader::new(inner, 1000);

        assert_eq!(reader.read_byte(), Some(b'0'));
        assert!(reader.seek(1000));
        assert_eq!(reader.read_byte(), Some(b'0'));
        assert!(reader.seek(1005));
        assert_eq!(reader.read_byte(), Some(b'5'));
    }

    #[test]
    fn overflowing_the_position_type_fails() {
        let inner = BytesReader::new(&b"abc"[..]);
        let reader = PositionShiftingReader::new(inner, Position::MAX - 1);
        assert!(!reader.ok());
        assert_eq!(reader.status().map(Status::kind), Some(StatusKind::ResourceExhausted));
    }

    #[test]
    fn shifted_writes_reach_the_inner_writer() {
        let inner = BytesWriter::new();
        let mut writer = PositionShiftingWriter::new(inner, 100);

        assert_eq!(writer.pos(), 100);
        assert!(writer.write(b"hello"));
        assert_eq!(writer.pos(), 105);
        assert!(writer.close());

        let inner = writer.into_inner();
        assert_eq!(inner.written(), b"hello");
    }

    #[test]
    fn borrowed_inner_reader_stays_open() {
        let mut inner = BytesReader::new(&b"shared"[..]);
        {
            let mut reader = PositionShiftingReader::new(&mut inner, 10);
            assert_eq!(reader.read_byte(), Some(b's'));
            assert!(reader.close());
        }
        assert!(inner.is_open(), "closing a borrowing layer must not close the inner stream");
        assert_eq!(inner.pos(), 1, "the cursor was synced back");
    }
}
