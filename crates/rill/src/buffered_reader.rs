// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use bytes::BytesMut;
use tracing::debug;

use crate::buffer::{BufferOptions, ReadBufferSizer};
use crate::reader::{Reader, ReaderBase};
use crate::status::{Position, Status};

/// Slow-path hooks of a concrete byte source, driven by [`BufferedReader`].
///
/// The hook contract mirrors the reader contract one level down: a source
/// reports end-of-source with a short count and failures through
/// [`take_status()`][Source::take_status], so that bytes produced before a
/// failure are never lost.
pub trait Source {
    /// Reads between `min_length` and `max_length` bytes into the front of
    /// `dest`, which is `max_length` bytes long. `pos` is the absolute
    /// source position at which `dest[0]` lands.
    ///
    /// Returns the number of bytes written. A count below `min_length` means
    /// the source has no more bytes at the moment — never that fewer than
    /// `max_length` happened to be convenient. After a failure the source
    /// returns the bytes produced so far and latches the failure for
    /// [`take_status()`][Source::take_status].
    fn read_internal(&mut self, min_length: usize, max_length: usize, pos: Position, dest: &mut [u8]) -> usize;

    /// Takes the failure latched by the last hook call, if any.
    fn take_status(&mut self) -> Option<Status> {
        None
    }

    /// `true` once the source can never produce another byte, letting
    /// [`BufferedReader`] skip buffer allocation entirely on repeated pulls
    /// at end-of-source.
    fn exhausted(&self) -> bool {
        false
    }

    /// The total stream size, once the source has learned it.
    fn exact_size(&self) -> Option<Position> {
        None
    }

    /// See [`Reader::supports_random_access`].
    fn supports_random_access(&self) -> bool {
        false
    }

    /// See [`Reader::supports_rewind`].
    fn supports_rewind(&self) -> bool {
        self.supports_random_access()
    }

    /// See [`Reader::supports_new_reader`].
    fn supports_new_reader(&self) -> bool {
        false
    }

    /// See [`Reader::tolerates_reading_ahead`].
    fn tolerates_reading_ahead(&self) -> bool {
        self.supports_random_access()
    }

    /// Repositions the source, returning the position actually reached.
    ///
    /// Random-access sources reach `min(new_pos, size)`. Rewind-only sources
    /// may return an earlier position (typically their start); the wrapper
    /// then discards forward through the regular buffered read path.
    ///
    /// # Errors
    ///
    /// [`StatusKind::Unimplemented`][crate::StatusKind::Unimplemented] when
    /// the source supports neither random access nor rewind.
    fn seek_source(&mut self, new_pos: Position) -> Result<Position, Status> {
        let _ = new_pos;
        Err(Status::unimplemented("source does not support seeking"))
    }

    /// Probes the total source size.
    ///
    /// # Errors
    ///
    /// [`StatusKind::Unimplemented`][crate::StatusKind::Unimplemented] when
    /// the size cannot be discovered.
    fn size(&mut self) -> Result<Position, Status> {
        Err(Status::unimplemented("source does not support size discovery"))
    }

    /// Creates an independent reader over the same underlying data at
    /// `initial_pos`, inheriting `buffer` as its sizing policy.
    ///
    /// # Errors
    ///
    /// Any failure of the underlying duplication; latched on the calling
    /// stream by the wrapper.
    fn new_source_reader(&mut self, initial_pos: Position, buffer: &BufferOptions) -> Result<Box<dyn Reader>, Status> {
        let _ = (initial_pos, buffer);
        Err(Status::unimplemented("source does not support independent readers"))
    }

    /// See [`Reader::set_read_all_hint`].
    fn set_read_all_hint(&mut self, hint: bool) {
        let _ = hint;
    }

    /// Attaches this layer's position context to a failure.
    fn annotate(&self, status: Status, pos: Position) -> Status {
        let _ = pos;
        status
    }

    /// Releases source resources on close. `pos` is the final stream
    /// position.
    ///
    /// # Errors
    ///
    /// Any failure worth surfacing from teardown; latched by the wrapper.
    fn done(&mut self, pos: Position) -> Result<(), Status> {
        let _ = pos;
        Ok(())
    }
}

/// The default buffering [`Reader`] over a [`Source`].
///
/// Manages a growable internal buffer sized by [`BufferOptions`] and a
/// read-ahead heuristic, translating fast-path misses into
/// [`read_internal()`][Source::read_internal] calls. Reads large enough to
/// make buffering pointless bypass the internal buffer and hand the caller's
/// slice to the source directly.
///
/// Concrete streams embed this type and re-expose their own constructors and
/// accessors.
#[derive(Debug)]
pub struct BufferedReader<S: Source> {
    base: ReaderBase,
    sizer: ReadBufferSizer,
    scratch: BytesMut,
    source: S,
}

impl<S: Source> BufferedReader<S> {
    /// Creates a buffering reader over `source` starting at position 0.
    #[must_use]
    pub fn new(source: S, options: BufferOptions) -> Self {
        Self::with_start_pos(source, options, 0)
    }

    /// Creates a buffering reader over `source` whose next byte is at `pos`.
    #[must_use]
    pub fn with_start_pos(source: S, options: BufferOptions, pos: Position) -> Self {
        let mut sizer = ReadBufferSizer::new(options, pos);
        sizer.set_exact_size(source.exact_size());
        Self {
            base: ReaderBase::with_start_pos(pos),
            sizer,
            scratch: BytesMut::new(),
            source,
        }
    }

    /// Creates a reader that is already failed with `status`, for
    /// constructors that discover a problem before the first read.
    #[must_use]
    pub fn failed(source: S, options: BufferOptions, status: Status) -> Self {
        Self {
            base: ReaderBase::failed(status),
            sizer: ReadBufferSizer::new(options, 0),
            scratch: BytesMut::new(),
            source,
        }
    }

    /// The underlying source.
    #[must_use]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Mutable access to the underlying source.
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// The buffer-sizing policy, for sharing with a sibling stream.
    #[must_use]
    pub fn buffer_options(&self) -> &BufferOptions {
        self.sizer.options()
    }

    fn fail(&mut self, status: Status) -> bool {
        let pos = self.base.pos();
        let annotated = self.source.annotate(status, pos);
        debug!(status = %annotated, "buffered reader failed");
        self.base.stream_mut().fail(annotated)
    }

    /// Reads large destinations via the source directly once the request
    /// covers the rest of a known-size stream or exceeds the largest buffer
    /// the policy would allocate.
    fn length_to_read_directly(&self) -> usize {
        if let Some(exact) = self.sizer.exact_size() {
            let remaining = exact.saturating_sub(self.base.pos());
            if remaining > 0 {
                return usize::try_from(remaining).unwrap_or(usize::MAX);
            }
        }
        self.sizer.options().max_buffer_size().max(1)
    }

    fn discard_until(&mut self, new_pos: Position) -> bool {
        while self.base.pos() < new_pos {
            let want = usize::try_from(new_pos - self.base.pos()).unwrap_or(usize::MAX);
            if self.base.available() == 0 && !self.pull_slow(1, want) {
                return false;
            }
            let n = self.base.available().min(want);
            self.base.advance(n);
        }
        true
    }
}

impl<S: Source> Reader for BufferedReader<S> {
    fn base(&self) -> &ReaderBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ReaderBase {
        &mut self.base
    }

    fn pull_slow(&mut self, min_length: usize, recommended_length: usize) -> bool {
        if self.base.available() >= min_length {
            return true;
        }
        if !self.base.stream().ok() {
            return false;
        }
        // An exhausted source never gets a buffer allocated on its behalf.
        if self.source.exhausted() {
            return false;
        }

        let start = self.base.pos();
        let tail_len = self.base.available();
        let room = Position::MAX - self.base.limit_pos();
        let needed = min_length - tail_len;
        if needed as Position > room {
            return self.fail(Status::position_overflow());
        }

        let mut target = self
            .sizer
            .buffer_length(self.base.limit_pos(), needed, recommended_length.saturating_sub(tail_len));
        if let Ok(room) = usize::try_from(room) {
            target = target.min(room);
        }

        // Retain the unread tail, then grow the scratch area for the refill.
        self.scratch.clear();
        self.scratch.reserve(tail_len + target);
        self.scratch.extend_from_slice(self.base.chunk());
        self.scratch.resize(tail_len + target, 0);

        let n = self
            .source
            .read_internal(needed, target, start + tail_len as Position, &mut self.scratch[tail_len..]);
        debug_assert!(n <= target);
        let filled = tail_len + n;
        self.scratch.truncate(filled);
        let window = self.scratch.split().freeze();
        self.base.set_window(start, window, 0);
        self.sizer.set_exact_size(self.source.exact_size());

        if let Some(status) = self.source.take_status() {
            let _ = self.fail(status);
        }
        self.base.available() >= min_length
    }

    fn read_slow(&mut self, dest: &mut [u8]) -> usize {
        let mut copied = self.base.available().min(dest.len());
        dest[..copied].copy_from_slice(&self.base.chunk()[..copied]);
        self.base.advance(copied);

        while copied < dest.len() {
            if !self.base.stream().ok() || self.source.exhausted() {
                break;
            }
            let remaining = dest.len() - copied;
            if remaining >= self.length_to_read_directly() {
                // The request dwarfs the buffer: hand the caller's slice to
                // the source and leave the window empty.
                let pos = self.base.pos();
                let room = Position::MAX - pos;
                if room == 0 {
                    let _ = self.fail(Status::position_overflow());
                    break;
                }
                let max_now = usize::try_from(room).map_or(remaining, |room| remaining.min(room));
                let n = self
                    .source
                    .read_internal(max_now, max_now, pos, &mut dest[copied..copied + max_now]);
                copied += n;
                self.base.clear_window_at(pos + n as Position);
                self.sizer.set_exact_size(self.source.exact_size());
                if let Some(status) = self.source.take_status() {
                    let _ = self.fail(status);
                    break;
                }
                if n < max_now {
                    break;
                }
            } else {
                if !self.pull_slow(1, remaining) {
                    break;
                }
                let n = self.base.available().min(dest.len() - copied);
                dest[copied..copied + n].copy_from_slice(&self.base.chunk()[..n]);
                self.base.advance(n);
                copied += n;
            }
        }
        copied
    }

    fn seek_behind_buffer(&mut self, new_pos: Position) -> bool {
        if !self.base.stream().ok() {
            return false;
        }
        let limit_pos = self.base.limit_pos();
        self.base.clear_window_at(limit_pos);
        self.sizer.begin_run(new_pos);

        if self.source.supports_random_access() || (new_pos < limit_pos && self.source.supports_rewind()) {
            return match self.source.seek_source(new_pos) {
                Ok(reached) => {
                    self.base.clear_window_at(reached);
                    if reached >= new_pos {
                        true
                    } else if self.source.supports_random_access() {
                        // Past the end of a random-access source.
                        false
                    } else {
                        // A rewind-only source replays from an earlier
                        // position; discard forward through regular reads.
                        self.discard_until(new_pos)
                    }
                }
                Err(status) => self.fail(status),
            };
        }
        if new_pos < limit_pos {
            return self.fail(Status::unimplemented("stream does not support seeking backwards"));
        }
        self.discard_until(new_pos)
    }

    fn size(&mut self) -> Result<Position, Status> {
        if let Some(exact) = self.sizer.exact_size() {
            return Ok(exact);
        }
        self.source.size()
    }

    fn supports_random_access(&self) -> bool {
        self.source.supports_random_access()
    }

    fn supports_rewind(&self) -> bool {
        self.source.supports_rewind()
    }

    fn supports_new_reader(&self) -> bool {
        self.source.supports_new_reader()
    }

    fn tolerates_reading_ahead(&self) -> bool {
        self.source.tolerates_reading_ahead()
    }

    fn new_reader(&mut self, initial_pos: Position) -> Option<Box<dyn Reader>> {
        if !self.base.stream().ok() || !self.source.supports_new_reader() {
            return None;
        }
        match self.source.new_source_reader(initial_pos, self.sizer.options()) {
            Ok(reader) => Some(reader),
            Err(status) => {
                let _ = self.fail(status);
                None
            }
        }
    }

    fn set_read_all_hint(&mut self, hint: bool) {
        self.sizer.set_read_all_hint(hint);
        self.source.set_read_all_hint(hint);
    }

    fn done(&mut self) {
        let pos = self.base.pos();
        if let Err(status) = self.source.done(pos) {
            let _ = self.fail(status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StatusKind;

    /// A source over an in-memory slice that serves at most `chunk` bytes
    /// per call, to exercise the refill path.
    struct SliceSource {
        data: Vec<u8>,
        offset: usize,
        chunk: usize,
        calls: usize,
    }

    impl SliceSource {
        fn new(data: impl Into<Vec<u8>>, chunk: usize) -> Self {
            Self {
                data: data.into(),
                offset: 0,
                chunk,
                calls: 0,
            }
        }
    }

    impl Source for SliceSource {
        fn read_internal(&mut self, min_length: usize, max_length: usize, pos: Position, dest: &mut [u8]) -> usize {
            assert_eq!(pos as usize, self.offset);
            assert!(min_length <= max_length);
            self.calls += 1;
            let mut written = 0;
            // Honor `min_length` across artificially small chunks, the way a
            // real source keeps issuing syscalls until satisfied.
            while written < min_length {
                let n = self.chunk.min(max_length - written).min(self.data.len() - self.offset);
                if n == 0 {
                    break;
                }
                dest[written..written + n].copy_from_slice(&self.data[self.offset..self.offset + n]);
                self.offset += n;
                written += n;
            }
            written
        }
    }

    fn reader_over(data: &[u8], chunk: usize) -> BufferedReader<SliceSource> {
        BufferedReader::new(
            SliceSource::new(data, chunk),
            BufferOptions::new().with_min_buffer_size(8).with_max_buffer_size(64),
        )
    }

    #[test]
    fn pull_and_read_follow_the_cursor_invariants() {
        let mut reader = reader_over(b"hello world", 4);
        assert!(reader.pull(1));
        assert!(reader.available() >= 1);
        assert_eq!(reader.pos(), 0);

        let mut dest = [0; 5];
        assert_eq!(reader.read(&mut dest), 5);
        assert_eq!(&dest, b"hello");
        assert_eq!(reader.pos(), 5);

        let mut rest = [0; 16];
        let n = reader.read(&mut rest);
        assert_eq!(&rest[..n], b" world");
        assert!(reader.ok());
        assert!(!reader.pull(1), "source is exhausted");
        assert!(reader.ok(), "end-of-source is not a failure");
    }

    #[test]
    fn pull_zero_is_a_no_op() {
        let mut reader = reader_over(b"", 4);
        assert!(reader.pull(0));
        assert_eq!(reader.source().calls, 0, "pull(0) must not touch the source");
    }

    #[test]
    fn pull_retains_the_unread_tail() {
        let mut reader = reader_over(b"abcdefghijklmnop", 3);
        assert!(reader.pull(2));
        let first = reader.chunk()[0];
        assert_eq!(first, b'a');
        reader.advance(1);
        // Demand more than is buffered; the unread tail must survive.
        assert!(reader.pull(10));
        assert_eq!(&reader.chunk()[..2], b"bc");
        assert_eq!(reader.pos(), 1);
    }

    #[test]
    fn large_reads_bypass_the_buffer() {
        let data: Vec<u8> = (0u8..=255).cycle().take(1000).collect();
        let mut reader = reader_over(&data, 1000);
        let mut dest = vec![0; 1000];
        assert_eq!(reader.read(&mut dest), 1000);
        assert_eq!(dest, data);
        assert_eq!(reader.pos(), 1000);
    }

    #[test]
    fn seek_forward_discards_without_random_access() {
        let mut reader = reader_over(b"0123456789", 4);
        assert!(reader.seek(6));
        assert_eq!(reader.read_byte(), Some(b'6'));
        assert!(!reader.seek(3), "backward seek is unsupported");
        assert_eq!(reader.status().map(Status::kind), Some(StatusKind::Unimplemented));
    }

    #[test]
    fn skip_past_the_end_reports_failure_free_shortfall() {
        let mut reader = reader_over(b"0123", 4);
        assert!(!reader.skip(100));
        assert!(reader.ok());
        assert_eq!(reader.pos(), 4);
    }

    #[test]
    fn read_bytes_steals_from_the_window() {
        let mut reader = reader_over(b"0123456789", 10);
        assert!(reader.pull(10));
        let stolen = reader.read_bytes(4);
        assert_eq!(&stolen[..], b"0123");
        assert_eq!(reader.pos(), 4);
    }

    #[test]
    fn close_is_idempotent() {
        let mut reader = reader_over(b"xy", 2);
        assert!(reader.close());
        assert!(reader.close());
        assert!(!reader.is_open());
    }
}
