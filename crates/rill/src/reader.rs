// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use bytes::{Bytes, BytesMut};

use crate::status::{Position, Status};
use crate::stream::StreamBase;
use crate::writer::Writer;

/// Cursor, window and lifecycle state embedded in every [`Reader`].
///
/// The window is a contiguous run of already-fetched bytes `[start, limit)`
/// represented as a shared [`Bytes`] plus a cursor index into it.
/// `start_pos` is the absolute source position of the first window byte, so:
///
/// * `pos = start_pos + cursor`
/// * `limit_pos = start_pos + window.len()`
/// * `available = window.len() - cursor`
///
/// The window methods are public so that stream implementations and layered
/// adapters can manage the buffer the way subclasses would in a virtual-call
/// design; ordinary consumers only need the [`Reader`] trait.
#[derive(Debug)]
pub struct ReaderBase {
    stream: StreamBase,
    window: Bytes,
    cursor: usize,
    start_pos: Position,
}

impl ReaderBase {
    /// Creates an open base with an empty window at position 0.
    #[must_use]
    pub fn new() -> Self {
        Self::with_start_pos(0)
    }

    /// Creates an open base with an empty window at `pos`.
    #[must_use]
    pub fn with_start_pos(pos: Position) -> Self {
        Self {
            stream: StreamBase::new(),
            window: Bytes::new(),
            cursor: 0,
            start_pos: pos,
        }
    }

    /// Creates a base that is already failed with `status`.
    #[must_use]
    pub fn failed(status: Status) -> Self {
        Self {
            stream: StreamBase::failed(status),
            window: Bytes::new(),
            cursor: 0,
            start_pos: 0,
        }
    }

    /// The lifecycle and failure state.
    #[must_use]
    pub fn stream(&self) -> &StreamBase {
        &self.stream
    }

    /// Mutable access to the lifecycle and failure state.
    pub fn stream_mut(&mut self) -> &mut StreamBase {
        &mut self.stream
    }

    /// Current logical position.
    #[must_use]
    pub fn pos(&self) -> Position {
        self.start_pos + self.cursor as Position
    }

    /// Absolute position of the first window byte.
    #[must_use]
    pub fn start_pos(&self) -> Position {
        self.start_pos
    }

    /// Absolute position just past the window.
    #[must_use]
    pub fn limit_pos(&self) -> Position {
        self.start_pos + self.window.len() as Position
    }

    /// Bytes readable without a slow-path call.
    #[must_use]
    pub fn available(&self) -> usize {
        self.window.len() - self.cursor
    }

    /// The unread part of the window.
    #[must_use]
    pub fn chunk(&self) -> &[u8] {
        &self.window[self.cursor..]
    }

    /// The whole window, including already-consumed bytes.
    #[must_use]
    pub fn window(&self) -> &Bytes {
        &self.window
    }

    /// Cursor index within the window.
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Moves the cursor to an absolute index within the window.
    pub fn set_cursor(&mut self, cursor: usize) {
        debug_assert!(cursor <= self.window.len());
        self.cursor = cursor;
    }

    /// Consumes `n` already-available bytes.
    pub fn advance(&mut self, n: usize) {
        debug_assert!(n <= self.available());
        self.cursor += n;
    }

    /// Consumes `n` available bytes as a shared zero-copy slice.
    #[must_use]
    pub fn split_chunk(&mut self, n: usize) -> Bytes {
        debug_assert!(n <= self.available());
        let slice = self.window.slice(self.cursor..self.cursor + n);
        self.cursor += n;
        slice
    }

    /// Installs a freshly fetched window whose first byte sits at `start_pos`.
    pub fn set_window(&mut self, start_pos: Position, window: Bytes, cursor: usize) {
        debug_assert!(cursor <= window.len());
        debug_assert!(start_pos.checked_add(window.len() as Position).is_some());
        self.start_pos = start_pos;
        self.window = window;
        self.cursor = cursor;
    }

    /// Drops the window, leaving the stream positioned at `pos`.
    pub fn clear_window_at(&mut self, pos: Position) {
        self.window = Bytes::new();
        self.cursor = 0;
        self.start_pos = pos;
    }
}

impl Default for ReaderBase {
    fn default() -> Self {
        Self::new()
    }
}

/// A pull-style buffered byte source.
///
/// Every reader exposes a directly accessible buffer window through
/// [`ReaderBase`], so small reads are cursor arithmetic and only buffer
/// misses dispatch to the implementation's slow path. Operations follow the
/// latched-failure contract: they return `false` or a short count when the
/// reader failed or reached the end of the source, and [`status()`]
/// [Reader::status] distinguishes the two (end-of-source leaves the stream
/// healthy).
///
/// # Implementing
///
/// Implementations provide [`base()`][Reader::base] /
/// [`base_mut()`][Reader::base_mut] and [`pull_slow()`][Reader::pull_slow],
/// and override the remaining slow-path and capability methods as their
/// source allows. Any slow-path call may replace the window, invalidating
/// previously observed `chunk()` data.
///
/// # Layering
///
/// `&mut R` implements `Reader` by delegation so that a layered stream can
/// borrow its inner stream instead of owning it; closing through the borrow
/// never closes the underlying stream.
pub trait Reader {
    /// Shared cursor, window and lifecycle state.
    fn base(&self) -> &ReaderBase;

    /// Mutable shared state.
    fn base_mut(&mut self) -> &mut ReaderBase;

    /// Slow path of [`pull()`][Reader::pull]: makes at least `min_length`
    /// bytes available, fetching around `recommended_length` when convenient.
    ///
    /// Returns `false` on failure or end-of-source. Must not allocate a
    /// buffer when the source is already known to be exhausted.
    fn pull_slow(&mut self, min_length: usize, recommended_length: usize) -> bool;

    /// Slow path of [`read()`][Reader::read]. Implementations with a cheaper
    /// route for large destinations (bypassing the internal buffer) override
    /// this.
    fn read_slow(&mut self, dest: &mut [u8]) -> usize {
        let mut copied = 0;
        while copied < dest.len() {
            if self.base().available() == 0 && !self.pull_slow(1, dest.len() - copied) {
                break;
            }
            let n = (dest.len() - copied).min(self.base().available());
            dest[copied..copied + n].copy_from_slice(&self.base().chunk()[..n]);
            self.base_mut().advance(n);
            copied += n;
        }
        copied
    }

    /// Slow path of [`read_bytes()`][Reader::read_bytes].
    fn read_bytes_slow(&mut self, length: usize) -> Bytes {
        let mut out = BytesMut::with_capacity(length.min(self.base().available().max(4096)));
        let _ = self.read_into(length, &mut out);
        out.freeze()
    }

    /// Repositions the stream outside the current window.
    ///
    /// The default implementation supports forward motion only, by reading
    /// and discarding; sources with random access override it.
    fn seek_behind_buffer(&mut self, new_pos: Position) -> bool {
        if !self.ok() {
            return false;
        }
        if new_pos < self.base().start_pos() {
            return self
                .base_mut()
                .stream_mut()
                .fail(Status::unimplemented("stream does not support seeking backwards"));
        }
        let limit_pos = self.base().limit_pos();
        self.base_mut().clear_window_at(limit_pos);
        while self.base().pos() < new_pos {
            let want = usize::try_from(new_pos - self.base().pos()).unwrap_or(usize::MAX);
            if self.base().available() == 0 && !self.pull_slow(1, want) {
                return false;
            }
            let n = self.base().available().min(want);
            self.base_mut().advance(n);
        }
        true
    }

    /// Total size of the source in bytes, when discoverable.
    ///
    /// # Errors
    ///
    /// [`StatusKind::Unimplemented`][crate::StatusKind::Unimplemented] when
    /// the capability is absent. Does not latch a failure on the stream.
    fn size(&mut self) -> Result<Position, Status> {
        Err(Status::unimplemented("stream does not support size discovery"))
    }

    /// Whether [`seek()`][Reader::seek] can move in both directions.
    fn supports_random_access(&self) -> bool {
        false
    }

    /// Whether the stream can be repositioned to earlier positions, possibly
    /// by re-reading from the start.
    fn supports_rewind(&self) -> bool {
        self.supports_random_access()
    }

    /// Whether [`new_reader()`][Reader::new_reader] works on this instance.
    fn supports_new_reader(&self) -> bool {
        false
    }

    /// Whether speculative read-ahead past the requested bytes is harmless.
    fn tolerates_reading_ahead(&self) -> bool {
        self.supports_random_access()
    }

    /// Creates an independent reader over the same source, positioned at
    /// `initial_pos`. Returns `None` when the capability is absent; failures
    /// while creating the reader latch on `self`.
    fn new_reader(&mut self, initial_pos: Position) -> Option<Box<dyn Reader>> {
        let _ = initial_pos;
        None
    }

    /// Declares whether the caller intends to read to the end of the source.
    fn set_read_all_hint(&mut self, hint: bool) {
        let _ = hint;
    }

    /// Hook invoked once by [`close()`][Reader::close] while the stream is
    /// still open.
    fn done(&mut self) {}

    /// Closes the reader. Idempotent; returns the final health of the
    /// stream.
    fn close(&mut self) -> bool {
        if self.base().stream().is_open() {
            self.done();
            self.base_mut().stream_mut().mark_closed();
        }
        self.base().stream().ok()
    }

    // Provided surface built from the methods above. These are final in
    // spirit: their fast paths only touch the cursor.

    /// `true` while the stream has not failed. End-of-source is not a
    /// failure.
    fn ok(&self) -> bool {
        self.base().stream().ok()
    }

    /// `true` until the stream is closed.
    fn is_open(&self) -> bool {
        self.base().stream().is_open()
    }

    /// The latched failure, if any.
    fn status(&self) -> Option<&Status> {
        self.base().stream().status()
    }

    /// Current logical position.
    fn pos(&self) -> Position {
        self.base().pos()
    }

    /// Bytes readable without a slow-path call.
    fn available(&self) -> usize {
        self.base().available()
    }

    /// The unread part of the buffer window. Invalidated by any slow-path
    /// call.
    fn chunk(&self) -> &[u8] {
        self.base().chunk()
    }

    /// Consumes `n` bytes previously observed via [`chunk()`][Reader::chunk].
    fn advance(&mut self, n: usize) {
        self.base_mut().advance(n);
    }

    /// Ensures at least `min_length` bytes are available.
    ///
    /// `pull(0)` always succeeds without allocating. Returns `false` on
    /// failure or end-of-source.
    fn pull(&mut self, min_length: usize) -> bool {
        if self.base().available() >= min_length {
            return true;
        }
        self.pull_slow(min_length, min_length)
    }

    /// Like [`pull()`][Reader::pull], additionally telling the stream how
    /// many bytes the caller expects to consume soon.
    fn pull_recommended(&mut self, min_length: usize, recommended_length: usize) -> bool {
        if self.base().available() >= min_length {
            return true;
        }
        self.pull_slow(min_length, recommended_length.max(min_length))
    }

    /// Reads a single byte.
    fn read_byte(&mut self) -> Option<u8> {
        if !self.pull(1) {
            return None;
        }
        let byte = self.base().chunk()[0];
        self.base_mut().advance(1);
        Some(byte)
    }

    /// Reads up to `dest.len()` bytes, returning the number copied. A short
    /// count occurs only on end-of-source or failure.
    fn read(&mut self, dest: &mut [u8]) -> usize {
        if dest.len() <= self.base().available() {
            let n = dest.len();
            dest.copy_from_slice(&self.base().chunk()[..n]);
            self.base_mut().advance(n);
            return n;
        }
        self.read_slow(dest)
    }

    /// Reads up to `length` bytes as a shared byte sequence, stealing a
    /// zero-copy slice of the window when the bytes are already buffered.
    fn read_bytes(&mut self, length: usize) -> Bytes {
        if length <= self.base().available() {
            return self.base_mut().split_chunk(length);
        }
        self.read_bytes_slow(length)
    }

    /// Reads up to `length` bytes, appending them to `dest`. Returns the
    /// number appended; short only on end-of-source or failure.
    fn read_into(&mut self, length: usize, dest: &mut BytesMut) -> usize {
        let mut appended = 0;
        while appended < length {
            if self.base().available() == 0 && !self.pull_recommended(1, length - appended) {
                break;
            }
            let n = (length - appended).min(self.base().available());
            dest.extend_from_slice(&self.base().chunk()[..n]);
            self.base_mut().advance(n);
            appended += n;
        }
        appended
    }

    /// Reads everything up to end-of-source, appending to `dest`. Returns
    /// `true` when the source was exhausted without failure.
    fn read_all(&mut self, dest: &mut BytesMut) -> bool {
        self.set_read_all_hint(true);
        loop {
            let n = self.base().available();
            if n == 0 {
                if !self.pull_slow(1, usize::MAX) {
                    break;
                }
                continue;
            }
            dest.extend_from_slice(self.base().chunk());
            self.base_mut().advance(n);
        }
        self.set_read_all_hint(false);
        self.ok()
    }

    /// Transfers `length` bytes to `dest`. Returns `true` when the full
    /// length was transferred; on `false` consult both streams' statuses.
    fn copy_to(&mut self, mut length: u64, dest: &mut dyn Writer) -> bool {
        while length > 0 {
            if self.base().available() == 0 {
                let want = usize::try_from(length).unwrap_or(usize::MAX);
                if !self.pull_recommended(1, want) {
                    return false;
                }
            }
            let n = self
                .base()
                .available()
                .min(usize::try_from(length).unwrap_or(usize::MAX));
            if !dest.write(&self.base().chunk()[..n]) {
                return false;
            }
            self.base_mut().advance(n);
            length -= n as u64;
        }
        true
    }

    /// Advances the position by `length` bytes, reading and discarding when
    /// the source cannot seek.
    fn skip(&mut self, length: u64) -> bool {
        if length <= self.base().available() as u64 {
            self.base_mut().advance(length as usize);
            return true;
        }
        let Some(target) = self.base().pos().checked_add(length) else {
            return self.base_mut().stream_mut().fail(Status::position_overflow());
        };
        self.seek(target)
    }

    /// Repositions the stream. Targets within the window only move the
    /// cursor; everything else goes through
    /// [`seek_behind_buffer()`][Reader::seek_behind_buffer].
    fn seek(&mut self, new_pos: Position) -> bool {
        let base = self.base();
        if new_pos >= base.start_pos() && new_pos <= base.limit_pos() {
            let cursor = (new_pos - base.start_pos()) as usize;
            self.base_mut().set_cursor(cursor);
            return true;
        }
        self.seek_behind_buffer(new_pos)
    }
}

impl<R: Reader + ?Sized> Reader for &mut R {
    fn base(&self) -> &ReaderBase {
        (**self).base()
    }

    fn base_mut(&mut self) -> &mut ReaderBase {
        (**self).base_mut()
    }

    fn pull_slow(&mut self, min_length: usize, recommended_length: usize) -> bool {
        (**self).pull_slow(min_length, recommended_length)
    }

    fn read_slow(&mut self, dest: &mut [u8]) -> usize {
        (**self).read_slow(dest)
    }

    fn read_bytes_slow(&mut self, length: usize) -> Bytes {
        (**self).read_bytes_slow(length)
    }

    fn seek_behind_buffer(&mut self, new_pos: Position) -> bool {
        (**self).seek_behind_buffer(new_pos)
    }

    fn size(&mut self) -> Result<Position, Status> {
        (**self).size()
    }

    fn supports_random_access(&self) -> bool {
        (**self).supports_random_access()
    }

    fn supports_rewind(&self) -> bool {
        (**self).supports_rewind()
    }

    fn supports_new_reader(&self) -> bool {
        (**self).supports_new_reader()
    }

    fn tolerates_reading_ahead(&self) -> bool {
        (**self).tolerates_reading_ahead()
    }

    fn new_reader(&mut self, initial_pos: Position) -> Option<Box<dyn Reader>> {
        (**self).new_reader(initial_pos)
    }

    fn set_read_all_hint(&mut self, hint: bool) {
        (**self).set_read_all_hint(hint);
    }

    // A borrowed stream is not owned by the layer above it: closing the
    // borrow must leave the underlying reader open.
    fn done(&mut self) {}

    fn close(&mut self) -> bool {
        self.ok()
    }
}

impl<R: Reader + ?Sized> Reader for Box<R> {
    fn base(&self) -> &ReaderBase {
        (**self).base()
    }

    fn base_mut(&mut self) -> &mut ReaderBase {
        (**self).base_mut()
    }

    fn pull_slow(&mut self, min_length: usize, recommended_length: usize) -> bool {
        (**self).pull_slow(min_length, recommended_length)
    }

    fn read_slow(&mut self, dest: &mut [u8]) -> usize {
        (**self).read_slow(dest)
    }

    fn read_bytes_slow(&mut self, length: usize) -> Bytes {
        (**self).read_bytes_slow(length)
    }

    fn seek_behind_buffer(&mut self, new_pos: Position) -> bool {
        (**self).seek_behind_buffer(new_pos)
    }

    fn size(&mut self) -> Result<Position, Status> {
        (**self).size()
    }

    fn supports_random_access(&self) -> bool {
        (**self).supports_random_access()
    }

    fn supports_rewind(&self) -> bool {
        (**self).supports_rewind()
    }

    fn supports_new_reader(&self) -> bool {
        (**self).supports_new_reader()
    }

    fn tolerates_reading_ahead(&self) -> bool {
        (**self).tolerates_reading_ahead()
    }

    fn new_reader(&mut self, initial_pos: Position) -> Option<Box<dyn Reader>> {
        (**self).new_reader(initial_pos)
    }

    fn set_read_all_hint(&mut self, hint: bool) {
        (**self).set_read_all_hint(hint);
    }

    fn done(&mut self) {
        (**self).done();
    }

    fn close(&mut self) -> bool {
        (**self).close()
    }
}
