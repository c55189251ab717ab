// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use bytes::{BufMut, Bytes, BytesMut};

use crate::reader::Reader;
use crate::status::{Position, Status};
use crate::stream::StreamBase;

/// How far down the stack a flush must propagate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FlushType {
    /// Data buffered in this object reaches the layer below. A layer that
    /// merely borrows its destination stops here.
    FromObject,
    /// Data reaches the operating system.
    FromProcess,
    /// Data reaches stable storage.
    FromMachine,
}

/// Cursor, buffer and lifecycle state embedded in every [`Writer`].
///
/// The buffer is a [`BytesMut`] whose filled prefix holds bytes accepted but
/// not yet handed to the destination, and whose spare capacity is the
/// `[cursor, limit)` region writable without a slow-path call. `start_pos`
/// is the absolute destination position of the first buffered byte, so
/// `pos = start_pos + buffered_len` and `available = capacity - buffered_len`.
#[derive(Debug)]
pub struct WriterBase {
    stream: StreamBase,
    buf: BytesMut,
    start_pos: Position,
}

impl WriterBase {
    /// Creates an open base at position 0.
    #[must_use]
    pub fn new() -> Self {
        Self::with_start_pos(0)
    }

    /// Creates an open base at `pos`.
    #[must_use]
    pub fn with_start_pos(pos: Position) -> Self {
        Self {
            stream: StreamBase::new(),
            buf: BytesMut::new(),
            start_pos: pos,
        }
    }

    /// Creates a base that is already failed with `status`.
    #[must_use]
    pub fn failed(status: Status) -> Self {
        Self {
            stream: StreamBase::failed(status),
            buf: BytesMut::new(),
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
        self.start_pos + self.buf.len() as Position
    }

    /// Absolute destination position of the first buffered byte.
    #[must_use]
    pub fn start_pos(&self) -> Position {
        self.start_pos
    }

    /// Bytes writable without a slow-path call.
    #[must_use]
    pub fn available(&self) -> usize {
        self.buf.capacity() - self.buf.len()
    }

    /// Bytes accepted but not yet handed to the destination.
    #[must_use]
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    /// Appends bytes that are known to fit in the spare capacity.
    pub fn write_fast(&mut self, src: &[u8]) {
        debug_assert!(src.len() <= self.available());
        self.buf.extend_from_slice(src);
    }

    /// Appends `n` copies of `byte`, up to the spare capacity.
    pub fn put_bytes_fast(&mut self, byte: u8, n: usize) {
        debug_assert!(n <= self.available());
        self.buf.put_bytes(byte, n);
    }

    /// Detaches the buffer for draining; pair with
    /// [`restore_buffer()`][Self::restore_buffer].
    #[must_use]
    pub fn take_buffer(&mut self) -> BytesMut {
        std::mem::take(&mut self.buf)
    }

    /// Reinstalls a drained buffer, advancing `start_pos` past the bytes the
    /// destination accepted, and keeps its capacity for reuse.
    pub fn restore_buffer(&mut self, mut buf: BytesMut, accepted: usize) {
        debug_assert!(accepted <= buf.len());
        self.start_pos += accepted as Position;
        if accepted == buf.len() {
            buf.clear();
        } else {
            // Partial hand-off: keep the tail buffered.
            let _ = buf.split_to(accepted);
        }
        self.buf = buf;
    }

    /// Installs `buf` as the buffer, with its first byte at destination
    /// position `start_pos`. Used by adapters that lend their buffer to an
    /// inner writer and take it back.
    pub fn set_buffer(&mut self, buf: BytesMut, start_pos: Position) {
        self.buf = buf;
        self.start_pos = start_pos;
    }

    /// Grows the spare capacity to at least `additional` bytes.
    pub fn reserve(&mut self, additional: usize) {
        self.buf.reserve(additional);
    }

    /// Advances the destination position after bytes moved outside the
    /// buffer (e.g. a kernel-to-kernel copy). The buffer must be empty.
    pub fn advance_start_pos(&mut self, n: Position) {
        debug_assert!(self.buf.is_empty());
        self.start_pos += n;
    }
}

impl Default for WriterBase {
    fn default() -> Self {
        Self::new()
    }
}

/// A push-style buffered byte sink.
///
/// The mirror image of [`Reader`]: writes into the spare capacity of the
/// buffer window are cursor arithmetic, and only buffer misses dispatch to
/// the implementation's slow path. Failures latch; operations return `false`
/// once the stream is unhealthy.
pub trait Writer {
    /// Shared cursor, buffer and lifecycle state.
    fn base(&self) -> &WriterBase;

    /// Mutable shared state.
    fn base_mut(&mut self) -> &mut WriterBase;

    /// Slow path of [`push()`][Writer::push]: makes room for at least
    /// `min_length` bytes, sizing towards `recommended_length`.
    fn push_slow(&mut self, min_length: usize, recommended_length: usize) -> bool;

    /// Slow path of [`write()`][Writer::write]. Implementations with a
    /// cheaper route for large sources override this.
    fn write_slow(&mut self, src: &[u8]) -> bool {
        let mut written = 0;
        while written < src.len() {
            if self.base().available() == 0 && !self.push_slow(1, src.len() - written) {
                return false;
            }
            let n = (src.len() - written).min(self.base().available());
            self.base_mut().write_fast(&src[written..written + n]);
            written += n;
        }
        true
    }

    /// Slow path of [`write_bytes()`][Writer::write_bytes]. Sinks that can
    /// take ownership of shared slices override this to avoid the copy.
    fn write_bytes_slow(&mut self, src: Bytes) -> bool {
        self.write_slow(&src)
    }

    /// Pushes buffered bytes towards the destination.
    ///
    /// [`FlushType::FromObject`] empties this object's buffer;
    /// the stronger levels additionally ask the destination to persist.
    fn flush(&mut self, flush_type: FlushType) -> bool {
        let _ = flush_type;
        self.ok()
    }

    /// Whether this sink gains nothing from taking ownership of shared
    /// byte sequences, so callers should hand it plain slices instead.
    fn prefers_copying(&self) -> bool {
        false
    }

    /// Whether [`truncate()`][Writer::truncate] works on this instance.
    fn supports_truncate(&self) -> bool {
        false
    }

    /// Discards destination bytes at and beyond `new_size`.
    fn truncate(&mut self, new_size: Position) -> bool {
        let _ = new_size;
        self.base_mut()
            .stream_mut()
            .fail(Status::unimplemented("stream does not support truncation"))
    }

    /// Whether [`read_mode()`][Writer::read_mode] works on this instance.
    fn supports_read_mode(&self) -> bool {
        false
    }

    /// Exposes the already-written destination bytes as an independent
    /// reader positioned at `initial_pos`. Flushes this writer first.
    fn read_mode(&mut self, initial_pos: Position) -> Option<Box<dyn Reader>> {
        let _ = initial_pos;
        None
    }

    /// Hook invoked once by [`close()`][Writer::close] while the stream is
    /// still open. Implementations flush buffered bytes here.
    fn done(&mut self) {}

    /// Closes the writer, flushing buffered data. Idempotent; returns the
    /// final health of the stream.
    fn close(&mut self) -> bool {
        if self.base().stream().is_open() {
            self.done();
            self.base_mut().stream_mut().mark_closed();
        }
        self.base().stream().ok()
    }

    // Provided surface built from the methods above.

    /// `true` while the stream has not failed.
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

    /// Bytes writable without a slow-path call.
    fn available(&self) -> usize {
        self.base().available()
    }

    /// Ensures room for at least `min_length` bytes. `push(0)` always
    /// succeeds without allocating.
    fn push(&mut self, min_length: usize) -> bool {
        if self.base().available() >= min_length {
            return true;
        }
        self.push_slow(min_length, min_length)
    }

    /// Like [`push()`][Writer::push] with a size expectation.
    fn push_recommended(&mut self, min_length: usize, recommended_length: usize) -> bool {
        if self.base().available() >= min_length {
            return true;
        }
        self.push_slow(min_length, recommended_length.max(min_length))
    }

    /// Writes all of `src`. Returns `false` on failure.
    fn write(&mut self, src: &[u8]) -> bool {
        if src.len() <= self.base().available() {
            self.base_mut().write_fast(src);
            return true;
        }
        self.write_slow(src)
    }

    /// Writes a single byte.
    fn write_u8(&mut self, byte: u8) -> bool {
        self.write(&[byte])
    }

    /// Writes a string.
    fn write_str(&mut self, src: &str) -> bool {
        self.write(src.as_bytes())
    }

    /// Writes a shared byte sequence, letting the sink steal the slice when
    /// it can hold shared data and does not prefer plain copies.
    fn write_bytes(&mut self, src: Bytes) -> bool {
        if src.len() <= self.base().available() {
            self.base_mut().write_fast(&src);
            return true;
        }
        if self.prefers_copying() {
            return self.write_slow(&src);
        }
        self.write_bytes_slow(src)
    }

    /// Writes `length` zero bytes, filling across buffer boundaries.
    fn write_zeros(&mut self, length: u64) -> bool {
        self.write_chars(length, 0)
    }

    /// Writes `length` copies of `byte`, filling across buffer boundaries.
    fn write_chars(&mut self, mut length: u64, byte: u8) -> bool {
        while length > 0 {
            if self.base().available() == 0 {
                let want = usize::try_from(length).unwrap_or(usize::MAX);
                if !self.push_slow(1, want) {
                    return false;
                }
            }
            let n = self
                .base()
                .available()
                .min(usize::try_from(length).unwrap_or(usize::MAX));
            self.base_mut().put_bytes_fast(byte, n);
            length -= n as u64;
        }
        true
    }

    /// Writes the shortest decimal form of `value`. A negative NaN is
    /// normalized to positive NaN so the output is deterministic.
    fn write_f32(&mut self, value: f32) -> bool {
        let value = if value.is_nan() { f32::NAN } else { value };
        self.write_str(&value.to_string())
    }

    /// Writes the shortest decimal form of `value`. A negative NaN is
    /// normalized to positive NaN so the output is deterministic.
    fn write_f64(&mut self, value: f64) -> bool {
        let value = if value.is_nan() { f64::NAN } else { value };
        self.write_str(&value.to_string())
    }
}

impl<W: Writer + ?Sized> Writer for &mut W {
    fn base(&self) -> &WriterBase {
        (**self).base()
    }

    fn base_mut(&mut self) -> &mut WriterBase {
        (**self).base_mut()
    }

    fn push_slow(&mut self, min_length: usize, recommended_length: usize) -> bool {
        (**self).push_slow(min_length, recommended_length)
    }

    fn write_slow(&mut self, src: &[u8]) -> bool {
        (**self).write_slow(src)
    }

    fn write_bytes_slow(&mut self, src: Bytes) -> bool {
        (**self).write_bytes_slow(src)
    }

    fn prefers_copying(&self) -> bool {
        (**self).prefers_copying()
    }

    // A borrowed destination is not owned by the layer above it: an
    // object-scoped flush and a close stop at the borrow.
    fn flush(&mut self, flush_type: FlushType) -> bool {
        if flush_type == FlushType::FromObject {
            return self.ok();
        }
        (**self).flush(flush_type)
    }

    fn supports_truncate(&self) -> bool {
        (**self).supports_truncate()
    }

    fn truncate(&mut self, new_size: Position) -> bool {
        (**self).truncate(new_size)
    }

    fn supports_read_mode(&self) -> bool {
        (**self).supports_read_mode()
    }

    fn read_mode(&mut self, initial_pos: Position) -> Option<Box<dyn Reader>> {
        (**self).read_mode(initial_pos)
    }

    fn done(&mut self) {}

    fn close(&mut self) -> bool {
        self.ok()
    }
}

impl<W: Writer + ?Sized> Writer for Box<W> {
    fn base(&self) -> &WriterBase {
        (**self).base()
    }

    fn base_mut(&mut self) -> &mut WriterBase {
        (**self).base_mut()
    }

    fn push_slow(&mut self, min_length: usize, recommended_length: usize) -> bool {
        (**self).push_slow(min_length, recommended_length)
    }

    fn write_slow(&mut self, src: &[u8]) -> bool {
        (**self).write_slow(src)
    }

    fn write_bytes_slow(&mut self, src: Bytes) -> bool {
        (**self).write_bytes_slow(src)
    }

    fn prefers_copying(&self) -> bool {
        (**self).prefers_copying()
    }

    fn flush(&mut self, flush_type: FlushType) -> bool {
        (**self).flush(flush_type)
    }

    fn supports_truncate(&self) -> bool {
        (**self).supports_truncate()
    }

    fn truncate(&mut self, new_size: Position) -> bool {
        (**self).truncate(new_size)
    }

    fn supports_read_mode(&self) -> bool {
        (**self).supports_read_mode()
    }

    fn read_mode(&mut self, initial_pos: Position) -> Option<Box<dyn Reader>> {
        (**self).read_mode(initial_pos)
    }

    fn done(&mut self) {
        (**self).done();
    }

    fn close(&mut self) -> bool {
        (**self).close()
    }
}
