// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use tracing::debug;

use crate::buffer::{BufferOptions, WriteBufferSizer};
use crate::reader::Reader;
use crate::status::{Position, Status};
use crate::writer::{FlushType, Writer, WriterBase};

/// Slow-path hooks of a concrete byte sink, driven by [`BufferedWriter`].
pub trait Sink {
    /// Writes all of `src` to the destination. `pos` is the absolute
    /// destination position of `src[0]`.
    ///
    /// # Errors
    ///
    /// Any destination failure; the wrapper latches it on the stream.
    fn write_internal(&mut self, src: &[u8], pos: Position) -> Result<(), Status>;

    /// Pushes destination-side state towards durability. Called after the
    /// wrapper's buffer has been drained; `pos` is the flushed position.
    ///
    /// # Errors
    ///
    /// Any destination failure; the wrapper latches it on the stream.
    fn flush_internal(&mut self, flush_type: FlushType, pos: Position) -> Result<(), Status> {
        let _ = (flush_type, pos);
        Ok(())
    }

    /// See [`Writer::supports_read_mode`].
    fn supports_read_mode(&self) -> bool {
        false
    }

    /// Exposes already-written bytes as an independent reader at
    /// `initial_pos`. Called after the wrapper's buffer has been drained.
    ///
    /// # Errors
    ///
    /// [`StatusKind::Unimplemented`][crate::StatusKind::Unimplemented] when
    /// the capability is absent, or any duplication failure.
    fn read_mode_internal(&mut self, initial_pos: Position, buffer: &BufferOptions) -> Result<Box<dyn Reader>, Status> {
        let _ = (initial_pos, buffer);
        Err(Status::unimplemented("sink does not support read mode"))
    }

    /// See [`Writer::supports_truncate`].
    fn supports_truncate(&self) -> bool {
        false
    }

    /// Discards destination bytes at and beyond `new_size`.
    ///
    /// # Errors
    ///
    /// [`StatusKind::Unimplemented`][crate::StatusKind::Unimplemented] when
    /// the capability is absent, or any destination failure.
    fn truncate_internal(&mut self, new_size: Position) -> Result<(), Status> {
        let _ = new_size;
        Err(Status::unimplemented("sink does not support truncation"))
    }

    /// Attaches this layer's position context to a failure.
    fn annotate(&self, status: Status, pos: Position) -> Status {
        let _ = pos;
        status
    }

    /// Releases sink resources on close, after the final drain.
    ///
    /// # Errors
    ///
    /// Any failure worth surfacing from teardown; latched by the wrapper.
    fn done(&mut self, pos: Position) -> Result<(), Status> {
        let _ = pos;
        Ok(())
    }
}

/// The default buffering [`Writer`] over a [`Sink`].
///
/// Accepts small writes into an internal buffer sized by [`BufferOptions`]
/// and hands large writes to the sink directly once buffering would only add
/// a copy.
#[derive(Debug)]
pub struct BufferedWriter<S: Sink> {
    base: WriterBase,
    sizer: WriteBufferSizer,
    sink: S,
}

impl<S: Sink> BufferedWriter<S> {
    /// Creates a buffering writer over `sink` starting at position 0.
    #[must_use]
    pub fn new(sink: S, options: BufferOptions) -> Self {
        Self::with_start_pos(sink, options, 0)
    }

    /// Creates a buffering writer over `sink` whose next byte lands at
    /// `pos`.
    #[must_use]
    pub fn with_start_pos(sink: S, options: BufferOptions, pos: Position) -> Self {
        Self {
            base: WriterBase::with_start_pos(pos),
            sizer: WriteBufferSizer::new(options),
            sink,
        }
    }

    /// Creates a writer that is already failed with `status`.
    #[must_use]
    pub fn failed(sink: S, options: BufferOptions, status: Status) -> Self {
        Self {
            base: WriterBase::failed(status),
            sizer: WriteBufferSizer::new(options),
            sink,
        }
    }

    /// The underlying sink.
    #[must_use]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Mutable access to the underlying sink.
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// The buffer-sizing policy, for sharing with a sibling stream.
    #[must_use]
    pub fn buffer_options(&self) -> &BufferOptions {
        self.sizer.options()
    }

    fn fail(&mut self, status: Status) -> bool {
        let pos = self.base.pos();
        let annotated = self.sink.annotate(status, pos);
        debug!(status = %annotated, "buffered writer failed");
        self.base.stream_mut().fail(annotated)
    }

    fn drain_buffer(&mut self) -> bool {
        if self.base.buffered().is_empty() {
            return true;
        }
        let start_pos = self.base.start_pos();
        let buf = self.base.take_buffer();
        match self.sink.write_internal(&buf, start_pos) {
            Ok(()) => {
                let accepted = buf.len();
                self.base.restore_buffer(buf, accepted);
                true
            }
            Err(status) => {
                self.base.restore_buffer(buf, 0);
                self.fail(status)
            }
        }
    }
}

impl<S: Sink> Writer for BufferedWriter<S> {
    fn base(&self) -> &WriterBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WriterBase {
        &mut self.base
    }

    fn push_slow(&mut self, min_length: usize, recommended_length: usize) -> bool {
        if self.base.available() >= min_length {
            return true;
        }
        if !self.base.stream().ok() {
            return false;
        }
        let room = Position::MAX - self.base.pos();
        if min_length as Position > room {
            return self.fail(Status::position_overflow());
        }
        if !self.drain_buffer() {
            return false;
        }
        let mut target = self.sizer.buffer_length(self.base.pos(), min_length, recommended_length);
        if let Ok(room) = usize::try_from(room) {
            target = target.min(room);
        }
        self.base.reserve(target.max(min_length));
        true
    }

    fn write_slow(&mut self, src: &[u8]) -> bool {
        if !self.base.stream().ok() {
            return false;
        }
        let room = Position::MAX - self.base.pos();
        if src.len() as Position > room {
            return self.fail(Status::position_overflow());
        }
        if src.len() >= self.sizer.options().max_buffer_size() {
            // Buffering a source this large would only add a copy.
            if !self.drain_buffer() {
                return false;
            }
            let pos = self.base.pos();
            return match self.sink.write_internal(src, pos) {
                Ok(()) => {
                    self.base.advance_start_pos(src.len() as Position);
                    true
                }
                Err(status) => self.fail(status),
            };
        }
        let mut written = 0;
        while written < src.len() {
            if self.base.available() == 0 && !self.push_slow(1, src.len() - written) {
                return false;
            }
            let n = (src.len() - written).min(self.base.available());
            self.base.write_fast(&src[written..written + n]);
            written += n;
        }
        true
    }

    fn flush(&mut self, flush_type: FlushType) -> bool {
        if !self.base.stream().ok() {
            return false;
        }
        if !self.drain_buffer() {
            return false;
        }
        let pos = self.base.pos();
        match self.sink.flush_internal(flush_type, pos) {
            Ok(()) => true,
            Err(status) => self.fail(status),
        }
    }

    fn supports_truncate(&self) -> bool {
        self.sink.supports_truncate()
    }

    fn truncate(&mut self, new_size: Position) -> bool {
        if !self.base.stream().ok() {
            return false;
        }
        if !self.drain_buffer() {
            return false;
        }
        match self.sink.truncate_internal(new_size) {
            Ok(()) => true,
            Err(status) => self.fail(status),
        }
    }

    fn supports_read_mode(&self) -> bool {
        self.sink.supports_read_mode()
    }

    fn read_mode(&mut self, initial_pos: Position) -> Option<Box<dyn Reader>> {
        if !self.base.stream().ok() || !self.sink.supports_read_mode() {
            return None;
        }
        if !self.drain_buffer() {
            return None;
        }
        match self.sink.read_mode_internal(initial_pos, self.sizer.options()) {
            Ok(reader) => Some(reader),
            Err(status) => {
                let _ = self.fail(status);
                None
            }
        }
    }

    fn done(&mut self) {
        if self.base.stream().ok() && !self.drain_buffer() {
            return;
        }
        let pos = self.base.pos();
        if let Err(status) = self.sink.done(pos) {
            let _ = self.fail(status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A sink that records every hand-off it receives.
    #[derive(Default)]
    struct RecordingSink {
        data: Vec<u8>,
        writes: Vec<usize>,
        flushes: Vec<FlushType>,
    }

    impl Sink for RecordingSink {
        fn write_internal(&mut self, src: &[u8], pos: Position) -> Result<(), Status> {
            assert_eq!(pos as usize, self.data.len(), "writes must arrive in issue order");
            self.data.extend_from_slice(src);
            self.writes.push(src.len());
            Ok(())
        }

        fn flush_internal(&mut self, flush_type: FlushType, _pos: Position) -> Result<(), Status> {
            self.flushes.push(flush_type);
            Ok(())
        }
    }

    fn writer() -> BufferedWriter<RecordingSink> {
        BufferedWriter::new(
            RecordingSink::default(),
            BufferOptions::new().with_min_buffer_size(8).with_max_buffer_size(32),
        )
    }

    #[test]
    fn small_writes_are_buffered_until_flush() {
        let mut w = writer();
        assert!(w.write(b"ab"));
        assert!(w.write(b"cd"));
        assert_eq!(w.pos(), 4);
        assert!(w.sink().writes.is_empty(), "small writes must stay buffered");

        assert!(w.flush(FlushType::FromObject));
        assert_eq!(w.sink().data, b"abcd");
    }

    #[test]
    fn large_writes_bypass_the_buffer() {
        let mut w = writer();
        assert!(w.write(b"xy"));
        let big = vec![7u8; 100];
        assert!(w.write(&big));
        // The buffered prefix was drained first, then the large write went
        // through in one piece.
        assert_eq!(w.sink().writes, vec![2, 100]);
        assert_eq!(w.pos(), 102);
    }

    #[test]
    fn write_chars_crosses_buffer_boundaries() {
        let mut w = writer();
        assert!(w.write_chars(100, b'z'));
        assert!(w.flush(FlushType::FromProcess));
        assert_eq!(w.sink().data.len(), 100);
        assert!(w.sink().data.iter().all(|&b| b == b'z'));
        assert_eq!(w.sink().flushes, vec![FlushType::FromProcess]);
    }

    #[test]
    fn close_drains_the_buffer() {
        let mut w = writer();
        assert!(w.write(b"tail"));
        assert!(w.close());
        assert_eq!(w.sink().data, b"tail");
        assert!(w.close(), "close is idempotent");
    }

    #[test]
    fn failures_latch_and_annotate() {
        struct FailingSink;
        impl Sink for FailingSink {
            fn write_internal(&mut self, _src: &[u8], _pos: Position) -> Result<(), Status> {
                Err(Status::internal("disk on fire"))
            }

            fn annotate(&self, status: Status, pos: Position) -> Status {
                status.annotated(format!("writing test sink at byte {pos}"))
            }
        }

        let mut w = BufferedWriter::new(FailingSink, BufferOptions::new().with_min_buffer_size(8).with_max_buffer_size(16));
        assert!(w.write(b"abcd"));
        assert!(!w.write(b"overflow the buffer now"));
        assert!(!w.ok());
        let message = w.status().map(ToString::to_string).unwrap_or_default();
        assert!(message.contains("writing test sink at byte"), "{message}");
        assert!(message.contains("disk on fire"), "{message}");
    }

    #[test]
    fn float_writes_normalize_negative_nan() {
        let mut w = writer();
        assert!(w.write_f64(-f64::NAN));
        assert!(w.write_f32(1.5));
        assert!(w.flush(FlushType::FromObject));
        assert_eq!(w.sink().data, b"NaN1.5");
    }
}
