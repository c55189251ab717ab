// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;

use bytes::Bytes;

use rill::{FlushType, Position, Writer, WriterBase};

use crate::digester::Digester;

/// A writer that feeds every byte it relays through a [`Digester`].
///
/// The buffer is physically shared with the inner writer: bytes accepted on
/// the fast path land directly in the inner writer's buffer, and the span
/// accepted since the last crossing is absorbed into the digester whenever
/// the buffer is handed back. Shared byte sequences passed to
/// [`write_bytes()`][Writer::write_bytes] are digested before the sink gets
/// a chance to steal them.
///
/// [`digest()`][Self::digest] may be called at any point, including after
/// [`close()`][Writer::close]; an inner failure does not taint the digest of
/// the bytes that were accepted before it.
pub struct DigestingWriter<W: Writer, D: Digester> {
    base: WriterBase,
    inner: W,
    digester: D,
    // Buffer length up to which bytes have been absorbed.
    digested_len: usize,
    // Whether the shared buffer currently lives in `base`.
    holds_buffer: bool,
}

impl<W: Writer, D: Digester> DigestingWriter<W, D> {
    /// Wraps `inner`, digesting everything written through the wrapper into
    /// `digester`.
    #[must_use]
    pub fn new(inner: W, digester: D) -> Self {
        let mut this = Self {
            base: WriterBase::new(),
            inner,
            digester,
            digested_len: 0,
            holds_buffer: false,
        };
        this.make_buffer();
        this
    }

    /// The digest of every byte accepted so far.
    pub fn digest(&mut self) -> D::Digest {
        self.absorb_accepted();
        self.digester.digest()
    }

    /// Consumes the wrapper, returning the inner writer with its buffer
    /// restored.
    #[must_use]
    pub fn into_inner(mut self) -> W {
        self.sync_buffer();
        self.inner
    }

    fn absorb_accepted(&mut self) {
        let len = self.base.buffered().len();
        if len > self.digested_len {
            self.digester.update(&self.base.buffered()[self.digested_len..len]);
            self.digested_len = len;
        }
    }

    fn sync_buffer(&mut self) {
        if !self.holds_buffer {
            return;
        }
        self.absorb_accepted();
        self.holds_buffer = false;
        let start_pos = self.base.start_pos();
        let buf = self.base.take_buffer();
        self.inner.base_mut().set_buffer(buf, start_pos);
    }

    fn make_buffer(&mut self) {
        debug_assert!(!self.holds_buffer);
        let start_pos = self.inner.base().start_pos();
        let buf = self.inner.base_mut().take_buffer();
        self.digested_len = buf.len();
        self.base.set_buffer(buf, start_pos);
        self.holds_buffer = true;
    }

    fn inherit_failure(&mut self) -> bool {
        if let Some(status) = self.inner.status() {
            return self.base.stream_mut().fail(status.clone());
        }
        true
    }
}

impl<W: Writer, D: Digester> Writer for DigestingWriter<W, D> {
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
        self.make_buffer();
        pushed
    }

    fn write_bytes_slow(&mut self, src: Bytes) -> bool {
        if !self.base.stream().ok() {
            return false;
        }
        self.sync_buffer();
        // Digest the block as an opaque byte sequence before the sink can
        // steal or split it.
        self.digester.update(&src);
        let written = self.inner.write_bytes(src);
        if !self.inherit_failure() {
            return false;
        }
        self.make_buffer();
        written
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
        self.make_buffer();
        flushed
    }

    fn prefers_copying(&self) -> bool {
        self.inner.prefers_copying()
    }

    fn supports_read_mode(&self) -> bool {
        self.inner.supports_read_mode()
    }

    fn read_mode(&mut self, initial_pos: Position) -> Option<Box<dyn rill::Reader>> {
        self.sync_buffer();
        let reader = self.inner.read_mode(initial_pos);
        self.make_buffer();
        reader
    }

    fn done(&mut self) {
        self.sync_buffer();
        if !self.inner.close() {
            let _ = self.inherit_failure();
        }
    }
}

impl<W: Writer, D: Digester> fmt::Debug for DigestingWriter<W, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestingWriter")
            .field("pos", &self.base.pos())
            .field("digested_len", &self.digested_len)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use rill::{BytesWriter, NullWriter};

    use super::*;
    use crate::digester::{Adler32Digester, Crc32Digester, Crc32cDigester};

    #[test]
    fn crc32c_of_hello_world() {
        let mut writer = DigestingWriter::new(NullWriter::new(), Crc32cDigester::new());
        assert!(writer.write(b"Hello, World!"));
        assert_eq!(writer.digest(), 0x4BA3_B6E5);
        assert!(writer.close());
        assert_eq!(writer.digest(), 0x4BA3_B6E5, "digest survives close");
    }

    #[test]
    fn any_split_yields_the_same_digest() {
        let data = b"Hello, World!";
        for split in 0..data.len() {
            let mut writer = DigestingWriter::new(NullWriter::new(), Crc32cDigester::new());
            assert!(writer.write(&data[..split]));
            assert!(writer.write(&data[split..]));
            assert_eq!(writer.digest(), 0x4BA3_B6E5, "split at {split}");
        }
    }

    #[test]
    fn adler32_of_abc() {
        let mut writer = DigestingWriter::new(NullWriter::new(), Adler32Digester::new());
        assert!(writer.write(b"abc"));
        assert_eq!(writer.digest(), 0x024D_0127);
    }

    #[test]
    fn bytes_are_forwarded_and_digested() {
        let mut writer = DigestingWriter::new(BytesWriter::new(), Crc32Digester::new());
        assert!(writer.write(b"for"));
        assert!(writer.write_bytes(Bytes::from_static(b"warded")));
        assert_eq!(writer.pos(), 9);

        let expected = {
            let mut d = Crc32Digester::new();
            d.update(b"forwarded");
            d.digest()
        };
        assert_eq!(writer.digest(), expected);

        let inner = writer.into_inner();
        assert_eq!(inner.written(), b"forwarded");
    }

    #[test]
    fn streaming_matches_single_batch_over_large_input() {
        let data: Vec<u8> = (0u8..=255).cycle().take(100_000).collect();
        let mut writer = DigestingWriter::new(NullWriter::new(), Crc32Digester::new());
        for chunk in data.chunks(977) {
            assert!(writer.write(chunk));
        }
        let expected = {
            let mut d = Crc32Digester::new();
            d.update(&data);
            d.digest()
        };
        assert_eq!(writer.digest(), expected);
        assert_eq!(writer.pos(), 100_000);
    }

    #[test]
    fn write_zeros_is_digested() {
        let mut writer = DigestingWriter::new(NullWriter::new(), Adler32Digester::new());
        assert!(writer.write_zeros(10));
        let expected = {
            let mut d = Adler32Digester::new();
            d.update(&[0; 10]);
            d.digest()
        };
        assert_eq!(writer.digest(), expected);
    }
}
