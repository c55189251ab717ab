// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;

use rill::{Position, Reader, ReaderBase, Status};

use crate::digester::Digester;

/// A reader that feeds every byte it relays through a [`Digester`].
///
/// The buffer window is shared with the inner reader, so fast-path reads
/// cost the same as reading the inner stream directly; the consumed span is
/// absorbed into the digester at each buffer crossing. Bytes are digested
/// exactly once, in stream order, including zero-copy
/// [`read_bytes()`][Reader::read_bytes] slices.
///
/// Random access is not offered: a digest is defined over the bytes in
/// transit order, so the stream only moves forward (skips read through the
/// digester). [`digest()`][Self::digest] may be called at any point,
/// including after [`close()`][Reader::close], and reflects exactly the
/// bytes consumed so far. An inner failure does not taint the digest of the
/// bytes that made it through.
pub struct DigestingReader<R: Reader, D: Digester> {
    base: ReaderBase,
    inner: R,
    digester: D,
    // High-water mark: the absolute position up to which bytes have been
    // absorbed. Re-reading below it (an in-window rewind) does not digest
    // the same bytes twice.
    digested_pos: Position,
}

impl<R: Reader, D: Digester> DigestingReader<R, D> {
    /// Wraps `inner`, digesting everything read through the wrapper into
    /// `digester`.
    #[must_use]
    pub fn new(inner: R, digester: D) -> Self {
        let digested_pos = inner.pos();
        let mut this = Self {
            base: ReaderBase::new(),
            inner,
            digester,
            digested_pos,
        };
        this.make_buffer();
        this
    }

    /// The digest of every byte consumed so far.
    pub fn digest(&mut self) -> D::Digest {
        self.absorb_consumed();
        self.digester.digest()
    }

    /// Consumes the wrapper, returning the inner reader.
    #[must_use]
    pub fn into_inner(mut self) -> R {
        self.sync_buffer();
        self.inner
    }

    fn absorb_consumed(&mut self) {
        let pos = self.base.pos();
        if pos > self.digested_pos {
            let from = usize::try_from(self.digested_pos - self.base.start_pos()).unwrap_or(usize::MAX);
            self.digester.update(&self.base.window()[from..self.base.cursor()]);
            self.digested_pos = pos;
        }
    }

    fn sync_buffer(&mut self) {
        self.absorb_consumed();
        self.inner.base_mut().set_cursor(self.base.cursor());
    }

    fn make_buffer(&mut self) {
        let inner_base = self.inner.base();
        let window = inner_base.window().clone();
        let cursor = inner_base.cursor();
        let start_pos = inner_base.start_pos();
        self.base.set_window(start_pos, window, cursor);
        self.digested_pos = self.digested_pos.max(start_pos);
    }

    fn inherit_failure(&mut self) -> bool {
        if let Some(status) = self.inner.status() {
            return self.base.stream_mut().fail(status.clone());
        }
        true
    }
}

impl<R: Reader, D: Digester> Reader for DigestingReader<R, D> {
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
        self.make_buffer();
        pulled
    }

    fn seek_behind_buffer(&mut self, new_pos: Position) -> bool {
        if !self.base.stream().ok() {
            return false;
        }
        if new_pos < self.base.pos() {
            return self
                .base
                .stream_mut()
                .fail(Status::unimplemented("digesting reader does not support seeking backwards"));
        }
        // Read forward through the digester so the skipped bytes count.
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

    fn size(&mut self) -> Result<Position, Status> {
        self.inner.size()
    }

    fn supports_random_access(&self) -> bool {
        false
    }

    fn supports_rewind(&self) -> bool {
        false
    }

    fn tolerates_reading_ahead(&self) -> bool {
        self.inner.tolerates_reading_ahead()
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

impl<R: Reader, D: Digester> fmt::Debug for DigestingReader<R, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestingReader")
            .field("pos", &self.base.pos())
            .field("digested_pos", &self.digested_pos)
            .finish_non_exhaustive()
    }
}
