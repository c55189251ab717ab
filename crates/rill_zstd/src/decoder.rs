// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::sync::LazyLock;

use recycling_pool::{Recycled, RecyclingPool};
use rill::{BufferOptions, BufferedReader, Position, Reader, ReaderBase, Source, Status};
use tracing::trace;
use zstd_safe::{DCtx, DParameter, InBuffer, OutBuffer, ResetDirective, get_error_name};

use crate::dictionary::DecoderDictionary;

/// Shortest prefix from which the frame header size can be determined.
const FRAME_HEADER_SIZE_PREFIX: usize = 5;

/// Longest possible frame header.
const FRAME_HEADER_SIZE_MAX: usize = 18;

/// Largest window the decoder accepts, bounding its memory use.
const MAX_WINDOW_LOG: u32 = if usize::BITS == 32 { 30 } else { 31 };

/// Decompression contexts are expensive to construct and most streams are
/// short, so they are pooled for the whole process. A context goes back to
/// the pool only after a full session-and-parameters reset.
static DCTX_POOL: LazyLock<RecyclingPool<DCtx<'static>>> = LazyLock::new(RecyclingPool::default);

fn recycle_dctx(ctx: &mut DCtx<'static>) -> bool {
    ctx.reset(ResetDirective::SessionAndParameters).is_ok()
}

fn zstd_error(call: &str, code: zstd_safe::ErrorCode) -> Status {
    Status::internal(format!("{call} failed: {}", get_error_name(code)))
}

/// Options for [`ZstdDecoder`].
#[derive(Debug, Clone, Default)]
pub struct ZstdOptions {
    growing_source: bool,
    dictionary: Option<DecoderDictionary>,
    buffer: BufferOptions,
}

impl ZstdOptions {
    /// Creates the default options: complete source, no dictionary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares that the compressed source may still be growing: running out
    /// of compressed bytes mid-frame is not an error, and reading again
    /// later may succeed once more bytes arrive.
    #[must_use]
    pub fn with_growing_source(mut self, growing: bool) -> Self {
        self.growing_source = growing;
        self
    }

    /// Attaches a prepared decompression dictionary.
    #[must_use]
    pub fn with_dictionary(mut self, dictionary: DecoderDictionary) -> Self {
        self.dictionary = Some(dictionary);
        self
    }

    /// Sets the buffer sizing policy for decompressed bytes.
    #[must_use]
    pub fn with_buffer_options(mut self, buffer: BufferOptions) -> Self {
        self.buffer = buffer;
        self
    }
}

/// The [`Source`] half of [`ZstdDecoder`].
pub struct ZstdSource<R: Reader> {
    src: R,
    ctx: Option<Recycled<'static, DCtx<'static>>>,
    dictionary: Option<DecoderDictionary>,
    growing_source: bool,
    initial_compressed_pos: Position,
    exact_size: Option<Position>,
    just_initialized: bool,
    truncated: bool,
    pending: Option<Status>,
}

impl<R: Reader> ZstdSource<R> {
    fn init_decompressor(&mut self) -> Result<(), Status> {
        let mut ctx = DCTX_POOL.try_get(
            (),
            || DCtx::try_create().ok_or_else(|| Status::internal("ZSTD_createDCtx() failed")),
            recycle_dctx,
        )?;
        ctx.set_parameter(DParameter::WindowLogMax(MAX_WINDOW_LOG))
            .map_err(|code| zstd_error("ZSTD_DCtx_setParameter()", code))?;
        if let Some(dictionary) = &self.dictionary
            && !dictionary.is_empty()
        {
            ctx.load_dictionary(dictionary.as_bytes())
                .map_err(|code| zstd_error("ZSTD_DCtx_loadDictionary()", code))?;
        }
        self.ctx = Some(ctx);
        self.just_initialized = true;
        self.truncated = false;
        Ok(())
    }

    /// Learns the uncompressed size from the frame header, without consuming
    /// compressed bytes. A skippable frame reports size 0; an unreadable or
    /// size-less header leaves the size unknown.
    fn probe_size(&mut self) {
        if !self.src.pull_recommended(FRAME_HEADER_SIZE_PREFIX, FRAME_HEADER_SIZE_MAX) {
            return;
        }
        match zstd_safe::get_frame_content_size(self.src.chunk()) {
            Ok(Some(size)) => self.exact_size = Some(size),
            Ok(None) => trace!("frame header declares no content size"),
            Err(_) => trace!("frame header not yet parseable"),
        }
    }
}

impl<R: Reader> Source for ZstdSource<R> {
    fn read_internal(&mut self, min_length: usize, max_length: usize, _pos: Position, dest: &mut [u8]) -> usize {
        debug_assert!(max_length <= dest.len());
        if self.ctx.is_none() {
            // The frame ended earlier; there is nothing left to produce.
            return 0;
        }
        // A fresh attempt may find the bytes a previous one ran out of.
        self.truncated = false;
        // A growing source may by now have revealed the frame header that
        // was incomplete at construction.
        if self.just_initialized && self.exact_size.is_none() {
            self.probe_size();
        }

        let mut stable = false;
        if self.just_initialized
            && !self.growing_source
            && let Some(exact) = self.exact_size
            && max_length as Position >= exact
        {
            // The caller's buffer holds the whole frame: promise the stable
            // output buffer so the decoder writes into it directly, and
            // deliver everything in one call.
            stable = self
                .ctx
                .as_mut()
                .is_some_and(|ctx| ctx.set_parameter(DParameter::StableOutBuffer(true)).is_ok());
        }
        self.just_initialized = false;
        let effective_min = if stable { usize::MAX } else { min_length };

        let mut produced = 0;
        loop {
            let (result, consumed, out_pos) = {
                let Some(ctx) = self.ctx.as_mut() else {
                    return produced;
                };
                let mut output = OutBuffer::around_pos(&mut dest[..max_length], produced);
                let mut input = InBuffer::around(self.src.chunk());
                let result = ctx.decompress_stream(&mut output, &mut input);
                (result, input.pos, output.pos())
            };
            self.src.advance(consumed);
            produced = out_pos;

            match result {
                Ok(0) => {
                    // End of frame: the context goes back to the pool.
                    self.ctx = None;
                    return produced;
                }
                // The promised buffer holds the whole declared frame, yet
                // the frame keeps producing: its content size field lied,
                // and the stable output buffer cannot grow.
                _ if stable && produced == max_length => {
                    self.ctx = None;
                    self.pending = Some(Status::resource_exhausted(
                        "Zstd frame exceeds its declared uncompressed size",
                    ));
                    return produced;
                }
                Err(code) => {
                    self.ctx = None;
                    self.pending = Some(Status::invalid_argument(format!(
                        "ZSTD_decompressStream() failed: {}",
                        get_error_name(code),
                    )));
                    return produced;
                }
                Ok(_) => {}
            }
            if produced >= effective_min || produced == max_length {
                return produced;
            }
            if self.src.available() == 0 && !self.src.pull_recommended(1, DCtx::in_size()) {
                if !self.src.ok() {
                    self.pending = self.src.status().cloned();
                } else if self.growing_source {
                    // More compressed bytes may arrive later; report what we
                    // have and keep the session alive.
                    self.truncated = true;
                } else {
                    self.pending = Some(Status::invalid_argument("Truncated Zstd-compressed stream"));
                }
                return produced;
            }
        }
    }

    fn take_status(&mut self) -> Option<Status> {
        self.pending.take()
    }

    fn exhausted(&self) -> bool {
        self.ctx.is_none()
    }

    fn exact_size(&self) -> Option<Position> {
        self.exact_size
    }

    fn supports_random_access(&self) -> bool {
        false
    }

    fn supports_rewind(&self) -> bool {
        self.src.supports_rewind()
    }

    fn supports_new_reader(&self) -> bool {
        self.src.supports_new_reader()
    }

    fn tolerates_reading_ahead(&self) -> bool {
        self.src.tolerates_reading_ahead()
    }

    fn seek_source(&mut self, _new_pos: Position) -> Result<Position, Status> {
        // Rewinding means starting the frame over: re-seek the compressed
        // source and rebuild the decompression session. The wrapper then
        // discards forward to the requested uncompressed position.
        if !self.src.seek(self.initial_compressed_pos) {
            return Err(self
                .src
                .status()
                .cloned()
                .unwrap_or_else(|| Status::data_loss("compressed source lost its rewind position")));
        }
        self.ctx = None;
        self.init_decompressor()?;
        Ok(0)
    }

    fn size(&mut self) -> Result<Position, Status> {
        // Reached only when the frame header did not declare a size.
        Err(Status::unimplemented("Zstd-compressed stream size is unknown"))
    }

    fn new_source_reader(&mut self, initial_pos: Position, buffer: &BufferOptions) -> Result<Box<dyn Reader>, Status> {
        let Some(src_reader) = self.src.new_reader(self.initial_compressed_pos) else {
            return Err(self
                .src
                .status()
                .cloned()
                .unwrap_or_else(|| Status::internal("compressed source refused an independent reader")));
        };
        let options = ZstdOptions {
            growing_source: self.growing_source,
            dictionary: self.dictionary.clone(),
            buffer: buffer.clone(),
        };
        let mut decoder = ZstdDecoder::new(src_reader, options);
        let _ = decoder.seek(initial_pos);
        Ok(Box::new(decoder))
    }

    fn annotate(&self, status: Status, pos: Position) -> Status {
        status.annotated(format!("at uncompressed byte {pos}"))
    }

    fn done(&mut self, _pos: Position) -> Result<(), Status> {
        self.ctx = None;
        Ok(())
    }
}

impl<R: Reader> fmt::Debug for ZstdSource<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZstdSource")
            .field("has_context", &self.ctx.is_some())
            .field("growing_source", &self.growing_source)
            .field("initial_compressed_pos", &self.initial_compressed_pos)
            .field("exact_size", &self.exact_size)
            .field("truncated", &self.truncated)
            .finish_non_exhaustive()
    }
}

/// A reader decompressing a Zstandard frame from another reader.
///
/// The uncompressed size is learned from the frame header when the header
/// declares one (skippable frames report 0), in which case
/// [`size()`][Reader::size] answers without decompressing. Rewinding is
/// supported when the compressed source can rewind, by re-reading the frame
/// from its first compressed byte. When the source supports independent
/// readers, so does the decoder.
///
/// Failure statuses carry `at uncompressed byte <pos>` context on top of
/// whatever the compressed source reports.
pub struct ZstdDecoder<R: Reader> {
    inner: BufferedReader<ZstdSource<R>>,
}

impl<R: Reader> ZstdDecoder<R> {
    /// Creates a decoder reading compressed bytes from `src`, starting at
    /// the frame whose first byte is at the source's current position.
    #[must_use]
    pub fn new(src: R, options: ZstdOptions) -> Self {
        let initial_compressed_pos = src.pos();
        let mut source = ZstdSource {
            src,
            ctx: None,
            dictionary: options.dictionary,
            growing_source: options.growing_source,
            initial_compressed_pos,
            exact_size: None,
            just_initialized: false,
            truncated: false,
            pending: None,
        };
        match source.init_decompressor() {
            Ok(()) => {
                source.probe_size();
                Self {
                    inner: BufferedReader::new(source, options.buffer),
                }
            }
            Err(status) => Self {
                inner: BufferedReader::failed(source, options.buffer, status),
            },
        }
    }

    /// The compressed source.
    #[must_use]
    pub fn src(&self) -> &R {
        &self.inner.source().src
    }

    /// Whether the last read stopped mid-frame because a growing source has
    /// not provided the rest of the compressed bytes yet.
    #[must_use]
    pub fn is_truncated(&self) -> bool {
        self.inner.source().truncated
    }
}

impl<R: Reader> Reader for ZstdDecoder<R> {
    fn base(&self) -> &ReaderBase {
        self.inner.base()
    }

    fn base_mut(&mut self) -> &mut ReaderBase {
        self.inner.base_mut()
    }

    fn pull_slow(&mut self, min_length: usize, recommended_length: usize) -> bool {
        self.inner.pull_slow(min_length, recommended_length)
    }

    fn read_slow(&mut self, dest: &mut [u8]) -> usize {
        self.inner.read_slow(dest)
    }

    fn seek_behind_buffer(&mut self, new_pos: Position) -> bool {
        self.inner.seek_behind_buffer(new_pos)
    }

    fn size(&mut self) -> Result<Position, Status> {
        self.inner.size()
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
        self.inner.new_reader(initial_pos)
    }

    fn set_read_all_hint(&mut self, hint: bool) {
        self.inner.set_read_all_hint(hint);
    }

    fn done(&mut self) {
        self.inner.done();
    }
}

impl<R: Reader> fmt::Debug for ZstdDecoder<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZstdDecoder").field("inner", self.inner.source()).finish()
    }
}
