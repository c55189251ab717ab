// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fs::File;
use std::path::Path;

use rill::{BufferOptions, BufferedReader, Position, Reader, ReaderBase, Source, Status};
use tracing::debug;

use crate::fd_writer::FdWriter;
use crate::sys;

/// Options for [`FdReader`].
#[derive(Debug, Clone, Default)]
pub struct FdReaderOptions {
    assumed_filename: Option<String>,
    assumed_pos: Option<Position>,
    independent_pos: Option<Position>,
    growing_source: bool,
    buffer: BufferOptions,
}

impl FdReaderOptions {
    /// Creates the default options: shared descriptor position, probed
    /// random access, non-growing source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the filename used in failure messages, for descriptors
    /// adopted rather than opened.
    #[must_use]
    pub fn with_assumed_filename(mut self, filename: impl Into<String>) -> Self {
        self.assumed_filename = Some(filename.into());
        self
    }

    /// Declares the descriptor's current position without issuing any
    /// positioning syscalls. Disables random access. Mutually exclusive with
    /// [`with_independent_pos()`][Self::with_independent_pos].
    #[must_use]
    pub fn with_assumed_pos(mut self, pos: Position) -> Self {
        self.assumed_pos = Some(pos);
        self
    }

    /// Reads at explicit offsets (`pread`), leaving the descriptor's own
    /// position untouched. Requires a seekable descriptor; enables random
    /// access and sharing the descriptor with other users.
    #[must_use]
    pub fn with_independent_pos(mut self, pos: Position) -> Self {
        self.independent_pos = Some(pos);
        self
    }

    /// Declares that the file may keep growing: end-of-file is treated as a
    /// temporary condition and the size is never cached.
    #[must_use]
    pub fn with_growing_source(mut self, growing: bool) -> Self {
        self.growing_source = growing;
        self
    }

    /// Sets the buffer sizing policy.
    #[must_use]
    pub fn with_buffer_options(mut self, buffer: BufferOptions) -> Self {
        self.buffer = buffer;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PosMode {
    /// Plain `read`; this stream must be the descriptor's only user.
    Shared,
    /// `pread` at explicit offsets derived from the stream position.
    Independent,
}

/// The [`Source`] half of [`FdReader`], shared with [`FdWriter`]'s read
/// mode.
#[derive(Debug)]
pub(crate) struct FdSource {
    file: Option<File>,
    filename: String,
    mode: PosMode,
    random_access: bool,
    growing_source: bool,
    exact_size: Option<Position>,
    pending: Option<Status>,
}

impl FdSource {
    fn read_once(&mut self, dest: &mut [u8], pos: Position) -> usize {
        let Some(file) = &self.file else {
            self.pending = Some(Status::internal("descriptor absent"));
            return 0;
        };
        let result = match self.mode {
            PosMode::Shared => sys::read(file, dest),
            PosMode::Independent => sys::pread(file, dest, pos),
        };
        match result {
            Ok(n) => n,
            Err(error) => {
                self.pending = Some(Status::os_error(error));
                0
            }
        }
    }
}

impl Source for FdSource {
    fn read_internal(&mut self, min_length: usize, max_length: usize, pos: Position, dest: &mut [u8]) -> usize {
        debug_assert!(min_length <= max_length && max_length <= dest.len());
        let mut filled = 0;
        while filled < min_length {
            let n = self.read_once(&mut dest[filled..max_length], pos + filled as Position);
            if n == 0 {
                break;
            }
            filled += n;
        }
        filled
    }

    fn take_status(&mut self) -> Option<Status> {
        self.pending.take()
    }

    fn exact_size(&self) -> Option<Position> {
        self.exact_size
    }

    fn supports_random_access(&self) -> bool {
        self.random_access
    }

    fn supports_new_reader(&self) -> bool {
        self.random_access
    }

    fn tolerates_reading_ahead(&self) -> bool {
        self.random_access && !self.growing_source
    }

    fn seek_source(&mut self, new_pos: Position) -> Result<Position, Status> {
        let Some(file) = &self.file else {
            return Err(Status::internal("descriptor absent"));
        };
        // Growing files may have gained bytes since the size was last seen.
        let size = match self.exact_size {
            Some(size) if !self.growing_source => size,
            // `fstat` rather than a seek: a duplicated descriptor shares its
            // offset with the original, which must not be disturbed.
            _ => file.metadata().map_err(Status::os_error)?.len(),
        };
        let target = new_pos.min(size);
        if self.mode == PosMode::Shared {
            sys::seek_set(file, target).map_err(Status::os_error)?;
        }
        Ok(target)
    }

    fn size(&mut self) -> Result<Position, Status> {
        if let Some(size) = self.exact_size {
            return Ok(size);
        }
        let Some(file) = &self.file else {
            return Err(Status::internal("descriptor absent"));
        };
        file.metadata().map(|metadata| metadata.len()).map_err(Status::os_error)
    }

    fn new_source_reader(&mut self, initial_pos: Position, buffer: &BufferOptions) -> Result<Box<dyn Reader>, Status> {
        let Some(file) = &self.file else {
            return Err(Status::internal("descriptor absent"));
        };
        let duplicate = file.try_clone().map_err(Status::os_error)?;
        Ok(Box::new(FdReader::independent(
            duplicate,
            self.filename.clone(),
            initial_pos,
            self.exact_size,
            self.growing_source,
            buffer.clone(),
        )))
    }

    fn set_read_all_hint(&mut self, hint: bool) {
        if let Some(file) = &self.file {
            sys::advise_sequential(file, hint);
        }
    }

    fn annotate(&self, status: Status, pos: Position) -> Status {
        status.annotated(format!("reading {} at byte {pos}", self.filename))
    }
}

/// A reader over a file descriptor.
///
/// By default the descriptor's own position is used (`read`), random access
/// is probed with a seek at construction, and the file size is learned from
/// the probe for non-growing sources. With
/// [`with_independent_pos()`][FdReaderOptions::with_independent_pos] every
/// read names its own offset (`pread`), so several readers can share one
/// descriptor.
///
/// Failure messages carry `reading <filename> at byte <pos>`.
#[derive(Debug)]
pub struct FdReader {
    inner: BufferedReader<FdSource>,
}

impl FdReader {
    /// Opens `path` for reading.
    ///
    /// The reader is returned in an already-failed state if the file cannot
    /// be opened; check [`ok()`][Reader::ok].
    #[must_use]
    pub fn open(path: impl AsRef<Path>, options: FdReaderOptions) -> Self {
        let filename = options
            .assumed_filename
            .clone()
            .unwrap_or_else(|| path.as_ref().display().to_string());
        match File::open(path) {
            Ok(file) => Self::from_file_named(file, filename, options),
            Err(error) => {
                let status = Status::os_error(error).annotated(format!("opening {filename}"));
                Self::failed_with(filename, options, status)
            }
        }
    }

    /// Adopts an already-open descriptor.
    #[must_use]
    pub fn from_file(file: File, options: FdReaderOptions) -> Self {
        let filename = options
            .assumed_filename
            .clone()
            .unwrap_or_else(|| "<fd>".to_owned());
        Self::from_file_named(file, filename, options)
    }

    fn from_file_named(file: File, filename: String, options: FdReaderOptions) -> Self {
        if options.assumed_pos.is_some() && options.independent_pos.is_some() {
            return Self::failed_with(
                filename,
                options,
                Status::invalid_argument("assumed_pos and independent_pos are mutually exclusive"),
            );
        }

        let mut source = FdSource {
            file: Some(file),
            filename,
            mode: PosMode::Shared,
            random_access: false,
            growing_source: options.growing_source,
            exact_size: None,
            pending: None,
        };

        let initial_pos = if let Some(assumed) = options.assumed_pos {
            // The caller vouches for the position; no positioning syscalls.
            assumed
        } else if let Some(independent) = options.independent_pos {
            source.mode = PosMode::Independent;
            source.random_access = true;
            independent
        } else {
            match Self::probe(&mut source) {
                Ok(pos) => pos,
                Err(status) => return Self::failed_with(source.filename, options, status),
            }
        };

        Self {
            inner: BufferedReader::with_start_pos(source, options.buffer, initial_pos),
        }
    }

    /// Probes seekability and size with `lseek`, per the shared-position
    /// initialization rules. Returns the stream's starting position.
    fn probe(source: &mut FdSource) -> Result<Position, Status> {
        let file = source.file.as_ref().expect("descriptor present during initialization");
        let current = match sys::seek_current(file) {
            Ok(current) => current,
            Err(error) => {
                debug!(
                    filename = %source.filename,
                    %error,
                    "descriptor is not seekable; random access disabled",
                );
                return Ok(0);
            }
        };
        let Ok(size) = sys::seek_end(file) else {
            debug!(filename = %source.filename, "seek to end failed; random access disabled");
            return Ok(current);
        };
        sys::seek_set(file, current).map_err(Status::os_error)?;

        // Zero-sized non-regular files (character devices, most of /proc)
        // report a seekable descriptor but cannot honor positioned reads.
        let regular = file.metadata().map(|m| m.is_file()).unwrap_or(false);
        if size == 0 && !regular {
            debug!(filename = %source.filename, "non-regular empty file; random access disabled");
            return Ok(current);
        }
        // Files under /sys often mis-report seekability and then fail on
        // read.
        if source.filename.starts_with("/sys/") {
            debug!(filename = %source.filename, "/sys file; random access disabled");
            return Ok(current);
        }

        source.random_access = true;
        if !source.growing_source {
            source.exact_size = Some(size);
        }
        Ok(current)
    }

    /// Internal constructor for independent-position readers created by
    /// `new_reader` and `FdWriter::read_mode`.
    pub(crate) fn independent(
        file: File,
        filename: String,
        initial_pos: Position,
        exact_size: Option<Position>,
        growing_source: bool,
        buffer: BufferOptions,
    ) -> Self {
        let source = FdSource {
            file: Some(file),
            filename,
            mode: PosMode::Independent,
            random_access: true,
            growing_source,
            exact_size,
            pending: None,
        };
        Self {
            inner: BufferedReader::with_start_pos(source, buffer, initial_pos),
        }
    }

    fn failed_with(filename: String, options: FdReaderOptions, status: Status) -> Self {
        let source = FdSource {
            file: None,
            filename,
            mode: PosMode::Shared,
            random_access: false,
            growing_source: options.growing_source,
            exact_size: None,
            pending: None,
        };
        Self {
            inner: BufferedReader::failed(source, options.buffer, status),
        }
    }

    /// The filename used in failure messages.
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.inner.source().filename
    }

    /// Transfers `length` bytes to an [`FdWriter`], copying kernel-to-kernel
    /// where the platform allows and falling back to the generic buffered
    /// copy on any refusal.
    ///
    /// Returns `true` when the full length was transferred; a shortfall with
    /// both streams healthy means the source ended early.
    pub fn copy_to_fd(&mut self, mut length: u64, dest: &mut FdWriter) -> bool {
        use rill::{FlushType, Writer as _};

        if !self.ok() || !dest.ok() {
            return false;
        }

        // Bytes already buffered in userspace go through the regular path.
        let buffered = (self.available() as u64).min(length);
        if buffered > 0 {
            if !self.copy_to(buffered, &mut *dest) {
                return false;
            }
            length -= buffered;
        }
        if length == 0 {
            return true;
        }

        // The kernel copies from the descriptor's position, so the sink's
        // buffer must be on disk first and both positions in sync.
        if !dest.flush(FlushType::FromObject) {
            return false;
        }
        while length > 0 {
            let (Some(src_file), Some(dest_file)) = (self.inner.source().file.as_ref(), dest.sink_file()) else {
                break;
            };
            let src_pos = (self.inner.source().mode == PosMode::Independent).then(|| self.pos());
            let dest_pos = dest.independent_pos();
            let len = usize::try_from(length).unwrap_or(usize::MAX);
            match sys::copy_file_range(src_file, src_pos, dest_file, dest_pos, len) {
                Ok(0) => return false,
                Ok(n) => {
                    let pos = self.pos() + n as Position;
                    self.inner.base_mut().clear_window_at(pos);
                    dest.base_mut().advance_start_pos(n as Position);
                    length -= n as u64;
                }
                Err(error) => {
                    debug!(%error, "copy_file_range refused; falling back to buffered copy");
                    break;
                }
            }
        }
        if length == 0 {
            return true;
        }
        self.copy_to(length, dest)
    }
}

impl Reader for FdReader {
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
