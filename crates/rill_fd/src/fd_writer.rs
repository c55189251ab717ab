// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fs::{File, OpenOptions};
use std::path::Path;

use rill::{BufferOptions, BufferedWriter, FlushType, Position, Reader, Sink, Status, Writer, WriterBase};
use tracing::debug;

use crate::fd_reader::FdReader;
use crate::sys;

/// Options for [`FdWriter`].
#[derive(Debug, Clone, Default)]
pub struct FdWriterOptions {
    assumed_filename: Option<String>,
    assumed_pos: Option<Position>,
    independent_pos: Option<Position>,
    append: bool,
    buffer: BufferOptions,
}

impl FdWriterOptions {
    /// Creates the default options: shared descriptor position, truncating
    /// create.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the filename used in failure messages.
    #[must_use]
    pub fn with_assumed_filename(mut self, filename: impl Into<String>) -> Self {
        self.assumed_filename = Some(filename.into());
        self
    }

    /// Declares the descriptor's current position without issuing any
    /// positioning syscalls. Disables random access.
    #[must_use]
    pub fn with_assumed_pos(mut self, pos: Position) -> Self {
        self.assumed_pos = Some(pos);
        self
    }

    /// Writes at explicit offsets (`pwrite`), leaving the descriptor's own
    /// position untouched. Requires a seekable descriptor.
    #[must_use]
    pub fn with_independent_pos(mut self, pos: Position) -> Self {
        self.independent_pos = Some(pos);
        self
    }

    /// Appends to the file instead of truncating it. Append mode writes
    /// wherever the file currently ends, so random access is disabled.
    #[must_use]
    pub fn with_append(mut self, append: bool) -> Self {
        self.append = append;
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
    Shared,
    Independent,
}

#[derive(Debug)]
pub(crate) struct FdSink {
    file: Option<File>,
    filename: String,
    mode: PosMode,
    random_access: bool,
    append: bool,
}

impl Sink for FdSink {
    fn write_internal(&mut self, src: &[u8], pos: Position) -> Result<(), Status> {
        let Some(file) = &self.file else {
            return Err(Status::internal("descriptor absent"));
        };
        let mut written = 0;
        while written < src.len() {
            let n = match self.mode {
                PosMode::Shared => sys::write(file, &src[written..]),
                PosMode::Independent => sys::pwrite(file, &src[written..], pos + written as Position),
            }
            .map_err(Status::os_error)?;
            if n == 0 {
                return Err(Status::internal("write returned 0 bytes"));
            }
            written += n;
        }
        Ok(())
    }

    fn flush_internal(&mut self, flush_type: FlushType, _pos: Position) -> Result<(), Status> {
        match flush_type {
            // Draining the buffer already moved everything into the OS.
            FlushType::FromObject | FlushType::FromProcess => Ok(()),
            FlushType::FromMachine => {
                let Some(file) = &self.file else {
                    return Err(Status::internal("descriptor absent"));
                };
                sys::datasync(file).map_err(Status::os_error)
            }
        }
    }

    fn supports_read_mode(&self) -> bool {
        self.random_access
    }

    fn read_mode_internal(&mut self, initial_pos: Position, buffer: &BufferOptions) -> Result<Box<dyn Reader>, Status> {
        let Some(file) = &self.file else {
            return Err(Status::internal("descriptor absent"));
        };
        let duplicate = file.try_clone().map_err(Status::os_error)?;
        // `fstat` rather than a seek: the duplicate shares its offset with
        // the writer's descriptor.
        let size = duplicate.metadata().map_err(Status::os_error)?.len();
        Ok(Box::new(FdReader::independent(
            duplicate,
            self.filename.clone(),
            initial_pos.min(size),
            Some(size),
            false,
            buffer.clone(),
        )))
    }

    fn supports_truncate(&self) -> bool {
        self.random_access
    }

    fn truncate_internal(&mut self, new_size: Position) -> Result<(), Status> {
        let Some(file) = &self.file else {
            return Err(Status::internal("descriptor absent"));
        };
        sys::truncate(file, new_size).map_err(Status::os_error)
    }

    fn annotate(&self, status: Status, pos: Position) -> Status {
        status.annotated(format!("writing {} at byte {pos}", self.filename))
    }
}

/// A writer over a file descriptor.
///
/// By default the descriptor's own position is used and the destination is
/// created or truncated. Supports append mode, explicit-offset writes
/// (`pwrite`), durability via [`FlushType::FromMachine`], truncation, and
/// re-exposing already-written bytes for reading through
/// [`read_mode()`][Writer::read_mode].
///
/// Failure messages carry `writing <filename> at byte <pos>`.
#[derive(Debug)]
pub struct FdWriter {
    inner: BufferedWriter<FdSink>,
}

impl FdWriter {
    /// Creates or truncates `path` for writing (appends instead when the
    /// options say so).
    ///
    /// The writer is returned in an already-failed state if the file cannot
    /// be opened; check [`ok()`][Writer::ok].
    #[must_use]
    pub fn create(path: impl AsRef<Path>, options: FdWriterOptions) -> Self {
        let filename = options
            .assumed_filename
            .clone()
            .unwrap_or_else(|| path.as_ref().display().to_string());
        let mut open_options = OpenOptions::new();
        open_options.write(true).create(true);
        if options.append {
            open_options.append(true);
        } else {
            open_options.truncate(true);
        }
        match open_options.open(path) {
            Ok(file) => Self::from_file_named(file, filename, options),
            Err(error) => {
                let status = Status::os_error(error).annotated(format!("opening {filename}"));
                Self::failed_with(filename, options, status)
            }
        }
    }

    /// Adopts an already-open descriptor.
    #[must_use]
    pub fn from_file(file: File, options: FdWriterOptions) -> Self {
        let filename = options
            .assumed_filename
            .clone()
            .unwrap_or_else(|| "<fd>".to_owned());
        Self::from_file_named(file, filename, options)
    }

    fn from_file_named(file: File, filename: String, options: FdWriterOptions) -> Self {
        if options.assumed_pos.is_some() && options.independent_pos.is_some() {
            return Self::failed_with(
                filename,
                options,
                Status::invalid_argument("assumed_pos and independent_pos are mutually exclusive"),
            );
        }

        let mut sink = FdSink {
            file: Some(file),
            filename,
            mode: PosMode::Shared,
            random_access: false,
            append: options.append,
        };

        let initial_pos = if options.append {
            // Appending writes land wherever the file currently ends.
            match sink.file.as_ref().map(sys::seek_end) {
                Some(Ok(end)) => end,
                _ => 0,
            }
        } else if let Some(assumed) = options.assumed_pos {
            assumed
        } else if let Some(independent) = options.independent_pos {
            sink.mode = PosMode::Independent;
            sink.random_access = true;
            independent
        } else {
            match sink.file.as_ref().map(sys::seek_current) {
                Some(Ok(current)) => {
                    sink.random_access = true;
                    current
                }
                Some(Err(error)) => {
                    debug!(filename = %sink.filename, %error, "descriptor is not seekable");
                    0
                }
                None => 0,
            }
        };

        Self {
            inner: BufferedWriter::with_start_pos(sink, options.buffer, initial_pos),
        }
    }

    fn failed_with(filename: String, options: FdWriterOptions, status: Status) -> Self {
        let sink = FdSink {
            file: None,
            filename,
            mode: PosMode::Shared,
            random_access: false,
            append: options.append,
        };
        Self {
            inner: BufferedWriter::failed(sink, options.buffer, status),
        }
    }

    /// The filename used in failure messages.
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.inner.sink().filename
    }

    pub(crate) fn sink_file(&self) -> Option<&File> {
        // Append-mode descriptors reject explicit-offset kernel copies.
        if self.inner.sink().append {
            return None;
        }
        self.inner.sink().file.as_ref()
    }

    pub(crate) fn independent_pos(&self) -> Option<Position> {
        (self.inner.sink().mode == PosMode::Independent).then(|| self.pos())
    }
}

impl Writer for FdWriter {
    fn base(&self) -> &WriterBase {
        self.inner.base()
    }

    fn base_mut(&mut self) -> &mut WriterBase {
        self.inner.base_mut()
    }

    fn push_slow(&mut self, min_length: usize, recommended_length: usize) -> bool {
        self.inner.push_slow(min_length, recommended_length)
    }

    fn write_slow(&mut self, src: &[u8]) -> bool {
        self.inner.write_slow(src)
    }

    fn flush(&mut self, flush_type: FlushType) -> bool {
        self.inner.flush(flush_type)
    }

    // The kernel copies out of whatever buffer it is handed; holding on to
    // shared byte sequences buys nothing here.
    fn prefers_copying(&self) -> bool {
        true
    }

    fn supports_truncate(&self) -> bool {
        self.inner.supports_truncate()
    }

    fn truncate(&mut self, new_size: Position) -> bool {
        self.inner.truncate(new_size)
    }

    fn supports_read_mode(&self) -> bool {
        self.inner.supports_read_mode()
    }

    fn read_mode(&mut self, initial_pos: Position) -> Option<Box<dyn Reader>> {
        self.inner.read_mode(initial_pos)
    }

    fn done(&mut self) {
        self.inner.done();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_reach_the_file_in_order() {
        let file = tempfile::NamedTempFile::new().expect("temp file");
        let mut writer = FdWriter::create(file.path(), FdWriterOptions::new());
        assert!(writer.ok(), "{:?}", writer.status());

        assert!(writer.write(b"hello "));
        assert!(writer.write_str("world"));
        assert!(writer.flush(FlushType::FromMachine));
        assert_eq!(std::fs::read(file.path()).expect("read back"), b"hello world");

        assert!(writer.write_zeros(4));
        assert!(writer.close());
        assert_eq!(std::fs::read(file.path()).expect("read back"), b"hello world\0\0\0\0");
    }

    #[test]
    fn append_mode_continues_at_the_end() {
        let file = tempfile::NamedTempFile::new().expect("temp file");
        std::fs::write(file.path(), b"start-").expect("seed file");

        let mut writer = FdWriter::create(file.path(), FdWriterOptions::new().with_append(true));
        assert_eq!(writer.pos(), 6);
        assert!(writer.write(b"end"));
        assert!(writer.close());
        assert_eq!(std::fs::read(file.path()).expect("read back"), b"start-end");
    }

    #[test]
    fn read_mode_reflects_written_bytes() {
        let file = tempfile::NamedTempFile::new().expect("temp file");
        let mut writer = FdWriter::create(file.path(), FdWriterOptions::new());
        assert!(writer.write(b"written then read"));
        assert!(writer.supports_read_mode());

        let mut reader = writer.read_mode(8).expect("read mode");
        let mut dest = [0; 9];
        assert_eq!(reader.read(&mut dest), 9);
        assert_eq!(&dest, b"then read");
        assert!(writer.write(b" and more"), "writer stays usable after read_mode");
        assert!(writer.close());
    }

    #[test]
    fn truncate_discards_the_tail() {
        let file = tempfile::NamedTempFile::new().expect("temp file");
        let mut writer = FdWriter::create(file.path(), FdWriterOptions::new());
        assert!(writer.write(b"0123456789"));
        assert!(writer.flush(FlushType::FromObject));
        assert!(writer.supports_truncate());
        assert!(writer.truncate(4));
        assert!(writer.close());
        assert_eq!(std::fs::read(file.path()).expect("read back"), b"0123");
    }

    #[test]
    fn independent_positions_interleave() {
        let file = tempfile::NamedTempFile::new().expect("temp file");
        std::fs::write(file.path(), b"..........").expect("seed file");

        let handle = OpenOptions::new().write(true).open(file.path()).expect("open");
        let mut writer = FdWriter::from_file(handle, FdWriterOptions::new().with_independent_pos(4));
        assert!(writer.write(b"AB"));
        assert!(writer.close());
        assert_eq!(std::fs::read(file.path()).expect("read back"), b"....AB....");
    }
}
