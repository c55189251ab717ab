// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::status::Position;

/// Default lower bound for internal buffer sizes.
pub const DEFAULT_MIN_BUFFER_SIZE: usize = 4 << 10;

/// Default upper bound for internal buffer sizes.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 64 << 10;

/// Buffer sizing policy shared by buffered readers and writers.
///
/// Buffers start near `min_buffer_size` and grow geometrically towards
/// `max_buffer_size` as a stream is consumed sequentially, so short streams
/// stay cheap and long scans amortize their slow-path calls. A `size_hint`
/// caps speculative growth when the total stream length is known up front.
#[derive(Debug, Clone)]
pub struct BufferOptions {
    min_buffer_size: usize,
    max_buffer_size: usize,
    size_hint: Option<Position>,
}

impl BufferOptions {
    /// Creates the default policy.
    #[must_use]
    pub fn new() -> Self {
        Self {
            min_buffer_size: DEFAULT_MIN_BUFFER_SIZE,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            size_hint: None,
        }
    }

    /// Sets the smallest buffer the stream will allocate.
    #[must_use]
    pub fn with_min_buffer_size(mut self, size: usize) -> Self {
        self.min_buffer_size = size.max(1);
        self
    }

    /// Sets the largest buffer the stream will allocate.
    #[must_use]
    pub fn with_max_buffer_size(mut self, size: usize) -> Self {
        self.max_buffer_size = size.max(1);
        self
    }

    /// Declares the expected total size of the stream.
    #[must_use]
    pub fn with_size_hint(mut self, size_hint: Option<Position>) -> Self {
        self.size_hint = size_hint;
        self
    }

    /// The smallest buffer the stream will allocate.
    #[must_use]
    pub fn min_buffer_size(&self) -> usize {
        self.min_buffer_size
    }

    /// The largest buffer the stream will allocate.
    #[must_use]
    pub fn max_buffer_size(&self) -> usize {
        self.max_buffer_size.max(self.min_buffer_size)
    }

    /// The declared expected total size, if any.
    #[must_use]
    pub fn size_hint(&self) -> Option<Position> {
        self.size_hint
    }
}

impl Default for BufferOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Chooses read buffer lengths for a buffered reader.
///
/// Tracks how far the current sequential run has progressed and doubles the
/// buffer length for each refill within the run, clamped to the policy
/// bounds. Learning the exact remaining size (from a frame header or a file
/// size) caps further growth at what is actually left to read.
#[derive(Debug)]
pub struct ReadBufferSizer {
    options: BufferOptions,
    exact_size: Option<Position>,
    read_all_hint: bool,
    base_pos: Position,
    next_length: usize,
}

impl ReadBufferSizer {
    /// Creates a sizer with a sequential run starting at `pos`.
    #[must_use]
    pub fn new(options: BufferOptions, pos: Position) -> Self {
        let next_length = options.min_buffer_size();
        Self {
            options,
            exact_size: None,
            read_all_hint: false,
            base_pos: pos,
            next_length,
        }
    }

    /// The sizing policy, for sharing with a sibling stream.
    #[must_use]
    pub fn options(&self) -> &BufferOptions {
        &self.options
    }

    /// Restarts the sequential run at `pos`, resetting growth. Called after
    /// a seek or any other discontinuity.
    pub fn begin_run(&mut self, pos: Position) {
        self.base_pos = pos;
        self.next_length = self.options.min_buffer_size();
    }

    /// Records the total stream size once it is known, `None` to clear.
    pub fn set_exact_size(&mut self, exact_size: Option<Position>) {
        self.exact_size = exact_size;
    }

    /// The recorded total stream size.
    #[must_use]
    pub fn exact_size(&self) -> Option<Position> {
        self.exact_size
    }

    /// Declares whether the caller intends to read the stream to the end.
    pub fn set_read_all_hint(&mut self, hint: bool) {
        self.read_all_hint = hint;
    }

    /// Picks the buffer length for the next refill at `pos`, never less than
    /// `min_length` and at least `recommended_length` when growth allows.
    #[must_use]
    pub fn buffer_length(&mut self, pos: Position, min_length: usize, recommended_length: usize) -> usize {
        let mut length = self.next_length.max(self.options.min_buffer_size());

        // Reading all of a stream of known size wants one right-sized buffer
        // rather than a growth ramp.
        if self.read_all_hint
            && let Some(exact) = self.exact_size
        {
            let remaining = usize::try_from(exact.saturating_sub(pos)).unwrap_or(usize::MAX);
            length = length.max(remaining);
        }

        if let Some(hint) = self.options.size_hint() {
            let remaining = usize::try_from(hint.saturating_sub(pos)).unwrap_or(usize::MAX);
            if remaining > 0 {
                length = length.min(remaining.max(self.options.min_buffer_size()));
            }
        }
        if let Some(exact) = self.exact_size {
            let remaining = usize::try_from(exact.saturating_sub(pos)).unwrap_or(usize::MAX);
            if remaining > 0 {
                length = length.min(remaining);
            }
        }

        length = length.clamp(self.options.min_buffer_size(), self.options.max_buffer_size());
        self.next_length = length.saturating_mul(2).min(self.options.max_buffer_size());
        length.max(min_length).max(recommended_length.min(self.options.max_buffer_size()))
    }
}

/// Chooses write buffer lengths for a buffered writer.
///
/// Same growth shape as [`ReadBufferSizer`] without the read-side hints.
#[derive(Debug)]
pub struct WriteBufferSizer {
    options: BufferOptions,
    next_length: usize,
}

impl WriteBufferSizer {
    /// Creates a sizer from the policy.
    #[must_use]
    pub fn new(options: BufferOptions) -> Self {
        let next_length = options.min_buffer_size();
        Self { options, next_length }
    }

    /// The sizing policy, for sharing with a sibling stream.
    #[must_use]
    pub fn options(&self) -> &BufferOptions {
        &self.options
    }

    /// Picks the buffer length for the next push at `pos`.
    #[must_use]
    pub fn buffer_length(&mut self, pos: Position, min_length: usize, recommended_length: usize) -> usize {
        let mut length = self.next_length.max(self.options.min_buffer_size());
        if let Some(hint) = self.options.size_hint() {
            let remaining = usize::try_from(hint.saturating_sub(pos)).unwrap_or(usize::MAX);
            if remaining > 0 {
                length = length.min(remaining.max(self.options.min_buffer_size()));
            }
        }
        length = length.clamp(self.options.min_buffer_size(), self.options.max_buffer_size());
        self.next_length = length.saturating_mul(2).min(self.options.max_buffer_size());
        length.max(min_length).max(recommended_length.min(self.options.max_buffer_size()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_geometrically_within_bounds() {
        let options = BufferOptions::new().with_min_buffer_size(1024).with_max_buffer_size(8192);
        let mut sizer = ReadBufferSizer::new(options, 0);

        assert_eq!(sizer.buffer_length(0, 1, 1), 1024);
        assert_eq!(sizer.buffer_length(1024, 1, 1), 2048);
        assert_eq!(sizer.buffer_length(3072, 1, 1), 4096);
        assert_eq!(sizer.buffer_length(7168, 1, 1), 8192);
        assert_eq!(sizer.buffer_length(15360, 1, 1), 8192);
    }

    #[test]
    fn seek_resets_growth() {
        let options = BufferOptions::new().with_min_buffer_size(1024).with_max_buffer_size(8192);
        let mut sizer = ReadBufferSizer::new(options, 0);
        let _ = sizer.buffer_length(0, 1, 1);
        let _ = sizer.buffer_length(1024, 1, 1);
        sizer.begin_run(0);
        assert_eq!(sizer.buffer_length(0, 1, 1), 1024);
    }

    #[test]
    fn exact_size_caps_the_buffer() {
        let options = BufferOptions::new().with_min_buffer_size(1024).with_max_buffer_size(1 << 20);
        let mut sizer = ReadBufferSizer::new(options, 0);
        sizer.set_exact_size(Some(1500));
        let first = sizer.buffer_length(0, 1, 1);
        assert!(first <= 1500, "known size must cap the buffer, got {first}");
        // Close to the known end the cap tracks the remainder.
        assert_eq!(sizer.buffer_length(300, 1, 1), 1200);
    }

    #[test]
    fn read_all_hint_requests_the_remainder_at_once() {
        let options = BufferOptions::new().with_min_buffer_size(1024).with_max_buffer_size(64 << 10);
        let mut sizer = ReadBufferSizer::new(options, 0);
        sizer.set_exact_size(Some(40 << 10));
        sizer.set_read_all_hint(true);
        assert_eq!(sizer.buffer_length(0, 1, 1), 40 << 10);
    }

    #[test]
    fn min_length_always_wins() {
        let options = BufferOptions::new().with_min_buffer_size(16).with_max_buffer_size(32);
        let mut sizer = ReadBufferSizer::new(options, 0);
        assert!(sizer.buffer_length(0, 100, 1) >= 100);
    }
}
