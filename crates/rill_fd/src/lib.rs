// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! File-descriptor byte sources and sinks for `rill` stream pipelines.
//!
//! [`FdReader`] pulls bytes from a descriptor with either the descriptor's
//! shared position (`read`) or explicit per-call offsets (`pread`), probing
//! random-access support with a seek at construction. [`FdWriter`] is the
//! mirror sink, with append mode, durability flushes and a read mode that
//! re-exposes written bytes. Where the platform allows it, descriptor to
//! descriptor transfers skip userspace entirely via `copy_file_range`
//! ([`FdReader::copy_to_fd`]).
//!
//! Interrupted syscalls are restarted; every failure status names the file
//! and byte position it occurred at.

mod fd_reader;
mod fd_writer;
mod sys;

pub use fd_reader::{FdReader, FdReaderOptions};
pub use fd_writer::{FdWriter, FdWriterOptions};
