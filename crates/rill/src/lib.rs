// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Composable buffered byte-stream readers and writers.
//!
//! This crate is the core of a family of pull-style [`Reader`]s and
//! push-style [`Writer`]s that chain into pipelines (descriptor →
//! decompressor → digester → consumer, and the mirror image on the write
//! side) under one buffered-stream contract:
//!
//! * Every stream exposes a directly accessible buffer window with a
//!   movable cursor, so most operations avoid dynamic dispatch entirely.
//!   Only buffer misses reach the implementation's slow path.
//! * Failures are latched: operations report `false` or a short count, the
//!   stream stays failed, and [`Status`] carries the annotated cause with
//!   the byte position context of every layer it crossed. End-of-source is
//!   not a failure.
//! * Capabilities (random access, rewind, independent readers, read mode)
//!   are per-instance queries, because they often depend on what the
//!   underlying descriptor turns out to support at runtime.
//!
//! Concrete sources and sinks implement the [`Source`] / [`Sink`] hook
//! traits and let [`BufferedReader`] / [`BufferedWriter`] manage buffering,
//! growth heuristics and position accounting. In-memory endpoints
//! ([`BytesReader`], [`BytesWriter`], [`NullWriter`]) and position-rebasing
//! adapters ([`PositionShiftingReader`], [`PositionShiftingWriter`]) are
//! included; descriptor, decompression and digesting streams live in
//! sibling crates.

mod buffer;
mod buffered_reader;
mod buffered_writer;
mod bytes_reader;
mod bytes_writer;
mod null_writer;
mod position_shifting;
mod reader;
mod status;
mod stream;
mod writer;

pub use buffer::{BufferOptions, DEFAULT_MAX_BUFFER_SIZE, DEFAULT_MIN_BUFFER_SIZE, ReadBufferSizer, WriteBufferSizer};
pub use buffered_reader::{BufferedReader, Source};
pub use buffered_writer::{BufferedWriter, Sink};
pub use bytes_reader::BytesReader;
pub use bytes_writer::BytesWriter;
pub use null_writer::NullWriter;
pub use position_shifting::{PositionShiftingReader, PositionShiftingWriter};
pub use reader::{Reader, ReaderBase};
pub use status::{Position, Status, StatusKind};
pub use stream::StreamBase;
pub use writer::{FlushType, Writer, WriterBase};
