// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Checksum and hash digesting stream adapters for `rill` pipelines.
//!
//! A [`Digester`] is a cheap value object absorbing byte slices
//! incrementally; [`DigestingReader`] and [`DigestingWriter`] tee a stream
//! through one while forwarding the bytes unchanged, so a pipeline can
//! checksum its payload without an extra pass. CRC32C (Castagnoli), CRC32
//! (zlib polynomial) and Adler-32 digesters are provided.

mod digester;
mod digesting_reader;
mod digesting_writer;

pub use digester::{Adler32Digester, Crc32Digester, Crc32cDigester, Digester};
pub use digesting_reader::DigestingReader;
pub use digesting_writer::DigestingWriter;
