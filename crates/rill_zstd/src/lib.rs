// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Streaming Zstandard decompression for `rill` stream pipelines.
//!
//! [`ZstdDecoder`] layers on top of any [`rill::Reader`] producing the
//! decompressed bytes of an RFC 8878 frame, with the uncompressed size
//! discovered from the frame header where declared, pooled decompression
//! contexts, optional shared dictionaries, rewind through frame replay, and
//! support for sources that are still growing.

mod decoder;
mod dictionary;

pub use decoder::{ZstdDecoder, ZstdOptions, ZstdSource};
pub use dictionary::DecoderDictionary;
