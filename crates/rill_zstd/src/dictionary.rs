// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

/// A shared, immutable decompression dictionary.
///
/// Prepared once and attached to any number of decoders; clones share the
/// same backing bytes. The dictionary must match the one used during
/// compression. Raw content (no dictionary header) is accepted and treated
/// as a prefix dictionary, matching `libzstd` semantics.
#[derive(Debug, Clone)]
pub struct DecoderDictionary {
    data: Arc<[u8]>,
}

impl DecoderDictionary {
    /// Prepares a dictionary from its serialized bytes.
    #[must_use]
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Arc::from(data.into()),
        }
    }

    /// The dictionary bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Whether the dictionary is empty (attaching it is a no-op).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
