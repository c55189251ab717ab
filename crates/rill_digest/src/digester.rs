// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use adler32::RollingAdler32;

/// An incremental accumulator over a stream of byte slices.
///
/// Updates are associative over concatenation: feeding a byte sequence in
/// any slicing produces the same digest as feeding it whole, which is what
/// lets layered stream adapters digest bytes as they pass through the
/// buffer in arbitrary chunks.
///
/// Digesters are cheap-to-copy value objects with no I/O; they cannot fail.
pub trait Digester: Clone {
    /// The digest value type.
    type Digest;

    /// Absorbs `data` at the end of the digested sequence.
    fn update(&mut self, data: &[u8]);

    /// The digest of everything absorbed so far. Non-destructive: updates
    /// may continue afterwards.
    fn digest(&mut self) -> Self::Digest;
}

/// CRC32C (Castagnoli polynomial), hardware-accelerated where the platform
/// allows.
#[derive(Debug, Clone, Default)]
pub struct Crc32cDigester {
    state: u32,
}

impl Crc32cDigester {
    /// Creates a digester over the empty sequence.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Digester for Crc32cDigester {
    type Digest = u32;

    fn update(&mut self, data: &[u8]) {
        self.state = crc32c::crc32c_append(self.state, data);
    }

    fn digest(&mut self) -> u32 {
        self.state
    }
}

/// CRC32 with the zlib (IEEE 802.3) polynomial.
#[derive(Debug, Clone, Default)]
pub struct Crc32Digester {
    hasher: crc32fast::Hasher,
}

impl Crc32Digester {
    /// Creates a digester over the empty sequence.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Digester for Crc32Digester {
    type Digest = u32;

    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    fn digest(&mut self) -> u32 {
        self.hasher.clone().finalize()
    }
}

/// Adler-32, as used by zlib.
#[derive(Clone)]
pub struct Adler32Digester {
    state: RollingAdler32,
}

impl std::fmt::Debug for Adler32Digester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adler32Digester")
            .field("state", &self.state.hash())
            .finish()
    }
}

impl Adler32Digester {
    /// Creates a digester over the empty sequence.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RollingAdler32::new(),
        }
    }
}

impl Default for Adler32Digester {
    fn default() -> Self {
        Self::new()
    }
}

impl Digester for Adler32Digester {
    type Digest = u32;

    fn update(&mut self, data: &[u8]) {
        self.state.update_buffer(data);
    }

    fn digest(&mut self) -> u32 {
        self.state.hash()
    }
}
