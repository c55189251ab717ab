// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A process-wide, keyed, bounded pool of expensive-to-construct objects.
//!
//! Some resources are costly to create but cheap to reset, such as
//! decompression contexts, while the streams that need them are often
//! short-lived. [`RecyclingPool`] keeps a bounded number of such objects
//! around between uses: [`get()`][RecyclingPool::get] hands out an existing
//! object when one is available and constructs a fresh one otherwise, and the
//! returned [`Recycled`] handle puts the object back when dropped, provided
//! the caller's recycler approves it and the pool has room.
//!
//! Pools are typically stored in a `static` owned by the crate whose
//! resources they manage:
//!
//! ```
//! use std::sync::LazyLock;
//!
//! use recycling_pool::RecyclingPool;
//!
//! static BUFFERS: LazyLock<RecyclingPool<Vec<u8>>> = LazyLock::new(RecyclingPool::default);
//!
//! let mut buf = BUFFERS.get((), || Vec::with_capacity(1024), |b| {
//!     b.clear();
//!     true
//! });
//! buf.extend_from_slice(b"scratch data");
//! drop(buf); // cleared and returned to the pool
//! ```
//!
//! # Thread safety
//!
//! All operations are thread-safe. The pool never blocks beyond a short
//! internal mutex critical section; factories and recyclers run outside it.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::ops::{Deref, DerefMut};

use parking_lot::Mutex;
use tracing::trace;

/// Default bound on the number of idle objects kept per key.
pub const DEFAULT_MAX_IDLE_PER_KEY: usize = 16;

/// A thread-safe pool of reusable objects of type `T`, partitioned by key.
///
/// The key type `K` distinguishes objects that are interchangeable from those
/// that are not (for example, compression contexts configured for different
/// parameter sets). Pools holding a single class of object use the default
/// `K = ()`.
///
/// Objects enter the pool only through [`Recycled`] handles being dropped;
/// the pool itself never constructs anything.
pub struct RecyclingPool<T, K: Eq + Hash = ()> {
    max_idle_per_key: usize,
    buckets: Mutex<HashMap<K, Vec<T>>>,
}

impl<T, K: Eq + Hash> RecyclingPool<T, K> {
    /// Creates a pool that keeps at most `max_idle_per_key` idle objects per
    /// key. Objects returned beyond that bound are destroyed.
    #[must_use]
    pub fn new(max_idle_per_key: usize) -> Self {
        Self {
            max_idle_per_key,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Fetches an object for `key`, constructing one with `factory` if no
    /// idle object is available.
    ///
    /// When the returned handle is dropped, `recycler` runs against the
    /// object; returning `true` re-admits the object to the pool (capacity
    /// permitting), returning `false` destroys it.
    pub fn get(&self, key: K, factory: impl FnOnce() -> T, recycler: fn(&mut T) -> bool) -> Recycled<'_, T, K> {
        let pooled = self.buckets.lock().get_mut(&key).and_then(Vec::pop);
        let value = pooled.unwrap_or_else(|| {
            trace!("recycling pool constructing a new object");
            factory()
        });

        Recycled {
            pool: self,
            key: Some(key),
            value: Some(value),
            recycler,
        }
    }

    /// Like [`get()`][Self::get] but with a factory that can fail.
    ///
    /// # Errors
    ///
    /// Propagates the factory's error when no idle object was available and
    /// construction failed. An idle object never invokes the factory.
    pub fn try_get<E>(
        &self,
        key: K,
        factory: impl FnOnce() -> Result<T, E>,
        recycler: fn(&mut T) -> bool,
    ) -> Result<Recycled<'_, T, K>, E> {
        let pooled = self.buckets.lock().get_mut(&key).and_then(Vec::pop);
        let value = match pooled {
            Some(value) => value,
            None => {
                trace!("recycling pool constructing a new object");
                factory()?
            }
        };

        Ok(Recycled {
            pool: self,
            key: Some(key),
            value: Some(value),
            recycler,
        })
    }

    /// Number of idle objects currently held, across all keys.
    #[must_use]
    pub fn idle_len(&self) -> usize {
        self.buckets.lock().values().map(Vec::len).sum()
    }

    fn put(&self, key: K, value: T) {
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(key).or_default();
        if bucket.len() < self.max_idle_per_key {
            bucket.push(value);
        }
    }
}

impl<T, K: Eq + Hash> Default for RecyclingPool<T, K> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IDLE_PER_KEY)
    }
}

impl<T, K: Eq + Hash> fmt::Debug for RecyclingPool<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecyclingPool")
            .field("max_idle_per_key", &self.max_idle_per_key)
            .field("idle_len", &self.idle_len())
            .finish()
    }
}

/// An exclusively owned object borrowed from a [`RecyclingPool`].
///
/// Dereferences to `T`. Dropping the handle runs the recycler and, if it
/// approves, returns the object to the pool it came from.
pub struct Recycled<'a, T, K: Eq + Hash = ()> {
    pool: &'a RecyclingPool<T, K>,
    key: Option<K>,
    value: Option<T>,
    recycler: fn(&mut T) -> bool,
}

impl<T, K: Eq + Hash> Recycled<'_, T, K> {
    /// Detaches the object from the pool; it will not be recycled.
    #[must_use]
    pub fn into_inner(mut self) -> T {
        self.value.take().expect("value present until dropped or detached")
    }
}

impl<T, K: Eq + Hash> Deref for Recycled<'_, T, K> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value.as_ref().expect("value present until dropped or detached")
    }
}

impl<T, K: Eq + Hash> DerefMut for Recycled<'_, T, K> {
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("value present until dropped or detached")
    }
}

impl<T, K: Eq + Hash> Drop for Recycled<'_, T, K> {
    fn drop(&mut self) {
        if let (Some(key), Some(mut value)) = (self.key.take(), self.value.take()) {
            if (self.recycler)(&mut value) {
                self.pool.put(key, value);
            } else {
                trace!("recycler rejected an object; destroying it");
            }
        }
    }
}

impl<T: fmt::Debug, K: Eq + Hash> fmt::Debug for Recycled<'_, T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Recycled").field(&self.value).finish()
    }
}
