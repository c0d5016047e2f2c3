//! Lazily recomputed value.
//!
//! `Memoized` holds the last result of a zero-argument producer until it is
//! invalidated. It does no locking of its own; the owner serializes access.

/// A derived value that is recomputed on the first read after invalidation.
#[derive(Debug)]
pub struct Memoized<T> {
    value: Option<T>,
    dirty: bool,
    computations: u64,
}

impl<T> Default for Memoized<T> {
    fn default() -> Self {
        Self {
            value: None,
            dirty: true,
            computations: 0,
        }
    }
}

impl<T> Memoized<T> {
    /// Create an empty view. The first `get` always computes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the stored value, calling `produce` exactly once if dirty.
    pub fn get(&mut self, produce: impl FnOnce() -> T) -> &T {
        // Clean implies populated
        if self.dirty {
            self.value = None;
            self.dirty = false;
            self.computations += 1;
        }
        self.value.get_or_insert_with(produce)
    }

    /// The stored value, only if it is still valid.
    pub fn peek(&self) -> Option<&T> {
        if self.dirty {
            None
        } else {
            self.value.as_ref()
        }
    }

    /// Mark the stored value stale. The old value stays allocated until the
    /// next recomputation replaces it.
    pub fn invalidate(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Number of times the producer has been invoked.
    pub fn computations(&self) -> u64 {
        self.computations
    }
}
