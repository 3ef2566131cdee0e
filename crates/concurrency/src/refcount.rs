//! Reference counter with a single destruction edge
//!
//! The count starts at zero. `unref` below zero marks the owner as a zombie
//! and reports the transition exactly once; later `add_ref` calls fail.

use parking_lot::Mutex;

#[derive(Debug, Default)]
struct Counts {
    count: i32,
    zombie: bool,
}

/// Counter guarded by its own mutex
#[derive(Debug, Default)]
pub struct RefCounter {
    inner: Mutex<Counts>,
}

impl RefCounter {
    /// Counter at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a reference; returns the new count, or `None` on a zombie
    pub fn add_ref(&self) -> Option<i32> {
        let mut c = self.inner.lock();
        if c.zombie {
            return None;
        }
        c.count += 1;
        Some(c.count)
    }

    /// Drop a reference; returns true on the transition below zero
    pub fn unref(&self) -> bool {
        let mut c = self.inner.lock();
        if c.zombie {
            return false;
        }
        c.count -= 1;
        if c.count < 0 {
            c.zombie = true;
            return true;
        }
        false
    }

    /// Current count
    pub fn count(&self) -> i32 {
        self.inner.lock().count
    }

    /// True after the destruction edge
    pub fn is_zombie(&self) -> bool {
        self.inner.lock().zombie
    }

    /// Force the destruction edge regardless of count; true if this call made it
    pub fn make_zombie(&self) -> bool {
        let mut c = self.inner.lock();
        if c.zombie {
            return false;
        }
        c.zombie = true;
        true
    }
}
