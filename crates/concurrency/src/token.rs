//! Cooperative cancellation
//!
//! A [`CancellationToken`] only records that cancellation was requested.
//! Running code observes it at its own checkpoints. Child tokens are
//! cancelled together with their parent.

use crate::error::{ThreadError, ThreadResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct TokenInner {
    cancelled: AtomicBool,
    children: Mutex<Vec<CancellationToken>>,
}

/// Shared cancellation flag
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl CancellationToken {
    /// Fresh, uncancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of this token and all of its children
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let children = std::mem::take(&mut *self.inner.children.lock());
        for child in children {
            child.cancel();
        }
    }

    /// True once cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Token cancelled whenever this one is
    pub fn child_token(&self) -> CancellationToken {
        let child = CancellationToken::new();
        let mut children = self.inner.children.lock();
        // Re-check under the lock so a concurrent cancel cannot miss the child
        if self.is_cancelled() {
            child.inner.cancelled.store(true, Ordering::Release);
        } else {
            children.push(child.clone());
        }
        child
    }

    /// `Err(Cancelled)` once cancellation was requested
    pub fn check(&self) -> ThreadResult<()> {
        if self.is_cancelled() {
            Err(ThreadError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_sticky() {
        let t = CancellationToken::new();
        assert!(t.check().is_ok());
        t.cancel();
        t.cancel();
        assert!(t.is_cancelled());
        assert_eq!(t.check(), Err(ThreadError::Cancelled));
    }

    #[test]
    fn test_children_follow_parent() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        let grandchild = child.child_token();
        assert!(!grandchild.is_cancelled());
        parent.cancel();
        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
        assert!(parent.child_token().is_cancelled());
    }

    #[test]
    fn test_child_cancel_does_not_reach_parent() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        child.cancel();
        assert!(!parent.is_cancelled());
    }
}
