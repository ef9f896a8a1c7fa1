//! Sticky per-node operation cookies.
//!
//! A cookie records that a node has been observed to satisfy some condition
//! (provisioned) or that an operation has been requested for it
//! (restart, reprovision). Cookies are set once, read by the aggregate
//! predicate layer, and cleared only by the orchestration collaborator that
//! consumes them.

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of a cookie within one pending operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CookieState {
    /// No condition observed / no operation pending
    Unset = 0,
    /// Condition observed or operation requested, not yet consumed
    Requested = 1,
    /// The consuming operation has started but not completed
    InProgress = 2,
}

impl CookieState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => CookieState::Requested,
            2 => CookieState::InProgress,
            _ => CookieState::Unset,
        }
    }
}

/// A lock-free tri-state flag
#[derive(Debug, Default)]
pub struct Cookie(AtomicU8);

impl Cookie {
    pub fn state(&self) -> CookieState {
        CookieState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// True when the cookie carries a pending or in-progress operation
    pub fn is_set(&self) -> bool {
        self.state() != CookieState::Unset
    }

    /// Set the cookie. Returns true only on the Unset -> Requested
    /// transition; setting an already-set cookie is a no-op.
    pub fn request(&self) -> bool {
        self.0
            .compare_exchange(
                CookieState::Unset as u8,
                CookieState::Requested as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Mark the pending operation as started. Returns false unless the
    /// cookie was in Requested state.
    pub fn begin(&self) -> bool {
        self.0
            .compare_exchange(
                CookieState::Requested as u8,
                CookieState::InProgress as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Reset to Unset once the consuming operation completes.
    pub fn clear(&self) {
        self.0.store(CookieState::Unset as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_is_idempotent() {
        let cookie = Cookie::default();
        assert!(!cookie.is_set());
        assert!(cookie.request());
        assert!(cookie.is_set());
        // second set is a no-op
        assert!(!cookie.request());
        assert_eq!(cookie.state(), CookieState::Requested);
    }

    #[test]
    fn test_begin_requires_requested() {
        let cookie = Cookie::default();
        assert!(!cookie.begin());
        cookie.request();
        assert!(cookie.begin());
        assert_eq!(cookie.state(), CookieState::InProgress);
        // already in progress
        assert!(!cookie.begin());
        // still reads as set for the aggregate layer
        assert!(cookie.is_set());
    }

    #[test]
    fn test_clear_resets() {
        let cookie = Cookie::default();
        cookie.request();
        cookie.begin();
        cookie.clear();
        assert_eq!(cookie.state(), CookieState::Unset);
        assert!(!cookie.is_set());
        // a new cycle can start
        assert!(cookie.request());
    }
}
