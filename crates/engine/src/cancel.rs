//! Per-debate cancellation tokens.
//!
//! Each running debate gets one [`CancelToken`]; the orchestrator threads it
//! through every agent invocation and tool call it spawns. Calling `cancel()`
//! signals the whole tree to stop cleanly: receivers check the token between
//! suspension points and release resources on all exit paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// A cancellation token that can be checked by the engine's loops.
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks the active cancellation token per debate id.
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl Default for CancelMap {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelMap {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Create and register a new cancel token for a debate.
    pub fn register(&self, debate_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens
            .lock()
            .insert(debate_id.to_owned(), token.clone());
        token
    }

    /// Cancel a running debate. Returns true if a token was found.
    pub fn cancel(&self, debate_id: &str) -> bool {
        if let Some(token) = self.tokens.lock().get(debate_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    /// Remove the token (called when the debate reaches a terminal state).
    pub fn remove(&self, debate_id: &str) {
        self.tokens.lock().remove(debate_id);
    }

    /// Check if a debate is still running.
    pub fn is_running(&self, debate_id: &str) -> bool {
        self.tokens.lock().contains_key(debate_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_lifecycle() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn clone_shares_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn map_register_cancel_remove() {
        let map = CancelMap::new();
        let token = map.register("d1");
        assert!(map.is_running("d1"));

        assert!(map.cancel("d1"));
        assert!(token.is_cancelled());

        map.remove("d1");
        assert!(!map.is_running("d1"));
        assert!(!map.cancel("d1"));
    }

    #[test]
    fn cancel_unknown_debate_returns_false() {
        let map = CancelMap::new();
        assert!(!map.cancel("ghost"));
    }

    #[test]
    fn register_replaces_previous_token() {
        let map = CancelMap::new();
        let old = map.register("d1");
        let new = map.register("d1");
        map.cancel("d1");
        assert!(new.is_cancelled());
        assert!(!old.is_cancelled());
    }
}
