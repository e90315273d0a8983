use std::{sync::Arc, thread, time::Duration};

use parking_lot::Mutex;
use tracing::{info, warn};

/// Banner shown when a user-initiated status change is declined.
pub const BUSY_NOTICE: &str = "Another task is running... Please try again later";

const DEFAULT_REVERT_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub status: String,
    pub is_ready: bool,
    pub has_error: bool,
}

#[derive(Debug)]
struct StatusInner {
    status: String,
    is_ready: bool,
    has_error: bool,
    history: Vec<String>,
}

/// Single-slot task gate with an append-only status history.
///
/// At most one task may hold the board (`is_ready == false`) at a time.
/// A user-initiated update while the board is held is declined: a busy
/// notice is shown and reverted to the prior status after a fixed delay,
/// unless the running task released the board in the meantime. Clones
/// share the same board.
#[derive(Debug, Clone)]
pub struct StatusBoard {
    inner: Arc<Mutex<StatusInner>>,
    revert_delay: Duration,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::with_revert_delay(DEFAULT_REVERT_DELAY)
    }

    /// A board whose busy notice reverts after `revert_delay`.
    pub fn with_revert_delay(revert_delay: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StatusInner {
                status: "Ready".to_string(),
                is_ready: false,
                has_error: false,
                history: Vec::new(),
            })),
            revert_delay,
        }
    }

    fn apply(inner: &mut StatusInner, status: &str, has_error: bool) {
        inner.status = status.to_string();
        inner.has_error = has_error;
        inner.history.push(status.to_string());
    }

    /// Core update. Returns whether the new status was accepted.
    ///
    /// `is_ready` states whether another task may start during the new
    /// status; `user_op` marks a user-initiated change, which is subject
    /// to the gate.
    pub fn update(&self, status: &str, is_ready: bool, is_error: bool, user_op: bool) -> bool {
        let declined = {
            let mut inner = self.inner.lock();
            if !user_op || inner.is_ready {
                Self::apply(&mut inner, status, is_error);
                inner.is_ready = is_ready;
                info!(status, is_ready, is_error, "status updated");
                None
            } else {
                warn!(status, "status change declined, another task is running");
                let prior = (inner.status.clone(), inner.has_error);
                Self::apply(&mut inner, BUSY_NOTICE, true);
                Some(prior)
            }
        };
        let Some((prior_status, prior_error)) = declined else {
            return true;
        };
        // show the notice briefly, then fall back to the running task's
        // status unless that task released the board meanwhile
        let board = self.clone();
        thread::spawn(move || {
            thread::sleep(board.revert_delay);
            let mut inner = board.inner.lock();
            if !inner.is_ready {
                Self::apply(&mut inner, &prior_status, prior_error);
            }
        });
        false
    }

    /// Claim the board for a user-initiated task.
    pub fn begin(&self, status: &str) -> bool {
        self.update(status, false, false, true)
    }

    /// Set a non-user busy status (internal task progress).
    pub fn set_busy(&self, status: &str) {
        self.update(status, false, false, false);
    }

    /// Release the board.
    pub fn mark_ready(&self) {
        self.update("Ready", true, false, false);
    }

    /// Report a terminal error; the board is released afterwards.
    pub fn set_error(&self, status: &str) {
        self.update(status, true, true, false);
    }

    pub fn is_ready(&self) -> bool {
        self.inner.lock().is_ready
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let inner = self.inner.lock();
        StatusSnapshot {
            status: inner.status.clone(),
            is_ready: inner.is_ready,
            has_error: inner.has_error,
        }
    }

    pub fn history(&self) -> Vec<String> {
        self.inner.lock().history.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_board() -> StatusBoard {
        StatusBoard::with_revert_delay(Duration::from_millis(50))
    }

    #[test]
    fn test_initial_state() {
        let board = StatusBoard::new();
        let snapshot = board.snapshot();
        assert_eq!(snapshot.status, "Ready");
        assert!(!snapshot.is_ready);
        assert!(!snapshot.has_error);
    }

    #[test]
    fn test_non_user_update_always_applies() {
        let board = fast_board();
        board.set_busy("Loading database...");
        assert!(board.update("still loading", false, false, false));
        assert_eq!(board.snapshot().status, "still loading");
    }

    #[test]
    fn test_user_op_allowed_when_ready() {
        let board = fast_board();
        board.mark_ready();
        assert!(board.begin("Loading ROI..."));
        assert!(!board.is_ready());
    }

    #[test]
    fn test_user_op_declined_while_busy_then_reverts() {
        let board = fast_board();
        board.set_busy("Loading database...");
        assert!(!board.begin("Loading ROI..."));
        assert_eq!(board.snapshot().status, BUSY_NOTICE);
        assert!(board.snapshot().has_error);

        thread::sleep(Duration::from_millis(150));
        let snapshot = board.snapshot();
        assert_eq!(snapshot.status, "Loading database...");
        assert!(!snapshot.has_error);
    }

    #[test]
    fn test_no_revert_after_task_finished() {
        let board = fast_board();
        board.set_busy("Loading database...");
        assert!(!board.begin("Loading ROI..."));
        board.mark_ready();

        thread::sleep(Duration::from_millis(150));
        assert_eq!(board.snapshot().status, "Ready");
        assert!(board.is_ready());
    }

    #[test]
    fn test_history_is_append_only() {
        let board = fast_board();
        board.set_busy("Loading database...");
        board.mark_ready();
        assert_eq!(
            board.history(),
            vec!["Loading database...".to_string(), "Ready".to_string()]
        );
    }
}
