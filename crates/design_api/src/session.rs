use std::sync::Arc;

use shared::domain::SessionUser;
use tokio::sync::watch;

/// Process-wide view of who is signed in.
///
/// Clones share one cell. Subscribers are notified only when the identity
/// actually changes, and their `changed()` calls start failing once every
/// clone of the cell has been dropped.
#[derive(Clone)]
pub struct SessionCell {
    tx: Arc<watch::Sender<Option<SessionUser>>>,
}

impl SessionCell {
    pub fn init(initial: Option<SessionUser>) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> Option<SessionUser> {
        self.tx.borrow().clone()
    }

    pub fn set(&self, user: SessionUser) {
        self.tx.send_if_modified(|current| {
            if current.as_ref() == Some(&user) {
                return false;
            }
            *current = Some(user);
            true
        });
    }

    /// Clears the session, returning whoever was signed in.
    pub fn sign_out(&self) -> Option<SessionUser> {
        let mut previous = None;
        self.tx.send_if_modified(|current| {
            previous = current.take();
            previous.is_some()
        });
        previous
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<SessionUser>> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
