//! Mailbox substrate: token-addressed channels between role loops.
//!
//! One active listener per token. Registering a listener on an occupied
//! token displaces the previous one (its receiver closes and its loop
//! exits), which keeps supervisor restarts safe when they race a
//! half-dead loop. Delivery is advisory: a `NoListener` outcome is not an
//! error, because every event has a proactive-scan fallback path.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::model::OrgEvent;

/// Outcome of [`MailboxHub::deliver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverOutcome {
    Delivered,
    NoListener,
}

/// In-process channel hub keyed by mailbox token.
#[derive(Default)]
pub struct MailboxHub {
    channels: Mutex<HashMap<String, mpsc::UnboundedSender<OrgEvent>>>,
}

impl MailboxHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn channels(&self) -> std::sync::MutexGuard<'_, HashMap<String, mpsc::UnboundedSender<OrgEvent>>> {
        self.channels.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Become the active listener for `token`, displacing any previous
    /// listener. The returned receiver is the single multiplexed source
    /// the role loop races against its tick timeout.
    pub fn listen(&self, token: &str) -> mpsc::UnboundedReceiver<OrgEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.channels().insert(token.to_string(), tx).is_some() {
            tracing::debug!(token, "displaced previous mailbox listener");
        }
        rx
    }

    /// Deliver one event to whoever listens on `token`. Fails soft.
    pub fn deliver(&self, token: &str, event: OrgEvent) -> DeliverOutcome {
        let mut channels = self.channels();
        match channels.get(token) {
            Some(tx) => {
                if tx.send(event).is_err() {
                    // Listener went away; drop the dead sender.
                    channels.remove(token);
                    DeliverOutcome::NoListener
                } else {
                    DeliverOutcome::Delivered
                }
            }
            None => DeliverOutcome::NoListener,
        }
    }

    /// Whether anyone currently listens on `token`.
    pub fn has_listener(&self, token: &str) -> bool {
        self.channels()
            .get(token)
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }
}
