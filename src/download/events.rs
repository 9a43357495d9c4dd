// Relisten Offline - offline track storage for archival concert recordings
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Lifecycle event fan-out
//!
//! Subscribers register a callback and get a [`SubscriptionToken`] back;
//! dropping interest is an explicit `unsubscribe(token)`.
//!
//! Callbacks are invoked synchronously on the coordinator task, in the order
//! transitions happen. The subscriber list is snapshotted before dispatch,
//! so a callback may subscribe, unsubscribe or call back into the
//! coordinator without deadlocking. Callbacks must not block.

use crate::download::agent::TransferError;
use crate::model::TrackDescriptor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;

/// Why a download attempt failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    #[error("Network error: {message}")]
    Network { message: String, transient: bool },

    /// The server answered with something that is not audio
    #[error("Unexpected content type: {0}")]
    UnexpectedContentType(String),

    #[error("Filesystem error: {0}")]
    Filesystem(String),

    #[error("Transfer cancelled")]
    Cancelled,
}

impl FailureReason {
    /// Whether the track stays queued for a later retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureReason::Network { transient: true, .. } | FailureReason::UnexpectedContentType(_)
        )
    }
}

impl From<&TransferError> for FailureReason {
    fn from(err: &TransferError) -> Self {
        match err {
            TransferError::Network { message, transient } => FailureReason::Network {
                message: message.clone(),
                transient: *transient,
            },
            TransferError::Cancelled => FailureReason::Cancelled,
            TransferError::Io(message) => FailureReason::Filesystem(message.clone()),
            TransferError::DestinationExists { destination, .. } => FailureReason::Filesystem(
                format!("Destination already exists: {}", destination.display()),
            ),
        }
    }
}

/// Offline lifecycle event
#[derive(Debug, Clone, PartialEq)]
pub enum OfflineEvent {
    TrackQueued(TrackDescriptor),
    /// One event for a whole recording
    TracksQueued(Vec<TrackDescriptor>),
    TrackStarted(TrackDescriptor),
    TrackProgress {
        track: TrackDescriptor,
        fraction: f32,
    },
    TrackFinished(TrackDescriptor),
    TrackFailed {
        track: TrackDescriptor,
        reason: FailureReason,
    },
    /// Raised once the files are gone and the records removed
    TracksDeleted(Vec<TrackDescriptor>),
}

pub type EventCallback = Arc<dyn Fn(&OfflineEvent) + Send + Sync>;

/// Returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

/// Subscriber registry
#[derive(Default)]
pub struct EventNotifier {
    next_token: AtomicU64,
    subscribers: RwLock<Vec<(SubscriptionToken, EventCallback)>>,
}

impl EventNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionToken
    where
        F: Fn(&OfflineEvent) + Send + Sync + 'static,
    {
        let token = SubscriptionToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((token, Arc::new(callback)));
        token
    }

    /// Subscribe with an async channel instead of a callback
    ///
    /// The channel stops receiving after `unsubscribe(token)`.
    pub fn subscribe_channel(&self) -> (SubscriptionToken, mpsc::UnboundedReceiver<OfflineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = self.subscribe(move |event| {
            let _ = tx.send(event.clone());
        });
        (token, rx)
    }

    /// Returns false if the token was not registered
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut subscribers = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        let before = subscribers.len();
        subscribers.retain(|(t, _)| *t != token);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn raise(&self, event: &OfflineEvent) {
        let snapshot: Vec<EventCallback> = self
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();

        for callback in snapshot {
            callback(event);
        }
    }
}

impl std::fmt::Debug for EventNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventNotifier")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use url::Url;
    use uuid::Uuid;

    fn track() -> TrackDescriptor {
        TrackDescriptor::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            "Scarlet Begonias",
            Url::parse("https://archive.example/scarlet.mp3").unwrap(),
        )
    }

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let notifier = EventNotifier::new();
        let count = Arc::new(AtomicUsize::new(0));

        let token = {
            let count = count.clone();
            notifier.subscribe(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };

        notifier.raise(&OfflineEvent::TrackQueued(track()));
        assert!(notifier.unsubscribe(token));
        assert!(!notifier.unsubscribe(token));
        notifier.raise(&OfflineEvent::TrackQueued(track()));

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_can_unsubscribe_itself() {
        let notifier = Arc::new(EventNotifier::new());
        let token_slot: Arc<Mutex<Option<SubscriptionToken>>> = Arc::new(Mutex::new(None));

        let token = {
            let inner = notifier.clone();
            let token_slot = token_slot.clone();
            notifier.subscribe(move |_| {
                if let Some(token) = *token_slot.lock().unwrap() {
                    inner.unsubscribe(token);
                }
            })
        };
        *token_slot.lock().unwrap() = Some(token);

        notifier.raise(&OfflineEvent::TrackFinished(track()));
        assert_eq!(notifier.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_channel_subscription_preserves_order() {
        let notifier = EventNotifier::new();
        let (_token, mut rx) = notifier.subscribe_channel();
        let t = track();

        notifier.raise(&OfflineEvent::TrackStarted(t.clone()));
        notifier.raise(&OfflineEvent::TrackProgress {
            track: t.clone(),
            fraction: 0.5,
        });
        notifier.raise(&OfflineEvent::TrackFinished(t.clone()));

        assert_eq!(rx.recv().await.unwrap(), OfflineEvent::TrackStarted(t.clone()));
        assert!(matches!(rx.recv().await.unwrap(), OfflineEvent::TrackProgress { .. }));
        assert_eq!(rx.recv().await.unwrap(), OfflineEvent::TrackFinished(t));
    }

    #[test]
    fn test_failure_reason_from_transfer_error() {
        let reason = FailureReason::from(&TransferError::network("reset", true));
        assert!(reason.is_retryable());
        assert!(!FailureReason::from(&TransferError::Cancelled).is_retryable());
    }
}
