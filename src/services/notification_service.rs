//! Fan-out of lobby events to teamspace observers, plus the redelivery outbox.

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use axum::extract::ws::Message;
use rand::Rng;
use tokio::{sync::mpsc, time::sleep};
use tracing::{debug, error, info, warn};

use crate::{
    config::NotificationSettings, dto::ws::LobbyEvent, error::ErrorCode,
    state::registry::ConnectionRegistry,
};

const MAX_REDELIVERY_DELAY: Duration = Duration::from_secs(10);

/// Outcome of one fan-out, keyed by observer identity.
///
/// An identity with several sessions counts as delivered when at least one session got the event.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Identities reached by at least one session.
    pub delivered: BTreeSet<String>,
    /// Identities none of whose sessions could be reached.
    pub failed: BTreeSet<String>,
}

/// Which observers of a group receive an event.
#[derive(Debug, Clone, Copy)]
pub enum Audience<'a> {
    /// Every observer of the group.
    Everyone,
    /// Every observer except this identity.
    AllExcept(&'a str),
    /// Only these identities.
    Only(&'a BTreeSet<String>),
}

impl Audience<'_> {
    fn includes(&self, user_id: &str) -> bool {
        match self {
            Audience::Everyone => true,
            Audience::AllExcept(excluded) => *excluded != user_id,
            Audience::Only(recipients) => recipients.contains(user_id),
        }
    }
}

/// Immediate fan-out of lobby events through the connection registry.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    /// Broadcaster over `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver `event` to every session registered under `group_key`.
    pub async fn broadcast(&self, group_key: &str, event: &LobbyEvent) -> BroadcastReport {
        self.deliver(group_key, event, Audience::Everyone).await
    }

    /// Deliver `event` to the selected observers of `group_key`.
    ///
    /// A closed session is unregistered and reported as failed; delivery to the remaining
    /// sessions continues.
    pub async fn deliver(
        &self,
        group_key: &str,
        event: &LobbyEvent,
        audience: Audience<'_>,
    ) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "failed to serialize lobby event `{event:?}` (permanent error, not retrying)");
                return report;
            }
        };

        for observer in self.registry.connections_for(group_key).await {
            if !audience.includes(&observer.user_id) {
                continue;
            }

            match observer.session.tx.send(Message::Text(payload.clone().into())) {
                Ok(()) => {
                    report.delivered.insert(observer.user_id);
                }
                Err(_) => {
                    warn!(
                        group_key,
                        session_id = %observer.session.id,
                        user_id = %observer.user_id,
                        "send failed (writer closed), removing observer session"
                    );
                    self.registry.remove_connection(observer.session.id).await;
                    report.failed.insert(observer.user_id);
                }
            }
        }

        report.failed.retain(|user| !report.delivered.contains(user));
        debug!(
            group_key,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "lobby event fanned out"
        );
        report
    }
}

#[derive(Debug, Clone)]
/// Backoff applied by the outbox between redelivery attempts.
pub struct RetryPolicy {
    /// Redelivery attempts before giving up.
    pub max_attempts: u32,
    /// Wait before the first redelivery; doubled after each attempt.
    pub initial_delay: Duration,
}

impl From<&NotificationSettings> for RetryPolicy {
    fn from(settings: &NotificationSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            initial_delay: settings.initial_delay,
        }
    }
}

#[derive(Debug)]
struct PendingDelivery {
    group_key: String,
    event: LobbyEvent,
    recipients: BTreeSet<String>,
}

/// Queue of events that reached some observers but not all.
///
/// Each entry is retried against the recipients' current sessions, so an observer that
/// reconnected in the meantime still receives it.
#[derive(Clone)]
pub struct NotificationOutbox {
    tx: mpsc::UnboundedSender<PendingDelivery>,
}

impl NotificationOutbox {
    /// Start the redelivery worker on the current Tokio runtime.
    pub fn spawn(broadcaster: Broadcaster, policy: RetryPolicy) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_outbox(rx, broadcaster, policy));
        Self { tx }
    }

    /// Queue `event` for redelivery to `recipients`. Returns `false` when the worker is gone.
    pub fn enqueue(&self, group_key: &str, event: LobbyEvent, recipients: BTreeSet<String>) -> bool {
        if recipients.is_empty() {
            return true;
        }

        let queued = self
            .tx
            .send(PendingDelivery {
                group_key: group_key.to_owned(),
                event,
                recipients,
            })
            .is_ok();
        if !queued {
            warn!(group_key, "notification outbox closed; dropping redelivery");
        }
        queued
    }
}

/// Immediate delivery backed by the outbox for the observers it missed.
#[derive(Clone)]
pub struct Notifier {
    broadcaster: Broadcaster,
    outbox: NotificationOutbox,
}

impl Notifier {
    /// Notifier delivering through `broadcaster` and retrying through `outbox`.
    pub fn new(broadcaster: Broadcaster, outbox: NotificationOutbox) -> Self {
        Self {
            broadcaster,
            outbox,
        }
    }

    /// Deliver `event` now and queue a redelivery for every identity that was not reached.
    ///
    /// Returns the identities left pending.
    pub async fn publish(
        &self,
        group_key: &str,
        event: LobbyEvent,
        audience: Audience<'_>,
    ) -> BTreeSet<String> {
        let report = self.broadcaster.deliver(group_key, &event, audience).await;
        if !report.failed.is_empty() {
            self.outbox.enqueue(group_key, event, report.failed.clone());
        }
        report.failed
    }
}

async fn run_outbox(
    mut rx: mpsc::UnboundedReceiver<PendingDelivery>,
    broadcaster: Broadcaster,
    policy: RetryPolicy,
) {
    while let Some(pending) = rx.recv().await {
        tokio::spawn(redeliver(broadcaster.clone(), policy.clone(), pending));
    }
}

async fn redeliver(broadcaster: Broadcaster, policy: RetryPolicy, pending: PendingDelivery) {
    let PendingDelivery {
        group_key,
        event,
        mut recipients,
    } = pending;
    let mut delay = policy.initial_delay;

    for attempt in 1..=policy.max_attempts {
        sleep(with_jitter(delay)).await;

        let report = broadcaster
            .deliver(&group_key, &event, Audience::Only(&recipients))
            .await;
        recipients.retain(|user| !report.delivered.contains(user));

        if recipients.is_empty() {
            info!(group_key = %group_key, attempt, "lobby event redelivered");
            return;
        }
        debug!(group_key = %group_key, attempt, remaining = recipients.len(), "redelivery incomplete");
        delay = (delay * 2).min(MAX_REDELIVERY_DELAY);
    }

    error!(
        error_code = ErrorCode::NotificationFailed.as_str(),
        group_key = %group_key,
        recipients = ?recipients,
        "giving up on lobby event redelivery"
    );
}

fn with_jitter(delay: Duration) -> Duration {
    let spread = (delay.as_millis() / 4) as u64;
    delay + Duration::from_millis(rand::rng().random_range(0..=spread))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::registry::SessionHandle;

    fn member_list() -> LobbyEvent {
        LobbyEvent::MemberList {
            user_ids: vec!["alice".into(), "bob".into()],
        }
    }

    async fn connect(
        registry: &ConnectionRegistry,
        group: &str,
        user: &str,
    ) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        registry
            .add_connection(group, user, SessionHandle::new(tx))
            .await
            .unwrap();
        rx
    }

    fn received_text(rx: &mut mpsc::UnboundedReceiver<Message>) -> Option<String> {
        match rx.try_recv() {
            Ok(Message::Text(text)) => Some(text.to_string()),
            _ => None,
        }
    }

    #[tokio::test]
    async fn closed_session_fails_without_blocking_others() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone());
        let mut alice = connect(&registry, "team", "alice").await;
        drop(connect(&registry, "team", "bob").await);

        let report = broadcaster.broadcast("team", &member_list()).await;

        assert_eq!(report.delivered, BTreeSet::from(["alice".to_string()]));
        assert_eq!(report.failed, BTreeSet::from(["bob".to_string()]));
        assert!(received_text(&mut alice).unwrap().contains("memberList"));
        assert_eq!(registry.connections_for("team").await.len(), 1);
    }

    #[tokio::test]
    async fn all_except_skips_the_excluded_identity() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone());
        let mut organizer = connect(&registry, "team", "alice").await;
        let mut member = connect(&registry, "team", "bob").await;

        let event = LobbyEvent::PartyStarted {
            party_id: uuid::Uuid::new_v4(),
        };
        let report = broadcaster
            .deliver("team", &event, Audience::AllExcept("alice"))
            .await;

        assert_eq!(report.delivered, BTreeSet::from(["bob".to_string()]));
        assert!(received_text(&mut member).is_some());
        assert!(received_text(&mut organizer).is_none());
    }

    #[tokio::test]
    async fn identity_with_one_live_session_counts_as_delivered() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone());
        drop(connect(&registry, "team", "bob").await);
        let _live = connect(&registry, "team", "bob").await;

        let report = broadcaster.broadcast("team", &member_list()).await;

        assert_eq!(report.delivered, BTreeSet::from(["bob".to_string()]));
        assert!(report.failed.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn outbox_redelivers_to_reconnected_observer() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone());
        let outbox = NotificationOutbox::spawn(
            broadcaster,
            RetryPolicy {
                max_attempts: 3,
                initial_delay: Duration::from_millis(100),
            },
        );

        assert!(outbox.enqueue("team", member_list(), BTreeSet::from(["bob".to_string()])));
        let mut bob = connect(&registry, "team", "bob").await;

        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(received_text(&mut bob).unwrap().contains("bob"));
    }
}
