//! Change notifications from the backing store, reduced to recompute triggers.
//!
//! Every table in scope has a trigger that calls `pg_notify` on
//! `<table>_changes` with a small JSON payload. The payload is only used to
//! route and filter events; consumers always refetch.

use std::time::Duration;

use serde::Deserialize;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const REPORTS_CHANNEL: &str = "health_reports_changes";
pub const NOTIFICATIONS_CHANNEL: &str = "system_notifications_changes";
pub const READS_CHANNEL: &str = "user_notification_reads_changes";
pub const MESSAGES_CHANNEL: &str = "messages_changes";

pub const CHANNELS: [&str; 4] = [
    REPORTS_CHANNEL,
    NOTIFICATIONS_CHANNEL,
    READS_CHANNEL,
    MESSAGES_CHANNEL,
];

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    ReportInserted { id: Option<Uuid> },
    NotificationChanged { id: Option<Uuid> },
    ReadMarkerInserted { notification_id: Option<Uuid> },
    MessageChanged,
    /// The subscription was re-established; anything may have been missed.
    Resubscribed,
}

#[derive(Debug, Deserialize)]
struct ChangePayload {
    id: Option<Uuid>,
    user_id: Option<Uuid>,
}

/// Maps a notify payload to a trigger. Per-user tables are dropped when they
/// belong to someone else; a malformed payload still triggers a refetch.
pub fn parse_notification(channel: &str, payload: &str, user_id: Uuid) -> Option<ChangeEvent> {
    let parsed: Option<ChangePayload> = serde_json::from_str(payload).ok();
    let id = parsed.as_ref().and_then(|p| p.id);
    let owner = parsed.as_ref().and_then(|p| p.user_id);
    let for_someone_else = owner.is_some_and(|owner| owner != user_id);

    match channel {
        REPORTS_CHANNEL => Some(ChangeEvent::ReportInserted { id }),
        NOTIFICATIONS_CHANNEL => Some(ChangeEvent::NotificationChanged { id }),
        READS_CHANNEL if for_someone_else => None,
        READS_CHANNEL => Some(ChangeEvent::ReadMarkerInserted {
            notification_id: id,
        }),
        MESSAGES_CHANNEL if for_someone_else => None,
        MESSAGES_CHANNEL => Some(ChangeEvent::MessageChanged),
        other => {
            debug!("ignoring notification on unexpected channel {other}");
            None
        }
    }
}

pub fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}

pub struct ChangeFeedSubscriber {
    pool: PgPool,
    user_id: Uuid,
    max_backoff: Duration,
}

impl ChangeFeedSubscriber {
    pub fn new(pool: PgPool, user_id: Uuid, max_backoff: Duration) -> Self {
        Self {
            pool,
            user_id,
            max_backoff,
        }
    }

    /// Runs until `cancel` fires or the receiving side is dropped.
    pub fn spawn(
        self,
        events: mpsc::Sender<ChangeEvent>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run(events, cancel).await })
    }

    async fn run(self, events: mpsc::Sender<ChangeEvent>, cancel: CancellationToken) {
        let mut backoff = INITIAL_BACKOFF;
        let mut first = true;

        loop {
            let mut listener = match self.subscribe().await {
                Ok(listener) => listener,
                Err(err) => {
                    warn!("change feed subscribe failed, retrying in {backoff:?}: {err}");
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = cancel.cancelled() => return,
                    }
                    backoff = next_backoff(backoff, self.max_backoff);
                    continue;
                }
            };

            info!(user_id = %self.user_id, "subscribed to {} change channels", CHANNELS.len());
            backoff = INITIAL_BACKOFF;
            if !first && events.send(ChangeEvent::Resubscribed).await.is_err() {
                return;
            }
            first = false;

            loop {
                let notification = tokio::select! {
                    received = listener.try_recv() => received,
                    _ = cancel.cancelled() => {
                        info!("change feed shutting down");
                        return;
                    }
                };

                match notification {
                    Ok(Some(notification)) => {
                        let Some(event) = parse_notification(
                            notification.channel(),
                            notification.payload(),
                            self.user_id,
                        ) else {
                            continue;
                        };
                        debug!(?event, "change trigger");
                        if events.send(event).await.is_err() {
                            return;
                        }
                    }
                    // Connection dropped; the listener reconnects on the next call
                    // but notifications in between are lost.
                    Ok(None) => {
                        warn!("change feed connection lost, resubscribing");
                        if events.send(ChangeEvent::Resubscribed).await.is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        warn!("change feed receive failed: {err}");
                        break;
                    }
                }
            }
        }
    }

    async fn subscribe(&self) -> Result<PgListener, sqlx::Error> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen_all(CHANNELS).await?;
        Ok(listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_tables_always_trigger() {
        let me = Uuid::new_v4();
        let id = Uuid::new_v4();
        let payload = format!(
            r#"{{"table":"health_reports","op":"insert","id":"{id}","user_id":"{}"}}"#,
            Uuid::new_v4()
        );

        assert_eq!(
            parse_notification(REPORTS_CHANNEL, &payload, me),
            Some(ChangeEvent::ReportInserted { id: Some(id) })
        );
        assert_eq!(
            parse_notification(NOTIFICATIONS_CHANNEL, r#"{"id":null,"user_id":null}"#, me),
            Some(ChangeEvent::NotificationChanged { id: None })
        );
    }

    #[test]
    fn per_user_tables_are_filtered_to_the_session() {
        let me = Uuid::new_v4();
        let notification_id = Uuid::new_v4();
        let mine = format!(r#"{{"id":"{notification_id}","user_id":"{me}"}}"#);
        let theirs = format!(r#"{{"id":"{notification_id}","user_id":"{}"}}"#, Uuid::new_v4());

        assert_eq!(
            parse_notification(READS_CHANNEL, &mine, me),
            Some(ChangeEvent::ReadMarkerInserted {
                notification_id: Some(notification_id)
            })
        );
        assert_eq!(parse_notification(READS_CHANNEL, &theirs, me), None);
        assert_eq!(parse_notification(MESSAGES_CHANNEL, &theirs, me), None);
        assert_eq!(
            parse_notification(MESSAGES_CHANNEL, &mine, me),
            Some(ChangeEvent::MessageChanged)
        );
    }

    #[test]
    fn malformed_payload_still_triggers() {
        let me = Uuid::new_v4();
        assert_eq!(
            parse_notification(READS_CHANNEL, "not json", me),
            Some(ChangeEvent::ReadMarkerInserted {
                notification_id: None
            })
        );
        assert_eq!(parse_notification("unrelated", "{}", me), None);
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let max = Duration::from_secs(4);
        let mut backoff = INITIAL_BACKOFF;
        let mut seen = Vec::new();
        for _ in 0..5 {
            backoff = next_backoff(backoff, max);
            seen.push(backoff.as_millis());
        }
        assert_eq!(seen, vec![1000, 2000, 4000, 4000, 4000]);
    }
}
