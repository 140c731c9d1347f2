use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{ReadMarker, Role, SystemNotification};
use crate::store::HealthStore;

/// Per-user read markers for broadcast notifications. Read is terminal.
#[derive(Clone)]
pub struct ReadStateTracker {
    store: Arc<dyn HealthStore>,
}

impl ReadStateTracker {
    pub fn new(store: Arc<dyn HealthStore>) -> Self {
        Self { store }
    }

    /// Idempotent: marking an already-read notification is a no-op.
    pub async fn mark_read(&self, notification_id: Uuid, user_id: Uuid) -> Result<(), StoreError> {
        let marker = ReadMarker {
            notification_id,
            user_id,
        };
        let inserted = self.store.upsert_read_markers(&[marker]).await?;
        debug!(%notification_id, %user_id, inserted, "mark_read");
        Ok(())
    }

    /// Best effort. Returns how many markers were newly written; failures are
    /// logged and reported as zero.
    pub async fn mark_all_read(&self, notifications: &[SystemNotification], user_id: Uuid) -> u64 {
        let markers: Vec<ReadMarker> = notifications
            .iter()
            .map(|n| ReadMarker {
                notification_id: n.id,
                user_id,
            })
            .collect();

        match self.store.upsert_read_markers(&markers).await {
            Ok(inserted) => {
                debug!(%user_id, requested = markers.len(), inserted, "mark_all_read");
                inserted
            }
            Err(err) => {
                warn!(%user_id, "failed to mark {} notifications read: {err}", markers.len());
                0
            }
        }
    }

    pub async fn markers(&self, user_id: Uuid) -> Result<Vec<ReadMarker>, StoreError> {
        self.store.read_markers_for_user(user_id).await
    }
}

pub fn read_set(markers: &[ReadMarker], user_id: Uuid) -> HashSet<Uuid> {
    markers
        .iter()
        .filter(|m| m.user_id == user_id)
        .map(|m| m.notification_id)
        .collect()
}

/// Audience-matching notifications that carry no marker for this user.
pub fn unread_count(
    notifications: &[SystemNotification],
    markers: &[ReadMarker],
    user_id: Uuid,
    role: Role,
) -> usize {
    let read = read_set(markers, user_id);
    notifications
        .iter()
        .filter(|n| n.audience.matches(role) && !read.contains(&n.id))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Audience, NotificationStatus, Priority};
    use crate::store::memory::MemoryStore;
    use chrono::Utc;

    fn notification(audience: Audience) -> SystemNotification {
        SystemNotification {
            id: Uuid::new_v4(),
            title: "Notice".to_string(),
            message: "Please check in".to_string(),
            audience,
            priority: Priority::Normal,
            status: NotificationStatus::Sent,
            created_by: Uuid::new_v4(),
            created_at: Utc::now(),
            sent_at: Some(Utc::now()),
        }
    }

    #[tokio::test]
    async fn mark_read_twice_leaves_one_marker() {
        let store = Arc::new(MemoryStore::default());
        let tracker = ReadStateTracker::new(store.clone());
        let user = Uuid::new_v4();
        let n = notification(Audience::All);

        tracker.mark_read(n.id, user).await.unwrap();
        tracker.mark_read(n.id, user).await.unwrap();

        assert_eq!(store.marker_count(), 1);
    }

    #[tokio::test]
    async fn unread_count_never_increases_as_items_are_read() {
        let store = Arc::new(MemoryStore::default());
        let tracker = ReadStateTracker::new(store.clone());
        let user = Uuid::new_v4();
        let notifications: Vec<_> = (0..4).map(|_| notification(Audience::Students)).collect();

        let mut previous = usize::MAX;
        for n in notifications.iter().chain(notifications.iter()) {
            let markers = tracker.markers(user).await.unwrap();
            let count = unread_count(&notifications, &markers, user, Role::Student);
            assert!(count <= previous);
            previous = count;
            tracker.mark_read(n.id, user).await.unwrap();
        }

        let markers = tracker.markers(user).await.unwrap();
        assert_eq!(unread_count(&notifications, &markers, user, Role::Student), 0);
    }

    #[test]
    fn unread_count_respects_audience_and_owner() {
        let user = Uuid::new_v4();
        let someone_else = Uuid::new_v4();
        let all = notification(Audience::All);
        let parents = notification(Audience::Parents);
        let students = notification(Audience::Students);
        let markers = vec![ReadMarker {
            notification_id: students.id,
            user_id: someone_else,
        }];
        let notifications = vec![all, parents, students];

        assert_eq!(unread_count(&notifications, &markers, user, Role::Student), 2);
        assert_eq!(unread_count(&notifications, &markers, someone_else, Role::Student), 1);
        assert_eq!(unread_count(&notifications, &[], user, Role::Parent), 2);
    }

    #[tokio::test]
    async fn concurrent_mark_all_read_yields_union() {
        let store = Arc::new(MemoryStore::default());
        let tracker = ReadStateTracker::new(store.clone());
        let user = Uuid::new_v4();
        let notifications: Vec<_> = (0..5).map(|_| notification(Audience::All)).collect();

        let first = tracker.clone();
        let second = tracker.clone();
        let left = notifications[..3].to_vec();
        let right = notifications[2..].to_vec();
        let (a, b) = tokio::join!(
            async move { first.mark_all_read(&left, user).await },
            async move { second.mark_all_read(&right, user).await },
        );

        assert_eq!(a + b, 5);
        assert_eq!(store.marker_count(), 5);
    }

    #[tokio::test]
    async fn mark_all_read_failure_is_not_fatal() {
        let store = Arc::new(MemoryStore::default());
        store
            .fail_writes
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let tracker = ReadStateTracker::new(store.clone());

        let written = tracker
            .mark_all_read(&[notification(Audience::All)], Uuid::new_v4())
            .await;

        assert_eq!(written, 0);
        assert_eq!(store.marker_count(), 0);
    }
}
