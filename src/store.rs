use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{HealthReport, ReadMarker, SystemNotification};

/// Bounded reads and idempotent writes the engine needs from the backing store.
#[async_trait]
pub trait HealthStore: Send + Sync {
    async fn reports_for_user_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<HealthReport>, StoreError>;

    async fn reports_since(&self, since: DateTime<Utc>) -> Result<Vec<HealthReport>, StoreError>;

    async fn latest_report_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<HealthReport>, StoreError>;

    /// Notifications in `sent` status created at or after `since`, newest first.
    async fn sent_notifications_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<SystemNotification>, StoreError>;

    async fn read_markers_for_user(&self, user_id: Uuid) -> Result<Vec<ReadMarker>, StoreError>;

    /// Inserts markers, ignoring pairs that already exist. Returns how many were new.
    async fn upsert_read_markers(&self, markers: &[ReadMarker]) -> Result<u64, StoreError>;

    async fn unread_message_count(&self, user_id: Uuid) -> Result<usize, StoreError>;
}

#[cfg(test)]
pub mod memory {
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::models::NotificationStatus;

    #[derive(Default)]
    pub struct MemoryStore {
        pub reports: Mutex<Vec<HealthReport>>,
        pub notifications: Mutex<Vec<SystemNotification>>,
        pub markers: Mutex<BTreeSet<(Uuid, Uuid)>>,
        pub unread_messages: Mutex<Vec<Uuid>>,
        pub fail_queries: AtomicBool,
        pub fail_writes: AtomicBool,
    }

    impl MemoryStore {
        pub fn set_failing(&self, failing: bool) {
            self.fail_queries.store(failing, Ordering::SeqCst);
        }

        pub fn marker_count(&self) -> usize {
            self.markers.lock().unwrap().len()
        }

        fn check(&self) -> Result<(), StoreError> {
            if self.fail_queries.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("memory store offline".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl HealthStore for MemoryStore {
        async fn reports_for_user_since(
            &self,
            user_id: Uuid,
            since: DateTime<Utc>,
        ) -> Result<Vec<HealthReport>, StoreError> {
            self.check()?;
            let reports = self.reports.lock().unwrap();
            Ok(reports
                .iter()
                .filter(|r| r.user_id == user_id && r.created_at >= since)
                .cloned()
                .collect())
        }

        async fn reports_since(
            &self,
            since: DateTime<Utc>,
        ) -> Result<Vec<HealthReport>, StoreError> {
            self.check()?;
            let reports = self.reports.lock().unwrap();
            Ok(reports.iter().filter(|r| r.created_at >= since).cloned().collect())
        }

        async fn latest_report_for_user(
            &self,
            user_id: Uuid,
        ) -> Result<Option<HealthReport>, StoreError> {
            self.check()?;
            let reports = self.reports.lock().unwrap();
            Ok(reports
                .iter()
                .filter(|r| r.user_id == user_id)
                .max_by_key(|r| r.created_at)
                .cloned())
        }

        async fn sent_notifications_since(
            &self,
            since: DateTime<Utc>,
        ) -> Result<Vec<SystemNotification>, StoreError> {
            self.check()?;
            let notifications = self.notifications.lock().unwrap();
            let mut sent: Vec<SystemNotification> = notifications
                .iter()
                .filter(|n| n.status == NotificationStatus::Sent && n.created_at >= since)
                .cloned()
                .collect();
            sent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(sent)
        }

        async fn read_markers_for_user(
            &self,
            user_id: Uuid,
        ) -> Result<Vec<ReadMarker>, StoreError> {
            self.check()?;
            let markers = self.markers.lock().unwrap();
            Ok(markers
                .iter()
                .filter(|(_, user)| *user == user_id)
                .map(|(notification_id, user_id)| ReadMarker {
                    notification_id: *notification_id,
                    user_id: *user_id,
                })
                .collect())
        }

        async fn upsert_read_markers(&self, markers: &[ReadMarker]) -> Result<u64, StoreError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("memory store read-only".to_string()));
            }
            let mut stored = self.markers.lock().unwrap();
            let inserted = markers
                .iter()
                .filter(|m| stored.insert((m.notification_id, m.user_id)))
                .count();
            Ok(inserted as u64)
        }

        async fn unread_message_count(&self, user_id: Uuid) -> Result<usize, StoreError> {
            self.check()?;
            let messages = self.unread_messages.lock().unwrap();
            Ok(messages.iter().filter(|recipient| **recipient == user_id).count())
        }
    }
}
