use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{OutbreakFeedError, StoreError};
use crate::models::{
    HealthReport, NotificationStatus, OutbreakAlert, OutbreakSeverity, Priority, Role, Session,
    Severity, SystemNotification,
};
use crate::outbreak::OutbreakFeed;
use crate::reads::read_set;
use crate::risk;
use crate::store::HealthStore;

pub const NOTIFICATION_WINDOW_DAYS: i64 = 30;
pub const HIGH_RISK_WINDOW_HOURS: i64 = 24;

/// Identity of an alert across sources. Ordering doubles as the tie-break
/// when two alerts share a timestamp.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "kind", content = "original_id", rename_all = "snake_case")]
pub enum AlertKey {
    SystemNotification(Uuid),
    HealthReport(Uuid),
    Outbreak(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertItem {
    pub key: AlertKey,
    pub title: String,
    pub message: String,
    pub level: AlertLevel,
    pub location: Option<String>,
    pub occurred_at: DateTime<Utc>,
    /// Only broadcast notifications can ever be read.
    pub read: bool,
}

impl AlertItem {
    pub fn is_read_tracked(&self) -> bool {
        matches!(self.key, AlertKey::SystemNotification(_))
    }
}

fn priority_level(priority: Priority) -> AlertLevel {
    match priority {
        Priority::Low | Priority::Normal => AlertLevel::Info,
        Priority::High => AlertLevel::Warning,
        Priority::Critical => AlertLevel::Critical,
    }
}

fn outbreak_level(severity: OutbreakSeverity) -> AlertLevel {
    match severity {
        OutbreakSeverity::Low => AlertLevel::Info,
        OutbreakSeverity::Medium => AlertLevel::Warning,
        OutbreakSeverity::High => AlertLevel::Critical,
    }
}

pub fn notification_alerts(
    notifications: &[SystemNotification],
    read: &HashSet<Uuid>,
    role: Role,
    since: DateTime<Utc>,
) -> Vec<AlertItem> {
    notifications
        .iter()
        .filter(|n| {
            n.status == NotificationStatus::Sent && n.created_at >= since && n.audience.matches(role)
        })
        .map(|n| AlertItem {
            key: AlertKey::SystemNotification(n.id),
            title: n.title.clone(),
            message: n.message.clone(),
            level: priority_level(n.priority),
            location: None,
            occurred_at: n.created_at,
            read: read.contains(&n.id),
        })
        .collect()
}

pub fn high_risk_alerts(reports: &[HealthReport], role: Role, since: DateTime<Utc>) -> Vec<AlertItem> {
    if !role.is_staff() {
        return Vec::new();
    }

    reports
        .iter()
        .filter(|r| r.created_at >= since && risk::is_high_risk(r))
        .map(|r| {
            let level = match risk::severity(&r.symptoms, r.temperature) {
                Severity::Severe => AlertLevel::Critical,
                _ => AlertLevel::Warning,
            };
            let temperature = r
                .temperature
                .map(|t| format!("{t:.1}°C"))
                .unwrap_or_else(|| "no temperature".to_string());
            AlertItem {
                key: AlertKey::HealthReport(r.id),
                title: format!("High-risk check-in at {}", r.location),
                message: format!("{} symptoms, {}", r.symptoms.len(), temperature),
                level,
                location: Some(r.location.clone()),
                occurred_at: r.created_at,
                read: false,
            }
        })
        .collect()
}

pub fn outbreak_alerts(alerts: &[OutbreakAlert], location: Option<&str>) -> Vec<AlertItem> {
    let Some(location) = location else {
        return Vec::new();
    };

    alerts
        .iter()
        .filter(|a| a.location == location)
        .map(|a| AlertItem {
            key: AlertKey::Outbreak(a.location.clone()),
            title: format!("Possible outbreak in {}", a.location),
            message: format!(
                "{} students affected, risk {:.0}%: {}",
                a.affected_students,
                a.risk_score,
                a.common_symptoms.join(", ")
            ),
            level: outbreak_level(a.severity),
            location: Some(a.location.clone()),
            occurred_at: a.detection_time,
            read: false,
        })
        .collect()
}

/// Newest first. Duplicate keys collapse to the most recent occurrence, so the
/// result only depends on the set of inputs, not the order they arrive in.
pub fn merge<I>(sources: I) -> Vec<AlertItem>
where
    I: IntoIterator<Item = Vec<AlertItem>>,
{
    let mut unique: BTreeMap<AlertKey, AlertItem> = BTreeMap::new();
    for item in sources.into_iter().flatten() {
        match unique.get(&item.key) {
            Some(existing) if existing.occurred_at >= item.occurred_at => {}
            _ => {
                unique.insert(item.key.clone(), item);
            }
        }
    }

    let mut merged: Vec<AlertItem> = unique.into_values().collect();
    merged.sort_by(|a, b| {
        b.occurred_at
            .cmp(&a.occurred_at)
            .then_with(|| a.key.cmp(&b.key))
    });
    merged
}

#[derive(Debug, Clone, Default)]
pub struct AlertFeed {
    pub items: Vec<AlertItem>,
    /// Audience-matching broadcasts in the window, read or not.
    pub notifications: Vec<SystemNotification>,
    pub unread_notifications: usize,
    pub outbreak_available: bool,
}

impl AlertFeed {
    pub fn unread(&self) -> impl Iterator<Item = &AlertItem> {
        self.items.iter().filter(|item| !item.read)
    }

    /// Badge for ephemeral alerts; these are never read-tracked.
    pub fn ephemeral_count(&self) -> usize {
        self.items.iter().filter(|item| !item.is_read_tracked()).count()
    }
}

pub struct AlertMerger {
    session: Session,
    store: Arc<dyn HealthStore>,
    outbreaks: Arc<dyn OutbreakFeed>,
    outbreak_timeout: Duration,
}

impl AlertMerger {
    pub fn new(
        session: Session,
        store: Arc<dyn HealthStore>,
        outbreaks: Arc<dyn OutbreakFeed>,
        outbreak_timeout: Duration,
    ) -> Self {
        Self {
            session,
            store,
            outbreaks,
            outbreak_timeout,
        }
    }

    /// Fetches all three sources concurrently. A store failure fails the whole
    /// feed; an outbreak failure only drops that source.
    pub async fn collect(
        &self,
        now: DateTime<Utc>,
        latest_location: Option<&str>,
    ) -> Result<AlertFeed, StoreError> {
        let notification_since = now - chrono::Duration::days(NOTIFICATION_WINDOW_DAYS);
        let report_since = now - chrono::Duration::hours(HIGH_RISK_WINDOW_HOURS);
        let role = self.session.role;

        let reports = async {
            if role.is_staff() {
                self.store.reports_since(report_since).await
            } else {
                Ok(Vec::new())
            }
        };

        let (notifications, markers, reports, outbreaks) = tokio::join!(
            self.store.sent_notifications_since(notification_since),
            self.store.read_markers_for_user(self.session.user_id),
            reports,
            self.fetch_outbreaks(),
        );
        let notifications = notifications?;
        let markers = markers?;
        let reports = reports?;

        let read = read_set(&markers, self.session.user_id);
        let broadcast = notification_alerts(&notifications, &read, role, notification_since);
        let unread_notifications = broadcast.iter().filter(|item| !item.read).count();
        let visible: Vec<SystemNotification> = notifications
            .into_iter()
            .filter(|n| n.audience.matches(role))
            .collect();

        let outbreak_available = outbreaks.is_some();
        let outbreak_items = outbreaks
            .map(|alerts| outbreak_alerts(&alerts, latest_location))
            .unwrap_or_default();

        let items = merge([
            broadcast,
            high_risk_alerts(&reports, role, report_since),
            outbreak_items,
        ]);

        debug!(
            user_id = %self.session.user_id,
            items = items.len(),
            unread_notifications,
            outbreak_available,
            "alert feed merged"
        );

        Ok(AlertFeed {
            items,
            notifications: visible,
            unread_notifications,
            outbreak_available,
        })
    }

    async fn fetch_outbreaks(&self) -> Option<Vec<OutbreakAlert>> {
        let result = match tokio::time::timeout(self.outbreak_timeout, self.outbreaks.fetch_alerts())
            .await
        {
            Ok(result) => result,
            Err(_) => Err(OutbreakFeedError::Timeout(self.outbreak_timeout)),
        };

        match result {
            Ok(alerts) => Some(alerts),
            Err(err) => {
                warn!("outbreak feed unavailable, continuing without it: {err}");
                None
            }
        }
    }
}

#[cfg(test)]
pub mod fakes {
    use async_trait::async_trait;

    use super::*;

    pub enum FakeOutbreakFeed {
        Alerts(Vec<OutbreakAlert>),
        Status(u16),
        Hang(Duration),
    }

    #[async_trait]
    impl OutbreakFeed for FakeOutbreakFeed {
        async fn fetch_alerts(&self) -> Result<Vec<OutbreakAlert>, OutbreakFeedError> {
            match self {
                FakeOutbreakFeed::Alerts(alerts) => Ok(alerts.clone()),
                FakeOutbreakFeed::Status(code) => Err(OutbreakFeedError::Status(*code)),
                FakeOutbreakFeed::Hang(delay) => {
                    tokio::time::sleep(*delay).await;
                    Ok(Vec::new())
                }
            }
        }
    }

    pub fn outbreak(location: &str, detection_time: DateTime<Utc>) -> OutbreakAlert {
        OutbreakAlert {
            location: location.to_string(),
            severity: OutbreakSeverity::High,
            risk_score: 73.5,
            affected_students: 6,
            common_symptoms: vec!["fever".to_string(), "cough".to_string()],
            detection_time,
            debug: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::{outbreak, FakeOutbreakFeed};
    use super::*;
    use crate::models::Audience;
    use crate::store::memory::MemoryStore;
    use chrono::Duration as ChronoDuration;

    fn notification(audience: Audience, minutes_ago: i64, now: DateTime<Utc>) -> SystemNotification {
        SystemNotification {
            id: Uuid::new_v4(),
            title: "Notice".to_string(),
            message: "Stay home if unwell".to_string(),
            audience,
            priority: Priority::High,
            status: NotificationStatus::Sent,
            created_by: Uuid::new_v4(),
            created_at: now - ChronoDuration::minutes(minutes_ago),
            sent_at: Some(now - ChronoDuration::minutes(minutes_ago)),
        }
    }

    fn report(symptoms: &[&str], temperature: Option<f64>, minutes_ago: i64, now: DateTime<Utc>) -> HealthReport {
        HealthReport {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            symptoms: symptoms.iter().map(|s| s.to_string()).collect(),
            temperature,
            location: "Hostel B".to_string(),
            created_at: now - ChronoDuration::minutes(minutes_ago),
        }
    }

    #[test]
    fn audience_all_matches_every_role_and_parents_exclude_students() {
        for role in [Role::Student, Role::Parent, Role::HealthOfficer, Role::Admin] {
            assert!(Audience::All.matches(role));
        }
        assert!(!Audience::Parents.matches(Role::Student));
        assert!(Audience::Parents.matches(Role::Parent));
    }

    #[test]
    fn notification_source_filters_status_window_and_audience() {
        let now = Utc::now();
        let since = now - ChronoDuration::days(NOTIFICATION_WINDOW_DAYS);
        let mut draft = notification(Audience::All, 5, now);
        draft.status = NotificationStatus::Draft;
        let old = notification(Audience::All, 60 * 24 * 31, now);
        let parents = notification(Audience::Parents, 10, now);
        let fresh = notification(Audience::Students, 1, now);

        let items = notification_alerts(
            &[draft, old, parents, fresh.clone()],
            &HashSet::new(),
            Role::Student,
            since,
        );

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].key, AlertKey::SystemNotification(fresh.id));
        assert!(!items[0].read);
    }

    #[test]
    fn high_risk_reports_are_staff_only() {
        let now = Utc::now();
        let since = now - ChronoDuration::hours(HIGH_RISK_WINDOW_HOURS);
        let reports = vec![
            report(&["fever"], Some(38.7), 10, now),
            report(&["cough"], Some(38.2), 10, now),
            report(&["a", "b", "c"], None, 60 * 25, now),
        ];

        assert!(high_risk_alerts(&reports, Role::Student, since).is_empty());
        assert!(high_risk_alerts(&reports, Role::Parent, since).is_empty());
        let staff = high_risk_alerts(&reports, Role::HealthOfficer, since);
        assert_eq!(staff.len(), 1);
        assert_eq!(staff[0].key, AlertKey::HealthReport(reports[0].id));
    }

    #[test]
    fn outbreak_source_keeps_only_the_users_location() {
        let now = Utc::now();
        let alerts = vec![outbreak("Hostel A", now), outbreak("Hostel C", now)];

        assert!(outbreak_alerts(&alerts, None).is_empty());
        let mine = outbreak_alerts(&alerts, Some("Hostel C"));
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].key, AlertKey::Outbreak("Hostel C".to_string()));
        assert_eq!(mine[0].level, AlertLevel::Critical);
    }

    #[test]
    fn merge_order_depends_only_on_timestamps() {
        let now = Utc::now();
        let broadcast = notification_alerts(
            &[notification(Audience::All, 30, now), notification(Audience::All, 2, now)],
            &HashSet::new(),
            Role::Admin,
            now - ChronoDuration::days(30),
        );
        let reports = high_risk_alerts(
            &[report(&["fever"], Some(39.1), 15, now)],
            Role::Admin,
            now - ChronoDuration::hours(24),
        );
        let outbreaks = outbreak_alerts(
            &[outbreak("Hostel B", now - ChronoDuration::minutes(8))],
            Some("Hostel B"),
        );

        let forward = merge([broadcast.clone(), reports.clone(), outbreaks.clone()]);
        let backward = merge([outbreaks.clone(), reports.clone(), broadcast.clone()]);
        let shuffled = merge([reports, broadcast, outbreaks]);

        assert_eq!(forward, backward);
        assert_eq!(forward, shuffled);
        assert!(forward
            .windows(2)
            .all(|pair| pair[0].occurred_at >= pair[1].occurred_at));
        assert_eq!(forward.len(), 4);
    }

    #[test]
    fn merge_collapses_duplicate_keys() {
        let now = Utc::now();
        let first = outbreak_alerts(&[outbreak("Hostel A", now)], Some("Hostel A"));
        let again = outbreak_alerts(
            &[outbreak("Hostel A", now - ChronoDuration::minutes(5))],
            Some("Hostel A"),
        );

        let merged = merge([again, first.clone()]);
        assert_eq!(merged, first);
    }

    #[tokio::test]
    async fn unreachable_outbreak_feed_keeps_other_sources() {
        let now = Utc::now();
        let store = Arc::new(MemoryStore::default());
        store
            .notifications
            .lock()
            .unwrap()
            .push(notification(Audience::All, 3, now));

        let session = Session {
            user_id: Uuid::new_v4(),
            role: Role::Student,
        };
        let merger = AlertMerger::new(
            session,
            store.clone(),
            Arc::new(FakeOutbreakFeed::Status(503)),
            Duration::from_secs(1),
        );

        let feed = merger.collect(now, Some("Hostel A")).await.unwrap();
        assert!(!feed.outbreak_available);
        assert_eq!(feed.items.len(), 1);
        assert_eq!(feed.unread_notifications, 1);
    }

    #[tokio::test]
    async fn slow_outbreak_feed_is_cut_off() {
        let now = Utc::now();
        let store = Arc::new(MemoryStore::default());
        let merger = AlertMerger::new(
            Session {
                user_id: Uuid::new_v4(),
                role: Role::Student,
            },
            store,
            Arc::new(FakeOutbreakFeed::Hang(Duration::from_secs(5))),
            Duration::from_millis(20),
        );

        let started = std::time::Instant::now();
        let feed = merger.collect(now, Some("Hostel A")).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!feed.outbreak_available);
        assert!(feed.items.is_empty());
    }
}
