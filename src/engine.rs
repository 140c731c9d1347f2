use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::alerts::{AlertFeed, AlertMerger, NOTIFICATION_WINDOW_DAYS};
use crate::error::EngineError;
use crate::feed::ChangeEvent;
use crate::models::{
    BadgeCounts, DailyTrend, DerivedState, HealthReport, LocationRisk, Session, SymptomCount,
};
use crate::outbreak::OutbreakFeed;
use crate::reads::ReadStateTracker;
use crate::risk;
use crate::store::HealthStore;

pub const TREND_DAYS: i64 = 7;
pub const STREAK_WINDOW_DAYS: i64 = 30;
pub const TOP_SYMPTOM_LIMIT: usize = 5;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub outbreak_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            outbreak_timeout: Duration::from_secs(3),
        }
    }
}

/// The latest published result. `state` survives failed recomputes, which
/// only flip `stale` and set `error`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Snapshot {
    pub seq: u64,
    pub computed_at: Option<DateTime<Utc>>,
    pub state: Option<DerivedState>,
    pub stale: bool,
    pub error: Option<String>,
    pub loading: bool,
}

/// Raw rows fetched for one recompute cycle.
#[derive(Debug, Clone, Default)]
pub struct RecomputeInputs {
    pub own_reports: Vec<HealthReport>,
    pub school_reports: Vec<HealthReport>,
    pub latest: Option<HealthReport>,
    pub unread_messages: usize,
}

/// Consecutive days with a report, counted back from `today`. Zero unless
/// `today` itself has a report.
pub fn streak<I>(report_times: I, today: NaiveDate) -> u32
where
    I: IntoIterator<Item = DateTime<Utc>>,
{
    let window_start = today - ChronoDuration::days(STREAK_WINDOW_DAYS - 1);
    let days: BTreeSet<NaiveDate> = report_times
        .into_iter()
        .map(|t| t.date_naive())
        .filter(|d| *d >= window_start && *d <= today)
        .collect();

    let mut count = 0;
    let mut expected = today;
    for day in days.iter().rev() {
        if *day != expected {
            break;
        }
        count += 1;
        expected = expected - ChronoDuration::days(1);
    }
    count
}

/// Seven entries, oldest day first, ending with `today`.
pub fn weekly_trend(reports: &[HealthReport], today: NaiveDate) -> Vec<DailyTrend> {
    let mut days: BTreeMap<NaiveDate, DailyTrend> = (0..TREND_DAYS)
        .map(|offset| {
            let date = today - ChronoDuration::days(offset);
            (
                date,
                DailyTrend {
                    date,
                    reports: 0,
                    high_risk: 0,
                },
            )
        })
        .collect();

    for report in reports {
        if let Some(day) = days.get_mut(&report.created_at.date_naive()) {
            day.reports += 1;
            if risk::is_high_risk(report) {
                day.high_risk += 1;
            }
        }
    }

    days.into_values().collect()
}

pub fn top_symptoms(reports: &[HealthReport]) -> Vec<SymptomCount> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for symptom in reports.iter().flat_map(|r| r.symptoms.iter()) {
        let name = symptom.trim().to_lowercase();
        if !name.is_empty() {
            *counts.entry(name).or_insert(0) += 1;
        }
    }

    let mut ranked: Vec<SymptomCount> = counts
        .into_iter()
        .map(|(symptom, count)| SymptomCount { symptom, count })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.symptom.cmp(&b.symptom)));
    ranked.truncate(TOP_SYMPTOM_LIMIT);
    ranked
}

/// Riskiest locations first.
pub fn location_breakdown(reports: &[HealthReport], now: DateTime<Utc>) -> Vec<LocationRisk> {
    let week_start = risk::day_start(now, TREND_DAYS - 1);
    let today_start = risk::day_start(now, 0);

    let mut breakdown: Vec<LocationRisk> = risk::aggregate_locations(reports, week_start, today_start)
        .into_iter()
        .map(|(location, aggregate)| LocationRisk {
            level: risk::location_risk_level(&aggregate),
            location,
            aggregate,
        })
        .collect();
    breakdown.sort_by(|a, b| b.level.cmp(&a.level).then_with(|| a.location.cmp(&b.location)));
    breakdown
}

pub fn derive_state(
    session: &Session,
    inputs: &RecomputeInputs,
    feed: &AlertFeed,
    now: DateTime<Utc>,
) -> DerivedState {
    let today = now.date_naive();
    let yesterday = today - ChronoDuration::days(1);
    let week_start = risk::day_start(now, TREND_DAYS - 1);

    let scoped: Vec<HealthReport> = if session.role.is_staff() {
        inputs.school_reports.clone()
    } else {
        inputs.own_reports.clone()
    };
    let this_week: Vec<HealthReport> = scoped
        .into_iter()
        .filter(|r| r.created_at >= week_start && r.created_at <= now)
        .collect();
    let on_day = |day: NaiveDate| {
        this_week
            .iter()
            .filter(|r| r.created_at.date_naive() == day)
            .count()
    };

    let active_alerts: Vec<_> = feed.unread().cloned().collect();

    DerivedState {
        weekly_checkins: this_week.len(),
        checkins_today: on_day(today),
        checkins_yesterday: on_day(yesterday),
        current_health_status: risk::health_status(inputs.latest.as_ref(), now),
        streak: streak(inputs.own_reports.iter().map(|r| r.created_at), today),
        weekly_trend: weekly_trend(&this_week, today),
        top_symptoms: top_symptoms(&this_week),
        location_breakdown: location_breakdown(&inputs.school_reports, now),
        badges: BadgeCounts {
            messages: inputs.unread_messages,
            notifications: feed.unread_notifications,
            alerts: feed.ephemeral_count(),
        },
        active_alerts,
    }
}

pub struct AggregationEngine {
    session: Session,
    store: Arc<dyn HealthStore>,
    merger: AlertMerger,
    reads: ReadStateTracker,
    next_seq: AtomicU64,
    in_flight: AtomicUsize,
    snapshots: watch::Sender<Snapshot>,
}

impl AggregationEngine {
    pub fn new(
        session: Session,
        store: Arc<dyn HealthStore>,
        outbreaks: Arc<dyn OutbreakFeed>,
        options: EngineOptions,
    ) -> Self {
        let merger = AlertMerger::new(
            session,
            Arc::clone(&store),
            outbreaks,
            options.outbreak_timeout,
        );
        let (snapshots, _) = watch::channel(Snapshot::default());

        Self {
            session,
            reads: ReadStateTracker::new(Arc::clone(&store)),
            store,
            merger,
            next_seq: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            snapshots,
        }
    }

    pub fn session(&self) -> Session {
        self.session
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    pub async fn refresh(&self) -> Result<Snapshot, EngineError> {
        self.recompute().await
    }

    /// Fetches fresh rows, derives everything, and publishes the result unless
    /// a newer recompute already has.
    pub async fn recompute(&self) -> Result<Snapshot, EngineError> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.snapshots.send_if_modified(|snapshot| {
            let changed = !snapshot.loading;
            snapshot.loading = true;
            changed
        });

        let now = Utc::now();
        let result = self.compute(now).await;
        self.finish(seq, now, result)
    }

    async fn compute(&self, now: DateTime<Utc>) -> Result<DerivedState, EngineError> {
        let user_id = self.session.user_id;
        let latest = self.store.latest_report_for_user(user_id).await?;
        let location = latest.as_ref().map(|r| r.location.as_str());

        let (own_reports, school_reports, unread_messages, feed) = tokio::join!(
            self.store
                .reports_for_user_since(user_id, risk::day_start(now, STREAK_WINDOW_DAYS - 1)),
            self.store.reports_since(risk::day_start(now, TREND_DAYS - 1)),
            self.store.unread_message_count(user_id),
            self.merger.collect(now, location),
        );

        let inputs = RecomputeInputs {
            own_reports: own_reports?,
            school_reports: school_reports?,
            unread_messages: unread_messages?,
            latest,
        };
        let feed = feed?;

        Ok(derive_state(&self.session, &inputs, &feed, now))
    }

    fn finish(
        &self,
        seq: u64,
        now: DateTime<Utc>,
        result: Result<DerivedState, EngineError>,
    ) -> Result<Snapshot, EngineError> {
        let loading = self.in_flight.fetch_sub(1, Ordering::SeqCst) > 1;

        let outcome = match result {
            Ok(state) => Ok(state),
            Err(err) => {
                error!(user_id = %self.session.user_id, seq, "recompute failed: {err}");
                Err(err)
            }
        };

        let message = outcome.as_ref().err().map(|err| err.to_string());
        let state = outcome.as_ref().ok().cloned();
        self.snapshots.send_if_modified(|snapshot| {
            let loading_changed = snapshot.loading != loading;
            snapshot.loading = loading;

            if seq <= snapshot.seq {
                debug!(seq, latest = snapshot.seq, "dropping superseded recompute");
                return loading_changed;
            }

            snapshot.seq = seq;
            match &state {
                Some(state) => {
                    snapshot.state = Some(state.clone());
                    snapshot.computed_at = Some(now);
                    snapshot.stale = false;
                    snapshot.error = None;
                }
                None => {
                    snapshot.stale = snapshot.state.is_some();
                    snapshot.error = message.clone();
                }
            }
            true
        });

        outcome.map(|_| self.snapshot())
    }

    /// Marks one broadcast read, then recomputes.
    pub async fn mark_read(&self, notification_id: uuid::Uuid) -> Result<Snapshot, EngineError> {
        self.reads
            .mark_read(notification_id, self.session.user_id)
            .await?;
        self.recompute().await
    }

    /// Best effort: failures are logged, and the returned snapshot reflects
    /// whatever was actually persisted.
    pub async fn mark_all_read(&self) -> Snapshot {
        let since = Utc::now() - ChronoDuration::days(NOTIFICATION_WINDOW_DAYS);
        match self.store.sent_notifications_since(since).await {
            Ok(notifications) => {
                let visible: Vec<_> = notifications
                    .into_iter()
                    .filter(|n| n.audience.matches(self.session.role))
                    .collect();
                self.reads
                    .mark_all_read(&visible, self.session.user_id)
                    .await;
            }
            Err(err) => error!("could not load notifications to mark read: {err}"),
        }

        match self.recompute().await {
            Ok(snapshot) => snapshot,
            Err(_) => self.snapshot(),
        }
    }

    fn spawn_recompute(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = engine.recompute().await {
                debug!("background recompute failed: {err}");
            }
        });
    }

    /// Initial load, then one recompute per burst of triggers. Recomputes run
    /// concurrently; the sequence guard keeps the freshest result.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<ChangeEvent>, cancel: CancellationToken) {
        info!(user_id = %self.session.user_id, role = %self.session.role, "aggregation engine started");
        self.spawn_recompute();

        loop {
            let event = tokio::select! {
                event = events.recv() => event,
                _ = cancel.cancelled() => break,
            };
            let Some(event) = event else {
                break;
            };

            let mut coalesced = 1usize;
            while events.try_recv().is_ok() {
                coalesced += 1;
            }
            debug!(?event, coalesced, "recompute triggered");
            self.spawn_recompute();
        }

        info!(user_id = %self.session.user_id, "aggregation engine stopped");
    }
}
