use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveTime, Utc};

use crate::models::{
    HealthReport, HealthStatus, LocationAggregate, LocationRiskLevel, Severity,
};

pub const SEVERE_TEMPERATURE: f64 = 39.0;
pub const MODERATE_TEMPERATURE: f64 = 38.0;
pub const MODERATE_SYMPTOM_COUNT: usize = 3;

/// Alerting threshold, independent of the display thresholds above.
pub const HIGH_RISK_TEMPERATURE: f64 = 38.5;
pub const HIGH_RISK_SYMPTOM_COUNT: usize = 3;

pub const GOOD_TEMPERATURE_CEILING: f64 = 37.5;
pub const CHECK_IN_FRESHNESS_HOURS: i64 = 24;

pub fn severity(symptoms: &[String], temperature: Option<f64>) -> Severity {
    if symptoms.is_empty() {
        return Severity::Healthy;
    }

    match temperature {
        Some(t) if t >= SEVERE_TEMPERATURE => Severity::Severe,
        Some(t) if t >= MODERATE_TEMPERATURE => Severity::Moderate,
        _ if symptoms.len() >= MODERATE_SYMPTOM_COUNT => Severity::Moderate,
        _ => Severity::Mild,
    }
}

pub fn is_high_risk(report: &HealthReport) -> bool {
    report
        .temperature
        .is_some_and(|t| t >= HIGH_RISK_TEMPERATURE)
        || report.symptoms.len() >= HIGH_RISK_SYMPTOM_COUNT
}

pub fn location_risk_level(aggregate: &LocationAggregate) -> LocationRiskLevel {
    if aggregate.reports_today == 0 {
        return LocationRiskLevel::Low;
    }

    let today = aggregate.reports_today;
    let avg = aggregate.avg_temperature;
    let avg_at_least = |threshold: f64| avg.is_some_and(|t| t >= threshold);

    if today >= 10 || avg_at_least(39.0) {
        LocationRiskLevel::Critical
    } else if today >= 5 || avg_at_least(38.5) || aggregate.total_symptom_mentions >= 15 {
        LocationRiskLevel::High
    } else if today >= 3 || avg_at_least(38.0) {
        LocationRiskLevel::Medium
    } else {
        LocationRiskLevel::Low
    }
}

/// Groups 7-day reports by location. Reports before `week_start` are ignored.
pub fn aggregate_locations(
    reports: &[HealthReport],
    week_start: DateTime<Utc>,
    today_start: DateTime<Utc>,
) -> BTreeMap<String, LocationAggregate> {
    let mut temperatures: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
    let mut aggregates: BTreeMap<String, LocationAggregate> = BTreeMap::new();

    for report in reports.iter().filter(|r| r.created_at >= week_start) {
        let entry = aggregates.entry(report.location.clone()).or_default();
        entry.reports_week += 1;
        entry.total_symptom_mentions += report.symptoms.len();
        if report.created_at >= today_start {
            entry.reports_today += 1;
        }

        if let Some(t) = report.temperature {
            let sum = temperatures.entry(report.location.as_str()).or_insert((0.0, 0));
            sum.0 += t;
            sum.1 += 1;
        }
    }

    for (location, (total, count)) in temperatures {
        if let Some(entry) = aggregates.get_mut(location) {
            entry.avg_temperature = (count > 0).then(|| total / count as f64);
        }
    }

    aggregates
}

pub fn health_status(latest: Option<&HealthReport>, now: DateTime<Utc>) -> HealthStatus {
    let Some(report) = latest else {
        return HealthStatus::PendingCheckIn;
    };

    if now - report.created_at > Duration::hours(CHECK_IN_FRESHNESS_HOURS) {
        return HealthStatus::PendingCheckIn;
    }

    let below_good_ceiling = report
        .temperature
        .map_or(true, |t| t < GOOD_TEMPERATURE_CEILING);
    if report.symptoms.is_empty() && below_good_ceiling {
        return HealthStatus::Good;
    }

    match severity(&report.symptoms, report.temperature) {
        Severity::Healthy => HealthStatus::Healthy,
        Severity::Mild => HealthStatus::Mild,
        Severity::Moderate => HealthStatus::Moderate,
        Severity::Severe => HealthStatus::Severe,
    }
}

/// Midnight UTC of the day `days_back` days before `now`.
pub fn day_start(now: DateTime<Utc>, days_back: i64) -> DateTime<Utc> {
    (now.date_naive() - Duration::days(days_back))
        .and_time(NaiveTime::MIN)
        .and_utc()
}
