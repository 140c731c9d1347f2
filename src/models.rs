use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::UnknownVariant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Parent,
    HealthOfficer,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Parent => "parent",
            Role::HealthOfficer => "health_officer",
            Role::Admin => "admin",
        }
    }

    /// Officers and admins see school-wide data and high-risk report alerts.
    pub fn is_staff(&self) -> bool {
        matches!(self, Role::HealthOfficer | Role::Admin)
    }
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "student" => Ok(Role::Student),
            "parent" => Ok(Role::Parent),
            "health_officer" => Ok(Role::HealthOfficer),
            "admin" => Ok(Role::Admin),
            other => Err(UnknownVariant::new("role", other)),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    All,
    Students,
    Parents,
    HealthOfficers,
    Admins,
}

impl Audience {
    pub fn as_str(&self) -> &'static str {
        match self {
            Audience::All => "all",
            Audience::Students => "students",
            Audience::Parents => "parents",
            Audience::HealthOfficers => "health_officers",
            Audience::Admins => "admins",
        }
    }

    pub fn matches(&self, role: Role) -> bool {
        match self {
            Audience::All => true,
            Audience::Students => role == Role::Student,
            Audience::Parents => role == Role::Parent,
            Audience::HealthOfficers => role == Role::HealthOfficer,
            Audience::Admins => role == Role::Admin,
        }
    }
}

impl FromStr for Audience {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "all" => Ok(Audience::All),
            "students" => Ok(Audience::Students),
            "parents" => Ok(Audience::Parents),
            "health_officers" => Ok(Audience::HealthOfficers),
            "admins" => Ok(Audience::Admins),
            other => Err(UnknownVariant::new("audience", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl FromStr for Priority {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            other => Err(UnknownVariant::new("priority", other)),
        }
    }
}

/// `Scheduled` exists in the schema but nothing transitions into it yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Draft,
    Scheduled,
    Sent,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Draft => "draft",
            NotificationStatus::Scheduled => "scheduled",
            NotificationStatus::Sent => "sent",
        }
    }
}

impl FromStr for NotificationStatus {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "draft" => Ok(NotificationStatus::Draft),
            "scheduled" => Ok(NotificationStatus::Scheduled),
            "sent" => Ok(NotificationStatus::Sent),
            other => Err(UnknownVariant::new("notification status", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub id: Uuid,
    pub user_id: Uuid,
    pub symptoms: Vec<String>,
    pub temperature: Option<f64>,
    pub location: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemNotification {
    pub id: Uuid,
    pub title: String,
    pub message: String,
    pub audience: Audience,
    pub priority: Priority,
    pub status: NotificationStatus,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReadMarker {
    pub notification_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OutbreakSeverity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutbreakDebug {
    pub baseline_mean: f64,
    pub baseline_std_dev: f64,
    pub current_count: i64,
    pub z_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutbreakAlert {
    pub location: String,
    pub severity: OutbreakSeverity,
    pub risk_score: f64,
    pub affected_students: u32,
    #[serde(default)]
    pub common_symptoms: Vec<String>,
    #[serde(deserialize_with = "crate::outbreak::deserialize_detection_time")]
    pub detection_time: DateTime<Utc>,
    #[serde(rename = "_debug", default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<OutbreakDebug>,
}

/// Display classification of a single check-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Healthy,
    Mild,
    Moderate,
    Severe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationRiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl LocationRiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationRiskLevel::Low => "low",
            LocationRiskLevel::Medium => "medium",
            LocationRiskLevel::High => "high",
            LocationRiskLevel::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    PendingCheckIn,
    Good,
    Healthy,
    Mild,
    Moderate,
    Severe,
}

impl HealthStatus {
    pub fn label(&self) -> &'static str {
        match self {
            HealthStatus::PendingCheckIn => "Pending check-in",
            HealthStatus::Good => "Good",
            HealthStatus::Healthy => "Healthy",
            HealthStatus::Mild => "Mild symptoms",
            HealthStatus::Moderate => "Moderate symptoms",
            HealthStatus::Severe => "Severe symptoms",
        }
    }
}

/// Per-location inputs to the location risk classification, over the 7-day window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LocationAggregate {
    pub reports_today: usize,
    pub reports_week: usize,
    pub avg_temperature: Option<f64>,
    pub total_symptom_mentions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationRisk {
    pub location: String,
    pub aggregate: LocationAggregate,
    pub level: LocationRiskLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyTrend {
    pub date: NaiveDate,
    pub reports: usize,
    pub high_risk: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymptomCount {
    pub symptom: String,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BadgeCounts {
    pub messages: usize,
    pub notifications: usize,
    pub alerts: usize,
}

/// Everything a dashboard shows for one user, recomputed from scratch each cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedState {
    pub weekly_checkins: usize,
    pub checkins_today: usize,
    pub checkins_yesterday: usize,
    pub current_health_status: HealthStatus,
    pub streak: u32,
    pub active_alerts: Vec<crate::alerts::AlertItem>,
    pub weekly_trend: Vec<DailyTrend>,
    pub top_symptoms: Vec<SymptomCount>,
    pub location_breakdown: Vec<LocationRisk>,
    pub badges: BadgeCounts,
}

/// Who the derived state is computed for. Passed explicitly into the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Session {
    pub user_id: Uuid,
    pub role: Role,
}
