use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    Audience, HealthReport, NotificationStatus, Priority, ReadMarker, SystemNotification,
};
use crate::store::HealthStore;

pub const MIN_TEMPERATURE: f64 = 35.0;
pub const MAX_TEMPERATURE: f64 = 43.0;

pub const DEMO_STUDENT: &str = "3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2";
pub const DEMO_OFFICER: &str = "0c22f1f1-9184-4fd4-9b21-28c68a6a89dc";

const LOCATIONS: [&str; 4] = ["Hostel A", "Hostel B", "Hostel C", "Day Scholar"];
const OUTBREAK_LOCATION: &str = "Hostel A";
const OUTBREAK_SYMPTOMS: [&str; 5] = ["fever", "cough", "headache", "body ache", "fatigue"];

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const REPORT_COLUMNS: &str = "id, user_id, symptoms, temperature, location, created_at";
const NOTIFICATION_COLUMNS: &str =
    "id, title, message, audience, priority, status, created_by, created_at, sent_at";

fn row_to_report(row: &PgRow) -> Result<HealthReport, StoreError> {
    Ok(HealthReport {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        symptoms: row.try_get("symptoms")?,
        temperature: row.try_get("temperature")?,
        location: row.try_get("location")?,
        created_at: row.try_get("created_at")?,
    })
}

fn parse_column<T: std::str::FromStr>(row: &PgRow, column: &'static str) -> Result<T, StoreError> {
    let value: String = row.try_get(column)?;
    value
        .parse()
        .map_err(|_| StoreError::Decode { column, value })
}

fn row_to_notification(row: &PgRow) -> Result<SystemNotification, StoreError> {
    Ok(SystemNotification {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        message: row.try_get("message")?,
        audience: parse_column::<Audience>(row, "audience")?,
        priority: parse_column::<Priority>(row, "priority")?,
        status: parse_column::<NotificationStatus>(row, "status")?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
        sent_at: row.try_get("sent_at")?,
    })
}

#[async_trait]
impl HealthStore for PgStore {
    async fn reports_for_user_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<HealthReport>, StoreError> {
        let query = format!(
            "SELECT {REPORT_COLUMNS} FROM school_health.health_reports \
             WHERE user_id = $1 AND created_at >= $2 \
             ORDER BY created_at DESC"
        );
        let rows = sqlx::query(&query)
            .bind(user_id)
            .bind(since)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_report).collect()
    }

    async fn reports_since(&self, since: DateTime<Utc>) -> Result<Vec<HealthReport>, StoreError> {
        let query = format!(
            "SELECT {REPORT_COLUMNS} FROM school_health.health_reports \
             WHERE created_at >= $1 \
             ORDER BY created_at DESC"
        );
        let rows = sqlx::query(&query).bind(since).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_report).collect()
    }

    async fn latest_report_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<HealthReport>, StoreError> {
        let query = format!(
            "SELECT {REPORT_COLUMNS} FROM school_health.health_reports \
             WHERE user_id = $1 \
             ORDER BY created_at DESC LIMIT 1"
        );
        let row = sqlx::query(&query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_report).transpose()
    }

    async fn sent_notifications_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<SystemNotification>, StoreError> {
        let query = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM school_health.system_notifications \
             WHERE status = 'sent' AND created_at >= $1 \
             ORDER BY created_at DESC"
        );
        let rows = sqlx::query(&query).bind(since).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_notification).collect()
    }

    async fn read_markers_for_user(&self, user_id: Uuid) -> Result<Vec<ReadMarker>, StoreError> {
        let rows = sqlx::query(
            "SELECT notification_id, user_id FROM school_health.user_notification_reads \
             WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut markers = Vec::with_capacity(rows.len());
        for row in rows {
            markers.push(ReadMarker {
                notification_id: row.try_get("notification_id")?,
                user_id: row.try_get("user_id")?,
            });
        }
        Ok(markers)
    }

    async fn upsert_read_markers(&self, markers: &[ReadMarker]) -> Result<u64, StoreError> {
        if markers.is_empty() {
            return Ok(0);
        }

        let notification_ids: Vec<Uuid> = markers.iter().map(|m| m.notification_id).collect();
        let user_ids: Vec<Uuid> = markers.iter().map(|m| m.user_id).collect();

        let result = sqlx::query(
            r#"
            INSERT INTO school_health.user_notification_reads (notification_id, user_id)
            SELECT * FROM UNNEST($1::uuid[], $2::uuid[])
            ON CONFLICT (notification_id, user_id) DO NOTHING
            "#,
        )
        .bind(&notification_ids)
        .bind(&user_ids)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn unread_message_count(&self, user_id: Uuid) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query(
            "SELECT COUNT(*) AS unread FROM school_health.messages \
             WHERE recipient_id = $1 AND read_at IS NULL",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?
        .try_get("unread")?;

        Ok(usize::try_from(count).unwrap_or(0))
    }
}

pub async fn insert_report(pool: &PgPool, report: &HealthReport) -> anyhow::Result<()> {
    if let Some(t) = report.temperature {
        anyhow::ensure!(
            (MIN_TEMPERATURE..=MAX_TEMPERATURE).contains(&t),
            "temperature {t} outside {MIN_TEMPERATURE}-{MAX_TEMPERATURE} °C"
        );
    }

    sqlx::query(
        r#"
        INSERT INTO school_health.health_reports
        (id, user_id, symptoms, temperature, location, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(report.id)
    .bind(report.user_id)
    .bind(&report.symptoms)
    .bind(report.temperature)
    .bind(&report.location)
    .bind(report.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn broadcast(
    pool: &PgPool,
    created_by: Uuid,
    title: &str,
    message: &str,
    audience: Audience,
    priority: Priority,
) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO school_health.system_notifications
        (id, title, message, audience, priority, status, created_by, created_at, sent_at)
        VALUES ($1, $2, $3, $4, $5, 'sent', $6, now(), now())
        "#,
    )
    .bind(id)
    .bind(title)
    .bind(message)
    .bind(audience.as_str())
    .bind(priority.as_str())
    .bind(created_by)
    .execute(pool)
    .await?;

    Ok(id)
}

/// Loads a quiet baseline 7-14 days back and a feverish spike in the last day,
/// enough for the outbreak service to flag `Hostel A`.
pub async fn seed(pool: &PgPool) -> anyhow::Result<usize> {
    let student = Uuid::parse_str(DEMO_STUDENT)?;
    let officer = Uuid::parse_str(DEMO_OFFICER)?;
    let now = Utc::now();
    let mut inserted = 0usize;

    for days_ago in (8..=14).rev() {
        let per_day = 2 + (days_ago % 2) as usize;
        for slot in 0..per_day {
            let symptoms = match (days_ago as usize + slot) % 3 {
                0 => vec![],
                1 => vec!["fatigue".to_string()],
                _ => vec!["headache".to_string()],
            };
            let report = HealthReport {
                id: Uuid::new_v4(),
                user_id: student,
                symptoms,
                temperature: Some(36.5 + 0.1 * ((days_ago as usize + slot) % 7) as f64),
                location: LOCATIONS[(days_ago as usize + slot) % LOCATIONS.len()].to_string(),
                created_at: now - Duration::days(days_ago) + Duration::hours(slot as i64),
            };
            insert_report(pool, &report).await?;
            inserted += 1;
        }
    }

    for i in 0..8usize {
        let symptoms = OUTBREAK_SYMPTOMS
            .iter()
            .cycle()
            .skip(i)
            .take(2 + i % 3)
            .map(|s| s.to_string())
            .collect();
        let report = HealthReport {
            id: Uuid::new_v4(),
            user_id: student,
            symptoms,
            temperature: Some(37.8 + 0.2 * (i % 9) as f64),
            location: OUTBREAK_LOCATION.to_string(),
            created_at: now - Duration::hours((i * 3) as i64),
        };
        insert_report(pool, &report).await?;
        inserted += 1;
    }

    broadcast(
        pool,
        officer,
        "Flu season reminder",
        "Wash hands regularly and submit your daily check-in.",
        Audience::All,
        Priority::Normal,
    )
    .await?;
    broadcast(
        pool,
        officer,
        "Hostel A monitoring",
        "Report volume in Hostel A is elevated; review today's check-ins.",
        Audience::HealthOfficers,
        Priority::High,
    )
    .await?;

    Ok(inserted)
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        user_id: Uuid,
        symptoms: String,
        temperature: Option<f64>,
        location: String,
        created_at: DateTime<Utc>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result?;
        let report = HealthReport {
            id: Uuid::new_v4(),
            user_id: row.user_id,
            symptoms: split_symptoms(&row.symptoms),
            temperature: row.temperature,
            location: row.location,
            created_at: row.created_at,
        };
        insert_report(pool, &report)
            .await
            .with_context(|| format!("row {} of {}", line + 1, csv_path.display()))?;
        inserted += 1;
    }

    Ok(inserted)
}

pub fn split_symptoms(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}
