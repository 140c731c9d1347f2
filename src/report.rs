use std::fmt::Write;

use crate::engine::Snapshot;
use crate::models::Session;

pub fn build_report(session: &Session, snapshot: &Snapshot) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Health Dashboard");
    let _ = writeln!(
        output,
        "Generated for {} ({})",
        session.user_id, session.role
    );
    if let Some(computed_at) = snapshot.computed_at {
        let _ = writeln!(output, "Computed at {}", computed_at.to_rfc3339());
    }
    if let Some(error) = &snapshot.error {
        let _ = writeln!(output, "> Data may be out of date: {error}");
    }

    let Some(state) = &snapshot.state else {
        let _ = writeln!(output);
        let _ = writeln!(output, "No data available yet.");
        return output;
    };

    let _ = writeln!(output);
    let _ = writeln!(output, "## Status");
    let _ = writeln!(output, "- Current status: {}", state.current_health_status.label());
    let _ = writeln!(output, "- Streak: {} days", state.streak);
    let _ = writeln!(
        output,
        "- Check-ins: {} this week ({} today, {} yesterday)",
        state.weekly_checkins, state.checkins_today, state.checkins_yesterday
    );
    let _ = writeln!(
        output,
        "- Unread: {} messages, {} notifications, {} alerts",
        state.badges.messages, state.badges.notifications, state.badges.alerts
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Active Alerts");
    if state.active_alerts.is_empty() {
        let _ = writeln!(output, "No active alerts.");
    } else {
        for alert in state.active_alerts.iter() {
            let _ = writeln!(
                output,
                "- [{:?}] {} ({}): {}",
                alert.level,
                alert.title,
                alert.occurred_at.format("%Y-%m-%d %H:%M"),
                alert.message
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Weekly Trend");
    for day in state.weekly_trend.iter() {
        let _ = writeln!(
            output,
            "- {}: {} reports ({} high risk)",
            day.date, day.reports, day.high_risk
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Top Symptoms");
    if state.top_symptoms.is_empty() {
        let _ = writeln!(output, "No symptoms reported this week.");
    } else {
        for symptom in state.top_symptoms.iter() {
            let _ = writeln!(output, "- {}: {}", symptom.symptom, symptom.count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Location Risk");
    if state.location_breakdown.is_empty() {
        let _ = writeln!(output, "No reports in the last 7 days.");
    } else {
        for location in state.location_breakdown.iter() {
            let avg = location
                .aggregate
                .avg_temperature
                .map(|t| format!("{t:.1}°C"))
                .unwrap_or_else(|| "n/a".to_string());
            let _ = writeln!(
                output,
                "- {}: {} ({} today, {} this week, avg {})",
                location.location,
                location.level.as_str(),
                location.aggregate.reports_today,
                location.aggregate.reports_week,
                avg
            );
        }
    }

    output
}
