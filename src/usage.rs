//! Copilot quota snapshot, as printed by `check-usage`.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct CopilotUsage {
    #[serde(default)]
    pub copilot_plan: String,
    #[serde(default)]
    pub quota_reset_date: String,
    #[serde(default)]
    pub quota_snapshots: QuotaSnapshots,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuotaSnapshots {
    #[serde(default)]
    pub premium_interactions: Option<QuotaDetail>,
    #[serde(default)]
    pub chat: Option<QuotaDetail>,
    #[serde(default)]
    pub completions: Option<QuotaDetail>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuotaDetail {
    #[serde(default)]
    pub entitlement: f64,
    #[serde(default)]
    pub remaining: f64,
    #[serde(default)]
    pub percent_remaining: f64,
    #[serde(default)]
    pub unlimited: bool,
}

/// `Name: used/total used (x.x% used, y.y% remaining)`, or `Name: N/A`.
pub fn summarize_quota(name: &str, quota: Option<&QuotaDetail>) -> String {
    let Some(q) = quota else {
        return format!("{name}: N/A");
    };
    if q.unlimited {
        return format!("{name}: unlimited");
    }
    let used = q.entitlement - q.remaining;
    let percent_used = if q.entitlement > 0.0 {
        used / q.entitlement * 100.0
    } else {
        0.0
    };
    format!(
        "{name}: {used}/{} used ({percent_used:.1}% used, {:.1}% remaining)",
        q.entitlement, q.percent_remaining
    )
}

impl CopilotUsage {
    pub fn report(&self) -> String {
        let snapshots = &self.quota_snapshots;
        format!(
            "Copilot Usage (plan: {})\nQuota resets: {}\n\nQuotas:\n  {}\n  {}\n  {}",
            self.copilot_plan,
            self.quota_reset_date,
            summarize_quota("Premium", snapshots.premium_interactions.as_ref()),
            summarize_quota("Chat", snapshots.chat.as_ref()),
            summarize_quota("Completions", snapshots.completions.as_ref()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_from_snapshot() {
        let usage: CopilotUsage = serde_json::from_value(serde_json::json!({
            "copilot_plan": "individual",
            "quota_reset_date": "2026-11-01",
            "quota_snapshots": {
                "premium_interactions": {"entitlement": 300, "remaining": 240, "percent_remaining": 80.0},
                "chat": {"entitlement": 0, "remaining": 0, "percent_remaining": 100.0, "unlimited": true}
            }
        }))
        .unwrap();

        let report = usage.report();
        assert!(report.starts_with("Copilot Usage (plan: individual)\nQuota resets: 2026-11-01"));
        assert!(report.contains("Premium: 60/300 used (20.0% used, 80.0% remaining)"));
        assert!(report.contains("Chat: unlimited"));
        assert!(report.contains("Completions: N/A"));
    }

    #[test]
    fn test_zero_entitlement() {
        let q = QuotaDetail {
            entitlement: 0.0,
            remaining: 0.0,
            percent_remaining: 0.0,
            unlimited: false,
        };
        assert_eq!(
            summarize_quota("Chat", Some(&q)),
            "Chat: 0/0 used (0.0% used, 0.0% remaining)"
        );
    }
}
