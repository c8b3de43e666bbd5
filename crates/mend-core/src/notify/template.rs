//! Message rendering
//!
//! Every notification starts as a [`Notice`] of structured fields, then is
//! rendered per transport: compact one-liners for SMS and pager, markdown
//! for chat, subject plus verbose body for email, JSON for webhooks.

use chrono::{DateTime, Utc};
use mend_signal::{ActionStatus, RecoveryReport, Severity};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use crate::config::Links;
use crate::notify::channel::TransportKind;
use crate::notify::escalation::EscalationIncident;

/// Upper bound for SMS and pager bodies
pub const COMPACT_LIMIT: usize = 160;

/// Structured notification content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    /// Routing severity
    pub severity: Severity,
    /// Headline
    pub title: String,
    /// Run id or incident id
    pub reference: String,
    /// Trigger kind name
    pub trigger: String,
    /// When the notice was raised
    pub timestamp: DateTime<Utc>,
    /// Actions in the run
    pub total_actions: usize,
    /// Successful actions
    pub successful_actions: usize,
    /// Failed actions
    pub failed_actions: usize,
    /// Skipped actions
    pub skipped_actions: usize,
    /// `kind/target: error` for each failure
    #[serde(default)]
    pub failures: Vec<String>,
    /// Escalation level, for escalation notices
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_level: Option<usize>,
    /// Dashboard and log links
    pub links: Links,
}

impl Notice {
    /// Notice summarising a finished run
    #[must_use]
    pub fn from_report(report: &RecoveryReport, links: &Links) -> Self {
        let severity = report.severity();
        let title = match severity {
            Severity::Info => "Auto-recovery completed".to_string(),
            Severity::Warning => "Auto-recovery completed with failures".to_string(),
            Severity::Critical => "Auto-recovery critical".to_string(),
        };
        let failures = report
            .results
            .iter()
            .filter(|r| r.status == ActionStatus::Failed)
            .map(|r| {
                format!(
                    "{}/{}: {}",
                    r.action.kind,
                    r.action.target,
                    r.error_message().unwrap_or("unknown error")
                )
            })
            .collect();

        Self {
            severity,
            title,
            reference: report.run_id.to_string(),
            trigger: report.trigger.to_string(),
            timestamp: report.finished_at,
            total_actions: report.total_actions,
            successful_actions: report.successful_actions,
            failed_actions: report.failed_actions,
            skipped_actions: report.skipped_actions,
            failures,
            escalation_level: None,
            links: links.clone(),
        }
    }

    /// Notice for escalation `level` of `incident`
    #[must_use]
    pub fn escalation(incident: &EscalationIncident, level: usize, at: DateTime<Utc>, links: &Links) -> Self {
        Self {
            severity: incident.severity,
            title: incident.title.clone(),
            reference: incident.incident_id.clone(),
            trigger: "escalation".to_string(),
            timestamp: at,
            total_actions: 0,
            successful_actions: 0,
            failed_actions: 0,
            skipped_actions: 0,
            failures: Vec::new(),
            escalation_level: Some(level),
            links: links.clone(),
        }
    }

    fn headline(&self) -> String {
        match self.escalation_level {
            Some(level) => format!("[{}] ESCALATION L{level}: {}", self.severity, self.title),
            None => format!("[{}] {}", self.severity, self.title),
        }
    }

    fn counts(&self) -> String {
        format!(
            "{} total, {} succeeded, {} failed, {} skipped",
            self.total_actions, self.successful_actions, self.failed_actions, self.skipped_actions
        )
    }
}

/// Body encoding of a rendered message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageFormat {
    /// Plain text
    Text,
    /// Markdown
    Markdown,
    /// JSON document
    Json,
}

/// Transport-ready message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedMessage {
    /// Subject line, for transports that have one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Body
    pub body: String,
    /// Body encoding
    pub format: MessageFormat,
}

fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

fn compact(notice: &Notice) -> String {
    let mut line = notice.headline();
    if notice.escalation_level.is_none() {
        let _ = write!(
            line,
            " {}/{} ok",
            notice.successful_actions, notice.total_actions
        );
        if notice.failed_actions > 0 {
            let _ = write!(line, ", {} failed", notice.failed_actions);
        }
    }
    let _ = write!(line, " ref {}", notice.reference);
    if let Some(logs) = &notice.links.logs_url {
        let _ = write!(line, " {logs}");
    }
    truncate_chars(&line, COMPACT_LIMIT)
}

fn markdown(notice: &Notice) -> String {
    let mut body = format!("*{}*\n", notice.headline());
    let _ = writeln!(body, "- Reference: `{}`", notice.reference);
    let _ = writeln!(body, "- Trigger: {}", notice.trigger);
    let _ = writeln!(body, "- Time: {}", notice.timestamp.to_rfc3339());
    if notice.escalation_level.is_none() {
        let _ = writeln!(body, "- Actions: {}", notice.counts());
    }
    for failure in &notice.failures {
        let _ = writeln!(body, "  - failed `{failure}`");
    }
    let links: Vec<String> = [
        notice.links.dashboard_url.as_ref().map(|u| format!("[Dashboard]({u})")),
        notice.links.logs_url.as_ref().map(|u| format!("[Logs]({u})")),
    ]
    .into_iter()
    .flatten()
    .collect();
    if !links.is_empty() {
        let _ = writeln!(body, "{}", links.join(" | "));
    }
    body
}

fn email_body(notice: &Notice) -> String {
    let mut body = String::new();
    let _ = writeln!(body, "{}", notice.title);
    let _ = writeln!(body);
    let _ = writeln!(body, "Severity:  {}", notice.severity);
    let _ = writeln!(body, "Reference: {}", notice.reference);
    let _ = writeln!(body, "Trigger:   {}", notice.trigger);
    let _ = writeln!(body, "Time:      {}", notice.timestamp.to_rfc3339());
    if let Some(level) = notice.escalation_level {
        let _ = writeln!(body, "Escalation level: {level}");
    } else {
        let _ = writeln!(body);
        let _ = writeln!(body, "Total actions:      {}", notice.total_actions);
        let _ = writeln!(body, "Successful actions: {}", notice.successful_actions);
        let _ = writeln!(body, "Failed actions:     {}", notice.failed_actions);
        let _ = writeln!(body, "Skipped actions:    {}", notice.skipped_actions);
    }
    if !notice.failures.is_empty() {
        let _ = writeln!(body);
        let _ = writeln!(body, "Failures:");
        for failure in &notice.failures {
            let _ = writeln!(body, "  * {failure}");
        }
    }
    if let Some(url) = &notice.links.dashboard_url {
        let _ = writeln!(body);
        let _ = writeln!(body, "Dashboard: {url}");
    }
    if let Some(url) = &notice.links.logs_url {
        let _ = writeln!(body, "Logs:      {url}");
    }
    body
}

/// Render `notice` for `transport`
#[must_use]
pub fn render(notice: &Notice, transport: TransportKind) -> RenderedMessage {
    match transport {
        TransportKind::Sms | TransportKind::Pager => RenderedMessage {
            subject: None,
            body: compact(notice),
            format: MessageFormat::Text,
        },
        TransportKind::Chat => RenderedMessage {
            subject: None,
            body: markdown(notice),
            format: MessageFormat::Markdown,
        },
        TransportKind::Email => RenderedMessage {
            subject: Some(notice.headline()),
            body: email_body(notice),
            format: MessageFormat::Text,
        },
        TransportKind::Webhook => RenderedMessage {
            subject: None,
            body: serde_json::to_string(notice).unwrap_or_else(|error| {
                tracing::warn!(%error, "failed to encode webhook payload");
                format!("{{\"title\":{:?}}}", notice.title)
            }),
            format: MessageFormat::Json,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mend_signal::{ActionKind, RecoveryActionSpec, RecoveryResult, RunId, TriggerId, TriggerKind};

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn links() -> Links {
        Links {
            dashboard_url: Some("https://dash.example.com/recovery".into()),
            logs_url: Some("https://logs.example.com/mend".into()),
        }
    }

    fn warning_report() -> RecoveryReport {
        RecoveryReport::assemble(
            RunId::new(),
            TriggerId::new(),
            TriggerKind::Alarm,
            false,
            at(0),
            at(2),
            vec![
                RecoveryResult::success(
                    RecoveryActionSpec::new(ActionKind::RestartService, "lambda-functions", 1, 10),
                    5,
                    1,
                    serde_json::Value::Null,
                    at(1),
                ),
                RecoveryResult::failed(
                    RecoveryActionSpec::new(ActionKind::ClearCache, "api-gateway", 2, 5),
                    5,
                    1,
                    "cache endpoint timed out",
                    at(2),
                ),
            ],
        )
    }

    #[test]
    fn compact_formats_fit_sms() {
        let mut notice = Notice::from_report(&warning_report(), &links());
        notice.title = "x".repeat(300);
        for transport in [TransportKind::Sms, TransportKind::Pager] {
            let message = render(&notice, transport);
            assert!(message.body.chars().count() <= COMPACT_LIMIT);
            assert!(message.body.starts_with("[WARNING]"));
        }
    }

    #[test]
    fn chat_and_email_carry_details() {
        let notice = Notice::from_report(&warning_report(), &links());

        let chat = render(&notice, TransportKind::Chat);
        assert_eq!(chat.format, MessageFormat::Markdown);
        assert!(chat.body.contains("clear-cache/api-gateway: cache endpoint timed out"));
        assert!(chat.body.contains("[Dashboard](https://dash.example.com/recovery)"));

        let email = render(&notice, TransportKind::Email);
        assert_eq!(
            email.subject.as_deref(),
            Some("[WARNING] Auto-recovery completed with failures")
        );
        assert!(email.body.contains("Failed actions:     1"));
        assert!(email.body.contains(&notice.reference));
    }

    #[test]
    fn webhook_is_json() {
        let notice = Notice::from_report(&warning_report(), &links());
        let message = render(&notice, TransportKind::Webhook);
        let value: serde_json::Value = serde_json::from_str(&message.body).unwrap();
        assert_eq!(value["severity"], "WARNING");
        assert_eq!(value["failed_actions"], 1);
    }

    #[test]
    fn escalation_notice_names_level() {
        let incident = EscalationIncident::new("01HZX", "Alarm TodoApiErrors is ALARM", at(0));
        let notice = Notice::escalation(&incident, 1, at(900), &Links::default());
        let sms = render(&notice, TransportKind::Sms);
        assert!(sms.body.starts_with("[CRITICAL] ESCALATION L1: Alarm TodoApiErrors"));
        assert!(sms.body.contains("ref 01HZX"));
    }
}
