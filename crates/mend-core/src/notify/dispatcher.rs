//! Severity-scoped notification dispatch
//!
//! Channel selection happens in two steps. First the routing set: channels
//! whose severities include the run severity, or the channels named by an
//! escalation level. Then per-channel filters: business hours and the
//! channel's own rate limit. Survivors are rendered and sent concurrently;
//! each send succeeds or fails on its own.
//!
//! A rate-limited channel's slot is reserved before its send starts, so
//! overlapping runs cannot both pass the limit. A failed send hands the
//! slot back.

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use mend_signal::{NotificationOutcome, RecoveryReport};

use crate::config::{Links, RecoveryConfig};
use crate::notify::channel::{BusinessHours, NotificationChannel};
use crate::notify::escalation::{EscalationIncident, EscalationPolicy};
use crate::notify::template::{render, Notice};
use crate::notify::transport::TransportRegistry;

/// Per-run record of notification delivery
pub type DispatchSummary = NotificationOutcome;

/// Suppression reason for business-hours-only channels
pub const OUTSIDE_BUSINESS_HOURS: &str = "outside business hours";

/// Rate-limit slot held while a send is in flight
#[derive(Debug, Clone, Copy)]
struct Reservation {
    previous: Option<DateTime<Utc>>,
}

/// Routes notices to channels
#[derive(Debug)]
pub struct Dispatcher {
    channels: Vec<NotificationChannel>,
    transports: TransportRegistry,
    business_hours: BusinessHours,
    links: Links,
    last_sent: DashMap<String, DateTime<Utc>>,
}

impl Dispatcher {
    /// Dispatcher over `channels`
    #[must_use]
    pub fn new(channels: Vec<NotificationChannel>, transports: TransportRegistry) -> Self {
        Self {
            channels,
            transports,
            business_hours: BusinessHours::default(),
            links: Links::default(),
            last_sent: DashMap::new(),
        }
    }

    /// Dispatcher with channels, hours and links from `config`
    #[must_use]
    pub fn from_config(config: &RecoveryConfig, transports: TransportRegistry) -> Self {
        Self::new(config.channels.clone(), transports)
            .with_business_hours(config.business_hours)
            .with_links(config.links.clone())
    }

    /// With business-hours window
    #[must_use]
    pub fn with_business_hours(mut self, hours: BusinessHours) -> Self {
        self.business_hours = hours;
        self
    }

    /// With template links
    #[must_use]
    pub fn with_links(mut self, links: Links) -> Self {
        self.links = links;
        self
    }

    /// Configured channels
    #[inline]
    #[must_use]
    pub fn channels(&self) -> &[NotificationChannel] {
        &self.channels
    }

    /// Channel by name
    #[must_use]
    pub fn channel(&self, name: &str) -> Option<&NotificationChannel> {
        self.channels.iter().find(|c| c.name == name)
    }

    /// Last delivery through `channel`, counting a rate-limited send still in flight
    #[must_use]
    pub fn last_sent(&self, channel: &str) -> Option<DateTime<Utc>> {
        self.last_sent.get(channel).map(|entry| *entry.value())
    }

    /// Apply the hour filter, then take the channel's rate-limit slot
    fn admit(&self, channel: &NotificationChannel, now: DateTime<Utc>) -> Result<Option<Reservation>, String> {
        if channel.business_hours_only && !self.business_hours.contains(now) {
            return Err(OUTSIDE_BUSINESS_HOURS.to_string());
        }
        let Some(minutes) = channel.rate_limit_minutes else {
            return Ok(None);
        };
        let window = Duration::minutes(i64::from(minutes));

        match self.last_sent.entry(channel.name.clone()) {
            Entry::Occupied(mut entry) => {
                let last = *entry.get();
                if now - last < window {
                    return Err(format!("rate limited (last sent {})", last.to_rfc3339()));
                }
                entry.insert(now);
                Ok(Some(Reservation { previous: Some(last) }))
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                Ok(Some(Reservation { previous: None }))
            }
        }
    }

    /// Give back a slot taken at `taken` unless a later send replaced it
    fn release(&self, channel: &str, reservation: Reservation, taken: DateTime<Utc>) {
        match reservation.previous {
            Some(previous) => {
                if let Some(mut last) = self.last_sent.get_mut(channel) {
                    if *last == taken {
                        *last = previous;
                    }
                }
            }
            None => {
                self.last_sent.remove_if(channel, |_, last| *last == taken);
            }
        }
    }

    fn mark_sent(&self, channel: &str, now: DateTime<Utc>) {
        self.last_sent
            .entry(channel.to_string())
            .and_modify(|last| *last = (*last).max(now))
            .or_insert(now);
    }

    async fn deliver(
        &self,
        notice: &Notice,
        targets: Vec<&NotificationChannel>,
        now: DateTime<Utc>,
    ) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        let mut admitted = Vec::new();

        for channel in targets {
            match self.admit(channel, now) {
                Ok(reservation) => admitted.push((channel, reservation)),
                Err(reason) => {
                    tracing::debug!(channel = %channel.name, %reason, "notification suppressed");
                    summary.suppressed.push((channel.name.clone(), reason));
                }
            }
        }

        let sends = admitted.iter().map(|(channel, reservation)| async move {
            let message = render(notice, channel.transport);
            let outcome = self
                .transports
                .send(channel.transport, &message, &channel.destination)
                .await;
            (*channel, *reservation, outcome)
        });

        for (channel, reservation, outcome) in join_all(sends).await {
            summary.attempted.push(channel.name.clone());
            match outcome {
                Ok(()) => {
                    if reservation.is_none() {
                        self.mark_sent(&channel.name, now);
                    }
                    summary.delivered.push(channel.name.clone());
                }
                Err(error) => {
                    if let Some(reservation) = reservation {
                        self.release(&channel.name, reservation, now);
                    }
                    tracing::warn!(
                        channel = %channel.name,
                        transport = %channel.transport,
                        %error,
                        "notification delivery failed"
                    );
                    summary.failed.push((channel.name.clone(), error.to_string()));
                }
            }
        }
        summary
    }

    /// Notify the channels routed for the report's severity
    pub async fn dispatch_report(&self, report: &RecoveryReport, now: DateTime<Utc>) -> DispatchSummary {
        let severity = report.severity();
        let notice = Notice::from_report(report, &self.links);
        let targets: Vec<&NotificationChannel> =
            self.channels.iter().filter(|c| c.accepts(severity)).collect();

        tracing::debug!(
            run_id = %report.run_id,
            %severity,
            channels = targets.len(),
            "dispatching recovery report"
        );
        self.deliver(&notice, targets, now).await
    }

    /// Notify escalation `level` of `policy`
    ///
    /// Sends nothing when the level's condition no longer holds or the
    /// level does not exist. Channels are the ones the level names; their
    /// severity sets do not apply, their hour and rate filters do.
    pub async fn notify_level(
        &self,
        policy: &EscalationPolicy,
        level: usize,
        incident: &EscalationIncident,
        condition_holds: bool,
        now: DateTime<Utc>,
    ) -> DispatchSummary {
        let Some(stage) = policy.level(level) else {
            tracing::warn!(policy = %policy.name, level, "escalation level not defined");
            return DispatchSummary::default();
        };
        if !condition_holds {
            tracing::info!(
                policy = %policy.name,
                level,
                condition = %stage.condition,
                incident = %incident.incident_id,
                "escalation condition no longer holds"
            );
            return DispatchSummary::default();
        }

        let mut summary = DispatchSummary::default();
        let mut targets = Vec::new();
        for name in &stage.channels {
            match self.channel(name) {
                Some(channel) => targets.push(channel),
                None => {
                    tracing::warn!(channel = %name, policy = %policy.name, "escalation references unknown channel");
                    summary.failed.push((name.clone(), "unknown channel".to_string()));
                }
            }
        }

        tracing::info!(
            policy = %policy.name,
            level,
            incident = %incident.incident_id,
            channels = targets.len(),
            "escalating"
        );
        let notice = Notice::escalation(incident, level, now, &self.links);
        summary.merge(self.deliver(&notice, targets, now).await);
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::channel::TransportKind;
    use crate::notify::escalation::EscalationLevel;
    use crate::error::TransportError;
    use crate::notify::template::RenderedMessage;
    use crate::notify::transport::{LogTransport, Transport};
    use std::sync::atomic::{AtomicU32, Ordering};
    use mend_signal::{RunId, Severity, TriggerId, TriggerKind};
    use std::sync::Arc;

    fn tuesday(hour: u32) -> DateTime<Utc> {
        format!("2024-03-05T{hour:02}:00:00Z").parse().unwrap()
    }

    fn info_report() -> RecoveryReport {
        RecoveryReport::assemble(
            RunId::new(),
            TriggerId::new(),
            TriggerKind::Manual,
            false,
            tuesday(10),
            tuesday(10),
            Vec::new(),
        )
    }

    fn dispatcher(channels: Vec<NotificationChannel>) -> Dispatcher {
        Dispatcher::new(channels, TransportRegistry::uniform(Arc::new(LogTransport)))
    }

    #[tokio::test]
    async fn business_hours_channels_sleep_at_night() {
        let dispatcher = dispatcher(vec![
            NotificationChannel::new("ops-email", TransportKind::Email, "ops@example.com")
                .with_severity(Severity::Info)
                .business_hours_only(),
        ]);

        let day = dispatcher.dispatch_report(&info_report(), tuesday(10)).await;
        assert_eq!(day.delivered, vec!["ops-email".to_string()]);

        let night = dispatcher.dispatch_report(&info_report(), tuesday(23)).await;
        assert!(night.delivered.is_empty());
        assert_eq!(night.suppressed[0].1, OUTSIDE_BUSINESS_HOURS);
    }

    #[tokio::test]
    async fn rate_limit_is_per_channel() {
        let dispatcher = dispatcher(vec![
            NotificationChannel::new("ops-chat", TransportKind::Chat, "hook")
                .with_severity(Severity::Info)
                .with_rate_limit(30),
            NotificationChannel::new("audit", TransportKind::Webhook, "hook")
                .with_severity(Severity::Info),
        ]);

        let first = dispatcher.dispatch_report(&info_report(), tuesday(10)).await;
        assert_eq!(first.delivered.len(), 2);

        let soon = tuesday(10) + Duration::minutes(10);
        let second = dispatcher.dispatch_report(&info_report(), soon).await;
        assert_eq!(second.delivered, vec!["audit".to_string()]);
        assert_eq!(second.suppressed[0].0, "ops-chat");

        let later = tuesday(10) + Duration::minutes(30);
        let third = dispatcher.dispatch_report(&info_report(), later).await;
        assert_eq!(third.delivered.len(), 2);
    }

    /// Succeeds after yielding, failing the first `fail_first` sends
    struct Yielding {
        fail_first: AtomicU32,
    }

    #[async_trait::async_trait]
    impl Transport for Yielding {
        async fn send(&self, _message: &RenderedMessage, destination: &str) -> Result<(), TransportError> {
            tokio::task::yield_now().await;
            let failing = self
                .fail_first
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(TransportError::DeliveryFailed {
                    destination: destination.to_string(),
                    message: "timeout".to_string(),
                });
            }
            Ok(())
        }
    }

    fn rate_limited(fail_first: u32) -> Dispatcher {
        Dispatcher::new(
            vec![NotificationChannel::new("ops-chat", TransportKind::Chat, "hook")
                .with_severity(Severity::Info)
                .with_rate_limit(30)],
            TransportRegistry::uniform(Arc::new(Yielding {
                fail_first: AtomicU32::new(fail_first),
            })),
        )
    }

    #[tokio::test]
    async fn overlapping_dispatches_share_one_rate_limit_slot() {
        let dispatcher = rate_limited(0);
        let report = info_report();

        let (a, b) = tokio::join!(
            dispatcher.dispatch_report(&report, tuesday(10)),
            dispatcher.dispatch_report(&report, tuesday(10))
        );
        assert_eq!(a.delivered.len() + b.delivered.len(), 1);
        assert_eq!(a.suppressed.len() + b.suppressed.len(), 1);
        assert_eq!(dispatcher.last_sent("ops-chat"), Some(tuesday(10)));
    }

    #[tokio::test]
    async fn failed_send_returns_the_slot() {
        let dispatcher = rate_limited(1);

        let failed = dispatcher.dispatch_report(&info_report(), tuesday(10)).await;
        assert_eq!(failed.failed.len(), 1);
        assert_eq!(dispatcher.last_sent("ops-chat"), None);

        let retry = tuesday(10) + Duration::minutes(1);
        let delivered = dispatcher.dispatch_report(&info_report(), retry).await;
        assert_eq!(delivered.delivered, vec!["ops-chat".to_string()]);
        assert_eq!(dispatcher.last_sent("ops-chat"), Some(retry));
    }

    #[tokio::test]
    async fn notify_level_respects_condition() {
        let dispatcher = dispatcher(vec![
            NotificationChannel::new("pager", TransportKind::Pager, "oncall")
                .with_severity(Severity::Critical),
        ]);
        let policy = EscalationPolicy::new(
            "critical",
            vec![EscalationLevel::new(0, vec!["pager".into(), "ghost".into()])],
        );
        let incident = EscalationIncident::new("inc-1", "TodoApiHealth critical", tuesday(3));

        let fired = dispatcher.notify_level(&policy, 0, &incident, true, tuesday(3)).await;
        assert_eq!(fired.delivered, vec!["pager".to_string()]);
        assert_eq!(fired.failed, vec![("ghost".to_string(), "unknown channel".to_string())]);

        let quiet = dispatcher.notify_level(&policy, 0, &incident, false, tuesday(4)).await;
        assert!(quiet.attempted.is_empty());

        let missing = dispatcher.notify_level(&policy, 7, &incident, true, tuesday(4)).await;
        assert!(missing.attempted.is_empty());
    }
}
