//! Notification channels and the business-hours window

use chrono::{DateTime, Datelike, FixedOffset, Offset, Timelike, Utc, Weekday};
use mend_signal::Severity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::ConfigError;

/// Delivery mechanism of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Email with subject and verbose body
    Email,
    /// Short text message
    Sms,
    /// Chat webhook, markdown body
    Chat,
    /// Paging service, compact body
    Pager,
    /// Generic webhook, JSON body
    Webhook,
}

impl TransportKind {
    /// Lowercase name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Email => "email",
            TransportKind::Sms => "sms",
            TransportKind::Chat => "chat",
            TransportKind::Pager => "pager",
            TransportKind::Webhook => "webhook",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configured notification channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationChannel {
    /// Unique channel name
    pub name: String,
    /// Delivery mechanism
    pub transport: TransportKind,
    /// Address understood by the transport
    pub destination: String,
    /// Run severities routed to this channel
    #[serde(default)]
    pub severities: BTreeSet<Severity>,
    /// Suppress outside the business-hours window
    #[serde(default)]
    pub business_hours_only: bool,
    /// Minimum minutes between deliveries through this channel
    #[serde(default)]
    pub rate_limit_minutes: Option<u32>,
}

impl NotificationChannel {
    /// Channel with no severities and no filters
    #[must_use]
    pub fn new(name: impl Into<String>, transport: TransportKind, destination: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport,
            destination: destination.into(),
            severities: BTreeSet::new(),
            business_hours_only: false,
            rate_limit_minutes: None,
        }
    }

    /// Route `severity` here
    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severities.insert(severity);
        self
    }

    /// Only deliver in business hours
    #[must_use]
    pub fn business_hours_only(mut self) -> Self {
        self.business_hours_only = true;
        self
    }

    /// Rate limit window
    #[must_use]
    pub fn with_rate_limit(mut self, minutes: u32) -> Self {
        self.rate_limit_minutes = Some(minutes);
        self
    }

    /// Whether runs of `severity` route here
    #[inline]
    #[must_use]
    pub fn accepts(&self, severity: Severity) -> bool {
        self.severities.contains(&severity)
    }
}

fn default_start_hour() -> u32 {
    9
}

fn default_end_hour() -> u32 {
    18
}

fn default_weekdays_only() -> bool {
    true
}

/// Local working-hours window at a fixed UTC offset
///
/// `start_hour` is inclusive, `end_hour` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessHours {
    /// First working hour
    #[serde(default = "default_start_hour")]
    pub start_hour: u32,
    /// First hour after work
    #[serde(default = "default_end_hour")]
    pub end_hour: u32,
    /// Saturday and Sunday are outside the window
    #[serde(default = "default_weekdays_only")]
    pub weekdays_only: bool,
    /// Offset of local time from UTC
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self {
            start_hour: default_start_hour(),
            end_hour: default_end_hour(),
            weekdays_only: default_weekdays_only(),
            utc_offset_minutes: 0,
        }
    }
}

impl BusinessHours {
    /// Check ranges
    ///
    /// # Errors
    /// `ConfigError::Invalid` for hours out of range, an empty window or an
    /// offset beyond a day
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start_hour > 23 || self.end_hour > 24 {
            return Err(ConfigError::invalid(format!(
                "business hours {}-{} out of range",
                self.start_hour, self.end_hour
            )));
        }
        if self.start_hour >= self.end_hour {
            return Err(ConfigError::invalid(format!(
                "business hours start {} must be before end {}",
                self.start_hour, self.end_hour
            )));
        }
        self.offset()?;
        Ok(())
    }

    fn offset(&self) -> Result<FixedOffset, ConfigError> {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60)).ok_or_else(|| {
            ConfigError::invalid(format!("utc offset {} minutes out of range", self.utc_offset_minutes))
        })
    }

    /// Whether `at` falls inside the window
    ///
    /// An invalid offset is treated as UTC.
    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let offset = self.offset().unwrap_or_else(|_| Utc.fix());
        let local = at.with_timezone(&offset);
        if self.weekdays_only && matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        (self.start_hour..self.end_hour).contains(&local.hour())
    }
}
