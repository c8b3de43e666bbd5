//! Notification and escalation
//!
//! - [`channel`]: channel configuration and the business-hours window
//! - [`template`]: per-transport rendering of structured notices
//! - [`transport`]: delivery seam and the log transport
//! - [`dispatcher`]: severity routing, filters and escalation levels
//! - [`escalation`]: policies evaluated by an external scheduler

pub mod channel;
pub mod dispatcher;
pub mod escalation;
pub mod template;
pub mod transport;

pub use channel::{BusinessHours, NotificationChannel, TransportKind};
pub use dispatcher::{DispatchSummary, Dispatcher, OUTSIDE_BUSINESS_HOURS};
pub use escalation::{EscalationCondition, EscalationIncident, EscalationLevel, EscalationPolicy};
pub use template::{render, MessageFormat, Notice, RenderedMessage, COMPACT_LIMIT};
pub use transport::{LogTransport, Transport, TransportRegistry};
