//! Notification transports

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::TransportError;
use crate::notify::channel::TransportKind;
use crate::notify::template::RenderedMessage;

/// Delivers rendered messages for one transport kind
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `message` to `destination`
    async fn send(&self, message: &RenderedMessage, destination: &str) -> Result<(), TransportError>;
}

/// Transports by kind
#[derive(Clone, Default)]
pub struct TransportRegistry {
    transports: HashMap<TransportKind, Arc<dyn Transport>>,
}

impl std::fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&str> = self.transports.keys().map(TransportKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("TransportRegistry").field("kinds", &kinds).finish()
    }
}

impl TransportRegistry {
    /// Empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry sending every kind through `transport`
    #[must_use]
    pub fn uniform(transport: Arc<dyn Transport>) -> Self {
        let mut registry = Self::new();
        for kind in [
            TransportKind::Email,
            TransportKind::Sms,
            TransportKind::Chat,
            TransportKind::Pager,
            TransportKind::Webhook,
        ] {
            registry.register(kind, Arc::clone(&transport));
        }
        registry
    }

    /// With transport for `kind`
    #[must_use]
    pub fn with_transport(mut self, kind: TransportKind, transport: Arc<dyn Transport>) -> Self {
        self.register(kind, transport);
        self
    }

    /// Register (or replace) the transport for `kind`
    pub fn register(&mut self, kind: TransportKind, transport: Arc<dyn Transport>) {
        self.transports.insert(kind, transport);
    }

    /// Send through the transport registered for `kind`
    ///
    /// # Errors
    /// `TransportError::NotRegistered` when `kind` has no transport, or
    /// whatever the transport returns
    pub async fn send(
        &self,
        kind: TransportKind,
        message: &RenderedMessage,
        destination: &str,
    ) -> Result<(), TransportError> {
        let transport = self
            .transports
            .get(&kind)
            .ok_or_else(|| TransportError::NotRegistered(kind.to_string()))?;
        transport.send(message, destination).await
    }
}

/// Writes messages to the log instead of delivering them
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTransport;

#[async_trait]
impl Transport for LogTransport {
    async fn send(&self, message: &RenderedMessage, destination: &str) -> Result<(), TransportError> {
        tracing::info!(
            destination,
            subject = message.subject.as_deref().unwrap_or_default(),
            format = ?message.format,
            body = %message.body,
            "notification"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::template::MessageFormat;

    fn message() -> RenderedMessage {
        RenderedMessage {
            subject: None,
            body: "[INFO] Auto-recovery completed".into(),
            format: MessageFormat::Text,
        }
    }

    #[tokio::test]
    async fn missing_transport_is_an_error() {
        let registry = TransportRegistry::new().with_transport(TransportKind::Chat, Arc::new(LogTransport));
        assert!(registry.send(TransportKind::Chat, &message(), "ops").await.is_ok());
        assert_eq!(
            registry.send(TransportKind::Pager, &message(), "oncall").await,
            Err(TransportError::NotRegistered("pager".into()))
        );
    }

    #[tokio::test]
    async fn uniform_covers_every_kind() {
        let registry = TransportRegistry::uniform(Arc::new(LogTransport));
        assert!(registry.send(TransportKind::Webhook, &message(), "https://hooks").await.is_ok());
    }
}
