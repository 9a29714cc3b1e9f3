use crate::domain::ports::{LedgerEvent, Notifier};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Writes every event to the log. The default dispatcher when no delivery
/// channel (email, WhatsApp) is wired in.
#[derive(Debug, Default, Clone)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, event: LedgerEvent) -> Result<()> {
        let body = serde_json::to_string(&event)?;
        tracing::info!(user_id = event.user_id(), event = %body, "ledger notification");
        Ok(())
    }
}

/// Forwards events to a tokio channel so an out-of-band worker can deliver them.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<LedgerEvent>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LedgerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn notify(&self, event: LedgerEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|_| LedgerError::InternalError("notification receiver dropped".into()))
    }
}
