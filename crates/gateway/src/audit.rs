//! Session audit trail, appended as day-partitioned JSON Lines.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use {
    gangway_common::time,
    gangway_store::{Store, StoreExt, keys},
};

use crate::error::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditKind {
    Connect,
    Disconnect,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub ts: u64,
    pub user_id: String,
    pub session_id: String,
    pub event: AuditKind,
    pub host: String,
    pub port: u16,
}

impl AuditEvent {
    #[must_use]
    pub fn connect(user_id: &str, session_id: &str, host: &str, port: u16) -> Self {
        Self::new(AuditKind::Connect, user_id, session_id, host, port)
    }

    #[must_use]
    pub fn disconnect(user_id: &str, session_id: &str, host: &str, port: u16) -> Self {
        Self::new(AuditKind::Disconnect, user_id, session_id, host, port)
    }

    fn new(event: AuditKind, user_id: &str, session_id: &str, host: &str, port: u16) -> Self {
        Self {
            ts: time::now_millis(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            event,
            host: host.to_string(),
            port,
        }
    }
}

/// Append-only audit writer over the store.
pub struct AuditLog<S: Store> {
    store: Arc<S>,
}

impl<S: Store> AuditLog<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Durably append one event. Callers await this before reporting the
    /// session transition as complete.
    pub async fn record(&self, event: &AuditEvent) -> Result<(), GatewayError> {
        let key = keys::audit(&time::day_stamp(event.ts));
        self.store.append(&key, event).await?;
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, gangway_store::MemoryStore};

    #[tokio::test]
    async fn record_appends_to_day_partition() {
        let store = Arc::new(MemoryStore::new());
        let audit = AuditLog::new(Arc::clone(&store));

        let event = AuditEvent::connect("u1", "s1", "10.0.0.5", 22);
        audit.record(&event).await.unwrap();

        let key = keys::audit(&time::day_stamp(event.ts));
        let lines = store.lines(&key).await;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["event"], "connect");
        assert_eq!(lines[0]["userId"], "u1");
        assert_eq!(lines[0]["sessionId"], "s1");
        assert_eq!(lines[0]["port"], 22);
    }

    #[tokio::test]
    async fn connect_and_disconnect_are_distinct() {
        let store = Arc::new(MemoryStore::new());
        let audit = AuditLog::new(Arc::clone(&store));

        let connect = AuditEvent::connect("u1", "s1", "h", 22);
        let disconnect = AuditEvent::disconnect("u1", "s1", "h", 22);
        audit.record(&connect).await.unwrap();
        audit.record(&disconnect).await.unwrap();

        let lines = store.lines(&keys::audit(&time::day_stamp(connect.ts))).await;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "connect");
        assert_eq!(lines[1]["event"], "disconnect");
    }
}
