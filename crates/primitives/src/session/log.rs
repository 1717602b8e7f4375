//! Session-backed append-only log

use crate::api::{delegate_async_primitive, AsyncDistributedLog, LogEventListener};
use crate::events::LogEntry;
use crate::protocol::{LogOperation, Operation, Response};
use crate::proxy::{batch_stream, PrimitiveProxy};
use async_trait::async_trait;
use futures::stream::BoxStream;
use tessera_core::{ListenerId, Result};
use tessera_session::ManagedSession;

/// Log living on a single partition
pub struct SessionLog {
    proxy: PrimitiveProxy<LogEntry>,
}

impl SessionLog {
    /// Wrap an opened session
    pub fn new(session: ManagedSession) -> Self {
        Self {
            proxy: PrimitiveProxy::with_events(session),
        }
    }
}

delegate_async_primitive!(SessionLog => proxy);

#[async_trait]
impl AsyncDistributedLog for SessionLog {
    async fn append(&self, value: Vec<u8>) -> Result<u64> {
        self.proxy
            .command(Operation::Log(LogOperation::Append(value)))
            .await?
            .into_index()
    }

    async fn get(&self, index: u64) -> Result<Option<LogEntry>> {
        self.proxy
            .query(Operation::Log(LogOperation::Get(index)))
            .await?
            .into_log_entry()
    }

    async fn size(&self) -> Result<u64> {
        self.proxy
            .query(Operation::Log(LogOperation::Size))
            .await?
            .into_size()
    }

    fn entry_stream(&self) -> BoxStream<'static, Result<LogEntry>> {
        batch_stream(
            self.proxy.query(Operation::Log(LogOperation::Entries)),
            Response::into_log_entries,
        )
    }

    async fn add_listener(&self, listener: LogEventListener) -> Result<ListenerId> {
        self.proxy.add_listener(listener).await
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.proxy.remove_listener(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{eventually, Harness};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tessera_core::PrimitiveKind;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_append_and_read() {
        let harness = Harness::new(1);
        let log = SessionLog::new(harness.open("audit", PrimitiveKind::Log, 0).await);

        assert_eq!(log.append(b"x".to_vec()).await.unwrap(), 0);
        assert_eq!(log.append(b"y".to_vec()).await.unwrap(), 1);
        assert_eq!(log.size().await.unwrap(), 2);
        assert_eq!(log.get(1).await.unwrap().unwrap().value, b"y".to_vec());
        assert_eq!(log.get(7).await.unwrap(), None);

        let indexes: Vec<u64> = log.entries().await.unwrap().iter().map(|e| e.index).collect();
        assert_eq!(indexes, vec![0, 1]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_append_events() {
        let harness = Harness::new(1);
        let log = SessionLog::new(harness.open("audit", PrimitiveKind::Log, 0).await);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        log.add_listener(Arc::new(move |entry: &LogEntry| sink.lock().push(entry.index)))
            .await
            .unwrap();

        for i in 0..3u8 {
            log.append(vec![i]).await.unwrap();
        }
        eventually(|| seen.lock().len() == 3).await;
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
    }
}
