use std::sync::Arc;

use dashmap::DashMap;

use crate::adapter::ChatAdapter;

/// Adapters owned by the Daemon, looked up by platform name (the `<adapter>`
/// segment of a `channel:<adapter>:<chat-id>` address). Safe to clone and
/// share — `sendText`/`sendAttachment` are called concurrently.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: Arc<DashMap<String, Arc<dyn ChatAdapter>>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, adapter: Arc<dyn ChatAdapter>) {
        self.adapters.insert(adapter.platform().to_string(), adapter);
    }

    pub fn get(&self, platform: &str) -> Option<Arc<dyn ChatAdapter>> {
        self.adapters.get(platform).map(|entry| entry.value().clone())
    }

    pub async fn start_all(&self) -> Result<(), crate::adapter::AdapterError> {
        for entry in self.adapters.iter() {
            entry.value().start().await?;
        }
        Ok(())
    }

    pub async fn stop_all(&self) {
        for entry in self.adapters.iter() {
            if let Err(e) = entry.value().stop().await {
                tracing::warn!(platform = %entry.key(), error = %e, "adapter failed to stop cleanly");
            }
        }
    }
}
