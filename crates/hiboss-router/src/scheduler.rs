//! EnvelopeScheduler. A single long-lived coordinator task that wakes
//! envelopes whose `deliverAt` has arrived, re-dispatching them through the
//! same step as a fresh `routeEnvelope` call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use hiboss_core::config::ENVELOPE_SCHEDULER_POLL_FLOOR_SECS;
use hiboss_core::hooks::EnvelopeDispatcher;
use hiboss_core::time::now_ms;
use hiboss_store::Store;

/// Periodically queries due envelopes and dispatches them; also wakeable
/// early via `on_envelope_created` so a freshly-scheduled future envelope
/// doesn't have to wait out a stale, longer sleep.
pub struct EnvelopeScheduler {
    store: Arc<Store>,
    dispatcher: Arc<dyn EnvelopeDispatcher>,
    notify: Arc<Notify>,
    running: Arc<AtomicBool>,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl EnvelopeScheduler {
    pub fn new(store: Arc<Store>, dispatcher: Arc<dyn EnvelopeDispatcher>) -> Self {
        Self {
            store,
            dispatcher,
            notify: Arc::new(Notify::new()),
            running: Arc::new(AtomicBool::new(false)),
            handle: std::sync::Mutex::new(None),
        }
    }

    /// Start the coordinator task. Idempotent — a second call while already
    /// running is a no-op.
    #[instrument(skip(self))]
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let store = self.store.clone();
        let dispatcher = self.dispatcher.clone();
        let notify = self.notify.clone();
        let running = self.running.clone();

        let handle = tokio::spawn(async move {
            info!("envelope scheduler started");
            while running.load(Ordering::SeqCst) {
                let sleep_for = next_sleep_duration(&store);
                tokio::select! {
                    _ = tokio::time::sleep(sleep_for) => {}
                    _ = notify.notified() => {}
                }
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = wake_due_envelopes(&store, dispatcher.as_ref()).await {
                    warn!(error = %e, "failed to query due envelopes");
                }
            }
            info!("envelope scheduler stopped");
        });
        *self.handle.lock().unwrap() = Some(handle);
    }

    /// Stop the coordinator task; idempotent. Cancels the sleeper and waits
    /// for the current iteration (if any) to finish.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.notify.notify_one();
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// `onEnvelopeCreated(envelope)`: wakes the coordinator early so a newly
    /// persisted future-dated envelope is considered when recomputing the
    /// next wake time, instead of waiting out a stale longer sleep.
    pub fn on_envelope_created(&self) {
        self.notify.notify_one();
    }
}

fn next_sleep_duration(store: &Store) -> Duration {
    let floor = Duration::from_secs(ENVELOPE_SCHEDULER_POLL_FLOOR_SECS);
    let Ok(deliver_ats) = store.get_future_deliver_ats() else {
        return floor;
    };
    let Some(next) = deliver_ats.into_iter().min() else {
        return floor;
    };
    let now = now_ms();
    let until_next = (next - now).max(0) as u64;
    Duration::from_millis(until_next).min(floor)
}

async fn wake_due_envelopes(store: &Store, dispatcher: &dyn EnvelopeDispatcher) -> hiboss_store::Result<()> {
    let due = store.get_due_envelopes()?;
    for envelope in &due {
        dispatcher.dispatch(envelope).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use hiboss_core::types::{Envelope, Provider};
    use hiboss_store::{NewEnvelope, RegisterAgentInput};

    use super::*;

    struct RecordingDispatcher {
        dispatched: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EnvelopeDispatcher for RecordingDispatcher {
        async fn dispatch(&self, envelope: &Envelope) {
            self.dispatched.lock().unwrap().push(envelope.id.clone());
        }
    }

    #[tokio::test]
    async fn wakes_a_due_future_envelope_after_starting() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store
            .register_agent(RegisterAgentInput {
                name: "nex".to_string(),
                description: None,
                workspace: None,
                provider: Provider::Claude,
                model: None,
                reasoning_effort: None,
                permission_level: Default::default(),
                session_policy: Default::default(),
                metadata: Default::default(),
            })
            .unwrap();
        let envelope = store
            .insert_envelope(NewEnvelope {
                id: "e1".to_string(),
                from: "channel:telegram:1".to_string(),
                to: "agent:nex".to_string(),
                from_boss: false,
                content_text: Some("hi".to_string()),
                content_attachments: vec![],
                metadata: None,
                deliver_at: Some(now_ms() - 1),
            })
            .unwrap();
        assert_eq!(envelope.id, "e1");

        let dispatcher = Arc::new(RecordingDispatcher { dispatched: Mutex::new(Vec::new()) });
        let scheduler = EnvelopeScheduler::new(store.clone(), dispatcher.clone());
        scheduler.start();
        scheduler.on_envelope_created();

        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.stop().await;

        assert_eq!(dispatcher.dispatched.lock().unwrap().as_slice(), ["e1"]);
    }

    #[test]
    fn next_sleep_duration_is_bounded_by_the_poll_floor() {
        let store = Store::open_in_memory().unwrap();
        let duration = next_sleep_duration(&store);
        assert_eq!(duration, Duration::from_secs(ENVELOPE_SCHEDULER_POLL_FLOOR_SECS));
    }
}
