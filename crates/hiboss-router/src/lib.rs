//! The Router — the single entry point through which new
//! envelopes are validated, persisted, and dispatched, whether they arrive
//! from an RPC call, the EnvelopeScheduler, or the CronScheduler.

pub mod error;
pub mod router;
pub mod scheduler;

pub use error::{Result, RouteError};
pub use router::{Router, RouteEnvelopeInput};
pub use scheduler::EnvelopeScheduler;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use hiboss_channels::adapter::{AdapterError, AttachmentToSend, ChatAdapter, SendOptions, SendResult};
    use hiboss_channels::registry::AdapterRegistry;
    use hiboss_core::hooks::AgentWaker;
    use hiboss_core::types::Provider;
    use hiboss_store::{RegisterAgentInput, Store};

    use super::*;

    struct FailingAdapter;

    #[async_trait]
    impl ChatAdapter for FailingAdapter {
        fn platform(&self) -> &str {
            "telegram"
        }
        async fn start(&self) -> Result<(), AdapterError> {
            Ok(())
        }
        async fn stop(&self) -> Result<(), AdapterError> {
            Ok(())
        }
        async fn send_text(&self, _chat_id: &str, _text: &str, _options: &SendOptions) -> Result<SendResult, AdapterError> {
            Err(AdapterError::Transport("connection refused".to_string()))
        }
        async fn send_attachment(
            &self,
            _chat_id: &str,
            _attachment: &AttachmentToSend,
            _options: &SendOptions,
        ) -> Result<SendResult, AdapterError> {
            Err(AdapterError::Transport("connection refused".to_string()))
        }
    }

    struct RecordingWaker {
        woken: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AgentWaker for RecordingWaker {
        async fn wake(&self, agent_name: &str) {
            self.woken.lock().unwrap().push(agent_name.to_string());
        }
    }

    fn make_router() -> (Arc<Store>, Arc<RecordingWaker>, Router) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let waker = Arc::new(RecordingWaker {
            woken: std::sync::Mutex::new(Vec::new()),
        });
        let router = Router::new(store.clone(), AdapterRegistry::new(), waker.clone());
        (store, waker, router)
    }

    #[tokio::test]
    async fn routing_to_an_agent_wakes_its_queue() {
        let (store, waker, router) = make_router();
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

        let envelope = router
            .route_envelope(RouteEnvelopeInput {
                from: "channel:telegram:123".to_string(),
                to: "agent:nex".to_string(),
                content_text: Some("hi".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(envelope.to, "agent:nex");
        assert_eq!(waker.woken.lock().unwrap().as_slice(), ["nex"]);
    }

    #[tokio::test]
    async fn routing_to_a_channel_without_a_binding_is_rejected() {
        let (store, _waker, router) = make_router();
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

        let err = router
            .route_envelope(RouteEnvelopeInput {
                from: "agent:nex".to_string(),
                to: "channel:telegram:123".to_string(),
                content_text: Some("hi".to_string()),
                ..Default::default()
            })
            .await;

        assert!(err.is_err());
    }

    #[tokio::test]
    async fn repeated_send_with_the_same_id_is_idempotent() {
        let (store, _waker, router) = make_router();
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

        let input = RouteEnvelopeInput {
            id: Some("fixed-id".to_string()),
            from: "channel:telegram:123".to_string(),
            to: "agent:nex".to_string(),
            content_text: Some("hi".to_string()),
            ..Default::default()
        };

        let first = router.route_envelope(input.clone()).await.unwrap();
        let second = router.route_envelope(input).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.list_envelopes(Some("agent:nex"), 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn future_deliver_at_is_not_dispatched_immediately() {
        let (store, waker, router) = make_router();
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

        router
            .route_envelope(RouteEnvelopeInput {
                from: "channel:telegram:123".to_string(),
                to: "agent:nex".to_string(),
                content_text: Some("later".to_string()),
                deliver_at: Some(hiboss_core::time::now_ms() + 60_000),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(waker.woken.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn immediate_channel_send_surfaces_adapter_failure_with_envelope_id() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let (agent, _) = store
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
        store.create_binding(&agent.name, "telegram", "bot-token").unwrap();

        let adapters = AdapterRegistry::new();
        adapters.register(Arc::new(FailingAdapter));
        let waker = Arc::new(RecordingWaker { woken: std::sync::Mutex::new(Vec::new()) });
        let router = Router::new(store.clone(), adapters, waker);

        let err = router
            .route_envelope(RouteEnvelopeInput {
                from: "agent:nex".to_string(),
                to: "channel:telegram:123".to_string(),
                content_text: Some("hi".to_string()),
                ..Default::default()
            })
            .await
            .expect_err("adapter failure must surface to the immediate-send caller");

        let envelope_id = err.envelope_id().expect("adapter failure must carry the persisted envelope id").to_string();

        // The envelope is still persisted and still pending so a later
        // retry (the EnvelopeScheduler) can pick it up.
        let persisted = store.get_envelope(&envelope_id).unwrap();
        assert_eq!(persisted.status, hiboss_core::types::EnvelopeStatus::Pending);
    }
}
