//! Small collaborator traits that let the leaf components (Router, the two
//! schedulers, the executor) call into each other without depending on each
//! other's crates — each side only depends on `hiboss-core`.
//!
//! Wiring happens once, in `hiboss-daemon`, where concrete `Arc<...>`s are
//! handed to each component as trait objects.

use async_trait::async_trait;

use crate::types::{Envelope, EnvelopeMetadata};

/// Implemented by the executor. The Router and the EnvelopeScheduler call
/// this after persisting an envelope addressed to `agent:<name>` so its
/// per-agent queue drains without the caller blocking on a turn.
#[async_trait]
pub trait AgentWaker: Send + Sync {
    async fn wake(&self, agent_name: &str);
}

/// Implemented by the Router. Used by the EnvelopeScheduler to replay the
/// same dispatch step for envelopes whose `deliverAt` has just arrived.
#[async_trait]
pub trait EnvelopeDispatcher: Send + Sync {
    async fn dispatch(&self, envelope: &Envelope);
}

/// Implemented by the CronScheduler. The executor calls this once per
/// batch, immediately after `markEnvelopesDone` flips rows to `done`.
pub trait EnvelopesDoneObserver: Send + Sync {
    fn on_envelopes_done(&self, ids: &[String]);
}

/// Implemented by the Router. The executor calls this once a turn produces
/// a non-empty reply, handing it back to `routeEnvelope` to become a fresh
/// outbound envelope.
#[async_trait]
pub trait ReplyDispatcher: Send + Sync {
    async fn send_reply(&self, from: &str, to: &str, text: &str, metadata: Option<EnvelopeMetadata>);
}
