//! CronScheduler. Maintains the single-pending-envelope
//! invariant for every enabled cron rule: at most one materialized envelope
//! outstanding per schedule, advanced only once the previous one is `done`.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use hiboss_core::hooks::{EnvelopeDispatcher, EnvelopesDoneObserver};
use hiboss_core::time::now_ms;
use hiboss_core::types::{CronContent, CronSchedule, Envelope, EnvelopeMetadata};
use hiboss_store::Store;

use crate::cron::{next_fire_at, parse, resolve_timezone};
use crate::error::Result;

/// Input to `createSchedule`.
#[derive(Debug, Clone)]
pub struct CreateScheduleInput {
    pub agent_name: String,
    pub cron: String,
    pub timezone: Option<String>,
    pub to: String,
    pub content: CronContent,
    pub metadata: Option<serde_json::Value>,
}

pub struct CronScheduler {
    store: Arc<Store>,
    dispatcher: Arc<dyn EnvelopeDispatcher>,
    boss_timezone: String,
}

impl CronScheduler {
    pub fn new(store: Arc<Store>, dispatcher: Arc<dyn EnvelopeDispatcher>, boss_timezone: String) -> Self {
        Self { store, dispatcher, boss_timezone }
    }

    /// `createSchedule(input)`: validates the cron expression
    /// and timezone, computes `nextFireAt(now)`, and atomically persists the
    /// schedule with its first materialized envelope.
    #[instrument(skip(self, input), fields(agent_name = %input.agent_name, cron = %input.cron))]
    pub async fn create_schedule(&self, input: CreateScheduleInput) -> Result<CronSchedule> {
        let schedule_expr = parse(&input.cron)?;
        let tz = resolve_timezone(input.timezone.as_deref(), &self.boss_timezone)?;
        let next = next_fire_at(&schedule_expr, tz, now_ms())?;
        let from = format!("agent:{}", input.agent_name);

        let schedule = self.store.create_cron_schedule_with_first_envelope(
            &input.agent_name,
            &input.cron,
            input.timezone,
            &input.to,
            input.content,
            input.metadata,
            &from,
            next,
        )?;

        if let Some(envelope_id) = &schedule.pending_envelope_id {
            if let Ok(envelope) = self.store.get_envelope(envelope_id) {
                self.dispatcher.dispatch(&envelope).await;
            }
        }

        Ok(schedule)
    }

    /// `enableSchedule(id)`: flips `enabled`; materializes a
    /// pending envelope only if none currently exists.
    #[instrument(skip(self))]
    pub async fn enable_schedule(&self, id: &str) -> Result<CronSchedule> {
        self.store.set_cron_enabled(id, true)?;
        let schedule = self.store.get_cron_schedule(id)?;
        if schedule.pending_envelope_id.is_some() {
            return Ok(schedule);
        }
        self.materialize_next(&schedule).await?;
        Ok(self.store.get_cron_schedule(id)?)
    }

    /// `disableSchedule(id)`: flips `enabled`; any pending
    /// envelope is kept as-is — its `deliverAt` is preserved, not cleared
    /// ( Open questions, decided: keep).
    #[instrument(skip(self))]
    pub fn disable_schedule(&self, id: &str) -> Result<CronSchedule> {
        self.store.set_cron_enabled(id, false)?;
        Ok(self.store.get_cron_schedule(id)?)
    }

    /// `deleteSchedule(id)`: closes the pending envelope
    /// (status → `done`) then deletes the row.
    #[instrument(skip(self))]
    pub fn delete_schedule(&self, id: &str) -> Result<()> {
        let schedule = self.store.get_cron_schedule(id)?;
        if let Some(envelope_id) = &schedule.pending_envelope_id {
            self.store.mark_envelopes_done(std::slice::from_ref(envelope_id))?;
        }
        self.store.delete_cron_schedule(id)?;
        Ok(())
    }

    /// `reconcileAllSchedules({skipMisfires})`: called once
    /// on startup; materializes the next future envelope for every enabled
    /// schedule that currently has none. `skipMisfires` is always honored —
    /// `nextFireAt` never backfills missed occurrences, it only ever
    /// returns the next future one.
    #[instrument(skip(self))]
    pub async fn reconcile_all_schedules(&self) -> Result<usize> {
        let schedules = self.store.list_enabled_crons_without_pending()?;
        let mut materialized = 0usize;
        for schedule in &schedules {
            match self.materialize_next(schedule).await {
                Ok(()) => materialized += 1,
                Err(e) => warn!(schedule_id = %schedule.id, error = %e, "failed to reconcile cron schedule"),
            }
        }
        info!(count = materialized, total = schedules.len(), "reconciled cron schedules on startup");
        Ok(materialized)
    }

    /// Compute `nextFireAt(now)` for `schedule` and materialize it,
    /// dispatching the resulting envelope.
    async fn materialize_next(&self, schedule: &CronSchedule) -> Result<()> {
        let schedule_expr = parse(&schedule.cron)?;
        let tz = resolve_timezone(schedule.timezone.as_deref(), &self.boss_timezone)?;
        let next = next_fire_at(&schedule_expr, tz, now_ms())?;
        let from = format!("agent:{}", schedule.agent_name);
        let metadata = EnvelopeMetadata {
            cron_schedule_id: Some(schedule.id.clone()),
            ..Default::default()
        };

        let envelope = self.store.materialize_cron_envelope(
            &schedule.id,
            &from,
            &schedule.to,
            &schedule.content,
            Some(metadata),
            next,
        )?;
        self.dispatcher.dispatch(&envelope).await;
        Ok(())
    }
}

impl EnvelopesDoneObserver for CronScheduler {
    /// `onEnvelopesDone(ids)`: for each id that matches a
    /// schedule's `pendingEnvelopeId`, materialize the next envelope and
    /// swap the link. Called synchronously right after `markEnvelopesDone`
    /// flips the rows, so the actual materialization (and the dispatch of
    /// whatever it produces) is handed off to a background task.
    fn on_envelopes_done(&self, ids: &[String]) {
        for id in ids {
            let Ok(Some(schedule)) = self.store.find_cron_schedule_by_pending_envelope(id) else {
                continue;
            };
            if !schedule.enabled {
                continue;
            }
            let store = self.store.clone();
            let dispatcher = self.dispatcher.clone();
            let boss_timezone = self.boss_timezone.clone();
            tokio::spawn(async move {
                let scheduler = CronScheduler { store, dispatcher, boss_timezone };
                if let Err(e) = scheduler.materialize_next(&schedule).await {
                    warn!(schedule_id = %schedule.id, error = %e, "failed to advance cron schedule after envelope completion");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use hiboss_core::types::{Provider};
    use hiboss_store::RegisterAgentInput;

    use super::*;

    struct RecordingDispatcher {
        dispatched: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EnvelopeDispatcher for RecordingDispatcher {
        async fn dispatch(&self, envelope: &Envelope) {
            self.dispatched.lock().unwrap().push(envelope.id.clone());
        }
    }

    fn make_scheduler() -> (Arc<Store>, Arc<RecordingDispatcher>, CronScheduler) {
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
        let dispatcher = Arc::new(RecordingDispatcher { dispatched: std::sync::Mutex::new(Vec::new()) });
        let scheduler = CronScheduler::new(store.clone(), dispatcher.clone(), "UTC".to_string());
        (store, dispatcher, scheduler)
    }

    #[tokio::test]
    async fn create_schedule_materializes_one_pending_envelope() {
        let (store, _dispatcher, scheduler) = make_scheduler();
        let schedule = scheduler
            .create_schedule(CreateScheduleInput {
                agent_name: "nex".to_string(),
                cron: "* * * * *".to_string(),
                timezone: None,
                to: "agent:nex".to_string(),
                content: CronContent { text: Some("tick".to_string()), attachments: vec![] },
                metadata: None,
            })
            .await
            .unwrap();

        assert!(schedule.pending_envelope_id.is_some());
        let pending = store.get_pending_envelopes_for_agent("nex", 10).unwrap();
        assert_eq!(pending.len(), 0, "deliverAt is in the future, not yet due");
    }

    #[tokio::test]
    async fn invalid_cron_expression_is_rejected() {
        let (_store, _dispatcher, scheduler) = make_scheduler();
        let result = scheduler
            .create_schedule(CreateScheduleInput {
                agent_name: "nex".to_string(),
                cron: "not a cron".to_string(),
                timezone: None,
                to: "agent:nex".to_string(),
                content: CronContent { text: None, attachments: vec![] },
                metadata: None,
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn disable_keeps_pending_envelope_untouched() {
        let (store, _dispatcher, scheduler) = make_scheduler();
        let schedule = scheduler
            .create_schedule(CreateScheduleInput {
                agent_name: "nex".to_string(),
                cron: "* * * * *".to_string(),
                timezone: None,
                to: "agent:nex".to_string(),
                content: CronContent { text: Some("tick".to_string()), attachments: vec![] },
                metadata: None,
            })
            .await
            .unwrap();
        let pending_before = schedule.pending_envelope_id.clone().unwrap();

        let disabled = scheduler.disable_schedule(&schedule.id).unwrap();
        assert!(!disabled.enabled);
        assert_eq!(disabled.pending_envelope_id, Some(pending_before.clone()));

        let envelope = store.get_envelope(&pending_before).unwrap();
        assert_eq!(envelope.status, hiboss_core::types::EnvelopeStatus::Pending);
    }

    #[tokio::test]
    async fn delete_schedule_closes_pending_envelope() {
        let (store, _dispatcher, scheduler) = make_scheduler();
        let schedule = scheduler
            .create_schedule(CreateScheduleInput {
                agent_name: "nex".to_string(),
                cron: "* * * * *".to_string(),
                timezone: None,
                to: "agent:nex".to_string(),
                content: CronContent { text: Some("tick".to_string()), attachments: vec![] },
                metadata: None,
            })
            .await
            .unwrap();
        let pending = schedule.pending_envelope_id.clone().unwrap();

        scheduler.delete_schedule(&schedule.id).unwrap();

        let envelope = store.get_envelope(&pending).unwrap();
        assert_eq!(envelope.status, hiboss_core::types::EnvelopeStatus::Done);
        assert!(store.get_cron_schedule(&schedule.id).is_err());
    }

    #[tokio::test]
    async fn reconcile_materializes_pending_for_schedules_missing_one() {
        let (store, _dispatcher, scheduler) = make_scheduler();
        let created = store
            .create_cron_schedule(
                "nex",
                "* * * * *",
                None,
                "agent:nex",
                CronContent { text: Some("tick".to_string()), attachments: vec![] },
                None,
            )
            .unwrap();
        assert!(created.pending_envelope_id.is_none());

        let materialized = scheduler.reconcile_all_schedules().await.unwrap();
        assert_eq!(materialized, 1);

        let schedule = store.get_cron_schedule(&created.id).unwrap();
        assert!(schedule.pending_envelope_id.is_some());
    }
}
