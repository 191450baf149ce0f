//! # Scheduler Crate
//!
//! Turns DCA plans into running tokio timers. Each plan expands to one or
//! more [`TimerKey`]s (monthly plans own one timer per configured day); each
//! timer sleeps until its next fire instant in the configured timezone and
//! then enqueues an [`ExecutionRequest`] for the single execution worker.
//!
//! `sync` is the only entry point for plan changes: it cancels the plan's
//! existing timers, re-derives its triggers, and performs a misfire catch-up
//! check. Catch-up never consults the database; it submits at most one
//! request and relies on the executor's idempotency window to suppress
//! duplicates.

use chrono::{NaiveTime, Utc};
use chrono_tz::Tz;
use configuration::Settings;
use core_types::{ExecutionOrigin, ExecutionRequest, Plan, PlanStatus};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub mod clock;
pub mod error;
pub mod store;
pub mod trigger;

pub use clock::{Clock, SystemClock};
pub use error::SchedulerError;
pub use trigger::{Recurrence, TimerKey, parse_fire_time, triggers_for_plan};

use store::{TimerHandle, TimerStore};

pub struct Scheduler {
    tz: Tz,
    grace: chrono::Duration,
    clock: Arc<dyn Clock>,
    store: Mutex<TimerStore>,
    tx: mpsc::Sender<ExecutionRequest>,
}

impl Scheduler {
    pub fn new(
        settings: &Settings,
        clock: Arc<dyn Clock>,
        tx: mpsc::Sender<ExecutionRequest>,
    ) -> Result<Self, SchedulerError> {
        let tz: Tz = settings
            .schedule
            .timezone
            .parse()
            .map_err(|_| SchedulerError::InvalidTimezone(settings.schedule.timezone.clone()))?;
        Ok(Self {
            tz,
            grace: chrono::Duration::seconds(settings.schedule.misfire_grace_secs as i64),
            clock,
            store: Mutex::new(TimerStore::default()),
            tx,
        })
    }

    /// Reconciles the plan's timers with its current definition. Disabled
    /// plans end up with no timers.
    pub async fn sync(&self, plan: &Plan) -> Result<(), SchedulerError> {
        let mut store = self.store.lock().await;
        store.cancel_plan(plan.id);

        if plan.status != PlanStatus::Enabled {
            info!(plan_id = plan.id, "plan disabled, timers cancelled");
            return Ok(());
        }

        let at = parse_fire_time(&plan.fire_time)?;
        let triggers = triggers_for_plan(plan)?;
        self.submit_catch_up(plan, &triggers, at).await;

        for (key, recurrence) in triggers {
            let token = CancellationToken::new();
            let task = tokio::spawn(run_timer(
                key.plan_id,
                recurrence,
                at,
                self.tz,
                Arc::clone(&self.clock),
                self.tx.clone(),
                token.clone(),
            ));
            store.insert(key, TimerHandle { token, task });
        }
        info!(plan_id = plan.id, timers = store.len(), "plan synced");
        Ok(())
    }

    /// Removes every timer for a plan, used on delete.
    pub async fn cancel(&self, plan_id: i64) {
        self.store.lock().await.cancel_plan(plan_id);
        info!(plan_id, "plan timers cancelled");
    }

    pub async fn active_timer_keys(&self) -> Vec<TimerKey> {
        self.store.lock().await.active_keys()
    }

    /// If the most recent scheduled fire fell inside the misfire grace
    /// window, submit it once as a catch-up. A single coalesced submission
    /// covers any number of missed occurrences; older ones are gone for good.
    async fn submit_catch_up(
        &self,
        plan: &Plan,
        triggers: &[(TimerKey, Recurrence)],
        at: NaiveTime,
    ) {
        let now = self.clock.now_utc().with_timezone(&self.tz);
        let last = triggers
            .iter()
            .filter_map(|(_, r)| r.last_fire_at_or_before(now, at))
            .max();

        let Some(last) = last else { return };
        let last_utc = last.with_timezone(&Utc);
        if now - last > self.grace || last_utc < plan.created_at {
            return;
        }

        debug!(plan_id = plan.id, scheduled_for = %last_utc, "submitting catch-up execution");
        let request = ExecutionRequest {
            plan_id: plan.id,
            scheduled_for: last_utc,
            origin: ExecutionOrigin::CatchUp,
        };
        if self.tx.send(request).await.is_err() {
            warn!(plan_id = plan.id, "execution queue closed, catch-up dropped");
        }
    }
}

async fn run_timer(
    plan_id: i64,
    recurrence: Recurrence,
    at: NaiveTime,
    tz: Tz,
    clock: Arc<dyn Clock>,
    tx: mpsc::Sender<ExecutionRequest>,
    token: CancellationToken,
) {
    loop {
        let now = clock.now_utc().with_timezone(&tz);
        let Some(next) = recurrence.next_fire_after(now, at) else {
            warn!(plan_id, "no future fire instant, timer stopping");
            return;
        };
        let wait = (next - now).to_std().unwrap_or_default();

        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
        }

        let request = ExecutionRequest {
            plan_id,
            scheduled_for: next.with_timezone(&Utc),
            origin: ExecutionOrigin::Schedule,
        };
        debug!(plan_id, scheduled_for = %request.scheduled_for, "timer fired");
        if tx.send(request).await.is_err() {
            warn!(plan_id, "execution queue closed, timer stopping");
            return;
        }
    }
}
