use std::collections::HashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::trigger::TimerKey;

/// A running timer task and the token that stops it.
pub struct TimerHandle {
    pub token: CancellationToken,
    pub task: JoinHandle<()>,
}

/// The live timer registry. One entry per `TimerKey`; inserting over an
/// existing key cancels the old task first.
#[derive(Default)]
pub struct TimerStore {
    timers: HashMap<TimerKey, TimerHandle>,
}

impl TimerStore {
    pub fn insert(&mut self, key: TimerKey, handle: TimerHandle) {
        if let Some(old) = self.timers.insert(key, handle) {
            old.token.cancel();
            old.task.abort();
        }
    }

    pub fn cancel(&mut self, key: &TimerKey) {
        if let Some(old) = self.timers.remove(key) {
            old.token.cancel();
            old.task.abort();
        }
    }

    /// Cancels every timer belonging to a plan.
    pub fn cancel_plan(&mut self, plan_id: i64) {
        let keys: Vec<TimerKey> = self
            .timers
            .keys()
            .filter(|k| k.plan_id == plan_id)
            .copied()
            .collect();
        for key in keys {
            self.cancel(&key);
        }
    }

    pub fn active_keys(&self) -> Vec<TimerKey> {
        self.timers.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}
