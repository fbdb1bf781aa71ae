//! One-shot delayed triggers.
//!
//! The pending timer set is always rebuilt from the full agent list: every
//! existing timer is cancelled and a fresh one is armed for each agent whose
//! schedule is strictly in the future. A firing timer removes itself under
//! the same lock that re-derivation takes, so a cancelled timer never fires.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::types::{Agent, AgentId};

/// Emitted when a pending timer reaches its scheduled time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledFire {
    pub agent_id: AgentId,
    pub scheduled_for: DateTime<Utc>,
}

/// Outcome of one re-derivation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rederivation {
    /// Agents with a freshly armed timer.
    pub armed: Vec<AgentId>,
    /// Agents that were waiting on a timer but whose time has already passed.
    /// They fall back to idle and are not fired late.
    pub demoted: Vec<AgentId>,
}

struct PendingTimer {
    generation: u64,
    at: DateTime<Utc>,
    cancel: CancellationToken,
}

/// Holds at most one pending timer per agent.
pub struct Scheduler {
    timers: Mutex<HashMap<AgentId, PendingTimer>>,
    next_generation: AtomicU64,
    fire_tx: mpsc::UnboundedSender<ScheduledFire>,
}

impl Scheduler {
    /// Create a scheduler and the receiver its timers report to.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ScheduledFire>) {
        let (fire_tx, fire_rx) = mpsc::unbounded_channel();
        let scheduler = Arc::new(Self {
            timers: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            fire_tx,
        });
        (scheduler, fire_rx)
    }

    /// Rebuild the timer set from `agents`. Must be called within a Tokio runtime.
    pub fn rederive(self: &Arc<Self>, agents: &[Agent]) -> Rederivation {
        self.rederive_at(agents, Utc::now())
    }

    /// Rebuild the timer set as of `now`.
    pub fn rederive_at(self: &Arc<Self>, agents: &[Agent], now: DateTime<Utc>) -> Rederivation {
        let mut timers = self.lock();
        let previously_pending: HashSet<AgentId> = timers.keys().cloned().collect();
        for (_, timer) in timers.drain() {
            timer.cancel.cancel();
        }

        let mut outcome = Rederivation::default();
        for agent in agents {
            match agent.schedule {
                Some(at) if agent.is_scheduled_after(now) => {
                    let timer = self.arm(agent.id.clone(), at, now);
                    if let Some(replaced) = timers.insert(agent.id.clone(), timer) {
                        replaced.cancel.cancel();
                    } else {
                        outcome.armed.push(agent.id.clone());
                    }
                }
                Some(at) if previously_pending.contains(&agent.id) => {
                    info!(agent_id = %agent.id, scheduled_for = %at, "schedule passed before firing");
                    outcome.demoted.push(agent.id.clone());
                }
                _ => {}
            }
        }

        debug!(
            pending = timers.len(),
            demoted = outcome.demoted.len(),
            "scheduler re-derived"
        );
        outcome
    }

    /// Cancel the pending timer for one agent.
    pub fn cancel(&self, agent_id: &AgentId) -> bool {
        match self.lock().remove(agent_id) {
            Some(timer) => {
                timer.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every pending timer.
    pub fn cancel_all(&self) {
        for (_, timer) in self.lock().drain() {
            timer.cancel.cancel();
        }
    }

    pub fn is_pending(&self, agent_id: &AgentId) -> bool {
        self.lock().contains_key(agent_id)
    }

    /// Pending timers and their fire times, ordered by fire time.
    pub fn pending(&self) -> Vec<(AgentId, DateTime<Utc>)> {
        let mut pending: Vec<_> = self
            .lock()
            .iter()
            .map(|(id, timer)| (id.clone(), timer.at))
            .collect();
        pending.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        pending
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    fn arm(self: &Arc<Self>, agent_id: AgentId, at: DateTime<Utc>, now: DateTime<Utc>) -> PendingTimer {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let scheduler = Arc::downgrade(self);

        debug!(%agent_id, scheduled_for = %at, "arming timer");
        let initial_wait = until(at, now);
        tokio::spawn(async move {
            let mut wait = initial_wait;
            // Tokio timers never fire early on the monotonic clock; re-check the
            // wall clock so a clock adjustment cannot fire before `at` either.
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(wait) => {}
                }
                wait = until(at, Utc::now());
                if wait.is_zero() {
                    break;
                }
            }
            fire(scheduler, agent_id, generation, at);
        });

        PendingTimer {
            generation,
            at,
            cancel,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<AgentId, PendingTimer>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn until(at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (at - now).to_std().unwrap_or(Duration::ZERO)
}

fn fire(scheduler: Weak<Scheduler>, agent_id: AgentId, generation: u64, at: DateTime<Utc>) {
    let Some(scheduler) = scheduler.upgrade() else {
        return;
    };
    let mut timers = scheduler.lock();
    let current = timers
        .get(&agent_id)
        .is_some_and(|timer| timer.generation == generation && !timer.cancel.is_cancelled());
    if !current {
        return;
    }
    timers.remove(&agent_id);

    info!(%agent_id, scheduled_for = %at, "scheduled trigger firing");
    let _ = scheduler.fire_tx.send(ScheduledFire {
        agent_id,
        scheduled_for: at,
    });
}
