//! Agent trigger / autonomous cycle gate.
//!
//! External agents request an immediate dispatch cycle through this gate.
//! Two rolling-window cooldowns apply, both sliding from the last
//! *successful* trigger: a global one and a per-agent one. `Critical`
//! priority bypasses both (logged as a bypass). Allowed triggers are
//! recorded in bounded rings and kick the supervisor's dispatch worker.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::TriggerConfig;
use crate::error::DispatchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerPriority {
    Low,
    Normal,
    High,
    Critical,
}

/// One recorded trigger.
#[derive(Debug, Clone)]
pub struct TriggerRecord {
    pub at: DateTime<Utc>,
    pub agent: String,
    pub reason: String,
    pub priority: TriggerPriority,
    pub context: serde_json::Value,
}

/// Kick message consumed by the supervisor's dispatch worker.
#[derive(Debug, Clone)]
pub struct CycleKick {
    pub agent: String,
    pub reason: String,
    pub priority: TriggerPriority,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TriggerReceipt {
    pub recorded_at: DateTime<Utc>,
    pub bypassed_cooldown: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerStats {
    pub allowed: u64,
    pub blocked: u64,
    pub cooldown_bypasses: u64,
}

#[derive(Default)]
struct GateState {
    last_global_success: Option<DateTime<Utc>>,
    last_agent_success: HashMap<String, DateTime<Utc>>,
    global_ring: VecDeque<TriggerRecord>,
    agent_rings: HashMap<String, VecDeque<TriggerRecord>>,
    stats: TriggerStats,
}

pub struct AgentTriggerGate {
    config: TriggerConfig,
    kick_tx: mpsc::Sender<CycleKick>,
    state: Mutex<GateState>,
}

impl AgentTriggerGate {
    pub fn new(config: TriggerConfig, kick_tx: mpsc::Sender<CycleKick>) -> Self {
        Self {
            config,
            kick_tx,
            state: Mutex::new(GateState::default()),
        }
    }

    /// Request an immediate dispatch cycle on behalf of an agent.
    pub fn trigger_from_agent(
        &self,
        agent: &str,
        reason: &str,
        context: serde_json::Value,
        priority: TriggerPriority,
    ) -> Result<TriggerReceipt, DispatchError> {
        self.trigger_at(Utc::now(), agent, reason, context, priority)
    }

    pub(crate) fn trigger_at(
        &self,
        now: DateTime<Utc>,
        agent: &str,
        reason: &str,
        context: serde_json::Value,
        priority: TriggerPriority,
    ) -> Result<TriggerReceipt, DispatchError> {
        let bypass = priority == TriggerPriority::Critical;
        let mut state = self.state.lock().unwrap();

        if !bypass {
            if let Some(retry_after_ms) = self.cooldown_block(&state, agent, now) {
                state.stats.blocked += 1;
                return Err(DispatchError::Cooldown { retry_after_ms });
            }
        }

        // Kick the cycle. A full channel means a cycle is already queued,
        // which is exactly what the agent asked for.
        match self.kick_tx.try_send(CycleKick {
            agent: agent.to_string(),
            reason: reason.to_string(),
            priority,
            at: now,
        }) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => {}
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(agent, "trigger dropped, supervisor is not running");
                return Err(DispatchError::NotInitialized);
            }
        }

        let record = TriggerRecord {
            at: now,
            agent: agent.to_string(),
            reason: reason.to_string(),
            priority,
            context,
        };
        push_bounded(&mut state.global_ring, record.clone(), self.config.global_history);
        let per_agent_history = self.config.per_agent_history;
        push_bounded(
            state.agent_rings.entry(agent.to_string()).or_default(),
            record,
            per_agent_history,
        );
        state.last_global_success = Some(now);
        state.last_agent_success.insert(agent.to_string(), now);
        state.stats.allowed += 1;
        if bypass {
            state.stats.cooldown_bypasses += 1;
            info!(agent, reason, "critical trigger bypassed cooldowns");
        } else {
            info!(agent, reason, "agent trigger accepted");
        }

        Ok(TriggerReceipt {
            recorded_at: now,
            bypassed_cooldown: bypass,
        })
    }

    /// Milliseconds until the gate reopens, or `None` when clear. The
    /// longer of the global and per-agent windows wins.
    fn cooldown_block(&self, state: &GateState, agent: &str, now: DateTime<Utc>) -> Option<u64> {
        let remaining = |last: DateTime<Utc>, window_ms: i64| -> Option<u64> {
            let elapsed_ms = (now - last).num_milliseconds();
            if elapsed_ms < window_ms {
                Some((window_ms - elapsed_ms) as u64)
            } else {
                None
            }
        };

        let global = state.last_global_success.and_then(|last| {
            remaining(last, self.config.global_cooldown.as_millis() as i64)
        });
        let per_agent = state.last_agent_success.get(agent).and_then(|&last| {
            remaining(last, self.config.per_agent_cooldown.as_millis() as i64)
        });

        match (global, per_agent) {
            (None, None) => None,
            (a, b) => Some(a.unwrap_or(0).max(b.unwrap_or(0))),
        }
    }

    pub fn stats(&self) -> TriggerStats {
        self.state.lock().unwrap().stats
    }

    /// Recent triggers, newest last: the global ring, or one agent's ring.
    pub fn recent_triggers(&self, agent: Option<&str>) -> Vec<TriggerRecord> {
        let state = self.state.lock().unwrap();
        match agent {
            Some(agent) => state
                .agent_rings
                .get(agent)
                .map(|ring| ring.iter().cloned().collect())
                .unwrap_or_default(),
            None => state.global_ring.iter().cloned().collect(),
        }
    }
}

fn push_bounded(ring: &mut VecDeque<TriggerRecord>, record: TriggerRecord, capacity: usize) {
    if ring.len() == capacity {
        ring.pop_front();
    }
    ring.push_back(record);
}
