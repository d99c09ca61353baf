use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

/// Relative priority of a unit of work. The runtime only guarantees FIFO
/// ordering within a single priority class (see `AgentRuntime`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    Normal,
    High,
    Critical,
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::Normal
    }
}

/// A unit of work submitted to an agent's queue.
///
/// Identity and classification are required; everything else has a sane
/// default. Mutated only by the owning agent's execution loop after
/// submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    pub task_id: String,
    pub task_type: String,
    pub priority: TaskPriority,
    pub params: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub timeout: Option<std::time::Duration>,
}

impl AgentTask {
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    pub fn increment_retry(&mut self) {
        self.retry_count += 1;
    }
}

/// Fluent builder for `AgentTask`, in the same shape as the crate's other
/// domain builders: validate required fields on `build()`, never before.
#[derive(Debug, Default)]
pub struct AgentTaskBuilder {
    task_id: Option<String>,
    task_type: Option<String>,
    priority: TaskPriority,
    params: HashMap<String, Value>,
    retry_count: u32,
    max_retries: u32,
    timeout: Option<std::time::Duration>,
}

impl AgentTaskBuilder {
    pub fn new() -> Self {
        Self {
            max_retries: 3,
            ..Default::default()
        }
    }

    pub fn task_id(mut self, id: impl Into<String>) -> Self {
        self.task_id = Some(id.into());
        self
    }

    pub fn task_type(mut self, ty: impl Into<String>) -> Self {
        self.task_type = Some(ty.into());
        self
    }

    pub fn priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn params(mut self, params: HashMap<String, Value>) -> Self {
        self.params.extend(params);
        self
    }

    pub fn max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<AgentTask, CoreError> {
        let task_id = self
            .task_id
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CoreError::ValidationFailed("task_id is required".into()))?;
        let task_type = self
            .task_type
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CoreError::ValidationFailed("task_type is required".into()))?;

        Ok(AgentTask {
            task_id,
            task_type,
            priority: self.priority,
            params: self.params,
            created_at: Utc::now(),
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            timeout: self.timeout,
        })
    }
}

/// Lifecycle state of an agent's execution loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Idle,
    Running,
    Paused,
    Error,
    Stopped,
}

/// Rolling performance counters for an agent, updated only from within its
/// own execution loop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub total_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub avg_task_duration_secs: f64,
    pub last_task_at: Option<DateTime<Utc>>,
    pub error_count: u64,
    pub last_error_at: Option<DateTime<Utc>>,
    pub uptime_secs: f64,
}

impl AgentMetrics {
    /// EWMA with alpha = 0.1, matching the reference agent's moving average.
    pub fn record_task_completion(&mut self, duration_secs: f64, success: bool) {
        self.total_tasks += 1;
        if success {
            self.completed_tasks += 1;
        } else {
            self.failed_tasks += 1;
        }

        if self.avg_task_duration_secs == 0.0 {
            self.avg_task_duration_secs = duration_secs;
        } else {
            self.avg_task_duration_secs = self.avg_task_duration_secs * 0.9 + duration_secs * 0.1;
        }

        self.last_task_at = Some(Utc::now());
    }

    pub fn record_error(&mut self) {
        self.error_count += 1;
        self.last_error_at = Some(Utc::now());
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_tasks == 0 {
            0.0
        } else {
            self.completed_tasks as f64 / self.total_tasks as f64 * 100.0
        }
    }
}
