use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, warn};
use trading_core_types::{AgentState, AgentTask};

use crate::executor::Executor;

const PAUSE_POLL: Duration = Duration::from_millis(500);
const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(1);
const RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_CONSECUTIVE_ERRORS: u32 = 10;

/// Generic actor wrapping an `Executor` with a private task queue, a
/// lifecycle state machine, and rolling metrics.
///
/// Processes one task at a time per agent, FIFO within whatever priority
/// class the submitter used. Built around the reference agent's loop:
/// dequeue, reject duplicates, run under an optional deadline, record the
/// result, retry or drop on failure, and trip to `ERROR` after ten
/// consecutive loop-level failures.
pub struct AgentRuntime<E: Executor + 'static> {
    agent_id: String,
    executor: Arc<E>,
    state: Arc<RwLock<AgentState>>,
    metrics: Arc<Mutex<trading_core_types::AgentMetrics>>,
    sender: mpsc::Sender<AgentTask>,
    receiver: Mutex<Option<mpsc::Receiver<AgentTask>>>,
    running_tasks: Arc<Mutex<HashSet<String>>>,
    consecutive_errors: Arc<AtomicU32>,
    shutdown: Arc<Notify>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<E: Executor + 'static> AgentRuntime<E> {
    pub fn new(agent_id: impl Into<String>, executor: E, queue_capacity: usize) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel(queue_capacity);
        Arc::new(Self {
            agent_id: agent_id.into(),
            executor: Arc::new(executor),
            state: Arc::new(RwLock::new(AgentState::Idle)),
            metrics: Arc::new(Mutex::new(trading_core_types::AgentMetrics::default())),
            sender,
            receiver: Mutex::new(Some(receiver)),
            running_tasks: Arc::new(Mutex::new(HashSet::new())),
            consecutive_errors: Arc::new(AtomicU32::new(0)),
            shutdown: Arc::new(Notify::new()),
            loop_handle: Mutex::new(None),
        })
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub async fn status(&self) -> AgentState {
        *self.state.read().await
    }

    pub async fn metrics(&self) -> trading_core_types::AgentMetrics {
        self.metrics.lock().await.clone()
    }

    pub async fn submit(&self, task: AgentTask) -> Result<(), trading_core_types::CoreError> {
        self.sender
            .send(task)
            .await
            .map_err(|_| trading_core_types::CoreError::AgentErrored(self.agent_id.clone()))
    }

    pub async fn pause(&self) {
        *self.state.write().await = AgentState::Paused;
    }

    pub async fn resume(&self) {
        let mut state = self.state.write().await;
        if *state == AgentState::Paused {
            *state = AgentState::Running;
        }
    }

    /// Spawns the execution loop. Idempotent: calling `start` twice on an
    /// already-running agent is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut handle_guard = self.loop_handle.lock().await;
        if handle_guard.is_some() {
            return;
        }
        *self.state.write().await = AgentState::Running;

        let receiver = self.receiver.lock().await.take();
        let Some(receiver) = receiver else { return };

        let this = Arc::clone(self);
        *handle_guard = Some(tokio::spawn(async move { this.run_loop(receiver).await }));
    }

    /// Flips state to `STOPPED`, wakes the loop, and waits up to `timeout`
    /// for it to finish; cancels it otherwise.
    pub async fn stop(self: &Arc<Self>, timeout: Duration) {
        *self.state.write().await = AgentState::Stopped;
        self.shutdown.notify_waiters();

        let handle = self.loop_handle.lock().await.take();
        if let Some(handle) = handle {
            if tokio::time::timeout(timeout, handle).await.is_err() {
                warn!(agent_id = %self.agent_id, "shutdown timed out, loop task abandoned");
            }
        }
    }

    async fn run_loop(self: Arc<Self>, mut receiver: mpsc::Receiver<AgentTask>) {
        loop {
            let state = *self.state.read().await;
            match state {
                AgentState::Stopped | AgentState::Error => break,
                AgentState::Paused => {
                    tokio::select! {
                        _ = tokio::time::sleep(PAUSE_POLL) => continue,
                        _ = self.shutdown.notified() => break,
                    }
                }
                _ => {}
            }

            let dequeued = tokio::select! {
                r = tokio::time::timeout(DEQUEUE_TIMEOUT, receiver.recv()) => r,
                _ = self.shutdown.notified() => break,
            };

            let task = match dequeued {
                Ok(Some(task)) => task,
                Ok(None) => break,
                Err(_) => continue,
            };

            self.handle_task(task).await;
        }

        let metrics = self.metrics.lock().await.clone();
        tracing::info!(
            agent_id = %self.agent_id,
            total_tasks = metrics.total_tasks,
            success_rate = metrics.success_rate(),
            "agent loop exited"
        );
    }

    async fn handle_task(&self, mut task: AgentTask) {
        {
            let mut running = self.running_tasks.lock().await;
            if running.contains(&task.task_id) {
                warn!(task_id = %task.task_id, "rejecting duplicate task_id");
                return;
            }
            running.insert(task.task_id.clone());
        }

        let start = Instant::now();
        let outcome = match task.timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.executor.process_task(&task))
                .await
                .unwrap_or(Err(trading_core_types::CoreError::AgentTimeout {
                    task_id: task.task_id.clone(),
                    timeout_secs: timeout.as_secs_f64(),
                })),
            None => self.executor.process_task(&task).await,
        };

        self.running_tasks.lock().await.remove(&task.task_id);
        let duration = start.elapsed().as_secs_f64();

        match outcome {
            Ok(_value) => {
                self.metrics
                    .lock()
                    .await
                    .record_task_completion(duration, true);
                self.consecutive_errors.store(0, Ordering::SeqCst);
            }
            Err(err) => {
                error!(task_id = %task.task_id, %err, "task failed");
                {
                    let mut metrics = self.metrics.lock().await;
                    metrics.record_task_completion(duration, false);
                    metrics.record_error();
                }

                if task.can_retry() {
                    task.increment_retry();
                    let sender = self.sender.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(RETRY_DELAY).await;
                        let _ = sender.send(task).await;
                    });
                }

                let failures = self.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= MAX_CONSECUTIVE_ERRORS {
                    error!(agent_id = %self.agent_id, "tripping to ERROR after consecutive failures");
                    *self.state.write().await = AgentState::Error;
                }
            }
        }
    }
}
