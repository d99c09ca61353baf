mod executor;
mod runtime;

pub use executor::Executor;
pub use runtime::AgentRuntime;

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};
    use trading_core_types::{AgentState, AgentTask, AgentTaskBuilder, CoreError};

    use super::*;

    struct CountingExecutor {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Executor for CountingExecutor {
        async fn process_task(&self, _task: &AgentTask) -> Result<Value, CoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"ok": true}))
        }
    }

    struct AlwaysFailsExecutor;

    #[async_trait]
    impl Executor for AlwaysFailsExecutor {
        async fn process_task(&self, _task: &AgentTask) -> Result<Value, CoreError> {
            Err(CoreError::AgentErrored("always-fails".to_string()))
        }
    }

    #[tokio::test]
    async fn submitted_task_is_processed() {
        let calls = Arc::new(AtomicU32::new(0));
        let runtime = AgentRuntime::new(
            "test-agent",
            CountingExecutor {
                calls: calls.clone(),
            },
            16,
        );
        runtime.start().await;

        let task = AgentTaskBuilder::new()
            .task_id("t-1")
            .task_type("noop")
            .build()
            .unwrap();
        runtime.submit(task).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        runtime.stop(Duration::from_secs(1)).await;
        assert_eq!(runtime.status().await, AgentState::Stopped);
    }

    #[tokio::test]
    async fn duplicate_task_id_is_rejected_while_running() {
        let calls = Arc::new(AtomicU32::new(0));
        let runtime = AgentRuntime::new(
            "test-agent",
            CountingExecutor {
                calls: calls.clone(),
            },
            16,
        );
        runtime.start().await;

        let task = AgentTaskBuilder::new()
            .task_id("dup")
            .task_type("noop")
            .max_retries(0)
            .build()
            .unwrap();
        runtime.submit(task.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        runtime.stop(Duration::from_secs(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ten_consecutive_failures_trip_to_error() {
        let runtime = AgentRuntime::new("failing-agent", AlwaysFailsExecutor, 32);
        runtime.start().await;

        for i in 0..10 {
            let task = AgentTaskBuilder::new()
                .task_id(format!("t-{i}"))
                .task_type("noop")
                .max_retries(0)
                .build()
                .unwrap();
            runtime.submit(task).await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(runtime.status().await, AgentState::Error);
    }

    #[tokio::test]
    async fn pause_stops_processing_until_resumed() {
        let calls = Arc::new(AtomicU32::new(0));
        let runtime = AgentRuntime::new(
            "pausable-agent",
            CountingExecutor {
                calls: calls.clone(),
            },
            16,
        );
        runtime.start().await;
        runtime.pause().await;

        let task = AgentTaskBuilder::new()
            .task_id("t-1")
            .task_type("noop")
            .build()
            .unwrap();
        runtime.submit(task).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        runtime.resume().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        runtime.stop(Duration::from_secs(1)).await;
    }
}
