/// One operation queued into a `KvStore::execute_pipeline` batch. Covers the
/// cost-tracker's hourly/daily/agent aggregate updates (§4.2.5), which need
/// several hash increments plus an `EXPIRE` to land in one round-trip.
#[derive(Debug, Clone)]
pub enum PipelineOp {
    HIncrBy { key: String, field: String, delta: i64 },
    HIncrByFloat { key: String, field: String, delta: f64 },
    Expire { key: String, ttl_secs: u64 },
    SetEx { key: String, value: String, ttl_secs: u64 },
    Delete { key: String },
}

/// Fluent collector for a batch of operations to run atomically.
#[derive(Debug, Clone, Default)]
pub struct PipelineBuilder {
    ops: Vec<PipelineOp>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hincrby(mut self, key: impl Into<String>, field: impl Into<String>, delta: i64) -> Self {
        self.ops.push(PipelineOp::HIncrBy {
            key: key.into(),
            field: field.into(),
            delta,
        });
        self
    }

    pub fn hincrby_float(
        mut self,
        key: impl Into<String>,
        field: impl Into<String>,
        delta: f64,
    ) -> Self {
        self.ops.push(PipelineOp::HIncrByFloat {
            key: key.into(),
            field: field.into(),
            delta,
        });
        self
    }

    pub fn expire(mut self, key: impl Into<String>, ttl_secs: u64) -> Self {
        self.ops.push(PipelineOp::Expire {
            key: key.into(),
            ttl_secs,
        });
        self
    }

    pub fn set_ex(mut self, key: impl Into<String>, value: impl Into<String>, ttl_secs: u64) -> Self {
        self.ops.push(PipelineOp::SetEx {
            key: key.into(),
            value: value.into(),
            ttl_secs,
        });
        self
    }

    pub fn delete(mut self, key: impl Into<String>) -> Self {
        self.ops.push(PipelineOp::Delete { key: key.into() });
        self
    }

    pub fn ops(&self) -> &[PipelineOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<PipelineOp> {
        self.ops
    }
}
