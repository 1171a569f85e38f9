use std::time::Instant;

use async_trait::async_trait;
use metrics::{counter, histogram};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use feedline_errors::{FeedError, FeedResult};

/// Saga中的一个步骤及其补偿
///
/// 步骤之间通过上下文 `C` 传递状态，上下文只在一次执行内有效。
#[async_trait]
pub trait SagaStep<C: Send>: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, ctx: &mut C) -> FeedResult<()>;

    /// 撤销 `execute` 的效果，失败只记录日志
    async fn compensate(&self, ctx: &mut C) -> FeedResult<()>;
}

/// 按顺序执行的一组步骤
pub struct Saga<C> {
    name: String,
    steps: Vec<Box<dyn SagaStep<C>>>,
}

impl<C: Send> Saga<C> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn with_step(mut self, step: impl SagaStep<C> + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// 执行全部步骤
    ///
    /// 第 k 步失败时，第 k 步到第 1 步的补偿逆序各执行一次，
    /// 然后返回包装了第 k 步错误的 [`FeedError::SagaStepFailed`]。
    pub async fn run(&self, ctx: &mut C) -> FeedResult<()> {
        let saga_id = Uuid::new_v4();
        let started = Instant::now();
        info!(saga = %self.name, %saga_id, steps = self.steps.len(), "开始执行Saga");

        for (cursor, step) in self.steps.iter().enumerate() {
            debug!(saga = %self.name, %saga_id, step = step.name(), "执行步骤");
            if let Err(e) = step.execute(ctx).await {
                warn!(saga = %self.name, %saga_id, step = step.name(), "步骤失败: {}", e);
                self.compensate(saga_id, cursor, ctx).await;

                counter!("feedline_saga_runs_total", "saga" => self.name.clone(), "outcome" => "compensated")
                    .increment(1);
                histogram!("feedline_saga_duration_seconds", "saga" => self.name.clone())
                    .record(started.elapsed().as_secs_f64());

                return Err(FeedError::SagaStepFailed {
                    saga: self.name.clone(),
                    step: step.name().to_string(),
                    source: Box::new(e),
                });
            }
        }

        counter!("feedline_saga_runs_total", "saga" => self.name.clone(), "outcome" => "completed")
            .increment(1);
        histogram!("feedline_saga_duration_seconds", "saga" => self.name.clone())
            .record(started.elapsed().as_secs_f64());
        info!(saga = %self.name, %saga_id, "Saga执行完成, 耗时 {:?}", started.elapsed());
        Ok(())
    }

    async fn compensate(&self, saga_id: Uuid, failed_at: usize, ctx: &mut C) {
        for step in self.steps[..=failed_at].iter().rev() {
            match step.compensate(ctx).await {
                Ok(()) => debug!(saga = %self.name, %saga_id, step = step.name(), "补偿完成"),
                Err(e) => {
                    error!(saga = %self.name, %saga_id, step = step.name(), "补偿失败: {}", e);
                    counter!("feedline_saga_compensation_failures_total", "saga" => self.name.clone())
                        .increment(1);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Default)]
    struct Journal {
        entries: Vec<String>,
    }

    struct RecordingStep {
        name: &'static str,
        fail: bool,
        fail_compensation: bool,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingStep {
        fn new(name: &'static str, calls: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name,
                fail: false,
                fail_compensation: false,
                calls: calls.clone(),
            }
        }

        fn failing(mut self) -> Self {
            self.fail = true;
            self
        }

        fn failing_compensation(mut self) -> Self {
            self.fail_compensation = true;
            self
        }
    }

    #[async_trait]
    impl SagaStep<Journal> for RecordingStep {
        fn name(&self) -> &str {
            self.name
        }

        async fn execute(&self, ctx: &mut Journal) -> FeedResult<()> {
            self.calls.lock().unwrap().push(format!("run:{}", self.name));
            if self.fail {
                return Err(FeedError::remote_call(format!("{} failed", self.name)));
            }
            ctx.entries.push(self.name.to_string());
            Ok(())
        }

        async fn compensate(&self, _ctx: &mut Journal) -> FeedResult<()> {
            self.calls.lock().unwrap().push(format!("undo:{}", self.name));
            if self.fail_compensation {
                return Err(FeedError::remote_call("undo failed"));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_all_steps_succeed_without_compensation() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let saga = Saga::new("demo")
            .with_step(RecordingStep::new("a", &calls))
            .with_step(RecordingStep::new("b", &calls));

        let mut journal = Journal::default();
        saga.run(&mut journal).await.unwrap();

        assert_eq!(journal.entries, vec!["a", "b"]);
        assert_eq!(*calls.lock().unwrap(), vec!["run:a", "run:b"]);
    }

    #[tokio::test]
    async fn test_compensates_in_reverse_up_to_failed_step() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let saga = Saga::new("demo")
            .with_step(RecordingStep::new("a", &calls))
            .with_step(RecordingStep::new("b", &calls))
            .with_step(RecordingStep::new("c", &calls).failing())
            .with_step(RecordingStep::new("d", &calls));

        let err = saga.run(&mut Journal::default()).await.unwrap_err();

        assert_eq!(err.failed_step(), Some("c"));
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["run:a", "run:b", "run:c", "undo:c", "undo:b", "undo:a"]
        );
    }

    #[tokio::test]
    async fn test_compensation_failure_keeps_original_error() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let saga = Saga::new("demo")
            .with_step(RecordingStep::new("a", &calls))
            .with_step(RecordingStep::new("b", &calls).failing().failing_compensation());

        let err = saga.run(&mut Journal::default()).await.unwrap_err();

        match err {
            FeedError::SagaStepFailed { saga, step, source } => {
                assert_eq!(saga, "demo");
                assert_eq!(step, "b");
                assert!(source.to_string().contains("b failed"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(*calls.lock().unwrap(), vec!["run:a", "run:b", "undo:b", "undo:a"]);
    }

    #[tokio::test]
    async fn test_empty_saga_succeeds() {
        let saga: Saga<Journal> = Saga::new("empty");
        assert!(saga.is_empty());
        saga.run(&mut Journal::default()).await.unwrap();
    }
}
