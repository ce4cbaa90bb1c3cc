//! Sequential pipeline executor.
//!
//! Provides a table-driven executor that runs an ordered task list over a
//! shared context. Stage effects are observed strictly in declared order;
//! there is no concurrency inside a pipeline.

use super::metrics::{PipelineMetrics, TaskMetrics};
use super::task::BoxedTask;
use bakelite_shared::errors::BakeliteResult;
use std::time::Instant;

pub struct ExecutionPlan<Ctx> {
    tasks: Vec<BoxedTask<Ctx>>,
}

impl<Ctx> ExecutionPlan<Ctx> {
    pub fn new(tasks: Vec<BoxedTask<Ctx>>) -> Self {
        Self { tasks }
    }

    pub fn tasks(self) -> Vec<BoxedTask<Ctx>> {
        self.tasks
    }
}

pub struct Pipeline<Ctx> {
    tasks: Vec<BoxedTask<Ctx>>,
}

impl<Ctx> Pipeline<Ctx> {
    pub fn new(tasks: Vec<BoxedTask<Ctx>>) -> Self {
        Self { tasks }
    }
}

pub struct PipelineBuilder;

impl PipelineBuilder {
    pub fn from_plan<Ctx>(plan: ExecutionPlan<Ctx>) -> Pipeline<Ctx> {
        Pipeline::new(plan.tasks())
    }
}

/// Pipeline executor framework.
///
/// This provides the generic infrastructure for executing a table-driven
/// pipeline. The actual work is provided by task implementations.
pub struct PipelineExecutor;

impl PipelineExecutor {
    /// Execute a pipeline.
    ///
    /// Iterates through tasks in declared order. The first failing task
    /// aborts the pipeline; later tasks never run.
    ///
    /// Generic over:
    /// - `Ctx`: Shared pipeline context (use interior mutability for writes)
    pub async fn execute<Ctx>(pipeline: Pipeline<Ctx>, ctx: Ctx) -> BakeliteResult<PipelineMetrics>
    where
        Ctx: Clone,
    {
        let total_start = Instant::now();
        let mut task_metrics = Vec::new();

        for task in pipeline.tasks {
            let name = task.name().to_string();
            let task_start = Instant::now();
            task.run(ctx.clone()).await?;
            task_metrics.push(TaskMetrics {
                name,
                duration_ms: task_start.elapsed().as_millis(),
            });
        }

        Ok(PipelineMetrics {
            total_duration_ms: total_start.elapsed().as_millis(),
            tasks: task_metrics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineTask;
    use async_trait::async_trait;
    use bakelite_shared::errors::{BakeliteError, BakeliteResult};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    type Ctx = Arc<Mutex<Vec<&'static str>>>;

    struct Record(&'static str);

    #[async_trait]
    impl PipelineTask<Ctx> for Record {
        async fn run(self: Box<Self>, ctx: Ctx) -> BakeliteResult<()> {
            ctx.lock().await.push(self.0);
            Ok(())
        }

        fn name(&self) -> &str {
            self.0
        }
    }

    struct Fail;

    #[async_trait]
    impl PipelineTask<Ctx> for Fail {
        async fn run(self: Box<Self>, _ctx: Ctx) -> BakeliteResult<()> {
            Err(BakeliteError::Internal("boom".into()))
        }

        fn name(&self) -> &str {
            "fail"
        }
    }

    #[tokio::test]
    async fn tasks_run_in_declared_order() {
        let plan = ExecutionPlan::new(vec![
            Box::new(Record("first")) as BoxedTask<Ctx>,
            Box::new(Record("second")),
            Box::new(Record("third")),
        ]);
        let ctx: Ctx = Arc::new(Mutex::new(Vec::new()));

        let pipeline = PipelineBuilder::from_plan(plan);
        let metrics = PipelineExecutor::execute(pipeline, Arc::clone(&ctx))
            .await
            .unwrap();

        assert_eq!(*ctx.lock().await, vec!["first", "second", "third"]);
        assert_eq!(metrics.tasks.len(), 3);
        assert!(metrics.task_duration_ms("second").is_some());
    }

    #[tokio::test]
    async fn failing_task_aborts_later_tasks() {
        let plan = ExecutionPlan::new(vec![
            Box::new(Record("first")) as BoxedTask<Ctx>,
            Box::new(Fail),
            Box::new(Record("unreached")),
        ]);
        let ctx: Ctx = Arc::new(Mutex::new(Vec::new()));

        let pipeline = PipelineBuilder::from_plan(plan);
        let result = PipelineExecutor::execute(pipeline, Arc::clone(&ctx)).await;

        assert!(result.is_err());
        assert_eq!(*ctx.lock().await, vec!["first"]);
    }
}
