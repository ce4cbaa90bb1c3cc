//! Table-driven pipeline execution framework.
//!
//! Both the image build and the container boot are expressed as ordered
//! sequences of tasks operating over a shared context object.
//!
//! ```text
//! ExecutionPlan → Pipeline → Executor
//!
//! - ExecutionPlan: Ordered task table, selected by lifecycle state
//! - Task: Atomic unit of work with a typed shared context
//! - Executor: Runs tasks in declared order, collecting per-task timings
//! ```
//!
//! Tasks are strictly sequential: each task observes the filesystem and
//! context state left by the previous one.
//!
//! ## Example
//!
//! ```ignore
//! use pipeline::{ExecutionPlan, PipelineBuilder, PipelineExecutor};
//! use std::sync::Arc;
//! use tokio::sync::Mutex;
//!
//! let plan = ExecutionPlan::new(vec![Box::new(TaskA), Box::new(TaskB)]);
//! let ctx = Arc::new(Mutex::new(Context::default()));
//! let pipeline = PipelineBuilder::from_plan(plan);
//! let metrics = PipelineExecutor::execute(pipeline, ctx).await?;
//! println!("pipeline took {}ms", metrics.total_duration_ms);
//! ```

mod executor;
mod metrics;
mod task;

pub use executor::{ExecutionPlan, Pipeline, PipelineBuilder, PipelineExecutor};
pub use metrics::{PipelineMetrics, TaskMetrics};
pub use task::{BoxedTask, PipelineTask};
