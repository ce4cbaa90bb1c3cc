use std::time::Duration;

#[derive(Debug, Clone)]
pub struct TaskMetrics {
    pub name: String,
    pub duration_ms: u128,
}

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub total_duration_ms: u128,
    pub tasks: Vec<TaskMetrics>,
}

impl PipelineMetrics {
    pub fn task_duration_ms(&self, name: &str) -> Option<u128> {
        self.tasks
            .iter()
            .find(|task| task.name == name)
            .map(|task| task.duration_ms)
    }

    /// Log one line per task at info level.
    pub fn log_tasks(&self) {
        for task in &self.tasks {
            tracing::info!(
                task = %task.name,
                duration = ?Duration::from_millis(task.duration_ms as u64),
                "pipeline task finished"
            );
        }
    }
}
