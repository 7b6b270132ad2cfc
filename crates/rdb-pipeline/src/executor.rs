use std::time::{Duration, Instant};

use rdb_types::{AbortReport, RdbError, RdbResult, TransactionId};
use tracing::Instrument;

use crate::step::{step, BoxedStep, StepRecord};

tokio::task_local! {
    static CURRENT_RUN: RunFrame;
}

#[derive(Clone, Copy, Debug)]
struct RunFrame {
    id: TransactionId,
    depth: usize,
}

/// Identifier of the pipeline run executing on the current task, if any.
pub fn current_run() -> Option<TransactionId> {
    CURRENT_RUN.try_with(|frame| frame.id).ok()
}

/// Nesting depth of the current run. `None` outside any run, `Some(0)` for
/// a top-level run.
pub fn current_depth() -> Option<usize> {
    CURRENT_RUN.try_with(|frame| frame.depth).ok()
}

// ---------------------------------------------------------------------------
// ExecutionReport
// ---------------------------------------------------------------------------

/// Timing and correlation data for a successful run.
#[derive(Clone, Debug)]
pub struct ExecutionReport {
    pub run_id: TransactionId,
    pub parent_run: Option<TransactionId>,
    pub depth: usize,
    pub pipeline: String,
    /// Per-step records in execution order.
    pub steps: Vec<StepRecord>,
    pub elapsed: Duration,
}

impl ExecutionReport {
    /// Names of the steps that ran, in order.
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }
}

/// Output payload of the last step plus the run report.
#[derive(Debug)]
pub struct Execution<C> {
    pub output: C,
    pub report: ExecutionReport,
}

// ---------------------------------------------------------------------------
// TransactionExecutor
// ---------------------------------------------------------------------------

/// Runs an ordered list of steps, threading each step's payload into the
/// next.
///
/// Execution is **fail-fast**: the first failing step stops the run, later
/// steps are never invoked, and the error comes back as
/// [`RdbError::TransactionAbort`] carrying the failing step's position and
/// the number of steps that completed. Completed steps are not rolled back.
///
/// Runs started from inside another run's step record that run as their
/// parent.
pub struct TransactionExecutor<'a, C> {
    name: String,
    steps: Vec<BoxedStep<'a, C>>,
}

impl<'a, C: Send + 'a> TransactionExecutor<'a, C> {
    /// Create an empty pipeline.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Create a pipeline from pre-built steps.
    pub fn with_steps(name: impl Into<String>, steps: Vec<BoxedStep<'a, C>>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }

    /// Append a step to the end of the pipeline.
    pub fn add_step(&mut self, step: BoxedStep<'a, C>) {
        self.steps.push(step);
    }

    /// Builder form of [`Self::add_step`] for closures.
    pub fn then<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(C) -> Fut + Send + 'a,
        Fut: std::future::Future<Output = RdbResult<C>> + Send + 'a,
    {
        self.steps.push(step(name, f));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of steps in the pipeline.
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Run every step in order, feeding `input` to the first one.
    pub async fn execute(self, input: C) -> RdbResult<Execution<C>> {
        let parent = CURRENT_RUN.try_with(|frame| *frame).ok();
        let frame = RunFrame {
            id: TransactionId::new(),
            depth: parent.map_or(0, |p| p.depth + 1),
        };
        let span = tracing::info_span!(
            "transaction",
            pipeline = %self.name,
            run_id = %frame.id.short_id(),
            depth = frame.depth,
        );
        CURRENT_RUN
            .scope(
                frame,
                self.run(frame, parent.map(|p| p.id), input)
                    .instrument(span),
            )
            .await
    }

    async fn run(
        self,
        frame: RunFrame,
        parent_run: Option<TransactionId>,
        input: C,
    ) -> RdbResult<Execution<C>> {
        let started = Instant::now();
        let total = self.steps.len();
        tracing::info!(steps = total, parent = ?parent_run.map(|p| p.short_id()), "transaction started");

        let mut payload = input;
        let mut records = Vec::with_capacity(total);

        for (index, step) in self.steps.into_iter().enumerate() {
            let step_name = step.name().to_string();
            let step_start = Instant::now();
            tracing::debug!(step = index, name = %step_name, "running step");

            match step.run(payload).await {
                Ok(next) => {
                    records.push(StepRecord {
                        name: step_name,
                        elapsed: step_start.elapsed(),
                    });
                    payload = next;
                }
                Err(cause) => {
                    tracing::warn!(
                        step = index,
                        name = %step_name,
                        completed_steps = index,
                        error = %cause,
                        "transaction aborted; completed steps are not rolled back"
                    );
                    return Err(RdbError::TransactionAbort(Box::new(AbortReport {
                        run_id: frame.id,
                        parent_run,
                        pipeline: self.name,
                        failed_step: index,
                        step_name,
                        completed_steps: index,
                        branch: None,
                        locked_containers: Vec::new(),
                        cause: Box::new(cause),
                    })));
                }
            }
        }

        let elapsed = started.elapsed();
        tracing::info!(steps = total, elapsed_ms = elapsed.as_millis() as u64, "transaction finished");

        Ok(Execution {
            output: payload,
            report: ExecutionReport {
                run_id: frame.id,
                parent_run,
                depth: frame.depth,
                pipeline: self.name,
                steps: records,
                elapsed,
            },
        })
    }
}

impl<'a, C: 'a> std::fmt::Debug for TransactionExecutor<'a, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionExecutor")
            .field("name", &self.name)
            .field(
                "steps",
                &self.steps.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
