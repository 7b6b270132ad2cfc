use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use rdb_types::RdbResult;

/// Boxed future returned by a step.
pub type StepFuture<'a, C> = Pin<Box<dyn Future<Output = RdbResult<C>> + Send + 'a>>;

/// A step as stored by the executor.
pub type BoxedStep<'a, C> = Box<dyn Step<'a, C>>;

// ---------------------------------------------------------------------------
// Step trait
// ---------------------------------------------------------------------------

/// A single stage of a transaction pipeline.
///
/// A step receives the previous step's success payload and returns the
/// payload for the next one. Steps run at most once, so `run` consumes the
/// step; this lets closures move owned data into their future.
pub trait Step<'a, C>: Send + 'a {
    /// Human-readable name used in logs and abort reports.
    fn name(&self) -> &str;

    /// Run the step.
    fn run(self: Box<Self>, input: C) -> StepFuture<'a, C>;
}

// ---------------------------------------------------------------------------
// Closure-backed steps
// ---------------------------------------------------------------------------

/// A [`Step`] backed by an async closure.
pub struct FnStep<F> {
    name: String,
    f: F,
}

impl<'a, C, F, Fut> Step<'a, C> for FnStep<F>
where
    C: 'a,
    F: FnOnce(C) -> Fut + Send + 'a,
    Fut: Future<Output = RdbResult<C>> + Send + 'a,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(self: Box<Self>, input: C) -> StepFuture<'a, C> {
        Box::pin((self.f)(input))
    }
}

/// Wrap an async closure as a boxed step.
pub fn step<'a, C, F, Fut>(name: impl Into<String>, f: F) -> BoxedStep<'a, C>
where
    C: 'a,
    F: FnOnce(C) -> Fut + Send + 'a,
    Fut: Future<Output = RdbResult<C>> + Send + 'a,
{
    Box::new(FnStep {
        name: name.into(),
        f,
    })
}

// ---------------------------------------------------------------------------
// StepRecord
// ---------------------------------------------------------------------------

/// Recorded result of a completed step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepRecord {
    /// Name of the step.
    pub name: String,
    /// Wall-clock time the step took.
    pub elapsed: Duration,
}
