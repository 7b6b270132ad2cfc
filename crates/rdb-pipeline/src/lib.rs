//! Sequential transaction pipeline for RepoDB.
//!
//! A pipeline is an ordered list of named async steps. Each step receives
//! the previous step's success payload; the first failure stops the run and
//! is reported as [`rdb_types::RdbError::TransactionAbort`] with the failing
//! step's position and how many steps had completed before it.
//!
//! There is no compensation: a failed run leaves whatever the completed
//! steps did in place, and the abort report is what an operator uses to
//! reconcile.
//!
//! Pipelines may be started from inside a step of another pipeline. The
//! inner run records the outer run as its parent (see [`current_run`]).

pub mod executor;
pub mod step;

pub use executor::{current_depth, current_run, Execution, ExecutionReport, TransactionExecutor};
pub use step::{step, BoxedStep, FnStep, Step, StepFuture, StepRecord};

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use rdb_types::{ErrorKind, RdbError};

    use super::*;

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    // -----------------------------------------------------------------------
    // 1. Steps run in order and thread their payload
    // -----------------------------------------------------------------------
    #[tokio::test]
    async fn payload_threads_through_steps() {
        let exec = TransactionExecutor::new("arith")
            .then("add-one", |n: i64| async move { Ok(n + 1) })
            .then("double", |n: i64| async move { Ok(n * 2) })
            .then("minus-three", |n: i64| async move { Ok(n - 3) });

        let done = exec.execute(5).await.unwrap();
        assert_eq!(done.output, 9);
        assert_eq!(
            done.report.step_names(),
            vec!["add-one", "double", "minus-three"]
        );
        assert_eq!(done.report.pipeline, "arith");
        assert_eq!(done.report.depth, 0);
        assert!(done.report.parent_run.is_none());
    }

    // -----------------------------------------------------------------------
    // 2. Fail-fast: S3 never runs after S2 fails
    // -----------------------------------------------------------------------
    #[tokio::test]
    async fn failure_stops_later_steps() {
        let third = counter();
        let third_probe = third.clone();

        let exec = TransactionExecutor::new("fail-fast")
            .then("s1", |n: u32| async move { Ok(n + 1) })
            .then("s2", |_n: u32| async move {
                Err(RdbError::Validation("boom".into()))
            })
            .then("s3", move |n: u32| async move {
                third_probe.fetch_add(1, Ordering::SeqCst);
                Ok(n)
            });

        let err = exec.execute(0).await.unwrap_err();
        assert_eq!(third.load(Ordering::SeqCst), 0);
        assert_eq!(err.kind(), ErrorKind::TransactionAbort);

        let report = err.abort_report().expect("abort report");
        assert_eq!(report.pipeline, "fail-fast");
        assert_eq!(report.failed_step, 1);
        assert_eq!(report.step_name, "s2");
        assert_eq!(report.completed_steps, 1);
        assert_eq!(*report.cause, RdbError::Validation("boom".into()));
        assert_eq!(err.root_cause(), &RdbError::Validation("boom".into()));
    }

    // -----------------------------------------------------------------------
    // 3. First step failing reports zero completed steps
    // -----------------------------------------------------------------------
    #[tokio::test]
    async fn failure_in_first_step() {
        let exec = TransactionExecutor::new("early")
            .then("lock", |_: ()| async move { Err(RdbError::lock_conflict("Companies")) })
            .then("write", |_: ()| async move { Ok(()) });

        let err = exec.execute(()).await.unwrap_err();
        let report = err.abort_report().unwrap();
        assert_eq!(report.failed_step, 0);
        assert_eq!(report.completed_steps, 0);
        assert!(report.cause.is_retryable());
    }

    // -----------------------------------------------------------------------
    // 4. Empty pipeline returns its input
    // -----------------------------------------------------------------------
    #[tokio::test]
    async fn empty_pipeline_is_identity() {
        let exec: TransactionExecutor<'_, String> = TransactionExecutor::new("noop");
        assert_eq!(exec.step_count(), 0);
        let done = exec.execute("payload".to_string()).await.unwrap();
        assert_eq!(done.output, "payload");
        assert!(done.report.steps.is_empty());
    }

    // -----------------------------------------------------------------------
    // 5. Steps may borrow from the caller
    // -----------------------------------------------------------------------
    #[tokio::test]
    async fn steps_borrow_caller_state() {
        let names = vec!["Acme".to_string(), "Globex".to_string()];
        let seen = counter();

        let exec = TransactionExecutor::new("borrow")
            .then("count", |acc: Vec<String>| {
                let names = &names;
                let seen = &seen;
                async move {
                    seen.fetch_add(names.len(), Ordering::SeqCst);
                    let mut acc = acc;
                    acc.extend(names.iter().cloned());
                    Ok(acc)
                }
            });

        let done = exec.execute(Vec::new()).await.unwrap();
        assert_eq!(done.output, names);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    // -----------------------------------------------------------------------
    // 6. Nested runs record their parent
    // -----------------------------------------------------------------------
    #[tokio::test]
    async fn nested_run_records_parent() {
        assert!(current_run().is_none());

        let exec = TransactionExecutor::new("outer").then(
            "spawn-inner",
            |_: Option<ExecutionReport>| async move {
                let outer = current_run().expect("inside outer run");
                assert_eq!(current_depth(), Some(0));

                let inner = TransactionExecutor::new("inner")
                    .then("noop", |n: u8| async move { Ok(n) })
                    .execute(1)
                    .await?;
                assert_eq!(inner.report.parent_run, Some(outer));
                assert_eq!(current_run(), Some(outer));
                Ok::<_, RdbError>(Some(inner.report))
            },
        );

        let done = exec.execute(None).await.unwrap();
        let inner = done.output.expect("inner report");
        assert_eq!(inner.depth, 1);
        assert_eq!(inner.parent_run, Some(done.report.run_id));
        assert!(current_run().is_none());
    }

    // -----------------------------------------------------------------------
    // 7. Nested abort surfaces through the outer run
    // -----------------------------------------------------------------------
    #[tokio::test]
    async fn nested_abort_keeps_root_cause() {
        let exec = TransactionExecutor::new("outer")
            .then("ok", |n: u8| async move { Ok(n) })
            .then("inner", |n: u8| async move {
                TransactionExecutor::new("inner")
                    .then("fail", |_: u8| async move {
                        Err(RdbError::Remote("503".into()))
                    })
                    .execute(n)
                    .await
                    .map(|e| e.output)
            });

        let err = exec.execute(0).await.unwrap_err();
        let outer = err.abort_report().unwrap();
        assert_eq!(outer.step_name, "inner");
        assert_eq!(outer.completed_steps, 1);

        let inner = outer.cause.abort_report().unwrap();
        assert_eq!(inner.pipeline, "inner");
        assert_eq!(inner.parent_run, Some(outer.run_id));
        assert_eq!(err.root_cause(), &RdbError::Remote("503".into()));
    }

    // -----------------------------------------------------------------------
    // 8. Boxed steps and the builder mix
    // -----------------------------------------------------------------------
    #[tokio::test]
    async fn prebuilt_steps() {
        let steps: Vec<BoxedStep<'_, String>> = vec![
            step("upper", |s: String| async move { Ok(s.to_uppercase()) }),
            step("suffix", |s: String| async move { Ok(format!("{s}!")) }),
        ];
        let mut exec = TransactionExecutor::with_steps("strings", steps);
        exec.add_step(step("trim", |s: String| async move {
            Ok(s.trim().to_string())
        }));
        assert_eq!(exec.step_count(), 3);
        assert!(format!("{exec:?}").contains("suffix"));

        let done = exec.execute(" hi".into()).await.unwrap();
        assert_eq!(done.output, "HI!");
        assert_eq!(done.report.steps.len(), 3);
    }

    // -----------------------------------------------------------------------
    // 9. Concurrent runs get distinct ids and no parent
    // -----------------------------------------------------------------------
    #[tokio::test]
    async fn concurrent_runs_are_independent() {
        let a = tokio::spawn(
            TransactionExecutor::new("a")
                .then("yield", |n: u8| async move {
                    tokio::task::yield_now().await;
                    Ok(n)
                })
                .execute(1),
        );
        let b = tokio::spawn(
            TransactionExecutor::new("b")
                .then("yield", |n: u8| async move {
                    tokio::task::yield_now().await;
                    Ok(n)
                })
                .execute(2),
        );
        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();
        assert_ne!(a.report.run_id, b.report.run_id);
        assert!(a.report.parent_run.is_none());
        assert!(b.report.parent_run.is_none());
    }
}
