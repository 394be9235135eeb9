//! Integration tests for pipeline sequencing, control flow and error policy

mod common;

use common::{number_rows, numbers};
use pipeflow::graph::nodes::{Filter, ForEach, MemorySource};
use pipeflow::{
    Conditional, Context, DoWhile, EngineConfig, Fault, Parallel, Pipeline, Process, ProcessStep,
    Row, Status, Task,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn counter(ctx: &Context, key: &str) -> i64 {
    ctx.get_as::<i64>(key).unwrap_or(0)
}

fn bump(ctx: &Context, key: &str) {
    ctx.update(key, |v| (v.and_then(|v| v.as_i64()).unwrap_or(0) + 1).into());
}

fn three_steps() -> Pipeline {
    Pipeline::new("abc")
        .then(Task::new("a", |ctx: &Context| {
            ctx.set("a", true);
            Ok(())
        }))
        .then(Task::new("b", |_: &Context| anyhow::bail!("b is broken")))
        .then(Task::new("c", |ctx: &Context| {
            ctx.set("c", true);
            Ok(())
        }))
}

#[test]
fn test_stop_policy_skips_remaining_steps() {
    let ctx = Context::default().with_error_policy(|_, _| false);
    let mut pipeline = three_steps();

    let report = pipeline.run(&ctx).unwrap();

    assert_eq!(report.status, Status::Aborted);
    assert!(report.executed("a"));
    assert!(report.executed("b"));
    assert!(!report.executed("c"));
    assert!(!ctx.contains("c"));
    assert_eq!(report.faults.len(), 1);
    assert_eq!(
        report.faults[0],
        Fault::operation("b", "b is broken")
    );
}

#[test]
fn test_continue_policy_runs_remaining_steps() {
    let ctx = Context::default().with_error_policy(|_, _| true);
    let mut pipeline = three_steps();

    let report = pipeline.run(&ctx).unwrap();

    assert_eq!(report.status, Status::Failed);
    assert_eq!(report.steps, vec!["a", "b", "c"]);
    assert_eq!(ctx.get_as::<bool>("c"), Some(true));
    assert_eq!(report.faults.len(), 1);
}

#[test]
fn test_default_policy_follows_config() {
    let ctx = Context::default();
    let report = three_steps().run(&ctx).unwrap();
    assert!(report.is_aborted());

    let mut config = EngineConfig::default();
    config.stop_on_error = false;
    let ctx = Context::new(config);
    let report = three_steps().run(&ctx).unwrap();
    assert_eq!(report.status, Status::Failed);
    assert!(report.executed("c"));
}

#[test]
fn test_policy_sees_the_step_faults() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = seen.clone();
    let ctx = Context::default().with_error_policy(move |_, faults| {
        record
            .lock()
            .unwrap()
            .extend(faults.iter().map(|f| f.message().to_string()));
        true
    });

    three_steps().run(&ctx).unwrap();

    assert_eq!(*seen.lock().unwrap(), vec!["b is broken"]);
}

#[test]
fn test_panicking_step_becomes_fault() {
    let ctx = Context::default();
    let mut pipeline = Pipeline::new("panics")
        .then(Task::new("explode", |_: &Context| -> anyhow::Result<()> {
            panic!("kaboom")
        }));

    let report = pipeline.run(&ctx).unwrap();

    assert!(report.is_aborted());
    assert_eq!(report.faults[0].message(), "panicked: kaboom");
}

#[test]
fn test_release_runs_after_failure() {
    let released = Arc::new(AtomicUsize::new(0));
    let count = released.clone();
    let ctx = Context::default();
    let mut pipeline = Pipeline::new("release").then(
        Task::new("fails", |_: &Context| anyhow::bail!("nope")).on_release(move || {
            count.fetch_add(1, Ordering::SeqCst);
        }),
    );

    pipeline.run(&ctx).unwrap();

    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[test]
fn test_do_while_runs_until_condition_fails() {
    let ctx = Context::default();
    let mut pipeline = Pipeline::new("loop").then(
        DoWhile::new("five times", |ctx: &Context| counter(ctx, "passes") < 5).step(Task::new(
            "count",
            |ctx: &Context| {
                bump(ctx, "passes");
                Ok(())
            },
        )),
    );

    let report = pipeline.run(&ctx).unwrap();

    assert!(report.is_success());
    assert_eq!(counter(&ctx, "passes"), 5);
    assert_eq!(report.steps.iter().filter(|s| *s == "count").count(), 5);
}

#[test]
fn test_do_while_runs_body_at_least_once() {
    let ctx = Context::default();
    let mut pipeline = Pipeline::new("once").then(
        DoWhile::new("never again", |_: &Context| false).step(Task::new("count", |ctx: &Context| {
            bump(ctx, "passes");
            Ok(())
        })),
    );

    pipeline.run(&ctx).unwrap();

    assert_eq!(counter(&ctx, "passes"), 1);
}

#[test]
fn test_process_step_inside_loop() {
    let ctx = Context::default();
    let step = ProcessStep::new("sum evens", |_: &Context| {
        Ok(Process::builder("sum evens")
            .input("numbers", MemorySource::new(number_rows(1..=6)))
            .then(
                "even",
                Filter::new(|row: &Row| Ok(row.get_i64("number").unwrap_or(1) % 2 == 0)),
            )
            .complete(
                "sum",
                ForEach::new(|row: &Row, ctx: &Context| {
                    let n = row.get_i64("number").unwrap_or(0);
                    ctx.update("sum", |v| (v.and_then(|v| v.as_i64()).unwrap_or(0) + n).into());
                    Ok(())
                }),
            )?)
    });
    let mut pipeline = Pipeline::new("repeat").then(
        DoWhile::new("three runs", |ctx: &Context| counter(ctx, "sum") < 36).step(step),
    );

    let report = pipeline.run(&ctx).unwrap();

    assert!(report.is_success(), "{:?}", report.faults);
    assert_eq!(counter(&ctx, "sum"), 36);
}

#[test]
fn test_do_while_aborts_with_failing_body() {
    let ctx = Context::default();
    let mut pipeline = Pipeline::new("stops")
        .then(
            DoWhile::new("forever", |_: &Context| true)
                .step(Task::new("fail", |_: &Context| anyhow::bail!("broken"))),
        )
        .then(Task::new("after", |_: &Context| Ok(())));

    let report = pipeline.run(&ctx).unwrap();

    assert!(report.is_aborted());
    assert_eq!(report.faults.len(), 1);
    assert!(!report.executed("after"));
}

#[test]
fn test_conditional_picks_branch_at_run_time() {
    let ctx = Context::default();
    let mut pipeline = Pipeline::new("branches")
        .then(Task::new("decide", |ctx: &Context| {
            ctx.set("mode", "full");
            Ok(())
        }))
        .then(
            Conditional::new(
                "full only",
                |ctx: &Context| ctx.get_as::<String>("mode").as_deref() == Some("full"),
                Task::new("full", |ctx: &Context| {
                    ctx.set("ran", "full");
                    Ok(())
                }),
            )
            .otherwise(Task::new("quick", |ctx: &Context| {
                ctx.set("ran", "quick");
                Ok(())
            })),
        );

    let report = pipeline.run(&ctx).unwrap();

    assert!(report.is_success());
    assert_eq!(ctx.get_as::<String>("ran").as_deref(), Some("full"));
    assert!(report.executed("full"));
    assert!(!report.executed("quick"));
}

#[test]
fn test_skipped_conditional_succeeds() {
    let ctx = Context::default();
    let mut pipeline = Pipeline::new("skip").then(Conditional::new(
        "never",
        |_: &Context| false,
        Task::new("hidden", |_: &Context| anyhow::bail!("should not run")),
    ));

    let report = pipeline.run(&ctx).unwrap();

    assert!(report.is_success());
    assert!(!report.executed("hidden"));
}

#[test]
fn test_parallel_runs_every_member() {
    let ctx = Context::default();
    let mut pipeline = Pipeline::new("fan").then(
        Parallel::new("both")
            .member(Task::new("left", |ctx: &Context| {
                bump(ctx, "done");
                Ok(())
            }))
            .member(Task::new("right", |ctx: &Context| {
                bump(ctx, "done");
                Ok(())
            }))
            .member(Task::new("broken", |_: &Context| anyhow::bail!("no luck"))),
    );

    let report = pipeline.run(&ctx).unwrap();

    assert_eq!(counter(&ctx, "done"), 2);
    assert!(report.executed("left"));
    assert!(report.executed("right"));
    assert_eq!(report.faults.len(), 1);
    assert_eq!(report.faults[0].message(), "no luck");
    assert!(!report.is_success());
}

#[test]
fn test_processes_run_inside_parallel() {
    let ctx = Context::default();
    let branch = |name: &'static str, range: std::ops::RangeInclusive<i64>| {
        ProcessStep::new(name, move |_: &Context| {
            Ok(Process::builder(name)
                .input("numbers", MemorySource::new(number_rows(range.clone())))
                .complete(
                    "store",
                    ForEach::new(move |row: &Row, ctx: &Context| {
                        let n = row.get_i64("number").unwrap_or(0);
                        ctx.update(name, |v| (v.and_then(|v| v.as_i64()).unwrap_or(0) + n).into());
                        Ok(())
                    }),
                )?)
        })
    };
    let mut pipeline = Pipeline::new("parallel processes").then(
        Parallel::new("branches")
            .member(branch("low", 1..=10))
            .member(branch("high", 11..=20)),
    );

    let report = pipeline.run(&ctx).unwrap();

    assert!(report.is_success(), "{:?}", report.faults);
    assert_eq!(counter(&ctx, "low"), 55);
    assert_eq!(counter(&ctx, "high"), 155);
}

#[test]
fn test_failed_process_fails_its_step() {
    let ctx = Context::default().with_error_policy(|_, _| true);
    let mut pipeline = Pipeline::new("bad rows")
        .then(ProcessStep::new("parse", |_: &Context| {
            Ok(Process::builder("parse")
                .input("numbers", MemorySource::new(number_rows(1..=3)))
                .then(
                    "reject two",
                    Filter::new(|row: &Row| {
                        if row.get_i64("number") == Some(2) {
                            anyhow::bail!("two is not allowed");
                        }
                        Ok(true)
                    }),
                )
                .complete_with_result()?)
        }))
        .then(Task::new("cleanup", |_: &Context| Ok(())));

    let report = pipeline.run(&ctx).unwrap();

    assert_eq!(report.status, Status::Failed);
    assert!(report.executed("cleanup"));
    assert!(report.faults[0].is_item());
}

#[test]
fn test_nested_pipeline_and_report_json() {
    let ctx = Context::default();
    let inner = Pipeline::new("inner").then(Task::new("inner task", |_: &Context| Ok(())));
    let mut outer = Pipeline::new("outer")
        .then(inner)
        .then(Task::new("outer task", |_: &Context| Ok(())));

    let report = outer.run(&ctx).unwrap();

    assert!(report.is_success());
    assert_eq!(report.steps, vec!["inner task", "inner", "outer task"]);

    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["name"], "outer");
    assert_eq!(json["status"], "success");
}

#[test]
fn test_collected_output_through_run() {
    let result = Process::builder("collect")
        .input("numbers", MemorySource::new(number_rows(1..=4)))
        .complete_with_result()
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(numbers(result.output::<Row>().unwrap()), vec![1, 2, 3, 4]);
}
