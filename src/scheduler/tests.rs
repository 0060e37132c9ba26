use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use crate::error::Error;
use crate::models::{JobStatus, Workflow};
use crate::queue::{Queue, TaskHandler, WORKFLOW_EXECUTE};
use crate::store::{Changes, Record, Store};
use crate::testing::{record, ScriptedOutcome, ScriptedRunner, TestApp};

fn base_workflow(name: &str) -> Value {
    json!({
        "name": name,
        "steps": [{"type": "noop", "source": "file:src"}]
    })
}

async fn read_workflow(app: &TestApp, name: &str) -> Workflow {
    let row = app.workflows().find(name).await.unwrap();
    Workflow::from_record(&row).unwrap()
}

async fn jobs_of(app: &TestApp) -> Vec<Record> {
    app.jobs().query().all().await.unwrap()
}

/// Preset counter fields without going through the workflow hooks
async fn preset(app: &TestApp, name: &str, changes: Changes) {
    Store::<Workflow>::new(app.engine.clone())
        .key(name)
        .values(changes)
        .apply()
        .await
        .unwrap();
}

#[tokio::test]
async fn test_successful_attempt_records_job() {
    let runner = Arc::new(ScriptedRunner::ok(json!({"rows": 3})));
    let app = TestApp::with_runner(runner.clone()).await;
    app.add_workflow(base_workflow("sync")).await;

    app.scheduler.attempt("sync").await.unwrap();

    let jobs = jobs_of(&app).await;
    assert_eq!(jobs.len(), 1);
    let job = &jobs[0];
    assert_eq!(job["status"], json!("Succeeded"));
    assert_eq!(job["result"]["data"], json!({"rows": 3}));
    assert!(job["started"].is_string());
    assert!(job["completed"].is_string());

    let workflow = read_workflow(&app, "sync").await;
    assert_eq!(workflow.running_jobs, 0);
    assert_eq!(workflow.recent_errors, 0);

    // the runner wrote into the job's own log file
    let log_path = job["log"].as_str().unwrap();
    assert!(log_path.contains(&format!("W_{}_J_{}", workflow.id, job["id"].as_str().unwrap())));
    let contents = std::fs::read_to_string(log_path).unwrap();
    assert!(contents.contains("running sync"));
    assert_eq!(runner.calls(), 1);
}

#[tokio::test]
async fn test_attempt_for_missing_workflow_is_silent() {
    let app = TestApp::with_runner(Arc::new(ScriptedRunner::ok(json!(null)))).await;

    app.scheduler.attempt("deleted-meanwhile").await.unwrap();
    assert!(jobs_of(&app).await.is_empty());
}

#[tokio::test]
async fn test_attempt_at_concurrency_limit_is_rejected() {
    let runner = Arc::new(ScriptedRunner::ok(json!(null)));
    let app = TestApp::with_runner(runner.clone()).await;
    let mut wf = base_workflow("sync");
    wf["concurrency"] = json!(1);
    wf["max_retries"] = json!(5);
    app.add_workflow(wf).await;
    preset(&app, "sync", Changes::new().set("running_jobs", 1)).await;

    app.scheduler.attempt("sync").await.unwrap();

    let jobs = jobs_of(&app).await;
    assert_eq!(jobs.len(), 1);
    let job = &jobs[0];
    assert_eq!(job["status"], json!("Failed"));
    assert_eq!(job["result"]["error"]["type"], json!("ConcurrencyError"));
    assert_eq!(
        job["result"]["error"]["message"],
        json!("At concurrency limit: 1")
    );
    assert_eq!(job["started"], job["completed"]);

    // counter untouched, runner never invoked, no retry scheduled
    let workflow = read_workflow(&app, "sync").await;
    assert_eq!(workflow.running_jobs, 1);
    assert_eq!(workflow.recent_errors, 0);
    assert_eq!(runner.calls(), 0);
    assert!(app.queue.list_scheduled().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failure_schedules_backoff_retry_until_budget_runs_out() {
    let runner = Arc::new(ScriptedRunner::failing("RunnerError", "boom"));
    let app = TestApp::with_runner(runner.clone()).await;
    let mut wf = base_workflow("sync");
    wf["max_retries"] = json!(2);
    app.add_workflow(wf).await;
    preset(&app, "sync", Changes::new().set("recent_errors", 1)).await;

    // second consecutive failure: retry after 2^2 seconds
    app.scheduler.attempt("sync").await.unwrap();
    let workflow = read_workflow(&app, "sync").await;
    assert_eq!(workflow.recent_errors, 2);
    assert_eq!(workflow.running_jobs, 0);

    let scheduled = app.queue.list_scheduled().await.unwrap();
    assert_eq!(scheduled.len(), 1);
    assert_eq!(scheduled[0].task, WORKFLOW_EXECUTE);
    assert_eq!(scheduled[0].delay, Duration::from_secs(4));
    assert_eq!(scheduled[0].args["workflow_id"], json!(workflow.id));

    // third consecutive failure exceeds max_retries: no new retry
    app.scheduler.attempt("sync").await.unwrap();
    let workflow = read_workflow(&app, "sync").await;
    assert_eq!(workflow.recent_errors, 3);
    assert_eq!(app.queue.list_scheduled().await.unwrap().len(), 1);

    let jobs = jobs_of(&app).await;
    assert_eq!(jobs.len(), 2);
    for job in &jobs {
        assert_eq!(job["status"], json!("Failed"));
        assert_eq!(job["result"]["error"]["type"], json!("RunnerError"));
        assert_eq!(job["result"]["error"]["message"], json!("boom"));
    }
}

#[tokio::test]
async fn test_backoff_grows_per_failure_and_resets_on_success() {
    let runner = Arc::new(ScriptedRunner::sequence(vec![
        ScriptedOutcome::Fail("RunnerError".into(), "1".into()),
        ScriptedOutcome::Fail("RunnerError".into(), "2".into()),
        ScriptedOutcome::Fail("RunnerError".into(), "3".into()),
        ScriptedOutcome::Succeed(json!(null)),
    ]));
    let app = TestApp::with_runner(runner).await;
    let mut wf = base_workflow("sync");
    wf["max_retries"] = json!(-1); // unlimited
    app.add_workflow(wf).await;

    for _ in 0..3 {
        app.scheduler.attempt("sync").await.unwrap();
    }
    let delays: Vec<u64> = app
        .queue
        .list_scheduled()
        .await
        .unwrap()
        .iter()
        .map(|t| t.delay.as_secs())
        .collect();
    assert_eq!(delays, vec![2, 4, 8]);
    assert_eq!(read_workflow(&app, "sync").await.recent_errors, 3);

    app.scheduler.attempt("sync").await.unwrap();
    assert_eq!(read_workflow(&app, "sync").await.recent_errors, 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_is_recorded_as_failure() {
    let runner = Arc::new(ScriptedRunner::sleeping(
        Duration::from_secs(600),
        json!(null),
    ));
    let app = TestApp::with_runner(runner).await;
    let mut wf = base_workflow("sync");
    wf["timeout"] = json!(2);
    app.add_workflow(wf).await;

    app.scheduler.attempt("sync").await.unwrap();

    let jobs = jobs_of(&app).await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["status"], json!("Failed"));
    assert_eq!(jobs[0]["result"]["error"]["type"], json!("TimeoutError"));
    assert_eq!(
        jobs[0]["result"]["error"]["message"],
        json!("workflow timed out after 2 seconds")
    );

    let workflow = read_workflow(&app, "sync").await;
    assert_eq!(workflow.running_jobs, 0);
    assert_eq!(workflow.recent_errors, 1);
}

#[tokio::test]
async fn test_step_resolution_failure_is_captured_into_the_job() {
    let runner = Arc::new(ScriptedRunner::ok(json!(null)));
    let app = TestApp::with_runner(runner.clone()).await;
    let wf = json!({
        "name": "sync",
        "steps": [{"type": "copy", "source": "no-such-database"}]
    });
    app.add_workflow(wf).await;

    app.scheduler.attempt("sync").await.unwrap();

    let jobs = jobs_of(&app).await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["status"], json!("Failed"));
    assert_eq!(
        jobs[0]["result"]["error"]["type"],
        json!("StepResolutionError")
    );
    assert_eq!(runner.calls(), 0);

    let workflow = read_workflow(&app, "sync").await;
    assert_eq!(workflow.running_jobs, 0);
    assert_eq!(workflow.recent_errors, 1);
    // default max_retries of 0 means no retry
    assert!(app.queue.list_scheduled().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_immediate_schedule_runs_before_create_returns() {
    let app = TestApp::with_runner(Arc::new(ScriptedRunner::ok(json!("done")))).await;
    let mut wf = base_workflow("sync");
    wf["schedule"] = json!({"immediate": true});
    app.add_workflow(wf).await;

    let jobs = jobs_of(&app).await;
    assert_eq!(jobs.len(), 1);
    let status = JobStatus::from_str(jobs[0]["status"].as_str().unwrap()).unwrap();
    assert!(status.is_terminal());
    assert_eq!(jobs[0]["result"]["data"], json!("done"));
}

#[tokio::test]
async fn test_delayed_schedule_parks_a_task_and_persists_its_handle() {
    let app = TestApp::with_runner(Arc::new(ScriptedRunner::ok(json!(null)))).await;
    let mut wf = base_workflow("sync");
    wf["schedule"] = json!({"delay": "5 minutes"});
    app.add_workflow(wf).await;

    assert!(jobs_of(&app).await.is_empty());
    let scheduled = app.queue.list_scheduled().await.unwrap();
    assert_eq!(scheduled.len(), 1);
    assert_eq!(scheduled[0].delay, Duration::from_secs(300));

    let workflow = read_workflow(&app, "sync").await;
    assert_eq!(workflow.task_id.as_deref(), Some(scheduled[0].handle.id()));
}

#[tokio::test]
async fn test_delete_revokes_the_pending_task() {
    let app = TestApp::with_runner(Arc::new(ScriptedRunner::ok(json!(null)))).await;
    let mut wf = base_workflow("sync");
    wf["schedule"] = json!({"delay": "5 minutes"});
    app.add_workflow(wf).await;
    assert_eq!(app.queue.list_scheduled().await.unwrap().len(), 1);

    app.workflows().key("sync").delete().await.unwrap();
    assert!(app.queue.list_scheduled().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_editing_the_schedule_revokes_and_reschedules() {
    let app = TestApp::with_runner(Arc::new(ScriptedRunner::ok(json!(null)))).await;
    let mut wf = base_workflow("sync");
    wf["schedule"] = json!({"delay": "5 minutes"});
    app.add_workflow(wf).await;
    let old_task = read_workflow(&app, "sync").await.task_id.unwrap();

    app.workflows()
        .key("sync")
        .values(Changes::new().set("schedule", json!({"delay": "1 hour"})))
        .set()
        .await
        .unwrap();

    let scheduled = app.queue.list_scheduled().await.unwrap();
    assert_eq!(scheduled.len(), 1);
    assert_eq!(scheduled[0].delay, Duration::from_secs(3600));
    assert_ne!(scheduled[0].handle.id(), old_task);

    let workflow = read_workflow(&app, "sync").await;
    assert_eq!(workflow.task_id.as_deref(), Some(scheduled[0].handle.id()));
}

#[tokio::test]
async fn test_concurrent_attempts_respect_the_admission_limit() {
    let (runner, gate) = ScriptedRunner::gated(json!(null));
    let app = TestApp::with_runner(runner.clone()).await;
    let mut wf = base_workflow("sync");
    wf["concurrency"] = json!(1);
    app.add_workflow(wf).await;

    let mut attempts = Vec::new();
    for _ in 0..5 {
        let scheduler = app.scheduler.clone();
        attempts.push(tokio::spawn(async move {
            scheduler.attempt("sync").await.unwrap();
        }));
    }

    // wait for one admitted attempt and four rejections
    for _ in 0..500 {
        if jobs_of(&app).await.len() == 5 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    let jobs = jobs_of(&app).await;
    assert_eq!(jobs.len(), 5);

    // a true storage read while attempts are in flight never exceeds
    // the limit
    assert_eq!(read_workflow(&app, "sync").await.running_jobs, 1);
    let rejected = jobs
        .iter()
        .filter(|j| j["result"]["error"]["type"] == json!("ConcurrencyError"))
        .count();
    assert_eq!(rejected, 4);

    gate.add_permits(1);
    for attempt in attempts {
        attempt.await.unwrap();
    }

    let jobs = jobs_of(&app).await;
    let succeeded = jobs
        .iter()
        .filter(|j| j["status"] == json!("Succeeded"))
        .count();
    assert_eq!(succeeded, 1);
    assert_eq!(read_workflow(&app, "sync").await.running_jobs, 0);
    assert_eq!(runner.calls(), 1);
}

#[tokio::test]
async fn test_unlimited_concurrency_admits_in_parallel() {
    let (runner, gate) = ScriptedRunner::gated(json!(null));
    let app = TestApp::with_runner(runner).await;
    app.add_workflow(base_workflow("sync")).await;

    let mut attempts = Vec::new();
    for _ in 0..3 {
        let scheduler = app.scheduler.clone();
        attempts.push(tokio::spawn(async move {
            scheduler.attempt("sync").await.unwrap();
        }));
    }

    for _ in 0..500 {
        if read_workflow(&app, "sync").await.running_jobs == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(read_workflow(&app, "sync").await.running_jobs, 3);

    gate.add_permits(3);
    for attempt in attempts {
        attempt.await.unwrap();
    }
    assert_eq!(read_workflow(&app, "sync").await.running_jobs, 0);
    assert_eq!(
        jobs_of(&app)
            .await
            .iter()
            .filter(|j| j["status"] == json!("Succeeded"))
            .count(),
        3
    );
}

#[tokio::test]
async fn test_task_handler_dispatch() {
    let app = TestApp::with_runner(Arc::new(ScriptedRunner::ok(json!(null)))).await;
    let row = app.add_workflow(base_workflow("sync")).await;
    let id = row["id"].as_str().unwrap();

    app.scheduler
        .run(WORKFLOW_EXECUTE, &json!({"workflow_id": id}))
        .await
        .unwrap();
    assert_eq!(jobs_of(&app).await.len(), 1);

    let err = app
        .scheduler
        .run(WORKFLOW_EXECUTE, &json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Adapter { .. }));

    let err = app
        .scheduler
        .run("no-such-task", &json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Adapter { .. }));
}

#[tokio::test]
async fn test_attempt_resolves_database_references() {
    let runner = Arc::new(ScriptedRunner::ok(json!(null)));
    let app = TestApp::with_runner(runner).await;
    app.databases()
        .add(record(json!({"name": "src-db", "url": "postgres://localhost/src"})))
        .await
        .unwrap();
    let wf = json!({
        "name": "sync",
        "steps": [{"type": "copy", "source": "src-db", "target": "file:out"}]
    });
    app.add_workflow(wf).await;

    app.scheduler.attempt("sync").await.unwrap();
    let jobs = jobs_of(&app).await;
    assert_eq!(jobs[0]["status"], json!("Succeeded"));
}
