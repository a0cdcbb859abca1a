//! Grid Engine launcher integration tests.

use std::sync::Arc;

use sortie::{
    CommandOutput, ErrorCategory, LaunchSettings, LauncherConfig, RetryConfig, RunSettings,
    SgeBatchSettings, SgeLauncher, Sge, Status,
};
use sortie_testkit::fixtures::{FakeJob, sge_query};
use sortie_testkit::{FakeCommandRunner, RecordingClock};

fn launcher(runner: &FakeCommandRunner, clock: &RecordingClock) -> SgeLauncher {
    SgeLauncher::builder(Sge::new())
        .with_config(
            LauncherConfig::default()
                .with_id_resolution(RetryConfig::default().with_attempts(3).with_interval(500)),
        )
        .with_runner(Arc::new(runner.clone()))
        .with_clock(Arc::new(clock.clone()))
        .build()
}

#[tokio::test]
async fn submit_poll_and_stop() {
    let runner = FakeCommandRunner::new();
    let clock = RecordingClock::new();
    let launcher = launcher(&runner, &clock);
    let dir = tempfile::tempdir().unwrap();

    let settings = SgeBatchSettings::default()
        .with_batch_cmd("sh")
        .with_ncpus("mpi", 4)
        .with_preamble([r#"echo 'Your job 42 ("job_0") has been submitted'"#]);
    let step = launcher
        .create_step("job_0", dir.path(), LaunchSettings::SgeQsubBatch(settings))
        .unwrap();
    let id = launcher.run(&step).await.unwrap();
    assert_eq!(id.step_id(), Some("42"));

    let script = std::fs::read_to_string(dir.path().join("job_0.sh")).unwrap();
    assert!(script.contains("#$ -pe mpi 4\n"));
    assert!(script.contains("#$ -N job_0\n"));

    runner.push_output(
        "qstat",
        sge_query(&[FakeJob::new("42", "job_0", "r"), FakeJob::new("43", "other", "qw")]),
    );
    let updates = launcher.get_step_update(&["job_0"]).await;
    assert_eq!(updates[0].1.status, Status::Running);
    assert_eq!(updates[0].1.raw_status.as_deref(), Some("r"));
    assert_eq!(runner.calls()[0].args, vec!["-r"]);

    runner
        .push_output("qdel", CommandOutput::ok("alice has registered the job 42 for deletion\n"))
        .push_output("qstat", sge_query(&[FakeJob::new("42", "job_0", "dr")]));
    let info = launcher.stop("job_0").await.unwrap();
    assert_eq!(info.status, Status::Cancelled);
    runner.assert_call_count_eq("qdel", 1);
    clock.assert_sleep_count_eq(0);
    launcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn resolves_id_by_full_job_name() {
    let runner = FakeCommandRunner::new();
    let clock = RecordingClock::new();
    let launcher = launcher(&runner, &clock);
    let dir = tempfile::tempdir().unwrap();

    runner.push_output(
        "qstat",
        sge_query(&[FakeJob::new("91", "a_rather_long_ensemble_name", "qw")]),
    );
    let settings = SgeBatchSettings::default().with_batch_cmd("true");
    let step = launcher
        .create_step(
            "a_rather_long_ensemble_name",
            dir.path(),
            LaunchSettings::SgeQsubBatch(settings),
        )
        .unwrap();
    let id = launcher.run(&step).await.unwrap();
    assert_eq!(id.step_id(), Some("91"));
    clock.assert_sleep_count_eq(1);
    launcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn aprun_is_not_a_grid_engine_launcher() {
    let runner = FakeCommandRunner::new();
    let clock = RecordingClock::new();
    let launcher = launcher(&runner, &clock);
    let err = launcher
        .create_step("x", "/tmp", LaunchSettings::Aprun(RunSettings::new("a.out")))
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);
}
