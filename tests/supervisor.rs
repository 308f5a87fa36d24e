#![cfg(unix)]

use std::path::Path;
use std::time::{Duration, Instant};

use nist_scrap::config::SupervisorConfig;
use nist_scrap::supervisor::{ChildCommand, Supervisor, Verdict};

fn shell(script: &str) -> ChildCommand {
    ChildCommand {
        program: "sh".into(),
        args: vec!["-c".into(), script.into()],
    }
}

fn config_in(dir: &Path) -> SupervisorConfig {
    SupervisorConfig {
        log_file: dir.join("scraping_output.log"),
        restart_delay_secs: 0,
        max_restarts: 5,
        max_failures: 100,
        window_minutes: 25,
        ..Default::default()
    }
}

async fn supervise(script: &str, config: SupervisorConfig) -> Verdict {
    let mut supervisor = Supervisor::new(shell(script), config)
        .await
        .unwrap()
        .with_restart_delay(Duration::ZERO);
    supervisor.run().await.unwrap()
}

#[tokio::test]
async fn clean_run_succeeds_first_time() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let log_file = config.log_file.clone();

    let verdict = supervise("echo 'Saved jdx/C64175-IR.jdx'; exit 0", config).await;
    assert_eq!(verdict, Verdict::Succeeded);
    assert_eq!(verdict.exit_code(), 0);

    let log = std::fs::read_to_string(log_file).unwrap();
    assert!(log.contains("Saved jdx/C64175-IR.jdx"));
    assert!(log.contains("Scraper completed successfully, exiting"));
    assert!(!log.contains("restarting"));
}

#[tokio::test]
async fn failure_signature_overrides_zero_exit() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.max_restarts = 1;
    let log_file = config.log_file.clone();

    let verdict = supervise("echo 'Connection reset by peer'; exit 0", config).await;
    assert_eq!(verdict, Verdict::RestartsExhausted);

    let log = std::fs::read_to_string(log_file).unwrap();
    assert!(log.contains("matched failure pattern \"Connection reset by peer\""));
}

#[tokio::test]
async fn stderr_is_captured_and_classified() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.max_restarts = 1;
    let log_file = config.log_file.clone();

    let verdict = supervise("echo 'operation timed out' >&2", config).await;
    assert_eq!(verdict, Verdict::RestartsExhausted);

    let log = std::fs::read_to_string(log_file).unwrap();
    assert!(log.contains("operation timed out"));
}

#[tokio::test]
async fn restart_budget_runs_out_without_tripping_breaker() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let log_file = config.log_file.clone();

    let verdict = supervise("echo attempt; exit 3", config).await;
    assert_eq!(verdict, Verdict::RestartsExhausted);
    assert_eq!(verdict.exit_code(), 1);

    let log = std::fs::read_to_string(log_file).unwrap();
    assert_eq!(log.lines().filter(|l| *l == "attempt").count(), 5);
    assert!(log.contains("Scraper failed with return code 3"));
    assert!(log.contains("attempt 4/5"));
    assert!(log.contains("Maximum restart attempts (5) reached, giving up"));
}

#[tokio::test]
async fn clustered_failures_open_the_circuit() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.max_failures = 2;
    let log_file = config.log_file.clone();

    let verdict = supervise("exit 1", config).await;
    assert_eq!(verdict, Verdict::CircuitOpen);

    let log = std::fs::read_to_string(log_file).unwrap();
    assert!(log.contains("Failure threshold exceeded: 2 failures in the last 25 minutes"));
}

#[tokio::test]
async fn restarted_run_can_succeed() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("second_run");
    let config = config_in(dir.path());

    // Fails the first time, succeeds once the marker exists.
    let script = format!(
        "if [ -f '{m}' ]; then echo done; else touch '{m}'; exit 1; fi",
        m = marker.display()
    );
    let verdict = supervise(&script, config).await;
    assert_eq!(verdict, Verdict::Succeeded);
}

#[tokio::test]
async fn missing_program_counts_as_failed_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.max_restarts = 2;
    let log_file = config.log_file.clone();

    let child = ChildCommand {
        program: dir.path().join("no-such-scraper"),
        args: Vec::new(),
    };
    let mut supervisor = Supervisor::new(child, config).await.unwrap();
    let verdict = supervisor.run().await.unwrap();
    assert_eq!(verdict, Verdict::RestartsExhausted);

    let log = std::fs::read_to_string(log_file).unwrap();
    assert!(log.contains("Error running scraper: Couldn't spawn the scraper process"));
}

#[tokio::test]
async fn invalid_utf8_output_is_kept_and_does_not_stop_supervision() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let log_file = config.log_file.clone();

    let verdict = supervise(r"printf 'before\n\377\376 bad\nafter\n'; exit 0", config).await;
    assert_eq!(verdict, Verdict::Succeeded);

    let log = std::fs::read_to_string(log_file).unwrap();
    assert!(log.contains("before"));
    assert!(log.contains("\u{fffd}\u{fffd} bad"));
    assert!(log.contains("after"));
}

#[tokio::test]
async fn waits_between_attempts_but_not_after_the_last() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.restart_delay_secs = 1;
    config.max_restarts = 2;
    let log_file = config.log_file.clone();

    let mut supervisor = Supervisor::new(shell("exit 1"), config).await.unwrap();
    let started = Instant::now();
    let verdict = supervisor.run().await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(verdict, Verdict::RestartsExhausted);
    assert!(elapsed >= Duration::from_secs(1), "took {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "took {elapsed:?}");

    let log = std::fs::read_to_string(log_file).unwrap();
    assert!(log.contains("restarting in 1 seconds (attempt 1/2)"));
    assert!(!log.contains("attempt 2/2"));
}
