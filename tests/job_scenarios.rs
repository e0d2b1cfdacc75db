// tests/job_scenarios.rs

use std::time::{Duration, Instant};

use execworker::channel::ResponseKind;
use execworker::engine::JobOutcome;
use execworker::errors::ErrorKind;
use execworker::exec::run_job;
use execworker_test_utils::builders::{JobBuilder, WorkerConfigBuilder};
use execworker_test_utils::{
    current_user_name, init_tracing, process_alive, recording_context, with_timeout,
};

#[tokio::test]
async fn echo_returns_output_and_exit_zero() {
    init_tracing();
    let (ctx, channel) = recording_context(WorkerConfigBuilder::new().build());
    let job = JobBuilder::new("echo-1", "echo").arg("hello").build();

    let report = with_timeout(run_job(job, &ctx)).await;

    assert_eq!(
        report.outcome,
        JobOutcome::Exited {
            code: Some(0),
            signal: None
        }
    );
    assert!(report.pid.is_some());
    assert!(report.delivery.terminal_delivered);
    assert_eq!(channel.stdout_of("echo-1"), "hello\n");

    let terminals = channel.terminals_for("echo-1");
    assert_eq!(terminals.len(), 1);
    assert_eq!(terminals[0].kind, ResponseKind::Exit);
    assert!(terminals[0].is_success());
    assert_eq!(terminals[0].pid, report.pid);
}

#[tokio::test]
async fn non_zero_exit_code_is_reported() {
    init_tracing();
    let (ctx, channel) = recording_context(WorkerConfigBuilder::new().build());
    let job = JobBuilder::new("exit-3", "exit 3").shell(true).build();

    let report = with_timeout(run_job(job, &ctx)).await;

    assert_eq!(
        report.outcome,
        JobOutcome::Exited {
            code: Some(3),
            signal: None
        }
    );
    let terminal = &channel.terminals_for("exit-3")[0];
    assert_eq!(terminal.kind, ResponseKind::Exit);
    assert_eq!(terminal.exit_code, Some(3));
    assert!(!terminal.is_success());
}

#[tokio::test]
async fn death_by_signal_is_reported_as_exit_with_signal() {
    init_tracing();
    let (ctx, channel) = recording_context(WorkerConfigBuilder::new().build());
    let job = JobBuilder::new("self-kill", "kill -TERM $$").shell(true).build();

    let report = with_timeout(run_job(job, &ctx)).await;

    assert_eq!(
        report.outcome,
        JobOutcome::Exited {
            code: None,
            signal: Some(15)
        }
    );
    let terminal = &channel.terminals_for("self-kill")[0];
    assert_eq!(terminal.kind, ResponseKind::Exit);
    assert_eq!(terminal.signal, Some(15));
}

#[tokio::test]
async fn stderr_is_returned_separately() {
    init_tracing();
    let (ctx, channel) = recording_context(WorkerConfigBuilder::new().build());
    let job = JobBuilder::new("err", "echo out; echo oops >&2")
        .shell(true)
        .build();

    with_timeout(run_job(job, &ctx)).await;

    assert_eq!(channel.stdout_of("err"), "out\n");
    assert_eq!(channel.stderr_of("err"), "oops\n");
}

#[tokio::test]
async fn sleep_past_deadline_times_out_and_is_killed() {
    init_tracing();
    let (ctx, channel) = recording_context(WorkerConfigBuilder::new().build());
    let job = JobBuilder::new("sleepy", "sleep").arg("10").timeout(1).build();

    let started = Instant::now();
    let report = with_timeout(run_job(job, &ctx)).await;
    let elapsed = started.elapsed();

    assert_eq!(report.outcome, JobOutcome::TimedOut);
    assert!(elapsed >= Duration::from_millis(900), "took {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "took {elapsed:?}");

    let terminals = channel.terminals_for("sleepy");
    assert_eq!(terminals.len(), 1);
    assert_eq!(terminals[0].kind, ResponseKind::Timeout);
    assert_eq!(terminals[0].error, Some(ErrorKind::Timeout));

    let pid = report.pid.expect("timed-out job had a process");
    assert!(!process_alive(pid), "pid {pid} survived the deadline");
}

#[tokio::test]
async fn timeout_kills_the_whole_process_group() {
    init_tracing();
    let (ctx, channel) = recording_context(WorkerConfigBuilder::new().build());
    let job = JobBuilder::new("tree", "sleep 30 & echo $!; wait")
        .shell(true)
        .timeout(1)
        .build();

    let report = with_timeout(run_job(job, &ctx)).await;
    assert_eq!(report.outcome, JobOutcome::TimedOut);

    let grandchild: u32 = channel
        .stdout_of("tree")
        .trim()
        .parse()
        .expect("background pid printed");

    // SIGKILL delivery is asynchronous; give the kernel a moment.
    let deadline = Instant::now() + Duration::from_secs(2);
    while process_alive(grandchild) && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!process_alive(grandchild), "grandchild {grandchild} survived");
}

#[tokio::test]
async fn kill_grace_sends_sigterm_first() {
    init_tracing();
    let config = WorkerConfigBuilder::new().kill_grace_ms(500).build();
    let (ctx, channel) = recording_context(config);
    let job = JobBuilder::new("graceful", "sleep").arg("10").timeout(1).build();

    let started = Instant::now();
    let report = with_timeout(run_job(job, &ctx)).await;

    assert_eq!(report.outcome, JobOutcome::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(channel.terminals_for("graceful").len(), 1);
}

#[tokio::test]
async fn concurrent_jobs_are_independent() {
    init_tracing();
    let (ctx, channel) = recording_context(WorkerConfigBuilder::new().build());
    let slow = JobBuilder::new("slow", "sleep 0.3; echo slow")
        .shell(true)
        .build();
    let fast = JobBuilder::new("fast", "echo").arg("fast").build();

    let (slow_report, fast_report) =
        with_timeout(async { tokio::join!(run_job(slow, &ctx), run_job(fast, &ctx)) }).await;

    assert_ne!(slow_report.pid, fast_report.pid);
    assert_eq!(channel.stdout_of("slow"), "slow\n");
    assert_eq!(channel.stdout_of("fast"), "fast\n");
    assert_eq!(channel.terminals_for("slow").len(), 1);
    assert_eq!(channel.terminals_for("fast").len(), 1);
    for msg in channel.messages_for("fast") {
        assert_eq!(msg.pid, fast_report.pid);
    }
}

#[tokio::test]
async fn arguments_are_never_interpreted_by_a_shell() {
    init_tracing();
    let (ctx, channel) = recording_context(WorkerConfigBuilder::new().build());
    let job = JobBuilder::new("argv", "printf '%s|'")
        .arg("a b")
        .arg("$(echo injected)")
        .arg("; echo nope")
        .build();

    with_timeout(run_job(job, &ctx)).await;

    assert_eq!(channel.stdout_of("argv"), "a b|$(echo injected)|; echo nope|");
}

#[tokio::test]
async fn shell_mode_passes_args_as_positional_parameters() {
    init_tracing();
    let (ctx, channel) = recording_context(WorkerConfigBuilder::new().build());
    let job = JobBuilder::new("positional", r#"printf '%s|' "$1" "$2""#)
        .shell(true)
        .arg("first arg")
        .arg("`echo injected`")
        .build();

    with_timeout(run_job(job, &ctx)).await;

    assert_eq!(channel.stdout_of("positional"), "first arg|`echo injected`|");
}

#[tokio::test]
async fn child_environment_is_built_not_inherited() {
    init_tracing();
    let config = WorkerConfigBuilder::new().build();
    let expected_path = config.worker.default_path.clone();
    let (ctx, channel) = recording_context(config);
    let job = JobBuilder::new(
        "env",
        r#"sh -c 'echo "$GREETING"; echo "$PATH"; echo "$USER"'"#,
    )
    .env("GREETING", "hi there")
    .build();

    with_timeout(run_job(job, &ctx)).await;

    let stdout = channel.stdout_of("env");
    let user = current_user_name();
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines, vec!["hi there", expected_path.as_str(), user.as_str()]);
}

#[tokio::test]
async fn missing_program_is_a_spawn_failure() {
    init_tracing();
    let (ctx, channel) = recording_context(WorkerConfigBuilder::new().build());
    let job = JobBuilder::new("ghost", "/nonexistent/bin/program").build();

    let report = with_timeout(run_job(job, &ctx)).await;

    assert_eq!(report.outcome, JobOutcome::Rejected(ErrorKind::SpawnFailure));
    assert_eq!(report.pid, None);
    let messages = channel.messages_for("ghost");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].kind, ResponseKind::Error);
    assert_eq!(messages[0].error, Some(ErrorKind::SpawnFailure));
}

#[tokio::test]
async fn discarded_streams_are_not_returned() {
    init_tracing();
    let (ctx, channel) = recording_context(WorkerConfigBuilder::new().build());
    let job = JobBuilder::new("quiet", "echo loud; echo louder >&2")
        .shell(true)
        .stdout_mode("discard")
        .stderr_mode("no")
        .build();

    let report = with_timeout(run_job(job, &ctx)).await;

    assert_eq!(
        report.outcome,
        JobOutcome::Exited {
            code: Some(0),
            signal: None
        }
    );
    assert_eq!(channel.stdout_of("quiet"), "");
    assert_eq!(channel.stderr_of("quiet"), "");
    assert_eq!(channel.messages_for("quiet").len(), 1);
}
