// tests/response_ordering.rs

use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt, symlink};

use execworker::channel::ResponseKind;
use execworker::engine::{JobOutcome, WorkerContext};
use execworker::errors::ErrorKind;
use execworker::exec::run_job;
use execworker::types::ChunkPolicy;
use execworker_test_utils::builders::{JobBuilder, WorkerConfigBuilder};
use execworker_test_utils::{
    RecordingChannel, init_tracing, process_alive, recording_context, unprivileged_target,
    with_timeout,
};

fn expected_lines(n: usize) -> String {
    (0..n).map(|i| format!("line-{i}\n")).collect()
}

const FIFTY_LINES: &str = "i=0; while [ $i -lt 50 ]; do echo line-$i; i=$((i+1)); done";

#[tokio::test]
async fn response_seq_is_contiguous_and_terminal_is_last() {
    init_tracing();
    let config = WorkerConfigBuilder::new().chunk_size(16).build();
    let (ctx, channel) = recording_context(config);
    let job = JobBuilder::new("many", FIFTY_LINES).shell(true).build();

    let report = with_timeout(run_job(job, &ctx)).await;

    let messages = channel.messages_for("many");
    assert!(messages.len() > 1, "expected incremental output");
    assert_eq!(report.responses_sent, messages.len() as u64);

    for (i, msg) in messages.iter().enumerate() {
        assert_eq!(msg.response_seq, i as u64 + 1);
        assert_eq!(msg.pid, report.pid);
    }

    let (last, rest) = messages.split_last().unwrap();
    assert_eq!(last.kind, ResponseKind::Exit);
    assert!(rest.iter().all(|m| m.kind == ResponseKind::Output));

    assert_eq!(channel.stdout_of("many"), expected_lines(50));
}

#[tokio::test]
async fn size_policy_cuts_at_chunk_size() {
    init_tracing();
    let config = WorkerConfigBuilder::new().chunk_size(16).build();
    let (ctx, channel) = recording_context(config);
    let job = JobBuilder::new("sized", FIFTY_LINES).shell(true).build();

    with_timeout(run_job(job, &ctx)).await;

    for msg in channel.messages_for("sized") {
        if msg.kind == ResponseKind::Output {
            assert_eq!(msg.stdout.len(), 16, "output message {msg:?}");
        } else {
            assert!(msg.stdout.len() < 16);
        }
    }
}

#[tokio::test]
async fn line_policy_sends_whole_lines() {
    init_tracing();
    let config = WorkerConfigBuilder::new()
        .chunk_policy(ChunkPolicy::Line)
        .build();
    let (ctx, channel) = recording_context(config);
    let job = JobBuilder::new("lines", "printf 'a\\nb\\n'; sleep 0.2; printf 'c'")
        .shell(true)
        .build();

    with_timeout(run_job(job, &ctx)).await;

    let messages = channel.messages_for("lines");
    let (terminal, outputs) = messages.split_last().unwrap();
    assert!(!outputs.is_empty());
    for msg in outputs {
        assert!(msg.stdout.ends_with('\n'), "partial line sent: {msg:?}");
    }
    assert_eq!(terminal.stdout, "c");
    assert_eq!(channel.stdout_of("lines"), "a\nb\nc");
}

#[tokio::test]
async fn multibyte_characters_are_never_split() {
    init_tracing();
    let config = WorkerConfigBuilder::new().chunk_size(1).build();
    let (ctx, channel) = recording_context(config);
    let text = "héllo wörld ✓ 日本";
    let job = JobBuilder::new("utf8", "printf '%s'").arg(text).build();

    with_timeout(run_job(job, &ctx)).await;

    for msg in channel.messages_for("utf8") {
        assert!(!msg.stdout.contains('\u{FFFD}'), "split character in {msg:?}");
    }
    assert_eq!(channel.stdout_of("utf8"), text);
}

#[tokio::test]
async fn every_message_echoes_the_request_header() {
    init_tracing();
    let config = WorkerConfigBuilder::new().chunk_size(8).build();
    let (ctx, channel) = recording_context(config);
    let job = JobBuilder::new("hdr", FIFTY_LINES)
        .shell(true)
        .task_id("task-1")
        .source("peer-b")
        .request_seq(7)
        .build();

    with_timeout(run_job(job, &ctx)).await;

    for msg in channel.messages_for("hdr") {
        assert_eq!(msg.task_id.as_deref(), Some("task-1"));
        assert_eq!(msg.source.as_deref(), Some("peer-b"));
        assert_eq!(msg.request_seq, 7);
    }
}

#[tokio::test]
async fn captured_output_goes_to_file_not_caller() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let out_path = dir.path().join("out.log");
    let (ctx, channel) = recording_context(WorkerConfigBuilder::new().build());
    let job = JobBuilder::new("cap", "echo to-file; echo to-caller >&2")
        .shell(true)
        .stdout_mode("capture")
        .stdout_path(out_path.to_str().unwrap())
        .build();

    let report = with_timeout(run_job(job, &ctx)).await;

    assert!(matches!(report.outcome, JobOutcome::Exited { code: Some(0), .. }));
    assert_eq!(fs::read_to_string(&out_path).unwrap(), "to-file\n");
    assert_eq!(channel.stdout_of("cap"), "");
    assert_eq!(channel.stderr_of("cap"), "to-caller\n");
}

#[tokio::test]
async fn capture_and_return_does_both_and_appends() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let err_path = dir.path().join("err.log");
    let (ctx, channel) = recording_context(WorkerConfigBuilder::new().build());

    for id in ["both-1", "both-2"] {
        let job = JobBuilder::new(id, &format!("echo {id} >&2"))
            .shell(true)
            .stderr_mode("capture_and_return")
            .stderr_path(err_path.to_str().unwrap())
            .build();
        with_timeout(run_job(job, &ctx)).await;
    }

    assert_eq!(fs::read_to_string(&err_path).unwrap(), "both-1\nboth-2\n");
    assert_eq!(channel.stderr_of("both-1"), "both-1\n");
    assert_eq!(channel.stderr_of("both-2"), "both-2\n");
}

#[tokio::test]
async fn unwritable_capture_file_rejects_before_spawn() {
    init_tracing();
    let (ctx, channel) = recording_context(WorkerConfigBuilder::new().build());
    let job = JobBuilder::new("badcap", "echo")
        .stdout_mode("capture")
        .stdout_path("/nonexistent/execworker/out.log")
        .build();

    let report = with_timeout(run_job(job, &ctx)).await;

    assert!(matches!(report.outcome, JobOutcome::Rejected(_)));
    assert_eq!(report.pid, None);
    assert_eq!(channel.messages_for("badcap").len(), 1);
}

#[tokio::test]
async fn capture_path_that_is_a_symlink_is_rejected() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("target.txt");
    fs::write(&target, "original\n").unwrap();
    let link = dir.path().join("out.log");
    symlink(&target, &link).unwrap();

    let (ctx, channel) = recording_context(WorkerConfigBuilder::new().build());
    let job = JobBuilder::new("linked", "echo")
        .arg("overwritten")
        .stdout_mode("capture")
        .stdout_path(link.to_str().unwrap())
        .build();

    let report = with_timeout(run_job(job, &ctx)).await;

    assert_eq!(report.outcome, JobOutcome::Rejected(ErrorKind::InvalidPath));
    assert_eq!(report.pid, None);
    assert_eq!(channel.messages_for("linked").len(), 1);
    assert_eq!(fs::read_to_string(&target).unwrap(), "original\n");
}

#[tokio::test]
async fn capture_dir_outside_allow_list_is_invalid_path() {
    init_tracing();
    let work = tempfile::tempdir().unwrap();
    let elsewhere = tempfile::tempdir().unwrap();
    let work_dir = fs::canonicalize(work.path()).unwrap();
    let out_path = elsewhere.path().join("out.log");

    let config = WorkerConfigBuilder::new()
        .allow_working_dir(work_dir.to_str().unwrap())
        .build();
    let (ctx, channel) = recording_context(config);
    let job = JobBuilder::new("escape", "echo")
        .working_dir(work_dir.to_str().unwrap())
        .stdout_mode("capture")
        .stdout_path(out_path.to_str().unwrap())
        .build();

    let report = with_timeout(run_job(job, &ctx)).await;

    assert_eq!(report.outcome, JobOutcome::Rejected(ErrorKind::InvalidPath));
    let messages = channel.messages_for("escape");
    assert_eq!(messages.len(), 1);
    assert!(
        messages[0]
            .message
            .as_deref()
            .unwrap()
            .contains("allowed_working_dirs")
    );
    assert!(!out_path.exists());
}

#[tokio::test]
async fn existing_file_the_target_cannot_write_is_not_opened() {
    let Some(user) = unprivileged_target() else {
        return;
    };
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o755)).unwrap();
    let secret = dir.path().join("secret.log");
    fs::write(&secret, "root only\n").unwrap();
    fs::set_permissions(&secret, fs::Permissions::from_mode(0o600)).unwrap();

    let (ctx, channel) = recording_context(WorkerConfigBuilder::new().build());
    let job = JobBuilder::new("clobber", "echo")
        .arg("appended")
        .run_as(&user)
        .working_dir("/")
        .stdout_mode("capture")
        .stdout_path(secret.to_str().unwrap())
        .build();

    let report = with_timeout(run_job(job, &ctx)).await;

    assert_eq!(
        report.outcome,
        JobOutcome::Rejected(ErrorKind::PermissionDenied)
    );
    assert_eq!(channel.messages_for("clobber").len(), 1);
    assert_eq!(fs::read_to_string(&secret).unwrap(), "root only\n");
    assert_eq!(fs::metadata(&secret).unwrap().uid(), 0);
}

#[tokio::test]
async fn new_capture_file_belongs_to_the_target_user() {
    let Some(user) = unprivileged_target() else {
        return;
    };
    init_tracing();
    let uid = nix::unistd::User::from_name(&user)
        .unwrap()
        .unwrap()
        .uid
        .as_raw();
    let dir = tempfile::tempdir().unwrap();
    fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o777)).unwrap();
    let out_path = dir.path().join("fresh.log");

    let (ctx, _channel) = recording_context(WorkerConfigBuilder::new().build());
    let job = JobBuilder::new("fresh", "echo")
        .arg("hi")
        .run_as(&user)
        .working_dir("/")
        .stdout_mode("capture")
        .stdout_path(out_path.to_str().unwrap())
        .build();

    let report = with_timeout(run_job(job, &ctx)).await;

    assert!(matches!(report.outcome, JobOutcome::Exited { code: Some(0), .. }));
    let meta = fs::metadata(&out_path).unwrap();
    assert_eq!(meta.uid(), uid);
    assert_eq!(meta.mode() & 0o777, 0o600);
    assert_eq!(fs::read_to_string(&out_path).unwrap(), "hi\n");
}

#[tokio::test]
async fn dead_channel_does_not_leave_the_child_running() {
    init_tracing();
    let channel = RecordingChannel::failing_after(0);
    let ctx = WorkerContext::new(WorkerConfigBuilder::new().build(), channel.as_channel());
    let job = JobBuilder::new("nobody-listening", "echo")
        .arg("lost")
        .build();

    let report = with_timeout(run_job(job, &ctx)).await;

    assert!(!report.delivery.terminal_delivered);
    assert_eq!(report.delivery.delivered, 0);
    assert_eq!(report.delivery.failed, 1);
    assert_eq!(channel.attempts(), 1);
    let pid = report.pid.expect("job was spawned");
    assert!(!process_alive(pid));
}

#[tokio::test]
async fn channel_failing_mid_job_still_finishes_the_job() {
    init_tracing();
    let channel = RecordingChannel::failing_after(2);
    let config = WorkerConfigBuilder::new().chunk_size(16).build();
    let ctx = WorkerContext::new(config, channel.as_channel());
    let job = JobBuilder::new("flaky", FIFTY_LINES).shell(true).build();

    let report = with_timeout(run_job(job, &ctx)).await;

    assert!(matches!(report.outcome, JobOutcome::Exited { code: Some(0), .. }));
    assert_eq!(report.delivery.delivered, 2);
    assert!(report.delivery.failed >= 1);
    assert!(!report.delivery.terminal_delivered);
    assert_eq!(channel.messages().len(), 2);
    assert_eq!(channel.attempts() as u64, report.responses_sent);
}

#[tokio::test]
async fn timed_out_job_keeps_output_captured_before_the_deadline() {
    init_tracing();
    let config = WorkerConfigBuilder::new()
        .chunk_policy(ChunkPolicy::Line)
        .build();
    let (ctx, channel) = recording_context(config);
    let job = JobBuilder::new("partial", "echo before; sleep 10; echo after")
        .shell(true)
        .timeout(1)
        .build();

    let report = with_timeout(run_job(job, &ctx)).await;

    assert_eq!(report.outcome, JobOutcome::TimedOut);
    assert_eq!(channel.stdout_of("partial"), "before\n");
    let messages = channel.messages_for("partial");
    assert_eq!(messages.last().unwrap().kind, ResponseKind::Timeout);
    assert_eq!(channel.terminals_for("partial").len(), 1);
}
