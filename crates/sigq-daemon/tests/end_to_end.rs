//! End-to-end scenarios over a real coordination socket.
//!
//! Each test elects a primary inside the test process, forwards a request
//! through a second `bind_or_connect` (which finds the primary and takes
//! the secondary role, exactly like a second invocation would), and drives
//! the daemon until the queue drains.

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use sigq_core::credentials::ProcessKeyProtector;
use sigq_core::credentials::doubles::{ScriptedPrompt, ScriptedValidator};
use sigq_core::output::DEFAULT_OUTPUT_LIMIT;
use sigq_daemon::daemon::Daemon;
use sigq_daemon::dispatch::JobState;
use sigq_daemon::protocol::{Role, SignRequest, bind_or_connect, send_request};
use tempfile::TempDir;

fn socket_path(dir: &TempDir) -> PathBuf {
    dir.path().join("sigq.sock")
}

fn request_for(files: Vec<PathBuf>, template: &str) -> SignRequest {
    SignRequest {
        cert_id: Some("CID1".to_owned()),
        card_name: Some("CARD1".to_owned()),
        card_reader: Some("READER1".to_owned()),
        template: template.to_owned(),
        files,
    }
}

async fn primary(path: &std::path::Path, prompt: ScriptedPrompt) -> Daemon<ProcessKeyProtector> {
    let Role::Primary(listener) = bind_or_connect(path).await.unwrap() else {
        panic!("expected to be elected primary");
    };
    Daemon::new(
        listener,
        DEFAULT_OUTPUT_LIMIT,
        Box::new(prompt),
        Box::new(ScriptedValidator::accepting()),
        ProcessKeyProtector::new(),
    )
}

fn forward(path: PathBuf, request: SignRequest) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let Role::Secondary(mut stream) = bind_or_connect(&path).await.unwrap() else {
            panic!("expected to find a running primary");
        };
        send_request(&mut stream, &request).await.unwrap();
    })
}

#[tokio::test]
async fn test_forwarded_request_runs_to_success() {
    let tmp = TempDir::new().unwrap();
    let path = socket_path(&tmp);
    let target = tmp.path().join("a.bin");
    std::fs::write(&target, b"payload").unwrap();

    let prompt = ScriptedPrompt::new([Some("1234")]);
    let prompts = prompt.counter();
    let mut daemon = primary(&path, prompt).await;

    let client = forward(
        path.clone(),
        request_for(vec![target.clone()], "echo signed %1 with %2"),
    );
    daemon.run_until_settled(1).await;
    client.await.unwrap();

    let jobs: Vec<_> = daemon.jobs().collect();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].state, JobState::Succeeded);
    assert_eq!(jobs[0].identity.cert_id(), Some("CID1"));
    assert_eq!(jobs[0].identity.card_name(), Some("CARD1"));
    assert_eq!(jobs[0].identity.card_reader(), Some("READER1"));
    let expected = format!("signed {} with 1234\r\n", target.display());
    assert_eq!(jobs[0].output.as_str(), expected);
    assert_eq!(prompts.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_missing_file_fails_without_pin_fetch_or_spawn() {
    let tmp = TempDir::new().unwrap();
    let path = socket_path(&tmp);
    let missing = tmp.path().join("missing.bin");

    let prompt = ScriptedPrompt::new([Some("1234")]);
    let prompts = prompt.counter();
    let mut daemon = primary(&path, prompt).await;

    let client = forward(path.clone(), request_for(vec![missing], "echo %1 %2"));
    daemon.run_until_settled(1).await;
    client.await.unwrap();

    let jobs: Vec<_> = daemon.jobs().collect();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].state, JobState::FileNotFound);
    assert!(jobs[0].output.as_str().is_empty());
    // Never dispatched: no prompt, no cache slot.
    assert_eq!(prompts.load(Ordering::Relaxed), 0);
    assert_eq!(daemon.cached_identities(), 0);
}

#[tokio::test]
async fn test_jobs_run_in_enqueue_order_one_at_a_time() {
    let tmp = TempDir::new().unwrap();
    let path = socket_path(&tmp);
    let log = tmp.path().join("order.log");
    let targets: Vec<PathBuf> = (0..3)
        .map(|i| {
            let p = tmp.path().join(format!("f{i}.bin"));
            std::fs::write(&p, [i as u8]).unwrap();
            p
        })
        .collect();

    let prompt = ScriptedPrompt::new([Some("1234")]);
    let prompts = prompt.counter();
    let mut daemon = primary(&path, prompt).await;

    // The signer appends its arguments to a shared log; strict FIFO
    // dispatch with one job at a time yields the enqueue order.
    let template = format!("echo %1 %2 >> {}", log.display());
    let client = forward(path.clone(), request_for(targets.clone(), &template));
    daemon.run_until_settled(3).await;
    client.await.unwrap();

    let jobs: Vec<_> = daemon.jobs().collect();
    assert_eq!(jobs.len(), 3);
    assert!(jobs.iter().all(|j| j.state == JobState::Succeeded));

    let logged = std::fs::read_to_string(&log).unwrap();
    let lines: Vec<&str> = logged.lines().collect();
    let expected: Vec<String> = targets.iter().map(|t| format!("{} 1234", t.display())).collect();
    assert_eq!(lines, expected);
    // One identity, fetched once, reused for all three jobs.
    assert_eq!(prompts.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_second_request_hits_the_pin_cache() {
    let tmp = TempDir::new().unwrap();
    let path = socket_path(&tmp);
    let first = tmp.path().join("first.bin");
    let second = tmp.path().join("second.bin");
    std::fs::write(&first, b"1").unwrap();
    std::fs::write(&second, b"2").unwrap();

    let prompt = ScriptedPrompt::new([Some("1234")]);
    let prompts = prompt.counter();
    let mut daemon = primary(&path, prompt).await;

    let client = forward(path.clone(), request_for(vec![first], "true %1 %2"));
    daemon.run_until_settled(1).await;
    client.await.unwrap();
    assert_eq!(prompts.load(Ordering::Relaxed), 1);

    // A second connection with an independently constructed but equal
    // identity triple must not prompt again.
    let client = forward(path.clone(), request_for(vec![second], "true %1 %2"));
    daemon.run_until_settled(2).await;
    client.await.unwrap();

    let jobs: Vec<_> = daemon.jobs().collect();
    assert_eq!(jobs.len(), 2);
    assert!(jobs.iter().all(|j| j.state == JobState::Succeeded));
    assert_eq!(prompts.load(Ordering::Relaxed), 1);
    assert_eq!(daemon.cached_identities(), 1);
}

#[tokio::test]
async fn test_wrong_pin_fails_job_and_leaves_cache_empty() {
    let tmp = TempDir::new().unwrap();
    let path = socket_path(&tmp);
    let target = tmp.path().join("a.bin");
    std::fs::write(&target, b"payload").unwrap();

    let Role::Primary(listener) = bind_or_connect(&path).await.unwrap() else {
        panic!("expected to be elected primary");
    };
    let prompt = ScriptedPrompt::new([Some("0000")]);
    let prompts = prompt.counter();
    let mut daemon = Daemon::new(
        listener,
        DEFAULT_OUTPUT_LIMIT,
        Box::new(prompt),
        Box::new(ScriptedValidator::rejecting()),
        ProcessKeyProtector::new(),
    );

    let client = forward(path.clone(), request_for(vec![target], "true %1 %2"));
    daemon.run_until_settled(1).await;
    client.await.unwrap();

    let jobs: Vec<_> = daemon.jobs().collect();
    assert_eq!(jobs[0].state, JobState::PinWrong);
    assert_eq!(prompts.load(Ordering::Relaxed), 1);
    // The entry stayed empty, so the next job would prompt again.
    assert_eq!(daemon.cached_identities(), 1);
    assert!(daemon.jobs().all(|j| j.state.is_terminal()));
}

#[tokio::test]
async fn test_startup_failure_does_not_stall_later_jobs() {
    let tmp = TempDir::new().unwrap();
    let path = socket_path(&tmp);
    let first = tmp.path().join("first.bin");
    let second = tmp.path().join("second.bin");
    std::fs::write(&first, b"1").unwrap();
    std::fs::write(&second, b"2").unwrap();

    // The first job's prompt is cancelled; the second job gets a PIN.
    let prompt = ScriptedPrompt::new([None, Some("1234")]);
    let mut daemon = primary(&path, prompt).await;

    let client = forward(path.clone(), request_for(vec![first, second], "true %1 %2"));
    daemon.run_until_settled(2).await;
    client.await.unwrap();

    let jobs: Vec<_> = daemon.jobs().collect();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].state, JobState::PinMissing);
    assert_eq!(jobs[1].state, JobState::Succeeded);
}

#[tokio::test]
async fn test_seeded_batch_runs_without_a_client() {
    let tmp = TempDir::new().unwrap();
    let path = socket_path(&tmp);
    let target = tmp.path().join("seeded.bin");
    std::fs::write(&target, b"payload").unwrap();

    let prompt = ScriptedPrompt::new([Some("1234")]);
    let mut daemon = primary(&path, prompt).await;
    daemon
        .seed(
            sigq_core::CertIdentity::new(Some("CID1".into()), None, None),
            sigq_core::SignTemplate::new("true %1 %2"),
            vec![target],
        )
        .await;
    daemon.run_until_settled(1).await;

    let jobs: Vec<_> = daemon.jobs().collect();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].state, JobState::Succeeded);
}
