// End-to-end relay scenarios through the public API

use remote_admin_relay::relay::config::*;
use remote_admin_relay::{
    AuthorizationPolicy, CommandEvent, CommandKind, Connector, ExecutionResult, Invoker,
    MAX_REPLY_CHARS, MESSAGE_ARGUMENT, Orchestrator, Outcome, RelayError, RelayResult,
    RemoteCredential, RemoteSession, SessionExecutor,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the fake remote host does for the next connection
enum Step {
    Refuse(String),
    Exit(i32, &'static str, &'static str),
}

#[derive(Default)]
struct FakeHost {
    script: Mutex<VecDeque<Step>>,
    executed: Mutex<Vec<String>>,
    connects: AtomicUsize,
    closes: AtomicUsize,
}

impl FakeHost {
    fn scripted(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into()),
            ..Default::default()
        })
    }
}

struct FakeConnector(Arc<FakeHost>);

struct FakeSession {
    host: Arc<FakeHost>,
    result: ExecutionResult,
}

impl RemoteSession for FakeSession {
    fn run(&mut self, command: &str) -> RelayResult<ExecutionResult> {
        self.host.executed.lock().unwrap().push(command.to_string());
        Ok(self.result.clone())
    }

    fn close(&mut self) {
        self.host.closes.fetch_add(1, Ordering::SeqCst);
    }
}

impl Connector for FakeConnector {
    type Session = FakeSession;

    fn connect(&self, _credential: &RemoteCredential) -> RelayResult<FakeSession> {
        self.0.connects.fetch_add(1, Ordering::SeqCst);
        let step = self
            .0
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Step::Exit(0, "", ""));

        match step {
            Step::Refuse(reason) => Err(RelayError::connection(reason)),
            Step::Exit(code, stdout, stderr) => Ok(FakeSession {
                host: Arc::clone(&self.0),
                result: ExecutionResult::new(code, stdout, stderr),
            }),
        }
    }
}

fn settings() -> MapConfig {
    MapConfig::new()
        .with(ALLOWED_USER_ID, "U1")
        .with(SSH_HOST, "game.example.net")
        .with(SSH_USERNAME, "deploy")
        .with(SSH_PRIVATE_KEY, "-----BEGIN KEY-----\\nAAAA\\n-----END KEY-----")
        .with(RESTART_COMMAND, "systemctl restart game")
        .with(STATUS_COMMAND, "game-status")
        .with(BROADCAST_COMMAND, "game-say \"{message}\"")
        .with(ADMIN_COMMAND, "game-admin \"{message}\"")
}

fn relay_for(host: &Arc<FakeHost>) -> Arc<Orchestrator> {
    let settings = settings();
    let policy = AuthorizationPolicy::from_config(&settings);
    Arc::new(Orchestrator::new(
        Arc::new(policy),
        Arc::new(SessionExecutor::new(FakeConnector(Arc::clone(host)))),
        Arc::new(settings),
    ))
}

async fn run(orchestrator: &Arc<Orchestrator>, event: CommandEvent) -> Vec<Outcome> {
    let mut rx = orchestrator.handle(event);
    let mut outcomes = Vec::new();
    while let Some(outcome) = rx.recv().await {
        outcomes.push(outcome);
    }
    outcomes
}

fn final_text(outcomes: &[Outcome]) -> String {
    match outcomes.last() {
        Some(Outcome::Final(reply)) => reply.content.clone(),
        other => panic!("expected a final outcome, got {:?}", other),
    }
}

#[tokio::test]
async fn scenario_a_status_for_allowed_user() {
    let host = FakeHost::scripted(vec![Step::Exit(0, "online players: 3", "")]);
    let orchestrator = relay_for(&host);

    let outcomes = run(
        &orchestrator,
        CommandEvent::new(Invoker::new("U1"), CommandKind::Status),
    )
    .await;

    assert!(final_text(&outcomes).contains("online players: 3"));
    assert_eq!(*host.executed.lock().unwrap(), vec!["game-status".to_string()]);
    assert_eq!(host.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn scenario_b_denied_user_never_connects() {
    let host = FakeHost::scripted(vec![]);
    let orchestrator = relay_for(&host);

    let outcomes = run(
        &orchestrator,
        CommandEvent::new(Invoker::new("U2").with_role("R-guest"), CommandKind::RestartForce),
    )
    .await;

    assert_eq!(outcomes.len(), 1);
    assert_eq!(final_text(&outcomes), "Not authorized.");
    assert_eq!(host.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn scenario_c_restart_survives_failed_broadcasts() {
    let host = FakeHost::scripted(vec![
        Step::Exit(1, "", "broadcast failed"),
        Step::Exit(1, "", "broadcast failed"),
        Step::Exit(1, "", "broadcast failed"),
        Step::Exit(0, "", ""),
    ]);
    let orchestrator = relay_for(&host);

    let outcomes = run(
        &orchestrator,
        CommandEvent::new(Invoker::new("U1"), CommandKind::Restart),
    )
    .await;

    let executed = host.executed.lock().unwrap().clone();
    assert_eq!(executed.len(), 4);
    assert!(executed[..3].iter().all(|c| c.starts_with("game-say")));
    assert_eq!(executed[3], "systemctl restart game");

    let progress = outcomes
        .iter()
        .filter(|o| matches!(o, Outcome::Progress { .. }))
        .count();
    assert_eq!(progress, 3);
    assert!(final_text(&outcomes).contains("successfully"));
    assert_eq!(host.closes.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn scenario_d_connection_error_during_admin_message() {
    let reason = format!("connection refused: {}", "x".repeat(4000));
    let host = FakeHost::scripted(vec![
        Step::Refuse(reason),
        Step::Exit(0, "online players: 0", ""),
    ]);
    let orchestrator = relay_for(&host);

    let event = CommandEvent::new(Invoker::new("U1"), CommandKind::AdminMessage)
        .with_argument(MESSAGE_ARGUMENT, "server maintenance tonight");
    let outcomes = run(&orchestrator, event).await;

    let text = final_text(&outcomes);
    assert!(text.contains("connection refused"));
    assert!(text.chars().count() <= MAX_REPLY_CHARS);
    assert!(host.executed.lock().unwrap().is_empty());
    assert_eq!(host.closes.load(Ordering::SeqCst), 0);

    // A later invocation opens its own session and is unaffected.
    let outcomes = run(
        &orchestrator,
        CommandEvent::new(Invoker::new("U1"), CommandKind::Status),
    )
    .await;
    assert_eq!(final_text(&outcomes), "online players: 0");
    assert_eq!(host.connects.load(Ordering::SeqCst), 2);
    assert_eq!(host.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_events_do_not_block_each_other() {
    let host = FakeHost::scripted(vec![]);
    let orchestrator = relay_for(&host);
    let started = tokio::time::Instant::now();

    let mut restart =
        orchestrator.handle(CommandEvent::new(Invoker::new("U1"), CommandKind::Restart));
    let status = run(
        &orchestrator,
        CommandEvent::new(Invoker::new("U1").with_administrator(true), CommandKind::Status),
    )
    .await;

    // Status reports while the restart is still inside its first warning delay.
    assert!(matches!(status.last(), Some(Outcome::Final(_))));
    assert!(started.elapsed() < Duration::from_secs(90));
    while let Ok(outcome) = restart.try_recv() {
        assert!(!outcome.is_final(), "restart finished before status reported");
    }

    let mut last = None;
    while let Some(outcome) = restart.recv().await {
        last = Some(outcome);
    }
    assert!(matches!(last, Some(Outcome::Final(_))));
    assert!(started.elapsed() >= Duration::from_secs(120));
}
