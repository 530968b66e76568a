//! End-to-end supervision tests against real child processes.

#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier_worker::{WorkerConfig, WorkerEvents, WorkerSupervisor};
use tokio::sync::mpsc;
use tokio::time::timeout;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Spawning,
    Line(String),
    Exited(Option<i32>),
    ReadyTimeout,
}

struct Recorder {
    tx: mpsc::UnboundedSender<Event>,
}

#[async_trait]
impl WorkerEvents for Recorder {
    async fn worker_spawning(&self) {
        let _ = self.tx.send(Event::Spawning);
    }

    async fn worker_line(&self, line: String) {
        let _ = self.tx.send(Event::Line(line));
    }

    async fn worker_exited(&self, code: Option<i32>) {
        let _ = self.tx.send(Event::Exited(code));
    }

    async fn worker_ready_timeout(&self) {
        let _ = self.tx.send(Event::ReadyTimeout);
    }
}

fn shell_worker(script: &str, restart_delay: Duration, ready_fallback: Duration) -> WorkerConfig {
    WorkerConfig {
        program: "/bin/sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        restart_delay,
        ready_fallback,
    }
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for supervisor event")
        .expect("event channel closed")
}

#[tokio::test]
async fn emits_lines_exit_and_respawn() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let supervisor = Arc::new(WorkerSupervisor::new(shell_worker(
        "echo '{\"type\":\"system\",\"subtype\":\"init\"}'; echo '{\"type\":\"result\"}'",
        Duration::from_millis(500),
        Duration::from_secs(30),
    )));
    supervisor.start(Arc::new(Recorder { tx }));

    assert_eq!(next_event(&mut rx).await, Event::Spawning);

    // The exit notification races the tail of the stdout stream; only the
    // relative order of the lines themselves is guaranteed.
    let mut lines = Vec::new();
    let mut exit_code = None;
    while lines.len() < 2 || exit_code.is_none() {
        match next_event(&mut rx).await {
            Event::Line(line) => lines.push(line),
            Event::Exited(code) => exit_code = Some(code),
            Event::Spawning => panic!("respawned before exit was observed"),
            Event::ReadyTimeout => {}
        }
    }
    assert_eq!(
        lines,
        vec![
            "{\"type\":\"system\",\"subtype\":\"init\"}".to_string(),
            "{\"type\":\"result\"}".to_string(),
        ]
    );
    assert_eq!(exit_code, Some(Some(0)));

    // The supervisor keeps respawning after the restart delay.
    assert_eq!(next_event(&mut rx).await, Event::Spawning);

    supervisor.shutdown().await;
}

#[tokio::test]
async fn write_line_round_trips_through_worker_stdin() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let supervisor = Arc::new(WorkerSupervisor::new(shell_worker(
        "cat",
        Duration::from_secs(60),
        Duration::from_secs(60),
    )));
    supervisor.start(Arc::new(Recorder { tx }));

    for _ in 0..200 {
        if supervisor.is_connected() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(supervisor.is_connected());

    supervisor
        .write_line("{\"type\":\"user\",\"message\":{}}")
        .await
        .expect("write to worker stdin");

    assert_eq!(next_event(&mut rx).await, Event::Spawning);
    assert_eq!(
        next_event(&mut rx).await,
        Event::Line("{\"type\":\"user\",\"message\":{}}".to_string())
    );

    supervisor.shutdown().await;
    loop {
        match next_event(&mut rx).await {
            Event::Exited(_) => break,
            other => panic!("expected exit after shutdown, got {other:?}"),
        }
    }
    assert!(!supervisor.is_connected());
}

#[tokio::test]
async fn ready_fallback_fires_when_worker_stays_silent() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let supervisor = Arc::new(WorkerSupervisor::new(shell_worker(
        "sleep 30",
        Duration::from_secs(60),
        Duration::from_millis(100),
    )));
    supervisor.start(Arc::new(Recorder { tx }));

    assert_eq!(next_event(&mut rx).await, Event::Spawning);
    assert_eq!(next_event(&mut rx).await, Event::ReadyTimeout);

    supervisor.shutdown().await;
}

#[tokio::test]
async fn write_line_fails_without_a_worker() {
    let supervisor = WorkerSupervisor::new(WorkerConfig::default());
    let err = supervisor
        .write_line("{}")
        .await
        .expect_err("write must fail with no worker attached");
    assert!(err.to_string().contains("stdin"));
}
