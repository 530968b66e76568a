//! Worker process supervision.
//!
//! One worker process is alive at a time. Every spawn increments a
//! monotonic generation counter; the stdout/stderr read loops and the
//! readiness-fallback timer capture the generation they were started
//! under and re-check it on every iteration, so a slow stream belonging
//! to a killed worker can never deliver events into a newer one's turn.
//! On exit the supervisor resets its handles, notifies the consumer, and
//! respawns after a fixed delay — indefinitely, unless shut down.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, oneshot};

use crate::framing::LineFramer;

/// Environment variables removed from the child before inheritance.
const CREDENTIAL_ENV: &[&str] = &["TELEGRAM_BOT_TOKEN"];

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Worker executable; resolved via PATH and common bin dirs.
    pub program: String,
    pub args: Vec<String>,
    /// Delay between an observed exit and the next spawn.
    pub restart_delay: Duration,
    /// How long to wait for the worker's init signal before assuming
    /// readiness anyway.
    pub ready_fallback: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            args: [
                "--print",
                "--input-format",
                "stream-json",
                "--output-format",
                "stream-json",
                "--verbose",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
            restart_delay: Duration::from_secs(5),
            ready_fallback: Duration::from_secs(30),
        }
    }
}

/// Consumer of supervision events, one call per event, in stream order.
#[async_trait]
pub trait WorkerEvents: Send + Sync {
    /// A spawn attempt is about to happen.
    async fn worker_spawning(&self);
    /// One framed line from the current worker's stdout.
    async fn worker_line(&self, line: String);
    /// The current worker exited (or failed to spawn, code `None`).
    async fn worker_exited(&self, code: Option<i32>);
    /// The worker has been up for the fallback interval without exiting;
    /// the consumer should stop waiting for an init signal.
    async fn worker_ready_timeout(&self);
}

/// Cheaply cloneable handle; all clones share the same worker.
#[derive(Clone)]
pub struct WorkerSupervisor {
    config: Arc<WorkerConfig>,
    generation: Arc<AtomicU64>,
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    connected: Arc<AtomicBool>,
    shutting_down: Arc<AtomicBool>,
    kill_tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl WorkerSupervisor {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config: Arc::new(config),
            generation: Arc::new(AtomicU64::new(0)),
            stdin: Arc::new(Mutex::new(None)),
            connected: Arc::new(AtomicBool::new(false)),
            shutting_down: Arc::new(AtomicBool::new(false)),
            kill_tx: Arc::new(Mutex::new(None)),
        }
    }

    /// True while a worker process is alive and its stdin is held.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Writes one framed record to the worker's stdin.
    pub async fn write_line(&self, line: &str) -> Result<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().context("worker stdin not available")?;
        stdin
            .write_all(line.as_bytes())
            .await
            .context("worker write failed")?;
        stdin.write_all(b"\n").await.context("worker write failed")?;
        stdin.flush().await.context("worker flush failed")?;
        Ok(())
    }

    /// Starts the supervision loop; returns immediately.
    pub fn start(&self, events: Arc<dyn WorkerEvents>) {
        let supervisor = self.clone();
        tokio::spawn(async move {
            supervisor.run(events).await;
        });
    }

    /// Stops respawning and kills the current worker, if any.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        if let Some(tx) = self.kill_tx.lock().await.take() {
            let _ = tx.send(());
        }
    }

    async fn run(self, events: Arc<dyn WorkerEvents>) {
        loop {
            if self.shutting_down.load(Ordering::SeqCst) {
                break;
            }

            events.worker_spawning().await;
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

            let spawned = match self.spawn_child() {
                Ok(spawned) => spawned,
                Err(err) => {
                    tracing::error!(error = %err, "failed to spawn worker");
                    events.worker_exited(None).await;
                    if self.shutting_down.load(Ordering::SeqCst) {
                        break;
                    }
                    tokio::time::sleep(self.config.restart_delay).await;
                    continue;
                }
            };
            let (mut child, stdin, stdout, stderr) = spawned;

            *self.stdin.lock().await = Some(stdin);
            self.connected.store(true, Ordering::SeqCst);
            tracing::info!(generation, "worker spawned");

            self.spawn_stdout_loop(generation, stdout, Arc::clone(&events));
            self.spawn_stderr_loop(generation, stderr);
            self.spawn_ready_fallback(generation, Arc::clone(&events));

            let (kill_tx, kill_rx) = oneshot::channel();
            *self.kill_tx.lock().await = Some(kill_tx);

            let code = tokio::select! {
                status = child.wait() => status.ok().and_then(|status| status.code()),
                _ = kill_rx => {
                    let _ = child.start_kill();
                    child.wait().await.ok().and_then(|status| status.code())
                }
            };

            if self.generation.load(Ordering::SeqCst) == generation {
                self.connected.store(false, Ordering::SeqCst);
                *self.stdin.lock().await = None;
                tracing::error!(generation, ?code, "worker exited");
                events.worker_exited(code).await;
            }

            if self.shutting_down.load(Ordering::SeqCst) {
                break;
            }
            tracing::info!(
                delay_ms = self.config.restart_delay.as_millis() as u64,
                "scheduling worker restart"
            );
            tokio::time::sleep(self.config.restart_delay).await;
        }
    }

    fn spawn_child(&self) -> Result<(Child, ChildStdin, ChildStdout, ChildStderr)> {
        let program = resolve_worker_program(&self.config.program);
        let mut cmd = Command::new(&program);
        cmd.args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for key in CREDENTIAL_ENV {
            cmd.env_remove(key);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn {}", program.display()))?;
        let stdin = child.stdin.take().context("worker stdin missing")?;
        let stdout = child.stdout.take().context("worker stdout missing")?;
        let stderr = child.stderr.take().context("worker stderr missing")?;
        Ok((child, stdin, stdout, stderr))
    }

    fn spawn_stdout_loop(
        &self,
        generation: u64,
        mut stdout: ChildStdout,
        events: Arc<dyn WorkerEvents>,
    ) {
        let supervisor = self.clone();
        tokio::spawn(async move {
            let mut framer = LineFramer::new();
            let mut buf = [0u8; 8192];
            loop {
                if supervisor.generation.load(Ordering::SeqCst) != generation {
                    return;
                }
                match stdout.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => {
                        framer.push(&buf[..n]);
                        while let Some(line) = framer.next_line() {
                            if supervisor.generation.load(Ordering::SeqCst) != generation {
                                return;
                            }
                            events.worker_line(line).await;
                        }
                    }
                }
            }
        });
    }

    fn spawn_stderr_loop(&self, generation: u64, stderr: ChildStderr) {
        let supervisor = self.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if supervisor.generation.load(Ordering::SeqCst) != generation {
                    return;
                }
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    tracing::warn!(generation, line = %trimmed, "worker stderr");
                }
            }
        });
    }

    fn spawn_ready_fallback(&self, generation: u64, events: Arc<dyn WorkerEvents>) {
        let supervisor = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(supervisor.config.ready_fallback).await;
            let current = supervisor.generation.load(Ordering::SeqCst) == generation;
            if current && supervisor.connected.load(Ordering::SeqCst) {
                tracing::warn!(
                    generation,
                    "no init signal within fallback window; assuming worker ready"
                );
                events.worker_ready_timeout().await;
            }
        });
    }
}

/// Resolves the worker executable: explicit paths as-is, otherwise PATH,
/// otherwise a handful of common install locations.
fn resolve_worker_program(program: &str) -> PathBuf {
    if program.contains(std::path::MAIN_SEPARATOR) {
        return PathBuf::from(program);
    }
    if let Ok(found) = which::which(program) {
        return found;
    }
    if let Some(found) = find_in_common_bins(program) {
        return found;
    }
    PathBuf::from(program)
}

fn find_in_common_bins(binary: &str) -> Option<PathBuf> {
    let mut dirs: Vec<PathBuf> = Vec::new();
    if let Some(home) = dirs::home_dir() {
        dirs.push(home.join(".local/bin"));
        dirs.push(home.join(".npm-global/bin"));
        dirs.push(home.join(".bun/bin"));
        dirs.push(home.join(".cargo/bin"));
        dirs.push(home.join("node_modules/.bin"));
    }
    for path in ["/opt/homebrew/bin", "/usr/local/bin", "/usr/bin", "/bin"] {
        dirs.push(PathBuf::from(path));
    }
    dirs.into_iter()
        .map(|dir| dir.join(binary))
        .find(|candidate| candidate.is_file())
}
