//! The turn coordinator.
//!
//! Owns all bridge state behind a single mutex: readiness, the
//! single-flight `processing` flag, the FIFO backlog, the bootstrap
//! flag, and the active conversation target. Lock scopes never contain
//! an await, and every dispatch decision mutates the flags inside the
//! same scope that made it, so a second caller can never slip a request
//! in while the first one's write is still in flight.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use courier_worker::protocol::{AssistantMessage, UserEnvelope, WorkerEvent};
use courier_worker::supervisor::{WorkerEvents, WorkerSupervisor};

use crate::channel::{ChannelApi, ChatId, DeliveryMode, best_effort};
use crate::format::{DEFAULT_MAX_CHUNK_LEN, chunk_message, markdown_to_html, strip_html_tags};
use crate::status::StatusTracker;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Connecting,
    Ready,
    Error,
}

impl Readiness {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct QueuedMessage {
    chat_id: ChatId,
    text: String,
}

struct BridgeState {
    readiness: Readiness,
    processing: bool,
    initial_ready_seen: bool,
    active_chat: Option<ChatId>,
    queue: VecDeque<QueuedMessage>,
    messages_completed: u64,
}

impl Default for BridgeState {
    fn default() -> Self {
        Self {
            readiness: Readiness::Connecting,
            processing: false,
            initial_ready_seen: false,
            active_chat: None,
            queue: VecDeque::new(),
            messages_completed: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub max_chunk_len: usize,
    /// Whether the active chat gets a notice when the worker dies.
    pub notify_crash: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_chunk_len: DEFAULT_MAX_CHUNK_LEN,
            notify_crash: true,
        }
    }
}

/// What happened to an inbound user message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundDisposition {
    Dispatched,
    /// Queued because the worker is not ready yet.
    QueuedNotReady,
    /// Queued behind the in-flight turn.
    QueuedBusy,
}

/// Point-in-time view for the health endpoint and the /status command.
#[derive(Debug, Clone)]
pub struct BridgeSnapshot {
    pub readiness: Readiness,
    pub processing: bool,
    pub queued: usize,
    pub messages_completed: u64,
    pub worker_connected: bool,
}

/// Write half of the worker connection, as the coordinator sees it.
#[async_trait]
pub trait WorkerLink: Send + Sync {
    fn is_connected(&self) -> bool;
    async fn send_line(&self, line: &str) -> anyhow::Result<()>;
}

#[async_trait]
impl WorkerLink for WorkerSupervisor {
    fn is_connected(&self) -> bool {
        WorkerSupervisor::is_connected(self)
    }

    async fn send_line(&self, line: &str) -> anyhow::Result<()> {
        self.write_line(line).await
    }
}

pub struct Bridge {
    api: Arc<dyn ChannelApi>,
    worker: Arc<dyn WorkerLink>,
    status: Arc<StatusTracker>,
    config: BridgeConfig,
    state: Mutex<BridgeState>,
}

impl Bridge {
    pub fn new(
        api: Arc<dyn ChannelApi>,
        worker: Arc<dyn WorkerLink>,
        status: Arc<StatusTracker>,
        config: BridgeConfig,
    ) -> Self {
        Self {
            api,
            worker,
            status,
            config,
            state: Mutex::new(BridgeState::default()),
        }
    }

    /// Routes one inbound user message: dispatch when idle and ready,
    /// queue otherwise. The caller reports the disposition back to the
    /// user as feedback.
    pub async fn handle_user_message(&self, chat_id: ChatId, text: String) -> InboundDisposition {
        let disposition = {
            let mut state = self.state.lock().await;
            state.active_chat = Some(chat_id);
            if state.readiness != Readiness::Ready || !self.worker.is_connected() {
                state.queue.push_back(QueuedMessage {
                    chat_id,
                    text: text.clone(),
                });
                InboundDisposition::QueuedNotReady
            } else if state.processing {
                state.queue.push_back(QueuedMessage {
                    chat_id,
                    text: text.clone(),
                });
                InboundDisposition::QueuedBusy
            } else {
                state.processing = true;
                InboundDisposition::Dispatched
            }
        };
        if disposition == InboundDisposition::Dispatched {
            self.dispatch(&text).await;
        }
        disposition
    }

    /// Sends the head of the queue when idle, ready, and connected.
    /// Strictly FIFO, strictly single-flight: the dequeue and the
    /// `processing` flip happen in one lock scope.
    pub async fn drain_queue(&self) {
        let next = {
            let mut state = self.state.lock().await;
            if state.processing
                || state.queue.is_empty()
                || state.readiness != Readiness::Ready
                || !self.worker.is_connected()
            {
                return;
            }
            let Some(next) = state.queue.pop_front() else {
                return;
            };
            state.active_chat = Some(next.chat_id);
            state.processing = true;
            next
        };
        self.dispatch(&next.text).await;
    }

    /// Writes one framed request to the worker. `processing` is already
    /// true when this runs. Write failure recovers the coordinator:
    /// flag cleared, status torn down, queue drained.
    async fn dispatch(&self, text: &str) {
        let line = match UserEnvelope::new(text).to_line() {
            Ok(line) => line,
            Err(err) => {
                tracing::error!(error = %err, "failed to encode user envelope");
                self.recover_after_write_failure().await;
                return;
            }
        };

        let active = self.state.lock().await.active_chat;
        tracing::debug!(chars = text.len(), "dispatching user message to worker");

        // Installs the turn status before the write, so a write failure
        // always has something to tear down.
        if let Some(chat_id) = active {
            self.status.start(chat_id).await;
        }

        if let Err(err) = self.worker.send_line(&line).await {
            tracing::error!(error = %err, "failed to write user message to worker");
            self.recover_after_write_failure().await;
        }
    }

    async fn recover_after_write_failure(&self) {
        {
            let mut state = self.state.lock().await;
            state.processing = false;
        }
        self.status.teardown().await;
        // Boxed: drain -> dispatch -> recover would otherwise cycle.
        Box::pin(self.drain_queue()).await;
    }

    /// One framed line from the worker's stdout.
    pub async fn handle_worker_line(&self, line: &str) {
        let event = match WorkerEvent::parse(line) {
            Ok(event) => event,
            Err(_) => {
                // Startup banners and stray prints are expected noise.
                tracing::info!(line = %truncate_for_log(line, 200), "worker output (non-protocol)");
                return;
            }
        };

        match event {
            WorkerEvent::System { subtype } => self.handle_init_signal(subtype.as_deref()).await,
            WorkerEvent::Assistant { message } => self.handle_assistant(message).await,
            WorkerEvent::Result { .. } => self.handle_completion().await,
            WorkerEvent::Other => {
                tracing::debug!(
                    line = %truncate_for_log(line, 200),
                    "ignoring unrecognized worker event"
                );
            }
        }
    }

    async fn handle_init_signal(&self, subtype: Option<&str>) {
        if subtype != Some("init") {
            tracing::debug!(?subtype, "ignoring system event");
            return;
        }
        let became_ready = {
            let mut state = self.state.lock().await;
            if state.readiness == Readiness::Connecting {
                state.readiness = Readiness::Ready;
                true
            } else {
                false
            }
        };
        if became_ready {
            tracing::info!("worker initialized");
            self.drain_queue().await;
        } else {
            tracing::debug!("init signal outside connecting state; ignored");
        }
    }

    async fn handle_assistant(&self, message: AssistantMessage) {
        let active = self.state.lock().await.active_chat;
        let Some(chat_id) = active else {
            // No conversation target; nothing to deliver to.
            return;
        };

        for name in message.tool_names() {
            self.status.record_tool_use(name).await;
        }

        if let Some(text) = message.joined_text() {
            let html = markdown_to_html(&text);
            // Torn down independently: the response must go out even if
            // the status deletion rejects.
            let status = Arc::clone(&self.status);
            tokio::spawn(async move {
                status.teardown().await;
            });
            self.send_chunked(chat_id, &html).await;
        }
    }

    async fn handle_completion(&self) {
        let bootstrap = {
            let mut state = self.state.lock().await;
            if state.initial_ready_seen {
                state.messages_completed += 1;
                state.processing = false;
                tracing::info!(total = state.messages_completed, "turn complete");
                false
            } else {
                state.initial_ready_seen = true;
                state.readiness = Readiness::Ready;
                tracing::info!("worker ready (first completion observed)");
                true
            }
        };
        if !bootstrap {
            self.status.teardown().await;
        }
        self.drain_queue().await;
    }

    /// Delivers one formatted response: each chunk goes out as HTML,
    /// falls back to stripped plain text once, then is abandoned with a
    /// log entry — later chunks still attempt delivery.
    async fn send_chunked(&self, chat_id: ChatId, html: &str) {
        for chunk in chunk_message(html, self.config.max_chunk_len) {
            match self
                .api
                .send_message(chat_id, &chunk, DeliveryMode::Html)
                .await
            {
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "rich send rejected; retrying as plain text");
                    let plain = strip_html_tags(&chunk);
                    if let Err(err) = self
                        .api
                        .send_message(chat_id, &plain, DeliveryMode::Plain)
                        .await
                    {
                        tracing::error!(error = %err, "failed to deliver response chunk");
                    }
                }
            }
        }
    }

    pub async fn snapshot(&self) -> BridgeSnapshot {
        let state = self.state.lock().await;
        BridgeSnapshot {
            readiness: state.readiness,
            processing: state.processing,
            queued: state.queue.len(),
            messages_completed: state.messages_completed,
            worker_connected: self.worker.is_connected(),
        }
    }
}

#[async_trait]
impl WorkerEvents for Bridge {
    async fn worker_spawning(&self) {
        let mut state = self.state.lock().await;
        state.readiness = Readiness::Connecting;
    }

    async fn worker_line(&self, line: String) {
        self.handle_worker_line(&line).await;
    }

    async fn worker_exited(&self, code: Option<i32>) {
        let active = {
            let mut state = self.state.lock().await;
            state.readiness = Readiness::Error;
            state.processing = false;
            state.initial_ready_seen = false;
            state.active_chat
        };
        self.status.teardown().await;

        if self.config.notify_crash {
            if let Some(chat_id) = active {
                let notice = match code {
                    Some(code) => format!("Agent worker exited (code {code}). Restarting..."),
                    None => "Agent worker exited. Restarting...".to_string(),
                };
                best_effort(
                    "crash notice",
                    self.api
                        .send_message(chat_id, &notice, DeliveryMode::Plain)
                        .await,
                );
            }
        }
    }

    async fn worker_ready_timeout(&self) {
        let became_ready = {
            let mut state = self.state.lock().await;
            if state.readiness == Readiness::Connecting {
                state.readiness = Readiness::Ready;
                state.initial_ready_seen = true;
                true
            } else {
                false
            }
        };
        if became_ready {
            self.drain_queue().await;
        }
    }
}

fn truncate_for_log(line: &str, max: usize) -> &str {
    if line.len() <= max {
        return line;
    }
    let mut end = max;
    while end > 0 && !line.is_char_boundary(end) {
        end -= 1;
    }
    &line[..end]
}
