//! Per-turn status indicator.
//!
//! One `TurnStatus` exists at most at any instant. Its lifecycle is
//! none → pending (message not yet created) → assigned → torn down; the
//! keep-alive presence pulse runs for the whole window and is aborted on
//! teardown. Everything here is best-effort: a failed create leaves the
//! handle unset and downstream calls degrade to no-ops, and teardown
//! swallows delete failures because the message may already be gone.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::channel::{ChannelApi, ChatId, DeliveryMode, MessageId, PresenceKind, best_effort};

#[derive(Debug, Clone)]
pub struct StatusConfig {
    /// Minimum interval between status-message edits.
    pub edit_throttle: Duration,
    /// Interval of the keep-alive presence pulse.
    pub keepalive_interval: Duration,
    /// Below this elapsed time (and with no tools yet) the indicator
    /// still reads "Thinking...".
    pub thinking_threshold: Duration,
    /// How many of the most recent tool names the indicator shows.
    pub max_tools_shown: usize,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            edit_throttle: Duration::from_secs(3),
            keepalive_interval: Duration::from_secs(4),
            thinking_threshold: Duration::from_secs(2),
            max_tools_shown: 5,
        }
    }
}

struct TurnStatus {
    chat_id: ChatId,
    /// None until the creation round-trip resolves; assigned at most once.
    handle: Option<MessageId>,
    started: Instant,
    /// Tool names seen this turn, consecutive duplicates collapsed.
    tools: Vec<String>,
    last_edit: Instant,
    /// Guards against a stale creation resolving into a newer turn.
    token: u64,
    keepalive: JoinHandle<()>,
}

pub struct StatusTracker {
    api: Arc<dyn ChannelApi>,
    config: StatusConfig,
    inner: Arc<Mutex<Option<TurnStatus>>>,
    tokens: AtomicU64,
}

impl StatusTracker {
    pub fn new(api: Arc<dyn ChannelApi>, config: StatusConfig) -> Self {
        Self {
            api,
            config,
            inner: Arc::new(Mutex::new(None)),
            tokens: AtomicU64::new(0),
        }
    }

    /// Begins a new turn's indicator, tearing down any previous one.
    ///
    /// The `TurnStatus` is installed and the presence pulse started
    /// before this returns (first pulse at once, then every interval);
    /// only the status-message creation round-trip runs asynchronously,
    /// and its handle is backfilled only if this turn is still the live
    /// one when the call resolves.
    pub async fn start(&self, chat_id: ChatId) {
        self.teardown().await;

        let token = self.tokens.fetch_add(1, Ordering::SeqCst) + 1;
        let keepalive = {
            let api = Arc::clone(&self.api);
            let interval = self.config.keepalive_interval.max(Duration::from_millis(1));
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    best_effort(
                        "presence pulse",
                        api.send_presence(chat_id, PresenceKind::Typing).await,
                    );
                }
            })
        };

        let now = Instant::now();
        *self.inner.lock().await = Some(TurnStatus {
            chat_id,
            handle: None,
            started: now,
            tools: Vec::new(),
            last_edit: now,
            token,
            keepalive,
        });

        let api = Arc::clone(&self.api);
        let slot = Arc::clone(&self.inner);
        tokio::spawn(async move {
            match api
                .send_message(chat_id, "Thinking...", DeliveryMode::Plain)
                .await
            {
                Ok(id) => {
                    let mut guard = slot.lock().await;
                    if let Some(status) = guard.as_mut() {
                        if status.token == token {
                            status.handle = Some(id);
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "failed to create status message");
                }
            }
        });
    }

    /// Records a tool invocation for the indicator.
    ///
    /// No-op without a live status or while the handle is unset.
    /// Consecutive duplicates collapse; an edit flush fires when the
    /// throttle window has passed.
    pub async fn record_tool_use(&self, name: &str) {
        let flush = {
            let mut guard = self.inner.lock().await;
            let Some(status) = guard.as_mut() else {
                return;
            };
            if status.handle.is_none() {
                return;
            }
            if status.tools.last().map(String::as_str) != Some(name) {
                status.tools.push(name.to_string());
            }
            status.last_edit.elapsed() >= self.config.edit_throttle
        };
        if flush {
            self.flush_edit().await;
        }
    }

    /// Pushes the current display text to the status message.
    pub async fn flush_edit(&self) {
        let pending = {
            let mut guard = self.inner.lock().await;
            match guard.as_mut() {
                Some(status) if status.handle.is_some() => {
                    status.last_edit = Instant::now();
                    let text =
                        format_status_text(status.started.elapsed(), &status.tools, &self.config);
                    status.handle.map(|handle| (status.chat_id, handle, text))
                }
                _ => None,
            }
        };
        let Some((chat_id, handle, text)) = pending else {
            return;
        };
        if let Err(err) = self.api.edit_message_text(chat_id, handle, &text).await {
            tracing::warn!(error = %err, "failed to edit status message");
        }
    }

    /// Removes the indicator. Idempotent: the status is taken out of the
    /// shared slot under the lock, so an overlapping call observes
    /// "none" and exits; the status message is deleted only if it was
    /// ever created.
    pub async fn teardown(&self) {
        let Some(status) = self.inner.lock().await.take() else {
            return;
        };
        status.keepalive.abort();
        if let Some(handle) = status.handle {
            best_effort(
                "status delete",
                self.api.delete_message(status.chat_id, handle).await,
            );
        }
    }
}

/// Display text for the indicator.
pub fn format_status_text(elapsed: Duration, tools: &[String], config: &StatusConfig) -> String {
    let shown = if tools.len() > config.max_tools_shown {
        &tools[tools.len() - config.max_tools_shown..]
    } else {
        tools
    };
    let tool_list = shown.join(", ");

    if elapsed < config.thinking_threshold && tool_list.is_empty() {
        return "Thinking...".to_string();
    }

    let secs = elapsed.as_secs();
    if tool_list.is_empty() {
        format!("Working... ({secs}s)")
    } else {
        format!("Working... ({secs}s \u{b7} {tool_list})")
    }
}
