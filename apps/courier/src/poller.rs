//! Update loop: long-polls Telegram, authenticates the owner, handles
//! bridge-native commands, and relays everything else to the worker.

use std::sync::Arc;
use std::time::{Duration, Instant};

use courier_bridge::bridge::{Bridge, BridgeSnapshot, InboundDisposition};
use courier_bridge::channel::{ChannelApi, ChatId, DeliveryMode, best_effort};

use crate::telegram::{TelegramApi, Update};

const POLL_TIMEOUT_SECS: u64 = 50;
const POLL_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Status,
    Cancel,
    Help,
}

/// Parses a leading slash command; `/status@some_bot` counts too.
/// Unknown commands return `None` and relay to the worker as plain text.
pub fn parse_command(text: &str) -> Option<Command> {
    let first = text.trim().split_whitespace().next()?;
    let name = first.strip_prefix('/')?;
    let name = name.split('@').next().unwrap_or(name);
    match name {
        "start" => Some(Command::Start),
        "status" => Some(Command::Status),
        "cancel" => Some(Command::Cancel),
        "help" => Some(Command::Help),
        _ => None,
    }
}

pub struct Poller {
    api: Arc<TelegramApi>,
    bridge: Arc<Bridge>,
    allowed_user_id: i64,
    started_at: Instant,
}

impl Poller {
    pub fn new(api: Arc<TelegramApi>, bridge: Arc<Bridge>, allowed_user_id: i64) -> Self {
        Self {
            api,
            bridge,
            allowed_user_id,
            started_at: Instant::now(),
        }
    }

    pub async fn run(&self) {
        tracing::info!(allowed_user_id = self.allowed_user_id, "update loop started");
        let mut offset: i64 = 0;
        loop {
            match self.api.get_updates(offset, POLL_TIMEOUT_SECS).await {
                Ok(updates) => {
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        self.handle_update(update).await;
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "getUpdates failed; retrying");
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                }
            }
        }
    }

    async fn handle_update(&self, update: Update) {
        let Some(message) = update.message else {
            return;
        };
        let Some(text) = message.text else {
            return;
        };
        let chat_id = message.chat.id;

        let from_id = message.from.map(|user| user.id);
        if from_id != Some(self.allowed_user_id) {
            tracing::warn!(?from_id, "rejected message from unauthorized user");
            best_effort(
                "unauthorized notice",
                self.api
                    .send_message(chat_id, "Unauthorized. This bot is private.", DeliveryMode::Plain)
                    .await,
            );
            return;
        }

        if let Some(command) = parse_command(&text) {
            self.handle_command(chat_id, command).await;
        } else {
            self.relay(chat_id, text).await;
        }
    }

    async fn relay(&self, chat_id: ChatId, text: String) {
        let feedback = match self.bridge.handle_user_message(chat_id, text).await {
            InboundDisposition::Dispatched => None,
            InboundDisposition::QueuedNotReady => {
                Some("Connecting to the worker... Your message is queued.")
            }
            InboundDisposition::QueuedBusy => {
                Some("Still processing the previous request. Your message is queued.")
            }
        };
        if let Some(feedback) = feedback {
            best_effort(
                "queue feedback",
                self.api
                    .send_message(chat_id, feedback, DeliveryMode::Plain)
                    .await,
            );
        }
    }

    async fn handle_command(&self, chat_id: ChatId, command: Command) {
        let snapshot = self.bridge.snapshot().await;
        let reply = match command {
            Command::Start => start_text(&snapshot),
            Command::Status => status_text(&snapshot, self.started_at.elapsed()),
            Command::Cancel => {
                "Mid-turn cancel is not supported. The current request will complete normally."
                    .to_string()
            }
            Command::Help => help_text(),
        };
        best_effort(
            "command reply",
            self.api
                .send_message(chat_id, &reply, DeliveryMode::Html)
                .await,
        );
    }
}

fn start_text(snapshot: &BridgeSnapshot) -> String {
    format!(
        "<b>Courier</b>\n\n\
         Worker status: <code>{}</code>\n\
         Use /help to see available commands.\n\n\
         Send any message to talk to the agent.",
        snapshot.readiness.as_str()
    )
}

fn status_text(snapshot: &BridgeSnapshot, uptime: Duration) -> String {
    format!(
        "<b>Bridge Status</b>\n\n\
         Worker state: <code>{}</code>\n\
         Connected: <code>{}</code>\n\
         Processing: <code>{}</code>\n\
         Queued messages: <code>{}</code>\n\
         Messages processed: <code>{}</code>\n\
         Uptime: <code>{}</code>",
        snapshot.readiness.as_str(),
        if snapshot.worker_connected { "yes" } else { "no" },
        if snapshot.processing { "yes" } else { "no" },
        snapshot.queued,
        snapshot.messages_completed,
        format_uptime(uptime),
    )
}

fn help_text() -> String {
    "<b>Available Commands</b>\n\n\
     /start - Welcome message with status\n\
     /status - Worker state, uptime, stats\n\
     /cancel - Cancel current request\n\
     /help - This message\n\n\
     Send any text message to talk to the agent."
        .to_string()
}

fn format_uptime(uptime: Duration) -> String {
    let total = uptime.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{hours}h {minutes}m {seconds}s")
}
