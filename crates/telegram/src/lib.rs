//! Outbound operator alerts over Telegram.

use async_trait::async_trait;
use teloxide::prelude::*;
use tracing::{info, warn};

use common::Notifier;

/// Telegram rejects messages longer than this many characters.
const MAX_MESSAGE_CHARS: usize = 4096;

/// Sends every notification to a fixed list of chats.
#[derive(Clone)]
pub struct TelegramNotifier {
    bot: Bot,
    chat_ids: Vec<ChatId>,
}

impl TelegramNotifier {
    pub fn new(token: impl Into<String>, chat_ids: &[i64]) -> Self {
        info!(chats = chat_ids.len(), "Telegram notifier enabled");
        Self {
            bot: Bot::new(token),
            chat_ids: chat_ids.iter().map(|&id| ChatId(id)).collect(),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, message: &str) {
        for part in split_message(message, MAX_MESSAGE_CHARS) {
            send_alert(&self.bot, &self.chat_ids, part).await;
        }
    }
}

/// Send a plain-text alert to all `chat_ids`. Failures are logged, not returned.
pub async fn send_alert(bot: &Bot, chat_ids: &[ChatId], message: &str) {
    for &chat_id in chat_ids {
        if let Err(e) = bot.send_message(chat_id, message).await {
            warn!(chat_id = ?chat_id, error = %e, "Failed to send Telegram alert");
        }
    }
}

/// Split on line boundaries where possible so no part exceeds `max_chars`.
fn split_message(message: &str, max_chars: usize) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = message;
    while rest.chars().count() > max_chars {
        let hard = rest
            .char_indices()
            .nth(max_chars)
            .map_or(rest.len(), |(i, _)| i);
        let cut = rest[..hard].rfind('\n').filter(|&i| i > 0).unwrap_or(hard);
        parts.push(&rest[..cut]);
        rest = rest[cut..].trim_start_matches('\n');
    }
    if !rest.is_empty() || parts.is_empty() {
        parts.push(rest);
    }
    parts
}
