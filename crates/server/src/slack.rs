// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Best-effort Slack notifications for orchestrator lifecycle events.
//!
//! Delivery failures are logged and swallowed; nothing in the supervisor
//! waits on Slack.

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::SlackConfig;

const POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";

#[derive(Serialize)]
struct PostMessage<'a> {
    channel: &'a str,
    text: &'a str,
}

/// Notifier holding the bot token and default channel. Without a token it
/// degrades to a silent no-op.
pub struct SlackNotifier {
    client: reqwest::Client,
    bot_token: Option<String>,
    channel: Option<String>,
}

impl SlackNotifier {
    pub fn new(config: &SlackConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            bot_token: config.bot_token.clone(),
            channel: config.default_channel.clone(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            client: reqwest::Client::new(),
            bot_token: None,
            channel: None,
        }
    }

    /// Post `text` to the default channel, best-effort.
    pub async fn notify(&self, text: &str) {
        let (Some(token), Some(channel)) = (&self.bot_token, &self.channel) else {
            debug!("slack notify skipped (not configured)");
            return;
        };
        let body = PostMessage { channel, text };
        let result = self
            .client
            .post(POST_MESSAGE_URL)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => warn!(status = %resp.status(), "slack notify rejected"),
            Err(e) => warn!("slack notify failed: {e}"),
        }
    }
}

#[cfg(test)]
#[path = "slack_tests.rs"]
mod tests;
