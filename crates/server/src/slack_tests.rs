// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::config::SlackConfig;

#[tokio::test]
async fn unconfigured_notifier_is_silent() {
    let notifier = SlackNotifier::new(&SlackConfig::default());
    // Must not error or block.
    notifier.notify("orchestrator restarted").await;
}

#[tokio::test]
async fn disabled_constructor_never_sends() {
    SlackNotifier::disabled().notify("ignored").await;
}
