// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests: real TCP, real PTYs (with `cat` standing in for
//! the AI CLIs), the full router and supervisor wiring.

use std::time::Duration;

use futures_util::StreamExt;
use tokio_tungstenite::tungstenite::Message;

use agentmux::store::{AgentStatus, Team, TeamMember};
use agentmux_specs::AgentmuxServer;

const TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn http_health() -> anyhow::Result<()> {
    let server = AgentmuxServer::start().await?;

    let resp: serde_json::Value =
        reqwest::get(format!("{}/api/health", server.base_url())).await?.json().await?;

    assert_eq!(resp["success"], true);
    assert_eq!(resp["data"]["status"], "ok");
    assert_eq!(resp["data"]["initialized"], true);
    Ok(())
}

#[tokio::test]
async fn session_listing_and_capture_roundtrip() -> anyhow::Result<()> {
    let server = AgentmuxServer::start().await?;
    server.spawn_cat("smoke-io")?;

    let client = reqwest::Client::new();
    let base = server.base_url();

    let resp: serde_json::Value =
        client.get(format!("{base}/api/terminal/sessions")).send().await?.json().await?;
    let names: Vec<&str> = resp["data"]
        .as_array()
        .map(|a| a.iter().filter_map(|s| s["sessionName"].as_str()).collect())
        .unwrap_or_default();
    assert_eq!(names, vec!["smoke-io"]);

    client
        .post(format!("{base}/api/terminal/sessions/smoke-io/input"))
        .json(&serde_json::json!({ "data": "smoke-roundtrip-marker" }))
        .send()
        .await?
        .error_for_status()?;

    assert!(
        server.wait_for_capture("smoke-io", "smoke-roundtrip-marker", TIMEOUT).await,
        "input never echoed back"
    );

    let resp: serde_json::Value = client
        .get(format!("{base}/api/terminal/sessions/smoke-io/capture?lines=10"))
        .send()
        .await?
        .json()
        .await?;
    let output = resp["data"]["output"].as_str().unwrap_or("");
    assert!(output.contains("smoke-roundtrip-marker"), "capture: {output:?}");

    client
        .delete(format!("{base}/api/terminal/sessions/smoke-io"))
        .send()
        .await?
        .error_for_status()?;
    assert!(!server.state.backend.session_exists("smoke-io"));
    Ok(())
}

#[tokio::test]
async fn ws_streams_snapshot_and_terminal_output() -> anyhow::Result<()> {
    let server = AgentmuxServer::start().await?;
    server.spawn_cat("smoke-ws")?;

    let (mut socket, _) = tokio_tungstenite::connect_async(server.ws_url()).await?;

    // First frame is the orchestrator status snapshot.
    let first = tokio::time::timeout(TIMEOUT, socket.next())
        .await?
        .ok_or_else(|| anyhow::anyhow!("socket closed"))??;
    let Message::Text(text) = first else {
        anyhow::bail!("expected text frame, got {first:?}");
    };
    let event: serde_json::Value = serde_json::from_str(&text)?;
    assert_eq!(event["event"], "orchestrator_status");

    // Writing to the PTY produces terminal_output events.
    server.state.backend.write("smoke-ws", b"ws-marker\n").await
        .map_err(|e| anyhow::anyhow!("write: {e}"))?;

    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        anyhow::ensure!(tokio::time::Instant::now() < deadline, "no terminal_output arrived");
        let frame = tokio::time::timeout(TIMEOUT, socket.next())
            .await?
            .ok_or_else(|| anyhow::anyhow!("socket closed"))??;
        let Message::Text(text) = frame else { continue };
        let event: serde_json::Value = serde_json::from_str(&text)?;
        if event["event"] == "terminal_output"
            && event["data"]["sessionName"] == "smoke-ws"
            && event["data"]["chunk"].as_str().unwrap_or("").contains("ws-marker")
        {
            break;
        }
    }

    let _ = server.state.backend.kill_session("smoke-ws").await;
    Ok(())
}

#[tokio::test]
async fn queued_message_then_activation_delivers_in_order() -> anyhow::Result<()> {
    let server = AgentmuxServer::start().await?;
    server.state.store.save_team(Team {
        id: "t1".to_owned(),
        name: "smoke-team".to_owned(),
        project_path: None,
        members: vec![TeamMember {
            id: "m1".to_owned(),
            name: "smoke-q".to_owned(),
            role: "developer".to_owned(),
            session_name: "smoke-q".to_owned(),
            agent_status: AgentStatus::Activating,
            working_status: None,
            runtime_type: None,
            current_tasks: vec![],
        }],
    });

    let client = reqwest::Client::new();
    let base = server.base_url();

    for payload in ["first-queued-msg", "second-queued-msg"] {
        let resp = client
            .post(format!("{base}/api/terminal/sessions/smoke-q/message"))
            .json(&serde_json::json!({ "message": payload }))
            .send()
            .await?;
        assert_eq!(resp.status(), reqwest::StatusCode::ACCEPTED, "{payload}");
    }

    server.spawn_cat("smoke-q")?;
    client
        .post(format!("{base}/api/teams/members/smoke-q/register"))
        .send()
        .await?
        .error_for_status()?;

    assert!(
        server.wait_for_capture("smoke-q", "second-queued-msg", Duration::from_secs(20)).await,
        "queued messages never delivered"
    );
    let capture = server
        .state
        .backend
        .capture_output("smoke-q", 50)
        .map_err(|e| anyhow::anyhow!("capture: {e}"))?;
    let first = capture.find("first-queued-msg");
    let second = capture.find("second-queued-msg");
    assert!(first.is_some() && first < second, "order wrong: {capture:?}");

    let _ = server.state.backend.kill_session("smoke-q").await;
    Ok(())
}

#[tokio::test]
async fn activity_poll_reflects_live_sessions() -> anyhow::Result<()> {
    let server = AgentmuxServer::start().await?;
    server.state.store.save_team(Team {
        id: "t2".to_owned(),
        name: "smoke-team-2".to_owned(),
        project_path: None,
        members: vec![TeamMember {
            id: "m2".to_owned(),
            name: "smoke-act".to_owned(),
            role: "reviewer".to_owned(),
            session_name: "smoke-act".to_owned(),
            agent_status: AgentStatus::Started,
            working_status: None,
            runtime_type: None,
            current_tasks: vec![],
        }],
    });
    server.spawn_cat("smoke-act")?;

    let resp: serde_json::Value = reqwest::Client::new()
        .get(format!("{}/api/teams/activity", server.base_url()))
        .send()
        .await?
        .json()
        .await?;
    let entries = resp["data"].as_array().cloned().unwrap_or_default();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["sessionName"], "smoke-act");
    assert_eq!(entries[0]["agentStatus"], "active");
    assert_eq!(entries[0]["childAlive"], true);

    let _ = server.state.backend.kill_session("smoke-act").await;
    Ok(())
}
