//! Control socket round-trip: `ipc::server::spawn` end to end against a real
//! `ipc::client::send` call, with a fake bridge consumer answering
//! `BridgeCommand`s (spec §4.8).

use irslackd::ipc::{client, server, BridgeCommand, ControlRequest};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn socket_name(label: &str) -> String {
    format!("irslackd-test-{label}-{}.sock", std::process::id())
}

/// Spawn the control socket plus a fake bridge loop that answers every
/// command successfully.
fn spawn_ok_bridge(name: String) -> (tokio::task::JoinHandle<()>, CancellationToken) {
    let (cmd_tx, mut cmd_rx) = mpsc::channel(8);
    let ct = CancellationToken::new();
    server::spawn(name, cmd_tx, ct.clone()).expect("control socket spawn succeeds");

    let consumer = tokio::spawn(async move {
        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                BridgeCommand::SendMessage { reply, .. } | BridgeCommand::SendFile { reply, .. } => {
                    let _ = reply.send(Ok(()));
                }
                BridgeCommand::GetConfig { reply } => {
                    let _ = reply.send(serde_json::json!({"port": 6667}));
                }
            }
        }
    });

    (consumer, ct)
}

#[tokio::test]
async fn send_message_round_trips_ok() {
    let name = socket_name("send-message");
    let (consumer, ct) = spawn_ok_bridge(name.clone());

    let response = client::send(
        &name,
        &ControlRequest::SendMessage {
            target: "#general".into(),
            text: "hello".into(),
        },
    )
    .await
    .expect("client send succeeds");

    assert!(response.ok, "expected ok response, got {response:?}");
    assert!(response.error.is_none());

    ct.cancel();
    consumer.abort();
}

#[tokio::test]
async fn get_config_returns_bridge_payload() {
    let name = socket_name("get-config");
    let (consumer, ct) = spawn_ok_bridge(name.clone());

    let response = client::send(&name, &ControlRequest::GetConfig).await.expect("client send succeeds");

    assert!(response.ok);
    let data = response.data.expect("success response carries data");
    assert_eq!(data["port"], 6667);

    ct.cancel();
    consumer.abort();
}

#[tokio::test]
async fn bridge_failure_surfaces_as_error_response() {
    let name = socket_name("send-file-failure");
    let (cmd_tx, mut cmd_rx) = mpsc::channel(8);
    let ct = CancellationToken::new();
    server::spawn(name.clone(), cmd_tx, ct.clone()).expect("control socket spawn succeeds");

    let consumer = tokio::spawn(async move {
        if let Some(BridgeCommand::SendFile { reply, .. }) = cmd_rx.recv().await {
            let _ = reply.send(Err(irslackd::AppError::Config("no such room".into())));
        }
    });

    let response = client::send(
        &name,
        &ControlRequest::SendFile {
            target: "#nope".into(),
            path: "/tmp/does-not-matter".into(),
        },
    )
    .await
    .expect("client send succeeds even when the bridge reports failure");

    assert!(!response.ok);
    assert!(response.error.unwrap().contains("no such room"));

    ct.cancel();
    consumer.abort();
}

#[tokio::test]
async fn client_reports_error_when_nothing_is_listening() {
    let name = socket_name("nobody-home");
    let result = client::send(&name, &ControlRequest::GetConfig).await;
    assert!(result.is_err(), "expected connect failure when no server is listening");
}
