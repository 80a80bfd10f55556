//! Control socket listener, grounded on the teacher's `ipc::server` accept
//! loop but reframed onto [`tokio_util::codec::LengthDelimitedCodec`] and
//! narrowed to the three ops [`crate::ipc::ControlRequest`] names.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use interprocess::local_socket::tokio::prelude::*;
use interprocess::local_socket::{GenericNamespaced, ListenerOptions, ToNsName};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::ipc::{BridgeCommand, ControlRequest, ControlResponse};
use crate::{AppError, Result};

/// Spawn the control-socket accept loop.
///
/// The bridge starts this only while an IRC client is attached and cancels
/// `ct` when the client detaches (spec §4.8); this function itself is just
/// the accept/dispatch plumbing.
///
/// # Errors
///
/// Returns `AppError::Ipc` if the listener cannot be created (e.g. a stale
/// socket file already exists).
pub fn spawn(
    socket_name: String,
    cmd_tx: mpsc::Sender<BridgeCommand>,
    ct: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    let name = socket_name
        .clone()
        .to_ns_name::<GenericNamespaced>()
        .map_err(|err| AppError::Ipc(format!("invalid control socket name '{socket_name}': {err}")))?;

    let listener = ListenerOptions::new()
        .name(name)
        .create_tokio()
        .map_err(|err| AppError::Ipc(format!("failed to create control socket: {err}")))?;

    info!(socket_name = %socket_name, "control socket listening");

    Ok(tokio::spawn(async move {
        let span = info_span!("control_socket", socket_name = %socket_name);
        async move {
            loop {
                tokio::select! {
                    () = ct.cancelled() => {
                        info!("control socket shutting down");
                        break;
                    }
                    accepted = listener.accept() => {
                        match accepted {
                            Ok(stream) => {
                                let cmd_tx = cmd_tx.clone();
                                tokio::spawn(handle_connection(stream, cmd_tx));
                            }
                            Err(err) => warn!(%err, "control socket accept failed"),
                        }
                    }
                }
            }
        }
        .instrument(span)
        .await;
    }))
}

async fn handle_connection(stream: interprocess::local_socket::tokio::Stream, cmd_tx: mpsc::Sender<BridgeCommand>) {
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

    while let Some(frame) = framed.next().await {
        let response = match frame {
            Ok(bytes) => match serde_json::from_slice::<ControlRequest>(&bytes) {
                Ok(request) => dispatch(request, &cmd_tx).await,
                Err(err) => ControlResponse::error(format!("invalid request: {err}")),
            },
            Err(err) => {
                warn!(%err, "control socket frame read failed");
                break;
            }
        };

        let payload = serde_json::to_vec(&response)
            .unwrap_or_else(|_| br#"{"ok":false,"error":"serialization failed"}"#.to_vec());
        if let Err(err) = framed.send(Bytes::from(payload)).await {
            warn!(%err, "control socket write failed");
            break;
        }
    }
}

async fn dispatch(request: ControlRequest, cmd_tx: &mpsc::Sender<BridgeCommand>) -> ControlResponse {
    match request {
        ControlRequest::SendMessage { target, text } => {
            let (reply, recv) = oneshot::channel();
            if cmd_tx.send(BridgeCommand::SendMessage { target, text, reply }).await.is_err() {
                return ControlResponse::error("bridge is not accepting commands");
            }
            await_unit_reply(recv).await
        }
        ControlRequest::SendFile { target, path } => {
            let (reply, recv) = oneshot::channel();
            if cmd_tx.send(BridgeCommand::SendFile { target, path, reply }).await.is_err() {
                return ControlResponse::error("bridge is not accepting commands");
            }
            await_unit_reply(recv).await
        }
        ControlRequest::GetConfig => {
            let (reply, recv) = oneshot::channel();
            if cmd_tx.send(BridgeCommand::GetConfig { reply }).await.is_err() {
                return ControlResponse::error("bridge is not accepting commands");
            }
            match recv.await {
                Ok(config) => ControlResponse::success(config),
                Err(_) => ControlResponse::error("bridge dropped the request"),
            }
        }
    }
}

async fn await_unit_reply(recv: oneshot::Receiver<Result<()>>) -> ControlResponse {
    match recv.await {
        Ok(Ok(())) => ControlResponse::success(serde_json::json!({})),
        Ok(Err(err)) => ControlResponse::error(err.to_string()),
        Err(_) => ControlResponse::error("bridge dropped the request"),
    }
}
