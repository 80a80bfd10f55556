//! Control-socket client, used by the `irslackd-ctl` companion binary.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use interprocess::local_socket::tokio::prelude::*;
use interprocess::local_socket::{GenericNamespaced, ToNsName};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::ipc::{ControlRequest, ControlResponse};
use crate::{AppError, Result};

/// Send one request over the control socket and return its response.
///
/// # Errors
///
/// Returns `AppError::Ipc` if the socket cannot be reached, the request
/// cannot be serialized, or the server closes the connection without
/// replying.
pub async fn send(socket_name: &str, request: &ControlRequest) -> Result<ControlResponse> {
    let name = socket_name
        .to_ns_name::<GenericNamespaced>()
        .map_err(|err| AppError::Ipc(format!("invalid control socket name '{socket_name}': {err}")))?;

    let stream = LocalSocketStream::connect(name)
        .await
        .map_err(|err| AppError::Ipc(format!("failed to connect to control socket: {err}")))?;

    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

    let payload = serde_json::to_vec(request)
        .map_err(|err| AppError::Ipc(format!("failed to encode request: {err}")))?;
    framed
        .send(Bytes::from(payload))
        .await
        .map_err(|err| AppError::Ipc(format!("failed to send request: {err}")))?;

    let frame = framed
        .next()
        .await
        .ok_or_else(|| AppError::Ipc("server closed the connection without a response".into()))?
        .map_err(|err| AppError::Ipc(format!("failed to read response: {err}")))?;

    serde_json::from_slice(&frame).map_err(|err| AppError::Ipc(format!("malformed response: {err}")))
}
