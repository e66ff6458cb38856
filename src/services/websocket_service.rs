use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::state::{SharedState, registry::SessionHandle};

/// Handle the full lifecycle of one teamspace observer connection.
///
/// The session is registered under `teamspace_id` for its whole lifetime; lobby events reach
/// it through the registry while this task only services control frames.
pub async fn handle_socket(
    state: SharedState,
    socket: WebSocket,
    teamspace_id: String,
    user_id: String,
) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps broadcasts flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let session = SessionHandle::new(outbound_tx.clone());
    let session_id = session.id;
    if let Err(err) = state
        .registry()
        .add_connection(&teamspace_id, &user_id, session)
        .await
    {
        warn!(error = %err, "rejecting observer connection");
        let _ = outbound_tx.send(Message::Close(None));
        finalize(writer_task, outbound_tx).await;
        return;
    }
    info!(%session_id, teamspace_id = %teamspace_id, user_id = %user_id, "observer connected");

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                debug!(%session_id, payload = %text, "ignoring inbound observer message");
            }
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                info!(%session_id, "observer closed");
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) | Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(%session_id, error = %err, "websocket error");
                break;
            }
        }
    }

    if state.registry().remove_connection(session_id).await.is_some() {
        info!(%session_id, teamspace_id = %teamspace_id, user_id = %user_id, "observer disconnected");
    }

    finalize(writer_task, outbound_tx).await;
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
