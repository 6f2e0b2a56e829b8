use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::{IntoResponse, Response},
    Extension, Json,
};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use changefeed_cell::FeedStatus;
use shared_config::AppConfig;
use shared_models::{auth::User, error::AppError};

use crate::error::QueueSyncError;
use crate::models::{ClientCommand, QueueSnapshot, RoomId};
use crate::services::broker::QueueBroker;
use crate::services::rooms::RoomReceiver;

/// Everything the queue-sync routes need, constructed once in `main` and
/// injected; no ambient singletons.
pub struct QueueSyncState {
    pub config: Arc<AppConfig>,
    pub broker: Arc<QueueBroker>,
    pub feed_status: watch::Receiver<FeedStatus>,
}

enum OutFrame {
    Text(String),
    Close,
}

/// Liveness plus the degraded-mode flag for the changefeed.
pub async fn health(State(state): State<Arc<QueueSyncState>>) -> Json<Value> {
    let feed = *state.feed_status.borrow();
    Json(json!({
        "status": "ok",
        "configured": state.config.is_configured(),
        "feed": feed,
        "live_updates": feed.is_live(),
    }))
}

/// Authoritative snapshot for reconciliation. Read-only, any authenticated
/// user; write access is enforced at the broker, not here.
pub async fn get_queue_snapshot(
    State(state): State<Arc<QueueSyncState>>,
    Extension(user): Extension<User>,
    Path(chamber_id): Path<Uuid>,
) -> Result<Json<QueueSnapshot>, AppError> {
    debug!("snapshot request for chamber {} from {}", chamber_id, user.id);
    let snapshot = state.broker.store().snapshot(chamber_id).await?;
    Ok(Json(snapshot))
}

/// WebSocket upgrade. The first client frame must be a join command
/// matching the authenticated user; everything after that is doctor ops
/// (or nothing, for patients).
pub async fn websocket_handler(
    State(state): State<Arc<QueueSyncState>>,
    Extension(user): Extension<User>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, user))
        .into_response()
}

async fn handle_socket(socket: WebSocket, state: Arc<QueueSyncState>, user: User) {
    let (sink, mut stream) = socket.split();

    let Some(join_cmd) = read_command(&mut stream).await else {
        debug!("socket for {} closed before join", user.id);
        return;
    };

    let (is_doctor, rooms) = match join_rooms(&state.broker, &user, join_cmd).await {
        Ok(result) => result,
        Err(e) => {
            warn!("join rejected for {}: {}", user.id, e);
            let mut sink = sink;
            let _ = sink.send(Message::Text(error_frame(&e).into())).await;
            let _ = sink.close().await;
            return;
        }
    };

    let (out_tx, out_rx) = mpsc::channel::<OutFrame>(64);

    for (room, receiver) in rooms {
        tokio::spawn(forward_room_to_socket(room, receiver, out_tx.clone()));
    }

    let writer = tokio::spawn(write_frames(sink, out_rx));

    // Commands from one connection are handled serially, in order.
    while let Some(command) = read_command(&mut stream).await {
        let reply = if is_doctor {
            dispatch_doctor_command(&state.broker, &user, command).await
        } else {
            Err(QueueSyncError::AuthorizationError(
                "patients have no write operations".to_string(),
            ))
        };

        let frame = match reply {
            Ok(value) => json!({ "ok": true, "result": value }).to_string(),
            Err(e) => error_frame(&e),
        };
        if out_tx.send(OutFrame::Text(frame)).await.is_err() {
            break;
        }
    }

    let _ = out_tx.send(OutFrame::Close).await;
    drop(out_tx);
    let _ = writer.await;
    info!("socket for {} closed; room memberships dropped", user.id);
}

async fn read_command(stream: &mut SplitStream<WebSocket>) -> Option<ClientCommand> {
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str(text.as_str()) {
                Ok(command) => return Some(command),
                Err(e) => {
                    debug!("ignoring malformed client frame: {}", e);
                    continue;
                }
            },
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
    None
}

async fn join_rooms(
    broker: &Arc<QueueBroker>,
    user: &User,
    command: ClientCommand,
) -> Result<(bool, Vec<(RoomId, RoomReceiver)>), QueueSyncError> {
    match command {
        ClientCommand::DoctorJoin {
            doctor_id,
            chamber_ids,
        } => {
            let rooms = broker.join_doctor(user, doctor_id, &chamber_ids).await?;
            Ok((true, rooms))
        }
        ClientCommand::PatientJoin {
            patient_id,
            appointment_ids,
            chamber_ids,
        } => {
            let rooms = broker
                .join_patient(user, patient_id, &appointment_ids, &chamber_ids)
                .await?;
            Ok((false, rooms))
        }
        other => Err(QueueSyncError::ValidationError(format!(
            "expected a join command first, got {:?}",
            other
        ))),
    }
}

async fn dispatch_doctor_command(
    broker: &Arc<QueueBroker>,
    user: &User,
    command: ClientCommand,
) -> Result<Value, QueueSyncError> {
    match command {
        ClientCommand::UpdateQueue {
            chamber_id,
            current_serial,
            estimated_wait_minutes,
        } => {
            let chamber = broker
                .update_queue(user, chamber_id, current_serial, estimated_wait_minutes)
                .await?;
            Ok(serde_json::to_value(chamber)?)
        }
        ClientCommand::AnnounceDelay {
            chamber_id,
            delay_minutes,
            message,
        } => {
            let chamber = broker
                .announce_delay(user, chamber_id, delay_minutes, message)
                .await?;
            Ok(serde_json::to_value(chamber)?)
        }
        ClientCommand::CallPatient {
            appointment_id,
            patient_id,
            serial_number,
        } => {
            let entry = broker
                .call_patient(user, appointment_id, patient_id, serial_number)
                .await?;
            Ok(serde_json::to_value(entry)?)
        }
        ClientCommand::CompletePatient {
            appointment_id,
            chamber_id,
            next_serial,
        } => {
            let chamber = broker
                .complete_patient(user, appointment_id, chamber_id, next_serial)
                .await?;
            Ok(serde_json::to_value(chamber)?)
        }
        ClientCommand::SendMessage {
            chamber_id,
            message,
            message_bn,
        } => {
            broker
                .send_message(user, chamber_id, message, message_bn)
                .await?;
            Ok(json!({ "sent": true }))
        }
        ClientCommand::DoctorJoin { .. } | ClientCommand::PatientJoin { .. } => Err(
            QueueSyncError::ValidationError("already joined".to_string()),
        ),
    }
}

async fn forward_room_to_socket(
    room: RoomId,
    mut receiver: RoomReceiver,
    out_tx: mpsc::Sender<OutFrame>,
) {
    loop {
        match receiver.recv().await {
            Ok(envelope) => {
                let Ok(text) = serde_json::to_string(&envelope) else {
                    continue;
                };
                if out_tx.send(OutFrame::Text(text)).await.is_err() {
                    return;
                }
            }
            // No replay: a lagged or closed receiver ends the connection
            // and the client reconnects and reconciles.
            Err(_) => {
                debug!("{} stream ended, closing socket", room);
                let _ = out_tx.send(OutFrame::Close).await;
                return;
            }
        }
    }
}

async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::Receiver<OutFrame>,
) {
    while let Some(frame) = out_rx.recv().await {
        match frame {
            OutFrame::Text(text) => {
                if sink.send(Message::Text(text.into())).await.is_err() {
                    return;
                }
            }
            OutFrame::Close => {
                let _ = sink.close().await;
                return;
            }
        }
    }
}

fn error_frame(error: &QueueSyncError) -> String {
    let code = match error {
        QueueSyncError::AuthorizationError(_) => "authorization",
        QueueSyncError::ValidationError(_) => "validation",
        QueueSyncError::NotFound(_) => "not_found",
        QueueSyncError::StoreError(_) => "store",
        QueueSyncError::TransportError(_) => "transport",
        QueueSyncError::SerializationError(_) => "serialization",
    };
    json!({ "ok": false, "code": code, "error": error.to_string() }).to_string()
}
