use axum::{
    Json, Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};
use uuid::Uuid;

use crate::{
    edit::{EditError, EditSession},
    event::UiEvent,
    manager::ShowModelManager,
    model::{
        ShowModel,
        cue::SequenceDraft,
        document::ShowDocument,
        validation::{ValidationReport, validate},
    },
    scheduler::{PlaybackCommand, ShowState},
    timeline::Viewport,
};

#[derive(Clone)]
pub struct ApiState {
    scheduler_tx: mpsc::Sender<PlaybackCommand>,
    state_rx: watch::Receiver<ShowState>,
    event_tx: broadcast::Sender<UiEvent>,
    model_manager: ShowModelManager,
}

pub fn create_api_router(
    scheduler_tx: mpsc::Sender<PlaybackCommand>,
    state_rx: watch::Receiver<ShowState>,
    event_tx: broadcast::Sender<UiEvent>,
    model_manager: ShowModelManager,
) -> Router {
    let state = ApiState {
        scheduler_tx,
        state_rx,
        event_tx,
        model_manager,
    };

    Router::new()
        .route("/ws", get(websocket_handler))
        // initial snapshot for a freshly connected UI
        .route("/api/show/full_state", get(get_full_state_handler))
        .route("/api/show/validate", get(get_validation_handler))
        .route("/api/show/export", get(get_export_handler))
        .route("/api/show/import", post(post_import_handler))
        .with_state(state)
}

/// Timeline interactions sent by a UI. Pointer values are timeline positions.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum EditCommand {
    #[serde(rename_all = "camelCase")]
    BeginDrag {
        sequence_id: Uuid,
        pointer: f64,
        viewport: Viewport,
    },
    #[serde(rename_all = "camelCase")]
    BeginResize {
        sequence_id: Uuid,
        pointer: f64,
        viewport: Viewport,
    },
    BeginAudioDrag {
        pointer: f64,
        viewport: Viewport,
    },
    PointerMove {
        pointer: f64,
    },
    Release,
    Seek {
        pointer: f64,
        viewport: Viewport,
    },
    AddSequence {
        draft: SequenceDraft,
    },
    #[serde(rename_all = "camelCase")]
    RemoveSequence {
        sequence_id: Uuid,
    },
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", content = "param", rename_all = "camelCase")]
pub enum ClientMessage {
    Playback(PlaybackCommand),
    Edit(EditCommand),
}

#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", content = "param", rename_all = "camelCase")]
enum ServerMessage {
    State(ShowState),
    Event(UiEvent),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FullShowState {
    show_model: ShowModel,
    show_state: ShowState,
}

async fn get_full_state_handler(State(state): State<ApiState>) -> Json<FullShowState> {
    let show_model = state.model_manager.snapshot().await;
    let show_state = state.state_rx.borrow().clone();

    Json(FullShowState {
        show_model,
        show_state,
    })
}

async fn get_validation_handler(State(state): State<ApiState>) -> Json<ValidationReport> {
    let model = state.model_manager.read().await;
    Json(validate(&model))
}

async fn get_export_handler(State(state): State<ApiState>) -> Json<ShowDocument> {
    Json(state.model_manager.export_document().await)
}

async fn post_import_handler(
    State(state): State<ApiState>,
    Json(document): Json<ShowDocument>,
) -> Result<StatusCode, (StatusCode, String)> {
    match state.model_manager.import_document(document).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(e) => {
            log::warn!("Show import rejected: {}", e);
            Err((StatusCode::BAD_REQUEST, e.to_string()))
        }
    }
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn send_json(socket: &mut WebSocket, message: &ServerMessage) -> bool {
    match serde_json::to_string(message) {
        Ok(payload) => socket.send(Message::Text(payload.into())).await.is_ok(),
        Err(e) => {
            log::error!("Failed to serialize message for client: {}", e);
            true
        }
    }
}

async fn handle_socket(mut socket: WebSocket, state: ApiState) {
    let mut state_rx = state.state_rx.clone();
    let mut event_rx = state.event_tx.subscribe();
    let mut session = EditSession::new();

    log::info!("New WebSocket client connected.");
    let initial = ServerMessage::State(state_rx.borrow_and_update().clone());
    if !send_json(&mut socket, &initial).await {
        return;
    }

    loop {
        tokio::select! {
            Ok(()) = state_rx.changed() => {
                let message = ServerMessage::State(state_rx.borrow_and_update().clone());
                if !send_json(&mut socket, &message).await {
                    log::info!("WebSocket client disconnected (send error).");
                    break;
                }
            }

            event = event_rx.recv() => match event {
                Ok(event) => {
                    if !send_json(&mut socket, &ServerMessage::Event(event)).await {
                        log::info!("WebSocket client disconnected (send error).");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("WebSocket client lagged, {} events dropped.", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },

            message = socket.recv() => match message {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientMessage>(text.as_str()) {
                        Ok(ClientMessage::Playback(command)) => {
                            if state.scheduler_tx.send(command).await.is_err() {
                                log::error!("Failed to send command to CueScheduler.");
                                break;
                            }
                        }
                        Ok(ClientMessage::Edit(command)) => {
                            if let Err(e) = handle_edit(&state, &mut session, command).await {
                                log::warn!("Edit rejected: {}", e);
                                let rejected = ServerMessage::Event(UiEvent::EditRejected {
                                    reason: e.to_string(),
                                });
                                if !send_json(&mut socket, &rejected).await {
                                    break;
                                }
                            }
                        }
                        Err(e) => log::error!("Invalid message received: {}", e),
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    log::info!("WebSocket client sent close message.");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => {
                    log::info!("WebSocket client disconnected.");
                    break;
                }
            },
        }
    }

    // a gesture never outlives its connection
    session.release();
}

/// Applies one edit message for the connection owning `session`. Committed
/// shows go through the model manager, so a running show reschedules itself.
pub async fn handle_edit(
    state: &ApiState,
    session: &mut EditSession,
    command: EditCommand,
) -> Result<(), EditError> {
    match command {
        EditCommand::BeginDrag {
            sequence_id,
            pointer,
            viewport,
        } => {
            let model = state.model_manager.read().await;
            session.begin_sequence_drag(&model, sequence_id, pointer, viewport)?;
        }
        EditCommand::BeginResize {
            sequence_id,
            pointer,
            viewport,
        } => {
            let model = state.model_manager.read().await;
            session.begin_sequence_resize(&model, sequence_id, pointer, viewport)?;
        }
        EditCommand::BeginAudioDrag { pointer, viewport } => {
            let model = state.model_manager.read().await;
            session.begin_audio_drag(&model, pointer, viewport)?;
        }
        EditCommand::PointerMove { pointer } => {
            state
                .model_manager
                .apply_gesture(|model| session.pointer_moved(model, pointer))
                .await;
        }
        EditCommand::Release => {
            session.release();
        }
        EditCommand::Seek { pointer, viewport } => {
            if let Some(position_ms) = session.seek(pointer, viewport) {
                if let Err(e) = state
                    .scheduler_tx
                    .send(PlaybackCommand::Seek { position_ms })
                    .await
                {
                    log::error!("Failed to send seek to CueScheduler: {}", e);
                }
            }
        }
        EditCommand::AddSequence { draft } => {
            state.model_manager.add_sequence(draft).await?;
        }
        EditCommand::RemoveSequence { sequence_id } => {
            state.model_manager.remove_sequence(&sequence_id).await;
        }
    }
    Ok(())
}
