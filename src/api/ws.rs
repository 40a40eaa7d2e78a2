//! WebSocket sessions: live proximity broadcast and historical replay.

use axum::{
    extract::{
        rejection::QueryRejection,
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::api::{AppState, Coordinates};
use crate::error::ApiError;
use crate::matcher::{MatchError, ProximityFilter, ProximitySession};
use crate::realtime::replay_frames;
use crate::store::{Topic, ENRICHED_TOPIC};

pub async fn bus_positions(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| proximity_session(socket, state))
}

#[derive(Debug, Deserialize)]
pub struct ReplayParams {
    #[serde(default = "default_speed")]
    pub speed_multiplier: f64,
}

fn default_speed() -> f64 {
    1.0
}

/// Rejects a bad multiplier before upgrading, so the client gets a 422.
pub async fn simulated(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    params: Result<Query<ReplayParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::Malformed(e.body_text()))?;
    let frames = replay_frames(state.history.all(), params.speed_multiplier, Utc::now())?;
    info!(frames = frames.len(), speed = params.speed_multiplier, "starting replay");

    Ok(ws.on_upgrade(move |mut socket| async move {
        for frame in frames {
            tokio::time::sleep(frame.wait).await;
            if send_json(&mut socket, &frame.snapshot).await.is_err() {
                debug!("replay client disconnected");
                return;
            }
        }
        let _ = socket.send(Message::Close(None)).await;
    }))
}

async fn send_json<T: Serialize>(socket: &mut WebSocket, value: &T) -> Result<(), axum::Error> {
    let json = serde_json::to_string(value).map_err(axum::Error::new)?;
    socket.send(Message::Text(json.into())).await
}

async fn close_unsupported(socket: &mut WebSocket, reason: String) {
    let frame = CloseFrame {
        code: close_code::UNSUPPORTED,
        reason: reason.into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

/// Close frame for a session that cannot go on. Store failures are the
/// server's fault (1011); anything else is the client's input (1003).
fn session_close_frame(error: &MatchError) -> CloseFrame {
    match error {
        MatchError::Store(_) => CloseFrame {
            code: close_code::ERROR,
            reason: "vehicle positions unavailable".into(),
        },
        other => CloseFrame {
            code: close_code::UNSUPPORTED,
            reason: other.to_string().into(),
        },
    }
}

async fn abort_session(socket: &mut WebSocket, error: MatchError) {
    warn!(error = %error, "proximity session aborted");
    let frame = session_close_frame(&error);
    let _ = socket.send(Message::Close(Some(frame))).await;
}

/// Waits for the client's position. `None` means the session is over.
async fn receive_origin(socket: &mut WebSocket) -> Option<Coordinates> {
    while let Some(message) = socket.recv().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Ping(_) | Message::Pong(_)) => continue,
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(Message::Binary(_)) => {
                close_unsupported(socket, "expected a JSON text frame".into()).await;
                return None;
            }
        };
        return match serde_json::from_str::<Coordinates>(text.as_str()) {
            Ok(origin) => Some(origin),
            Err(e) => {
                warn!(error = %e, "invalid client position");
                close_unsupported(socket, e.to_string()).await;
                None
            }
        };
    }
    None
}

async fn proximity_session(mut socket: WebSocket, state: AppState) {
    let Some(origin) = receive_origin(&mut socket).await else {
        return;
    };

    let filter = match ProximityFilter::around(
        origin.latitude,
        origin.longitude,
        state.proximity.ring_radius,
    ) {
        Ok(filter) => filter,
        Err(e) => {
            abort_session(&mut socket, e.into()).await;
            return;
        }
    };
    info!(
        latitude = origin.latitude,
        longitude = origin.longitude,
        cells = filter.cell_count(),
        "proximity session opened"
    );

    let topic = Topic::new(state.store.clone(), ENRICHED_TOPIC);
    let mut session = ProximitySession::new(topic, filter, &state.proximity);

    match session.initial().await {
        Ok(Some(snapshot)) => {
            if send_json(&mut socket, &snapshot).await.is_err() {
                return;
            }
        }
        Ok(None) => {}
        Err(e) => {
            abort_session(&mut socket, e).await;
            return;
        }
    }

    'session: loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break 'session,
                // Later client frames carry nothing we act on.
                Some(Ok(_)) => {}
            },
            batch = session.next_batch() => match batch {
                Ok(batch) => {
                    for snapshot in &batch {
                        if send_json(&mut socket, snapshot).await.is_err() {
                            break 'session;
                        }
                    }
                }
                Err(e) => {
                    abort_session(&mut socket, e).await;
                    break 'session;
                }
            },
        }
    }

    debug!(cursor = session.cursor().0, "proximity session closed");
}
