//! WebSocket driver for export sessions.

use std::sync::Arc;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use binder_core::{Connector, ExportEvent, RobotConfig};
use binder_session::ExportController;
use futures::{SinkExt, StreamExt};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::protocol::{ClientMessage, ServerMessage};

/// WebSocket handler state.
pub struct WsState<C: Connector> {
    pub controller: Arc<ExportController<C>>,
    /// Robot settings requests are applied on top of.
    pub robot: Arc<RobotConfig>,
}

impl<C: Connector> Clone for WsState<C> {
    fn clone(&self) -> Self {
        Self {
            controller: Arc::clone(&self.controller),
            robot: Arc::clone(&self.robot),
        }
    }
}

impl<C: Connector> WsState<C> {
    #[must_use]
    pub fn new(controller: Arc<ExportController<C>>, robot: RobotConfig) -> Self {
        Self {
            controller,
            robot: Arc::new(robot),
        }
    }
}

/// WebSocket upgrade handler.
///
/// Use this as an Axum route handler.
pub async fn ws_handler<C>(
    ws: WebSocketUpgrade,
    State(state): State<WsState<C>>,
) -> impl IntoResponse
where
    C: Connector + 'static,
{
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket<C>(socket: WebSocket, state: WsState<C>)
where
    C: Connector + 'static,
{
    let (mut sender, mut receiver) = socket.split();

    // Channel for sending messages to the client
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize message: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let event_task = tokio::spawn(forward_events(
        state.controller.events().get_receiver(),
        tx.clone(),
    ));

    let mut exports = Vec::new();
    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s.into(),
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!("WebSocket error: {e}");
                break;
            }
        };

        let client_msg: ClientMessage = match serde_json::from_str(&msg) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Invalid client message: {e}");
                let _ = tx.send(ServerMessage::error(format!("Invalid message: {e}")));
                continue;
            }
        };

        if let Some(export) = dispatch(&state, client_msg, &tx) {
            exports.push(export);
        }
    }

    // The driver that started an export is gone; nobody is left to stop it.
    if exports.iter().any(|export| !export.is_finished()) {
        tracing::warn!("Driver disconnected during export, stopping");
        state.controller.stop();
    }

    event_task.abort();
    send_task.abort();
}

async fn forward_events(
    mut events: broadcast::Receiver<ExportEvent>,
    tx: mpsc::UnboundedSender<ServerMessage>,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if tx.send(ServerMessage::Event { event }).is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::debug!(missed, "Event forwarder lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Act on one client message. Returns the task running an export it started.
fn dispatch<C>(
    state: &WsState<C>,
    msg: ClientMessage,
    tx: &mpsc::UnboundedSender<ServerMessage>,
) -> Option<JoinHandle<()>>
where
    C: Connector + 'static,
{
    match msg {
        ClientMessage::Ping => {
            let _ = tx.send(ServerMessage::Pong);
        }
        ClientMessage::Status => {
            let _ = tx.send(ServerMessage::Status {
                state: state.controller.state(),
                export_id: state.controller.active_export(),
                frame_index: state.controller.position(),
            });
        }
        ClientMessage::Stop => {
            if !state.controller.stop() {
                let _ = tx.send(ServerMessage::error("No export running"));
            }
        }
        ClientMessage::Cancel => {
            if !state.controller.cancel() {
                let _ = tx.send(ServerMessage::error("No export running"));
            }
        }
        ClientMessage::StartExport(request) => {
            let (recording, params) = match request.into_export(&state.robot) {
                Ok(export) => export,
                Err(e) => {
                    let _ = tx.send(ServerMessage::error(e.to_string()));
                    return None;
                }
            };
            let controller = Arc::clone(&state.controller);
            let tx = tx.clone();
            return Some(tokio::spawn(async move {
                let reply = match controller.run_export(&params, &recording).await {
                    Ok(outcome) => ServerMessage::finished(&outcome),
                    Err(e) => ServerMessage::export_failed(&e),
                };
                let _ = tx.send(reply);
            }));
        }
    }
    None
}

/// Create WebSocket router.
///
/// # Example
/// ```ignore
/// let app = Router::new()
///     .merge(create_ws_router(controller, config.robot));
/// ```
#[must_use]
pub fn create_ws_router<C>(controller: Arc<ExportController<C>>, robot: RobotConfig) -> axum::Router
where
    C: Connector + 'static,
{
    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler::<C>))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(WsState::new(controller, robot))
}

#[cfg(test)]
mod tests {
    use binder_core::{ExportState, JOINT_COUNT, Termination};
    use binder_robot::mock::MockConnector;
    use tokio_test::assert_ok;

    use super::*;
    use crate::protocol::ExportRequest;

    fn state(connector: MockConnector) -> WsState<MockConnector> {
        let robot = RobotConfig {
            host: Some("mock".to_string()),
            ..RobotConfig::default()
        };
        WsState::new(Arc::new(ExportController::new(connector)), robot)
    }

    fn request(frames: usize, looped: bool) -> ExportRequest {
        #[allow(clippy::cast_precision_loss)]
        let poses = (0..frames).map(|i| [i as f64 * 0.001; JOINT_COUNT]).collect();
        ExportRequest {
            poses,
            fps: 25.0,
            sample_rate: None,
            range: None,
            looped,
            acknowledge_loop_warning: false,
            host: None,
        }
    }

    #[tokio::test]
    async fn test_ping_and_status() {
        let state = state(MockConnector::new());
        let (tx, mut rx) = mpsc::unbounded_channel();

        assert!(dispatch(&state, ClientMessage::Ping, &tx).is_none());
        assert_eq!(rx.recv().await, Some(ServerMessage::Pong));

        dispatch(&state, ClientMessage::Status, &tx);
        assert_eq!(
            rx.recv().await,
            Some(ServerMessage::Status {
                state: ExportState::Idle,
                export_id: None,
                frame_index: None,
            })
        );
    }

    #[tokio::test]
    async fn test_stop_without_export_is_error() {
        let state = state(MockConnector::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        dispatch(&state, ClientMessage::Stop, &tx);
        assert!(matches!(rx.recv().await, Some(ServerMessage::Error { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_export_reports_finish() {
        let connector = MockConnector::new();
        let state = state(connector.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let export = dispatch(&state, ClientMessage::StartExport(request(10, false)), &tx).unwrap();
        assert_ok!(export.await);

        let reply = rx.recv().await.unwrap();
        let ServerMessage::ExportFinished {
            termination,
            frames,
            frames_sent,
            ..
        } = reply
        else {
            panic!("unexpected reply {reply:?}");
        };
        assert_eq!(termination, Some(Termination::Completed));
        assert_eq!(frames, 10);
        assert_eq!(frames_sent, 10);
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_looped_export_stopped_by_message() {
        let state = state(MockConnector::new());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let export = dispatch(&state, ClientMessage::StartExport(request(10, true)), &tx).unwrap();
        while state.controller.state() != ExportState::Streaming {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        dispatch(&state, ClientMessage::Stop, &tx);
        export.await.unwrap();

        assert!(matches!(
            rx.recv().await,
            Some(ServerMessage::ExportFinished {
                termination: Some(Termination::Stopped),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_invalid_request_is_error() {
        let state = state(MockConnector::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(dispatch(&state, ClientMessage::StartExport(request(0, false)), &tx).is_none());
        assert!(matches!(rx.recv().await, Some(ServerMessage::Error { report: None, .. })));
    }
}
