use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::{header, HeaderMap},
    response::Response,
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::classifier::{AnomalyModel, WindowClassifier};
use crate::config::RelayConfig;
use crate::device::DeviceSlot;
use crate::hub::DashboardHub;
use crate::hysteresis::AnomalyDebouncer;
use crate::types::{ConnectionRole, DeviceMessage, EcgDataPoint, Reading, ServerMessage};
use crate::window::SignalWindow;

/// Shared application state
#[derive(Clone)]
pub struct RelayState {
    pub hub: DashboardHub,
    pub device: DeviceSlot,
    pub classifier: WindowClassifier,
    pub window_size: usize,
    pub alert_threshold: u32,
    pub shutdown: watch::Receiver<bool>,
}

impl RelayState {
    pub fn new(
        model: Arc<dyn AnomalyModel>,
        config: &RelayConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            hub: DashboardHub::new(),
            device: DeviceSlot::new(),
            classifier: WindowClassifier::new(model, config.min_valid_signals),
            window_size: config.window_size,
            alert_threshold: config.alert_threshold,
            shutdown,
        }
    }
}

/// Build the relay router: websocket endpoint plus HTTP health and status routes.
pub fn relay_router(state: RelayState) -> Router {
    Router::new()
        .route("/ws", get(handle_websocket))
        .route("/health", get(health_check))
        .route("/api/status", get(relay_status))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// Snapshot of the relay for HTTP consumers.
async fn relay_status(State(state): State<RelayState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "device_connected": state.device.is_connected(),
        "device_connected_at": state.device.connected_at(),
        "dashboard_clients": state.hub.observer_count(),
        "window_size": state.window_size,
    }))
}

/// Handle WebSocket upgrade: negotiate the role and route to the matching
/// session handler. Each connection runs isolated in its own task.
pub async fn handle_websocket(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<RelayState>,
) -> Response {
    let role = negotiated_role(&headers);
    ws.protocols(["device", "dashboard"])
        .on_upgrade(move |socket| async move {
            match role {
                ConnectionRole::Device => handle_device_socket(socket, state).await,
                ConnectionRole::Dashboard => handle_dashboard_socket(socket, state).await,
            }
        })
}

/// Read the declared role from the subprotocol header. Absent or unrecognized
/// tokens fall back to the dashboard role.
fn negotiated_role(headers: &HeaderMap) -> ConnectionRole {
    let Some(value) = headers
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
    else {
        info!("No subprotocol offered, handling as dashboard connection");
        return ConnectionRole::Dashboard;
    };

    for token in value.split(',').map(str::trim) {
        if let Some(role) = ConnectionRole::from_protocol(token) {
            info!("New connection with subprotocol: {}", token);
            return role;
        }
    }

    warn!(
        "Unrecognized subprotocol '{}', handling as dashboard connection",
        value
    );
    ConnectionRole::Dashboard
}

/// Best-effort close frame for unexpected transport failures. The peer may
/// already be gone, so send errors are ignored at the call sites.
fn internal_error_close() -> Message {
    Message::Close(Some(CloseFrame {
        code: close_code::ERROR,
        reason: "Internal server error".into(),
    }))
}

/// Per-session state of the active device connection. The signal window and
/// hysteresis counter live here, owned by this task alone.
struct DeviceSession {
    id: Uuid,
    state: RelayState,
    window: SignalWindow,
    debouncer: AnomalyDebouncer,
    anomaly_flag: bool,
}

impl DeviceSession {
    fn new(id: Uuid, state: RelayState) -> Self {
        let window = SignalWindow::new(state.window_size);
        let debouncer = AnomalyDebouncer::new(state.alert_threshold);
        Self {
            id,
            state,
            window,
            debouncer,
            anomaly_flag: false,
        }
    }

    /// Process one inbound device frame. A single bad message never tears the
    /// session down; it is dropped with a warning.
    async fn process_text(&mut self, text: &str) {
        let msg: DeviceMessage = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Dropping unrecognized device message: {}", e);
                return;
            }
        };

        // Any well-formed message is evidence of liveness
        self.state.device.heartbeat(self.id);

        match msg {
            DeviceMessage::Ping => {}
            DeviceMessage::Error { message } => {
                let text = message.unwrap_or_else(|| "ECG leads disconnected".to_string());
                warn!("Device reported error: {}", text);
                self.state.hub.broadcast(&ServerMessage::warning(text));
            }
            DeviceMessage::Data { value } => {
                let raw = value.unwrap_or(serde_json::Value::Null);
                self.ingest(&raw).await;
            }
        }
    }

    async fn ingest(&mut self, raw: &serde_json::Value) {
        let reading = match Reading::from_raw(raw) {
            Ok(reading) => reading,
            Err(e) => {
                warn!("Dropping invalid ECG value: {}", e);
                return;
            }
        };

        self.window.push(reading.value);

        if self.window.is_full() {
            let classification = self.state.classifier.evaluate(&self.window).await;
            self.anomaly_flag = classification.is_anomalous();
            if self.debouncer.observe(classification.label) {
                warn!(
                    "Anomaly escalation after {} consecutive anomalous windows",
                    self.debouncer.consecutive_anomalies()
                );
                self.state
                    .hub
                    .broadcast(&ServerMessage::alert("ECG Anomaly Detected!"));
            }
        }

        // Every validated reading goes out, with the (possibly stale) flag
        self.state.hub.broadcast(&EcgDataPoint {
            timestamp: reading.timestamp,
            value: reading.value,
            is_anomaly: self.anomaly_flag,
        });
    }
}

/// Handle the single device connection.
async fn handle_device_socket(mut socket: WebSocket, state: RelayState) {
    let session_id = match state.device.claim() {
        Ok(id) => id,
        Err(e) => {
            warn!("Rejecting duplicate device connection: {}", e);
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: "Another device already connected".into(),
                })))
                .await;
            return;
        }
    };

    info!("Device connected, session {}", session_id);
    state.hub.broadcast(&ServerMessage::status("Device connected"));

    let mut session = DeviceSession::new(session_id, state.clone());
    let mut shutdown = state.shutdown.clone();
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => session.process_text(&text).await,
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Device closed connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("Device socket error: {}", e);
                        let _ = sender.send(internal_error_close()).await;
                        break;
                    }
                    None => break,
                }
            }
            _ = shutdown.changed() => {
                let _ = sender
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::NORMAL,
                        reason: "Server shutting down".into(),
                    })))
                    .await;
                break;
            }
        }
    }

    // Announce exactly once; if the monitor already expired this session the
    // release is a no-op and the timeout status has been broadcast instead.
    if state.device.release(session_id) {
        info!("Device disconnected, session {}", session_id);
        state
            .hub
            .broadcast(&ServerMessage::status("Device disconnected"));
    }
}

/// Handle one dashboard observer connection.
async fn handle_dashboard_socket(socket: WebSocket, state: RelayState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let observer_id = state.hub.register(tx);
    info!("Dashboard client {} connected", observer_id);

    // Initial status snapshot, sent directly before any broadcast forwarding
    let snapshot = ServerMessage::snapshot("Connected to server", state.device.is_connected());
    match serde_json::to_string(&snapshot) {
        Ok(json) => {
            if sender.send(Message::Text(json.into())).await.is_err() {
                state.hub.unregister(&observer_id);
                return;
            }
        }
        Err(e) => error!("Failed to serialize status snapshot: {}", e),
    }

    let mut shutdown = state.shutdown.clone();

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(msg) => {
                        if sender.send(msg).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    // Dashboards are pure observers; other frames are ignored
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("Dashboard socket error: {}", e);
                        let _ = sender.send(internal_error_close()).await;
                        break;
                    }
                }
            }
            _ = shutdown.changed() => {
                let _ = sender
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::NORMAL,
                        reason: "Server shutting down".into(),
                    })))
                    .await;
                break;
            }
        }
    }

    state.hub.unregister(&observer_id);
    info!("Dashboard client {} disconnected", observer_id);
}
