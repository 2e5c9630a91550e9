/**
 * API REST SENSORSIM - Administration du simulateur
 *
 * RÔLE :
 * Expose le modèle machine aux outils humains (dashboard, scripts, CLI) :
 * inventaire des canaux, état global, polling, persistance.
 *
 * FONCTIONNEMENT :
 * - Serveur Axum, routes versionnées sous /v0.1 (sauf /health)
 * - Les handlers prennent le verrou du modèle machine sans await pendant
 *   qu'il est tenu
 * - `SimError` -> code HTTP dans `ApiError` (409 doublon, 404 absent,
 *   422 entrée invalide, 500 I/O)
 */

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::config::{ChannelSeed, KernelConfig};
use crate::errors::SimError;
use crate::machine::{MachineModel, RestoreReport};
use crate::models::{ChannelDescriptor, ChannelId, ChannelKind, Mode, SampleView, State as MachineState};
use crate::state::Shared;

#[derive(Clone)]
pub struct AppState {
    pub machine: Shared<MachineModel>,
    pub cfg: Shared<KernelConfig>,
}

/// Erreur métier convertie en réponse JSON `{"error": ...}`
pub struct ApiError(SimError);

impl From<SimError> for ApiError {
    fn from(e: SimError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = match &self.0 {
            SimError::DuplicateChannel(_) => StatusCode::CONFLICT,
            SimError::UnknownChannel(_) => StatusCode::NOT_FOUND,
            SimError::UnsupportedKind(_)
            | SimError::InvalidParameter(_)
            | SimError::MalformedRecord(_)
            | SimError::Json(_) => StatusCode::UNPROCESSABLE_ENTITY,
            SimError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if code.is_server_error() {
            warn!("API error: {}", self.0);
        }
        (code, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Serialize)]
struct StatusView {
    status: &'static str,
    version: &'static str,
    channels: usize,
    state: MachineState,
    mode: Mode,
    polling: bool,
}

#[derive(Serialize)]
struct ChannelView {
    name: String,
    #[serde(flatten)]
    channel: ChannelDescriptor,
    last: SampleView,
}

#[derive(Serialize, Deserialize)]
struct StateBody {
    state: MachineState,
}

#[derive(Serialize, Deserialize)]
struct ModeBody {
    mode: Mode,
}

#[derive(Debug, Default, Deserialize)]
struct PathBody {
    #[serde(default)]
    path: Option<PathBuf>,
}

pub fn build_router(app_state: AppState) -> Router {
    let api = Router::new()
        .route("/status", get(get_status))
        .route("/start", post(start_polling))
        .route("/stop", post(stop_polling))
        .route("/is_running", get(is_running))
        .route("/channels", get(list_channels).post(add_channel))
        .route("/channels/{kind}/{identifier}", delete(delete_channel))
        .route("/channels/{kind}/{identifier}/value", get(channel_value))
        .route("/machine/state", get(get_state).put(put_state))
        .route("/machine/mode", get(get_mode).put(put_mode))
        .route("/machine/message", post(post_message))
        .route("/configuration/save", post(save_configuration))
        .route("/configuration/restore", post(restore_configuration))
        .route("/example_config/{kind}", get(example_config));

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .nest("/v0.1", api)
        .with_state(app_state)
}

fn channel_id(kind: &str, identifier: u32) -> Result<ChannelId, SimError> {
    let kind: ChannelKind = kind.parse()?;
    Ok(ChannelId { kind, identifier })
}

// GET /status
async fn get_status(State(app): State<AppState>) -> Json<StatusView> {
    let machine = app.machine.lock();
    let polling = machine.is_polling();
    Json(StatusView {
        status: if polling { "running" } else { "stopped" },
        version: env!("CARGO_PKG_VERSION"),
        channels: machine.len(),
        state: machine.state(),
        mode: machine.mode(),
        polling,
    })
}

// POST /start
async fn start_polling(State(app): State<AppState>) -> Json<bool> {
    app.machine.lock().start_polling();
    Json(true)
}

// POST /stop
async fn stop_polling(State(app): State<AppState>) -> Json<bool> {
    app.machine.lock().stop_polling();
    Json(true)
}

// GET /is_running
async fn is_running(State(app): State<AppState>) -> Json<bool> {
    Json(app.machine.lock().is_polling())
}

// GET /channels
async fn list_channels(State(app): State<AppState>) -> Json<Vec<ChannelView>> {
    let handles = app.machine.lock().channels();
    let views = handles
        .iter()
        .map(|h| ChannelView {
            name: h.descriptor().name(),
            channel: h.descriptor().clone(),
            last: h.last().view(),
        })
        .collect();
    Json(views)
}

// POST /channels
async fn add_channel(State(app): State<AppState>, Json(seed): Json<ChannelSeed>) -> ApiResult<bool> {
    let descriptor = seed.descriptor();
    app.machine.lock().add_channel(descriptor, None, &seed.simulator_config)?;
    Ok(Json(true))
}

// DELETE /channels/{kind}/{identifier}
async fn delete_channel(
    State(app): State<AppState>,
    Path((kind, identifier)): Path<(String, u32)>,
) -> ApiResult<bool> {
    let id = channel_id(&kind, identifier)?;
    if !app.machine.lock().delete_channel(id) {
        return Err(SimError::UnknownChannel(id).into());
    }
    Ok(Json(true))
}

// GET /channels/{kind}/{identifier}/value (sans avancer le processus)
async fn channel_value(
    State(app): State<AppState>,
    Path((kind, identifier)): Path<(String, u32)>,
) -> ApiResult<SampleView> {
    let id = channel_id(&kind, identifier)?;
    let handle = app.machine.lock().channel(id).ok_or(SimError::UnknownChannel(id))?;
    Ok(Json(handle.last().view()))
}

async fn get_state(State(app): State<AppState>) -> Json<StateBody> {
    Json(StateBody { state: app.machine.lock().state() })
}

async fn put_state(State(app): State<AppState>, Json(body): Json<StateBody>) -> Json<StateBody> {
    let mut machine = app.machine.lock();
    machine.set_state(body.state);
    Json(StateBody { state: machine.state() })
}

async fn get_mode(State(app): State<AppState>) -> Json<ModeBody> {
    Json(ModeBody { mode: app.machine.lock().mode() })
}

async fn put_mode(State(app): State<AppState>, Json(body): Json<ModeBody>) -> Json<ModeBody> {
    let mut machine = app.machine.lock();
    machine.set_mode(body.mode);
    Json(ModeBody { mode: machine.mode() })
}

// POST /machine/message
async fn post_message(State(app): State<AppState>, Json(message): Json<Map<String, Value>>) -> Json<bool> {
    Json(app.machine.lock().handle_control_message(&message))
}

fn resolve_path(app: &AppState, body: PathBody) -> Result<PathBuf, SimError> {
    body.path
        .or_else(|| app.cfg.lock().persistence_path().map(|p| p.to_path_buf()))
        .ok_or_else(|| SimError::InvalidParameter("no configuration path given or configured".into()))
}

// POST /configuration/save
async fn save_configuration(State(app): State<AppState>, Json(body): Json<PathBody>) -> ApiResult<Value> {
    let path = resolve_path(&app, body)?;
    app.machine.lock().save(&path)?;
    info!("Configuration saved via API to {}", path.display());
    Ok(Json(json!({ "saved": path })))
}

// POST /configuration/restore
async fn restore_configuration(State(app): State<AppState>, Json(body): Json<PathBody>) -> ApiResult<RestoreReport> {
    let path = resolve_path(&app, body)?;
    let report = app.machine.lock().restore(&path)?;
    Ok(Json(report))
}

// GET /example_config/{kind}
async fn example_config(State(app): State<AppState>, Path(kind): Path<String>) -> ApiResult<Value> {
    let kind: ChannelKind = kind.parse()?;
    let machine = app.machine.lock();
    let record = machine.registry().get(kind)?.example_record()?;
    Ok(Json(record))
}
