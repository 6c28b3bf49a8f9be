//! HTTP API server: axum router and request handlers.
//!
//! The server runs on the tokio async runtime while the control loop
//! runs on a plain `std::thread`. Configuration commands travel over a
//! `std::sync::mpsc` channel and are answered through a
//! `tokio::sync::oneshot`, so a handler only reports success once the
//! command has been persisted and rendered.
//!
//! ## Rust concepts
//! - `async fn` and `.await` for non-blocking I/O
//! - axum extractors: `State`, `Path`, `Json`
//! - `Arc` for sharing state across async tasks
//! - Serde `Deserialize` for parsing JSON request bodies
//! - `tower-http` middleware for CORS and request tracing

use crate::Color;
use crate::arbiter::{ControlSource, ForceState, RemoteState, ScheduleWindow, TimeOfDay};
use crate::colormap::ColorMapId;
use crate::config::{ConfigCommand, Configuration, Period, PeriodSettings};
use crate::engine::{ClockStatus, ConfigRequest};
use crate::error::ConfigError;
use crate::remote::{RemoteMessage, RemoteTopics, Retained};
use crate::render::segment_colors;
use crate::segment::DIGITS;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

// ── App State ────────────────────────────────────────────────────────

/// Shared application state, passed to every handler via axum's `State` extractor.
///
/// Rust concept: CLONE for Arc
/// axum clones the state for each request handler, so everything inside
/// must be cheap to clone. Channel senders and `Arc`s both are.
#[derive(Clone)]
pub struct AppState {
    /// Configuration commands for the control loop
    pub command_tx: Sender<ConfigRequest>,
    /// Inbound remote-control messages for the control loop
    pub remote_tx: Sender<RemoteMessage>,
    /// Topic names, used to validate remote messages before queueing
    pub topics: RemoteTopics,
    /// Shared clock status (control loop writes, handlers read)
    pub status: Arc<Mutex<ClockStatus>>,
    /// Unscaled colour-map colour of each segment in the last frame
    pub segments: Arc<Mutex<Vec<Color>>>,
    /// Last committed frame
    pub frame: Arc<Mutex<Vec<Color>>>,
    /// Last publication per topic on the remote channel
    pub retained: Retained,
}

// ── OpenAPI Documentation ────────────────────────────────────────────

#[derive(OpenApi)]
#[openapi(
    paths(
        get_status,
        get_config,
        get_segments,
        get_frame,
        post_color_map,
        post_brightness,
        post_custom_colors,
        post_schedule,
        post_force,
        post_control_source,
        post_remote,
        get_remote_state,
    ),
    components(schemas(
        ClockStatus,
        Configuration,
        PeriodSettings,
        ScheduleWindow,
        ForceState,
        ControlSource,
        ColorMapId,
        RemoteState,
        ColorMapRequest,
        BrightnessRequest,
        CustomColorsRequest,
        ScheduleRequest,
        ForceRequest,
        ControlSourceRequest,
        RemoteRequest,
        RemoteSnapshot,
        WhichPeriod,
    )),
    tags(
        (name = "config", description = "Persisted clock configuration"),
        (name = "remote", description = "Remote-control channel"),
        (name = "system", description = "System status endpoints"),
    ),
    info(
        title = "RGB Segment Clock API",
        version = env!("CARGO_PKG_VERSION"),
        description = "HTTP API for configuring a 4-digit RGB seven-segment clock"
    )
)]
pub struct ApiDoc;

// ── Request/Response types ───────────────────────────────────────────

/// Day or night, as used in paths and force requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WhichPeriod {
    Day,
    Night,
}

impl From<WhichPeriod> for Period {
    fn from(which: WhichPeriod) -> Self {
        match which {
            WhichPeriod::Day => Period::Day,
            WhichPeriod::Night => Period::Night,
        }
    }
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ColorMapRequest {
    /// Colour map id: 0 all white, 1 per digit, 2 per number, 3 per segment,
    /// 4 segment-level random, 5 custom 1, 6 custom 2
    #[schema(example = 2, minimum = 0, maximum = 6)]
    id: u8,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct BrightnessRequest {
    /// Brightness level (0-255)
    #[schema(example = 128, minimum = 0, maximum = 255)]
    value: i64,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CustomColorsRequest {
    /// One `#rrggbb` colour per digit position, left to right
    #[schema(example = json!(["#ff0000", "#00ff00", "#0000ff", "#ffffff"]))]
    colors: Vec<String>,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ScheduleRequest {
    /// Start of the night window
    #[schema(example = "22:00")]
    start: String,
    /// End of the night window (exclusive)
    #[schema(example = "06:30")]
    end: String,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ForceRequest {
    /// Override the schedule
    enabled: bool,
    /// The forced period
    which: WhichPeriod,
    /// Keep forcing after the schedule agrees
    #[serde(default)]
    permanent: bool,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ControlSourceRequest {
    /// `standalone` or `remote`
    #[schema(example = "standalone")]
    source: String,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct RemoteRequest {
    /// Topic the message arrived on
    #[schema(example = "home/rgb_clock/set_brightness")]
    topic: String,
    /// Raw payload
    #[schema(example = "128")]
    payload: String,
}

/// Remote state together with the retained publications.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct RemoteSnapshot {
    state: RemoteState,
    topics: RemoteTopics,
    retained: BTreeMap<String, String>,
}

// ── Request validation ──────────────────────────────────────────────

fn brightness_command(period: Period, req: &BrightnessRequest) -> Result<ConfigCommand, ConfigError> {
    let value = u8::try_from(req.value).map_err(|_| ConfigError::InvalidBrightness(req.value))?;
    Ok(ConfigCommand::SetBrightness { period, value })
}

fn custom_colors_command(slot: u8, req: &CustomColorsRequest) -> Result<ConfigCommand, ConfigError> {
    if req.colors.len() != DIGITS {
        return Err(ConfigError::InvalidColor(crate::ParseColorError(format!(
            "expected {DIGITS} colours, got {}",
            req.colors.len()
        ))));
    }
    let mut colors = [Color::BLACK; DIGITS];
    for (color, text) in colors.iter_mut().zip(&req.colors) {
        *color = text.parse::<Color>()?;
    }
    Ok(ConfigCommand::SetCustomColors { slot, colors })
}

fn schedule_command(req: &ScheduleRequest) -> Result<ConfigCommand, ConfigError> {
    let start: TimeOfDay = req.start.parse()?;
    let end: TimeOfDay = req.end.parse()?;
    Ok(ConfigCommand::SetSchedule(ScheduleWindow::new(start, end)))
}

fn force_command(req: &ForceRequest) -> ConfigCommand {
    ConfigCommand::SetForce(ForceState {
        active: req.enabled,
        night: req.which == WhichPeriod::Night,
        permanent: req.permanent,
    })
}

fn control_source_command(req: &ControlSourceRequest) -> Result<ConfigCommand, ConfigError> {
    Ok(ConfigCommand::SetControlSource(req.source.parse()?))
}

fn rejection(e: ConfigError) -> (StatusCode, String) {
    let status = match e {
        ConfigError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    };
    (status, e.to_string())
}

fn loop_gone() -> (StatusCode, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Control loop gone".to_string(),
    )
}

/// Hand a command to the control loop and wait for it to be applied.
async fn submit(
    state: &AppState,
    command: Result<ConfigCommand, ConfigError>,
) -> Result<Json<Configuration>, (StatusCode, String)> {
    let command = command.map_err(rejection)?;
    let (reply, response) = oneshot::channel();
    state
        .command_tx
        .send(ConfigRequest { command, reply })
        .map_err(|_| loop_gone())?;
    let config = response.await.map_err(|_| loop_gone())?.map_err(rejection)?;
    Ok(Json(config))
}

// ── Router ───────────────────────────────────────────────────────────

/// Build the axum router with all API endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(
            SwaggerUi::new("/docs")
                .url("/api-docs/openapi.json", ApiDoc::openapi())
                .config(utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"]).validator_url("none")),
        )
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/segments", get(get_segments))
        .route("/api/v1/frame", get(get_frame))
        .route("/api/v1/config", get(get_config))
        .route("/api/v1/config/{period}/colormap", post(post_color_map))
        .route("/api/v1/config/{period}/brightness", post(post_brightness))
        .route("/api/v1/config/custom/{slot}", post(post_custom_colors))
        .route("/api/v1/config/schedule", post(post_schedule))
        .route("/api/v1/config/force", post(post_force))
        .route("/api/v1/config/control-source", post(post_control_source))
        .route("/api/v1/remote", post(post_remote))
        .route("/api/v1/remote/state", get(get_remote_state))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Handlers ─────────────────────────────────────────────────────────

/// GET /api/v1/status — what the clock is showing
#[utoipa::path(
    get,
    path = "/api/v1/status",
    tag = "system",
    responses(
        (status = 200, description = "Current clock status", body = ClockStatus)
    )
)]
async fn get_status(State(state): State<AppState>) -> Json<ClockStatus> {
    let status = state.status.lock().unwrap_or_else(PoisonError::into_inner).clone();
    Json(status)
}

/// GET /api/v1/segments — colour-map colour of each segment, digit by digit
///
/// Brightness is not applied; combine with `brightness` from the status to
/// get what is lit.
#[utoipa::path(
    get,
    path = "/api/v1/segments",
    tag = "system",
    responses(
        (status = 200, description = "28 `#rrggbb` colours, 7 per digit in segment id order, black where unlit", body = Vec<String>)
    )
)]
async fn get_segments(State(state): State<AppState>) -> Json<Vec<String>> {
    let segments = state.segments.lock().unwrap_or_else(PoisonError::into_inner).clone();
    Json(hex_list(&segments))
}

/// GET /api/v1/frame — committed colour of each segment, brightness applied
#[utoipa::path(
    get,
    path = "/api/v1/frame",
    tag = "system",
    responses(
        (status = 200, description = "28 `#rrggbb` colours as sent to the elements", body = Vec<String>)
    )
)]
async fn get_frame(State(state): State<AppState>) -> Json<Vec<String>> {
    let frame = state.frame.lock().unwrap_or_else(PoisonError::into_inner).clone();
    Json(hex_list(&segment_colors(&frame)))
}

fn hex_list(colors: &[Color]) -> Vec<String> {
    colors.iter().map(Color::to_string).collect()
}

/// GET /api/v1/config — the persisted configuration
#[utoipa::path(
    get,
    path = "/api/v1/config",
    tag = "config",
    responses(
        (status = 200, description = "Current configuration", body = Configuration)
    )
)]
async fn get_config(State(state): State<AppState>) -> Json<Configuration> {
    let config = state
        .status
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .config
        .clone();
    Json(config)
}

/// POST /api/v1/config/{period}/colormap — select a colour map
#[utoipa::path(
    post,
    path = "/api/v1/config/{period}/colormap",
    tag = "config",
    params(("period" = WhichPeriod, Path, description = "day or night")),
    request_body = ColorMapRequest,
    responses(
        (status = 200, description = "Colour map applied", body = Configuration),
        (status = 400, description = "Unknown colour map id")
    )
)]
async fn post_color_map(
    State(state): State<AppState>,
    Path(period): Path<WhichPeriod>,
    Json(req): Json<ColorMapRequest>,
) -> Result<Json<Configuration>, (StatusCode, String)> {
    let command = ConfigCommand::SetColorMap {
        period: period.into(),
        id: req.id,
    };
    submit(&state, Ok(command)).await
}

/// POST /api/v1/config/{period}/brightness — set brightness (0-255)
#[utoipa::path(
    post,
    path = "/api/v1/config/{period}/brightness",
    tag = "config",
    params(("period" = WhichPeriod, Path, description = "day or night")),
    request_body = BrightnessRequest,
    responses(
        (status = 200, description = "Brightness applied", body = Configuration),
        (status = 400, description = "Brightness out of range")
    )
)]
async fn post_brightness(
    State(state): State<AppState>,
    Path(period): Path<WhichPeriod>,
    Json(req): Json<BrightnessRequest>,
) -> Result<Json<Configuration>, (StatusCode, String)> {
    submit(&state, brightness_command(period.into(), &req)).await
}

/// POST /api/v1/config/custom/{slot} — replace a custom colour table
#[utoipa::path(
    post,
    path = "/api/v1/config/custom/{slot}",
    tag = "config",
    params(("slot" = u8, Path, description = "1 or 2")),
    request_body = CustomColorsRequest,
    responses(
        (status = 200, description = "Colours applied", body = Configuration),
        (status = 400, description = "Bad slot or colour")
    )
)]
async fn post_custom_colors(
    State(state): State<AppState>,
    Path(slot): Path<u8>,
    Json(req): Json<CustomColorsRequest>,
) -> Result<Json<Configuration>, (StatusCode, String)> {
    submit(&state, custom_colors_command(slot, &req)).await
}

/// POST /api/v1/config/schedule — set the night window
#[utoipa::path(
    post,
    path = "/api/v1/config/schedule",
    tag = "config",
    request_body = ScheduleRequest,
    responses(
        (status = 200, description = "Schedule applied", body = Configuration),
        (status = 400, description = "Malformed time")
    )
)]
async fn post_schedule(
    State(state): State<AppState>,
    Json(req): Json<ScheduleRequest>,
) -> Result<Json<Configuration>, (StatusCode, String)> {
    submit(&state, schedule_command(&req)).await
}

/// POST /api/v1/config/force — force day or night
#[utoipa::path(
    post,
    path = "/api/v1/config/force",
    tag = "config",
    request_body = ForceRequest,
    responses(
        (status = 200, description = "Force flags applied", body = Configuration)
    )
)]
async fn post_force(
    State(state): State<AppState>,
    Json(req): Json<ForceRequest>,
) -> Result<Json<Configuration>, (StatusCode, String)> {
    submit(&state, Ok(force_command(&req))).await
}

/// POST /api/v1/config/control-source — standalone or remote
#[utoipa::path(
    post,
    path = "/api/v1/config/control-source",
    tag = "config",
    request_body = ControlSourceRequest,
    responses(
        (status = 200, description = "Control source applied", body = Configuration),
        (status = 400, description = "Unknown control source")
    )
)]
async fn post_control_source(
    State(state): State<AppState>,
    Json(req): Json<ControlSourceRequest>,
) -> Result<Json<Configuration>, (StatusCode, String)> {
    submit(&state, control_source_command(&req)).await
}

/// POST /api/v1/remote — inject a message as if it came from the remote channel
#[utoipa::path(
    post,
    path = "/api/v1/remote",
    tag = "remote",
    request_body = RemoteRequest,
    responses(
        (status = 202, description = "Message queued"),
        (status = 400, description = "Unknown topic or malformed payload")
    )
)]
async fn post_remote(
    State(state): State<AppState>,
    Json(req): Json<RemoteRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    let message = RemoteMessage::new(req.topic, req.payload);
    state
        .topics
        .parse(&message)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    state.remote_tx.send(message).map_err(|_| loop_gone())?;

    Ok(StatusCode::ACCEPTED)
}

/// GET /api/v1/remote/state — remote state and retained publications
#[utoipa::path(
    get,
    path = "/api/v1/remote/state",
    tag = "remote",
    responses(
        (status = 200, description = "Remote-control snapshot", body = RemoteSnapshot)
    )
)]
async fn get_remote_state(State(state): State<AppState>) -> Json<RemoteSnapshot> {
    let remote = state.status.lock().unwrap_or_else(PoisonError::into_inner).remote;
    let retained = state.retained.lock().unwrap_or_else(PoisonError::into_inner).clone();
    Json(RemoteSnapshot {
        state: remote,
        topics: state.topics.clone(),
        retained,
    })
}

// ── Tests ───────────────────────────────────────────────────────────
