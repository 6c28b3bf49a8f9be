//! The control loop.
//!
//! One thread owns everything that changes: the [`ConfigStore`], the
//! [`ModeArbiter`], the [`Renderer`] and the transient remote state. Work
//! arrives as configuration requests over a channel, as messages from the
//! remote link, and as periodic time refreshes. Each piece of work runs to
//! completion and ends with a full re-render, so a frame always reflects
//! one consistent configuration.
//!
//! ## Rust concepts
//! - `std::sync::mpsc` with `recv_timeout` as the loop's only wait
//! - `tokio::sync::oneshot` to answer the async HTTP handlers
//! - Generic parameters for the storage, hardware and time seams

use crate::arbiter::{ControlSource, ModeArbiter, RemoteState, Resolution, TimeOfDay};
use crate::colormap::ColorMap;
use crate::config::{ConfigCommand, ConfigStore, Configuration, Storage};
use crate::error::{ConfigError, RemoteError};
use crate::remote::{
    DeviceInfo, Discovery, Publication, RemoteCommand, RemoteLink, RemoteMessage, RemoteTopics,
    connect_with_backoff,
};
use crate::render::{FrameSink, Renderer};
use crate::segment::DisplayState;
use crate::{Color, is_running};
use chrono::Timelike;
use serde::Serialize;
use std::sync::atomic::AtomicBool;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Shown while waiting for the remote channel.
pub const STATUS_CONNECTING: i32 = -700;
/// Shown once the remote channel is up.
pub const STATUS_CONNECTED: i32 = -701;
/// Shown after the discovery record went out.
pub const STATUS_ANNOUNCED: i32 = -702;

// ── Time ────────────────────────────────────────────────────────────

/// Supplies the current time of day.
pub trait TimeSource {
    /// `None` when the time is not (yet) known.
    fn now(&mut self) -> Option<TimeOfDay>;
}

/// The host's local wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalClock;

impl TimeSource for LocalClock {
    fn now(&mut self) -> Option<TimeOfDay> {
        let now = chrono::Local::now();
        TimeOfDay::new(now.hour() as u8, now.minute() as u8).ok()
    }
}

/// Fires at most once per interval; the first check always fires.
#[derive(Clone, Debug)]
pub struct RefreshGate {
    interval: Duration,
    last: Option<Instant>,
}

impl RefreshGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Whether a refresh is due at `now`; if so the gate re-arms from `now`.
    pub fn due(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

// ── Status ──────────────────────────────────────────────────────────

/// What the clock is showing, for the HTTP API.
#[derive(Clone, Debug, Serialize, utoipa::ToSchema)]
pub struct ClockStatus {
    /// Time of day currently displayed
    #[schema(value_type = String, example = "21:45")]
    pub time: TimeOfDay,
    /// Resolved night mode
    pub night: bool,
    /// Resolved brightness (0-255)
    pub brightness: u8,
    /// Label of the colour map in use
    pub color_map: String,
    /// Which side decides what is shown
    pub control_source: ControlSource,
    /// Transient remote-control state
    pub remote: RemoteState,
    /// The persisted configuration
    pub config: Configuration,
    /// Server version
    pub version: String,
}

// ── Engine ──────────────────────────────────────────────────────────

/// Owner of all mutable clock state.
pub struct ClockEngine<St: Storage, Si: FrameSink, T: TimeSource> {
    store: ConfigStore<St>,
    arbiter: ModeArbiter,
    renderer: Renderer<Si>,
    time_source: T,
    topics: RemoteTopics,
    device: DeviceInfo,
    remote: RemoteState,
    now: TimeOfDay,
    /// Whether `now` came from the time source at least once.
    time_known: bool,
    current: Resolution,
    status: Arc<Mutex<ClockStatus>>,
}

impl<St: Storage, Si: FrameSink, T: TimeSource> ClockEngine<St, Si, T> {
    /// Build the engine and resolve the initial mode. Nothing is rendered yet.
    pub fn new(
        store: ConfigStore<St>,
        renderer: Renderer<Si>,
        mut time_source: T,
        topics: RemoteTopics,
        device: DeviceInfo,
    ) -> Self {
        let mut arbiter = ModeArbiter::new();
        let remote = RemoteState::default();
        let initial = time_source.now();
        let now = initial.unwrap_or(TimeOfDay::MIDNIGHT);
        let current = arbiter.resolve(now, store.config(), &remote);
        let status = Arc::new(Mutex::new(ClockStatus {
            time: now,
            night: current.night,
            brightness: current.brightness,
            color_map: label(&current),
            control_source: store.config().control_source,
            remote,
            config: store.config().clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }));
        Self {
            store,
            arbiter,
            renderer,
            time_source,
            topics,
            device,
            remote,
            now,
            time_known: initial.is_some(),
            current,
            status,
        }
    }

    /// Shared status, updated after every render.
    pub fn status_handle(&self) -> Arc<Mutex<ClockStatus>> {
        self.status.clone()
    }

    pub fn config(&self) -> &Configuration {
        self.store.config()
    }

    pub fn store(&self) -> &ConfigStore<St> {
        &self.store
    }

    pub fn renderer(&self) -> &Renderer<Si> {
        &self.renderer
    }

    pub fn remote_state(&self) -> &RemoteState {
        &self.remote
    }

    /// Policy resolved on the last tick.
    pub fn resolution(&self) -> &Resolution {
        &self.current
    }

    pub fn topics(&self) -> &RemoteTopics {
        &self.topics
    }

    pub fn time_source_mut(&mut self) -> &mut T {
        &mut self.time_source
    }

    /// Time of day shown on the last tick.
    pub fn now(&self) -> TimeOfDay {
        self.now
    }

    /// Re-resolve the mode and render the current time.
    ///
    /// A temporary force only expires against a time that came from the
    /// time source, never against the startup placeholder.
    pub fn update_all(&mut self) {
        let resolution = self.arbiter.resolve(self.now, self.store.config(), &self.remote);
        if resolution.force_expired {
            if self.time_known {
                self.store.clear_force();
            } else {
                tracing::debug!("Time unknown, keeping force");
            }
        }
        self.current = resolution;
        let state = DisplayState::from_number(self.now.hhmm() as i32);
        self.renderer
            .render(&state, &self.current.color_map, self.current.brightness);
        self.publish_status();
    }

    /// Fetch the time of day and redraw. Keeps the previous time if the
    /// source has none.
    pub fn refresh_time(&mut self) {
        match self.time_source.now() {
            Some(now) => {
                self.now = now;
                self.time_known = true;
            }
            None => tracing::warn!("Time source unavailable, keeping {}", self.now),
        }
        self.update_all();
    }

    /// Show an arbitrary number (status codes) with the current policy.
    pub fn show_number(&mut self, value: i32) {
        tracing::debug!("Showing {}", value);
        self.renderer.render(
            &DisplayState::from_number(value),
            &self.current.color_map,
            self.current.brightness,
        );
    }

    /// Show `8888` while ramping brightness from 0 to 255, `step` per level.
    pub fn lamp_test(&mut self, step: Duration) {
        tracing::info!("Lamp test");
        let state = DisplayState::from_number(8888);
        let map: ColorMap = self.current.color_map.clone();
        for brightness in 0..=u8::MAX {
            self.renderer.render(&state, &map, brightness);
            if !step.is_zero() {
                thread::sleep(step);
            }
        }
    }

    /// Apply a configuration command, persist it and redraw.
    pub fn configure(&mut self, command: &ConfigCommand) -> Result<Configuration, ConfigError> {
        let config = self.store.apply(command)?.clone();
        self.update_all();
        Ok(config)
    }

    /// Apply an inbound remote message and redraw. Returns the state echo.
    pub fn handle_remote(&mut self, message: &RemoteMessage) -> Result<Publication, RemoteError> {
        let command = self.topics.parse(message)?;
        match command {
            RemoteCommand::Power(on) => self.remote.on = on,
            RemoteCommand::Brightness(value) => self.remote.brightness = value,
            RemoteCommand::Color(color) => self.remote.color = color,
        }
        tracing::info!("Remote command: {:?}", command);
        self.update_all();
        Ok(self.topics.echo(&command))
    }

    /// The discovery record for this clock.
    pub fn discovery(&self) -> Discovery {
        Discovery::new(&self.topics, self.device.clone())
    }

    fn publish_status(&self) {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        status.time = self.now;
        status.night = self.current.night;
        status.brightness = self.current.brightness;
        status.color_map = label(&self.current);
        status.control_source = self.store.config().control_source;
        status.remote = self.remote;
        status.config = self.store.config().clone();
    }
}

fn label(resolution: &Resolution) -> String {
    match resolution.color_map_id {
        Some(id) => id.label().to_string(),
        None => match resolution.color_map {
            ColorMap::DigitPosition([c, ..]) => format!("Remote {c}"),
            _ => "Remote".to_string(),
        },
    }
}

// ── Control loop ────────────────────────────────────────────────────

/// A configuration command from the HTTP server, with a reply channel.
pub struct ConfigRequest {
    pub command: ConfigCommand,
    pub reply: oneshot::Sender<Result<Configuration, ConfigError>>,
}

/// Timing of the control loop.
#[derive(Clone, Copy, Debug)]
pub struct LoopSettings {
    /// Minimum time between time-of-day refreshes.
    pub refresh_interval: Duration,
    /// Fixed wait between remote reconnect attempts.
    pub reconnect_backoff: Duration,
    /// Longest wait for a request before checking the link and the clock.
    pub poll_interval: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_millis(5000),
            reconnect_backoff: Duration::from_millis(5000),
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// Run the control loop until `running` goes false or every request
/// sender is dropped.
pub fn run_loop<St, Si, T, L>(
    engine: &mut ClockEngine<St, Si, T>,
    link: &mut L,
    requests: Receiver<ConfigRequest>,
    settings: LoopSettings,
    running: &AtomicBool,
) where
    St: Storage,
    Si: FrameSink,
    T: TimeSource,
    L: RemoteLink,
{
    let topics = engine.topics().clone();
    let subscriptions = topics.subscriptions();
    let mut refresh = RefreshGate::new(settings.refresh_interval);

    tracing::info!("Control loop started");

    while is_running(running) {
        if !link.is_connected() {
            engine.show_number(STATUS_CONNECTING);
            if !connect_with_backoff(link, &subscriptions, settings.reconnect_backoff, running) {
                break;
            }
            engine.show_number(STATUS_CONNECTED);
            match engine.discovery().publication(&topics) {
                Ok(discovery) => {
                    if let Err(e) = link.publish(&discovery) {
                        tracing::warn!("Failed to publish discovery: {}", e);
                    }
                }
                Err(e) => tracing::error!("Failed to encode discovery: {}", e),
            }
            engine.show_number(STATUS_ANNOUNCED);
            engine.refresh_time();
        }

        match requests.recv_timeout(settings.poll_interval) {
            Ok(request) => {
                let result = engine.configure(&request.command);
                if let Err(e) = &result {
                    tracing::warn!("Rejected {:?}: {}", request.command, e);
                }
                if request.reply.send(result).is_err() {
                    tracing::debug!("Requester went away before the reply");
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                tracing::info!("Control loop: request channel closed, shutting down.");
                break;
            }
        }

        while let Some(message) = link.poll() {
            match engine.handle_remote(&message) {
                Ok(echo) => {
                    if let Err(e) = link.publish(&echo) {
                        tracing::warn!("Failed to publish state echo: {}", e);
                    }
                }
                Err(e) => tracing::warn!("Ignoring remote message: {}", e),
            }
        }

        if refresh.due(Instant::now()) {
            engine.refresh_time();
        }
    }

    // Leave the display dark on exit.
    engine.renderer.render(&DisplayState::blank(), &ColorMap::flat(Color::BLACK), 0);
    tracing::info!("Control loop stopped");
}

// ── Tests ───────────────────────────────────────────────────────────
