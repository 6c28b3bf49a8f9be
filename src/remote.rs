//! Remote-control channel contract.
//!
//! The clock behaves like an RGB light on a publish/subscribe bus: it
//! listens on three command topics (power, brightness, colour), echoes the
//! new state on matching state topics, and announces itself with a
//! discovery record every time the link (re)connects.
//!
//! The transport itself sits behind [`RemoteLink`]. [`BridgeLink`] is an
//! in-process implementation fed by the HTTP API.

use crate::Color;
use crate::error::RemoteError;
use crate::is_running;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

// ── Topics ──────────────────────────────────────────────────────────

/// Topic names of one clock.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct RemoteTopics {
    pub command: String,
    pub state: String,
    pub brightness_command: String,
    pub brightness_state: String,
    pub rgb_command: String,
    pub rgb_state: String,
    pub discovery: String,
}

impl RemoteTopics {
    /// Derive the command/state topics from `prefix`.
    pub fn new(prefix: &str, discovery: &str) -> Self {
        let prefix = prefix.trim_end_matches('/');
        Self {
            command: format!("{prefix}/set"),
            state: format!("{prefix}/state"),
            brightness_command: format!("{prefix}/set_brightness"),
            brightness_state: format!("{prefix}/brightness"),
            rgb_command: format!("{prefix}/set_color_rgb"),
            rgb_state: format!("{prefix}/color_rgb"),
            discovery: discovery.to_string(),
        }
    }

    /// Topics the clock subscribes to.
    pub fn subscriptions(&self) -> [&str; 3] {
        [&self.command, &self.brightness_command, &self.rgb_command]
    }

    /// Parse an inbound message into a command.
    pub fn parse(&self, message: &RemoteMessage) -> Result<RemoteCommand, RemoteError> {
        let payload = String::from_utf8_lossy(&message.payload);
        let malformed = || RemoteError::MalformedPayload {
            topic: message.topic.clone(),
            payload: payload.to_string(),
        };

        if message.topic == self.command {
            match payload.trim() {
                "ON" => Ok(RemoteCommand::Power(true)),
                "OFF" => Ok(RemoteCommand::Power(false)),
                _ => Err(malformed()),
            }
        } else if message.topic == self.brightness_command {
            parse_channel(&payload)
                .map(RemoteCommand::Brightness)
                .ok_or_else(malformed)
        } else if message.topic == self.rgb_command {
            parse_rgb(&payload)
                .map(RemoteCommand::Color)
                .ok_or_else(malformed)
        } else {
            Err(RemoteError::UnknownTopic(message.topic.clone()))
        }
    }

    /// The state echo for an applied command.
    pub fn echo(&self, command: &RemoteCommand) -> Publication {
        match *command {
            RemoteCommand::Power(on) => Publication {
                topic: self.state.clone(),
                payload: if on { "ON" } else { "OFF" }.to_string(),
            },
            RemoteCommand::Brightness(value) => Publication {
                topic: self.brightness_state.clone(),
                payload: value.to_string(),
            },
            RemoteCommand::Color(c) => Publication {
                topic: self.rgb_state.clone(),
                payload: format!("{},{},{}", c.r, c.g, c.b),
            },
        }
    }
}

impl Default for RemoteTopics {
    fn default() -> Self {
        Self::new("home/rgb_clock", "homeassistant/light/rgb_clock/config")
    }
}

/// A decimal 0-255, surrounding whitespace allowed.
fn parse_channel(s: &str) -> Option<u8> {
    let s = s.trim();
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// `R,G,B` with each channel 0-255.
fn parse_rgb(s: &str) -> Option<Color> {
    let mut parts = s.split(',').map(parse_channel);
    let color = Color::new(parts.next()??, parts.next()??, parts.next()??);
    match parts.next() {
        None => Some(color),
        Some(_) => None,
    }
}

// ── Messages ────────────────────────────────────────────────────────

/// An inbound message as received from the bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl RemoteMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// A validated remote command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoteCommand {
    Power(bool),
    Brightness(u8),
    Color(Color),
}

/// An outbound message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Publication {
    pub topic: String,
    pub payload: String,
}

// ── Discovery ───────────────────────────────────────────────────────

/// Device metadata included in the discovery record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub ids: Vec<String>,
    #[serde(rename = "mdl")]
    pub model: String,
    #[serde(rename = "mf")]
    pub manufacturer: String,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            name: "RGB Clock".to_string(),
            ids: vec!["rgb_clock".to_string()],
            model: "7-Segment RGB clock with WS2812 LEDs".to_string(),
            manufacturer: "xatLabs".to_string(),
        }
    }
}

/// Announcement describing the clock as a dimmable RGB light.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discovery {
    pub name: String,
    pub unique_id: String,
    pub command_topic: String,
    pub state_topic: String,
    pub brightness_command_topic: String,
    pub brightness_state_topic: String,
    pub rgb_command_topic: String,
    pub rgb_state_topic: String,
    pub device: DeviceInfo,
}

impl Discovery {
    pub fn new(topics: &RemoteTopics, device: DeviceInfo) -> Self {
        Self {
            name: device.name.clone(),
            unique_id: device.ids.first().cloned().unwrap_or_default(),
            command_topic: topics.command.clone(),
            state_topic: topics.state.clone(),
            brightness_command_topic: topics.brightness_command.clone(),
            brightness_state_topic: topics.brightness_state.clone(),
            rgb_command_topic: topics.rgb_command.clone(),
            rgb_state_topic: topics.rgb_state.clone(),
            device,
        }
    }

    /// The record as a publication on the discovery topic.
    pub fn publication(&self, topics: &RemoteTopics) -> Result<Publication, serde_json::Error> {
        Ok(Publication {
            topic: topics.discovery.clone(),
            payload: serde_json::to_string(self)?,
        })
    }
}

// ── Link ────────────────────────────────────────────────────────────

/// Transport to the publish/subscribe bus.
pub trait RemoteLink {
    fn is_connected(&self) -> bool;

    /// Try once to (re)connect and subscribe to `subscriptions`.
    fn connect(&mut self, subscriptions: &[&str]) -> Result<(), RemoteError>;

    fn publish(&mut self, publication: &Publication) -> Result<(), RemoteError>;

    /// Next pending inbound message, without blocking.
    fn poll(&mut self) -> Option<RemoteMessage>;
}

/// Keep calling [`RemoteLink::connect`] with a fixed `backoff` until it
/// succeeds or `running` goes false. Returns whether the link is up.
///
/// This blocks the caller; nothing else on the control loop runs meanwhile.
pub fn connect_with_backoff<L: RemoteLink>(
    link: &mut L,
    subscriptions: &[&str],
    backoff: Duration,
    running: &AtomicBool,
) -> bool {
    let mut attempt: u32 = 0;
    while is_running(running) {
        attempt += 1;
        match link.connect(subscriptions) {
            Ok(()) => {
                tracing::info!("Remote channel connected after {} attempt(s)", attempt);
                return true;
            }
            Err(e) => {
                tracing::warn!(
                    "Remote channel connect attempt {} failed: {}, retrying in {}ms",
                    attempt,
                    e,
                    backoff.as_millis()
                );
                thread::sleep(backoff);
            }
        }
    }
    false
}

/// Retained publications by topic, shared with readers (the HTTP API).
pub type Retained = Arc<Mutex<BTreeMap<String, String>>>;

/// In-process link: inbound messages come from a channel, outbound
/// publications are retained per topic.
pub struct BridgeLink {
    inbound: Receiver<RemoteMessage>,
    retained: Retained,
    connected: bool,
    closed: bool,
}

impl BridgeLink {
    pub fn new(inbound: Receiver<RemoteMessage>) -> Self {
        Self {
            inbound,
            retained: Arc::new(Mutex::new(BTreeMap::new())),
            connected: false,
            closed: false,
        }
    }

    pub fn retained(&self) -> Retained {
        self.retained.clone()
    }
}

impl RemoteLink for BridgeLink {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn connect(&mut self, subscriptions: &[&str]) -> Result<(), RemoteError> {
        if self.closed {
            return Err(RemoteError::Unavailable("bridge channel closed".to_string()));
        }
        tracing::debug!("Bridge subscribed to {:?}", subscriptions);
        self.connected = true;
        Ok(())
    }

    fn publish(&mut self, publication: &Publication) -> Result<(), RemoteError> {
        if !self.connected {
            return Err(RemoteError::PublishFailed(publication.topic.clone()));
        }
        tracing::debug!("Publish {} = {}", publication.topic, publication.payload);
        self.retained
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(publication.topic.clone(), publication.payload.clone());
        Ok(())
    }

    fn poll(&mut self) -> Option<RemoteMessage> {
        if !self.connected {
            return None;
        }
        match self.inbound.try_recv() {
            Ok(message) => Some(message),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                tracing::warn!("Remote bridge channel closed");
                self.connected = false;
                self.closed = true;
                None
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::sync::mpsc;

    fn topics() -> RemoteTopics {
        RemoteTopics::default()
    }

    #[test]
    fn topics_derive_from_prefix() {
        let t = RemoteTopics::new("home/clock/", "disc");
        assert_eq!(t.command, "home/clock/set");
        assert_eq!(t.brightness_state, "home/clock/brightness");
        assert_eq!(t.rgb_command, "home/clock/set_color_rgb");
        assert_eq!(t.discovery, "disc");
        assert_eq!(
            t.subscriptions(),
            ["home/clock/set", "home/clock/set_brightness", "home/clock/set_color_rgb"]
        );
    }

    #[rstest]
    #[case("home/rgb_clock/set", "ON", RemoteCommand::Power(true))]
    #[case("home/rgb_clock/set", "OFF", RemoteCommand::Power(false))]
    #[case("home/rgb_clock/set_brightness", "0", RemoteCommand::Brightness(0))]
    #[case("home/rgb_clock/set_brightness", " 255\n", RemoteCommand::Brightness(255))]
    #[case("home/rgb_clock/set_color_rgb", "255,128,0", RemoteCommand::Color(Color::new(255, 128, 0)))]
    #[case("home/rgb_clock/set_color_rgb", "1, 2 ,3", RemoteCommand::Color(Color::new(1, 2, 3)))]
    fn test_parse_commands(#[case] topic: &str, #[case] payload: &str, #[case] expected: RemoteCommand) {
        let message = RemoteMessage::new(topic, payload);
        assert_eq!(topics().parse(&message).unwrap(), expected);
    }

    #[rstest]
    #[case("home/rgb_clock/set", "on")]
    #[case("home/rgb_clock/set", "")]
    #[case("home/rgb_clock/set_brightness", "256")]
    #[case("home/rgb_clock/set_brightness", "-1")]
    #[case("home/rgb_clock/set_brightness", "12a")]
    #[case("home/rgb_clock/set_color_rgb", "1,2")]
    #[case("home/rgb_clock/set_color_rgb", "1,2,3,4")]
    #[case("home/rgb_clock/set_color_rgb", "1,2,300")]
    #[case("home/rgb_clock/set_color_rgb", "#ff0000")]
    fn test_parse_rejects_malformed(#[case] topic: &str, #[case] payload: &str) {
        let message = RemoteMessage::new(topic, payload);
        assert!(matches!(
            topics().parse(&message),
            Err(RemoteError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn parse_rejects_unknown_topic() {
        let message = RemoteMessage::new("home/rgb_clock/state", "ON");
        assert!(matches!(topics().parse(&message), Err(RemoteError::UnknownTopic(_))));
    }

    #[rstest]
    #[case(RemoteCommand::Power(true), "home/rgb_clock/state", "ON")]
    #[case(RemoteCommand::Power(false), "home/rgb_clock/state", "OFF")]
    #[case(RemoteCommand::Brightness(42), "home/rgb_clock/brightness", "42")]
    #[case(RemoteCommand::Color(Color::new(1, 20, 255)), "home/rgb_clock/color_rgb", "1,20,255")]
    fn test_echo(#[case] command: RemoteCommand, #[case] topic: &str, #[case] payload: &str) {
        let p = topics().echo(&command);
        assert_eq!(p.topic, topic);
        assert_eq!(p.payload, payload);
    }

    #[test]
    fn discovery_payload_describes_the_light() {
        let topics = topics();
        let publication = Discovery::new(&topics, DeviceInfo::default())
            .publication(&topics)
            .unwrap();
        assert_eq!(publication.topic, "homeassistant/light/rgb_clock/config");

        let json: serde_json::Value = serde_json::from_str(&publication.payload).unwrap();
        assert_eq!(json["name"], "RGB Clock");
        assert_eq!(json["unique_id"], "rgb_clock");
        assert_eq!(json["command_topic"], "home/rgb_clock/set");
        assert_eq!(json["rgb_state_topic"], "home/rgb_clock/color_rgb");
        assert_eq!(json["device"]["ids"][0], "rgb_clock");
        assert_eq!(json["device"]["mf"], "xatLabs");
        assert_eq!(json["device"]["mdl"], "7-Segment RGB clock with WS2812 LEDs");
    }

    #[test]
    fn bridge_delivers_only_when_connected() {
        let (tx, rx) = mpsc::channel();
        let mut link = BridgeLink::new(rx);
        tx.send(RemoteMessage::new("a", "b")).unwrap();

        assert!(!link.is_connected());
        assert_eq!(link.poll(), None);
        link.connect(&[]).unwrap();
        assert_eq!(link.poll(), Some(RemoteMessage::new("a", "b")));
        assert_eq!(link.poll(), None);
    }

    #[test]
    fn bridge_retains_last_publication_per_topic() {
        let (_tx, rx) = mpsc::channel();
        let mut link = BridgeLink::new(rx);
        let retained = link.retained();
        link.connect(&[]).unwrap();
        for payload in ["1", "2"] {
            link.publish(&Publication {
                topic: "t".to_string(),
                payload: payload.to_string(),
            })
            .unwrap();
        }
        assert_eq!(retained.lock().unwrap().get("t").map(String::as_str), Some("2"));
    }

    #[test]
    fn bridge_goes_down_when_senders_drop() {
        let (tx, rx) = mpsc::channel::<RemoteMessage>();
        let mut link = BridgeLink::new(rx);
        link.connect(&[]).unwrap();
        drop(tx);
        assert_eq!(link.poll(), None);
        assert!(!link.is_connected());
        assert!(link.connect(&[]).is_err());
    }

    struct FlakyLink {
        failures_left: u32,
        attempts: u32,
    }

    impl RemoteLink for FlakyLink {
        fn is_connected(&self) -> bool {
            self.failures_left == 0
        }

        fn connect(&mut self, _: &[&str]) -> Result<(), RemoteError> {
            self.attempts += 1;
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(RemoteError::Unavailable("down".to_string()));
            }
            Ok(())
        }

        fn publish(&mut self, _: &Publication) -> Result<(), RemoteError> {
            Ok(())
        }

        fn poll(&mut self) -> Option<RemoteMessage> {
            None
        }
    }

    #[test]
    fn backoff_retries_until_connected() {
        let mut link = FlakyLink {
            failures_left: 3,
            attempts: 0,
        };
        let running = AtomicBool::new(true);
        assert!(connect_with_backoff(&mut link, &[], Duration::from_millis(1), &running));
        assert_eq!(link.attempts, 4);
    }

    #[test]
    fn backoff_gives_up_on_shutdown() {
        let mut link = FlakyLink {
            failures_left: u32::MAX,
            attempts: 0,
        };
        let running = AtomicBool::new(false);
        assert!(!connect_with_backoff(&mut link, &[], Duration::from_millis(1), &running));
        assert_eq!(link.attempts, 0);
    }
}
