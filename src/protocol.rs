//! Event-bus protocol shared by the countdown controller and the host.
//!
//! The controller publishes presentation changes and playback failures; the
//! host (overlay renderer, tray, logger) subscribes and marshals whatever it
//! needs onto its own thread.

use std::path::PathBuf;

use crate::config::Config;
use crate::overlay::OverlayLayout;
use crate::progress::PresentationParameters;

/// Top-level envelope for all bus traffic.
#[derive(Debug, Clone)]
pub enum Message {
    Countdown(CountdownMessage),
    Playback(PlaybackMessage),
    Config(ConfigMessage),
}

/// Why nothing is currently presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HiddenReason {
    /// No preset configured or the selected index is out of range.
    NoPreset,
    /// The target date has passed.
    EventPassed,
    /// The target date is still outside the countdown window.
    OutsideWindow,
}

/// Everything the overlay renderer needs for one evaluation tick.
#[derive(Debug, Clone, PartialEq)]
pub struct PresentationUpdate {
    pub preset_name: String,
    pub days_remaining: i64,
    pub parameters: PresentationParameters,
    /// `None` when either image is missing or unreadable.
    pub overlay: Option<OverlayLayout>,
    pub prevent_minimize: bool,
}

/// Countdown-domain notifications.
#[derive(Debug, Clone)]
pub enum CountdownMessage {
    PresentationChanged(PresentationUpdate),
    PresentationHidden(HiddenReason),
}

/// Blurred audio cue notifications.
#[derive(Debug, Clone)]
pub enum PlaybackMessage {
    Started {
        path: PathBuf,
        blur_amount: f32,
        volume: f32,
    },
    /// Human-readable failure text; the playback attempt is over.
    Failed(String),
}

/// Configuration traffic.
#[derive(Debug, Clone)]
pub enum ConfigMessage {
    ConfigChanged(Config),
    /// Sent by a settings editor; the controller applies and persists it.
    SaveRequested(Config),
}
