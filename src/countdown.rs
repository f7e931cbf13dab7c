//! Countdown scheduler.
//!
//! Each tick evaluates the selected preset against today's date, publishes
//! what the overlay should show, and starts the blurred audio cue once per
//! activation. Playback failures come back over the bus, never as a panic.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use log::{debug, info, trace, warn};
use time::{Date, OffsetDateTime, UtcOffset};
use tokio::sync::broadcast::{error::RecvError, Sender};
use tokio::time::MissedTickBehavior;

use crate::audio::playback::{BlurPlayer, PlaybackHandle, PlaybackOutcome};
use crate::config::{sanitize_config, Config, Preset, MIN_CHECK_INTERVAL_SECS};
use crate::config_persistence::{load_config_file, persist_config_file};
use crate::overlay::compute_overlay_layout;
use crate::progress::{days_remaining, map_progress, PresentationParameters};
use crate::protocol::{
    ConfigMessage, CountdownMessage, HiddenReason, Message, PlaybackMessage, PresentationUpdate,
};

/// Result of evaluating the selected preset for one day.
#[derive(Debug, Clone, PartialEq)]
pub enum CountdownStatus {
    NoPreset,
    Passed,
    Dormant { days_remaining: i64 },
    Active {
        days_remaining: i64,
        parameters: PresentationParameters,
    },
}

impl CountdownStatus {
    fn is_active(&self) -> bool {
        matches!(self, CountdownStatus::Active { .. })
    }
}

pub struct CountdownController {
    config: Config,
    config_path: Option<PathBuf>,
    config_modified: Option<SystemTime>,
    utc_offset: UtcOffset,
    audio_played: bool,
    player: BlurPlayer,
    active_playback: Option<PlaybackHandle>,
    bus_producer: Sender<Message>,
}

impl CountdownController {
    pub fn new(config: Config, player: BlurPlayer, bus_producer: Sender<Message>) -> Self {
        Self {
            config,
            config_path: None,
            config_modified: None,
            utc_offset: UtcOffset::UTC,
            audio_played: false,
            player,
            active_playback: None,
            bus_producer,
        }
    }

    /// Loads `path` and watches it for changes on every tick.
    pub fn from_config_file(
        path: &Path,
        player: BlurPlayer,
        bus_producer: Sender<Message>,
    ) -> Self {
        let config = load_config_file(path);
        let mut controller = Self::new(config, player, bus_producer);
        controller.config_path = Some(path.to_path_buf());
        controller.config_modified = modified_time(path);
        controller
    }

    /// Offset used to turn "now" into today's calendar date.
    pub fn with_utc_offset(mut self, utc_offset: UtcOffset) -> Self {
        self.utc_offset = utc_offset;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn has_played_audio(&self) -> bool {
        self.audio_played
    }

    /// Replaces the active config and re-arms the audio cue.
    pub fn apply_config(&mut self, config: Config) {
        self.config = sanitize_config(config);
        self.audio_played = false;
        info!(
            "CountdownController: config applied presets={} selected={}",
            self.config.presets.len(),
            self.config.selected_preset_index
        );
        let _ = self
            .bus_producer
            .send(Message::Config(ConfigMessage::ConfigChanged(self.config.clone())));
    }

    /// Applies an edited config and writes it back to the watched file.
    pub fn save_config(&mut self, config: Config) {
        self.apply_config(config);
        if let Some(path) = self.config_path.clone() {
            persist_config_file(&self.config, &path);
            self.config_modified = modified_time(&path);
        }
    }

    /// Re-reads the config file when its modification time changed.
    pub fn reload_if_changed(&mut self) -> bool {
        let Some(path) = self.config_path.clone() else {
            return false;
        };
        let modified = modified_time(&path);
        if modified.is_none() || modified == self.config_modified {
            return false;
        }
        self.config_modified = modified;

        let config = load_config_file(&path);
        if config == self.config {
            trace!("CountdownController: config file touched without changes");
            return false;
        }
        info!("CountdownController: reloading {}", path.display());
        self.apply_config(config);
        true
    }

    /// Handles a request from the host. Returns true when the presentation
    /// must be re-evaluated.
    pub fn handle_bus_message(&mut self, message: Message) -> bool {
        match message {
            Message::Config(ConfigMessage::SaveRequested(config)) => {
                self.save_config(config);
                true
            }
            _ => false,
        }
    }

    pub fn evaluate(&self, today: Date) -> CountdownStatus {
        let Some(preset) = self.config.selected_preset() else {
            return CountdownStatus::NoPreset;
        };
        let days_remaining = days_remaining(preset.target_date, today);
        if days_remaining < 0 {
            CountdownStatus::Passed
        } else if days_remaining > i64::from(preset.countdown_days) {
            CountdownStatus::Dormant { days_remaining }
        } else {
            CountdownStatus::Active {
                days_remaining,
                parameters: map_progress(days_remaining, preset.countdown_days),
            }
        }
    }

    /// Evaluates `today`, publishes the presentation and starts the cue if due.
    pub fn check_and_update(&mut self, today: Date) -> CountdownStatus {
        self.reap_finished_playback();
        let status = self.evaluate(today);
        if !status.is_active() {
            self.audio_played = false;
        }

        match &status {
            CountdownStatus::NoPreset => self.publish_hidden(HiddenReason::NoPreset),
            CountdownStatus::Passed => self.publish_hidden(HiddenReason::EventPassed),
            CountdownStatus::Dormant { days_remaining } => {
                trace!("CountdownController: dormant days_remaining={}", days_remaining);
                self.publish_hidden(HiddenReason::OutsideWindow);
            }
            CountdownStatus::Active {
                days_remaining,
                parameters,
            } => {
                if let Some(preset) = self.config.selected_preset().cloned() {
                    self.present(&preset, *days_remaining, parameters);
                    if !self.audio_played {
                        self.start_audio_cue(&preset, parameters);
                    }
                }
            }
        }
        status
    }

    fn present(&self, preset: &Preset, days_remaining: i64, parameters: &PresentationParameters) {
        let overlay = match compute_overlay_layout(preset, parameters) {
            Ok(layout) => Some(layout),
            Err(err) => {
                debug!("CountdownController: overlay unavailable: {}", err);
                None
            }
        };
        debug!(
            "CountdownController: active preset={} days_remaining={} character={:.3} ice={:.3}",
            preset.name, days_remaining, parameters.character_opacity, parameters.ice_opacity
        );
        let _ = self.bus_producer.send(Message::Countdown(
            CountdownMessage::PresentationChanged(PresentationUpdate {
                preset_name: preset.name.clone(),
                days_remaining,
                parameters: *parameters,
                overlay,
                prevent_minimize: self.config.prevent_minimize_on_show_desktop,
            }),
        ));
    }

    fn start_audio_cue(&mut self, preset: &Preset, parameters: &PresentationParameters) {
        let Some(audio_path) = preset.audio_path().filter(|path| path.is_file()) else {
            debug!(
                "CountdownController: no playable audio for preset={}",
                preset.name
            );
            return;
        };

        let blur_amount = parameters.audio_blur as f32;
        let volume = parameters.audio_volume as f32;
        let error_producer = self.bus_producer.clone();
        let started = self.player.play(audio_path, blur_amount, volume, move |err| {
            let _ = error_producer.send(Message::Playback(PlaybackMessage::Failed(
                err.to_string(),
            )));
        });
        self.audio_played = true;

        if let Some(handle) = started {
            self.active_playback = Some(handle);
            let _ = self
                .bus_producer
                .send(Message::Playback(PlaybackMessage::Started {
                    path: audio_path.to_path_buf(),
                    blur_amount,
                    volume,
                }));
        }
    }

    /// Joins a finished cue thread so handles do not pile up.
    fn reap_finished_playback(&mut self) {
        if !self
            .active_playback
            .as_ref()
            .is_some_and(PlaybackHandle::is_finished)
        {
            return;
        }
        if let Some(handle) = self.active_playback.take() {
            match handle.wait() {
                PlaybackOutcome::Completed => debug!("CountdownController: audio cue completed"),
                PlaybackOutcome::Failed(err) => {
                    debug!("CountdownController: audio cue ended with error: {}", err)
                }
            }
        }
    }

    fn publish_hidden(&self, reason: HiddenReason) {
        let _ = self
            .bus_producer
            .send(Message::Countdown(CountdownMessage::PresentationHidden(reason)));
    }

    fn tick_period(&self) -> Duration {
        Duration::from_secs(self.config.check_interval_secs.max(MIN_CHECK_INTERVAL_SECS))
    }

    fn today(&self) -> Date {
        OffsetDateTime::now_utc().to_offset(self.utc_offset).date()
    }

    /// Ticks forever on the current tokio runtime.
    pub async fn run(mut self) {
        let mut period = self.tick_period();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "CountdownController: started interval_secs={}",
            period.as_secs()
        );

        let mut bus_consumer = self.bus_producer.subscribe();
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.reload_if_changed();
                }
                received = bus_consumer.recv() => match received {
                    Ok(message) => {
                        if !self.handle_bus_message(message) {
                            continue;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(
                            "CountdownController: lagged on bus, skipped {} message(s)",
                            skipped
                        );
                        continue;
                    }
                    Err(RecvError::Closed) => {
                        info!("CountdownController: bus closed");
                        break;
                    }
                },
            }

            let next_period = self.tick_period();
            if next_period != period {
                period = next_period;
                ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker.reset();
                info!(
                    "CountdownController: interval changed interval_secs={}",
                    period.as_secs()
                );
            }

            let today = self.today();
            let status = self.check_and_update(today);
            trace!(
                "CountdownController: tick today={} status={:?} audio_played={}",
                today,
                status,
                self.has_played_audio()
            );
        }
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    match std::fs::metadata(path).and_then(|metadata| metadata.modified()) {
        Ok(modified) => Some(modified),
        Err(err) => {
            warn!(
                "CountdownController: cannot stat config {}: {}",
                path.display(),
                err
            );
            None
        }
    }
}
