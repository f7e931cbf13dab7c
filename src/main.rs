mod audio;
mod config;
mod config_persistence;
mod countdown;
mod error;
mod overlay;
mod progress;
mod protocol;

use std::path::PathBuf;
use std::thread;

use log::{debug, error, info, warn};
use time::UtcOffset;
use tokio::sync::broadcast::{self, error::RecvError, Receiver};

use audio::playback::BlurPlayer;
use countdown::CountdownController;
use protocol::{ConfigMessage, CountdownMessage, Message, PlaybackMessage};

const CONFIG_PATH_ENV: &str = "FROSTFADE_CONFIG";
const LOG_FILTER_ENV: &str = "FROSTFADE_LOG";

fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "non-string panic payload".to_string()
}

fn resolve_config_path() -> Result<PathBuf, String> {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
        return Ok(PathBuf::from(path));
    }
    dirs::config_dir()
        .map(|config_dir| config_dir.join("frostfade").join("config.toml"))
        .ok_or_else(|| {
            format!(
                "could not determine the user config directory; set {} instead",
                CONFIG_PATH_ENV
            )
        })
}

/// Stand-in for the overlay renderer: reports bus traffic in the log.
fn run_host_listener(mut bus_consumer: Receiver<Message>) {
    loop {
        match bus_consumer.blocking_recv() {
            Ok(Message::Countdown(CountdownMessage::PresentationChanged(update))) => {
                info!(
                    "Host: show preset={} days_remaining={} character_opacity={:.2} \
                     ice_opacity={:.2} overlay={}",
                    update.preset_name,
                    update.days_remaining,
                    update.parameters.character_opacity,
                    update.parameters.ice_opacity,
                    update
                        .overlay
                        .as_ref()
                        .map(|layout| format!("{}x{}", layout.window_width, layout.window_height))
                        .unwrap_or_else(|| "none".to_string())
                );
            }
            Ok(Message::Countdown(CountdownMessage::PresentationHidden(reason))) => {
                debug!("Host: hide reason={:?}", reason);
            }
            Ok(Message::Playback(PlaybackMessage::Started {
                path,
                blur_amount,
                volume,
            })) => {
                info!(
                    "Host: audio cue started path={} blur={:.2} volume={:.2}",
                    path.display(),
                    blur_amount,
                    volume
                );
            }
            Ok(Message::Playback(PlaybackMessage::Failed(reason))) => {
                warn!("Host: audio cue failed: {}", reason);
            }
            Ok(Message::Config(ConfigMessage::ConfigChanged(config))) => {
                debug!(
                    "Host: config changed presets={} prevent_minimize={}",
                    config.presets.len(),
                    config.prevent_minimize_on_show_desktop
                );
            }
            Ok(Message::Config(ConfigMessage::SaveRequested(config))) => {
                debug!(
                    "Host: config save requested presets={}",
                    config.presets.len()
                );
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!("Host lagged on bus, skipped {} message(s)", skipped);
            }
            Err(RecvError::Closed) => {
                info!("Host: bus closed");
                break;
            }
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Must run before any thread is spawned for the local offset to be readable.
    let utc_offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);

    let mut clog = colog::default_builder();
    clog.filter(None, log::LevelFilter::Debug);
    if let Ok(filters) = std::env::var(LOG_FILTER_ENV) {
        clog.parse_filters(&filters);
    }
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let config_file = resolve_config_path()?;
    info!("Using config file {}", config_file.display());

    // Bus for communication between components
    let (bus_sender, _) = broadcast::channel(256);

    let host_bus_receiver = bus_sender.subscribe();
    thread::Builder::new()
        .name("host-listener".to_string())
        .spawn(move || {
            let run_result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                run_host_listener(host_bus_receiver);
            }));
            if let Err(payload) = run_result {
                error!(
                    "Host listener terminated due to panic: {}",
                    panic_payload_to_string(payload.as_ref())
                );
            }
        })?;

    let controller =
        CountdownController::from_config_file(&config_file, BlurPlayer::default(), bus_sender)
            .with_utc_offset(utc_offset);
    info!(
        "Loaded {} preset(s), check interval {}s",
        controller.config().presets.len(),
        controller.config().check_interval_secs
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;
    runtime.block_on(controller.run());

    info!("Application exiting");
    Ok(())
}
