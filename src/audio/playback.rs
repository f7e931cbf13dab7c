//! Blurred cue playback.
//!
//! `BlurPlayer::play` validates the path on the caller's thread, then runs
//! decode -> blur filters -> gain -> device conversion on a dedicated thread
//! and blocks that thread until the device has drained. Failures are reported
//! only through the error callback, which may run on the playback thread:
//! callers needing thread affinity must hand the error off (for example over
//! a channel) themselves.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};

use super::audio_decoder::TrackDecoder;
use super::audio_output::{CpalOutputBackend, OutputBackend, OutputRequest, OutputSink, SinkState};
use super::blur_chain::BlurChain;
use super::format_adapter::FormatAdapter;
use crate::error::PlaybackError;

const COMPLETION_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How a playback attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackOutcome {
    Completed,
    Failed(PlaybackError),
}

/// Join handle for one background playback. There is no way to stop it early.
#[derive(Debug)]
pub struct PlaybackHandle {
    thread: JoinHandle<PlaybackOutcome>,
}

impl PlaybackHandle {
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Blocks until the playback thread exits.
    pub fn wait(self) -> PlaybackOutcome {
        self.thread.join().unwrap_or_else(|payload| {
            PlaybackOutcome::Failed(PlaybackError::device(panic_payload_to_string(
                payload.as_ref(),
            )))
        })
    }
}

/// Starts independent blurred playbacks on an output backend.
#[derive(Clone)]
pub struct BlurPlayer {
    backend: Arc<dyn OutputBackend>,
}

impl Default for BlurPlayer {
    fn default() -> Self {
        Self::new(Arc::new(CpalOutputBackend))
    }
}

impl BlurPlayer {
    pub fn new(backend: Arc<dyn OutputBackend>) -> Self {
        Self { backend }
    }

    /// Plays `audio_path` low-pass blurred by `blur_amount` at `volume`.
    ///
    /// A missing or empty path invokes `on_error` before returning and starts
    /// nothing. Otherwise returns as soon as the background thread is spawned;
    /// `on_error` is invoked at most once, from that thread.
    pub fn play<F>(
        &self,
        audio_path: &Path,
        blur_amount: f32,
        volume: f32,
        on_error: F,
    ) -> Option<PlaybackHandle>
    where
        F: FnOnce(PlaybackError) + Send + 'static,
    {
        if audio_path.as_os_str().is_empty() || !audio_path.is_file() {
            warn!(
                "BlurPlayer: audio file missing path={}",
                audio_path.display()
            );
            on_error(PlaybackError::ResourceNotFound(audio_path.to_path_buf()));
            return None;
        }

        let path = audio_path.to_path_buf();
        let backend = self.backend.clone();
        let thread_path = path.clone();
        let notifier = Arc::new(Mutex::new(Some(on_error)));
        let thread_notifier = notifier.clone();
        let spawned = thread::Builder::new()
            .name("blur-playback".to_string())
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    run_session(&thread_path, blur_amount, volume, backend.as_ref())
                }))
                .unwrap_or_else(|payload| {
                    Err(PlaybackError::device(format!(
                        "playback thread panicked: {}",
                        panic_payload_to_string(payload.as_ref())
                    )))
                });

                match result {
                    Ok(()) => {
                        info!("BlurPlayer: playback finished path={}", thread_path.display());
                        PlaybackOutcome::Completed
                    }
                    Err(err) => {
                        error!("BlurPlayer: playback failed: {}", err);
                        notify_once(&thread_notifier, err.clone());
                        PlaybackOutcome::Failed(err)
                    }
                }
            });

        match spawned {
            Ok(thread) => Some(PlaybackHandle { thread }),
            Err(err) => {
                error!(
                    "BlurPlayer: failed to spawn playback thread path={} error={}",
                    path.display(),
                    err
                );
                notify_once(
                    &notifier,
                    PlaybackError::device(format!("failed to spawn playback thread: {err}")),
                );
                None
            }
        }
    }
}

/// Decoder and device owned by one playback, released on every exit path.
struct AudioSession {
    decoder: Option<TrackDecoder>,
    sink: Option<Box<dyn OutputSink>>,
}

impl Drop for AudioSession {
    fn drop(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            if let Err(err) = sink.close() {
                warn!("BlurPlayer: {}", err);
            }
        }
        if self.decoder.take().is_some() {
            debug!("BlurPlayer: decoder released");
        }
    }
}

fn run_session(
    path: &Path,
    blur_amount: f32,
    volume: f32,
    backend: &dyn OutputBackend,
) -> Result<(), PlaybackError> {
    let decoder = TrackDecoder::open(path)?;
    let spec = decoder.spec();
    let mut session = AudioSession {
        decoder: Some(decoder),
        sink: None,
    };

    let mut chain = BlurChain::new(spec.sample_rate, spec.channels, blur_amount, volume);
    let sink = session.sink.insert(backend.open(OutputRequest {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })?);
    let mut adapter = FormatAdapter::new(spec, sink.format())?;
    let Some(decoder) = session.decoder.as_mut() else {
        return Ok(());
    };

    debug!(
        "BlurPlayer: streaming path={} blur={} volume={} stages={} passthrough={}",
        path.display(),
        blur_amount,
        volume,
        chain.stages().len(),
        adapter.is_passthrough()
    );

    while let Some(mut chunk) = decoder.next_chunk()? {
        chain.process(&mut chunk);
        let converted = adapter.convert(&chunk)?;
        if !converted.is_empty() {
            sink.write(&converted)?;
        }
    }
    let tail = adapter.flush()?;
    if !tail.is_empty() {
        sink.write(&tail)?;
    }
    sink.finish();

    loop {
        match sink.state() {
            SinkState::Playing => thread::sleep(COMPLETION_POLL_INTERVAL),
            SinkState::Drained => return Ok(()),
            SinkState::Failed(reason) => return Err(PlaybackError::DeviceError(reason)),
        }
    }
}

fn notify_once<F>(notifier: &Mutex<Option<F>>, err: PlaybackError)
where
    F: FnOnce(PlaybackError),
{
    let callback = match notifier.lock() {
        Ok(mut slot) => slot.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    };
    if let Some(callback) = callback {
        callback(err);
    }
}

fn panic_payload_to_string(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "non-string panic payload".to_string()
}

#[cfg(test)]
mod tests {
    use super::{BlurPlayer, PlaybackOutcome};
    use crate::audio::audio_decoder::tests::{unique_temp_path, write_pcm16_wav};
    use crate::audio::audio_output::{
        OutputBackend, OutputFormat, OutputRequest, OutputSampleFormat, OutputSink, SinkState,
    };
    use crate::error::PlaybackError;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingBackend {
        opens: AtomicUsize,
        closes: Arc<AtomicUsize>,
        written: Arc<Mutex<Vec<f32>>>,
        fail_open: bool,
        fail_while_playing: bool,
        fail_close: bool,
        granted_rate: Option<u32>,
    }

    struct RecordingSink {
        format: OutputFormat,
        written: Arc<Mutex<Vec<f32>>>,
        closes: Arc<AtomicUsize>,
        finished: bool,
        fail_while_playing: bool,
        fail_close: bool,
    }

    impl OutputBackend for RecordingBackend {
        fn open(&self, request: OutputRequest) -> Result<Box<dyn OutputSink>, PlaybackError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.fail_open {
                return Err(PlaybackError::device("no output device available"));
            }
            Ok(Box::new(RecordingSink {
                format: OutputFormat {
                    sample_rate: self.granted_rate.unwrap_or(request.sample_rate),
                    channels: request.channels,
                    sample_format: OutputSampleFormat::I16,
                },
                written: self.written.clone(),
                closes: self.closes.clone(),
                finished: false,
                fail_while_playing: self.fail_while_playing,
                fail_close: self.fail_close,
            }))
        }
    }

    impl OutputSink for RecordingSink {
        fn format(&self) -> OutputFormat {
            self.format
        }

        fn write(&mut self, samples: &[f32]) -> Result<(), PlaybackError> {
            self.written
                .lock()
                .expect("written lock")
                .extend_from_slice(samples);
            Ok(())
        }

        fn finish(&mut self) {
            self.finished = true;
        }

        fn state(&self) -> SinkState {
            if self.fail_while_playing {
                SinkState::Failed("device unplugged".to_string())
            } else if self.finished {
                SinkState::Drained
            } else {
                SinkState::Playing
            }
        }

        fn close(&mut self) -> Result<(), PlaybackError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                return Err(PlaybackError::ResourceReleaseError {
                    resource: "output stream",
                    reason: "already closed".to_string(),
                });
            }
            Ok(())
        }
    }

    fn constant_wav(test_name: &str, frames: usize) -> std::path::PathBuf {
        let path = unique_temp_path(test_name, "wav");
        write_pcm16_wav(&path, 8_000, 1, &vec![16_384i16; frames]);
        path
    }

    fn play_collecting(
        backend: Arc<RecordingBackend>,
        path: &Path,
        blur: f32,
        volume: f32,
    ) -> (Option<PlaybackOutcome>, Vec<PlaybackError>) {
        let player = BlurPlayer::new(backend);
        let (error_sender, error_receiver) = mpsc::channel();
        let handle = player.play(path, blur, volume, move |err| {
            let _ = error_sender.send(err);
        });
        let outcome = handle.map(|handle| handle.wait());
        let errors = error_receiver.try_iter().collect();
        (outcome, errors)
    }

    #[test]
    fn test_missing_file_reports_synchronously_without_opening_device() {
        let backend = Arc::new(RecordingBackend::default());
        let player = BlurPlayer::new(backend.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let handle = player.play(
            &unique_temp_path("playback_missing", "wav"),
            0.5,
            1.0,
            move |err| {
                assert!(matches!(err, PlaybackError::ResourceNotFound(_)));
                calls_clone.fetch_add(1, Ordering::SeqCst);
            },
        );

        assert!(handle.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_empty_path_reports_resource_not_found() {
        let backend = Arc::new(RecordingBackend::default());
        let (outcome, errors) = play_collecting(backend.clone(), Path::new(""), 0.5, 1.0);
        assert!(outcome.is_none());
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], PlaybackError::ResourceNotFound(_)));
        assert_eq!(backend.opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_streams_filtered_and_scaled_audio_to_completion() {
        let path = constant_wav("playback_complete", 8_000);
        let backend = Arc::new(RecordingBackend::default());

        let (outcome, errors) = play_collecting(backend.clone(), &path, 0.9, 0.5);

        assert_eq!(outcome, Some(PlaybackOutcome::Completed));
        assert!(errors.is_empty());
        assert_eq!(backend.opens.load(Ordering::SeqCst), 1);
        assert_eq!(backend.closes.load(Ordering::SeqCst), 1);

        let written = backend.written.lock().expect("written lock");
        assert_eq!(written.len(), 8_000);
        // Constant 0.5 input settles at 0.5 * volume once the low-pass converges.
        let tail = written[written.len() - 1];
        assert!((tail - 0.25).abs() < 1e-2, "tail={tail}");

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_zero_volume_writes_silence() {
        let path = constant_wav("playback_silent", 1_000);
        let backend = Arc::new(RecordingBackend::default());

        let (outcome, _) = play_collecting(backend.clone(), &path, 0.2, 0.0);

        assert_eq!(outcome, Some(PlaybackOutcome::Completed));
        let written = backend.written.lock().expect("written lock");
        assert!(!written.is_empty());
        assert!(written.iter().all(|sample| *sample == 0.0));

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_device_open_failure_is_reported_through_callback() {
        let path = constant_wav("playback_no_device", 500);
        let backend = Arc::new(RecordingBackend {
            fail_open: true,
            ..RecordingBackend::default()
        });

        let (outcome, errors) = play_collecting(backend.clone(), &path, 0.5, 1.0);

        assert!(matches!(
            outcome,
            Some(PlaybackOutcome::Failed(PlaybackError::DeviceError(_)))
        ));
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], PlaybackError::DeviceError(_)));
        assert_eq!(backend.closes.load(Ordering::SeqCst), 0);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_undecodable_file_fails_before_opening_device() {
        let path = unique_temp_path("playback_garbage", "mp3");
        std::fs::write(&path, vec![0u8; 256]).expect("fixture write");
        let backend = Arc::new(RecordingBackend::default());

        let (outcome, errors) = play_collecting(backend.clone(), &path, 0.5, 1.0);

        assert!(matches!(
            outcome,
            Some(PlaybackOutcome::Failed(PlaybackError::DecodeError { .. }))
        ));
        assert_eq!(errors.len(), 1);
        assert_eq!(backend.opens.load(Ordering::SeqCst), 0);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_device_failure_mid_playback_still_releases_device() {
        let path = constant_wav("playback_unplugged", 500);
        let backend = Arc::new(RecordingBackend {
            fail_while_playing: true,
            ..RecordingBackend::default()
        });

        let (outcome, errors) = play_collecting(backend.clone(), &path, 0.5, 1.0);

        assert_eq!(
            outcome,
            Some(PlaybackOutcome::Failed(PlaybackError::DeviceError(
                "device unplugged".to_string()
            )))
        );
        assert_eq!(errors.len(), 1);
        assert_eq!(backend.closes.load(Ordering::SeqCst), 1);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_unusable_device_format_still_closes_device() {
        let path = constant_wav("playback_zero_rate", 500);
        let backend = Arc::new(RecordingBackend {
            granted_rate: Some(0),
            ..RecordingBackend::default()
        });

        let (outcome, errors) = play_collecting(backend.clone(), &path, 0.5, 1.0);

        assert!(matches!(
            outcome,
            Some(PlaybackOutcome::Failed(PlaybackError::DeviceError(_)))
        ));
        assert_eq!(errors.len(), 1);
        assert_eq!(backend.opens.load(Ordering::SeqCst), 1);
        assert_eq!(backend.closes.load(Ordering::SeqCst), 1);
        assert!(backend.written.lock().expect("written lock").is_empty());

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_release_failure_is_swallowed() {
        let path = constant_wav("playback_close_error", 500);
        let backend = Arc::new(RecordingBackend {
            fail_close: true,
            ..RecordingBackend::default()
        });

        let (outcome, errors) = play_collecting(backend.clone(), &path, 0.1, 1.0);

        assert_eq!(outcome, Some(PlaybackOutcome::Completed));
        assert!(errors.is_empty());
        assert_eq!(backend.closes.load(Ordering::SeqCst), 1);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_concurrent_playbacks_are_independent() {
        let path = constant_wav("playback_concurrent", 2_000);
        let backend = Arc::new(RecordingBackend::default());
        let player = BlurPlayer::new(backend.clone());

        let first = player
            .play(&path, 0.3, 1.0, |_| {})
            .expect("first playback should start");
        let second = player
            .play(&path, 0.8, 1.0, |_| {})
            .expect("second playback should start");

        assert_eq!(first.wait(), PlaybackOutcome::Completed);
        assert_eq!(second.wait(), PlaybackOutcome::Completed);
        assert_eq!(backend.opens.load(Ordering::SeqCst), 2);
        assert_eq!(backend.written.lock().expect("written lock").len(), 4_000);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_handle_reports_finished_after_wait_window() {
        let path = constant_wav("playback_finished", 200);
        let backend = Arc::new(RecordingBackend::default());
        let player = BlurPlayer::new(backend);

        let handle = player
            .play(&path, 0.0, 1.0, |_| {})
            .expect("playback should start");
        for _ in 0..50 {
            if handle.is_finished() {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(handle.is_finished());
        assert_eq!(handle.wait(), PlaybackOutcome::Completed);

        let _ = std::fs::remove_file(path);
    }
}
