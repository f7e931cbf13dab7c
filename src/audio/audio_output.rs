//! Audio output devices.
//!
//! `OutputBackend` opens a sink for a requested stream layout; the CPAL
//! backend negotiates the closest device configuration, queues f32 samples
//! behind a bounded buffer and converts them to the device's native sample
//! format inside the stream callback.

use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::{debug, error, warn};

use crate::error::PlaybackError;

/// Seconds of audio the producer may queue ahead of the device.
const QUEUE_AHEAD_SECS: usize = 2;
const WRITE_BACKOFF: Duration = Duration::from_millis(10);
/// No device callback for this long while audio is pending means the stream is dead.
const STALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Stream layout the caller would like to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputRequest {
    pub sample_rate: u32,
    pub channels: usize,
}

/// Native sample representation of an opened device stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSampleFormat {
    F32,
    I16,
    U16,
}

/// Layout actually granted by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    pub sample_rate: u32,
    pub channels: usize,
    pub sample_format: OutputSampleFormat,
}

/// Coarse device state observed by the completion poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkState {
    Playing,
    Drained,
    Failed(String),
}

/// Opens output sinks. Implementations must be shareable across playback threads.
pub trait OutputBackend: Send + Sync {
    fn open(&self, request: OutputRequest) -> Result<Box<dyn OutputSink>, PlaybackError>;
}

/// One open device stream, owned by a single playback.
pub trait OutputSink {
    fn format(&self) -> OutputFormat;
    /// Queues interleaved samples already in the sink's rate and channel layout.
    /// Blocks while the device is more than a couple of seconds behind.
    fn write(&mut self, samples: &[f32]) -> Result<(), PlaybackError>;
    /// Marks end of stream; the sink drains what is queued, then reports `Drained`.
    fn finish(&mut self);
    fn state(&self) -> SinkState;
    fn close(&mut self) -> Result<(), PlaybackError>;
}

/// Queue shared between the producer thread and the device callback.
#[derive(Debug, Default)]
struct SharedQueue {
    samples: Mutex<VecDeque<f32>>,
    finished: AtomicBool,
    drained: AtomicBool,
    callbacks: AtomicU64,
    failure: Mutex<Option<String>>,
}

impl SharedQueue {
    fn fail(&self, reason: String) {
        if let Ok(mut failure) = self.failure.lock() {
            failure.get_or_insert(reason);
        }
    }

    fn failure(&self) -> Option<String> {
        self.failure.lock().ok().and_then(|failure| failure.clone())
    }

    fn queued(&self) -> usize {
        self.samples.lock().map(|queue| queue.len()).unwrap_or(0)
    }
}

/// Default system output through CPAL.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalOutputBackend;

impl OutputBackend for CpalOutputBackend {
    fn open(&self, request: OutputRequest) -> Result<Box<dyn OutputSink>, PlaybackError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlaybackError::device("no output device available"))?;
        let supported_configs = device
            .supported_output_configs()
            .map_err(|err| PlaybackError::device(format!("error getting device configs: {err}")))?
            .collect::<Vec<_>>();
        let chosen = choose_best_stream_config(
            &supported_configs,
            request.sample_rate,
            request.channels.min(usize::from(u16::MAX)) as u16,
        )
        .ok_or_else(|| PlaybackError::device("no usable output configuration"))?;

        let sample_format = chosen.sample_format();
        let config: cpal::StreamConfig = chosen.into();
        let output_sample_format = output_sample_format_from_cpal(sample_format).ok_or_else(|| {
            PlaybackError::device(format!("unsupported device sample format {sample_format:?}"))
        })?;
        let shared = Arc::new(SharedQueue::default());

        let stream = match output_sample_format {
            OutputSampleFormat::F32 => {
                build_stream::<f32, _>(&device, &config, shared.clone(), |sample| sample, 0.0)
            }
            OutputSampleFormat::I16 => {
                build_stream::<i16, _>(&device, &config, shared.clone(), quantize_i16, 0)
            }
            OutputSampleFormat::U16 => build_stream::<u16, _>(
                &device,
                &config,
                shared.clone(),
                quantize_u16,
                U16_SILENCE,
            ),
        }?;
        stream
            .play()
            .map_err(|err| PlaybackError::device(format!("failed to start playback: {err}")))?;

        let format = OutputFormat {
            sample_rate: config.sample_rate.0,
            channels: usize::from(config.channels.max(1)),
            sample_format: output_sample_format,
        };
        debug!(
            "CpalOutput: opened device={} sample_rate={} channels={} format={:?}",
            device.name().unwrap_or_else(|_| "Unknown Device".to_string()),
            format.sample_rate,
            format.channels,
            format.sample_format
        );

        Ok(Box::new(CpalSink {
            stream: Some(stream),
            shared,
            format,
            last_progress: Cell::new((0, Instant::now())),
        }))
    }
}

struct CpalSink {
    stream: Option<cpal::Stream>,
    shared: Arc<SharedQueue>,
    format: OutputFormat,
    last_progress: Cell<(u64, Instant)>,
}

impl CpalSink {
    fn queue_capacity(&self) -> usize {
        (self.format.sample_rate as usize)
            .saturating_mul(self.format.channels)
            .saturating_mul(QUEUE_AHEAD_SECS)
            .max(4_096)
    }

    fn stalled(&self) -> bool {
        let callbacks = self.shared.callbacks.load(Ordering::Relaxed);
        let (last_callbacks, last_seen) = self.last_progress.get();
        if callbacks != last_callbacks {
            self.last_progress.set((callbacks, Instant::now()));
            return false;
        }
        last_seen.elapsed() > STALL_TIMEOUT
    }
}

impl OutputSink for CpalSink {
    fn format(&self) -> OutputFormat {
        self.format
    }

    fn write(&mut self, samples: &[f32]) -> Result<(), PlaybackError> {
        let capacity = self.queue_capacity();
        while self.shared.queued() >= capacity {
            if let Some(reason) = self.shared.failure() {
                return Err(PlaybackError::DeviceError(reason));
            }
            if self.stalled() {
                return Err(PlaybackError::device("output stream stalled"));
            }
            thread::sleep(WRITE_BACKOFF);
        }
        if let Some(reason) = self.shared.failure() {
            return Err(PlaybackError::DeviceError(reason));
        }
        let mut queue = self
            .shared
            .samples
            .lock()
            .map_err(|_| PlaybackError::device("sample queue lock poisoned"))?;
        queue.extend(samples.iter().copied());
        Ok(())
    }

    fn finish(&mut self) {
        self.shared.finished.store(true, Ordering::Relaxed);
    }

    fn state(&self) -> SinkState {
        if let Some(reason) = self.shared.failure() {
            return SinkState::Failed(reason);
        }
        if self.shared.drained.load(Ordering::Relaxed) {
            return SinkState::Drained;
        }
        if self.stalled() {
            return SinkState::Failed("output stream stalled".to_string());
        }
        SinkState::Playing
    }

    fn close(&mut self) -> Result<(), PlaybackError> {
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };
        let paused = stream.pause();
        drop(stream);
        paused.map_err(|err| PlaybackError::ResourceReleaseError {
            resource: "output stream",
            reason: err.to_string(),
        })
    }
}

const U16_SILENCE: u16 = 1 << 15;

fn output_sample_format_from_cpal(sample_format: cpal::SampleFormat) -> Option<OutputSampleFormat> {
    match sample_format {
        cpal::SampleFormat::F32 => Some(OutputSampleFormat::F32),
        cpal::SampleFormat::I16 => Some(OutputSampleFormat::I16),
        cpal::SampleFormat::U16 => Some(OutputSampleFormat::U16),
        _ => None,
    }
}

fn build_stream<T, F>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    shared: Arc<SharedQueue>,
    mut convert_sample: F,
    silence_value: T,
) -> Result<cpal::Stream, PlaybackError>
where
    T: cpal::SizedSample + Send + 'static,
    F: FnMut(f32) -> T + Send + 'static,
{
    let error_shared = shared.clone();
    device
        .build_output_stream(
            config,
            move |output_buffer: &mut [T], _: &cpal::OutputCallbackInfo| {
                render_output_buffer(output_buffer, &shared, &mut convert_sample, silence_value);
            },
            move |err| {
                error!("CpalOutput: stream error: {}", err);
                error_shared.fail(err.to_string());
            },
            None,
        )
        .map_err(|err| PlaybackError::device(format!("failed to build audio stream: {err}")))
}

fn render_output_buffer<T, F>(
    output_buffer: &mut [T],
    shared: &SharedQueue,
    convert_sample: &mut F,
    silence_value: T,
) where
    T: Copy,
    F: FnMut(f32) -> T,
{
    shared.callbacks.fetch_add(1, Ordering::Relaxed);
    let Ok(mut queue) = shared.samples.lock() else {
        output_buffer.fill(silence_value);
        return;
    };
    // Drained only once a whole buffer of silence follows the last queued samples.
    let tail_played = queue.is_empty() && shared.finished.load(Ordering::Relaxed);
    for slot in output_buffer.iter_mut() {
        *slot = match queue.pop_front() {
            Some(sample) => convert_sample(sample),
            None => silence_value,
        };
    }
    if tail_played {
        shared.drained.store(true, Ordering::Relaxed);
    }
}

fn quantize_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32)
        .round()
        .clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

fn quantize_u16(sample: f32) -> u16 {
    ((sample.clamp(-1.0, 1.0) * 0.5 + 0.5) * u16::MAX as f32)
        .round()
        .clamp(0.0, u16::MAX as f32) as u16
}

fn score_sample_format(sample_format: cpal::SampleFormat) -> u64 {
    match sample_format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I16 => 20,
        cpal::SampleFormat::U16 => 30,
        _ => 10_000,
    }
}

fn choose_sample_rate_for_range(
    range: &cpal::SupportedStreamConfigRange,
    requested_sample_rate: u32,
) -> u32 {
    const COMMON_SAMPLE_RATES: [u32; 6] = [44_100, 48_000, 88_200, 96_000, 176_400, 192_000];
    let min_rate = range.min_sample_rate().0;
    let max_rate = range.max_sample_rate().0;
    if requested_sample_rate >= min_rate && requested_sample_rate <= max_rate {
        return requested_sample_rate;
    }
    COMMON_SAMPLE_RATES
        .iter()
        .copied()
        .filter(|rate| *rate >= min_rate && *rate <= max_rate)
        .min_by_key(|rate| rate.abs_diff(requested_sample_rate))
        .unwrap_or_else(|| requested_sample_rate.clamp(min_rate, max_rate.max(min_rate)))
}

/// Picks the supported configuration closest to the request.
///
/// Channel mismatches weigh heaviest, then sample-rate distance, then the
/// native sample format (f32 preferred, formats we cannot convert to last).
fn choose_best_stream_config(
    supported_configs: &[cpal::SupportedStreamConfigRange],
    requested_sample_rate: u32,
    requested_channels: u16,
) -> Option<cpal::SupportedStreamConfig> {
    let requested_sample_rate = requested_sample_rate.max(8_000);
    let mut best: Option<(u64, cpal::SupportedStreamConfig)> = None;
    for range in supported_configs {
        if output_sample_format_from_cpal(range.sample_format()).is_none() {
            continue;
        }
        let candidate_sample_rate = choose_sample_rate_for_range(range, requested_sample_rate);
        let candidate = range.clone().with_sample_rate(cpal::SampleRate(candidate_sample_rate));
        let channel_penalty =
            u64::from(candidate.channels().abs_diff(requested_channels)) * 1_000_000;
        let sample_rate_penalty =
            u64::from(candidate.sample_rate().0.abs_diff(requested_sample_rate));
        let score =
            channel_penalty + sample_rate_penalty + score_sample_format(candidate.sample_format());
        match &best {
            Some((best_score, _)) if *best_score <= score => {}
            _ => best = Some((score, candidate)),
        }
    }
    if best.is_none() {
        warn!("CpalOutput: no supported configuration with a convertible sample format");
    }
    best.map(|(_, candidate)| candidate)
}
