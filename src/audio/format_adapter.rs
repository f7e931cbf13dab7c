//! Conforms a decoded stream to the layout an output device granted.

use log::debug;
use rubato::{FftFixedIn, Resampler};

use super::audio_decoder::StreamSpec;
use super::audio_output::OutputFormat;
use crate::error::PlaybackError;

const RESAMPLER_CHUNK_FRAMES: usize = 1_024;
const RESAMPLER_SUB_CHUNKS: usize = 2;

/// Remaps channels, then resamples when the device rate differs from the source.
pub struct FormatAdapter {
    source_channels: usize,
    target_channels: usize,
    resampler: Option<StreamResampler>,
}

impl FormatAdapter {
    pub fn new(source: StreamSpec, target: OutputFormat) -> Result<Self, PlaybackError> {
        if source.sample_rate == 0 || target.sample_rate == 0 {
            return Err(PlaybackError::device(format!(
                "cannot convert {} Hz -> {} Hz",
                source.sample_rate, target.sample_rate
            )));
        }
        let source_channels = source.channels.max(1);
        let target_channels = target.channels.max(1);
        let resampler = if source.sample_rate != target.sample_rate {
            debug!(
                "FormatAdapter: resampling {} Hz -> {} Hz",
                source.sample_rate, target.sample_rate
            );
            Some(StreamResampler::new(
                source.sample_rate,
                target.sample_rate,
                target_channels,
            )?)
        } else {
            None
        };
        Ok(Self {
            source_channels,
            target_channels,
            resampler,
        })
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none() && self.source_channels == self.target_channels
    }

    pub fn convert(&mut self, samples: &[f32]) -> Result<Vec<f32>, PlaybackError> {
        let mapped = map_channels(samples, self.source_channels, self.target_channels);
        match self.resampler.as_mut() {
            Some(resampler) => resampler.push(&mapped),
            None => Ok(mapped),
        }
    }

    /// Emits whatever the resampler still holds at end of stream.
    pub fn flush(&mut self) -> Result<Vec<f32>, PlaybackError> {
        match self.resampler.as_mut() {
            Some(resampler) => resampler.flush(),
            None => Ok(Vec::new()),
        }
    }
}

/// Interleaved channel remap.
///
/// Mono is duplicated to every output channel; otherwise shared channels are
/// copied in order and extra output channels are left silent.
pub fn map_channels(samples: &[f32], from: usize, to: usize) -> Vec<f32> {
    if from == to {
        return samples.to_vec();
    }
    let frames = samples.len() / from;
    let mut mapped = vec![0.0f32; frames * to];
    for (frame_in, frame_out) in samples.chunks_exact(from).zip(mapped.chunks_exact_mut(to)) {
        if from == 1 {
            frame_out.fill(frame_in[0]);
        } else {
            let shared = from.min(to);
            frame_out[..shared].copy_from_slice(&frame_in[..shared]);
        }
    }
    mapped
}

struct StreamResampler {
    resampler: FftFixedIn<f32>,
    pending: Vec<Vec<f32>>,
}

impl StreamResampler {
    fn new(from_rate: u32, to_rate: u32, channels: usize) -> Result<Self, PlaybackError> {
        let resampler = FftFixedIn::<f32>::new(
            from_rate as usize,
            to_rate as usize,
            RESAMPLER_CHUNK_FRAMES,
            RESAMPLER_SUB_CHUNKS,
            channels,
        )
        .map_err(|err| PlaybackError::device(format!("failed to create resampler: {err}")))?;
        Ok(Self {
            resampler,
            pending: vec![Vec::new(); channels],
        })
    }

    fn push(&mut self, interleaved: &[f32]) -> Result<Vec<f32>, PlaybackError> {
        let channels = self.pending.len();
        for frame in interleaved.chunks_exact(channels) {
            for (channel, sample) in self.pending.iter_mut().zip(frame) {
                channel.push(*sample);
            }
        }

        let mut output = Vec::new();
        loop {
            let needed = self.resampler.input_frames_next();
            if self.pending[0].len() < needed {
                break;
            }
            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|channel| channel.drain(..needed).collect())
                .collect();
            let resampled = self
                .resampler
                .process(&chunk, None)
                .map_err(|err| PlaybackError::device(format!("resampling failed: {err}")))?;
            interleave_into(&resampled, &mut output);
        }
        Ok(output)
    }

    fn flush(&mut self) -> Result<Vec<f32>, PlaybackError> {
        let mut output = Vec::new();
        if !self.pending[0].is_empty() {
            let remaining = std::mem::take(&mut self.pending);
            let resampled = self
                .resampler
                .process_partial(Some(remaining.as_slice()), None)
                .map_err(|err| PlaybackError::device(format!("resampling failed: {err}")))?;
            interleave_into(&resampled, &mut output);
            self.pending = vec![Vec::new(); remaining.len()];
        }
        let tail = self
            .resampler
            .process_partial::<Vec<f32>>(None, None)
            .map_err(|err| PlaybackError::device(format!("resampling failed: {err}")))?;
        interleave_into(&tail, &mut output);
        Ok(output)
    }
}

fn interleave_into(channels: &[Vec<f32>], output: &mut Vec<f32>) {
    let Some(frames) = channels.first().map(Vec::len) else {
        return;
    };
    output.reserve(frames * channels.len());
    for frame in 0..frames {
        for channel in channels {
            output.push(channel[frame]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{map_channels, FormatAdapter};
    use crate::audio::audio_decoder::StreamSpec;
    use crate::audio::audio_output::{OutputFormat, OutputSampleFormat};
    use crate::error::PlaybackError;

    fn output(sample_rate: u32, channels: usize) -> OutputFormat {
        OutputFormat {
            sample_rate,
            channels,
            sample_format: OutputSampleFormat::F32,
        }
    }

    #[test]
    fn test_mono_is_duplicated_to_stereo() {
        assert_eq!(map_channels(&[0.1, 0.2], 1, 2), vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn test_stereo_to_mono_keeps_first_channel() {
        assert_eq!(map_channels(&[0.1, 0.9, 0.2, 0.8], 2, 1), vec![0.1, 0.2]);
    }

    #[test]
    fn test_stereo_to_quad_zero_fills_extra_channels() {
        assert_eq!(
            map_channels(&[0.1, 0.9], 2, 4),
            vec![0.1, 0.9, 0.0, 0.0]
        );
    }

    #[test]
    fn test_matching_format_is_passthrough() {
        let mut adapter = FormatAdapter::new(
            StreamSpec {
                sample_rate: 44_100,
                channels: 2,
            },
            output(44_100, 2),
        )
        .expect("adapter should build");
        assert!(adapter.is_passthrough());
        assert_eq!(
            adapter.convert(&[0.25, -0.25]).expect("convert"),
            vec![0.25, -0.25]
        );
        assert!(adapter.flush().expect("flush").is_empty());
    }

    #[test]
    fn test_resampling_roughly_preserves_duration() {
        let mut adapter = FormatAdapter::new(
            StreamSpec {
                sample_rate: 24_000,
                channels: 1,
            },
            output(48_000, 2),
        )
        .expect("adapter should build");
        assert!(!adapter.is_passthrough());

        let input = vec![0.1f32; 24_000];
        let mut produced = Vec::new();
        for chunk in input.chunks(1_000) {
            produced.extend(adapter.convert(chunk).expect("convert"));
        }
        produced.extend(adapter.flush().expect("flush"));

        let frames = produced.len() / 2;
        assert_eq!(produced.len() % 2, 0);
        // One second in, roughly one second out (plus resampler delay/padding).
        assert!(frames >= 47_000, "frames={frames}");
        assert!(frames <= 53_000, "frames={frames}");
    }

    #[test]
    fn test_zero_device_rate_is_rejected() {
        let result = FormatAdapter::new(
            StreamSpec {
                sample_rate: 8_000,
                channels: 1,
            },
            output(0, 2),
        );
        assert!(matches!(result, Err(PlaybackError::DeviceError(_))));
    }
}
