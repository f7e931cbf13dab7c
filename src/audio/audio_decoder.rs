//! Streaming symphonia decoder producing interleaved f32 chunks.

use std::fs::File;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::PlaybackError;

/// Consecutive corrupt packets tolerated before giving up on a file.
const MAX_CONSECUTIVE_DECODE_ERRORS: usize = 16;

/// Source stream layout reported by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSpec {
    pub sample_rate: u32,
    pub channels: usize,
}

/// Decodes one track of a media file chunk by chunk.
pub struct TrackDecoder {
    path: PathBuf,
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    spec: StreamSpec,
    pending: Option<Vec<f32>>,
    sample_buffer: Option<SampleBuffer<f32>>,
    finished: bool,
}

impl TrackDecoder {
    /// Probes `path` and prepares a decoder for its default audio track.
    pub fn open(path: &Path) -> Result<Self, PlaybackError> {
        let file = File::open(path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                PlaybackError::ResourceNotFound(path.to_path_buf())
            } else {
                PlaybackError::decode(path, err)
            }
        })?;

        let media_source = MediaSourceStream::new(Box::new(file), Default::default());
        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
            hint.with_extension(extension);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                media_source,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|err| PlaybackError::decode(path, err))?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|track| track.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| PlaybackError::decode(path, "no audio track found"))?;
        let track_id = track.id;
        let declared_rate = track.codec_params.sample_rate;
        let declared_channels = track.codec_params.channels.map(|channels| channels.count());

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|err| PlaybackError::decode(path, err))?;

        let mut track_decoder = Self {
            path: path.to_path_buf(),
            format,
            decoder,
            track_id,
            spec: StreamSpec {
                sample_rate: declared_rate.unwrap_or(0),
                channels: declared_channels.unwrap_or(0),
            },
            pending: None,
            sample_buffer: None,
            finished: false,
        };

        // Some containers only reveal the layout once the first packet decodes.
        if track_decoder.spec.sample_rate == 0 || track_decoder.spec.channels == 0 {
            track_decoder.pending = track_decoder.decode_next()?;
        }
        if track_decoder.spec.sample_rate == 0 || track_decoder.spec.channels == 0 {
            return Err(PlaybackError::decode(
                path,
                "could not determine sample rate or channel layout",
            ));
        }

        debug!(
            "TrackDecoder: opened path={} sample_rate={} channels={}",
            path.display(),
            track_decoder.spec.sample_rate,
            track_decoder.spec.channels
        );
        Ok(track_decoder)
    }

    pub fn spec(&self) -> StreamSpec {
        self.spec
    }

    /// Next chunk of interleaved samples, or `None` at end of stream.
    pub fn next_chunk(&mut self) -> Result<Option<Vec<f32>>, PlaybackError> {
        if let Some(pending) = self.pending.take() {
            return Ok(Some(pending));
        }
        self.decode_next()
    }

    fn decode_next(&mut self) -> Result<Option<Vec<f32>>, PlaybackError> {
        if self.finished {
            return Ok(None);
        }

        let mut consecutive_errors = 0usize;
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(err))
                    if err.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    self.finished = true;
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.finished = true;
                    return Ok(None);
                }
                Err(err) => return Err(PlaybackError::decode(&self.path, err)),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    if decoded.frames() == 0 {
                        continue;
                    }
                    if self.spec.sample_rate == 0 {
                        self.spec.sample_rate = spec.rate;
                    }
                    if self.spec.channels == 0 {
                        self.spec.channels = spec.channels.count();
                    }

                    let required = decoded.capacity() * spec.channels.count();
                    let needs_new_buffer = self
                        .sample_buffer
                        .as_ref()
                        .map(|buffer| buffer.capacity() < required)
                        .unwrap_or(true);
                    if needs_new_buffer {
                        self.sample_buffer =
                            Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
                    }
                    let Some(buffer) = self.sample_buffer.as_mut() else {
                        continue;
                    };
                    buffer.copy_interleaved_ref(decoded);
                    return Ok(Some(buffer.samples().to_vec()));
                }
                Err(SymphoniaError::DecodeError(reason)) => {
                    consecutive_errors += 1;
                    warn!(
                        "TrackDecoder: skipping corrupt packet path={} reason={}",
                        self.path.display(),
                        reason
                    );
                    if consecutive_errors >= MAX_CONSECUTIVE_DECODE_ERRORS {
                        return Err(PlaybackError::decode(&self.path, reason));
                    }
                }
                Err(err) => return Err(PlaybackError::decode(&self.path, err)),
            }
        }
    }
}
