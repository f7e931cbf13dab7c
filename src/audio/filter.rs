//! Biquad low-pass filtering applied per channel to interleaved f32 audio.

use std::f64::consts::PI;

/// Q factor used by every blur stage.
pub const DEFAULT_Q: f32 = 1.0;

/// Normalized (a0 = 1) RBJ biquad coefficients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoefficients {
    pub b0: f32,
    pub b1: f32,
    pub b2: f32,
    pub a1: f32,
    pub a2: f32,
}

impl BiquadCoefficients {
    /// Second-order low-pass from the RBJ audio EQ cookbook.
    ///
    /// The cutoff is kept strictly inside (0, Nyquist) so the filter stays stable.
    pub fn low_pass(sample_rate: f32, cutoff_hz: f32, q: f32) -> Self {
        let sample_rate = f64::from(sample_rate.max(1.0));
        let cutoff = f64::from(cutoff_hz).clamp(1.0, sample_rate * 0.49);
        let q = f64::from(q).max(0.01);

        let w0 = 2.0 * PI * cutoff / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);

        let b0 = (1.0 - cos_w0) / 2.0;
        let b1 = 1.0 - cos_w0;
        let b2 = (1.0 - cos_w0) / 2.0;
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_w0;
        let a2 = 1.0 - alpha;

        Self {
            b0: (b0 / a0) as f32,
            b1: (b1 / a0) as f32,
            b2: (b2 / a0) as f32,
            a1: (a1 / a0) as f32,
            a2: (a2 / a0) as f32,
        }
    }
}

/// Direct-form I biquad holding the state of one channel.
#[derive(Debug, Clone)]
pub struct Biquad {
    coefficients: BiquadCoefficients,
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl Biquad {
    pub fn new(coefficients: BiquadCoefficients) -> Self {
        Self {
            coefficients,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    #[inline]
    pub fn transform(&mut self, input: f32) -> f32 {
        let c = &self.coefficients;
        let output = c.b0 * input + c.b1 * self.x1 + c.b2 * self.x2
            - c.a1 * self.y1
            - c.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;
        output
    }
}

/// Description of one low-pass pass in a blur chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterStage {
    pub cutoff_hz: f32,
    pub q: f32,
}

impl FilterStage {
    pub fn low_pass(cutoff_hz: f32) -> Self {
        Self {
            cutoff_hz,
            q: DEFAULT_Q,
        }
    }

    /// Instantiates independent filter state for each channel of a stream.
    pub fn instantiate(&self, sample_rate: f32, channels: usize) -> ChannelFilters {
        let coefficients = BiquadCoefficients::low_pass(sample_rate, self.cutoff_hz, self.q);
        ChannelFilters {
            filters: (0..channels.max(1))
                .map(|_| Biquad::new(coefficients))
                .collect(),
        }
    }
}

/// One filter per channel. Channels never mix.
#[derive(Debug, Clone)]
pub struct ChannelFilters {
    filters: Vec<Biquad>,
}

impl ChannelFilters {
    pub fn channels(&self) -> usize {
        self.filters.len()
    }

    /// Filters an interleaved buffer in place. A trailing partial frame is
    /// still routed to the filters of the channels it contains.
    pub fn process_interleaved(&mut self, samples: &mut [f32]) {
        let channels = self.filters.len();
        for frame in samples.chunks_mut(channels) {
            for (sample, filter) in frame.iter_mut().zip(self.filters.iter_mut()) {
                *sample = filter.transform(*sample);
            }
        }
    }
}
