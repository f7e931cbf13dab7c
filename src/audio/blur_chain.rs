//! Derives low-pass stages from a blur amount and runs them with the gain stage.

use log::debug;

use super::filter::{ChannelFilters, FilterStage};
use super::gain::GainStage;

const MIN_CUTOFF_HZ: f32 = 50.0;
const CUTOFF_SCALE: f32 = 0.3;
const SECOND_STAGE_BLUR_THRESHOLD: f32 = 0.5;
const SECOND_STAGE_CUTOFF_RATIO: f32 = 0.8;

/// Low-pass stages producing the requested blur, in processing order.
///
/// A single stage at `cutoff` for light blur; a second stage at
/// `cutoff * 0.8` is cascaded once the blur amount exceeds 0.5.
pub fn build_blur_chain(sample_rate: f32, blur_amount: f32) -> Vec<FilterStage> {
    let blur_amount = if blur_amount.is_nan() {
        0.0
    } else {
        blur_amount.clamp(0.0, 1.0)
    };
    let max_cutoff = sample_rate * 0.5;
    let blur_factor = blur_amount * blur_amount;
    let cutoff = (max_cutoff * (1.0 - blur_factor) * CUTOFF_SCALE)
        .max(MIN_CUTOFF_HZ)
        .min(max_cutoff);

    let mut stages = vec![FilterStage::low_pass(cutoff)];
    if blur_amount > SECOND_STAGE_BLUR_THRESHOLD {
        stages.push(FilterStage::low_pass(cutoff * SECOND_STAGE_CUTOFF_RATIO));
    }
    stages
}

/// Stateful filter cascade plus gain for one interleaved stream.
#[derive(Debug, Clone)]
pub struct BlurChain {
    stages: Vec<FilterStage>,
    filters: Vec<ChannelFilters>,
    gain: GainStage,
}

impl BlurChain {
    pub fn new(sample_rate: u32, channels: usize, blur_amount: f32, volume: f32) -> Self {
        let stages = build_blur_chain(sample_rate as f32, blur_amount);
        let filters = stages
            .iter()
            .map(|stage| stage.instantiate(sample_rate as f32, channels))
            .collect();
        let gain = GainStage::new(volume);
        debug!(
            "BlurChain: built stages={:?} gain={} sample_rate={} channels={}",
            stages,
            gain.gain(),
            sample_rate,
            channels
        );
        Self {
            stages,
            filters,
            gain,
        }
    }

    pub fn stages(&self) -> &[FilterStage] {
        &self.stages
    }

    /// Filters then scales an interleaved chunk in place.
    pub fn process(&mut self, samples: &mut [f32]) {
        for filter in &mut self.filters {
            filter.process_interleaved(samples);
        }
        self.gain.apply(samples);
    }
}
