//! Fixed playback gain applied after the blur filters.

/// Scales every sample by a volume clamped to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainStage {
    gain: f32,
}

impl GainStage {
    pub fn new(volume: f32) -> Self {
        let gain = if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, 1.0)
        };
        Self { gain }
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn apply(&self, samples: &mut [f32]) {
        if self.gain == 1.0 {
            return;
        }
        for sample in samples {
            *sample *= self.gain;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::GainStage;

    #[test]
    fn test_gain_scales_samples() {
        let mut samples = [0.5, -0.5, 1.0];
        GainStage::new(0.5).apply(&mut samples);
        assert_eq!(samples, [0.25, -0.25, 0.5]);
    }

    #[test]
    fn test_gain_is_clamped_to_unit_range() {
        assert_eq!(GainStage::new(3.0).gain(), 1.0);
        assert_eq!(GainStage::new(-0.2).gain(), 0.0);
        assert_eq!(GainStage::new(f32::NAN).gain(), 0.0);
    }

    #[test]
    fn test_zero_gain_silences() {
        let mut samples = [0.9, -0.3];
        GainStage::new(0.0).apply(&mut samples);
        assert!(samples.iter().all(|s| *s == 0.0));
    }
}
