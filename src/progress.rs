//! Countdown progress to presentation mapping.
//!
//! Converts "days remaining until the target date" into the four values the
//! overlay renderer and the blurred audio cue consume. Everything here is pure.

use time::Date;

const HALFWAY: f64 = 0.5;
const MAX_AUDIO_BLUR: f64 = 0.99;

/// Position inside the countdown window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressState {
    pub days_remaining: i64,
    pub countdown_days: u32,
}

impl ProgressState {
    pub fn new(days_remaining: i64, countdown_days: u32) -> Self {
        Self {
            days_remaining,
            countdown_days,
        }
    }

    /// Normalized position: 1.0 when the countdown just started, 0.0 on the target date.
    pub fn progress(&self) -> f64 {
        let window = f64::from(self.countdown_days.max(1));
        (self.days_remaining as f64 / window).clamp(0.0, 1.0)
    }
}

/// Values handed to the renderer (opacities) and the audio cue (blur, volume).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PresentationParameters {
    pub character_opacity: f64,
    pub ice_opacity: f64,
    pub audio_blur: f64,
    pub audio_volume: f64,
}

/// Maps a countdown position to its presentation.
///
/// `countdown_days` must be at least 1; callers must not ask for a negative
/// `days_remaining` (the event has passed and nothing is presented).
pub fn map_progress(days_remaining: i64, countdown_days: u32) -> PresentationParameters {
    presentation_for_progress(ProgressState::new(days_remaining, countdown_days).progress())
}

/// Same schedule, driven directly by a normalized progress value.
pub fn presentation_for_progress(progress: f64) -> PresentationParameters {
    let progress = if progress.is_nan() {
        0.0
    } else {
        progress.clamp(0.0, 1.0)
    };

    // The character only appears in the second half; the ice fades in over
    // the first half and back out over the second.
    let (character_opacity, ice_opacity) = if progress > HALFWAY {
        let t = (1.0 - progress) / HALFWAY;
        (0.0, 0.2 + 0.8 * t)
    } else {
        (1.0, progress / HALFWAY)
    };

    let audio_blur = MAX_AUDIO_BLUR * progress;

    // First day is played loud to compensate for the heaviest blur.
    let audio_volume = if progress >= 1.0 {
        1.0
    } else if progress > HALFWAY {
        let t = (1.0 - progress) / HALFWAY;
        0.2 + 0.2 * t
    } else {
        let t = (HALFWAY - progress) / HALFWAY;
        0.5 + 0.5 * t
    };

    PresentationParameters {
        character_opacity,
        ice_opacity,
        audio_blur,
        audio_volume,
    }
}

/// Whole calendar days from `today` until `target`; negative once it has passed.
pub fn days_remaining(target: Date, today: Date) -> i64 {
    (target - today).whole_days()
}

#[cfg(test)]
mod tests {
    use super::{days_remaining, map_progress, presentation_for_progress, ProgressState};
    use time::macros::date;

    const EPSILON: f64 = 1e-9;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < EPSILON,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn test_first_day_of_countdown() {
        let params = map_progress(7, 7);
        assert_close(params.audio_volume, 1.0);
        assert_close(params.audio_blur, 0.99);
        assert_close(params.character_opacity, 0.0);
        assert_close(params.ice_opacity, 0.2);
    }

    #[test]
    fn test_target_date() {
        let params = map_progress(0, 7);
        assert_close(params.character_opacity, 1.0);
        assert_close(params.ice_opacity, 0.0);
        assert_close(params.audio_blur, 0.0);
        assert_close(params.audio_volume, 1.0);
    }

    #[test]
    fn test_halfway_belongs_to_late_branch() {
        let params = map_progress(3, 6);
        assert_close(params.character_opacity, 1.0);
        assert_close(params.ice_opacity, 1.0);
        assert_close(params.audio_volume, 0.5);
    }

    #[test]
    fn test_ice_opacity_is_continuous_across_halfway() {
        let above = presentation_for_progress(0.5 + 1e-9);
        let below = presentation_for_progress(0.5 - 1e-9);
        assert!((above.ice_opacity - 1.0).abs() < 1e-6);
        assert!((below.ice_opacity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_character_opacity_jumps_at_halfway() {
        let above = presentation_for_progress(0.5 + 1e-9);
        let below = presentation_for_progress(0.5 - 1e-9);
        assert_close(above.character_opacity, 0.0);
        assert_close(below.character_opacity, 1.0);
    }

    #[test]
    fn test_volume_drops_just_after_first_day() {
        let first_day = presentation_for_progress(1.0);
        let next = presentation_for_progress(1.0 - 1e-6);
        assert_close(first_day.audio_volume, 1.0);
        assert!((next.audio_volume - 0.2).abs() < 1e-5);
    }

    #[test]
    fn test_early_volume_range() {
        // 0.75 progress sits halfway through the 0.2 -> 0.4 ramp.
        assert_close(presentation_for_progress(0.75).audio_volume, 0.3);
    }

    #[test]
    fn test_all_outputs_stay_in_unit_range() {
        for countdown_days in 1..=30u32 {
            for days in 0..=i64::from(countdown_days) {
                let params = map_progress(days, countdown_days);
                for value in [
                    params.character_opacity,
                    params.ice_opacity,
                    params.audio_blur,
                    params.audio_volume,
                ] {
                    assert!(
                        (0.0..=1.0).contains(&value),
                        "days={days} window={countdown_days} value={value}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_audio_blur_is_monotonic_in_progress() {
        let mut previous = f64::NEG_INFINITY;
        for step in 0..=1_000 {
            let blur = presentation_for_progress(step as f64 / 1_000.0).audio_blur;
            assert!(blur >= previous);
            previous = blur;
        }
    }

    #[test]
    fn test_progress_is_clamped_outside_window() {
        assert_close(ProgressState::new(40, 7).progress(), 1.0);
        assert_close(ProgressState::new(-3, 7).progress(), 0.0);
        assert_close(ProgressState::new(1, 0).progress(), 1.0);
    }

    #[test]
    fn test_days_remaining_counts_calendar_days() {
        assert_eq!(days_remaining(date!(2026 - 12 - 25), date!(2026 - 12 - 18)), 7);
        assert_eq!(days_remaining(date!(2026 - 12 - 25), date!(2026 - 12 - 25)), 0);
        assert_eq!(days_remaining(date!(2027 - 01 - 01), date!(2026 - 12 - 31)), 1);
        assert_eq!(days_remaining(date!(2026 - 12 - 25), date!(2026 - 12 - 26)), -1);
    }
}
