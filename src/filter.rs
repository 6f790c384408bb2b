use crate::error::StreamError;
use crate::math;
use crate::types::Sample;
use std::time::Instant;

/// Default maximum displacement between consecutive accepted samples, in meters.
pub const DEFAULT_DISTANCE_THRESHOLD: f64 = 0.05;

/// Why a sample was rejected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RejectReason {
    /// Moved further than the threshold since the last accepted sample.
    ImplausibleJump { distance: f64, threshold: f64 },
    /// Position contains NaN or infinity.
    NonFinitePosition { threshold: f64 },
}

impl From<RejectReason> for StreamError {
    fn from(reason: RejectReason) -> Self {
        match reason {
            RejectReason::ImplausibleJump {
                distance,
                threshold,
            } => StreamError::ImplausibleSample {
                distance,
                threshold,
            },
            RejectReason::NonFinitePosition { threshold } => StreamError::ImplausibleSample {
                distance: f64::INFINITY,
                threshold,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    Accept,
    Reject(RejectReason),
}

/// Drops samples that jump implausibly far from the last good one.
///
/// Occlusion glitches show up as single-sample position spikes, so a spike
/// rejects the whole sample. Rejected samples never replace the retained
/// reference, so back-to-back glitches are all measured against the last
/// good pose.
#[derive(Debug, Clone)]
pub struct SampleFilter {
    distance_threshold: f64,
    previous: Option<(Sample, Instant)>,
}

impl SampleFilter {
    pub fn new(distance_threshold: f64) -> Self {
        Self {
            distance_threshold,
            previous: None,
        }
    }

    pub fn check(&mut self, sample: &Sample, arrival: Instant) -> Verdict {
        // NaN compares false against the threshold, so it must never become `previous`.
        if !sample.pose.translation.iter().all(|c| c.is_finite()) {
            return Verdict::Reject(RejectReason::NonFinitePosition {
                threshold: self.distance_threshold,
            });
        }
        if let Some((prev, prev_arrival)) = &self.previous {
            let distance = math::distance(sample.pose.translation, prev.pose.translation);
            let dt = arrival.saturating_duration_since(*prev_arrival).as_secs_f64();
            if dt > 0.0 {
                log::trace!("Velocity: {:.3} m/s over {:.4} s", distance / dt, dt);
            }
            if distance > self.distance_threshold {
                return Verdict::Reject(RejectReason::ImplausibleJump {
                    distance,
                    threshold: self.distance_threshold,
                });
            }
        }
        self.previous = Some((sample.clone(), arrival));
        Verdict::Accept
    }

    /// Forget the retained sample, e.g. after the device went away.
    pub fn reset(&mut self) {
        self.previous = None;
    }

    pub fn previous(&self) -> Option<&Sample> {
        self.previous.as_ref().map(|(s, _)| s)
    }

    pub fn distance_threshold(&self) -> f64 {
        self.distance_threshold
    }
}

impl Default for SampleFilter {
    fn default() -> Self {
        Self::new(DEFAULT_DISTANCE_THRESHOLD)
    }
}
