use crate::math;
use crate::types::{Pose, RelativePose, Sample};

/// Latch state of a [`ReferenceFrameTracker`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LatchState {
    Idle,
    Latched { reference: Pose },
}

/// Latches a reference pose on a trigger press and reports poses relative to it.
///
/// - Idle + trigger press edge: latch the current pose.
/// - Latched + trigger released: back to Idle.
/// - Latched + menu button: rebase onto the current pose.
///
/// A rebase takes effect from the next sample; the sample carrying the menu
/// press is still reported against the old reference. The menu button does
/// nothing while Idle. State is only ever driven by samples, so a transport
/// reconnect leaves an active latch in place.
#[derive(Debug, Clone)]
pub struct ReferenceFrameTracker {
    state: LatchState,
    trigger_was_pressed: bool,
}

impl ReferenceFrameTracker {
    pub fn new() -> Self {
        Self {
            state: LatchState::Idle,
            trigger_was_pressed: false,
        }
    }

    pub fn state(&self) -> LatchState {
        self.state
    }

    pub fn is_latched(&self) -> bool {
        matches!(self.state, LatchState::Latched { .. })
    }

    /// Advance the state machine with the next sample in arrival order.
    ///
    /// Returns the sample's relative pose, or `None` while Idle.
    pub fn observe(&mut self, sample: &Sample) -> Option<RelativePose> {
        let pressed = sample.trigger_pressed();

        match self.state {
            LatchState::Idle if pressed && !self.trigger_was_pressed => {
                log::debug!("Trigger pressed, latching reference frame");
                self.latch(&sample.pose);
            }
            LatchState::Latched { .. } if !pressed => {
                log::debug!("Trigger released, reference frame cleared");
                self.state = LatchState::Idle;
            }
            _ => {}
        }
        self.trigger_was_pressed = pressed;

        let relative = match self.state {
            LatchState::Latched { reference } => Some(relative_of(&reference, &sample.pose)),
            LatchState::Idle => None,
        };

        if self.is_latched() && sample.menu_pressed() {
            log::debug!("Menu pressed, rebasing reference frame");
            self.latch(&sample.pose);
        }
        relative
    }

    fn latch(&mut self, pose: &Pose) {
        // A degenerate orientation cannot serve as a frame; stay where we are.
        match math::quat_normalize(pose.quaternion) {
            Some(q) => {
                self.state = LatchState::Latched {
                    reference: Pose::new(pose.translation, q),
                }
            }
            None => log::warn!("Refusing to latch a degenerate orientation"),
        }
    }
}

impl Default for ReferenceFrameTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// `current` expressed in the frame of `reference`.
///
/// position = rotate(ref⁻¹, cur.p - ref.p), orientation = ref⁻¹ * cur.q.
pub fn relative_of(reference: &Pose, current: &Pose) -> RelativePose {
    let Some(inv) = math::quat_normalize(reference.quaternion).map(math::quat_conjugate) else {
        return Pose::IDENTITY;
    };
    let delta = math::sub(current.translation, reference.translation);
    let orientation = math::quat_mul(inv, current.quaternion);
    Pose {
        translation: math::rotate_vector(inv, delta),
        quaternion: math::quat_normalize(orientation).unwrap_or(orientation),
    }
}
