/// 6DOF pose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    /// Translation in meters [x, y, z].
    pub translation: [f64; 3],
    /// Unit quaternion [qx, qy, qz, qw].
    pub quaternion: [f64; 4],
}

impl Pose {
    pub const IDENTITY: Pose = Pose {
        translation: [0.0, 0.0, 0.0],
        quaternion: [0.0, 0.0, 0.0, 1.0],
    };

    pub fn new(translation: [f64; 3], quaternion: [f64; 4]) -> Self {
        Self {
            translation,
            quaternion,
        }
    }
}

impl Default for Pose {
    fn default() -> Self {
        Pose::IDENTITY
    }
}

/// Pose of the current sample expressed in the latched reference frame.
pub type RelativePose = Pose;

bitflags::bitflags! {
    /// Digital button state of a tracked controller.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Buttons: u8 {
        const MENU            = 1 << 0;
        const TRIGGER         = 1 << 1;
        const TRACKPAD_TOUCH  = 1 << 2;
        const TRACKPAD_BUTTON = 1 << 3;
        const GRIP            = 1 << 4;
    }
}

/// Controller role reported by the tracking runtime.
///
/// Travels on the wire as its integer value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    #[default]
    Invalid,
    LeftHand,
    RightHand,
    OptOut,
    Treadmill,
    Other(u8),
}

impl From<u8> for Role {
    fn from(value: u8) -> Self {
        match value {
            0 => Role::Invalid,
            1 => Role::LeftHand,
            2 => Role::RightHand,
            3 => Role::OptOut,
            4 => Role::Treadmill,
            other => Role::Other(other),
        }
    }
}

impl From<Role> for u8 {
    fn from(role: Role) -> Self {
        match role {
            Role::Invalid => 0,
            Role::LeftHand => 1,
            Role::RightHand => 2,
            Role::OptOut => 3,
            Role::Treadmill => 4,
            Role::Other(v) => v,
        }
    }
}

/// One timestamped pose + button observation from a tracked device.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sample {
    pub pose: Pose,
    pub buttons: Buttons,
    /// Trackpad axes [x, y] in -1..1.
    pub trackpad: [f64; 2],
    /// Analog trigger travel in 0..1.
    pub trigger: f64,
    pub role: Role,
    /// Wall-clock time with millisecond precision. Payload only, never used for framing.
    pub time: String,
}

impl Sample {
    pub fn trigger_pressed(&self) -> bool {
        self.buttons.contains(Buttons::TRIGGER)
    }

    pub fn menu_pressed(&self) -> bool {
        self.buttons.contains(Buttons::MENU)
    }
}

/// Connectivity as seen by the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Device class reported by the tracking runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Hmd,
    Controller,
    GenericTracker,
    TrackingReference,
    Other,
}

/// Raw per-device state handed over by the hardware layer on each poll.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReading {
    pub class: DeviceClass,
    pub role: Role,
    /// Connected, pose valid and tracking running normally.
    pub tracking_ok: bool,
    /// Native-frame translation in meters.
    pub translation: [f64; 3],
    /// Native-frame quaternion [qx, qy, qz, qw], not necessarily normalized.
    pub quaternion: [f64; 4],
    pub buttons: Buttons,
    pub trackpad: [f64; 2],
    pub trigger: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_integer_mapping() {
        for v in 0u8..=8 {
            assert_eq!(u8::from(Role::from(v)), v);
        }
        assert_eq!(Role::from(2), Role::RightHand);
        assert_eq!(Role::from(9), Role::Other(9));
    }

    #[test]
    fn test_sample_button_helpers() {
        let mut s = Sample::default();
        assert!(!s.trigger_pressed());
        s.buttons = Buttons::TRIGGER | Buttons::GRIP;
        assert!(s.trigger_pressed());
        assert!(!s.menu_pressed());
    }
}
