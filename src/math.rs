//! Quaternion and vector helpers.
//!
//! Quaternions are `[x, y, z, w]`, matching [`Pose::quaternion`].

use crate::types::Pose;

/// Squared norms below this are treated as a degenerate quaternion.
const DEGENERATE_NORM_SQ: f64 = 1e-12;

/// Hamilton product `a * b`.
pub fn quat_mul(a: [f64; 4], b: [f64; 4]) -> [f64; 4] {
    let [ax, ay, az, aw] = a;
    let [bx, by, bz, bw] = b;
    [
        aw * bx + ax * bw + ay * bz - az * by,
        aw * by - ax * bz + ay * bw + az * bx,
        aw * bz + ax * by - ay * bx + az * bw,
        aw * bw - ax * bx - ay * by - az * bz,
    ]
}

pub fn quat_conjugate(q: [f64; 4]) -> [f64; 4] {
    [-q[0], -q[1], -q[2], q[3]]
}

fn norm_sq(q: [f64; 4]) -> f64 {
    q.iter().map(|c| c * c).sum()
}

/// Scale `q` to unit length. `None` if `q` is (near) zero.
pub fn quat_normalize(q: [f64; 4]) -> Option<[f64; 4]> {
    let n2 = norm_sq(q);
    if !n2.is_finite() || n2 < DEGENERATE_NORM_SQ {
        return None;
    }
    let n = n2.sqrt();
    Some([q[0] / n, q[1] / n, q[2] / n, q[3] / n])
}

/// Multiplicative inverse. Equals the conjugate for unit quaternions.
pub fn quat_inverse(q: [f64; 4]) -> Option<[f64; 4]> {
    let n2 = norm_sq(q);
    if !n2.is_finite() || n2 < DEGENERATE_NORM_SQ {
        return None;
    }
    let c = quat_conjugate(q);
    Some([c[0] / n2, c[1] / n2, c[2] / n2, c[3] / n2])
}

/// Rotate `v` by `q`: `q * (v, 0) * q⁻¹`. `q` must be unit length.
pub fn rotate_vector(q: [f64; 4], v: [f64; 3]) -> [f64; 3] {
    let p = [v[0], v[1], v[2], 0.0];
    let r = quat_mul(quat_mul(q, p), quat_conjugate(q));
    [r[0], r[1], r[2]]
}

pub fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

pub fn distance(a: [f64; 3], b: [f64; 3]) -> f64 {
    let d = sub(a, b);
    (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt()
}

/// Coordinate convention of published poses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameConvention {
    /// Tracking runtime frame: y up, -z forward.
    Native,
    /// Consumer frame: x forward, y left, z up.
    #[default]
    Consumer,
}

/// Express a native-frame pose in `convention`.
///
/// `Consumer` applies the fixed proper rotation
/// `(x, y, z) -> (-z, -x, y)` to both the translation and the quaternion
/// vector part. Any change to the consumer frame belongs here and nowhere else.
pub fn remap(pose: &Pose, convention: FrameConvention) -> Pose {
    match convention {
        FrameConvention::Native => *pose,
        FrameConvention::Consumer => {
            let [x, y, z] = pose.translation;
            let [qx, qy, qz, qw] = pose.quaternion;
            Pose {
                translation: [-z, -x, y],
                quaternion: [-qz, -qx, qy, qw],
            }
        }
    }
}

/// Roll/pitch/yaw in degrees (rotation about x, y, z, applied z-y-x).
pub fn euler_degrees(q: [f64; 4]) -> [f64; 3] {
    let [x, y, z, w] = q;
    let roll = (2.0 * (w * x + y * z)).atan2(1.0 - 2.0 * (x * x + y * y));
    let pitch = (2.0 * (w * y - z * x)).clamp(-1.0, 1.0).asin();
    let yaw = (2.0 * (w * z + x * y)).atan2(1.0 - 2.0 * (y * y + z * z));
    [roll.to_degrees(), pitch.to_degrees(), yaw.to_degrees()]
}
