//! Wire format for samples.
//!
//! Each sample travels as one self-contained JSON object:
//!
//! ```text
//! {"pose":{"x":..,"y":..,"z":..,"qx":..,"qy":..,"qz":..,"qw":..},
//!  "buttons":{"menu":b,"trigger":b,"trackpad_touch":b,"trackpad_button":b,"grip":b},
//!  "trackpad":{"x":..,"y":..},"trigger":f,"role":n,"time":"2024-05-01 12:00:00.123"}
//! ```
//!
//! There is no length prefix or delimiter. The receiver finds record
//! boundaries by parsing whatever it has buffered; see [`RecordDecoder`].

use crate::math;
use crate::types::{Buttons, Pose, Role, Sample};
use crate::{Result, StreamError};
use serde::{Deserialize, Serialize};

/// Default TCP port of the device-side server.
pub const DEFAULT_PORT: u16 = 12345;

/// Bytes a [`RecordDecoder`] may hold while waiting for a record to complete.
pub const MAX_BUFFERED: usize = 64 * 1024;

/// Format of the `time` field.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

#[derive(Debug, Serialize, Deserialize)]
struct WireRecord {
    pose: WirePose,
    buttons: WireButtons,
    trackpad: WireAxes,
    trigger: f64,
    role: u8,
    time: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct WirePose {
    x: f64,
    y: f64,
    z: f64,
    qx: f64,
    qy: f64,
    qz: f64,
    qw: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireButtons {
    menu: bool,
    trigger: bool,
    trackpad_touch: bool,
    trackpad_button: bool,
    grip: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireAxes {
    x: f64,
    y: f64,
}

impl From<&Sample> for WireRecord {
    fn from(s: &Sample) -> Self {
        let [x, y, z] = s.pose.translation;
        let [qx, qy, qz, qw] = s.pose.quaternion;
        WireRecord {
            pose: WirePose {
                x,
                y,
                z,
                qx,
                qy,
                qz,
                qw,
            },
            buttons: WireButtons {
                menu: s.buttons.contains(Buttons::MENU),
                trigger: s.buttons.contains(Buttons::TRIGGER),
                trackpad_touch: s.buttons.contains(Buttons::TRACKPAD_TOUCH),
                trackpad_button: s.buttons.contains(Buttons::TRACKPAD_BUTTON),
                grip: s.buttons.contains(Buttons::GRIP),
            },
            trackpad: WireAxes {
                x: s.trackpad[0],
                y: s.trackpad[1],
            },
            trigger: s.trigger,
            role: s.role.into(),
            time: s.time.clone(),
        }
    }
}

impl TryFrom<WireRecord> for Sample {
    type Error = StreamError;

    fn try_from(r: WireRecord) -> Result<Sample> {
        let p = r.pose;
        // Senders normalize, but precision loss in transit is possible.
        let quaternion = math::quat_normalize([p.qx, p.qy, p.qz, p.qw])
            .ok_or_else(|| StreamError::Decode("degenerate orientation quaternion".into()))?;

        let mut buttons = Buttons::empty();
        buttons.set(Buttons::MENU, r.buttons.menu);
        buttons.set(Buttons::TRIGGER, r.buttons.trigger);
        buttons.set(Buttons::TRACKPAD_TOUCH, r.buttons.trackpad_touch);
        buttons.set(Buttons::TRACKPAD_BUTTON, r.buttons.trackpad_button);
        buttons.set(Buttons::GRIP, r.buttons.grip);

        Ok(Sample {
            pose: Pose::new([p.x, p.y, p.z], quaternion),
            buttons,
            trackpad: [r.trackpad.x, r.trackpad.y],
            trigger: r.trigger,
            role: Role::from(r.role),
            time: r.time,
        })
    }
}

/// Serialize one sample as a wire record.
pub fn encode(sample: &Sample) -> Result<Vec<u8>> {
    serde_json::to_vec(&WireRecord::from(sample))
        .map_err(|e| StreamError::Encode(e.to_string()))
}

/// Parse exactly one wire record.
///
/// Truncated input, trailing bytes, missing fields and mistyped fields are
/// all reported as [`StreamError::Decode`].
pub fn decode(buffer: &[u8]) -> Result<Sample> {
    let record: WireRecord = serde_json::from_slice(buffer)?;
    Sample::try_from(record)
}

/// Current local time in the wire `time` format.
pub fn timestamp_now() -> String {
    chrono::Local::now().format(TIME_FORMAT).to_string()
}

/// Reassembles records from an undelimited byte stream.
///
/// Bytes are appended with [`push`](Self::push); [`next_record`](Self::next_record)
/// yields each complete record as soon as it is buffered. An incomplete
/// tail stays buffered until more bytes arrive. Malformed input yields a
/// [`StreamError::Decode`] and the decoder skips ahead to the next `{` so
/// the following record can still be read.
///
/// A record cut off right after a `:` swallows the next record as its
/// nested value, so both are lost and decoding resumes one record later.
#[derive(Debug, Default)]
pub struct RecordDecoder {
    buffer: Vec<u8>,
}

impl RecordDecoder {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes currently held for an incomplete record.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop everything buffered, e.g. when the connection is replaced.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Next complete record, `None` if more bytes are needed.
    pub fn next_record(&mut self) -> Option<Result<Sample>> {
        let start = match self.buffer.iter().position(|b| !b.is_ascii_whitespace()) {
            Some(start) => start,
            None => {
                self.buffer.clear();
                return None;
            }
        };
        self.buffer.drain(..start);

        if self.buffer[0] != b'{' {
            return Some(Err(self.skip_to_next_object("record does not start with '{'")));
        }

        // Parse structure first so a schema error consumes exactly one object.
        let mut stream =
            serde_json::Deserializer::from_slice(&self.buffer).into_iter::<serde_json::Value>();
        match stream.next() {
            None => None,
            Some(Ok(value)) => {
                let consumed = stream.byte_offset();
                self.buffer.drain(..consumed);
                Some(
                    serde_json::from_value::<WireRecord>(value)
                        .map_err(StreamError::from)
                        .and_then(Sample::try_from),
                )
            }
            Some(Err(e)) if e.is_eof() => {
                if self.buffer.len() > MAX_BUFFERED {
                    self.buffer.clear();
                    return Some(Err(StreamError::Decode(format!(
                        "incomplete record exceeds {} bytes",
                        MAX_BUFFERED
                    ))));
                }
                None
            }
            Some(Err(e)) => Some(Err(self.skip_to_next_object(&e.to_string()))),
        }
    }

    /// Discard up to the next `{` that can start a record.
    ///
    /// A `{` right after `:`, `,` or `[` opens a nested value, not a record.
    fn skip_to_next_object(&mut self, reason: &str) -> StreamError {
        let mut prev = self.buffer[0];
        let mut next_start = None;
        for (i, &b) in self.buffer.iter().enumerate().skip(1) {
            if b == b'{' && !matches!(prev, b':' | b',' | b'[') {
                next_start = Some(i);
                break;
            }
            if !b.is_ascii_whitespace() {
                prev = b;
            }
        }
        match next_start {
            Some(i) => {
                self.buffer.drain(..i);
            }
            None => self.buffer.clear(),
        }
        StreamError::Decode(reason.to_string())
    }
}
