use crate::channel::SampleChannel;
use crate::filter::{SampleFilter, Verdict};
use crate::math;
use crate::protocol;
use crate::shutdown::Shutdown;
use crate::types::{DeviceClass, DeviceReading, Pose, Role, Sample};
use crate::{Result, StreamError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Source of raw device readings, polled once per sampling tick.
///
/// This is the seam to the tracking runtime. Returning an empty list or
/// [`StreamError::DeviceUnavailable`] both mean "nothing tracked right now".
pub trait DeviceSource: Send {
    fn poll_devices(&mut self) -> Result<Vec<DeviceReading>>;
}

impl<F> DeviceSource for F
where
    F: FnMut() -> Result<Vec<DeviceReading>> + Send,
{
    fn poll_devices(&mut self) -> Result<Vec<DeviceReading>> {
        self()
    }
}

/// Which reading the sampler streams: the first one matching all set fields.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoleCriteria {
    pub class: Option<DeviceClass>,
    pub role: Option<Role>,
}

impl RoleCriteria {
    pub fn matches(&self, reading: &DeviceReading) -> bool {
        reading.tracking_ok
            && self.class.map_or(true, |c| c == reading.class)
            && self.role.map_or(true, |r| r == reading.role)
    }
}

impl Default for RoleCriteria {
    fn default() -> Self {
        Self {
            class: Some(DeviceClass::GenericTracker),
            role: None,
        }
    }
}

/// Sampling cadence.
#[derive(Debug, Clone, Copy)]
pub struct SamplerTiming {
    /// Sleep between polls while a device is tracked (~200 Hz).
    pub tracked_interval: Duration,
    /// Sleep between polls while nothing is tracked (~20 Hz).
    pub idle_interval: Duration,
    /// Absence after which the filter forgets the last pose.
    pub idle_reset: Duration,
}

impl Default for SamplerTiming {
    fn default() -> Self {
        Self {
            tracked_interval: Duration::from_millis(5),
            idle_interval: Duration::from_millis(50),
            idle_reset: Duration::from_secs(1),
        }
    }
}

/// What a single [`Sampler::tick`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Published,
    Rejected,
    NoDevice,
}

/// Lets a repeating log line through at most once per interval.
#[derive(Debug, Clone, Copy)]
struct LogThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl LogThrottle {
    fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    fn ready(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// Producer half of the pipeline: poll, filter, publish.
pub struct Sampler<S: DeviceSource> {
    source: S,
    criteria: RoleCriteria,
    filter: SampleFilter,
    channel: Arc<SampleChannel>,
    timing: SamplerTiming,
    last_seen: Instant,
    idle_log: LogThrottle,
    poll_error_log: LogThrottle,
    poll_errors: u64,
    rejected: u64,
}

impl<S: DeviceSource> Sampler<S> {
    pub fn new(
        source: S,
        criteria: RoleCriteria,
        filter: SampleFilter,
        channel: Arc<SampleChannel>,
        timing: SamplerTiming,
    ) -> Self {
        let now = Instant::now();
        Self {
            source,
            criteria,
            filter,
            channel,
            timing,
            last_seen: now,
            idle_log: LogThrottle::new(Duration::from_secs(1)),
            poll_error_log: LogThrottle::new(Duration::from_secs(1)),
            poll_errors: 0,
            rejected: 0,
        }
    }

    pub fn filter(&self) -> &SampleFilter {
        &self.filter
    }

    /// Failed polls other than [`StreamError::DeviceUnavailable`].
    pub fn poll_errors(&self) -> u64 {
        self.poll_errors
    }

    /// Samples dropped by the filter so far.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    /// Poll the source once and publish an accepted sample.
    pub fn tick(&mut self) -> TickOutcome {
        let now = Instant::now();
        let readings = match self.source.poll_devices() {
            Ok(r) => r,
            Err(StreamError::DeviceUnavailable) => Vec::new(),
            Err(e) => {
                self.poll_errors += 1;
                if self.poll_error_log.ready(now) {
                    log::warn!(
                        "{}: device poll failed: {} ({} failures so far)",
                        e.kind(),
                        e,
                        self.poll_errors
                    );
                } else {
                    log::trace!("{}: device poll failed: {}", e.kind(), e);
                }
                Vec::new()
            }
        };

        let Some(reading) = readings.iter().find(|r| self.criteria.matches(r)) else {
            self.idle(now);
            return TickOutcome::NoDevice;
        };
        self.last_seen = now;

        let Some(quaternion) = math::quat_normalize(reading.quaternion) else {
            log::warn!("implausible_sample: degenerate orientation from device, skipping");
            self.rejected += 1;
            return TickOutcome::Rejected;
        };
        let sample = Sample {
            pose: Pose::new(reading.translation, quaternion),
            buttons: reading.buttons,
            trackpad: reading.trackpad,
            trigger: reading.trigger,
            role: reading.role,
            time: protocol::timestamp_now(),
        };

        if log::log_enabled!(log::Level::Debug) {
            let [x, y, z] = sample.pose.translation;
            let [roll, pitch, yaw] = math::euler_degrees(quaternion);
            log::debug!(
                "pose cm=[{:+.2}, {:+.2}, {:+.2}] euler deg=[{:+.1}, {:+.1}, {:+.1}]",
                x * 100.0,
                y * 100.0,
                z * 100.0,
                roll,
                pitch,
                yaw
            );
        }

        match self.filter.check(&sample, now) {
            Verdict::Accept => {
                self.channel.publish(sample);
                TickOutcome::Published
            }
            Verdict::Reject(reason) => {
                self.rejected += 1;
                let err = StreamError::from(reason);
                log::warn!("{}: {}, skipping sample", err.kind(), err);
                TickOutcome::Rejected
            }
        }
    }

    fn idle(&mut self, now: Instant) {
        let absent = now.saturating_duration_since(self.last_seen);
        if absent >= self.timing.idle_reset && self.idle_log.ready(now) {
            log::info!("device_unavailable: no tracker detected for {:.1}s", absent.as_secs_f64());
        }
        if absent >= self.timing.idle_reset && self.filter.previous().is_some() {
            log::debug!("Tracker absent, resetting sample filter");
            self.filter.reset();
        }
    }

    /// Run until shutdown, sleeping between ticks according to the timing.
    pub fn run(&mut self, shutdown: &Shutdown) {
        log::info!("Sampler started");
        while !shutdown.is_triggered() {
            let pause = match self.tick() {
                TickOutcome::NoDevice => self.timing.idle_interval,
                TickOutcome::Published | TickOutcome::Rejected => self.timing.tracked_interval,
            };
            if !shutdown.sleep(pause) {
                break;
            }
        }
        log::info!("Sampler stopping ({} samples rejected)", self.rejected);
    }
}

impl<S: DeviceSource + 'static> Sampler<S> {
    /// Move the sampler onto its own thread.
    pub fn spawn(mut self, shutdown: Shutdown) -> Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("pose-sampler".into())
            .spawn(move || self.run(&shutdown))
            .map_err(StreamError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Buttons;
    use std::collections::VecDeque;

    fn reading(x: f64) -> DeviceReading {
        DeviceReading {
            class: DeviceClass::GenericTracker,
            role: Role::RightHand,
            tracking_ok: true,
            translation: [x, 0.0, 0.0],
            quaternion: [0.0, 0.0, 0.0, 2.0],
            buttons: Buttons::TRIGGER,
            trackpad: [0.0, 0.0],
            trigger: 1.0,
        }
    }

    fn scripted(polls: Vec<Vec<DeviceReading>>) -> impl DeviceSource {
        let mut polls: VecDeque<_> = polls.into();
        move || Ok(polls.pop_front().unwrap_or_default())
    }

    fn sampler<S: DeviceSource>(source: S, timing: SamplerTiming) -> (Sampler<S>, Arc<SampleChannel>) {
        let channel = Arc::new(SampleChannel::new());
        let s = Sampler::new(
            source,
            RoleCriteria::default(),
            SampleFilter::default(),
            channel.clone(),
            timing,
        );
        (s, channel)
    }

    #[test]
    fn test_publishes_normalized_sample() {
        let (mut s, channel) = sampler(scripted(vec![vec![reading(0.5)]]), SamplerTiming::default());
        assert_eq!(s.tick(), TickOutcome::Published);
        let sample = channel.try_take().unwrap();
        assert_eq!(sample.pose.translation, [0.5, 0.0, 0.0]);
        assert_eq!(sample.pose.quaternion, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(sample.role, Role::RightHand);
        assert!(!sample.time.is_empty());
    }

    #[test]
    fn test_jump_is_not_published() {
        let (mut s, channel) = sampler(
            scripted(vec![vec![reading(0.0)], vec![reading(0.2)], vec![reading(0.01)]]),
            SamplerTiming::default(),
        );
        assert_eq!(s.tick(), TickOutcome::Published);
        channel.try_take();
        assert_eq!(s.tick(), TickOutcome::Rejected);
        assert!(channel.try_take().is_none());
        assert_eq!(s.tick(), TickOutcome::Published);
        assert_eq!(s.rejected(), 1);
    }

    #[test]
    fn test_non_finite_position_is_not_published() {
        let mut glitch = reading(0.0);
        glitch.translation = [f64::NAN, 0.0, 0.0];
        let (mut s, channel) = sampler(
            scripted(vec![vec![reading(0.0)], vec![glitch], vec![reading(5.0)], vec![reading(0.01)]]),
            SamplerTiming::default(),
        );
        assert_eq!(s.tick(), TickOutcome::Published);
        channel.try_take();
        assert_eq!(s.tick(), TickOutcome::Rejected);
        assert!(channel.try_take().is_none());
        assert_eq!(s.tick(), TickOutcome::Rejected);
        assert_eq!(s.tick(), TickOutcome::Published);
        assert_eq!(channel.try_take().unwrap().pose.translation[0], 0.01);
        assert_eq!(s.rejected(), 2);
    }

    #[test]
    fn test_first_matching_device_wins() {
        let mut controller = reading(9.0);
        controller.class = DeviceClass::Controller;
        let mut lost = reading(8.0);
        lost.tracking_ok = false;
        let (mut s, channel) = sampler(
            scripted(vec![vec![controller, lost, reading(1.0), reading(2.0)]]),
            SamplerTiming::default(),
        );
        assert_eq!(s.tick(), TickOutcome::Published);
        assert_eq!(channel.try_take().unwrap().pose.translation[0], 1.0);
    }

    #[test]
    fn test_unavailable_device_is_idle() {
        let (mut s, _) = sampler(
            || -> Result<Vec<DeviceReading>> { Err(StreamError::DeviceUnavailable) },
            SamplerTiming::default(),
        );
        assert_eq!(s.tick(), TickOutcome::NoDevice);
    }

    #[test]
    fn test_poll_errors_are_counted() {
        let (mut s, _) = sampler(
            || -> Result<Vec<DeviceReading>> { Err(StreamError::Decode("bad driver state".into())) },
            SamplerTiming::default(),
        );
        for _ in 0..5 {
            assert_eq!(s.tick(), TickOutcome::NoDevice);
        }
        assert_eq!(s.poll_errors(), 5);
    }

    #[test]
    fn test_log_throttle_allows_one_per_interval() {
        let mut throttle = LogThrottle::new(Duration::from_secs(1));
        let t0 = Instant::now();
        assert!(throttle.ready(t0));
        assert!(!throttle.ready(t0 + Duration::from_millis(50)));
        assert!(!throttle.ready(t0 + Duration::from_millis(999)));
        assert!(throttle.ready(t0 + Duration::from_secs(1)));
        assert!(!throttle.ready(t0 + Duration::from_millis(1500)));
    }

    #[test]
    fn test_absence_resets_filter() {
        let timing = SamplerTiming {
            idle_reset: Duration::from_millis(20),
            ..SamplerTiming::default()
        };
        let (mut s, _) = sampler(
            scripted(vec![vec![reading(0.0)], vec![], vec![], vec![reading(3.0)]]),
            timing,
        );
        assert_eq!(s.tick(), TickOutcome::Published);
        assert_eq!(s.tick(), TickOutcome::NoDevice);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(s.tick(), TickOutcome::NoDevice);
        assert!(s.filter().previous().is_none());
        // Far from the old pose, but the gap means it is accepted.
        assert_eq!(s.tick(), TickOutcome::Published);
    }

    #[test]
    fn test_short_dropout_keeps_filter() {
        let (mut s, _) = sampler(
            scripted(vec![vec![reading(0.0)], vec![], vec![reading(3.0)]]),
            SamplerTiming::default(),
        );
        s.tick();
        assert_eq!(s.tick(), TickOutcome::NoDevice);
        assert_eq!(s.tick(), TickOutcome::Rejected);
    }

    #[test]
    fn test_spawned_sampler_stops_on_shutdown() {
        let shutdown = Shutdown::new();
        let (s, channel) = sampler(
            move || -> Result<Vec<DeviceReading>> { Ok(vec![reading(0.0)]) },
            SamplerTiming::default(),
        );
        let handle = s.spawn(shutdown.clone()).unwrap();
        assert!(channel.take_timeout(Duration::from_secs(2)).is_some());
        shutdown.trigger();
        handle.join().unwrap();
    }
}
