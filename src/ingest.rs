use crate::connection::{ClientConnection, ClientSettings, ReadOutcome};
use crate::math::{self, FrameConvention};
use crate::protocol::RecordDecoder;
use crate::shutdown::Shutdown;
use crate::tracker::ReferenceFrameTracker;
use crate::types::{ConnectionState, Pose, RelativePose, Sample};
use crate::{Result, StreamError};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::sync::Arc;

/// Receives every decoded sample together with its relative pose.
///
/// `relative` is `None` while no reference frame is latched. Both poses are
/// already expressed in the pipeline's output frame convention.
pub trait PoseSink: Send {
    fn on_pose_computed(&mut self, absolute: &Sample, relative: Option<&RelativePose>);
}

impl<F> PoseSink for F
where
    F: FnMut(&Sample, Option<&RelativePose>) + Send,
{
    fn on_pose_computed(&mut self, absolute: &Sample, relative: Option<&RelativePose>) {
        self(absolute, relative)
    }
}

/// One sink invocation, as carried by [`ChannelSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct PoseUpdate {
    pub absolute: Sample,
    pub relative: Option<Pose>,
}

/// Sink that forwards updates over a bounded channel, dropping when full.
pub struct ChannelSink {
    sender: Sender<PoseUpdate>,
    dropped: u64,
}

/// Create a [`ChannelSink`] and the receiving end for the consumer.
pub fn pose_channel(capacity: usize) -> (ChannelSink, Receiver<PoseUpdate>) {
    let (sender, receiver) = crossbeam_channel::bounded(capacity);
    (ChannelSink { sender, dropped: 0 }, receiver)
}

impl PoseSink for ChannelSink {
    fn on_pose_computed(&mut self, absolute: &Sample, relative: Option<&RelativePose>) {
        let update = PoseUpdate {
            absolute: absolute.clone(),
            relative: relative.copied(),
        };
        match self.sender.try_send(update) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                log::trace!("Pose channel full, dropping update ({} total)", self.dropped);
            }
            Err(TrySendError::Disconnected(_)) => {
                log::trace!("Pose channel receiver gone");
            }
        }
    }
}

/// Bytes-to-sink half of the consumer: decode, track, remap, publish.
///
/// Holds no socket, so it can be driven directly from any byte source.
pub struct IngestPipeline {
    decoder: RecordDecoder,
    tracker: ReferenceFrameTracker,
    output_frame: FrameConvention,
    decode_errors: u64,
}

impl IngestPipeline {
    pub fn new(output_frame: FrameConvention) -> Self {
        Self {
            decoder: RecordDecoder::new(),
            tracker: ReferenceFrameTracker::new(),
            output_frame,
            decode_errors: 0,
        }
    }

    pub fn tracker(&self) -> &ReferenceFrameTracker {
        &self.tracker
    }

    pub fn decode_errors(&self) -> u64 {
        self.decode_errors
    }

    /// Feed received bytes; returns how many samples reached the sink.
    pub fn process(&mut self, bytes: &[u8], sink: &mut dyn PoseSink) -> usize {
        self.decoder.push(bytes);
        let mut delivered = 0;
        while let Some(record) = self.decoder.next_record() {
            match record {
                Ok(sample) => {
                    self.handle(sample, sink);
                    delivered += 1;
                }
                Err(e) => {
                    self.decode_errors += 1;
                    log::warn!("{}: {}, record skipped", e.kind(), e);
                }
            }
        }
        delivered
    }

    fn handle(&mut self, mut sample: Sample, sink: &mut dyn PoseSink) {
        log::trace!("Sample {} role={:?} buttons={:?}", sample.time, sample.role, sample.buttons);
        // The tracker works in the native frame; only the published poses are remapped.
        let relative = self
            .tracker
            .observe(&sample)
            .map(|rel| math::remap(&rel, self.output_frame));
        sample.pose = math::remap(&sample.pose, self.output_frame);
        sink.on_pose_computed(&sample, relative.as_ref());
    }

    /// Drop any half-received record. The latch is left untouched.
    pub fn connection_reset(&mut self) {
        if self.decoder.buffered() > 0 {
            log::debug!("Discarding {} bytes of partial record", self.decoder.buffered());
        }
        self.decoder.clear();
    }
}

/// Client-side settings for [`PoseClient`].
#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub address: String,
    pub port: u16,
    pub connection: ClientSettings,
    pub output_frame: FrameConvention,
    /// Treat read errors like an orderly close and reconnect instead of exiting.
    pub reconnect_on_read_error: bool,
}

/// Handle to the consumer-side read thread.
pub struct PoseClient {
    connection: Arc<ClientConnection>,
    shutdown: Shutdown,
    thread: Option<std::thread::JoinHandle<Result<()>>>,
}

impl PoseClient {
    /// Validate the address and start the read thread.
    pub fn start<S: PoseSink + 'static>(
        settings: &IngestSettings,
        sink: S,
        shutdown: Shutdown,
    ) -> Result<PoseClient> {
        let connection = Arc::new(ClientConnection::new(
            &settings.address,
            settings.port,
            settings.connection,
            shutdown.clone(),
        )?);

        let thread_connection = connection.clone();
        let thread_shutdown = shutdown.clone();
        let output_frame = settings.output_frame;
        let reconnect_on_read_error = settings.reconnect_on_read_error;
        let thread = std::thread::Builder::new()
            .name("pose-ingest".into())
            .spawn(move || {
                let mut sink = sink;
                let result = ingest_loop(
                    &thread_connection,
                    IngestPipeline::new(output_frame),
                    &mut sink,
                    &thread_shutdown,
                    reconnect_on_read_error,
                );
                if let Err(e) = &result {
                    log::error!("{}: ingest loop terminated: {}", e.kind(), e);
                }
                result
            })
            .map_err(|e| StreamError::TransportSetup(format!("Failed to spawn ingest thread: {}", e)))?;

        Ok(PoseClient {
            connection,
            shutdown,
            thread: Some(thread),
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Whether the read thread has exited, e.g. after a fatal read error.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Stop the read thread and return how it ended.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.trigger();
        self.join_thread()
    }

    /// Wait for the read thread to exit on its own.
    pub fn join(mut self) -> Result<()> {
        self.join_thread()
    }

    fn join_thread(&mut self) -> Result<()> {
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| StreamError::ConnectionLost("ingest thread panicked".into()))?,
            None => Ok(()),
        }
    }
}

impl Drop for PoseClient {
    fn drop(&mut self) {
        self.shutdown.trigger();
        let _ = self.join_thread();
    }
}

/// Whether `err` ends the read thread rather than triggering a reconnect.
fn ends_ingest(err: &StreamError, reconnect_on_read_error: bool) -> bool {
    matches!(err, StreamError::ReadFailure(_)) && !reconnect_on_read_error
}

fn ingest_loop(
    connection: &ClientConnection,
    mut pipeline: IngestPipeline,
    sink: &mut dyn PoseSink,
    shutdown: &Shutdown,
    reconnect_on_read_error: bool,
) -> Result<()> {
    log::info!("Connecting to {}", connection.peer_addr());
    match connection.connect_or_retry() {
        Ok(()) => {}
        Err(StreamError::Shutdown) => return Ok(()),
        Err(e) => return Err(e),
    }

    let mut buf = [0u8; 4096];
    while !shutdown.is_triggered() {
        let lost = match connection.read(&mut buf) {
            Ok(ReadOutcome::Data(n)) => {
                pipeline.process(&buf[..n], sink);
                continue;
            }
            Ok(ReadOutcome::Idle) => continue,
            Ok(ReadOutcome::Closed) => {
                StreamError::ConnectionLost("connection closed by server".into())
            }
            Err(e) if ends_ingest(&e, reconnect_on_read_error) => return Err(e),
            Err(e) => e,
        };

        log::warn!("{}: {}, reconnecting", lost.kind(), lost);
        pipeline.connection_reset();
        match connection.reconnect_loop() {
            Ok(()) => {}
            Err(StreamError::Shutdown) => break,
            Err(e) => return Err(e),
        }
    }

    connection.disconnect();
    log::info!(
        "Ingest stopping ({} malformed records skipped)",
        pipeline.decode_errors()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode;
    use crate::types::Buttons;
    use approx::assert_relative_eq;

    fn sample(x: f64, buttons: Buttons) -> Sample {
        Sample {
            pose: Pose::new([x, 0.0, 0.0], [0.0, 0.0, 0.0, 1.0]),
            buttons,
            time: "2024-05-01 12:00:00.000".into(),
            ..Sample::default()
        }
    }

    #[derive(Default)]
    struct Collect(Vec<PoseUpdate>);

    impl PoseSink for Collect {
        fn on_pose_computed(&mut self, absolute: &Sample, relative: Option<&RelativePose>) {
            self.0.push(PoseUpdate {
                absolute: absolute.clone(),
                relative: relative.copied(),
            });
        }
    }

    #[test]
    fn test_pipeline_latch_scenario_native() {
        let mut p = IngestPipeline::new(FrameConvention::Native);
        let mut sink = Collect::default();
        p.process(&encode(&sample(1.0, Buttons::TRIGGER)).unwrap(), &mut sink);
        p.process(&encode(&sample(1.02, Buttons::TRIGGER)).unwrap(), &mut sink);

        assert_eq!(sink.0.len(), 2);
        let rel = sink.0[1].relative.unwrap();
        assert_relative_eq!(rel.translation[0], 0.02, epsilon = 1e-9);
        assert_relative_eq!(rel.translation[1], 0.0, epsilon = 1e-9);
        assert_relative_eq!(rel.quaternion[3], 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_pipeline_remaps_both_poses() {
        let mut p = IngestPipeline::new(FrameConvention::Consumer);
        let mut sink = Collect::default();
        p.process(&encode(&sample(1.0, Buttons::TRIGGER)).unwrap(), &mut sink);
        p.process(&encode(&sample(1.02, Buttons::TRIGGER)).unwrap(), &mut sink);

        let last = &sink.0[1];
        assert_relative_eq!(last.absolute.pose.translation[1], -1.02, epsilon = 1e-9);
        let rel = last.relative.unwrap();
        assert_relative_eq!(rel.translation[0], 0.0, epsilon = 1e-9);
        assert_relative_eq!(rel.translation[1], -0.02, epsilon = 1e-9);
        assert_relative_eq!(rel.translation[2], 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_pipeline_idle_has_no_relative() {
        let mut p = IngestPipeline::new(FrameConvention::Consumer);
        let mut sink = Collect::default();
        p.process(&encode(&sample(1.0, Buttons::empty())).unwrap(), &mut sink);
        assert!(sink.0[0].relative.is_none());
    }

    #[test]
    fn test_pipeline_skips_truncated_record() {
        let mut p = IngestPipeline::new(FrameConvention::Native);
        let mut sink = Collect::default();
        let good = encode(&sample(0.5, Buttons::empty())).unwrap();
        p.process(&good[..good.len() - 10], &mut sink);
        assert!(sink.0.is_empty());
        // The rest of that record never arrives; the next one does.
        p.process(&good, &mut sink);
        assert_eq!(sink.0.len(), 1);
        assert_eq!(p.decode_errors(), 1);
        assert_relative_eq!(sink.0[0].absolute.pose.translation[0], 0.5);
    }

    #[test]
    fn test_connection_reset_keeps_latch() {
        let mut p = IngestPipeline::new(FrameConvention::Native);
        let mut sink = Collect::default();
        p.process(&encode(&sample(1.0, Buttons::TRIGGER)).unwrap(), &mut sink);
        p.process(b"{\"pose\":", &mut sink);
        p.connection_reset();
        assert!(p.tracker().is_latched());
        p.process(&encode(&sample(1.01, Buttons::TRIGGER)).unwrap(), &mut sink);
        assert_relative_eq!(sink.0[1].relative.unwrap().translation[0], 0.01, epsilon = 1e-9);
    }

    #[test]
    fn test_channel_sink_drops_when_full() {
        let (mut sink, rx) = pose_channel(1);
        let s = sample(0.0, Buttons::empty());
        sink.on_pose_computed(&s, None);
        sink.on_pose_computed(&s, Some(&Pose::IDENTITY));
        assert_eq!(rx.len(), 1);
        assert_eq!(sink.dropped, 1);
        assert!(rx.recv().unwrap().relative.is_none());
    }

    #[test]
    fn test_closure_sink() {
        let mut count = 0;
        {
            let mut sink = |_: &Sample, _: Option<&RelativePose>| count += 1;
            let mut p = IngestPipeline::new(FrameConvention::Native);
            p.process(&encode(&sample(0.0, Buttons::empty())).unwrap(), &mut sink);
        }
        assert_eq!(count, 1);
    }

    #[test]
    fn test_read_error_policy() {
        let read_failure =
            || StreamError::ReadFailure(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        assert!(ends_ingest(&read_failure(), false));
        assert!(!ends_ingest(&read_failure(), true));
        let closed = StreamError::ConnectionLost("closed".into());
        assert!(!ends_ingest(&closed, false));
    }
}
