use crate::channel::SampleChannel;
use crate::connection::ServerEndpoint;
use crate::protocol;
use crate::shutdown::Shutdown;
use crate::types::ConnectionState;
use crate::{Result, StreamError};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Upper bound on how long the sender waits for a sample before polling for new peers.
const TAKE_TIMEOUT: Duration = Duration::from_millis(50);

/// Interval of the throughput log line.
const REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Handle to the device-side sender thread.
///
/// The thread owns the listener, accepts peers, and writes the freshest
/// sample from the channel to each of them.
pub struct PoseServer {
    endpoint: Arc<ServerEndpoint>,
    shutdown: Shutdown,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl PoseServer {
    /// Bind `address:port` and start the sender thread.
    ///
    /// Binding happens before the thread starts, so a bad address or a port
    /// in use is reported here as [`StreamError::TransportSetup`].
    pub fn start(
        address: &str,
        port: u16,
        channel: Arc<SampleChannel>,
        shutdown: Shutdown,
    ) -> Result<PoseServer> {
        let endpoint = Arc::new(ServerEndpoint::bind(address, port)?);

        let thread_endpoint = endpoint.clone();
        let thread_shutdown = shutdown.clone();
        let thread = std::thread::Builder::new()
            .name("pose-transport".into())
            .spawn(move || {
                transport_loop(&thread_endpoint, &channel, &thread_shutdown);
            })
            .map_err(|e| {
                StreamError::TransportSetup(format!("Failed to spawn transport thread: {}", e))
            })?;

        Ok(PoseServer {
            endpoint,
            shutdown,
            thread: Some(thread),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    pub fn state(&self) -> ConnectionState {
        self.endpoint.state()
    }

    pub fn peer_count(&self) -> usize {
        self.endpoint.peer_count()
    }

    /// Check if the sender thread is still running.
    pub fn is_active(&self) -> bool {
        !self.shutdown.is_triggered()
    }

    /// Stop the sender and wait for its thread to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.shutdown.trigger();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for PoseServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn transport_loop(endpoint: &ServerEndpoint, channel: &SampleChannel, shutdown: &Shutdown) {
    log::info!("Transport started on {}", endpoint.local_addr());

    let mut sent: u64 = 0;
    let mut dropped: u64 = 0;
    let mut last_report = Instant::now();

    while !shutdown.is_triggered() {
        endpoint.accept_pending();

        if let Some(sample) = channel.take_timeout(TAKE_TIMEOUT) {
            match protocol::encode(&sample) {
                Ok(record) => {
                    if endpoint.send(&record) > 0 {
                        sent += 1;
                    } else {
                        dropped += 1;
                    }
                }
                Err(e) => log::error!("{}: {}", e.kind(), e),
            }
        } else if channel.is_closed() {
            break;
        }

        let now = Instant::now();
        if now.duration_since(last_report) >= REPORT_INTERVAL {
            let elapsed = now.duration_since(last_report).as_secs_f64();
            log::info!(
                "{:.0} records/s sent, {} dropped without peers, {} client(s)",
                sent as f64 / elapsed,
                dropped,
                endpoint.peer_count()
            );
            sent = 0;
            dropped = 0;
            last_report = now;
        }
    }

    endpoint.close();
    log::info!("Transport stopping");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Pose, Sample};
    use std::io::Read;
    use std::net::TcpStream;

    #[test]
    fn test_bind_conflict_is_setup_error() {
        let channel = Arc::new(SampleChannel::new());
        let first = PoseServer::start("127.0.0.1", 0, channel.clone(), Shutdown::new()).unwrap();
        let port = first.local_addr().port();
        let err = PoseServer::start("127.0.0.1", port, channel, Shutdown::new())
            .err()
            .unwrap();
        assert_eq!(err.kind(), "transport_setup");
    }

    #[test]
    fn test_streams_freshest_sample_to_peer() {
        let channel = Arc::new(SampleChannel::new());
        let server = PoseServer::start("127.0.0.1", 0, channel.clone(), Shutdown::new()).unwrap();
        let mut peer = TcpStream::connect(server.local_addr()).unwrap();
        peer.set_read_timeout(Some(Duration::from_millis(50))).unwrap();

        let deadline = Instant::now() + Duration::from_secs(3);
        while server.peer_count() == 0 {
            assert!(Instant::now() < deadline, "peer not accepted");
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(server.state(), ConnectionState::Connected);

        let sample = Sample {
            pose: Pose::new([0.1, 0.2, 0.3], [0.0, 0.0, 0.0, 1.0]),
            time: "t".into(),
            ..Sample::default()
        };
        channel.publish(sample.clone());

        let mut decoder = protocol::RecordDecoder::new();
        let mut buf = [0u8; 1024];
        let received = loop {
            assert!(Instant::now() < deadline, "record not received");
            if let Ok(n) = peer.read(&mut buf) {
                decoder.push(&buf[..n]);
            }
            if let Some(record) = decoder.next_record() {
                break record.unwrap();
            }
        };
        assert_eq!(received.pose.translation, sample.pose.translation);
        server.stop();
    }

    #[test]
    fn test_stop_is_prompt() {
        let server =
            PoseServer::start("127.0.0.1", 0, Arc::new(SampleChannel::new()), Shutdown::new())
                .unwrap();
        let start = Instant::now();
        server.stop();
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
