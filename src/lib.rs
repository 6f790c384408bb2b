//! # vive-stream - 6DOF tracker poses over TCP
//!
//! Two halves of one pipeline:
//! - Device side: poll a tracking runtime at ~200 Hz, drop implausible jumps,
//!   and serve the freshest sample as JSON records over TCP
//! - Consumer side: connect (and keep reconnecting), decode records, and
//!   derive poses relative to the frame latched on a trigger press
//!
//! ## Quick Start
//! ```no_run
//! use vive_stream::{Config, PoseClient, RelativePose, Sample, Shutdown};
//!
//! let config = Config::from_env().unwrap();
//! let shutdown = Shutdown::new();
//! let sink = |absolute: &Sample, relative: Option<&RelativePose>| {
//!     println!("pos: {:?}", absolute.pose.translation);
//!     if let Some(r) = relative {
//!         println!("relative: {:?}", r.translation);
//!     }
//! };
//! let client = PoseClient::start(&config.ingest_settings(), sink, shutdown).unwrap();
//! client.join().unwrap();
//! ```

pub mod error;
pub mod types;
pub mod math;
pub mod filter;
pub mod tracker;
pub mod shutdown;
pub mod channel;
pub mod protocol;
pub mod connection;
pub mod sampler;
pub mod transport;
pub mod ingest;
pub mod config;

pub use channel::{LatestSlot, SampleChannel};
pub use config::Config;
pub use error::StreamError;
pub use filter::SampleFilter;
pub use ingest::{IngestPipeline, PoseClient, PoseSink};
pub use math::FrameConvention;
pub use sampler::{DeviceSource, Sampler};
pub use shutdown::Shutdown;
pub use tracker::ReferenceFrameTracker;
pub use transport::PoseServer;
pub use types::*;

/// Result type alias for pose streaming operations.
pub type Result<T> = std::result::Result<T, StreamError>;
