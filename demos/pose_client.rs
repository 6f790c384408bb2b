//! Consumer-side demo: print absolute and trigger-relative poses.
//!
//! Hold the tracker trigger to latch a reference frame; the relative pose is
//! printed while it is held. The menu button re-bases the reference.
//!
//! Usage: cargo run --example pose_client [config.toml]

use std::path::Path;
use std::time::Duration;
use vive_stream::ingest::pose_channel;
use vive_stream::{math, Config, PoseClient, Shutdown};

fn main() {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(Path::new(&path)),
        None => Config::from_env(),
    };
    let config = match config {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let shutdown = Shutdown::new();
    let handler_shutdown = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_shutdown.trigger()) {
        eprintln!("Failed to install Ctrl+C handler: {}", e);
        std::process::exit(1);
    }

    let (sink, updates) = pose_channel(64);
    let settings = config.ingest_settings();
    let client = match PoseClient::start(&settings, sink, shutdown.clone()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to start client: {}", e);
            std::process::exit(1);
        }
    };

    eprintln!(
        "Reading poses from {}:{} in {:?} frame (Ctrl+C to stop)...",
        settings.address, settings.port, settings.output_frame
    );

    let mut received: u64 = 0;
    while !shutdown.is_triggered() && !client.is_finished() {
        let update = match updates.recv_timeout(Duration::from_millis(200)) {
            Ok(u) => u,
            Err(_) => continue,
        };
        received += 1;
        // Print at ~10 Hz.
        if received % 20 != 0 {
            continue;
        }

        let p = update.absolute.pose.translation;
        let [roll, pitch, yaw] = math::euler_degrees(update.absolute.pose.quaternion);
        match update.relative {
            Some(r) => println!(
                "[{}] abs=({:+.3}, {:+.3}, {:+.3}) rpy=({:+.1}, {:+.1}, {:+.1}) rel=({:+.3}, {:+.3}, {:+.3})",
                update.absolute.time,
                p[0], p[1], p[2], roll, pitch, yaw,
                r.translation[0], r.translation[1], r.translation[2],
            ),
            None => println!(
                "[{}] abs=({:+.3}, {:+.3}, {:+.3}) rpy=({:+.1}, {:+.1}, {:+.1})",
                update.absolute.time, p[0], p[1], p[2], roll, pitch, yaw,
            ),
        }
    }

    if let Err(e) = client.stop() {
        eprintln!("Client ended with error: {}", e);
        std::process::exit(1);
    }
    eprintln!("Stopped after {} updates.", received);
}
