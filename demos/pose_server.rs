//! Device-side demo: stream a synthetic tracker over TCP.
//!
//! The tracker circles at 0.3 m radius, holds its trigger for 3 s out of
//! every 6, and taps the menu button once in the middle of each hold.
//!
//! Usage: cargo run --example pose_server [config.toml]

use std::f64::consts::TAU;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use vive_stream::sampler::RoleCriteria;
use vive_stream::{
    Buttons, Config, DeviceClass, DeviceReading, PoseServer, Role, SampleChannel, Sampler, Shutdown,
};

fn synthetic_reading(t: f64) -> DeviceReading {
    let angle = TAU * t / 4.0;
    let half = angle / 2.0;
    let phase = t % 6.0;

    let mut buttons = Buttons::empty();
    if phase < 3.0 {
        buttons |= Buttons::TRIGGER;
    }
    if (1.5..1.6).contains(&phase) {
        buttons |= Buttons::MENU;
    }

    DeviceReading {
        class: DeviceClass::GenericTracker,
        role: Role::RightHand,
        tracking_ok: true,
        translation: [0.3 * angle.cos(), 1.2, 0.3 * angle.sin()],
        // Yaw about the native up axis.
        quaternion: [0.0, half.sin(), 0.0, half.cos()],
        buttons,
        trackpad: [0.0, 0.0],
        trigger: if buttons.contains(Buttons::TRIGGER) { 1.0 } else { 0.0 },
    }
}

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

    let channel = Arc::new(SampleChannel::new());
    let server = match PoseServer::start(
        &config.server.address,
        config.server.port,
        channel.clone(),
        shutdown.clone(),
    ) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to start server: {}", e);
            std::process::exit(1);
        }
    };

    let start = Instant::now();
    let source = move || -> vive_stream::Result<Vec<DeviceReading>> {
        Ok(vec![synthetic_reading(start.elapsed().as_secs_f64())])
    };
    let sampler = Sampler::new(
        source,
        RoleCriteria::default(),
        config.sample_filter(),
        channel,
        config.sampler_timing(),
    );
    let sampler_thread = match sampler.spawn(shutdown.clone()) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Failed to start sampler: {}", e);
            std::process::exit(1);
        }
    };

    eprintln!("Serving synthetic poses on {} (Ctrl+C to stop)...", server.local_addr());
    while shutdown.sleep(Duration::from_secs(1)) {}

    server.stop();
    let _ = sampler_thread.join();
    eprintln!("Stopped.");
}
