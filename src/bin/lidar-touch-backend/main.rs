use std::thread;
use std::time::Duration;

use clap::Parser;
use env_logger::Env;
use log::{debug, info, warn};

use lidar_touch::pipeline::{FrameResult, ProcessingPipeline, TouchFrame};
use lidar_touch::router::spawn_router;
use lidar_touch::sensor::{MockScanner, SensorEvent};
use lidar_touch::settings::{load_settings_from_file, SettingsStore};

mod cli;
use cli::Cli;

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::from_env(Env::default().default_filter_or(&cli.log_level)).init();

    debug!("Started; args: {:?}", cli);

    let settings = match load_settings_from_file(&cli.settings_path) {
        Ok(settings) => settings,
        Err(e) => panic!("Error loading settings: {}", e),
    };
    info!(
        "Running with {} sensor(s), {} screen(s), {} output(s)",
        settings.sensors.len(),
        settings.screens.len(),
        settings.outputs.len()
    );
    let store = SettingsStore::new(settings);

    let (frame_tx, frame_rx) = crossbeam_channel::unbounded::<FrameResult>();
    let (touch_tx, touch_rx) = crossbeam_channel::unbounded::<TouchFrame>();
    let (status_tx, status_rx) = crossbeam_channel::unbounded::<SensorEvent>();

    let sensor_count = store.snapshot().sensors.len();
    let mut pipelines = Vec::new();
    let mut sources = Vec::new();
    for sensor_index in 0..sensor_count {
        let pipeline =
            ProcessingPipeline::spawn(store.clone(), sensor_index, frame_tx.clone(), touch_tx.clone());
        let scanner = MockScanner::new(sensor_index, cli.mock_touches);
        sources.push(scanner.spawn(pipeline.scan_slot(), status_tx.clone()));
        pipelines.push(pipeline);
    }
    drop(frame_tx);
    drop(touch_tx);
    drop(status_tx);

    let router = spawn_router(store.clone(), touch_rx, None);

    // Surface status and frame telemetry the way the UI collaborator would
    let status_logger = thread::spawn(move || {
        for event in status_rx {
            info!("Sensor {}: {}", event.sensor_index, event.event);
        }
    });
    let frame_logger = thread::spawn(move || {
        let mut learned = Vec::new();
        for result in frame_rx {
            if learned.len() <= result.sensor_index {
                learned.resize(result.sensor_index + 1, false);
            }
            if result.bg_is_learned && !learned[result.sensor_index] {
                learned[result.sensor_index] = true;
                info!("Sensor {}: background ready", result.sensor_index);
            }
            debug!(
                "Sensor {}: frame {} with {} touch(es) in {:.2} ms",
                result.sensor_index,
                result.frame_seq,
                result.touches.len(),
                result.processing_time_ms
            );
        }
    });

    if cli.run_seconds == 0 {
        loop {
            thread::park();
        }
    }

    thread::sleep(Duration::from_secs(cli.run_seconds));
    info!("Run time elapsed; shutting down");
    for source in sources {
        source.stop();
    }
    for pipeline in pipelines {
        pipeline.stop();
    }
    router.join();
    let _ = status_logger.join();
    let _ = frame_logger.join();
    if let Err(e) = store.save_to_file(&cli.settings_path) {
        warn!("Failed to save settings: {}", e);
    }
}
