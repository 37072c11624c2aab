use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use log::{info, warn};
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Normal;

use crate::pipeline::ScanSlot;

/// Ray count of the UST-10LX 270-degree, 0.25-degree-step scan.
pub const NUM_POINTS: usize = 1081;
pub const SCAN_HZ: f64 = 40.0;

const WALL_DISTANCE_MM: f64 = 1000.0;
const NOISE_SIGMA_MM: f64 = 3.0;
const MIN_CLAMP_MM: f64 = 20.0;
const MAX_CLAMP_MM: f64 = 5000.0;

/// One complete sweep from one sensor. Angles in radians, monotonically
/// increasing; distances in mm, zero meaning no return.
#[derive(Debug, Clone)]
pub struct ScanFrame {
    pub sensor_index: usize,
    pub timestamp: f64,
    pub angles: Array1<f64>,
    pub distances: Array1<f64>,
}

/// Connection state changes reported by a scan source. These are the only
/// things a source surfaces across its thread boundary besides scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Reconnected,
    Mock,
    Disconnected,
    Error(String),
}

impl fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionEvent::Connected => write!(f, "connected"),
            ConnectionEvent::Reconnected => write!(f, "reconnected"),
            ConnectionEvent::Mock => write!(f, "mock"),
            ConnectionEvent::Disconnected => write!(f, "disconnected"),
            ConnectionEvent::Error(msg) => write!(f, "error: {}", msg),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SensorEvent {
    pub sensor_index: usize,
    pub event: ConnectionEvent,
}

/// Handle to a running scan source thread.
pub struct SourceHandle {
    running: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl SourceHandle {
    pub fn stop(self) {
        self.running.store(false, Ordering::Relaxed);
        if self.thread.join().is_err() {
            warn!("Scan source thread panicked");
        }
    }
}

struct MockTouch {
    angle: f64,
    speed: f64,
    width: f64,
    depth: f64,
}

/// Simulated UST-10LX: a flat wall with noisy readings and oscillating
/// touch depressions. Deterministic per sensor index.
pub struct MockScanner {
    sensor_index: usize,
    angles: Array1<f64>,
    touches: Vec<MockTouch>,
}

impl MockScanner {
    pub fn new(sensor_index: usize, num_touches: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(42 + sensor_index as u64);
        let touches = (0..num_touches)
            .map(|_| MockTouch {
                angle: rng.gen_range(-0.5..0.5),
                speed: rng.gen_range(0.3..0.8) * if rng.gen_bool(0.5) { 1.0 } else { -1.0 },
                width: rng.gen_range(0.02..0.06),
                depth: rng.gen_range(60.0..150.0),
            })
            .collect();
        let angle_min = (-135f64).to_radians();
        let angle_max = 135f64.to_radians();
        MockScanner {
            sensor_index,
            angles: Array1::linspace(angle_min, angle_max, NUM_POINTS),
            touches,
        }
    }

    pub fn spawn(self, slot: ScanSlot, status_tx: Sender<SensorEvent>) -> SourceHandle {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let thread = thread::Builder::new()
            .name(format!("mock-scanner-{}", self.sensor_index))
            .spawn(move || self.run(slot, status_tx, flag))
            .expect("failed to spawn mock scanner thread");
        SourceHandle { running, thread }
    }

    fn run(self, slot: ScanSlot, status_tx: Sender<SensorEvent>, running: Arc<AtomicBool>) {
        let _ = status_tx.send(SensorEvent {
            sensor_index: self.sensor_index,
            event: ConnectionEvent::Mock,
        });
        info!(
            "Mock scanner {} started with {} simulated touches",
            self.sensor_index,
            self.touches.len()
        );

        let mut rng = StdRng::seed_from_u64(1000 + self.sensor_index as u64);
        let noise = Normal::new(0.0, NOISE_SIGMA_MM).expect("noise sigma must be finite");
        let frame_interval = Duration::from_secs_f64(1.0 / SCAN_HZ);
        let started = Instant::now();
        let mut frame_count: u64 = 0;
        let angle_min = self.angles[0];
        let angle_max = self.angles[NUM_POINTS - 1];

        while running.load(Ordering::Relaxed) {
            let t = started.elapsed().as_secs_f64();

            let mut distances =
                Array1::from_shape_fn(NUM_POINTS, |_| WALL_DISTANCE_MM + rng.sample(noise));
            for touch in &self.touches {
                let center = (touch.angle + 0.4 * (touch.speed * t).sin())
                    .clamp(angle_min + 0.1, angle_max - 0.1);
                for (i, &angle) in self.angles.iter().enumerate() {
                    let blob =
                        touch.depth * (-0.5 * ((angle - center) / touch.width).powi(2)).exp();
                    distances[i] -= blob;
                }
            }
            distances.mapv_inplace(|d| d.clamp(MIN_CLAMP_MM, MAX_CLAMP_MM));

            slot.put(ScanFrame {
                sensor_index: self.sensor_index,
                timestamp: t,
                angles: self.angles.clone(),
                distances,
            });

            frame_count += 1;
            let next = frame_interval.mul_f64(frame_count as f64);
            let elapsed = started.elapsed();
            if next > elapsed {
                thread::sleep(next - elapsed);
            }
        }

        let _ = status_tx.send(SensorEvent {
            sensor_index: self.sensor_index,
            event: ConnectionEvent::Disconnected,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn connection_events_render_the_status_strings() {
        assert_eq!(ConnectionEvent::Connected.to_string(), "connected");
        assert_eq!(ConnectionEvent::Mock.to_string(), "mock");
        assert_eq!(
            ConnectionEvent::Error(String::from("timeout")).to_string(),
            "error: timeout"
        );
    }

    #[test]
    fn mock_scanner_emits_frames_and_status() {
        let slot = ScanSlot::new();
        let (status_tx, status_rx) = unbounded();
        let handle = MockScanner::new(0, 2).spawn(slot.clone(), status_tx);

        let event = status_rx
            .recv_timeout(Duration::from_secs(1))
            .expect("status event expected");
        assert_eq!(event.event, ConnectionEvent::Mock);

        let frame = slot
            .take_timeout(Duration::from_secs(1))
            .expect("scan frame expected");
        assert_eq!(frame.angles.len(), NUM_POINTS);
        assert_eq!(frame.distances.len(), NUM_POINTS);
        assert!(frame.distances.iter().all(|&d| (MIN_CLAMP_MM..=MAX_CLAMP_MM).contains(&d)));
        // Angles are monotonically increasing across the FOV
        for i in 1..frame.angles.len() {
            assert!(frame.angles[i] > frame.angles[i - 1]);
        }

        handle.stop();
        let last = status_rx
            .recv_timeout(Duration::from_secs(1))
            .expect("disconnect event expected");
        assert_eq!(last.event, ConnectionEvent::Disconnected);
    }

    #[test]
    fn mock_scanner_is_deterministic_per_index() {
        let a = MockScanner::new(3, 2);
        let b = MockScanner::new(3, 2);
        for (ta, tb) in a.touches.iter().zip(b.touches.iter()) {
            assert_eq!(ta.angle, tb.angle);
            assert_eq!(ta.depth, tb.depth);
        }
    }
}
