use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info, warn};
use ndarray::{Array1, Zip};

use crate::coordinate_mapper::polar_to_cartesian;
use crate::sensor::ScanFrame;
use crate::settings::SettingsStore;
use crate::systems::tracking::TrackedTouch;
use crate::systems::Systems;
use crate::Point2D;

/// How long a queue wait may last before the stop flag is rechecked.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Single-slot scan queue: a newer frame replaces an unconsumed older one,
/// so the worker always sees the freshest scan and the producer never
/// blocks.
#[derive(Clone)]
pub struct ScanSlot {
    inner: Arc<SlotInner>,
}

struct SlotInner {
    frame: Mutex<Option<ScanFrame>>,
    available: Condvar,
}

impl ScanSlot {
    pub fn new() -> Self {
        ScanSlot {
            inner: Arc::new(SlotInner {
                frame: Mutex::new(None),
                available: Condvar::new(),
            }),
        }
    }

    /// Store a frame, discarding any unconsumed older one.
    pub fn put(&self, frame: ScanFrame) {
        let mut slot = self.inner.frame.lock().expect("scan slot lock poisoned");
        if slot.replace(frame).is_some() {
            debug!("Dropped a stale scan frame");
        }
        self.inner.available.notify_one();
    }

    /// Take the stored frame, waiting up to `timeout` for one to arrive.
    pub fn take_timeout(&self, timeout: Duration) -> Option<ScanFrame> {
        let slot = self.inner.frame.lock().expect("scan slot lock poisoned");
        let (mut slot, _) = self
            .inner
            .available
            .wait_timeout_while(slot, timeout, |frame| frame.is_none())
            .expect("scan slot lock poisoned");
        slot.take()
    }
}

impl Default for ScanSlot {
    fn default() -> Self {
        ScanSlot::new()
    }
}

/// Everything the visualization layer needs about one processed frame.
#[derive(Debug, Clone)]
pub struct FrameResult {
    pub sensor_index: usize,
    pub frame_seq: u64,
    pub timestamp: f64,
    pub raw_angles: Array1<f64>,
    pub raw_distances: Array1<f64>,
    pub filtered_mask: Array1<bool>,
    pub foreground_mask: Array1<bool>,
    pub foreground_points: Vec<Point2D>,
    /// Per foreground point: blob index, or -1 for noise
    pub cluster_labels: Vec<i32>,
    pub touches: Vec<TrackedTouch>,
    pub bg_learning_progress: f64,
    pub bg_is_learned: bool,
    pub processing_time_ms: f64,
}

/// Raw mm-coordinate touches handed to the router.
#[derive(Debug, Clone)]
pub struct TouchFrame {
    pub sensor_index: usize,
    pub touches: Vec<TrackedTouch>,
    pub frame_seq: u64,
}

/// Control operations, deferred to the worker so they cannot race with an
/// active frame.
#[derive(Debug, Clone, Copy)]
pub enum PipelineCommand {
    Learn,
    Reset,
}

/// The per-frame processing chain for one sensor: filter, background,
/// cluster, track. Free of any threading so it can be driven synchronously.
pub struct PipelineState {
    settings: SettingsStore,
    sensor_index: usize,
    systems: Systems,
    frame_seq: u64,
    last_timestamp: f64,
    learn_requested: bool,
    reset_requested: bool,
}

impl PipelineState {
    /// A background learn is requested automatically on startup.
    pub fn new(settings: SettingsStore, sensor_index: usize) -> Self {
        let params = settings.processing();
        let sensor = settings.sensor(sensor_index).unwrap_or_default();
        let systems = Systems::new(&sensor, &params);
        PipelineState {
            settings,
            sensor_index,
            systems,
            frame_seq: 0,
            last_timestamp: 0.0,
            learn_requested: true,
            reset_requested: false,
        }
    }

    pub fn sensor_index(&self) -> usize {
        self.sensor_index
    }

    pub fn frame_seq(&self) -> u64 {
        self.frame_seq
    }

    pub fn apply(&mut self, command: PipelineCommand) {
        match command {
            PipelineCommand::Learn => self.learn_requested = true,
            PipelineCommand::Reset => self.reset_requested = true,
        }
    }

    fn sync_settings(&mut self) {
        let params = self.settings.processing();
        match self.settings.sensor(self.sensor_index) {
            Some(sensor) => self.systems.sync(&sensor, &params),
            None => debug!(
                "Sensor {} has no configuration; keeping previous parameters",
                self.sensor_index
            ),
        }
    }

    /// Run one scan frame through the whole chain.
    pub fn process(&mut self, frame: &ScanFrame) -> (FrameResult, TouchFrame) {
        let started = Instant::now();

        if self.reset_requested {
            info!("Sensor {}: resetting background and tracks", self.sensor_index);
            self.systems.background.reset();
            self.systems.tracker.reset();
            self.reset_requested = false;
        }
        if self.learn_requested {
            info!("Sensor {}: starting background learning", self.sensor_index);
            self.systems.background.start_learning();
            self.learn_requested = false;
        }

        self.sync_settings();

        let dt = if self.last_timestamp > 0.0 {
            frame.timestamp - self.last_timestamp
        } else {
            0.0
        };
        self.last_timestamp = frame.timestamp;

        let filtered_mask = self.systems.filter.apply(&frame.angles, &frame.distances);

        let mut foreground_mask = Array1::from_elem(frame.distances.len(), false);
        if self.systems.background.is_learning() {
            if self.systems.background.feed_learning_frame(&frame.distances) {
                info!("Sensor {}: background learned", self.sensor_index);
            }
        } else if self.systems.background.is_learned() {
            let bg_mask = self.systems.background.subtract(&frame.distances);
            foreground_mask = Zip::from(&filtered_mask)
                .and(&bg_mask)
                .map_collect(|&admissible, &foreground| admissible && foreground);
        }

        let fg_indices: Vec<usize> = foreground_mask
            .iter()
            .enumerate()
            .filter_map(|(i, &fg)| fg.then_some(i))
            .collect();
        let fg_angles = Array1::from_iter(fg_indices.iter().map(|&i| frame.angles[i]));
        let fg_distances = Array1::from_iter(fg_indices.iter().map(|&i| frame.distances[i]));
        let foreground_points = polar_to_cartesian(&fg_angles, &fg_distances);

        let blobs = self.systems.detector.detect(&foreground_points);
        let touches = self.systems.tracker.update(&blobs, dt);

        let mut cluster_labels = vec![-1i32; foreground_points.len()];
        for (blob_index, blob) in blobs.iter().enumerate() {
            for &point_index in &blob.point_indices {
                cluster_labels[point_index] = blob_index as i32;
            }
        }

        self.frame_seq += 1;
        let processing_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        debug!(
            "Sensor {}: frame {} processed in {:.2} ms ({} touches)",
            self.sensor_index,
            self.frame_seq,
            processing_time_ms,
            touches.len()
        );

        let result = FrameResult {
            sensor_index: self.sensor_index,
            frame_seq: self.frame_seq,
            timestamp: frame.timestamp,
            raw_angles: frame.angles.clone(),
            raw_distances: frame.distances.clone(),
            filtered_mask,
            foreground_mask,
            foreground_points,
            cluster_labels,
            touches: touches.clone(),
            bg_learning_progress: self.systems.background.learning_progress(),
            bg_is_learned: self.systems.background.is_learned(),
            processing_time_ms,
        };
        let touch_frame = TouchFrame {
            sensor_index: self.sensor_index,
            touches,
            frame_seq: self.frame_seq,
        };
        (result, touch_frame)
    }
}

/// Owns one worker thread consuming scans for a single sensor.
pub struct ProcessingPipeline {
    slot: ScanSlot,
    commands: Sender<PipelineCommand>,
    running: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl ProcessingPipeline {
    pub fn spawn(
        settings: SettingsStore,
        sensor_index: usize,
        frame_tx: Sender<FrameResult>,
        touch_tx: Sender<TouchFrame>,
    ) -> ProcessingPipeline {
        let slot = ScanSlot::new();
        let (command_tx, command_rx) = unbounded();
        let running = Arc::new(AtomicBool::new(true));
        let state = PipelineState::new(settings, sensor_index);
        let worker_slot = slot.clone();
        let worker_running = Arc::clone(&running);
        let thread = thread::Builder::new()
            .name(format!("pipeline-{sensor_index}"))
            .spawn(move || {
                run_worker(
                    state,
                    worker_slot,
                    command_rx,
                    worker_running,
                    frame_tx,
                    touch_tx,
                )
            })
            .expect("failed to spawn pipeline thread");
        ProcessingPipeline {
            slot,
            commands: command_tx,
            running,
            thread,
        }
    }

    /// The slot a scan source should feed.
    pub fn scan_slot(&self) -> ScanSlot {
        self.slot.clone()
    }

    pub fn enqueue_scan(&self, frame: ScanFrame) {
        self.slot.put(frame);
    }

    /// Schedule background learning at the start of the next frame.
    pub fn start_learning(&self) {
        let _ = self.commands.send(PipelineCommand::Learn);
    }

    /// Schedule a background and tracker reset at the start of the next
    /// frame.
    pub fn reset(&self) {
        let _ = self.commands.send(PipelineCommand::Reset);
    }

    /// Cooperative shutdown; the worker exits within the stop poll
    /// interval.
    pub fn stop(self) {
        self.running.store(false, Ordering::Relaxed);
        if self.thread.join().is_err() {
            warn!("Pipeline worker panicked");
        }
    }
}

fn run_worker(
    mut state: PipelineState,
    slot: ScanSlot,
    commands: Receiver<PipelineCommand>,
    running: Arc<AtomicBool>,
    frame_tx: Sender<FrameResult>,
    touch_tx: Sender<TouchFrame>,
) {
    info!("Pipeline worker for sensor {} started", state.sensor_index());
    while running.load(Ordering::Relaxed) {
        while let Ok(command) = commands.try_recv() {
            state.apply(command);
        }
        let Some(frame) = slot.take_timeout(STOP_POLL_INTERVAL) else {
            continue;
        };
        let (result, touch_frame) = state.process(&frame);
        // Consumers may be gone during shutdown; both edges are best-effort
        let _ = frame_tx.send(result);
        let _ = touch_tx.send(touch_frame);
    }
    debug!("Pipeline worker for sensor {} exiting", state.sensor_index());
}
