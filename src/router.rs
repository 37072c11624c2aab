use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use indexmap::map::Entry;
use indexmap::IndexMap;
use log::{debug, info, warn};

use crate::coordinate_mapper::CoordinateMapper;
use crate::pipeline::TouchFrame;
use crate::settings::{AppSettings, SettingsStore};
use crate::tuio::TuioSender;

/// Normalized touches for one screen. One of these is emitted for every
/// screen on every incoming pipeline frame, even when no touch landed on
/// the screen, so receivers always get an authoritative alive list.
#[derive(Debug, Clone)]
pub struct ScreenFrame {
    pub screen_index: usize,
    pub touches: Vec<crate::systems::tracking::TrackedTouch>,
    pub frame_seq: u64,
}

/// Dispatches raw mm touches from every pipeline into per-screen
/// normalized frames and fans them out to the linked outputs.
pub struct TouchRouter {
    settings: SettingsStore,
    mappers: IndexMap<(usize, usize), CoordinateMapper>,
    senders: IndexMap<usize, TuioSender>,
    cached_generation: u64,
    screen_frame_tap: Option<Sender<ScreenFrame>>,
}

impl TouchRouter {
    pub fn new(settings: SettingsStore, screen_frame_tap: Option<Sender<ScreenFrame>>) -> Self {
        let cached_generation = settings.generation();
        TouchRouter {
            settings,
            mappers: IndexMap::new(),
            senders: IndexMap::new(),
            cached_generation,
            screen_frame_tap,
        }
    }

    /// Route one pipeline frame. Screens are visited in index order.
    pub fn route(&mut self, frame: &TouchFrame) {
        let (snapshot, generation) = self.settings.snapshot_with_generation();
        if generation != self.cached_generation {
            debug!(
                "Settings generation {} -> {}; invalidating mappers and re-targeting outputs",
                self.cached_generation, generation
            );
            self.mappers.clear();
            self.senders
                .retain(|&output_index, _| output_index < snapshot.outputs.len());
            for (output_index, sender) in self.senders.iter_mut() {
                let output = &snapshot.outputs[*output_index];
                sender.update_target(&output.host, output.port);
                sender.set_enabled(output.enabled);
            }
            self.cached_generation = generation;
        }

        let Some(sensor) = snapshot.sensors.get(frame.sensor_index) else {
            warn!(
                "Dropping touches from unconfigured sensor {}",
                frame.sensor_index
            );
            return;
        };

        for (screen_index, screen) in snapshot.screens.iter().enumerate() {
            let mapper = self
                .mappers
                .entry((frame.sensor_index, screen_index))
                .or_insert_with(|| CoordinateMapper::new(sensor, screen));

            let mut screen_touches = Vec::new();
            for touch in &frame.touches {
                let world = mapper.to_world((touch.x, touch.y));
                if !mapper.is_in_area(world) {
                    continue;
                }
                // Same session id, velocity and age; only the normalized
                // position is per screen
                let mut routed = touch.clone();
                routed.normalized = mapper.to_normalized(world);
                screen_touches.push(routed);
            }

            let screen_frame = ScreenFrame {
                screen_index,
                touches: screen_touches,
                frame_seq: frame.frame_seq,
            };
            self.emit(&screen_frame, &snapshot);
        }
    }

    fn emit(&mut self, frame: &ScreenFrame, snapshot: &AppSettings) {
        for (output_index, output) in snapshot.outputs.iter().enumerate() {
            if output.screen_index != frame.screen_index {
                continue;
            }
            let sender = match self.senders.entry(output_index) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => match TuioSender::new(&output.host, output.port) {
                    Ok(sender) => entry.insert(sender),
                    Err(e) => {
                        warn!("Failed to create TUIO output \"{}\": {}", output.name, e);
                        continue;
                    }
                },
            };
            sender.set_enabled(output.enabled);
            sender.send_frame(&frame.touches, frame.frame_seq as i32);
        }
        if let Some(tap) = &self.screen_frame_tap {
            let _ = tap.send(frame.clone());
        }
    }
}

/// Handle to the router thread; it exits when every pipeline sender is
/// gone.
pub struct RouterHandle {
    thread: JoinHandle<()>,
}

impl RouterHandle {
    pub fn join(self) {
        if self.thread.join().is_err() {
            warn!("Router thread panicked");
        }
    }
}

/// Spawn the router loop over the pipelines' shared touch channel.
pub fn spawn_router(
    settings: SettingsStore,
    touch_rx: Receiver<TouchFrame>,
    screen_frame_tap: Option<Sender<ScreenFrame>>,
) -> RouterHandle {
    let thread = thread::Builder::new()
        .name(String::from("touch-router"))
        .spawn(move || {
            let mut router = TouchRouter::new(settings, screen_frame_tap);
            info!("Touch router started");
            while let Ok(frame) = touch_rx.recv() {
                router.route(&frame);
            }
            debug!("Touch router exiting");
        })
        .expect("failed to spawn router thread");
    RouterHandle { thread }
}
