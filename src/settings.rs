use std::fs;
use std::io::ErrorKind;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};

/// Pose and detection window for one planar rangefinder.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SensorConfig {
    pub name: String,
    pub model: String,
    pub host: String,
    pub port: u16,
    pub x_offset_mm: f64,
    pub y_offset_mm: f64,
    pub z_rotation_deg: f64,
    pub x_flip: bool,
    pub y_flip: bool,
    pub min_distance_mm: f64,
    pub max_distance_mm: f64,
    pub min_angle_deg: f64,
    pub max_angle_deg: f64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        SensorConfig {
            name: String::from("Sensor 1"),
            model: String::from("UST-10LX"),
            host: String::from("192.168.0.10"),
            port: 10940,
            x_offset_mm: 0.,
            y_offset_mm: 0.,
            z_rotation_deg: 0.,
            x_flip: false,
            y_flip: false,
            min_distance_mm: 20.,
            max_distance_mm: 1500.,
            min_angle_deg: -90.,
            max_angle_deg: 90.,
        }
    }
}

/// Custom normalization bounds within a screen. When present, all four
/// fields are meaningful; the screen rectangle is used when absent.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveArea {
    pub width_mm: f64,
    pub height_mm: f64,
    /// Area centre in world coordinates.
    pub offset_x: f64,
    pub offset_y: f64,
}

/// Rectangle whose interior never produces touches. `x`/`y` are the zone
/// centre in screen-local mm, relative to the screen centre.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExcludeZone {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScreenConfig {
    pub name: String,
    pub width_mm: f64,
    pub height_mm: f64,
    /// Screen centre in world coordinates.
    pub offset_x: f64,
    pub offset_y: f64,
    pub active_area: Option<ActiveArea>,
    #[serde(default)]
    pub exclude_zones: Vec<ExcludeZone>,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        ScreenConfig {
            name: String::from("Screen 1"),
            width_mm: 1920.,
            height_mm: 1080.,
            offset_x: 0.,
            offset_y: 0.,
            active_area: None,
            exclude_zones: Vec::new(),
        }
    }
}

/// One TUIO destination, linked to the screen it serves.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutputConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub enabled: bool,
    pub screen_index: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            name: String::from("TUIO 1"),
            host: String::from("127.0.0.1"),
            port: 3333,
            enabled: true,
            screen_index: 0,
        }
    }
}

/// Processing parameters shared by every pipeline.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingParams {
    /// How many scans to accumulate before freezing the background
    pub bg_learning_frames: usize,

    /// A ray is foreground when it is at least this much closer than the
    /// learned background
    pub bg_subtraction_threshold_mm: f64,

    /// Max distance in mm between points belonging to the same cluster
    pub cluster_eps_mm: f64,

    /// Min neighbour count that makes a point a cluster core
    pub cluster_min_samples: usize,

    /// Min points count that constitutes a valid cluster
    pub min_cluster_size: usize,

    /// Exclude clusters above this radius in mm; None disables the check
    pub max_cluster_extent_mm: Option<f64>,

    /// Max distance in mm between a predicted track position and a blob
    /// for the two to be matched
    pub max_tracking_distance_mm: f64,

    /// How many frames a track survives without a matching blob
    pub touch_timeout_frames: u32,

    /// Min age in frames before a track appears in the reported output
    pub min_age_frames: u32,

    /// Reserved for the visualization layer; the core applies no
    /// positional smoothing
    pub smoothing_value: f64,
}

impl Default for ProcessingParams {
    fn default() -> Self {
        ProcessingParams {
            bg_learning_frames: 30,
            bg_subtraction_threshold_mm: 40.,
            cluster_eps_mm: 30.,
            cluster_min_samples: 3,
            min_cluster_size: 3,
            max_cluster_extent_mm: None,
            max_tracking_distance_mm: 50.,
            touch_timeout_frames: 3,
            min_age_frames: 1,
            smoothing_value: 0.5,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    pub sensors: Vec<SensorConfig>,
    pub screens: Vec<ScreenConfig>,
    pub outputs: Vec<OutputConfig>,
    pub processing: ProcessingParams,
}

impl Default for AppSettings {
    fn default() -> Self {
        AppSettings {
            sensors: vec![SensorConfig::default()],
            screens: vec![ScreenConfig::default()],
            outputs: vec![OutputConfig::default()],
            processing: ProcessingParams::default(),
        }
    }
}

/// Flat single-sensor settings layout written by early releases; migrated
/// to the list form on load.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase", default)]
struct LegacySettings {
    lidar_ip: String,
    lidar_port: u16,
    sensor_x_offset: f64,
    sensor_y_offset: f64,
    sensor_z_rotation: f64,
    sensor_x_flip: bool,
    sensor_y_flip: bool,
    min_distance_mm: f64,
    max_distance_mm: f64,
    min_angle_deg: f64,
    max_angle_deg: f64,
    bg_learning_frames: usize,
    bg_subtraction_threshold_mm: f64,
    cluster_eps_mm: f64,
    cluster_min_samples: usize,
    min_cluster_size: usize,
    max_tracking_distance_mm: f64,
    touch_timeout_frames: u32,
    screen_name: String,
    screen_width_mm: f64,
    screen_height_mm: f64,
    screen_offset_x: f64,
    screen_offset_y: f64,
    tuio_host: String,
    tuio_port: u16,
    tuio_enabled: bool,
    smoothing_value: f64,
}

impl Default for LegacySettings {
    fn default() -> Self {
        let sensor = SensorConfig::default();
        let screen = ScreenConfig::default();
        let output = OutputConfig::default();
        let processing = ProcessingParams::default();
        LegacySettings {
            lidar_ip: sensor.host,
            lidar_port: sensor.port,
            sensor_x_offset: 0.,
            sensor_y_offset: 0.,
            sensor_z_rotation: 0.,
            sensor_x_flip: false,
            sensor_y_flip: false,
            min_distance_mm: sensor.min_distance_mm,
            max_distance_mm: sensor.max_distance_mm,
            min_angle_deg: sensor.min_angle_deg,
            max_angle_deg: sensor.max_angle_deg,
            bg_learning_frames: processing.bg_learning_frames,
            bg_subtraction_threshold_mm: processing.bg_subtraction_threshold_mm,
            cluster_eps_mm: processing.cluster_eps_mm,
            cluster_min_samples: processing.cluster_min_samples,
            min_cluster_size: processing.min_cluster_size,
            max_tracking_distance_mm: processing.max_tracking_distance_mm,
            touch_timeout_frames: processing.touch_timeout_frames,
            screen_name: screen.name,
            screen_width_mm: screen.width_mm,
            screen_height_mm: screen.height_mm,
            screen_offset_x: screen.offset_x,
            screen_offset_y: screen.offset_y,
            tuio_host: output.host,
            tuio_port: output.port,
            tuio_enabled: output.enabled,
            smoothing_value: processing.smoothing_value,
        }
    }
}

impl LegacySettings {
    fn migrate(self) -> AppSettings {
        AppSettings {
            sensors: vec![SensorConfig {
                host: self.lidar_ip,
                port: self.lidar_port,
                x_offset_mm: self.sensor_x_offset,
                y_offset_mm: self.sensor_y_offset,
                z_rotation_deg: self.sensor_z_rotation,
                x_flip: self.sensor_x_flip,
                y_flip: self.sensor_y_flip,
                min_distance_mm: self.min_distance_mm,
                max_distance_mm: self.max_distance_mm,
                min_angle_deg: self.min_angle_deg,
                max_angle_deg: self.max_angle_deg,
                ..SensorConfig::default()
            }],
            screens: vec![ScreenConfig {
                name: self.screen_name,
                width_mm: self.screen_width_mm,
                height_mm: self.screen_height_mm,
                offset_x: self.screen_offset_x,
                offset_y: self.screen_offset_y,
                ..ScreenConfig::default()
            }],
            outputs: vec![OutputConfig {
                host: self.tuio_host,
                port: self.tuio_port,
                enabled: self.tuio_enabled,
                ..OutputConfig::default()
            }],
            processing: ProcessingParams {
                bg_learning_frames: self.bg_learning_frames,
                bg_subtraction_threshold_mm: self.bg_subtraction_threshold_mm,
                cluster_eps_mm: self.cluster_eps_mm,
                cluster_min_samples: self.cluster_min_samples,
                min_cluster_size: self.min_cluster_size,
                max_tracking_distance_mm: self.max_tracking_distance_mm,
                touch_timeout_frames: self.touch_timeout_frames,
                smoothing_value: self.smoothing_value,
                ..ProcessingParams::default()
            },
        }
    }
}

struct StoreInner {
    settings: AppSettings,
    generation: u64,
}

/// Process-wide mutable settings shared by every thread. Consumers do not
/// get change notifications; they resample on their own cadence and use
/// `generation` to detect mutations.
#[derive(Clone)]
pub struct SettingsStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl SettingsStore {
    pub fn new(settings: AppSettings) -> Self {
        SettingsStore {
            inner: Arc::new(Mutex::new(StoreInner {
                settings,
                generation: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().expect("settings lock poisoned")
    }

    /// Deep copy of the current settings.
    pub fn snapshot(&self) -> AppSettings {
        self.lock().settings.clone()
    }

    /// Counter bumped by every mutation.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Snapshot plus the generation it belongs to, read atomically.
    pub fn snapshot_with_generation(&self) -> (AppSettings, u64) {
        let inner = self.lock();
        (inner.settings.clone(), inner.generation)
    }

    pub fn processing(&self) -> ProcessingParams {
        self.lock().settings.processing.clone()
    }

    pub fn sensor(&self, index: usize) -> Option<SensorConfig> {
        self.lock().settings.sensors.get(index).cloned()
    }

    pub fn screen(&self, index: usize) -> Option<ScreenConfig> {
        self.lock().settings.screens.get(index).cloned()
    }

    pub fn output(&self, index: usize) -> Option<OutputConfig> {
        self.lock().settings.outputs.get(index).cloned()
    }

    pub fn update_processing(&self, params: ProcessingParams) {
        let mut inner = self.lock();
        inner.settings.processing = params;
        inner.generation += 1;
    }

    pub fn update_sensor(&self, index: usize, sensor: SensorConfig) -> Result<()> {
        let mut inner = self.lock();
        match inner.settings.sensors.get_mut(index) {
            Some(entry) => {
                *entry = sensor;
                inner.generation += 1;
                Ok(())
            }
            None => Err(anyhow!("no sensor at index {}", index)),
        }
    }

    pub fn update_screen(&self, index: usize, screen: ScreenConfig) -> Result<()> {
        let mut inner = self.lock();
        match inner.settings.screens.get_mut(index) {
            Some(entry) => {
                *entry = screen;
                inner.generation += 1;
                Ok(())
            }
            None => Err(anyhow!("no screen at index {}", index)),
        }
    }

    pub fn update_output(&self, index: usize, output: OutputConfig) -> Result<()> {
        let mut inner = self.lock();
        match inner.settings.outputs.get_mut(index) {
            Some(entry) => {
                *entry = output;
                inner.generation += 1;
                Ok(())
            }
            None => Err(anyhow!("no output at index {}", index)),
        }
    }

    /// Append a sensor and return its index.
    pub fn add_sensor(&self, sensor: SensorConfig) -> usize {
        let mut inner = self.lock();
        inner.settings.sensors.push(sensor);
        inner.generation += 1;
        inner.settings.sensors.len() - 1
    }

    pub fn add_screen(&self, screen: ScreenConfig) -> usize {
        let mut inner = self.lock();
        inner.settings.screens.push(screen);
        inner.generation += 1;
        inner.settings.screens.len() - 1
    }

    pub fn add_output(&self, output: OutputConfig) -> usize {
        let mut inner = self.lock();
        inner.settings.outputs.push(output);
        inner.generation += 1;
        inner.settings.outputs.len() - 1
    }

    pub fn remove_sensor(&self, index: usize) -> Result<()> {
        let mut inner = self.lock();
        if index >= inner.settings.sensors.len() {
            return Err(anyhow!("no sensor at index {}", index));
        }
        inner.settings.sensors.remove(index);
        inner.generation += 1;
        Ok(())
    }

    pub fn remove_screen(&self, index: usize) -> Result<()> {
        let mut inner = self.lock();
        if index >= inner.settings.screens.len() {
            return Err(anyhow!("no screen at index {}", index));
        }
        inner.settings.screens.remove(index);
        inner.generation += 1;
        Ok(())
    }

    pub fn remove_output(&self, index: usize) -> Result<()> {
        let mut inner = self.lock();
        if index >= inner.settings.outputs.len() {
            return Err(anyhow!("no output at index {}", index));
        }
        inner.settings.outputs.remove(index);
        inner.generation += 1;
        Ok(())
    }

    /// Snapshot first, then write; the lock is never held across I/O.
    pub fn save_to_file(&self, path: &str) -> Result<()> {
        let snapshot = self.snapshot();
        let text = serde_json::to_string_pretty(&snapshot)?;
        fs::write(path, text)?;
        info!("Wrote settings to file: {:?}", path);
        Ok(())
    }
}

pub fn load_settings_from_file(path: &str) -> Result<AppSettings> {
    let text = match fs::read_to_string(path) {
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(
                "Settings file not found, starting with defaults; will create {} on save",
                path
            );
            return Ok(AppSettings::default());
        }
        Err(e) => return Err(anyhow!("failed to read settings from {}: {}", path, e)),
        Ok(text) => text,
    };

    match serde_json::from_str::<AppSettings>(&text) {
        Ok(settings) => {
            info!("Loaded settings OK from \"{}\"", path);
            Ok(settings)
        }
        Err(first_err) => match serde_json::from_str::<LegacySettings>(&text) {
            Ok(legacy) => {
                info!("Migrated legacy flat settings from \"{}\"", path);
                Ok(legacy.migrate())
            }
            Err(_) => Err(anyhow!("failed to parse settings data: {}", first_err)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_a_deep_copy() {
        let store = SettingsStore::new(AppSettings::default());
        let mut snapshot = store.snapshot();
        snapshot.sensors[0].name = String::from("changed");
        assert_eq!(store.sensor(0).unwrap().name, "Sensor 1");
    }

    #[test]
    fn mutations_bump_the_generation() {
        let store = SettingsStore::new(AppSettings::default());
        let before = store.generation();
        store
            .update_screen(0, ScreenConfig::default())
            .expect("screen 0 exists");
        assert_eq!(store.generation(), before + 1);
        let index = store.add_output(OutputConfig::default());
        assert_eq!(index, 1);
        assert_eq!(store.generation(), before + 2);
    }

    #[test]
    fn out_of_range_updates_are_rejected_without_mutation() {
        let store = SettingsStore::new(AppSettings::default());
        let before = store.generation();
        assert!(store.update_sensor(5, SensorConfig::default()).is_err());
        assert!(store.remove_screen(9).is_err());
        assert_eq!(store.generation(), before);
        assert_eq!(store.snapshot().sensors.len(), 1);
    }

    #[test]
    fn legacy_flat_settings_are_migrated() {
        let text = r#"{
            "lidarIp": "10.0.0.5",
            "lidarPort": 10940,
            "screenWidthMm": 2000.0,
            "screenHeightMm": 1000.0,
            "tuioHost": "10.0.0.9",
            "tuioPort": 3334,
            "tuioEnabled": false,
            "bgLearningFrames": 10,
            "touchTimeoutFrames": 5
        }"#;
        let legacy: LegacySettings = serde_json::from_str(text).unwrap();
        let settings = legacy.migrate();
        assert_eq!(settings.sensors.len(), 1);
        assert_eq!(settings.sensors[0].host, "10.0.0.5");
        assert_eq!(settings.screens[0].width_mm, 2000.0);
        assert_eq!(settings.outputs[0].port, 3334);
        assert!(!settings.outputs[0].enabled);
        assert_eq!(settings.processing.bg_learning_frames, 10);
        assert_eq!(settings.processing.touch_timeout_frames, 5);
    }

    #[test]
    fn settings_round_trip_through_json() {
        let mut settings = AppSettings::default();
        settings.screens[0].active_area = Some(ActiveArea {
            width_mm: 500.,
            height_mm: 400.,
            offset_x: 10.,
            offset_y: -20.,
        });
        settings.screens[0].exclude_zones.push(ExcludeZone {
            x: 0.,
            y: 0.,
            width: 100.,
            height: 100.,
        });
        let text = serde_json::to_string_pretty(&settings).unwrap();
        let parsed: AppSettings = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, settings);
    }

    #[test]
    fn save_and_load_round_trip() {
        let path = std::env::temp_dir().join(format!("lidar-touch-settings-{}.json", std::process::id()));
        let path = path.to_string_lossy().into_owned();
        let store = SettingsStore::new(AppSettings::default());
        store.save_to_file(&path).unwrap();
        let loaded = load_settings_from_file(&path).unwrap();
        assert_eq!(loaded, store.snapshot());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let loaded = load_settings_from_file("/nonexistent/lidar-touch.json").unwrap();
        assert_eq!(loaded, AppSettings::default());
    }
}
