pub mod background;
pub mod clustering;
pub mod filtering;
pub mod tracking;

use background::BackgroundModel;
use clustering::BlobDetector;
use filtering::ScanFilter;
use tracking::BlobTracker;

use crate::settings::{ProcessingParams, SensorConfig};

/// The per-sensor processing stages, bundled so a pipeline can build and
/// re-sync them together.
pub struct Systems {
    pub filter: ScanFilter,
    pub background: BackgroundModel,
    pub detector: BlobDetector,
    pub tracker: BlobTracker,
}

impl Systems {
    pub fn new(sensor: &SensorConfig, params: &ProcessingParams) -> Systems {
        Systems {
            filter: ScanFilter::new(
                sensor.min_distance_mm,
                sensor.max_distance_mm,
                sensor.min_angle_deg,
                sensor.max_angle_deg,
            ),
            background: BackgroundModel::new(
                params.bg_learning_frames,
                params.bg_subtraction_threshold_mm,
            ),
            detector: BlobDetector::new(
                params.cluster_eps_mm,
                params.cluster_min_samples,
                params.min_cluster_size,
                params.max_cluster_extent_mm,
            ),
            tracker: BlobTracker::new(
                params.max_tracking_distance_mm,
                params.touch_timeout_frames,
                params.min_age_frames,
            ),
        }
    }

    /// Refresh stage parameters from the latest settings; cheap enough to
    /// run once per frame.
    pub fn sync(&mut self, sensor: &SensorConfig, params: &ProcessingParams) {
        self.filter.update_params(
            sensor.min_distance_mm,
            sensor.max_distance_mm,
            sensor.min_angle_deg,
            sensor.max_angle_deg,
        );
        self.background.set_threshold(params.bg_subtraction_threshold_mm);
        self.background.set_num_frames(params.bg_learning_frames);
        self.detector.update_params(
            params.cluster_eps_mm,
            params.cluster_min_samples,
            params.min_cluster_size,
            params.max_cluster_extent_mm,
        );
        self.tracker.set_max_distance(params.max_tracking_distance_mm);
        self.tracker.set_timeout_frames(params.touch_timeout_frames);
        self.tracker.set_min_age_frames(params.min_age_frames);
    }
}
