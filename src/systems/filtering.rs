use ndarray::{Array1, Zip};

/// Masks rays outside the configured distance and angle window.
pub struct ScanFilter {
    min_dist_mm: f64,
    max_dist_mm: f64,
    min_angle_rad: f64,
    max_angle_rad: f64,
}

impl ScanFilter {
    pub fn new(min_dist_mm: f64, max_dist_mm: f64, min_angle_deg: f64, max_angle_deg: f64) -> Self {
        ScanFilter {
            min_dist_mm,
            max_dist_mm,
            min_angle_rad: min_angle_deg.to_radians(),
            max_angle_rad: max_angle_deg.to_radians(),
        }
    }

    pub fn update_params(
        &mut self,
        min_dist_mm: f64,
        max_dist_mm: f64,
        min_angle_deg: f64,
        max_angle_deg: f64,
    ) {
        self.min_dist_mm = min_dist_mm;
        self.max_dist_mm = max_dist_mm;
        self.min_angle_rad = min_angle_deg.to_radians();
        self.max_angle_rad = max_angle_deg.to_radians();
    }

    /// Per-ray admissibility mask. Zero-distance rays (no return) are
    /// always rejected. Panics when `angles` and `distances` disagree in
    /// length; the ray count is fixed per sensor session.
    pub fn apply(&self, angles: &Array1<f64>, distances: &Array1<f64>) -> Array1<bool> {
        assert_eq!(
            angles.len(),
            distances.len(),
            "angles and distances must have equal length"
        );
        Zip::from(angles).and(distances).map_collect(|&angle, &dist| {
            dist > self.min_dist_mm
                && dist < self.max_dist_mm
                && angle >= self.min_angle_rad
                && angle <= self.max_angle_rad
                && dist > 0.0
        })
    }
}
