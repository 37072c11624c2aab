use nalgebra::{Point2, Rotation2, Vector2};
use ndarray::Array1;

use crate::settings::{ScreenConfig, SensorConfig};
use crate::Point2D;

/// Axis-aligned rectangle given as centre + size; bounds are inclusive.
#[derive(Debug, Clone, Copy)]
struct Rect {
    center_x: f64,
    center_y: f64,
    width: f64,
    height: f64,
}

impl Rect {
    fn contains(&self, x: f64, y: f64) -> bool {
        (x - self.center_x).abs() <= self.width / 2.0 && (y - self.center_y).abs() <= self.height / 2.0
    }

    fn left(&self) -> f64 {
        self.center_x - self.width / 2.0
    }

    fn bottom(&self) -> f64 {
        self.center_y - self.height / 2.0
    }
}

/// Converts between sensor-local, world and normalized screen coordinates
/// for one (sensor, screen) pair. Pure arithmetic; rebuilt by the router
/// whenever the configuration changes.
pub struct CoordinateMapper {
    rotation: Rotation2<f64>,
    offset: Vector2<f64>,
    x_flip: bool,
    y_flip: bool,
    screen_rect: Rect,
    active_area: Option<Rect>,
    exclude_zones: Vec<Rect>,
}

impl CoordinateMapper {
    pub fn new(sensor: &SensorConfig, screen: &ScreenConfig) -> Self {
        let screen_rect = Rect {
            center_x: screen.offset_x,
            center_y: screen.offset_y,
            width: screen.width_mm,
            height: screen.height_mm,
        };
        let active_area = screen.active_area.as_ref().map(|area| Rect {
            center_x: area.offset_x,
            center_y: area.offset_y,
            width: area.width_mm,
            height: area.height_mm,
        });
        // Exclude zones are screen-local; anchor them to the screen centre
        let exclude_zones = screen
            .exclude_zones
            .iter()
            .map(|zone| Rect {
                center_x: screen.offset_x + zone.x,
                center_y: screen.offset_y + zone.y,
                width: zone.width,
                height: zone.height,
            })
            .collect();
        CoordinateMapper {
            rotation: Rotation2::new(sensor.z_rotation_deg.to_radians()),
            offset: Vector2::new(sensor.x_offset_mm, sensor.y_offset_mm),
            x_flip: sensor.x_flip,
            y_flip: sensor.y_flip,
            screen_rect,
            active_area,
            exclude_zones,
        }
    }

    fn effective_area(&self) -> Rect {
        self.active_area.unwrap_or(self.screen_rect)
    }

    /// Apply the sensor pose: rotate around the sensor origin, then
    /// translate into world (screen-plane) coordinates.
    pub fn to_world(&self, p: Point2D) -> Point2D {
        let world = self.rotation * Point2::new(p.0, p.1) + self.offset;
        (world.x, world.y)
    }

    /// Whether a world point lies in the effective area and outside every
    /// exclude zone. Exclude zones never affect normalization.
    pub fn is_in_area(&self, world: Point2D) -> bool {
        let (x, y) = world;
        if !self.effective_area().contains(x, y) {
            return false;
        }
        !self.exclude_zones.iter().any(|zone| zone.contains(x, y))
    }

    /// Map a world point into [0, 1] x [0, 1] over the effective area,
    /// applying the configured flips and clamping. A zero-size axis
    /// normalizes to 0.5.
    pub fn to_normalized(&self, world: Point2D) -> Point2D {
        let area = self.effective_area();
        let (x, y) = world;
        let mut nx = if area.width > 0.0 {
            (x - area.left()) / area.width
        } else {
            0.5
        };
        let mut ny = if area.height > 0.0 {
            (y - area.bottom()) / area.height
        } else {
            0.5
        };
        if self.x_flip {
            nx = 1.0 - nx;
        }
        if self.y_flip {
            ny = 1.0 - ny;
        }
        (nx.clamp(0.0, 1.0), ny.clamp(0.0, 1.0))
    }

    /// Inverse of `to_normalized` (without the clamp); returns world mm.
    pub fn from_normalized(&self, normalized: Point2D) -> Point2D {
        let area = self.effective_area();
        let (mut nx, mut ny) = normalized;
        if self.x_flip {
            nx = 1.0 - nx;
        }
        if self.y_flip {
            ny = 1.0 - ny;
        }
        let x = if area.width > 0.0 {
            area.left() + nx * area.width
        } else {
            area.center_x
        };
        let y = if area.height > 0.0 {
            area.bottom() + ny * area.height
        } else {
            area.center_y
        };
        (x, y)
    }
}

/// Convert per-ray polar samples to sensor-local Cartesian mm.
pub fn polar_to_cartesian(angles: &Array1<f64>, distances: &Array1<f64>) -> Vec<Point2D> {
    angles
        .iter()
        .zip(distances.iter())
        .map(|(&angle, &dist)| (dist * angle.cos(), dist * angle.sin()))
        .collect()
}
