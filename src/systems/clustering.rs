use ndarray::Array2;
use petal_clustering::{Dbscan, Fit};
use petal_neighbors::distance::Euclidean;

use crate::geometry_utils::distance_points;
use crate::Point2D;

/// One spatial cluster of foreground points, ephemeral per frame.
#[derive(Debug, Clone)]
pub struct DetectedBlob {
    pub centroid: Point2D,
    pub num_points: usize,
    /// Indices into the frame's foreground point list, for visualization
    /// colouring only.
    pub point_indices: Vec<usize>,
    pub extent_mm: f64,
}

/// DBSCAN blob detection over mm-Cartesian foreground points.
pub struct BlobDetector {
    eps_mm: f64,
    min_samples: usize,
    min_cluster_size: usize,
    max_extent_mm: Option<f64>,
}

impl BlobDetector {
    pub fn new(
        eps_mm: f64,
        min_samples: usize,
        min_cluster_size: usize,
        max_extent_mm: Option<f64>,
    ) -> Self {
        BlobDetector {
            eps_mm,
            min_samples,
            min_cluster_size,
            max_extent_mm,
        }
    }

    pub fn update_params(
        &mut self,
        eps_mm: f64,
        min_samples: usize,
        min_cluster_size: usize,
        max_extent_mm: Option<f64>,
    ) {
        self.eps_mm = eps_mm;
        self.min_samples = min_samples;
        self.min_cluster_size = min_cluster_size;
        self.max_extent_mm = max_extent_mm;
    }

    /// Cluster foreground points into blobs. Blob output order is
    /// unspecified.
    pub fn detect(&self, points: &[Point2D]) -> Vec<DetectedBlob> {
        if points.len() < self.min_samples {
            return Vec::new();
        }

        let mut data = Array2::zeros((points.len(), 2));
        for (i, (x, y)) in points.iter().enumerate() {
            data[[i, 0]] = *x;
            data[[i, 1]] = *y;
        }
        let (clusters, _outliers) =
            Dbscan::new(self.eps_mm, self.min_samples, Euclidean::default()).fit(&data);

        let mut blobs = Vec::new();
        for (_label, indices) in clusters {
            if indices.len() < self.min_cluster_size {
                continue;
            }
            let mut sum_x = 0.0;
            let mut sum_y = 0.0;
            for &i in &indices {
                sum_x += points[i].0;
                sum_y += points[i].1;
            }
            let centroid = (sum_x / indices.len() as f64, sum_y / indices.len() as f64);
            let extent = indices
                .iter()
                .map(|&i| distance_points(&centroid, &points[i]))
                .fold(0.0, f64::max);
            if let Some(max_extent) = self.max_extent_mm {
                if extent > max_extent {
                    continue;
                }
            }
            blobs.push(DetectedBlob {
                centroid,
                num_points: indices.len(),
                point_indices: indices,
                extent_mm: extent,
            });
        }
        blobs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clump(center: Point2D, spread: f64) -> Vec<Point2D> {
        vec![
            (center.0 - spread, center.1),
            (center.0 + spread, center.1),
            (center.0, center.1 - spread),
            (center.0, center.1 + spread),
            center,
        ]
    }

    #[test]
    fn detects_two_separated_clumps() {
        let mut points = clump((0.0, 0.0), 3.0);
        points.extend(clump((200.0, 200.0), 3.0));
        let detector = BlobDetector::new(10.0, 3, 3, None);
        let mut blobs = detector.detect(&points);
        assert_eq!(blobs.len(), 2);
        blobs.sort_by(|a, b| a.centroid.0.total_cmp(&b.centroid.0));
        assert!((blobs[0].centroid.0).abs() < 1e-9);
        assert!((blobs[0].centroid.1).abs() < 1e-9);
        assert!((blobs[1].centroid.0 - 200.0).abs() < 1e-9);
        assert_eq!(blobs[0].num_points, 5);
        assert!((blobs[0].extent_mm - 3.0).abs() < 1e-9);
    }

    #[test]
    fn fewer_points_than_min_samples_yields_nothing() {
        let detector = BlobDetector::new(10.0, 3, 3, None);
        assert!(detector.detect(&[(0.0, 0.0), (1.0, 1.0)]).is_empty());
        assert!(detector.detect(&[]).is_empty());
    }

    #[test]
    fn sparse_noise_is_discarded() {
        let detector = BlobDetector::new(10.0, 3, 3, None);
        let points = vec![(0.0, 0.0), (100.0, 0.0), (200.0, 0.0), (300.0, 0.0)];
        assert!(detector.detect(&points).is_empty());
    }

    #[test]
    fn small_clusters_are_filtered_by_min_cluster_size() {
        let detector = BlobDetector::new(10.0, 3, 6, None);
        let points = clump((0.0, 0.0), 3.0);
        assert!(detector.detect(&points).is_empty());
    }

    #[test]
    fn oversized_clusters_are_filtered_by_max_extent() {
        // A dense chain of points spanning far more than the extent cap
        let points: Vec<Point2D> = (0..40).map(|i| (i as f64 * 4.0, 0.0)).collect();
        let unlimited = BlobDetector::new(10.0, 3, 3, None);
        assert_eq!(unlimited.detect(&points).len(), 1);
        let capped = BlobDetector::new(10.0, 3, 3, Some(50.0));
        assert!(capped.detect(&points).is_empty());
    }

    #[test]
    fn point_indices_reference_the_input_slice() {
        let detector = BlobDetector::new(10.0, 3, 3, None);
        let points = clump((50.0, 50.0), 2.0);
        let blobs = detector.detect(&points);
        assert_eq!(blobs.len(), 1);
        let mut indices = blobs[0].point_indices.clone();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }
}
