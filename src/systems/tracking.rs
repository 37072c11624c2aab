use log::debug;

use crate::geometry_utils::distance_points;
use crate::systems::clustering::DetectedBlob;
use crate::Point2D;

/// Fallback frame interval when timestamps are unusable (~40 Hz).
const DEFAULT_DT_S: f64 = 0.025;

/// A touch reported towards the router. Positions are sensor-local mm;
/// `normalized` is filled in per screen by the router.
#[derive(Debug, Clone)]
pub struct TrackedTouch {
    pub session_id: i32,
    pub x: f64,
    pub y: f64,
    /// mm/s in sensor-local coordinates
    pub velocity: Point2D,
    pub normalized: Point2D,
    pub age_frames: u32,
    pub num_points: usize,
}

struct Track {
    session_id: i32,
    position: Point2D,
    velocity: Point2D,
    num_points: usize,
    age_frames: u32,
    frames_unseen: u32,
}

/// Greedy nearest-neighbour tracker with velocity prediction and
/// persistent, strictly increasing session ids.
pub struct BlobTracker {
    max_distance_mm: f64,
    timeout_frames: u32,
    min_age_frames: u32,
    tracks: Vec<Track>,
    next_id: i32,
}

impl BlobTracker {
    pub fn new(max_distance_mm: f64, timeout_frames: u32, min_age_frames: u32) -> Self {
        BlobTracker {
            max_distance_mm,
            timeout_frames,
            min_age_frames,
            tracks: Vec::new(),
            next_id: 1,
        }
    }

    pub fn set_max_distance(&mut self, max_distance_mm: f64) {
        self.max_distance_mm = max_distance_mm;
    }

    pub fn set_timeout_frames(&mut self, timeout_frames: u32) {
        self.timeout_frames = timeout_frames;
    }

    pub fn set_min_age_frames(&mut self, min_age_frames: u32) {
        self.min_age_frames = min_age_frames;
    }

    fn alloc_id(&mut self) -> i32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Match blobs against existing tracks and return the touches visible
    /// this frame.
    pub fn update(&mut self, blobs: &[DetectedBlob], dt: f64) -> Vec<TrackedTouch> {
        let dt = if dt <= 0.0 { DEFAULT_DT_S } else { dt };

        // Candidate (distance, track, blob) pairs, cut at the gating
        // distance against the velocity-predicted track position
        let mut pairs: Vec<(f64, usize, usize)> = Vec::new();
        for (ti, track) in self.tracks.iter().enumerate() {
            let predicted = (
                track.position.0 + track.velocity.0 * dt,
                track.position.1 + track.velocity.1 * dt,
            );
            for (bi, blob) in blobs.iter().enumerate() {
                let dist = distance_points(&predicted, &blob.centroid);
                if dist <= self.max_distance_mm {
                    pairs.push((dist, ti, bi));
                }
            }
        }
        // Stable sort on distance only; insertion order breaks ties
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut matched_tracks = vec![false; self.tracks.len()];
        let mut matched_blobs = vec![false; blobs.len()];
        for &(_, ti, bi) in &pairs {
            if matched_tracks[ti] || matched_blobs[bi] {
                continue;
            }
            matched_tracks[ti] = true;
            matched_blobs[bi] = true;
            let track = &mut self.tracks[ti];
            let blob = &blobs[bi];
            track.velocity = (
                (blob.centroid.0 - track.position.0) / dt,
                (blob.centroid.1 - track.position.1) / dt,
            );
            track.position = blob.centroid;
            track.num_points = blob.num_points;
            track.age_frames += 1;
            track.frames_unseen = 0;
        }

        // Unmatched existing tracks age before any births this frame, so
        // newborn tracks are not aged
        for (ti, track) in self.tracks.iter_mut().enumerate() {
            if !matched_tracks[ti] {
                track.frames_unseen += 1;
            }
        }

        for (bi, blob) in blobs.iter().enumerate() {
            if matched_blobs[bi] {
                continue;
            }
            let session_id = self.alloc_id();
            debug!(
                "New track {} at ({:.0}, {:.0})",
                session_id, blob.centroid.0, blob.centroid.1
            );
            self.tracks.push(Track {
                session_id,
                position: blob.centroid,
                velocity: (0.0, 0.0),
                num_points: blob.num_points,
                age_frames: 1,
                frames_unseen: 0,
            });
        }

        let timeout_frames = self.timeout_frames;
        self.tracks.retain(|t| t.frames_unseen <= timeout_frames);

        self.tracks
            .iter()
            .filter(|t| t.frames_unseen == 0 && t.age_frames >= self.min_age_frames)
            .map(|t| TrackedTouch {
                session_id: t.session_id,
                x: t.position.0,
                y: t.position.1,
                velocity: t.velocity,
                normalized: (0.0, 0.0),
                age_frames: t.age_frames,
                num_points: t.num_points,
            })
            .collect()
    }

    /// Drop all tracks and restart the session id allocator.
    pub fn reset(&mut self) {
        self.tracks.clear();
        self.next_id = 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(x: f64, y: f64) -> DetectedBlob {
        DetectedBlob {
            centroid: (x, y),
            num_points: 5,
            point_indices: Vec::new(),
            extent_mm: 10.0,
        }
    }

    const DT: f64 = 0.025;

    #[test]
    fn births_allocate_increasing_session_ids() {
        let mut tracker = BlobTracker::new(50.0, 3, 1);
        let touches = tracker.update(&[blob(0.0, 0.0), blob(500.0, 0.0)], DT);
        let mut ids: Vec<i32> = touches.iter().map(|t| t.session_id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2]);
        assert!(touches.iter().all(|t| t.age_frames == 1));
    }

    #[test]
    fn matched_tracks_keep_their_id_and_age() {
        let mut tracker = BlobTracker::new(50.0, 3, 1);
        tracker.update(&[blob(100.0, 100.0)], DT);
        let touches = tracker.update(&[blob(110.0, 100.0)], DT);
        assert_eq!(touches.len(), 1);
        assert_eq!(touches[0].session_id, 1);
        assert_eq!(touches[0].age_frames, 2);
        assert!((touches[0].velocity.0 - 10.0 / DT).abs() < 1e-9);
        assert_eq!(touches[0].velocity.1, 0.0);
    }

    #[test]
    fn liftoff_hides_then_removes_the_track() {
        let mut tracker = BlobTracker::new(50.0, 3, 1);
        tracker.update(&[blob(0.0, 0.0)], DT);

        // Hidden while unseen, but alive through the timeout window
        for _ in 0..3 {
            assert!(tracker.update(&[], DT).is_empty());
        }
        // Still within timeout: a nearby blob re-acquires id 1
        let touches = tracker.update(&[blob(5.0, 0.0)], DT);
        assert_eq!(touches[0].session_id, 1);

        // Now exceed the timeout; the track is deleted and the next blob
        // gets a fresh id
        for _ in 0..4 {
            assert!(tracker.update(&[], DT).is_empty());
        }
        let touches = tracker.update(&[blob(0.0, 0.0)], DT);
        assert_eq!(touches[0].session_id, 2);
        assert_eq!(touches[0].age_frames, 1);
    }

    #[test]
    fn session_ids_are_never_reused() {
        let mut tracker = BlobTracker::new(50.0, 0, 1);
        let mut seen = Vec::new();
        for i in 0..5 {
            let touches = tracker.update(&[blob(i as f64 * 1000.0, 0.0)], DT);
            seen.push(touches[0].session_id);
            // Time the track out immediately
            tracker.update(&[], DT);
            tracker.update(&[], DT);
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn distant_blobs_are_not_matched() {
        let mut tracker = BlobTracker::new(50.0, 3, 1);
        tracker.update(&[blob(0.0, 0.0)], DT);
        let touches = tracker.update(&[blob(100.0, 0.0)], DT);
        // The old track is unseen; the far blob is a new birth
        assert_eq!(touches.len(), 1);
        assert_eq!(touches[0].session_id, 2);
    }

    #[test]
    fn greedy_matching_does_not_swap_separating_tracks() {
        let mut tracker = BlobTracker::new(50.0, 3, 1);
        // Two blobs 40 mm apart, then separating at 250 mm/s each
        let touches = tracker.update(&[blob(0.0, 20.0), blob(0.0, -20.0)], DT);
        let upper_id = touches
            .iter()
            .find(|t| t.y > 0.0)
            .map(|t| t.session_id)
            .unwrap();
        let lower_id = touches
            .iter()
            .find(|t| t.y < 0.0)
            .map(|t| t.session_id)
            .unwrap();
        assert_ne!(upper_id, lower_id);

        let step = 250.0 * DT;
        for frame in 1..=10 {
            let offset = 20.0 + frame as f64 * step;
            let touches = tracker.update(&[blob(0.0, offset), blob(0.0, -offset)], DT);
            assert_eq!(touches.len(), 2);
            for touch in &touches {
                if touch.y > 0.0 {
                    assert_eq!(touch.session_id, upper_id);
                } else {
                    assert_eq!(touch.session_id, lower_id);
                }
            }
        }
    }

    #[test]
    fn prediction_follows_a_fast_mover() {
        let mut tracker = BlobTracker::new(50.0, 3, 1);
        // 45 mm per frame is within gating for the first step, and the
        // velocity estimate keeps the prediction on target afterwards
        let mut x = 0.0;
        tracker.update(&[blob(x, 0.0)], DT);
        for _ in 0..10 {
            x += 45.0;
            let touches = tracker.update(&[blob(x, 0.0)], DT);
            assert_eq!(touches.len(), 1);
            assert_eq!(touches[0].session_id, 1);
        }
    }

    #[test]
    fn non_positive_dt_falls_back_to_default() {
        let mut tracker = BlobTracker::new(50.0, 3, 1);
        tracker.update(&[blob(0.0, 0.0)], 0.0);
        let touches = tracker.update(&[blob(10.0, 0.0)], -1.0);
        assert!((touches[0].velocity.0 - 10.0 / DEFAULT_DT_S).abs() < 1e-9);
    }

    #[test]
    fn min_age_suppresses_young_tracks_but_not_their_ids() {
        let mut tracker = BlobTracker::new(50.0, 3, 3);
        assert!(tracker.update(&[blob(0.0, 0.0)], DT).is_empty());
        assert!(tracker.update(&[blob(1.0, 0.0)], DT).is_empty());
        let touches = tracker.update(&[blob(2.0, 0.0)], DT);
        assert_eq!(touches.len(), 1);
        // The id was allocated at birth, not when first reported
        assert_eq!(touches[0].session_id, 1);
        assert_eq!(touches[0].age_frames, 3);
    }

    #[test]
    fn reset_restarts_the_id_allocator() {
        let mut tracker = BlobTracker::new(50.0, 3, 1);
        tracker.update(&[blob(0.0, 0.0)], DT);
        tracker.reset();
        tracker.reset();
        let touches = tracker.update(&[blob(0.0, 0.0)], DT);
        assert_eq!(touches[0].session_id, 1);
    }
}
