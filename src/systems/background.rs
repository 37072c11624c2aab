use log::info;
use ndarray::{Array1, Zip};

enum State {
    Unlearned,
    Learning { accumulator: Vec<Array1<f64>> },
    Learned { background: Array1<f64> },
}

/// Learns the empty-scene distances once; frozen after learning until
/// reset. A ray is foreground when it measures closer than the learned
/// background by more than the threshold.
pub struct BackgroundModel {
    num_learning_frames: usize,
    threshold_mm: f64,
    state: State,
}

impl BackgroundModel {
    pub fn new(num_learning_frames: usize, threshold_mm: f64) -> Self {
        BackgroundModel {
            num_learning_frames: num_learning_frames.max(1),
            threshold_mm,
            state: State::Unlearned,
        }
    }

    pub fn is_learned(&self) -> bool {
        matches!(self.state, State::Learned { .. })
    }

    pub fn is_learning(&self) -> bool {
        matches!(self.state, State::Learning { .. })
    }

    pub fn learning_progress(&self) -> f64 {
        match &self.state {
            State::Unlearned => 0.0,
            State::Learning { accumulator } => {
                accumulator.len() as f64 / self.num_learning_frames as f64
            }
            State::Learned { .. } => 1.0,
        }
    }

    pub fn set_threshold(&mut self, threshold_mm: f64) {
        self.threshold_mm = threshold_mm;
    }

    pub fn set_num_frames(&mut self, frames: usize) {
        self.num_learning_frames = frames.max(1);
    }

    /// Begin (re)learning; any previous background or partial accumulator
    /// is discarded.
    pub fn start_learning(&mut self) {
        self.state = State::Learning {
            accumulator: Vec::new(),
        };
    }

    /// Accumulate one frame while learning. Returns true exactly when this
    /// frame completed the background.
    pub fn feed_learning_frame(&mut self, distances: &Array1<f64>) -> bool {
        let State::Learning { accumulator } = &mut self.state else {
            return false;
        };
        accumulator.push(distances.clone());
        if accumulator.len() < self.num_learning_frames {
            return false;
        }
        let background = median_background(accumulator);
        info!("Background learned from {} frames", accumulator.len());
        self.state = State::Learned { background };
        true
    }

    /// Foreground mask: true where the scene is closer than the background
    /// by more than the threshold. All false unless learned; zero-distance
    /// rays are never foreground.
    pub fn subtract(&self, distances: &Array1<f64>) -> Array1<bool> {
        match &self.state {
            State::Learned { background } => Zip::from(background)
                .and(distances)
                .map_collect(|&bg, &dist| bg - dist > self.threshold_mm && dist > 0.0),
            _ => Array1::from_elem(distances.len(), false),
        }
    }

    /// Learned background distances, for visualization.
    pub fn background(&self) -> Option<&Array1<f64>> {
        match &self.state {
            State::Learned { background } => Some(background),
            _ => None,
        }
    }

    pub fn reset(&mut self) {
        self.state = State::Unlearned;
    }
}

/// Elementwise median across the accumulated frames. Zero (no return)
/// samples are treated as missing; a ray with no valid sample at all gets
/// NaN, which never compares closer than any reading.
fn median_background(accumulator: &[Array1<f64>]) -> Array1<f64> {
    let num_rays = accumulator.first().map_or(0, |frame| frame.len());
    Array1::from_shape_fn(num_rays, |ray| {
        let mut samples: Vec<f64> = accumulator
            .iter()
            .map(|frame| frame[ray])
            .filter(|&dist| dist > 0.0)
            .collect();
        if samples.is_empty() {
            return f64::NAN;
        }
        samples.sort_unstable_by(f64::total_cmp);
        let mid = samples.len() / 2;
        if samples.len() % 2 == 0 {
            (samples[mid - 1] + samples[mid]) / 2.0
        } else {
            samples[mid]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn learning_completes_after_exactly_num_frames() {
        let mut model = BackgroundModel::new(3, 40.0);
        assert_eq!(model.learning_progress(), 0.0);
        model.start_learning();
        assert!(!model.feed_learning_frame(&array![1000.0, 1000.0]));
        assert_eq!(model.learning_progress(), 1.0 / 3.0);
        assert!(!model.feed_learning_frame(&array![1000.0, 1000.0]));
        assert!(model.feed_learning_frame(&array![1000.0, 1000.0]));
        assert!(model.is_learned());
        assert_eq!(model.learning_progress(), 1.0);
        // Further frames are ignored once learned
        assert!(!model.feed_learning_frame(&array![1000.0, 1000.0]));
    }

    #[test]
    fn median_ignores_zero_samples() {
        let mut model = BackgroundModel::new(3, 40.0);
        model.start_learning();
        model.feed_learning_frame(&array![1000.0, 0.0]);
        model.feed_learning_frame(&array![0.0, 0.0]);
        model.feed_learning_frame(&array![1010.0, 0.0]);
        let background = model.background().unwrap();
        assert_eq!(background[0], 1005.0);
        // No valid sample on ray 1: its background is NaN and it can never
        // become foreground
        assert!(background[1].is_nan());
        let mask = model.subtract(&array![100.0, 100.0]);
        assert_eq!(mask.to_vec(), vec![true, false]);
    }

    #[test]
    fn median_is_robust_to_transient_foreground() {
        let mut model = BackgroundModel::new(5, 40.0);
        model.start_learning();
        for frame in [1000.0, 1001.0, 600.0, 999.0, 1002.0] {
            model.feed_learning_frame(&array![frame]);
        }
        assert_eq!(model.background().unwrap()[0], 1000.0);
    }

    #[test]
    fn subtract_rejects_zero_distance_rays() {
        let mut model = BackgroundModel::new(1, 40.0);
        model.start_learning();
        model.feed_learning_frame(&array![1000.0, 1000.0]);
        let mask = model.subtract(&array![0.0, 900.0]);
        assert_eq!(mask.to_vec(), vec![false, true]);
    }

    #[test]
    fn subtract_is_all_false_unless_learned() {
        let mut model = BackgroundModel::new(3, 40.0);
        let distances = array![100.0, 100.0];
        assert_eq!(model.subtract(&distances).to_vec(), vec![false, false]);
        model.start_learning();
        model.feed_learning_frame(&distances);
        assert_eq!(model.subtract(&distances).to_vec(), vec![false, false]);
    }

    #[test]
    fn threshold_bounds_the_foreground_decision() {
        let mut model = BackgroundModel::new(1, 40.0);
        model.start_learning();
        model.feed_learning_frame(&array![1000.0, 1000.0]);
        let mask = model.subtract(&array![961.0, 959.0]);
        assert_eq!(mask.to_vec(), vec![false, true]);
    }

    #[test]
    fn start_learning_discards_a_learned_background() {
        let mut model = BackgroundModel::new(1, 40.0);
        model.start_learning();
        model.feed_learning_frame(&array![1000.0]);
        assert!(model.is_learned());
        model.start_learning();
        assert!(model.is_learning());
        assert_eq!(model.learning_progress(), 0.0);
    }

    #[test]
    fn reset_is_idempotent() {
        let mut model = BackgroundModel::new(1, 40.0);
        model.start_learning();
        model.feed_learning_frame(&array![1000.0]);
        model.reset();
        let after_one = (model.is_learned(), model.is_learning(), model.learning_progress());
        model.reset();
        let after_two = (model.is_learned(), model.is_learning(), model.learning_progress());
        assert_eq!(after_one, after_two);
        assert_eq!(after_one, (false, false, 0.0));
    }
}
