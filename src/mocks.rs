use crate::errors::{Result, TriageError};
use crate::traits::ImageClassifier;
use ndarray::prelude::*;

type ScoreFn = dyn Fn(ArrayView4<f32>) -> Vec<f32> + Send + Sync;

/// Classifier for tests: scores come from a closure over the input tensor.
pub struct MockClassifier {
    num_classes: usize,
    scores: Box<ScoreFn>,
}

impl MockClassifier {
    pub fn new<F>(num_classes: usize, scores: F) -> Self
    where
        F: Fn(ArrayView4<f32>) -> Vec<f32> + Send + Sync + 'static,
    {
        Self {
            num_classes,
            scores: Box::new(scores),
        }
    }

    /// Predicts `class_index` with `confidence` for every image.
    pub fn constant(num_classes: usize, class_index: usize, confidence: f32) -> Self {
        let logits = logits_for(num_classes, class_index, confidence);
        Self::new(num_classes, move |_| logits.clone())
    }
}

impl ImageClassifier for MockClassifier {
    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn predict(&self, tensor: ArrayView4<f32>) -> Result<Array2<f32>> {
        let batch = tensor.shape()[0];
        let mut out = Array2::<f32>::zeros((batch, self.num_classes));
        for (i, mut row) in out.rows_mut().into_iter().enumerate() {
            let scores = (self.scores)(tensor.slice(s![i..i + 1, .., .., ..]));
            let scores = Array1::from_vec(scores);
            if scores.len() != self.num_classes {
                return Err(TriageError::model(
                    "モック推論",
                    format!("expected {} scores, got {}", self.num_classes, scores.len()),
                ));
            }
            row.assign(&scores);
        }
        Ok(out)
    }
}

/// Logits whose softmax puts `confidence` on `class_index` and spreads the
/// rest evenly.
pub fn logits_for(num_classes: usize, class_index: usize, confidence: f32) -> Vec<f32> {
    let others = (num_classes - 1) as f32;
    let peak = (confidence * others / (1.0 - confidence)).ln();
    (0..num_classes)
        .map(|i| if i == class_index { peak } else { 0.0 })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classification::Prediction;

    #[test]
    fn logits_reproduce_confidence() {
        for (class, conf) in [(1, 0.95), (0, 0.9), (0, 0.5), (3, 0.3)] {
            let logits = Array1::from_vec(logits_for(4, class, conf));
            let prediction = Prediction::from_logits(logits.view()).unwrap();
            assert_eq!(prediction.class_index, class);
            assert!((prediction.confidence - conf).abs() < 1e-5);
        }
    }

    #[test]
    fn constant_mock_fills_every_row() {
        let mock = MockClassifier::constant(4, 2, 0.7);
        let out = mock.predict(Array4::<f32>::zeros((3, 3, 8, 8)).view()).unwrap();
        assert_eq!(out.shape(), &[3, 4]);
        for row in out.rows() {
            assert_eq!(Prediction::from_logits(row).unwrap().class_index, 2);
        }
    }

    #[test]
    fn wrong_score_count_is_an_error() {
        let mock = MockClassifier::new(4, |_| vec![0.0; 3]);
        assert!(mock.predict(Array4::<f32>::zeros((1, 3, 8, 8)).view()).is_err());
    }
}
