use crate::errors::Result;
use ndarray::prelude::*;

/// Classification model seen by the triage loop.
///
/// Keeps the loop independent of ONNX Runtime so it can be driven by a mock.
pub trait ImageClassifier: Send + Sync {
    /// Width of the score row returned by `predict`.
    fn num_classes(&self) -> usize;

    /// Raw class scores for an `N x 3 x H x W` batch, shape `N x num_classes`.
    fn predict(&self, tensor: ArrayView4<f32>) -> Result<Array2<f32>>;
}
