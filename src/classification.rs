use ndarray::prelude::*;

/// Top-1 result of one forward pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub class_index: usize,
    /// Softmax probability of `class_index`.
    pub confidence: f32,
}

impl Prediction {
    /// Picks the arg-max of the raw scores and its softmax probability.
    ///
    /// The first maximal index wins on ties. Returns `None` for an empty row.
    pub fn from_logits(logits: ArrayView1<f32>) -> Option<Self> {
        let (class_index, _) = logits
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
                Some((_, b)) if v <= b || v.is_nan() => best,
                _ => Some((i, v)),
            })?;
        let probabilities = softmax(logits);
        Some(Self {
            class_index,
            confidence: probabilities[class_index],
        })
    }
}

pub fn softmax(logits: ArrayView1<f32>) -> Array1<f32> {
    let max = logits.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
    let exp = logits.mapv(|v| (v - max).exp());
    let sum = exp.sum();
    exp / sum
}
