use burn::data::dataset::Dataset;
use serde::{Deserialize, Serialize};

/// One stimulus presentation: the core output it produced and the
/// recorded responses of every neuron in the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSample {
    /// Core output, row-major [C, H, W].
    pub inputs:    Vec<f32>,
    /// One value per neuron.
    pub responses: Vec<f32>,
}

/// All samples of one recording session, addressed by its data key.
#[derive(Debug, Clone)]
pub struct SessionDataset {
    key:       String,
    in_shape:  [usize; 3],
    n_neurons: usize,
    samples:   Vec<ResponseSample>,
}

impl SessionDataset {
    pub fn new(
        key:       impl Into<String>,
        in_shape:  [usize; 3],
        n_neurons: usize,
        samples:   Vec<ResponseSample>,
    ) -> Self {
        Self { key: key.into(), in_shape, n_neurons, samples }
    }

    pub fn key(&self) -> &str { &self.key }

    pub fn in_shape(&self) -> [usize; 3] { self.in_shape }

    pub fn n_neurons(&self) -> usize { self.n_neurons }

    pub fn samples(&self) -> &[ResponseSample] { &self.samples }

    pub fn into_samples(self) -> Vec<ResponseSample> { self.samples }

    /// Average response per neuron; zeros for an empty session.
    pub fn mean_activity(&self) -> Vec<f32> {
        let mut mean = vec![0.0f32; self.n_neurons];
        if self.samples.is_empty() {
            return mean;
        }
        for sample in &self.samples {
            for (m, r) in mean.iter_mut().zip(&sample.responses) {
                *m += r;
            }
        }
        let n = self.samples.len() as f32;
        mean.iter_mut().for_each(|m| *m /= n);
        mean
    }
}

impl Dataset<ResponseSample> for SessionDataset {
    fn get(&self, index: usize) -> Option<ResponseSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_activity() {
        let samples = vec![
            ResponseSample { inputs: vec![0.0], responses: vec![1.0, 4.0] },
            ResponseSample { inputs: vec![0.0], responses: vec![3.0, 0.0] },
        ];
        let ds = SessionDataset::new("s", [1, 1, 1], 2, samples);
        assert_eq!(ds.mean_activity(), vec![2.0, 2.0]);
        assert_eq!(ds.len(), 2);
        assert!(ds.get(2).is_none());
    }

    #[test]
    fn test_empty_session_mean_is_zero() {
        let ds = SessionDataset::new("s", [1, 1, 1], 3, Vec::new());
        assert_eq!(ds.mean_activity(), vec![0.0; 3]);
    }
}
