// ============================================================
// Layer 5 - Shareable Readout Components
// ============================================================
// The parts of a readout that can live in another dataset's
// readout:
//
//   FeatureWeights - per-neuron feature vectors, either owned
//                    [N, C] or gathered from a shared table
//                    [M, C] by match id and scaled per neuron
//
//   Positions      - per-neuron receptive-field centres, either
//                    owned [N, 2], gathered from a shared grid
//                    [M, 2], or predicted from source-grid
//                    coordinates by a MuTransform MLP
//
// A component that references the anchor keeps no copy of the
// anchor's tensor. At call time the registry passes the
// anchor's SharedParameters in and the component reads from
// there, so gradients land on the anchor's parameters.

use burn::{
    module::{Ignored, Param},
    nn::{Initializer, Linear, LinearConfig},
    prelude::*,
    tensor::{activation, TensorData},
};

use crate::domain::{
    error::ReadoutError,
    options::{normalize_source_grid, AnchorRef, GridMeanPredictorConfig, SharedDescriptor},
};
use crate::ml::readouts::{common, SharedParameters};

// ─── MuTransform ──────────────────────────────────────────────────────────────
/// MLP from source-grid coordinates to a 2D receptive-field centre.
/// Linear layers with ELU between them, optionally a final tanh.
#[derive(Module, Debug)]
pub struct MuTransform<B: Backend> {
    layers:           Vec<Linear<B>>,
    input_dimensions: usize,
    hidden_layers:    usize,
    hidden_features:  usize,
    final_tanh:       bool,
}

impl<B: Backend> MuTransform<B> {
    pub fn new(input_dimensions: usize, cfg: &GridMeanPredictorConfig, device: &B::Device) -> Self {
        Self {
            layers: Self::build_layers(input_dimensions, cfg.hidden_layers, cfg.hidden_features, device),
            input_dimensions,
            hidden_layers: cfg.hidden_layers,
            hidden_features: cfg.hidden_features,
            final_tanh: cfg.final_tanh,
        }
    }

    fn build_layers(
        input_dimensions: usize,
        hidden_layers:    usize,
        hidden_features:  usize,
        device:           &B::Device,
    ) -> Vec<Linear<B>> {
        let first_out = if hidden_layers > 0 { hidden_features } else { 2 };
        let mut layers = vec![LinearConfig::new(input_dimensions, first_out).init(device)];
        for i in 0..hidden_layers {
            let out = if i + 1 < hidden_layers { hidden_features } else { 2 };
            layers.push(LinearConfig::new(hidden_features, out).init(device));
        }
        layers
    }

    pub fn input_dimensions(&self) -> usize {
        self.input_dimensions
    }

    /// [N, input_dimensions] → [N, 2]
    pub fn forward(&self, grid: Tensor<B, 2>) -> Tensor<B, 2> {
        let mut x = grid;
        for (i, layer) in self.layers.iter().enumerate() {
            if i > 0 {
                x = common::elu(x);
            }
            x = layer.forward(x);
        }
        if self.final_tanh {
            activation::tanh(x)
        } else {
            x
        }
    }

    /// Draw fresh layer weights.
    pub fn reset(&mut self, device: &B::Device) {
        self.layers = Self::build_layers(self.input_dimensions, self.hidden_layers, self.hidden_features, device);
    }
}

// ─── Sources ──────────────────────────────────────────────────────────────────
/// Where a readout's feature vectors come from.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureSource {
    Owned,
    /// `table_rows` is the size of the table `rows` index into.
    Shared { rows: Vec<i32>, table_rows: usize, from_anchor: bool },
}

/// Where a readout's receptive-field centres come from.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionSource {
    Owned,
    Shared { rows: Vec<i32>, table_rows: usize, from_anchor: bool },
    /// Normalised source grid, row-major `[rows, cols]`.
    Predicted { grid: Vec<f32>, rows: usize, cols: usize, from_anchor: bool },
}

fn sharing_rows(descriptor: &SharedDescriptor, outdims: usize, what: &str) -> Result<(usize, Vec<i32>), ReadoutError> {
    if descriptor.match_ids.len() != outdims {
        return Err(ReadoutError::invalid(format!(
            "{what}: {} match ids for {outdims} neurons",
            descriptor.match_ids.len()
        )));
    }
    let index = descriptor
        .sharing_index()
        .map_err(|e| ReadoutError::invalid(format!("{what}: {e}")))?;
    Ok((index.unique, index.rows))
}

fn check_table_rows(actual: usize, expected: usize, what: &str) -> Result<(), ReadoutError> {
    if actual != expected {
        return Err(ReadoutError::invalid(format!(
            "{what}: anchor table has {actual} rows, anchor match ids give {expected}"
        )));
    }
    Ok(())
}

// ─── FeatureWeights ───────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct FeatureWeights<B: Backend> {
    /// Owned features [N, C].
    own:      Option<Param<Tensor<B, 2>>>,
    /// Canonical shared table [M, C], only on the key that owns it.
    table:    Option<Param<Tensor<B, 2>>>,
    /// Per-neuron scale applied to gathered shared rows [N, 1].
    scales:   Option<Param<Tensor<B, 2>>>,
    source:   Ignored<FeatureSource>,
    outdims:  usize,
    channels: usize,
}

impl<B: Backend> FeatureWeights<B> {
    pub fn new(
        shared:   Option<&SharedDescriptor>,
        outdims:  usize,
        channels: usize,
        device:   &B::Device,
    ) -> Result<Self, ReadoutError> {
        let zeros = |rows: usize, cols: usize| Param::from_tensor(Tensor::<B, 2>::zeros([rows, cols], device));
        let weights = match shared {
            None => Self {
                own: Some(zeros(outdims, channels)),
                table: None,
                scales: None,
                source: Ignored(FeatureSource::Owned),
                outdims,
                channels,
            },
            Some(descriptor) => {
                let (unique, rows) = sharing_rows(descriptor, outdims, "shared features")?;
                let owns = descriptor.owns_table();
                Self {
                    own: None,
                    table: owns.then(|| zeros(unique, channels)),
                    scales: Some(zeros(outdims, 1)),
                    source: Ignored(FeatureSource::Shared { rows, table_rows: unique, from_anchor: !owns }),
                    outdims,
                    channels,
                }
            }
        };
        Ok(weights)
    }

    pub fn source(&self) -> &FeatureSource {
        &self.source.0
    }

    /// The canonical table, when this readout owns one.
    pub fn table(&self) -> Option<Tensor<B, 2>> {
        self.table.as_ref().map(|t| t.val())
    }

    /// Effective feature vectors [N, C].
    pub fn resolve(&self, anchor: &SharedParameters<'_, B>) -> Result<Tensor<B, 2>, ReadoutError> {
        match &self.source.0 {
            FeatureSource::Owned => self
                .own
                .as_ref()
                .map(|p| p.val())
                .ok_or(ReadoutError::invalid("owned features missing")),
            FeatureSource::Shared { rows, from_anchor, .. } => {
                let table = if *from_anchor {
                    anchor
                        .features
                        .clone()
                        .ok_or(ReadoutError::MissingAnchorParameter { component: "shared feature table" })?
                } else {
                    self.table().ok_or(ReadoutError::invalid("shared feature table missing"))?
                };
                let scales = self
                    .scales
                    .as_ref()
                    .map(|p| p.val())
                    .ok_or(ReadoutError::invalid("feature scales missing"))?;
                let gathered = table.clone().select(0, common::row_index::<B>(rows, &table.device()));
                Ok(gathered * scales.expand([self.outdims, self.channels]))
            }
        }
    }

    pub fn check_anchor(&self, anchor: &SharedParameters<'_, B>) -> Result<(), ReadoutError> {
        if let FeatureSource::Shared { table_rows: expected, from_anchor: true, .. } = &self.source.0 {
            let table = anchor
                .features
                .as_ref()
                .ok_or(ReadoutError::MissingAnchorParameter { component: "shared feature table" })?;
            let [table_rows, table_cols] = table.dims();
            if table_cols != self.channels {
                return Err(ReadoutError::invalid(format!(
                    "shared features: anchor has {table_cols} channels, readout has {}",
                    self.channels
                )));
            }
            check_table_rows(table_rows, *expected, "shared features")?;
        }
        Ok(())
    }

    /// Re-draw owned weights with `init`; scales go back to one.
    pub fn initialize(&mut self, init: &Initializer, device: &B::Device) {
        let (outdims, channels) = (self.outdims, self.channels);
        if let Some(own) = self.own.as_mut() {
            *own = init.init([outdims, channels], device);
        }
        if let Some(table) = self.table.as_mut() {
            let rows = table.val().dims()[0];
            *table = init.init([rows, channels], device);
        }
        if let Some(scales) = self.scales.as_mut() {
            *scales = Initializer::Ones.init([outdims, 1], device);
        }
    }
}

// ─── Positions ────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct Positions<B: Backend> {
    /// Owned centres [N, 2].
    own:       Option<Param<Tensor<B, 2>>>,
    /// Canonical shared grid [M, 2], only on the key that owns it.
    table:     Option<Param<Tensor<B, 2>>>,
    /// Owned grid mean predictor.
    transform: Option<MuTransform<B>>,
    source:    Ignored<PositionSource>,
    outdims:   usize,
}

impl<B: Backend> Positions<B> {
    pub fn owned(outdims: usize, device: &B::Device) -> Self {
        Self {
            own: Some(Param::from_tensor(Tensor::zeros([outdims, 2], device))),
            table: None,
            transform: None,
            source: Ignored(PositionSource::Owned),
            outdims,
        }
    }

    pub fn shared(descriptor: &SharedDescriptor, outdims: usize, device: &B::Device) -> Result<Self, ReadoutError> {
        let (unique, rows) = sharing_rows(descriptor, outdims, "shared grid")?;
        let owns = descriptor.owns_table();
        Ok(Self {
            own: None,
            table: owns.then(|| Param::from_tensor(Tensor::zeros([unique, 2], device))),
            transform: None,
            source: Ignored(PositionSource::Shared { rows, table_rows: unique, from_anchor: !owns }),
            outdims,
        })
    }

    pub fn predicted(
        source_grid:      &[Vec<f32>],
        cfg:              &GridMeanPredictorConfig,
        shared_transform: Option<&AnchorRef>,
        outdims:          usize,
        device:           &B::Device,
    ) -> Result<Self, ReadoutError> {
        let (rows, cols, grid) = normalize_source_grid(source_grid)?;
        if rows != outdims {
            return Err(ReadoutError::invalid(format!(
                "source grid has {rows} rows for {outdims} neurons"
            )));
        }
        if let Some(expected) = cfg.input_dimensions {
            if expected != cols {
                return Err(ReadoutError::invalid(format!(
                    "grid mean predictor expects {expected} input dimensions, source grid has {cols}"
                )));
            }
        }
        let from_anchor = shared_transform.is_some();
        Ok(Self {
            own: None,
            table: None,
            transform: (!from_anchor).then(|| MuTransform::new(cols, cfg, device)),
            source: Ignored(PositionSource::Predicted { grid, rows, cols, from_anchor }),
            outdims,
        })
    }

    pub fn source(&self) -> &PositionSource {
        &self.source.0
    }

    pub fn table(&self) -> Option<Tensor<B, 2>> {
        self.table.as_ref().map(|t| t.val())
    }

    pub fn transform(&self) -> Option<&MuTransform<B>> {
        self.transform.as_ref()
    }

    /// Receptive-field centres [N, 2].
    pub fn resolve(&self, anchor: &SharedParameters<'_, B>, device: &B::Device) -> Result<Tensor<B, 2>, ReadoutError> {
        match &self.source.0 {
            PositionSource::Owned => self
                .own
                .as_ref()
                .map(|p| p.val())
                .ok_or(ReadoutError::invalid("owned positions missing")),
            PositionSource::Shared { rows, from_anchor, .. } => {
                let table = if *from_anchor {
                    anchor
                        .grid
                        .clone()
                        .ok_or(ReadoutError::MissingAnchorParameter { component: "shared grid" })?
                } else {
                    self.table().ok_or(ReadoutError::invalid("shared grid missing"))?
                };
                Ok(table.select(0, common::row_index::<B>(rows, device)))
            }
            PositionSource::Predicted { grid, rows, cols, from_anchor } => {
                let transform = if *from_anchor {
                    anchor
                        .transform
                        .ok_or(ReadoutError::MissingAnchorParameter { component: "grid mean predictor" })?
                } else {
                    self.transform
                        .as_ref()
                        .ok_or(ReadoutError::invalid("grid mean predictor missing"))?
                };
                let grid = Tensor::from_data(TensorData::new(grid.clone(), [*rows, *cols]), device);
                Ok(transform.forward(grid))
            }
        }
    }

    pub fn check_anchor(&self, anchor: &SharedParameters<'_, B>) -> Result<(), ReadoutError> {
        match &self.source.0 {
            PositionSource::Shared { table_rows: expected, from_anchor: true, .. } => {
                let grid = anchor
                    .grid
                    .as_ref()
                    .ok_or(ReadoutError::MissingAnchorParameter { component: "shared grid" })?;
                check_table_rows(grid.dims()[0], *expected, "shared grid")
            }
            PositionSource::Predicted { cols, from_anchor: true, .. } => {
                let transform = anchor
                    .transform
                    .ok_or(ReadoutError::MissingAnchorParameter { component: "grid mean predictor" })?;
                if transform.input_dimensions() != *cols {
                    return Err(ReadoutError::invalid(format!(
                        "anchor grid mean predictor takes {} dimensions, source grid has {cols}",
                        transform.input_dimensions()
                    )));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Uniform centres in ±range; an owned predictor gets fresh weights.
    pub fn initialize(&mut self, range: f64, device: &B::Device) {
        let init = Initializer::Uniform { min: -range, max: range };
        if let Some(own) = self.own.as_mut() {
            *own = init.init([self.outdims, 2], device);
        }
        if let Some(table) = self.table.as_mut() {
            let rows = table.val().dims()[0];
            *table = init.init([rows, 2], device);
        }
        if let Some(transform) = self.transform.as_mut() {
            transform.reset(device);
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TB = NdArray;

    #[test]
    fn test_mu_transform_output_shape() {
        let device = Default::default();
        let cfg = GridMeanPredictorConfig { hidden_layers: 2, hidden_features: 8, final_tanh: true, ..Default::default() };
        let t = MuTransform::<TB>::new(3, &cfg, &device);
        assert_eq!(t.layers.len(), 3);
        let out = t.forward(Tensor::zeros([5, 3], &device));
        assert_eq!(out.dims(), [5, 2]);
        let v = out.into_data().to_vec::<f32>().unwrap();
        assert!(v.iter().all(|x| x.abs() <= 1.0));
    }

    #[test]
    fn test_shared_features_gather_and_scale() {
        let device = Default::default();
        let descriptor = SharedDescriptor::owner(vec![7, 3, 7]);
        let mut fw = FeatureWeights::<TB>::new(Some(&descriptor), 3, 2, &device).unwrap();
        fw.initialize(&Initializer::Constant { value: 0.5 }, &device);
        assert_eq!(fw.table().unwrap().dims(), [2, 2]);

        let resolved = fw.resolve(&SharedParameters::none()).unwrap();
        assert_eq!(resolved.dims(), [3, 2]);
        assert!(resolved.into_data().to_vec::<f32>().unwrap().iter().all(|v| (*v - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_referencing_features_need_anchor_table() {
        let device = Default::default();
        let descriptor = SharedDescriptor::referencing(vec![2, 1], AnchorRef("a".into()), vec![1, 2]);
        let fw = FeatureWeights::<TB>::new(Some(&descriptor), 2, 4, &device).unwrap();
        assert!(fw.table().is_none());
        let err = fw.resolve(&SharedParameters::none()).unwrap_err();
        assert!(matches!(err, ReadoutError::MissingAnchorParameter { .. }));
    }

    #[test]
    fn test_referencing_features_read_rows_of_same_units() {
        let device = Default::default();
        let mut owner = FeatureWeights::<TB>::new(Some(&SharedDescriptor::owner(vec![10, 11, 12])), 3, 1, &device).unwrap();
        owner.initialize(&Initializer::Constant { value: 0.0 }, &device);
        // row r holds r + 1, so each unit's row is recognisable
        owner.table = Some(Param::from_tensor(Tensor::from_data(TensorData::new(vec![1.0f32, 2.0, 3.0], [3, 1]), &device)));

        let anchor = AnchorRef("a".into());
        let descriptor = SharedDescriptor::referencing(vec![12, 10, 11], anchor.clone(), vec![10, 11, 12]);
        let mut fw = FeatureWeights::<TB>::new(Some(&descriptor), 3, 1, &device).unwrap();
        fw.initialize(&Initializer::Constant { value: 0.0 }, &device);
        let shared = SharedParameters { grid: None, features: owner.table(), transform: None };
        fw.check_anchor(&shared).unwrap();
        let v = fw.resolve(&shared).unwrap().into_data().to_vec::<f32>().unwrap();
        assert_eq!(v, vec![3.0, 1.0, 2.0]);

        // units 11 and 12 alone cannot address a table built for 10, 11 and 12
        let subset = SharedDescriptor::referencing(vec![11, 12], anchor, vec![10, 11, 12]);
        assert!(FeatureWeights::<TB>::new(Some(&subset), 2, 1, &device).is_err());
    }

    #[test]
    fn test_anchor_table_size_must_match_anchor_ids() {
        let device = Default::default();
        let descriptor = SharedDescriptor::referencing(vec![1, 2], AnchorRef("a".into()), vec![1, 2]);
        let fw = FeatureWeights::<TB>::new(Some(&descriptor), 2, 4, &device).unwrap();
        let table = Tensor::<TB, 2>::zeros([3, 4], &device);
        let shared = SharedParameters { grid: None, features: Some(table), transform: None };
        assert!(fw.check_anchor(&shared).is_err());
    }

    #[test]
    fn test_match_id_count_must_match_neurons() {
        let device = Default::default();
        let descriptor = SharedDescriptor::owner(vec![1, 2, 3]);
        assert!(Positions::<TB>::shared(&descriptor, 2, &device).is_err());
    }

    #[test]
    fn test_predicted_positions_from_own_transform() {
        let device = Default::default();
        let grid = vec![vec![0.0, 0.0], vec![1.0, 2.0], vec![3.0, 1.0]];
        let pos = Positions::<TB>::predicted(&grid, &GridMeanPredictorConfig::default(), None, 3, &device).unwrap();
        assert!(pos.transform().is_some());
        let mu = pos.resolve(&SharedParameters::none(), &device).unwrap();
        assert_eq!(mu.dims(), [3, 2]);
    }
}
