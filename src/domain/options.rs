// ============================================================
// Layer 3 - Readout Options
// ============================================================
// The options a caller hands to the registry come in two
// flavours, kept in separate structs so the type system tracks
// which ones survive option resolution:
//
//   ReadoutHyperparameters - passed through to every readout
//                            unchanged (init ranges, pooling,
//                            bias, the grid mean predictor)
//
//   SharingDirectives      - factory-level instructions
//                            (share_grid, share_features, ...)
//                            consumed by the resolver and never
//                            seen by a readout constructor
//
// After resolution a readout receives ResolvedReadoutOptions:
// the hyperparameters plus concrete per-key sharing descriptors.
//
// Reference: serde documentation (flatten, default)

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::domain::{error::ReadoutError, keyed_map::KeyedMap};

// ─── Reduction ────────────────────────────────────────────────────────────────
/// How a regularization penalty collapses its per-weight terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reduction {
    Mean,
    #[default]
    Sum,
    /// Keep one term per weight.
    #[serde(rename = "none")]
    Unreduced,
}

impl Reduction {
    /// Apply the legacy `average` flag. When present it overrides the
    /// reduction: `true` → Mean, `false` → Sum.
    pub fn resolve(self, average: Option<bool>) -> Reduction {
        match average {
            None => self,
            Some(avg) => {
                tracing::warn!("`average` is deprecated, pass a reduction instead");
                if avg { Reduction::Mean } else { Reduction::Sum }
            }
        }
    }
}

impl fmt::Display for Reduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reduction::Mean      => f.write_str("mean"),
            Reduction::Sum       => f.write_str("sum"),
            Reduction::Unreduced => f.write_str("none"),
        }
    }
}

impl FromStr for Reduction {
    type Err = ReadoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mean" => Ok(Reduction::Mean),
            "sum"  => Ok(Reduction::Sum),
            "none" => Ok(Reduction::Unreduced),
            other  => Err(ReadoutError::UnknownReduction(other.to_string())),
        }
    }
}

// ─── Grid Mean Predictor ──────────────────────────────────────────────────────
/// Shape of the MLP that maps a neuron's source-grid coordinates
/// (e.g. its cortical position) to its receptive-field centre.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridMeanPredictorConfig {
    /// Expected width of the source grid; checked when given.
    pub input_dimensions: Option<usize>,
    pub hidden_layers:    usize,
    pub hidden_features:  usize,
    pub final_tanh:       bool,
}

impl Default for GridMeanPredictorConfig {
    fn default() -> Self {
        Self {
            input_dimensions: None,
            hidden_layers:    0,
            hidden_features:  20,
            final_tanh:       false,
        }
    }
}

// ─── Hyperparameters ──────────────────────────────────────────────────────────
/// Readout constructor options that pass through resolution untouched.
/// Each readout kind reads the subset it understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadoutHyperparameters {
    /// Learn a per-neuron offset.
    pub bias: bool,

    /// PointPooled2d: initial points are uniform in ±init_range.
    pub init_range: f64,
    /// PointPooled2d: number of average-pooling levels above the input.
    pub pool_steps: usize,
    /// PointPooled2d: pooling kernel and stride.
    pub pool_kern: usize,

    /// Factorized readouts: L2-normalise each spatial mask.
    pub normalize: bool,
    /// Factorized readouts: std of the spatial mask initialisation.
    pub init_noise: f64,

    /// FullGaussian2d: initial means are uniform in ±init_mu_range.
    pub init_mu_range: f64,
    /// FullGaussian2d: initial pooling width.
    pub init_sigma: f64,

    pub grid_mean_predictor: Option<GridMeanPredictorConfig>,
}

impl Default for ReadoutHyperparameters {
    fn default() -> Self {
        Self {
            bias:                true,
            init_range:          0.1,
            pool_steps:          2,
            pool_kern:           2,
            normalize:           true,
            init_noise:          1e-3,
            init_mu_range:       0.1,
            init_sigma:          1.0,
            grid_mean_predictor: None,
        }
    }
}

// ─── Sharing Directives ───────────────────────────────────────────────────────
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SharingDirectives {
    /// Kind of grid mean predictor; only "cortex" exists.
    pub grid_mean_predictor_type: Option<String>,
    pub share_transform:          bool,
    pub share_grid:               bool,
    pub share_features:           bool,
    /// Per key, one match id per neuron. Neurons with equal ids
    /// across datasets are the same unit.
    pub shared_match_ids:         Option<KeyedMap<Vec<i64>>>,
    /// Per key, one coordinate row per neuron.
    pub source_grids:             Option<KeyedMap<Vec<Vec<f32>>>>,
}

impl SharingDirectives {
    /// True when no directive asks for any sharing.
    pub fn is_inert(&self) -> bool {
        self.grid_mean_predictor_type.is_none()
            && !self.share_transform
            && !self.share_grid
            && !self.share_features
    }
}

/// Everything the caller passes as "extra" readout options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadoutOptions {
    #[serde(flatten)]
    pub hyperparameters: ReadoutHyperparameters,
    #[serde(flatten)]
    pub sharing: SharingDirectives,
}

// ─── Resolved, per-key options ────────────────────────────────────────────────
/// Reference to the anchor key's readout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorRef(pub String);

/// Per-key sharing descriptor. `anchor` is `None` for the key that owns
/// the canonical table and names the owner otherwise. Table rows follow
/// the sorted unique `table_ids`, which are the owner's match ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedDescriptor {
    pub match_ids: Vec<i64>,
    pub anchor:    Option<AnchorRef>,
    pub table_ids: Vec<i64>,
}

/// Row lookup into a shared table derived from match ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharingIndex {
    /// Rows in the shared table, one per distinct owner id.
    pub unique: usize,
    /// Row of each neuron.
    pub rows:   Vec<i32>,
}

fn sorted_unique(ids: &[i64]) -> Vec<i64> {
    let mut unique = ids.to_vec();
    unique.sort_unstable();
    unique.dedup();
    unique
}

impl SharedDescriptor {
    /// Descriptor for the key whose ids define the table.
    pub fn owner(match_ids: Vec<i64>) -> Self {
        Self { table_ids: match_ids.clone(), match_ids, anchor: None }
    }

    /// Descriptor for a key reading the table `anchor` owns.
    pub fn referencing(match_ids: Vec<i64>, anchor: AnchorRef, anchor_ids: Vec<i64>) -> Self {
        Self { match_ids, anchor: Some(anchor), table_ids: anchor_ids }
    }

    pub fn owns_table(&self) -> bool {
        self.anchor.is_none()
    }

    /// Each neuron maps to the row of its id among the owner's sorted
    /// unique ids. Both keys must cover the same set of units.
    pub fn sharing_index(&self) -> Result<SharingIndex, ReadoutError> {
        let table = sorted_unique(&self.table_ids);
        let own = sorted_unique(&self.match_ids);
        if own.len() != table.len() {
            return Err(ReadoutError::invalid(format!(
                "{} distinct match ids, shared table has {} rows",
                own.len(),
                table.len()
            )));
        }
        let rows = self
            .match_ids
            .iter()
            .map(|id| {
                table
                    .binary_search(id)
                    .map(|row| row as i32)
                    .map_err(|_| ReadoutError::invalid(format!("match id {id} has no row in the shared table")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SharingIndex { unique: table.len(), rows })
    }
}

/// Options as a single readout constructor sees them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResolvedReadoutOptions {
    #[serde(flatten)]
    pub hyperparameters:  ReadoutHyperparameters,
    pub source_grid:      Option<Vec<Vec<f32>>>,
    pub shared_transform: Option<AnchorRef>,
    pub shared_grid:      Option<SharedDescriptor>,
    pub shared_features:  Option<SharedDescriptor>,
}

impl ResolvedReadoutOptions {
    pub fn from_hyperparameters(hyperparameters: ReadoutHyperparameters) -> Self {
        Self { hyperparameters, ..Default::default() }
    }
}

// ─── Source grid normalisation ────────────────────────────────────────────────
/// Centre each column and scale the whole grid by its largest magnitude.
/// Returns `(rows, cols, row-major values)`.
pub fn normalize_source_grid(grid: &[Vec<f32>]) -> Result<(usize, usize, Vec<f32>), ReadoutError> {
    let rows = grid.len();
    let cols = grid.first().map(Vec::len).unwrap_or(0);
    if rows == 0 || cols == 0 {
        return Err(ReadoutError::invalid("source grid is empty"));
    }
    if grid.iter().any(|row| row.len() != cols) {
        return Err(ReadoutError::invalid("source grid rows differ in length"));
    }

    let means: Vec<f32> = (0..cols)
        .map(|c| grid.iter().map(|row| row[c]).sum::<f32>() / rows as f32)
        .collect();

    let mut values: Vec<f32> = grid
        .iter()
        .flat_map(|row| row.iter().zip(&means).map(|(v, m)| v - m))
        .collect();

    let max_abs = values.iter().fold(0.0f32, |acc, v| acc.max(v.abs()));
    if max_abs > 0.0 {
        values.iter_mut().for_each(|v| *v /= max_abs);
    }
    Ok((rows, cols, values))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduction_parse() {
        assert_eq!("mean".parse::<Reduction>().unwrap(), Reduction::Mean);
        assert_eq!("none".parse::<Reduction>().unwrap(), Reduction::Unreduced);
        let err = "max".parse::<Reduction>().unwrap_err();
        assert!(err.to_string().contains("max"));
    }

    #[test]
    fn test_average_overrides_reduction() {
        assert_eq!(Reduction::Sum.resolve(Some(true)), Reduction::Mean);
        assert_eq!(Reduction::Mean.resolve(Some(false)), Reduction::Sum);
        assert_eq!(Reduction::Unreduced.resolve(None), Reduction::Unreduced);
    }

    #[test]
    fn test_sharing_index_uses_sorted_unique_ids() {
        let d = SharedDescriptor::owner(vec![40, 10, 40, 25]);
        let idx = d.sharing_index().unwrap();
        assert_eq!(idx.unique, 3);
        assert_eq!(idx.rows, vec![2, 0, 2, 1]);
    }

    #[test]
    fn test_sharing_index_rows_follow_owner_ids() {
        let anchor = AnchorRef("a".into());
        let d = SharedDescriptor::referencing(vec![12, 12, 10, 11], anchor.clone(), vec![10, 11, 12]);
        assert_eq!(d.sharing_index().unwrap().rows, vec![2, 2, 0, 1]);

        // a subset of the owner's units
        let subset = SharedDescriptor::referencing(vec![11, 12], anchor.clone(), vec![10, 11, 12]);
        assert!(subset.sharing_index().is_err());

        // same count, but a unit the owner does not have
        let disjoint = SharedDescriptor::referencing(vec![10, 11, 13], anchor, vec![10, 11, 12]);
        let err = disjoint.sharing_index().unwrap_err();
        assert!(err.to_string().contains("13"));
    }

    #[test]
    fn test_normalize_source_grid() {
        let grid = vec![vec![0.0, 10.0], vec![4.0, 10.0]];
        let (rows, cols, v) = normalize_source_grid(&grid).unwrap();
        assert_eq!((rows, cols), (2, 2));
        assert_eq!(v, vec![-1.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_ragged_source_grid_rejected() {
        let grid = vec![vec![0.0, 1.0], vec![4.0]];
        assert!(normalize_source_grid(&grid).is_err());
    }

    #[test]
    fn test_options_json_flattened() {
        let json = r#"{ "pool_steps": 3, "share_features": true, "bias": false }"#;
        let opts: ReadoutOptions = serde_json::from_str(json).unwrap();
        assert_eq!(opts.hyperparameters.pool_steps, 3);
        assert!(!opts.hyperparameters.bias);
        assert!(opts.sharing.share_features);
        assert_eq!(opts.hyperparameters.init_sigma, 1.0);
    }
}
