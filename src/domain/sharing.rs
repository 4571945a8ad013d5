// ============================================================
// Layer 3 - Option Resolvers
// ============================================================
// Wires up cross-dataset sharing before each readout is built.
//
// Rules for SharedParameterResolver, evaluated per key with the
// first key as the anchor:
//
//   grid_mean_predictor set
//     → kind must be "cortex" (else: lookup error naming it)
//     → source_grid = source_grids[key]
//     → share_transform: anchor gets None, others a reference
//   else share_grid
//     → shared_grid = { match_ids[key], None | anchor }
//   share_features
//     → shared_features = { match_ids[key], None | anchor }
//
// Table rows always follow the anchor's sorted unique ids, so
// equal ids in two datasets address the same row.
//
// The directives themselves never reach the readout: the
// resolved options type has no field for them.

use crate::domain::{
    error::ReadoutError,
    options::{AnchorRef, ReadoutOptions, ResolvedReadoutOptions, SharedDescriptor},
    traits::OptionResolver,
};

/// The only grid mean predictor kind there is.
pub const CORTEX_PREDICTOR: &str = "cortex";

// ─── PassThrough ──────────────────────────────────────────────────────────────
/// Every key receives the hyperparameters unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl OptionResolver for PassThrough {
    fn resolve(
        &self,
        index:       usize,
        _data_key:   &str,
        _anchor_key: &str,
        options:     &ReadoutOptions,
    ) -> Result<ResolvedReadoutOptions, ReadoutError> {
        if index == 0 && !options.sharing.is_inert() {
            tracing::warn!("sharing directives are ignored by a registry without parameter sharing");
        }
        Ok(ResolvedReadoutOptions::from_hyperparameters(options.hyperparameters.clone()))
    }
}

// ─── SharedParameterResolver ──────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, Default)]
pub struct SharedParameterResolver;

impl SharedParameterResolver {
    fn anchor_for(index: usize, anchor_key: &str) -> Option<AnchorRef> {
        (index > 0).then(|| AnchorRef(anchor_key.to_string()))
    }

    fn descriptor(
        index:      usize,
        data_key:   &str,
        anchor_key: &str,
        options:    &ReadoutOptions,
    ) -> Result<SharedDescriptor, ReadoutError> {
        let ids_for = |key: &str| -> Result<Vec<i64>, ReadoutError> {
            Ok(options
                .sharing
                .shared_match_ids
                .as_ref()
                .ok_or(ReadoutError::MissingEntry { map: "shared_match_ids", key: key.to_string() })?
                .require("shared_match_ids", key)?
                .clone())
        };
        let match_ids = ids_for(data_key)?;
        match Self::anchor_for(index, anchor_key) {
            None => Ok(SharedDescriptor::owner(match_ids)),
            Some(anchor) => Ok(SharedDescriptor::referencing(match_ids, anchor, ids_for(anchor_key)?)),
        }
    }
}

impl OptionResolver for SharedParameterResolver {
    fn resolve(
        &self,
        index:      usize,
        data_key:   &str,
        anchor_key: &str,
        options:    &ReadoutOptions,
    ) -> Result<ResolvedReadoutOptions, ReadoutError> {
        let sharing = &options.sharing;
        let mut resolved = ResolvedReadoutOptions::from_hyperparameters(options.hyperparameters.clone());

        // ── Receptive-field positions ─────────────────────────────────────────
        if resolved.hyperparameters.grid_mean_predictor.is_some() {
            match sharing.grid_mean_predictor_type.as_deref() {
                Some(CORTEX_PREDICTOR) => {
                    let grid = sharing
                        .source_grids
                        .as_ref()
                        .ok_or(ReadoutError::MissingEntry { map: "source_grids", key: data_key.to_string() })?
                        .require("source_grids", data_key)?;
                    resolved.source_grid = Some(grid.clone());
                }
                other => {
                    return Err(ReadoutError::UnknownGridMeanPredictor(
                        other.unwrap_or("None").to_string(),
                    ))
                }
            }
            if sharing.share_transform {
                resolved.shared_transform = Self::anchor_for(index, anchor_key);
            }
        } else if sharing.share_grid {
            resolved.shared_grid = Some(Self::descriptor(index, data_key, anchor_key, options)?);
        }

        // ── Feature weights ───────────────────────────────────────────────────
        resolved.shared_features = if sharing.share_features {
            Some(Self::descriptor(index, data_key, anchor_key, options)?)
        } else {
            None
        };

        tracing::debug!(
            data_key,
            anchor = anchor_key,
            shared_transform = resolved.shared_transform.is_some(),
            shared_grid = resolved.shared_grid.is_some(),
            shared_features = resolved.shared_features.is_some(),
            "resolved readout options"
        );
        Ok(resolved)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{error::ErrorKind, keyed_map::KeyedMap, options::GridMeanPredictorConfig};

    fn match_ids() -> KeyedMap<Vec<i64>> {
        [("a", vec![1, 2, 3]), ("b", vec![3, 2, 1]), ("c", vec![2, 3, 1])].into_iter().collect()
    }

    fn source_grids() -> KeyedMap<Vec<Vec<f32>>> {
        ["a", "b", "c"]
            .into_iter()
            .map(|k| (k, vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![0.5, 0.5]]))
            .collect()
    }

    fn resolve_all(options: &ReadoutOptions) -> Vec<ResolvedReadoutOptions> {
        ["a", "b", "c"]
            .iter()
            .enumerate()
            .map(|(i, k)| SharedParameterResolver.resolve(i, k, "a", options).unwrap())
            .collect()
    }

    #[test]
    fn test_cortex_share_transform() {
        let mut options = ReadoutOptions::default();
        options.hyperparameters.grid_mean_predictor = Some(GridMeanPredictorConfig::default());
        options.sharing.grid_mean_predictor_type = Some("cortex".into());
        options.sharing.share_transform = true;
        options.sharing.source_grids = Some(source_grids());

        let resolved = resolve_all(&options);
        assert_eq!(resolved[0].shared_transform, None);
        assert_eq!(resolved[1].shared_transform, Some(AnchorRef("a".into())));
        assert_eq!(resolved[2].shared_transform, Some(AnchorRef("a".into())));
        assert!(resolved.iter().all(|r| r.source_grid.is_some()));
        // Grid sharing is skipped when a predictor is configured
        assert!(resolved.iter().all(|r| r.shared_grid.is_none()));
    }

    #[test]
    fn test_share_features_descriptors() {
        let mut options = ReadoutOptions::default();
        options.sharing.share_features = true;
        options.sharing.shared_match_ids = Some(match_ids());

        let resolved = resolve_all(&options);
        let anchor = resolved[0].shared_features.as_ref().unwrap();
        assert!(anchor.owns_table());
        assert_eq!(anchor.match_ids, vec![1, 2, 3]);

        let second = resolved[1].shared_features.as_ref().unwrap();
        assert_eq!(second.anchor, Some(AnchorRef("a".into())));
        assert_eq!(second.match_ids, vec![3, 2, 1]);
        assert_eq!(second.table_ids, vec![1, 2, 3]);
        assert_eq!(second.sharing_index().unwrap().rows, vec![2, 1, 0]);
    }

    #[test]
    fn test_share_grid_without_predictor() {
        let mut options = ReadoutOptions::default();
        options.sharing.share_grid = true;
        options.sharing.shared_match_ids = Some(match_ids());

        let resolved = resolve_all(&options);
        assert!(resolved[0].shared_grid.as_ref().unwrap().owns_table());
        assert_eq!(
            resolved[2].shared_grid.as_ref().unwrap().anchor,
            Some(AnchorRef("a".into()))
        );
        assert!(resolved.iter().all(|r| r.shared_features.is_none()));
    }

    #[test]
    fn test_unknown_predictor_kind() {
        let mut options = ReadoutOptions::default();
        options.hyperparameters.grid_mean_predictor = Some(GridMeanPredictorConfig::default());
        options.sharing.grid_mean_predictor_type = Some("retina".into());

        let err = SharedParameterResolver.resolve(0, "a", "a", &options).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Lookup);
        assert!(err.to_string().contains("retina"));
    }

    #[test]
    fn test_missing_match_ids_for_key() {
        let mut options = ReadoutOptions::default();
        options.sharing.share_features = true;
        options.sharing.shared_match_ids = Some(match_ids());

        let err = SharedParameterResolver.resolve(1, "zzz", "a", &options).unwrap_err();
        assert!(matches!(err, ReadoutError::MissingEntry { map: "shared_match_ids", .. }));
    }

    #[test]
    fn test_pass_through_keeps_hyperparameters_only() {
        let mut options = ReadoutOptions::default();
        options.hyperparameters.pool_steps = 4;
        options.sharing.share_features = true;

        let resolved = PassThrough.resolve(1, "b", "a", &options).unwrap();
        assert_eq!(resolved.hyperparameters.pool_steps, 4);
        assert!(resolved.shared_features.is_none());
    }
}
