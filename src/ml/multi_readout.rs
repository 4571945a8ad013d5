// ============================================================
// Layer 5 - MultiReadout Registry
// ============================================================
// One readout per dataset key, built from a MultiReadoutConfig:
//
//   n_neurons keys, in order
//        │
//        ├─ key 0 (anchor) ─▶ BaseReadout of the resolved kind
//        │
//        └─ key i > 0
//             cloning off ─▶ BaseReadout (may reference the
//                             anchor's grid / features / MLP)
//             cloning on  ─▶ ClonedReadout of the anchor
//
// Calls are dispatched by key. Leaving the key out is only
// allowed when a single readout is registered.
//
// The slots sit in a Vec so the whole registry is one Burn
// Module: optimisers and records see every parameter once,
// including those that several keys read.

use burn::{module::Ignored, prelude::*};

use crate::domain::{
    config::{MultiReadoutConfig, ReadoutType},
    error::ReadoutError,
    keyed_map::KeyedMap,
    options::Reduction,
};
use crate::ml::readouts::{
    cloned::ClonedReadout, BaseReadout, Readout, ReadoutInit, SharedParameters,
};

// ─── ReadoutSlot ──────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub enum ReadoutSlot<B: Backend> {
    Owned(BaseReadout<B>),
    Cloned(ClonedReadout<B>),
}

impl<B: Backend> ReadoutSlot<B> {
    pub fn outdims(&self) -> usize {
        match self {
            ReadoutSlot::Owned(r)  => r.outdims(),
            ReadoutSlot::Cloned(c) => c.outdims(),
        }
    }

    pub fn is_clone(&self) -> bool {
        matches!(self, ReadoutSlot::Cloned(_))
    }

    pub fn as_owned(&self) -> Option<&BaseReadout<B>> {
        match self {
            ReadoutSlot::Owned(r)  => Some(r),
            ReadoutSlot::Cloned(_) => None,
        }
    }

    fn initialize(&mut self, mean_activity: Option<&[f32]>) -> Result<(), ReadoutError> {
        match self {
            ReadoutSlot::Owned(r)  => r.initialize(mean_activity),
            ReadoutSlot::Cloned(c) => c.initialize(mean_activity),
        }
    }
}

/// Tables the anchor exposes; empty while nothing is registered yet.
fn anchor_parameters<B: Backend>(slots: &[ReadoutSlot<B>]) -> SharedParameters<'_, B> {
    match slots.first() {
        Some(ReadoutSlot::Owned(anchor)) => anchor.shared_parameters(),
        _ => SharedParameters::none(),
    }
}

fn mean_activity_for<'a>(
    mean_activity: Option<&'a KeyedMap<Vec<f32>>>,
    key:           &str,
) -> Result<Option<&'a [f32]>, ReadoutError> {
    match mean_activity {
        Some(map) => Ok(Some(map.require("mean_activity", key)?.as_slice())),
        None => Ok(None),
    }
}

// ─── MultiReadout ─────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct MultiReadout<B: Backend> {
    slots:        Vec<ReadoutSlot<B>>,
    keys:         Ignored<Vec<String>>,
    base_readout: Ignored<ReadoutType>,
}

impl<B: Backend> MultiReadout<B> {
    pub fn new(config: &MultiReadoutConfig, device: &B::Device) -> Result<Self, ReadoutError> {
        let kind = config.variant.resolve_base_readout(config.base_readout)?;
        let resolver = config.variant.option_resolver();
        let anchor_key = config
            .n_neurons
            .keys()
            .next()
            .ok_or_else(|| ReadoutError::invalid("at least one data key is required"))?
            .to_string();

        let mut slots: Vec<ReadoutSlot<B>> = Vec::with_capacity(config.n_neurons.len());
        let mut keys = Vec::with_capacity(config.n_neurons.len());

        for (index, (key, &outdims)) in config.n_neurons.iter().enumerate() {
            let mean_activity = mean_activity_for(config.mean_activity.as_ref(), key)?;
            let options = resolver.resolve(index, key, &anchor_key, &config.options)?;

            let slot = if index == 0 || !config.clone_readout {
                let init = ReadoutInit {
                    in_shape: *config.in_shapes.require("in_shapes", key)?,
                    outdims,
                    mean_activity,
                    reg_weight: config.gamma_readout,
                    options,
                };
                let readout = BaseReadout::build(kind, init, device)?;
                if index > 0 {
                    readout.check_anchor(&anchor_parameters(&slots))?;
                }
                ReadoutSlot::Owned(readout)
            } else {
                let anchor_outdims = slots.first().map(ReadoutSlot::outdims).unwrap_or_default();
                if outdims != anchor_outdims {
                    return Err(ReadoutError::invalid(format!(
                        "'{key}' has {outdims} neurons but clones '{anchor_key}' with {anchor_outdims}"
                    )));
                }
                ReadoutSlot::Cloned(ClonedReadout::new(&anchor_key, outdims, config.gamma_readout, device))
            };

            tracing::debug!(key, outdims, clone = slot.is_clone(), "registered readout");
            slots.push(slot);
            keys.push(key.to_string());
        }

        let mut registry = Self {
            slots,
            keys: Ignored(keys),
            base_readout: Ignored(kind),
        };
        registry.initialize(config.mean_activity.as_ref())?;

        tracing::info!(
            readouts = registry.len(),
            base_readout = %kind,
            clone_readout = config.clone_readout,
            "built multi-readout"
        );
        Ok(registry)
    }

    // ── Key resolution ────────────────────────────────────────────────────────
    fn resolve_index(&self, data_key: Option<&str>) -> Result<usize, ReadoutError> {
        match data_key {
            None if self.slots.len() == 1 => Ok(0),
            None => Err(ReadoutError::UnresolvedDataKey { registered: self.slots.len() }),
            Some(key) => self
                .keys
                .0
                .iter()
                .position(|k| k == key)
                .ok_or_else(|| ReadoutError::UnknownDataKey(key.to_string())),
        }
    }

    fn owned_at(&self, index: usize) -> Result<&BaseReadout<B>, ReadoutError> {
        self.slots
            .get(index)
            .and_then(ReadoutSlot::as_owned)
            .ok_or_else(|| ReadoutError::invalid(format!("slot {index} holds no readout of its own")))
    }

    fn source_of(&self, clone: &ClonedReadout<B>) -> Result<&BaseReadout<B>, ReadoutError> {
        let index = self.resolve_index(Some(clone.source_key()))?;
        self.owned_at(index)
    }

    // ── Dispatch ──────────────────────────────────────────────────────────────
    /// Core output [batch, C, H, W] → responses [batch, N] of `data_key`.
    pub fn forward(&self, x: Tensor<B, 4>, data_key: Option<&str>) -> Result<Tensor<B, 2>, ReadoutError> {
        let index = self.resolve_index(data_key)?;
        let anchor = anchor_parameters(&self.slots);
        match &self.slots[index] {
            ReadoutSlot::Owned(readout) => readout.forward(x, &anchor),
            ReadoutSlot::Cloned(clone) => {
                let source_output = self.source_of(clone)?.forward(x, &anchor)?;
                Ok(clone.forward(source_output))
            }
        }
    }

    /// Penalty of `data_key`'s readout. `average`, when given, overrides
    /// `reduction`.
    pub fn regularizer(
        &self,
        data_key:  Option<&str>,
        reduction: Reduction,
        average:   Option<bool>,
    ) -> Result<Tensor<B, 1>, ReadoutError> {
        let index = self.resolve_index(data_key)?;
        let anchor = anchor_parameters(&self.slots);
        match &self.slots[index] {
            ReadoutSlot::Owned(readout) => readout.regularizer(reduction, average, &anchor),
            ReadoutSlot::Cloned(clone) => {
                let features = self.source_of(clone)?.feature_weights(&anchor)?;
                Ok(clone.regularizer(features, reduction, average))
            }
        }
    }

    /// Effective feature vectors [N, C] of `data_key`.
    pub fn feature_weights(&self, data_key: Option<&str>) -> Result<Tensor<B, 2>, ReadoutError> {
        let index = self.resolve_index(data_key)?;
        let anchor = anchor_parameters(&self.slots);
        match &self.slots[index] {
            ReadoutSlot::Owned(readout) => readout.feature_weights(&anchor),
            ReadoutSlot::Cloned(clone) => {
                let features = self.source_of(clone)?.feature_weights(&anchor)?;
                Ok(clone.feature_weights(features))
            }
        }
    }

    /// Re-draw every readout, each with its own key's mean activity.
    /// Every entry is looked up and checked before any readout changes.
    pub fn initialize(&mut self, mean_activity: Option<&KeyedMap<Vec<f32>>>) -> Result<(), ReadoutError> {
        let entries = self
            .keys
            .0
            .iter()
            .zip(self.slots.iter())
            .map(|(key, slot)| {
                let entry = mean_activity_for(mean_activity, key)?;
                match entry {
                    Some(mean) if mean.len() != slot.outdims() => Err(ReadoutError::invalid(format!(
                        "mean activity for '{key}' has {} entries, readout has {} neurons",
                        mean.len(),
                        slot.outdims()
                    ))),
                    _ => Ok(entry),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        for (slot, entry) in self.slots.iter_mut().zip(entries) {
            slot.initialize(entry)?;
        }
        Ok(())
    }

    // ── Introspection ─────────────────────────────────────────────────────────
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.keys.0.iter().any(|k| k == key)
    }

    pub fn anchor_key(&self) -> Option<&str> {
        self.keys.0.first().map(String::as_str)
    }

    pub fn base_readout(&self) -> ReadoutType {
        self.base_readout.0
    }

    pub fn slot(&self, key: &str) -> Option<&ReadoutSlot<B>> {
        let index = self.keys.0.iter().position(|k| k == key)?;
        self.slots.get(index)
    }

    pub fn is_clone(&self, key: &str) -> bool {
        self.slot(key).map(ReadoutSlot::is_clone).unwrap_or(false)
    }

    pub fn outdims(&self, key: &str) -> Option<usize> {
        self.slot(key).map(ReadoutSlot::outdims)
    }
}
