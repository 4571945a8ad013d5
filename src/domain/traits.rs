// ============================================================
// Layer 3 - Core Traits (Abstractions)
// ============================================================
// The registry builds readouts from per-key options, but how
// those options are derived is a policy that varies by variant:
//
//   - PassThrough             → every key gets the same options
//   - SharedParameterResolver → later keys get references to
//                               the anchor key's grid, features
//                               or grid-mean transform
//
// The registry only sees OptionResolver, so a new sharing policy
// is a new impl, not a change to the factory loop.
//
// Reference: Rust Book §10 (Traits: Defining Shared Behaviour)
//            Rust Book §17 (Trait Objects)

use crate::domain::{
    error::ReadoutError,
    options::{ReadoutOptions, ResolvedReadoutOptions},
};

// ─── OptionResolver ───────────────────────────────────────────────────────────
/// Turns the registry-wide options into the options for one data key.
///
/// `index` is the position of `data_key` in registration order and
/// `anchor_key` the first registered key.
pub trait OptionResolver {
    fn resolve(
        &self,
        index:      usize,
        data_key:   &str,
        anchor_key: &str,
        options:    &ReadoutOptions,
    ) -> Result<ResolvedReadoutOptions, ReadoutError>;
}
