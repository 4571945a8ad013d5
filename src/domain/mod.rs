// ============================================================
// Layer 3 - Domain Layer
// ============================================================
// Plain Rust types describing WHAT a multi-readout is:
// which datasets exist, how big they are, which readout kind
// to build, and how sharing between datasets is requested.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only plain Rust structs, enums, and traits
//
// Option resolution lives here too. It is pure bookkeeping
// over keys and match ids, so it is tested without a backend.
//
// Reference: Rust Book §5 (Structs), §10 (Traits)

/// Registry configuration, readout types and variants
pub mod config;

/// Error type shared by every layer that builds or calls readouts
pub mod error;

/// Insertion-ordered data key → value mapping
pub mod keyed_map;

/// Hyperparameters, sharing directives and resolved options
pub mod options;

/// PassThrough and SharedParameterResolver
pub mod sharing;

/// OptionResolver trait
pub mod traits;
