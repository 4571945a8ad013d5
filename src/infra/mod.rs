// ============================================================
// Layer 6 - Infrastructure Layer
// ============================================================
// Handles the concerns that touch the file system:
//
//   checkpoint.rs - Registry persistence
//                   Saves the MultiReadoutConfig as JSON and
//                   the fitted weights with Burn's
//                   CompactRecorder. Loading rebuilds the
//                   registry from the config, then restores
//                   the weights into it.
//
//   metrics.rs    - Fitting metrics
//                   Writes epoch-level loss and correlation to
//                   a CSV file, and computes per-neuron Pearson
//                   correlations.
//
// Reference: Rust Book §7 (Modules)
//            Rust Book §9 (Error Handling with anyhow)
//            Burn Book §5 (Checkpointing)

/// Config JSON and weight checkpoints
pub mod checkpoint;

/// Epoch metrics CSV logger and correlation helpers
pub mod metrics;
