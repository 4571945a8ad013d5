// ============================================================
// Layer 4 - Data Pipeline
// ============================================================
// Turns recording sessions into tensor batches for fitting.
//
// The pipeline flows in this order:
//
//   SessionSpec         → shape of a session (key, C×H×W, neurons)
//       │
//       ▼
//   synthetic           → seeded core outputs and responses
//       │
//       ▼
//   SessionDataset      → implements Burn's Dataset trait
//       │
//       ▼
//   split_train_val     → seeded per-session split
//       │
//       ▼
//   ResponseBatcher     → stacks samples into [B,C,H,W] / [B,N]
//
// Each module is responsible for exactly one step.
//
// Reference: Burn Book §4 (Datasets)

/// Seeded synthetic sessions with known ground truth
pub mod synthetic;

/// Per-session Dataset of response samples
pub mod dataset;

/// Stacks samples into tensor batches
pub mod batcher;

/// Seeded train/validation split
pub mod splitter;
