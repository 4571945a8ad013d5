// ============================================================
// Layer 5 - ML / Model Layer (Burn)
// ============================================================
// This layer contains the Burn modules and the fitting loop.
// The domain layer above it stays free of tensor types.
//
// What's in this layer:
//
//   readouts/        - The readout kinds and their pieces
//                      • PointPooled2d (point + pooling pyramid)
//                      • SpatialXFeatureLinear / FullSxf
//                        (spatial mask × feature vector)
//                      • FullGaussian2d (Gaussian window, with
//                        shared grid / features / grid-mean MLP)
//                      • ClonedReadout (affine copy of another)
//
//   multi_readout.rs - The per-dataset registry
//                      Builds one readout per key, wires up
//                      sharing and clones, dispatches by key
//
//   trainer.rs       - The fitting loop
//                      Adam on MSE + regularizer, validation
//                      on the inner backend, epoch metrics
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)

/// Readout kinds, shared components and the Readout trait
pub mod readouts;

/// Key-dispatched registry of readouts
pub mod multi_readout;

/// Fitting loop with validation and metrics
pub mod trainer;
