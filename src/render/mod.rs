//! # Render Pipeline
//!
//! Turns an item's version history into a timelapse: a concat manifest is
//! built in a scratch directory, the external encoder stitches the inputs
//! together, and an optional second pass interpolates to a higher frame rate.

pub mod encoder;
pub mod interpolate;
pub mod manifest;
pub mod pipeline;

// Re-exports for convenience
pub use encoder::{EncodeInvoker, Encoder, EncoderOutput, FfmpegEncoder};
pub use interpolate::{InterpolationOutcome, InterpolationStage};
pub use manifest::ManifestBuilder;
pub use pipeline::{RenderArtifact, RenderJob, RenderPhase, RenderPipeline, RenderRequest};
