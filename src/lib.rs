//! # Artfolio
//!
//! Keep every version of a piece of creative work and turn the history into
//! a timelapse video.
//!
//! Versions are recorded in a [`VersionLedger`](ledger::VersionLedger) and
//! stored under a media root. The [`RenderPipeline`] reads an item's
//! versions in chronological order, drives an external encoder (FFmpeg by
//! default) and hands back the finished video with its public URL.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use artfolio::{
//!     config::Config,
//!     ledger::DirectoryLedger,
//!     render::{FfmpegEncoder, RenderPipeline},
//! };
//!
//! # fn main() -> artfolio::Result<()> {
//! let config = Config::default();
//! let ledger = Arc::new(DirectoryLedger::new(&config.media.root));
//! let encoder = Arc::new(FfmpegEncoder::from_config(&config.encoder));
//!
//! let pipeline = RenderPipeline::from_config(&config, ledger, encoder);
//! let artifact = pipeline.render_interpolated(7, 2, 25)?;
//! println!("{}", artifact.public_url);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`ledger`] - Groups, items and version histories
//! - [`media`] - Media root layout, uploads and output naming
//! - [`render`] - Manifest building, encoder passes and orchestration
//! - [`config`] - Configuration management

pub mod config;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod media;
pub mod render;

// Re-export commonly used types for convenience
pub use crate::{
    config::Config,
    error::{ArtfolioError, ErrorClass, Result},
    render::{RenderArtifact, RenderPipeline, RenderRequest},
};
