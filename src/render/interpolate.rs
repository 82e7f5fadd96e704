use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::Result;
use crate::render::encoder::{interpolate_args, EncodeInvoker};

/// Where the interpolation pass left its result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpolationOutcome {
    pub path: PathBuf,
    pub filename: String,
    /// False when the pass was skipped and `path` is the source video
    pub interpolated: bool,
}

/// Optional second encoder pass that raises the frame rate
pub struct InterpolationStage<'a> {
    invoker: &'a EncodeInvoker,
}

impl<'a> InterpolationStage<'a> {
    pub fn new(invoker: &'a EncodeInvoker) -> Self {
        Self { invoker }
    }

    /// Interpolate `source` to `base_fps * factor`.
    ///
    /// A factor of 1 or less returns the source untouched. The source video
    /// is always left on disk.
    pub fn run(&self, source: &Path, base_fps: u32, factor: u32) -> Result<InterpolationOutcome> {
        if factor <= 1 {
            return Ok(InterpolationOutcome {
                path: source.to_path_buf(),
                filename: file_name(source),
                interpolated: false,
            });
        }

        let target = interpolated_path(source, factor);
        let target_fps = base_fps.saturating_mul(factor);
        info!("Interpolating to {} fps ({}x)", target_fps, factor);

        let args = interpolate_args(self.invoker.settings(), source, &target, target_fps);
        self.invoker.run(&args, &target)?;

        Ok(InterpolationOutcome {
            filename: file_name(&target),
            path: target,
            interpolated: true,
        })
    }
}

/// `clip.mp4` becomes `clip.interp_<factor>x.mp4`
pub fn interpolated_path(source: &Path, factor: u32) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match source.extension() {
        Some(ext) => format!("{}.interp_{}x.{}", stem, factor, ext.to_string_lossy()),
        None => format!("{}.interp_{}x", stem, factor),
    };
    source.with_file_name(name)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EncoderConfig;
    use crate::error::{ArtfolioError, RenderError};
    use crate::render::encoder::testing::RecordingEncoder;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn test_interpolated_path_embeds_factor() {
        let source = Path::new("/m/1/2/timelapse_20250101T000000.000000Z.mp4");
        assert_eq!(
            interpolated_path(source, 3),
            PathBuf::from("/m/1/2/timelapse_20250101T000000.000000Z.interp_3x.mp4")
        );
        assert_ne!(interpolated_path(source, 2), interpolated_path(source, 4));
    }

    #[test]
    fn test_factor_one_is_noop() {
        let encoder = Arc::new(RecordingEncoder::new());
        let invoker = EncodeInvoker::new(encoder.clone(), EncoderConfig::default());

        let outcome = InterpolationStage::new(&invoker)
            .run(Path::new("/m/a.mp4"), 25, 1)
            .unwrap();

        assert_eq!(outcome.path, PathBuf::from("/m/a.mp4"));
        assert_eq!(outcome.filename, "a.mp4");
        assert!(!outcome.interpolated);
        assert!(encoder.calls().is_empty());
    }

    #[test]
    fn test_interpolation_targets_multiplied_rate() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("a.mp4");
        std::fs::write(&source, b"video").unwrap();

        let encoder = Arc::new(RecordingEncoder::new());
        let invoker = EncodeInvoker::new(encoder.clone(), EncoderConfig::default());
        let outcome = InterpolationStage::new(&invoker).run(&source, 25, 3).unwrap();

        assert_eq!(outcome.filename, "a.interp_3x.mp4");
        assert!(outcome.path.exists());
        assert!(source.exists());

        let calls = encoder.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].iter().any(|a| a.starts_with("minterpolate=fps=75:")));
    }

    #[test]
    fn test_interpolation_failure_is_an_error() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("a.mp4");
        std::fs::write(&source, b"video").unwrap();

        let encoder = Arc::new(RecordingEncoder::failing_on(0, 1, b"minterpolate: out of memory"));
        let invoker = EncodeInvoker::new(encoder, EncoderConfig::default());
        let result = InterpolationStage::new(&invoker).run(&source, 25, 2);

        assert!(matches!(
            result,
            Err(ArtfolioError::Render(RenderError::Encode { exit_code: Some(1), .. }))
        ));
    }
}
