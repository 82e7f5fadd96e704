use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{RenderError, Result};

/// File name of the manifest inside the scratch directory
pub const MANIFEST_FILE_NAME: &str = "files.txt";

/// Builds concat-demuxer manifests
///
/// Every input is listed once with its display duration, then the last input
/// is listed again without one so the final frame is held for its full
/// duration instead of collapsing to zero. Inputs are never reordered.
#[derive(Debug, Clone, Copy)]
pub struct ManifestBuilder {
    frame_duration: u32,
}

impl ManifestBuilder {
    /// `frame_duration` is seconds per input and must be positive
    pub fn new(frame_duration: u32) -> Self {
        debug_assert!(frame_duration > 0);
        Self { frame_duration }
    }

    /// Manifest text for the given inputs
    ///
    /// Paths with line breaks cannot be expressed in the one-directive-per-line
    /// format and are rejected; see [`is_listable`].
    pub fn render<P: AsRef<Path>>(&self, inputs: &[P]) -> Result<String> {
        let last = inputs.last().ok_or(RenderError::EmptyInput)?;
        if let Some(bad) = inputs.iter().find(|p| !is_listable((*p).as_ref())) {
            return Err(RenderError::UnlistablePath {
                path: bad.as_ref().to_string_lossy().escape_debug().to_string(),
            }
            .into());
        }

        let mut text = String::new();
        for input in inputs {
            // writing into a String cannot fail
            let _ = writeln!(text, "file {}", quote(input.as_ref()));
            let _ = writeln!(text, "duration {}", self.frame_duration);
        }
        let _ = writeln!(text, "file {}", quote(last.as_ref()));

        Ok(text)
    }

    /// Write the manifest into `dir` and return its path
    pub fn write<P: AsRef<Path>>(&self, dir: &Path, inputs: &[P]) -> Result<PathBuf> {
        let text = self.render(inputs)?;
        let path = dir.join(MANIFEST_FILE_NAME);
        fs::write(&path, text)?;

        debug!("Wrote manifest with {} inputs to {}", inputs.len(), path.display());
        Ok(path)
    }
}

/// Whether a path can appear in a manifest
pub fn is_listable(path: &Path) -> bool {
    !path.to_string_lossy().contains(['\n', '\r'])
}

/// Single-quote a path for the concat demuxer.
///
/// A quote inside the path closes the string, emits an escaped quote and
/// reopens it.
fn quote(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_three_inputs_make_four_file_directives() {
        let inputs = ["/m/1/1/a.png", "/m/1/1/b.png", "/m/1/1/c.png"];
        let text = ManifestBuilder::new(2).render(&inputs).unwrap();

        assert_eq!(
            text,
            "file '/m/1/1/a.png'\nduration 2\n\
             file '/m/1/1/b.png'\nduration 2\n\
             file '/m/1/1/c.png'\nduration 2\n\
             file '/m/1/1/c.png'\n"
        );
        let files = text.lines().filter(|l| l.starts_with("file ")).count();
        assert_eq!(files, 4);
    }

    #[test]
    fn test_last_repeat_has_no_duration() {
        let text = ManifestBuilder::new(5).render(&["/x.png"]).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines, vec!["file '/x.png'", "duration 5", "file '/x.png'"]);
    }

    #[test]
    fn test_order_is_preserved() {
        let inputs = ["/z.png", "/a.png", "/m.png"];
        let text = ManifestBuilder::new(1).render(&inputs).unwrap();
        let files: Vec<_> = text
            .lines()
            .filter_map(|l| l.strip_prefix("file "))
            .collect();
        assert_eq!(files, vec!["'/z.png'", "'/a.png'", "'/m.png'", "'/m.png'"]);
    }

    #[test]
    fn test_special_characters_are_quoted() {
        let text = ManifestBuilder::new(2)
            .render(&["/art/my sketch's final.png"])
            .unwrap();
        assert!(text.starts_with("file '/art/my sketch'\\''s final.png'\n"));
    }

    #[test]
    fn test_line_breaks_cannot_inject_directives() {
        let inputs = ["/m/1/1/ok.png", "/m/1/1/x\nduration 9999\nfile 'evil.png"];
        let result = ManifestBuilder::new(2).render(&inputs);

        assert!(matches!(
            result,
            Err(crate::error::ArtfolioError::Render(RenderError::UnlistablePath { .. }))
        ));
        assert!(!is_listable(Path::new("/m/a\rb.png")));
        assert!(is_listable(Path::new("/m/it's fine.png")));
    }

    #[test]
    fn test_empty_input() {
        let inputs: [&str; 0] = [];
        let result = ManifestBuilder::new(2).render(&inputs);
        assert!(matches!(
            result,
            Err(crate::error::ArtfolioError::Render(RenderError::EmptyInput))
        ));
    }

    #[test]
    fn test_separate_runs_write_identical_manifests() {
        let inputs = ["/m/a.png", "/m/b.png"];
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();

        let builder = ManifestBuilder::new(2);
        let a = builder.write(first.path(), &inputs).unwrap();
        let b = builder.write(second.path(), &inputs).unwrap();

        assert_ne!(a, b);
        assert_eq!(fs::read_to_string(a).unwrap(), fs::read_to_string(b).unwrap());
    }
}
