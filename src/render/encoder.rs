use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::EncoderConfig;
use crate::error::{ArtfolioError, RenderError, Result};

/// Bumped whenever the argument lists below change shape
pub const ARGS_TEMPLATE_VERSION: u32 = 1;

/// Raw result of one encoder process
#[derive(Debug, Clone, Default)]
pub struct EncoderOutput {
    /// `None` when the process was killed by a signal or timed out
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl EncoderOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// An external video encoder
///
/// Implementations run the tool to completion and report what it did; they
/// only fail when the tool could not be run at all.
pub trait Encoder: Send + Sync {
    /// Run the encoder with the given arguments, blocking until it exits
    fn invoke(&self, args: &[String]) -> Result<EncoderOutput>;

    /// Whether the encoder can be started
    fn is_available(&self) -> bool;

    /// Name used in logs and error messages
    fn name(&self) -> &str;
}

/// Runs an FFmpeg-compatible executable as a child process
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    program: String,
    timeout: Option<Duration>,
}

impl FfmpegEncoder {
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self { program: program.into(), timeout: None }
    }

    pub fn from_config(config: &EncoderConfig) -> Self {
        let encoder = Self::new(config.program.clone());
        match config.timeout_secs {
            Some(secs) => encoder.with_timeout(Duration::from_secs(secs)),
            None => encoder,
        }
    }

    /// Kill the process if it runs longer than `timeout`.
    ///
    /// On unix the encoder then runs in its own process group and the whole
    /// group is killed, so helpers it spawned do not outlive it.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(pipe) = pipe {
            let mut reader = BufReader::new(pipe);
            if let Err(e) = reader.read_to_end(&mut buffer) {
                buffer.extend_from_slice(format!("<failed to read encoder output: {}>", e).as_bytes());
            }
        }
        buffer
    })
}

impl Encoder for FfmpegEncoder {
    fn invoke(&self, args: &[String]) -> Result<EncoderOutput> {
        let mut command = Command::new(&self.program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        if self.timeout.is_some() {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command
            .spawn()
            .map_err(|e| RenderError::EncoderUnavailable {
                program: self.program.clone(),
                reason: e.to_string(),
            })?;

        debug!(pid = child.id(), "{} process started", self.program);

        // Drain both pipes so the encoder never blocks on a full buffer
        let stdout_task = drain(child.stdout.take());
        let stderr_task = drain(child.stderr.take());

        let started = Instant::now();
        let mut timed_out = false;
        let status = match self.timeout {
            None => child.wait()?,
            Some(limit) => loop {
                if let Some(status) = child.try_wait()? {
                    break status;
                }
                if started.elapsed() >= limit {
                    warn!("{} exceeded {:?}, killing it", self.program, limit);
                    timed_out = true;
                    kill_tree(&mut child);
                    break child.wait()?;
                }
                thread::sleep(Duration::from_millis(50));
            },
        };

        let stdout = stdout_task.join().unwrap_or_default();
        let mut stderr = stderr_task.join().unwrap_or_default();

        let exit_code = if timed_out {
            stderr.extend_from_slice(
                format!("\nencoder timed out after {:.1}s", started.elapsed().as_secs_f64()).as_bytes(),
            );
            None
        } else {
            status.code()
        };

        Ok(EncoderOutput { exit_code, stdout, stderr })
    }

    fn is_available(&self) -> bool {
        Command::new(&self.program)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    fn name(&self) -> &str {
        &self.program
    }
}

/// Kill the child and, on unix, the process group it leads
fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        // the group id equals the child's pid because of process_group(0)
        if let Ok(pgid) = libc::pid_t::try_from(child.id()) {
            unsafe {
                libc::kill(-pgid, libc::SIGKILL);
            }
        }
    }

    // may already have exited between try_wait and kill
    let _ = child.kill();
}

/// Concatenate the manifest inputs into one scaled H.264-style video
pub fn concat_args(config: &EncoderConfig, manifest: &Path, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-f".into(),
        "concat".into(),
        "-safe".into(),
        "0".into(),
        "-i".into(),
        manifest.display().to_string(),
        "-c:v".into(),
        config.codec.clone(),
        "-pix_fmt".into(),
        config.pixel_format.clone(),
        // -2 keeps the aspect ratio with an even height
        "-vf".into(),
        format!("scale={}:-2", config.max_width),
    ];
    args.extend(quality_args(config));
    args.push(output.display().to_string());
    args
}

/// Re-time `input` to `target_fps` with motion-compensated interpolation
pub fn interpolate_args(
    config: &EncoderConfig,
    input: &Path,
    output: &Path,
    target_fps: u32,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-i".into(),
        input.display().to_string(),
        "-vf".into(),
        format!(
            "minterpolate=fps={}:mi_mode={}:mc_mode={}:vsbmc={}",
            target_fps,
            config.mi_mode,
            config.mc_mode,
            u8::from(config.vsbmc)
        ),
        "-c:v".into(),
        config.codec.clone(),
        "-pix_fmt".into(),
        config.pixel_format.clone(),
    ];
    args.extend(quality_args(config));
    args.push(output.display().to_string());
    args
}

fn quality_args(config: &EncoderConfig) -> [String; 4] {
    [
        "-preset".into(),
        config.preset.clone(),
        "-crf".into(),
        config.crf.to_string(),
    ]
}

/// Runs encoder passes and turns process failures into errors
#[derive(Clone)]
pub struct EncodeInvoker {
    encoder: Arc<dyn Encoder>,
    settings: EncoderConfig,
}

impl EncodeInvoker {
    pub fn new(encoder: Arc<dyn Encoder>, settings: EncoderConfig) -> Self {
        Self { encoder, settings }
    }

    pub fn settings(&self) -> &EncoderConfig {
        &self.settings
    }

    /// Encode the manifest into `output`, overwriting whatever is there
    pub fn encode(&self, manifest: &Path, output: &Path) -> Result<PathBuf> {
        info!("Encoding {} with {}", output.display(), self.encoder.name());
        self.run(&concat_args(&self.settings, manifest, output), output)?;
        Ok(output.to_path_buf())
    }

    /// Invoke the encoder; success means exit code 0 and an output file on disk
    pub(crate) fn run(&self, args: &[String], output: &Path) -> Result<()> {
        debug!(template = ARGS_TEMPLATE_VERSION, ?args, "Invoking encoder");
        let started = Instant::now();
        let result = self.encoder.invoke(args)?;

        if !result.success() {
            let err = ArtfolioError::encode(result.exit_code, &result.stderr);
            warn!("Encoder failed after {:.1}s: {}", started.elapsed().as_secs_f64(), err);
            return Err(err);
        }

        if !output.is_file() {
            return Err(RenderError::Encode {
                exit_code: result.exit_code,
                stderr: format!("encoder reported success but {} is missing", output.display()),
            }
            .into());
        }

        debug!("Encoder finished in {:.1}s", started.elapsed().as_secs_f64());
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::fs;
    use std::sync::Mutex;

    use super::*;

    /// Encoder double that writes the requested output file and records calls
    #[derive(Default)]
    pub struct RecordingEncoder {
        calls: Mutex<Vec<Vec<String>>>,
        manifests: Mutex<Vec<String>>,
        fail_on_call: Option<(usize, i32, Vec<u8>)>,
    }

    impl RecordingEncoder {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make the `call`-th invocation (0-based) exit with `exit_code`
        pub fn failing_on(call: usize, exit_code: i32, stderr: &[u8]) -> Self {
            Self {
                fail_on_call: Some((call, exit_code, stderr.to_vec())),
                ..Self::default()
            }
        }

        pub fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }

        /// Manifest contents as seen while the encoder was running
        pub fn manifests(&self) -> Vec<String> {
            self.manifests.lock().unwrap().clone()
        }
    }

    impl Encoder for RecordingEncoder {
        fn invoke(&self, args: &[String]) -> Result<EncoderOutput> {
            let index = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(args.to_vec());
                calls.len() - 1
            };

            if args.windows(2).any(|w| w[0] == "-f" && w[1] == "concat") {
                let manifest = args.windows(2).find(|w| w[0] == "-i").map(|w| w[1].clone()).unwrap();
                if let Ok(text) = fs::read_to_string(manifest) {
                    self.manifests.lock().unwrap().push(text);
                }
            }

            let output = args.last().unwrap();
            if let Some((call, exit_code, stderr)) = &self.fail_on_call {
                if *call == index {
                    // leave a truncated file behind like a crashed encoder
                    fs::write(output, b"partial").unwrap();
                    return Ok(EncoderOutput {
                        exit_code: Some(*exit_code),
                        stdout: Vec::new(),
                        stderr: stderr.clone(),
                    });
                }
            }

            fs::write(output, format!("video #{}", index)).unwrap();
            Ok(EncoderOutput { exit_code: Some(0), ..EncoderOutput::default() })
        }

        fn is_available(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "recording"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingEncoder;
    use super::*;
    use crate::render::manifest::ManifestBuilder;
    use tempfile::tempdir;

    #[test]
    fn test_concat_args_template() {
        let args = concat_args(
            &EncoderConfig::default(),
            Path::new("/tmp/x/files.txt"),
            Path::new("/m/1/2/out.mp4"),
        );
        assert_eq!(
            args.join(" "),
            "-y -f concat -safe 0 -i /tmp/x/files.txt -c:v libx264 -pix_fmt yuv420p \
             -vf scale=1280:-2 -preset medium -crf 20 /m/1/2/out.mp4"
        );
    }

    #[test]
    fn test_interpolate_args_template() {
        let args = interpolate_args(
            &EncoderConfig::default(),
            Path::new("/m/a.mp4"),
            Path::new("/m/a.interp_3x.mp4"),
            75,
        );
        assert!(args.contains(&"minterpolate=fps=75:mi_mode=mci:mc_mode=aobmc:vsbmc=1".to_string()));
        assert_eq!(args.last().unwrap(), "/m/a.interp_3x.mp4");
        assert_eq!(args[..3], ["-y", "-i", "/m/a.mp4"]);
    }

    #[test]
    fn test_invoker_surfaces_stderr() {
        let dir = tempdir().unwrap();
        let encoder = Arc::new(RecordingEncoder::failing_on(0, 1, b"Invalid data found"));
        let invoker = EncodeInvoker::new(encoder.clone(), EncoderConfig::default());
        let manifest = ManifestBuilder::new(2).write(dir.path(), &["/m/a.png"]).unwrap();

        let err = invoker
            .encode(&manifest, &dir.path().join("out.mp4"))
            .unwrap_err();
        assert_eq!(encoder.manifests().len(), 1);
        match err {
            ArtfolioError::Render(RenderError::Encode { exit_code, stderr }) => {
                assert_eq!(exit_code, Some(1));
                assert_eq!(stderr, "Invalid data found");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_program_is_unavailable() {
        let encoder = FfmpegEncoder::new("definitely-not-an-encoder-binary");
        assert!(!encoder.is_available());
        assert!(matches!(
            encoder.invoke(&[]),
            Err(ArtfolioError::Render(RenderError::EncoderUnavailable { .. }))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_ffmpeg_encoder_reports_exit_code_and_stderr() {
        let encoder = FfmpegEncoder::new("sh");
        let output = encoder
            .invoke(&["-c".to_string(), "echo broken pipe >&2; exit 3".to_string()])
            .unwrap();

        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
        assert_eq!(String::from_utf8_lossy(&output.stderr).trim(), "broken pipe");
    }

    #[cfg(unix)]
    #[test]
    fn test_ffmpeg_encoder_timeout_kills_process() {
        let encoder = FfmpegEncoder::new("sh").with_timeout(Duration::from_millis(200));
        let started = Instant::now();
        let output = encoder
            .invoke(&["-c".to_string(), "exec sleep 10".to_string()])
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(output.exit_code, None);
        assert!(String::from_utf8_lossy(&output.stderr).contains("timed out"));
    }

    #[test]
    fn test_recording_encoder_tolerates_missing_manifest() {
        let dir = tempdir().unwrap();
        let encoder = Arc::new(RecordingEncoder::failing_on(0, 1, b"No such file"));
        let invoker = EncodeInvoker::new(encoder.clone(), EncoderConfig::default());

        let err = invoker
            .encode(&dir.path().join("never-written.txt"), &dir.path().join("out.mp4"))
            .unwrap_err();

        assert_eq!(err.encoder_stderr(), Some("No such file"));
        assert!(encoder.manifests().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_spawned_helpers() {
        // the background sleep inherits stderr; only a group kill closes the pipe
        let encoder = FfmpegEncoder::new("sh").with_timeout(Duration::from_millis(200));
        let started = Instant::now();
        let output = encoder
            .invoke(&["-c".to_string(), "sleep 10 & wait".to_string()])
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(output.exit_code, None);
    }
}
