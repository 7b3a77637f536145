use std::fmt;
use std::path::PathBuf;

use crate::config::CaptureConfig;

/// Program and arguments for one engine run
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Run a provisioned engine executable directly
    pub fn binary(engine: PathBuf, capture: &CaptureConfig) -> Self {
        Self::new(engine, capture_args(capture))
    }

    /// Run the engine script through a local interpreter
    pub fn interpreter(
        interpreter: impl Into<PathBuf>,
        script: PathBuf,
        capture: &CaptureConfig,
    ) -> Self {
        let mut args = vec![script.to_string_lossy().into_owned()];
        args.extend(capture_args(capture));
        Self::new(interpreter, args)
    }
}

impl fmt::Display for LaunchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// `--duration=<seconds>` and `--threshold=<amplitude>`
pub fn capture_args(capture: &CaptureConfig) -> Vec<String> {
    vec![
        format!("--duration={}", capture.silence_duration),
        format!("--threshold={}", capture.silence_threshold),
    ]
}
