use std::process::{Command, Stdio};

use crate::announce::Announcer;
use crate::error::SpeechError;

/// Default speaking rate in words per minute.
pub const DEFAULT_RATE_WPM: u32 = 150;

const ENGINES: [&str; 2] = ["espeak-ng", "espeak"];
const MAX_TEXT_CHARS: usize = 1_000;

/// Speaks through the `espeak-ng` (or legacy `espeak`) command-line engine.
///
/// Each utterance runs the engine to completion, so `speak` blocks for the
/// whole utterance.
pub struct EspeakAnnouncer {
    program: &'static str,
    rate_wpm: u32,
}

impl EspeakAnnouncer {
    /// Locate an installed engine. Fails if neither binary can be run.
    pub fn new(rate_wpm: u32) -> Result<Self, SpeechError> {
        let program = ENGINES
            .iter()
            .copied()
            .find(|program| is_installed(program))
            .ok_or_else(|| {
                SpeechError::Unavailable(format!("none of {} found on PATH", ENGINES.join(", ")))
            })?;
        log::info!("EspeakAnnouncer: using {} at {} wpm", program, rate_wpm);
        Ok(Self { program, rate_wpm })
    }

    pub fn rate_wpm(&self) -> u32 {
        self.rate_wpm
    }

    fn command(&self, text: &str) -> Command {
        let mut cmd = Command::new(self.program);
        cmd.arg("-s")
            .arg(self.rate_wpm.to_string())
            .arg("--")
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd
    }
}

impl Announcer for EspeakAnnouncer {
    fn name(&self) -> &'static str {
        "espeak"
    }

    fn speak(&mut self, text: &str) -> Result<(), SpeechError> {
        let text = sanitize(text);
        if text.is_empty() {
            return Err(SpeechError::Failed("nothing to say".to_string()));
        }
        let output = self
            .command(&text)
            .output()
            .map_err(|e| {
                SpeechError::Unavailable(format!("failed to run {}: {}", self.program, e))
            })?;
        if !output.status.success() {
            return Err(SpeechError::Failed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

fn is_installed(program: &str) -> bool {
    Command::new(program)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Strip control characters and bound the length.
fn sanitize(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control())
        .take(MAX_TEXT_CHARS)
        .collect::<String>()
        .trim()
        .to_string()
}
