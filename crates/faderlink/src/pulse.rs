//! PulseAudio / PipeWire sink control through `pactl`

use anyhow::{anyhow, Context, Result};
use faderlink_midi::{AudioSink, SinkError};
use std::process::{Command, Stdio};

/// Sets sink volumes by running `pactl set-sink-volume`
pub struct PactlSink {
    program: String,
}

impl PactlSink {
    pub fn new() -> Self {
        Self {
            program: "pactl".to_string(),
        }
    }

    /// Check that the audio server answers
    pub fn probe(&self) -> Result<String> {
        let output = Command::new(&self.program)
            .arg("info")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .with_context(|| format!("Failed to execute {}", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "Audio server unreachable (exit code {:?}): {}",
                output.status.code(),
                stderr.trim()
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let server = stdout
            .lines()
            .find_map(|line| line.strip_prefix("Server Name:"))
            .map(|name| name.trim().to_string())
            .unwrap_or_else(|| "unknown server".to_string());
        Ok(server)
    }
}

impl Default for PactlSink {
    fn default() -> Self {
        Self::new()
    }
}

/// Volume argument for a linear gain (1.0 = 100%)
pub fn volume_percent(gain: f32) -> String {
    let percent = if gain.is_finite() { (gain.max(0.0) * 100.0).round() } else { 0.0 };
    format!("{}%", percent as u32)
}

impl AudioSink for PactlSink {
    fn set_sink_volume(&mut self, sink: &str, gain: f32) -> Result<(), SinkError> {
        let output = Command::new(&self.program)
            .args(["set-sink-volume", sink, &volume_percent(gain)])
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| SinkError::Unreachable(e.to_string()))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(SinkError::SetVolume {
                sink: sink.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}
