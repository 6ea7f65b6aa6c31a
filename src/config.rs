//! Configuration types for the assistant pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{AssistantError, Result};

/// Top-level configuration for the assistant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// Microphone capture, wake gate and command recording settings.
    pub audio: AudioConfig,
    /// Speech-to-text settings.
    pub stt: SttConfig,
    /// Language model settings.
    pub llm: LlmConfig,
    /// Speech synthesis settings.
    pub tts: TtsConfig,
    /// Audio playback settings.
    pub playback: PlaybackConfig,
    /// Visual state collaborator settings.
    pub visual: VisualConfig,
}

/// Audio capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Capture program argv producing raw s16le mono PCM on stdout.
    pub capture_program: Vec<String>,
    /// Capture sample rate in Hz.
    pub sample_rate: u32,
    /// Frame duration in ms for the wake gate and recorder.
    pub frame_ms: u32,
    /// RMS threshold (on samples in \[-1, 1\]) above which a frame counts
    /// as voiced.
    pub voice_threshold: f32,
    /// Consecutive voiced frames required to fire the wake gate.
    pub wake_frames: u32,
    /// Frames of pre-roll kept before the first voiced frame of a command.
    pub preroll_frames: u32,
    /// Consecutive silent frames that end a command recording.
    pub silence_stop_frames: u32,
    /// Hard cap on command recording length in seconds.
    pub max_command_secs: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_program: vec![
                "arecord".into(),
                "-q".into(),
                "-f".into(),
                "S16_LE".into(),
                "-r".into(),
                "16000".into(),
                "-c".into(),
                "1".into(),
                "-t".into(),
                "raw".into(),
            ],
            sample_rate: 16_000,
            frame_ms: 30,
            voice_threshold: 0.03,
            wake_frames: 10,
            preroll_frames: 10,
            silence_stop_frames: 15,
            max_command_secs: 15,
        }
    }
}

/// Speech-to-text configuration (whisper-compatible HTTP server).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// Transcription endpoint URL.
    pub url: String,
    /// Optional bearer token.
    pub api_key: Option<String>,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080/inference".into(),
            api_key: None,
        }
    }
}

/// Language model configuration (Ollama-compatible server).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of the Ollama server.
    pub base_url: String,
    /// Model name.
    pub model: String,
    /// Override for the built-in system prompt.
    pub system_prompt: Option<String>,
    /// Warm the model up at startup via `/api/show`.
    pub preload: bool,
    /// Per-read timeout in seconds; a response may stream for longer as
    /// long as chunks keep arriving.
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".into(),
            model: "llama3:8b-instruct-q4_k_m".into(),
            system_prompt: None,
            preload: true,
            timeout_secs: 120,
        }
    }
}

/// Speech synthesis configuration (piper CLI).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Synthesizer executable.
    pub program: String,
    /// Path to the piper voice model. Required.
    pub voice_path: PathBuf,
    /// Output sample rate of the voice model in Hz.
    pub sample_rate: u32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            program: "piper".into(),
            voice_path: PathBuf::new(),
            sample_rate: 22_050,
        }
    }
}

/// Audio playback configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Player argv consuming raw s16le mono PCM on stdin. `{rate}` is
    /// replaced with the synthesizer sample rate.
    pub program: Vec<String>,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            program: vec![
                "aplay".into(),
                "-q".into(),
                "-f".into(),
                "S16_LE".into(),
                "-r".into(),
                "{rate}".into(),
                "-c".into(),
                "1".into(),
                "-t".into(),
                "raw".into(),
            ],
        }
    }
}

/// Which visual collaborator backend to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisualBackend {
    /// Invoke an external program per state change.
    Process,
    /// POST state changes to an HTTP status display.
    Http,
    /// No visual output.
    Off,
}

/// Visual state collaborator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualConfig {
    pub backend: VisualBackend,
    /// Executable for the `process` backend.
    pub program: PathBuf,
    /// Arguments for the `process` backend; `{status}` is replaced with the
    /// state name.
    pub args: Vec<String>,
    /// Base URL for the `http` backend.
    pub url: String,
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            backend: VisualBackend::Off,
            program: PathBuf::new(),
            args: vec![
                "-control".into(),
                "setProperty".into(),
                "-property".into(),
                "assistant_state".into(),
                "-value".into(),
                "{status}".into(),
            ],
            url: "http://127.0.0.1:8000".into(),
        }
    }
}

impl AssistantConfig {
    /// Load configuration from a TOML file, falling back to defaults for
    /// missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| AssistantError::Config(e.to_string()))
    }

    /// Load configuration from `path` when given, otherwise from the default
    /// location (missing default file means defaults), then apply
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly given file cannot be loaded.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Self::default_config_path();
                if default.exists() {
                    Self::from_file(&default)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Returns the default config file path, e.g.
    /// `~/.config/vesper/config.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp/vesper-config"))
            .join("vesper")
            .join("config.toml")
    }

    /// Apply environment-variable overrides on top of the file config.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("OLLAMA_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Ok(model) = std::env::var("OLLAMA_MODEL") {
            self.llm.model = model;
        }
        if let Ok(url) = std::env::var("VESPER_STT_URL") {
            self.stt.url = url;
        }
        if let Ok(voice) = std::env::var("VESPER_VOICE_PATH") {
            self.tts.voice_path = PathBuf::from(voice);
        }
        if let Ok(program) = std::env::var("VESPER_VISUAL_PROGRAM") {
            self.visual.program = PathBuf::from(program);
            self.visual.backend = VisualBackend::Process;
        }
        if let Ok(url) = std::env::var("VESPER_VISUAL_URL") {
            self.visual.url = url;
            self.visual.backend = VisualBackend::Http;
        }
    }

    /// Startup-fatal validation: required paths must exist and the external
    /// programs the pipeline depends on must resolve.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error naming the first failing requirement.
    pub fn validate(&self) -> Result<()> {
        if self.tts.voice_path.as_os_str().is_empty() {
            return Err(AssistantError::Config(
                "tts.voice_path is required (or set VESPER_VOICE_PATH)".into(),
            ));
        }
        if !self.tts.voice_path.exists() {
            return Err(AssistantError::Config(format!(
                "tts.voice_path not found: {}",
                self.tts.voice_path.display()
            )));
        }
        require_program(&self.tts.program, "tts.program")?;
        let capture = self
            .audio
            .capture_program
            .first()
            .ok_or_else(|| AssistantError::Config("audio.capture_program is empty".into()))?;
        require_program(capture, "audio.capture_program")?;
        let player = self
            .playback
            .program
            .first()
            .ok_or_else(|| AssistantError::Config("playback.program is empty".into()))?;
        require_program(player, "playback.program")?;
        Ok(())
    }
}

fn require_program(name: &str, field: &str) -> Result<()> {
    which::which(name)
        .map(|_| ())
        .map_err(|_| AssistantError::Config(format!("{field}: '{name}' not found on PATH")))
}
