//! Microphone capture via an external process, with an energy wake gate
//! and voiced command recording.
//!
//! The capture program writes raw s16le mono PCM to stdout; frames are
//! read with blocking I/O isolated on the blocking pool so the cooperative
//! scheduler never stalls. The wake gate and the command accumulator are
//! pure per-frame state machines, testable without any audio device.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::io::Read;
use std::process::{Child, ChildStdout, Command, Stdio};

use super::{AudioInput, RecordedAudio};
use crate::config::AudioConfig;
use crate::error::{AssistantError, Result};

/// Microphone input backed by a capture subprocess (`arecord` by default).
pub struct ProcessCapture {
    config: AudioConfig,
    child: Option<Child>,
    reader: Option<ChildStdout>,
}

impl ProcessCapture {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            config: config.clone(),
            child: None,
            reader: None,
        }
    }

    fn frame_bytes(&self) -> usize {
        (self.config.sample_rate as usize * self.config.frame_ms as usize / 1000) * 2
    }

    /// Take the capture stream, spawning the capture process on first use.
    fn take_reader(&mut self) -> Result<ChildStdout> {
        if let Some(reader) = self.reader.take() {
            return Ok(reader);
        }
        let (program, args) = self
            .config
            .capture_program
            .split_first()
            .ok_or_else(|| AssistantError::Audio("capture program not configured".into()))?;
        let mut child = Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| AssistantError::Audio(format!("cannot spawn {program}: {e}")))?;
        let reader = child
            .stdout
            .take()
            .ok_or_else(|| AssistantError::Audio("capture stdout not piped".into()))?;
        tracing::info!("capture process '{program}' started");
        self.child = Some(child);
        Ok(reader)
    }
}

impl Drop for ProcessCapture {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

#[async_trait]
impl AudioInput for ProcessCapture {
    async fn wait_for_wake(&mut self) -> Result<()> {
        let mut reader = self.take_reader()?;
        let frame_bytes = self.frame_bytes();
        let mut gate = WakeGate::new(self.config.voice_threshold, self.config.wake_frames);

        let outcome = tokio::task::spawn_blocking(move || -> Result<ChildStdout> {
            let mut frame = vec![0u8; frame_bytes];
            loop {
                reader
                    .read_exact(&mut frame)
                    .map_err(|e| AssistantError::Wake(format!("capture stream ended: {e}")))?;
                if gate.observe(frame_rms(&frame)) {
                    tracing::info!("wake event detected");
                    return Ok(reader);
                }
            }
        })
        .await
        .map_err(|e| AssistantError::Wake(format!("wake listener panicked: {e}")))?;

        self.reader = Some(outcome?);
        Ok(())
    }

    async fn record_command(&mut self) -> Result<RecordedAudio> {
        let mut reader = self.take_reader()?;
        let frame_bytes = self.frame_bytes();
        let sample_rate = self.config.sample_rate;
        let mut accumulator = CommandAccumulator::new(&self.config, frame_bytes);
        let wav_path = std::env::temp_dir().join(format!("vesper-cmd-{}.wav", uuid::Uuid::new_v4()));

        let outcome = tokio::task::spawn_blocking(move || -> Result<(ChildStdout, RecordedAudio)> {
            tracing::info!("recording command; speak now");
            let mut frame = vec![0u8; frame_bytes];
            loop {
                reader
                    .read_exact(&mut frame)
                    .map_err(|e| AssistantError::Audio(format!("capture stream ended: {e}")))?;
                if accumulator.observe(&frame, frame_rms(&frame)) {
                    break;
                }
            }
            tracing::info!("recording finished");

            let spec = hound::WavSpec {
                channels: 1,
                sample_rate,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            };
            let mut writer = hound::WavWriter::create(&wav_path, spec)
                .map_err(|e| AssistantError::Audio(format!("cannot create WAV: {e}")))?;
            for sample in accumulator.samples().chunks_exact(2) {
                let value = i16::from_le_bytes([sample[0], sample[1]]);
                writer
                    .write_sample(value)
                    .map_err(|e| AssistantError::Audio(format!("cannot write WAV: {e}")))?;
            }
            writer
                .finalize()
                .map_err(|e| AssistantError::Audio(format!("cannot finalize WAV: {e}")))?;
            Ok((reader, RecordedAudio::new(wav_path)))
        })
        .await
        .map_err(|e| AssistantError::Audio(format!("recorder panicked: {e}")))?;

        let (reader, recording) = outcome?;
        self.reader = Some(reader);
        Ok(recording)
    }
}

/// RMS energy of an s16le frame, normalized to \[0, 1\].
fn frame_rms(frame: &[u8]) -> f32 {
    let mut sum = 0.0f64;
    let mut count = 0usize;
    for bytes in frame.chunks_exact(2) {
        let sample = f64::from(i16::from_le_bytes([bytes[0], bytes[1]])) / 32768.0;
        sum += sample * sample;
        count += 1;
    }
    if count == 0 {
        return 0.0;
    }
    ((sum / count as f64) as f32).sqrt()
}

/// Fires after a configured run of consecutive voiced frames.
struct WakeGate {
    threshold: f32,
    required: u32,
    run: u32,
}

impl WakeGate {
    fn new(threshold: f32, required: u32) -> Self {
        Self {
            threshold,
            required: required.max(1),
            run: 0,
        }
    }

    /// Returns `true` when the gate fires. A silent frame resets the run.
    fn observe(&mut self, rms: f32) -> bool {
        if rms > self.threshold {
            self.run += 1;
            self.run >= self.required
        } else {
            self.run = 0;
            false
        }
    }
}

/// Accumulates one command utterance: a pre-roll ring until the first
/// voiced frame, then everything up to a run of silent frames or the
/// length cap.
struct CommandAccumulator {
    threshold: f32,
    preroll: VecDeque<Vec<u8>>,
    preroll_max: usize,
    frames: Vec<u8>,
    triggered: bool,
    silent_run: u32,
    silence_stop: u32,
    max_bytes: usize,
}

impl CommandAccumulator {
    fn new(config: &AudioConfig, frame_bytes: usize) -> Self {
        let frames_per_sec = 1000 / config.frame_ms.max(1) as usize;
        Self {
            threshold: config.voice_threshold,
            preroll: VecDeque::new(),
            preroll_max: config.preroll_frames.max(1) as usize,
            frames: Vec::new(),
            triggered: false,
            silent_run: 0,
            silence_stop: config.silence_stop_frames.max(1),
            max_bytes: config.max_command_secs as usize * frames_per_sec * frame_bytes,
        }
    }

    /// Feed one frame; returns `true` when the recording is complete.
    fn observe(&mut self, frame: &[u8], rms: f32) -> bool {
        let voiced = rms > self.threshold;
        if !self.triggered {
            if self.preroll.len() == self.preroll_max {
                self.preroll.pop_front();
            }
            self.preroll.push_back(frame.to_vec());
            if voiced {
                self.triggered = true;
                for held in self.preroll.drain(..) {
                    self.frames.extend_from_slice(&held);
                }
            }
            return false;
        }

        self.frames.extend_from_slice(frame);
        if voiced {
            self.silent_run = 0;
        } else {
            self.silent_run += 1;
            if self.silent_run > self.silence_stop {
                return true;
            }
        }
        self.frames.len() >= self.max_bytes
    }

    fn samples(&self) -> &[u8] {
        &self.frames
    }
}
