//! The interruptible command pipeline.
//!
//! One run handles one spoken command: transcribe, stream the model
//! response, classify and segment it, speak it sentence by sentence, then
//! dispatch the embedded command. A new wake event cancels the in-flight
//! run and waits for it to unwind (playback released, nothing half-spoken
//! left behind) before the next run starts.
//!
//! Cancellation is cooperative: every stage observes the run's token at
//! its suspension points — once per incoming token fragment, once per
//! sentence unit, once per playback write — and exits promptly without
//! raising.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::audio::{AudioInput, PlaybackSink, PlaybackStream, RecordedAudio};
use crate::dispatch::CommandDispatcher;
use crate::error::Result;
use crate::llm::LanguageModel;
use crate::response::{
    ChunkKind, ClassifiedChunk, CommandBlockFilter, SentenceSegmenter, TagStreamParser,
    extract_command,
};
use crate::speech::{SpeechSynthesizer, Transcriber};
use crate::visual::VisualState;

/// Spoken when STT, the LLM connection, or the speak path fails.
pub const APOLOGY: &str = "Sorry, something went wrong. Please try again.";

/// How one pipeline run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Ran to the end (including failed runs that spoke the apology).
    Completed,
    /// Superseded by a newer wake event.
    Cancelled,
}

/// One in-flight run: its cancellation token and its task.
///
/// At most one exists at a time; the orchestrator joins it before
/// creating the next.
struct PipelineHandle {
    cancel: CancellationToken,
    task: JoinHandle<PipelineOutcome>,
}

/// Collaborators shared by every run.
struct PipelineContext {
    transcriber: Arc<dyn Transcriber>,
    llm: Arc<dyn LanguageModel>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    playback: Arc<dyn PlaybackSink>,
    dispatcher: Arc<CommandDispatcher>,
}

/// Owns the wake loop and the single active pipeline.
pub struct Orchestrator {
    audio: Box<dyn AudioInput>,
    ctx: Arc<PipelineContext>,
    shutdown: CancellationToken,
    active: Option<PipelineHandle>,
}

impl Orchestrator {
    pub fn new(
        audio: Box<dyn AudioInput>,
        transcriber: Arc<dyn Transcriber>,
        llm: Arc<dyn LanguageModel>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        playback: Arc<dyn PlaybackSink>,
        dispatcher: Arc<CommandDispatcher>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            audio,
            ctx: Arc::new(PipelineContext {
                transcriber,
                llm,
                synthesizer,
                playback,
                dispatcher,
            }),
            shutdown,
            active: None,
        }
    }

    /// Main loop: wait for wake events and hand each one a fresh pipeline
    /// run, superseding the previous one.
    ///
    /// Returns when the shutdown token is cancelled.
    ///
    /// # Errors
    ///
    /// A wake-listener failure is fatal; resources are torn down before
    /// the error is returned.
    pub async fn run(mut self) -> Result<()> {
        self.ctx.dispatcher.set_visual_state(VisualState::Idle);
        loop {
            let wake = tokio::select! {
                () = self.shutdown.cancelled() => break,
                wake = self.audio.wait_for_wake() => wake,
            };
            if let Err(e) = wake {
                tracing::error!("wake listener failed: {e}");
                self.teardown().await;
                return Err(e);
            }

            // The previous run must fully unwind (playback released) before
            // this wake proceeds; its interrupt state dies with it, so the
            // new run starts with a fresh token.
            self.supersede_active().await;

            self.ctx.dispatcher.set_visual_state(VisualState::Listening);
            let recording = match self.audio.record_command().await {
                Ok(recording) => recording,
                Err(e) => {
                    tracing::warn!("command recording failed: {e}");
                    self.ctx.dispatcher.set_visual_state(VisualState::Idle);
                    continue;
                }
            };

            let cancel = CancellationToken::new();
            let run_id = uuid::Uuid::new_v4();
            tracing::info!(%run_id, "starting pipeline run");
            let ctx = Arc::clone(&self.ctx);
            let task = {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    let outcome = run_pipeline(&ctx, &recording, &cancel).await;
                    tracing::info!(%run_id, ?outcome, "pipeline run finished");
                    outcome
                })
            };
            self.active = Some(PipelineHandle { cancel, task });
        }
        self.teardown().await;
        Ok(())
    }

    /// Cancel the active run, if any, and wait for it to unwind.
    async fn supersede_active(&mut self) {
        if let Some(handle) = self.active.take() {
            handle.cancel.cancel();
            match handle.task.await {
                Ok(outcome) => tracing::debug!(?outcome, "previous run unwound"),
                Err(e) => tracing::warn!("pipeline task panicked: {e}"),
            }
        }
    }

    async fn teardown(&mut self) {
        self.supersede_active().await;
        self.ctx.dispatcher.shutdown().await;
    }
}

/// Run one pipeline to completion or cancellation, releasing the playback
/// resource on every exit path.
async fn run_pipeline(
    ctx: &PipelineContext,
    recording: &RecordedAudio,
    cancel: &CancellationToken,
) -> PipelineOutcome {
    let mut playback = None;
    let result = drive(ctx, recording, cancel, &mut playback).await;

    let cancelled = matches!(result, Ok(true));
    if let Some(stream) = playback.take() {
        // Interrupted runs stop dead; completed runs drain.
        let release = if cancelled {
            stream.stop().await
        } else {
            stream.finish().await
        };
        if let Err(e) = release {
            tracing::warn!("playback release failed: {e}");
        }
    }

    match result {
        Ok(true) => PipelineOutcome::Cancelled,
        Ok(false) => {
            ctx.dispatcher.set_visual_state(VisualState::Idle);
            PipelineOutcome::Completed
        }
        Err(e) => {
            tracing::warn!("pipeline run failed: {e}");
            if speak_apology(ctx, cancel).await {
                // Superseded while apologizing; the winner owns the
                // terminal state.
                return PipelineOutcome::Cancelled;
            }
            ctx.dispatcher.set_visual_state(VisualState::Idle);
            PipelineOutcome::Completed
        }
    }
}

/// The sequential pipeline body. Returns `Ok(true)` when the run was
/// interrupted.
async fn drive(
    ctx: &PipelineContext,
    recording: &RecordedAudio,
    cancel: &CancellationToken,
    playback: &mut Option<Box<dyn PlaybackStream>>,
) -> Result<bool> {
    let transcript = tokio::select! {
        () = cancel.cancelled() => return Ok(true),
        transcript = ctx.transcriber.transcribe(recording) => transcript?,
    };
    let Some(prompt) = transcript.filter(|t| !t.trim().is_empty()) else {
        tracing::info!("nothing usable heard");
        return Ok(false);
    };

    ctx.dispatcher.set_visual_state(VisualState::Processing);
    let mut tokens = tokio::select! {
        () = cancel.cancelled() => return Ok(true),
        tokens = ctx.llm.stream_response(&prompt) => tokens?,
    };

    let mut parser = TagStreamParser::new();
    let mut filter = CommandBlockFilter::new();
    let mut segmenter = SentenceSegmenter::new();
    // Thought and answer content in emission order; the command extractor
    // sees the whole response, wherever the model put the block.
    let mut full_response = String::new();

    loop {
        let fragment = tokio::select! {
            () = cancel.cancelled() => return Ok(true),
            fragment = tokens.recv() => match fragment {
                Some(fragment) => fragment,
                None => break,
            },
        };
        for chunk in parser.ingest(&fragment) {
            if handle_chunk(ctx, cancel, playback, &mut filter, &mut segmenter, &mut full_response, chunk).await? {
                return Ok(true);
            }
        }
    }

    for chunk in parser.flush() {
        if handle_chunk(ctx, cancel, playback, &mut filter, &mut segmenter, &mut full_response, chunk).await? {
            return Ok(true);
        }
    }
    let tail = filter.flush();
    for unit in segmenter.push(&tail) {
        if speak_unit(ctx, cancel, playback, &unit.text).await? {
            return Ok(true);
        }
    }
    if let Some(unit) = segmenter.drain()
        && speak_unit(ctx, cancel, playback, &unit.text).await?
    {
        return Ok(true);
    }

    // Only a run that survived to the end of its stream may execute the
    // command, even if a complete block was already in the buffer.
    let (_, command) = extract_command(&full_response);
    if let Some(command) = command {
        ctx.dispatcher.dispatch(&command);
    }
    Ok(false)
}

/// Route one classified chunk: thoughts are logged, answer text is
/// filtered, segmented and spoken. Returns `Ok(true)` on interruption.
async fn handle_chunk(
    ctx: &PipelineContext,
    cancel: &CancellationToken,
    playback: &mut Option<Box<dyn PlaybackStream>>,
    filter: &mut CommandBlockFilter,
    segmenter: &mut SentenceSegmenter,
    full_response: &mut String,
    chunk: ClassifiedChunk,
) -> Result<bool> {
    full_response.push_str(&chunk.content);
    match chunk.kind {
        ChunkKind::Thought => {
            tracing::debug!("thought: {}", chunk.content);
        }
        ChunkKind::Answer => {
            let speakable = filter.push(&chunk.content);
            for unit in segmenter.push(&speakable) {
                if speak_unit(ctx, cancel, playback, &unit.text).await? {
                    return Ok(true);
                }
            }
        }
    }
    Ok(false)
}

/// Synthesize one sentence unit and feed it to playback, opening the
/// playback stream lazily on the first unit. Returns `Ok(true)` on
/// interruption.
async fn speak_unit(
    ctx: &PipelineContext,
    cancel: &CancellationToken,
    playback: &mut Option<Box<dyn PlaybackStream>>,
    text: &str,
) -> Result<bool> {
    if cancel.is_cancelled() {
        return Ok(true);
    }
    let stream = match playback {
        Some(stream) => stream,
        None => {
            // First speakable output: only now does the run own a playback
            // resource and the "speaking" state.
            ctx.dispatcher.set_visual_state(VisualState::Speaking);
            let opened = tokio::select! {
                () = cancel.cancelled() => return Ok(true),
                opened = ctx.playback.open(ctx.synthesizer.sample_rate()) => opened?,
            };
            playback.insert(opened)
        }
    };

    tracing::debug!("speaking: '{text}'");
    let mut pcm = tokio::select! {
        () = cancel.cancelled() => return Ok(true),
        pcm = ctx.synthesizer.synthesize(text) => pcm?,
    };
    loop {
        let chunk = tokio::select! {
            () = cancel.cancelled() => return Ok(true),
            chunk = pcm.recv() => match chunk {
                Some(chunk) => chunk?,
                None => break,
            },
        };
        tokio::select! {
            () = cancel.cancelled() => return Ok(true),
            written = stream.write(&chunk) => written?,
        }
    }
    Ok(false)
}

/// Best-effort spoken fallback for failed runs, through the ordinary
/// speak path. Returns `true` if interrupted while apologizing.
async fn speak_apology(ctx: &PipelineContext, cancel: &CancellationToken) -> bool {
    let mut playback = None;
    let cancelled = match speak_unit(ctx, cancel, &mut playback, APOLOGY).await {
        Ok(cancelled) => cancelled,
        Err(e) => {
            // The speak path itself is down; nothing left to try.
            tracing::warn!("cannot speak apology: {e}");
            false
        }
    };
    if let Some(stream) = playback.take() {
        let release = if cancelled {
            stream.stop().await
        } else {
            stream.finish().await
        };
        if let Err(e) = release {
            tracing::warn!("playback release failed: {e}");
        }
    }
    cancelled
}
