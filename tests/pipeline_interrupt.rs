//! Interrupt-handling integration tests for the full pipeline, driven by
//! scripted collaborator fakes.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use vesper::audio::{AudioInput, PlaybackSink, PlaybackStream, RecordedAudio};
use vesper::dispatch::CommandDispatcher;
use vesper::error::{AssistantError, Result};
use vesper::llm::LanguageModel;
use vesper::pipeline::Orchestrator;
use vesper::pipeline::orchestrator::APOLOGY;
use vesper::speech::{SpeechSynthesizer, Transcriber};
use vesper::visual::VisualStateController;

/// Poll until `cond` holds or the test times out.
async fn wait_for(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

// --- scripted collaborators -------------------------------------------------

struct ScriptedAudio {
    wakes: mpsc::Receiver<()>,
    dir: tempfile::TempDir,
    counter: usize,
    /// Return a wake error (fatal) when the wake channel closes, instead
    /// of parking forever.
    fail_on_close: bool,
}

impl ScriptedAudio {
    fn new(fail_on_close: bool) -> (mpsc::Sender<()>, Self) {
        let (tx, wakes) = mpsc::channel(4);
        (
            tx,
            Self {
                wakes,
                dir: tempfile::tempdir().unwrap(),
                counter: 0,
                fail_on_close,
            },
        )
    }
}

#[async_trait]
impl AudioInput for ScriptedAudio {
    async fn wait_for_wake(&mut self) -> Result<()> {
        match self.wakes.recv().await {
            Some(()) => Ok(()),
            None if self.fail_on_close => Err(AssistantError::Wake("microphone gone".into())),
            None => std::future::pending().await,
        }
    }

    async fn record_command(&mut self) -> Result<RecordedAudio> {
        self.counter += 1;
        let path = self.dir.path().join(format!("cmd-{}.wav", self.counter));
        std::fs::write(&path, b"fake wav")?;
        Ok(RecordedAudio::new(path))
    }
}

struct ScriptedTranscriber {
    text: Option<String>,
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, _audio: &RecordedAudio) -> Result<Option<String>> {
        Ok(self.text.clone())
    }
}

/// One step of a scripted model response.
#[derive(Clone, Copy)]
enum LlmStep {
    /// Emit a token fragment.
    Token(&'static str),
    /// Keep the stream open until the pipeline is cancelled.
    Stall,
}

/// Plays one script per `stream_response` call, in order.
struct ScriptedLlm {
    scripts: Mutex<VecDeque<Vec<LlmStep>>>,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    fn new(scripts: Vec<Vec<LlmStep>>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for ScriptedLlm {
    async fn stream_response(&self, _prompt: &str) -> Result<mpsc::Receiver<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            for step in script {
                match step {
                    LlmStep::Token(token) => {
                        if tx.send(token.to_owned()).await.is_err() {
                            return;
                        }
                    }
                    LlmStep::Stall => {
                        // Wake up only when the pipeline drops the receiver.
                        tx.closed().await;
                        return;
                    }
                }
            }
        });
        Ok(rx)
    }
}

struct FailingLlm;

#[async_trait]
impl LanguageModel for FailingLlm {
    async fn stream_response(&self, _prompt: &str) -> Result<mpsc::Receiver<String>> {
        Err(AssistantError::Llm("connection refused".into()))
    }
}

/// Records every synthesized text and emits one PCM chunk per call.
struct ScriptedSynth {
    texts: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl SpeechSynthesizer for ScriptedSynth {
    fn sample_rate(&self) -> u32 {
        16_000
    }

    async fn synthesize(&self, text: &str) -> Result<mpsc::Receiver<Result<Vec<u8>>>> {
        self.texts.lock().unwrap().push(text.to_owned());
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            let _ = tx.send(Ok(vec![0u8; 64])).await;
        });
        Ok(rx)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SinkEvent {
    Open,
    Write,
    Finish,
    Stop,
}

struct RecordingSink {
    events: Arc<Mutex<Vec<SinkEvent>>>,
}

#[async_trait]
impl PlaybackSink for RecordingSink {
    async fn open(&self, _sample_rate: u32) -> Result<Box<dyn PlaybackStream>> {
        self.events.lock().unwrap().push(SinkEvent::Open);
        Ok(Box::new(RecordingStream {
            events: Arc::clone(&self.events),
        }))
    }
}

struct RecordingStream {
    events: Arc<Mutex<Vec<SinkEvent>>>,
}

#[async_trait]
impl PlaybackStream for RecordingStream {
    async fn write(&mut self, _pcm: &[u8]) -> Result<()> {
        self.events.lock().unwrap().push(SinkEvent::Write);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<()> {
        self.events.lock().unwrap().push(SinkEvent::Finish);
        Ok(())
    }

    async fn stop(self: Box<Self>) -> Result<()> {
        self.events.lock().unwrap().push(SinkEvent::Stop);
        Ok(())
    }
}

struct RecordingVisual {
    states: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl VisualStateController for RecordingVisual {
    async fn set_state(&self, status: &str) -> Result<()> {
        self.states.lock().unwrap().push(status.to_owned());
        Ok(())
    }
}

// --- harness ----------------------------------------------------------------

struct Harness {
    wake_tx: mpsc::Sender<()>,
    visual_states: Arc<Mutex<Vec<String>>>,
    sink_events: Arc<Mutex<Vec<SinkEvent>>>,
    synth_texts: Arc<Mutex<Vec<String>>>,
    shutdown: CancellationToken,
    task: JoinHandle<Result<()>>,
}

impl Harness {
    fn start(llm: Arc<dyn LanguageModel>, transcript: Option<&str>, fail_on_close: bool) -> Self {
        let (wake_tx, audio) = ScriptedAudio::new(fail_on_close);
        let visual_states = Arc::new(Mutex::new(Vec::new()));
        let sink_events = Arc::new(Mutex::new(Vec::new()));
        let synth_texts = Arc::new(Mutex::new(Vec::new()));
        let shutdown = CancellationToken::new();

        let dispatcher = Arc::new(CommandDispatcher::new(Arc::new(RecordingVisual {
            states: Arc::clone(&visual_states),
        })));
        let orchestrator = Orchestrator::new(
            Box::new(audio),
            Arc::new(ScriptedTranscriber {
                text: transcript.map(str::to_owned),
            }),
            llm,
            Arc::new(ScriptedSynth {
                texts: Arc::clone(&synth_texts),
            }),
            Arc::new(RecordingSink {
                events: Arc::clone(&sink_events),
            }),
            dispatcher,
            shutdown.clone(),
        );
        let task = tokio::spawn(orchestrator.run());

        Self {
            wake_tx,
            visual_states,
            sink_events,
            synth_texts,
            shutdown,
            task,
        }
    }

    async fn wake(&self) {
        self.wake_tx.send(()).await.unwrap();
    }

    fn visual(&self) -> Vec<String> {
        self.visual_states.lock().unwrap().clone()
    }

    fn sink(&self) -> Vec<SinkEvent> {
        self.sink_events.lock().unwrap().clone()
    }

    fn spoken(&self) -> Vec<String> {
        self.synth_texts.lock().unwrap().clone()
    }

    async fn shutdown(self) -> Result<()> {
        self.shutdown.cancel();
        self.task.await.unwrap()
    }
}

// --- tests ------------------------------------------------------------------

#[tokio::test]
async fn completed_run_speaks_and_dispatches_its_command() {
    let llm = ScriptedLlm::new(vec![vec![
        LlmStep::Token("<thought>plan the reply</thought>"),
        LlmStep::Token("<answer>Hello there. "),
        LlmStep::Token(
            "Done. [CMD]{\"tool_name\": \"set_status\", \
             \"parameters\": {\"status\": \"celebrating\"}}[/CMD]</answer>",
        ),
    ]]);
    let harness = Harness::start(llm, Some("say hello"), false);

    harness.wake().await;
    let visual = harness.visual_states.clone();
    wait_for("run to finish", || {
        visual.lock().unwrap().last().map(String::as_str) == Some("idle")
            && visual.lock().unwrap().len() > 1
    })
    .await;

    assert_eq!(harness.spoken(), ["Hello there.", "Done."]);
    assert_eq!(
        harness.visual(),
        ["idle", "listening", "processing", "speaking", "celebrating", "idle"]
    );
    let sink = harness.sink();
    assert_eq!(sink.first(), Some(&SinkEvent::Open));
    assert_eq!(sink.last(), Some(&SinkEvent::Finish));
    assert!(sink.contains(&SinkEvent::Write));
    assert!(!sink.contains(&SinkEvent::Stop));

    harness.shutdown().await.unwrap();
}

#[tokio::test]
async fn second_wake_cancels_the_active_run() {
    let llm = ScriptedLlm::new(vec![
        vec![
            LlmStep::Token("<answer>First sentence. And more is on the way"),
            LlmStep::Stall,
        ],
        vec![LlmStep::Token("<answer>All good.</answer>")],
    ]);
    let harness = Harness::start(llm, Some("something"), false);

    harness.wake().await;
    let sink = harness.sink_events.clone();
    wait_for("first run to start playing", || {
        sink.lock().unwrap().contains(&SinkEvent::Write)
    })
    .await;

    harness.wake().await;
    wait_for("second run to finish", || {
        sink.lock().unwrap().contains(&SinkEvent::Finish)
    })
    .await;

    let events = harness.sink();
    // Cancelled run: opened, wrote, stopped. Winner: opened, wrote, drained.
    let stop_at = events.iter().position(|e| *e == SinkEvent::Stop).unwrap();
    let reopen_at = events.iter().rposition(|e| *e == SinkEvent::Open).unwrap();
    let finish_at = events.iter().position(|e| *e == SinkEvent::Finish).unwrap();
    assert!(stop_at < reopen_at, "old stream released before new open: {events:?}");
    assert!(reopen_at < finish_at, "{events:?}");
    assert_eq!(
        events.iter().filter(|e| **e == SinkEvent::Open).count(),
        2,
        "{events:?}"
    );
    // Nothing reached playback between cancellation and the new stream.
    assert!(
        events[stop_at..reopen_at]
            .iter()
            .all(|e| *e != SinkEvent::Write),
        "{events:?}"
    );

    assert_eq!(harness.spoken(), ["First sentence.", "All good."]);

    // Exactly one terminal idle, owned by the winner.
    let visual = harness.visual();
    assert_eq!(visual.iter().filter(|s| *s == "idle").count(), 2); // startup + winner
    assert_eq!(visual.last().map(String::as_str), Some("idle"));

    harness.shutdown().await.unwrap();
}

#[tokio::test]
async fn no_command_executes_from_an_interrupted_run() {
    // The first run receives a complete command block but its stream never
    // finishes; the command must not run.
    let llm = ScriptedLlm::new(vec![
        vec![
            LlmStep::Token(
                "<answer>Done. [CMD]{\"tool_name\": \"set_status\", \
                 \"parameters\": {\"status\": \"party\"}}[/CMD]",
            ),
            LlmStep::Stall,
        ],
        vec![LlmStep::Token("<answer>Ok then.</answer>")],
    ]);
    let harness = Harness::start(llm, Some("something"), false);

    harness.wake().await;
    let spoken = harness.synth_texts.clone();
    wait_for("first run to speak", || !spoken.lock().unwrap().is_empty()).await;

    harness.wake().await;
    let sink = harness.sink_events.clone();
    wait_for("second run to finish", || {
        sink.lock().unwrap().contains(&SinkEvent::Finish)
    })
    .await;

    assert!(
        !harness.visual().iter().any(|s| s == "party"),
        "command from a cancelled run was dispatched: {:?}",
        harness.visual()
    );

    harness.shutdown().await.unwrap();
}

#[tokio::test]
async fn empty_transcription_aborts_to_idle_without_an_llm_call() {
    let llm = ScriptedLlm::new(vec![]);
    let harness = Harness::start(llm.clone(), None, false);

    harness.wake().await;
    let visual = harness.visual_states.clone();
    wait_for("abort to idle", || {
        let states = visual.lock().unwrap();
        states.len() >= 3 && states.last().map(String::as_str) == Some("idle")
    })
    .await;

    assert_eq!(harness.visual(), ["idle", "listening", "idle"]);
    assert_eq!(llm.calls(), 0);
    assert!(harness.sink().is_empty());
    assert!(harness.spoken().is_empty());

    harness.shutdown().await.unwrap();
}

#[tokio::test]
async fn llm_connection_failure_speaks_the_apology() {
    let harness = Harness::start(Arc::new(FailingLlm), Some("anything"), false);

    harness.wake().await;
    let sink = harness.sink_events.clone();
    wait_for("apology playback", || {
        sink.lock().unwrap().contains(&SinkEvent::Finish)
    })
    .await;

    assert_eq!(harness.spoken(), [APOLOGY]);
    let visual = harness.visual();
    assert_eq!(visual.last().map(String::as_str), Some("idle"));

    harness.shutdown().await.unwrap();
}

#[tokio::test]
async fn untagged_response_is_spoken_via_the_fallback() {
    let llm = ScriptedLlm::new(vec![vec![LlmStep::Token("Just plain text with no tags")]]);
    let harness = Harness::start(llm, Some("something"), false);

    harness.wake().await;
    let sink = harness.sink_events.clone();
    wait_for("fallback playback", || {
        sink.lock().unwrap().contains(&SinkEvent::Finish)
    })
    .await;

    assert_eq!(harness.spoken(), ["Just plain text with no tags"]);
    harness.shutdown().await.unwrap();
}

#[tokio::test]
async fn wake_failure_is_fatal_and_tears_down() {
    let llm = ScriptedLlm::new(vec![]);
    let harness = Harness::start(llm, Some("anything"), true);

    let visual = harness.visual_states.clone();
    wait_for("startup idle", || !visual.lock().unwrap().is_empty()).await;

    // Closing the wake channel makes the listener fail.
    let Harness { wake_tx, task, .. } = harness;
    drop(wake_tx);
    let result = task.await.unwrap();
    assert!(matches!(result, Err(AssistantError::Wake(_))));
}
