//! Per-call session.
//!
//! [`CallSession`] owns every piece of call state and mutates it from a single
//! `select!` loop. Model streams and renders run as separate tasks and report
//! back over channels; the loop is the only place their results are applied.

use crate::call::conversation::{ChatMessage, Conversation};
use crate::call::transport::MediaTransport;
use crate::config::Config;
use crate::error::{Result, VoxlineError};
use crate::pipeline::{
    CompletionTracker, Fragment, Fragmenter, InterruptionController, PlaybackSequencer, Release,
    RenderOutcome, RenderPool,
};
use crate::providers::llm::{LanguageModel, TokenDelta};
use crate::providers::stt::{RecognizerStream, TranscriptEvent};
use crate::providers::tts::Synthesizer;
use crate::telephony::protocol::{InboundMessage, MediaPayload};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures_util::StreamExt;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use uuid::Uuid;

const MODEL_EVENT_BUFFER: usize = 64;

/// Knobs a session needs, resolved from [`Config`].
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub system_prompt: String,
    pub greeting: String,
    pub pause_marker: char,
    pub interrupt_min_chars: usize,
    pub stall_timeout: Duration,
    pub max_concurrent_renders: usize,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            system_prompt: config.llm.system_prompt.clone(),
            greeting: config.llm.greeting.clone(),
            pause_marker: config.playback.pause_marker,
            interrupt_min_chars: config.playback.interrupt_min_chars,
            stall_timeout: config.playback.stall_timeout(),
            max_concurrent_renders: config.playback.max_concurrent_renders,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Identifiers from the media stream's start message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallIdentity {
    pub call_sid: String,
    pub stream_sid: String,
}

/// What happened over the life of a call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallSummary {
    /// Caller utterances that started a reply.
    pub turns: u64,
    pub fragments_played: usize,
    pub fragments_skipped: usize,
    pub interruptions: usize,
}

#[derive(Debug)]
enum ModelEvent {
    Delta { turn: u64, delta: TokenDelta },
    Done { turn: u64 },
    Failed { turn: u64, error: String },
}

impl ModelEvent {
    fn turn(&self) -> u64 {
        match self {
            ModelEvent::Delta { turn, .. }
            | ModelEvent::Done { turn }
            | ModelEvent::Failed { turn, .. } => *turn,
        }
    }
}

struct Inbox {
    render_outcomes: mpsc::Receiver<RenderOutcome>,
    model_events: mpsc::Receiver<ModelEvent>,
}

/// One phone call, from the media stream's start to its stop.
pub struct CallSession<T: MediaTransport> {
    identity: CallIdentity,
    transport: T,
    model: Arc<dyn LanguageModel>,
    conversation: Conversation,
    greeting: String,
    fragmenter: Fragmenter,
    renders: RenderPool,
    sequencer: PlaybackSequencer,
    marks: CompletionTracker,
    interruption: InterruptionController,
    /// Last turn number handed out; 0 is the greeting.
    turn: u64,
    /// Turn whose model stream is still being fragmented.
    active_turn: Option<u64>,
    model_task: Option<JoinHandle<()>>,
    model_events: mpsc::Sender<ModelEvent>,
    inbox: Option<Inbox>,
    summary: CallSummary,
}

impl<T: MediaTransport> CallSession<T> {
    pub fn new(
        identity: CallIdentity,
        settings: &SessionSettings,
        model: Arc<dyn LanguageModel>,
        synthesizer: Arc<dyn Synthesizer>,
        transport: T,
    ) -> Self {
        let (renders, render_outcomes) =
            RenderPool::new(synthesizer, settings.max_concurrent_renders);
        let (model_events, model_rx) = mpsc::channel(MODEL_EVENT_BUFFER);
        let conversation = Conversation::new(
            &settings.system_prompt,
            &settings.greeting,
            &identity.call_sid,
        );

        Self {
            identity,
            transport,
            model,
            conversation,
            greeting: settings.greeting.clone(),
            fragmenter: Fragmenter::new(settings.pause_marker),
            renders,
            sequencer: PlaybackSequencer::new(settings.stall_timeout),
            marks: CompletionTracker::new(),
            interruption: InterruptionController::new(settings.interrupt_min_chars),
            turn: 0,
            active_turn: None,
            model_task: None,
            model_events,
            inbox: Some(Inbox {
                render_outcomes,
                model_events: model_rx,
            }),
            summary: CallSummary::default(),
        }
    }

    pub fn identity(&self) -> &CallIdentity {
        &self.identity
    }

    /// Drive the call until the stream stops or the socket closes.
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<InboundMessage>,
        recognizer: RecognizerStream,
    ) -> Result<CallSummary> {
        let Some(Inbox {
            mut render_outcomes,
            mut model_events,
        }) = self.inbox.take()
        else {
            return Err(VoxlineError::Other("call session already ran".to_string()));
        };
        let RecognizerStream {
            audio,
            events: mut transcripts,
        } = recognizer;
        let mut transcripts_open = true;

        tracing::info!("call started");
        self.speak_greeting().await;

        loop {
            let deadline = self.sequencer.deadline();

            tokio::select! {
                message = inbound.recv() => {
                    let Some(message) = message else {
                        tracing::info!("media stream closed");
                        break;
                    };
                    if self.on_inbound(message, &audio).is_break() {
                        break;
                    }
                }
                event = transcripts.recv(), if transcripts_open => match event {
                    Some(event) => self.on_transcript(event).await,
                    None => {
                        tracing::warn!("recognizer stream ended");
                        transcripts_open = false;
                    }
                },
                Some(event) = model_events.recv() => self.on_model_event(event).await,
                Some(outcome) = render_outcomes.recv() => self.on_render_outcome(outcome).await,
                () = wait_until(deadline) => {
                    let releases = self.sequencer.expire(now());
                    self.play(releases).await;
                }
            }
        }

        self.shutdown();
        Ok(self.summary)
    }

    async fn speak_greeting(&mut self) {
        let greeting = self.greeting.clone();
        for fragment in self.fragmenter.split_text(self.turn, &greeting) {
            self.dispatch(fragment).await;
        }
    }

    fn on_inbound(
        &mut self,
        message: InboundMessage,
        audio: &mpsc::Sender<Vec<u8>>,
    ) -> ControlFlow<()> {
        match message {
            InboundMessage::Media { media } => forward_audio(&media, audio),
            InboundMessage::Mark { mark } => {
                if self.marks.acknowledge(&mark.name) {
                    tracing::debug!(
                        label = %mark.name,
                        outstanding = self.marks.len(),
                        "playback mark reached"
                    );
                }
            }
            InboundMessage::Dtmf { dtmf } => tracing::info!(digit = %dtmf.digit, "caller pressed key"),
            InboundMessage::Connected { .. } => tracing::debug!("media stream connected"),
            InboundMessage::Start { start } => {
                tracing::warn!(stream_sid = %start.stream_sid, "ignoring repeated start")
            }
            InboundMessage::Stop { .. } => {
                tracing::info!("call stopped");
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn on_transcript(&mut self, event: TranscriptEvent) {
        match event {
            TranscriptEvent::Partial(text) => {
                if self.interruption.should_interrupt(&text, &self.marks) {
                    self.interrupt(&text).await;
                }
            }
            TranscriptEvent::Final(text) => {
                let text = text.trim();
                if !text.is_empty() {
                    self.start_turn(text.to_string());
                }
            }
        }
    }

    fn start_turn(&mut self, text: String) {
        if let Some(previous) = self.active_turn.take() {
            tracing::info!(turn = previous, "reply superseded by new utterance");
            self.abort_model();
            self.fragmenter.abandon();
        }

        self.turn += 1;
        let turn = self.turn;
        tracing::info!(turn, "STT -> LLM: {}", text);

        self.conversation.push_user(text);
        self.fragmenter.begin_turn(turn);
        self.active_turn = Some(turn);
        self.summary.turns += 1;

        let model = self.model.clone();
        let history = self.conversation.messages().to_vec();
        let events = self.model_events.clone();
        self.model_task = Some(tokio::spawn(stream_model_reply(
            model, history, turn, events,
        )));
    }

    async fn on_model_event(&mut self, event: ModelEvent) {
        let turn = event.turn();
        if self.active_turn != Some(turn) {
            tracing::debug!(turn, "dropping model output for inactive turn");
            return;
        }

        match event {
            ModelEvent::Delta { delta, .. } => {
                if let Some(fragment) = self.fragmenter.push(&delta) {
                    self.dispatch(fragment).await;
                }
            }
            ModelEvent::Done { .. } => {
                if let Some(fragment) = self.fragmenter.finish() {
                    self.dispatch(fragment).await;
                }
                let reply = self.fragmenter.take_reply();
                if !reply.trim().is_empty() {
                    self.conversation.push_assistant(reply);
                }
                self.active_turn = None;
                self.model_task = None;
            }
            ModelEvent::Failed { error, .. } => {
                tracing::error!(turn, error = %error, "model stream failed, abandoning reply");
                self.fragmenter.abandon();
                self.active_turn = None;
                self.model_task = None;
            }
        }
    }

    async fn dispatch(&mut self, fragment: Fragment) {
        let index = fragment.index;
        tracing::info!(turn = fragment.turn, index, "LLM -> TTS: {}", fragment.text);

        self.sequencer.expect(index, now());
        if !self.renders.submit(fragment) {
            let releases = self.sequencer.reject(index, now());
            self.play(releases).await;
        }
    }

    async fn on_render_outcome(&mut self, outcome: RenderOutcome) {
        let now = now();
        let releases = match outcome {
            RenderOutcome::Rendered(rendered) => self.sequencer.accept(rendered, now),
            RenderOutcome::Failed { index, turn, error } => {
                tracing::warn!(turn, index, error = %error, "fragment could not be rendered");
                self.sequencer.reject(index, now)
            }
        };
        self.play(releases).await;
    }

    async fn play(&mut self, releases: Vec<Release>) {
        for release in releases {
            match release {
                Release::Play { index, turn, audio } => {
                    let label = Uuid::new_v4().to_string();
                    match self.transport.send_audio(&audio, &label).await {
                        Ok(()) => {
                            self.marks.register(label);
                            self.summary.fragments_played += 1;
                            tracing::info!(turn, index, bytes = audio.len(), "TTS -> caller");
                        }
                        Err(e) => {
                            tracing::warn!(index, error = %e, "dropping fragment, send failed")
                        }
                    }
                }
                Release::Skip { index, reason } => {
                    self.summary.fragments_skipped += 1;
                    tracing::warn!(index, ?reason, "skipping fragment");
                }
            }
        }
    }

    async fn interrupt(&mut self, partial: &str) {
        tracing::info!(
            outstanding = self.marks.len(),
            "caller interrupted: {}",
            partial
        );

        if let Err(e) = self.transport.clear().await {
            tracing::warn!(error = %e, "failed to clear playback");
        }
        self.marks.clear();

        let dropped = self.sequencer.abandon_before(self.fragmenter.next_index());
        if dropped > 0 {
            tracing::debug!(dropped, "discarded rendered fragments");
        }

        self.abort_model();
        if let Some(turn) = self.active_turn.take() {
            tracing::debug!(turn, "abandoning interrupted reply");
            self.fragmenter.abandon();
        }
        self.summary.interruptions += 1;
    }

    fn abort_model(&mut self) {
        if let Some(task) = self.model_task.take() {
            task.abort();
        }
    }

    fn shutdown(&mut self) {
        self.abort_model();
        let cancelled = self.renders.cancel_all();
        tracing::info!(
            turns = self.summary.turns,
            played = self.summary.fragments_played,
            skipped = self.summary.fragments_skipped,
            interruptions = self.summary.interruptions,
            cancelled_renders = cancelled,
            "call ended"
        );
    }
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

fn forward_audio(media: &MediaPayload, audio: &mpsc::Sender<Vec<u8>>) {
    let bytes = match STANDARD.decode(&media.payload) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "undecodable media payload");
            return;
        }
    };
    match audio.try_send(bytes) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => tracing::warn!("recognizer backed up, dropping audio frame"),
        Err(TrySendError::Closed(_)) => tracing::debug!("recognizer closed, dropping audio frame"),
    }
}

async fn stream_model_reply(
    model: Arc<dyn LanguageModel>,
    history: Vec<ChatMessage>,
    turn: u64,
    events: mpsc::Sender<ModelEvent>,
) {
    let mut stream = match model.stream_reply(&history).await {
        Ok(stream) => stream,
        Err(e) => {
            report(&events, ModelEvent::Failed {
                turn,
                error: e.to_string(),
            })
            .await;
            return;
        }
    };

    while let Some(item) = stream.next().await {
        let event = match item {
            Ok(delta) => ModelEvent::Delta { turn, delta },
            Err(e) => {
                report(&events, ModelEvent::Failed {
                    turn,
                    error: e.to_string(),
                })
                .await;
                return;
            }
        };
        if events.send(event).await.is_err() {
            return;
        }
    }

    report(&events, ModelEvent::Done { turn }).await;
}

async fn report(events: &mpsc::Sender<ModelEvent>, event: ModelEvent) {
    if events.send(event).await.is_err() {
        tracing::debug!("session gone before model stream finished");
    }
}
