//! End-to-end call flows against scripted providers.
//!
//! Every test runs on a paused clock, so render delays and stall timeouts
//! are exact and the suite finishes instantly.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use voxline::call::{
    CallIdentity, CallSession, CallSummary, RecordingTransport, Role, SessionSettings,
    TransportEvent,
};
use voxline::providers::{MockSynthesizer, RecognizerStream, ScriptedModel, TranscriptEvent};
use voxline::telephony::protocol::{InboundMessage, MarkPayload};

const GREETING_1: &[u8] = b"Hello, thanks for calling.";
const GREETING_2: &[u8] = b"How can I help you today?";

struct Call {
    inbound: mpsc::Sender<InboundMessage>,
    transcripts: mpsc::Sender<TranscriptEvent>,
    transport: RecordingTransport,
    handle: JoinHandle<voxline::Result<CallSummary>>,
    _audio: mpsc::Receiver<Vec<u8>>,
}

impl Call {
    fn start(model: ScriptedModel, synth: MockSynthesizer, settings: SessionSettings) -> Self {
        let transport = RecordingTransport::new();
        let session = CallSession::new(
            CallIdentity {
                call_sid: "CA-flow".to_string(),
                stream_sid: "MZ-flow".to_string(),
            },
            &settings,
            Arc::new(model),
            Arc::new(synth),
            transport.clone(),
        );

        let (inbound, inbound_rx) = mpsc::channel(32);
        let (transcripts, transcripts_rx) = mpsc::channel(32);
        let (audio_tx, audio) = mpsc::channel(32);
        let handle = tokio::spawn(session.run(
            inbound_rx,
            RecognizerStream {
                audio: audio_tx,
                events: transcripts_rx,
            },
        ));

        Self {
            inbound,
            transcripts,
            transport,
            handle,
            _audio: audio,
        }
    }

    async fn say(&self, text: &str) {
        self.transcripts
            .send(TranscriptEvent::Final(text.to_string()))
            .await
            .unwrap();
    }

    async fn mumble(&self, text: &str) {
        self.transcripts
            .send(TranscriptEvent::Partial(text.to_string()))
            .await
            .unwrap();
    }

    /// Report every mark sent so far as played.
    async fn ack_all(&self) {
        for label in self.transport.labels() {
            self.inbound
                .send(InboundMessage::Mark {
                    mark: MarkPayload { name: label },
                })
                .await
                .unwrap();
        }
    }

    async fn hang_up(self) -> CallSummary {
        self.inbound
            .send(InboundMessage::Stop { stop: None })
            .await
            .unwrap();
        self.handle.await.unwrap().unwrap()
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

fn played_after_greeting(transport: &RecordingTransport) -> Vec<Vec<u8>> {
    transport.played().into_iter().skip(2).collect()
}

#[tokio::test(start_paused = true)]
async fn out_of_order_renders_play_in_order() {
    let model = ScriptedModel::new().with_reply(&["One •", " two •", " three."]);
    let synth = MockSynthesizer::new()
        .with_delay("One", Duration::from_millis(300))
        .with_delay("two", Duration::from_millis(200));
    let call = Call::start(model, synth, SessionSettings::default());
    settle().await;

    call.say("count for me").await;
    settle().await;
    // "three." is rendered but must wait for the two before it
    assert!(played_after_greeting(&call.transport).is_empty());

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(
        played_after_greeting(&call.transport),
        vec![b"One".to_vec(), b"two".to_vec(), b"three.".to_vec()]
    );

    let labels = call.transport.labels();
    let mut unique = labels.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), labels.len());

    let summary = call.hang_up().await;
    assert_eq!(summary.fragments_played, 5);
    assert_eq!(summary.fragments_skipped, 0);
}

#[tokio::test(start_paused = true)]
async fn slow_greeting_fragment_holds_back_the_next() {
    let synth = MockSynthesizer::new().with_delay(
        "Hello, thanks for calling.",
        Duration::from_millis(500),
    );
    let call = Call::start(ScriptedModel::new(), synth, SessionSettings::default());

    settle().await;
    assert!(call.transport.played().is_empty());

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(
        call.transport.played(),
        vec![GREETING_1.to_vec(), GREETING_2.to_vec()]
    );
    call.hang_up().await;
}

#[tokio::test(start_paused = true)]
async fn stalled_fragment_is_skipped_after_timeout() {
    let settings = SessionSettings {
        stall_timeout: Duration::from_secs(1),
        ..SessionSettings::default()
    };
    let synth = MockSynthesizer::new().with_hang_for("Hello, thanks for calling.");
    let call = Call::start(ScriptedModel::new(), synth, settings);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(call.transport.played().is_empty());

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(call.transport.played(), vec![GREETING_2.to_vec()]);

    let summary = call.hang_up().await;
    assert_eq!(summary.fragments_played, 1);
    assert_eq!(summary.fragments_skipped, 1);
}

#[tokio::test(start_paused = true)]
async fn failed_render_is_skipped_without_waiting() {
    let synth = MockSynthesizer::new().with_failure_for("Hello, thanks for calling.");
    let call = Call::start(ScriptedModel::new(), synth, SessionSettings::default());
    settle().await;

    assert_eq!(call.transport.played(), vec![GREETING_2.to_vec()]);
    let summary = call.hang_up().await;
    assert_eq!(summary.fragments_skipped, 1);
}

#[tokio::test(start_paused = true)]
async fn interruption_clears_playback_once_and_silences_the_turn() {
    let model = ScriptedModel::new()
        .with_slow_reply(
            &["Once upon •", " a time •", " there was a fox."],
            Duration::from_secs(1),
        )
        .with_reply(&["Okay."]);
    let call = Call::start(model.clone(), MockSynthesizer::new(), SessionSettings::default());
    settle().await;
    call.ack_all().await;

    call.say("tell me a story").await;
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(
        played_after_greeting(&call.transport),
        vec![b"Once upon".to_vec()]
    );

    // Two partials from the same utterance: only the first interrupts
    call.mumble("wait, hold on").await;
    call.mumble("wait, hold on a second").await;
    settle().await;
    assert_eq!(call.transport.clear_count(), 1);

    tokio::time::sleep(Duration::from_secs(5)).await;
    let events = call.transport.events();
    let clear_at = events
        .iter()
        .position(|e| *e == TransportEvent::Clear)
        .unwrap();
    assert!(
        events[clear_at + 1..]
            .iter()
            .all(|e| !matches!(e, TransportEvent::Audio { .. })),
        "audio sent after interruption: {:?}",
        &events[clear_at + 1..]
    );

    call.say("never mind").await;
    settle().await;
    assert_eq!(
        call.transport.played().last().unwrap(),
        &b"Okay.".to_vec()
    );

    // The interrupted reply never made it into history
    let requests = model.requests();
    assert_eq!(requests.len(), 2);
    assert!(
        requests[1]
            .iter()
            .all(|m| !(m.role == Role::Assistant && m.content.contains("Once upon")))
    );

    let summary = call.hang_up().await;
    assert_eq!(summary.interruptions, 1);
    assert_eq!(summary.turns, 2);
}

#[tokio::test(start_paused = true)]
async fn short_partials_do_not_interrupt() {
    let call = Call::start(
        ScriptedModel::new(),
        MockSynthesizer::new(),
        SessionSettings::default(),
    );
    settle().await;

    // Greeting marks are still outstanding, but "uh" is filler
    call.mumble("uh").await;
    call.mumble("  mm  ").await;
    settle().await;
    assert_eq!(call.transport.clear_count(), 0);

    let summary = call.hang_up().await;
    assert_eq!(summary.interruptions, 0);
}

#[tokio::test(start_paused = true)]
async fn model_failure_abandons_reply_and_call_continues() {
    let model = ScriptedModel::new()
        .with_failure_after(&["Partial answer •", " never spoken"])
        .with_reply(&["Back again."]);
    let call = Call::start(model.clone(), MockSynthesizer::new(), SessionSettings::default());
    settle().await;

    call.say("first question").await;
    settle().await;
    assert_eq!(
        played_after_greeting(&call.transport),
        vec![b"Partial answer".to_vec()]
    );

    call.say("second question").await;
    settle().await;
    assert_eq!(
        played_after_greeting(&call.transport),
        vec![b"Partial answer".to_vec(), b"Back again.".to_vec()]
    );

    let history = &model.requests()[1];
    assert!(
        history
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .all(|m| !m.content.contains("Partial answer"))
    );

    let summary = call.hang_up().await;
    assert_eq!(summary.turns, 2);
}

#[tokio::test(start_paused = true)]
async fn new_utterance_supersedes_streaming_reply() {
    let model = ScriptedModel::new()
        .with_stall_after(&["Still thinking •", " and thinking"])
        .with_reply(&["New answer."]);
    let call = Call::start(model.clone(), MockSynthesizer::new(), SessionSettings::default());
    settle().await;

    call.say("first").await;
    settle().await;
    call.say("second").await;
    settle().await;

    assert_eq!(
        played_after_greeting(&call.transport),
        vec![b"Still thinking".to_vec(), b"New answer.".to_vec()]
    );

    let requests = model.requests();
    assert_eq!(requests.len(), 2);
    let users: Vec<&str> = requests[1]
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(users, vec!["first", "second"]);

    call.hang_up().await;
}

#[tokio::test(start_paused = true)]
async fn completed_reply_is_committed_to_history() {
    let model = ScriptedModel::new()
        .with_reply(&["It is •", " sunny."])
        .with_reply(&["You're welcome."]);
    let call = Call::start(model.clone(), MockSynthesizer::new(), SessionSettings::default());
    settle().await;

    call.say("weather?").await;
    settle().await;
    call.say("thanks").await;
    settle().await;

    let history = &model.requests()[1];
    let tail: Vec<(Role, &str)> = history
        .iter()
        .skip(3)
        .map(|m| (m.role, m.content.as_str()))
        .collect();
    assert_eq!(
        tail,
        vec![
            (Role::User, "weather?"),
            (Role::Assistant, "It is • sunny."),
            (Role::User, "thanks"),
        ]
    );

    let summary = call.hang_up().await;
    assert_eq!(summary.fragments_played, 5);
}

#[tokio::test(start_paused = true)]
async fn hang_up_mid_reply_ends_cleanly() {
    let model = ScriptedModel::new().with_stall_after(&["Let me check •"]);
    let synth = MockSynthesizer::new().with_hang_for("Let me check");
    let call = Call::start(model, synth, SessionSettings::default());
    settle().await;

    call.say("is my order shipped").await;
    settle().await;

    let summary = call.hang_up().await;
    assert_eq!(summary.turns, 1);
    assert_eq!(summary.fragments_played, 2);
}
