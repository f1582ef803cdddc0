//! Coordinator scenarios: warm-up, recording, turns, barge-in, cooldown.

use crate::helpers::{Harness, ScriptedAssistant, silence, test_config, trigger};
use hark::RuntimeEvent;
use hark::audio::PlaybackOutcome;
use hark::config::ms_to_samples;
use hark::pipeline::coordinator::Signal;
use hark::pipeline::state::{PlaybackStatus, Readiness, RecordingStatus};
use hark::runtime::DegradedMode;
use hark::vad::StopReason;
use std::time::Duration;

#[tokio::test]
async fn wake_record_and_answer_end_to_end() {
    let mut h = Harness::new(test_config());

    // Buffers fill within 2.2s of audio; detections are not trusted yet.
    h.feed(&silence(2_200));
    assert_eq!(h.coordinator.readiness(), Readiness::WarmingUp);

    h.warm_up(5_000);
    assert_eq!(
        h.coordinator.readiness(),
        Readiness::Ready { degraded: false }
    );
    let events = h.drain_events();
    assert!(events.contains(&RuntimeEvent::Readiness(Readiness::WarmingUp)));
    assert!(events.contains(&RuntimeEvent::StartupAnnouncementReady));

    h.feed(&trigger());
    assert_eq!(h.coordinator.recording_status(), RecordingStatus::Recording);
    let session = h.coordinator.recording().unwrap();
    assert_eq!(session.preroll_samples(), ms_to_samples(16_000, 300));
    assert!(!session.samples().is_empty());

    h.feed(&crate::helpers::sine(220.0, 1_000, 0.3));
    assert_eq!(h.coordinator.recording_status(), RecordingStatus::Recording);
    h.feed(&silence(1_500));
    assert_eq!(h.coordinator.recording_status(), RecordingStatus::Idle);

    let events = h.drain_events();
    let captured = events
        .iter()
        .find_map(|e| match e {
            RuntimeEvent::UtteranceCaptured {
                duration,
                preroll,
                reason,
            } => Some((*duration, *preroll, *reason)),
            _ => None,
        })
        .expect("utterance captured");
    assert!(captured.0 >= Duration::from_millis(600));
    assert!(captured.0 <= Duration::from_millis(15_000));
    assert_eq!(captured.1, Duration::from_millis(300));
    assert_eq!(captured.2, StopReason::Silence);
    assert!(events.contains(&RuntimeEvent::Recording(RecordingStatus::Finalizing)));

    // Turn result comes back as a signal; the reply starts playing.
    h.pump().await;
    assert_eq!(h.coordinator.playback_status(), PlaybackStatus::Playing);
    {
        let seen = h.transcriber.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(!seen[0].samples.is_empty());
    }
    assert_eq!(h.coordinator.history().len(), 2);

    h.pump().await;
    assert_eq!(h.coordinator.playback_status(), PlaybackStatus::Cooldown);
    assert_eq!(h.sink.clips.lock().unwrap().len(), 1);
    let events = h.drain_events();
    assert!(events.contains(&RuntimeEvent::Transcript("turn on the lamp".into())));
    assert!(events.contains(&RuntimeEvent::AssistantReply("ok".into())));
    assert!(events.contains(&RuntimeEvent::PlaybackFinished(PlaybackOutcome::Completed)));
}

#[tokio::test]
async fn trigger_during_warmup_is_suppressed() {
    let mut h = Harness::new(test_config());
    h.feed(&silence(2_200));
    h.feed(&trigger());
    assert_eq!(h.coordinator.recording_status(), RecordingStatus::Idle);
    assert!(
        !h.drain_events()
            .iter()
            .any(|e| matches!(e, RuntimeEvent::WakeWordDetected { .. }))
    );
}

#[tokio::test]
async fn second_trigger_while_recording_is_rejected() {
    let mut h = Harness::new(test_config());
    h.warm_up(6_000);
    h.feed(&trigger());
    // Keep talking loudly: once the embedding window refills every chunk triggers.
    h.feed(&crate::helpers::sine(880.0, 2_000, 0.5));

    assert_eq!(h.coordinator.recording_status(), RecordingStatus::Recording);
    let events = h.drain_events();
    let detections = events
        .iter()
        .filter(|e| matches!(e, RuntimeEvent::WakeWordDetected { .. }))
        .count();
    let sessions = events
        .iter()
        .filter(|e| **e == RuntimeEvent::Recording(RecordingStatus::Recording))
        .count();
    assert!(detections > 1);
    assert_eq!(sessions, 1);
}

#[tokio::test]
async fn barge_in_cancels_reply_playback() {
    let mut h = Harness::with(test_config(), true, ScriptedAssistant::default(), 5_000);
    h.warm_up(6_000);
    h.speak_command();

    h.pump().await;
    assert_eq!(h.coordinator.playback_status(), PlaybackStatus::Playing);
    let reply = h.coordinator.active_playback().cloned().unwrap();
    h.drain_events();

    h.feed(&trigger());
    assert_eq!(h.coordinator.recording_status(), RecordingStatus::Recording);
    assert_eq!(h.coordinator.playback_status(), PlaybackStatus::Idle);
    assert!(h.drain_events().contains(&RuntimeEvent::BargeIn));

    let outcome = tokio::time::timeout(Duration::from_millis(100), reply.completion())
        .await
        .expect("cancel settles within budget");
    assert_eq!(outcome, PlaybackOutcome::Cancelled);

    // The cancelled playback's late report is stale and changes nothing.
    h.pump().await;
    assert_eq!(h.coordinator.playback_status(), PlaybackStatus::Idle);
}

#[tokio::test]
async fn barge_in_cancels_turn_in_flight() {
    let assistant = ScriptedAssistant {
        delay: Duration::from_secs(30),
        ..ScriptedAssistant::default()
    };
    let mut h = Harness::with(test_config(), false, assistant, 200);
    h.warm_up(6_000);
    h.speak_command();
    h.drain_events();

    h.feed(&trigger());
    assert!(h.drain_events().contains(&RuntimeEvent::BargeIn));

    match h.next_signal().await {
        Signal::TurnFinished { result, .. } => {
            assert!(matches!(
                result,
                Ok(hark::pipeline::turn::TurnOutcome::Cancelled)
            ));
        }
        other => panic!("unexpected signal {other:?}"),
    }
    assert!(h.coordinator.history().is_empty());
}

#[tokio::test(start_paused = true)]
async fn warmup_timeout_proceeds_degraded() {
    let mut config = test_config();
    config.wakeword.warmup_timeout_ms = 1_000;
    let mut h = Harness::new(config);

    h.feed(&silence(80));
    assert_eq!(h.coordinator.readiness(), Readiness::Cold);

    tokio::time::advance(Duration::from_millis(999)).await;
    h.coordinator.on_tick();
    assert_eq!(h.coordinator.readiness(), Readiness::Cold);

    tokio::time::advance(Duration::from_millis(1)).await;
    h.coordinator.on_tick();
    assert_eq!(
        h.coordinator.readiness(),
        Readiness::Ready { degraded: true }
    );
    let events = h.drain_events();
    assert!(events.contains(&RuntimeEvent::Degraded(DegradedMode::WarmupTimedOut)));
    assert!(events.contains(&RuntimeEvent::StartupAnnouncementReady));
}

#[tokio::test(start_paused = true)]
async fn cooldown_follows_playback_and_expires() {
    let mut config = test_config();
    config.playback.feedback_tone = true;
    config.wakeword.warmup_ms = 0;
    let mut h = Harness::new(config);
    h.warm_up(3_000);

    h.feed(&trigger());
    assert_eq!(h.coordinator.playback_status(), PlaybackStatus::Playing);
    h.pump().await;
    assert_eq!(h.coordinator.playback_status(), PlaybackStatus::Cooldown);

    tokio::time::advance(Duration::from_millis(799)).await;
    h.coordinator.on_tick();
    assert_eq!(h.coordinator.playback_status(), PlaybackStatus::Cooldown);

    tokio::time::advance(Duration::from_millis(1)).await;
    h.coordinator.on_tick();
    assert_eq!(h.coordinator.playback_status(), PlaybackStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn trigger_interrupts_cooldown() {
    let mut config = test_config();
    config.playback.feedback_tone = true;
    config.wakeword.warmup_ms = 0;
    let mut h = Harness::new(config);
    h.warm_up(3_000);

    h.feed(&trigger());
    h.pump().await;
    assert_eq!(h.coordinator.playback_status(), PlaybackStatus::Cooldown);

    // End the silent session; paused time keeps the cooldown open.
    h.feed(&silence(3_000));
    assert_eq!(h.coordinator.recording_status(), RecordingStatus::Idle);
    h.drain_events();

    h.feed(&trigger());
    assert_eq!(h.coordinator.recording_status(), RecordingStatus::Recording);
    let events = h.drain_events();
    let idle = events
        .iter()
        .position(|e| *e == RuntimeEvent::Playback(PlaybackStatus::Idle))
        .expect("cooldown interrupted");
    let playing = events
        .iter()
        .position(|e| *e == RuntimeEvent::Playback(PlaybackStatus::Playing))
        .expect("feedback tone started");
    assert!(idle < playing);
}

#[tokio::test]
async fn startup_announcement_plays_once_ready() {
    let mut config = test_config();
    config.wakeword.warmup_ms = 0;
    config.conversation.startup_announcement = Some("Hark is listening".into());
    let mut h = Harness::new(config);

    h.warm_up(3_000);
    assert_eq!(h.coordinator.playback_status(), PlaybackStatus::Playing);
    assert!(h.coordinator.active_playback().unwrap().is_interruptible());

    h.pump().await;
    assert_eq!(h.sink.clips.lock().unwrap().len(), 1);
    assert_eq!(h.coordinator.playback_status(), PlaybackStatus::Cooldown);
}

#[tokio::test]
async fn silent_session_ends_after_grace_period() {
    let mut h = Harness::new(test_config());
    h.warm_up(6_000);
    h.feed(&trigger());
    h.feed(&silence(3_000));
    assert_eq!(h.coordinator.recording_status(), RecordingStatus::Idle);

    h.pump().await;
    assert!(h.transcriber.seen.lock().unwrap()[0].samples.len() >= ms_to_samples(16_000, 1_500));
}
