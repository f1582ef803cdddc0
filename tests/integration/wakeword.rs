//! Wake word warm-up protocol through the public detector API.

use crate::helpers::{LoudnessModel, RATE, silence, trigger};
use futures_util::FutureExt;
use hark::config::WakewordConfig;
use hark::pipeline::state::Readiness;
use hark::wakeword::{WakeWordDetector, WarmupOutcome};

fn detector(warmup_ms: u32) -> WakeWordDetector {
    let config = WakewordConfig {
        warmup_ms,
        ..WakewordConfig::default()
    };
    WakeWordDetector::new(Box::new(LoudnessModel), &config, RATE).unwrap()
}

#[tokio::test]
async fn every_waiter_sees_one_warmup_completion() {
    let mut d = detector(500);
    let waiters: Vec<_> = (0..3).map(|_| tokio::spawn(d.warmup())).collect();
    assert!(d.warmup().ptr_eq(&d.warmup()));

    // 2.2s fills both buffers; 0.5s more stabilizes.
    d.process(&silence(2_200));
    assert_eq!(d.readiness(), Readiness::WarmingUp);
    d.process(&silence(600));
    assert_eq!(d.readiness(), Readiness::Ready { degraded: false });

    for waiter in waiters {
        assert_eq!(waiter.await.unwrap(), WarmupOutcome::Stable);
    }
    // Already resolved: immediate on every later call.
    assert_eq!(d.warmup().now_or_never(), Some(WarmupOutcome::Stable));
}

#[test]
fn trigger_after_reset_needs_fresh_embeddings_but_no_new_warmup() {
    let mut d = detector(0);
    d.process(&silence(2_000));
    assert!(d.is_ready());

    let hit = d.process(&trigger());
    assert!(hit.iter().any(|r| r.triggered));

    d.reset();
    let again = d.process(&trigger());
    assert!(again.iter().all(|r| !r.triggered));
    assert_eq!(d.readiness(), Readiness::Ready { degraded: false });

    d.process(&silence(1_200));
    let later = d.process(&trigger());
    assert!(later.iter().any(|r| r.triggered));
}
