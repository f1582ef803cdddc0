//! Tool server connection retry contract.

use crate::helpers::{FlakyConnector, Harness, test_config};
use hark::RuntimeEvent;
use hark::config::ToolsConfig;
use hark::runtime::DegradedMode;
use hark::tools::ToolConnectionManager;
use std::time::Duration;
use tokio::time::Instant;

const BASE_DELAY: Duration = Duration::from_millis(2_000);

#[tokio::test(start_paused = true)]
async fn fails_twice_then_connects_on_third_attempt() {
    let connector = FlakyConnector::new(2);
    let manager = ToolConnectionManager::new(connector.clone(), &ToolsConfig::default());

    let started = Instant::now();
    let connected = manager.connect(3, BASE_DELAY).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(connected.attempts, 3);
    assert_eq!(connected.tools[0].name, "mqtt_publish");
    assert_eq!(connector.calls(), 3);
    // 0 before attempt 1, 2000 before attempt 2, 4000 before attempt 3.
    assert!(elapsed >= Duration::from_millis(6_000), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(6_100), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn always_failing_stops_after_exactly_three_attempts() {
    let connector = FlakyConnector::new(u32::MAX);
    let manager = ToolConnectionManager::new(connector.clone(), &ToolsConfig::default());

    let err = manager.connect(3, BASE_DELAY).await.unwrap_err();

    assert_eq!(err.attempts, 3);
    assert_eq!(connector.calls(), 3);
    assert!(!err.ceiling_hit);
    assert_eq!(err.last_error, "attempt 3: connection refused");
    assert_eq!(err.diagnostics.len(), 3);
    assert!(err.diagnostics[0].contains("broker unreachable"));
}

#[tokio::test(start_paused = true)]
async fn first_success_makes_one_attempt_without_waiting() {
    let connector = FlakyConnector::new(0);
    let manager = ToolConnectionManager::new(connector.clone(), &ToolsConfig::default());

    let started = Instant::now();
    let connected = manager.connect(3, BASE_DELAY).await.unwrap();
    assert_eq!(connected.attempts, 1);
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn pipeline_degrades_when_tools_are_unreachable() {
    let mut config = test_config();
    config.tools.max_attempts = 2;
    let mut h = Harness::new(config.clone());

    let manager = ToolConnectionManager::new(FlakyConnector::new(u32::MAX), &config.tools);
    h.coordinator.connect_tools(manager);
    h.pump().await;

    assert!(h.coordinator.tools().is_none());
    let degraded = h.drain_events().into_iter().find_map(|e| match e {
        RuntimeEvent::Degraded(DegradedMode::ToolsUnavailable { attempts, .. }) => Some(attempts),
        _ => None,
    });
    assert_eq!(degraded, Some(2));
}

#[tokio::test(start_paused = true)]
async fn pipeline_adopts_tools_once_connected() {
    let config = test_config();
    let mut h = Harness::new(config.clone());

    let manager = ToolConnectionManager::new(FlakyConnector::new(1), &config.tools);
    h.coordinator.connect_tools(manager);
    h.pump().await;

    let tools = h.coordinator.tools().expect("tools connected");
    assert_eq!(tools.attempts, 2);
    assert!(h.drain_events().contains(&RuntimeEvent::ToolsConnected {
        tools: vec!["mqtt_publish".into()],
        attempts: 2,
    }));
}
