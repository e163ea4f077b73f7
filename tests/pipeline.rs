//! End-to-end return sessions over synthetic cameras

use std::time::Duration;

use scooter_dock::actuators::Pattern;
use scooter_dock::session::{Mode, StartOutcome};

mod common;
use common::{Harness, RecordingUploader, TARGET};

#[tokio::test(start_paused = true)]
async fn confident_and_forced_uploads_complete_once() {
    let harness = Harness::start(vec![0.85, 0.10], RecordingUploader::default());
    let started = harness.begin("req-1").await;

    tokio::time::sleep(Duration::from_secs(12)).await;

    // Camera 0 clears the threshold on its first frame
    let cam0 = harness.uploader.for_camera("cam0");
    assert_eq!(cam0.len(), 1);
    assert!(cam0[0].at - started < Duration::from_secs(1));
    assert_eq!(cam0[0].metadata.credential, TARGET);
    assert_eq!(cam0[0].metadata.request_id.as_deref(), Some("req-1"));
    assert!(cam0[0].bytes > 0);

    // Camera 1 never does and goes out on the forced-send gate
    let cam1 = harness.uploader.for_camera("cam1");
    assert_eq!(cam1.len(), 1);
    assert!(cam1[0].at - started >= Duration::from_secs(8));

    let notices = harness.notifier.notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].request_id, "req-1");
    assert_eq!(notices[0].status, "success");

    assert_eq!(harness.state.mode(), Mode::Idle);
    assert!(harness.sound.played().contains(&Pattern::Complete));
    assert!(!harness.sound.played().contains(&Pattern::Aborted));

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn failing_uploads_end_in_watchdog_reset() {
    let harness = Harness::start(vec![0.95, 0.95], RecordingUploader::failing());
    harness.begin("req-2").await;

    tokio::time::sleep(Duration::from_millis(14_500)).await;
    assert_eq!(harness.state.mode(), Mode::Capturing);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(harness.state.mode(), Mode::Idle);

    assert!(harness.notifier.notices().is_empty());
    assert!(harness.sound.played().contains(&Pattern::Aborted));

    // Retries stop at the per-session attempt limit
    let attempts = harness.uploader.for_camera("cam0").len();
    assert!(attempts > 1);
    assert!(attempts <= 10);

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn uploads_recover_after_short_outage() {
    let harness = Harness::start(vec![0.95, 0.95], RecordingUploader::failing());
    harness.begin("req-5").await;

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(harness.uploader.for_camera("cam0").len() >= 2);
    assert!(harness.notifier.notices().is_empty());
    harness.uploader.set_failing(false);

    tokio::time::sleep(Duration::from_secs(9)).await;
    assert_eq!(harness.state.mode(), Mode::Idle);

    let notices = harness.notifier.notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].request_id, "req-5");
    assert!(!harness.sound.played().contains(&Pattern::Aborted));

    // The outage left budget for the retry that succeeded
    for camera in ["cam0", "cam1"] {
        let attempts = harness.uploader.for_camera(camera).len();
        assert!(attempts < 10, "{camera} used {attempts} attempts");
    }

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn idle_kiosk_captures_nothing() {
    let harness = Harness::start(vec![0.99], RecordingUploader::default());

    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(harness.uploader.records().is_empty());
    assert!(!harness.relay.is_active());
    assert_eq!(harness.state.mode(), Mode::Idle);

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn waiting_session_ignores_other_tags() {
    let harness = Harness::start(vec![0.99], RecordingUploader::default());

    assert!(matches!(
        harness.state.try_start(Some("req-3".to_string())),
        StartOutcome::Accepted { .. }
    ));
    assert!(!harness.gate.observe("E2000017570D0173277006CC").await);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(harness.state.mode(), Mode::WaitForTag);
    assert!(harness.uploader.records().is_empty());

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn lighting_follows_capture() {
    let harness = Harness::start(vec![0.10, 0.10], RecordingUploader::default());
    harness.begin("req-4").await;

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(harness.relay.is_active());
    assert!(harness.lighting.is_active());

    // Session completes through forced sends a little after 8 s, then the
    // last frame's extension runs out
    tokio::time::sleep(Duration::from_secs(12)).await;
    assert_eq!(harness.state.mode(), Mode::Idle);
    assert_eq!(harness.notifier.notices().len(), 1);
    assert!(!harness.relay.is_active());

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn second_session_runs_after_first_completes() {
    let harness = Harness::start(vec![0.90, 0.90], RecordingUploader::default());

    harness.begin("first").await;
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(harness.state.mode(), Mode::Idle);

    harness.begin("second").await;
    tokio::time::sleep(Duration::from_secs(4)).await;

    let ids: Vec<String> = harness
        .notifier
        .notices()
        .into_iter()
        .map(|n| n.request_id)
        .collect();
    assert_eq!(ids, vec!["first".to_string(), "second".to_string()]);
    assert_eq!(harness.uploader.for_camera("cam1").len(), 2);

    harness.stop().await;
}
