use super::common::*;
use gst::prelude::*;
use quad_viewer::coordinator::{Coordinator, ExitReason, LoopControl};
use quad_viewer::pipeline::layout::Dimensions;
use quad_viewer::pipeline::{GraphPlan, PipelineError, PipelineState, SinkChoice, VideoPipeline};
use quad_viewer::window::InputEvent;
use quad_viewer::QuadViewerError;
use std::time::{Duration, Instant};
use tracing::info;

/// 3840x2160 output places the four ports on a 1920x1080 grid
#[test]
fn test_uhd_compositor_pads() {
    if !super::gst_available() {
        return;
    }
    let mut config = super::create_test_config();
    config.video.output_width = 3840;
    config.video.output_height = 2160;

    let mut pipeline = orchestrator_for(&config);
    pipeline
        .build(&source_set(&config), config.output_size())
        .unwrap();

    let comp = pipeline.element("comp").unwrap();
    let mut placed: Vec<(i32, i32, i32, i32)> = comp
        .sink_pads()
        .iter()
        .map(|pad| {
            (
                pad.property::<i32>("xpos"),
                pad.property::<i32>("ypos"),
                pad.property::<i32>("width"),
                pad.property::<i32>("height"),
            )
        })
        .collect();
    placed.sort();
    assert_eq!(
        placed,
        vec![
            (0, 0, 1920, 1080),
            (0, 1080, 1920, 1080),
            (1920, 0, 1920, 1080),
            (1920, 1080, 1920, 1080),
        ]
    );

    pipeline.stop();
}

#[test]
fn test_plan_is_rejected_for_uneven_output() {
    let config = super::create_test_config();
    let err = GraphPlan::build(
        &source_set(&config),
        Dimensions::new(641, 480),
        SinkChoice::FakeSink,
    )
    .unwrap_err();
    info!("rejected: {}", err);
    assert!(matches!(err, PipelineError::CapsNegotiation(_)));
}

/// Full coordinator run: window, graph, deferred attach, overlay timer, close
#[test]
fn test_coordinator_lifecycle() {
    if !super::gst_available() {
        return;
    }
    let config = super::create_test_config();
    let window = HeadlessWindow::new();
    let events = window.events.clone();
    let destroyed = window.destroyed.clone();
    let pipeline = orchestrator_for(&config);

    let mut coordinator = Coordinator::new(config, window, pipeline);
    let t0 = Instant::now();
    coordinator.start_at(t0).unwrap();
    assert_eq!(coordinator.pipeline().attach_count(), 0);

    let deadline = t0 + Duration::from_secs(5);
    let mut now = t0;
    while coordinator.pipeline().state() != PipelineState::Playing && Instant::now() < deadline {
        events.lock().push_back(InputEvent::MouseMove { x: 1, y: 1 });
        now = Instant::now();
        assert_eq!(coordinator.step(now).unwrap(), LoopControl::Continue);
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(coordinator.pipeline().state(), PipelineState::Playing);
    assert_eq!(coordinator.pipeline().attach_count(), 1);
    assert!(!overlay_silent(coordinator.pipeline(), 0));

    // Quiet period longer than hide_after_ms hides every overlay
    coordinator.step(now + Duration::from_millis(400)).unwrap();
    assert!(!coordinator.overlay().is_visible());
    for branch in 0..4 {
        assert!(overlay_silent(coordinator.pipeline(), branch));
    }

    events.lock().push_back(InputEvent::MouseMove { x: 100, y: 80 });
    coordinator.step(now + Duration::from_millis(500)).unwrap();
    assert!(!overlay_silent(coordinator.pipeline(), 3));

    let status = coordinator.status();
    assert!(status.running);
    assert_eq!(status.sources.len(), 4);

    events.lock().push_back(InputEvent::CloseRequested);
    assert_eq!(
        coordinator.step(now + Duration::from_millis(600)).unwrap(),
        LoopControl::Exit(ExitReason::CloseRequested)
    );

    coordinator.shutdown();
    assert!(coordinator.pipeline().pipeline().is_none());
    assert_eq!(*destroyed.lock(), 1);
    coordinator.shutdown();
    assert_eq!(*destroyed.lock(), 1);
}

#[test]
fn test_size_mismatch_builds_nothing() {
    if !super::gst_available() {
        return;
    }
    let config = super::create_test_config();
    let window = HeadlessWindow::new().with_size(Dimensions::new(800, 600));
    let destroyed = window.destroyed.clone();

    let mut coordinator = Coordinator::new(config, window, orchestrator_for(&super::create_test_config()));
    assert!(matches!(
        coordinator.start(),
        Err(QuadViewerError::SizeMismatch { .. })
    ));
    assert!(coordinator.pipeline().pipeline().is_none());
    assert_eq!(*destroyed.lock(), 1);
}

#[tokio::test]
async fn test_run_loop_until_exit_key() {
    if !super::gst_available() {
        return;
    }
    let config = super::create_test_config();
    let window = HeadlessWindow::new();
    let events = window.events.clone();

    let mut coordinator = Coordinator::new(config, window, orchestrator_for(&super::create_test_config()));
    coordinator.start().unwrap();
    events.lock().push_back(InputEvent::KeyPress {
        code: 24,
        keysym: quad_viewer::window::keysym::LOWER_Q,
    });

    let reason = coordinator.run_loop().await.unwrap();
    assert_eq!(reason, ExitReason::ExitKey);
    coordinator.shutdown();
    assert_eq!(coordinator.pipeline().state(), PipelineState::Stopped);
}

#[test]
fn test_overlay_text_tracks_frames() {
    if !super::gst_available() {
        return;
    }
    let config = super::create_test_config();
    let mut pipeline = orchestrator_for(&config);
    pipeline
        .build(&source_set(&config), config.output_size())
        .unwrap();
    pipeline.start(test_handle()).unwrap();

    let telemetry = pipeline.telemetry().unwrap();
    assert!(tick_until(&mut pipeline, Duration::from_secs(5), |_| {
        telemetry.snapshot(2).is_some_and(|s| s.frames >= 10)
    }));

    let text = overlay_text(&pipeline, 2);
    assert!(text.contains(" fps / "), "unexpected overlay text {:?}", text);
    assert!(text.ends_with(" ms"));
    pipeline.stop();
}
