use super::common::*;
use gst::prelude::*;
use quad_viewer::pipeline::{PipelineError, PipelineOrchestrator, PipelineState, VideoPipeline};
use quad_viewer::telemetry::{IDLE_TEXT, NO_SIGNAL_TEXT};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

fn playing() -> Option<PipelineOrchestrator> {
    if !super::gst_available() {
        return None;
    }
    let config = super::create_test_config();
    let mut pipeline = orchestrator_for(&config);
    pipeline
        .build(&source_set(&config), config.output_size())
        .unwrap();
    pipeline.start(test_handle()).unwrap();
    assert!(tick_until(&mut pipeline, Duration::from_secs(5), |p| {
        p.state() == PipelineState::Playing
    }));
    Some(pipeline)
}

fn post_error(pipeline: &PipelineOrchestrator, stage: &str) {
    let element = pipeline.element(stage).unwrap();
    let message = gst::message::Error::builder(gst::ResourceError::Read, "injected failure")
        .src(&element)
        .build();
    element.post_message(message).unwrap();
}

/// A failing source is replaced by a black stand-in; the other branches keep going
#[test]
fn test_branch_error_isolates_branch() {
    let Some(mut pipeline) = playing() else {
        return;
    };
    let telemetry = pipeline.telemetry().unwrap();

    post_error(&pipeline, "src_1");
    assert!(tick_until(&mut pipeline, Duration::from_secs(2), |p| {
        p.is_branch_lost(1)
    }));

    assert!(pipeline.element("src_1").is_none());
    assert!(pipeline.element("nosignal_1").is_some());
    assert_eq!(overlay_text(&pipeline, 1), NO_SIGNAL_TEXT);
    assert!(!overlay_silent(&pipeline, 1));
    assert!(!telemetry.snapshot(1).unwrap().enabled);

    // Hiding the overlay leaves the lost cell labelled
    pipeline.toggle_overlay(false);
    assert!(!overlay_silent(&pipeline, 1));
    assert!(overlay_silent(&pipeline, 0));

    let lost_frames = telemetry.snapshot(1).unwrap().frames;
    let before = telemetry.snapshot(0).unwrap().frames;
    assert!(tick_until(&mut pipeline, Duration::from_secs(3), |_| {
        telemetry.snapshot(0).unwrap().frames > before + 5
    }));
    assert_eq!(pipeline.state(), PipelineState::Playing);
    assert_eq!(telemetry.snapshot(1).unwrap().frames, lost_frames);

    pipeline.stop();
    assert!(pipeline.pipeline().is_none());
}

/// Errors from a shared stage take the whole pipeline down
#[test]
fn test_sink_error_is_fatal() {
    let Some(mut pipeline) = playing() else {
        return;
    };

    post_error(&pipeline, "video_sink");
    let mut fatal = None;
    for _ in 0..200 {
        match pipeline.tick() {
            Ok(()) => std::thread::sleep(Duration::from_millis(10)),
            Err(err) => {
                fatal = Some(err);
                break;
            }
        }
    }

    match fatal {
        Some(PipelineError::Fatal { stage_name, detail }) => {
            info!("fatal: {} {}", stage_name, detail);
            assert_eq!(stage_name, "video_sink");
        }
        other => panic!("expected a fatal error, got {:?}", other),
    }
    assert_eq!(pipeline.state(), PipelineState::Failed);

    pipeline.stop();
    pipeline.stop();
    assert!(pipeline.pipeline().is_none());
}

/// End-of-stream on one source blanks that cell only
#[test]
fn test_source_eos_blanks_cell() {
    let Some(mut pipeline) = playing() else {
        return;
    };
    let telemetry = pipeline.telemetry().unwrap();

    let source = pipeline.element("src_2").unwrap();
    assert!(source.send_event(gst::event::Eos::new()));

    assert!(tick_until(&mut pipeline, Duration::from_secs(3), |p| {
        p.element("idle_2").is_some()
    }));
    assert!(pipeline.element("src_2").is_none());
    assert!(telemetry.snapshot(2).unwrap().idle);
    assert_ne!(pipeline.state(), PipelineState::Failed);

    // Fresh black frames keep reaching the compositor port of the cell
    let port = overlay(&pipeline, 2).static_pad("src").unwrap().peer().unwrap();
    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = delivered.clone();
    port.add_probe(gst::PadProbeType::BUFFER, move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        gst::PadProbeReturn::Ok
    });
    assert!(tick_until(&mut pipeline, Duration::from_secs(3), |_| {
        delivered.load(Ordering::SeqCst) >= 5
    }));
    assert_eq!(overlay_text(&pipeline, 2), IDLE_TEXT);

    // Stand-in frames are not counted as source frames
    let idle_frames = telemetry.snapshot(2).unwrap().frames;
    let before = telemetry.snapshot(3).unwrap().frames;
    assert!(tick_until(&mut pipeline, Duration::from_secs(3), |_| {
        telemetry.snapshot(3).unwrap().frames > before
    }));
    assert_eq!(telemetry.snapshot(2).unwrap().frames, idle_frames);

    pipeline.stop();
    assert!(pipeline.pipeline().is_none());
}

/// A refused state change with nothing to isolate leaves the pipeline failed
#[test]
fn test_refused_state_change_fails_pipeline() {
    if !super::gst_available() {
        return;
    }
    let config = super::create_test_config();
    let mut pipeline = orchestrator_for(&config);
    pipeline
        .build(&source_set(&config), config.output_size())
        .unwrap();
    pipeline
        .element("video_sink")
        .unwrap()
        .set_property_from_str("state-error", "ready-to-paused");

    assert!(pipeline.start(test_handle()).is_err());
    assert_eq!(pipeline.state(), PipelineState::Failed);
    assert_eq!(pipeline.attach_count(), 0);

    pipeline.stop();
    assert!(pipeline.pipeline().is_none());
    assert_eq!(pipeline.state(), PipelineState::Failed);
}

/// A capture device that does not exist is isolated at startup
#[test]
fn test_missing_device_does_not_stop_other_cells() {
    if !super::gst_available() || gst::ElementFactory::find("v4l2src").is_none() {
        return;
    }
    let mut config = super::create_test_config();
    config.sources[0].test_pattern = None;
    config.sources[0].device = "/dev/quad-viewer-missing-device".to_string();

    let mut pipeline = orchestrator_for(&config);
    pipeline
        .build(&source_set(&config), config.output_size())
        .unwrap();
    pipeline.start(test_handle()).unwrap();

    assert!(tick_until(&mut pipeline, Duration::from_secs(5), |p| {
        p.state() == PipelineState::Playing
    }));
    assert!(pipeline.is_branch_lost(0));
    assert!(pipeline.element("nosignal_0").is_some());
    assert_eq!(pipeline.attach_count(), 1);

    pipeline.stop();
}

#[test]
fn test_odd_output_size_fails_build() {
    if !super::gst_available() {
        return;
    }
    let config = super::create_test_config();
    let mut pipeline = orchestrator_for(&config);
    let result = pipeline.build(
        &source_set(&config),
        quad_viewer::pipeline::layout::Dimensions::new(639, 480),
    );
    assert!(matches!(result, Err(PipelineError::CapsNegotiation(_))));
    assert!(pipeline.pipeline().is_none());
    assert_eq!(pipeline.state(), PipelineState::Unbuilt);
}
