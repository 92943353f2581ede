mod integration;

use integration::common::*;
use quad_viewer::pipeline::{PipelineState, VideoPipeline};
use std::time::Duration;
use tracing::info;

/// Headless end-to-end run: four test sources reach Playing and report frames
#[test]
fn test_headless_smoke() {
    if !integration::gst_available() {
        return;
    }
    let config = integration::create_test_config();
    let mut pipeline = orchestrator_for(&config);

    pipeline
        .build(&source_set(&config), config.output_size())
        .unwrap();
    pipeline.start(test_handle()).unwrap();
    assert!(tick_until(&mut pipeline, Duration::from_secs(5), |p| {
        p.state() == PipelineState::Playing
    }));

    let telemetry = pipeline.telemetry().unwrap();
    assert!(tick_until(&mut pipeline, Duration::from_secs(5), |_| {
        telemetry.snapshots().iter().all(|s| s.frames >= 5)
    }));

    for snapshot in telemetry.snapshots() {
        info!("cell {}: {:.1} fps, {:?}", snapshot.cell, snapshot.fps, snapshot.latency);
        assert!(snapshot.enabled);
        assert!(snapshot.fps > 0.0);
    }

    pipeline.stop();
    assert_eq!(pipeline.state(), PipelineState::Stopped);
}
