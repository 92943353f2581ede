pub mod common;
pub mod failure_injection;
pub mod scenarios;

use quad_viewer::config::Config;
use quad_viewer::pipeline::SinkChoice;

const REQUIRED_FACTORIES: &[&str] = &[
    "videotestsrc",
    "videoconvert",
    "videoscale",
    "capsfilter",
    "textoverlay",
    "compositor",
    "fakesink",
];

pub fn init_test_environment() {
    gst::init().ok();

    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// True when every element a headless graph needs is installed
pub fn gst_available() -> bool {
    init_test_environment();
    REQUIRED_FACTORIES
        .iter()
        .all(|name| gst::ElementFactory::find(name).is_some())
}

/// Small headless configuration: test patterns, fakesink, 640x480 output
pub fn create_test_config() -> Config {
    let mut config = Config::default();
    config.window.width = 640;
    config.window.height = 480;
    config.video.output_width = 640;
    config.video.output_height = 480;
    config.video.sink = SinkChoice::FakeSink;
    for (source, pattern) in config
        .sources
        .iter_mut()
        .zip(["smpte", "ball", "snow", "pinwheel"])
    {
        source.test_pattern = Some(pattern.to_string());
        source.width = 320;
        source.height = 240;
    }
    config.overlay.hide_after_ms = 300;
    config.runtime.tick_interval_ms = 10;
    config
}
