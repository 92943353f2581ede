use gst::prelude::*;
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::pipeline::SinkChoice;
use crate::{QuadViewerError, Result};

/// Elements every graph needs, whatever the sources and sink
const REQUIRED_ELEMENTS: &[&str] = &[
    "videoconvert",
    "videoscale",
    "capsfilter",
    "textoverlay",
    "compositor",
    // Live test sources and the NO SIGNAL stand-in
    "videotestsrc",
];

/// Elements needed only by some configurations
const OPTIONAL_ELEMENTS: &[&str] = &["v4l2src", "xvimagesink", "ximagesink", "fakesink"];

/// Represents the capabilities detected in the GStreamer installation
#[derive(Debug, Clone)]
pub struct GstCapabilities {
    pub has_xvimagesink: bool,
    pub has_ximagesink: bool,
    pub has_v4l2src: bool,
    pub available_elements: HashMap<String, bool>,
}

impl GstCapabilities {
    /// Check if a specific element is available
    pub fn has_element(&self, element: &str) -> bool {
        self.available_elements.get(element).copied().unwrap_or(false)
    }

    pub fn has_sink(&self, sink: SinkChoice) -> bool {
        sink.factories().iter().any(|f| self.has_element(f))
    }
}

/// Initialize GStreamer with error handling and logging
pub fn initialize() -> Result<GstCapabilities> {
    info!("Initializing GStreamer");

    gst::init().map_err(|e| {
        error!("Failed to initialize GStreamer: {}", e);
        QuadViewerError::GstError(e)
    })?;

    let (major, minor, micro, nano) = gst::version();
    info!("GStreamer version: {}.{}.{}.{}", major, minor, micro, nano);

    if let Ok(debug_str) = std::env::var("GST_DEBUG") {
        debug!("GST_DEBUG set to: {}", debug_str);
    }
    if let Ok(plugin_path) = std::env::var("GST_PLUGIN_PATH") {
        info!("Using custom GST_PLUGIN_PATH: {}", plugin_path);
    }

    let capabilities = discover_plugins()?;

    info!("GStreamer capabilities detected:");
    info!("  xvimagesink: {}", capabilities.has_xvimagesink);
    info!("  ximagesink: {}", capabilities.has_ximagesink);
    info!("  v4l2src: {}", capabilities.has_v4l2src);

    Ok(capabilities)
}

/// Discover available GStreamer plugins and build capability map
pub fn discover_plugins() -> Result<GstCapabilities> {
    let mut available_elements = HashMap::new();

    info!("Checking required GStreamer elements...");
    let mut missing_required = Vec::new();

    for element in REQUIRED_ELEMENTS {
        if let Some(factory) = gst::ElementFactory::find(element) {
            debug!("Found required element: {} (rank: {:?})", element, factory.rank());
            available_elements.insert(element.to_string(), true);
        } else {
            error!("Missing required element: {}", element);
            missing_required.push(*element);
            available_elements.insert(element.to_string(), false);
        }
    }

    if !missing_required.is_empty() {
        return Err(QuadViewerError::ConfigError(format!(
            "Missing required GStreamer elements: {:?}",
            missing_required
        )));
    }

    info!("All required elements found");

    for element in OPTIONAL_ELEMENTS {
        let found = gst::ElementFactory::find(element).is_some();
        debug!("Optional element {}: {}", element, if found { "found" } else { "not found" });
        available_elements.insert(element.to_string(), found);
    }

    let capabilities = GstCapabilities {
        has_xvimagesink: available_elements.get("xvimagesink").copied().unwrap_or(false),
        has_ximagesink: available_elements.get("ximagesink").copied().unwrap_or(false),
        has_v4l2src: available_elements.get("v4l2src").copied().unwrap_or(false),
        available_elements,
    };

    if !capabilities.has_xvimagesink && !capabilities.has_ximagesink {
        warn!("Neither xvimagesink nor ximagesink found; only headless output is possible");
    }

    Ok(capabilities)
}

/// Check that the configured sink and sources can be created
pub fn verify_plugins_for_config(capabilities: &GstCapabilities, config: &Config) -> Result<()> {
    if !capabilities.has_sink(config.video.sink) {
        return Err(QuadViewerError::ConfigError(format!(
            "Video sink '{}' requested but none of {:?} is available",
            config.video.sink,
            config.video.sink.factories()
        )));
    }

    let needs_v4l2 = config.sources.iter().any(|s| s.test_pattern.is_none());
    if needs_v4l2 && !capabilities.has_v4l2src {
        return Err(QuadViewerError::ConfigError(
            "Capture devices configured but v4l2src is not available (try --test-sources)"
                .to_string(),
        ));
    }

    Ok(())
}

/// Print detailed plugin information (for --check-plugins flag)
pub fn print_plugin_info(capabilities: &GstCapabilities) {
    println!("\nGStreamer Plugin Discovery Report");
    println!("==================================");

    let (major, minor, micro, nano) = gst::version();
    println!("\nGStreamer Version: {}.{}.{}.{}", major, minor, micro, nano);

    if let Ok(plugin_path) = std::env::var("GST_PLUGIN_PATH") {
        println!("Custom Plugin Path: {}", plugin_path);
    }

    println!("\nRequired Elements:");
    for element in REQUIRED_ELEMENTS {
        let status = if capabilities.has_element(element) { "✓" } else { "✗" };
        println!("  {} {}", status, element);
    }

    println!("\nOptional Elements:");
    for element in OPTIONAL_ELEMENTS {
        let status = if capabilities.has_element(element) { "✓" } else { "✗" };
        println!("  {} {}", status, element);
    }

    println!("\nVideo Sinks:");
    for sink in [SinkChoice::Auto, SinkChoice::XvImageSink, SinkChoice::XImageSink, SinkChoice::FakeSink] {
        println!(
            "  {:<12} {}",
            sink.to_string(),
            if capabilities.has_sink(sink) { "usable" } else { "unavailable" }
        );
    }

    let registry = gst::Registry::get();
    let plugins = registry.plugins();
    println!("\nRegistry Statistics:");
    println!("  Total Plugins: {}", plugins.len());
}
