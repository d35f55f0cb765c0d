//! Output device discovery and selection.
//!
//! Thin wrappers around CPAL used by the sink thread: select a device by name
//! substring (or the host default) and choose the supported config closest to
//! the pipeline's target sample rate.

use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::{PlayerError, Result};

/// Pick the first output device whose name contains `needle`
/// (case-insensitive), or the host default when no needle is given.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    match needle {
        Some(needle) => {
            let devices = host
                .output_devices()
                .map_err(|e| PlayerError::SinkOpenFailed(format!("no output devices: {e}")))?;
            for device in devices {
                let matched = device
                    .description()
                    .map(|d| name_matches(&d.to_string(), needle))
                    .unwrap_or(false);
                if matched {
                    return Ok(device);
                }
            }
            Err(PlayerError::SinkOpenFailed(format!(
                "no output device matched: {needle}"
            )))
        }
        None => host
            .default_output_device()
            .ok_or_else(|| PlayerError::SinkOpenFailed("no default output device".into())),
    }
}

/// Choose the supported output config closest to `target_rate`.
///
/// Preference order: a rate at or below the target beats one above it (the
/// resampler then downconverts rather than upconverts), then the highest such
/// rate, then the friendliest sample format.
pub fn pick_output_config(
    device: &cpal::Device,
    target_rate: Option<u32>,
) -> Result<cpal::SupportedStreamConfig> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> = device
        .supported_output_configs()
        .map_err(|e| PlayerError::SinkOpenFailed(format!("supported configs: {e}")))?
        .collect();

    if ranges.is_empty() {
        return device
            .default_output_config()
            .map_err(|e| PlayerError::SinkOpenFailed(format!("no output configs: {e}")));
    }

    let mut best: Option<((bool, u32, u8), cpal::SupportedStreamConfig)> = None;
    for range in ranges {
        let rate = clamp_rate(range.min_sample_rate(), range.max_sample_rate(), target_rate);
        let at_or_below = target_rate.map(|t| rate <= t).unwrap_or(true);
        let key = (at_or_below, rate, format_preference(range.sample_format()));
        let config = range.with_sample_rate(rate);
        if best.as_ref().map(|(k, _)| key > *k).unwrap_or(true) {
            best = Some((key, config));
        }
    }

    match best {
        Some((_, config)) => Ok(config),
        None => Err(PlayerError::SinkOpenFailed("no output configs".into())),
    }
}

/// Prefer a fixed stream buffer size, capped to keep latency sane.
///
/// Returns `None` when the device only supports its default size.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    const MAX_FRAMES: u32 = 16_384;
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            let chosen = (*max).min(MAX_FRAMES).max(*min);
            Some(cpal::BufferSize::Fixed(chosen))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Names of the host's output devices, for selection UIs.
pub fn list_output_devices(host: &cpal::Host) -> Result<Vec<String>> {
    let devices = host
        .output_devices()
        .map_err(|e| PlayerError::SinkOpenFailed(format!("no output devices: {e}")))?;
    let mut names = Vec::new();
    for device in devices {
        match device.description() {
            Ok(d) => names.push(d.to_string()),
            Err(e) => tracing::debug!("skipping unnameable device: {e}"),
        }
    }
    Ok(names)
}

fn clamp_rate(min: u32, max: u32, target: Option<u32>) -> u32 {
    match target {
        Some(t) if t < min => min,
        Some(t) if t > max => max,
        Some(t) => t,
        None => max,
    }
}

fn format_preference(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 4,
        cpal::SampleFormat::I32 => 3,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 1,
        _ => 0,
    }
}

fn name_matches(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    !needle.is_empty() && name.to_lowercase().contains(&needle.to_lowercase())
}
