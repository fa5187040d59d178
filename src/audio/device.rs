//! Audio device resolution

use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::{CaptureError, PlaybackError};

/// Resolve an input device by name, or the system default when `None`
pub fn input_device(name: Option<&str>) -> Result<cpal::Device, CaptureError> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_input_device()
            .ok_or_else(|| CaptureError::DeviceNotFound("no default input device".to_string())),
        Some(wanted) => {
            let mut devices = host
                .input_devices()
                .map_err(|e| CaptureError::DeviceNotFound(e.to_string()))?;
            devices
                .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
                .ok_or_else(|| CaptureError::DeviceNotFound(wanted.to_string()))
        }
    }
}

/// Resolve an output device by name, or the system default when `None`
pub fn output_device(name: Option<&str>) -> Result<cpal::Device, PlaybackError> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_output_device()
            .ok_or_else(|| PlaybackError::DeviceNotFound("no default output device".to_string())),
        Some(wanted) => {
            let mut devices = host
                .output_devices()
                .map_err(|e| PlaybackError::DeviceNotFound(e.to_string()))?;
            devices
                .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
                .ok_or_else(|| PlaybackError::DeviceNotFound(wanted.to_string()))
        }
    }
}

/// List input device names, for diagnostics and demo output
pub fn input_device_names() -> Vec<String> {
    let host = cpal::default_host();
    host.input_devices()
        .map(|devices| devices.filter_map(|d| d.name().ok()).collect())
        .unwrap_or_default()
}

/// List output device names
pub fn output_device_names() -> Vec<String> {
    let host = cpal::default_host();
    host.output_devices()
        .map(|devices| devices.filter_map(|d| d.name().ok()).collect())
        .unwrap_or_default()
}
