//! Audio endpoint enumeration and selection.
//!
//! Devices are snapshotted into plain `DeviceInfo` records; the selection
//! policies are pure functions over that snapshot so they can be exercised
//! without real hardware.

use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::EngineError;

/// Name fragments that identify virtual endpoints a physical mic must not be.
const VIRTUAL_MIC_EXCLUDE: &[&str] = &["blackhole", "vb-cable", "aggregate", "multi-output"];

/// Microphone ranking, best first.
const MIC_PRIORITY: &[&str] = &["jabra", "evolve", "built-in", "macbook pro microphone"];

/// Name fragments that identify the virtual output (TTS sink).
const VIRTUAL_OUTPUT_KEYWORDS: &[&str] = &["blackhole", "vb-cable", "vb cable"];

/// Name fragments that identify a capturable system-audio loopback.
const LOOPBACK_KEYWORDS: &[&str] = &["blackhole", "vb-cable", "loopback", "voicemeeter"];

/// Snapshot of one audio endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub index: usize,
    pub name: String,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
    pub is_default_input: bool,
    pub is_default_output: bool,
}

impl DeviceInfo {
    fn name_matches(&self, keywords: &[&str]) -> bool {
        let lower = self.name.to_lowercase();
        keywords.iter().any(|k| lower.contains(k))
    }
}

/// Enumerates audio endpoints and applies the selection policies.
#[derive(Debug, Default)]
pub struct DeviceDirectory {
    devices: Vec<DeviceInfo>,
}

impl DeviceDirectory {
    /// Enumerate all endpoints on the default host.
    pub fn new() -> Self {
        let mut dir = Self { devices: Vec::new() };
        dir.refresh();
        dir
    }

    /// Build a directory from a prepared snapshot (tests).
    #[cfg(test)]
    pub(crate) fn from_snapshot(devices: Vec<DeviceInfo>) -> Self {
        Self { devices }
    }

    /// Re-enumerate endpoints.
    pub fn refresh(&mut self) {
        let host = cpal::default_host();

        let default_input = host
            .default_input_device()
            .and_then(|d| d.name().ok());
        let default_output = host
            .default_output_device()
            .and_then(|d| d.name().ok());

        let mut devices = Vec::new();
        let Ok(all) = host.devices() else {
            self.devices = devices;
            return;
        };

        for (index, dev) in all.enumerate() {
            let Ok(name) = dev.name() else { continue };
            let max_input_channels = dev
                .default_input_config()
                .map(|c| c.channels())
                .unwrap_or(0);
            let max_output_channels = dev
                .default_output_config()
                .map(|c| c.channels())
                .unwrap_or(0);

            devices.push(DeviceInfo {
                is_default_input: default_input.as_deref() == Some(name.as_str()),
                is_default_output: default_output.as_deref() == Some(name.as_str()),
                index,
                name,
                max_input_channels,
                max_output_channels,
            });
        }

        debug!(count = devices.len(), "Enumerated audio endpoints");
        self.devices = devices;
    }

    /// All known endpoints.
    pub fn devices(&self) -> &[DeviceInfo] {
        &self.devices
    }

    /// Select the physical microphone.
    ///
    /// Candidates must be input-capable and not match any virtual keyword.
    /// Ranked by the priority substring list, then the default-input flag,
    /// then device index.
    pub fn physical_mic(&self) -> Result<&DeviceInfo, EngineError> {
        let mut candidates: Vec<&DeviceInfo> = self
            .devices
            .iter()
            .filter(|d| d.max_input_channels >= 1 && !d.name_matches(VIRTUAL_MIC_EXCLUDE))
            .collect();

        if candidates.is_empty() {
            return Err(EngineError::NoPhysicalMic);
        }

        candidates.sort_by_key(|d| {
            let lower = d.name.to_lowercase();
            let priority = MIC_PRIORITY
                .iter()
                .position(|k| lower.contains(k))
                .unwrap_or(MIC_PRIORITY.len());
            (priority, !d.is_default_input, d.index)
        });

        let selected = candidates[0];
        info!(device = %selected.name, index = selected.index, "Selected physical microphone");
        Ok(selected)
    }

    /// Select the virtual output device used as the TTS sink.
    ///
    /// Requires at least two output channels and a recognized virtual name.
    pub fn virtual_output(&self) -> Result<&DeviceInfo, EngineError> {
        let selected = self
            .devices
            .iter()
            .find(|d| d.max_output_channels >= 2 && d.name_matches(VIRTUAL_OUTPUT_KEYWORDS))
            .ok_or(EngineError::NoVirtualDevice)?;

        info!(device = %selected.name, index = selected.index, "Selected virtual output device");
        Ok(selected)
    }

    /// Select the system-audio loopback input, if one exists.
    ///
    /// Absence is non-fatal: system-audio transcription is simply disabled.
    pub fn loopback_input(&self) -> Option<&DeviceInfo> {
        let selected = self
            .devices
            .iter()
            .find(|d| d.max_input_channels >= 1 && d.name_matches(LOOPBACK_KEYWORDS));

        match selected {
            Some(d) => {
                info!(device = %d.name, index = d.index, "Selected system-audio loopback");
                Some(d)
            }
            None => {
                info!("No system-audio loopback device found");
                None
            }
        }
    }
}

/// Find a cpal input device by name on the default host.
pub(crate) fn input_device_by_name(name: &str) -> Result<cpal::Device, EngineError> {
    let host = cpal::default_host();
    host.input_devices()
        .map_err(|e| EngineError::DeviceOpen(format!("enumerate input devices: {e}")))?
        .find(|d| d.name().map(|n| n == name).unwrap_or(false))
        .ok_or_else(|| EngineError::DeviceOpen(format!("input device not found: {name}")))
}

/// Find a cpal output device by name on the default host.
pub(crate) fn output_device_by_name(name: &str) -> Result<cpal::Device, EngineError> {
    let host = cpal::default_host();
    host.output_devices()
        .map_err(|e| EngineError::DeviceOpen(format!("enumerate output devices: {e}")))?
        .find(|d| d.name().map(|n| n == name).unwrap_or(false))
        .ok_or_else(|| EngineError::DeviceOpen(format!("output device not found: {name}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev(
        index: usize,
        name: &str,
        inputs: u16,
        outputs: u16,
        default_input: bool,
    ) -> DeviceInfo {
        DeviceInfo {
            index,
            name: name.to_string(),
            max_input_channels: inputs,
            max_output_channels: outputs,
            is_default_input: default_input,
            is_default_output: false,
        }
    }

    #[test]
    fn test_mic_priority_ranking() {
        let dir = DeviceDirectory::from_snapshot(vec![
            dev(0, "MacBook Pro Microphone", 1, 0, true),
            dev(1, "Jabra Evolve2 65", 1, 0, false),
            dev(2, "BlackHole 2ch", 2, 2, false),
        ]);
        // Jabra outranks the default built-in mic.
        assert_eq!(dir.physical_mic().unwrap().index, 1);
    }

    #[test]
    fn test_mic_default_breaks_ties() {
        let dir = DeviceDirectory::from_snapshot(vec![
            dev(0, "USB Audio Device", 1, 0, false),
            dev(1, "Scarlett 2i2", 1, 0, true),
        ]);
        // Neither matches a priority keyword; the default input wins.
        assert_eq!(dir.physical_mic().unwrap().index, 1);
    }

    #[test]
    fn test_mic_skips_virtual_devices() {
        let dir = DeviceDirectory::from_snapshot(vec![
            dev(0, "BlackHole 2ch", 2, 2, true),
            dev(1, "Aggregate Device", 2, 0, false),
            dev(2, "Multi-Output Device", 0, 2, false),
        ]);
        assert!(matches!(dir.physical_mic(), Err(EngineError::NoPhysicalMic)));
    }

    #[test]
    fn test_virtual_output_requires_stereo() {
        let dir = DeviceDirectory::from_snapshot(vec![
            dev(0, "BlackHole 2ch", 2, 1, false),
            dev(1, "Built-in Output", 0, 2, false),
        ]);
        assert!(matches!(
            dir.virtual_output(),
            Err(EngineError::NoVirtualDevice)
        ));

        let dir = DeviceDirectory::from_snapshot(vec![dev(0, "VB-Cable", 0, 2, false)]);
        assert_eq!(dir.virtual_output().unwrap().index, 0);
    }

    #[test]
    fn test_loopback_is_optional() {
        let dir = DeviceDirectory::from_snapshot(vec![dev(0, "Built-in Microphone", 1, 0, true)]);
        assert!(dir.loopback_input().is_none());

        let dir = DeviceDirectory::from_snapshot(vec![
            dev(0, "Built-in Microphone", 1, 0, true),
            dev(1, "VoiceMeeter Output", 2, 0, false),
        ]);
        assert_eq!(dir.loopback_input().unwrap().index, 1);
    }
}
