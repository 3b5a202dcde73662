//! Job configuration loaded from a JSON file.

use crate::convert::ScaleFilter;
use crate::decoder::DecoderConfig;
use crate::enhance::{FrameEnhancer, Passthrough, Upscale};
use crate::error::{Error, Result};
use crate::pipeline::TranscodeConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Enhancement stage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhanceConfig {
    /// Integer upscale factor, 1 = passthrough.
    pub scale: u32,
    pub filter: ScaleFilter,
}

impl Default for EnhanceConfig {
    fn default() -> Self {
        Self {
            scale: 1,
            filter: ScaleFilter::default(),
        }
    }
}

impl EnhanceConfig {
    pub fn enhancer(&self) -> Box<dyn FrameEnhancer> {
        match self.scale {
            0 | 1 => Box::new(Passthrough),
            factor => Box::new(Upscale::new(factor, self.filter)),
        }
    }
}

/// Everything a batch run needs besides the input list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub decoder: DecoderConfig,
    pub output: TranscodeConfig,
    pub enhance: EnhanceConfig,
    /// Seconds to skip at the start of every input.
    pub start: f64,
    pub max_frames: Option<u64>,
    /// Concurrent jobs, 0 = one per CPU.
    pub jobs: usize,
}

impl JobConfig {
    /// Read a JSON job file; missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: JobConfig = serde_json::from_str(&text)
            .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.enhance.scale > 8 {
            return Err(Error::InvalidConfig(format!(
                "scale factor {} is out of range (1-8)",
                self.enhance.scale
            )));
        }
        if self.start < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "start time {} is negative",
                self.start
            )));
        }
        if self.output.video.gop_size == 0 {
            return Err(Error::InvalidConfig(String::from("gop size must be at least 1")));
        }
        Ok(())
    }

    /// Number of workers to run.
    pub fn workers(&self) -> usize {
        match self.jobs {
            0 => std::thread::available_parallelism().map_or(1, |n| n.get()),
            jobs => jobs,
        }
    }
}

/// Returns a version as specified in Cargo.toml
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::RateControl;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{
            "output": {
                "format": "matroska",
                "video": { "codec": "libx265", "rate_control": { "bitrate": 4000000 } },
                "audio": null
            },
            "enhance": { "scale": 2, "filter": "nearest" },
            "max_frames": 100
        }"#;
        let config: JobConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.output.format, "matroska");
        assert_eq!(config.output.video.codec, "libx265");
        assert_eq!(config.output.video.rate_control, RateControl::Bitrate(4_000_000));
        assert_eq!(config.output.video.gop_size, 30);
        assert!(config.output.audio.is_none());
        assert_eq!(config.enhance.filter, ScaleFilter::Nearest);
        assert_eq!(config.enhance.enhancer().name(), "x2");
        assert_eq!(config.max_frames, Some(100));
        assert!(config.decoder.enable_audio);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut config = JobConfig::default();
        assert_eq!(config.enhance.enhancer().name(), "passthrough");
        config.enhance.scale = 16;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = JobConfig {
            start: -1.0,
            ..JobConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(JobConfig::default().workers() >= 1);
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            JobConfig::load(Path::new("/definitely/not/here.json")),
            Err(Error::Io(_))
        ));
    }
}
