//! Launch parameter parsing for the streaming driver.
//!
//! Streaming settings start from defaults, are replaced by a JSON file if
//! one is given, and are then overridden by individual flags.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use potree::{StreamingConfig, UrlSigner};

/// Default number of frames to run.
const DEFAULT_FRAMES: u64 = 600;
/// Default frame interval in milliseconds (about 60 Hz).
const DEFAULT_FRAME_MS: u64 = 16;
/// Default viewport height in pixels.
const DEFAULT_SCREEN_HEIGHT: f64 = 1080.0;
/// Default time for one full orbit in seconds.
const DEFAULT_ORBIT_SECONDS: f64 = 20.0;
/// Default fetch cache size in MiB.
const DEFAULT_CACHE_MIB: usize = 256;

/// Launch parameters for the driver.
#[derive(Debug)]
pub struct LaunchParams {
    /// URL of the `cloud.js` file.
    pub url: String,
    /// Scheduler settings.
    pub config: StreamingConfig,
    /// URL signing, if the server requires it.
    pub signer: Option<UrlSigner>,
    /// Number of frames to run.
    pub frames: u64,
    /// Time between frames.
    pub frame_interval: Duration,
    /// Viewport height in pixels.
    pub screen_height: f64,
    /// Viewport width over height.
    pub aspect: f64,
    /// Time for one full orbit.
    pub orbit_period: Duration,
    /// Fetch cache size in bytes.
    pub cache_bytes: usize,
}

#[derive(Parser, Debug)]
#[command(about = "Stream a Potree point cloud against an orbiting camera")]
struct CliArgs {
    /// URL of the cloud.js file.
    url: String,

    /// JSON file with streaming settings.
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON file with signed URLs (expires, keyname, urls).
    #[arg(long)]
    signed_urls: Option<PathBuf>,

    /// Maximum points visited per frame.
    #[arg(long)]
    point_budget: Option<u64>,

    /// Maximum node loads in flight.
    #[arg(long)]
    max_concurrent_loads: Option<usize>,

    /// Projected size in pixels below which nodes are not refined.
    #[arg(long)]
    min_node_pixel_size: Option<f64>,

    /// Resident points kept before eviction.
    #[arg(long)]
    resident_point_budget: Option<u64>,

    /// Deepest octree level to visit.
    #[arg(long)]
    max_level: Option<u32>,

    /// Number of frames to run.
    #[arg(long, default_value_t = DEFAULT_FRAMES)]
    frames: u64,

    /// Frame interval in milliseconds.
    #[arg(long, default_value_t = DEFAULT_FRAME_MS)]
    frame_ms: u64,

    /// Viewport height in pixels.
    #[arg(long, default_value_t = DEFAULT_SCREEN_HEIGHT)]
    screen_height: f64,

    /// Viewport width over height.
    #[arg(long, default_value_t = 16.0 / 9.0)]
    aspect: f64,

    /// Seconds for one full orbit.
    #[arg(long, default_value_t = DEFAULT_ORBIT_SECONDS)]
    orbit_seconds: f64,

    /// Fetch cache size in MiB; 0 disables caching.
    #[arg(long, default_value_t = DEFAULT_CACHE_MIB)]
    cache_mib: usize,
}

impl CliArgs {
    fn into_params(self) -> Result<LaunchParams, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => StreamingConfig::from_json(&std::fs::read_to_string(path)?)?,
            None => StreamingConfig::default(),
        };
        if let Some(v) = self.point_budget {
            config.point_budget = v;
        }
        if let Some(v) = self.max_concurrent_loads {
            config.max_concurrent_loads = v;
        }
        if let Some(v) = self.min_node_pixel_size {
            config.min_node_pixel_size = v;
        }
        if let Some(v) = self.resident_point_budget {
            config.resident_point_budget = Some(v);
        }
        if let Some(v) = self.max_level {
            config.max_level = Some(v);
        }
        config.validate()?;

        let signer: Option<UrlSigner> = match &self.signed_urls {
            Some(path) => Some(serde_json::from_str(&std::fs::read_to_string(path)?)?),
            None => None,
        };

        let orbit_seconds = self.orbit_seconds;
        if !(orbit_seconds.is_finite() && orbit_seconds > 0.0) {
            return Err(format!("orbit seconds must be positive, got {orbit_seconds}").into());
        }

        Ok(LaunchParams {
            url: self.url,
            config,
            signer,
            frames: self.frames,
            frame_interval: Duration::from_millis(self.frame_ms.max(1)),
            screen_height: self.screen_height,
            aspect: self.aspect,
            orbit_period: Duration::from_secs_f64(self.orbit_seconds),
            cache_bytes: self.cache_mib.saturating_mul(1024 * 1024),
        })
    }
}

/// Parse launch parameters from command-line arguments.
///
/// # Errors
///
/// Returns an error if a settings file cannot be read or parsed, or a value
/// is out of range.
pub fn parse() -> Result<LaunchParams, Box<dyn std::error::Error>> {
    CliArgs::parse().into_params()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> CliArgs {
        let mut argv = vec!["potree-stream", "http://host/lion/cloud.js"];
        argv.extend_from_slice(extra);
        CliArgs::parse_from(argv)
    }

    #[test]
    fn test_defaults() {
        let params = args(&[]).into_params().unwrap();
        assert_eq!(params.config, StreamingConfig::default());
        assert_eq!(params.frames, DEFAULT_FRAMES);
        assert_eq!(params.frame_interval, Duration::from_millis(16));
        assert!(params.signer.is_none());
        assert_eq!(params.cache_bytes, 256 * 1024 * 1024);
    }

    #[test]
    fn test_flags_override_config() {
        let params = args(&["--point-budget", "5000", "--max-level", "3"])
            .into_params()
            .unwrap();
        assert_eq!(params.config.point_budget, 5000);
        assert_eq!(params.config.max_level, Some(3));
        assert_eq!(params.config.resident_limit(), 5000);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(args(&["--max-concurrent-loads", "0"]).into_params().is_err());
        assert!(args(&["--orbit-seconds", "0"]).into_params().is_err());
    }
}
