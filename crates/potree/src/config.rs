//! Streaming configuration.

use crate::error::{Error, Result};
use serde::Deserialize;

/// Limits and thresholds for the per-frame scheduler.
///
/// Missing fields in JSON take their defaults, so `{}` is a valid
/// configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamingConfig {
    /// Maximum number of points visited per frame.
    pub point_budget: u64,
    /// Maximum number of node loads in flight at once.
    pub max_concurrent_loads: usize,
    /// Projected radius in pixels below which children are not refined.
    pub min_node_pixel_size: f64,
    /// Resident points kept in memory before eviction starts. Defaults to
    /// the point budget.
    pub resident_point_budget: Option<u64>,
    /// Decoder workers per decoder kind.
    pub max_decode_workers: usize,
    /// Deepest level that is ever visited.
    pub max_level: Option<u32>,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            point_budget: 1_000_000,
            max_concurrent_loads: 4,
            min_node_pixel_size: 150.0,
            resident_point_budget: None,
            max_decode_workers: 4,
            max_level: None,
        }
    }
}

impl StreamingConfig {
    /// Parse and validate a configuration from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or a value is out of range.
    pub fn from_json(data: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(data).map_err(|e| Error::InvalidData {
            context: "streaming config",
            detail: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every value is usable.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        let invalid = |detail: &str| {
            Err(Error::InvalidData {
                context: "streaming config",
                detail: detail.to_string(),
            })
        };

        if self.max_concurrent_loads == 0 {
            return invalid("max_concurrent_loads must be at least 1");
        }
        if self.max_decode_workers == 0 {
            return invalid("max_decode_workers must be at least 1");
        }
        if !self.min_node_pixel_size.is_finite() || self.min_node_pixel_size < 0.0 {
            return invalid("min_node_pixel_size must be a non-negative number");
        }
        Ok(())
    }

    /// Resident point count the eviction sweep works towards.
    #[must_use]
    pub fn resident_limit(&self) -> u64 {
        self.resident_point_budget.unwrap_or(self.point_budget)
    }
}
