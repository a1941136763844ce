//! Configuration types and defaults

use playsync_core::{PipelineConfig, PlaybackError, PlaybackResult};
use serde::{Deserialize, Serialize};

/// Player configuration
///
/// Every field has a default, so a JSON document only needs the values it
/// changes:
///
/// ```rust
/// use playsync::PlayerConfig;
///
/// let config = PlayerConfig::from_json_str(r#"{ "pipeline": { "decode_target_secs": 0.5 } }"#)?;
/// assert_eq!(config.pipeline.decode_target_secs, 0.5);
/// assert_eq!(config.pipeline.frame_buffer_target, 3);
/// # Ok::<(), playsync::PlaybackError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Buffering and pacing parameters
    pub pipeline: PipelineConfig,
    /// Commands that may queue up before the host is made to wait
    pub command_capacity: usize,
    /// Decoded frames each decoder may hand over before it must wait
    pub decoder_output_capacity: usize,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            command_capacity: 32,
            decoder_output_capacity: 16,
        }
    }
}

impl PlayerConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> PlaybackResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| PlaybackError::config(format!("invalid player configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty-printed JSON
    pub fn to_json_string(&self) -> PlaybackResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| PlaybackError::config(format!("cannot serialize configuration: {}", e)))
    }

    /// Check every parameter is usable
    pub fn validate(&self) -> PlaybackResult<()> {
        self.pipeline.validate()?;
        if self.command_capacity == 0 {
            return Err(PlaybackError::config("command_capacity must be positive"));
        }
        // Room for a flushed decoder's backlog on top of the ready frames
        let minimum = self.pipeline.decoder_queue_max + 1;
        if self.decoder_output_capacity < minimum {
            return Err(PlaybackError::config(format!(
                "decoder_output_capacity must be at least {}, got {}",
                minimum, self.decoder_output_capacity
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PlayerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pipeline.buffer_duration_secs, 0.6);
    }

    #[test]
    fn test_json_round_trip_keeps_overrides() {
        let mut config = PlayerConfig::default();
        config.pipeline.render_interval_ms = 8;
        let json = config.to_json_string().unwrap();
        assert_eq!(PlayerConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_small_output_capacity_is_rejected() {
        let result = PlayerConfig::from_json_str(r#"{ "decoder_output_capacity": 2 }"#);
        assert!(matches!(
            result,
            Err(PlaybackError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_malformed_json_is_a_configuration_error() {
        let result = PlayerConfig::from_json_str("{ not json");
        assert!(matches!(
            result,
            Err(PlaybackError::InvalidConfiguration { .. })
        ));
    }
}
