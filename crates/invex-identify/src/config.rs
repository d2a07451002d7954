//! Engine configuration.

use std::time::Duration;

use invex_core::defaults;
use invex_core::{Error, Result};
use tracing::debug;

/// Configuration for identification, resolution and retraining.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentificationConfig {
    /// Overall deadline for one identification.
    pub timeout: Duration,
    /// Create a product when nothing matches.
    pub auto_create: bool,
    /// Qualifying candidates at most this far apart are ambiguous.
    pub ambiguity_margin: f32,
    /// Surface the best below-threshold candidate as a suggestion.
    pub surface_best_effort: bool,
    /// Validations since last training needed before retraining runs.
    pub min_training_samples: i64,
    /// Maximum threshold shift per retraining pass.
    pub retrain_learning_rate: f32,
    /// Run the post-validation retraining check on a spawned task.
    pub retrain_in_background: bool,
}

impl Default for IdentificationConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(defaults::IDENTIFY_TIMEOUT_SECS),
            auto_create: defaults::AUTO_CREATE,
            ambiguity_margin: defaults::AMBIGUITY_MARGIN,
            surface_best_effort: defaults::SURFACE_BEST_EFFORT,
            min_training_samples: defaults::MIN_TRAINING_SAMPLES,
            retrain_learning_rate: defaults::RETRAIN_LEARNING_RATE,
            retrain_in_background: defaults::RETRAIN_IN_BACKGROUND,
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "false" | "0" | "no" | "off"))
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl IdentificationConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `INVEX_IDENTIFY_TIMEOUT_SECS` | `60` | Overall identification deadline |
    /// | `INVEX_AUTO_CREATE` | `true` | Create a product when nothing matches |
    /// | `INVEX_AMBIGUITY_MARGIN` | `0.05` | Band within which candidates are ambiguous |
    /// | `INVEX_SURFACE_BEST_EFFORT` | `false` | Suggest the best below-threshold candidate |
    /// | `INVEX_MIN_TRAINING_SAMPLES` | `50` | Validations needed before retraining |
    /// | `INVEX_RETRAIN_LEARNING_RATE` | `0.10` | Maximum threshold shift per pass |
    /// | `INVEX_RETRAIN_IN_BACKGROUND` | `true` | Retrain on a spawned task |
    pub fn from_env() -> Self {
        let base = Self::default();
        let config = Self {
            timeout: env_parse::<u64>("INVEX_IDENTIFY_TIMEOUT_SECS")
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(base.timeout),
            auto_create: env_flag("INVEX_AUTO_CREATE").unwrap_or(base.auto_create),
            ambiguity_margin: env_parse("INVEX_AMBIGUITY_MARGIN").unwrap_or(base.ambiguity_margin),
            surface_best_effort: env_flag("INVEX_SURFACE_BEST_EFFORT")
                .unwrap_or(base.surface_best_effort),
            min_training_samples: env_parse("INVEX_MIN_TRAINING_SAMPLES")
                .unwrap_or(base.min_training_samples),
            retrain_learning_rate: env_parse("INVEX_RETRAIN_LEARNING_RATE")
                .unwrap_or(base.retrain_learning_rate),
            retrain_in_background: env_flag("INVEX_RETRAIN_IN_BACKGROUND")
                .unwrap_or(base.retrain_in_background),
        };
        debug!(
            subsystem = "identify",
            component = "config",
            timeout_secs = config.timeout.as_secs(),
            auto_create = config.auto_create,
            ambiguity_margin = config.ambiguity_margin,
            "Loaded identification config from environment"
        );
        config
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_auto_create(mut self, auto_create: bool) -> Self {
        self.auto_create = auto_create;
        self
    }

    pub fn with_ambiguity_margin(mut self, margin: f32) -> Self {
        self.ambiguity_margin = margin;
        self
    }

    pub fn with_surface_best_effort(mut self, surface: bool) -> Self {
        self.surface_best_effort = surface;
        self
    }

    pub fn with_min_training_samples(mut self, samples: i64) -> Self {
        self.min_training_samples = samples;
        self
    }

    pub fn with_retrain_learning_rate(mut self, rate: f32) -> Self {
        self.retrain_learning_rate = rate;
        self
    }

    pub fn with_retrain_in_background(mut self, background: bool) -> Self {
        self.retrain_in_background = background;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(Error::Config("identification timeout must be positive".into()));
        }
        if !self.ambiguity_margin.is_finite() || !(0.0..=1.0).contains(&self.ambiguity_margin) {
            return Err(Error::Config(format!(
                "ambiguity margin must be within [0, 1], got {}",
                self.ambiguity_margin
            )));
        }
        if !self.retrain_learning_rate.is_finite()
            || !(0.0..=1.0).contains(&self.retrain_learning_rate)
        {
            return Err(Error::Config(format!(
                "retrain learning rate must be within [0, 1], got {}",
                self.retrain_learning_rate
            )));
        }
        if self.min_training_samples < 0 {
            return Err(Error::Config("min training samples must not be negative".into()));
        }
        Ok(())
    }
}
