//! Mutation engine configuration.

use crate::error::{StoreError, StoreResult};

/// Configuration for mutation passes.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationConfig {
    /// Smallest fraction of a collection selected by one numeric pass.
    pub min_selection: f64,

    /// Largest fraction of a collection selected by one numeric pass.
    pub max_selection: f64,

    /// Decimal places kept after a numeric adjustment.
    pub precision: u32,

    /// Run the status pass every this many ticks.
    pub status_interval: u64,

    /// RNG seed. `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            min_selection: 0.3,
            max_selection: 0.5,
            precision: 1,
            status_interval: 1,
            seed: None,
        }
    }
}

impl MutationConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the selection fraction range.
    #[must_use]
    pub fn with_selection(mut self, min: f64, max: f64) -> Self {
        self.min_selection = min;
        self.max_selection = max;
        self
    }

    /// Sets the numeric precision.
    #[must_use]
    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = precision;
        self
    }

    /// Sets the status pass interval in ticks.
    #[must_use]
    pub fn with_status_interval(mut self, ticks: u64) -> Self {
        self.status_interval = ticks;
        self
    }

    /// Sets a fixed RNG seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Checks that every value is usable.
    pub fn validate(&self) -> StoreResult<()> {
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        if !in_unit(self.min_selection) || !in_unit(self.max_selection) {
            return Err(StoreError::InvalidConfig(
                "selection fractions must be within 0..=1".into(),
            ));
        }
        if self.min_selection > self.max_selection {
            return Err(StoreError::InvalidConfig(
                "min_selection exceeds max_selection".into(),
            ));
        }
        if self.precision > 6 {
            return Err(StoreError::InvalidConfig("precision above 6 decimals".into()));
        }
        if self.status_interval == 0 {
            return Err(StoreError::InvalidConfig("status_interval must be at least 1".into()));
        }
        Ok(())
    }

    /// Returns true if the status pass runs on tick number `pass`.
    pub fn status_due(&self, pass: u64) -> bool {
        pass % self.status_interval.max(1) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let config = MutationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.min_selection, 0.3);
        assert_eq!(config.max_selection, 0.5);
        assert!(config.status_due(7));
    }

    #[test]
    fn builder() {
        let config = MutationConfig::new()
            .with_selection(1.0, 1.0)
            .with_precision(2)
            .with_status_interval(3)
            .with_seed(42);
        assert_eq!(config.seed, Some(42));
        assert!(config.validate().is_ok());
        assert!(config.status_due(3));
        assert!(!config.status_due(4));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(MutationConfig::new().with_selection(0.6, 0.4).validate().is_err());
        assert!(MutationConfig::new().with_selection(0.1, 1.5).validate().is_err());
        assert!(MutationConfig::new().with_status_interval(0).validate().is_err());
        assert!(MutationConfig::new().with_precision(9).validate().is_err());
    }
}
