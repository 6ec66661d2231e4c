//! Store configuration

use crate::{ConfigError, DEFAULT_PARTITION_COUNT};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Property naming the data source to resolve from the registry.
pub const PROP_DATASOURCE: &str = "datasource";
/// Property naming the template set category.
pub const PROP_CATEGORY: &str = "category";
/// Property overriding the partition count.
pub const PROP_PARTITION_COUNT: &str = "partitionCount";

/// Settings a record store is initialized with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Data source name, resolved through the data source registry.
    pub datasource: String,
    /// Template set category. When absent the pool's product name decides.
    pub category: Option<String>,
    /// Number of partition keys; at least 1.
    pub partition_count: u32,
}

impl StoreConfig {
    /// A config for `datasource` with default category and partition count.
    pub fn new(datasource: impl Into<String>) -> Self {
        Self {
            datasource: datasource.into(),
            category: None,
            partition_count: DEFAULT_PARTITION_COUNT,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_partition_count(mut self, partition_count: u32) -> Self {
        self.partition_count = partition_count;
        self
    }

    /// Build from an initialization property map.
    ///
    /// Recognized keys:
    /// - `datasource` (required)
    /// - `category`
    /// - `partitionCount` (default 100)
    pub fn from_properties(properties: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let datasource = properties
            .get(PROP_DATASOURCE)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::MissingRequired {
                field: PROP_DATASOURCE.to_string(),
            })?;

        let category = properties
            .get(PROP_CATEGORY)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let partition_count = match properties.get(PROP_PARTITION_COUNT) {
            Some(raw) => parse_partition_count(raw)?,
            None => DEFAULT_PARTITION_COUNT,
        };

        Ok(Self {
            datasource: datasource.to_string(),
            category,
            partition_count,
        })
    }

    /// Build from environment variables.
    ///
    /// Environment variables:
    /// - `STRATA_DATASOURCE`: data source name (required)
    /// - `STRATA_CATEGORY`: template set category (optional)
    /// - `STRATA_PARTITION_COUNT`: partition count (default: 100)
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut properties = HashMap::new();
        for (var, key) in [
            ("STRATA_DATASOURCE", PROP_DATASOURCE),
            ("STRATA_CATEGORY", PROP_CATEGORY),
            ("STRATA_PARTITION_COUNT", PROP_PARTITION_COUNT),
        ] {
            if let Ok(value) = std::env::var(var) {
                properties.insert(key.to_string(), value);
            }
        }
        Self::from_properties(&properties)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.datasource.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: PROP_DATASOURCE.to_string(),
            });
        }
        if self.partition_count == 0 {
            return Err(ConfigError::InvalidValue {
                field: PROP_PARTITION_COUNT.to_string(),
                value: "0".to_string(),
                reason: "partition count must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// The equivalent property map.
    pub fn to_properties(&self) -> HashMap<String, String> {
        let mut properties = HashMap::new();
        properties.insert(PROP_DATASOURCE.to_string(), self.datasource.clone());
        if let Some(category) = &self.category {
            properties.insert(PROP_CATEGORY.to_string(), category.clone());
        }
        properties.insert(
            PROP_PARTITION_COUNT.to_string(),
            self.partition_count.to_string(),
        );
        properties
    }
}

fn parse_partition_count(raw: &str) -> Result<u32, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidValue {
        field: PROP_PARTITION_COUNT.to_string(),
        value: raw.to_string(),
        reason: reason.to_string(),
    };
    let count: u32 = raw
        .trim()
        .parse()
        .map_err(|_| invalid("must be a positive integer"))?;
    if count == 0 {
        return Err(invalid("partition count must be at least 1"));
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_from_properties_defaults() {
        let config = StoreConfig::from_properties(&props(&[("datasource", "main")]))
            .expect("valid properties");
        assert_eq!(config.datasource, "main");
        assert_eq!(config.category, None);
        assert_eq!(config.partition_count, 100);
    }

    #[test]
    fn test_from_properties_all_keys() {
        let config = StoreConfig::from_properties(&props(&[
            ("datasource", "main"),
            ("category", "sqlite"),
            ("partitionCount", " 16 "),
        ]))
        .expect("valid properties");
        assert_eq!(config.category.as_deref(), Some("sqlite"));
        assert_eq!(config.partition_count, 16);
    }

    #[test]
    fn test_missing_datasource() {
        for map in [props(&[]), props(&[("datasource", "  ")])] {
            assert_eq!(
                StoreConfig::from_properties(&map),
                Err(ConfigError::MissingRequired {
                    field: "datasource".to_string()
                })
            );
        }
    }

    #[test]
    fn test_invalid_partition_count() {
        for raw in ["0", "-3", "many", ""] {
            let err = StoreConfig::from_properties(&props(&[
                ("datasource", "main"),
                ("partitionCount", raw),
            ]))
            .unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "partitionCount"),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn test_properties_roundtrip() {
        let config = StoreConfig::new("main")
            .with_category("postgresql")
            .with_partition_count(8);
        assert!(config.validate().is_ok());
        let back = StoreConfig::from_properties(&config.to_properties()).expect("valid");
        assert_eq!(back, config);
    }

    #[test]
    fn test_validate_rejects_zero_partitions() {
        let config = StoreConfig::new("main").with_partition_count(0);
        assert!(config.validate().is_err());
    }
}
