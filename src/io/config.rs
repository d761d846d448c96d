//! Co-location configuration loaded from YAML.

use crate::types::{ColocError, ColocResult};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Canonical variable names shared by every mission in a merged product
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommonVarNames {
    #[serde(default = "default_longitude")]
    pub longitude: String,
    #[serde(default = "default_latitude")]
    pub latitude: String,
    #[serde(default = "default_wind_speed")]
    pub wind_speed: String,
    #[serde(default = "default_wind_direction")]
    pub wind_direction: String,
}

fn default_longitude() -> String {
    "lon".to_string()
}

fn default_latitude() -> String {
    "lat".to_string()
}

fn default_wind_speed() -> String {
    "wind_speed".to_string()
}

fn default_wind_direction() -> String {
    "wind_direction".to_string()
}

impl Default for CommonVarNames {
    fn default() -> Self {
        Self {
            longitude: default_longitude(),
            latitude: default_latitude(),
            wind_speed: default_wind_speed(),
            wind_direction: default_wind_direction(),
        }
    }
}

/// Physical quantity a mission variable maps onto
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalVar {
    Longitude,
    Latitude,
    WindSpeed,
    WindDirection,
}

impl CommonVarNames {
    pub fn name(&self, var: CanonicalVar) -> &str {
        match var {
            CanonicalVar::Longitude => &self.longitude,
            CanonicalVar::Latitude => &self.latitude,
            CanonicalVar::WindSpeed => &self.wind_speed,
            CanonicalVar::WindDirection => &self.wind_direction,
        }
    }
}

/// Resampling kernel used when reprojecting the finer acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResamplingMethod {
    #[default]
    Bilinear,
    Nearest,
}

/// Root configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColocConfig {
    #[serde(default)]
    pub common_var_names: CommonVarNames,
    /// Time tolerance in minutes
    #[serde(default = "default_delta_time")]
    pub delta_time: i64,
    /// Integer km² or a string ending in `km2` / `m2`
    #[serde(default = "default_minimal_area")]
    pub minimal_area: serde_yaml::Value,
    #[serde(default)]
    pub resampling: ResamplingMethod,
    /// Per-mission path patterns, handed to product discovery untouched
    #[serde(default)]
    pub paths: BTreeMap<String, Vec<String>>,
}

fn default_delta_time() -> i64 {
    60
}

fn default_minimal_area() -> serde_yaml::Value {
    serde_yaml::Value::from(1600)
}

impl Default for ColocConfig {
    fn default() -> Self {
        Self {
            common_var_names: CommonVarNames::default(),
            delta_time: default_delta_time(),
            minimal_area: default_minimal_area(),
            resampling: ResamplingMethod::default(),
            paths: BTreeMap::new(),
        }
    }
}

/// Values the intersection engine needs, resolved from a [`ColocConfig`]
#[derive(Debug, Clone, PartialEq)]
pub struct IntersectionSettings {
    pub delta_time: Duration,
    pub minimal_area_km2: f64,
    pub product_generation: bool,
    pub common_var_names: CommonVarNames,
}

impl ColocConfig {
    pub fn from_yaml_str(content: &str) -> ColocResult<Self> {
        let config: ColocConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> ColocResult<Self> {
        let path = path.as_ref();
        log::debug!("Loading co-location configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Resolve every field that can be invalid so errors surface at construction
    pub fn validate(&self) -> ColocResult<()> {
        if self.delta_time < 0 {
            return Err(ColocError::Config(format!(
                "delta_time must be positive, got {}",
                self.delta_time
            )));
        }
        self.minimal_area_km2()?;
        Ok(())
    }

    pub fn delta(&self) -> Duration {
        Duration::minutes(self.delta_time)
    }

    pub fn minimal_area_km2(&self) -> ColocResult<f64> {
        parse_minimal_area(&self.minimal_area)
    }

    pub fn intersection_settings(&self, product_generation: bool) -> ColocResult<IntersectionSettings> {
        self.validate()?;
        Ok(IntersectionSettings {
            delta_time: self.delta(),
            minimal_area_km2: self.minimal_area_km2()?,
            product_generation,
            common_var_names: self.common_var_names.clone(),
        })
    }
}

/// Minimal area in km²: an integer (km²) or a string with a `km2` or `m2` suffix
pub fn parse_minimal_area(value: &serde_yaml::Value) -> ColocResult<f64> {
    match value {
        serde_yaml::Value::Number(n) => match n.as_i64() {
            Some(km2) => Ok(km2 as f64),
            None => Err(ColocError::Config(format!(
                "minimal_area must be an integer or a string ending with km2 or m2, got {}",
                n
            ))),
        },
        serde_yaml::Value::String(s) => parse_minimal_area_str(s),
        other => Err(ColocError::Config(format!(
            "minimal_area must be an integer or a string ending with km2 or m2, got {:?}",
            other
        ))),
    }
}

fn parse_minimal_area_str(text: &str) -> ColocResult<f64> {
    let text = text.trim();
    let (number, scale) = if let Some(prefix) = text.strip_suffix("km2") {
        (prefix, 1.0)
    } else if let Some(prefix) = text.strip_suffix("m2") {
        (prefix, 1e-6)
    } else {
        return Err(ColocError::Config(format!(
            "minimal_area expressed as a string must end by km2 or m2, got '{}'",
            text
        )));
    };
    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| ColocError::Config(format!("cannot read a number from minimal_area '{}'", text)))?;
    Ok(value * scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_area_units() {
        assert_eq!(parse_minimal_area(&serde_yaml::Value::from(1600)).unwrap(), 1600.0);
        assert_eq!(parse_minimal_area(&serde_yaml::Value::from("2500km2")).unwrap(), 2500.0);
        assert_eq!(parse_minimal_area(&serde_yaml::Value::from("3000000m2")).unwrap(), 3.0);
    }

    #[test]
    fn test_minimal_area_rejects_unknown_unit() {
        let err = parse_minimal_area(&serde_yaml::Value::from("1600ha")).unwrap_err();
        assert!(matches!(err, ColocError::Config(_)));
        assert!(parse_minimal_area(&serde_yaml::Value::from(12.5)).is_err());
    }
}
