use chrono::Duration;
use coloc_sat::io::config::{ColocConfig, ResamplingMethod};
use coloc_sat::types::ColocError;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_defaults_from_empty_document() {
    let config = ColocConfig::from_yaml_str("{}").unwrap();
    assert_eq!(config, ColocConfig::default());
    assert_eq!(config.delta(), Duration::minutes(60));
    assert_eq!(config.minimal_area_km2().unwrap(), 1600.0);
    assert_eq!(config.resampling, ResamplingMethod::Bilinear);
    assert_eq!(config.common_var_names.longitude, "lon");
    assert_eq!(config.common_var_names.wind_speed, "wind_speed");
}

#[test]
fn test_full_document() {
    let yaml = r#"
common_var_names:
  longitude: longitude
  latitude: latitude
  wind_speed: wind_speed
  wind_direction: wind_direction
delta_time: 30
minimal_area: 2500000000m2
resampling: nearest
paths:
  SMOS:
    - /data/smos/*/*.nc
"#;
    let config = ColocConfig::from_yaml_str(yaml).unwrap();
    assert_eq!(config.common_var_names.longitude, "longitude");
    assert_eq!(config.resampling, ResamplingMethod::Nearest);
    assert_eq!(config.paths["SMOS"], vec!["/data/smos/*/*.nc".to_string()]);

    let settings = config.intersection_settings(false).unwrap();
    assert_eq!(settings.delta_time, Duration::minutes(30));
    assert_eq!(settings.minimal_area_km2, 2500.0);
    assert!(!settings.product_generation);
}

#[test]
fn test_invalid_values_are_config_errors() {
    let bad_unit = ColocConfig::from_yaml_str("minimal_area: 1600 acres");
    assert!(matches!(bad_unit, Err(ColocError::Config(_))));

    let negative = ColocConfig::from_yaml_str("delta_time: -5");
    assert!(matches!(negative, Err(ColocError::Config(_))));

    let malformed = ColocConfig::from_yaml_str("delta_time: [1, 2]");
    assert!(matches!(malformed, Err(ColocError::Yaml(_))));
}

#[test]
fn test_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "delta_time: 180").unwrap();
    writeln!(file, "minimal_area: 800km2").unwrap();

    let config = ColocConfig::from_file(file.path()).unwrap();
    assert_eq!(config.delta(), Duration::hours(3));
    assert_eq!(config.minimal_area_km2().unwrap(), 800.0);

    let missing = ColocConfig::from_file(file.path().with_extension("missing"));
    assert!(matches!(missing, Err(ColocError::Io(_))));
}
