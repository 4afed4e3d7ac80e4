//! Configuration management

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{self, Context, Result};

use crate::defaults::{DEFAULT_FREQUENCY, DEFAULT_LOGS_DIR, DEFAULT_SCENARIO_DIR, DEFAULT_SPEED_KMH, DEFAULT_WARP};
use crate::services::dispatcher::DispatchSettings;

/// Application configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Directory holding scenario.json, the stop catalogue and line timetables
    pub scenario_dir: PathBuf,

    /// OSRM routing engine URL (optional, falls back to straight lines if unavailable)
    pub osrm_url: Option<String>,

    /// Clock ticks per real second
    pub frequency: f64,

    /// Simulated seconds per real second at one tick per second
    pub warp: f64,

    /// Speed of buses without their own, km/h
    pub speed_kmh: f64,

    /// Drive the fleet from one clock instead of one per bus
    pub shared_clock: bool,

    /// Directory of the rolling log files
    pub logs_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scenario_dir: PathBuf::from(DEFAULT_SCENARIO_DIR),
            osrm_url: None,
            frequency: DEFAULT_FREQUENCY,
            warp: DEFAULT_WARP,
            speed_kmh: DEFAULT_SPEED_KMH,
            shared_clock: false,
            logs_dir: PathBuf::from(DEFAULT_LOGS_DIR),
        }
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value \"{}\"", name, raw)),
        None => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from any variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let scenario_dir = lookup("SCENARIO_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.scenario_dir);

        let osrm_url = lookup("OSRM_URL").filter(|url| !url.trim().is_empty());

        let frequency = parse_var(&lookup, "SIM_FREQUENCY", defaults.frequency)?;
        let warp = parse_var(&lookup, "SIM_WARP", defaults.warp)?;
        let speed_kmh = parse_var(&lookup, "BUS_SPEED_KMH", defaults.speed_kmh)?;
        let shared_clock = parse_var(&lookup, "SHARED_CLOCK", defaults.shared_clock)?;

        let logs_dir = lookup("LOGS_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.logs_dir);

        let config = Self {
            scenario_dir,
            osrm_url,
            frequency,
            warp,
            speed_kmh,
            shared_clock,
            logs_dir,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the simulation cannot run with
    pub fn validate(&self) -> Result<()> {
        if !self.frequency.is_finite() || self.frequency <= 0.0 {
            anyhow::bail!("SIM_FREQUENCY must be a positive number (current: {})", self.frequency);
        }
        if !self.warp.is_finite() || self.warp <= 0.0 {
            anyhow::bail!("SIM_WARP must be a positive number (current: {})", self.warp);
        }
        if !self.speed_kmh.is_finite() || self.speed_kmh <= 0.0 {
            anyhow::bail!("BUS_SPEED_KMH must be a positive number (current: {})", self.speed_kmh);
        }
        if self.frequency > 1_000.0 {
            tracing::warn!("SIM_FREQUENCY of {} ticks per second is unusually high", self.frequency);
        }
        Ok(())
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            frequency: self.frequency,
            warp: self.warp,
            speed_kmh: self.speed_kmh,
            shared_clock: self.shared_clock,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_vars(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_config_defaults() {
        let config = from_vars(&[]).unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(config.scenario_dir, PathBuf::from("samples/wuerzburg"));
        assert!(config.osrm_url.is_none());
        assert_eq!(config.frequency, 1.0);
        assert_eq!(config.warp, 1.0);
        assert_eq!(config.speed_kmh, 40.0);
        assert!(!config.shared_clock);
    }

    #[test]
    fn test_config_reads_variables() {
        let config = from_vars(&[
            ("SCENARIO_DIR", "/srv/scenarios/bamberg"),
            ("OSRM_URL", "http://localhost:5000"),
            ("SIM_FREQUENCY", "4"),
            ("SIM_WARP", " 30.5 "),
            ("BUS_SPEED_KMH", "25"),
            ("SHARED_CLOCK", "true"),
            ("LOGS_DIR", "/var/log/fleet-sim"),
        ])
        .unwrap();

        assert_eq!(config.scenario_dir, PathBuf::from("/srv/scenarios/bamberg"));
        assert_eq!(config.osrm_url, Some("http://localhost:5000".to_string()));
        assert_eq!(config.frequency, 4.0);
        assert_eq!(config.warp, 30.5);
        assert_eq!(config.speed_kmh, 25.0);
        assert!(config.shared_clock);
        assert_eq!(config.logs_dir, PathBuf::from("/var/log/fleet-sim"));
    }

    #[test]
    fn test_config_empty_osrm_url_is_none() {
        let config = from_vars(&[("OSRM_URL", "  ")]).unwrap();
        assert!(config.osrm_url.is_none());
    }

    #[test]
    fn test_config_rejects_unparsable_values() {
        let err = from_vars(&[("SIM_WARP", "fast")]).unwrap_err();
        assert!(err.to_string().contains("SIM_WARP"));

        assert!(from_vars(&[("SHARED_CLOCK", "yes please")]).is_err());
    }

    #[test]
    fn test_config_rejects_non_positive_values() {
        for (name, value) in [("SIM_FREQUENCY", "0"), ("SIM_WARP", "-2"), ("BUS_SPEED_KMH", "NaN")] {
            let err = from_vars(&[(name, value)]).unwrap_err();
            assert!(err.to_string().contains(name), "{}: {}", name, err);
        }
    }

    #[test]
    fn test_dispatch_settings() {
        let config = from_vars(&[("SIM_WARP", "60"), ("SHARED_CLOCK", "true")]).unwrap();
        let settings = config.dispatch_settings();

        assert_eq!(settings.warp, 60.0);
        assert_eq!(settings.frequency, 1.0);
        assert!(settings.shared_clock);
    }
}
