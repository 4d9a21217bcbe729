use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};
use crate::models::RenderKind;

pub const BASIS_POINTS_TOTAL: u32 = 10_000;
pub const MAX_FOLLOW_ON_EPISODES: u32 = 4;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StudioConfig {
    pub paths: PathsSection,
    #[serde(default)]
    pub voting: VotingSection,
    #[serde(default)]
    pub production: ProductionSection,
    pub generation: GenerationSection,
    pub storage: StorageSection,
    #[serde(default)]
    pub payouts: PayoutsSection,
    #[serde(default)]
    pub sweeper: SweeperSection,
}

impl StudioConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.base_dir).join(path)
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.resolve_path(Path::new(&self.paths.data_dir).join(&self.paths.database))
    }

    /// Checks cross-field rules that serde cannot express.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let split = &self.payouts;
        let total = split.creator_bps + split.platform_bps + split.agent_bps;
        if total != BASIS_POINTS_TOTAL {
            return Err(format!(
                "payout split must sum to {BASIS_POINTS_TOTAL} basis points, got {total}"
            ));
        }
        if self.production.pilot_variants == 0 {
            return Err("production.pilot_variants must be at least 1".to_string());
        }
        if self.production.follow_on_episodes > MAX_FOLLOW_ON_EPISODES {
            return Err(format!(
                "production.follow_on_episodes must be at most {MAX_FOLLOW_ON_EPISODES}"
            ));
        }
        if self.production.max_retries == 0 {
            return Err("production.max_retries must be at least 1".to_string());
        }
        for (label, bounds) in [
            ("video", &self.generation.video),
            ("audio", &self.generation.audio),
        ] {
            if bounds.min_duration_seconds > bounds.max_duration_seconds {
                return Err(format!(
                    "generation.{label} duration bounds are inverted ({} > {})",
                    bounds.min_duration_seconds, bounds.max_duration_seconds
                ));
            }
            if bounds.aspect_ratio_value().is_none() {
                return Err(format!(
                    "generation.{label}.aspect_ratio is not of the form W:H: {}",
                    bounds.aspect_ratio
                ));
            }
        }
        if self.payouts.unclaimed_holding_days <= 0 {
            return Err("payouts.unclaimed_holding_days must be positive".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub base_dir: String,
    pub data_dir: String,
    #[serde(default = "default_database")]
    pub database: String,
}

fn default_database() -> String {
    "studio.sqlite".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VotingSection {
    pub batch_limit: usize,
}

impl Default for VotingSection {
    fn default() -> Self {
        Self { batch_limit: 16 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProductionSection {
    pub pilot_variants: u32,
    pub follow_on_episodes: u32,
    pub schedule_follow_ons_with_pilot: bool,
    pub max_retries: u32,
    pub max_manual_retries: u32,
    pub stale_after_minutes: i64,
    pub batch_size: usize,
    pub max_concurrent_jobs: usize,
    pub backoff_base_seconds: i64,
    pub backoff_cap_seconds: i64,
    pub backoff_jitter_seconds: i64,
    pub auto_publish: bool,
    pub pilot_kind: RenderKind,
    pub follow_on_kind: RenderKind,
}

impl Default for ProductionSection {
    fn default() -> Self {
        Self {
            pilot_variants: 4,
            follow_on_episodes: 4,
            schedule_follow_ons_with_pilot: false,
            max_retries: 3,
            max_manual_retries: 5,
            stale_after_minutes: 10,
            batch_size: 8,
            max_concurrent_jobs: 2,
            backoff_base_seconds: 60,
            backoff_cap_seconds: 3600,
            backoff_jitter_seconds: 0,
            auto_publish: false,
            pilot_kind: RenderKind::Video,
            follow_on_kind: RenderKind::Video,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerationSection {
    pub endpoint: String,
    #[serde(default = "default_gateway_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    pub video: RenderBounds,
    pub audio: RenderBounds,
}

fn default_gateway_timeout() -> u64 {
    900
}

fn default_fps() -> u32 {
    24
}

fn default_width() -> u32 {
    1280
}

fn default_height() -> u32 {
    720
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RenderBounds {
    pub min_duration_seconds: f64,
    pub max_duration_seconds: f64,
    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: String,
}

fn default_aspect_ratio() -> String {
    "16:9".to_string()
}

impl RenderBounds {
    pub fn aspect_ratio_value(&self) -> Option<f64> {
        parse_aspect_ratio(&self.aspect_ratio)
    }
}

/// Parses `W:H` into a width over height ratio.
pub fn parse_aspect_ratio(value: &str) -> Option<f64> {
    let (w, h) = value.split_once(':')?;
    let w: f64 = w.trim().parse().ok()?;
    let h: f64 = h.trim().parse().ok()?;
    if w <= 0.0 || h <= 0.0 {
        return None;
    }
    Some(w / h)
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    pub root_dir: String,
    pub public_base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PayoutsSection {
    pub creator_bps: u32,
    pub platform_bps: u32,
    pub agent_bps: u32,
    pub platform_wallet: Option<String>,
    pub unclaimed_holding_days: i64,
    pub max_transfer_retries: u32,
    pub transfer_batch_size: usize,
    pub stale_transfer_minutes: i64,
    pub transfer_endpoint: Option<String>,
}

impl Default for PayoutsSection {
    fn default() -> Self {
        Self {
            creator_bps: 8_000,
            platform_bps: 1_900,
            agent_bps: 100,
            platform_wallet: None,
            unclaimed_holding_days: 30,
            max_transfer_retries: 5,
            transfer_batch_size: 32,
            stale_transfer_minutes: 10,
            transfer_endpoint: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SweeperSection {
    pub batch_size: usize,
}

impl Default for SweeperSection {
    fn default() -> Self {
        Self { batch_size: 100 }
    }
}

pub fn load_studio_config<P: AsRef<Path>>(path: P) -> Result<StudioConfig> {
    let path = path.as_ref();
    let config: StudioConfig = load_toml(path)?;
    config.validate().map_err(|reason| ConfigError::Invalid {
        path: path.to_path_buf(),
        reason,
    })?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/molt.toml");
        let config = load_studio_config(path).expect("config should parse");
        assert_eq!(config.production.pilot_variants, 4);
        assert_eq!(config.production.max_retries, 3);
        assert_eq!(config.payouts.creator_bps, 8_000);
        assert_eq!(config.generation.video.aspect_ratio, "16:9");
        assert!(config.database_path().ends_with("studio.sqlite"));
    }

    #[test]
    fn rejects_split_that_does_not_sum_to_whole() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/molt.toml");
        let mut config = load_studio_config(path).unwrap();
        config.payouts.agent_bps = 200;
        let err = config.validate().unwrap_err();
        assert!(err.contains("10000"));
    }

    #[test]
    fn parses_aspect_ratio() {
        let bounds = RenderBounds {
            min_duration_seconds: 1.0,
            max_duration_seconds: 2.0,
            aspect_ratio: "9:16".into(),
        };
        let ratio = bounds.aspect_ratio_value().unwrap();
        assert!((ratio - 0.5625).abs() < 1e-9);
        let broken = RenderBounds {
            aspect_ratio: "wide".into(),
            ..bounds
        };
        assert!(broken.aspect_ratio_value().is_none());
    }
}
