//! Layered stage configuration.
//!
//! Precedence, lowest first: built-in defaults, environment variables, TOML
//! file, command-line flags.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use aggregation::persona::{default_personas, PersonaPolicy, PERSONA_ENV};
use aggregation::reward::DEFAULT_SCORER_TIMEOUT;
use aggregation::selector::DEFAULT_K;
use aggregation::{PersonaSelector, PipelineConfig, SelectionConfig, SelectionMethod};
use anyhow::{Context, Result};
use serde::Deserialize;

/// Maximum agent columns kept per record.
pub const TOP_K_ENV: &str = "STAGES_TOP_K";
/// `top_k` or `uniform_random`.
pub const METHOD_ENV: &str = "STAGES_SELECTION_METHOD";
/// Seed for `uniform_random`.
pub const SEED_ENV: &str = "STAGES_SELECTION_SEED";
/// Reward scorer timeout, seconds.
pub const SCORER_TIMEOUT_ENV: &str = "STAGES_SCORER_TIMEOUT_SECS";
/// Records assembled concurrently.
pub const CONCURRENCY_ENV: &str = "STAGES_CONCURRENCY";
/// JSONL transcript destination.
pub const TRANSCRIPT_ENV: &str = "STAGES_TRANSCRIPT_PATH";

/// Effective configuration for one CLI invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagesConfig {
    pub top_k: usize,
    pub method: SelectionMethod,
    pub seed: Option<u64>,
    pub scorer_timeout_secs: u64,
    pub concurrency: usize,
    /// Persona name, `RANDOM`, or none.
    pub persona: Option<String>,
    /// Persona name → preamble line. Starts with the built-in set.
    pub personas: BTreeMap<String, String>,
    pub transcript_path: Option<PathBuf>,
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_K,
            method: SelectionMethod::default(),
            seed: None,
            scorer_timeout_secs: DEFAULT_SCORER_TIMEOUT.as_secs(),
            concurrency: 1,
            persona: None,
            personas: default_personas(),
            transcript_path: None,
        }
    }
}

/// Optional overlay read from a TOML file.
///
/// ```toml
/// top_k = 5
/// method = "uniform_random"
/// seed = 7
/// persona = "coach"
///
/// [personas]
/// coach = "You are a calm sports coach."
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub top_k: Option<usize>,
    pub method: Option<SelectionMethod>,
    pub seed: Option<u64>,
    pub scorer_timeout_secs: Option<u64>,
    pub concurrency: Option<usize>,
    pub persona: Option<String>,
    #[serde(default)]
    pub personas: BTreeMap<String, String>,
    pub transcript_path: Option<PathBuf>,
}

impl ConfigFile {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).context("Failed to parse stages config TOML")
    }
}

/// Command-line overrides, applied last.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct ConfigOverrides {
    /// TOML config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Maximum agent outputs kept per record
    #[arg(long, global = true)]
    pub top_k: Option<usize>,

    /// Selection method: top_k or uniform_random
    #[arg(long, global = true)]
    pub method: Option<SelectionMethod>,

    /// Seed for uniform_random selection
    #[arg(long, global = true)]
    pub seed: Option<u64>,

    /// Persona name or RANDOM
    #[arg(long, global = true)]
    pub persona: Option<String>,

    /// Append transcript entries to this JSONL file
    #[arg(long, global = true)]
    pub transcript: Option<PathBuf>,

    /// Records assembled concurrently
    #[arg(long, global = true)]
    pub concurrency: Option<usize>,
}

impl StagesConfig {
    /// Defaults overlaid with the `STAGES_*` and persona environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(k) = env_parse::<usize>(TOP_K_ENV)? {
            config.top_k = k;
        }
        if let Some(method) = env_parse::<SelectionMethod>(METHOD_ENV)? {
            config.method = method;
        }
        if let Some(seed) = env_parse::<u64>(SEED_ENV)? {
            config.seed = Some(seed);
        }
        if let Some(secs) = env_parse::<u64>(SCORER_TIMEOUT_ENV)? {
            config.scorer_timeout_secs = secs;
        }
        if let Some(n) = env_parse::<usize>(CONCURRENCY_ENV)? {
            config.concurrency = n;
        }
        config.persona = std::env::var(PERSONA_ENV).ok();
        config.transcript_path = std::env::var(TRANSCRIPT_ENV).ok().map(PathBuf::from);
        Ok(config)
    }

    /// Environment, then `--config` file, then flags.
    pub fn load(overrides: &ConfigOverrides) -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Some(path) = &overrides.config {
            config.overlay(ConfigFile::from_file(path)?);
        }
        config.apply(overrides);
        Ok(config)
    }

    pub fn overlay(&mut self, file: ConfigFile) {
        if let Some(k) = file.top_k {
            self.top_k = k;
        }
        if let Some(method) = file.method {
            self.method = method;
        }
        if file.seed.is_some() {
            self.seed = file.seed;
        }
        if let Some(secs) = file.scorer_timeout_secs {
            self.scorer_timeout_secs = secs;
        }
        if let Some(n) = file.concurrency {
            self.concurrency = n;
        }
        if file.persona.is_some() {
            self.persona = file.persona;
        }
        if file.transcript_path.is_some() {
            self.transcript_path = file.transcript_path;
        }
        self.personas.extend(file.personas);
    }

    pub fn apply(&mut self, overrides: &ConfigOverrides) {
        if let Some(k) = overrides.top_k {
            self.top_k = k;
        }
        if let Some(method) = overrides.method {
            self.method = method;
        }
        if overrides.seed.is_some() {
            self.seed = overrides.seed;
        }
        if let Some(n) = overrides.concurrency {
            self.concurrency = n;
        }
        if overrides.persona.is_some() {
            self.persona = overrides.persona.clone();
        }
        if overrides.transcript.is_some() {
            self.transcript_path = overrides.transcript.clone();
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            selection: SelectionConfig {
                k: self.top_k,
                method: self.method,
                seed: self.seed,
                scorer_timeout_secs: self.scorer_timeout_secs,
            },
            max_concurrent_records: self.concurrency,
        }
    }

    pub fn persona_selector(&self) -> PersonaSelector {
        PersonaSelector::new(
            PersonaPolicy::parse(self.persona.as_deref()),
            self.personas.clone(),
        )
    }
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .context(format!("Invalid value for {name}: {value}")),
        _ => Ok(None),
    }
}
