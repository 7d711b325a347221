//! The TOML configuration file.
//!
//! ```toml
//! data_dir = "data"
//!
//! [budget]
//! episode_tokens = 25000
//!
//! [[backends]]
//! name = "sonnet"
//! provider = "anthropic"
//! model = "claude-3-5-sonnet-latest"
//! api_key_env = "ANTHROPIC_API_KEY"
//! input_per_million = 3.0
//! output_per_million = 15.0
//!
//! [routes]
//! reasoning = ["sonnet"]
//! bulk_generation = ["haiku", "sonnet"]
//! ```
//!
//! Pipeline sections (`[budget]`, `[routing]`, `[extraction]`, `[research]`,
//! `[content]`, `[validation]`, `[publishing]`) default individually.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use llm::BackendSpec;
use pipeline::{PipelineConfig, TaskClass};

/// Everything the binary reads from its config file.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub pipeline: PipelineConfig,
    pub backends: Vec<BackendSpec>,
    pub routes: BTreeMap<TaskClass, Vec<String>>,
}

/// The keys outside the pipeline sections.
#[derive(Deserialize)]
struct Wiring {
    #[serde(default = "default_data_dir")]
    data_dir: PathBuf,
    #[serde(default)]
    backends: Vec<BackendSpec>,
    #[serde(default)]
    routes: BTreeMap<TaskClass, Vec<String>>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

impl AppConfig {
    /// Reads and validates `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Parses and validates a TOML document.
    pub fn parse(raw: &str) -> Result<Self> {
        let wiring: Wiring = toml::from_str(raw)?;
        let pipeline: PipelineConfig = toml::from_str(raw)?;
        let config = Self {
            data_dir: wiring.data_dir,
            pipeline,
            backends: wiring.backends,
            routes: wiring.routes,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.pipeline.validate()?;

        let mut names = HashSet::new();
        for backend in &self.backends {
            if !names.insert(backend.name.as_str()) {
                bail!("backend '{}' is declared twice", backend.name);
            }
        }
        for class in TaskClass::ALL {
            let Some(route) = self.routes.get(&class).filter(|r| !r.is_empty()) else {
                bail!("routes.{class} must list at least one backend");
            };
            if let Some(unknown) = route.iter().find(|n| !names.contains(n.as_str())) {
                bail!("routes.{class} names unknown backend '{unknown}'");
            }
        }
        Ok(())
    }

    /// Backend specs in the order `class` tries them.
    pub fn route(&self, class: TaskClass) -> Vec<&BackendSpec> {
        self.routes
            .get(&class)
            .into_iter()
            .flatten()
            .filter_map(|name| self.backends.iter().find(|b| &b.name == name))
            .collect()
    }
}
