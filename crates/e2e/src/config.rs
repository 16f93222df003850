//! Suite configuration
//!
//! One YAML file describes how the runner is invoked, default wait settings,
//! the session every test logs into, and per-module overrides. Any field left
//! out falls back to its default; a module override only replaces the fields
//! it names.
//!
//! ```yaml
//! run:
//!   workers: 4
//!   paths: [tests]
//! wait:
//!   timeout_secs: 15
//! session:
//!   base_url: https://livedesign.example.com
//! modules:
//!   test_mpo:
//!     timeout_secs: 60
//!     project: MPO Scoring
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::command::RunConfig;
use crate::error::{E2eError, E2eResult};
use crate::load::LoadConfig;
use crate::wait::WaitSettings;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteConfig {
    pub run: RunConfig,
    pub wait: WaitSettings,
    pub session: SessionDefaults,
    pub load: LoadConfig,
    pub modules: BTreeMap<String, ModuleOverrides>,
}

/// Session every test starts from unless its module overrides it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionDefaults {
    pub base_url: String,
    pub project: String,
    pub user: String,
    pub browser: String,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9080".to_string(),
            project: "Global".to_string(),
            user: "demo".to_string(),
            browser: "chrome".to_string(),
        }
    }
}

/// Per-module settings; `None` keeps the suite default
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModuleOverrides {
    pub timeout_secs: Option<f64>,
    pub poll_interval_ms: Option<u64>,
    pub project: Option<String>,
    pub user: Option<String>,
    pub browser: Option<String>,
}

/// Effective settings for one test module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSettings {
    pub module: String,
    pub wait: WaitSettings,
    pub base_url: String,
    pub project: String,
    pub user: String,
    pub browser: String,
}

impl SuiteConfig {
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> E2eResult<Self> {
        debug!("Loading suite config from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Reject overrides that would not resolve
    pub fn validate(&self) -> E2eResult<()> {
        for (module, overrides) in &self.modules {
            if let Some(secs) = overrides.timeout_secs {
                timeout_from_secs(module, secs)?;
            }
        }
        Ok(())
    }

    /// Settings for `module`, with its overrides applied over the suite defaults
    pub fn resolve(&self, module: &str) -> E2eResult<ModuleSettings> {
        let overrides = self.modules.get(module).cloned().unwrap_or_default();
        let mut wait = self.wait.clone();

        if let Some(secs) = overrides.timeout_secs {
            wait.timeout = timeout_from_secs(module, secs)?;
        }
        if let Some(ms) = overrides.poll_interval_ms {
            wait.poll_interval = Duration::from_millis(ms);
        }

        let session = &self.session;
        Ok(ModuleSettings {
            module: module.to_string(),
            wait,
            base_url: session.base_url.clone(),
            project: overrides.project.unwrap_or_else(|| session.project.clone()),
            user: overrides.user.unwrap_or_else(|| session.user.clone()),
            browser: overrides.browser.unwrap_or_else(|| session.browser.clone()),
        })
    }
}

fn timeout_from_secs(module: &str, secs: f64) -> E2eResult<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|e| {
        E2eError::InvalidConfig(format!("module '{module}': invalid timeout_secs {secs}: {e}"))
    })
}
