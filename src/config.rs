use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerCfg {
    pub bind: String,
}

impl Default for ServerCfg {
    fn default() -> Self {
        Self { bind: "127.0.0.1:8080".into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepCfg {
    pub name: String,
    /// How long the step stays `running` before it is marked done.
    pub duration_ms: u64,
}

impl StepCfg {
    fn new(name: &str, duration_ms: u64) -> Self {
        Self { name: name.into(), duration_ms }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SignalRange {
    pub min: u32,
    pub max: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineCfg {
    pub steps: Vec<StepCfg>,
    pub completion_delay_ms: u64,
    pub signal_range: SignalRange,
}

impl Default for PipelineCfg {
    fn default() -> Self {
        Self {
            steps: vec![
                StepCfg::new("Signal Scout", 2_000),
                StepCfg::new("Job Monitor", 7_000),
                StepCfg::new("Stack Watch", 6_000),
                StepCfg::new("Intent Ranker", 8_000),
                StepCfg::new("Pitch Agent", 5_000),
            ],
            completion_delay_ms: 2_000,
            signal_range: SignalRange { min: 5, max: 24 },
        }
    }
}

impl PipelineCfg {
    pub fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.name.clone()).collect()
    }

    pub fn completion_delay(&self) -> Duration {
        Duration::from_millis(self.completion_delay_ms)
    }

    /// Wall time from start until the run is marked completed.
    pub fn total_duration(&self) -> Duration {
        self.steps.iter().map(StepCfg::duration).sum::<Duration>() + self.completion_delay()
    }

    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            bail!("pipeline.steps must name at least one step");
        }
        if let Some(s) = self.steps.iter().find(|s| s.name.trim().is_empty()) {
            bail!("pipeline step names cannot be empty (duration {}ms)", s.duration_ms);
        }
        if self.signal_range.min > self.signal_range.max {
            bail!(
                "pipeline.signal_range is inverted: min {} > max {}",
                self.signal_range.min,
                self.signal_range.max
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeadsCfg {
    pub api_url: Option<String>,
    pub mock_mode: bool,
    pub timeout_ms: u64,
}

impl Default for LeadsCfg {
    fn default() -> Self {
        Self { api_url: None, mock_mode: false, timeout_ms: 3_000 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppCfg {
    pub server: ServerCfg,
    pub pipeline: PipelineCfg,
    pub leads: LeadsCfg,
}

impl AppCfg {
    /// Reads the optional YAML file, then applies `LEADSNIPER_*` overrides.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(p) => {
                let txt = tokio::fs::read_to_string(p)
                    .await
                    .context(format!("Failed to read config file: {}", p.display()))?;
                Self::from_yaml(&txt)?
            }
            None => Self::default(),
        };
        cfg.apply_env();
        cfg.pipeline.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml(txt: &str) -> Result<Self> {
        serde_yaml::from_str(txt).context("Failed to parse config YAML")
    }

    fn apply_env(&mut self) {
        if let Ok(bind) = std::env::var("LEADSNIPER_BIND") {
            self.server.bind = bind;
        }
        if let Ok(url) = std::env::var("LEADSNIPER_API_URL") {
            self.leads.api_url = Some(url).filter(|u| !u.trim().is_empty());
        }
        if let Some(mock) = std::env::var("LEADSNIPER_MOCK_MODE")
            .ok()
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        {
            self.leads.mock_mode = mock;
        }
    }
}
