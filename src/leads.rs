use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::warn;

use crate::config::LeadsCfg;

const BUNDLED_LEADS: &str = include_str!("../data/mock_leads.json");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: String,
    pub company: String,
    pub trigger: String,
    pub inferred_pain: String,
    /// 0-100
    pub intent_score: u8,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_url: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_signal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_pitch: Option<String>,
}

pub fn bundled_leads() -> Result<Vec<Lead>> {
    serde_json::from_str(BUNDLED_LEADS).context("bundled lead data is not valid JSON")
}

pub type LeadFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

pub trait LeadSource: Send + Sync {
    fn list<'a>(&'a self) -> LeadFuture<'a, Vec<Lead>>;
    fn get<'a>(&'a self, id: &'a str) -> LeadFuture<'a, Option<Lead>>;
    fn name(&self) -> &'static str;
}

/// Leads held in memory; never fails.
pub struct LocalLeads {
    leads: Arc<Vec<Lead>>,
}

impl LocalLeads {
    pub fn new(leads: Vec<Lead>) -> Self {
        Self { leads: Arc::new(leads) }
    }

    pub fn bundled() -> Result<Self> {
        Ok(Self::new(bundled_leads()?))
    }
}

impl LeadSource for LocalLeads {
    fn list<'a>(&'a self) -> LeadFuture<'a, Vec<Lead>> {
        Box::pin(async move { Ok(self.leads.as_ref().clone()) })
    }

    fn get<'a>(&'a self, id: &'a str) -> LeadFuture<'a, Option<Lead>> {
        Box::pin(async move { Ok(self.leads.iter().find(|l| l.id == id).cloned()) })
    }

    fn name(&self) -> &'static str { "local" }
}

/// The dashboard backend's `/leads` endpoints.
pub struct HttpLeads {
    client: reqwest::Client,
    base_url: String,
}

impl HttpLeads {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }
}

impl LeadSource for HttpLeads {
    fn list<'a>(&'a self) -> LeadFuture<'a, Vec<Lead>> {
        Box::pin(async move {
            let url = format!("{}/leads", self.base_url);
            let leads = self.client.get(&url)
                .send().await?.error_for_status()?.json::<Vec<Lead>>().await?;
            Ok(leads)
        })
    }

    fn get<'a>(&'a self, id: &'a str) -> LeadFuture<'a, Option<Lead>> {
        Box::pin(async move {
            let url = format!("{}/leads/{}", self.base_url, id);
            let lead = self.client.get(&url)
                .send().await?.error_for_status()?.json::<Lead>().await?;
            Ok(Some(lead))
        })
    }

    fn name(&self) -> &'static str { "http" }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeadFilter {
    pub trigger: Option<String>,
    pub source: Option<String>,
    pub min_score: Option<u8>,
    /// Case-insensitive match on company, trigger or inferred pain.
    pub q: Option<String>,
}

impl LeadFilter {
    /// "All" / "all" and empty strings mean no filter, as the dashboard sends them.
    fn wants(value: &Option<String>) -> Option<&str> {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("all"))
    }

    pub fn matches(&self, lead: &Lead) -> bool {
        if let Some(t) = Self::wants(&self.trigger) {
            if !lead.trigger.eq_ignore_ascii_case(t) { return false; }
        }
        if let Some(s) = Self::wants(&self.source) {
            if !lead.source.eq_ignore_ascii_case(s) { return false; }
        }
        if let Some(min) = self.min_score {
            if lead.intent_score < min { return false; }
        }
        if let Some(q) = Self::wants(&self.q) {
            let q = q.to_lowercase();
            let hay = [&lead.company, &lead.trigger, &lead.inferred_pain];
            if !hay.iter().any(|h| h.to_lowercase().contains(&q)) { return false; }
        }
        true
    }

    /// Filters and orders by intent score, highest first.
    pub fn apply(&self, leads: Vec<Lead>) -> Vec<Lead> {
        let mut out: Vec<Lead> = leads.into_iter().filter(|l| self.matches(l)).collect();
        out.sort_by(|a, b| b.intent_score.cmp(&a.intent_score).then_with(|| a.id.cmp(&b.id)));
        out
    }
}

/// Upstream lead source with fallback to the bundled data.
pub struct LeadService {
    upstream: Option<Arc<dyn LeadSource>>,
    local: LocalLeads,
    mock_mode: AtomicBool,
}

impl LeadService {
    pub fn new(upstream: Option<Arc<dyn LeadSource>>, local: LocalLeads, mock_mode: bool) -> Self {
        Self { upstream, local, mock_mode: AtomicBool::new(mock_mode) }
    }

    pub fn from_cfg(cfg: &LeadsCfg) -> Result<Self> {
        let upstream = match &cfg.api_url {
            Some(url) => Some(Arc::new(HttpLeads::new(url.clone(), Duration::from_millis(cfg.timeout_ms))?) as Arc<dyn LeadSource>),
            None => None,
        };
        Ok(Self::new(upstream, LocalLeads::bundled()?, cfg.mock_mode))
    }

    pub fn set_mock_mode(&self, mode: bool) {
        self.mock_mode.store(mode, Ordering::Relaxed);
    }

    pub fn mock_mode(&self) -> bool {
        self.mock_mode.load(Ordering::Relaxed)
    }

    fn active_upstream(&self) -> Option<&Arc<dyn LeadSource>> {
        if self.mock_mode() { None } else { self.upstream.as_ref() }
    }

    pub async fn list_leads(&self) -> Vec<Lead> {
        if let Some(up) = self.active_upstream() {
            match up.list().await {
                Ok(leads) => return leads,
                Err(e) => warn!(source = up.name(), error = %e, "lead API unavailable, falling back to local data"),
            }
        }
        self.local.leads.as_ref().clone()
    }

    pub async fn get_lead(&self, id: &str) -> Option<Lead> {
        if let Some(up) = self.active_upstream() {
            match up.get(id).await {
                Ok(lead) => return lead,
                Err(e) => warn!(source = up.name(), lead_id = id, error = %e, "lead API unavailable, falling back to local data"),
            }
        }
        self.local.leads.iter().find(|l| l.id == id).cloned()
    }
}
