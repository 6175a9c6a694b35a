use crate::site::Site;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

fn default_agent_response_file_name() -> String {
    "agent_response.json".to_string()
}

fn default_trace_file_name() -> String {
    "network.har".to_string()
}

fn default_eval_result_file_name() -> String {
    "eval_result.json".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub urls: Vec<String>,
    #[serde(default)]
    pub active_url_idx: Option<usize>,
}

impl EnvironmentConfig {
    pub fn active_url_idx(&self) -> Option<usize> {
        match self.active_url_idx {
            Some(idx) => Some(idx),
            None if !self.urls.is_empty() => Some(0),
            None => None,
        }
    }

    pub fn active_url(&self) -> Option<&str> {
        self.active_url_idx()
            .and_then(|idx| self.urls.get(idx))
            .map(String::as_str)
    }
}

/// Runtime configuration: per-site environment URLs plus the file names the
/// batch runner reads and writes inside each task directory. Only used for
/// placeholder substitution during evaluation, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WavConfig {
    #[serde(default = "default_agent_response_file_name")]
    pub agent_response_file_name: String,
    #[serde(default = "default_trace_file_name")]
    pub trace_file_name: String,
    #[serde(default = "default_eval_result_file_name")]
    pub eval_result_file_name: String,
    #[serde(default)]
    pub environments: BTreeMap<Site, EnvironmentConfig>,
}

impl Default for WavConfig {
    fn default() -> Self {
        Self {
            agent_response_file_name: default_agent_response_file_name(),
            trace_file_name: default_trace_file_name(),
            eval_result_file_name: default_eval_result_file_name(),
            environments: BTreeMap::new(),
        }
    }
}

impl WavConfig {
    /// Load from YAML or JSON. serde_yaml parses both.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed reading config file {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed parsing config file {}", path.display()))?;
        Ok(config)
    }

    fn environment(&self, site: Site) -> Option<&EnvironmentConfig> {
        self.environments.get(&site)
    }

    fn require_sites(&self, sites: &[Site]) -> Result<()> {
        let missing: Vec<&str> = sites
            .iter()
            .filter(|site| !self.environments.contains_key(site))
            .map(|site| site.as_str())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(anyhow!(
                "Sites {:?} not found in environments",
                missing
            ))
        }
    }

    fn site_base_url(&self, site: Site, url_idx: Option<usize>) -> Result<&str> {
        let env = self
            .environment(site)
            .ok_or_else(|| anyhow!("Sites [\"{}\"] not found in environments", site))?;
        match url_idx {
            Some(idx) => env
                .urls
                .get(idx)
                .map(String::as_str)
                .ok_or_else(|| anyhow!("url_idx {} out of range for site {}", idx, site)),
            None => env
                .active_url()
                .ok_or_else(|| anyhow!("site {} has no configured URLs", site)),
        }
    }

    /// Substitute a `__SITE__` placeholder with the site's environment URL.
    /// Sites are tried in order; with `strict` a template nobody matched is an
    /// error, otherwise it is returned untouched.
    pub fn render_url(
        &self,
        template: &str,
        sites: &[Site],
        strict: bool,
        url_idx: Option<usize>,
    ) -> Result<String> {
        self.require_sites(sites)?;
        for site in sites {
            let placeholder = site.url_name_template();
            if template.contains(placeholder) {
                let base = self.site_base_url(*site, url_idx)?;
                return Ok(template.replace(placeholder, base));
            }
        }
        if strict {
            return Err(anyhow!(
                "No site in {:?} matched template '{}'",
                sites.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
                template
            ));
        }
        Ok(template.to_string())
    }

    /// Replace a concrete environment URL prefix with its `__SITE__`
    /// placeholder. More specific (longer) base URLs win when several match.
    pub fn derender_url(&self, url: &str, sites: &[Site], strict: bool) -> Result<String> {
        self.require_sites(sites)?;
        let mut candidates: Vec<(Site, &str)> = Vec::new();
        for site in sites {
            if let Some(env) = self.environment(*site) {
                for base in &env.urls {
                    candidates.push((*site, base.as_str()));
                }
            }
        }
        candidates.sort_by_key(|(_, base)| std::cmp::Reverse(base.len()));
        for (site, base) in candidates {
            if let Some(rest) = url.strip_prefix(base) {
                return Ok(format!("{}{}", site.url_name_template(), rest));
            }
        }
        if strict {
            return Err(anyhow!(
                "URL '{}' does not match any configured URLs for sites {:?}",
                url,
                sites.iter().map(|s| s.as_str()).collect::<Vec<_>>()
            ));
        }
        Ok(url.to_string())
    }
}
