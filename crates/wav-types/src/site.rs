use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Benchmark site identifiers. The set is closed; dataset files referencing
/// anything else fail at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Site {
    Shopping,
    ShoppingAdmin,
    Reddit,
    Gitlab,
    Map,
    Wikipedia,
}

impl Site {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Shopping => "shopping",
            Self::ShoppingAdmin => "shopping_admin",
            Self::Reddit => "reddit",
            Self::Gitlab => "gitlab",
            Self::Map => "map",
            Self::Wikipedia => "wikipedia",
        }
    }

    /// Placeholder used in dataset URL templates, e.g. `__SHOPPING_ADMIN__/sales/`.
    pub fn url_name_template(self) -> &'static str {
        match self {
            Self::Shopping => "__SHOPPING__",
            Self::ShoppingAdmin => "__SHOPPING_ADMIN__",
            Self::Reddit => "__REDDIT__",
            Self::Gitlab => "__GITLAB__",
            Self::Map => "__MAP__",
            Self::Wikipedia => "__WIKIPEDIA__",
        }
    }

    pub fn all() -> &'static [Site] {
        &[
            Self::Shopping,
            Self::ShoppingAdmin,
            Self::Reddit,
            Self::Gitlab,
            Self::Map,
            Self::Wikipedia,
        ]
    }

    pub fn parse(name: &str) -> Result<Self> {
        let normalized = name.trim().to_ascii_lowercase();
        Self::all()
            .iter()
            .copied()
            .find(|site| site.as_str() == normalized)
            .ok_or_else(|| {
                anyhow!(
                    "Invalid site name: '{}'. Valid sites: {}",
                    name,
                    Self::all()
                        .iter()
                        .map(|s| s.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            })
    }
}

impl std::fmt::Display for Site {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_every_site() {
        for site in Site::all() {
            assert_eq!(Site::parse(site.as_str()).expect("parse"), *site);
        }
    }

    #[test]
    fn parse_rejects_unknown_site() {
        let err = Site::parse("intranet").expect_err("unknown site should fail");
        assert!(err.to_string().contains("Invalid site name"));
    }

    #[test]
    fn serde_uses_snake_case_names() {
        let json = serde_json::to_string(&Site::ShoppingAdmin).expect("serialize");
        assert_eq!(json, "\"shopping_admin\"");
        let back: Site = serde_json::from_str("\"shopping_admin\"").expect("deserialize");
        assert_eq!(back, Site::ShoppingAdmin);
    }
}
