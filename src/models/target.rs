// src/models/target.rs

//! Watched page definitions.

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::ListingSelectors;

/// A career page to watch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    /// Display name, also part of every listing fingerprint
    pub name: String,

    /// URL of the listing page
    pub url: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Keep only titles containing one of these (case-insensitive); empty keeps all
    #[serde(default)]
    pub keywords: Vec<String>,

    /// CSS selectors for scraping
    #[serde(flatten)]
    pub selectors: ListingSelectors,
}

fn default_enabled() -> bool {
    true
}

impl Target {
    /// Check required fields and that every selector parses.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::validation("target with empty name"));
        }
        if self.url.trim().is_empty() {
            return Err(AppError::validation(format!(
                "target '{}' has an empty url",
                self.name
            )));
        }
        url::Url::parse(&self.url).map_err(|e| {
            AppError::validation(format!("target '{}' url '{}': {e}", self.name, self.url))
        })?;
        self.selectors.compile().map_err(|e| {
            AppError::validation(format!("target '{}': {e}", self.name))
        })?;
        Ok(())
    }

    /// Whether a title passes this target's keyword filter.
    pub fn matches_keywords(&self, title: &str) -> bool {
        let keywords: Vec<&str> = self
            .keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .collect();
        if keywords.is_empty() {
            return true;
        }

        let title = title.to_lowercase();
        keywords
            .iter()
            .any(|kw| title.contains(&kw.to_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FetchStrategy;

    fn create_test_target(keywords: &[&str]) -> Target {
        Target {
            name: "Acme".to_string(),
            url: "https://acme.example/careers".to_string(),
            enabled: true,
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            selectors: ListingSelectors {
                container_selector: "li.job".to_string(),
                title_selector: "h3".to_string(),
                link_selector: None,
                location_selector: None,
                detail_selector: None,
                strategy: FetchStrategy::Static,
            },
        }
    }

    #[test]
    fn test_empty_filter_keeps_all() {
        let target = create_test_target(&[]);
        assert!(target.matches_keywords("Anything at all"));
    }

    #[test]
    fn test_keyword_match_is_case_insensitive() {
        let target = create_test_target(&["Intern", "后端"]);
        assert!(target.matches_keywords("backend INTERN 2026"));
        assert!(target.matches_keywords("Java后端开发"));
        assert!(!target.matches_keywords("Senior Engineer"));
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let mut target = create_test_target(&[]);
        target.url = "not a url".into();
        assert!(target.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_selector() {
        let mut target = create_test_target(&[]);
        target.selectors.title_selector = "".into();
        assert!(target.validate().is_err());
    }
}
