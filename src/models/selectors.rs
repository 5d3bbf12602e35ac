// src/models/selectors.rs

//! CSS selectors for extracting listings from a career page.

use scraper::Selector;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// How a page body is obtained before parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FetchStrategy {
    /// Plain HTTP GET
    #[default]
    Static,
    /// Headless browser render, falling back to `Static` when unavailable
    Rendered,
}

/// CSS selectors for scraping a listing page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingSelectors {
    /// Selector for each listing element on the page
    pub container_selector: String,

    /// Selector for the title element within a container
    pub title_selector: String,

    /// Selector for the link element within a container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_selector: Option<String>,

    /// Selector for the location element within a container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_selector: Option<String>,

    /// Selector for a detail element (department, team, ...) within a container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail_selector: Option<String>,

    #[serde(default)]
    pub strategy: FetchStrategy,
}

/// Selectors parsed once per fetch.
#[derive(Debug)]
pub struct CompiledSelectors {
    pub container: Selector,
    pub title: Selector,
    pub link: Option<Selector>,
    pub location: Option<Selector>,
    pub detail: Option<Selector>,
}

impl ListingSelectors {
    /// Parse every configured selector.
    pub fn compile(&self) -> Result<CompiledSelectors> {
        Ok(CompiledSelectors {
            container: parse_selector(&self.container_selector)?,
            title: parse_selector(&self.title_selector)?,
            link: parse_optional(self.link_selector.as_deref())?,
            location: parse_optional(self.location_selector.as_deref())?,
            detail: parse_optional(self.detail_selector.as_deref())?,
        })
    }
}

/// Parse a CSS selector, mapping failures into [`AppError::Selector`].
pub fn parse_selector(s: &str) -> Result<Selector> {
    if s.trim().is_empty() {
        return Err(AppError::selector(s, "selector is empty"));
    }
    Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
}

fn parse_optional(s: Option<&str>) -> Result<Option<Selector>> {
    s.filter(|s| !s.trim().is_empty())
        .map(parse_selector)
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selectors(container: &str, title: &str) -> ListingSelectors {
        ListingSelectors {
            container_selector: container.into(),
            title_selector: title.into(),
            link_selector: None,
            location_selector: Some(".loc".into()),
            detail_selector: Some("".into()),
            strategy: FetchStrategy::Static,
        }
    }

    #[test]
    fn test_parse_selector_valid() {
        assert!(parse_selector("div.class").is_ok());
        assert!(parse_selector("tr:has(a)").is_ok());
    }

    #[test]
    fn test_parse_selector_invalid() {
        assert!(parse_selector("[[invalid").is_err());
        assert!(parse_selector("   ").is_err());
    }

    #[test]
    fn compile_treats_blank_optional_selector_as_absent() {
        let compiled = selectors("li.job", "h3").compile().unwrap();
        assert!(compiled.location.is_some());
        assert!(compiled.detail.is_none());
        assert!(compiled.link.is_none());
    }

    #[test]
    fn compile_fails_on_bad_required_selector() {
        assert!(selectors("li.job", "[[").compile().is_err());
    }
}
