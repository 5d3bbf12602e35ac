// src/services/extractor.rs

//! Listing extraction service.
//!
//! Fetches a target page (with retry and identity rotation) and turns it into
//! listing entries using the target's CSS selectors.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::{CompiledSelectors, FetchStrategy, ListingEntry, SpiderConfig, Target};
use crate::services::IdentityProvider;
use crate::services::render::Renderer;
use crate::utils::http::{create_client, fetch_text};
use crate::utils::url::{is_followable, resolve};
use crate::utils::{RandomSource, random_delay};

/// Anything that can turn a target into listings.
#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn fetch_listings(&self, target: &Target) -> Result<Vec<ListingEntry>>;
}

/// Wait before retry number `attempt` (1-based): a base interval drawn from
/// `[min_secs, max_secs]`, scaled by the attempt index.
pub fn retry_delay(rng: &dyn RandomSource, attempt: u32, min_secs: f64, max_secs: f64) -> Duration {
    random_delay(rng, min_secs, max_secs) * attempt.max(1)
}

/// Service for extracting listings from target pages.
pub struct ListingExtractor {
    config: SpiderConfig,
    client: reqwest::Client,
    identities: Arc<IdentityProvider>,
    renderer: Arc<dyn Renderer>,
    rng: Arc<dyn RandomSource>,
    cancel: CancellationToken,
}

impl ListingExtractor {
    /// Create a new extractor with the given configuration.
    pub fn new(
        config: SpiderConfig,
        identities: Arc<IdentityProvider>,
        renderer: Arc<dyn Renderer>,
        rng: Arc<dyn RandomSource>,
    ) -> Result<Self> {
        let client = create_client(&config, None)?;
        Ok(Self {
            config,
            client,
            identities,
            renderer,
            rng,
            cancel: CancellationToken::new(),
        })
    }

    /// Abort backoff sleeps and in-flight requests when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fetch the page body, retrying transport and status failures.
    async fn fetch_with_retry(&self, url: &str) -> Result<String> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                self.back_off(url, attempt - 1).await?;
            }

            let headers = self.identities.next_headers();
            let result = match self.client_for_attempt(url) {
                Ok(client) => tokio::select! {
                    result = fetch_text(&client, url, headers) => result,
                    _ = self.cancel.cancelled() => {
                        return Err(AppError::crawl(url, "cancelled"));
                    }
                },
                Err(e) => Err(e),
            };

            match result {
                Ok(body) => return Ok(body),
                Err(e) if e.is_transport() => {
                    log::warn!("Request failed (attempt {attempt}/{max_attempts}) for {url}: {e}");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| AppError::crawl(url, "no attempts made")))
    }

    /// Shared client, or a fresh one behind the proxy drawn for this attempt.
    /// A proxy that cannot be used fails only the current attempt.
    fn client_for_attempt(&self, url: &str) -> Result<reqwest::Client> {
        match self.config.use_proxy.then(|| self.identities.next_proxy()).flatten() {
            Some(proxy) => {
                log::debug!("Using proxy {proxy} for {url}");
                create_client(&self.config, Some(proxy))
            }
            None => Ok(self.client.clone()),
        }
    }

    /// Sleep before the retry that follows attempt `attempt`.
    async fn back_off(&self, url: &str, attempt: u32) -> Result<()> {
        let delay = retry_delay(
            self.rng.as_ref(),
            attempt,
            self.config.retry_delay_min_secs,
            self.config.retry_delay_max_secs,
        );
        log::debug!("Waiting {:.1}s before retrying {url}", delay.as_secs_f64());
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = self.cancel.cancelled() => Err(AppError::crawl(url, "cancelled")),
        }
    }

    /// Obtain page HTML using the target's strategy.
    async fn load_page(&self, target: &Target) -> Result<String> {
        if target.selectors.strategy == FetchStrategy::Rendered {
            if self.renderer.available() {
                let settle = Duration::from_secs(self.config.render_settle_secs);
                let user_agent = self.identities.next_user_agent();
                match self
                    .renderer
                    .render(&target.url, user_agent.as_deref(), settle)
                    .await
                {
                    Ok(html) => return Ok(html),
                    Err(e) => log::warn!(
                        "Rendering {} failed ({e}), falling back to static fetch",
                        target.name
                    ),
                }
            } else {
                log::warn!(
                    "Renderer unavailable, fetching {} statically",
                    target.name
                );
            }
        }

        self.fetch_with_retry(&target.url).await
    }
}

#[async_trait]
impl ListingSource for ListingExtractor {
    async fn fetch_listings(&self, target: &Target) -> Result<Vec<ListingEntry>> {
        let selectors = target.selectors.compile()?;
        let html = self.load_page(target).await?;
        let entries = parse_listings(&html, target, &selectors);
        log::debug!("{}: parsed {} listings", target.name, entries.len());
        Ok(entries)
    }
}

/// Extract listings from a document.
///
/// Containers that yield no usable title are skipped without affecting the
/// rest of the page.
pub fn parse_listings(html: &str, target: &Target, selectors: &CompiledSelectors) -> Vec<ListingEntry> {
    let document = Html::parse_document(html);
    let mut entries = Vec::new();

    for container in document.select(&selectors.container) {
        match parse_container(container, target, selectors) {
            Some(entry) => entries.push(entry),
            None => log::debug!("{}: skipped a container without usable title", target.name),
        }
    }

    entries
}

fn parse_container(
    container: ElementRef<'_>,
    target: &Target,
    selectors: &CompiledSelectors,
) -> Option<ListingEntry> {
    let title = container
        .select(&selectors.title)
        .next()
        .map(element_text)
        .unwrap_or_else(|| element_text(container));
    if title.is_empty() {
        return None;
    }

    if !target.matches_keywords(&title) {
        return None;
    }

    let url = find_link(container, selectors.link.as_ref())
        .and_then(|href| resolve(&target.url, href))
        .unwrap_or_else(|| target.url.clone());

    Some(ListingEntry {
        title,
        url,
        location: optional_text(container, selectors.location.as_ref()),
        detail: optional_text(container, selectors.detail.as_ref()),
    })
}

/// Link selector match, then the container itself if it is an anchor, then
/// the first anchor inside it.
fn find_link<'a>(container: ElementRef<'a>, link_sel: Option<&Selector>) -> Option<&'a str> {
    let followable = |el: ElementRef<'a>| el.value().attr("href").filter(|h| is_followable(h));

    if let Some(href) = link_sel.and_then(|sel| container.select(sel).find_map(followable)) {
        return Some(href);
    }
    if container.value().name() == "a" {
        if let Some(href) = followable(container) {
            return Some(href);
        }
    }

    let anchor = Selector::parse("a[href]").ok()?;
    container.select(&anchor).find_map(followable)
}

fn optional_text(container: ElementRef<'_>, sel: Option<&Selector>) -> String {
    sel.and_then(|s| container.select(s).next())
        .map(element_text)
        .unwrap_or_default()
}

/// Element text with whitespace runs between text nodes joined by one space.
fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ListingSelectors;
    use crate::services::render::NoRenderer;
    use crate::utils::FixedRandom;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAGE: &str = r#"
        <html><body><ul>
          <li class="job">
            <h3> Backend Intern </h3>
            <span class="loc">Beijing</span>
            <span class="team">Platform</span>
            <a class="apply" href="/jobs/1">Apply</a>
          </li>
          <li class="job">
            <h3>   </h3>
          </li>
          <li class="job">
            <h3>Senior Designer</h3>
            <a href="https://other.example/jobs/2">Apply</a>
          </li>
          <li class="job"><a href="//cdn.example/jobs/3">Data Intern</a></li>
          <li class="job"><span>Ops Intern</span></li>
        </ul></body></html>
    "#;

    fn target(url: &str, keywords: &[&str]) -> Target {
        Target {
            name: "Acme".into(),
            url: url.into(),
            enabled: true,
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            selectors: ListingSelectors {
                container_selector: "li.job".into(),
                title_selector: "h3".into(),
                link_selector: Some("a.apply".into()),
                location_selector: Some(".loc".into()),
                detail_selector: Some(".team".into()),
                strategy: FetchStrategy::Static,
            },
        }
    }

    fn parse(target: &Target, html: &str) -> Vec<ListingEntry> {
        let selectors = target.selectors.compile().unwrap();
        parse_listings(html, target, &selectors)
    }

    fn quick_config(max_attempts: u32) -> SpiderConfig {
        SpiderConfig {
            timeout_secs: 5,
            max_attempts,
            retry_delay_min_secs: 0.0,
            retry_delay_max_secs: 0.0,
            ..SpiderConfig::default()
        }
    }

    fn extractor(config: SpiderConfig) -> ListingExtractor {
        extractor_with(config, FixedRandom::lowest())
    }

    fn extractor_with(config: SpiderConfig, rng: FixedRandom) -> ListingExtractor {
        let rng: Arc<dyn RandomSource> = Arc::new(rng);
        let identities = Arc::new(IdentityProvider::new(&config, Arc::clone(&rng)).unwrap());
        ListingExtractor::new(config, identities, Arc::new(NoRenderer), rng).unwrap()
    }

    #[test]
    fn parses_entries_with_fallbacks() {
        let t = target("https://acme.example/careers/", &[]);
        let entries = parse(&t, PAGE);

        let titles: Vec<_> = entries.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(
            titles,
            vec!["Backend Intern", "Senior Designer", "Data Intern", "Ops Intern"]
        );

        assert_eq!(entries[0].url, "https://acme.example/jobs/1");
        assert_eq!(entries[0].location, "Beijing");
        assert_eq!(entries[0].detail, "Platform");
        // no a.apply: first anchor in the container
        assert_eq!(entries[1].url, "https://other.example/jobs/2");
        assert_eq!(entries[1].location, "");
        // protocol-relative link resolved against the page scheme
        assert_eq!(entries[2].url, "https://cdn.example/jobs/3");
        // no anchor at all: page URL
        assert_eq!(entries[3].url, "https://acme.example/careers/");
    }

    #[test]
    fn blank_titles_never_become_entries() {
        let t = target("https://acme.example/", &[]);
        let html = r#"<div><li class="job"><h3> </h3></li><li class="job"></li></div>"#;
        assert!(parse(&t, html).is_empty());
    }

    #[test]
    fn keyword_filter_keeps_matching_titles() {
        let t = target("https://acme.example/", &["intern"]);
        let titles: Vec<_> = parse(&t, PAGE).into_iter().map(|e| e.title).collect();
        assert_eq!(titles, vec!["Backend Intern", "Data Intern", "Ops Intern"]);
    }

    #[test]
    fn container_anchor_is_its_own_link() {
        let mut t = target("https://acme.example/", &[]);
        t.selectors.container_selector = "a.card".into();
        t.selectors.title_selector = ".t".into();
        t.selectors.link_selector = None;
        let html = r#"<a class="card" href="/jobs/9"><span class="t">QA Intern</span></a>"#;
        let entries = parse(&t, html);
        assert_eq!(entries[0].url, "https://acme.example/jobs/9");
    }

    #[test]
    fn retry_delay_scales_with_attempt() {
        let rng = FixedRandom::new(vec![0], vec![0.5]);
        assert_eq!(retry_delay(&rng, 1, 2.0, 4.0), Duration::from_secs(3));
        assert_eq!(retry_delay(&rng, 2, 2.0, 4.0), Duration::from_secs(6));
        assert_eq!(retry_delay(&rng, 3, 2.0, 4.0), Duration::from_secs(9));
    }

    #[tokio::test]
    async fn fetches_and_parses_from_server() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/careers"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html; charset=utf-8")
                    .set_body_string(PAGE),
            )
            .expect(1)
            .mount(&server)
            .await;

        let t = target(&format!("{}/careers", server.uri()), &[]);
        let entries = extractor(quick_config(3)).fetch_listings(&t).await.unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].url, format!("{}/jobs/1", server.uri()));
    }

    #[tokio::test]
    async fn retries_error_status_until_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/careers"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let t = target(&format!("{}/careers", server.uri()), &[]);
        let err = extractor(quick_config(3)).fetch_listings(&t).await.unwrap_err();
        assert!(matches!(err, AppError::HttpStatus { status: 503, .. }));
    }

    #[tokio::test]
    async fn recovers_when_a_retry_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/careers"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/careers"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .mount(&server)
            .await;

        let t = target(&format!("{}/careers", server.uri()), &[]);
        let entries = extractor(quick_config(2)).fetch_listings(&t).await.unwrap();
        assert_eq!(entries.len(), 4);
    }

    #[tokio::test]
    async fn every_attempt_draws_a_fresh_identity() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/careers"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/careers"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .mount(&server)
            .await;

        let t = target(&format!("{}/careers", server.uri()), &[]);
        let ex = extractor_with(quick_config(3), FixedRandom::new(vec![0, 1, 2], vec![0.0]));
        assert_eq!(ex.fetch_listings(&t).await.unwrap().len(), 4);

        let agents: Vec<String> = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter_map(|r| {
                r.headers
                    .iter()
                    .find(|(name, _)| name.as_str() == "user-agent")
                    .map(|(_, values)| values.last().as_str().to_string())
            })
            .collect();
        assert_eq!(agents.len(), 3);
        assert_ne!(agents[0], agents[1]);
        assert_ne!(agents[1], agents[2]);
        assert_ne!(agents[0], agents[2]);
    }

    #[tokio::test]
    async fn unusable_proxy_only_fails_its_attempt() {
        let proxy = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/careers"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .expect(1)
            .mount(&proxy)
            .await;

        let config = SpiderConfig {
            use_proxy: true,
            proxies: vec!["http://bad host:1".into(), proxy.uri()],
            ..quick_config(3)
        };
        // per attempt: user agent, then proxy
        let ex = extractor_with(config, FixedRandom::new(vec![0, 0, 1, 1], vec![0.0]));
        let t = target("http://jobs.example/careers", &[]);
        let entries = ex.fetch_listings(&t).await.unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].url, "http://jobs.example/jobs/1");
    }

    #[tokio::test]
    async fn rendered_target_falls_back_to_static() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .expect(1)
            .mount(&server)
            .await;

        let mut t = target(&format!("{}/careers", server.uri()), &[]);
        t.selectors.strategy = FetchStrategy::Rendered;
        let entries = extractor(quick_config(1)).fetch_listings(&t).await.unwrap();
        assert_eq!(entries.len(), 4);
    }

    #[tokio::test]
    async fn cancelled_fetch_stops_early() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let ex = extractor(quick_config(3)).with_cancellation(cancel);
        let t = target("http://127.0.0.1:9/careers", &[]);
        assert!(ex.fetch_listings(&t).await.is_err());
    }
}
