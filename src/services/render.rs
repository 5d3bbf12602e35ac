// src/services/render.rs

//! Optional headless-browser rendering capability.
//!
//! Pages marked `strategy = "rendered"` are loaded through a [`Renderer`] when
//! one is available. Builds without the `render` feature, or hosts without a
//! browser, get [`NoRenderer`] and the extractor quietly uses plain HTTP.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Loads a page in a browser and returns the rendered HTML.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Whether rendering can actually be performed here.
    fn available(&self) -> bool;

    /// Render `url`, wait `settle`, and return the document HTML.
    async fn render(&self, url: &str, user_agent: Option<&str>, settle: Duration)
    -> Result<String>;
}

/// Capability stub used when no browser is available.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRenderer;

#[async_trait]
impl Renderer for NoRenderer {
    fn available(&self) -> bool {
        false
    }

    async fn render(&self, url: &str, _: Option<&str>, _: Duration) -> Result<String> {
        Err(crate::error::AppError::render(format!(
            "no renderer available for {url}"
        )))
    }
}

/// Pick the best renderer this build supports.
pub fn default_renderer() -> std::sync::Arc<dyn Renderer> {
    #[cfg(feature = "render")]
    {
        std::sync::Arc::new(chrome::ChromeRenderer::detect())
    }
    #[cfg(not(feature = "render"))]
    {
        std::sync::Arc::new(NoRenderer)
    }
}

#[cfg(feature = "render")]
pub mod chrome {
    //! Chrome/Chromium renderer via `headless_chrome`.

    use std::ffi::OsString;
    use std::time::Duration;

    use async_trait::async_trait;
    use headless_chrome::{Browser, LaunchOptions};

    use super::Renderer;
    use crate::error::{AppError, Result};

    /// Launches a fresh headless browser per render.
    #[derive(Debug, Clone)]
    pub struct ChromeRenderer {
        available: bool,
    }

    impl ChromeRenderer {
        /// Probe for a usable browser binary once, at construction.
        pub fn detect() -> Self {
            let available = headless_chrome::browser::default_executable().is_ok();
            if !available {
                log::warn!("No Chrome/Chromium executable found; rendered targets use static fetch");
            }
            Self { available }
        }
    }

    #[async_trait]
    impl Renderer for ChromeRenderer {
        fn available(&self) -> bool {
            self.available
        }

        async fn render(
            &self,
            url: &str,
            user_agent: Option<&str>,
            settle: Duration,
        ) -> Result<String> {
            let url = url.to_string();
            let user_agent = user_agent.map(str::to_string);

            tokio::task::spawn_blocking(move || render_blocking(&url, user_agent.as_deref(), settle))
                .await
                .map_err(AppError::render)?
        }
    }

    fn render_blocking(url: &str, user_agent: Option<&str>, settle: Duration) -> Result<String> {
        let mut args: Vec<OsString> = vec![
            "--disable-gpu".into(),
            "--disable-dev-shm-usage".into(),
            "--disable-blink-features=AutomationControlled".into(),
        ];
        if let Some(ua) = user_agent {
            args.push(format!("--user-agent={ua}").into());
        }
        let arg_refs = args.iter().map(|a| a.as_os_str()).collect();

        let browser = Browser::new(LaunchOptions {
            headless: true,
            sandbox: false,
            window_size: Some((1920, 1080)),
            args: arg_refs,
            ..Default::default()
        })
        .map_err(AppError::render)?;

        let tab = browser.new_tab().map_err(AppError::render)?;
        tab.navigate_to(url).map_err(AppError::render)?;
        tab.wait_until_navigated().map_err(AppError::render)?;
        std::thread::sleep(settle);

        tab.get_content().map_err(AppError::render)
    }
}
