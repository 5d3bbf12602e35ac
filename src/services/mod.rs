//! Service layer for the monitor.
//!
//! This module contains the business logic for:
//! - Listing extraction (`ListingExtractor`)
//! - Request identity rotation (`IdentityProvider`)
//! - Optional page rendering (`Renderer`)
//! - Notification delivery (`Notifier`)

mod extractor;
mod identity;
mod notifier;
pub mod render;

pub use extractor::{ListingExtractor, ListingSource, parse_listings, retry_delay};
pub use identity::{IdentityProvider, load_proxy_file};
pub use notifier::{
    Digest, DigestFormat, DigestItem, DigestSection, EmailNotifier, LogNotifier, Notifier,
    WebhookNotifier, build_notifier, sample_batch,
};
pub use render::{NoRenderer, Renderer, default_renderer};
