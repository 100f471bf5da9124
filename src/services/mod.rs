//! Service layer for the news pipeline.
//!
//! This module contains the integrations with the outside world:
//! - Source adapters for static and client-rendered listings (`SourceAdapter`)
//! - Headless browser rendering (`BrowserRenderer`)
//! - Relevance classification (`RelevanceClassifier`)
//! - Push delivery (`PushGateway`)

pub mod browser;
pub mod classifier;
pub mod push;
pub mod rendered;
pub mod sources;
pub mod static_page;

#[cfg(feature = "browser")]
pub use browser::WebDriverRenderer;
pub use browser::{BrowserRenderer, RenderRequest};
pub use classifier::{Classification, LlmClassifier, PassThroughClassifier, RelevanceClassifier};
pub use push::{DeliveryOutcome, ExpoPushGateway, PushGateway, PushMessage, is_valid_token};
pub use rendered::RenderedPageAdapter;
pub use sources::{SourceAdapter, build_adapters};
pub use static_page::StaticPageAdapter;
