//! # SSR Islands
//!
//! Streamed server rendering with partial hydration. Views render on the
//! server only; sub-trees marked as islands are collected during the render
//! pass, and a page script re-mounts exactly those islands in the browser.
//!
//! The pieces, leaves first:
//! - [`resource`]: views, islands, the element tree and the registry
//! - [`manifest`]: discovery, fingerprints and the persisted build manifest
//! - [`island`]: instance identifiers and the marker boundary
//! - [`collect`]: the pre-pass that records island instances in document order
//! - [`pipeline`]: the per-request streaming state machine
//! - [`page_script`]: the bootstrap script for one response
//! - [`revive`]: the client runtime and its host-agnostic model
//!
//! Supporting modules: [`context`] (per-request view context), [`render`]
//! (markup serializer), [`views`] (fallback views), [`config`] and [`utils`].
//!
//! The instance identifier `<typeId>$$<ordinal>` is the wire contract between
//! server collection and client revival. Neither side may change it alone.

pub mod collect;
pub mod config;
pub mod context;
pub mod island;
pub mod manifest;
pub mod page_script;
pub mod pipeline;
pub mod render;
pub mod resource;
pub mod revive;
pub mod utils;
pub mod views;

use std::env;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use collect::collect;
pub use config::IslandsConfig;
pub use context::{HeadTag, HtmlAttr, ScriptTag, ViewContext, ViewContextFields, ViewContextHandle};
pub use island::{wrap, InstanceId, IslandInstance, RenderPass};
pub use manifest::{Manifest, ManifestEntry, ManifestStore, PersistOutcome};
pub use page_script::{synthesize, PageScript, ScriptAssets};
pub use pipeline::{AppShell, Islands, Outcome, PipelineState, Response};
pub use resource::{
    from_fn, Component, Element, IslandDef, Node, Props, Registry, ResourceKind, Scope, ViewDef,
};
pub use revive::{
    revive, runtime_asset, scan_markers, MarkerElement, RuntimeAsset, REVIVAL_RUNTIME_JS,
};

// ---------------------------------------------------------------------------
// Build Mode
// ---------------------------------------------------------------------------

/// Environment variable consulted by [`BuildMode::from_env`].
pub const MODE_ENV_VAR: &str = "ISLANDS_ENV";

/// The single production/development switch.
///
/// It decides whether diagnostics are emitted into page scripts, whether the
/// manifest is loaded or regenerated at startup, and whether error blocks
/// carry the error chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    /// Development: diagnostics on, manifest regenerated and diffed.
    #[default]
    #[serde(alias = "development")]
    Dev,
    /// Production: no diagnostics in client code, manifest loaded from disk.
    #[serde(alias = "production")]
    Prod,
}

impl BuildMode {
    /// Reads [`MODE_ENV_VAR`]. Anything but `production`/`prod` is development.
    pub fn from_env() -> Self {
        match env::var(MODE_ENV_VAR) {
            Ok(value) => Self::parse(&value),
            Err(_) => Self::Dev,
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Self::Prod,
            _ => Self::Dev,
        }
    }

    pub fn is_prod(self) -> bool {
        self == Self::Prod
    }

    /// Source file extensions considered during discovery.
    pub fn source_extensions(self) -> &'static [&'static str] {
        match self {
            Self::Prod => &["js"],
            Self::Dev => &["tsx", "jsx", "js", "rs"],
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Startup configuration errors. These are the only fatal errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no view source configured: set `viewsFolder` or register at least one view")]
    NoViewSource,

    #[error("views folder does not exist: {0}")]
    MissingViewsFolder(String),
}

/// Errors raised while discovering, loading or persisting the manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid manifest JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("resource `{id}` at {path} does not export a registered {kind:?}")]
    UnknownResource {
        id: String,
        path: String,
        kind: ResourceKind,
    },
}

/// Errors raised while rendering one request's body.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("cannot render <{component}>: {source}")]
    Component {
        component: String,
        #[source]
        source: anyhow::Error,
    },

    /// The outbound connection went away. Not an application failure.
    #[error("transport closed: {0}")]
    Io(#[from] std::io::Error),
}

impl RenderError {
    pub fn component(component: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Component {
            component: component.into(),
            source,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

/// Errors raised while reviving one island instance on the client.
#[derive(Debug, Error)]
pub enum ReviveError {
    #[error("element carries no instance marker")]
    MissingMarker,

    #[error("malformed instance marker `{0}`")]
    MalformedMarker(String),

    #[error("no island definition for type `{type_id}` (marker `{marker}`)")]
    UnknownIsland { type_id: String, marker: String },

    #[error("could not mount `{marker}`: {source}")]
    Mount {
        marker: String,
        #[source]
        source: RenderError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_mode_parse() {
        assert_eq!(BuildMode::parse("production"), BuildMode::Prod);
        assert_eq!(BuildMode::parse(" PROD "), BuildMode::Prod);
        assert_eq!(BuildMode::parse("development"), BuildMode::Dev);
        assert_eq!(BuildMode::parse("staging"), BuildMode::Dev);
    }

    #[test]
    fn build_mode_accepts_long_names_in_json() {
        let prod: BuildMode = serde_json::from_str("\"production\"").unwrap();
        let dev: BuildMode = serde_json::from_str("\"development\"").unwrap();
        assert_eq!(prod, BuildMode::Prod);
        assert_eq!(dev, BuildMode::Dev);
        assert_eq!(serde_json::to_string(&BuildMode::Prod).unwrap(), "\"prod\"");
    }

    #[test]
    fn source_extensions_follow_mode() {
        assert_eq!(BuildMode::Prod.source_extensions(), &["js"]);
        assert!(BuildMode::Dev.source_extensions().contains(&"tsx"));
    }

    #[test]
    fn render_error_transport_flag() {
        let io = RenderError::from(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "peer gone",
        ));
        assert!(io.is_transport());
        let comp = RenderError::component("Counter", anyhow::anyhow!("boom"));
        assert!(!comp.is_transport());
        assert_eq!(comp.to_string(), "cannot render <Counter>: boom");
    }
}
