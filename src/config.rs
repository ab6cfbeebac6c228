//! Engine configuration.
//!
//! Loaded from JSON with camelCase keys. Folder paths resolve against
//! `rootFolder`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::context::ViewContextFields;
use crate::resource::Props;
use crate::BuildMode;

pub const DEFAULT_MANIFEST_FILE: &str = "app.manifest.json";
pub const DEFAULT_WALK_DEPTH: usize = 5;

/// Engine configuration. Every field has a default, so a host can load a
/// partial JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IslandsConfig {
    /// Manifest paths are made relative to this folder.
    pub root_folder: PathBuf,
    pub views_folder: Option<PathBuf>,
    pub islands_folder: Option<PathBuf>,
    pub manifest_file: String,
    /// URL prefix island bundles are served under.
    pub public_prefix: String,
    pub app_name: String,
    pub title_separator: String,
    pub mode: BuildMode,
    /// Merged under request props.
    pub common_props: Props,
    /// Base context every request starts from.
    pub view_context: ViewContextFields,
    pub walk_depth: usize,
}

impl Default for IslandsConfig {
    fn default() -> Self {
        Self {
            root_folder: PathBuf::from("."),
            views_folder: None,
            islands_folder: None,
            manifest_file: DEFAULT_MANIFEST_FILE.to_string(),
            public_prefix: "/public".to_string(),
            app_name: String::new(),
            title_separator: "-".to_string(),
            mode: BuildMode::default(),
            common_props: Props::new(),
            view_context: ViewContextFields::default(),
            walk_depth: DEFAULT_WALK_DEPTH,
        }
    }
}

impl IslandsConfig {
    /// Defaults with the mode taken from the environment.
    pub fn from_env() -> Self {
        Self {
            mode: BuildMode::from_env(),
            ..Self::default()
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root_folder.join(&self.manifest_file)
    }

    /// Resolve a configured folder against the root.
    pub fn resolve(&self, folder: &Path) -> PathBuf {
        if folder.is_absolute() {
            folder.to_path_buf()
        } else {
            self.root_folder.join(folder)
        }
    }

    /// `"<title> <sep> <app>"`, or just the part that is present.
    pub fn page_title(&self, props: &Props) -> String {
        let title = props
            .get("title")
            .and_then(|v| v.as_str())
            .filter(|t| !t.is_empty());
        match (title, self.app_name.is_empty()) {
            (Some(title), false) => {
                format!("{} {} {}", title, self.title_separator, self.app_name)
            }
            (Some(title), true) => title.to_string(),
            (None, _) => self.app_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: IslandsConfig =
            serde_json::from_str(r#"{"appName":"Shop","mode":"prod","viewsFolder":"views"}"#)
                .unwrap();
        assert_eq!(config.app_name, "Shop");
        assert_eq!(config.mode, BuildMode::Prod);
        assert_eq!(config.manifest_file, "app.manifest.json");
        assert_eq!(config.walk_depth, 5);
        assert_eq!(config.views_folder, Some(PathBuf::from("views")));
    }

    #[test]
    fn mode_accepts_production() {
        let config: IslandsConfig = serde_json::from_str(r#"{"mode":"production"}"#).unwrap();
        assert_eq!(config.mode, BuildMode::Prod);
    }

    #[test]
    fn page_title_composition() {
        let config = IslandsConfig {
            app_name: "Shop".into(),
            ..Default::default()
        };
        let mut props = Props::new();
        assert_eq!(config.page_title(&props), "Shop");
        props.insert("title".into(), "Cart".into());
        assert_eq!(config.page_title(&props), "Cart - Shop");
    }
}
