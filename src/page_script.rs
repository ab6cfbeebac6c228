//! Page bootstrap script for one response.
//!
//! The script imports the revival runtime and the bundles of the island
//! types that were actually encountered, builds the definitions and props
//! maps, and hands them to `reviveIslands` together with the live list of
//! marker elements. Diagnostics are only emitted outside production.

use std::collections::BTreeMap;

use crate::context::ScriptTag;
use crate::island::{IslandInstance, MARKER_ATTR};
use crate::manifest::Manifest;
use crate::revive::runtime_asset;
use crate::utils::{js_string, script_safe_json, script_tags_markup, strip_comments_and_spacing};
use crate::BuildMode;

/// Where the browser loads the runtime and island bundles from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptAssets {
    pub runtime_src: String,
    pub public_prefix: String,
    bundles: BTreeMap<String, String>,
}

impl ScriptAssets {
    pub fn new(public_prefix: impl Into<String>) -> Self {
        let public_prefix = public_prefix.into().trim_end_matches('/').to_string();
        Self {
            runtime_src: format!("{}/.islands/{}", public_prefix, runtime_asset().file_name),
            public_prefix,
            bundles: BTreeMap::new(),
        }
    }

    /// Bundle URLs from the manifest's island entries.
    pub fn from_manifest(manifest: &Manifest, public_prefix: impl Into<String>) -> Self {
        let mut assets = Self::new(public_prefix);
        for (id, entry) in &manifest.islands {
            if let Some(path) = &entry.path_bundle {
                let src = assets.bundle_url(path);
                assets.bundles.insert(id.clone(), src);
            }
        }
        assets
    }

    pub fn with_bundle(mut self, type_id: impl Into<String>, src: impl Into<String>) -> Self {
        self.bundles.insert(type_id.into(), src.into());
        self
    }

    fn bundle_url(&self, path_bundle: &str) -> String {
        match path_bundle.strip_prefix("./public") {
            Some(rest) => format!("{}{}", self.public_prefix, rest),
            None => path_bundle.trim_start_matches('.').to_string(),
        }
    }

    pub fn bundle_src(&self, type_id: &str) -> String {
        self.bundles
            .get(type_id)
            .cloned()
            .unwrap_or_else(|| format!("{}/.islands/{}.bundle.js", self.public_prefix, type_id))
    }
}

/// The synthesized bootstrap for one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageScript {
    /// Encountered island types, in first-encounter order.
    pub definitions: Vec<String>,
    /// Instance ids in the props map, in collection order.
    pub props_keys: Vec<String>,
    /// The props map as script-safe JSON.
    pub props_json: String,
    /// The module script body, comments and spacing stripped.
    pub module: String,
    /// Caller script tags followed by the module script.
    pub markup: String,
}

/// Build the page script for `instances`.
///
/// Output depends only on the arguments: the same instance list in the same
/// order yields byte-identical markup.
pub fn synthesize(
    view_id: &str,
    instances: &[IslandInstance],
    script_tags: &[ScriptTag],
    assets: &ScriptAssets,
    mode: BuildMode,
) -> Result<PageScript, serde_json::Error> {
    let mut definitions: Vec<String> = Vec::new();
    for instance in instances {
        if !definitions.contains(&instance.type_id) {
            definitions.push(instance.type_id.clone());
        }
    }

    let mut props_keys: Vec<String> = Vec::with_capacity(instances.len());
    let mut props_entries = Vec::with_capacity(instances.len());
    for instance in instances {
        if props_keys.contains(&instance.instance_id) {
            continue;
        }
        props_entries.push(format!(
            "{}:{}",
            js_string(&instance.instance_id),
            script_safe_json(&instance.props)?
        ));
        props_keys.push(instance.instance_id.clone());
    }
    let props_json = format!("{{{}}}", props_entries.join(","));

    let dev = !mode.is_prod();
    let mut js = String::new();
    js.push_str(&format!(
        "import {{ reviveIslands }} from {};\n",
        js_string(&assets.runtime_src)
    ));
    for (idx, type_id) in definitions.iter().enumerate() {
        js.push_str(&format!(
            "import * as ${} from {};\n",
            idx,
            js_string(&assets.bundle_src(type_id))
        ));
    }
    js.push_str("(function main(revive) {\n");
    js.push_str(&format!("  const v = {};\n", js_string(view_id)));
    if dev {
        js.push_str(DEV_PRELUDE);
    }
    js.push_str("  var islands = {\n");
    for (idx, type_id) in definitions.iter().enumerate() {
        js.push_str(&format!("    {}: ${}.default,\n", js_string(type_id), idx));
    }
    js.push_str("  };\n");
    js.push_str(&format!("  var islandsProps = {props_json};\n"));
    js.push_str(&format!(
        "  var islandsEls = document.querySelectorAll({});\n",
        js_string(&format!("[{MARKER_ATTR}]"))
    ));
    if dev {
        js.push_str(DEV_DUMP);
    }
    js.push_str("  function afterRevival(results) {\n");
    if dev {
        js.push_str(DEV_AFTER_REVIVAL);
    }
    js.push_str("  }\n");
    js.push_str("  revive(islands, islandsProps, Array.from(islandsEls))\n");
    js.push_str("    .then(afterRevival)\n");
    js.push_str("    .catch(afterRevival);\n");
    js.push_str("})(reviveIslands);\n");

    let module = strip_comments_and_spacing(&js);
    let mut parts = Vec::new();
    let callers = script_tags_markup(script_tags);
    if !callers.is_empty() {
        parts.push(callers);
    }
    parts.push(format!("<script type=\"module\">\n{module}\n</script>"));

    Ok(PageScript {
        definitions,
        props_keys,
        props_json,
        module,
        markup: parts.join("\n"),
    })
}

const DEV_PRELUDE: &str = r#"
  const s = Date.now();
  function log(message, args) {
    const msg = "[" + Date.now() + "][islands] " + message;
    if (args !== undefined) {
      console.log(msg, args);
    } else {
      console.log(msg);
    }
  }
  log("Reviving islands for view \"" + v + "\"...");
"#;

const DEV_DUMP: &str = r#"
  log("islands:", islands);
  log("islandsEls:", islandsEls);
  log("islandsProps:", islandsProps);
"#;

const DEV_AFTER_REVIVAL: &str = r#"
    if (results != null && Array.isArray(results)) {
      log("Revived islands:", results);
    } else {
      log("Could not revive islands. Error:", results);
    }
    log("Done in " + (Date.now() - s) + "ms");
"#;
