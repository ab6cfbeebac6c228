//! Client-side revival.
//!
//! [`REVIVAL_RUNTIME_JS`] is the module the browser runs. [`revive`] is the
//! same algorithm over a host-agnostic element abstraction, used to check the
//! server/client contract without a browser.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::{debug, warn};

use crate::island::InstanceId;
use crate::render::render_to_string;
use crate::resource::{IslandDef, Props, Registry, Scope};
use crate::utils::stable_hash_8;
use crate::{BuildMode, ReviveError};

/// Browser runtime exporting `reviveIslands(islands, islandsProps, islandsEls)`.
///
/// An island bundle's default export is either an object with
/// `mount(el, props, flags)` or a function returning markup.
pub const REVIVAL_RUNTIME_JS: &str = r#"const MARKER_ATTR = "data-instance-id";
const MARKER_RE = /^(.+?)\$\$(\d+)$/;
const own = (obj, key) => obj != null && Object.prototype.hasOwnProperty.call(obj, key);

export async function reviveIslands(islands, islandsProps, islandsEls) {
  const revived = [];
  for (const el of islandsEls) {
    const marker = el.getAttribute(MARKER_ATTR);
    try {
      const match = marker == null ? null : MARKER_RE.exec(marker);
      if (match == null) {
        console.warn("[islands] skipping element with malformed marker", marker);
        continue;
      }
      const island = own(islands, match[1]) ? islands[match[1]] : null;
      if (island == null) {
        console.warn("[islands] no definition for \"" + match[1] + "\" (" + marker + ")");
        continue;
      }
      const props = own(islandsProps, marker) && islandsProps[marker] != null ? islandsProps[marker] : {};
      const flags = { csr: true, instanceId: marker };
      if (typeof island.mount === "function") {
        await island.mount(el, props, flags);
      } else if (typeof island === "function") {
        el.innerHTML = await island(props, flags);
      } else {
        throw new Error("island does not export a render function");
      }
      revived.push(marker);
    } catch (err) {
      console.warn("[islands] could not revive \"" + marker + "\":", err && err.message);
    }
  }
  return revived;
}
"#;

/// The runtime module with a content-hashed file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeAsset {
    pub file_name: String,
    pub source: &'static str,
}

pub fn runtime_asset() -> RuntimeAsset {
    RuntimeAsset {
        file_name: format!("runtime.{}.js", stable_hash_8(REVIVAL_RUNTIME_JS)),
        source: REVIVAL_RUNTIME_JS,
    }
}

/// An element carrying an instance marker.
pub trait MarkerElement {
    fn marker(&self) -> Option<&str>;

    /// Replace the element's content with freshly rendered markup.
    fn mount(&mut self, markup: String);
}

fn marker_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"data-instance-id="([^"]*)""#).expect("marker pattern is valid")
    })
}

/// Marker values in `html`, in document order.
pub fn scan_markers(html: &str) -> Vec<String> {
    marker_pattern()
        .captures_iter(html)
        .filter_map(|caps| caps.get(1))
        .map(|m| unescape_attr(m.as_str()))
        .collect()
}

fn unescape_attr(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Re-render every marked element with its captured props.
///
/// Elements are visited in order. A bad marker, a missing definition or a
/// failing render is logged and skipped. Returns the markers that mounted.
pub async fn revive<E: MarkerElement>(
    definitions: &BTreeMap<String, Arc<IslandDef>>,
    props: &BTreeMap<String, Props>,
    elements: &mut [E],
    mode: BuildMode,
) -> Vec<String> {
    // islands render standalone on the client; nested islands get no markers
    let registry = Registry::new();
    let mut revived = Vec::new();
    for element in elements.iter_mut() {
        match revive_one(definitions, props, element, &registry, mode).await {
            Ok(marker) => revived.push(marker),
            Err(err) => warn!(error = %err, "could not revive island"),
        }
    }
    debug!(revived = revived.len(), total = elements.len(), "revival finished");
    revived
}

async fn revive_one<E: MarkerElement>(
    definitions: &BTreeMap<String, Arc<IslandDef>>,
    props: &BTreeMap<String, Props>,
    element: &mut E,
    registry: &Registry,
    mode: BuildMode,
) -> Result<String, ReviveError> {
    let marker = element.marker().ok_or(ReviveError::MissingMarker)?.to_string();
    let instance =
        InstanceId::parse(&marker).ok_or_else(|| ReviveError::MalformedMarker(marker.clone()))?;
    let island = definitions
        .get(instance.type_id())
        .ok_or_else(|| ReviveError::UnknownIsland {
            type_id: instance.type_id().to_string(),
            marker: marker.clone(),
        })?;

    let empty = Props::new();
    let island_props = props.get(&marker).unwrap_or(&empty);
    let scope = Scope::client(marker.clone(), mode);
    let mount_err = |source| ReviveError::Mount {
        marker: marker.clone(),
        source,
    };
    let node = island
        .component()
        .render(island_props, &scope)
        .await
        .map_err(|err| mount_err(crate::RenderError::component(instance.type_id(), err)))?;
    let markup = render_to_string(&node, registry, &scope)
        .await
        .map_err(mount_err)?;
    element.mount(markup);
    Ok(marker)
}
