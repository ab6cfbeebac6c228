//! Per-request view context.
//!
//! A view may set a redirect or a status while it renders. The pipeline
//! reads the context back only after the body stream has ended.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::resource::Props;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum HeadTag {
    Charset {
        charset: String,
    },
    Meta {
        name: String,
        content: String,
    },
    Link {
        href: String,
        rel: String,
        #[serde(default, rename = "as", skip_serializing_if = "Option::is_none")]
        as_type: Option<String>,
        #[serde(default)]
        crossorigin: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hreflang: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
        link_type: Option<String>,
    },
}

impl HeadTag {
    pub fn charset(charset: impl Into<String>) -> Self {
        Self::Charset {
            charset: charset.into(),
        }
    }

    pub fn meta(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Meta {
            name: name.into(),
            content: content.into(),
        }
    }

    pub fn stylesheet(href: impl Into<String>) -> Self {
        Self::Link {
            href: href.into(),
            rel: "stylesheet".to_string(),
            as_type: None,
            crossorigin: false,
            hreflang: None,
            title: None,
            link_type: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtmlAttr {
    pub name: String,
    pub value: String,
}

impl HtmlAttr {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptTag {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_content: Option<String>,
    #[serde(default = "default_script_type", rename = "type")]
    pub script_type: String,
    #[serde(default, rename = "async")]
    pub is_async: bool,
    #[serde(default)]
    pub defer: bool,
}

fn default_script_type() -> String {
    "text/javascript".to_string()
}

impl ScriptTag {
    pub fn src(src: impl Into<String>) -> Self {
        Self {
            src: Some(src.into()),
            text_content: None,
            script_type: default_script_type(),
            is_async: false,
            defer: false,
        }
    }

    pub fn inline(text: impl Into<String>) -> Self {
        Self {
            src: None,
            text_content: Some(text.into()),
            script_type: default_script_type(),
            is_async: false,
            defer: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Fields and merge rules
// ---------------------------------------------------------------------------

/// Caller-supplied context fields: configured defaults or per-request overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewContextFields {
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub html: Vec<HtmlAttr>,
    #[serde(default)]
    pub head: Vec<HeadTag>,
    #[serde(default)]
    pub scripts: Vec<ScriptTag>,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub redirect_url: Option<String>,
    /// Free-form values views may read.
    #[serde(default)]
    pub extra: Props,
}

impl ViewContextFields {
    /// Base first, then overrides; scalars are last-write-wins, lists are
    /// concatenated and deduplicated keeping first occurrences. Html
    /// attributes are keyed by name: an override replaces the base value in
    /// place.
    pub fn merged(base: &Self, overrides: &Self) -> Self {
        let mut extra = base.extra.clone();
        extra.extend(overrides.extra.clone());
        let mut headers = base.headers.clone();
        for (name, value) in &overrides.headers {
            headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
            headers.push((name.clone(), value.clone()));
        }
        Self {
            headers,
            html: reduce_duplicates(merge_attrs(&base.html, &overrides.html)),
            head: reduce_duplicates(base.head.iter().chain(&overrides.head).cloned()),
            scripts: reduce_duplicates(base.scripts.iter().chain(&overrides.scripts).cloned()),
            status: overrides.status.or(base.status),
            redirect_url: overrides
                .redirect_url
                .clone()
                .or_else(|| base.redirect_url.clone()),
            extra,
        }
    }
}

fn merge_attrs(base: &[HtmlAttr], overrides: &[HtmlAttr]) -> Vec<HtmlAttr> {
    let mut attrs = base.to_vec();
    for attr in overrides {
        match attrs.iter_mut().find(|existing| existing.name == attr.name) {
            Some(existing) => existing.value = attr.value.clone(),
            None => attrs.push(attr.clone()),
        }
    }
    attrs
}

/// Drops later deep-equal duplicates; first occurrences keep their position.
pub fn reduce_duplicates<T: PartialEq>(items: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut out: Vec<T> = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Live context
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewContext {
    pub headers: Vec<(String, String)>,
    pub status: Option<u16>,
    pub redirect_url: Option<String>,
    pub html: Vec<HtmlAttr>,
    pub head: Vec<HeadTag>,
    pub scripts: Vec<ScriptTag>,
    pub extra: Props,
}

impl From<ViewContextFields> for ViewContext {
    fn from(fields: ViewContextFields) -> Self {
        Self {
            headers: fields.headers,
            status: fields.status,
            redirect_url: fields.redirect_url,
            html: fields.html,
            head: fields.head,
            scripts: fields.scripts,
            extra: fields.extra,
        }
    }
}

/// Shared handle to one request's [`ViewContext`].
#[derive(Debug, Clone, Default)]
pub struct ViewContextHandle {
    inner: Arc<Mutex<ViewContext>>,
}

impl ViewContextHandle {
    pub fn new(context: ViewContext) -> Self {
        Self {
            inner: Arc::new(Mutex::new(context)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ViewContext> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_status(&self, status: u16) {
        self.lock().status = Some(status);
    }

    pub fn redirect(&self, url: impl Into<String>) {
        self.lock().redirect_url = Some(url.into());
    }

    pub fn status(&self) -> Option<u16> {
        self.lock().status
    }

    pub fn redirect_url(&self) -> Option<String> {
        self.lock().redirect_url.clone()
    }

    /// Case-insensitive request header lookup.
    pub fn header(&self, name: &str) -> Option<String> {
        self.lock()
            .headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.clone())
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut ViewContext) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn snapshot(&self) -> ViewContext {
        self.lock().clone()
    }
}
