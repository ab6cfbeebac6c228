//! Views, islands and the element tree they render to.
//!
//! A tree node is text, raw markup, a comment, an element, a fragment, a
//! component call or an island call. Islands are matched by an explicit
//! type tag set at registration, never by the shape of the component.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::context::{ViewContext, ViewContextHandle};
use crate::island::{self, InstanceId};
use crate::BuildMode;

/// JSON props bag handed to every component.
pub type Props = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    View,
    Island,
}

// ---------------------------------------------------------------------------
// Component
// ---------------------------------------------------------------------------

/// A render function. May suspend before producing its sub-tree.
pub trait Component: Send + Sync {
    fn render<'a>(&'a self, props: &'a Props, scope: &'a Scope)
        -> BoxFuture<'a, anyhow::Result<Node>>;
}

impl<F> Component for F
where
    F: Fn(&Props, &Scope) -> anyhow::Result<Node> + Send + Sync,
{
    fn render<'a>(
        &'a self,
        props: &'a Props,
        scope: &'a Scope,
    ) -> BoxFuture<'a, anyhow::Result<Node>> {
        Box::pin(std::future::ready(self(props, scope)))
    }
}

/// Pins down the signature of a synchronous render closure.
pub fn from_fn<F>(f: F) -> F
where
    F: Fn(&Props, &Scope) -> anyhow::Result<Node> + Send + Sync,
{
    f
}

/// What a component sees of the render it is part of.
#[derive(Debug, Clone)]
pub struct Scope {
    /// Rendering on the server.
    pub ssr: bool,
    /// Rendering on the client after revival.
    pub csr: bool,
    /// Marker of the island instance being rendered, if any.
    pub instance_id: Option<String>,
    pub mode: BuildMode,
    context: ViewContextHandle,
}

impl Scope {
    pub fn server(context: ViewContextHandle, mode: BuildMode) -> Self {
        Self {
            ssr: true,
            csr: false,
            instance_id: None,
            mode,
            context,
        }
    }

    pub fn client(instance_id: impl Into<String>, mode: BuildMode) -> Self {
        Self {
            ssr: false,
            csr: true,
            instance_id: Some(instance_id.into()),
            mode,
            context: ViewContextHandle::new(ViewContext::default()),
        }
    }

    /// The per-request view context. Mutations are observed once the body ends.
    pub fn context(&self) -> &ViewContextHandle {
        &self.context
    }

    pub(crate) fn for_instance(&self, instance: &InstanceId) -> Self {
        Self {
            instance_id: Some(instance.to_string()),
            ..self.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// Element tree
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub enum Node {
    /// Escaped on output.
    Text(String),
    /// Emitted verbatim.
    Raw(String),
    Comment(String),
    Element(Element),
    Fragment(Vec<Node>),
    Component(ComponentNode),
    Island(IslandNode),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

#[derive(Clone)]
pub struct ComponentNode {
    pub name: String,
    pub component: Arc<dyn Component>,
    pub props: Props,
}

#[derive(Clone)]
pub struct IslandNode {
    pub island: Arc<IslandDef>,
    pub props: Props,
}

impl Node {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn raw(markup: impl Into<String>) -> Self {
        Self::Raw(markup.into())
    }

    pub fn fragment(children: impl IntoIterator<Item = Node>) -> Self {
        Self::Fragment(children.into_iter().collect())
    }

    pub fn empty() -> Self {
        Self::Fragment(Vec::new())
    }

    pub fn component(
        name: impl Into<String>,
        component: Arc<dyn Component>,
        props: Props,
    ) -> Self {
        Self::Component(ComponentNode {
            name: name.into(),
            component,
            props,
        })
    }

    pub fn island(island: &Arc<IslandDef>, props: Props) -> Self {
        Self::Island(IslandNode {
            island: Arc::clone(island),
            props,
        })
    }
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.push((name.into(), value.into()));
        self
    }

    pub fn child(mut self, child: impl Into<Node>) -> Self {
        self.children.push(child.into());
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = Node>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn attr_value(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

impl From<Element> for Node {
    fn from(element: Element) -> Self {
        Self::Element(element)
    }
}

impl From<&str> for Node {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Node {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Raw(raw) => f.debug_tuple("Raw").field(raw).finish(),
            Self::Comment(text) => f.debug_tuple("Comment").field(text).finish(),
            Self::Element(element) => element.fmt(f),
            Self::Fragment(children) => f.debug_tuple("Fragment").field(children).finish(),
            Self::Component(node) => f
                .debug_struct("Component")
                .field("name", &node.name)
                .field("props", &node.props)
                .finish(),
            Self::Island(node) => f
                .debug_struct("Island")
                .field("tag", &node.island.tag())
                .field("props", &node.props)
                .finish(),
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Raw(a), Self::Raw(b)) => a == b,
            (Self::Comment(a), Self::Comment(b)) => a == b,
            (Self::Element(a), Self::Element(b)) => a == b,
            (Self::Fragment(a), Self::Fragment(b)) => a == b,
            (Self::Component(a), Self::Component(b)) => {
                a.name == b.name && Arc::ptr_eq(&a.component, &b.component) && a.props == b.props
            }
            (Self::Island(a), Self::Island(b)) => {
                a.island.tag() == b.island.tag() && a.props == b.props
            }
            _ => false,
        }
    }
}

impl Eq for Node {}

// ---------------------------------------------------------------------------
// Views and islands
// ---------------------------------------------------------------------------

/// A server-only page component.
#[derive(Clone)]
pub struct ViewDef {
    id: String,
    component: Arc<dyn Component>,
}

impl ViewDef {
    pub fn new(id: impl Into<String>, component: impl Component + 'static) -> Self {
        Self {
            id: id.into(),
            component: Arc::new(component),
        }
    }

    pub fn from_fn<F>(id: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Props, &Scope) -> anyhow::Result<Node> + Send + Sync + 'static,
    {
        Self::new(id, f)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> ResourceKind {
        ResourceKind::View
    }

    pub fn component(&self) -> &Arc<dyn Component> {
        &self.component
    }
}

impl fmt::Debug for ViewDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewDef").field("id", &self.id).finish()
    }
}

/// A component that is re-mounted on the client.
///
/// `island_id` is set once the definition has been through [`island::wrap`];
/// it is the tag the collector and the renderer match on.
#[derive(Clone)]
pub struct IslandDef {
    type_id: String,
    island_id: Option<String>,
    component: Arc<dyn Component>,
}

impl IslandDef {
    pub fn new(type_id: impl Into<String>, component: impl Component + 'static) -> Self {
        Self {
            type_id: type_id.into(),
            island_id: None,
            component: Arc::new(component),
        }
    }

    pub fn from_fn<F>(type_id: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Props, &Scope) -> anyhow::Result<Node> + Send + Sync + 'static,
    {
        Self::new(type_id, f)
    }

    pub(crate) fn tagged(&self, island_id: String) -> Self {
        Self {
            type_id: self.type_id.clone(),
            island_id: Some(island_id),
            component: Arc::clone(&self.component),
        }
    }

    pub fn type_id(&self) -> &str {
        &self.type_id
    }

    pub fn island_id(&self) -> Option<&str> {
        self.island_id.as_deref()
    }

    pub fn is_wrapped(&self) -> bool {
        self.island_id.is_some()
    }

    /// Registration tag; the pre-wrap type id when not yet wrapped.
    pub fn tag(&self) -> &str {
        self.island_id.as_deref().unwrap_or(&self.type_id)
    }

    pub fn kind(&self) -> ResourceKind {
        ResourceKind::Island
    }

    pub fn component(&self) -> &Arc<dyn Component> {
        &self.component
    }
}

impl fmt::Debug for IslandDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IslandDef")
            .field("type_id", &self.type_id)
            .field("island_id", &self.island_id)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Known views and wrapped islands, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    views: BTreeMap<String, Arc<ViewDef>>,
    islands: BTreeMap<String, Arc<IslandDef>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_view(mut self, view: ViewDef) -> Self {
        self.register_view(view);
        self
    }

    pub fn with_island(mut self, island: IslandDef) -> Self {
        self.register_island(island);
        self
    }

    pub fn register_view(&mut self, view: ViewDef) -> Arc<ViewDef> {
        let view = Arc::new(view);
        self.views.insert(view.id().to_string(), Arc::clone(&view));
        view
    }

    /// Wraps and stores the island. Use the returned handle to place it in trees.
    ///
    /// An island whose type id is empty or contains `$$` is not stored; its
    /// handle renders inline and is never collected.
    pub fn register_island(&mut self, island: IslandDef) -> Arc<IslandDef> {
        let type_id = island.type_id().to_string();
        let wrapped = island::wrap(&type_id, Arc::new(island));
        if wrapped.is_wrapped() {
            self.islands
                .insert(wrapped.tag().to_string(), Arc::clone(&wrapped));
        }
        wrapped
    }

    pub fn view(&self, id: &str) -> Option<&Arc<ViewDef>> {
        self.views.get(id)
    }

    pub fn island(&self, tag: &str) -> Option<&Arc<IslandDef>> {
        self.islands.get(tag)
    }

    pub fn views(&self) -> impl Iterator<Item = &Arc<ViewDef>> {
        self.views.values()
    }

    pub fn islands(&self) -> impl Iterator<Item = &Arc<IslandDef>> {
        self.islands.values()
    }

    pub fn has_views(&self) -> bool {
        !self.views.is_empty()
    }

    pub fn kind_of(&self, id: &str) -> Option<ResourceKind> {
        if self.views.contains_key(id) {
            Some(ResourceKind::View)
        } else if self.islands.contains_key(id) {
            Some(ResourceKind::Island)
        } else {
            None
        }
    }
}
