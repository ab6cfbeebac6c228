//! Server markup for the element tree.
//!
//! Output is buffered in small chunks and flushed into the sink with
//! `write_all`, so a slow consumer suspends rendering instead of letting
//! rendered markup pile up in memory.

use std::io;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::warn;

use crate::island::{self, RenderPass};
use crate::resource::{Component, Element, Node, Props, Registry, Scope};
use crate::utils::{escape_attr, escape_comment, escape_html, is_valid_attr_name};
use crate::RenderError;

/// Buffered bytes that trigger a flush into the sink.
pub const FLUSH_THRESHOLD: usize = 8 * 1024;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

// ---------------------------------------------------------------------------
// MarkupWriter
// ---------------------------------------------------------------------------

/// Chunked writer over an async sink.
#[derive(Debug)]
pub struct MarkupWriter<S> {
    sink: S,
    buf: String,
    written: usize,
}

impl<S> MarkupWriter<S>
where
    S: AsyncWrite + Unpin + Send,
{
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            buf: String::with_capacity(FLUSH_THRESHOLD),
            written: 0,
        }
    }

    pub fn push(&mut self, s: &str) {
        self.buf.push_str(s);
    }

    /// Flush when the buffer has grown past [`FLUSH_THRESHOLD`].
    pub async fn push_and_drain(&mut self, s: &str) -> io::Result<()> {
        self.buf.push_str(s);
        if self.buf.len() >= FLUSH_THRESHOLD {
            self.flush().await?;
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        if !self.buf.is_empty() {
            self.sink.write_all(self.buf.as_bytes()).await?;
            self.written += self.buf.len();
            self.buf.clear();
        }
        self.sink.flush().await
    }

    /// Drop anything not yet handed to the sink.
    pub fn discard(&mut self) {
        self.buf.clear();
    }

    /// Bytes handed to the sink so far.
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn into_inner(self) -> S {
        self.sink
    }
}

// ---------------------------------------------------------------------------
// BodyRenderer
// ---------------------------------------------------------------------------

/// Renders a tree, wrapping every registered island in its marker boundary.
///
/// Owns the [`RenderPass`] for this traversal; ordinals line up with the
/// collection pass because both walk the same tree in the same order.
pub struct BodyRenderer<'r> {
    registry: &'r Registry,
    pass: RenderPass,
}

impl<'r> BodyRenderer<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            pass: RenderPass::new(),
        }
    }

    pub fn render<'a, S>(
        &'a mut self,
        node: &'a Node,
        scope: &'a Scope,
        out: &'a mut MarkupWriter<S>,
    ) -> BoxFuture<'a, Result<(), RenderError>>
    where
        S: AsyncWrite + Unpin + Send + 'a,
    {
        Box::pin(async move {
            match node {
                Node::Text(text) => out.push_and_drain(&escape_html(text)).await?,
                Node::Raw(raw) => out.push_and_drain(raw).await?,
                Node::Comment(text) => {
                    out.push_and_drain(&format!("<!--{}-->", escape_comment(text)))
                        .await?;
                }
                Node::Element(element) => self.render_element(element, scope, out).await?,
                Node::Fragment(children) => {
                    for child in children {
                        self.render(child, scope, out).await?;
                    }
                }
                Node::Component(call) => {
                    let child = call
                        .component
                        .render(&call.props, scope)
                        .await
                        .map_err(|err| RenderError::component(&call.name, err))?;
                    self.render(&child, scope, out).await?;
                }
                Node::Island(call) => {
                    let tag = call.island.tag();
                    match self.registry.island(tag).cloned() {
                        Some(island) => {
                            let instance = self.pass.next_instance(island.tag());
                            let island_scope = scope.for_instance(&instance);
                            let child =
                                render_component(island.component(), &call.props, &island_scope, tag)
                                    .await?;
                            let boundary = island::marker_boundary(&instance, child);
                            self.render(&boundary, &island_scope, out).await?;
                        }
                        None => {
                            let child =
                                render_component(call.island.component(), &call.props, scope, tag)
                                    .await?;
                            self.render(&child, scope, out).await?;
                        }
                    }
                }
            }
            Ok(())
        })
    }

    async fn render_element<S>(
        &mut self,
        element: &Element,
        scope: &Scope,
        out: &mut MarkupWriter<S>,
    ) -> Result<(), RenderError>
    where
        S: AsyncWrite + Unpin + Send,
    {
        let mut open = format!("<{}", element.tag);
        for (name, value) in &element.attrs {
            if !is_valid_attr_name(name) {
                warn!(tag = %element.tag, name = %name, "dropping attribute with an invalid name");
                continue;
            }
            open.push_str(&format!(" {}=\"{}\"", name, escape_attr(value)));
        }
        let tag = element.tag.to_ascii_lowercase();
        if VOID_ELEMENTS.contains(&tag.as_str()) {
            open.push_str(" />");
            out.push_and_drain(&open).await?;
            return Ok(());
        }
        open.push('>');
        out.push_and_drain(&open).await?;
        for child in &element.children {
            self.render(child, scope, out).await?;
        }
        out.push_and_drain(&format!("</{}>", element.tag)).await?;
        Ok(())
    }

    /// Island instances claimed during this traversal.
    pub fn instances_rendered(&self) -> usize {
        self.pass.total()
    }
}

async fn render_component(
    component: &Arc<dyn Component>,
    props: &Props,
    scope: &Scope,
    name: &str,
) -> Result<Node, RenderError> {
    component
        .render(props, scope)
        .await
        .map_err(|err| RenderError::component(name, err))
}

/// Render `node` to a string. Used for fragments outside the page pipeline.
pub async fn render_to_string(
    node: &Node,
    registry: &Registry,
    scope: &Scope,
) -> Result<String, RenderError> {
    let mut out = MarkupWriter::new(Vec::new());
    BodyRenderer::new(registry)
        .render(node, scope, &mut out)
        .await?;
    out.flush().await?;
    Ok(String::from_utf8_lossy(&out.into_inner()).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ViewContext, ViewContextHandle};
    use crate::resource::{from_fn, IslandDef};
    use crate::BuildMode;
    use pretty_assertions::assert_eq;

    fn scope() -> Scope {
        Scope::server(ViewContextHandle::new(ViewContext::default()), BuildMode::Dev)
    }

    #[tokio::test]
    async fn renders_elements_and_escapes() {
        let tree: Node = Element::new("p")
            .attr("title", "a \"b\"")
            .child("1 < 2")
            .child(Element::new("br"))
            .into();
        let html = render_to_string(&tree, &Registry::new(), &scope()).await.unwrap();
        assert_eq!(html, "<p title=\"a &quot;b&quot;\">1 &lt; 2<br /></p>");
    }

    #[tokio::test]
    async fn comments_cannot_close_early() {
        let registry = Registry::new();
        for text in ["a--->b", "x--!>y", ">z", "tail-"] {
            let html = render_to_string(&Node::Comment(text.into()), &registry, &scope())
                .await
                .unwrap();
            assert!(html.starts_with("<!--") && html.ends_with("-->"));
            let body = &html["<!--".len()..html.len() - "-->".len()];
            assert!(!body.contains("--"), "{text:?} rendered {html:?}");
            assert!(!body.starts_with('>') && !body.starts_with("->"));
        }
    }

    #[tokio::test]
    async fn invalid_attribute_names_are_dropped() {
        let tree: Node = Element::new("img")
            .attr("src", "/a.png")
            .attr("x onerror=alert(1)", "y")
            .attr("a/b", "c")
            .into();
        let html = render_to_string(&tree, &Registry::new(), &scope()).await.unwrap();
        assert_eq!(html, "<img src=\"/a.png\" />");
    }

    #[tokio::test]
    async fn islands_get_marker_boundaries_in_order() {
        let mut registry = Registry::new();
        let counter = registry.register_island(IslandDef::from_fn("Counter", |props, _| {
            let start = props.get("start").and_then(|v| v.as_i64()).unwrap_or(0);
            Ok(Element::new("button").child(start.to_string()).into())
        }));
        let mut props = Props::new();
        props.insert("start".into(), 5.into());
        let tree = Node::fragment([
            Node::island(&counter, props),
            Node::island(&counter, Props::new()),
        ]);
        let html = render_to_string(&tree, &registry, &scope()).await.unwrap();
        assert_eq!(
            html,
            "<div data-instance-id=\"Counter$$0\"><button>5</button></div><div data-instance-id=\"Counter$$1\"><button>0</button></div>"
        );
    }

    #[tokio::test]
    async fn island_sees_its_instance_id() {
        let mut registry = Registry::new();
        let echo = registry.register_island(IslandDef::from_fn("Echo", |_, scope| {
            Ok(Node::text(scope.instance_id.clone().unwrap_or_default()))
        }));
        let tree = Node::island(&echo, Props::new());
        let html = render_to_string(&tree, &registry, &scope()).await.unwrap();
        assert!(html.contains(">Echo$$0</div>"));
    }

    #[tokio::test]
    async fn component_error_names_the_component() {
        let broken = Arc::new(from_fn(|_, _| Err(anyhow::anyhow!("kaput"))));
        let tree = Node::component("Broken", broken, Props::new());
        let err = render_to_string(&tree, &Registry::new(), &scope())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "cannot render <Broken>: kaput");
    }

    #[tokio::test]
    async fn large_output_is_flushed_in_chunks() {
        let text = "x".repeat(FLUSH_THRESHOLD * 3);
        let tree = Node::text(text.clone());
        let registry = Registry::new();
        let mut out = MarkupWriter::new(Vec::new());
        let mut renderer = BodyRenderer::new(&registry);
        renderer.render(&tree, &scope(), &mut out).await.unwrap();
        assert!(out.written() >= FLUSH_THRESHOLD * 3);
        out.flush().await.unwrap();
        assert_eq!(out.into_inner().len(), text.len());
    }
}
