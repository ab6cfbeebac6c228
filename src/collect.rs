//! Island collection pre-pass.
//!
//! Walks the composed tree depth-first, pre-order, resolving components as it
//! goes. Every registered island met on the way is recorded with its instance
//! id and props. The order of the result is the order markers appear in the
//! delivered document, which is what the client pairs against.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tracing::{debug, warn};

use crate::island::{IslandInstance, RenderPass};
use crate::resource::{Component, Node, Props, Registry, Scope};

/// Collect island instances from `root` in traversal order.
///
/// Best-effort: a component that fails to render is logged and its sub-tree
/// skipped; collection carries on with the next sibling.
pub async fn collect(root: &Node, registry: &Registry, scope: &Scope) -> Vec<IslandInstance> {
    let mut walker = Walker {
        registry,
        pass: RenderPass::new(),
        found: Vec::new(),
        failures: 0,
    };
    walker.visit(root, scope).await;
    debug!(
        instances = walker.found.len(),
        failures = walker.failures,
        "island collection finished"
    );
    walker.found
}

struct Walker<'r> {
    registry: &'r Registry,
    pass: RenderPass,
    found: Vec<IslandInstance>,
    failures: usize,
}

impl<'r> Walker<'r> {
    fn visit<'a>(&'a mut self, node: &'a Node, scope: &'a Scope) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            match node {
                Node::Text(_) | Node::Raw(_) | Node::Comment(_) => {}
                Node::Element(element) => {
                    for child in &element.children {
                        self.visit(child, scope).await;
                    }
                }
                Node::Fragment(children) => {
                    for child in children {
                        self.visit(child, scope).await;
                    }
                }
                Node::Component(call) => {
                    match call.component.render(&call.props, scope).await {
                        Ok(child) => self.visit(&child, scope).await,
                        Err(err) => {
                            self.failures += 1;
                            warn!(component = %call.name, error = %err, "skipping sub-tree during collection");
                        }
                    }
                }
                Node::Island(call) => {
                    let tag = call.island.tag();
                    let Some(island) = self.registry.island(tag) else {
                        // unregistered islands render inline without a marker
                        self.render_through(call.island.component(), &call.props, scope, tag)
                            .await;
                        return;
                    };
                    let island = island.clone();
                    let instance = self.pass.next_instance(island.tag());
                    self.found
                        .push(IslandInstance::new(&instance, call.props.clone()));
                    let island_scope = scope.for_instance(&instance);
                    self.render_through(island.component(), &call.props, &island_scope, tag)
                        .await;
                }
            }
        })
    }

    async fn render_through(
        &mut self,
        component: &Arc<dyn Component>,
        props: &Props,
        scope: &Scope,
        name: &str,
    ) {
        match component.render(props, scope).await {
            Ok(child) => self.visit(&child, scope).await,
            Err(err) => {
                self.failures += 1;
                warn!(island = %name, error = %err, "skipping island during collection");
            }
        }
    }
}
