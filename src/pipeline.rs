//! Per-request streaming pipeline.
//!
//! ```text
//! Init → HeadersWritten → DoctypeWritten → HtmlOpenWritten → BodyStreaming
//!      → BodyComplete → ClosingWritten → Sent
//!                     ↘ Redirected
//!      (any) ↘ Errored (error block + closing tags) | Cancelled (sink gone)
//! ```
//!
//! The terminal transition consumes the [`Pipeline`], so a response is
//! finished exactly once no matter which path ends it.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::io::AsyncWrite;
use tracing::{debug, info, warn};

use crate::collect::collect;
use crate::config::IslandsConfig;
use crate::context::{reduce_duplicates, ViewContextFields, ViewContextHandle};
use crate::island::IslandInstance;
use crate::manifest::{Manifest, ManifestStore};
use crate::page_script::{synthesize, ScriptAssets};
use crate::render::{BodyRenderer, MarkupWriter};
use crate::resource::{Node, Props, Registry, Scope, ViewDef};
use crate::utils::{escape_html, head_tags_markup, html_attrs_markup, script_tags_markup};
use crate::views::{self, INTERNAL_ERROR_VIEW_ID, NOT_FOUND_VIEW_ID};
use crate::{BuildMode, ConfigError, RenderError};

pub const CONTENT_TYPE_HTML: &str = "text/html; charset=utf-8";
pub const REDIRECT_STATUS: u16 = 301;

// ---------------------------------------------------------------------------
// App shell
// ---------------------------------------------------------------------------

/// Wraps every view before it is rendered (layout, providers, ...).
pub trait AppShell: Send + Sync {
    fn wrap(&self, view: Node, props: &Props) -> Node;
}

impl<F> AppShell for F
where
    F: Fn(Node, &Props) -> Node + Send + Sync,
{
    fn wrap(&self, view: Node, props: &Props) -> Node {
        self(view, props)
    }
}

struct BareShell;

impl AppShell for BareShell {
    fn wrap(&self, view: Node, _props: &Props) -> Node {
        view
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Init,
    HeadersWritten,
    DoctypeWritten,
    HtmlOpenWritten,
    BodyStreaming,
    BodyComplete,
    ClosingWritten,
    Sent,
    Redirected,
    Errored,
    Cancelled,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Sent | Self::Redirected | Self::Errored | Self::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Redirected,
    /// The body failed to render; an error block was sent in its place.
    Degraded { name: String, message: String },
    /// The sink went away before the document was finished.
    Cancelled,
}

/// What the host needs to finish the HTTP exchange. The body has already
/// been written to the sink when this is returned.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub location: Option<String>,
    pub requested_view_id: String,
    pub view_id: String,
    pub outcome: Outcome,
    /// Island instances delivered with the page; empty unless completed.
    pub islands: Vec<IslandInstance>,
    pub state: PipelineState,
    pub bytes_written: usize,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

enum Terminal {
    Complete { closing: String },
    Redirect,
    Failed { block: String },
    Cancel,
}

struct Pipeline<S> {
    out: MarkupWriter<S>,
    state: PipelineState,
}

impl<S> Pipeline<S>
where
    S: AsyncWrite + Unpin + Send,
{
    fn new(sink: S) -> Self {
        Self {
            out: MarkupWriter::new(sink),
            state: PipelineState::Init,
        }
    }

    fn advance(&mut self, next: PipelineState) {
        debug!(from = ?self.state, to = ?next, "pipeline transition");
        self.state = next;
    }

    async fn open_document(&mut self, html_attrs: &str, head: &str) -> std::io::Result<()> {
        self.advance(PipelineState::HeadersWritten);
        self.out.push_and_drain("<!DOCTYPE html>").await?;
        self.advance(PipelineState::DoctypeWritten);
        self.out
            .push_and_drain(&format!("<html{html_attrs}><head>{head}</head><body>"))
            .await?;
        self.advance(PipelineState::HtmlOpenWritten);
        Ok(())
    }

    async fn stream_body(
        &mut self,
        tree: &Node,
        registry: &Registry,
        scope: &Scope,
    ) -> Result<(), RenderError> {
        self.advance(PipelineState::BodyStreaming);
        BodyRenderer::new(registry)
            .render(tree, scope, &mut self.out)
            .await?;
        self.advance(PipelineState::BodyComplete);
        Ok(())
    }

    /// The one terminal transition.
    async fn terminate(mut self, terminal: Terminal) -> (PipelineState, usize) {
        let state = match terminal {
            Terminal::Complete { closing } => {
                self.out.push(&closing);
                self.advance(PipelineState::ClosingWritten);
                self.end(PipelineState::Sent).await
            }
            Terminal::Redirect => {
                self.out.discard();
                self.end(PipelineState::Redirected).await
            }
            Terminal::Failed { block } => {
                self.out.push(&block);
                self.end(PipelineState::Errored).await
            }
            Terminal::Cancel => {
                self.out.discard();
                PipelineState::Cancelled
            }
        };
        self.advance(state);
        (state, self.out.written())
    }

    async fn end(&mut self, on_success: PipelineState) -> PipelineState {
        match self.out.flush().await {
            Ok(()) => on_success,
            Err(err) => {
                warn!(error = %err, "sink closed while ending the response");
                self.out.discard();
                PipelineState::Cancelled
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Islands
// ---------------------------------------------------------------------------

/// A configured engine. Cheap to clone; share one per process.
#[derive(Clone)]
pub struct Islands {
    config: Arc<IslandsConfig>,
    registry: Arc<Registry>,
    manifest: ManifestStore,
    shell: Arc<dyn AppShell>,
}

struct Resolved {
    requested: String,
    view: Arc<ViewDef>,
    props: Props,
}

impl Islands {
    /// Validate the configuration and register the built-in fallback views.
    ///
    /// The manifest starts empty; [`Islands::start`] also loads or generates it.
    pub fn new(config: IslandsConfig, mut registry: Registry) -> Result<Self, ConfigError> {
        match &config.views_folder {
            None if !registry.has_views() => return Err(ConfigError::NoViewSource),
            Some(folder) => {
                let folder = config.resolve(folder);
                if !folder.is_dir() {
                    return Err(ConfigError::MissingViewsFolder(
                        folder.display().to_string(),
                    ));
                }
            }
            None => {}
        }
        if registry.view(NOT_FOUND_VIEW_ID).is_none() {
            registry.register_view(views::not_found_view());
        }
        if registry.view(INTERNAL_ERROR_VIEW_ID).is_none() {
            registry.register_view(views::internal_error_view());
        }
        let manifest = ManifestStore::new(Manifest::default(), config.manifest_path());
        Ok(Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            manifest,
            shell: Arc::new(BareShell),
        })
    }

    pub async fn start(config: IslandsConfig, registry: Registry) -> Result<Self, ConfigError> {
        let mut islands = Self::new(config, registry)?;
        islands.manifest = ManifestStore::initialize(&islands.config, &islands.registry).await;
        info!(
            mode = ?islands.config.mode,
            views = islands.manifest.current().views.len(),
            islands = islands.manifest.current().islands.len(),
            "islands engine started"
        );
        Ok(islands)
    }

    pub fn with_shell(mut self, shell: impl AppShell + 'static) -> Self {
        self.shell = Arc::new(shell);
        self
    }

    pub fn with_manifest(mut self, manifest: ManifestStore) -> Self {
        self.manifest = manifest;
        self
    }

    pub fn config(&self) -> &IslandsConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn manifest(&self) -> &ManifestStore {
        &self.manifest
    }

    fn resolve(&self, view_id: &str, props: Option<Props>) -> Resolved {
        if let Some(view) = self.registry.view(view_id) {
            return Resolved {
                requested: view_id.to_string(),
                view: Arc::clone(view),
                props: props.unwrap_or_default(),
            };
        }
        warn!(view_id, "view not found, rendering fallback");
        let mut fallback_props = props.unwrap_or_default();
        fallback_props.extend(views::not_found_props(view_id));
        let view = match self.registry.view(NOT_FOUND_VIEW_ID) {
            Some(view) => Arc::clone(view),
            None => Arc::new(views::not_found_view()),
        };
        Resolved {
            requested: view_id.to_string(),
            view,
            props: fallback_props,
        }
    }

    /// Render `view_id` into `sink`.
    ///
    /// Never fails: a missing view renders the not-found view, a failing
    /// component yields an error block, a closed sink yields a cancelled
    /// response.
    pub async fn render_view<W>(
        &self,
        view_id: &str,
        props: Option<Props>,
        context: Option<ViewContextFields>,
        sink: &mut W,
    ) -> Response
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let resolved = self.resolve(view_id, props);
        self.render_resolved(resolved, context, sink).await
    }

    /// Buffering convenience over [`Islands::render_view`].
    pub async fn render_view_to_string(
        &self,
        view_id: &str,
        props: Option<Props>,
        context: Option<ViewContextFields>,
    ) -> (Response, String) {
        let mut body = Vec::new();
        let response = self.render_view(view_id, props, context, &mut body).await;
        (response, String::from_utf8_lossy(&body).into_owned())
    }

    /// Render the internal-error view for a failure outside any view, e.g. in
    /// the host's own request handling.
    pub async fn render_internal_error<W>(
        &self,
        error: &anyhow::Error,
        context: Option<ViewContextFields>,
        sink: &mut W,
    ) -> Response
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let view = match self.registry.view(INTERNAL_ERROR_VIEW_ID) {
            Some(view) => Arc::clone(view),
            None => Arc::new(views::internal_error_view()),
        };
        let resolved = Resolved {
            requested: INTERNAL_ERROR_VIEW_ID.to_string(),
            view,
            props: views::describe_error(error, self.config.mode.is_prod()),
        };
        self.render_resolved(resolved, context, sink).await
    }

    async fn render_resolved<W>(
        &self,
        resolved: Resolved,
        context: Option<ViewContextFields>,
        sink: &mut W,
    ) -> Response
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let started = Instant::now();
        let mode = self.config.mode;
        let Resolved {
            requested,
            view,
            props: request_props,
        } = resolved;
        debug!(requested = %requested, view = view.id(), "rendering view");

        let mut props = self.config.common_props.clone();
        props.extend(request_props);
        let fields =
            ViewContextFields::merged(&self.config.view_context, &context.unwrap_or_default());
        let context = ViewContextHandle::new(fields.into());
        let scope = Scope::server(context.clone(), mode);

        let tree = self.shell.wrap(
            Node::component(view.id(), Arc::clone(view.component()), props.clone()),
            &props,
        );

        let before = context.snapshot();
        let head = format!(
            "<title>{}</title>{}",
            escape_html(&self.config.page_title(&props)),
            head_tags_markup(&reduce_duplicates(before.head))
        );
        let html_attrs = html_attrs_markup(&reduce_duplicates(before.html));

        let mut pipeline = Pipeline::new(sink);
        let mut response = Response {
            status: 200,
            content_type: CONTENT_TYPE_HTML,
            location: None,
            requested_view_id: requested,
            view_id: view.id().to_string(),
            outcome: Outcome::Completed,
            islands: Vec::new(),
            state: PipelineState::Init,
            bytes_written: 0,
        };

        if let Err(err) = pipeline.open_document(&html_attrs, &head).await {
            warn!(error = %err, "sink closed before the body");
            return self.finish(response, pipeline, Terminal::Cancel, started).await;
        }

        let instances = collect(&tree, &self.registry, &scope).await;
        let rendered = pipeline.stream_body(&tree, &self.registry, &scope).await;

        // the view may have changed its context while rendering
        let after = context.snapshot();
        if let Some(status) = after.status {
            response.status = status;
        }

        let terminal = match rendered {
            Err(err) if err.is_transport() => {
                warn!(error = %err, "sink closed mid-stream");
                Terminal::Cancel
            }
            Err(err) => {
                let (name, message, stack) = describe_render_error(&err);
                warn!(error = %err, "render failed, sending error block");
                let block = error_block(&name, &message, stack.as_deref(), mode);
                response.outcome = Outcome::Degraded { name, message };
                Terminal::Failed { block }
            }
            Ok(()) => match after.redirect_url {
                Some(url) => {
                    response.status = REDIRECT_STATUS;
                    response.location = Some(url);
                    response.outcome = Outcome::Redirected;
                    Terminal::Redirect
                }
                None => {
                    let scripts = reduce_duplicates(after.scripts);
                    match self.closing_markup(response.view_id.as_str(), &instances, &scripts, mode) {
                        Ok(closing) => {
                            response.islands = instances;
                            Terminal::Complete { closing }
                        }
                        Err(err) => {
                            warn!(error = %err, "cannot serialize island props");
                            let block = error_block("SerializationError", &err.to_string(), None, mode);
                            response.outcome = Outcome::Degraded {
                                name: "SerializationError".to_string(),
                                message: err.to_string(),
                            };
                            Terminal::Failed { block }
                        }
                    }
                }
            },
        };

        self.finish(response, pipeline, terminal, started).await
    }

    fn closing_markup(
        &self,
        view_id: &str,
        instances: &[IslandInstance],
        scripts: &[crate::context::ScriptTag],
        mode: BuildMode,
    ) -> Result<String, serde_json::Error> {
        let scripts_markup = if instances.is_empty() {
            script_tags_markup(scripts)
        } else {
            let assets =
                ScriptAssets::from_manifest(&self.manifest.current(), &self.config.public_prefix);
            synthesize(view_id, instances, scripts, &assets, mode)?.markup
        };
        Ok(format!("{scripts_markup}</body></html>"))
    }

    async fn finish<S>(
        &self,
        mut response: Response,
        pipeline: Pipeline<S>,
        terminal: Terminal,
        started: Instant,
    ) -> Response
    where
        S: AsyncWrite + Unpin + Send,
    {
        let (state, written) = pipeline.terminate(terminal).await;
        response.state = state;
        response.bytes_written = written;
        if state == PipelineState::Cancelled {
            response.outcome = Outcome::Cancelled;
            response.islands.clear();
        }
        let duration_ms = started.elapsed().as_millis() as u64;
        match &response.outcome {
            Outcome::Degraded { message, .. } => warn!(
                requested = %response.requested_view_id,
                view = %response.view_id,
                status = response.status,
                duration_ms,
                error = %message,
                "view rendered with errors"
            ),
            outcome => info!(
                requested = %response.requested_view_id,
                view = %response.view_id,
                status = response.status,
                islands = response.islands.len(),
                duration_ms,
                outcome = ?outcome,
                "view rendered"
            ),
        }
        response
    }
}

fn describe_render_error(err: &RenderError) -> (String, String, Option<String>) {
    match err {
        RenderError::Component { component, source } => (
            format!("Error in <{component}>"),
            source.to_string(),
            Some(format!("{source:?}")),
        ),
        RenderError::Io(io) => ("IoError".to_string(), io.to_string(), None),
    }
}

/// Diagnostic block sent in place of the rest of the body. Closes the
/// document; the stack only appears outside production.
fn error_block(name: &str, message: &str, stack: Option<&str>, mode: BuildMode) -> String {
    let message = escape_html(message).replace('\n', "<br />");
    let stack = match stack {
        Some(stack) if !mode.is_prod() => format!(
            "<pre style=\"max-width:100%;white-space:pre-wrap;\"><code>{}</code></pre>",
            escape_html(stack)
        ),
        _ => String::new(),
    };
    format!(
        "<div style=\"font-family:monospace;\"><h1>{}</h1><p>{}</p>{}</div></body></html>",
        escape_html(name),
        message,
        stack
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{Element, IslandDef};

    fn registry() -> Registry {
        let mut registry = Registry::new();
        let dot = registry.register_island(IslandDef::from_fn("Dot", |_, _| Ok(Node::text("."))));
        registry.register_view(ViewDef::from_fn("plain", |_, _| {
            Ok(Element::new("p").child("plain").into())
        }));
        registry.register_view(ViewDef::from_fn("dotted", move |_, _| {
            Ok(Node::island(&dot, Props::new()))
        }));
        registry
    }

    #[test]
    fn no_view_source_is_fatal() {
        let err = Islands::new(IslandsConfig::default(), Registry::new()).err();
        assert!(matches!(err, Some(ConfigError::NoViewSource)));
    }

    #[test]
    fn missing_views_folder_is_fatal() {
        let config = IslandsConfig {
            views_folder: Some("/definitely/not/here".into()),
            ..Default::default()
        };
        let err = Islands::new(config, registry()).err();
        assert!(matches!(err, Some(ConfigError::MissingViewsFolder(_))));
    }

    #[tokio::test]
    async fn plain_page_shape() {
        let islands = Islands::new(IslandsConfig::default(), registry()).unwrap();
        let (response, html) = islands.render_view_to_string("plain", None, None).await;
        assert_eq!(
            html,
            "<!DOCTYPE html><html><head><title></title></head><body><p>plain</p></body></html>"
        );
        assert_eq!(response.state, PipelineState::Sent);
        assert_eq!(response.bytes_written, html.len());
    }

    #[tokio::test]
    async fn islands_page_gets_one_module_script() {
        let islands = Islands::new(IslandsConfig::default(), registry()).unwrap();
        let (response, html) = islands.render_view_to_string("dotted", None, None).await;
        assert_eq!(html.matches("<script type=\"module\">").count(), 1);
        assert!(html.ends_with("</script></body></html>"));
        assert_eq!(response.islands.len(), 1);
    }

    #[test]
    fn error_block_hides_stack_in_production() {
        let dev = error_block("Boom", "a\nb", Some("trace"), BuildMode::Dev);
        let prod = error_block("Boom", "a\nb", Some("trace"), BuildMode::Prod);
        assert!(dev.contains("<code>trace</code>"));
        assert!(!prod.contains("trace"));
        assert!(prod.contains("<p>a<br />b</p>"));
        assert!(prod.ends_with("</body></html>"));
    }
}
