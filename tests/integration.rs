use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use ssr_islands::{
    scan_markers, Element, HeadTag, HtmlAttr, IslandDef, Islands, IslandsConfig, Node, Outcome,
    PipelineState, Props, Registry, ScriptTag, ViewContextFields, ViewDef,
};
use tokio::io::AsyncWrite;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn props(value: Value) -> Props {
    value.as_object().cloned().unwrap_or_default()
}

/// `home` renders two counters and a clock; `about` has no islands.
fn registry() -> Registry {
    let mut registry = Registry::new();
    let counter = registry.register_island(IslandDef::from_fn("Counter", |props, _| {
        let start = props.get("start").and_then(Value::as_i64).unwrap_or(0);
        Ok(Element::new("button").child(format!("count: {start}")).into())
    }));
    let clock = registry.register_island(IslandDef::from_fn("Clock", |_, _| {
        Ok(Element::new("time").child("12:00").into())
    }));
    registry.register_view(ViewDef::from_fn("home", move |_, _| {
        Ok(Element::new("main")
            .child(Node::island(&counter, props(json!({ "start": 1 }))))
            .child(Element::new("section").child(Node::island(&counter, props(json!({ "start": 2 })))))
            .child(Node::island(&clock, Props::new()))
            .into())
    }));
    registry.register_view(ViewDef::from_fn("about", |props, _| {
        let who = props.get("who").and_then(Value::as_str).unwrap_or("us");
        Ok(Element::new("p").child(format!("about {who}")).into())
    }));
    registry.register_view(ViewDef::from_fn("login-required", |_, scope| {
        scope.context().redirect("/login");
        Ok(Element::new("p").child("secret").into())
    }));
    registry.register_view(ViewDef::from_fn("teapot", |_, scope| {
        scope.context().set_status(418);
        Ok(Node::text("short and stout"))
    }));
    let broken = std::sync::Arc::new(ssr_islands::from_fn(|_, _| {
        Err(anyhow::anyhow!("database unavailable\nretry later"))
    }));
    registry.register_view(ViewDef::from_fn("broken", move |_, _| {
        Ok(Element::new("main")
            .child(Element::new("h2").child("before"))
            .child(Node::component("Broken", broken.clone(), Props::new()))
            .into())
    }));
    registry.register_view(ViewDef::from_fn("huge", |_, _| {
        Ok(Node::text("x".repeat(64 * 1024)))
    }));
    registry
}

fn engine() -> Islands {
    Islands::new(IslandsConfig::default(), registry()).unwrap()
}

/// The `islandsProps` object embedded in the page script.
fn islands_props(html: &str) -> serde_json::Map<String, Value> {
    let line = html
        .lines()
        .find_map(|line| line.strip_prefix("var islandsProps = "))
        .expect("page script carries islandsProps");
    serde_json::from_str(line.trim_end_matches(';')).expect("islandsProps is JSON")
}

/// Keys of the `islands` definitions object embedded in the page script.
fn island_definitions(html: &str) -> Vec<String> {
    html.lines()
        .skip_while(|line| *line != "var islands = {")
        .skip(1)
        .take_while(|line| *line != "};")
        .map(|line| {
            let key = line.split(": ").next().unwrap_or_default();
            serde_json::from_str::<String>(key).expect("definition key is a JS string")
        })
        .collect()
}

/// A sink whose peer has gone away.
struct ClosedSink;

impl AsyncWrite for ClosedSink {
    fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, _: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone")))
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

// ---------------------------------------------------------------------------
// Islands collection and page script
// ---------------------------------------------------------------------------

#[tokio::test]
async fn home_page_collects_islands_in_document_order() {
    let (response, html) = engine().render_view_to_string("home", None, None).await;

    let ids: Vec<_> = response.islands.iter().map(|i| i.instance_id.as_str()).collect();
    assert_eq!(ids, vec!["Counter$$0", "Counter$$1", "Clock$$0"]);
    assert_eq!(scan_markers(&html), ids);
    assert_eq!(response.outcome, Outcome::Completed);
    assert_eq!(response.state, PipelineState::Sent);
    assert_eq!(response.status, 200);

    assert_eq!(html.matches("<script type=\"module\">").count(), 1);
    assert_eq!(island_definitions(&html), vec!["Counter", "Clock"]);
    let embedded = islands_props(&html);
    let mut keys: Vec<_> = embedded.keys().cloned().collect();
    keys.sort();
    assert_eq!(keys, vec!["Clock$$0", "Counter$$0", "Counter$$1"]);
    assert_eq!(embedded["Counter$$1"], json!({ "start": 2 }));
}

#[tokio::test]
async fn zero_island_page_has_no_script() {
    let (response, html) = engine()
        .render_view_to_string("about", Some(props(json!({ "who": "me" }))), None)
        .await;
    assert!(response.islands.is_empty());
    assert!(!html.contains("<script"));
    assert_eq!(
        html,
        "<!DOCTYPE html><html><head><title></title></head><body><p>about me</p></body></html>"
    );
}

#[tokio::test]
async fn ordinals_restart_for_every_request() {
    let islands = engine();
    let (first, second) = tokio::join!(
        islands.render_view_to_string("home", None, None),
        islands.render_view_to_string("home", None, None),
    );
    assert_eq!(first.0.islands, second.0.islands);
    assert_eq!(first.1, second.1);
    let (third, _) = islands.render_view_to_string("home", None, None).await;
    assert_eq!(third.islands[0].instance_id, "Counter$$0");
}

// ---------------------------------------------------------------------------
// Resolution, context and terminal transitions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_view_renders_not_found_with_the_requested_id() {
    let (response, html) = engine().render_view_to_string("does-not-exist", None, None).await;
    assert_eq!(response.requested_view_id, "does-not-exist");
    assert_eq!(response.view_id, "NotFoundErrorView");
    assert_eq!(response.status, 404);
    assert_eq!(response.outcome, Outcome::Completed);
    assert!(html.contains("does-not-exist"));
    assert!(html.ends_with("</body></html>"));
}

#[tokio::test]
async fn redirect_set_during_render_wins() {
    let (response, html) = engine().render_view_to_string("login-required", None, None).await;
    assert_eq!(response.status, 301);
    assert_eq!(response.location.as_deref(), Some("/login"));
    assert_eq!(response.outcome, Outcome::Redirected);
    assert_eq!(response.state, PipelineState::Redirected);
    assert!(!html.contains("</html>"));
}

#[tokio::test]
async fn status_set_during_render_is_applied() {
    let (response, _) = engine().render_view_to_string("teapot", None, None).await;
    assert_eq!(response.status, 418);
}

#[tokio::test]
async fn render_error_closes_the_document_once() {
    let (response, html) = engine().render_view_to_string("broken", None, None).await;
    assert_eq!(response.state, PipelineState::Errored);
    match &response.outcome {
        Outcome::Degraded { name, message } => {
            assert_eq!(name, "Error in <Broken>");
            assert!(message.contains("database unavailable"));
        }
        other => panic!("expected degraded outcome, got {other:?}"),
    }
    assert!(html.contains("<h2>before</h2>"));
    assert!(html.contains("<h1>Error in &lt;Broken&gt;</h1>"));
    assert!(html.contains("database unavailable<br />retry later"));
    assert!(html.contains("<pre"));
    assert_eq!(html.matches("</body>").count(), 1);
    assert_eq!(html.matches("</html>").count(), 1);
    assert!(!html.contains("<script"));
}

#[tokio::test]
async fn production_error_block_has_no_stack() {
    let config = IslandsConfig {
        mode: ssr_islands::BuildMode::Prod,
        ..Default::default()
    };
    let islands = Islands::new(config, registry()).unwrap();
    let (_, html) = islands.render_view_to_string("broken", None, None).await;
    assert!(html.contains("<h1>Error in &lt;Broken&gt;</h1>"));
    assert!(!html.contains("<pre"));
}

#[tokio::test]
async fn closed_sink_cancels_the_response() {
    let islands = engine();
    for view in ["home", "huge"] {
        let mut sink = ClosedSink;
        let response = islands.render_view(view, None, None, &mut sink).await;
        assert_eq!(response.outcome, Outcome::Cancelled, "view {view}");
        assert_eq!(response.state, PipelineState::Cancelled);
        assert!(response.islands.is_empty());
        assert_eq!(response.bytes_written, 0);
    }
}

#[tokio::test]
async fn internal_error_view_for_host_failures() {
    let mut body = Vec::new();
    let err = anyhow::anyhow!("upstream timed out");
    let response = engine().render_internal_error(&err, None, &mut body).await;
    let html = String::from_utf8(body).unwrap();
    assert_eq!(response.view_id, "InternalErrorView");
    assert_eq!(response.status, 500);
    assert!(html.contains("upstream timed out"));
}

// ---------------------------------------------------------------------------
// Props and context merging
// ---------------------------------------------------------------------------

#[tokio::test]
async fn request_props_override_common_props() {
    let config = IslandsConfig {
        app_name: "Shop".into(),
        common_props: props(json!({ "title": "Welcome", "who": "everyone" })),
        ..Default::default()
    };
    let islands = Islands::new(config, registry()).unwrap();
    let (_, html) = islands
        .render_view_to_string("about", Some(props(json!({ "title": "About" }))), None)
        .await;
    assert!(html.contains("<title>About - Shop</title>"));
    assert!(html.contains("<p>about everyone</p>"));
}

#[tokio::test]
async fn head_tags_and_scripts_are_deduplicated() {
    let config = IslandsConfig {
        view_context: ViewContextFields {
            head: vec![HeadTag::charset("utf-8"), HeadTag::stylesheet("/app.css")],
            scripts: vec![ScriptTag::src("/analytics.js")],
            ..Default::default()
        },
        ..Default::default()
    };
    let islands = Islands::new(config, registry()).unwrap();
    let request = ViewContextFields {
        head: vec![HeadTag::stylesheet("/app.css"), HeadTag::meta("robots", "noindex")],
        scripts: vec![ScriptTag::src("/analytics.js")],
        ..Default::default()
    };
    let (_, html) = islands.render_view_to_string("about", None, Some(request)).await;
    assert_eq!(html.matches("/app.css").count(), 1);
    assert_eq!(html.matches("/analytics.js").count(), 1);
    assert!(html.contains(
        "<head><title></title><meta charset=\"utf-8\" /><link href=\"/app.css\" rel=\"stylesheet\" /><meta name=\"robots\" content=\"noindex\" /></head>"
    ));
    assert!(html.ends_with("<script type=\"text/javascript\" src=\"/analytics.js\"></script></body></html>"));
}

#[tokio::test]
async fn request_html_attrs_replace_configured_ones() {
    let config = IslandsConfig {
        view_context: ViewContextFields {
            html: vec![HtmlAttr::new("lang", "en"), HtmlAttr::new("class", "light")],
            ..Default::default()
        },
        ..Default::default()
    };
    let islands = Islands::new(config, registry()).unwrap();
    let request = ViewContextFields {
        html: vec![HtmlAttr::new("lang", "fr")],
        ..Default::default()
    };
    let (_, html) = islands.render_view_to_string("about", None, Some(request)).await;
    assert!(html.starts_with("<!DOCTYPE html><html lang=\"fr\" class=\"light\"><head>"));
    assert_eq!(html.matches("lang=").count(), 1);
}

#[tokio::test]
async fn app_shell_wraps_every_view() {
    let islands = engine().with_shell(|view: Node, _: &Props| -> Node {
        Element::new("div").attr("id", "app").child(view).into()
    });
    let (response, html) = islands.render_view_to_string("home", None, None).await;
    assert!(html.contains("<body><div id=\"app\"><main>"));
    assert_eq!(response.islands.len(), 3);
}
