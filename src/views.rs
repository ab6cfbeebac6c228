//! Built-in fallback views.
//!
//! Both are registered under fixed ids unless the host registered a view with
//! the same id first.

use serde_json::{json, Value};

use crate::resource::{Element, Node, Props, Scope, ViewDef};

pub const NOT_FOUND_VIEW_ID: &str = "NotFoundErrorView";
pub const INTERNAL_ERROR_VIEW_ID: &str = "InternalErrorView";

/// Props handed to a fallback view: `{"error": {"name", "message", ...}}`.
pub fn error_props(name: &str, message: &str, details: Props) -> Props {
    let mut error = Props::new();
    error.insert("name".into(), name.into());
    error.insert("message".into(), message.into());
    error.extend(details);
    let mut props = Props::new();
    props.insert("error".into(), Value::Object(error));
    props
}

/// Props for a request whose view id is not registered. The offending id is
/// kept under `error.viewId`.
pub fn not_found_props(view_id: &str) -> Props {
    let mut details = Props::new();
    details.insert("viewId".into(), view_id.into());
    error_props(
        "NotFoundError",
        &format!("view `{view_id}` is not registered"),
        details,
    )
}

fn error_field<'p>(props: &'p Props, field: &str) -> Option<&'p str> {
    props.get("error")?.get(field)?.as_str()
}

pub fn not_found_view() -> ViewDef {
    ViewDef::from_fn(NOT_FOUND_VIEW_ID, render_not_found)
}

fn render_not_found(props: &Props, scope: &Scope) -> anyhow::Result<Node> {
    scope.context().set_status(404);
    let mut root = Element::new("div")
        .child(Element::new("h1").child("This page cannot be found"))
        .child(Element::new("p").child("Sorry, this page does not exist (error 404)."));
    if !scope.mode.is_prod() {
        let mut details = Element::new("details")
            .child(Element::new("summary").child("Find out more about this error"));
        if let Some(view_id) = error_field(props, "viewId") {
            details = details.child(
                Element::new("p").child(format!("No view is registered under `{view_id}`.")),
            );
        }
        if let Some(message) = error_field(props, "message") {
            details = details.child(Element::new("p").child(message));
        }
        details = details.child(Element::new("p").child(
            "Check that the view exists in the views folder and that the manifest lists it.",
        ));
        root = root.child(details);
    }
    Ok(root
        .child(
            Element::new("a")
                .attr("href", "/")
                .attr("role", "button")
                .child("Back to home"),
        )
        .into())
}

pub fn internal_error_view() -> ViewDef {
    ViewDef::from_fn(INTERNAL_ERROR_VIEW_ID, render_internal_error)
}

fn render_internal_error(props: &Props, scope: &Scope) -> anyhow::Result<Node> {
    scope.context().set_status(500);
    let mut root = Element::new("div")
        .child(Element::new("h1").child("We have encountered an internal error"))
        .child(Element::new("p").child("Sorry, we cannot recover from this error."));
    if !scope.mode.is_prod() {
        let name = error_field(props, "name").unwrap_or("Error");
        let message = error_field(props, "message").unwrap_or_default();
        let mut details = Element::new("details")
            .child(Element::new("summary").child("Find out more about this error"))
            .child(Element::new("p").child(format!("{name}: {message}")));
        if let Some(stack) = error_field(props, "stack") {
            details = details.child(Element::new("pre").child(stack));
        }
        root = root.child(details);
    }
    Ok(root
        .child(
            Element::new("a")
                .attr("href", "/")
                .attr("role", "button")
                .child("Try again"),
        )
        .into())
}

/// The error as `{"name", "message", "stack"}`; the chain is only kept
/// outside production.
pub fn describe_error(err: &anyhow::Error, prod: bool) -> Props {
    let mut details = Props::new();
    if !prod {
        details.insert("stack".into(), json!(format!("{err:?}")));
    }
    error_props("InternalError", &err.to_string(), details)
}
