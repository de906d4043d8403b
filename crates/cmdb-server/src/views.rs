//! HTML and HTMX handlers.
//!
//! Full navigations get a complete page. Requests carrying `HX-Request`
//! get the fragment their trigger swaps. Permission failures and other
//! errors on HTMX requests are always routed to `#error-surface`; form
//! validation errors re-render the form in place.

use axum::extract::{Path, Query, State};
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::{Form, Json};
use serde::Deserialize;

use cmdb_audit::{AuditAction, AuditQuery};
use cmdb_core::rbac::{Action, User};
use cmdb_core::types::{Page, Properties, TypeDefinition};

use crate::api::PageParams;
use crate::auth::{
    clear_flash_cookie, found, htmx_error, read_flash, require_node, require_staff, Htmx,
    SessionUser, HOME_PATH,
};
use crate::bootstrap;
use crate::error::AppError;
use crate::forms::{create_fields, edit_fields, NodeForm};
use crate::html::{self, FormMode, NodePerms, RelationshipsView};
use crate::service::ConnectRequest;
use crate::state::SharedState;

/// Entries shown on the global audit log page.
const AUDIT_LOG_LIMIT: usize = 200;

/// Header that tells listening tables to reload.
const NODES_CHANGED: &str = "nodes-changed";

// ── Helpers ──────────────────────────────────────────────────────

/// Render an error for an HTML request.
fn failure(err: AppError, htmx: Htmx) -> Response {
    let status = err.status();
    let message = if status.is_server_error() {
        tracing::error!(error = %err, "Request failed");
        "Internal server error".to_string()
    } else {
        err.to_string()
    };
    if htmx.0 {
        htmx_error(status, &message)
    } else {
        let title = status.canonical_reason().unwrap_or("Error");
        (status, Html(html::error_page(title, &message))).into_response()
    }
}

fn nav(state: &SharedState, user: &User, headers: &HeaderMap) -> html::Nav {
    let categories = state
        .acl
        .visible_categories(Some(user), &state.registry)
        .into_iter()
        .map(|(category, labels)| {
            let labels = labels
                .into_iter()
                .map(|label| {
                    let display = state.registry.metadata(&label).display_name_or(&label).to_string();
                    (label, display)
                })
                .collect();
            (category, labels)
        })
        .collect();
    html::Nav {
        user: user.clone(),
        categories,
        flash: read_flash(headers),
    }
}

/// A full page. A pending flash is rendered once and cleared.
fn render_page(state: &SharedState, user: &User, headers: &HeaderMap, title: &str, body: &str) -> Response {
    let nav = nav(state, user, headers);
    let mut response = Html(html::page(title, &nav, body)).into_response();
    if nav.flash.is_some() {
        if let Ok(value) = HeaderValue::from_str(&clear_flash_cookie()) {
            response.headers_mut().append(SET_COOKIE, value);
        }
    }
    response
}

fn perms(state: &SharedState, user: &User, label: &str) -> NodePerms {
    let has = |action| state.acl.has_node_permission(user, action, Some(label));
    NodePerms {
        view: has(Action::View),
        add: has(Action::Add),
        change: has(Action::Change),
        delete: has(Action::Delete),
    }
}

/// Registered labels `user` may view.
fn viewable_labels(state: &SharedState, user: &User) -> Vec<String> {
    state
        .registry
        .known_labels()
        .into_iter()
        .filter(|l| state.acl.has_node_permission(user, Action::View, Some(l.as_str())))
        .collect()
}

/// Resolve `label` and check `action` on it.
fn guard(
    state: &SharedState,
    user: &User,
    action: Action,
    label: &str,
    htmx: Htmx,
) -> Result<TypeDefinition, Response> {
    let (_, definition) = state.service.resolve(label).map_err(|e| failure(e, htmx))?;
    require_node(state, user, action, label, htmx)?;
    Ok(definition)
}

fn with_trigger(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert("hx-trigger", HeaderValue::from_static(NODES_CHANGED));
    response
}

fn detail_path(label: &str, id: &str) -> String {
    format!("/cmdb/{label}/{id}/")
}

// ── Dashboard & Types ────────────────────────────────────────────

pub async fn root() -> Response {
    found(HOME_PATH, &[])
}

pub async fn dashboard(
    State(state): State<SharedState>,
    SessionUser(user): SessionUser,
    htmx: Htmx,
    headers: HeaderMap,
) -> Response {
    let mut categories = std::collections::BTreeMap::new();
    for (category, labels) in state.acl.visible_categories(Some(&user), &state.registry) {
        let mut tiles = Vec::with_capacity(labels.len());
        for label in labels {
            let count = match state.service.count(&label).await {
                Ok(c) => c,
                Err(e) => return failure(e, htmx),
            };
            tiles.push(html::TypeCount {
                display_name: state.registry.metadata(&label).display_name_or(&label).to_string(),
                label,
                count,
            });
        }
        categories.insert(category, tiles);
    }
    render_page(&state, &user, &headers, "Dashboard", &html::dashboard(&categories))
}

pub async fn types_page(
    State(state): State<SharedState>,
    SessionUser(user): SessionUser,
    headers: HeaderMap,
) -> Response {
    let rows: Vec<html::TypeRow> = state
        .registry
        .known_labels()
        .into_iter()
        .map(|label| html::TypeRow {
            definition: state.registry.metadata(&label),
            pack: state.registry.pack_for_type(&label),
            label,
        })
        .collect();
    render_page(&state, &user, &headers, "Node types", &html::types_table(&rows))
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditParams {
    pub action: Option<String>,
    pub user: Option<String>,
    pub label: Option<String>,
}

pub async fn audit_log_page(
    State(state): State<SharedState>,
    SessionUser(user): SessionUser,
    htmx: Htmx,
    headers: HeaderMap,
    Query(params): Query<AuditParams>,
) -> Response {
    if let Err(denied) = require_staff(&user, htmx) {
        return denied;
    }
    let nonempty = |v: &Option<String>| v.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
    let query = AuditQuery {
        action: params.action.as_deref().and_then(AuditAction::parse),
        user: nonempty(&params.user),
        node_label: nonempty(&params.label),
        limit: Some(AUDIT_LOG_LIMIT),
        ..Default::default()
    };
    let entries = match state.service.audit_log(&query).await {
        Ok(entries) => entries,
        Err(e) => return failure(e, htmx),
    };
    let filters = html::AuditFilters {
        action: params.action.unwrap_or_default(),
        user: params.user.unwrap_or_default(),
        label: params.label.unwrap_or_default(),
    };
    render_page(&state, &user, &headers, "Audit log", &html::audit_log(&entries, &filters))
}

// ── Node Lists ───────────────────────────────────────────────────

pub async fn list_nodes(
    State(state): State<SharedState>,
    SessionUser(user): SessionUser,
    htmx: Htmx,
    headers: HeaderMap,
    Path(label): Path<String>,
    Query(params): Query<PageParams>,
) -> Response {
    let definition = match guard(&state, &user, Action::View, &label, htmx) {
        Ok(d) => d,
        Err(denied) => return denied,
    };
    let page = match params.to_page() {
        Ok(p) => p,
        Err(e) => return failure(e, htmx),
    };
    let (nodes, total) = match state.service.list(&label, page).await {
        Ok(r) => r,
        Err(e) => return failure(e, htmx),
    };

    let perms = perms(&state, &user, &label);
    let table = html::nodes_table(&label, &definition, &nodes, total, page, perms);
    if htmx.0 {
        return Html(table).into_response();
    }
    let body = html::nodes_page(&label, &definition, &table, perms);
    render_page(&state, &user, &headers, definition.display_name_or(&label), &body)
}

#[derive(Debug, Default, Deserialize)]
pub struct TargetParams {
    pub target_label: Option<String>,
}

/// `<option>` elements for the relationship target picker.
pub async fn target_options(
    State(state): State<SharedState>,
    SessionUser(user): SessionUser,
    htmx: Htmx,
    Query(params): Query<TargetParams>,
) -> Response {
    let Some(label) = params.target_label.filter(|l| !l.trim().is_empty()) else {
        return Html(html::no_label_option()).into_response();
    };
    if let Err(denied) = guard(&state, &user, Action::View, &label, htmx) {
        return denied;
    }
    match state.service.target_options(&label).await {
        Ok(options) => {
            let options: Vec<(String, String)> =
                options.into_iter().map(|(id, name)| (id.0, name)).collect();
            Html(html::target_options(&options)).into_response()
        }
        Err(e) => failure(e, htmx),
    }
}

// ── Create ───────────────────────────────────────────────────────

pub async fn create_form(
    State(state): State<SharedState>,
    SessionUser(user): SessionUser,
    htmx: Htmx,
    Path(label): Path<String>,
) -> Response {
    let definition = match guard(&state, &user, Action::Add, &label, htmx) {
        Ok(d) => d,
        Err(denied) => return denied,
    };
    let fields = create_fields(&definition, &Properties::new());
    Html(html::node_form(&label, &definition, FormMode::Create, &fields, "", None)).into_response()
}

pub async fn create_submit(
    State(state): State<SharedState>,
    SessionUser(user): SessionUser,
    htmx: Htmx,
    Path(label): Path<String>,
    Form(pairs): Form<Vec<(String, String)>>,
) -> Response {
    let definition = match guard(&state, &user, Action::Add, &label, htmx) {
        Ok(d) => d,
        Err(denied) => return denied,
    };
    let form = NodeForm::from_pairs(pairs);
    let rerender = |error: &str| {
        let fields = create_fields(&definition, &form.submitted());
        let raw = form.raw_json.as_deref().unwrap_or_default();
        Html(html::node_form(&label, &definition, FormMode::Create, &fields, raw, Some(error))).into_response()
    };

    let properties = match form.create_properties() {
        Ok(p) => p,
        Err(message) => return rerender(&message),
    };
    match state.service.create(&label, properties, Some(&user.username)).await {
        Ok(node) => {
            if !htmx.0 {
                return found(&detail_path(&label, node.id.as_str()), &[]);
            }
            let message = format!("{label} created with ID {}", node.id);
            with_trigger(Html(html::success_with_oob(&message)).into_response())
        }
        Err(e) if e.status() == StatusCode::BAD_REQUEST => rerender(&e.to_string()),
        Err(e) => failure(e, htmx),
    }
}

// ── Detail ───────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct DetailParams {
    pub fragment: Option<String>,
}

pub async fn node_detail(
    State(state): State<SharedState>,
    SessionUser(user): SessionUser,
    htmx: Htmx,
    headers: HeaderMap,
    Path((label, id)): Path<(String, String)>,
    Query(params): Query<DetailParams>,
) -> Response {
    let definition = match guard(&state, &user, Action::View, &label, htmx) {
        Ok(d) => d,
        Err(denied) => return denied,
    };
    let node = match state.service.get(&label, &id).await {
        Ok(n) => n,
        Err(e) => return failure(e, htmx),
    };
    if params.fragment.as_deref() == Some("properties") {
        return Html(html::properties_table(&label, &node)).into_response();
    }
    let relationships = match state.service.relationships(&label, &id).await {
        Ok(r) => r,
        Err(e) => return failure(e, htmx),
    };

    let perms = perms(&state, &user, &label);
    let targets = viewable_labels(&state, &user);
    let view = RelationshipsView {
        label: &label,
        node_id: &id,
        definition: &definition,
        relationships: &relationships,
        target_labels: &targets,
        can_change: perms.change,
    };
    let body = html::node_detail(
        &label,
        &definition,
        &node,
        &html::relationships(&view, None),
        &state.tabs_for(&label),
        perms,
    );
    render_page(&state, &user, &headers, &node.display_name(), &body)
}

pub async fn node_audit(
    State(state): State<SharedState>,
    SessionUser(user): SessionUser,
    htmx: Htmx,
    Path((label, id)): Path<(String, String)>,
) -> Response {
    if let Err(denied) = guard(&state, &user, Action::View, &label, htmx) {
        return denied;
    }
    match state.service.audit_for_node(&label, &id).await {
        Ok(entries) => Html(html::audit_tab(&entries)).into_response(),
        Err(e) => failure(e, htmx),
    }
}

// ── Edit & Delete ────────────────────────────────────────────────

pub async fn edit_form(
    State(state): State<SharedState>,
    SessionUser(user): SessionUser,
    htmx: Htmx,
    Path((label, id)): Path<(String, String)>,
) -> Response {
    let definition = match guard(&state, &user, Action::Change, &label, htmx) {
        Ok(d) => d,
        Err(denied) => return denied,
    };
    let node = match state.service.get(&label, &id).await {
        Ok(n) => n,
        Err(e) => return failure(e, htmx),
    };
    let fields = edit_fields(&definition, &node.properties);
    let raw = serde_json::to_string_pretty(&node.properties).unwrap_or_default();
    let original = serde_json::to_string(&node.properties).unwrap_or_default();
    let mode = FormMode::Edit {
        id: &id,
        original_json: &original,
    };
    Html(html::node_form(&label, &definition, mode, &fields, &raw, None)).into_response()
}

pub async fn edit_submit(
    State(state): State<SharedState>,
    SessionUser(user): SessionUser,
    htmx: Htmx,
    Path((label, id)): Path<(String, String)>,
    Form(pairs): Form<Vec<(String, String)>>,
) -> Response {
    let definition = match guard(&state, &user, Action::Change, &label, htmx) {
        Ok(d) => d,
        Err(denied) => return denied,
    };
    let form = NodeForm::from_pairs(pairs);
    let rerender = |error: &str| {
        let fields = edit_fields(&definition, &form.submitted());
        let raw = form.raw_json.as_deref().unwrap_or_default();
        let original = form.original_json.as_deref().unwrap_or_default();
        let mode = FormMode::Edit {
            id: &id,
            original_json: original,
        };
        Html(html::node_form(&label, &definition, mode, &fields, raw, Some(error))).into_response()
    };

    let patch = match form.edit_properties() {
        Ok(p) => p,
        Err(message) => return rerender(&message),
    };
    match state.service.update(&label, &id, patch, Some(&user.username)).await {
        Ok(_) if !htmx.0 => found(&detail_path(&label, &id), &[]),
        Ok(_) => with_trigger(Html(html::success_with_oob("Node updated successfully")).into_response()),
        Err(e) if e.status() == StatusCode::BAD_REQUEST => rerender(&e.to_string()),
        Err(e) => failure(e, htmx),
    }
}

pub async fn delete_node(
    State(state): State<SharedState>,
    SessionUser(user): SessionUser,
    htmx: Htmx,
    Path((label, id)): Path<(String, String)>,
) -> Response {
    let definition = match guard(&state, &user, Action::Delete, &label, htmx) {
        Ok(d) => d,
        Err(denied) => return denied,
    };
    if let Err(e) = state.service.delete(&label, &id, Some(&user.username)).await {
        return failure(e, htmx);
    }
    if !htmx.0 {
        return found(&format!("/cmdb/{label}/"), &[]);
    }

    let page = Page::default();
    let (nodes, total) = match state.service.list(&label, page).await {
        Ok(r) => r,
        Err(e) => return failure(e, htmx),
    };
    let table = html::nodes_table(&label, &definition, &nodes, total, page, perms(&state, &user, &label));
    Html(format!("{table}\n{}", html::oob_message("Node deleted successfully"))).into_response()
}

// ── Relationships ────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ConnectForm {
    #[serde(default)]
    pub rel_type: String,
    #[serde(default)]
    pub target_label: String,
    #[serde(default)]
    pub target_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct DisconnectForm {
    #[serde(default)]
    pub rel_type: String,
    #[serde(default)]
    pub target_id: String,
    pub target_label: Option<String>,
}

/// Re-render `#relationships` after a connect or disconnect attempt.
async fn relationships_partial(
    state: &SharedState,
    user: &User,
    label: &str,
    id: &str,
    definition: &TypeDefinition,
    message: (&str, &str),
    htmx: Htmx,
) -> Response {
    let relationships = match state.service.relationships(label, id).await {
        Ok(r) => r,
        Err(e) => return failure(e, htmx),
    };
    let targets = viewable_labels(state, user);
    let view = RelationshipsView {
        label,
        node_id: id,
        definition,
        relationships: &relationships,
        target_labels: &targets,
        can_change: true,
    };
    Html(html::relationships(&view, Some(message))).into_response()
}

pub async fn connect(
    State(state): State<SharedState>,
    SessionUser(user): SessionUser,
    htmx: Htmx,
    Path((label, id)): Path<(String, String)>,
    Form(form): Form<ConnectForm>,
) -> Response {
    let definition = match guard(&state, &user, Action::Change, &label, htmx) {
        Ok(d) => d,
        Err(denied) => return denied,
    };
    let rel_type = form.rel_type.trim().to_uppercase();
    let target_label = form.target_label.trim().to_string();
    let target_id = form.target_id.trim().to_string();
    if rel_type.is_empty() || target_label.is_empty() || target_id.is_empty() {
        let message = ("error", "Missing relationship details");
        return relationships_partial(&state, &user, &label, &id, &definition, message, htmx).await;
    }

    let request = ConnectRequest {
        rel_type: rel_type.clone(),
        target_label,
        target_id,
        properties: Properties::new(),
    };
    let outcome = state.service.connect(&label, &id, request, Some(&user.username)).await;
    let text = match outcome {
        Ok(()) => format!("Relationship '{rel_type}' added"),
        Err(e) if e.is_client_error() => {
            let text = e.to_string();
            return relationships_partial(&state, &user, &label, &id, &definition, ("error", &text), htmx).await;
        }
        Err(e) => return failure(e, htmx),
    };
    relationships_partial(&state, &user, &label, &id, &definition, ("success", &text), htmx).await
}

pub async fn disconnect(
    State(state): State<SharedState>,
    SessionUser(user): SessionUser,
    htmx: Htmx,
    Path((label, id)): Path<(String, String)>,
    Form(form): Form<DisconnectForm>,
) -> Response {
    let definition = match guard(&state, &user, Action::Change, &label, htmx) {
        Ok(d) => d,
        Err(denied) => return denied,
    };
    let rel_type = form.rel_type.trim().to_uppercase();
    let target_id = form.target_id.trim().to_string();
    if rel_type.is_empty() || target_id.is_empty() {
        let message = ("error", "Missing disconnect details");
        return relationships_partial(&state, &user, &label, &id, &definition, message, htmx).await;
    }

    let outcome = state
        .service
        .disconnect(
            &label,
            &id,
            &rel_type,
            form.target_label.as_deref(),
            &target_id,
            Some(&user.username),
        )
        .await;
    let text = match outcome {
        Ok(()) => format!("Relationship '{rel_type}' removed"),
        Err(e) if e.is_client_error() => {
            let text = e.to_string();
            return relationships_partial(&state, &user, &label, &id, &definition, ("error", &text), htmx).await;
        }
        Err(e) => return failure(e, htmx),
    };
    relationships_partial(&state, &user, &label, &id, &definition, ("success", &text), htmx).await
}

// ── Feature Packs ────────────────────────────────────────────────

pub async fn packs_page(
    State(state): State<SharedState>,
    SessionUser(user): SessionUser,
    htmx: Htmx,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = require_staff(&user, htmx) {
        return denied;
    }
    match state.store.list_packs().await {
        Ok(packs) => render_page(&state, &user, &headers, "Feature packs", &html::packs_table(&packs)),
        Err(e) => failure(e.into(), htmx),
    }
}

pub async fn pack_detail(
    State(state): State<SharedState>,
    SessionUser(user): SessionUser,
    htmx: Htmx,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Response {
    if let Err(denied) = require_staff(&user, htmx) {
        return denied;
    }
    let pack = match state.store.get_pack(&name).await {
        Ok(Some(p)) => p,
        Ok(None) => return failure(AppError::NotFound(format!("Feature pack \"{name}\" not found")), htmx),
        Err(e) => return failure(e.into(), htmx),
    };
    let types = match state.store.type_definitions_for_pack(&name).await {
        Ok(t) => t,
        Err(e) => return failure(e.into(), htmx),
    };
    let title = pack.display_name.clone();
    render_page(&state, &user, &headers, &title, &html::pack_detail(&pack, &types))
}

async fn toggle_pack(state: SharedState, user: User, htmx: Htmx, name: String, enabled: bool) -> Response {
    if let Err(denied) = require_staff(&user, htmx) {
        return denied;
    }
    match bootstrap::set_pack_enabled(&state, &name, enabled).await {
        Ok(pack) => {
            let verb = if enabled { "enabled" } else { "disabled" };
            tracing::info!(pack = %pack.name, user = %user.username, enabled, "Feature pack updated");
            Json(serde_json::json!({
                "success": true,
                "message": format!("Feature pack \"{}\" {verb} successfully", pack.name),
                "pack_name": pack.name,
                "enabled": pack.enabled,
            }))
            .into_response()
        }
        Err(e) => e.into_response(),
    }
}

pub async fn enable_pack(
    State(state): State<SharedState>,
    SessionUser(user): SessionUser,
    htmx: Htmx,
    Path(name): Path<String>,
) -> Response {
    toggle_pack(state, user, htmx, name, true).await
}

pub async fn disable_pack(
    State(state): State<SharedState>,
    SessionUser(user): SessionUser,
    htmx: Htmx,
    Path(name): Path<String>,
) -> Response {
    toggle_pack(state, user, htmx, name, false).await
}

// ── Users ────────────────────────────────────────────────────────

pub async fn profile(
    State(state): State<SharedState>,
    SessionUser(user): SessionUser,
    headers: HeaderMap,
) -> Response {
    let permissions = state.acl.effective_permissions(&user);
    render_page(&state, &user, &headers, "Profile", &html::profile(&user, &permissions))
}

pub async fn users_list(
    State(state): State<SharedState>,
    SessionUser(user): SessionUser,
    htmx: Htmx,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = require_staff(&user, htmx) {
        return denied;
    }
    render_page(&state, &user, &headers, "Users", &html::users_table(&state.acl.users()))
}

pub async fn groups_list(
    State(state): State<SharedState>,
    SessionUser(user): SessionUser,
    htmx: Htmx,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = require_staff(&user, htmx) {
        return denied;
    }
    render_page(&state, &user, &headers, "Groups", &html::groups_table(&state.acl.groups()))
}
