//! HTML rendering for the browser UI.
//!
//! Pages are plain strings assembled with `format!`. Everything that came
//! from a user or a pack file goes through [`escape`]. The markup carries the
//! `hx-*` and `x-*` attributes HTMX and Alpine.js act on; both libraries are
//! loaded from a CDN.

use std::collections::{BTreeMap, BTreeSet};

use cmdb_audit::AuditEntry;
use cmdb_core::packs::{PackRecord, PackTab, TypeDefinitionRecord};
use cmdb_core::rbac::{Group, User};
use cmdb_core::types::{
    value_to_plain_string, Direction, NodeRecord, NodeRelationships, Page, TypeDefinition,
};

use crate::forms::{FieldKind, FormField};

const HTMX_SRC: &str = "https://unpkg.com/htmx.org@1.9.12";
const ALPINE_SRC: &str = "https://unpkg.com/alpinejs@3.14.1/dist/cdn.min.js";

/// Column visibility per label, persisted in `localStorage`.
const COLUMN_PREFS_JS: &str = r#"
function columnPrefs(key, defaults) {
  let saved = null;
  try { saved = JSON.parse(localStorage.getItem(key)); } catch (e) { saved = null; }
  return {
    visible: Array.isArray(saved) ? saved : defaults,
    shown(col) { return this.visible.includes(col); },
    toggle(col) {
      this.visible = this.shown(col)
        ? this.visible.filter((c) => c !== col)
        : this.visible.concat([col]);
      localStorage.setItem(key, JSON.stringify(this.visible));
    },
  };
}
"#;

pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}

fn yes_no(b: bool) -> &'static str {
    if b {
        "Yes"
    } else {
        "No"
    }
}

fn timestamp(t: Option<chrono::DateTime<chrono::Utc>>) -> String {
    t.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "-".to_string())
}

// ── Layout ───────────────────────────────────────────────────────

/// What every full page needs besides its body.
#[derive(Debug, Clone)]
pub struct Nav {
    pub user: User,
    /// Category → `(label, display name)`, already filtered by permission.
    pub categories: BTreeMap<String, Vec<(String, String)>>,
    pub flash: Option<String>,
}

/// Node actions the current user may perform on one label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodePerms {
    pub view: bool,
    pub add: bool,
    pub change: bool,
    pub delete: bool,
}

pub fn page(title: &str, nav: &Nav, body: &str) -> String {
    let mut sidebar = String::new();
    for (category, labels) in &nav.categories {
        sidebar.push_str(&format!("<h4>{}</h4><ul>", escape(category)));
        for (label, display) in labels {
            sidebar.push_str(&format!(
                r#"<li><a href="/cmdb/{}/">{}</a></li>"#,
                escape(label),
                escape(display)
            ));
        }
        sidebar.push_str("</ul>");
    }

    let mut admin = String::new();
    if nav.user.is_staff || nav.user.is_superuser {
        admin.push_str(
            r#"<h4>Administration</h4><ul>
<li><a href="/feature-packs/">Feature packs</a></li>
<li><a href="/cmdb/audit-log/">Audit log</a></li>
<li><a href="/users/list/">Users</a></li>
<li><a href="/users/groups/">Groups</a></li>
</ul>"#,
        );
    }

    let flash = nav
        .flash
        .as_deref()
        .map(|m| format!(r#"<div class="message error" role="alert">{}</div>"#, escape(m)))
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title} | GraphCMDB</title>
<script src="{HTMX_SRC}"></script>
<script defer src="{ALPINE_SRC}"></script>
<script>{COLUMN_PREFS_JS}</script>
</head>
<body>
<header class="topbar">
<a class="brand" href="/cmdb/">GraphCMDB</a>
<nav><a href="/cmdb/types/">Types</a> <a href="/users/profile/">{user}</a> <a href="/users/logout/">Log out</a></nav>
</header>
<aside class="sidebar">{sidebar}{admin}</aside>
<main>
<div id="messages" aria-live="polite">{flash}</div>
<div id="error-surface" aria-live="assertive"></div>
<h1>{title}</h1>
{body}
</main>
</body>
</html>"#,
        title = escape(title),
        user = escape(&nav.user.username),
    )
}

/// Root element of every HTMX error response.
pub fn error_fragment(message: &str) -> String {
    format!(
        r#"<div class="alert error" data-cmdb-error="true" role="alert">{}</div>"#,
        escape(message)
    )
}

fn notice(kind: &str, message: &str) -> String {
    format!(
        r#"<div class="notice {kind}" data-cmdb-{kind}="true">{}</div>"#,
        escape(message)
    )
}

/// Replaces the contents of `#messages` wherever it is swapped in.
pub fn oob_message(message: &str) -> String {
    format!(
        r#"<div id="messages" hx-swap-oob="innerHTML"><div class="message success">{}</div></div>"#,
        escape(message)
    )
}

/// Inline success plus an out-of-band copy for `#messages`.
pub fn success_with_oob(message: &str) -> String {
    format!("{}\n{}", notice("success", message), oob_message(message))
}

/// Standalone page for errors on full navigations.
pub fn error_page(title: &str, message: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>{title} | GraphCMDB</title></head>
<body>
<main>
<h1>{title}</h1>
{fragment}
<p><a href="/cmdb/">Back to the dashboard</a></p>
</main>
</body>
</html>"#,
        title = escape(title),
        fragment = error_fragment(message),
    )
}

// ── Login ────────────────────────────────────────────────────────

pub fn login_page(next: &str, error: Option<&str>) -> String {
    let error = error
        .map(|e| format!(r#"<p class="error" role="alert">{}</p>"#, escape(e)))
        .unwrap_or_default();
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>Log in | GraphCMDB</title></head>
<body>
<main class="login">
<h1>GraphCMDB</h1>
{error}
<form method="post" action="/users/login/">
<input type="hidden" name="next" value="{next}">
<label>Username <input type="text" name="username" autofocus required></label>
<label>Password <input type="password" name="password" required></label>
<button type="submit">Log in</button>
</form>
</main>
</body>
</html>"#,
        next = escape(next)
    )
}

// ── Dashboard & Types ────────────────────────────────────────────

/// One dashboard tile.
#[derive(Debug, Clone)]
pub struct TypeCount {
    pub label: String,
    pub display_name: String,
    pub count: u64,
}

pub fn dashboard(categories: &BTreeMap<String, Vec<TypeCount>>) -> String {
    if categories.is_empty() {
        return r#"<p class="empty">No node types are visible to you.</p>"#.to_string();
    }
    let mut out = String::new();
    for (category, types) in categories {
        out.push_str(&format!(
            r#"<section class="category"><h2>{}</h2><div class="tiles">"#,
            escape(category)
        ));
        for t in types {
            out.push_str(&format!(
                r#"<a class="tile" href="/cmdb/{label}/"><span class="count">{count}</span> {display}</a>"#,
                label = escape(&t.label),
                count = t.count,
                display = escape(&t.display_name),
            ));
        }
        out.push_str("</div></section>");
    }
    out
}

/// A registered type as shown on the types page.
#[derive(Debug, Clone)]
pub struct TypeRow {
    pub label: String,
    pub definition: TypeDefinition,
    pub pack: Option<String>,
}

pub fn types_table(rows: &[TypeRow]) -> String {
    let mut out = String::from(
        r#"<table class="types"><thead><tr><th>Label</th><th>Name</th><th>Category</th><th>Pack</th><th>Properties</th><th>Required</th><th>Relationships</th></tr></thead><tbody>"#,
    );
    for row in rows {
        let def = &row.definition;
        let props: Vec<String> = def.properties.iter().map(|p| p.display()).collect();
        let rels: Vec<String> = def
            .relationships
            .iter()
            .map(|(rel, r)| {
                let arrow = match r.direction {
                    Direction::Out => "->",
                    Direction::In => "<-",
                };
                format!("{rel} {arrow} {}", r.target)
            })
            .collect();
        out.push_str(&format!(
            r#"<tr><td><a href="/cmdb/{label}/">{label}</a></td><td>{name}</td><td>{category}</td><td>{pack}</td><td>{props}</td><td>{required}</td><td>{rels}</td></tr>"#,
            label = escape(&row.label),
            name = escape(def.display_name_or(&row.label)),
            category = escape(def.category()),
            pack = escape(row.pack.as_deref().unwrap_or("-")),
            props = escape(&props.join(", ")),
            required = escape(&def.required.join(", ")),
            rels = escape(&rels.join(", ")),
        ));
    }
    out.push_str("</tbody></table>");
    out
}

// ── Node Lists ───────────────────────────────────────────────────

/// Every column a list can show: declared properties, then the defaults
/// when they name something undeclared.
fn all_columns(def: &TypeDefinition) -> Vec<String> {
    let mut cols: Vec<String> = def.property_names().into_iter().map(str::to_string).collect();
    for c in def.columns() {
        if !cols.contains(&c) {
            cols.push(c);
        }
    }
    cols
}

/// The list page shell: column toggles, form surface and the table.
pub fn nodes_page(label: &str, def: &TypeDefinition, table: &str, perms: NodePerms) -> String {
    let defaults = serde_json::to_string(&def.columns()).unwrap_or_else(|_| "[]".to_string());
    let prefs_key = format!("cmdb.columns.{label}");

    let mut toggles = String::new();
    for col in all_columns(def) {
        let col_js = serde_json::to_string(&col).unwrap_or_default();
        toggles.push_str(&format!(
            r#"<label><input type="checkbox" :checked="shown({js})" @change="toggle({js})"> {name}</label>"#,
            js = escape(&col_js),
            name = escape(&col),
        ));
    }

    let add = if perms.add {
        format!(
            r##"<button hx-get="/cmdb/{}/create/" hx-target="#form-surface" hx-swap="innerHTML">Add {}</button>"##,
            escape(label),
            escape(def.display_name_or(label))
        )
    } else {
        String::new()
    };

    format!(
        r#"<p class="description">{description}</p>
<div class="list" x-data="columnPrefs({key}, {defaults})">
<div class="toolbar">{add}<details class="columns"><summary>Columns</summary>{toggles}</details></div>
<div id="form-surface"></div>
{table}
</div>"#,
        description = escape(&def.description),
        key = escape(&serde_json::to_string(&prefs_key).unwrap_or_default()),
        defaults = escape(&defaults),
    )
}

/// `#nodes-table`: the part of a list page HTMX swaps.
pub fn nodes_table(
    label: &str,
    def: &TypeDefinition,
    nodes: &[NodeRecord],
    total: u64,
    page: Page,
    perms: NodePerms,
) -> String {
    let label_e = escape(label);
    let cols = all_columns(def);

    let mut head = String::from("<th>Name</th>");
    for col in &cols {
        head.push_str(&format!(
            r#"<th data-column="{c}" x-show="shown({js})">{c}</th>"#,
            c = escape(col),
            js = escape(&serde_json::to_string(col).unwrap_or_default()),
        ));
    }
    head.push_str("<th></th>");

    let mut body = String::new();
    if nodes.is_empty() {
        body.push_str(&format!(
            r#"<tr><td colspan="{}" class="empty">No {} yet.</td></tr>"#,
            cols.len() + 2,
            escape(def.display_name_or(label))
        ));
    }
    for node in nodes {
        let id = escape(node.id.as_str());
        body.push_str(&format!(
            r#"<tr id="node-{id}"><td><a href="/cmdb/{label_e}/{id}/">{name}</a></td>"#,
            name = escape(&node.display_name()),
        ));
        for col in &cols {
            let value = node
                .properties
                .get(col)
                .map(value_to_plain_string)
                .unwrap_or_default();
            body.push_str(&format!(
                r#"<td data-column="{c}" x-show="shown({js})">{v}</td>"#,
                c = escape(col),
                js = escape(&serde_json::to_string(col).unwrap_or_default()),
                v = escape(&value),
            ));
        }
        let mut actions = String::new();
        if perms.change {
            actions.push_str(&format!(
                r##"<button hx-get="/cmdb/{label_e}/{id}/edit/" hx-target="#form-surface" hx-swap="innerHTML">Edit</button>"##
            ));
        }
        if perms.delete {
            actions.push_str(&format!(
                r##"<button hx-post="/cmdb/{label_e}/{id}/delete/" hx-target="#nodes-table" hx-swap="outerHTML" hx-confirm="Delete this node?">Delete</button>"##
            ));
        }
        body.push_str(&format!(r#"<td class="actions">{actions}</td></tr>"#));
    }

    let mut pager = format!(
        r#"<span class="total">{} of {}</span>"#,
        nodes.len(),
        total
    );
    if page.offset > 0 {
        let prev = page.offset.saturating_sub(page.limit);
        pager.push_str(&format!(
            r##" <a hx-get="/cmdb/{label_e}/?limit={}&amp;offset={prev}" hx-target="#nodes-table" hx-swap="outerHTML" href="/cmdb/{label_e}/?limit={}&amp;offset={prev}">Previous</a>"##,
            page.limit, page.limit
        ));
    }
    let next = u64::from(page.offset) + u64::from(page.limit);
    if next < total {
        pager.push_str(&format!(
            r##" <a hx-get="/cmdb/{label_e}/?limit={}&amp;offset={next}" hx-target="#nodes-table" hx-swap="outerHTML" href="/cmdb/{label_e}/?limit={}&amp;offset={next}">Next</a>"##,
            page.limit, page.limit
        ));
    }

    format!(
        r#"<div id="nodes-table" hx-get="/cmdb/{label_e}/?limit={limit}&amp;offset={offset}" hx-trigger="nodes-changed from:body" hx-swap="outerHTML">
<table class="nodes" data-column-prefs-key="cmdb.columns.{label_e}">
<thead><tr>{head}</tr></thead>
<tbody>{body}</tbody>
</table>
<div class="pager">{pager}</div>
</div>"#,
        limit = page.limit,
        offset = page.offset,
    )
}

// ── Forms ────────────────────────────────────────────────────────

pub enum FormMode<'a> {
    Create,
    Edit { id: &'a str, original_json: &'a str },
}

fn render_field(field: &FormField) -> String {
    let name = escape(&field.input_name());
    let value = escape(&field.value);
    let required = if field.required { " required" } else { "" };
    let marker = if field.required { " *" } else { "" };

    let input = match field.kind {
        FieldKind::Text => {
            format!(r#"<input type="text" name="{name}" value="{value}"{required}>"#)
        }
        FieldKind::Number => {
            format!(r#"<input type="number" step="any" name="{name}" value="{value}"{required}>"#)
        }
        FieldKind::TextArea => {
            format!(r#"<textarea name="{name}" rows="3"{required}>{value}</textarea>"#)
        }
        FieldKind::Boolean => {
            let t = if field.value == "true" { " selected" } else { "" };
            let f = if field.value == "true" { "" } else { " selected" };
            format!(
                r#"<select name="{name}"><option value="true"{t}>true</option><option value="false"{f}>false</option></select>"#
            )
        }
        FieldKind::Select => {
            let mut options = String::from(r#"<option value="">(none)</option>"#);
            for choice in &field.choices {
                let selected = if *choice == field.value { " selected" } else { "" };
                options.push_str(&format!(
                    r#"<option value="{c}"{selected}>{c}</option>"#,
                    c = escape(choice)
                ));
            }
            format!(r#"<select name="{name}"{required}>{options}</select>"#)
        }
    };
    format!(
        r#"<label class="field">{}{marker} {input}</label>"#,
        escape(&field.name)
    )
}

/// Create or edit form. `error` is shown inline above the fields.
pub fn node_form(
    label: &str,
    def: &TypeDefinition,
    mode: FormMode<'_>,
    fields: &[FormField],
    raw_json: &str,
    error: Option<&str>,
) -> String {
    let label_e = escape(label);
    let display = escape(def.display_name_or(label));
    let (action, heading, hidden) = match mode {
        FormMode::Create => (
            format!("/cmdb/{label_e}/create/"),
            format!("New {display}"),
            String::new(),
        ),
        FormMode::Edit { id, original_json } => (
            format!("/cmdb/{label_e}/{}/edit/", escape(id)),
            format!("Edit {display}"),
            format!(
                r#"<input type="hidden" name="original_json" value="{}">"#,
                escape(original_json)
            ),
        ),
    };

    let error = error.map(|e| notice("error", e)).unwrap_or_default();
    let inputs: String = fields.iter().map(render_field).collect();

    format!(
        r##"<form id="node-form" hx-post="{action}" hx-target="#form-surface" hx-swap="innerHTML">
<h3>{heading}</h3>
{error}
{inputs}
<details><summary>Raw JSON</summary>
<textarea name="properties" rows="8">{raw}</textarea>
</details>
{hidden}
<button type="submit">Save</button>
<button type="button" onclick="document.getElementById('form-surface').innerHTML = ''">Cancel</button>
</form>"##,
        raw = escape(raw_json),
    )
}

// ── Node Detail ──────────────────────────────────────────────────

/// Key, rendered value and JSON type of every property.
pub fn properties_table(label: &str, node: &NodeRecord) -> String {
    let mut rows = String::new();
    for (key, value) in &node.properties {
        let kind = match value {
            serde_json::Value::Null => "null",
            serde_json::Value::Bool(_) => "boolean",
            serde_json::Value::Number(_) => "number",
            serde_json::Value::String(_) => "string",
            serde_json::Value::Array(_) => "list",
            serde_json::Value::Object(_) => "object",
        };
        rows.push_str(&format!(
            r#"<tr><th>{}</th><td>{}</td><td class="type">{kind}</td></tr>"#,
            escape(key),
            escape(&value_to_plain_string(value)),
        ));
    }
    if rows.is_empty() {
        rows.push_str(r#"<tr><td colspan="3" class="empty">No properties.</td></tr>"#);
    }
    format!(
        r#"<div id="node-properties" hx-get="/cmdb/{label}/{id}/?fragment=properties" hx-trigger="nodes-changed from:body" hx-swap="outerHTML">
<table class="properties"><tbody>{rows}</tbody></table>
<p class="meta">Created {created}, updated {updated}</p>
</div>"#,
        label = escape(label),
        id = escape(node.id.as_str()),
        created = timestamp(node.created_at),
        updated = timestamp(node.updated_at),
    )
}

/// Everything the relationships partial needs.
pub struct RelationshipsView<'a> {
    pub label: &'a str,
    pub node_id: &'a str,
    pub definition: &'a TypeDefinition,
    pub relationships: &'a NodeRelationships,
    /// Labels the user may pick as a connection target.
    pub target_labels: &'a [String],
    pub can_change: bool,
}

/// `#relationships`, with an optional `(kind, message)` notice on top.
pub fn relationships(view: &RelationshipsView<'_>, message: Option<(&str, &str)>) -> String {
    let label_e = escape(view.label);
    let id_e = escape(view.node_id);
    let mut out = String::from(r#"<div id="relationships"><h2>Relationships</h2>"#);
    if let Some((kind, text)) = message {
        out.push_str(&notice(kind, text));
    }

    for (heading, groups, outgoing) in [
        ("Outgoing", &view.relationships.outgoing, true),
        ("Incoming", &view.relationships.incoming, false),
    ] {
        out.push_str(&format!("<h3>{heading}</h3>"));
        if groups.is_empty() {
            out.push_str(r#"<p class="empty">None.</p>"#);
            continue;
        }
        out.push_str("<dl>");
        for (rel_type, nodes) in groups {
            out.push_str(&format!("<dt>{}</dt>", escape(rel_type)));
            for related in nodes {
                let mut item = format!(
                    r#"<dd><a href="/cmdb/{tl}/{tid}/">{name}</a> <span class="label">{tl}</span>"#,
                    tl = escape(&related.label),
                    tid = escape(related.id.as_str()),
                    name = escape(&related.display_name()),
                );
                if outgoing && view.can_change {
                    let vals = serde_json::json!({
                        "rel_type": rel_type,
                        "target_label": related.label,
                        "target_id": related.id.as_str(),
                    });
                    item.push_str(&format!(
                        r##" <button hx-post="/cmdb/{label_e}/{id_e}/disconnect/" hx-vals="{vals}" hx-target="#relationships" hx-swap="outerHTML" hx-confirm="Remove this relationship?">Remove</button>"##,
                        vals = escape(&vals.to_string()),
                    ));
                }
                item.push_str("</dd>");
                out.push_str(&item);
            }
        }
        out.push_str("</dl>");
    }

    if view.can_change {
        let mut suggestions = String::new();
        for rel in view.definition.relationships.keys() {
            suggestions.push_str(&format!(r#"<option value="{}">"#, escape(rel)));
        }
        let mut labels = String::from(r#"<option value="" disabled selected>Target type</option>"#);
        for l in view.target_labels {
            labels.push_str(&format!(r#"<option value="{l}">{l}</option>"#, l = escape(l)));
        }
        out.push_str(&format!(
            r##"<form class="connect" hx-post="/cmdb/{label_e}/{id_e}/connect/" hx-target="#relationships" hx-swap="outerHTML">
<input type="text" name="rel_type" list="rel-types" placeholder="RELATIONSHIP_TYPE" required>
<datalist id="rel-types">{suggestions}</datalist>
<select name="target_label" hx-get="/cmdb/targets/" hx-target="#target-id" hx-trigger="change">{labels}</select>
<select id="target-id" name="target_id" required><option disabled selected>No label selected</option></select>
<button type="submit">Connect</button>
</form>"##
        ));
    }
    out.push_str("</div>");
    out
}

/// `<option>` list for the target picker.
pub fn target_options(options: &[(String, String)]) -> String {
    if options.is_empty() {
        return r#"<option disabled selected>No nodes found</option>"#.to_string();
    }
    options
        .iter()
        .map(|(id, name)| format!(r#"<option value="{}">{}</option>"#, escape(id), escape(name)))
        .collect()
}

pub fn no_label_option() -> String {
    "<option disabled>No label selected</option>".to_string()
}

/// The node detail page body.
pub fn node_detail(
    label: &str,
    def: &TypeDefinition,
    node: &NodeRecord,
    relationships_html: &str,
    tabs: &[PackTab],
    perms: NodePerms,
) -> String {
    let label_e = escape(label);
    let id_e = escape(node.id.as_str());

    let mut tab_buttons = String::from(
        r#"<button type="button" @click="tab = 'properties'" :class="{ active: tab === 'properties' }">Properties</button>"#,
    );
    let mut tab_panels = String::new();
    for tab in tabs {
        let key = format!("pack:{}:{}", tab.pack, tab.id);
        let key_js = escape(&serde_json::to_string(&key).unwrap_or_default());
        tab_buttons.push_str(&format!(
            r#"<button type="button" @click="tab = {key_js}" :class="{{ active: tab === {key_js} }}">{}</button>"#,
            escape(&tab.name)
        ));
        tab_panels.push_str(&format!(
            r#"<section class="pack-tab" x-show="tab === {key_js}" data-pack="{pack}" data-tab="{id}"><h2>{name}</h2>{body}</section>"#,
            pack = escape(&tab.pack),
            id = escape(&tab.id),
            name = escape(&tab.name),
            body = pack_tab_body(node),
        ));
    }
    tab_buttons.push_str(&format!(
        r##"<button type="button" @click="tab = 'audit'" :class="{{ active: tab === 'audit' }}" hx-get="/cmdb/{label_e}/{id_e}/audit/" hx-target="#audit-panel" hx-trigger="click">History</button>"##
    ));

    let mut actions = String::new();
    if perms.change {
        actions.push_str(&format!(
            r##"<button hx-get="/cmdb/{label_e}/{id_e}/edit/" hx-target="#form-surface" hx-swap="innerHTML">Edit</button>"##
        ));
    }
    if perms.delete {
        actions.push_str(&format!(
            r#"<form method="post" action="/cmdb/{label_e}/{id_e}/delete/" onsubmit="return confirm('Delete this node?')"><button type="submit">Delete</button></form>"#
        ));
    }

    format!(
        r#"<p class="breadcrumb"><a href="/cmdb/{label_e}/">{display}</a> / {id_e}</p>
<div class="node" x-data="{{ tab: 'properties' }}">
<nav class="tabs">{tab_buttons}</nav>
<section x-show="tab === 'properties'">
<div class="actions">{actions}</div>
<div id="form-surface"></div>
{properties}
{relationships_html}
</section>
{tab_panels}
<section x-show="tab === 'audit'" id="audit-panel"><p class="empty">Loading history...</p></section>
</div>"#,
        display = escape(def.display_name_or(label)),
        properties = properties_table(label, node),
    )
}

/// Mount point for a pack tab; the pack's script renders into it.
fn pack_tab_body(node: &NodeRecord) -> String {
    format!(
        r#"<div class="pack-tab-body" data-node-id="{}"></div>"#,
        escape(node.id.as_str())
    )
}

// ── Audit ────────────────────────────────────────────────────────

fn audit_rows(entries: &[AuditEntry], with_node: bool) -> String {
    let mut rows = String::new();
    for e in entries {
        let node = if with_node {
            let name = e.node_name.clone().unwrap_or_else(|| e.node_id.clone());
            format!(
                r#"<td>{label}</td><td><a href="/cmdb/{label}/{id}/">{name}</a></td>"#,
                label = escape(&e.node_label),
                id = escape(&e.node_id),
                name = escape(&name),
            )
        } else {
            String::new()
        };
        let integrity = if e.verify_integrity() { "" } else { r#" class="tampered""# };
        rows.push_str(&format!(
            r#"<tr{integrity}><td>{ts}</td><td>{action}</td>{node}<td>{user}</td><td><pre>{changes}</pre></td></tr>"#,
            ts = e.timestamp.format("%Y-%m-%d %H:%M:%S"),
            action = e.action,
            user = escape(&e.user),
            changes = escape(&e.changes),
        ));
    }
    rows
}

pub fn audit_tab(entries: &[AuditEntry]) -> String {
    if entries.is_empty() {
        return r#"<p class="empty">No history recorded for this node.</p>"#.to_string();
    }
    format!(
        r#"<table class="audit"><thead><tr><th>When</th><th>Action</th><th>User</th><th>Changes</th></tr></thead><tbody>{}</tbody></table>"#,
        audit_rows(entries, false)
    )
}

/// Current filter values of the audit log page.
#[derive(Debug, Clone, Default)]
pub struct AuditFilters {
    pub action: String,
    pub user: String,
    pub label: String,
}

pub fn audit_log(entries: &[AuditEntry], filters: &AuditFilters) -> String {
    let mut actions = String::from(r#"<option value="">Any action</option>"#);
    for a in ["create", "update", "delete", "connect", "disconnect"] {
        let selected = if filters.action == a { " selected" } else { "" };
        actions.push_str(&format!(r#"<option value="{a}"{selected}>{a}</option>"#));
    }
    format!(
        r#"<form method="get" class="filters">
<select name="action">{actions}</select>
<input type="text" name="user" placeholder="User" value="{user}">
<input type="text" name="label" placeholder="Label" value="{label}">
<button type="submit">Filter</button>
</form>
<table class="audit"><thead><tr><th>When</th><th>Action</th><th>Type</th><th>Node</th><th>User</th><th>Changes</th></tr></thead>
<tbody>{rows}</tbody></table>"#,
        user = escape(&filters.user),
        label = escape(&filters.label),
        rows = audit_rows(entries, true),
    )
}

// ── Feature Packs ────────────────────────────────────────────────

const TOGGLE_JS: &str = "if (event.detail.successful) { window.location.reload(); }";

fn toggle_button(pack: &PackRecord) -> String {
    let (verb, text) = if pack.enabled {
        ("disable", "Disable")
    } else {
        ("enable", "Enable")
    };
    format!(
        r##"<button hx-post="/feature-packs/{name}/{verb}/" hx-swap="none" hx-target-error="#error-surface" hx-on::after-request="{TOGGLE_JS}">{text}</button>"##,
        name = escape(&pack.name),
    )
}

pub fn packs_table(packs: &[PackRecord]) -> String {
    if packs.is_empty() {
        return r#"<p class="empty">No feature packs installed.</p>"#.to_string();
    }
    let mut rows = String::new();
    for p in packs {
        rows.push_str(&format!(
            r#"<tr><td><a href="/feature-packs/{name}/">{display}</a></td><td>{name}</td><td>{enabled}</td><td>{types}</td><td>{synced}</td><td>{toggle}</td></tr>"#,
            name = escape(&p.name),
            display = escape(&p.display_name),
            enabled = yes_no(p.enabled),
            types = p.types.len(),
            synced = timestamp(p.last_synced),
            toggle = toggle_button(p),
        ));
    }
    format!(
        r#"<table class="packs"><thead><tr><th>Pack</th><th>Directory</th><th>Enabled</th><th>Types</th><th>Last synced</th><th></th></tr></thead><tbody>{rows}</tbody></table>"#
    )
}

pub fn pack_detail(pack: &PackRecord, types: &[TypeDefinitionRecord]) -> String {
    let mut rows = String::new();
    for t in types {
        let props: Vec<String> = t.metadata.properties.iter().map(|p| p.display()).collect();
        rows.push_str(&format!(
            r#"<tr><td>{label}</td><td>{name}</td><td>{enabled}</td><td>{props}</td></tr>"#,
            label = escape(&t.label),
            name = escape(t.metadata.display_name_or(&t.label)),
            enabled = yes_no(t.enabled),
            props = escape(&props.join(", ")),
        ));
    }
    let config = serde_json::to_string_pretty(&pack.config).unwrap_or_default();
    format!(
        r#"<dl class="pack">
<dt>Name</dt><dd>{name}</dd>
<dt>Enabled</dt><dd>{enabled} {toggle}</dd>
<dt>Path</dt><dd><code>{path}</code></dd>
<dt>Last modified</dt><dd>{modified}</dd>
<dt>Last synced</dt><dd>{synced}</dd>
</dl>
<h2>Types</h2>
<table class="types"><thead><tr><th>Label</th><th>Name</th><th>Enabled</th><th>Properties</th></tr></thead><tbody>{rows}</tbody></table>
<h2>Manifest</h2>
<pre>{config}</pre>"#,
        name = escape(&pack.name),
        enabled = yes_no(pack.enabled),
        toggle = toggle_button(pack),
        path = escape(&pack.path),
        modified = timestamp(pack.last_modified),
        synced = timestamp(pack.last_synced),
        config = escape(&config),
    )
}

// ── Users ────────────────────────────────────────────────────────

pub fn profile(user: &User, permissions: &BTreeSet<String>) -> String {
    let perms: String = permissions
        .iter()
        .map(|p| format!("<li><code>{}</code></li>", escape(p)))
        .collect();
    format!(
        r#"<dl class="profile">
<dt>Username</dt><dd>{username}</dd>
<dt>Email</dt><dd>{email}</dd>
<dt>Staff</dt><dd>{staff}</dd>
<dt>Superuser</dt><dd>{superuser}</dd>
<dt>Groups</dt><dd>{groups}</dd>
</dl>
<h2>Permissions</h2>
<ul class="permissions">{perms}</ul>"#,
        username = escape(&user.username),
        email = escape(&user.email),
        staff = yes_no(user.is_staff),
        superuser = yes_no(user.is_superuser),
        groups = escape(&user.groups.join(", ")),
    )
}

pub fn users_table(users: &[User]) -> String {
    let mut rows = String::new();
    for u in users {
        rows.push_str(&format!(
            r#"<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>"#,
            escape(&u.username),
            escape(&u.email),
            yes_no(u.is_active),
            yes_no(u.is_staff),
            yes_no(u.is_superuser),
            escape(&u.groups.join(", ")),
        ));
    }
    format!(
        r#"<table class="users"><thead><tr><th>Username</th><th>Email</th><th>Active</th><th>Staff</th><th>Superuser</th><th>Groups</th></tr></thead><tbody>{rows}</tbody></table>"#
    )
}

pub fn groups_table(groups: &[Group]) -> String {
    let mut rows = String::new();
    for g in groups {
        let perms: Vec<&str> = g.permissions.iter().map(String::as_str).collect();
        rows.push_str(&format!(
            r#"<tr><td>{}</td><td>{}</td></tr>"#,
            escape(&g.name),
            escape(&perms.join(", ")),
        ));
    }
    format!(
        r#"<table class="groups"><thead><tr><th>Group</th><th>Permissions</th></tr></thead><tbody>{rows}</tbody></table>"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmdb_core::types::{NodeId, PropertyDef};

    #[test]
    fn test_escape() {
        assert_eq!(
            escape(r#"<a href="x">'&'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&#x27;&amp;&#x27;&lt;/a&gt;"
        );
    }

    #[test]
    fn test_error_fragment_is_marked() {
        let html = error_fragment("Access Denied: <nope>");
        assert!(html.contains(r#"data-cmdb-error="true""#));
        assert!(html.contains("&lt;nope&gt;"));
    }

    #[test]
    fn test_nodes_table_carries_column_prefs() {
        let def = TypeDefinition {
            properties: vec![PropertyDef::Name("name".into()), PropertyDef::Name("units".into())],
            columns: vec!["name".into()],
            ..Default::default()
        };
        let mut props = cmdb_core::types::Properties::new();
        props.insert("name".into(), serde_json::json!("rack-a1"));
        let node = NodeRecord {
            id: NodeId::from("n1"),
            label: "Rack".into(),
            properties: props,
            created_at: None,
            updated_at: None,
        };
        let perms = NodePerms {
            view: true,
            ..Default::default()
        };
        let html = nodes_table("Rack", &def, &[node], 1, Page::default(), perms);
        assert!(html.contains(r#"id="nodes-table""#));
        assert!(html.contains(r#"data-column-prefs-key="cmdb.columns.Rack""#));
        assert!(html.contains(r#"data-column="units""#));
        assert!(html.contains("rack-a1"));
        assert!(!html.contains("Delete"));
    }

    #[test]
    fn test_success_has_oob_message() {
        let html = success_with_oob("Rack created with ID n1");
        assert!(html.contains(r#"id="messages" hx-swap-oob="innerHTML""#));
        assert!(html.contains(r#"data-cmdb-success="true""#));
    }
}
