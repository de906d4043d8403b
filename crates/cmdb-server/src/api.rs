//! JSON API under `/api`.
//!
//! Every response carries `success`. Failures go through [`AppError`] and
//! come back as `{success: false, error}`.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use cmdb_core::rbac::Action;
use cmdb_core::types::{NodeRecord, Page, Properties};

use crate::auth::{require_api, ApiUser};
use crate::error::{AppError, Result};
use crate::service::ConnectRequest;
use crate::state::SharedState;

// ============================================================================
// Request Types
// ============================================================================

/// `?limit=&offset=` (or `skip`). Kept as strings so a bad number is a 400
/// with our error body.
#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub limit: Option<String>,
    pub offset: Option<String>,
    pub skip: Option<String>,
}

impl PageParams {
    pub fn to_page(&self) -> Result<Page> {
        let limit = parse_u32("limit", self.limit.as_deref())?.unwrap_or(Page::DEFAULT_LIMIT);
        let offset = match parse_u32("offset", self.offset.as_deref())? {
            Some(o) => o,
            None => parse_u32("skip", self.skip.as_deref())?.unwrap_or(0),
        };
        Ok(Page::new(limit, offset))
    }
}

fn parse_u32(name: &str, raw: Option<&str>) -> Result<Option<u32>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|_| AppError::BadRequest(format!("{name} must be a non-negative integer"))),
    }
}

#[derive(Debug, Default, Deserialize)]
struct NodeBody {
    #[serde(default)]
    properties: Properties,
}

#[derive(Debug, Default, Deserialize)]
struct RelationshipBody {
    #[serde(default)]
    relationship_type: String,
    #[serde(default)]
    target_label: String,
    #[serde(default)]
    target_id: String,
    #[serde(default)]
    properties: Properties,
}

/// Parse a JSON body ourselves so malformed input maps to a 400 with the
/// standard error shape.
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| AppError::BadRequest(format!("Invalid JSON: {e}")))
}

fn node_json(node: &NodeRecord) -> Value {
    json!({
        "id": node.id,
        "label": node.label,
        "properties": node.properties,
    })
}

// ============================================================================
// Types & Packs
// ============================================================================

/// `GET /api/types/`
pub async fn list_types(State(state): State<SharedState>, ApiUser(_user): ApiUser) -> Json<Value> {
    let types: Vec<Value> = state
        .registry
        .known_labels()
        .into_iter()
        .map(|label| {
            let def = state.registry.metadata(&label);
            json!({
                "label": label,
                "display_name": def.display_name_or(&label),
                "category": def.category(),
                "description": def.description,
                "properties": def.properties,
                "required": def.required,
                "relationships": def.relationships,
                "columns": def.columns(),
                "feature_pack": state.registry.pack_for_type(&label),
            })
        })
        .collect();
    Json(json!({
        "success": true,
        "count": types.len(),
        "types": types,
    }))
}

/// `GET /api/feature-packs/`
pub async fn list_packs(State(state): State<SharedState>, ApiUser(_user): ApiUser) -> Result<Json<Value>> {
    let packs: Vec<Value> = state
        .store
        .list_packs()
        .await?
        .into_iter()
        .map(|p| {
            json!({
                "name": p.name,
                "display_name": p.display_name,
                "enabled": p.enabled,
                "type_count": p.types.len(),
            })
        })
        .collect();
    Ok(Json(json!({
        "success": true,
        "total": packs.len(),
        "packs": packs,
    })))
}

// ============================================================================
// Nodes
// ============================================================================

/// `GET /api/nodes/{label}/`
pub async fn list_nodes(
    State(state): State<SharedState>,
    ApiUser(user): ApiUser,
    Path(label): Path<String>,
    Query(params): Query<PageParams>,
) -> Result<Json<Value>> {
    state.service.resolve(&label)?;
    require_api(&state, &user, Action::View, &label)?;
    let page = params.to_page()?;

    let (nodes, total) = state.service.list(&label, page).await?;
    let nodes: Vec<Value> = nodes
        .iter()
        .map(|n| json!({"id": n.id, "properties": n.properties}))
        .collect();
    Ok(Json(json!({
        "success": true,
        "label": label,
        "nodes": nodes,
        "count": total,
        "limit": page.limit,
        "offset": page.offset,
    })))
}

/// `POST /api/nodes/{label}/`
pub async fn create_node(
    State(state): State<SharedState>,
    ApiUser(user): ApiUser,
    Path(label): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>)> {
    state.service.resolve(&label)?;
    require_api(&state, &user, Action::Add, &label)?;
    let body: NodeBody = parse_body(&body)?;

    let node = state
        .service
        .create(&label, body.properties, Some(&user.username))
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({"success": true, "node": node_json(&node)})),
    ))
}

/// `GET /api/nodes/{label}/{id}/`
pub async fn get_node(
    State(state): State<SharedState>,
    ApiUser(user): ApiUser,
    Path((label, id)): Path<(String, String)>,
) -> Result<Json<Value>> {
    state.service.resolve(&label)?;
    require_api(&state, &user, Action::View, &label)?;

    let node = state.service.get(&label, &id).await?;
    let relationships = state.service.relationships(&label, &id).await?;
    let mut body = node_json(&node);
    body["relationships"] = json!(relationships);
    Ok(Json(json!({"success": true, "node": body})))
}

/// `PUT`/`PATCH /api/nodes/{label}/{id}/`: merge into existing properties.
pub async fn update_node(
    State(state): State<SharedState>,
    ApiUser(user): ApiUser,
    Path((label, id)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<Value>> {
    state.service.resolve(&label)?;
    require_api(&state, &user, Action::Change, &label)?;
    let body: NodeBody = parse_body(&body)?;

    let node = state
        .service
        .update(&label, &id, body.properties, Some(&user.username))
        .await?;
    Ok(Json(json!({"success": true, "node": node_json(&node)})))
}

/// `DELETE /api/nodes/{label}/{id}/`
pub async fn delete_node(
    State(state): State<SharedState>,
    ApiUser(user): ApiUser,
    Path((label, id)): Path<(String, String)>,
) -> Result<Json<Value>> {
    state.service.resolve(&label)?;
    require_api(&state, &user, Action::Delete, &label)?;

    state.service.delete(&label, &id, Some(&user.username)).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Node deleted successfully",
    })))
}

// ============================================================================
// Relationships
// ============================================================================

/// `POST /api/nodes/{label}/{id}/relationships/`
pub async fn create_relationship(
    State(state): State<SharedState>,
    ApiUser(user): ApiUser,
    Path((label, id)): Path<(String, String)>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>)> {
    state.service.resolve(&label)?;
    require_api(&state, &user, Action::Change, &label)?;
    let body: RelationshipBody = parse_body(&body)?;

    let request = ConnectRequest {
        rel_type: body.relationship_type.trim().to_uppercase(),
        target_label: body.target_label.trim().to_string(),
        target_id: body.target_id.trim().to_string(),
        properties: body.properties,
    };
    let rel_type = request.rel_type.clone();
    state
        .service
        .connect(&label, &id, request, Some(&user.username))
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": format!("Relationship '{rel_type}' created"),
        })),
    ))
}

/// `DELETE /api/nodes/{label}/{id}/relationships/{rel}/{target_id}/`
pub async fn delete_relationship(
    State(state): State<SharedState>,
    ApiUser(user): ApiUser,
    Path((label, id, rel_type, target_id)): Path<(String, String, String, String)>,
) -> Result<Json<Value>> {
    state.service.resolve(&label)?;
    require_api(&state, &user, Action::Change, &label)?;

    let rel_type = rel_type.to_uppercase();
    state
        .service
        .disconnect(&label, &id, &rel_type, None, &target_id, Some(&user.username))
        .await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Relationship '{rel_type}' deleted"),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(limit: Option<&str>, offset: Option<&str>, skip: Option<&str>) -> PageParams {
        PageParams {
            limit: limit.map(str::to_string),
            offset: offset.map(str::to_string),
            skip: skip.map(str::to_string),
        }
    }

    #[test]
    fn test_page_defaults_and_skip_alias() {
        assert_eq!(params(None, None, None).to_page().unwrap(), Page::new(100, 0));
        assert_eq!(params(Some("10"), None, Some("20")).to_page().unwrap(), Page::new(10, 20));
        assert_eq!(params(None, Some("5"), Some("20")).to_page().unwrap(), Page::new(100, 5));
        assert_eq!(params(Some(""), None, None).to_page().unwrap(), Page::new(100, 0));
    }

    #[test]
    fn test_page_rejects_garbage() {
        let err = params(Some("ten"), None, None).to_page().unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "limit must be a non-negative integer");
        assert!(params(None, Some("-1"), None).to_page().is_err());
    }

    #[test]
    fn test_parse_body_errors_are_bad_request() {
        let err = parse_body::<NodeBody>(&Bytes::from_static(b"{nope")).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        let ok: NodeBody = parse_body(&Bytes::from_static(b"{}")).unwrap();
        assert!(ok.properties.is_empty());
    }
}
