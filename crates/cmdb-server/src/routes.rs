//! Route table.

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::SharedState;
use crate::{api, auth, views};

/// Build the application router: JSON API, HTML views, auth.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(views::root))
        // ====================================================================
        // Accounts
        // ====================================================================
        .route("/users/login/", get(auth::login_page).post(auth::login_submit))
        .route("/users/logout/", get(auth::logout))
        .route("/users/profile/", get(views::profile))
        .route("/users/list/", get(views::users_list))
        .route("/users/groups/", get(views::groups_list))
        // ====================================================================
        // CMDB pages
        // ====================================================================
        .route("/cmdb/", get(views::dashboard))
        .route("/cmdb/types/", get(views::types_page))
        .route("/cmdb/audit-log/", get(views::audit_log_page))
        .route("/cmdb/targets/", get(views::target_options))
        .route("/cmdb/{label}/", get(views::list_nodes))
        .route(
            "/cmdb/{label}/create/",
            get(views::create_form).post(views::create_submit),
        )
        .route("/cmdb/{label}/{id}/", get(views::node_detail))
        .route(
            "/cmdb/{label}/{id}/edit/",
            get(views::edit_form).post(views::edit_submit),
        )
        .route("/cmdb/{label}/{id}/delete/", post(views::delete_node))
        .route("/cmdb/{label}/{id}/connect/", post(views::connect))
        .route("/cmdb/{label}/{id}/disconnect/", post(views::disconnect))
        .route("/cmdb/{label}/{id}/audit/", get(views::node_audit))
        // Feature packs (staff)
        .route("/feature-packs/", get(views::packs_page))
        .route("/feature-packs/{name}/", get(views::pack_detail))
        .route("/feature-packs/{name}/enable/", post(views::enable_pack))
        .route("/feature-packs/{name}/disable/", post(views::disable_pack))
        // ====================================================================
        // JSON API
        // ====================================================================
        .route("/api/auth/token/", post(auth::api_token))
        .route("/api/types/", get(api::list_types))
        .route("/api/feature-packs/", get(api::list_packs))
        .route(
            "/api/nodes/{label}/",
            get(api::list_nodes).post(api::create_node),
        )
        .route(
            "/api/nodes/{label}/{id}/",
            get(api::get_node)
                .put(api::update_node)
                .patch(api::update_node)
                .delete(api::delete_node),
        )
        .route(
            "/api/nodes/{label}/{id}/relationships/",
            post(api::create_relationship),
        )
        .route(
            "/api/nodes/{label}/{id}/relationships/{rel_type}/{target_id}/",
            axum::routing::delete(api::delete_relationship),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
