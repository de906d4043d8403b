//! cmdb-server: HTTP front end for GraphCMDB.
//!
//! Serves the JSON API under `/api` and the HTMX-driven browser UI, both on
//! top of a single [`service::NodeService`]. Startup wiring (feature packs,
//! type registry, permissions) lives in [`bootstrap`].

pub mod api;
pub mod auth;
pub mod bootstrap;
pub mod error;
pub mod forms;
pub mod html;
pub mod routes;
pub mod service;
pub mod state;
pub mod views;

pub use routes::build_router;
pub use state::{AppState, SharedState};
