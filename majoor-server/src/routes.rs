//! Route table for the `/mjr/am` surface.

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handlers::{
    assets, collections, duplicates, health, maintenance, roots, scan, search,
};
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Listing and search
        .route("/mjr/am/list", get(search::list_assets))
        .route("/mjr/am/search", get(search::search_assets))
        .route("/mjr/am/autocomplete", get(search::autocomplete))
        .route("/mjr/am/tags", get(search::all_tags))
        .route("/mjr/am/asset/{id}", get(search::get_asset))
        .route("/mjr/am/assets/batch", post(search::assets_batch))
        .route("/mjr/am/workflow-quick", get(search::workflow_quick))
        .route("/mjr/am/metadata", get(search::asset_metadata))
        .route("/mjr/am/date-histogram", get(search::date_histogram))
        // Mutations
        .route("/mjr/am/asset/rating", post(assets::update_rating))
        .route("/mjr/am/asset/tags", post(assets::update_tags))
        .route("/mjr/am/asset/delete", post(assets::delete_asset))
        .route("/mjr/am/assets/delete", post(assets::delete_assets))
        .route("/mjr/am/asset/rename", post(assets::rename_asset))
        .route("/mjr/am/open-in-folder", post(assets::open_in_folder))
        // Indexing
        .route("/mjr/am/scan", post(scan::scan))
        // Roots and media serving
        .route(
            "/mjr/am/custom-roots",
            get(roots::list_custom_roots).post(roots::add_custom_root),
        )
        .route("/mjr/am/custom-roots/remove", post(roots::remove_custom_root))
        .route("/mjr/am/custom-view", get(roots::custom_view))
        .route("/mjr/am/roots", get(roots::builtin_roots))
        // Diagnostics
        .route("/mjr/am/health", get(health::health))
        .route("/mjr/am/health/counters", get(health::health_counters))
        .route("/mjr/am/health/db", get(health::health_db))
        .route("/mjr/am/status", get(health::status))
        .route("/mjr/am/config", get(health::effective_config))
        // Settings
        .route(
            "/mjr/am/settings/output-directory",
            get(health::get_output_directory).post(health::set_output_directory),
        )
        .route(
            "/mjr/am/settings/probe-backend",
            post(health::set_probe_backend),
        )
        .route(
            "/mjr/am/settings/metadata-fallback",
            get(health::get_metadata_fallback).post(health::set_metadata_fallback),
        )
        .route(
            "/mjr/am/settings/security",
            get(health::get_security_settings).post(health::set_security_settings),
        )
        .route(
            "/mjr/am/settings/security/rotate-token",
            post(health::rotate_token),
        )
        // Maintenance
        .route("/mjr/am/db/optimize", post(maintenance::optimize))
        .route("/mjr/am/db/force-delete", post(maintenance::db_force_delete))
        .route("/mjr/am/db/backups", get(maintenance::backups))
        .route("/mjr/am/db/backup-save", post(maintenance::backup_save_endpoint))
        .route("/mjr/am/db/backup-restore", post(maintenance::backup_restore))
        .route(
            "/mjr/am/db/cleanup-case-duplicates",
            post(maintenance::cleanup_case_duplicates_endpoint),
        )
        .route(
            "/mjr/am/maintenance/status",
            get(maintenance::maintenance_status),
        )
        // Duplicates
        .route("/mjr/am/duplicates/analyze", post(duplicates::analyze))
        .route("/mjr/am/duplicates/status", get(duplicates::duplicates_status))
        .route("/mjr/am/duplicates/alerts", get(duplicates::alerts))
        // Collections
        .route(
            "/mjr/am/collections",
            get(collections::list_collections).post(collections::create_collection),
        )
        .route(
            "/mjr/am/collections/remove",
            post(collections::remove_collection),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
