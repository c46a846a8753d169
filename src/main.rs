mod api;
mod auth;
mod config;
mod persist;
mod world;
mod ws;

use auth::{AppState, SharedState};
use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = config::Config::load();

    // ── Boot the World ─────────────────────────────────────────
    let save_file = persist::SaveFile::open(&config.db_path)
        .expect("Failed to open save file");

    let world = save_file.load_world()
        .expect("Failed to load world from save file");

    let mut directory = save_file.load_credentials()
        .expect("Failed to load credentials");

    // Seed the bootstrap superadmin on first boot
    if save_file
        .ensure_default_superadmin(&mut directory, &config.seed_email, &config.seed_otp)
        .expect("Failed to seed superadmin")
    {
        tracing::info!(
            email = %config.seed_email,
            otp = %config.seed_otp,
            "created default superadmin — log in and provision real accounts",
        );
    }

    tracing::info!(
        tasks = world.tasks.len(),
        members = world.members.len(),
        projects = world.projects.len(),
        accounts = directory.credentials.len(),
        revision = world.revision,
        "world loaded",
    );

    // ── Broadcast channel ──────────────────────────────────────
    let (events_tx, _) = broadcast::channel::<String>(256);

    // ── Shared state ───────────────────────────────────────────
    let addr = config.addr;
    let state: SharedState = Arc::new(AppState {
        world: std::sync::RwLock::new(world),
        directory: std::sync::RwLock::new(directory),
        save_file,
        events_tx,
        config,
    });

    // ── Router ─────────────────────────────────────────────────
    // Everything task-shaped sits behind the bearer middleware;
    // auth and the event stream are open.
    let protected = Router::new()
        .route("/api/tasks", get(api::list_tasks).post(api::create_task))
        .route("/api/tasks/assigned", get(api::assigned_tasks))
        .route("/api/tasks/review-queue", get(api::review_queue))
        .route("/api/tasks/approval-queue", get(api::approval_queue))
        .route(
            "/api/tasks/:id",
            get(api::get_task)
                .patch(api::update_task)
                .delete(api::delete_task),
        )
        .route("/api/tasks/:id/submit", post(api::submit_task))
        .route("/api/tasks/:id/admin-review", post(api::admin_review))
        .route(
            "/api/tasks/:id/superadmin-review",
            post(api::superadmin_review),
        )
        .route("/api/members", get(api::list_members))
        .route("/api/members/doers", get(api::list_doers))
        .route("/api/members/:id", delete(api::remove_member))
        .route("/api/projects", get(api::list_projects).post(api::create_project))
        .route("/api/projects/:id", delete(api::remove_project))
        .route("/api/accounts", post(api::create_account))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    let app = Router::new()
        // Auth (REST, JSON — called once per session)
        .route("/api/auth/request", post(auth::request_otp))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        // Live event stream
        .route("/api/events", get(ws::ws_handler))
        .merge(protected)
        // Static files
        .fallback_service(ServeDir::new("frontend/dist").append_index_html_on_directories(true))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // ── Start ──────────────────────────────────────────────────
    tracing::info!(%addr, "server running");

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
