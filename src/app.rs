use std::sync::Arc;

use axum::http::Method;
use axum::routing::{delete, get, post, put};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::authz::SqlAccessEvaluator;
use crate::errors::AppError;
use crate::events::{init_audit_bus, start_audit_listener, AuditBus};
use crate::jwt::JwtConfig;
use crate::routes::{audit, auth, defects, health, modules, shifts, users};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub audit: AuditBus,
    pub access: SqlAccessEvaluator,
}

impl AppState {
    pub fn new(pool: SqlitePool, jwt: JwtConfig, audit: AuditBus) -> Self {
        let access = SqlAccessEvaluator::new(pool.clone());
        Self {
            pool,
            jwt: Arc::new(jwt),
            audit,
            access,
        }
    }
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let jwt_config = JwtConfig::from_env()?;
    let (audit_bus, audit_rx) = init_audit_bus();
    tokio::spawn(start_audit_listener(audit_rx, pool.clone()));

    let state = AppState::new(pool, jwt_config, audit_bus);

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/me", get(auth::me))
        .route("/change-password", post(auth::change_password))
        .route("/logout", post(auth::logout));

    let user_routes = Router::new()
        .route("/", get(users::list_users).post(users::create_user))
        .route("/:id", put(users::update_user).delete(users::delete_user))
        .route("/:id/reset-password", post(users::reset_password));

    let module_routes = Router::new()
        .route("/", get(modules::list_modules).post(modules::create_module))
        .route("/mine", get(modules::my_modules))
        .route("/departments", get(modules::list_departments))
        .route("/departments/assign", post(modules::assign_module_to_department))
        .route(
            "/departments/:department_id/modules",
            get(modules::department_modules),
        )
        .route(
            "/departments/:department_id/modules/:module_id",
            delete(modules::revoke_module_from_department),
        )
        .route(
            "/:module_key/permissions",
            get(modules::list_module_permissions).post(modules::create_module_permission),
        )
        .route("/users/permissions", post(modules::set_user_permission))
        .route("/users/:user_id/permissions", get(modules::user_permissions));

    let shift_routes = Router::new()
        .route("/", get(shifts::list_shifts))
        .route("/current", get(shifts::current_shift_info))
        .route("/:shift_number", put(shifts::update_shift));

    let defect_routes = Router::new()
        .route("/", post(defects::create_defect_record))
        .route("/types", get(defects::list_defect_types))
        .route("/my-records", get(defects::my_records))
        .route("/all", get(defects::all_records))
        .route("/stats", get(defects::defect_stats));

    let audit_routes = Router::new()
        .route("/", get(audit::list_audit_logs))
        .route("/stats", get(audit::audit_stats))
        .route("/:entity_type/:entity_id", get(audit::audit_logs_by_entity));

    let router = Router::new()
        .route("/health", get(health::health))
        .nest("/auth", auth_routes)
        .nest("/users", user_routes)
        .nest("/modules", module_routes)
        .nest("/shifts", shift_routes)
        .nest("/defects", defect_routes)
        .nest("/audit", audit_routes)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}
