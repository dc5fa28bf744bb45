use crate::auth::{self, LoginOutcome, LoginRequest, SignupOutcome};
use crate::domain::{
    AcademicYear, Course, Department, Notification, Resource, Schedule, Student, Teacher,
    TimetableEntry, University, User,
};
use crate::error::{Result, TimetableError};
use crate::extract::{JsonBody, QueryParams, RecordId};
use crate::service::ResourceService;
use crate::storage::Storage;
use axum::{
    extract::State,
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use hyper::Server;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub service: ResourceService,
}

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "timetable-api",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn index<T: Resource>(
    State(state): State<AppState>,
    QueryParams(params): QueryParams,
) -> Result<Json<Vec<T>>> {
    Ok(Json(state.service.list::<T>(&params).await?))
}

async fn store<T: Resource>(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody,
) -> Result<(StatusCode, Json<T>)> {
    let created = state.service.create::<T>(&payload).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn show<T: Resource>(State(state): State<AppState>, record: RecordId<T>) -> Result<Json<T>> {
    Ok(Json(state.service.show::<T>(record.id).await?))
}

async fn update<T: Resource>(
    State(state): State<AppState>,
    record: RecordId<T>,
    JsonBody(payload): JsonBody,
) -> Result<Json<T>> {
    Ok(Json(state.service.update::<T>(record.id, &payload).await?))
}

async fn destroy<T: Resource>(
    State(state): State<AppState>,
    record: RecordId<T>,
) -> Result<StatusCode> {
    state.service.delete::<T>(record.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn signup(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody,
) -> Result<(StatusCode, Json<SignupOutcome>)> {
    let outcome = auth::signup(&state.service, &payload).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

async fn login(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody,
) -> Result<Json<LoginOutcome>> {
    let request: LoginRequest = serde_json::from_value(payload)
        .map_err(|e| TimetableError::validation("payload", format!("Malformed login form: {e}")))?;
    Ok(Json(auth::login(&state.service, request).await?))
}

async fn teacher_timetable(
    State(state): State<AppState>,
    teacher: RecordId<Teacher>,
) -> Result<Json<Vec<TimetableEntry>>> {
    Ok(Json(state.service.teacher_timetable(teacher.id).await?))
}

async fn student_timetable(
    State(state): State<AppState>,
    student: RecordId<Student>,
    params: QueryParams,
) -> Result<Json<Vec<TimetableEntry>>> {
    let academic_year_id = params.uuid("academic_year_id")?;
    Ok(Json(
        state
            .service
            .student_timetable(student.id, academic_year_id)
            .await?,
    ))
}

async fn user_notifications(
    State(state): State<AppState>,
    user: RecordId<User>,
) -> Result<Json<Vec<Notification>>> {
    Ok(Json(state.service.inbox(user.id).await?))
}

/// The five REST routes of one resource under `/api/<path>`.
fn resource_routes<T: Resource>(router: Router<AppState>) -> Router<AppState> {
    let collection = format!("/api/{}", T::TABLE.path());
    let member = format!("{collection}/:id");
    router
        .route(&collection, get(index::<T>).post(store::<T>))
        .route(
            &member,
            get(show::<T>)
                .put(update::<T>)
                .patch(update::<T>)
                .delete(destroy::<T>),
        )
}

/// `(method, path)` of every route, in registration order.
pub fn route_table() -> Vec<(&'static str, String)> {
    let mut routes = vec![("GET", "/health".to_string())];
    for table in crate::schema::Table::ALL {
        let collection = format!("/api/{}", table.path());
        routes.push(("GET", collection.clone()));
        routes.push(("POST", collection.clone()));
        for method in ["GET", "PUT", "PATCH", "DELETE"] {
            routes.push((method, format!("{collection}/:id")));
        }
    }
    routes.push(("POST", "/api/signup".to_string()));
    routes.push(("POST", "/api/login".to_string()));
    routes.push(("GET", "/api/teachers/:id/schedule".to_string()));
    routes.push(("GET", "/api/students/:id/schedule".to_string()));
    routes.push(("GET", "/api/users/:id/notifications".to_string()));
    routes
}

/// Create the HTTP router with all routes
pub fn create_server(storage: Arc<dyn Storage>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers(Any);

    let state = AppState {
        service: ResourceService::new(storage),
    };

    let mut router = Router::new().route("/health", get(health));
    router = resource_routes::<User>(router);
    router = resource_routes::<University>(router);
    router = resource_routes::<AcademicYear>(router);
    router = resource_routes::<Department>(router);
    router = resource_routes::<Teacher>(router);
    router = resource_routes::<Student>(router);
    router = resource_routes::<Course>(router);
    router = resource_routes::<Schedule>(router);
    router = resource_routes::<Notification>(router);

    router
        .route("/api/signup", post(signup))
        .route("/api/login", post(login))
        .route("/api/teachers/:id/schedule", get(teacher_timetable))
        .route("/api/students/:id/schedule", get(student_timetable))
        .route("/api/users/:id/notifications", get(user_notifications))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
        .with_state(state)
}

/// Start the HTTP server on the specified address
pub async fn start_server(storage: Arc<dyn Storage>, host: &str, port: u16) -> anyhow::Result<()> {
    let app = create_server(storage);
    let addr: SocketAddr = format!("{host}:{port}").parse()?;

    info!("HTTP server running on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
