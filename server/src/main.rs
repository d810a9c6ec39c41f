use std::time::Duration;

use anyhow::Context;
use axum::{
    extract::State,
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::{net::TcpListener, signal};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;
use vlant_config::load as load_config;
use vlant_realtime::{
    spawn_stats_broadcaster, PairingQueue, PresenceRegistry, RelayRouter, ServerEvent,
};
use vlant_storage::{
    initialize_storage, ConversationRepository, CreateNotificationRequest, Notification,
    NotificationRepository, StorageError,
};

mod ws;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_env_filter(env_filter)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    info!("starting Vlant realtime backend");

    let config = load_config().context("failed to load configuration")?;

    let pool = initialize_storage(&config.database)
        .await
        .context("failed to initialize storage")?;

    let registry = PresenceRegistry::new();
    let router = RelayRouter::new(registry.clone());
    let queue = PairingQueue::new(ConversationRepository::new(pool.clone()), router.clone());

    // Runs for the lifetime of the process; dropped with it on shutdown.
    let _stats_task = spawn_stats_broadcaster(
        registry.clone(),
        queue.clone(),
        router.clone(),
        Duration::from_secs(config.realtime.stats_interval_seconds),
    );
    info!(
        interval_seconds = config.realtime.stats_interval_seconds,
        "stats broadcaster running"
    );

    let state = AppState {
        registry,
        router,
        queue,
        conversations: ConversationRepository::new(pool.clone()),
        notifications: NotificationRepository::new(pool),
        outbound_buffer: config.realtime.outbound_buffer,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let app = app(state).layer(cors);

    let address = format!("{}:{}", config.http.address, config.http.port);
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind http listener on {address}"))?;

    info!(%address, "http server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server error")?;

    info!("backend shut down");
    Ok(())
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws::websocket_handler))
        .route("/internal/notifications", post(create_notification))
        .with_state(state)
}

#[derive(Clone)]
struct AppState {
    registry: PresenceRegistry,
    router: RelayRouter,
    queue: PairingQueue,
    conversations: ConversationRepository,
    notifications: NotificationRepository,
    outbound_buffer: usize,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Ingress for the feed collaborator: persist the notification, then push it
/// to every live connection of the recipient. An offline recipient still gets
/// the stored row for their notification page.
async fn create_notification(
    State(state): State<AppState>,
    Json(payload): Json<CreateNotificationRequest>,
) -> Result<Json<Notification>, ApiError> {
    let notification = state.notifications.create(&payload).await?;

    state
        .router
        .send_to_user(
            &notification.recipient_id,
            ServerEvent::Notification {
                notification: notification.clone(),
            },
        )
        .await;

    Ok(Json(notification))
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(value: StorageError) -> Self {
        error!(error = ?value, "storage error");
        let status = match value {
            StorageError::ConversationNotFound => StatusCode::NOT_FOUND,
            StorageError::InvalidParticipants
            | StorageError::NotParticipant
            | StorageError::InvalidNotificationType(_) => StatusCode::BAD_REQUEST,
            StorageError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, value.to_string())
    }
}

fn shutdown_signal() -> impl std::future::Future<Output = ()> {
    async {
        if let Err(error) = signal::ctrl_c().await {
            error!(?error, "failed to listen for shutdown signal");
        }
        info!("shutdown signal received");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use sqlx::sqlite::SqlitePoolOptions;
    use tokio::sync::mpsc;
    use tower::ServiceExt;
    use uuid::Uuid;
    use vlant_storage::run_migrations;

    async fn test_state() -> AppState {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();

        let registry = PresenceRegistry::new();
        let router = RelayRouter::new(registry.clone());
        let queue = PairingQueue::new(ConversationRepository::new(pool.clone()), router.clone());
        AppState {
            registry,
            router,
            queue,
            conversations: ConversationRepository::new(pool.clone()),
            notifications: NotificationRepository::new(pool),
            outbound_buffer: 16,
        }
    }

    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let response = app(test_state().await)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], br#"{"status":"ok"}"#);
    }

    #[tokio::test]
    async fn notification_is_persisted_and_pushed_to_the_recipient() {
        let state = test_state().await;

        // A live connection for the recipient.
        let connection_id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel(16);
        state.router.attach(connection_id, tx).await;
        state.registry.register("bob", connection_id).await;

        let payload = serde_json::json!({
            "recipientId": "bob",
            "senderId": "alice",
            "type": "like",
            "relatedPostId": "post-1",
        });
        let response = app(state.clone())
            .oneshot(
                Request::post("/internal/notifications")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let stored = state
            .notifications
            .find_by_recipient("bob", 10)
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].sender_id, "alice");
        assert!(!stored[0].is_read);

        let pushed = rx.try_recv().unwrap();
        let ServerEvent::Notification { notification } = pushed else {
            panic!("expected a notification event");
        };
        assert_eq!(notification.recipient_id, "bob");
        assert_eq!(notification.related_post_id.as_deref(), Some("post-1"));
    }

    #[tokio::test]
    async fn unknown_notification_type_is_a_bad_request() {
        let payload = serde_json::json!({
            "recipientId": "bob",
            "senderId": "alice",
            "type": "poke",
        });
        let response = app(test_state().await)
            .oneshot(
                Request::post("/internal/notifications")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
