use crate::GIT_COMMIT_HASH;
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use sqlx::{Connection, PgPool};
use tokio::time::{Duration, timeout};
use tracing::{Instrument, debug, error, info_span, warn};
use utoipa::ToSchema;

const HEALTH_DB_TIMEOUT_SECONDS: u64 = 2;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    database: String,
}

#[utoipa::path(
    get,
    path= "/health",
    responses (
        (status = 200, description = "Database connection is healthy", body = Health),
        (status = 503, description = "Database connection is unhealthy", body = Health)
    ),
    tag = "health",
)]
pub async fn health(method: Method, pool: Extension<PgPool>) -> impl IntoResponse {
    let db_healthy = database_reachable(&pool.0).await;

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: if db_healthy { "ok" } else { "error" }.to_string(),
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let headers = x_app_header(&health)
        .map(|value| {
            let mut headers = HeaderMap::new();
            headers.insert("X-App", value);
            headers
        })
        .unwrap_or_default();

    if db_healthy {
        (StatusCode::OK, headers, body)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, headers, body)
    }
}

/// `name:version:short_hash`; the hash part is empty for unversioned builds.
fn x_app_header(health: &Health) -> Option<HeaderValue> {
    let short_hash = health.commit.get(0..7).filter(|_| health.commit.len() > 7);
    format!(
        "{}:{}:{}",
        health.name,
        health.version,
        short_hash.unwrap_or_default()
    )
    .parse::<HeaderValue>()
    .map_err(|err| debug!("Failed to parse X-App header: {err}"))
    .ok()
}

async fn database_reachable(pool: &PgPool) -> bool {
    let acquire_span = info_span!(
        "db.acquire",
        db.system = "postgresql",
        db.operation = "ACQUIRE"
    );

    let probe = async {
        match pool.acquire().instrument(acquire_span).await {
            Ok(mut conn) => {
                let ping_span =
                    info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
                match conn.ping().instrument(ping_span).await {
                    Ok(()) => true,
                    Err(err) => {
                        error!("Failed to ping database: {err}");
                        false
                    }
                }
            }
            Err(err) => {
                error!("Failed to acquire database connection: {err}");
                false
            }
        }
    };

    timeout(Duration::from_secs(HEALTH_DB_TIMEOUT_SECONDS), probe)
        .await
        .unwrap_or_else(|_| {
            warn!("Database health check timed out");
            false
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn health(commit: &str) -> Health {
        Health {
            commit: commit.to_string(),
            name: "accounts".to_string(),
            version: "0.1.0".to_string(),
            database: "ok".to_string(),
        }
    }

    #[test]
    fn x_app_uses_short_hash() {
        let value = x_app_header(&health("0123456789abcdef"));
        assert_eq!(
            value.as_ref().and_then(|v| v.to_str().ok()),
            Some("accounts:0.1.0:0123456")
        );
    }

    #[test]
    fn x_app_without_commit() {
        let value = x_app_header(&health(""));
        assert_eq!(
            value.as_ref().and_then(|v| v.to_str().ok()),
            Some("accounts:0.1.0:")
        );
    }
}
