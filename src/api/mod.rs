use crate::{
    collaborators::{
        AttributeService, HttpAttributeService, LogAttributeService, LogSmsSender,
        PgAccountStore, PgApplicationRegistry, PgAuditSink, SmsCodeProvider,
    },
    handoff::{Handoff, HandoffConfig},
    login::{Login, LoginConfig},
    registration::{Collaborators, Registration, RegistrationConfig},
    store::PgStore,
    sweeper::{Sweeper, SweeperConfig, spawn_sweeper},
};
use anyhow::{Context, Result};
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Method, Request},
    routing::{get, post},
};
use handlers::cookies::CookieSettings;
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod handlers;
pub mod openapi;


/// Everything the handlers need, already wired to their stores.
pub struct Services {
    pub handoff: Arc<Handoff>,
    pub registration: Arc<Registration>,
    pub login: Arc<Login>,
    pub cookies: CookieSettings,
}

/// Server settings collected from the command line.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub handoff: HandoffConfig,
    pub registration: RegistrationConfig,
    pub sweeper: SweeperConfig,
    pub mfa_code_ttl: Duration,
    pub mfa_max_attempts: u32,
    pub attribute_service_url: Option<String>,
}

/// Routes served on every instance. `/health` needs a database pool and is
/// added by [`new`].
#[must_use]
pub fn router(services: Services) -> Router {
    Router::new()
        .route("/v1/jwt", post(handlers::handoff::create_token))
        .route("/v1/welcome", post(handlers::login::welcome))
        .route("/v1/login", post(handlers::login::login))
        .route("/v1/login/phone/code", post(handlers::login::phone_code))
        .route(
            "/v1/register/start",
            get(handlers::register::start_view).post(handlers::register::start),
        )
        .route(
            "/v1/register/phone/code",
            get(handlers::register::phone_code_view).post(handlers::register::phone_code),
        )
        .route(
            "/v1/register/phone/resend",
            get(handlers::register::phone_resend_view).post(handlers::register::phone_resend),
        )
        .route(
            "/v1/register/your-information",
            get(handlers::register::your_information_view)
                .post(handlers::register::your_information),
        )
        .route(
            "/v1/register/transition-emails",
            get(handlers::register::transition_emails_view)
                .post(handlers::register::transition_emails),
        )
        .route(
            "/v1/register/finish",
            get(handlers::register::finish_view).post(handlers::register::finish),
        )
        .route("/v1/register/cancel", post(handlers::register::cancel))
        .merge(
            SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", openapi::ApiDoc::openapi()),
        )
        .layer(Extension(services.handoff))
        .layer(Extension(services.registration))
        .layer(Extension(services.login))
        .layer(Extension(services.cookies))
}

/// Connect to the database, start the sweeper and serve until the process
/// exits.
///
/// # Errors
/// Returns an error if the database is unreachable or the server fails to
/// start.
pub async fn new(config: ServerConfig, dsn: &str) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn)
        .await
        .context("Failed to connect to database")?;

    let store = Arc::new(PgStore::new(pool.clone()));
    let registry = Arc::new(PgApplicationRegistry::new(pool.clone()));
    let accounts = Arc::new(PgAccountStore::new(pool.clone()));
    let audit = Arc::new(PgAuditSink::new(pool.clone()));
    let mfa = Arc::new(SmsCodeProvider::new(
        Arc::new(LogSmsSender),
        config.mfa_code_ttl,
        config.mfa_max_attempts,
    ));
    let attributes: Arc<dyn AttributeService> = match &config.attribute_service_url {
        Some(url) => Arc::new(HttpAttributeService::new(url)?),
        None => Arc::new(LogAttributeService),
    };

    let trusted_base_url = config.handoff.trusted_base_url().to_string();
    let handoff = Arc::new(Handoff::new(config.handoff, registry, store.clone()));
    let registration = Arc::new(Registration::new(
        config.registration.clone(),
        Collaborators {
            flows: store.clone(),
            tokens: store.clone(),
            accounts: accounts.clone(),
            mfa: mfa.clone(),
            attributes,
            audit: audit.clone(),
        },
    ));
    let login = Arc::new(Login::new(
        LoginConfig::new(&trusted_base_url).with_mfa_enabled(config.registration.mfa_enabled()),
        accounts,
        store.clone(),
        store.clone(),
        mfa,
        audit,
    ));

    let _sweeper = spawn_sweeper(Sweeper::new(
        config.sweeper,
        handoff.clone(),
        store.clone(),
        store,
    ));

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(Any);

    let services = Services {
        handoff,
        registration,
        login,
        cookies: CookieSettings::for_base_url(&trusted_base_url),
    };

    let app = router(services)
        .route(
            "/health",
            get(handlers::health::health).options(handlers::health::health),
        )
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(pool)),
        );

    let listener = TcpListener::bind(format!("::0:{}", config.port)).await?;

    info!("Listening on [::]:{}", config.port);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = route,
        request_id
    )
}
