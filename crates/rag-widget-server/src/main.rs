use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Extension, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::info;

use rag_widget_server::auth::JwtManager;
use rag_widget_server::config::Settings;
use rag_widget_server::crawler::Crawler;
use rag_widget_server::database::{Database, Repository};
use rag_widget_server::embedding::{
    EmbeddingOrchestrator, EmbeddingProvider, GeminiEmbeddings, OpenAiEmbeddings,
};
use rag_widget_server::handlers;
use rag_widget_server::ingestion::{self, IngestQueue, IngestionCoordinator};
use rag_widget_server::llm::{ChatProvider, ChatRouter, GeminiChat, OpenAiChat};
use rag_widget_server::security::BotAccess;
use rag_widget_server::services::{
    maintenance, QueryEngine, RateLimiter, WidgetTokenService,
};
use rag_widget_server::storage::{LocalObjectStore, ObjectStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,rag_widget_server=debug".to_string()),
        )
        .with_target(true)
        .json()
        .init();

    info!("starting rag-widget-server");

    let settings = Settings::load()?;

    // connect() probes the server and applies pending migrations.
    let database = Database::connect(&settings.database).await?;

    let repository = Arc::new(Repository::new(database));
    let storage: Arc<dyn ObjectStore> =
        Arc::new(LocalObjectStore::new(settings.storage.root_dir.clone()));

    let embeddings = Arc::new(EmbeddingOrchestrator::new(
        vec![
            Arc::new(OpenAiEmbeddings::new(
                &settings.embedding.openai,
                settings.embedding.dimension,
                settings.embedding.timeout_seconds,
            )) as Arc<dyn EmbeddingProvider>,
            Arc::new(GeminiEmbeddings::new(
                &settings.embedding.gemini,
                settings.embedding.dimension,
                settings.embedding.timeout_seconds,
            )),
        ],
        settings.embedding.preferred_provider.clone(),
        settings.embedding.batch_size,
        settings.embedding.dimension,
    ));

    let llm_router = Arc::new(ChatRouter::new(vec![
        Arc::new(OpenAiChat::new(&settings.llm.openai, settings.llm.timeout_seconds))
            as Arc<dyn ChatProvider>,
        Arc::new(GeminiChat::new(&settings.llm.gemini, settings.llm.timeout_seconds)),
    ]));

    let crawler = Arc::new(Crawler::new(settings.crawler.clone()));

    let query_engine = Arc::new(QueryEngine::new(
        repository.clone(),
        embeddings.clone(),
        llm_router,
        settings.rag.clone(),
        settings.llm.clone(),
    ));

    let access = Arc::new(BotAccess::new(repository.clone()));
    let widget_tokens = Arc::new(WidgetTokenService::new(repository.clone()));
    let rate_limiter = Arc::new(RateLimiter::new(
        repository.clone(),
        settings.limits.default_rate_per_min,
    ));
    let jwt = Arc::new(JwtManager::new(&settings.auth.jwt_secret));

    // Background ingestion pool: unbounded enqueue, fixed worker count.
    let (ingest_tx, ingest_rx) = flume::unbounded();
    let coordinator = Arc::new(IngestionCoordinator::new(
        repository.clone(),
        storage.clone(),
        crawler,
        embeddings,
    ));
    ingestion::spawn_workers(coordinator, ingest_rx, settings.ingestion.worker_count);
    info!(workers = settings.ingestion.worker_count, "ingestion workers started");

    maintenance::spawn_maintenance(repository.clone());

    let max_body = settings.storage.max_upload_bytes as usize + 1024 * 1024;
    let settings = Arc::new(settings);

    let app = build_router(
        repository,
        storage,
        access,
        widget_tokens,
        rate_limiter,
        query_engine,
        jwt,
        ingest_tx,
        settings.clone(),
        max_body,
    );

    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));
    info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn build_router(
    repository: Arc<Repository>,
    storage: Arc<dyn ObjectStore>,
    access: Arc<BotAccess>,
    widget_tokens: Arc<WidgetTokenService>,
    rate_limiter: Arc<RateLimiter>,
    query_engine: Arc<QueryEngine>,
    jwt: Arc<JwtManager>,
    ingest_queue: IngestQueue,
    settings: Arc<Settings>,
    max_body: usize,
) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::readiness_check));

    let api_routes = Router::new()
        .route(
            "/bots",
            post(handlers::bots::create_bot).get(handlers::bots::list_bots),
        )
        .route(
            "/bots/{id}",
            get(handlers::bots::get_bot)
                .patch(handlers::bots::update_bot)
                .delete(handlers::bots::delete_bot),
        )
        .route(
            "/bots/{id}/sources/upload",
            post(handlers::sources::upload_source),
        )
        .route("/bots/{id}/sources/url", post(handlers::sources::submit_url))
        .route("/bots/{id}/sources", get(handlers::sources::list_sources))
        .route(
            "/bots/{id}/sources/{sid}",
            get(handlers::sources::get_source).delete(handlers::sources::delete_source),
        )
        .route(
            "/bots/{id}/widget-tokens",
            post(handlers::widget_tokens::create_token).get(handlers::widget_tokens::list_tokens),
        )
        .route(
            "/bots/{id}/widget-tokens/{tid}",
            delete(handlers::widget_tokens::revoke_token),
        )
        .route("/bots/{id}/query", post(handlers::query::query_bot))
        // Public widget endpoint: CORS stays permissive, the token's domain
        // allow-list does the real gating.
        .route("/widget/query", post(handlers::widget::widget_query));

    Router::new()
        .merge(public_routes)
        .nest("/api/v1", api_routes)
        .layer(Extension(repository))
        .layer(Extension(storage))
        .layer(Extension(access))
        .layer(Extension(widget_tokens))
        .layer(Extension(rate_limiter))
        .layer(Extension(query_engine))
        .layer(Extension(jwt))
        .layer(Extension(ingest_queue))
        .layer(Extension(settings))
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(false)),
        )
        .layer(CatchPanicLayer::new())
        .layer(DefaultBodyLimit::max(max_body))
}
