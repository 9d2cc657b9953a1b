use std::sync::Arc;

use codeduel_backend::api::{self, AppState};
use codeduel_backend::breaker::{BreakerConfig, CircuitBreaker};
use codeduel_backend::complexity::HttpComplexityVerifier;
use codeduel_backend::config::Config;
use codeduel_backend::coord::{Coordinator, RedisCoordStore};
use codeduel_backend::creation::MatchCreation;
use codeduel_backend::executor::TestExecutor;
use codeduel_backend::matchmaking::{spawn_pairing_worker, Matchmaking};
use codeduel_backend::metrics;
use codeduel_backend::room::{LocalQueueNotifier, LocalRooms};
use codeduel_backend::sandbox::HttpSandbox;
use codeduel_backend::session::{SessionDeps, SessionManager};
use codeduel_backend::store::sql::SqlStore;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    metrics::register_metrics();

    let cfg = Arc::new(Config::load());

    let coord_store = RedisCoordStore::connect(&cfg.redis_url)
        .await
        .expect("Failed to connect to the coordination store");
    let coord = Coordinator::new(Arc::new(coord_store));

    let store = Arc::new(
        SqlStore::new(&cfg.database_url)
            .await
            .expect("Failed to initialize the document store"),
    );

    let sandbox_breaker = Arc::new(CircuitBreaker::new("sandbox", BreakerConfig::default()));
    let llm_breaker = Arc::new(CircuitBreaker::new("llm", BreakerConfig::default()));

    let sandbox = Arc::new(HttpSandbox::new(&cfg.sandbox_url, sandbox_breaker));
    let executor = Arc::new(TestExecutor::new(sandbox));
    let verifier = Arc::new(HttpComplexityVerifier::new(
        &cfg.llm_url,
        cfg.llm_api_key.clone(),
        llm_breaker,
    ));

    let rooms = Arc::new(LocalRooms::new());
    let notifier = Arc::new(LocalQueueNotifier::new());

    let creation = Arc::new(MatchCreation::new(
        coord.clone(),
        store.clone(),
        rooms.clone(),
        cfg.clone(),
    ));
    let matchmaking = Matchmaking::new(
        coord.clone(),
        store.clone(),
        creation,
        notifier.clone(),
        cfg.clone(),
    );

    let sessions = SessionManager::new(
        SessionDeps {
            coord,
            store,
            executor,
            verifier,
            config: cfg.clone(),
        },
        rooms.clone(),
    );

    // Pairing sweep: every created match gets its session started here.
    let sessions_for_worker = sessions.clone();
    spawn_pairing_worker(matchmaking.clone(), move |pair| {
        let sessions = sessions_for_worker.clone();
        tokio::spawn(async move {
            sessions.start(pair.created, pair.seats).await;
        });
    });

    let app = api::router(AppState {
        matchmaking,
        sessions,
        rooms,
        notifier,
    });

    let addr = format!("0.0.0.0:{}", cfg.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|_| panic!("Failed to bind to {}", addr));

    tracing::info!("codeduel backend listening on port {}", cfg.port);
    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
