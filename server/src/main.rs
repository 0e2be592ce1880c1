#![allow(dead_code)]

mod analytics;
mod auth;
mod cache;
mod categorizer;
mod db_core;
mod embeddings;
mod error;
mod expenses;
mod gmail;
mod ingestion;
mod llm;
mod request_tracing;
mod routes;
mod search;
mod server_config;
mod store;
mod sync;
mod user_files;

use std::{env, net::SocketAddr, sync::Arc, time::Duration};

use auth::AuthSessionStore;
use axum::{extract::FromRef, Router};
use cache::ApiCache;
use embeddings::{BertEmbedder, Embedder};
use error::AppResult;
use futures::future::join_all;
use gmail::auth::GmailAuth;
use gmail::client::GmailClient;
use ingestion::IngestionPipeline;
use mimalloc::MiMalloc;
use routes::AppRouter;
use search::EmailSearch;
use server_config::cfg;
use store::EmailStore;
use sync::SyncCoordinator;
use tokio::{signal, task::JoinHandle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

pub type HttpClient = reqwest::Client;

#[derive(Clone, FromRef)]
pub struct ServerState {
    pub http_client: HttpClient,
    pub store: EmailStore,
    pub embedder: Arc<dyn Embedder>,
    pub coordinator: Arc<SyncCoordinator>,
    pub session_store: AuthSessionStore,
}

impl ServerState {
    pub async fn gmail_client(&self) -> AppResult<GmailClient> {
        let auth = GmailAuth::new(self.http_client.clone());
        let access_token = auth.access_token().await?;
        Ok(GmailClient::new(self.http_client.clone(), access_token))
    }

    pub async fn ingestion_pipeline(&self) -> AppResult<IngestionPipeline> {
        Ok(IngestionPipeline::new(
            self.gmail_client().await?,
            self.store.clone(),
            self.embedder.clone(),
            self.http_client.clone(),
        ))
    }

    pub fn search(&self) -> EmailSearch {
        EmailSearch::new(self.store.clone(), self.embedder.clone())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_env("RUST_LOG"))
        .with(tracing_subscriber::fmt::Layer::default().with_ansi(false))
        .init();

    tracing::info!("Config: {}", *cfg);
    server_config::ensure_session_secret()?;

    let conn = db_core::connect(&cfg.parser.chroma_persist_dir).await?;
    let store = EmailStore::new(conn);

    let embedder: Arc<dyn Embedder> = {
        let model_id = cfg.parser.embedding_model.clone();
        let dimension = cfg.parser.embedding_dimension;
        let loaded = tokio::task::spawn_blocking(move || BertEmbedder::load(&model_id, dimension))
            .await
            .expect("embedding loader panicked");
        match loaded {
            Ok(embedder) => Arc::new(embedder),
            Err(e) => {
                tracing::error!("Failed to load embedding model: {}", e);
                return Err(anyhow::anyhow!("{e}"));
            }
        }
    };

    let http_client = reqwest::ClientBuilder::new().use_rustls_tls().build()?;
    let coordinator = Arc::new(SyncCoordinator::new(ApiCache::new()));
    let session_store = AuthSessionStore::new();

    let state = ServerState {
        http_client,
        store,
        embedder,
        coordinator: coordinator.clone(),
        session_store: session_store.clone(),
    };

    let router = AppRouter::create(state.clone());
    let auto_sync_handle = sync::spawn_auto_sync_loop(coordinator.clone(), state.clone());
    let session_cleanup_handle = spawn_session_cleanup(session_store);

    // resume near-live sync when a refresh token already exists on disk
    if GmailAuth::new(state.http_client.clone()).token_exists() {
        coordinator.on_login(state.clone());
    }

    let shutdown_handle = tokio::spawn(async move {
        signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
        tracing::info!("Received Ctrl+C, shutting down");
        std::process::exit(0);
    });

    join_all(vec![
        run_server(router),
        auto_sync_handle,
        session_cleanup_handle,
        shutdown_handle,
    ])
    .await;

    Ok(())
}

fn run_server(router: Router) -> JoinHandle<()> {
    tokio::spawn(async {
        let port = env::var("PORT").unwrap_or("8000".to_string());
        tracing::info!("Mailscope running on http://0.0.0.0:{}", port);

        let addr = SocketAddr::from(([0, 0, 0, 0], port.parse::<u16>().unwrap()));
        let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
        axum::serve(listener, router).await.unwrap();
    })
}

fn spawn_session_cleanup(session_store: AuthSessionStore) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            session_store.clean_store();
        }
    })
}
