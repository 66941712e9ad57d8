use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pdf_query_rag::{
    api,
    app_state::AppState,
    config::AppConfig,
    llm,
    neo4j_client::Neo4jMetadataStore,
    object_store::{LocalObjectStore, ObjectStore},
    pipeline::RagPipeline,
    store::{InMemoryMetadataStore, MetadataStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = AppConfig::from_env().context("Error al cargar la configuración")?;

    // 3. Backends de modelo y pipeline
    let backends = llm::backends_from_config(&cfg).context("Error inicializando los LLMs")?;
    let pipeline = RagPipeline::builder()
        .embedder(backends.embedder)
        .language_model(backends.language_model)
        .chunking(cfg.chunk_size, cfg.chunk_overlap)
        .top_k(cfg.top_k)
        .embed_concurrency(cfg.embed_concurrency)
        .embedding_cache(cfg.embedding_cache)
        .document_cache_capacity(cfg.document_cache_capacity)
        .build()
        .context("Error construyendo el pipeline")?;

    // 4. Almacenes: metadatos en Neo4j si está configurado, si no en memoria
    let metadata: Arc<dyn MetadataStore> = match &cfg.neo4j {
        Some(neo4j) => Arc::new(
            Neo4jMetadataStore::connect(neo4j)
                .await
                .context("Error conectando a Neo4j")?,
        ),
        None => {
            warn!("NEO4J_URI no definido: los metadatos se guardarán solo en memoria.");
            Arc::new(InMemoryMetadataStore::new())
        }
    };
    let objects: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(
        &cfg.upload_dir,
        &cfg.public_base_url,
    ));

    // Crear canal para la señal de apagado.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    // 5. Estado compartido y router
    let app_state = AppState::new(
        cfg.clone(),
        Arc::new(pipeline),
        metadata,
        objects,
        Some(shutdown_tx),
    );
    let app = Router::new()
        .merge(api::create_router(app_state))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 6. Iniciar el servidor
    let listener = tokio::net::TcpListener::bind(&cfg.server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {}", cfg.server_addr))?;
    info!("🚀 Servidor escuchando en http://{}", cfg.server_addr);

    // Configurar el apagado ordenado.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
