use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::{
    config::AppConfig, object_store::ObjectStore, pipeline::RagPipeline, store::MetadataStore,
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub pipeline: Arc<RagPipeline>,
    pub metadata: Arc<dyn MetadataStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub status: Arc<Mutex<Status>>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        pipeline: Arc<RagPipeline>,
        metadata: Arc<dyn MetadataStore>,
        objects: Arc<dyn ObjectStore>,
        shutdown_sender: Option<oneshot::Sender<()>>,
    ) -> Self {
        Self {
            config,
            pipeline,
            metadata,
            objects,
            status: Arc::new(Mutex::new(Status {
                active_queries: 0,
                message: "Servidor listo.".to_string(),
            })),
            shutdown_sender: Arc::new(Mutex::new(shutdown_sender)),
        }
    }

    /// Marca una consulta en curso hasta que se suelte el guard, también si
    /// el future se cancela a mitad.
    pub fn begin_query(&self) -> QueryGuard {
        {
            let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
            status.active_queries += 1;
            status.message = "Procesando consulta...".to_string();
        }
        QueryGuard {
            status: self.status.clone(),
        }
    }

    pub fn set_message(&self, message: impl Into<String>) {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).message = message.into();
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Status {
    pub active_queries: usize,
    pub message: String,
}

pub struct QueryGuard {
    status: Arc<Mutex<Status>>,
}

impl Drop for QueryGuard {
    fn drop(&mut self) {
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        status.active_queries = status.active_queries.saturating_sub(1);
    }
}
