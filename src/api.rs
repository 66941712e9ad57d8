use std::collections::VecDeque;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        DefaultBodyLimit, Json, Multipart, Path, Query, State,
    },
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::{
    app_state::{AppState, Status},
    error::RagError,
    models::{
        AnswerPayload, DocumentMetadata, QueryRecord, SourceCitation, VisualizationDescriptor,
    },
    object_store::DeleteOutcome,
};

/// Mensajes WebSocket que se aceptan en cola mientras se responde a otro.
pub const MAX_PENDING_MESSAGES: usize = 16;

/// Tamaño máximo aceptado para un PDF subido.
pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

type ApiError = (StatusCode, Json<Value>);

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct Pagination {
    #[serde(default)]
    skip: usize,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    10
}

#[derive(Deserialize)]
pub struct QueryPayload {
    pdf_id: String,
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
}

#[derive(Serialize)]
pub struct QueryResponse {
    id: String,
    pdf_id: String,
    query: String,
    response: String,
    sources: Vec<SourceCitation>,
    visualizations: Vec<VisualizationDescriptor>,
    created_at: chrono::DateTime<Utc>,
}

#[derive(Serialize)]
pub struct PdfWithQueries {
    #[serde(flatten)]
    pdf: DocumentMetadata,
    queries: Vec<QueryRecord>,
}

#[derive(Deserialize)]
struct WsRequest {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    query: String,
    #[serde(default)]
    pdf_id: Option<String>,
    #[serde(default)]
    top_k: Option<usize>,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/api/v1/upload_pdf", post(upload_pdf_handler))
        .route("/api/v1/pdfs", get(list_pdfs_handler))
        .route("/api/v1/pdfs/:pdf_id", delete(delete_pdf_handler))
        .route("/api/v1/pdfs_with_queries", get(pdfs_with_queries_handler))
        .route("/api/v1/query", post(query_handler))
        .route("/api/v1/history/:pdf_id", get(history_handler))
        .route("/files/:object_id", get(file_handler))
        .route("/api/status", get(status_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .route("/ws", get(ws_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(app_state)
}

// --- Errores ---

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

fn internal(err: anyhow::Error) -> ApiError {
    error!("Error interno: {err:#}");
    api_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Error interno: {err}"),
    )
}

/// Traduce un fallo del pipeline a HTTP conservando la etapa en la que ocurrió.
pub fn rag_error(err: RagError) -> ApiError {
    let status = match &err {
        RagError::Extraction(_) => StatusCode::UNPROCESSABLE_ENTITY,
        RagError::Config(_) | RagError::Retrieval(_) => StatusCode::BAD_REQUEST,
        RagError::Embedding { .. } | RagError::Generation { .. } => StatusCode::BAD_GATEWAY,
    };
    (
        status,
        Json(json!({ "error": err.to_string(), "stage": err.stage() })),
    )
}

async fn find_pdf(state: &AppState, pdf_id: &str) -> Result<DocumentMetadata, ApiError> {
    state
        .metadata
        .find(pdf_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("PDF '{pdf_id}' no encontrado.")))
}

// --- Handlers ---

#[axum::debug_handler]
async fn root_handler() -> Json<Value> {
    Json(json!({ "message": "API de consultas sobre PDFs en marcha." }))
}

#[axum::debug_handler]
async fn upload_pdf_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let mut upload: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Multipart inválido: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Error leyendo el fichero: {e}")))?;
        upload = Some((filename, bytes.to_vec()));
    }

    let (filename, bytes) = upload
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "Falta el campo 'file'."))?;
    if !filename.to_lowercase().ends_with(".pdf") {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Solo se admiten ficheros PDF.",
        ));
    }

    let stored = state
        .objects
        .upload(&filename, bytes)
        .await
        .map_err(internal)?;

    let mut metadata = DocumentMetadata {
        id: String::new(),
        filename: filename.clone(),
        object_id: stored.id,
        url: stored.url,
        file_size: stored.content_length,
        format: stored.format,
        created_at: stored.created_at,
    };
    metadata.id = match state.metadata.save(metadata.clone()).await {
        Ok(id) => id,
        Err(e) => {
            // Sin metadatos nadie puede llegar al objeto: se borra.
            if let Err(cleanup) = state.objects.delete(&metadata.object_id).await {
                warn!(
                    "No se pudo borrar el objeto huérfano {}: {cleanup:#}",
                    metadata.object_id
                );
            }
            return Err(internal(e));
        }
    };

    info!("PDF '{}' subido con id {}", filename, metadata.id);
    Ok(Json(json!({
        "status": "success",
        "message": format!("PDF '{filename}' subido correctamente."),
        "data": {
            "pdf_id": metadata.id,
            "pdf_metadata": metadata,
        }
    })))
}

#[axum::debug_handler]
async fn list_pdfs_handler(
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<DocumentMetadata>>, ApiError> {
    let pdfs = state
        .metadata
        .list(page.skip, page.limit)
        .await
        .map_err(internal)?;
    Ok(Json(pdfs))
}

#[axum::debug_handler]
async fn delete_pdf_handler(
    State(state): State<AppState>,
    Path(pdf_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let metadata = find_pdf(&state, &pdf_id).await?;

    match state.objects.delete(&metadata.object_id).await {
        Ok(DeleteOutcome::Deleted) => debug!("Objeto {} borrado", metadata.object_id),
        Ok(DeleteOutcome::NotFound) => {
            warn!("El objeto {} ya no existía; se continúa", metadata.object_id)
        }
        Err(e) => return Err(internal(e)),
    }

    let deleted_queries = state
        .metadata
        .delete_queries(&pdf_id)
        .await
        .map_err(internal)?;
    state
        .metadata
        .delete_by_id(&pdf_id)
        .await
        .map_err(internal)?;
    state.pipeline.forget(&pdf_id);

    info!("PDF {pdf_id} borrado junto a {deleted_queries} consultas");
    Ok(Json(json!({
        "status": "success",
        "message": format!("PDF '{}' borrado.", metadata.filename),
        "pdf_id": pdf_id,
        "deleted_queries_count": deleted_queries,
    })))
}

#[axum::debug_handler]
async fn pdfs_with_queries_handler(
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<PdfWithQueries>>, ApiError> {
    let pdfs = state
        .metadata
        .list(page.skip, page.limit)
        .await
        .map_err(internal)?;

    let mut output = Vec::with_capacity(pdfs.len());
    for pdf in pdfs {
        let queries = state
            .metadata
            .list_queries(&pdf.id, 0, usize::MAX)
            .await
            .map_err(internal)?;
        output.push(PdfWithQueries { pdf, queries });
    }
    Ok(Json(output))
}

#[axum::debug_handler]
async fn query_handler(
    State(state): State<AppState>,
    Json(payload): Json<QueryPayload>,
) -> Result<Json<QueryResponse>, ApiError> {
    let (record, answer) =
        answer_query(&state, &payload.pdf_id, &payload.query, payload.top_k).await?;
    Ok(Json(QueryResponse {
        id: record.id,
        pdf_id: record.pdf_id,
        query: record.query,
        response: record.response,
        sources: answer.sources,
        visualizations: answer.visualizations,
        created_at: record.created_at,
    }))
}

#[axum::debug_handler]
async fn history_handler(
    State(state): State<AppState>,
    Path(pdf_id): Path<String>,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<QueryRecord>>, ApiError> {
    find_pdf(&state, &pdf_id).await?;
    let history = state
        .metadata
        .list_queries(&pdf_id, page.skip, page.limit)
        .await
        .map_err(internal)?;
    Ok(Json(history))
}

#[axum::debug_handler]
async fn file_handler(
    State(state): State<AppState>,
    Path(object_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let bytes = state
        .objects
        .fetch(&object_id)
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Fichero no encontrado."))?;
    let mime = mime_guess::from_path(&object_id)
        .first_or_octet_stream()
        .to_string();
    Ok(([(header::CONTENT_TYPE, mime)], bytes))
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    Json(state.status.lock().unwrap_or_else(|e| e.into_inner()).clone())
}

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    let sender = state
        .shutdown_sender
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .take();
    if let Some(sender) = sender {
        let _ = sender.send(());
    }
    StatusCode::OK
}

/// Ejecuta el pipeline sobre un PDF subido y registra la consulta en el historial.
async fn answer_query(
    state: &AppState,
    pdf_id: &str,
    query: &str,
    top_k: Option<usize>,
) -> Result<(QueryRecord, AnswerPayload), ApiError> {
    if query.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "La consulta está vacía."));
    }
    let _guard = state.begin_query();
    let metadata = find_pdf(state, pdf_id).await?;

    let document = match state.pipeline.cached_document(pdf_id) {
        Some(document) => document,
        None => {
            let bytes = state
                .objects
                .fetch(&metadata.object_id)
                .await
                .map_err(internal)?
                .ok_or_else(|| {
                    api_error(
                        StatusCode::NOT_FOUND,
                        "El fichero del PDF ya no está en el almacén.",
                    )
                })?;
            let document = state
                .pipeline
                .load_document(pdf_id, bytes)
                .await
                .map_err(|e| {
                    warn!("No se pudo extraer el PDF {pdf_id}: {e}");
                    rag_error(e)
                })?;
            let document = Arc::new(document);
            state.pipeline.remember_document(document.clone());
            document
        }
    };

    let top_k = top_k.unwrap_or_else(|| state.pipeline.default_top_k());
    let answer = state
        .pipeline
        .process_query(&document, query, top_k)
        .await
        .map_err(rag_error)?;

    let record = QueryRecord {
        id: String::new(),
        pdf_id: pdf_id.to_string(),
        query: query.to_string(),
        response: answer.answer.clone(),
        created_at: Utc::now(),
    };
    let id = state
        .metadata
        .save_query(record.clone())
        .await
        .map_err(internal)?;
    state.set_message(format!("Última consulta respondida sobre '{}'.", metadata.filename));

    Ok((QueryRecord { id, ..record }, answer))
}

// --- WebSocket ---

#[axum::debug_handler]
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    info!("Cliente WebSocket conectado");
    // Mensajes que llegan mientras se responde a otro.
    let mut pending: VecDeque<String> = VecDeque::new();

    loop {
        let text = match pending.pop_front() {
            Some(text) => text,
            None => match socket.recv().await {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    debug!("Error en WebSocket: {e}");
                    break;
                }
            },
        };

        let request = match serde_json::from_str::<WsRequest>(&text) {
            Ok(request) => request,
            Err(e) => {
                let reply = json!({ "error": format!("Mensaje inválido: {e}") });
                if socket.send(Message::Text(reply.to_string())).await.is_err() {
                    break;
                }
                continue;
            }
        };
        if request.kind != "query" {
            debug!("Mensaje WebSocket ignorado: tipo '{}'", request.kind);
            continue;
        }

        // Si el cliente se va, se suelta el future y la consulta se cancela.
        let work = ws_reply(&state, request);
        tokio::pin!(work);
        let reply = loop {
            tokio::select! {
                reply = &mut work => break reply,
                incoming = socket.recv() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(busy) = queue_while_busy(&mut pending, text) {
                            if socket.send(Message::Text(busy.to_string())).await.is_err() {
                                return;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {
                        info!("Cliente WebSocket desconectado; consulta cancelada");
                        return;
                    }
                    Some(Ok(_)) => {}
                },
            }
        };

        if socket.send(Message::Text(reply.to_string())).await.is_err() {
            break;
        }
    }
    info!("Cliente WebSocket desconectado");
}

/// Encola un mensaje recibido durante una consulta. Con la cola llena se
/// descarta y se devuelve la respuesta de error para el cliente.
fn queue_while_busy(pending: &mut VecDeque<String>, text: String) -> Option<Value> {
    if pending.len() >= MAX_PENDING_MESSAGES {
        warn!("Cola WebSocket llena; mensaje descartado");
        return Some(json!({
            "error": format!(
                "Demasiados mensajes en cola (máximo {MAX_PENDING_MESSAGES}); reintenta cuando llegue la respuesta."
            )
        }));
    }
    pending.push_back(text);
    None
}

async fn ws_reply(state: &AppState, request: WsRequest) -> Value {
    let Some(pdf_id) = request.pdf_id.filter(|id| !id.is_empty()) else {
        return json!({ "error": "Falta 'pdf_id' en la consulta." });
    };
    match answer_query(state, &pdf_id, &request.query, request.top_k).await {
        Ok((_, answer)) => json!({
            "answer": answer.answer,
            "visualizations": answer.visualizations,
            "sources": answer.sources,
        }),
        Err((_, Json(body))) => body,
    }
}
