use crate::{
    books::{Book, ScoredBook},
    config::Config,
    covers::{CoverError, CoverProxy},
    csv_import::{self, CsvImportError},
    semantic::{LibraryError, LibraryService},
};
use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        DefaultBodyLimit, FromRequest, Multipart, Query, Request, State,
    },
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::signal;

#[derive(Clone)]
struct SharedState {
    library: Arc<LibraryService>,
    covers: Arc<CoverProxy>,
    default_limit: usize,
}

/// Build the API router.
pub fn router(library: Arc<LibraryService>, config: &Config) -> anyhow::Result<Router> {
    let shared_state = Arc::new(SharedState {
        library,
        covers: Arc::new(CoverProxy::new(&config.cover_proxy)?),
        default_limit: config.search.default_limit,
    });

    let app = Router::new()
        .route("/api/upload", post(upload))
        .route("/api/search/similar", post(search_similar))
        .route("/api/search/concept", post(search_concept))
        .route("/api/books", get(books))
        .route("/api/cover-proxy", get(cover_proxy))
        .layer(DefaultBodyLimit::max(config.server.max_upload_bytes))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state);

    Ok(app)
}

async fn start_app(library: Arc<LibraryService>, config: Config) -> anyhow::Result<()> {
    let app = router(library, &config)?;

    let listener = tokio::net::TcpListener::bind(&config.server.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.server.listen))?;
    log::info!("listening on {}", config.server.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            log::error!("failed to listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                log::error!("failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => log::warn!("received Ctrl+C, shutting down"),
        _ = terminate => log::warn!("received SIGTERM, shutting down"),
    }
}

pub fn start_daemon(library: Arc<LibraryService>, config: Config) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(start_app(library, config))
}

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Library(#[from] LibraryError),

    #[error(transparent)]
    Import(#[from] CsvImportError),

    #[error(transparent)]
    Cover(#[from] CoverError),

    #[error("Invalid request body: {0}")]
    Json(#[from] JsonRejection),

    #[error("Invalid query string: {0}")]
    Query(#[from] QueryRejection),
}

#[derive(Debug)]
struct HttpError(ApiError);

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self.0 {
            ApiError::BadRequest(_)
            | ApiError::Import(_)
            | ApiError::Json(_)
            | ApiError::Query(_) => StatusCode::BAD_REQUEST,

            ApiError::Library(LibraryError::MissingColumn { .. })
            | ApiError::Library(LibraryError::InvalidLimit) => StatusCode::BAD_REQUEST,
            ApiError::Library(_) => {
                log::error!("{self:?}");
                StatusCode::INTERNAL_SERVER_ERROR
            }

            ApiError::Cover(CoverError::MissingUrl) | ApiError::Cover(CoverError::InvalidUrl(_)) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Cover(CoverError::Request(_)) => {
                log::warn!("{self:?}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Cover(_) => StatusCode::NOT_FOUND,
        };

        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<ApiError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

fn bad_request(message: impl Into<String>) -> HttpError {
    HttpError(ApiError::BadRequest(message.into()))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    message: &'static str,
    book_count: usize,
    books: Vec<Book>,
}

/// Accepts a multipart form with a `file` field, or the CSV as the raw body.
async fn upload(
    State(state): State<Arc<SharedState>>,
    request: Request,
) -> Result<Json<UploadResponse>, HttpError> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"));

    let csv = if is_multipart {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|err| bad_request(err.to_string()))?;
        csv_from_multipart(multipart).await?
    } else {
        Bytes::from_request(request, &state)
            .await
            .map_err(|err| bad_request(err.to_string()))?
    };

    if csv.is_empty() {
        return Err(bad_request("No file provided"));
    }

    log::debug!("upload: {} bytes", csv.len());

    let library = state.library.clone();

    tokio::task::block_in_place(move || {
        let rows = csv_import::read_library(&csv[..])?;
        let books = library.ingest(&rows)?;

        Ok(Json(UploadResponse {
            message: "Library uploaded successfully",
            book_count: books.len(),
            books,
        }))
    })
}

async fn csv_from_multipart(mut multipart: Multipart) -> Result<Bytes, HttpError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| bad_request(err.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        if file_name.is_empty() {
            return Err(bad_request("No file selected"));
        }
        if !file_name.to_lowercase().ends_with(".csv") {
            return Err(bad_request("File must be a CSV"));
        }

        return field
            .bytes()
            .await
            .map_err(|err| bad_request(err.to_string()));
    }

    Err(bad_request("No file provided"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SimilarRequest {
    book_id: Option<String>,
    limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ConceptRequest {
    query: Option<String>,
    limit: Option<i64>,
}

fn resolve_limit(limit: Option<i64>, default_limit: usize) -> Result<usize, HttpError> {
    match limit {
        None => Ok(default_limit),
        Some(limit) if limit >= 1 => Ok(limit as usize),
        Some(_) => Err(LibraryError::InvalidLimit.into()),
    }
}

async fn search_similar(
    State(state): State<Arc<SharedState>>,
    payload: Result<Json<SimilarRequest>, JsonRejection>,
) -> Result<Json<Vec<ScoredBook>>, HttpError> {
    let Json(payload) = payload?;
    log::debug!("payload: {payload:?}");

    let book_id = payload
        .book_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| bad_request("No book ID provided"))?;
    let limit = resolve_limit(payload.limit, state.default_limit)?;

    let library = state.library.clone();

    tokio::task::block_in_place(move || {
        library
            .similar(&book_id, limit)
            .map(Json)
            .map_err(Into::into)
    })
}

async fn search_concept(
    State(state): State<Arc<SharedState>>,
    payload: Result<Json<ConceptRequest>, JsonRejection>,
) -> Result<Json<Vec<ScoredBook>>, HttpError> {
    let Json(payload) = payload?;
    log::debug!("payload: {payload:?}");

    let query = payload
        .query
        .filter(|query| !query.trim().is_empty())
        .ok_or_else(|| bad_request("No query provided"))?;
    let limit = resolve_limit(payload.limit, state.default_limit)?;

    let library = state.library.clone();

    tokio::task::block_in_place(move || {
        library
            .search_concept(&query, limit)
            .map(Json)
            .map_err(Into::into)
    })
}

async fn books(State(state): State<Arc<SharedState>>) -> Result<Json<Vec<Book>>, HttpError> {
    state.library.books().map(Json).map_err(Into::into)
}

#[derive(Debug, Deserialize)]
struct CoverRequest {
    url: Option<String>,
    source: Option<String>,
}

async fn cover_proxy(
    State(state): State<Arc<SharedState>>,
    params: Result<Query<CoverRequest>, QueryRejection>,
) -> Result<axum::response::Response, HttpError> {
    let Query(params) = params?;
    let url = params.url.ok_or(CoverError::MissingUrl)?;

    log::debug!(
        "cover: {url} (source: {})",
        params.source.as_deref().unwrap_or("unknown")
    );

    let cover = state.covers.fetch(&url).await?;

    Ok(([(header::CONTENT_TYPE, cover.content_type)], cover.bytes).into_response())
}
