use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::{Extension, Path as AxumPath, Query, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::account::{Account, owner_cookie, owner_from_cookie_header};
use crate::database::{Database, DatabaseConfig};
use crate::document::{Document, max_document_bytes};
use crate::export::export_sessions_zip;
use crate::generate::{BackendConfig, GenerationError, GenerativeBackend, Generator, HttpBackend};
use crate::layout::{LayoutError, MindMapLayout, Palette, compute_layout, layout_outline};
use crate::measure::{MeasuredNode, MeasurementPass, MeasurementStatus, TextMetrics};
use crate::outline::{Outline, OutlineError};
use crate::preferences::Preferences;
use crate::render::{RenderOptions, render_png, render_svg};
use crate::session::{NewSession, SessionLimitReached, SessionListResponse, StudySession};
use crate::study::{ContentError, GenerationMode, GenerationOptions, StudyContent};
use crate::templates::{CreateTemplateRequest, Template};

const CLEANUP_INTERVAL_SECS: u64 = 60 * 60;
const DEFAULT_PNG_SCALE: f32 = 2.0;

/// Arguments for running the studymap API server
#[derive(Debug, Clone, Parser)]
#[command(name = "studymap serve", about = "Start the studymap HTTP API server.")]
pub struct ServeArgs {
    /// Address to bind the HTTP server to.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 5151)]
    pub port: u16,

    /// SQLite database file (defaults to STUDYMAP_DB_PATH or the platform data directory).
    #[arg(long = "db")]
    pub db: Option<PathBuf>,

    /// Generative backend endpoint.
    #[arg(long = "api-url")]
    pub api_url: Option<String>,

    /// Bearer key for the generative backend.
    #[arg(long = "api-key")]
    pub api_key: Option<String>,

    /// Model name sent to the generative backend.
    #[arg(long)]
    pub model: Option<String>,
}

pub struct AppState<B> {
    db: Database,
    generator: Generator<B>,
    max_document_bytes: usize,
}

impl<B: GenerativeBackend> AppState<B> {
    pub fn new(db: Database, generator: Generator<B>) -> Self {
        Self {
            db,
            generator,
            max_document_bytes: max_document_bytes(),
        }
    }

    pub fn with_max_document_bytes(mut self, limit: usize) -> Self {
        self.max_document_bytes = limit;
        self
    }
}

pub fn router<B: GenerativeBackend + 'static>(state: Arc<AppState<B>>) -> Router {
    let owned = Router::new()
        .route(
            "/api/sessions",
            get(list_sessions::<B>).post(create_session::<B>),
        )
        .route(
            "/api/sessions/:id",
            get(get_session::<B>)
                .patch(rename_session::<B>)
                .delete(delete_session::<B>),
        )
        .route("/api/sessions/:id/chat", post(chat_session::<B>))
        .route("/api/sessions/:id/mindmap", get(get_mind_map::<B>))
        .route("/api/sessions/:id/mindmap.svg", get(get_mind_map_svg::<B>))
        .route("/api/sessions/:id/mindmap.png", get(get_mind_map_png::<B>))
        .route("/api/export", get(get_export::<B>))
        .route(
            "/api/preferences",
            get(get_preferences::<B>).put(put_preferences::<B>),
        )
        .route(
            "/api/templates",
            get(list_templates::<B>).post(create_template::<B>),
        )
        .route("/api/templates/:id", delete(delete_template::<B>))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            owner_middleware::<B>,
        ));

    Router::new()
        .route("/api/layout", post(post_layout))
        .merge(owned)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

pub async fn run_serve(args: ServeArgs) -> Result<()> {
    let mut db_config = DatabaseConfig::default();
    if let Some(path) = args.db {
        db_config.path = path;
    }
    let db = Database::new(db_config).await?;

    let mut backend_config = BackendConfig::default();
    if let Some(url) = args.api_url {
        backend_config.api_url = url;
    }
    if args.api_key.is_some() {
        backend_config.api_key = args.api_key;
    }
    if let Some(model) = args.model {
        backend_config.model = model;
    }
    let generator = Generator::new(HttpBackend::new(backend_config)?);

    let cleanup_db = db.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(CLEANUP_INTERVAL_SECS));
        loop {
            interval.tick().await;
            if let Err(err) = cleanup_db.cleanup_expired().await {
                tracing::warn!(error = %format!("{err:#}"), "cleanup of expired data failed");
            }
        }
    });

    let app = router(Arc::new(AppState::new(db, generator)));

    let addr = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind HTTP server to {addr}"))?;

    tracing::info!(%addr, "server started");
    println!("studymap server listening on http://{addr}");
    println!("Press Ctrl+C to stop.");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("HTTP server error")?;

    tracing::info!("server stopped");
    Ok(())
}

type ApiResult = Result<Response, (StatusCode, String)>;

/// Maps domain failures onto HTTP statuses.
fn api_error(err: anyhow::Error) -> (StatusCode, String) {
    let status = if err.downcast_ref::<SessionLimitReached>().is_some()
        || err.downcast_ref::<ContentError>().is_some()
        || err.downcast_ref::<OutlineError>().is_some()
    {
        StatusCode::BAD_REQUEST
    } else if let Some(layout) = err.downcast_ref::<LayoutError>() {
        match layout {
            LayoutError::NotReady { .. } | LayoutError::StaleMeasurements => StatusCode::CONFLICT,
            LayoutError::EmptyPalette | LayoutError::Measurement(_) => StatusCode::BAD_REQUEST,
        }
    } else if let Some(generation) = err.downcast_ref::<GenerationError>() {
        match generation {
            GenerationError::Backend(_) | GenerationError::Exhausted { .. } => StatusCode::BAD_GATEWAY,
            GenerationError::Content(_) | GenerationError::EmptyMessage => StatusCode::BAD_REQUEST,
        }
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };

    let message = format!("{err:#}");
    if status.is_server_error() {
        tracing::error!(%status, error = %message, "request failed");
    } else {
        tracing::debug!(%status, error = %message, "request rejected");
    }
    (status, message)
}

fn bad_request(message: impl Into<String>) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, message.into())
}

fn not_found(what: &str, id: i64) -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, format!("{what} {id} not found"))
}

#[derive(Debug, Clone)]
struct Owner {
    id: String,
}

fn cookie_owner(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(owner_from_cookie_header)
}

/// Resolves the request's owner before the handler runs. A newly created
/// account gets its cookie on every response, failed ones included.
async fn owner_middleware<B: GenerativeBackend + 'static>(
    State(state): State<Arc<AppState<B>>>,
    mut request: Request,
    next: Next,
) -> Response {
    let claimed = cookie_owner(request.headers());
    let (account, created) = match Account::resolve(state.db.pool(), claimed.as_deref()).await {
        Ok(resolved) => resolved,
        Err(err) => return api_error(err).into_response(),
    };

    let set_cookie = created.then(|| owner_cookie(&account.id));
    request.extensions_mut().insert(Owner { id: account.id });

    let mut response = next.run(request).await;
    if let Some(value) = set_cookie.and_then(|cookie| HeaderValue::from_str(&cookie).ok()) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    response
}

async fn load_session<B>(
    state: &AppState<B>,
    owner: &Owner,
    id: i64,
) -> Result<StudySession, (StatusCode, String)> {
    StudySession::get_by_id(state.db.pool(), id, &owner.id)
        .await
        .map_err(api_error)?
        .ok_or_else(|| not_found("study session", id))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionRequest {
    title: Option<String>,
    mode: Option<GenerationMode>,
    document: Document,
    options: Option<GenerationOptions>,
    template_id: Option<i64>,
}

async fn create_session<B: GenerativeBackend>(
    State(state): State<Arc<AppState<B>>>,
    Extension(owner): Extension<Owner>,
    Json(request): Json<CreateSessionRequest>,
) -> ApiResult {
    let pool = state.db.pool();

    request
        .document
        .validate(state.max_document_bytes)
        .map_err(|err| bad_request(format!("{err:#}")))?;

    let max_sessions = state.db.config().max_sessions_per_owner;
    let current = StudySession::count_by_owner(pool, &owner.id)
        .await
        .map_err(api_error)?;
    if current as usize >= max_sessions {
        return Err(api_error(SessionLimitReached { max: max_sessions }.into()));
    }

    let preferences = Preferences::get(pool, &owner.id).await.map_err(api_error)?;
    let mode = request.mode.unwrap_or(preferences.default_mode);
    let mut options = request
        .options
        .unwrap_or_else(|| preferences.generation_options());

    if let Some(template_id) = request.template_id {
        let template = Template::get_by_id(pool, template_id, &owner.id)
            .await
            .map_err(api_error)?
            .ok_or_else(|| not_found("template", template_id))?;
        if template.mode != mode {
            return Err(bad_request(format!(
                "template {} is for {} sessions, not {}",
                template_id, template.mode, mode
            )));
        }
        options.instructions = Some(match options.instructions.take() {
            Some(extra) => format!("{}\n{}", template.instructions, extra),
            None => template.instructions,
        });
    }

    let content = state
        .generator
        .generate(mode, &request.document, &options)
        .await
        .map_err(|err| api_error(err.into()))?;

    let title = request
        .title
        .as_deref()
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .or_else(|| content.title())
        .unwrap_or("Untitled")
        .to_string();

    let session = StudySession::create(
        pool,
        NewSession {
            owner_id: &owner.id,
            title: &title,
            document: &request.document,
            content: &content,
        },
        max_sessions,
    )
    .await
    .map_err(api_error)?;

    Ok((StatusCode::CREATED, Json(session)).into_response())
}

async fn list_sessions<B>(
    State(state): State<Arc<AppState<B>>>,
    Extension(owner): Extension<Owner>,
) -> ApiResult {
    let config = state.db.config();
    let sessions = StudySession::list_by_owner(state.db.pool(), &owner.id, config.expiration_days)
        .await
        .map_err(api_error)?;

    let response = SessionListResponse {
        current_session_count: sessions.len(),
        max_sessions: config.max_sessions_per_owner,
        sessions,
    };
    Ok(Json(response).into_response())
}

async fn get_session<B>(
    State(state): State<Arc<AppState<B>>>,
    Extension(owner): Extension<Owner>,
    AxumPath(id): AxumPath<i64>,
) -> ApiResult {
    let session = load_session(&state, &owner, id).await?;
    Ok(Json(session).into_response())
}

#[derive(Debug, Deserialize)]
struct RenameRequest {
    title: String,
}

async fn rename_session<B>(
    State(state): State<Arc<AppState<B>>>,
    Extension(owner): Extension<Owner>,
    AxumPath(id): AxumPath<i64>,
    Json(request): Json<RenameRequest>,
) -> ApiResult {
    if request.title.trim().is_empty() {
        return Err(bad_request("session title must not be empty"));
    }
    let session = load_session(&state, &owner, id).await?;
    let renamed = session
        .rename(state.db.pool(), &request.title)
        .await
        .map_err(api_error)?;
    Ok(Json(renamed).into_response())
}

async fn delete_session<B>(
    State(state): State<Arc<AppState<B>>>,
    Extension(owner): Extension<Owner>,
    AxumPath(id): AxumPath<i64>,
) -> ApiResult {
    let session = load_session(&state, &owner, id).await?;
    session.delete(state.db.pool()).await.map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    reply: String,
    session: StudySession,
}

async fn chat_session<B: GenerativeBackend>(
    State(state): State<Arc<AppState<B>>>,
    Extension(owner): Extension<Owner>,
    AxumPath(id): AxumPath<i64>,
    Json(request): Json<ChatRequest>,
) -> ApiResult {
    let session = load_session(&state, &owner, id).await?;

    let StudyContent::Chat(mut transcript) = session.content.clone() else {
        return Err(bad_request(format!(
            "study session {} is a {} session, not a chat",
            id, session.mode
        )));
    };

    let reply = state
        .generator
        .chat(&session.document, &mut transcript, &request.message)
        .await
        .map_err(|err| api_error(err.into()))?;

    let session = session
        .update_content(state.db.pool(), StudyContent::Chat(transcript))
        .await
        .map_err(api_error)?;

    Ok(Json(ChatResponse { reply, session }).into_response())
}

/// Lays out the mind map of a session with the owner's palette.
async fn session_mind_map<B>(
    state: &AppState<B>,
    owner: &Owner,
    id: i64,
) -> Result<(MindMapLayout, RenderOptions), (StatusCode, String)> {
    let session = load_session(state, owner, id).await?;
    let outline = session
        .content
        .mind_map()
        .ok_or_else(|| bad_request(format!("study session {} has no mind map", id)))?;

    let preferences = Preferences::get(state.db.pool(), &owner.id)
        .await
        .map_err(api_error)?;
    let options = RenderOptions {
        palette: preferences.palette(),
        ..RenderOptions::default()
    };
    let layout = layout_outline(outline, &options.metrics, &options.palette)
        .map_err(|err| api_error(err.into()))?;
    Ok((layout, options))
}

async fn get_mind_map<B>(
    State(state): State<Arc<AppState<B>>>,
    Extension(owner): Extension<Owner>,
    AxumPath(id): AxumPath<i64>,
) -> ApiResult {
    let (layout, _) = session_mind_map(&state, &owner, id).await?;
    Ok(Json(layout).into_response())
}

async fn get_mind_map_svg<B>(
    State(state): State<Arc<AppState<B>>>,
    Extension(owner): Extension<Owner>,
    AxumPath(id): AxumPath<i64>,
) -> ApiResult {
    let (layout, options) = session_mind_map(&state, &owner, id).await?;
    let svg = render_svg(&layout, &options).map_err(api_error)?;
    Ok(([(header::CONTENT_TYPE, "image/svg+xml")], svg).into_response())
}

#[derive(Debug, Deserialize)]
struct PngQuery {
    scale: Option<f32>,
}

async fn get_mind_map_png<B>(
    State(state): State<Arc<AppState<B>>>,
    Extension(owner): Extension<Owner>,
    AxumPath(id): AxumPath<i64>,
    Query(query): Query<PngQuery>,
) -> ApiResult {
    let scale = query.scale.unwrap_or(DEFAULT_PNG_SCALE);
    if !scale.is_finite() || scale <= 0.0 {
        return Err(bad_request("scale must be a positive number"));
    }
    let (layout, options) = session_mind_map(&state, &owner, id).await?;
    let png = tokio::task::spawn_blocking(move || render_png(&layout, &options, scale))
        .await
        .context("PNG rendering task failed")
        .and_then(|result| result)
        .map_err(api_error)?;
    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

#[derive(Debug, Deserialize)]
struct LayoutRequest {
    outline: Outline,
    #[serde(default)]
    measurements: Option<Vec<MeasuredNode>>,
    #[serde(default)]
    palette: Option<Vec<String>>,
}

/// Stateless layout. Without measurements the built-in text metrics are used.
async fn post_layout(Json(request): Json<LayoutRequest>) -> ApiResult {
    let palette = match request.palette {
        Some(colors) => Palette::new(colors, Palette::default().root())
            .map_err(|err| api_error(err.into()))?,
        None => Palette::default(),
    };

    let layout = match request.measurements {
        None => layout_outline(&request.outline, &TextMetrics::default(), &palette),
        Some(nodes) => {
            let mut pass = MeasurementPass::new(&request.outline);
            pass.record_all(nodes)
                .map_err(|err| api_error(LayoutError::from(err).into()))?;
            match pass.status() {
                MeasurementStatus::Ready(measurements) => {
                    compute_layout(&request.outline, measurements, &palette)
                }
                MeasurementStatus::Pending { .. } => Err(LayoutError::NotReady {
                    missing: pass.missing(),
                }),
            }
        }
    }
    .map_err(|err| api_error(err.into()))?;

    Ok(Json(layout).into_response())
}

async fn get_export<B>(
    State(state): State<Arc<AppState<B>>>,
    Extension(owner): Extension<Owner>,
) -> ApiResult {
    let preferences = Preferences::get(state.db.pool(), &owner.id)
        .await
        .map_err(api_error)?;
    let zip = export_sessions_zip(state.db.pool(), &owner.id, &preferences.palette())
        .await
        .map_err(api_error)?;

    if zip.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"studymap-export.zip\"",
            ),
        ],
        zip,
    )
        .into_response())
}

async fn get_preferences<B>(
    State(state): State<Arc<AppState<B>>>,
    Extension(owner): Extension<Owner>,
) -> ApiResult {
    let preferences = Preferences::get(state.db.pool(), &owner.id)
        .await
        .map_err(api_error)?;
    Ok(Json(preferences).into_response())
}

async fn put_preferences<B>(
    State(state): State<Arc<AppState<B>>>,
    Extension(owner): Extension<Owner>,
    Json(preferences): Json<Preferences>,
) -> ApiResult {
    preferences.validate().map_err(|err| api_error(err.into()))?;
    preferences
        .put(state.db.pool(), &owner.id)
        .await
        .map_err(api_error)?;
    Ok(Json(preferences).into_response())
}

async fn list_templates<B>(
    State(state): State<Arc<AppState<B>>>,
    Extension(owner): Extension<Owner>,
) -> ApiResult {
    let templates = Template::list_by_owner(state.db.pool(), &owner.id)
        .await
        .map_err(api_error)?;
    Ok(Json(templates).into_response())
}

async fn create_template<B>(
    State(state): State<Arc<AppState<B>>>,
    Extension(owner): Extension<Owner>,
    Json(request): Json<CreateTemplateRequest>,
) -> ApiResult {
    if request.name.trim().is_empty() || request.instructions.trim().is_empty() {
        return Err(bad_request("template name and instructions must not be empty"));
    }
    let template = Template::create(state.db.pool(), &owner.id, &request)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(template)).into_response())
}

async fn delete_template<B>(
    State(state): State<Arc<AppState<B>>>,
    Extension(owner): Extension<Owner>,
    AxumPath(id): AxumPath<i64>,
) -> ApiResult {
    if Template::delete(state.db.pool(), id, &owner.id)
        .await
        .map_err(api_error)?
    {
        Ok(StatusCode::NO_CONTENT.into_response())
    } else {
        Err(not_found("template", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::tests::test_database;
    use crate::generate::tests::ScriptedBackend;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tempfile::TempDir;
    use tower::ServiceExt;

    const MIND_MAP: &str = r#"{"centralTopic": "Cells", "mainNodes": [{"title": "Parts", "children": [{"title": "Nucleus"}]}, {"title": "Energy", "children": []}]}"#;

    async fn app(dir: &TempDir, replies: &[&str]) -> Router {
        let db = test_database(dir).await;
        let generator = Generator::new(ScriptedBackend::new(replies));
        router(Arc::new(AppState::new(db, generator).with_max_document_bytes(1024)))
    }

    struct Reply {
        status: StatusCode,
        headers: HeaderMap,
        body: Vec<u8>,
    }

    impl Reply {
        fn json(&self) -> Value {
            serde_json::from_slice(&self.body).unwrap()
        }

        fn owner_cookie(&self) -> String {
            let set_cookie = self.headers.get(header::SET_COOKIE).unwrap().to_str().unwrap();
            set_cookie.split(';').next().unwrap().to_string()
        }
    }

    async fn send(app: &Router, method: &str, uri: &str, cookie: Option<&str>, body: Option<Value>) -> Reply {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.into_body().collect().await.unwrap().to_bytes().to_vec();
        Reply { status, headers, body }
    }

    fn notes() -> Value {
        json!({ "kind": "text", "text": "Cells have parts and make energy." })
    }

    #[tokio::test]
    async fn mind_map_session_lifecycle() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir, &[MIND_MAP]).await;

        let created = send(
            &app,
            "POST",
            "/api/sessions",
            None,
            Some(json!({ "mode": "mind-map", "document": notes() })),
        )
        .await;
        assert_eq!(created.status, StatusCode::CREATED);
        let cookie = created.owner_cookie();
        let session = created.json();
        assert_eq!(session["title"], "Cells");
        assert_eq!(session["mode"], "mind-map");
        let id = session["id"].as_i64().unwrap();

        let list = send(&app, "GET", "/api/sessions", Some(&cookie), None).await;
        assert_eq!(list.status, StatusCode::OK);
        assert!(list.headers.get(header::SET_COOKIE).is_none());
        assert_eq!(list.json()["currentSessionCount"], 1);

        let layout = send(&app, "GET", &format!("/api/sessions/{id}/mindmap"), Some(&cookie), None).await;
        assert_eq!(layout.status, StatusCode::OK);
        assert_eq!(layout.json()["nodes"].as_array().unwrap().len(), 4);

        let svg = send(&app, "GET", &format!("/api/sessions/{id}/mindmap.svg"), Some(&cookie), None).await;
        assert_eq!(svg.status, StatusCode::OK);
        assert_eq!(svg.headers[header::CONTENT_TYPE], "image/svg+xml");
        assert!(String::from_utf8(svg.body).unwrap().contains("Nucleus"));

        let renamed = send(
            &app,
            "PATCH",
            &format!("/api/sessions/{id}"),
            Some(&cookie),
            Some(json!({ "title": "Cell map" })),
        )
        .await;
        assert_eq!(renamed.json()["title"], "Cell map");

        let stranger = send(&app, "GET", &format!("/api/sessions/{id}"), None, None).await;
        assert_eq!(stranger.status, StatusCode::NOT_FOUND);

        let export = send(&app, "GET", "/api/export", Some(&cookie), None).await;
        assert_eq!(export.status, StatusCode::OK);
        assert_eq!(export.headers[header::CONTENT_TYPE], "application/zip");

        let deleted = send(&app, "DELETE", &format!("/api/sessions/{id}"), Some(&cookie), None).await;
        assert_eq!(deleted.status, StatusCode::NO_CONTENT);
        let gone = send(&app, "GET", &format!("/api/sessions/{id}"), Some(&cookie), None).await;
        assert_eq!(gone.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn chat_is_limited_to_chat_sessions() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir, &[MIND_MAP, "Hi, ask me anything.", "Energy comes from mitochondria."]).await;

        let map = send(
            &app,
            "POST",
            "/api/sessions",
            None,
            Some(json!({ "mode": "mind-map", "document": notes() })),
        )
        .await;
        let cookie = map.owner_cookie();
        let map_id = map.json()["id"].as_i64().unwrap();

        let rejected = send(
            &app,
            "POST",
            &format!("/api/sessions/{map_id}/chat"),
            Some(&cookie),
            Some(json!({ "message": "Hello?" })),
        )
        .await;
        assert_eq!(rejected.status, StatusCode::BAD_REQUEST);

        let chat = send(
            &app,
            "POST",
            "/api/sessions",
            Some(&cookie),
            Some(json!({ "mode": "chat", "title": "Tutor", "document": notes() })),
        )
        .await;
        assert_eq!(chat.status, StatusCode::CREATED);
        let chat_id = chat.json()["id"].as_i64().unwrap();

        let turn = send(
            &app,
            "POST",
            &format!("/api/sessions/{chat_id}/chat"),
            Some(&cookie),
            Some(json!({ "message": "Where does energy come from?" })),
        )
        .await;
        assert_eq!(turn.status, StatusCode::OK);
        let body = turn.json();
        assert_eq!(body["reply"], "Energy comes from mitochondria.");
        assert_eq!(body["session"]["content"]["content"]["turns"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn backend_failure_maps_to_bad_gateway() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir, &[]).await;
        let reply = send(
            &app,
            "POST",
            "/api/sessions",
            None,
            Some(json!({ "mode": "summary", "document": notes() })),
        )
        .await;
        assert_eq!(reply.status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn oversized_documents_are_rejected() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir, &[MIND_MAP]).await;
        let reply = send(
            &app,
            "POST",
            "/api/sessions",
            None,
            Some(json!({ "mode": "mind-map", "document": { "kind": "text", "text": "x".repeat(2048) } })),
        )
        .await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn stateless_layout_waits_for_every_measurement() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir, &[]).await;
        let outline: Value = serde_json::from_str(MIND_MAP).unwrap();

        let estimated = send(&app, "POST", "/api/layout", None, Some(json!({ "outline": outline }))).await;
        assert_eq!(estimated.status, StatusCode::OK);
        assert_eq!(estimated.json()["connectors"].as_array().unwrap().len(), 3);

        let partial = json!({
            "outline": outline,
            "measurements": [{ "type": "central", "width": 100.0, "height": 40.0 }],
        });
        let pending = send(&app, "POST", "/api/layout", None, Some(partial)).await;
        assert_eq!(pending.status, StatusCode::CONFLICT);

        let complete = json!({
            "outline": outline,
            "measurements": [
                { "type": "central", "width": 100.0, "height": 40.0 },
                { "type": "main", "branch": 0, "width": 80.0, "height": 30.0 },
                { "type": "child", "branch": 0, "child": 0, "width": 60.0, "height": 20.0 },
                { "type": "main", "branch": 1, "width": 80.0, "height": 30.0 },
            ],
            "palette": ["#111111"],
        });
        let ready = send(&app, "POST", "/api/layout", None, Some(complete)).await;
        assert_eq!(ready.status, StatusCode::OK);
        let layout = ready.json();
        assert_eq!(layout["canvas"]["width"], 490.0);
        assert_eq!(layout["canvas"]["height"], 270.0);
        assert!(
            layout["connectors"]
                .as_array()
                .unwrap()
                .iter()
                .all(|connector| connector["colorIndex"] == 0)
        );
    }

    #[tokio::test]
    async fn preferences_and_templates() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir, &[]).await;

        let defaults = send(&app, "GET", "/api/preferences", None, None).await;
        let cookie = defaults.owner_cookie();
        assert_eq!(defaults.json()["defaultMode"], "guided-study");

        let saved = send(
            &app,
            "PUT",
            "/api/preferences",
            Some(&cookie),
            Some(json!({ "defaultMode": "quiz", "questionCount": 5, "difficulty": "hard", "palette": [] })),
        )
        .await;
        assert_eq!(saved.status, StatusCode::OK);
        let reloaded = send(&app, "GET", "/api/preferences", Some(&cookie), None).await;
        assert_eq!(reloaded.json()["questionCount"], 5);

        let invalid = send(
            &app,
            "PUT",
            "/api/preferences",
            Some(&cookie),
            Some(json!({ "questionCount": 0 })),
        )
        .await;
        assert_eq!(invalid.status, StatusCode::BAD_REQUEST);

        let template = send(
            &app,
            "POST",
            "/api/templates",
            Some(&cookie),
            Some(json!({ "name": "Exam", "mode": "quiz", "instructions": "Hard questions" })),
        )
        .await;
        assert_eq!(template.status, StatusCode::CREATED);
        let template_id = template.json()["id"].as_i64().unwrap();

        let list = send(&app, "GET", "/api/templates", Some(&cookie), None).await;
        assert_eq!(list.json().as_array().unwrap().len(), 1);

        let deleted = send(&app, "DELETE", &format!("/api/templates/{template_id}"), Some(&cookie), None).await;
        assert_eq!(deleted.status, StatusCode::NO_CONTENT);
        let missing = send(&app, "DELETE", &format!("/api/templates/{template_id}"), Some(&cookie), None).await;
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn failed_first_request_still_assigns_owner() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir, &[]).await;

        let missing = send(&app, "GET", "/api/sessions/999", None, None).await;
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
        let cookie = missing.owner_cookie();

        let list = send(&app, "GET", "/api/sessions", Some(&cookie), None).await;
        assert_eq!(list.status, StatusCode::OK);
        assert!(list.headers.get(header::SET_COOKIE).is_none());
        assert_eq!(list.json()["currentSessionCount"], 0);

        let layout = send(
            &app,
            "POST",
            "/api/layout",
            None,
            Some(json!({ "outline": serde_json::from_str::<Value>(MIND_MAP).unwrap() })),
        )
        .await;
        assert_eq!(layout.status, StatusCode::OK);
        assert!(layout.headers.get(header::SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn template_must_match_requested_mode() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir, &[MIND_MAP]).await;

        let template = send(
            &app,
            "POST",
            "/api/templates",
            None,
            Some(json!({ "name": "Exam", "mode": "quiz", "instructions": "Hard questions" })),
        )
        .await;
        let cookie = template.owner_cookie();
        let quiz_template = template.json()["id"].as_i64().unwrap();

        let mismatched = send(
            &app,
            "POST",
            "/api/sessions",
            Some(&cookie),
            Some(json!({ "mode": "mind-map", "document": notes(), "templateId": quiz_template })),
        )
        .await;
        assert_eq!(mismatched.status, StatusCode::BAD_REQUEST);
        assert!(String::from_utf8(mismatched.body).unwrap().contains("quiz"));

        let map_template = send(
            &app,
            "POST",
            "/api/templates",
            Some(&cookie),
            Some(json!({ "name": "Overview", "mode": "mind-map", "instructions": "Keep it short" })),
        )
        .await
        .json()["id"]
            .as_i64()
            .unwrap();

        let created = send(
            &app,
            "POST",
            "/api/sessions",
            Some(&cookie),
            Some(json!({ "mode": "mind-map", "document": notes(), "templateId": map_template })),
        )
        .await;
        assert_eq!(created.status, StatusCode::CREATED);
    }
}
