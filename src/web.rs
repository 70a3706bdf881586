use crate::config::AppConfig;
use crate::controller::{Controller, DataFetcher, loader_from_config};
use crate::definitions::DefinitionStore;
use crate::error::StoreError;
use crate::loader::SourceLoader;
use crate::search::{self, SearchHit};
use crate::source::Source;
use crate::state::{Effect, Event};
use crate::view::{DefinitionCard, PageView, SelectionPanel};
use askama::Template;
use axum::{
    Form, Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::compression::CompressionLayer;
use tower_http::services::ServeDir;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, warn};

type SharedState = Arc<WebState>;

pub struct WebState {
    controller: RwLock<Controller>,
    loader: SourceLoader<DataFetcher>,
    data_root: PathBuf,
    theme: WebTheme,
}

impl WebState {
    pub fn new(
        controller: Controller,
        loader: SourceLoader<DataFetcher>,
        data_root: PathBuf,
        theme: WebTheme,
    ) -> Self {
        Self {
            controller: RwLock::new(controller),
            loader,
            data_root,
            theme,
        }
    }

    fn dispatch(&self, event: Event) -> Result<Vec<Effect>, ApiError> {
        self.controller
            .write()
            .dispatch(event)
            .map_err(ApiError::storage)
    }

    fn view(&self) -> PageView {
        self.controller.read().view()
    }

    /// Reloads sources. The lock is released while fetching, so a second
    /// reload racing this one simply overwrites it when it lands.
    pub async fn reload(&self, force_reload: bool) -> Result<(), ApiError> {
        self.dispatch(Event::LoadStarted)?;
        let outcome = self.loader.load(force_reload).await;
        self.dispatch(Event::SourcesLoaded(outcome))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum WebTheme {
    #[default]
    Tailwind,
    Bootstrap,
}

impl fmt::Display for WebTheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebTheme::Tailwind => write!(f, "tailwind"),
            WebTheme::Bootstrap => write!(f, "bootstrap"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Chrome {
    use_tailwind: bool,
    use_bootstrap: bool,
    body_class: &'static str,
    layout_class: &'static str,
    panel_class: &'static str,
    eyebrow_class: &'static str,
    headline_class: &'static str,
    button_class: &'static str,
    ghost_class: &'static str,
    danger_class: &'static str,
    input_class: &'static str,
}

impl Chrome {
    fn new(theme: WebTheme) -> Self {
        match theme {
            WebTheme::Tailwind => Self {
                use_tailwind: true,
                use_bootstrap: false,
                body_class: "bg-slate-50 text-slate-900",
                layout_class: "grid gap-6 p-6 lg:grid-cols-[16rem_1fr_22rem]",
                panel_class: "bg-white shadow rounded p-4 space-y-3",
                eyebrow_class: "uppercase tracking-wide text-sm text-slate-500",
                headline_class: "text-2xl font-extrabold tracking-tight",
                button_class: "inline-flex items-center rounded-md bg-slate-900 px-3 py-1 text-white font-semibold shadow hover:bg-slate-800",
                ghost_class: "inline-flex items-center rounded-md border border-slate-300 px-2 py-1 text-sm hover:bg-slate-100",
                danger_class: "inline-flex items-center rounded-md border border-red-300 px-2 py-1 text-sm text-red-700 hover:bg-red-50",
                input_class: "w-full rounded border border-slate-300 px-2 py-1",
            },
            WebTheme::Bootstrap => Self {
                use_tailwind: false,
                use_bootstrap: true,
                body_class: "bg-light text-dark",
                layout_class: "container-fluid row py-4",
                panel_class: "card card-body mb-3",
                eyebrow_class: "text-uppercase text-muted mb-2",
                headline_class: "h3 fw-bold",
                button_class: "btn btn-primary btn-sm",
                ghost_class: "btn btn-outline-secondary btn-sm",
                danger_class: "btn btn-outline-danger btn-sm",
                input_class: "form-control",
            },
        }
    }
}

#[derive(Clone)]
pub struct WebConfig {
    pub addr: SocketAddr,
    pub theme: WebTheme,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            theme: WebTheme::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum WebError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to apply loaded sources: {0}")]
    Startup(String),
}

/// Opens the definition store, prepares the offline cache when enabled,
/// loads sources once and serves until Ctrl-C or SIGTERM.
pub async fn serve(config: WebConfig, app: AppConfig) -> Result<(), WebError> {
    let loader = loader_from_config(&app);
    if let Some(cache) = loader.fetcher().offline_cache() {
        if let Err(err) = cache.install().await {
            warn!(error = %err, cache = cache.name(), "offline cache install failed");
        }
        if let Err(err) = cache.activate().await {
            warn!(error = %err, cache = cache.name(), "offline cache activation failed");
        }
    }
    let controller = Controller::open(DefinitionStore::persistent(&app.storage_dir));
    let state = Arc::new(WebState::new(
        controller,
        loader,
        app.data_root.clone(),
        config.theme,
    ));
    state
        .reload(false)
        .await
        .map_err(|err| WebError::Startup(err.message))?;

    let router = build_router(state);
    info!(
        %config.addr,
        theme = %config.theme,
        data_root = %app.data_root.display(),
        offline = app.offline,
        "Binding HTTP listener"
    );
    let listener = TcpListener::bind(config.addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("HTTP server exited");
    Ok(())
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn storage(err: StoreError) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = json!({ "error": self.message });
        (self.status, Json(payload)).into_response()
    }
}

pub fn build_router(state: SharedState) -> Router {
    let files = raw_files_dir(&state.data_root, state.loader.manifest_path());
    let router = Router::new()
        .route("/", get(home))
        .route("/reload", post(reload))
        .route("/sources/select", post(select_source))
        .route("/search", post(run_search))
        .route("/search/clear", post(clear_search))
        .route("/results/open", post(open_result))
        .route("/toc/jump", post(jump_to))
        .route("/selection", post(begin_selection))
        .route("/selection/cancel", post(cancel_selection))
        .route("/definitions", post(save_definition))
        .route("/definitions/edit", post(edit_definition))
        .route("/definitions/remove", post(remove_definition))
        .route("/definitions/find", post(find_definition))
        .route("/api/state", get(api_state))
        .route("/api/source", get(api_source))
        .route("/api/search", get(api_search))
        .route("/api/definitions", get(api_definitions))
        .route("/healthz", get(health));
    let router = match files {
        Some(dir) => router.nest_service("/files", ServeDir::new(dir)),
        None => router,
    };
    router
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CompressionLayer::new())
}

/// Directory holding the manifest, which is the only part of the data root
/// exposed over HTTP. A manifest at the root itself exposes nothing.
fn raw_files_dir(data_root: &Path, manifest: &str) -> Option<PathBuf> {
    let parent = Path::new(manifest).parent()?;
    let confined = parent
        .components()
        .all(|component| matches!(component, Component::Normal(_)));
    if parent.as_os_str().is_empty() || !confined {
        return None;
    }
    Some(data_root.join(parent))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut stream) = signal(SignalKind::terminate()) {
            let _ = stream.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn home(State(state): State<SharedState>) -> impl IntoResponse {
    let page = state.view();
    let template = PageTemplate {
        chrome: Chrome::new(state.theme),
        page: &page,
        selection: page.selection.as_ref(),
        version: env!("CARGO_PKG_VERSION"),
    };
    Html(
        template
            .render()
            .unwrap_or_else(|err| render_error_page(err.to_string())),
    )
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "studyguide-web" }))
}

/// Post/redirect/get: land back on the page, anchored to a spotlighted
/// paragraph when the event asked for one.
fn redirect_after(effects: Vec<Effect>) -> Redirect {
    let anchor = effects.into_iter().find_map(|effect| match effect {
        Effect::Spotlight(dom_id) => Some(dom_id),
        Effect::PersistDefinitions(_) => None,
    });
    match anchor {
        Some(dom_id) => Redirect::to(&format!("/#{dom_id}")),
        None => Redirect::to("/"),
    }
}

async fn reload(State(state): State<SharedState>) -> Result<Redirect, ApiError> {
    state.reload(true).await?;
    Ok(Redirect::to("/"))
}

#[derive(Debug, Deserialize)]
struct SourceForm {
    id: String,
}

async fn select_source(
    State(state): State<SharedState>,
    Form(form): Form<SourceForm>,
) -> Result<Redirect, ApiError> {
    Ok(redirect_after(state.dispatch(Event::SelectSource(form.id))?))
}

#[derive(Debug, Deserialize)]
struct SearchForm {
    #[serde(default)]
    q: String,
}

async fn run_search(
    State(state): State<SharedState>,
    Form(form): Form<SearchForm>,
) -> Result<Redirect, ApiError> {
    Ok(redirect_after(state.dispatch(Event::Search(form.q))?))
}

async fn clear_search(State(state): State<SharedState>) -> Result<Redirect, ApiError> {
    Ok(redirect_after(state.dispatch(Event::ClearSearch)?))
}

#[derive(Debug, Deserialize)]
struct ResultForm {
    position: usize,
}

async fn open_result(
    State(state): State<SharedState>,
    Form(form): Form<ResultForm>,
) -> Result<Redirect, ApiError> {
    Ok(redirect_after(
        state.dispatch(Event::OpenResult(form.position))?,
    ))
}

#[derive(Debug, Deserialize)]
struct JumpForm {
    target: String,
}

async fn jump_to(
    State(state): State<SharedState>,
    Form(form): Form<JumpForm>,
) -> Result<Redirect, ApiError> {
    Ok(redirect_after(state.dispatch(Event::JumpTo(form.target))?))
}

#[derive(Debug, Deserialize)]
struct SelectionForm {
    #[serde(default)]
    text: String,
}

async fn begin_selection(
    State(state): State<SharedState>,
    Form(form): Form<SelectionForm>,
) -> Result<Redirect, ApiError> {
    Ok(redirect_after(
        state.dispatch(Event::BeginSelection(form.text))?,
    ))
}

async fn cancel_selection(State(state): State<SharedState>) -> Result<Redirect, ApiError> {
    Ok(redirect_after(state.dispatch(Event::CancelSelection)?))
}

#[derive(Debug, Deserialize)]
struct DefinitionForm {
    #[serde(default)]
    definition: String,
}

async fn save_definition(
    State(state): State<SharedState>,
    Form(form): Form<DefinitionForm>,
) -> Result<Redirect, ApiError> {
    Ok(redirect_after(
        state.dispatch(Event::SaveDefinition(form.definition))?,
    ))
}

#[derive(Debug, Deserialize)]
struct KeyForm {
    key: String,
}

async fn edit_definition(
    State(state): State<SharedState>,
    Form(form): Form<KeyForm>,
) -> Result<Redirect, ApiError> {
    Ok(redirect_after(state.dispatch(Event::EditDefinition(form.key))?))
}

async fn remove_definition(
    State(state): State<SharedState>,
    Form(form): Form<KeyForm>,
) -> Result<Redirect, ApiError> {
    Ok(redirect_after(
        state.dispatch(Event::RemoveDefinition(form.key))?,
    ))
}

async fn find_definition(
    State(state): State<SharedState>,
    Form(form): Form<KeyForm>,
) -> Result<Redirect, ApiError> {
    Ok(redirect_after(state.dispatch(Event::FindDefinition(form.key))?))
}

async fn api_state(State(state): State<SharedState>) -> Json<PageView> {
    Json(state.view())
}

#[derive(Debug, Deserialize)]
struct SourceParams {
    id: Option<String>,
}

async fn api_source(
    State(state): State<SharedState>,
    Query(params): Query<SourceParams>,
) -> Result<Json<Source>, ApiError> {
    let id = params
        .id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing `id` parameter"))?;
    let controller = state.controller.read();
    controller
        .state()
        .sources()
        .iter()
        .find(|source| source.id == id)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("No source with id {id:?}")))
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    q: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct SearchResponsePayload {
    query: String,
    total_hits: usize,
    paragraph_count: usize,
    truncated: bool,
    results: Vec<SearchHit>,
}

/// Stateless search over the current index; does not touch the page's
/// search box.
async fn api_search(
    State(state): State<SharedState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponsePayload>, ApiError> {
    let query = params.q.unwrap_or_default().trim().to_string();
    if query.is_empty() {
        return Err(ApiError::bad_request("Search query cannot be empty"));
    }
    let controller = state.controller.read();
    let outcome = search::search(controller.state().index(), &query);
    Ok(Json(SearchResponsePayload {
        query,
        total_hits: outcome.total_hits,
        paragraph_count: outcome.paragraph_count(),
        truncated: outcome.truncated(),
        results: outcome.displayed().to_vec(),
    }))
}

async fn api_definitions(State(state): State<SharedState>) -> Json<Vec<DefinitionCard>> {
    Json(state.view().definitions)
}

fn render_error_page(message: impl Into<String>) -> String {
    let template = ErrorTemplate {
        message: message.into(),
    };
    template
        .render()
        .unwrap_or_else(|_| "<h1>Something went wrong</h1>".to_string())
}

#[derive(Template)]
#[template(
    source = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <title>Study Guide • Error</title>
  </head>
  <body>
    <main>
      <h1>Something went wrong</h1>
      <p>{{ message }}</p>
      <a href="/">Back to the reader</a>
    </main>
  </body>
</html>"#,
    ext = "html"
)]
struct ErrorTemplate {
    message: String,
}

#[derive(Template)]
#[template(
    source = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>Study Guide • {{ page.header.title }}</title>
    {% if chrome.use_tailwind %}
    <script src="https://cdn.jsdelivr.net/npm/@tailwindcss/browser@4"></script>
    {% endif %}
    {% if chrome.use_bootstrap %}
    <link href="https://cdn.jsdelivr.net/npm/bootstrap@5.3.8/dist/css/bootstrap.min.css" rel="stylesheet" integrity="sha384-sRIl4kxILFvY47J16cr9ZwB07vP4J8+LH7qKQnuqkuIAvNWLzeN8tE5YBujZqJLB" crossorigin="anonymous">
    {% endif %}
    <style>
      mark.hit { background: #fde68a; padding: 0 1px; }
      p.para:target { outline: 3px solid #f59e0b; transition: outline-color 1.6s; }
      .toc-paragraph { display: flex; gap: .5rem; text-align: left; }
    </style>
  </head>
  <body class="{{ chrome.body_class }}">
    <header class="px-6 pt-6">
      <p class="{{ chrome.eyebrow_class }}">Study Guide v{{ version }}</p>
      <p id="statusLine">{{ page.status }}</p>
      <form method="post" action="/reload"><button type="submit" class="{{ chrome.ghost_class }}">Reload sources</button></form>
    </header>
    <main class="{{ chrome.layout_class }}">
      <aside class="space-y-4">
        <section class="{{ chrome.panel_class }}" id="sourceList">
          <h2 class="{{ chrome.eyebrow_class }}">Sources</h2>
          {% if page.sources.len() == 0 %}
          <div class="empty">No sources found.</div>
          {% endif %}
          {% for source in page.sources %}
          <form method="post" action="/sources/select">
            <input type="hidden" name="id" value="{{ source.id }}">
            <button type="submit" class="source-item {% if source.active %}active font-bold{% endif %}">{{ source.title }}</button>
          </form>
          {% endfor %}
        </section>
        <section class="{{ chrome.panel_class }}" id="tocList">
          <h2 class="{{ chrome.eyebrow_class }}">Contents</h2>
          <p id="tocMeta" class="text-sm">{{ page.toc.meta }}</p>
          {% for section in page.toc.sections %}
          <div class="toc-section">
            {% match section.target %}
            {% when Some with (target) %}
            <form method="post" action="/toc/jump">
              <input type="hidden" name="target" value="{{ target }}">
              <button type="submit" class="toc-chapter font-semibold">{{ section.label }}</button>
            </form>
            {% when None %}
            <button type="button" class="toc-chapter font-semibold" disabled>{{ section.label }}</button>
            {% endmatch %}
            <div class="toc-paragraphs">
              {% for row in section.rows %}
              <form method="post" action="/toc/jump">
                <input type="hidden" name="target" value="{{ row.target }}">
                <button type="submit" class="toc-paragraph text-sm"><span class="toc-number">{{ row.number }}</span><span class="toc-snippet">{{ row.snippet }}</span></button>
              </form>
              {% endfor %}
            </div>
          </div>
          {% endfor %}
        </section>
      </aside>

      <article class="{{ chrome.panel_class }}">
        <h1 id="activeTitle" class="{{ chrome.headline_class }}">{{ page.header.title }}</h1>
        <p id="activeMeta" class="text-sm text-slate-500">{{ page.header.meta }}</p>
        <div id="content">
          {% for section in page.content %}
          {% match section.heading %}
          {% when Some with (heading) %}
          <h3 class="text-lg font-semibold mt-4">{{ heading }}</h3>
          {% when None %}
          {% endmatch %}
          {% for paragraph in section.paragraphs %}
          <p class="para" id="{{ paragraph.dom_id }}">{% for segment in paragraph.segments %}{% if segment.hit %}<mark class="hit">{{ segment.text }}</mark>{% else %}{{ segment.text }}{% endif %}{% endfor %}</p>
          {% endfor %}
          {% endfor %}
        </div>
      </article>

      <aside class="space-y-4">
        <section class="{{ chrome.panel_class }}">
          <form id="searchForm" method="post" action="/search" class="space-y-2">
            <input id="searchInput" name="q" value="{{ page.search.term }}" placeholder="Search all sources" class="{{ chrome.input_class }}">
            <button type="submit" class="{{ chrome.button_class }}">Search</button>
          </form>
          <form method="post" action="/search/clear"><button id="clearSearchBtn" type="submit" class="{{ chrome.ghost_class }}">Clear</button></form>
          <p id="searchSummary" class="text-sm">{{ page.search.summary }}</p>
          <div id="resultsList" class="space-y-2">
            {% match page.search.empty_message %}
            {% when Some with (message) %}
            <div class="empty">{{ message }}</div>
            {% when None %}
            {% endmatch %}
            {% for result in page.search.results %}
            <form method="post" action="/results/open">
              <input type="hidden" name="position" value="{{ result.position }}">
              <button type="submit" class="result-item text-left">
                <div class="result-title font-semibold">{{ result.title }}</div>
                <div class="result-snippet text-sm">{% for segment in result.segments %}{% if segment.hit %}<mark class="hit">{{ segment.text }}</mark>{% else %}{{ segment.text }}{% endif %}{% endfor %}</div>
              </button>
            </form>
            {% endfor %}
            {% match page.search.more_note %}
            {% when Some with (note) %}
            <div class="panel-note text-sm">{{ note }}</div>
            {% when None %}
            {% endmatch %}
          </div>
        </section>

        <section class="{{ chrome.panel_class }}" id="selectionPanel">
          <h2 class="{{ chrome.eyebrow_class }}">Define a phrase</h2>
          {% match selection %}
          {% when Some with (panel) %}
          <p id="selectionText" class="font-semibold">{{ panel.phrase }}</p>
          <form method="post" action="/definitions" class="space-y-2">
            <textarea id="definitionInput" name="definition" rows="3" class="{{ chrome.input_class }}">{{ panel.draft }}</textarea>
            {% match panel.error %}
            {% when Some with (error) %}
            <p id="definitionError" class="text-sm text-red-700">{{ error }}</p>
            {% when None %}
            {% endmatch %}
            <button id="saveDefinitionBtn" type="submit" class="{{ chrome.button_class }}">Save</button>
          </form>
          <form method="post" action="/selection/cancel"><button id="cancelSelectionBtn" type="submit" class="{{ chrome.ghost_class }}">Cancel</button></form>
          {% when None %}
          <form id="selectionForm" method="post" action="/selection" class="space-y-2">
            <input id="selectionInput" name="text" placeholder="Select text or type a phrase" class="{{ chrome.input_class }}">
            <button type="submit" class="{{ chrome.ghost_class }}">Define</button>
          </form>
          {% endmatch %}
        </section>

        <section class="{{ chrome.panel_class }}" id="definitionsList">
          <h2 class="{{ chrome.eyebrow_class }}">Definitions</h2>
          {% if page.definitions.len() == 0 %}
          <div class="empty">No definitions yet.</div>
          {% endif %}
          {% for card in page.definitions %}
          <div class="definition-card border-t pt-2">
            <div class="definition-term font-semibold">{{ card.phrase }}</div>
            <div class="definition-body">{{ card.definition }}</div>
            <div class="definition-meta text-sm text-slate-500">{{ card.meta }}</div>
            <div class="definition-actions flex gap-2">
              <form method="post" action="/definitions/find"><input type="hidden" name="key" value="{{ card.key }}"><button type="submit" class="{{ chrome.ghost_class }}">Find</button></form>
              <form method="post" action="/definitions/edit"><input type="hidden" name="key" value="{{ card.key }}"><button type="submit" class="{{ chrome.ghost_class }}">Edit</button></form>
              <form method="post" action="/definitions/remove"><input type="hidden" name="key" value="{{ card.key }}"><button type="submit" class="{{ chrome.danger_class }}">Remove</button></form>
            </div>
          </div>
          {% endfor %}
        </section>
      </aside>
    </main>
    <script>
      document.getElementById('content').addEventListener('mouseup', function () {
        var form = document.getElementById('selectionForm');
        var text = String(window.getSelection() || '').trim();
        if (form && text) {
          document.getElementById('selectionInput').value = text;
          form.submit();
        }
      });
    </script>
  </body>
</html>"#,
    ext = "html"
)]
struct PageTemplate<'a> {
    chrome: Chrome,
    page: &'a PageView,
    selection: Option<&'a SelectionPanel>,
    version: &'static str,
}

#[cfg(all(test, feature = "web"))]
mod tests {
    use super::*;
    use crate::fetch::FsFetcher;
    use axum::{body, body::Body, http::Request, http::header};
    use std::fs;
    use tower::ServiceExt;

    struct Fixture {
        _dir: tempfile::TempDir,
        state: SharedState,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        fs::create_dir_all(&data).unwrap();
        fs::write(
            data.join("index.json"),
            r#"{"files": ["data/a.json", "data/broken.json"]}"#,
        )
        .unwrap();
        fs::write(
            data.join("a.json"),
            r#"{"title": "A", "sections": [{"heading": "Ch1", "verbatimText": "the cat sat on the mat\n\nthe end"}]}"#,
        )
        .unwrap();
        let loader = SourceLoader::new(
            DataFetcher::Direct(FsFetcher::new(dir.path())),
            "data/index.json",
        );
        let controller = Controller::open(DefinitionStore::persistent(dir.path().join("store")));
        let state = Arc::new(WebState::new(
            controller,
            loader,
            dir.path().to_path_buf(),
            WebTheme::Tailwind,
        ));
        state.reload(false).await.unwrap();
        Fixture { _dir: dir, state }
    }

    async fn get_text(router: Router, uri: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    async fn post_form(router: Router, uri: &str, form: &str) -> Response {
        router
            .oneshot(
                Request::post(uri)
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from(form.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    fn location(response: &Response) -> &str {
        response
            .headers()
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn home_renders_loaded_source() {
        let fixture = fixture().await;
        let (status, html) = get_text(build_router(fixture.state.clone()), "/").await;
        assert!(status.is_success());
        assert!(html.contains("1 source loaded. 0 definitions saved locally."));
        assert!(html.contains("id=\"p-s0-0-0\""));
        assert!(html.contains("1 chapter, 2 paragraphs"));
    }

    #[tokio::test]
    async fn search_form_updates_state_and_highlights() {
        let fixture = fixture().await;
        let router = build_router(fixture.state.clone());
        let response = post_form(router.clone(), "/search", "q=the").await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/");

        let (_, body) = get_text(router.clone(), "/api/state").await;
        let state: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(state["search"]["summary"], "3 hits in 2 paragraphs.");

        let (_, html) = get_text(router, "/").await;
        assert!(html.contains("<mark class=\"hit\">the</mark>"));
    }

    #[tokio::test]
    async fn opening_a_result_redirects_to_paragraph_anchor() {
        let fixture = fixture().await;
        let router = build_router(fixture.state.clone());
        post_form(router.clone(), "/search", "q=end").await;
        let response = post_form(router, "/results/open", "position=0").await;
        assert_eq!(location(&response), "/#p-s0-0-1");
    }

    #[tokio::test]
    async fn definition_flow_persists_and_counts() {
        let fixture = fixture().await;
        let router = build_router(fixture.state.clone());
        post_form(router.clone(), "/selection", "text=+Cat+").await;
        post_form(router.clone(), "/definitions", "definition=a+feline").await;
        post_form(router.clone(), "/selection", "text=cat").await;
        post_form(router.clone(), "/definitions", "definition=small+feline").await;

        let (_, body) = get_text(router.clone(), "/api/definitions").await;
        let cards: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(cards.as_array().unwrap().len(), 1);
        assert_eq!(cards[0]["key"], "cat");
        assert_eq!(cards[0]["definition"], "small feline");
        assert_eq!(cards[0]["meta"], "1 instance found");

        post_form(router.clone(), "/definitions/remove", "key=cat").await;
        let (_, body) = get_text(router, "/api/definitions").await;
        assert_eq!(body, "[]");
    }

    #[tokio::test]
    async fn empty_definition_shows_validation_error() {
        let fixture = fixture().await;
        let router = build_router(fixture.state.clone());
        post_form(router.clone(), "/selection", "text=mat").await;
        post_form(router.clone(), "/definitions", "definition=+++").await;
        let (_, html) = get_text(router, "/").await;
        assert!(html.contains("Definition cannot be empty."));
        assert!(html.contains("No definitions yet."));
    }

    #[tokio::test]
    async fn api_search_requires_query() {
        let fixture = fixture().await;
        let router = build_router(fixture.state.clone());
        let (status, _) = get_text(router.clone(), "/api/search?q=%20").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, body) = get_text(router, "/api/search?q=CAT").await;
        assert!(status.is_success());
        let payload: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(payload["total_hits"], 1);
        assert_eq!(payload["results"][0]["dom_id"], "p-s0-0-0");
    }

    #[tokio::test]
    async fn api_source_lookup() {
        let fixture = fixture().await;
        let router = build_router(fixture.state.clone());
        let (status, body) = get_text(router.clone(), "/api/source?id=data/a.json").await;
        assert!(status.is_success());
        assert!(body.contains("\"title\":\"A\""));
        let (status, _) = get_text(router, "/api/source?id=missing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn raw_files_are_limited_to_the_manifest_directory() {
        let fixture = fixture().await;
        fs::write(fixture._dir.path().join("Cargo.toml"), "[package]").unwrap();
        let router = build_router(fixture.state.clone());

        let (status, body) = get_text(router.clone(), "/files/index.json").await;
        assert!(status.is_success());
        assert!(body.contains("data/a.json"));
        let (status, _) = get_text(router.clone(), "/files/a.json").await;
        assert!(status.is_success());

        let (status, _) = get_text(router.clone(), "/files/Cargo.toml").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = get_text(router, "/files/data/index.json").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn manifest_at_root_exposes_no_files() {
        let root = std::path::Path::new("/srv/guide");
        assert_eq!(raw_files_dir(root, "index.json"), None);
        assert_eq!(raw_files_dir(root, "../index.json"), None);
        assert_eq!(
            raw_files_dir(root, "data/index.json"),
            Some(root.join("data"))
        );
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let fixture = fixture().await;
        let (status, body) = get_text(build_router(fixture.state.clone()), "/healthz").await;
        assert!(status.is_success());
        assert!(body.contains("\"ok\""));
    }

    #[test]
    fn error_page_escapes_message() {
        let html = render_error_page("<script>");
        assert!(html.contains("&lt;script&gt;"));
    }
}
