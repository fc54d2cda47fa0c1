use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rocket::fairing::{Fairing, Info, Kind};
use rocket::figment::Figment;
use rocket::http::{Header, Status};
use rocket::serde::json::Json;
use rocket::{get, options, routes, Build, Request, Response, Rocket, State};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use common::Config;

use crate::aggregator::StoryAggregator;
use crate::upstream::{Story, UpstreamError};

/// Application state stored inside Rocket managed state.
#[derive(Clone)]
pub struct AppState {
    pub started_at: DateTime<Utc>,
    pub config: Arc<Config>,
    pub aggregator: Arc<StoryAggregator>,
    /// Cancelled when the server shuts down; every request works on a child of it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: Arc<Config>, aggregator: Arc<StoryAggregator>) -> Self {
        Self {
            started_at: Utc::now(),
            config,
            aggregator,
            shutdown: CancellationToken::new(),
        }
    }
}

/// Response structure for `/api/v1/status`.
#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    uptime_seconds: i64,
    upstream: String,
    cache_ttl_seconds: u64,
    cached_stories: usize,
}

#[get("/health")]
async fn health() -> &'static str {
    "OK"
}

/// Status endpoint returning uptime and cache details.
#[get("/api/v1/status")]
async fn status(state: &State<AppState>) -> Json<StatusResponse> {
    let uptime = (Utc::now() - state.started_at).num_seconds();

    Json(StatusResponse {
        status: "ok",
        uptime_seconds: uptime,
        upstream: state.config.upstream_base_url(),
        cache_ttl_seconds: state.aggregator.options().cache_ttl.as_secs(),
        cached_stories: state.aggregator.cached_story_count().await,
    })
}

/// Current new stories that link somewhere.
#[get("/api/v1/stories")]
async fn stories(state: &State<AppState>) -> Result<Json<Vec<Story>>, Status> {
    serve_stories(state).await
}

/// Same list under the path older clients already call.
#[get("/HackerNewsStory")]
async fn legacy_stories(state: &State<AppState>) -> Result<Json<Vec<Story>>, Status> {
    serve_stories(state).await
}

async fn serve_stories(state: &AppState) -> Result<Json<Vec<Story>>, Status> {
    let cancel = state.shutdown.child_token();
    // if Rocket drops this handler mid-flight the in-progress fetches stop too
    let _guard = cancel.clone().drop_guard();

    match state.aggregator.get_new_stories(&cancel).await {
        Ok(found) => Ok(Json(found)),
        Err(UpstreamError::Cancelled) => {
            warn!("story aggregation cancelled");
            Err(Status::ServiceUnavailable)
        }
        Err(e) => {
            error!(error = %e, "story aggregation failed");
            Err(Status::BadGateway)
        }
    }
}

/// Answers CORS preflight requests for any path.
#[options("/<_..>")]
async fn preflight() -> Status {
    Status::NoContent
}

/// Adds permissive CORS headers to every response.
pub struct Cors {
    allowed_origin: String,
}

impl Cors {
    pub fn new(allowed_origin: impl Into<String>) -> Self {
        Self {
            allowed_origin: allowed_origin.into(),
        }
    }
}

#[rocket::async_trait]
impl Fairing for Cors {
    fn info(&self) -> Info {
        Info {
            name: "CORS headers",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, _req: &'r Request<'_>, res: &mut Response<'r>) {
        res.set_header(Header::new(
            "Access-Control-Allow-Origin",
            self.allowed_origin.clone(),
        ));
        res.set_header(Header::new("Access-Control-Allow-Methods", "*"));
        res.set_header(Header::new("Access-Control-Allow-Headers", "*"));
    }
}

/// Build the Rocket instance without launching it.
pub fn build_rocket(state: AppState, figment: Figment) -> Rocket<Build> {
    let cors = Cors::new(state.config.cors_allowed_origin());

    rocket::custom(figment)
        .manage(state)
        .attach(cors)
        .mount("/", routes![health, status, stories, legacy_stories, preflight])
}

/// Launch the HTTP server, applying `server.bind` and `server.port` from the config.
///
/// This function blocks until the Rocket server shuts down and returns an error if
/// Rocket fails to start.
pub async fn launch_server(aggregator: Arc<StoryAggregator>, config: Arc<Config>) -> Result<()> {
    let mut fig = rocket::Config::figment();
    if let Some(bind) = &config.server.bind {
        fig = fig.merge(("address", bind.clone()));
    }
    if let Some(port) = config.server.port {
        fig = fig.merge(("port", port));
    }

    let state = AppState::new(config, aggregator);
    let shutdown_token = state.shutdown.clone();

    let rocket = build_rocket(state, fig)
        .ignite()
        .await
        .map_err(|e| anyhow!("Rocket failed to ignite: {}", e))?;

    // Rocket owns signal handling; propagate its shutdown to in-flight aggregations
    let shutdown = rocket.shutdown();
    tokio::spawn(async move {
        shutdown.await;
        shutdown_token.cancel();
    });

    info!("Starting Rocket HTTP server");
    rocket
        .launch()
        .await
        .map_err(|e| anyhow!("Rocket failed: {}", e))?;

    info!("Rocket HTTP server has shut down");
    Ok(())
}
