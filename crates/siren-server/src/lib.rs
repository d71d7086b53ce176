//! HTTP surface for the Siren dispatch coordinator.
//!
//! Routes:
//! - `GET /api/state`: dashboard read model
//! - `POST /api/incident`: `{action, id, unit_id?, x?, y?}`
//! - `POST /api/maintenance`: `{id, type}`
//! - `POST /api/inventory/add`: `{item_key, qty}` (signed)
//! - `GET /health`
//!
//! Every mutating route maps onto one [`Command`] applied by the shared
//! [`Dispatcher`]. Requests are served by a fixed pool of worker threads
//! pulling from one [`tiny_http::Server`].
//!
//! The [`TestServer`] helper starts a server on a random port for integration testing.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use siren_core::{Command, CoreError, Dispatcher, ErrorKind, MaintenanceAction, TransitionKind};
use siren_schema::{IncidentId, ItemKey, KeyError, Location, SirenConfig, UnitId};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::thread::JoinHandle;
use tiny_http::{Header, Method, Response, Server, StatusCode};
use tracing::{debug, error, info};

pub const DEFAULT_WORKERS: usize = 4;

/// An error response: `{"status":"error","kind":…,"message":…}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: u16,
    pub kind: String,
    pub message: String,
}

impl ApiError {
    pub fn new(status: u16, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(400, ErrorKind::InvalidArgument.to_string(), message)
    }

    pub fn body(&self) -> serde_json::Value {
        serde_json::json!({
            "status": "error",
            "kind": self.kind,
            "message": self.message,
        })
    }
}

pub fn status_for(kind: ErrorKind) -> u16 {
    match kind {
        ErrorKind::RejectedTransition => 409,
        ErrorKind::InvalidArgument => 400,
        ErrorKind::InventoryExhausted => 422,
        ErrorKind::PersistenceFault => 500,
    }
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        let kind = e.kind();
        if kind == ErrorKind::PersistenceFault {
            error!("persistence fault: {e}");
        }
        Self::new(status_for(kind), kind.to_string(), e.to_string())
    }
}

impl From<KeyError> for ApiError {
    fn from(e: KeyError) -> Self {
        CoreError::from(e).into()
    }
}

#[derive(Debug, Deserialize)]
pub struct IncidentRequest {
    pub action: String,
    pub id: String,
    #[serde(default)]
    pub unit_id: Option<String>,
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
}

impl IncidentRequest {
    pub fn into_command(self) -> Result<Command, ApiError> {
        let id = IncidentId::parse(&self.id)?;
        if self.action == "create" {
            let fallback = Location::default();
            let location = Location::new(self.x.unwrap_or(fallback.x), self.y.unwrap_or(fallback.y));
            return Ok(Command::Create { id, location });
        }
        let kind = TransitionKind::from_str(&self.action).map_err(ApiError::bad_request)?;
        let unit = self.unit_id.as_deref().map(UnitId::parse).transpose()?;
        Ok(Command::Transition { id, kind, unit })
    }
}

#[derive(Debug, Deserialize)]
pub struct MaintenanceRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub action: String,
}

impl MaintenanceRequest {
    pub fn into_command(self) -> Result<Command, ApiError> {
        Ok(Command::Maintain {
            unit: UnitId::parse(&self.id)?,
            action: MaintenanceAction::from_str(&self.action).map_err(ApiError::bad_request)?,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct InventoryRequest {
    pub item_key: String,
    pub qty: i64,
}

impl InventoryRequest {
    pub fn into_command(self) -> Result<Command, ApiError> {
        Ok(Command::Adjust {
            key: ItemKey::parse(&self.item_key)?,
            delta: self.qty,
        })
    }
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("malformed body: {e}")))
}

fn ok_body() -> serde_json::Value {
    serde_json::json!({"status": "ok"})
}

fn apply(dispatcher: &Dispatcher, command: Command) -> Result<serde_json::Value, ApiError> {
    dispatcher.apply(command)?;
    Ok(ok_body())
}

/// Resolve one request to a JSON body, or an error response.
///
/// `path` may carry a query string; it is ignored.
pub fn route(
    dispatcher: &Dispatcher,
    method: &Method,
    path: &str,
    body: &[u8],
) -> Result<serde_json::Value, ApiError> {
    let path = path.split('?').next().unwrap_or(path);
    let allowed = match path {
        "/health" | "/api/state" => Method::Get,
        "/api/incident" | "/api/maintenance" | "/api/inventory/add" => Method::Post,
        _ => return Err(ApiError::new(404, "not_found", format!("no route for {path}"))),
    };
    if *method != allowed {
        return Err(ApiError::new(
            405,
            "method_not_allowed",
            format!("{method} not allowed on {path}"),
        ));
    }

    match path {
        "/health" => Ok(ok_body()),
        "/api/state" => {
            let snapshot = dispatcher.snapshot()?;
            serde_json::to_value(&snapshot)
                .map_err(|e| ApiError::new(500, "internal", format!("encode state: {e}")))
        }
        "/api/incident" => apply(dispatcher, parse_body::<IncidentRequest>(body)?.into_command()?),
        "/api/maintenance" => {
            apply(dispatcher, parse_body::<MaintenanceRequest>(body)?.into_command()?)
        }
        _ => apply(dispatcher, parse_body::<InventoryRequest>(body)?.into_command()?),
    }
}

fn json_header() -> Header {
    Header::from_bytes("Content-Type", "application/json").expect("valid header")
}

fn respond(req: tiny_http::Request, status: u16, body: &serde_json::Value) {
    let response = Response::from_string(body.to_string())
        .with_status_code(StatusCode(status))
        .with_header(json_header());
    if let Err(e) = req.respond(response) {
        debug!("client went away before response: {e}");
    }
}

fn read_body(req: &mut tiny_http::Request) -> Option<Vec<u8>> {
    let mut body = Vec::new();
    if req.as_reader().read_to_end(&mut body).is_ok() {
        Some(body)
    } else {
        None
    }
}

/// Handle a single HTTP request.
pub fn handle_request(dispatcher: &Dispatcher, mut req: tiny_http::Request) {
    let method = req.method().clone();
    let url = req.url().to_owned();
    debug!("{method} {url}");

    let Some(body) = read_body(&mut req) else {
        respond(req, 400, &ApiError::bad_request("unreadable request body").body());
        return;
    };

    match route(dispatcher, &method, &url, &body) {
        Ok(value) => {
            if method == Method::Post {
                info!("{method} {url}: 200");
            }
            respond(req, 200, &value);
        }
        Err(e) => {
            info!("{method} {url}: {} {}", e.status, e.kind);
            respond(req, e.status, &e.body());
        }
    }
}

/// Start `workers` threads serving requests from `server`.
///
/// Each thread exits once [`Server::unblock`] has been called for it.
pub fn spawn_workers(
    server: &Arc<Server>,
    dispatcher: &Arc<Dispatcher>,
    workers: usize,
) -> std::io::Result<Vec<JoinHandle<()>>> {
    (0..workers.max(1))
        .map(|n| {
            let server = Arc::clone(server);
            let dispatcher = Arc::clone(dispatcher);
            std::thread::Builder::new()
                .name(format!("siren-http-{n}"))
                .spawn(move || {
                    for request in server.incoming_requests() {
                        handle_request(&dispatcher, request);
                    }
                    debug!("worker {n} stopped");
                })
        })
        .collect()
}

/// Wake every worker so [`spawn_workers`] threads return.
pub fn shutdown(server: &Server, workers: usize) {
    for _ in 0..workers.max(1) {
        server.unblock();
    }
}

/// A test helper that serves a [`Dispatcher`] on a random port.
///
/// The server listens on `127.0.0.1:{port}`. Dropping the `TestServer` stops
/// and joins its workers.
pub struct TestServer {
    pub url: String,
    pub port: u16,
    pub dispatcher: Arc<Dispatcher>,
    server: Arc<Server>,
    handles: Vec<JoinHandle<()>>,
}

impl TestServer {
    /// Serve a provisioned file store rooted at `store_dir`, with default config.
    pub fn start(store_dir: &Path) -> Self {
        let config = SirenConfig::default();
        let dispatcher = Dispatcher::open(store_dir, &config).expect("open test store");
        dispatcher.provision(&config).expect("provision test store");
        Self::start_with(Arc::new(dispatcher))
    }

    /// Serve an existing dispatcher as is.
    pub fn start_with(dispatcher: Arc<Dispatcher>) -> Self {
        let server =
            Arc::new(Server::http("127.0.0.1:0").expect("failed to bind test HTTP server"));
        let port = server.server_addr().to_ip().expect("not an IP addr").port();
        let url = format!("http://127.0.0.1:{port}");
        let handles =
            spawn_workers(&server, &dispatcher, DEFAULT_WORKERS).expect("spawn test workers");
        Self {
            url,
            port,
            dispatcher,
            server,
            handles,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        shutdown(&self.server, self.handles.len());
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}
