//! REST API over hyper
//!
//! Routes:
//! - `GET /`, `GET /health`, `GET /status`, `GET /metrics` (no auth)
//! - `POST /v1/streak`, `GET|POST /v1/contacts`,
//!   `DELETE /v1/contacts/{nickname}`, `PUT /v1/message` (`X-API-Key`)
//!
//! Every JSON response except `/health` uses the `{success, message, data}`
//! envelope.

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Local;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::controller::{Command, Controller, Reply, Trigger};
use crate::error::{Error, Result};
use crate::metrics;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Largest request body accepted on `/v1` routes.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

type HttpResponse = Response<Full<Bytes>>;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

#[derive(Debug, Default, Deserialize)]
struct StreakRequest {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    dry_run: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ContactRequest {
    #[serde(default)]
    nickname: String,
}

#[derive(Debug, Default, Deserialize)]
struct MessageRequest {
    #[serde(default)]
    message: String,
}

/// Serve the API on an already bound listener.
pub async fn serve(listener: TcpListener, controller: Arc<Controller>) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "REST API started");
    }

    loop {
        let (stream, peer) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let controller = Arc::clone(&controller);
        let service = service_fn(move |req| {
            let controller = Arc::clone(&controller);
            async move { handle_request(controller, req).await }
        });

        tokio::spawn(async move {
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                warn!(?peer, "API connection error: {}", err);
            }
        });
    }
}

async fn handle_request(
    controller: Arc<Controller>,
    req: Request<Incoming>,
) -> std::result::Result<HttpResponse, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let response = route(controller, req).await;
    debug!(%method, %path, status = response.status().as_u16(), "API request");
    Ok(response)
}

async fn route(controller: Arc<Controller>, req: Request<Incoming>) -> HttpResponse {
    let path = req.uri().path().trim_end_matches('/').to_string();
    let method = req.method().clone();

    match (method, path.as_str()) {
        (Method::GET, "") => index(&controller),
        (Method::GET, "/health") => json_response(
            StatusCode::OK,
            &json!({"status": "healthy", "timestamp": Local::now().to_rfc3339()}),
        ),
        (Method::GET, "/status") => match controller.status() {
            Ok(status) => ok("Status retrieved", Some(status)),
            Err(e) => error_response(&e),
        },
        (Method::GET, "/metrics") => metrics_response(),
        (method, p) if p.starts_with("/v1/") => {
            if let Some(denied) = authorize(&controller, &req) {
                return denied;
            }
            let path = p.to_string();
            v1(controller, method, &path, req).await
        }
        (_, "/health" | "/status" | "/metrics") => method_not_allowed(),
        _ => envelope::<()>(StatusCode::NOT_FOUND, false, "Not found", None),
    }
}

async fn v1(
    controller: Arc<Controller>,
    method: Method,
    path: &str,
    req: Request<Incoming>,
) -> HttpResponse {
    match (method, path) {
        (Method::POST, "/v1/streak") => {
            let body: StreakRequest = match read_json(req).await {
                Ok(body) => body,
                Err(resp) => return resp,
            };
            let command = Command::Run {
                message: body.message,
                dry_run: body.dry_run,
            };
            match controller.execute(command, Trigger::Api).await {
                Ok(Reply::RunStarted {
                    run_id,
                    dry_run,
                    contacts,
                    message,
                }) => {
                    let label = if dry_run { "Test run started" } else { "Streak run started" };
                    envelope(
                        StatusCode::ACCEPTED,
                        true,
                        &format!("{} for {} contacts", label, contacts),
                        Some(json!({
                            "run_id": run_id,
                            "dry_run": dry_run,
                            "contacts": contacts,
                            "message": message,
                        })),
                    )
                }
                Ok(other) => unexpected(other),
                Err(e) => error_response(&e),
            }
        }
        (Method::GET, "/v1/contacts") => {
            match controller.execute(Command::ListContacts, Trigger::Api).await {
                Ok(Reply::Contacts(contacts)) => ok(
                    &format!("{} contacts", contacts.len()),
                    Some(json!({"count": contacts.len(), "contacts": contacts})),
                ),
                Ok(other) => unexpected(other),
                Err(e) => error_response(&e),
            }
        }
        (Method::POST, "/v1/contacts") => {
            let body: ContactRequest = match read_json(req).await {
                Ok(body) => body,
                Err(resp) => return resp,
            };
            match controller
                .execute(Command::AddContact(body.nickname), Trigger::Api)
                .await
            {
                Ok(Reply::ContactAdded { nickname, total }) => ok(
                    &format!("Added {}", nickname),
                    Some(json!({"nickname": nickname, "total": total})),
                ),
                Ok(other) => unexpected(other),
                Err(e) => error_response(&e),
            }
        }
        (Method::DELETE, p) if p.starts_with("/v1/contacts/") => {
            let raw = &p["/v1/contacts/".len()..];
            let nickname = match urlencoding::decode(raw) {
                Ok(name) => name.into_owned(),
                Err(_) => {
                    return envelope::<()>(
                        StatusCode::BAD_REQUEST,
                        false,
                        "Nickname is not valid UTF-8",
                        None,
                    )
                }
            };
            match controller
                .execute(Command::RemoveContact(nickname), Trigger::Api)
                .await
            {
                Ok(Reply::ContactRemoved {
                    nickname,
                    remaining,
                }) => ok(
                    &format!("Removed {}", nickname),
                    Some(json!({"nickname": nickname, "remaining": remaining})),
                ),
                Ok(other) => unexpected(other),
                Err(e) => error_response(&e),
            }
        }
        (Method::PUT, "/v1/message") => {
            let body: MessageRequest = match read_json(req).await {
                Ok(body) => body,
                Err(resp) => return resp,
            };
            match controller
                .execute(Command::SetMessage(body.message), Trigger::Api)
                .await
            {
                Ok(Reply::MessageSet(message)) => {
                    ok("Message updated", Some(json!({"message": message})))
                }
                Ok(other) => unexpected(other),
                Err(e) => error_response(&e),
            }
        }
        (_, "/v1/streak" | "/v1/contacts" | "/v1/message") => method_not_allowed(),
        _ => envelope::<()>(StatusCode::NOT_FOUND, false, "Not found", None),
    }
}

/// `None` when the request may proceed.
fn authorize(controller: &Controller, req: &Request<Incoming>) -> Option<HttpResponse> {
    let Some(expected) = &controller.settings().api_key else {
        error!("API_KEY not configured; refusing /v1 request");
        return Some(envelope::<()>(
            StatusCode::INTERNAL_SERVER_ERROR,
            false,
            "API key not configured on server",
            None,
        ));
    };
    let provided = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());
    if provided == Some(expected.expose()) {
        None
    } else {
        warn!(path = %req.uri().path(), "Rejected request with invalid API key");
        Some(envelope::<()>(
            StatusCode::UNAUTHORIZED,
            false,
            "Invalid or missing API key",
            None,
        ))
    }
}

/// Empty body reads as the default request.
async fn read_json<T>(req: Request<Incoming>) -> std::result::Result<T, HttpResponse>
where
    T: for<'de> Deserialize<'de> + Default,
{
    let bytes = match Limited::new(req.into_body(), MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            warn!(limit = MAX_BODY_BYTES, "Rejected oversized request body");
            return Err(envelope::<()>(
                StatusCode::PAYLOAD_TOO_LARGE,
                false,
                &format!("Request body exceeds {} bytes", MAX_BODY_BYTES),
                None,
            ));
        }
        Err(e) => {
            return Err(envelope::<()>(
                StatusCode::BAD_REQUEST,
                false,
                &format!("Failed to read body: {}", e),
                None,
            ))
        }
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(&bytes).map_err(|e| {
        envelope::<()>(
            StatusCode::BAD_REQUEST,
            false,
            &format!("Invalid JSON body: {}", e),
            None,
        )
    })
}

fn index(controller: &Controller) -> HttpResponse {
    ok(
        &controller.settings().app_name,
        Some(json!({
            "version": env!("CARGO_PKG_VERSION"),
            "endpoints": {
                "GET /health": "Liveness check",
                "GET /status": "Schedule, contacts and last run",
                "GET /metrics": "Prometheus metrics",
                "POST /v1/streak": "Start a run {message?, dry_run?}",
                "GET /v1/contacts": "List contacts",
                "POST /v1/contacts": "Add a contact {nickname}",
                "DELETE /v1/contacts/{nickname}": "Remove a contact",
                "PUT /v1/message": "Change the streak message {message}",
            },
        })),
    )
}

fn metrics_response() -> HttpResponse {
    match metrics::render() {
        Ok((content_type, body)) => {
            let mut response = Response::new(Full::new(Bytes::from(body)));
            let value = HeaderValue::from_str(&content_type)
                .unwrap_or_else(|_| HeaderValue::from_static("text/plain; version=0.0.4"));
            response.headers_mut().insert(CONTENT_TYPE, value);
            response
        }
        Err(e) => error_response(&e),
    }
}

pub fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::AlreadyExists(_) | Error::RunAlreadyInProgress => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: &Error) -> HttpResponse {
    let status = status_for(error);
    if status.is_server_error() {
        error!("API request failed: {}", error);
    }
    let message = match error {
        Error::AlreadyExists(name) => format!("{} already in contacts", name),
        Error::NotFound(name) => format!("{} not in contacts", name),
        other => other.to_string(),
    };
    envelope::<()>(status, false, &message, None)
}

fn unexpected(reply: Reply) -> HttpResponse {
    error!(?reply, "Unexpected controller reply");
    envelope::<()>(
        StatusCode::INTERNAL_SERVER_ERROR,
        false,
        "Unexpected reply",
        None,
    )
}

fn method_not_allowed() -> HttpResponse {
    envelope::<()>(
        StatusCode::METHOD_NOT_ALLOWED,
        false,
        "Method not allowed",
        None,
    )
}

fn ok<T: Serialize>(message: &str, data: Option<T>) -> HttpResponse {
    envelope(StatusCode::OK, true, message, data)
}

fn envelope<T: Serialize>(
    status: StatusCode,
    success: bool,
    message: &str,
    data: Option<T>,
) -> HttpResponse {
    json_response(
        status,
        &ApiResponse {
            success,
            message: message.to_string(),
            data,
        },
    )
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> HttpResponse {
    let bytes = serde_json::to_vec(body).unwrap_or_else(|e| {
        error!("Failed to serialize response: {}", e);
        br#"{"success":false,"message":"serialization error"}"#.to_vec()
    });
    let mut response = Response::new(Full::new(Bytes::from(bytes)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
