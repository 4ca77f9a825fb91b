// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Loopback HTTP control surface.
//!
//! | Route                     | Action                                  |
//! |---------------------------|-----------------------------------------|
//! | `GET /status`             | lifecycle state, queue depth, workers   |
//! | `GET /config`             | every attribute and its value           |
//! | `GET /config/{attr}`      | one attribute                           |
//! | `PUT /config/{attr}`      | set an attribute from the request body  |
//! | `POST /pause`             | pause                                   |
//! | `POST /unpause`           | unpause                                 |
//! | `POST /poller/start`      | start the metrics pollers               |
//! | `POST /poller/stop`       | stop the metrics pollers                |
//! | `POST /sampler/start`     | start the snapshot sampler              |
//! | `POST /sampler/stop`      | stop the snapshot sampler               |
//! | `POST /reload`            | reload the configuration file           |

use std::io;
use std::sync::Weak;

use http_body_util::{BodyExt, Full, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::http;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::config::Attribute;
use crate::controller::AgentController;
use crate::error::{AgentError, ControlError};

type HttpResponse = Response<Full<Bytes>>;

const MAX_BODY_BYTES: usize = 64 * 1024;

pub async fn serve(listener: TcpListener, controller: Weak<AgentController>, cancel: CancellationToken) {
    let server = hyper::server::conn::http1::Builder::new();
    let service = service_fn(move |req| handle(controller.clone(), req));
    let mut joinset = JoinSet::new();

    loop {
        let conn = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            con_res = listener.accept() => match con_res {
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionAborted
                            | io::ErrorKind::ConnectionReset
                            | io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    error!("Admin endpoint error: {e}");
                    break;
                }
                Ok((conn, _)) => conn,
            },
            finished = async {
                match joinset.join_next().await {
                    Some(finished) => finished,
                    None => std::future::pending().await,
                }
            } => match finished {
                Err(e) if e.is_panic() => {
                    error!("Admin connection handler panicked: {e:?}");
                    continue;
                }
                Ok(()) | Err(_) => continue,
            },
        };
        let conn = TokioIo::new(conn);
        let server = server.clone();
        let service = service.clone();
        joinset.spawn(async move {
            if let Err(e) = server.serve_connection(conn, service).await {
                debug!("Admin connection error: {e}");
            }
        });
    }
    joinset.shutdown().await;
    debug!("Admin endpoint stopped");
}

async fn handle(
    controller: Weak<AgentController>,
    req: Request<Incoming>,
) -> http::Result<HttpResponse> {
    let Some(controller) = controller.upgrade() else {
        return log_and_create_http_response("Agent is gone", StatusCode::SERVICE_UNAVAILABLE);
    };
    let method = req.method().clone();
    let path = req.uri().path().trim_end_matches('/').to_string();

    if let Some(name) = path.strip_prefix("/config/") {
        let attribute = match name.parse::<Attribute>() {
            Ok(attribute) => attribute,
            Err(e) => return control_error_response(&e),
        };
        return match method {
            Method::GET => json_response(
                StatusCode::OK,
                &json!({ "name": attribute.name(), "value": controller.attribute(attribute) }),
            ),
            Method::PUT => {
                let value = match read_body(req).await {
                    Ok(value) => value,
                    Err(response) => return response,
                };
                match controller.set_attribute(attribute, value.trim()).await {
                    Ok(()) => json_response(
                        StatusCode::OK,
                        &json!({ "name": attribute.name(), "value": controller.attribute(attribute) }),
                    ),
                    Err(e) => control_error_response(&e),
                }
            }
            _ => log_and_create_http_response(
                &format!("{method} not allowed on {path}"),
                StatusCode::METHOD_NOT_ALLOWED,
            ),
        };
    }

    match (method, path.as_str()) {
        (Method::GET, "/status") => json_response(StatusCode::OK, &controller.status().await),
        (Method::GET, "/config") => {
            let attributes: serde_json::Map<String, serde_json::Value> = controller
                .attributes()
                .into_iter()
                .map(|(name, value)| (name.to_string(), serde_json::Value::String(value)))
                .collect();
            json_response(StatusCode::OK, &attributes)
        }
        (Method::POST, "/pause") => command(controller.pause().await, "Agent paused"),
        (Method::POST, "/unpause") => command(controller.unpause().await, "Agent unpaused"),
        (Method::POST, "/poller/start") => command(controller.start_pollers().await, "Pollers started"),
        (Method::POST, "/poller/stop") => command(controller.stop_pollers().await, "Pollers stopped"),
        (Method::POST, "/sampler/start") => {
            command(controller.start_sampler().await, "Snapshot sampler started")
        }
        (Method::POST, "/sampler/stop") => {
            command(controller.stop_sampler().await, "Snapshot sampler stopped")
        }
        (Method::POST, "/reload") => command(
            controller.reload_config_file().await,
            "Configuration reloaded",
        ),
        (method, path) => log_and_create_http_response(
            &format!("No route for {method} {path}"),
            StatusCode::NOT_FOUND,
        ),
    }
}

async fn read_body(req: Request<Incoming>) -> Result<String, http::Result<HttpResponse>> {
    let collected = Limited::new(req.into_body(), MAX_BODY_BYTES)
        .collect()
        .await
        .map_err(|e| {
            log_and_create_http_response(
                &format!("Error reading request body: {e}"),
                StatusCode::BAD_REQUEST,
            )
        })?;
    String::from_utf8(collected.to_bytes().to_vec()).map_err(|e| {
        log_and_create_http_response(
            &format!("Request body is not UTF-8: {e}"),
            StatusCode::BAD_REQUEST,
        )
    })
}

fn command(result: Result<(), AgentError>, message: &str) -> http::Result<HttpResponse> {
    match result {
        Ok(()) => log_and_create_http_response(message, StatusCode::OK),
        Err(e) => log_and_create_http_response(&e.to_string(), agent_error_status(&e)),
    }
}

fn agent_error_status(e: &AgentError) -> StatusCode {
    match e {
        AgentError::Config(_) => StatusCode::BAD_REQUEST,
        AgentError::Stopped | AgentError::NoConfigFile => StatusCode::CONFLICT,
        AgentError::Transport(_) | AgentError::AdminBind(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn control_error_response(e: &ControlError) -> http::Result<HttpResponse> {
    let status = match e {
        ControlError::UnknownAttribute(_) => StatusCode::NOT_FOUND,
        ControlError::InvalidValue { .. } => StatusCode::BAD_REQUEST,
        ControlError::Agent(agent) => agent_error_status(agent),
    };
    log_and_create_http_response(&e.to_string(), status)
}

/// Logs `message` (debug on success, error otherwise) and returns it as `{"message": ...}`.
fn log_and_create_http_response(message: &str, status: StatusCode) -> http::Result<HttpResponse> {
    if status.is_success() {
        debug!("{message}");
    } else {
        error!("{message}");
    }
    let body = json!({ "message": message }).to_string();
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> http::Result<HttpResponse> {
    match serde_json::to_string(body) {
        Ok(body) => Response::builder()
            .status(status)
            .header(hyper::header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body))),
        Err(e) => log_and_create_http_response(
            &format!("Failed to encode response: {e}"),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
    }
}
