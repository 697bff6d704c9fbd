// HTTP/1.1 server adapter over hyper

use crate::{Error, HttpRequest, HttpResponse, Result, Service};
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::StatusCode;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Upper bound on connection draining after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// A bound listener that feeds requests into a [`Service`].
///
/// Handlers are synchronous, so each request runs on tokio's blocking pool.
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until the process exits, or until Ctrl-C when the service's
    /// config enables `graceful_shutdown`.
    pub async fn serve(self, service: Service) -> Result<()> {
        if service.config().graceful_shutdown {
            self.serve_with_shutdown(service, async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "Failed to listen for Ctrl-C");
                    std::future::pending::<()>().await;
                }
            })
            .await
        } else {
            self.serve_with_shutdown(service, std::future::pending())
                .await
        }
    }

    /// Serve until `signal` resolves, then stop accepting and drain open
    /// connections.
    pub async fn serve_with_shutdown<F>(self, service: Service, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let Server {
            listener,
            local_addr,
        } = self;
        let graceful = GracefulShutdown::new();
        let keep_alive = !service.config().disable_keepalive;
        tokio::pin!(signal);

        info!(addr = %local_addr, name = %service.config().name, "Server listening");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, remote) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "Failed to accept connection");
                            continue;
                        }
                    };

                    let service = service.clone();
                    let svc = service_fn(move |req: Request<Incoming>| {
                        let service = service.clone();
                        async move { Ok::<_, Infallible>(handle_request(req, remote, service).await) }
                    });

                    let conn = http1::Builder::new()
                        .keep_alive(keep_alive)
                        .serve_connection(TokioIo::new(stream), svc);
                    let conn = graceful.watch(conn);

                    tokio::spawn(async move {
                        if let Err(e) = conn.await {
                            debug!(remote = %remote, error = %e, "Connection closed with error");
                        }
                    });
                }
                _ = &mut signal => {
                    info!("Shutdown signal received, draining connections");
                    break;
                }
            }
        }

        drop(listener);

        tokio::select! {
            _ = graceful.shutdown() => info!("All connections drained"),
            _ = tokio::time::sleep(DRAIN_TIMEOUT) => {
                warn!(timeout = ?DRAIN_TIMEOUT, "Drain timeout reached, closing remaining connections")
            }
        }
        Ok(())
    }
}

async fn handle_request(
    req: Request<Incoming>,
    remote: SocketAddr,
    service: Service,
) -> Response<Full<Bytes>> {
    let config = service.config();
    let (parts, body) = req.into_parts();

    let collected = tokio::time::timeout(
        config.read_timeout,
        Limited::new(body, config.max_request_body_size).collect(),
    )
    .await;

    let body = match collected {
        Ok(Ok(collected)) => collected.to_bytes(),
        Ok(Err(e)) if e.is::<http_body_util::LengthLimitError>() => {
            debug!(remote = %remote, "Request body over limit");
            return rejected(&service, 413, "Request Entity Too Large");
        }
        Ok(Err(e)) => {
            debug!(remote = %remote, error = %e, "Failed to read request body");
            return rejected(&service, 400, "Bad Request");
        }
        Err(_) => {
            debug!(remote = %remote, "Request body read timed out");
            return rejected(&service, 408, "Request Timeout");
        }
    };

    let uri = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let mut request = HttpRequest::new(parts.method.as_str(), uri).with_body(body);
    request.remote_addr = Some(remote);

    for (name, value) in parts.headers.iter() {
        let Ok(value) = value.to_str() else {
            continue;
        };
        let merged = match request.header(name.as_str()) {
            Some(existing) => format!("{}, {}", existing, value),
            None => value.to_string(),
        };
        request.set_header(name.as_str(), merged);
    }
    if request.host().is_none() {
        if let Some(authority) = parts.uri.authority() {
            request.set_header("host", authority.as_str());
        }
    }

    let worker = service.clone();
    match tokio::task::spawn_blocking(move || worker.serve(request)).await {
        Ok(response) => into_hyper(response),
        Err(e) => {
            error!(error = %e, "Request task failed");
            rejected(&service, 500, "Internal Server Error")
        }
    }
}

/// Responses produced before the request reaches the engine still get the
/// service's default headers.
fn rejected(service: &Service, status: u16, text: &str) -> Response<Full<Bytes>> {
    let mut response = plain(status, text);
    service.finalize(&mut response, None);
    into_hyper(response)
}

fn plain(status: u16, text: &str) -> HttpResponse {
    HttpResponse::new(status)
        .with_header("content-type", crate::http::CONTENT_TYPE_TEXT)
        .with_body(text.as_bytes().to_vec())
}

fn into_hyper(response: HttpResponse) -> Response<Full<Bytes>> {
    let mut out = Response::new(Full::new(Bytes::from(response.body)));
    *out.status_mut() =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    for (name, value) in response.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                out.headers_mut().append(name, value);
            }
            _ => warn!(header = %name, "Dropping invalid response header"),
        }
    }
    out
}

impl From<Error> for HttpResponse {
    fn from(err: Error) -> Self {
        plain(err.status_code(), &err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_hyper_copies_status_and_headers() {
        let resp = HttpResponse::new(201)
            .with_header("x-id", "7")
            .with_body(b"made".to_vec());
        let out = into_hyper(resp);
        assert_eq!(out.status(), StatusCode::CREATED);
        assert_eq!(out.headers()["x-id"], "7");
    }

    #[test]
    fn test_invalid_status_becomes_500() {
        let out = into_hyper(HttpResponse::new(42));
        assert_eq!(out.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_rejected_response_has_default_headers() {
        let service = crate::Engine::default().handler().unwrap();
        let out = rejected(&service, 413, "Request Entity Too Large");
        assert_eq!(out.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(out.headers()["server"], "trellis");
        assert_eq!(out.headers()["content-type"], crate::http::CONTENT_TYPE_TEXT);
    }

    #[test]
    fn test_error_to_response() {
        let resp: HttpResponse = Error::Bind("bad body".into()).into();
        assert_eq!(resp.status, 400);
        assert!(resp.text().contains("bad body"));
    }
}
