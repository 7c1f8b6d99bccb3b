/*
 * http_backend.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Gancio, an event-driven network server toolkit.
 *
 * Gancio is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Gancio is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Gancio.  If not, see <http://www.gnu.org/licenses/>.
 */

//! HTTP and HTTPS transfer backends: resolve, connect (TLS for https),
//! attach an HTTP client to the transport, send one request built by the
//! transfer, and map the response status onto the transfer result.
//! Redirect statuses restart the driver against the Location URL.

use std::rc::Rc;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio_rustls::rustls::client::ClientConfig;

use crate::error::Error;
use crate::http::client::HttpClient;
use crate::io::attach_pair;
use crate::net::tcp::{NetStream, Transport};
use crate::net::tls;
use crate::url::transfer::{TransferBackend, TransferResult, UrlTransfer};
use crate::url::Url;

/// Backend for `http` (and, with `secure`, `https`).
pub struct HttpBackend {
    secure: bool,
    tls_config: Option<Arc<ClientConfig>>,
}

impl HttpBackend {
    pub fn new(secure: bool) -> Self {
        Self {
            secure,
            tls_config: None,
        }
    }

    /// Use a caller-built rustls config (client certificates etc.).
    pub fn with_tls_config(config: Arc<ClientConfig>) -> Self {
        Self {
            secure: true,
            tls_config: Some(config),
        }
    }
}

impl TransferBackend for HttpBackend {
    fn scheme_name(&self) -> &'static str {
        if self.secure {
            "https"
        } else {
            "http"
        }
    }

    fn start(&self, transfer: &Rc<UrlTransfer>) {
        let secure = self.secure;
        let tls_config = self.tls_config.clone();
        transfer.resolve_address(move |transfer, addr| {
            let transfer = transfer.clone();
            let handle = transfer.handle();
            handle.spawn(async move {
                if transfer.is_done() {
                    return;
                }
                let url = transfer.url();
                let tcp = match TcpStream::connect(addr).await {
                    Ok(tcp) => tcp,
                    Err(e) => {
                        transfer.fail(
                            TransferResult::NoServer,
                            Error::io(format!("connect to {}: {}", addr, e)),
                        );
                        return;
                    }
                };
                let _ = tcp.set_nodelay(true);
                let net = if secure {
                    let host = url.host.clone().unwrap_or_default();
                    match tls::connect_tls(&host, tcp, tls_config).await {
                        Ok(tls) => NetStream::Tls(Box::new(tls)),
                        Err(e) => {
                            transfer.fail(TransferResult::NoServer, e);
                            return;
                        }
                    }
                } else {
                    NetStream::Plain(tcp)
                };
                if transfer.is_done() {
                    return;
                }
                run_protocol(&transfer, net);
            });
        });
    }
}

fn run_protocol(transfer: &Rc<UrlTransfer>, net: NetStream) {
    let transport = Transport::from_net(net);
    transfer.set_transport(transport.clone());
    let client = HttpClient::new();

    let (request, upload) = match transfer.build_request() {
        Ok(pair) => pair,
        Err(e) => {
            transfer.fail(TransferResult::BadRequest, e);
            return;
        }
    };

    let transfer_for_response = transfer.clone();
    let queued = client.request(request, upload, move |result| {
        dispatch_response(&transfer_for_response, result);
    });
    if let Err(e) = queued {
        transfer.fail(TransferResult::ServerError, e);
        return;
    }
    client.shutdown_when_done();
    if let Err(e) = attach_pair(client, transport) {
        transfer.fail(TransferResult::ServerError, e);
    }
}

fn dispatch_response(
    transfer: &Rc<UrlTransfer>,
    result: Result<(crate::http::response::Response, crate::io::StreamRef), Error>,
) {
    if transfer.is_done() {
        return;
    }
    let (response, body) = match result {
        Ok(pair) => pair,
        Err(e) => {
            // The connection died with no response produced.
            let result = if e.kind() == crate::error::ErrorKind::Cancelled {
                TransferResult::Cancelled
            } else {
                TransferResult::ServerError
            };
            transfer.fail(result, e);
            return;
        }
    };
    let status = response.status_code;
    match status {
        200..=299 => transfer.succeed(Some(response), body),
        301 | 302 | 303 | 307 => {
            let Some(location) = response.location.clone() else {
                transfer.fail(
                    TransferResult::ServerError,
                    Error::protocol(format!("{} response without Location", status)),
                );
                return;
            };
            let current = transfer.url();
            match Url::new_relative(&current, &location) {
                Ok(target) => transfer.handle_redirect(target, status == 301),
                Err(e) => transfer.fail(TransferResult::BadRequest, e),
            }
        }
        400..=499 => transfer.fail(
            TransferResult::NotFound,
            Error::protocol(format!("HTTP status {}", status)),
        ),
        500..=599 => transfer.fail(
            TransferResult::ServerError,
            Error::protocol(format!("HTTP status {}", status)),
        ),
        _ => transfer.fail(
            TransferResult::Unsupported,
            Error::protocol(format!("unhandled HTTP status {}", status)),
        ),
    }
}
