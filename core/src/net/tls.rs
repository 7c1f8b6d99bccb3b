/*
 * tls.rs
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

//! TLS client decorator: wraps a connected TCP stream in a rustls client
//! session. Platform native certs first, webpki-roots as fallback.

use std::sync::Arc;
use std::sync::OnceLock;

use tokio::net::TcpStream;
use tokio_rustls::rustls::client::ClientConfig;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::RootCertStore;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::error::Error;

/// Build a root certificate store: platform native certs first, then
/// webpki-roots as fallback.
fn build_root_store() -> RootCertStore {
    let mut root_store = RootCertStore::empty();
    if let Ok(certs) = rustls_native_certs::load_native_certs() {
        for cert in certs {
            let _ = root_store.add(cert);
        }
    }
    if root_store.is_empty() {
        root_store.roots = webpki_roots::TLS_SERVER_ROOTS.iter().cloned().collect();
    }
    root_store
}

/// Default TLS client config (no client auth). Callers needing a client
/// certificate supply their own config on the transfer instead.
pub fn client_config() -> Arc<ClientConfig> {
    static CONFIG: OnceLock<Arc<ClientConfig>> = OnceLock::new();
    CONFIG
        .get_or_init(|| {
            let config = ClientConfig::builder()
                .with_root_certificates(build_root_store())
                .with_no_client_auth();
            Arc::new(config)
        })
        .clone()
}

/// Perform the TLS client handshake over an established TCP connection.
pub async fn connect_tls(
    host: &str,
    tcp: TcpStream,
    config: Option<Arc<ClientConfig>>,
) -> Result<TlsStream<TcpStream>, Error> {
    let server_name: ServerName<'static> = host
        .to_string()
        .try_into()
        .map_err(|_| Error::parse(format!("invalid TLS host name: {}", host)))?;
    let connector = TlsConnector::from(config.unwrap_or_else(client_config));
    connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| Error::io(format!("TLS handshake with {}: {}", host, e)))
}
