//! Client-owned TCP transport.
//!
//! The bridge listens and the language server connects: a loopback listener is bound on
//! a random ephemeral port before the server process is launched, and the first
//! accepted connection becomes the JSON-RPC stream for the whole session.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::ops::RangeInclusive;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tracing::{debug, info};

/// IANA dynamic/private port range.
pub const EPHEMERAL_PORTS: RangeInclusive<u16> = 49152..=65535;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to listen on 127.0.0.1:{port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("failed to accept the language server connection on port {port}: {source}")]
    Accept {
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("language server did not connect to port {port} within {waited:?}")]
    AcceptTimeout { port: u16, waited: Duration },
}

/// Uniform draw between two bounds given in either order.
///
/// The draw covers `[min, max + 1)` and is clamped into `[min, max]`, so flooring the
/// result gives every integer in the range the same weight.
pub fn random_number(from: f64, to: f64) -> f64 {
    let low = from.min(to);
    let high = from.max(to);
    let value = low + rand::thread_rng().gen::<f64>() * (high - low + 1.0);
    value.clamp(low, high)
}

/// Pick the session port.
pub fn choose_port() -> u16 {
    let port = random_number(
        f64::from(*EPHEMERAL_PORTS.start()),
        f64::from(*EPHEMERAL_PORTS.end()),
    )
    .floor() as u16;
    port.clamp(*EPHEMERAL_PORTS.start(), *EPHEMERAL_PORTS.end())
}

/// Read and write halves of the accepted connection.
pub struct ServerStream {
    pub reader: OwnedReadHalf,
    pub writer: OwnedWriteHalf,
    pub peer: SocketAddr,
}

/// A bound loopback listener waiting for the language server.
pub struct ClientOwnedTcp {
    listener: TcpListener,
    port: u16,
}

impl ClientOwnedTcp {
    pub async fn bind(port: u16) -> Result<Self, TransportError> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))
            .await
            .map_err(|source| TransportError::Bind { port, source })?;
        // Port 0 asks the OS for a free port; report the one actually bound.
        let port = listener
            .local_addr()
            .map(|addr| addr.port())
            .map_err(|source| TransportError::Bind { port, source })?;
        debug!(port, "listening for the language server");
        Ok(Self { listener, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Wait for the first connection. The listener is dropped afterwards; only one
    /// connection is ever expected per session.
    pub async fn accept(self, timeout: Duration) -> Result<ServerStream, TransportError> {
        let port = self.port;
        let (stream, peer) = tokio::time::timeout(timeout, self.listener.accept())
            .await
            .map_err(|_| TransportError::AcceptTimeout {
                port,
                waited: timeout,
            })?
            .map_err(|source| TransportError::Accept { port, source })?;
        stream.set_nodelay(true).ok();
        info!(port, %peer, "language server connected");
        let (reader, writer) = stream.into_split();
        Ok(ServerStream {
            reader,
            writer,
            peer,
        })
    }
}
