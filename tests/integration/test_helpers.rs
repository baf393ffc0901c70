//! Shared fixtures for session server tests.

use std::net::SocketAddr;
use std::time::Duration;

use ci_connection::session::{EnvSource, SessionPhase, SessionServer, SessionTimeouts, Termination};
use ci_connection::{ConnectionConfig, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Server timeout check cadence used by the tests.
pub const TICK: Duration = Duration::from_millis(20);

/// A session server running on an ephemeral loopback port.
pub struct RunningServer {
    pub addr: SocketAddr,
    pub phase: watch::Receiver<SessionPhase>,
    pub cancel: CancellationToken,
    pub handle: JoinHandle<Result<Termination>>,
}

impl RunningServer {
    /// Wait for the server loop to finish, failing the test after `limit`.
    pub async fn finish_within(self, limit: Duration) -> Termination {
        tokio::time::timeout(limit, self.handle)
            .await
            .expect("server finished in time")
            .expect("server task joined")
            .expect("server ran")
    }

    /// Wait until the published phase equals `phase`.
    pub async fn wait_for_phase(&mut self, phase: SessionPhase) {
        tokio::time::timeout(Duration::from_secs(2), self.phase.wait_for(|p| *p == phase))
            .await
            .expect("phase reached in time")
            .expect("phase channel open");
    }
}

/// Start a server with the given timeouts and environment source.
pub async fn start_server(
    initial: Duration,
    reconnect: Duration,
    env_source: EnvSource,
) -> RunningServer {
    let loopback: SocketAddr = "127.0.0.1:0".parse().expect("loopback addr");
    let server = SessionServer::bind(loopback, &ConnectionConfig::default())
        .await
        .expect("bind")
        .with_tick(TICK)
        .with_timeouts(SessionTimeouts { initial, reconnect })
        .with_env_source(env_source);

    let addr = server.local_addr().expect("local addr");
    let phase = server.subscribe();
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(server.run(cancel.clone()));

    RunningServer {
        addr,
        phase,
        cancel,
        handle,
    }
}

/// Send raw bytes on a fresh connection and read until the server closes it.
pub async fn exchange(addr: SocketAddr, payload: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    stream
        .write_all(payload.as_bytes())
        .await
        .expect("write");
    let mut reply = String::new();
    tokio::time::timeout(Duration::from_secs(2), stream.read_to_string(&mut reply))
        .await
        .expect("server closed the connection in time")
        .expect("read");
    reply
}
