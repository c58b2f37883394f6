//! In-process SSH bastion and PostgreSQL stand-ins for unit tests.

use async_trait::async_trait;
use russh::server::{self, Auth, Msg, Session};
use russh::Channel;
use russh_keys::key::KeyPair;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// A port on 127.0.0.1 with nothing listening.
pub(crate) fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

// =========================================================================
// PostgreSQL
// =========================================================================

/// How the fake database answers a startup message.
#[derive(Clone, Copy)]
pub(crate) enum PgReply {
    /// Complete the handshake, then read and discard until the client hangs up.
    Ready,
    /// Reject the login with SQLSTATE 28P01.
    BadPassword,
    /// Accept the socket and never answer.
    Silent,
}

/// A fake PostgreSQL server counting accepted connections.
pub(crate) struct FakePostgres {
    pub port: u16,
    accepts: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl FakePostgres {
    pub async fn start(reply: PgReply) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepts = Arc::new(AtomicUsize::new(0));

        let counter = accepts.clone();
        let task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve_postgres(socket, reply));
            }
        });

        Self { port, accepts, task }
    }

    /// Connections accepted so far.
    pub fn accepts(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }
}

impl Drop for FakePostgres {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_postgres(mut socket: TcpStream, reply: PgReply) {
    // Startup message: length (including itself), then the body.
    let Ok(len) = socket.read_i32().await else { return };
    let mut startup = vec![0u8; (len as usize).saturating_sub(4)];
    if socket.read_exact(&mut startup).await.is_err() {
        return;
    }

    match reply {
        PgReply::Ready => {
            let mut out = Vec::new();
            backend_message(&mut out, b'R', &0i32.to_be_bytes());
            backend_message(&mut out, b'Z', b"I");
            if socket.write_all(&out).await.is_err() {
                return;
            }
            let mut sink = [0u8; 1024];
            while matches!(socket.read(&mut sink).await, Ok(n) if n > 0) {}
        }
        PgReply::BadPassword => {
            let mut fields = Vec::new();
            for (tag, value) in [
                (b'S', "FATAL"),
                (b'V', "FATAL"),
                (b'C', "28P01"),
                (b'M', "password authentication failed for user \"app\""),
            ] {
                fields.push(tag);
                fields.extend_from_slice(value.as_bytes());
                fields.push(0);
            }
            fields.push(0);

            let mut out = Vec::new();
            backend_message(&mut out, b'E', &fields);
            let _ = socket.write_all(&out).await;
        }
        PgReply::Silent => {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
    }
}

fn backend_message(out: &mut Vec<u8>, tag: u8, body: &[u8]) {
    out.push(tag);
    out.extend_from_slice(&(body.len() as i32 + 4).to_be_bytes());
    out.extend_from_slice(body);
}

// =========================================================================
// SSH
// =========================================================================

/// Password accepted by [`FakeBastion`].
pub(crate) const BASTION_PASSWORD: &str = "bastion-pw";

/// An SSH server accepting [`BASTION_PASSWORD`] and forwarding
/// `direct-tcpip` channels to their requested target.
pub(crate) struct FakeBastion {
    pub port: u16,
    channels: Arc<AtomicUsize>,
    live_sessions: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl FakeBastion {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let channels = Arc::new(AtomicUsize::new(0));

        let config = Arc::new(server::Config {
            keys: vec![KeyPair::generate_ed25519()],
            auth_rejection_time: Duration::from_millis(10),
            ..Default::default()
        });

        let live_sessions = Arc::new(AtomicUsize::new(0));

        let counter = channels.clone();
        let live = live_sessions.clone();
        let task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let handler = BastionHandler { channels: counter.clone() };
                let config = config.clone();
                let live = live.clone();
                live.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    if let Ok(session) = server::run_stream(config, socket, handler).await {
                        let _ = session.await;
                    }
                    live.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        Self { port, channels, live_sessions, task }
    }

    /// Wait up to two seconds for every client session to end.
    pub async fn all_sessions_ended(&self) -> bool {
        for _ in 0..40 {
            if self.live_sessions.load(Ordering::SeqCst) == 0 {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    /// Forwarded channels opened so far.
    pub fn channels(&self) -> usize {
        self.channels.load(Ordering::SeqCst)
    }
}

impl Drop for FakeBastion {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct BastionHandler {
    channels: Arc<AtomicUsize>,
}

#[async_trait]
impl server::Handler for BastionHandler {
    type Error = russh::Error;

    async fn auth_password(&mut self, _user: &str, password: &str) -> Result<Auth, Self::Error> {
        if password == BASTION_PASSWORD {
            Ok(Auth::Accept)
        } else {
            Ok(Auth::Reject { proceed_with_methods: None })
        }
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let Ok(target) = TcpStream::connect((host_to_connect, port_to_connect as u16)).await else {
            return Ok(false);
        };
        self.channels.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            let mut upstream = Box::pin(target);
            let mut forwarded = Box::pin(channel.into_stream());
            let _ = tokio::io::copy_bidirectional(&mut forwarded, &mut upstream).await;
        });
        Ok(true)
    }
}
