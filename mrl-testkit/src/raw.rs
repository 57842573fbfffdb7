//! Bare TCP endpoints that misbehave below the HTTP layer, for exercising
//! transport error handling.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Head announces 200 body bytes; far fewer follow before the close.
const TRUNCATED_RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\n\
Content-Type: application/json\r\n\
Content-Length: 200\r\n\
Connection: close\r\n\
\r\n\
{\"status\":\"RUN";

const GARBAGE_RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\n\
Content-Type: application/json\r\n\
Content-Length: 8\r\n\
Connection: close\r\n\
\r\n\
not json";

#[derive(Debug, Clone, Copy)]
enum Behaviour {
    Truncate,
    Stall,
    Garbage,
}

/// A listener on `127.0.0.1` that answers every request the same broken
/// way. Stops when dropped.
pub struct RawServer {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl RawServer {
    /// Sends a response head promising a longer body than it delivers, then
    /// closes the connection.
    pub async fn truncating() -> std::io::Result<Self> {
        Self::start(Behaviour::Truncate).await
    }

    /// Reads requests but never answers, holding connections open.
    pub async fn stalling() -> std::io::Result<Self> {
        Self::start(Behaviour::Stall).await
    }

    /// Sends a complete `200` response whose body is not JSON.
    pub async fn garbage() -> std::io::Result<Self> {
        Self::start(Behaviour::Garbage).await
    }

    async fn start(behaviour: Behaviour) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let connections = Arc::new(AtomicUsize::new(0));

        let task = tokio::spawn(serve(listener, behaviour, connections.clone()));

        Ok(Self {
            addr,
            connections,
            task,
        })
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for RawServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(listener: TcpListener, behaviour: Behaviour, connections: Arc<AtomicUsize>) {
    let mut held = vec![];

    while let Ok((mut stream, _)) = listener.accept().await {
        connections.fetch_add(1, Ordering::SeqCst);
        read_head(&mut stream).await;

        let response = match behaviour {
            Behaviour::Stall => {
                held.push(stream);
                continue;
            }
            Behaviour::Truncate => TRUNCATED_RESPONSE,
            Behaviour::Garbage => GARBAGE_RESPONSE,
        };

        let _ = stream.write_all(response).await;
        let _ = stream.shutdown().await;
    }
}

/// Consume the request line and headers.
async fn read_head(stream: &mut TcpStream) {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];

    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
}
