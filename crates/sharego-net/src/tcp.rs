//! Tokio TCP adapters speaking u32-BE length-prefixed frames.
//!
//! The frame payloads are the ShareGo wire frames; the prefix is pure
//! transport framing. The server enforces the single-peer rule, the 64 KiB
//! frame cap, and retries the bind a few times after a quick restart.

use async_trait::async_trait;
use sharego_core::adapters::{
    LocalIpResolver, PeerAdapterEnds, PeerCommand, PeerEvent, PeerLink, WsClientAdapter,
    WsServerAdapter,
};
use sharego_core::config::{MAX_MESSAGE_SIZE, REBIND_ATTEMPTS, REBIND_DELAY, WS_CONNECT_TIMEOUT};
use sharego_core::error::TransportError;
use sharego_core::types::NetworkAddress;
use std::io::ErrorKind;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

/// Listening adapter. The advertised address uses the resolver's best local
/// IPv4 so QR payloads carry a reachable address rather than `0.0.0.0`.
pub struct TcpFrameServer {
    resolver: Arc<dyn LocalIpResolver>,
    accept_rx: Option<mpsc::UnboundedReceiver<PeerLink>>,
    stop_tx: Option<watch::Sender<bool>>,
}

impl TcpFrameServer {
    pub fn new(resolver: Arc<dyn LocalIpResolver>) -> Self {
        Self { resolver, accept_rx: None, stop_tx: None }
    }
}

#[async_trait]
impl WsServerAdapter for TcpFrameServer {
    async fn start(&mut self, port: u16) -> Result<NetworkAddress, TransportError> {
        let mut attempt = 0;
        let listener = loop {
            match TcpListener::bind(("0.0.0.0", port)).await {
                Ok(listener) => break listener,
                Err(err) if attempt + 1 < REBIND_ATTEMPTS => {
                    attempt += 1;
                    tracing::warn!("bind 0.0.0.0:{port} failed ({err}); retry {attempt}");
                    tokio::time::sleep(REBIND_DELAY).await;
                }
                Err(err) => return Err(TransportError::Adapter(err.to_string())),
            }
        };

        let bound_port = listener
            .local_addr()
            .map_err(|err| TransportError::Adapter(err.to_string()))?
            .port();
        let ip = self.resolver.local_ipv4().unwrap_or(Ipv4Addr::LOCALHOST);

        let (conn_tx, conn_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        self.accept_rx = Some(conn_rx);
        self.stop_tx = Some(stop_tx);
        tokio::spawn(accept_task(listener, conn_tx, stop_rx));

        Ok(NetworkAddress::new(ip, bound_port))
    }

    async fn accept(&mut self) -> Option<PeerLink> {
        self.accept_rx.as_mut()?.recv().await
    }

    async fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
        self.accept_rx = None;
    }
}

async fn accept_task(
    listener: TcpListener,
    conn_tx: mpsc::UnboundedSender<PeerLink>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let active = Arc::new(AtomicBool::new(false));
    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            accepted = listener.accept() => match accepted {
                Err(err) => tracing::warn!("accept failed: {err}"),
                Ok((stream, peer_addr)) => {
                    if active.swap(true, Ordering::SeqCst) {
                        // One peer at a time; extras are closed on the spot.
                        tracing::debug!("dropping extra connection from {peer_addr}");
                        drop(stream);
                        continue;
                    }
                    tracing::debug!("peer connected from {peer_addr}");
                    let (link, ends) = PeerLink::channel();
                    let active = active.clone();
                    tokio::spawn(async move {
                        run_stream(stream, ends).await;
                        active.store(false, Ordering::SeqCst);
                    });
                    if conn_tx.send(link).is_err() {
                        break;
                    }
                }
            },
        }
    }
}

/// Dialing adapter.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpFrameClient;

#[async_trait]
impl WsClientAdapter for TcpFrameClient {
    async fn connect(&self, addr: &NetworkAddress) -> Result<PeerLink, TransportError> {
        let connect = TcpStream::connect((addr.ip(), addr.port()));
        let stream = tokio::time::timeout(WS_CONNECT_TIMEOUT, connect)
            .await
            .map_err(|_| TransportError::ConnectionTimedOut)?
            .map_err(|err| TransportError::Adapter(err.to_string()))?;

        let (link, ends) = PeerLink::channel();
        tokio::spawn(run_stream(stream, ends));
        Ok(link)
    }
}

/// Drive one connected socket: reader task feeds peer events, this task
/// drains outbound commands until close.
async fn run_stream(stream: TcpStream, ends: PeerAdapterEnds) {
    let PeerAdapterEnds { mut commands, events } = ends;
    let (reader, mut writer) = stream.into_split();

    let read_events = events.clone();
    let read_task = tokio::spawn(async move {
        let mut reader = reader;
        loop {
            match read_frame(&mut reader).await {
                Ok(Some(frame)) => {
                    if read_events.send(PeerEvent::Frame(frame)).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::debug!("read failed: {err}");
                    break;
                }
            }
        }
        let _ = read_events.send(PeerEvent::Closed);
    });

    while let Some(command) = commands.recv().await {
        match command {
            PeerCommand::Frame(frame) => {
                if let Err(err) = write_frame(&mut writer, &frame).await {
                    tracing::debug!("write failed: {err}");
                    break;
                }
            }
            PeerCommand::Close => break,
        }
    }

    let _ = writer.shutdown().await;
    read_task.abort();
    let _ = events.send(PeerEvent::Closed);
}

/// Read one length-prefixed frame. `Ok(None)` on clean EOF. Oversized
/// frames are consumed and skipped without being surfaced.
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Option<Vec<u8>>> {
    loop {
        let mut len_buf = [0u8; 4];
        if let Err(err) = reader.read_exact(&mut len_buf).await {
            return if err.kind() == ErrorKind::UnexpectedEof { Ok(None) } else { Err(err) };
        }
        let len = u32::from_be_bytes(len_buf) as usize;

        if len > MAX_MESSAGE_SIZE {
            tracing::warn!("discarding oversized frame ({len} bytes)");
            let mut remaining = len;
            let mut sink = [0u8; 4096];
            while remaining > 0 {
                let chunk_len = remaining.min(sink.len());
                let n = reader.read(&mut sink[..chunk_len]).await?;
                if n == 0 {
                    return Ok(None);
                }
                remaining -= n;
            }
            continue;
        }

        let mut frame = vec![0u8; len];
        reader.read_exact(&mut frame).await?;
        return Ok(Some(frame));
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> std::io::Result<()> {
    writer.write_all(&(frame.len() as u32).to_be_bytes()).await?;
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frame_roundtrip_over_localhost() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let frame = read_frame(&mut stream).await.unwrap().unwrap();
            write_frame(&mut stream, &frame).await.unwrap();
        });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut stream, b"ping").await.unwrap();
        let echoed = read_frame(&mut stream).await.unwrap().unwrap();
        assert_eq!(echoed, b"ping");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn oversized_frames_are_skipped() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_frame(&mut stream).await.unwrap()
        });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let oversized = vec![0u8; MAX_MESSAGE_SIZE + 1];
        write_frame(&mut stream, &oversized).await.unwrap();
        write_frame(&mut stream, b"after").await.unwrap();

        assert_eq!(server.await.unwrap(), Some(b"after".to_vec()));
    }

    #[tokio::test]
    async fn second_connection_is_dropped() {
        struct FixedIp;
        impl LocalIpResolver for FixedIp {
            fn local_ipv4(&self) -> Option<Ipv4Addr> {
                Some(Ipv4Addr::LOCALHOST)
            }
        }

        let mut server = TcpFrameServer::new(Arc::new(FixedIp));
        let addr = server.start(0).await.unwrap();

        let first = TcpStream::connect((addr.ip(), addr.port())).await.unwrap();
        let link = server.accept().await.unwrap();

        // The second connection must be closed by the server side.
        let mut second = TcpStream::connect((addr.ip(), addr.port())).await.unwrap();
        let mut buf = [0u8; 1];
        match second.read(&mut buf).await {
            Ok(0) | Err(_) => {}
            Ok(n) => panic!("extra connection received {n} bytes"),
        }

        drop(first);
        drop(link);
        server.stop().await;
    }
}
