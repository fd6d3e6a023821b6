//! TCP ingestion server
//!
//! Node processes stream wire lines to the runner over plain TCP. Each
//! connection gets its own [`FrameAssembler`]: a read that fills the whole
//! threshold-sized buffer is a fragment and is held back, the next shorter
//! read completes the logical message. A message whose length is an exact
//! multiple of the threshold therefore only flushes on the connection's next
//! write or at EOF; node hosts pad such payloads with an extra newline.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;

use shared::protocol::FRAGMENT_THRESHOLD;
use shared::{process_debug, process_info, process_warn, ProcessId};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::traits::MessageRouter;

/// Pending bytes at which a fragment chain is flushed regardless of framing
pub const MAX_PENDING_BYTES: usize = 1024 * 1024;

/// Quiet time before an idle server counts as drained
pub const SETTLE_PERIOD: Duration = Duration::from_millis(100);

/// Per-connection reassembly buffer
#[derive(Debug)]
pub struct FrameAssembler {
    threshold: usize,
    max_pending: usize,
    pending: Vec<u8>,
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new(FRAGMENT_THRESHOLD, MAX_PENDING_BYTES)
    }
}

impl FrameAssembler {
    pub fn new(threshold: usize, max_pending: usize) -> Self {
        Self {
            threshold,
            max_pending,
            pending: Vec::new(),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Feed one received chunk; returns a logical message once one completes
    pub fn push(&mut self, chunk: &[u8]) -> Option<String> {
        self.pending.extend_from_slice(chunk);

        if chunk.len() < self.threshold {
            return self.take();
        }
        if self.pending.len() >= self.max_pending {
            process_warn!(
                ProcessId::current(),
                "⚠️ Fragment chain reached {} bytes without a terminating chunk, flushing",
                self.pending.len()
            );
            return self.take_complete();
        }
        None
    }

    /// Flush whatever is pending when the stream ends
    pub fn finish(&mut self) -> Option<String> {
        if !self.pending.is_empty() {
            process_warn!(
                ProcessId::current(),
                "⚠️ Connection closed with {} pending fragment bytes, flushing",
                self.pending.len()
            );
        }
        self.take()
    }

    /// Flush up to the last line break, or failing that the last whole UTF-8
    /// character; the remainder starts the next chain
    fn take_complete(&mut self) -> Option<String> {
        let cut = match self.pending.iter().rposition(|&b| b == b'\n') {
            Some(newline) => newline + 1,
            None => utf8_boundary(&self.pending),
        };
        if cut == 0 {
            return None;
        }
        let rest = self.pending.split_off(cut);
        let message = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending = rest;
        Some(message)
    }

    fn take(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let message = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(message)
    }
}

/// Length of `bytes` without a trailing, incomplete UTF-8 sequence
fn utf8_boundary(bytes: &[u8]) -> usize {
    match std::str::from_utf8(bytes) {
        Ok(_) => bytes.len(),
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        Err(_) => bytes.len(),
    }
}

/// Read one connection to EOF, routing every reassembled message
pub async fn handle_connection<R>(mut reader: R, peer: &str, router: &dyn MessageRouter)
where
    R: AsyncRead + Unpin,
{
    let mut assembler = FrameAssembler::default();
    let mut buffer = vec![0u8; assembler.threshold()];

    loop {
        match reader.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => {
                if let Some(message) = assembler.push(&buffer[..n]) {
                    router.route(message).await;
                }
            }
            Err(e) => {
                process_warn!(ProcessId::current(), "⚠️ Read from {} failed: {}", peer, e);
                break;
            }
        }
    }

    if let Some(message) = assembler.finish() {
        router.route(message).await;
    }
    process_debug!(ProcessId::current(), "🔌 Log source {} disconnected", peer);
}

enum IngestionCommand {
    BoundAddr {
        reply: oneshot::Sender<OrchestratorResult<SocketAddr>>,
    },
    Unbind {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to the running ingestion server
pub struct IngestionHandle {
    tx: mpsc::Sender<IngestionCommand>,
    active: watch::Receiver<usize>,
}

impl IngestionHandle {
    /// The bound address; waits for the bind to complete
    pub async fn bound_addr(&self) -> OrchestratorResult<SocketAddr> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(IngestionCommand::BoundAddr { reply })
            .await
            .map_err(|_| OrchestratorError::stopped("ingestion server"))?;
        rx.await.map_err(|_| OrchestratorError::stopped("ingestion server"))?
    }

    pub async fn bound_port(&self) -> OrchestratorResult<u16> {
        Ok(self.bound_addr().await?.port())
    }

    /// Wait until every log source has disconnected and no new one arrived
    /// for [`SETTLE_PERIOD`], up to `limit`.
    ///
    /// A node may connect, write and exit before its connection is accepted,
    /// so a zero count alone does not mean its lines were routed.
    pub async fn wait_idle(&self, limit: Duration) -> bool {
        let mut active = self.active.clone();
        let settled = async {
            loop {
                if active.wait_for(|count| *count == 0).await.is_err() {
                    return false;
                }
                tokio::time::sleep(SETTLE_PERIOD).await;
                match active.has_changed() {
                    Ok(false) => return true,
                    Ok(true) => continue,
                    Err(_) => return false,
                }
            }
        };
        tokio::time::timeout(limit, settled).await.unwrap_or(false)
    }

    /// Stop accepting, drop every connection, and wait for the server to finish
    pub async fn unbind(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(IngestionCommand::Unbind { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }
}

pub struct IngestionServer {
    address: String,
    router: Arc<dyn MessageRouter>,
    commands: mpsc::Receiver<IngestionCommand>,
    active: watch::Sender<usize>,
}

impl IngestionServer {
    /// Spawn the server; binding happens on the server task
    pub fn spawn(address: impl Into<String>, router: Arc<dyn MessageRouter>) -> IngestionHandle {
        let (tx, commands) = mpsc::channel(16);
        let (active, active_rx) = watch::channel(0usize);
        let server = Self {
            address: address.into(),
            router,
            commands,
            active,
        };
        tokio::spawn(server.run());
        IngestionHandle { tx, active: active_rx }
    }

    async fn run(mut self) {
        let mut waiters: Vec<oneshot::Sender<OrchestratorResult<SocketAddr>>> = Vec::new();

        let bind = TcpListener::bind(self.address.clone());
        tokio::pin!(bind);
        let listener = loop {
            tokio::select! {
                result = &mut bind => match result {
                    Ok(listener) => break listener,
                    Err(e) => {
                        let message = format!("cannot bind {}: {}", self.address, e);
                        for waiter in waiters.drain(..) {
                            let _ = waiter.send(Err(OrchestratorError::ingestion(message.clone())));
                        }
                        self.refuse_commands(message).await;
                        return;
                    }
                },
                command = self.commands.recv() => match command {
                    Some(IngestionCommand::BoundAddr { reply }) => waiters.push(reply),
                    Some(IngestionCommand::Unbind { reply }) => {
                        let _ = reply.send(());
                        return;
                    }
                    None => return,
                },
            }
        };

        let local = match listener.local_addr() {
            Ok(local) => local,
            Err(e) => {
                let message = format!("bound listener has no local address: {e}");
                for waiter in waiters.drain(..) {
                    let _ = waiter.send(Err(OrchestratorError::ingestion(message.clone())));
                }
                self.refuse_commands(message).await;
                return;
            }
        };
        process_info!(ProcessId::current(), "📡 Ingestion server listening on {}", local);
        for waiter in waiters.drain(..) {
            let _ = waiter.send(Ok(local));
        }

        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let _ = stream.set_nodelay(true);
                        self.active.send_modify(|count| *count += 1);
                        process_debug!(ProcessId::current(), "🔌 Log source connected from {}", peer);

                        let router = self.router.clone();
                        let active = self.active.clone();
                        connections.spawn(async move {
                            handle_connection(stream, &peer.to_string(), router.as_ref()).await;
                            active.send_modify(|count| *count = count.saturating_sub(1));
                        });
                    }
                    Err(e) => process_warn!(ProcessId::current(), "⚠️ Accept failed: {}", e),
                },
                command = self.commands.recv() => match command {
                    Some(IngestionCommand::BoundAddr { reply }) => {
                        let _ = reply.send(Ok(local));
                    }
                    Some(IngestionCommand::Unbind { reply }) => {
                        drop(listener);
                        connections.shutdown().await;
                        self.active.send_replace(0);
                        process_debug!(ProcessId::current(), "📴 Ingestion server on {} unbound", local);
                        let _ = reply.send(());
                        return;
                    }
                    None => break,
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        connections.shutdown().await;
    }

    /// After a failed bind: answer every request with the bind error until unbound
    async fn refuse_commands(&mut self, message: String) {
        while let Some(command) = self.commands.recv().await {
            match command {
                IngestionCommand::BoundAddr { reply } => {
                    let _ = reply.send(Err(OrchestratorError::ingestion(message.clone())));
                }
                IngestionCommand::Unbind { reply } => {
                    let _ = reply.send(());
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::MockMessageRouter;
    use std::sync::Mutex;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    /// Router that keeps every message it sees
    #[derive(Default)]
    struct Recorder {
        messages: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl MessageRouter for Recorder {
        async fn route(&self, message: String) {
            self.messages.lock().unwrap().push(message);
        }
    }

    #[test]
    fn test_short_chunk_is_a_whole_message() {
        let mut assembler = FrameAssembler::new(8, 64);
        assert_eq!(assembler.push(b"hello\n"), Some("hello\n".to_string()));
        assert_eq!(assembler.finish(), None);
    }

    #[test]
    fn test_pending_buffer_is_capped() {
        let mut assembler = FrameAssembler::new(4, 8);
        assert_eq!(assembler.push(b"aaaa"), None);
        assert_eq!(assembler.push(b"bbbb"), Some("aaaabbbb".to_string()));
    }

    #[test]
    fn test_capped_flush_keeps_split_characters_whole() {
        let mut assembler = FrameAssembler::new(4, 8);
        assert_eq!(assembler.push(b"aaaa"), None);
        // "é" is 0xC3 0xA9 and straddles the cap
        assert_eq!(assembler.push(b"bbb\xC3"), Some("aaaabbb".to_string()));
        assert_eq!(assembler.push(b"\xA9!"), Some("é!".to_string()));
        assert_eq!(assembler.finish(), None);
    }

    #[test]
    fn test_capped_flush_stops_at_the_last_line_break() {
        let mut assembler = FrameAssembler::new(4, 8);
        assert_eq!(assembler.push(b"ab\nc"), None);
        assert_eq!(assembler.push(b"dddd"), Some("ab\n".to_string()));
        assert_eq!(assembler.push(b"e\n"), Some("cdddde\n".to_string()));
    }

    #[test]
    fn test_exact_multiple_waits_for_eof() {
        let mut assembler = FrameAssembler::new(4, 64);
        assert_eq!(assembler.push(b"abcd"), None);
        assert_eq!(assembler.finish(), Some("abcd".to_string()));
    }

    #[tokio::test]
    async fn test_threshold_chunk_and_tail_reassemble_into_one_message() {
        let head = vec![b'x'; FRAGMENT_THRESHOLD];
        let tail = b"tail of the line\n";
        let reader = tokio_test::io::Builder::new().read(&head).read(tail).build();

        let mut router = MockMessageRouter::new();
        let mut expected = String::from_utf8(head.clone()).unwrap();
        expected.push_str("tail of the line\n");
        router
            .expect_route()
            .withf(move |message| *message == expected)
            .times(1)
            .returning(|_| ());

        handle_connection(reader, "test", &router).await;
    }

    #[tokio::test]
    async fn test_truncated_fragment_is_flushed_at_eof() {
        let head = vec![b'y'; FRAGMENT_THRESHOLD];
        let reader = tokio_test::io::Builder::new().read(&head).build();
        let router = Recorder::default();

        handle_connection(reader, "test", &router).await;

        let messages = router.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].len(), FRAGMENT_THRESHOLD);
    }

    #[tokio::test]
    async fn test_bound_port_and_round_trip_over_tcp() {
        let router = Arc::new(Recorder::default());
        let handle = IngestionServer::spawn("127.0.0.1:0", router.clone());

        let port = handle.bound_port().await.unwrap();
        assert_ne!(port, 0);
        assert_eq!(handle.bound_port().await.unwrap(), port);

        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream.write_all(b"[Node1:first][PASS] SampleTests.Sample\n").await.unwrap();
        stream.shutdown().await.unwrap();
        drop(stream);

        for _ in 0..100 {
            if !router.messages.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(handle.wait_idle(Duration::from_secs(5)).await);
        let messages = router.messages.lock().unwrap().clone();
        assert_eq!(messages, vec!["[Node1:first][PASS] SampleTests.Sample\n".to_string()]);

        handle.unbind().await;
        assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported_to_waiters() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = taken.local_addr().unwrap().to_string();

        let handle = IngestionServer::spawn(address, Arc::new(Recorder::default()));
        let error = handle.bound_addr().await.unwrap_err();
        assert!(matches!(error, OrchestratorError::IngestionError { .. }));

        handle.unbind().await;
    }
}
