//! Socket client for the tempo daemon: one connection per round trip,
//! the way a short-lived control client wants it, plus a long-lived
//! subscription stream for timer events.

use std::path::PathBuf;

use tempo_ipc::{read_message, write_message, Command, IpcError, Response, SOCKET_PATH};
use tokio::io::BufReader;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::time::{timeout, Duration};

/// Upper bound on a command round trip so a hung daemon can't wedge the
/// caller indefinitely.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// The facade's view of the controller: an async request/response call.
#[allow(async_fn_in_trait)]
pub trait ControllerLink {
    async fn request(&mut self, command: Command) -> Result<Response, IpcError>;

    /// Fire-and-forget push; no response is read.
    async fn notify(&mut self, command: Command) -> Result<(), IpcError>;
}

pub struct SocketLink {
    socket_path: PathBuf,
}

impl SocketLink {
    pub fn new() -> Self {
        Self {
            socket_path: SOCKET_PATH.into(),
        }
    }

    #[cfg(test)]
    fn at(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    async fn connect(&self) -> Result<UnixStream, IpcError> {
        UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused => {
                    IpcError::ConnectionRefused
                }
                _ => IpcError::Io(e),
            })
    }

    async fn round_trip(&self, command: Command) -> Result<Response, IpcError> {
        let stream = self.connect().await?;
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        write_message(&mut writer, &command).await?;
        match read_message::<_, Response>(&mut reader).await? {
            Some(response) => Ok(response),
            None => Err(IpcError::Io(std::io::ErrorKind::UnexpectedEof.into())),
        }
    }

    /// Open an event subscription. The returned stream yields raw JSON
    /// values: the receiving side validates payloads field by field and
    /// must not trust the wire shape.
    pub async fn subscribe(&self) -> Result<EventStream, IpcError> {
        let stream = self.connect().await?;
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        write_message(&mut writer, &Command::Subscribe).await?;
        // Consume the subscription ack; a peer that hangs up before
        // acking is an error here, not an empty event stream.
        match read_message::<_, Response>(&mut reader).await? {
            Some(_) => {}
            None => return Err(IpcError::Io(std::io::ErrorKind::UnexpectedEof.into())),
        }
        Ok(EventStream {
            reader,
            _writer: writer,
        })
    }
}

impl Default for SocketLink {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerLink for SocketLink {
    async fn request(&mut self, command: Command) -> Result<Response, IpcError> {
        timeout(REQUEST_TIMEOUT, self.round_trip(command))
            .await
            .map_err(|_| IpcError::Timeout)?
    }

    async fn notify(&mut self, command: Command) -> Result<(), IpcError> {
        let stream = self.connect().await?;
        let (_reader, mut writer) = stream.into_split();
        write_message(&mut writer, &command).await
    }
}

/// A live subscription to daemon events.
pub struct EventStream {
    reader: BufReader<OwnedReadHalf>,
    // Keeps the write half open so the daemon sees a connected peer.
    _writer: OwnedWriteHalf,
}

impl EventStream {
    /// Next event line, or `None` once the daemon closes the stream.
    pub async fn next(&mut self) -> Result<Option<serde_json::Value>, IpcError> {
        read_message(&mut self.reader).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    fn scratch_socket(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("tempoctl-{}-{}.sock", name, std::process::id()));
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn subscribe_fails_when_the_peer_closes_before_acking() {
        let path = scratch_socket("no-ack");
        let listener = UnixListener::bind(&path).unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, _writer) = stream.into_split();
            let mut reader = BufReader::new(reader);
            // Consume the subscribe line, then hang up without acking.
            let _ = read_message::<_, Command>(&mut reader).await;
        });

        let result = SocketLink::at(path.clone()).subscribe().await;
        assert!(matches!(result, Err(IpcError::Io(_))));
        server.await.unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn subscribe_consumes_the_ack_and_streams_events() {
        let path = scratch_socket("ack");
        let listener = UnixListener::bind(&path).unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut reader = BufReader::new(reader);
            let _ = read_message::<_, Command>(&mut reader).await;
            write_message(&mut writer, &Response::Ok).await.unwrap();
            write_message(
                &mut writer,
                &tempo_ipc::Event::Completed {
                    mode: tempo_ipc::TimerMode::Break,
                },
            )
            .await
            .unwrap();
        });

        let mut events = SocketLink::at(path.clone()).subscribe().await.unwrap();
        let event = events.next().await.unwrap().unwrap();
        // The ack was swallowed by subscribe(); the first line out of the
        // stream is the event itself.
        assert_eq!(event["event"], tempo_ipc::COMPLETED_EVENT);
        server.await.unwrap();
        let _ = std::fs::remove_file(&path);
    }
}
