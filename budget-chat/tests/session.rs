use std::{
    io,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    task::{Context, Poll},
    time::Duration,
};

use anyhow::{Result, anyhow};
use budget_chat::{message::WELCOME, room::Room, session::run_session};
use tokio::{
    io::{
        AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf,
    },
    task::JoinHandle,
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(2);

struct TestClient {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
    session: JoinHandle<Result<()>>,
}

/// Server-side writer that starts failing once `broken` is set, while the
/// read direction of the same connection keeps working.
struct BreakableWriter {
    inner: WriteHalf<DuplexStream>,
    broken: Arc<AtomicBool>,
}

impl BreakableWriter {
    fn check(&self) -> io::Result<()> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer unreachable"));
        }
        Ok(())
    }
}

impl AsyncWrite for BreakableWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if let Err(err) = this.check() {
            return Poll::Ready(Err(err));
        }
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Err(err) = this.check() {
            return Poll::Ready(Err(err));
        }
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl TestClient {
    fn connect(room: &Arc<Room>) -> Self {
        Self::connect_with_buffer(room, 4096)
    }

    fn connect_with_buffer(room: &Arc<Room>, buffer: usize) -> Self {
        let (client, server) = tokio::io::duplex(buffer);
        let (server_reader, server_writer) = tokio::io::split(server);
        let session = tokio::spawn(run_session(Arc::clone(room), server_reader, server_writer));
        Self::from_parts(client, session)
    }

    fn connect_breakable(room: &Arc<Room>) -> (Self, Arc<AtomicBool>) {
        let (client, server) = tokio::io::duplex(4096);
        let (server_reader, server_writer) = tokio::io::split(server);
        let broken = Arc::new(AtomicBool::new(false));
        let writer = BreakableWriter {
            inner: server_writer,
            broken: Arc::clone(&broken),
        };
        let session = tokio::spawn(run_session(Arc::clone(room), server_reader, writer));
        (Self::from_parts(client, session), broken)
    }

    fn from_parts(client: DuplexStream, session: JoinHandle<Result<()>>) -> Self {
        let (reader, writer) = tokio::io::split(client);
        Self {
            reader: BufReader::new(reader),
            writer,
            session,
        }
    }

    async fn send(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        let bytes = timeout(READ_TIMEOUT, self.reader.read_line(&mut line)).await??;
        if bytes == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    async fn expect_line(&mut self) -> Result<String> {
        self.recv()
            .await?
            .ok_or_else(|| anyhow!("connection closed unexpectedly"))
    }

    async fn join(room: &Arc<Room>, name: &str) -> Result<(Self, String)> {
        Self::connect(room).admit(name).await
    }

    async fn admit(mut self, name: &str) -> Result<(Self, String)> {
        assert_eq!(self.expect_line().await?, WELCOME);
        self.send(name).await?;
        let roster = self.expect_line().await?;
        Ok((self, roster))
    }
}

#[tokio::test]
async fn prompts_for_a_name_on_connect() -> Result<()> {
    let room = Arc::new(Room::new());
    let mut client = TestClient::connect(&room);

    assert_eq!(
        client.expect_line().await?,
        "Welcome to budgetchat! What shall I call you?"
    );
    Ok(())
}

#[tokio::test]
async fn illegal_name_is_rejected_and_disconnected() -> Result<()> {
    let room = Arc::new(Room::new());
    let (_watcher, _) = TestClient::join(&room, "watcher").await?;

    let mut client = TestClient::connect(&room);
    client.expect_line().await?;
    client.send("under_scored").await?;

    assert_eq!(
        client.expect_line().await?,
        "* Illegal name provided, disconnecting!"
    );
    assert_eq!(client.recv().await?, None);
    timeout(READ_TIMEOUT, client.session).await???;

    assert_eq!(room.roster().await.names(), ["watcher"]);
    Ok(())
}

#[tokio::test]
async fn duplicate_name_is_rejected_and_disconnected() -> Result<()> {
    let room = Arc::new(Room::new());
    let (_alice, _) = TestClient::join(&room, "alice").await?;

    let mut imposter = TestClient::connect(&room);
    imposter.expect_line().await?;
    imposter.send("alice").await?;

    assert_eq!(
        imposter.expect_line().await?,
        "* Name already in use, disconnecting!"
    );
    assert_eq!(imposter.recv().await?, None);
    Ok(())
}

#[tokio::test]
async fn closing_before_naming_leaves_no_trace() -> Result<()> {
    let room = Arc::new(Room::new());
    let mut client = TestClient::connect(&room);
    client.expect_line().await?;
    client.writer.shutdown().await?;

    timeout(READ_TIMEOUT, client.session).await???;
    assert!(room.roster().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn trailing_whitespace_is_stripped_from_names_and_messages() -> Result<()> {
    let room = Arc::new(Room::new());
    let (mut alice, roster) = TestClient::join(&room, "alice \r").await?;
    assert_eq!(roster, "* The room contains: ");

    let (mut bob, roster) = TestClient::join(&room, "bob").await?;
    assert_eq!(roster, "* The room contains: alice");
    assert_eq!(alice.expect_line().await?, "* bob has entered the room");

    alice.send("hi bob   \r").await?;
    assert_eq!(bob.expect_line().await?, "[alice] hi bob");
    Ok(())
}

#[tokio::test]
async fn disconnect_is_announced_and_cleans_up() -> Result<()> {
    let room = Arc::new(Room::new());
    let (mut alice, _) = TestClient::join(&room, "alice").await?;
    let (bob, _) = TestClient::join(&room, "bob").await?;
    assert_eq!(alice.expect_line().await?, "* bob has entered the room");

    let TestClient {
        reader,
        writer,
        session,
    } = bob;
    drop(writer);
    drop(reader);

    assert_eq!(alice.expect_line().await?, "* bob has left the room");
    timeout(READ_TIMEOUT, session).await???;
    assert_eq!(room.roster().await.names(), ["alice"]);

    // The name is free again.
    let (_bob_again, roster) = TestClient::join(&room, "bob").await?;
    assert_eq!(roster, "* The room contains: alice");
    Ok(())
}

#[tokio::test]
async fn sender_does_not_hear_its_own_message() -> Result<()> {
    let room = Arc::new(Room::new());
    let (mut alice, _) = TestClient::join(&room, "alice").await?;
    let (mut bob, _) = TestClient::join(&room, "bob").await?;
    assert_eq!(alice.expect_line().await?, "* bob has entered the room");

    alice.send("first").await?;
    assert_eq!(bob.expect_line().await?, "[alice] first");
    bob.send("second").await?;

    // The next thing alice sees is bob's reply, not an echo of her own line.
    assert_eq!(alice.expect_line().await?, "[bob] second");
    Ok(())
}

#[tokio::test]
async fn stalled_client_is_evicted_and_disconnected() -> Result<()> {
    let room = Arc::new(Room::with_queue_capacity(2));
    // A tiny pipe fills after a few lines, so the writer blocks mid-write.
    let (mut slow, _) = TestClient::connect_with_buffer(&room, 64)
        .admit("slow")
        .await?;
    let (mut fast, _) = TestClient::join(&room, "fast").await?;

    for i in 0..50 {
        fast.send(&format!("line {i}")).await?;
    }

    assert_eq!(fast.expect_line().await?, "* slow has left the room");
    timeout(READ_TIMEOUT, &mut slow.session).await???;
    assert_eq!(room.roster().await.names(), ["fast"]);

    // Whatever made it into the pipe is readable, then the connection is closed.
    while slow.recv().await?.is_some() {}

    // The evicted session's own cleanup announces nothing further.
    let (_late, roster) = TestClient::join(&room, "late").await?;
    assert_eq!(roster, "* The room contains: fast");
    assert_eq!(fast.expect_line().await?, "* late has entered the room");
    Ok(())
}

#[tokio::test]
async fn write_failure_alone_ends_the_session_once() -> Result<()> {
    let room = Arc::new(Room::new());
    let (mut alice, _) = TestClient::join(&room, "alice").await?;
    let (client, broken) = TestClient::connect_breakable(&room);
    let (mut bob, _) = client.admit("bob").await?;
    assert_eq!(alice.expect_line().await?, "* bob has entered the room");

    // Bob's inbound side stays open; only writes to him fail from here on.
    broken.store(true, Ordering::SeqCst);
    alice.send("anyone there?").await?;

    assert_eq!(alice.expect_line().await?, "* bob has left the room");
    timeout(READ_TIMEOUT, &mut bob.session).await???;
    assert_eq!(room.roster().await.names(), ["alice"]);

    // No second departure shows up ahead of the next announcement.
    let (_carol, roster) = TestClient::join(&room, "carol").await?;
    assert_eq!(roster, "* The room contains: alice");
    assert_eq!(alice.expect_line().await?, "* carol has entered the room");
    Ok(())
}
