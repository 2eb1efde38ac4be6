//! One connection's path through the room: `AwaitingName -> Active -> Terminated`.
//!
//! The reader side runs in the caller's task and turns inbound lines into
//! room operations. Once the client is admitted, a separate writer task
//! drains the member's outbound queue onto the stream. Whichever side fails
//! first removes the member, and removal (including eviction by the room)
//! stops both sides without waiting for pending writes.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    select,
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::{
    message::{Event, WELCOME},
    room::{Departure, MemberKey, Membership, Room},
    transport::{LineReader, LineWriter},
};

/// Drives a single client from the welcome prompt until disconnect.
///
/// Returns an error only when the welcome or roster line cannot be written;
/// disconnects and rejected names end the session normally.
pub async fn run_session<R, W>(room: Arc<Room>, reader: R, writer: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut lines = LineReader::new(reader);
    let mut writer = LineWriter::new(writer);

    writer
        .write_line(WELCOME)
        .await
        .context("failed to send welcome prompt")?;

    let Some(membership) = await_name(&room, &mut lines, &mut writer).await? else {
        close_writer(&mut writer).await;
        return Ok(());
    };

    let Membership {
        key,
        roster,
        inbox,
        departure,
    } = membership;
    if let Err(err) = writer.write_line(&roster.to_string()).await {
        room.leave(&key).await;
        return Err(err).context("failed to send roster");
    }

    let writer_task = spawn_writer(
        Arc::clone(&room),
        key.clone(),
        inbox,
        departure.clone(),
        writer,
    );
    run_active(&room, &key, &mut lines, departure, writer_task).await;

    Ok(())
}

/// Reads the candidate name and asks the room to admit it.
///
/// `None` means the session is over: the peer went away first, or the name
/// was refused and the client has been told why.
async fn await_name<R, W>(
    room: &Room,
    lines: &mut LineReader<R>,
    writer: &mut LineWriter<W>,
) -> Result<Option<Membership>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let name = match lines.read_line().await {
        Ok(Some(name)) => name,
        Ok(None) => {
            debug!("connection closed before a name was given");
            return Ok(None);
        }
        Err(err) => {
            debug!(error = ?err, "failed to read name");
            return Ok(None);
        }
    };

    match room.join(&name).await {
        Ok(membership) => Ok(Some(membership)),
        Err(err) => {
            debug!(name = %name, error = %err, "join refused");
            writer
                .write_line(&format!("* {err}"))
                .await
                .context("failed to send join rejection")?;
            Ok(None)
        }
    }
}

/// Relays every inbound line until the peer disconnects or the member is
/// removed from the room.
async fn run_active<R>(
    room: &Room,
    key: &MemberKey,
    lines: &mut LineReader<R>,
    mut departure: Departure,
    writer_task: JoinHandle<()>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        select! {
            line = lines.read_line() => match line {
                Ok(Some(text)) => {
                    if !room.broadcast(key, &text).await {
                        break;
                    }
                }
                Ok(None) => {
                    debug!(name = %key.name, "client closed the connection");
                    break;
                }
                Err(err) => {
                    debug!(name = %key.name, error = ?err, "failed to read from client");
                    break;
                }
            },
            _ = departure.wait() => {
                debug!(name = %key.name, "removed from the room");
                break;
            }
        }
    }

    // Removal wakes the writer's `Departure`, so it stops even mid-write.
    room.leave(key).await;
    if let Err(err) = writer_task.await {
        warn!(name = %key.name, error = ?err, "writer task failed");
    }
}

fn spawn_writer<W>(
    room: Arc<Room>,
    key: MemberKey,
    inbox: mpsc::Receiver<Event>,
    mut departure: Departure,
    writer: LineWriter<W>,
) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        select! {
            result = drain_inbox(inbox, writer) => {
                if let Err(err) = result {
                    debug!(name = %key.name, error = ?err, "failed to write to client");
                    room.leave(&key).await;
                }
            }
            // The stream is dropped without a flush; the client may be stalled.
            _ = departure.wait() => {}
        }
    })
}

async fn drain_inbox<W>(mut inbox: mpsc::Receiver<Event>, mut writer: LineWriter<W>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(event) = inbox.recv().await {
        writer.write_line(&event.to_string()).await?;
    }
    writer.shutdown().await?;
    Ok(())
}

async fn close_writer<W>(writer: &mut LineWriter<W>)
where
    W: AsyncWrite + Unpin,
{
    if let Err(err) = writer.shutdown().await {
        debug!(error = ?err, "failed to close connection cleanly");
    }
}
