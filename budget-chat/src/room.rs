//! Membership registry and event fan-out.
//!
//! Every join, leave and chat line goes through one `tokio::sync::Mutex`, so
//! all members observe the same global order of events. The lock only ever
//! covers bookkeeping and non-blocking `try_send` calls into each member's
//! bounded outbound queue; writing to sockets happens in the sessions' own
//! writer tasks.

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU64, Ordering},
};

use thiserror::Error;
use tokio::sync::{
    Mutex,
    mpsc::{self, error::TrySendError},
    watch,
};
use tracing::{debug, info, warn};

use crate::message::{Event, RosterSnapshot};

/// Outbound queue depth used when none is configured.
pub const DEFAULT_QUEUE_CAPACITY: usize = 128;

pub type MemberId = u64;

/// Why a join was refused. The `Display` text is what the client is told.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum JoinError {
    #[error("Illegal name provided, disconnecting!")]
    InvalidName,
    #[error("Name already in use, disconnecting!")]
    NameTaken,
}

/// Identifies one successful join.
///
/// Names can be reused once their holder leaves, so removal goes by `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberKey {
    pub id: MemberId,
    pub name: String,
}

/// Everything a session needs after being admitted to the room.
#[derive(Debug)]
pub struct Membership {
    pub key: MemberKey,
    /// Members present at the moment of joining, excluding the joiner.
    pub roster: RosterSnapshot,
    /// Events addressed to this member. Closes when the member is removed.
    pub inbox: mpsc::Receiver<Event>,
    pub departure: Departure,
}

/// Resolves once the member is no longer in the room, whether it left on
/// its own or was evicted.
///
/// Unlike the inbox, this fires immediately and does not wait for queued
/// events to be consumed, so a session can stop writing to a client that
/// has stalled.
#[derive(Debug, Clone)]
pub struct Departure(watch::Receiver<()>);

impl Departure {
    pub async fn wait(&mut self) {
        // Nothing is ever sent; the channel only closes when the member is dropped.
        while self.0.changed().await.is_ok() {}
    }
}

struct Member {
    id: MemberId,
    name: String,
    outbox: mpsc::Sender<Event>,
    // Dropped together with the member, which wakes every `Departure`.
    _presence: watch::Sender<()>,
}

pub struct Room {
    // Kept in join order so rosters are reproducible.
    members: Mutex<Vec<Member>>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl Default for Room {
    fn default() -> Self {
        Self::new()
    }
}

impl Room {
    pub fn new() -> Self {
        Self::with_queue_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Creates a room whose members buffer at most `capacity` undelivered
    /// events before being disconnected.
    pub fn with_queue_capacity(capacity: usize) -> Self {
        Self {
            members: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            queue_capacity: capacity.max(1),
        }
    }

    fn next_id(&self) -> MemberId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Admits `name` to the room.
    ///
    /// The roster is captured and the member registered under the same lock
    /// acquisition, so the joiner hears about everyone exactly once: either
    /// in the roster or through a later `Joined` event.
    pub async fn join(&self, name: &str) -> Result<Membership, JoinError> {
        validate_name(name)?;

        let mut members = self.members.lock().await;
        if members.iter().any(|member| member.name == name) {
            return Err(JoinError::NameTaken);
        }

        let roster = RosterSnapshot::new(members.iter().map(|m| m.name.clone()).collect());
        let key = MemberKey {
            id: self.next_id(),
            name: name.to_string(),
        };
        let (outbox, inbox) = mpsc::channel(self.queue_capacity);
        let (presence, departure) = watch::channel(());
        members.push(Member {
            id: key.id,
            name: key.name.clone(),
            outbox,
            _presence: presence,
        });

        info!(name, present = roster.len(), "member joined");
        deliver(
            &mut members,
            Event::Joined {
                name: key.name.clone(),
            },
            Some(key.id),
        );

        Ok(Membership {
            key,
            roster,
            inbox,
            departure: Departure(departure),
        })
    }

    /// Removes the member if it is still present and tells everyone else.
    ///
    /// Returns `false` when the member was already gone, in which case
    /// nothing is emitted.
    pub async fn leave(&self, key: &MemberKey) -> bool {
        let mut members = self.members.lock().await;
        let Some(position) = members.iter().position(|member| member.id == key.id) else {
            return false;
        };

        members.remove(position);
        info!(name = %key.name, "member left");
        deliver(
            &mut members,
            Event::Left {
                name: key.name.clone(),
            },
            None,
        );
        true
    }

    /// Relays `text` from `sender` to every other member.
    ///
    /// Returns `false` without emitting anything if the sender is no longer
    /// a member.
    pub async fn broadcast(&self, sender: &MemberKey, text: &str) -> bool {
        let mut members = self.members.lock().await;
        if !members.iter().any(|member| member.id == sender.id) {
            debug!(name = %sender.name, "dropping message from departed member");
            return false;
        }

        deliver(
            &mut members,
            Event::Said {
                name: sender.name.clone(),
                text: text.to_string(),
            },
            Some(sender.id),
        );
        true
    }

    /// Names of the current members in join order.
    pub async fn roster(&self) -> RosterSnapshot {
        let members = self.members.lock().await;
        RosterSnapshot::new(members.iter().map(|m| m.name.clone()).collect())
    }
}

/// Enqueues `event` for every member except `skip`.
///
/// Members whose queue is full or whose session has gone away are removed on
/// the spot, and their departure is announced to the rest in turn.
fn deliver(members: &mut Vec<Member>, event: Event, skip: Option<MemberId>) {
    let mut pending = VecDeque::from([(event, skip)]);

    while let Some((event, skip)) = pending.pop_front() {
        members.retain(|member| {
            if Some(member.id) == skip {
                return true;
            }
            match member.outbox.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!(name = %member.name, "outbound queue full, disconnecting member");
                    pending.push_back((
                        Event::Left {
                            name: member.name.clone(),
                        },
                        None,
                    ));
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(name = %member.name, "member session already gone");
                    pending.push_back((
                        Event::Left {
                            name: member.name.clone(),
                        },
                        None,
                    ));
                    false
                }
            }
        });
    }
}

/// Names are one or more ASCII letters or digits.
pub fn validate_name(name: &str) -> Result<(), JoinError> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(JoinError::InvalidName);
    }
    Ok(())
}
