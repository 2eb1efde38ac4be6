use std::fmt;

/// First line every connection receives, before the name is read.
pub const WELCOME: &str = "Welcome to budgetchat! What shall I call you?";

/// Something that happened in the room, as seen by the other members.
///
/// `Display` renders the exact line written to the client (without the
/// trailing newline, which the transport appends).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Joined { name: String },
    Left { name: String },
    Said { name: String, text: String },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Joined { name } => write!(f, "* {name} has entered the room"),
            Event::Left { name } => write!(f, "* {name} has left the room"),
            Event::Said { name, text } => write!(f, "[{name}] {text}"),
        }
    }
}

/// Names of the members present when someone joined, in join order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterSnapshot {
    names: Vec<String>,
}

impl RosterSnapshot {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl fmt::Display for RosterSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "* The room contains: {}", self.names.join(", "))
    }
}
