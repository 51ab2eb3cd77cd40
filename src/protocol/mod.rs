pub mod messages;
pub mod time;
pub mod wire;

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use anyhow::anyhow;

/// A logical message never spans datagrams, so this is the protocol's hard
/// upper bound on message size (the UDP payload limit).
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Invocation semantics, fixed at process start on both sides.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum Semantics {
    AtLeastOnce,
    AtMostOnce,
}

impl FromStr for Semantics {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "at-least-once" => Ok(Semantics::AtLeastOnce),
            "at-most-once" => Ok(Semantics::AtMostOnce),
            _ => Err(anyhow!("semantics must be 'at-least-once' or 'at-most-once', got '{}'", s)),
        }
    }
}

impl Display for Semantics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Semantics::AtLeastOnce => write!(f, "at-least-once"),
            Semantics::AtMostOnce => write!(f, "at-most-once"),
        }
    }
}
