//! Messages exchanged between clients and the server.
//!
//! Both directions are tagged as `{"event": <name>, "payload": <data>}`; the
//! event names are the contract with clients.
use serde::{Deserialize, Serialize};

use crate::model::{Hand, PlayerInfo};

/// Status sent to every member of a lobby when its round begins.
pub const GAME_STARTING: &str = "game is starting";

/// Every possible kind of request that a client may send.
///
/// Disconnection is not a request: it is the transport closing.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "event", content = "payload", rename_all = "lowercase")]
pub enum Request {
    /// Ask to be seated at the table this connection was opened for. The
    /// identity comes from the connection, so there is no payload.
    Register,
}

/// Every possible kind of response that a server may send.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "event", content = "payload", rename_all = "lowercase")]
pub enum Response {
    /// Someone joined the lobby; carries the whole membership, in the order
    /// members registered.
    Joined(Vec<PlayerInfo>),
    /// A member left the lobby.
    Left(PlayerInfo),
    /// A human-readable status about the round.
    GameUpdate(String),
    /// The recipient's own cards. Only ever sent to the owner.
    PlayerCards(Hand),
}
