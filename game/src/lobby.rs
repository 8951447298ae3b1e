//! Lobby membership for each table.
use std::collections::HashMap;
use std::sync::Arc;

use futures::channel::mpsc;
use futures::lock::Mutex;
use log::error;

use crate::model::{ConnectionId, Player, PlayerInfo, TableId, UserId};
use crate::protocol::Response;

/// The sender half for responses to a client.
pub type ResponseTx = mpsc::UnboundedSender<Response>;

/// The receiver half for responses to a client.
pub type ResponseRx = mpsc::UnboundedReceiver<Response>;

pub type Synced<T> = Arc<Mutex<T>>;

fn make_synced<T>(t: T) -> Synced<T> {
    Arc::new(Mutex::new(t))
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LobbyState {
    /// Collecting registrations until the table is full.
    Waiting,
    /// The table is full and cards are being dealt.
    Starting,
    /// Cards were dealt. The lobby accepts nothing further.
    InProgress,
}

/// A registered player, together with the means to reach their connection.
pub struct Member {
    player: Player,
    response_tx: ResponseTx,
}

impl Member {
    pub fn new(player: Player, response_tx: ResponseTx) -> Self {
        Member {
            player,
            response_tx,
        }
    }

    pub fn player(&self) -> &Player {
        &self.player
    }

    /// Queue a response for this member's connection.
    ///
    /// A closed connection only affects this member, so the failure is logged
    /// and otherwise ignored.
    pub fn send(&self, r: Response) {
        if let Err(e) = self.response_tx.unbounded_send(r) {
            error!(
                "while sending response to {}: {}",
                self.player.connection_id, e
            );
        }
    }
}

/// The membership and state of one table awaiting, or running, a round.
pub struct Lobby {
    table_id: TableId,
    members: Vec<Member>,
    state: LobbyState,
    retired: bool,
}

impl Lobby {
    pub fn new(table_id: TableId) -> Self {
        Lobby {
            table_id,
            members: vec![],
            state: LobbyState::Waiting,
            retired: false,
        }
    }

    pub fn table_id(&self) -> &TableId {
        &self.table_id
    }

    pub fn state(&self) -> LobbyState {
        self.state
    }

    pub fn set_state(&mut self, state: LobbyState) {
        self.state = state;
    }

    /// A retired lobby is no longer reachable from its table, and any change
    /// to it would be lost.
    pub fn is_retired(&self) -> bool {
        self.retired
    }

    pub fn retire(&mut self) {
        self.retired = true;
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// The public view of the membership, in registration order.
    pub fn member_list(&self) -> Vec<PlayerInfo> {
        self.members.iter().map(|m| m.player.info()).collect()
    }

    pub fn contains_user(&self, user_id: &UserId) -> bool {
        self.members.iter().any(|m| &m.player.user_id == user_id)
    }

    /// Add a member unless their user is already seated. Returns whether the
    /// membership changed.
    pub fn add_member(&mut self, member: Member) -> bool {
        if self.contains_user(&member.player.user_id) {
            false
        } else {
            self.members.push(member);
            true
        }
    }

    /// Remove the member behind the given connection, if any.
    pub fn remove_connection(&mut self, connection_id: ConnectionId) -> Option<Member> {
        let position = self
            .members
            .iter()
            .position(|m| m.player.connection_id == connection_id)?;
        Some(self.members.remove(position))
    }

    /// Queue a response for every member.
    pub fn broadcast(&self, r: &Response) {
        for m in self.members.iter() {
            m.send(r.clone());
        }
    }
}

/// The lobbies currently open, one per table.
pub struct Lobbies {
    lobbies: HashMap<TableId, Synced<Lobby>>,
}

impl Lobbies {
    pub fn new() -> Self {
        Lobbies {
            lobbies: HashMap::new(),
        }
    }

    /// Find the open lobby for a table, creating a fresh one if there is none.
    pub fn resolve(&mut self, table_id: &TableId) -> Synced<Lobby> {
        self.lobbies
            .entry(table_id.clone())
            .or_insert_with(|| make_synced(Lobby::new(table_id.clone())))
            .clone()
    }

    pub fn lookup(&self, table_id: &TableId) -> Option<Synced<Lobby>> {
        self.lobbies.get(table_id).cloned()
    }

    /// Detach a lobby from its table, but only if it is still the open one.
    pub fn remove(&mut self, table_id: &TableId, lobby: &Synced<Lobby>) {
        let current = match self.lobbies.get(table_id) {
            Some(current) => current,
            None => return,
        };
        if Arc::ptr_eq(current, lobby) {
            self.lobbies.remove(table_id);
        }
    }

    pub fn len(&self) -> usize {
        self.lobbies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lobbies.is_empty()
    }
}

impl Default for Lobbies {
    fn default() -> Self {
        Lobbies::new()
    }
}
