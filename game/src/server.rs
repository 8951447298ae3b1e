//! The core business logic of the server.
use std::default::Default;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use futures::lock::Mutex;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;

use crate::deck::{self, Deck};
use crate::lobby::{Lobbies, Lobby, LobbyState, Member, ResponseTx};
use crate::model::{ConnectionId, Identity, Player, PlayerInfo, TableId};
use crate::protocol;

pub struct Core {
    settings: Settings,
    next_connection_id: AtomicU64,
    games_started: AtomicUsize,
    lobbies: Mutex<Lobbies>,
    rng: Mutex<StdRng>,
}

#[derive(Copy, Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// How many registered players it takes to start a round.
    pub table_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self { table_size: 4 }
    }
}

/// The outcome of a registration.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Registration {
    /// The player was added; carries the membership after the change.
    Joined(Vec<PlayerInfo>),
    /// The player's user was already seated, so nothing changed.
    AlreadySeated(Vec<PlayerInfo>),
}

impl Registration {
    pub fn members(&self) -> &[PlayerInfo] {
        match self {
            Registration::Joined(members) | Registration::AlreadySeated(members) => members,
        }
    }
}

impl Core {
    /// Create a new, empty server core.
    pub fn new(settings: Settings) -> Self {
        Core::with_rng(settings, StdRng::from_entropy())
    }

    /// Create a new, empty server core that shuffles with the given source.
    pub fn with_rng(settings: Settings, rng: StdRng) -> Self {
        Core {
            settings,
            next_connection_id: AtomicU64::new(0),
            games_started: AtomicUsize::new(0),
            lobbies: Mutex::new(Lobbies::new()),
            rng: Mutex::new(rng),
        }
    }

    /// The number of rounds dealt so far.
    pub fn games_started(&self) -> usize {
        self.games_started.load(Ordering::Acquire)
    }

    /// Accept a new, authenticated connection for a table.
    ///
    /// The response channel should have a consumer that somehow delivers the
    /// responses to the client. In the actual server, this would involve
    /// serializing and writing the response to a WebSocket; in a test, the
    /// client would have the receiving channel.
    ///
    /// The returned context provides the client-handling task the means to
    /// execute incoming requests.
    pub fn connect(
        &self,
        identity: Identity,
        table_id: TableId,
        response_tx: ResponseTx,
    ) -> Context<'_> {
        let connection_id = ConnectionId(self.next_connection_id.fetch_add(1, Ordering::SeqCst));
        Context::new(self, Player::new(identity, connection_id), table_id, response_tx)
    }

    /// Seat a player at a table, starting the round if that fills it.
    pub async fn register(&self, table_id: &TableId, member: Member) -> Registration {
        loop {
            let lobby = self.lobbies.lock().await.resolve(table_id);
            let mut guard = lobby.lock().await;
            // Someone finished or emptied this lobby between the lookup and
            // the lock; the table has a new one by now.
            if guard.is_retired() {
                continue;
            }

            let connection_id = member.player().connection_id;
            if !guard.add_member(member) {
                debug!("{} already seated at {}", connection_id, table_id);
                return Registration::AlreadySeated(guard.member_list());
            }
            let members = guard.member_list();
            info!("{} joined {} ({} seated)", connection_id, table_id, members.len());
            guard.broadcast(&protocol::Response::Joined(members.clone()));

            if guard.state() == LobbyState::Waiting && guard.size() >= self.settings.table_size {
                guard.set_state(LobbyState::Starting);
                match self.start(&mut guard).await {
                    Ok(()) => {
                        guard.retire();
                        self.lobbies.lock().await.remove(table_id, &lobby);
                    }
                    Err(e) => {
                        warn!("could not start {}: {}", table_id, e);
                        guard.set_state(LobbyState::Waiting);
                        guard.broadcast(&protocol::Response::GameUpdate(format!(
                            "game could not start: {}",
                            e
                        )));
                    }
                }
            }
            return Registration::Joined(members);
        }
    }

    /// Remove whoever is seated behind a connection. Unknown connections are
    /// ignored, since a disconnect may race with registration.
    pub async fn unregister(&self, table_id: &TableId, connection_id: ConnectionId) {
        let lobby = match self.lobbies.lock().await.lookup(table_id) {
            Some(lobby) => lobby,
            None => return,
        };
        let mut guard = lobby.lock().await;
        if guard.is_retired() {
            return;
        }
        if let Some(member) = guard.remove_connection(connection_id) {
            info!("{} left {}", connection_id, table_id);
            guard.broadcast(&protocol::Response::Left(member.player().info()));
            if guard.is_empty() {
                guard.retire();
                self.lobbies.lock().await.remove(table_id, &lobby);
            }
        }
    }

    /// The number of players seated in the table's open lobby.
    pub async fn size(&self, table_id: &TableId) -> usize {
        let lobby = self.lobbies.lock().await.lookup(table_id);
        match lobby {
            Some(lobby) => lobby.lock().await.size(),
            None => 0,
        }
    }

    /// The players seated in the table's open lobby, in registration order.
    pub async fn members(&self, table_id: &TableId) -> Vec<PlayerInfo> {
        let lobby = self.lobbies.lock().await.lookup(table_id);
        match lobby {
            Some(lobby) => lobby.lock().await.member_list(),
            None => vec![],
        }
    }

    // Deal one hand to every member, in the order they registered. Must run
    // inside the lobby's lock; nothing is sent unless the whole deal succeeds.
    async fn start(&self, lobby: &mut Lobby) -> Result<(), deck::Error> {
        let mut deck = Deck::new();
        let hands = deck.deal_hands(lobby.size(), &mut *self.rng.lock().await)?;
        lobby.set_state(LobbyState::InProgress);
        self.games_started.fetch_add(1, Ordering::AcqRel);
        info!("starting {} with {} players", lobby.table_id(), hands.len());

        lobby.broadcast(&protocol::Response::GameUpdate(protocol::GAME_STARTING.into()));
        for (member, hand) in lobby.members().iter().zip(hands) {
            debug!("dealt {} to {}", hand, member.player().connection_id);
            member.send(protocol::Response::PlayerCards(hand));
        }
        Ok(())
    }
}

/// The handle by which client tasks may send requests to the core.
pub struct Context<'core> {
    core: &'core Core,
    player: Player,
    table_id: TableId,
    response_tx: ResponseTx,
}

impl<'core> Context<'core> {
    fn new(core: &'core Core, player: Player, table_id: TableId, response_tx: ResponseTx) -> Self {
        Context {
            core,
            player,
            table_id,
            response_tx,
        }
    }

    pub fn player(&self) -> &Player {
        &self.player
    }

    pub fn table_id(&self) -> &TableId {
        &self.table_id
    }

    /// Send a request to the core.
    ///
    /// This does not return a value; whatever the request causes is sent to
    /// the channel provided to `Core::connect`.
    pub async fn execute(&mut self, req: protocol::Request) {
        match req {
            protocol::Request::Register => {
                let member = Member::new(self.player.clone(), self.response_tx.clone());
                self.core.register(&self.table_id, member).await;
            }
        }
    }

    /// Cleanup data for this client from the core, e.g. due to disconnection.
    ///
    /// This would be better done as a Drop destructor, but, unfortunately,
    /// those don't support async yet.
    pub async fn cleanup(&mut self) {
        self.core
            .unregister(&self.table_id, self.player.connection_id)
            .await;
    }
}
