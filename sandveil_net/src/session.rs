// Peer bookkeeping for the authoritative server.
//
// `Peers` is the server's slot table: at most `MAX_CLIENTS` concurrent
// peers, each with a compact server-assigned id, a lifecycle state, and a
// display name. It also owns the house assignment table (which peer
// controls which house slot) and the lobby-readiness predicate that gates
// game start. All mutation happens from the server's single-threaded tick
// loop.
//
// Id assignment: ids are handed out from a wrapping u8 counter that skips
// zero (the reserved server/none identity) and any id still held by a
// connected peer. A departing and rejoining player therefore gets a fresh
// id rather than silently inheriting stale state.

use sandveil_protocol::message::{Brain, RosterEntry, ScenarioParams};
use sandveil_protocol::types::{HOUSE_COUNT, HouseId, MAX_CLIENTS, MAX_NAME_LEN, PeerId};

/// Lifecycle of one peer slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PeerState {
    /// Free slot.
    #[default]
    Unused,
    /// Connected, picking a name and house.
    InLobby,
    /// Playing.
    InGame,
}

/// One peer slot.
#[derive(Clone, Debug, Default)]
pub struct Peer {
    pub id: PeerId,
    pub state: PeerState,
    pub name: String,
}

impl Peer {
    pub fn is_connected(&self) -> bool {
        self.state != PeerState::Unused
    }
}

/// The server's peer table plus house ownership.
pub struct Peers {
    slots: [Peer; MAX_CLIENTS],
    next_id: u8,
    house_owner: [PeerId; HOUSE_COUNT],
}

impl Default for Peers {
    fn default() -> Self {
        Peers::new()
    }
}

impl Peers {
    pub fn new() -> Peers {
        Peers {
            slots: std::array::from_fn(|_| Peer::default()),
            next_id: 0,
            house_owner: [PeerId::NONE; HOUSE_COUNT],
        }
    }

    /// Claim a free slot for a newly connected peer. Returns its fresh id,
    /// or None when the table is full.
    pub fn allocate(&mut self) -> Option<PeerId> {
        let slot = self.slots.iter().position(|p| !p.is_connected())?;
        let id = self.next_free_id();
        self.slots[slot] = Peer {
            id,
            state: PeerState::InLobby,
            name: format!("Player {}", id.0),
        };
        Some(id)
    }

    /// Next id from the wrapping counter, skipping zero and ids still in
    /// use. The table holds far fewer peers than 255 ids, so this always
    /// terminates.
    fn next_free_id(&mut self) -> PeerId {
        loop {
            self.next_id = self.next_id.wrapping_add(1);
            let candidate = PeerId(self.next_id);
            if candidate.is_assigned() && self.get(candidate).is_none() {
                return candidate;
            }
        }
    }

    /// Free a peer's slot and any house it held.
    pub fn release(&mut self, id: PeerId) {
        self.unassign_house(id);
        if let Some(peer) = self.get_mut(id) {
            *peer = Peer::default();
        }
    }

    pub fn get(&self, id: PeerId) -> Option<&Peer> {
        self.slots
            .iter()
            .find(|p| p.is_connected() && p.id == id)
    }

    pub fn get_mut(&mut self, id: PeerId) -> Option<&mut Peer> {
        self.slots
            .iter_mut()
            .find(|p| p.is_connected() && p.id == id)
    }

    /// All connected peers, in slot order.
    pub fn connected(&self) -> impl Iterator<Item = &Peer> {
        self.slots.iter().filter(|p| p.is_connected())
    }

    pub fn connected_count(&self) -> usize {
        self.connected().count()
    }

    /// Set a peer's display name, trimmed to the wire limit. An empty or
    /// all-whitespace name keeps the assigned default. Returns true when
    /// the name actually changed.
    pub fn set_name(&mut self, id: PeerId, name: &str) -> bool {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return false;
        }
        let mut end = trimmed.len().min(MAX_NAME_LEN);
        while end > 0 && !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        let trimmed = &trimmed[..end];
        match self.get_mut(id) {
            Some(peer) if peer.name != trimmed => {
                peer.name = trimmed.to_string();
                true
            }
            _ => false,
        }
    }

    /// Which peer owns a house slot (`PeerId::NONE` when free).
    pub fn house_owner(&self, house: HouseId) -> PeerId {
        if house.is_valid() {
            self.house_owner[house.0 as usize]
        } else {
            PeerId::NONE
        }
    }

    /// The house a peer currently owns, if any.
    pub fn house_of(&self, id: PeerId) -> Option<HouseId> {
        if !id.is_assigned() {
            return None;
        }
        HouseId::all().find(|h| self.house_owner[h.0 as usize] == id)
    }

    /// Handle a house preference. `HouseId::INVALID` releases the peer's
    /// current house; a valid house is claimed only when free (claiming
    /// always releases the previous one first, so switching works in one
    /// step). Returns true when the assignment table changed.
    pub fn assign_house(&mut self, id: PeerId, house: HouseId) -> bool {
        if self.get(id).is_none() {
            return false;
        }
        if !house.is_valid() {
            return self.unassign_house(id);
        }
        let slot = house.0 as usize;
        if self.house_owner[slot] == id {
            return false;
        }
        if self.house_owner[slot].is_assigned() {
            // Taken by someone else.
            return false;
        }
        self.unassign_house(id);
        self.house_owner[slot] = id;
        true
    }

    /// Release whatever house a peer holds. Returns true if one was held.
    pub fn unassign_house(&mut self, id: PeerId) -> bool {
        if !id.is_assigned() {
            return false;
        }
        let mut changed = false;
        for owner in &mut self.house_owner {
            if *owner == id {
                *owner = PeerId::NONE;
                changed = true;
            }
        }
        changed
    }

    /// Roster of connected peers for the client-list broadcast.
    pub fn roster(&self) -> Vec<RosterEntry> {
        self.connected()
            .map(|p| RosterEntry {
                id: p.id,
                name: p.name.clone(),
            })
            .collect()
    }

    /// Copy the live assignment table into the scenario's house slots:
    /// peer-owned houses become human-controlled, the rest keep their
    /// configured brain.
    pub fn apply_to_scenario(&self, scenario: &mut ScenarioParams) {
        for house in HouseId::all() {
            let slot = &mut scenario.houses[house.0 as usize];
            let owner = self.house_owner(house);
            slot.client = owner;
            if owner.is_assigned() {
                slot.brain = Brain::Human;
            } else if slot.brain == Brain::Human {
                slot.brain = Brain::None;
            }
        }
    }

    /// Lobby-readiness: the game can start when at least two peers sit in
    /// the lobby, every one of them owns a house, at least two houses are
    /// in play (human or CPU), and the active houses span at least two
    /// teams.
    pub fn is_playable(&self, scenario: &ScenarioParams) -> bool {
        let lobby = self
            .connected()
            .filter(|p| p.state == PeerState::InLobby)
            .count();
        if lobby < 2 {
            return false;
        }
        if self
            .connected()
            .any(|p| p.state == PeerState::InLobby && self.house_of(p.id).is_none())
        {
            return false;
        }

        let mut active = 0;
        let mut first_team = None;
        let mut multiple_teams = false;
        for house in HouseId::all() {
            let slot = &scenario.houses[house.0 as usize];
            let in_play = self.house_owner(house).is_assigned() || slot.brain == Brain::Cpu;
            if !in_play {
                continue;
            }
            active += 1;
            match first_team {
                None => first_team = Some(slot.team),
                Some(t) if t != slot.team => multiple_teams = true,
                Some(_) => {}
            }
        }
        active >= 2 && multiple_teams
    }

    /// Move every lobby peer into the game.
    pub fn enter_game(&mut self) {
        for peer in &mut self.slots {
            if peer.state == PeerState::InLobby {
                peer.state = PeerState::InGame;
            }
        }
    }
}
