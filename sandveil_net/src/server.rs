// Authoritative game server: connection lifecycle, command dispatch, and
// the per-tick state synchronization fan-out.
//
// Architecture: single-threaded and poll-driven. `Server::tick` is called
// once per game tick from the host's main loop and does everything in
// order: accept pending connections, drain and dispatch client commands,
// rebroadcast lobby state when it changed, and (once the game runs) build
// one sync packet per playing peer. No thread ever blocks on a socket.
//
// Sync packet layout per recipient: a shared prefix (landscape, starport,
// structure, unit and explosion updates, identical bytes for everyone)
// followed by a house-specific suffix (full house state, fog-of-war
// reveals, queued one-shot events). The prefix is built once; for each
// recipient the buffer is rewound to the prefix end and the suffix
// rebuilt, so per-tick cost scales with change volume, not map size.
//
// Change detection: `SyncCache` keeps the last state each pool entry was
// broadcast with. An entry is resent only when its wire form differs, and
// the cache is updated only for entries that actually fit in the outgoing
// buffer, so anything dropped under burst resends on the next tick.

use std::io;

use sandveil_protocol::buffer::{
    MAX_HOUSE_MESSAGE_LEN, MAX_SERVER_BROADCAST_MESSAGE_LEN, OutboundBuffer,
};
use sandveil_protocol::message::{
    ClientMessage, FogReveal, ScenarioParams, ServerMessage, StructureDelta, TileDelta, UnitDelta,
};
use sandveil_protocol::types::{
    DEFAULT_PORT, HOUSE_COUNT, HOUSE_MASK_ALL, HouseId, MAP_TILE_COUNT, MAX_CLIENTS,
    MAX_EXPLOSIONS, PackedTile, PeerId,
};
use sandveil_protocol::wire::Reader;

use crate::session::{PeerState, Peers};
use crate::transport::{Listener, PacketChannel};
use crate::world::ServerWorld;

/// Tiles per landscape update message. Small chunks keep the drop
/// granularity fine when the broadcast buffer fills: a dropped chunk
/// resends next tick while the rest of the packet goes out.
const LANDSCAPE_CHUNK: usize = 64;

/// Entries per structure/unit update message.
const OBJECT_CHUNK: usize = 16;

/// Fog reveals per fog-of-war message.
const FOG_CHUNK: usize = 128;

/// Configuration for starting a server.
pub struct ServerConfig {
    pub port: u16,
    pub scenario: ScenarioParams,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: DEFAULT_PORT,
            scenario: ScenarioParams::default(),
        }
    }
}

struct Connection {
    id: PeerId,
    channel: PacketChannel,
}

/// Last-broadcast state per pool entry, for change detection.
struct SyncCache {
    tiles: Vec<TileDelta>,
    structures: Vec<Option<StructureDelta>>,
    units: Vec<Option<UnitDelta>>,
    starport: Option<sandveil_protocol::message::StarportUpdate>,
    /// Per house, which tiles' unveiling this client has been told about.
    fog_sent: Vec<Box<[bool]>>,
}

impl SyncCache {
    fn new() -> SyncCache {
        SyncCache {
            tiles: (0..MAP_TILE_COUNT)
                .map(|i| TileDelta {
                    packed: PackedTile(i as u16),
                    ..TileDelta::default()
                })
                .collect(),
            structures: Vec::new(),
            units: Vec::new(),
            starport: None,
            fog_sent: (0..HOUSE_COUNT)
                .map(|_| vec![false; MAP_TILE_COUNT].into_boxed_slice())
                .collect(),
        }
    }

    /// Prime the cache from the world's state at game start. Clients
    /// build the initial map from the scenario seed themselves, so only
    /// changes after this point travel on the wire.
    fn prime<W: ServerWorld>(&mut self, world: &W) {
        for i in 0..MAP_TILE_COUNT {
            self.tiles[i] = world.tile(PackedTile(i as u16));
        }
        self.structures.clear();
        self.units.clear();
        for s in world.structures() {
            let idx = s.index as usize;
            if self.structures.len() <= idx {
                self.structures.resize(idx + 1, None);
            }
            self.structures[idx] = Some(s);
        }
        for u in world.units() {
            let idx = u.index as usize;
            if self.units.len() <= idx {
                self.units.resize(idx + 1, None);
            }
            self.units[idx] = Some(u);
        }
        self.starport = None;
        for sent in &mut self.fog_sent {
            sent.fill(false);
        }
    }
}

/// The authoritative server. Owns the listener, the peer table, the
/// scenario, and all outbound buffering.
pub struct Server {
    listener: Listener,
    connections: Vec<Connection>,
    peers: Peers,
    host: PeerId,
    scenario: ScenarioParams,
    game_started: bool,
    broadcast: OutboundBuffer,
    house_queue: Vec<OutboundBuffer>,
    cache: SyncCache,
    roster_dirty: bool,
    scenario_dirty: bool,
}

impl Server {
    /// Bind the listen socket and set up an empty lobby.
    pub fn new(config: ServerConfig) -> io::Result<Server> {
        let listener = Listener::bind(config.port)?;
        log::info!("listening on {}", listener.local_addr()?);
        Ok(Server {
            listener,
            connections: Vec::new(),
            peers: Peers::new(),
            host: PeerId::NONE,
            scenario: config.scenario,
            game_started: false,
            broadcast: OutboundBuffer::new(MAX_SERVER_BROADCAST_MESSAGE_LEN),
            house_queue: (0..HOUSE_COUNT)
                .map(|_| OutboundBuffer::new(MAX_HOUSE_MESSAGE_LEN))
                .collect(),
            cache: SyncCache::new(),
            roster_dirty: false,
            scenario_dirty: false,
        })
    }

    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    pub fn is_game_started(&self) -> bool {
        self.game_started
    }

    pub fn peer_count(&self) -> usize {
        self.peers.connected_count()
    }

    pub fn scenario(&self) -> &ScenarioParams {
        &self.scenario
    }

    /// Claim a peer slot for the hosting player itself. The host has no
    /// socket: its commands arrive through `submit_host_command` and it
    /// reads the world directly instead of receiving sync packets. One
    /// slot is held back from remote connections for this.
    pub fn attach_host(&mut self, name: &str) -> Option<PeerId> {
        if self.host.is_assigned() || self.game_started {
            return None;
        }
        let id = self.peers.allocate()?;
        self.peers.set_name(id, name);
        self.host = id;
        self.roster_dirty = true;
        self.scenario_dirty = true;
        Some(id)
    }

    pub fn host_id(&self) -> PeerId {
        self.host
    }

    /// Dispatch a command from the hosting player, exactly as if it had
    /// arrived over a connection.
    pub fn submit_host_command<W: ServerWorld>(&mut self, world: &mut W, msg: &ClientMessage) {
        if self.host.is_assigned() {
            let host = self.host;
            self.dispatch(world, host, msg);
        }
    }

    /// Run one server tick: accept, read, dispatch, broadcast, flush.
    pub fn tick<W: ServerWorld>(&mut self, world: &mut W) {
        self.accept_pending();
        self.pump_peers(world);
        self.broadcast_lobby_state();
        if self.game_started {
            self.send_sync(world);
        }
        for conn in &mut self.connections {
            let _ = conn.channel.flush();
        }
        self.reap_closed(world);
    }

    /// Accept pending connections. In the lobby each gets a slot and its
    /// identity; once the game runs, latecomers are turned away.
    fn accept_pending(&mut self) {
        for (mut channel, addr) in self.listener.accept_pending() {
            if self.game_started {
                log::info!("rejecting {addr}: game in progress");
                send_single(&mut channel, &ServerMessage::Disconnect);
                continue;
            }
            // One slot stays reserved for the hosting player.
            if self.connections.len() >= MAX_CLIENTS - 1 {
                log::info!("rejecting {addr}: server full");
                send_single(&mut channel, &ServerMessage::Disconnect);
                continue;
            }
            let Some(id) = self.peers.allocate() else {
                log::info!("rejecting {addr}: server full");
                send_single(&mut channel, &ServerMessage::Disconnect);
                continue;
            };
            log::info!("peer {} connected from {addr}", id.0);
            send_single(&mut channel, &ServerMessage::Identity { id });
            self.connections.push(Connection { id, channel });
            self.roster_dirty = true;
            self.scenario_dirty = true;
        }
    }

    /// Drain and dispatch every readable packet from every peer.
    fn pump_peers<W: ServerWorld>(&mut self, world: &mut W) {
        let mut faulted = Vec::new();
        let mut inbound = Vec::new();
        for conn in &mut self.connections {
            for packet in conn.channel.recv_packets() {
                let mut r = Reader::new(&packet);
                while !r.is_empty() {
                    match ClientMessage::decode(&mut r) {
                        Ok(msg) => inbound.push((conn.id, msg)),
                        Err(e) => {
                            log::warn!("protocol fault from peer {}: {e}", conn.id.0);
                            faulted.push(conn.id);
                            break;
                        }
                    }
                }
            }
        }
        for (id, msg) in inbound {
            self.dispatch(world, id, &msg);
        }
        for id in faulted {
            self.drop_peer(world, id, true);
        }
    }

    /// Route one decoded command.
    fn dispatch<W: ServerWorld>(&mut self, world: &mut W, from: PeerId, msg: &ClientMessage) {
        match msg {
            ClientMessage::PreferredName { name } => {
                if self.peers.set_name(from, name) {
                    self.roster_dirty = true;
                }
            }
            ClientMessage::PreferredHouse { house } => {
                if self.game_started {
                    return;
                }
                if self.peers.assign_house(from, *house) {
                    self.scenario_dirty = true;
                }
            }
            ClientMessage::Chat { houses, text } => {
                self.relay_chat(from, *houses, text);
            }
            ClientMessage::ReturnToLobby => {
                self.return_to_lobby(world, from);
            }
            // Acting commands need a live game and an owned house.
            ClientMessage::RepairUpgradeStructure { .. }
            | ClientMessage::SetRallyPoint { .. }
            | ClientMessage::PurchaseResumeItem { .. }
            | ClientMessage::PauseCancelItem { .. }
            | ClientMessage::EnterLeavePlacementMode { .. }
            | ClientMessage::PlaceStructure { .. }
            | ClientMessage::ActivateStructureAbility { .. }
            | ClientMessage::LaunchMissile { .. }
            | ClientMessage::IssueUnitAction { .. } => {
                if !self.game_started {
                    return;
                }
                let in_game = self
                    .peers
                    .get(from)
                    .is_some_and(|p| p.state == PeerState::InGame);
                match self.peers.house_of(from) {
                    Some(house) if in_game => world.apply_command(house, msg),
                    _ => log::debug!("ignoring command from spectating peer {}", from.0),
                }
            }
        }
    }

    /// Deliver a chat line. The all-houses mask reaches every peer; a
    /// narrower mask names the houses to leave out, and peers without a
    /// house never hear a scoped line.
    fn relay_chat(&mut self, from: PeerId, houses: u8, text: &str) {
        let msg = ServerMessage::Chat {
            from,
            text: text.to_string(),
        };
        for conn in &mut self.connections {
            let deliver = houses == HOUSE_MASK_ALL
                || match self.peers.house_of(conn.id) {
                    Some(h) => houses & (1 << h.0) == 0,
                    None => false,
                };
            if deliver {
                send_single(&mut conn.channel, &msg);
            }
        }
    }

    /// Server-attributed chat announcement to everyone.
    fn announce(&mut self, text: &str) {
        let msg = ServerMessage::Chat {
            from: PeerId::NONE,
            text: text.to_string(),
        };
        for conn in &mut self.connections {
            send_single(&mut conn.channel, &msg);
        }
    }

    /// A playing peer conceded: free their house, hand their assets to
    /// the game rules, and put them back in the lobby.
    fn return_to_lobby<W: ServerWorld>(&mut self, world: &mut W, id: PeerId) {
        let Some(peer) = self.peers.get_mut(id) else {
            return;
        };
        if peer.state != PeerState::InGame {
            return;
        }
        peer.state = PeerState::InLobby;
        let name = peer.name.clone();
        if let Some(house) = self.peers.house_of(id) {
            world.house_departed(house);
            self.peers.unassign_house(id);
        }
        self.roster_dirty = true;
        self.scenario_dirty = true;
        self.announce(&format!("{name} returned to the lobby"));
    }

    /// Remove a peer entirely. `notify` sends a final Disconnect message
    /// when the connection is still usable.
    fn drop_peer<W: ServerWorld>(&mut self, world: &mut W, id: PeerId, notify: bool) {
        let Some(peer) = self.peers.get(id) else {
            return;
        };
        let name = peer.name.clone();
        let was_in_game = peer.state == PeerState::InGame;
        if was_in_game && let Some(house) = self.peers.house_of(id) {
            world.house_departed(house);
        }
        self.peers.release(id);

        if let Some(pos) = self.connections.iter().position(|c| c.id == id) {
            let mut conn = self.connections.remove(pos);
            if notify {
                send_single(&mut conn.channel, &ServerMessage::Disconnect);
                let _ = conn.channel.flush();
            }
        }
        log::info!("peer {} ({name}) disconnected", id.0);
        self.roster_dirty = true;
        self.scenario_dirty = true;
        self.announce(&format!("{name} left the game"));
    }

    /// Drop peers whose sockets have gone away.
    fn reap_closed<W: ServerWorld>(&mut self, world: &mut W) {
        let closed: Vec<PeerId> = self
            .connections
            .iter()
            .filter(|c| c.channel.is_closed())
            .map(|c| c.id)
            .collect();
        for id in closed {
            self.drop_peer(world, id, false);
        }
    }

    /// Rebroadcast the roster and scenario when either changed. Keeping
    /// every lobby screen current is a couple of hundred bytes, so this
    /// sends to everyone rather than tracking who saw what.
    fn broadcast_lobby_state(&mut self) {
        if self.roster_dirty {
            let msg = ServerMessage::ClientList {
                roster: self.peers.roster(),
            };
            for conn in &mut self.connections {
                send_single(&mut conn.channel, &msg);
            }
            self.roster_dirty = false;
        }
        if self.scenario_dirty {
            self.peers.apply_to_scenario(&mut self.scenario);
            let msg = ServerMessage::Scenario(self.scenario);
            for conn in &mut self.connections {
                send_single(&mut conn.channel, &msg);
            }
            self.scenario_dirty = false;
        }
    }

    /// Start the game if the lobby is ready. Broadcasts the final
    /// scenario and the start signal, then primes the sync cache so only
    /// post-start changes travel.
    pub fn try_start_game<W: ServerWorld>(&mut self, world: &mut W) -> bool {
        if self.game_started {
            return false;
        }
        self.peers.apply_to_scenario(&mut self.scenario);
        if !self.peers.is_playable(&self.scenario) {
            return false;
        }
        world.start(&self.scenario);
        self.announce("Game started");
        let scenario_msg = ServerMessage::Scenario(self.scenario);
        for conn in &mut self.connections {
            send_single(&mut conn.channel, &scenario_msg);
            send_single(&mut conn.channel, &ServerMessage::StartGame);
        }
        self.peers.enter_game();
        self.cache.prime(world);
        for queue in &mut self.house_queue {
            queue.clear();
        }
        self.game_started = true;
        log::info!("game started with {} peers", self.peers.connected_count());
        true
    }

    /// Queue a one-shot event for every house whose bit is set in the
    /// mask (`HOUSE_MASK_ALL` addresses everyone). The event rides the
    /// next sync packet's house suffix; if a queue is full it is dropped
    /// there, since one-shots carry no state worth retrying. Returns
    /// false when any addressed queue dropped the event.
    pub fn queue_event(&mut self, houses: u8, msg: &ServerMessage) -> bool {
        let mut ok = true;
        for house in HouseId::all() {
            if houses & (1 << house.0) == 0 {
                continue;
            }
            if !self.house_queue[house.0 as usize].push(msg) {
                log::warn!("event queue full for house {}, dropping {:#04x}", house.0, msg.tag());
                ok = false;
            }
        }
        ok
    }

    /// Build this tick's sync packets and send one to each playing peer.
    fn send_sync<W: ServerWorld>(&mut self, world: &mut W) {
        self.broadcast.clear();
        self.build_starport(world);
        self.build_landscape(world);
        self.build_structures(world);
        self.build_units(world);

        let mut explosions = world.explosions();
        explosions.truncate(MAX_EXPLOSIONS);
        if !self.broadcast.push(&ServerMessage::UpdateExplosions { explosions }) {
            log::warn!("broadcast buffer full, explosions dropped this tick");
        }

        let prefix_end = self.broadcast.mark();
        // The host has no socket; it reads the world directly.
        let recipients: Vec<(PeerId, HouseId)> = self
            .peers
            .connected()
            .filter(|p| p.state == PeerState::InGame && p.id != self.host)
            .filter_map(|p| self.peers.house_of(p.id).map(|h| (p.id, h)))
            .collect();

        for (id, house) in recipients {
            self.broadcast.rewind(prefix_end);
            self.broadcast.push(&ServerMessage::UpdateHouse(world.house(house)));
            self.build_fog(world, house);
            let queue = &mut self.house_queue[house.0 as usize];
            if !queue.is_empty() {
                if !self.broadcast.push_raw(queue.as_slice()) {
                    log::warn!("house {} events dropped this tick", house.0);
                }
                queue.clear();
            }
            if let Some(conn) = self.connections.iter_mut().find(|c| c.id == id)
                && let Err(e) = conn.channel.send_packet(self.broadcast.as_slice())
            {
                log::warn!("send to peer {} failed: {e}", id.0);
            }
        }
        self.broadcast.rewind(prefix_end);
        // Queues for houses without a connected peer reset too; one-shots
        // never outlive the tick they were queued on.
        for queue in &mut self.house_queue {
            queue.clear();
        }
    }

    /// Append changed tiles in fixed-size chunks. The cache is updated
    /// per chunk only after the chunk is committed.
    fn build_landscape<W: ServerWorld>(&mut self, world: &W) {
        let mut changed: Vec<TileDelta> = Vec::new();
        for i in 0..MAP_TILE_COUNT {
            let now = world.tile(PackedTile(i as u16));
            if now != self.cache.tiles[i] {
                changed.push(now);
            }
        }
        for chunk in changed.chunks(LANDSCAPE_CHUNK) {
            let msg = ServerMessage::UpdateLandscape {
                tiles: chunk.to_vec(),
            };
            if self.broadcast.push(&msg) {
                for t in chunk {
                    self.cache.tiles[t.packed.0 as usize] = *t;
                }
            }
        }
    }

    fn build_starport<W: ServerWorld>(&mut self, world: &W) {
        let now = world.starport();
        if self.cache.starport == Some(now) {
            return;
        }
        if self.broadcast.push(&ServerMessage::UpdateStarport(now)) {
            self.cache.starport = Some(now);
        }
    }

    /// Append changed structures. A pool entry that vanished since the
    /// last tick is sent once more with its liveness flags cleared so the
    /// client frees it too.
    fn build_structures<W: ServerWorld>(&mut self, world: &W) {
        let live = world.structures();
        let mut changed: Vec<StructureDelta> = Vec::new();
        let mut seen = vec![false; self.cache.structures.len()];
        for s in live {
            let idx = s.index as usize;
            if idx < seen.len() {
                seen[idx] = true;
            }
            if self.cache.structures.get(idx).and_then(|c| c.as_ref()) != Some(&s) {
                changed.push(s);
            }
        }
        for (idx, was) in self.cache.structures.iter().enumerate() {
            if let Some(prev) = was
                && !seen[idx]
            {
                let mut gone = *prev;
                gone.flags = gone.flags.with_used(false).with_allocated(false);
                changed.push(gone);
            }
        }
        for chunk in changed.chunks(OBJECT_CHUNK) {
            let msg = ServerMessage::UpdateStructures {
                structures: chunk.to_vec(),
            };
            if self.broadcast.push(&msg) {
                for s in chunk {
                    let idx = s.index as usize;
                    if self.cache.structures.len() <= idx {
                        self.cache.structures.resize(idx + 1, None);
                    }
                    self.cache.structures[idx] = if s.flags.used() { Some(*s) } else { None };
                }
            }
        }
    }

    fn build_units<W: ServerWorld>(&mut self, world: &W) {
        let live = world.units();
        let mut changed: Vec<UnitDelta> = Vec::new();
        let mut seen = vec![false; self.cache.units.len()];
        for u in live {
            let idx = u.index as usize;
            if idx < seen.len() {
                seen[idx] = true;
            }
            if self.cache.units.get(idx).and_then(|c| c.as_ref()) != Some(&u) {
                changed.push(u);
            }
        }
        for (idx, was) in self.cache.units.iter().enumerate() {
            if let Some(prev) = was
                && !seen[idx]
            {
                let mut gone = *prev;
                gone.flags = gone.flags.with_used(false).with_allocated(false);
                changed.push(gone);
            }
        }
        for chunk in changed.chunks(OBJECT_CHUNK) {
            let msg = ServerMessage::UpdateUnits {
                units: chunk.to_vec(),
            };
            if self.broadcast.push(&msg) {
                for u in chunk {
                    let idx = u.index as usize;
                    if self.cache.units.len() <= idx {
                        self.cache.units.resize(idx + 1, None);
                    }
                    self.cache.units[idx] = if u.flags.used() { Some(*u) } else { None };
                }
            }
        }
    }

    /// Append fog reveals this house has not been told about yet. Sent
    /// markers are set per chunk only after the chunk is committed, and
    /// cleared again when a tile re-veils so a later unveil is resent.
    fn build_fog<W: ServerWorld>(&mut self, world: &W, house: HouseId) {
        let sent = &mut self.cache.fog_sent[house.0 as usize];
        let mut fresh: Vec<FogReveal> = Vec::new();
        for i in 0..MAP_TILE_COUNT {
            let packed = PackedTile(i as u16);
            match world.unveiled(house, packed) {
                Some(cause) if !sent[i] => fresh.push(FogReveal { packed, cause }),
                Some(_) => {}
                None => sent[i] = false,
            }
        }
        for chunk in fresh.chunks(FOG_CHUNK) {
            let msg = ServerMessage::UpdateFogOfWar {
                reveals: chunk.to_vec(),
            };
            if self.broadcast.push(&msg) {
                for f in chunk {
                    sent[f.packed.0 as usize] = true;
                }
            }
        }
    }
}

/// Send one message as its own packet, ignoring transport errors (a dead
/// channel is reaped at the end of the tick).
fn send_single(channel: &mut PacketChannel, msg: &ServerMessage) {
    let mut buf = OutboundBuffer::new(msg.framed_len());
    if buf.push(msg) {
        let _ = channel.send_packet(buf.as_slice());
    }
}
