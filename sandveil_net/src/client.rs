// Game client side of the protocol.
//
// `Client::connect` opens the TCP connection and performs the one
// blocking step in the whole crate: waiting for the server to assign an
// identity. The wait polls in 25 ms slices with a one second deadline, so
// a dead server address fails fast instead of hanging the UI.
//
// After that everything is poll-driven from the game's frame loop:
// - command methods append to a fixed-size outbox, flushed once per
//   frame by `flush()` (one packet per frame, however many commands);
// - `service()` drains received packets, walks each one message by
//   message, applies state to the `ClientWorld`, forwards presentation
//   one-shots to the `GameEvents` sink, and returns the session-level
//   events (roster, scenario, start, chat, disconnect) for the UI.

use std::collections::HashMap;
use std::io;
use std::net::ToSocketAddrs;
use std::thread;
use std::time::{Duration, Instant};

use sandveil_protocol::buffer::{MAX_CLIENT_MESSAGE_LEN, OutboundBuffer};
use sandveil_protocol::message::{
    ClientMessage, HouseUpdate, RosterEntry, ScenarioParams, ServerMessage,
};
use sandveil_protocol::types::{EntityRef, HouseId, ObjectFlags, PackedTile, PeerId};
use sandveil_protocol::wire::Reader;

use crate::transport::PacketChannel;
use crate::world::{ClientWorld, GameEvents};

/// How long `connect` waits for the server to assign an identity.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// Poll interval during the handshake wait.
const HANDSHAKE_POLL: Duration = Duration::from_millis(25);

/// Session-level events surfaced to the UI by `service()`.
#[derive(Clone, Debug, PartialEq)]
pub enum NetEvent {
    /// The server closed the session (or the connection dropped).
    Disconnected,
    /// The peer roster changed.
    RosterChanged,
    /// The scenario parameters changed.
    ScenarioChanged,
    /// The game is starting; the world has the final scenario.
    GameStarted,
    /// A chat line. `from` is `PeerId::NONE` for server announcements.
    Chat { from: PeerId, text: String },
}

/// Connection to an authoritative server.
#[derive(Debug)]
pub struct Client {
    channel: PacketChannel,
    id: PeerId,
    roster: Vec<RosterEntry>,
    scenario: ScenarioParams,
    outbox: OutboundBuffer,
    pending: Vec<ServerMessage>,
    game_started: bool,
    disconnected: bool,
    // Previous snapshots, kept to detect the transitions that drive the
    // interface hooks on `GameEvents`.
    house_state: Option<HouseUpdate>,
    structure_levels: HashMap<u16, u8>,
    unit_flags: HashMap<u16, ObjectFlags>,
}

impl Client {
    /// Connect and wait (bounded) for the server-assigned identity.
    /// Messages arriving alongside it are kept for the first `service()`.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<Client> {
        let mut channel = PacketChannel::connect(addr)?;
        let mut pending = Vec::new();
        let mut id = PeerId::NONE;

        let deadline = Instant::now() + HANDSHAKE_TIMEOUT;
        'wait: while Instant::now() < deadline {
            for packet in channel.recv_packets() {
                let mut r = Reader::new(&packet);
                while !r.is_empty() {
                    let msg = ServerMessage::decode(&mut r)
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                    match msg {
                        ServerMessage::Identity { id: assigned } => id = assigned,
                        ServerMessage::Disconnect => {
                            return Err(io::Error::new(
                                io::ErrorKind::ConnectionRefused,
                                "server refused the connection",
                            ));
                        }
                        other => pending.push(other),
                    }
                }
            }
            if id.is_assigned() {
                break 'wait;
            }
            if channel.is_closed() {
                return Err(io::ErrorKind::ConnectionReset.into());
            }
            thread::sleep(HANDSHAKE_POLL);
        }
        if !id.is_assigned() {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "no identity assigned within the handshake window",
            ));
        }

        log::info!("connected as peer {}", id.0);
        Ok(Client {
            channel,
            id,
            roster: Vec::new(),
            scenario: ScenarioParams::default(),
            outbox: OutboundBuffer::new(MAX_CLIENT_MESSAGE_LEN),
            pending,
            game_started: false,
            disconnected: false,
            house_state: None,
            structure_levels: HashMap::new(),
            unit_flags: HashMap::new(),
        })
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn roster(&self) -> &[RosterEntry] {
        &self.roster
    }

    pub fn scenario(&self) -> &ScenarioParams {
        &self.scenario
    }

    pub fn is_game_started(&self) -> bool {
        self.game_started
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected || self.channel.is_closed()
    }

    /// Display name for a peer id, from the last roster.
    pub fn peer_name(&self, id: PeerId) -> Option<&str> {
        self.roster
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.name.as_str())
    }

    // Lobby commands.

    pub fn set_name(&mut self, name: &str) {
        self.queue(ClientMessage::PreferredName { name: name.into() });
    }

    pub fn pick_house(&mut self, house: HouseId) {
        self.queue(ClientMessage::PreferredHouse { house });
    }

    pub fn send_chat(&mut self, houses: u8, text: &str) {
        self.queue(ClientMessage::Chat {
            houses,
            text: text.into(),
        });
    }

    // In-game commands.

    pub fn return_to_lobby(&mut self) {
        self.queue(ClientMessage::ReturnToLobby);
    }

    pub fn repair_upgrade_structure(&mut self, target: EntityRef) {
        self.queue(ClientMessage::RepairUpgradeStructure { target });
    }

    pub fn set_rally_point(&mut self, target: EntityRef, tile: PackedTile) {
        self.queue(ClientMessage::SetRallyPoint { target, tile });
    }

    pub fn purchase_resume_item(&mut self, target: EntityRef, item: u8) {
        self.queue(ClientMessage::PurchaseResumeItem { target, item });
    }

    pub fn pause_cancel_item(&mut self, target: EntityRef, item: u8) {
        self.queue(ClientMessage::PauseCancelItem { target, item });
    }

    pub fn enter_leave_placement_mode(&mut self, target: EntityRef) {
        self.queue(ClientMessage::EnterLeavePlacementMode { target });
    }

    pub fn place_structure(&mut self, tile: PackedTile) {
        self.queue(ClientMessage::PlaceStructure { tile });
    }

    pub fn activate_structure_ability(&mut self, target: EntityRef) {
        self.queue(ClientMessage::ActivateStructureAbility { target });
    }

    pub fn launch_missile(&mut self, tile: PackedTile) {
        self.queue(ClientMessage::LaunchMissile { tile });
    }

    pub fn issue_unit_action(&mut self, action: u8, target: u16, unit: EntityRef) {
        self.queue(ClientMessage::IssueUnitAction {
            action,
            target,
            unit,
        });
    }

    fn queue(&mut self, msg: ClientMessage) {
        if !self.outbox.push(&msg) {
            log::warn!("outbox full, dropping command {:#04x}", msg.tag());
        }
    }

    /// Send this frame's queued commands as one packet.
    pub fn flush(&mut self) -> io::Result<()> {
        if !self.outbox.is_empty() {
            self.channel.send_packet(self.outbox.as_slice())?;
            self.outbox.clear();
        }
        self.channel.flush()
    }

    /// Drain received packets, apply state, and return session events.
    pub fn service(
        &mut self,
        world: &mut dyn ClientWorld,
        events: &mut dyn GameEvents,
    ) -> Vec<NetEvent> {
        let mut out = Vec::new();
        if self.disconnected {
            return out;
        }

        let held = std::mem::take(&mut self.pending);
        for msg in held {
            self.handle(msg, world, events, &mut out);
        }

        'packets: for packet in self.channel.recv_packets() {
            let mut r = Reader::new(&packet);
            while !r.is_empty() {
                match ServerMessage::decode(&mut r) {
                    Ok(msg) => self.handle(msg, world, events, &mut out),
                    Err(e) => {
                        log::warn!("protocol fault from server: {e}");
                        self.disconnected = true;
                        out.push(NetEvent::Disconnected);
                        break 'packets;
                    }
                }
            }
        }

        if !self.disconnected && self.channel.is_closed() {
            self.disconnected = true;
            out.push(NetEvent::Disconnected);
        }
        out
    }

    fn handle(
        &mut self,
        msg: ServerMessage,
        world: &mut dyn ClientWorld,
        events: &mut dyn GameEvents,
        out: &mut Vec<NetEvent>,
    ) {
        match msg {
            ServerMessage::Disconnect => {
                self.disconnected = true;
                out.push(NetEvent::Disconnected);
            }
            ServerMessage::UpdateLandscape { tiles } => world.apply_landscape(&tiles),
            ServerMessage::UpdateFogOfWar { reveals } => world.apply_fog_of_war(&reveals),
            ServerMessage::UpdateHouse(update) => {
                world.apply_house(&update);
                events.refresh_radar();
                let old = self.house_state.replace(update).unwrap_or_default();
                if update.house_missile_countdown != old.house_missile_countdown
                    && update.house_missile_countdown > 0
                {
                    events.missile_countdown_ticked();
                }
                if update.structure_active != old.structure_active
                    || update.house_missile != old.house_missile
                {
                    events.change_selection_mode();
                }
            }
            ServerMessage::UpdateStarport(update) => {
                world.apply_starport(&update);
                events.invalidate_production();
            }
            ServerMessage::UpdateStructures { structures } => {
                world.apply_structures(&structures);
                for s in &structures {
                    let old = self
                        .structure_levels
                        .insert(s.index, s.upgrade_level)
                        .unwrap_or(0);
                    if s.upgrade_level != old {
                        events.invalidate_production();
                    }
                }
            }
            ServerMessage::UpdateUnits { units } => {
                world.apply_units(&units);
                let mut recount = false;
                for u in &units {
                    let old = self.unit_flags.insert(u.index, u.flags).unwrap_or_default();
                    if u.flags.used() != old.used() {
                        recount = true;
                    }
                    if (!u.flags.used() && old.used())
                        || (!u.flags.allocated() && old.allocated())
                        || (u.flags.is_not_on_map() && !old.is_not_on_map())
                    {
                        events.unselect_unit(u.index);
                    }
                }
                if recount {
                    events.recount_units();
                }
            }
            ServerMessage::UpdateExplosions { explosions } => world.apply_explosions(&explosions),
            ServerMessage::ScreenShake { tile } => events.screen_shake(tile),
            ServerMessage::StatusMessage {
                priority,
                str1,
                str2,
                str3,
            } => events.status_message(priority, str1, str2, str3),
            ServerMessage::PlaySound { sound } => events.play_sound(sound),
            ServerMessage::PlaySoundAtTile { sound, pos_x, pos_y } => {
                events.play_sound_at(sound, pos_x, pos_y);
            }
            ServerMessage::PlayVoice { voice, tile } => events.play_voice(voice, tile),
            ServerMessage::PlayBattleMusic => events.play_battle_music(),
            ServerMessage::WinLose { won } => events.win_lose(won),
            ServerMessage::Identity { id } => self.id = id,
            ServerMessage::ClientList { roster } => {
                self.roster = roster;
                out.push(NetEvent::RosterChanged);
            }
            ServerMessage::Scenario(params) => {
                self.scenario = params;
                out.push(NetEvent::ScenarioChanged);
            }
            ServerMessage::StartGame => {
                self.game_started = true;
                // Fresh game, fresh transition baselines.
                self.house_state = None;
                self.structure_levels.clear();
                self.unit_flags.clear();
                out.push(NetEvent::GameStarted);
            }
            ServerMessage::Chat { from, text } => out.push(NetEvent::Chat { from, text }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use sandveil_protocol::buffer::OutboundBuffer;

    use super::*;

    /// Bind a listener and return it with its address string.
    fn listener() -> (TcpListener, String) {
        let l = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = l.local_addr().unwrap().to_string();
        (l, addr)
    }

    fn send(channel: &mut PacketChannel, msg: &ServerMessage) {
        let mut buf = OutboundBuffer::new(msg.framed_len());
        assert!(buf.push(msg));
        channel.send_packet(buf.as_slice()).unwrap();
    }

    #[test]
    fn handshake_receives_identity() {
        let (l, addr) = listener();
        let handle = thread::spawn(move || {
            let (stream, _) = l.accept().unwrap();
            let mut channel = PacketChannel::new(stream).unwrap();
            send(&mut channel, &ServerMessage::Identity { id: PeerId(7) });
            // Keep the socket alive until the client is done.
            thread::sleep(Duration::from_millis(200));
        });

        let client = Client::connect(&addr).unwrap();
        assert_eq!(client.id(), PeerId(7));
        handle.join().unwrap();
    }

    #[test]
    fn handshake_times_out_without_identity() {
        let (l, addr) = listener();
        let handle = thread::spawn(move || {
            let (stream, _) = l.accept().unwrap();
            // Say nothing for longer than the handshake window.
            thread::sleep(Duration::from_millis(1200));
            drop(stream);
        });

        let started = Instant::now();
        let err = Client::connect(&addr).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(started.elapsed() >= HANDSHAKE_TIMEOUT);
        handle.join().unwrap();
    }

    #[test]
    fn handshake_surfaces_rejection() {
        let (l, addr) = listener();
        let handle = thread::spawn(move || {
            let (stream, _) = l.accept().unwrap();
            let mut channel = PacketChannel::new(stream).unwrap();
            send(&mut channel, &ServerMessage::Disconnect);
            thread::sleep(Duration::from_millis(200));
        });

        let err = Client::connect(&addr).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
        handle.join().unwrap();
    }

    #[test]
    fn messages_alongside_identity_are_kept() {
        let (l, addr) = listener();
        let handle = thread::spawn(move || {
            let (stream, _) = l.accept().unwrap();
            let mut channel = PacketChannel::new(stream).unwrap();
            // One packet carrying roster then identity.
            let mut buf = OutboundBuffer::new(256);
            buf.push(&ServerMessage::ClientList {
                roster: vec![RosterEntry {
                    id: PeerId(7),
                    name: "Host".into(),
                }],
            });
            buf.push(&ServerMessage::Identity { id: PeerId(7) });
            channel.send_packet(buf.as_slice()).unwrap();
            thread::sleep(Duration::from_millis(200));
        });

        let client = Client::connect(&addr).unwrap();
        assert_eq!(client.pending.len(), 1);
        handle.join().unwrap();
    }

    #[test]
    fn outbox_overflow_drops_commands() {
        let (l, addr) = listener();
        let handle = thread::spawn(move || {
            let (stream, _) = l.accept().unwrap();
            let mut channel = PacketChannel::new(stream).unwrap();
            send(&mut channel, &ServerMessage::Identity { id: PeerId(1) });
            thread::sleep(Duration::from_millis(300));
        });

        let mut client = Client::connect(&addr).unwrap();
        // Fill the outbox far past capacity; overflow must not grow it.
        for _ in 0..1000 {
            client.launch_missile(PackedTile(0));
        }
        assert!(client.outbox.len() <= MAX_CLIENT_MESSAGE_LEN);
        client.flush().unwrap();
        assert!(client.outbox.is_empty());
        handle.join().unwrap();
    }
}
