// Protocol messages for client-server synchronization.
//
// Two enums define the full protocol vocabulary:
// - `ClientMessage`: commands sent by a game client to the authority.
// - `ServerMessage`: state deltas and one-shot events sent by the
//   authority to a client.
//
// Framing rule (both directions): a message is one tag byte followed by a
// payload whose length is statically known from the tag — or, for the
// repeated-entry messages, derivable from a leading count field. A packet
// is a plain concatenation of such messages with no outer markers, so a
// decoder can always walk a packet to exactly zero remaining bytes.
// Unknown tags are a protocol fault: without a catalog entry the payload
// span is unknowable and the rest of the packet is unrecoverable.
//
// The snapshot structs (`TileDelta`, `StructureDelta`, ...) are the
// serialization views over entity pools the protocol does not own: which
// fields are wire-visible, and in what order.

use serde::{Deserialize, Serialize};

use crate::types::{
    BUILD_SLOT_COUNT, EntityRef, HOUSE_COUNT, HouseId, MAP_TILE_COUNT, MAX_CHAT_LEN, MAX_CLIENTS,
    MAX_EXPLOSIONS, MAX_NAME_LEN, ObjectFlags, PackedTile, PeerId, STARPORT_ITEM_COUNT,
    UnveilCause,
};
use crate::wire::{Reader, WireError, Writer};

// Tag bytes, client-to-server catalog.
const CS_RETURN_TO_LOBBY: u8 = 0x01;
const CS_REPAIR_UPGRADE: u8 = 0x02;
const CS_SET_RALLY_POINT: u8 = 0x03;
const CS_PURCHASE_RESUME: u8 = 0x04;
const CS_PAUSE_CANCEL: u8 = 0x05;
const CS_PLACEMENT_MODE: u8 = 0x06;
const CS_PLACE_STRUCTURE: u8 = 0x07;
const CS_ACTIVATE_ABILITY: u8 = 0x08;
const CS_LAUNCH_MISSILE: u8 = 0x09;
const CS_UNIT_ACTION: u8 = 0x0A;
const CS_PREF_NAME: u8 = 0x0B;
const CS_PREF_HOUSE: u8 = 0x0C;
const CS_CHAT: u8 = 0x0D;

// Tag bytes, server-to-client catalog.
const SC_DISCONNECT: u8 = 0x01;
const SC_LANDSCAPE: u8 = 0x02;
const SC_FOG_OF_WAR: u8 = 0x03;
const SC_HOUSE: u8 = 0x04;
const SC_STARPORT: u8 = 0x05;
const SC_STRUCTURES: u8 = 0x06;
const SC_UNITS: u8 = 0x07;
const SC_EXPLOSIONS: u8 = 0x08;
const SC_SCREEN_SHAKE: u8 = 0x09;
const SC_STATUS_MESSAGE: u8 = 0x0A;
const SC_PLAY_SOUND: u8 = 0x0B;
const SC_PLAY_SOUND_AT_TILE: u8 = 0x0C;
const SC_PLAY_VOICE: u8 = 0x0D;
const SC_BATTLE_MUSIC: u8 = 0x0E;
const SC_WIN_LOSE: u8 = 0x0F;
const SC_IDENTITY: u8 = 0x10;
const SC_CLIENT_LIST: u8 = 0x11;
const SC_SCENARIO: u8 = 0x12;
const SC_START_GAME: u8 = 0x13;
const SC_CHAT: u8 = 0x14;

/// Wire-visible fields of one landscape tile, keyed by packed coordinate.
/// The tile body packs into four bytes: ground sprite (9 bits), overlay
/// sprite (7 bits), owning house (3 bits), occupancy flags, index byte.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TileDelta {
    pub packed: PackedTile,
    pub ground_sprite_id: u16,
    pub overlay_sprite_id: u8,
    pub house: u8,
    pub has_unit: bool,
    pub has_structure: bool,
    pub index: u8,
}

impl TileDelta {
    pub const WIRE_LEN: usize = 6;

    fn encode(&self, w: &mut Writer) -> Result<(), WireError> {
        w.put_u16(self.packed.0)?;
        w.put_u8((self.ground_sprite_id & 0xFF) as u8)?;
        w.put_u8(((self.ground_sprite_id >> 8) & 1) as u8 | (self.overlay_sprite_id << 1))?;
        w.put_u8(
            (self.house & 0x07)
                | u8::from(self.has_unit) << 4
                | u8::from(self.has_structure) << 5,
        )?;
        w.put_u8(self.index)
    }

    fn decode(r: &mut Reader) -> Result<TileDelta, WireError> {
        let packed = PackedTile(r.take_u16()?);
        let b0 = r.take_u8()?;
        let b1 = r.take_u8()?;
        let b2 = r.take_u8()?;
        let b3 = r.take_u8()?;
        Ok(TileDelta {
            packed,
            ground_sprite_id: u16::from(b0) | (u16::from(b1 & 1) << 8),
            overlay_sprite_id: b1 >> 1,
            house: b2 & 0x07,
            has_unit: b2 & 0x10 != 0,
            has_structure: b2 & 0x20 != 0,
            index: b3,
        })
    }
}

/// One newly unveiled tile for a house: packed coordinate in the low 14
/// bits, the unveil-cause bit on top.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FogReveal {
    pub packed: PackedTile,
    pub cause: UnveilCause,
}

impl FogReveal {
    pub const WIRE_LEN: usize = 2;

    fn encode(&self, w: &mut Writer) -> Result<(), WireError> {
        let mut encoded = self.packed.0 & 0x3FFF;
        if self.cause == UnveilCause::Short {
            encoded |= 0x8000;
        }
        w.put_u16(encoded)
    }

    fn decode(r: &mut Reader) -> Result<FogReveal, WireError> {
        let encoded = r.take_u16()?;
        Ok(FogReveal {
            packed: PackedTile(encoded & 0x3FFF),
            cause: if encoded & 0x8000 != 0 {
                UnveilCause::Short
            } else {
                UnveilCause::Long
            },
        })
    }
}

/// Full per-house network state. Cheap and small, so it is resent in full
/// every sync tick rather than delta-tracked — the resend makes any drift
/// self-healing within one tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HouseUpdate {
    pub structures_built: u32,
    pub credits: u16,
    pub credits_storage: u16,
    pub power_production: u16,
    pub power_usage: u16,
    pub windtrap_count: u16,
    pub starport_time_left: u16,
    pub starport_linked_id: u16,
    pub structure_active: EntityRef,
    pub house_missile: EntityRef,
    pub house_missile_countdown: u8,
    pub starport_count: [u8; STARPORT_ITEM_COUNT],
}

impl Default for HouseUpdate {
    fn default() -> Self {
        HouseUpdate {
            structures_built: 0,
            credits: 0,
            credits_storage: 0,
            power_production: 0,
            power_usage: 0,
            windtrap_count: 0,
            starport_time_left: 0,
            starport_linked_id: 0,
            structure_active: EntityRef::None,
            house_missile: EntityRef::None,
            house_missile_countdown: 0,
            starport_count: [0; STARPORT_ITEM_COUNT],
        }
    }
}

impl HouseUpdate {
    pub const WIRE_LEN: usize = 23 + STARPORT_ITEM_COUNT;

    fn encode(&self, w: &mut Writer) -> Result<(), WireError> {
        w.put_u32(self.structures_built)?;
        w.put_u16(self.credits)?;
        w.put_u16(self.credits_storage)?;
        w.put_u16(self.power_production)?;
        w.put_u16(self.power_usage)?;
        w.put_u16(self.windtrap_count)?;
        w.put_u16(self.starport_time_left)?;
        w.put_u16(self.starport_linked_id)?;
        w.put_entity_ref(self.structure_active)?;
        w.put_entity_ref(self.house_missile)?;
        w.put_u8(self.house_missile_countdown)?;
        w.put_bytes(&self.starport_count)
    }

    fn decode(r: &mut Reader) -> Result<HouseUpdate, WireError> {
        let mut h = HouseUpdate {
            structures_built: r.take_u32()?,
            credits: r.take_u16()?,
            credits_storage: r.take_u16()?,
            power_production: r.take_u16()?,
            power_usage: r.take_u16()?,
            windtrap_count: r.take_u16()?,
            starport_time_left: r.take_u16()?,
            starport_linked_id: r.take_u16()?,
            structure_active: r.take_entity_ref()?,
            house_missile: r.take_entity_ref()?,
            house_missile_countdown: r.take_u8()?,
            ..HouseUpdate::default()
        };
        let counts = r.take_bytes(STARPORT_ITEM_COUNT)?;
        h.starport_count.copy_from_slice(counts);
        Ok(h)
    }
}

/// Starport stock availability plus the shared pricing seed. Negative
/// availability means the item cannot currently be purchased.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StarportUpdate {
    pub seed: u16,
    pub available: [i8; STARPORT_ITEM_COUNT],
}

impl StarportUpdate {
    pub const WIRE_LEN: usize = 2 + STARPORT_ITEM_COUNT;

    fn encode(&self, w: &mut Writer) -> Result<(), WireError> {
        w.put_u16(self.seed)?;
        for v in self.available {
            w.put_i8(v)?;
        }
        Ok(())
    }

    fn decode(r: &mut Reader) -> Result<StarportUpdate, WireError> {
        let seed = r.take_u16()?;
        let mut available = [0i8; STARPORT_ITEM_COUNT];
        for slot in &mut available {
            *slot = r.take_i8()?;
        }
        Ok(StarportUpdate { seed, available })
    }
}

/// Wire-visible fields of one structure, including its build-queue counts
/// for every producible-item slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StructureDelta {
    pub index: u16,
    pub structure_type: u8,
    pub linked_id: u8,
    pub flags: ObjectFlags,
    pub house: u8,
    pub pos_x: u16,
    pub pos_y: u16,
    pub hitpoints: u16,
    pub creator_house: u8,
    pub rotation_sprite_diff: u16,
    pub object_type: u8,
    pub upgrade_level: u8,
    pub upgrade_time_left: u8,
    pub count_down: u16,
    pub rally_point: u16,
    pub build_queue: [u8; BUILD_SLOT_COUNT],
}

impl Default for StructureDelta {
    fn default() -> Self {
        StructureDelta {
            index: 0,
            structure_type: 0,
            linked_id: 0xFF,
            flags: ObjectFlags::default(),
            house: 0,
            pos_x: 0,
            pos_y: 0,
            hitpoints: 0,
            creator_house: 0,
            rotation_sprite_diff: 0,
            object_type: 0xFF,
            upgrade_level: 0,
            upgrade_time_left: 0,
            count_down: 0,
            rally_point: 0,
            build_queue: [0; BUILD_SLOT_COUNT],
        }
    }
}

impl StructureDelta {
    pub const WIRE_LEN: usize = 25 + BUILD_SLOT_COUNT;

    fn encode(&self, w: &mut Writer) -> Result<(), WireError> {
        w.put_u16(self.index)?;
        w.put_u8(self.structure_type)?;
        w.put_u8(self.linked_id)?;
        w.put_u32(self.flags.0)?;
        w.put_u8(self.house)?;
        w.put_u16(self.pos_x)?;
        w.put_u16(self.pos_y)?;
        w.put_u16(self.hitpoints)?;
        w.put_u8(self.creator_house)?;
        w.put_u16(self.rotation_sprite_diff)?;
        w.put_u8(self.object_type)?;
        w.put_u8(self.upgrade_level)?;
        w.put_u8(self.upgrade_time_left)?;
        w.put_u16(self.count_down)?;
        w.put_u16(self.rally_point)?;
        w.put_bytes(&self.build_queue)
    }

    fn decode(r: &mut Reader) -> Result<StructureDelta, WireError> {
        let mut s = StructureDelta {
            index: r.take_u16()?,
            structure_type: r.take_u8()?,
            linked_id: r.take_u8()?,
            flags: ObjectFlags(r.take_u32()?),
            house: r.take_u8()?,
            pos_x: r.take_u16()?,
            pos_y: r.take_u16()?,
            hitpoints: r.take_u16()?,
            creator_house: r.take_u8()?,
            rotation_sprite_diff: r.take_u16()?,
            object_type: r.take_u8()?,
            upgrade_level: r.take_u8()?,
            upgrade_time_left: r.take_u8()?,
            count_down: r.take_u16()?,
            rally_point: r.take_u16()?,
            ..StructureDelta::default()
        };
        let queue = r.take_bytes(BUILD_SLOT_COUNT)?;
        s.build_queue.copy_from_slice(queue);
        Ok(s)
    }
}

/// Wire-visible fields of one unit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UnitDelta {
    pub index: u16,
    pub unit_type: u8,
    pub flags: ObjectFlags,
    pub house: u8,
    pub pos_x: u16,
    pub pos_y: u16,
    pub hitpoints: u16,
    pub action: u8,
    pub next_action: u8,
    pub amount: u8,
    pub deviated: u8,
    pub deviation_house: u8,
    pub orientation: [u8; 2],
    pub wobble_index: u8,
    pub sprite_offset: u8,
    pub blink_house: u8,
}

impl UnitDelta {
    pub const WIRE_LEN: usize = 24;

    fn encode(&self, w: &mut Writer) -> Result<(), WireError> {
        w.put_u16(self.index)?;
        w.put_u8(self.unit_type)?;
        w.put_u32(self.flags.0)?;
        w.put_u8(self.house)?;
        w.put_u16(self.pos_x)?;
        w.put_u16(self.pos_y)?;
        w.put_u16(self.hitpoints)?;
        w.put_u8(self.action)?;
        w.put_u8(self.next_action)?;
        w.put_u8(self.amount)?;
        w.put_u8(self.deviated)?;
        w.put_u8(self.deviation_house)?;
        w.put_u8(self.orientation[0])?;
        w.put_u8(self.orientation[1])?;
        w.put_u8(self.wobble_index)?;
        w.put_u8(self.sprite_offset)?;
        w.put_u8(self.blink_house)
    }

    fn decode(r: &mut Reader) -> Result<UnitDelta, WireError> {
        Ok(UnitDelta {
            index: r.take_u16()?,
            unit_type: r.take_u8()?,
            flags: ObjectFlags(r.take_u32()?),
            house: r.take_u8()?,
            pos_x: r.take_u16()?,
            pos_y: r.take_u16()?,
            hitpoints: r.take_u16()?,
            action: r.take_u8()?,
            next_action: r.take_u8()?,
            amount: r.take_u8()?,
            deviated: r.take_u8()?,
            deviation_house: r.take_u8()?,
            orientation: [r.take_u8()?, r.take_u8()?],
            wobble_index: r.take_u8()?,
            sprite_offset: r.take_u8()?,
            blink_house: r.take_u8()?,
        })
    }
}

/// One active explosion slot. Explosions are short-lived, so all active
/// slots are resent in full every sync tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExplosionSlot {
    pub sprite_id: u16,
    pub pos_x: u16,
    pub pos_y: u16,
    pub house: u8,
}

impl ExplosionSlot {
    pub const WIRE_LEN: usize = 7;

    fn encode(&self, w: &mut Writer) -> Result<(), WireError> {
        w.put_u16(self.sprite_id)?;
        w.put_u16(self.pos_x)?;
        w.put_u16(self.pos_y)?;
        w.put_u8(self.house)
    }

    fn decode(r: &mut Reader) -> Result<ExplosionSlot, WireError> {
        Ok(ExplosionSlot {
            sprite_id: r.take_u16()?,
            pos_x: r.take_u16()?,
            pos_y: r.take_u16()?,
            house: r.take_u8()?,
        })
    }
}

/// Public identity of a connected peer, as carried by the roster message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RosterEntry {
    pub id: PeerId,
    pub name: String,
}

impl RosterEntry {
    fn wire_len(&self) -> usize {
        2 + self.name.len().min(MAX_NAME_LEN)
    }

    fn encode(&self, w: &mut Writer) -> Result<(), WireError> {
        let name = truncated(&self.name, MAX_NAME_LEN);
        w.put_u8(self.id.0)?;
        w.put_u8(name.len() as u8)?;
        w.put_bytes(name)
    }

    fn decode(r: &mut Reader) -> Result<RosterEntry, WireError> {
        let id = PeerId(r.take_u8()?);
        let len = r.take_u8()? as usize;
        let name = String::from_utf8_lossy(r.take_bytes(len)?).into_owned();
        Ok(RosterEntry { id, name })
    }
}

/// Controller of one house slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Brain {
    #[default]
    None,
    Human,
    Cpu,
}

impl Brain {
    fn to_wire(self) -> u8 {
        match self {
            Brain::None => 0,
            Brain::Human => 1,
            Brain::Cpu => 2,
        }
    }

    fn from_wire(raw: u8) -> Brain {
        match raw {
            1 => Brain::Human,
            2 => Brain::Cpu,
            _ => Brain::None,
        }
    }
}

/// Per-house session configuration inside the scenario parameters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HouseSlot {
    /// Assigned peer (`PeerId::NONE` when AI-controlled or unused).
    pub client: PeerId,
    pub brain: Brain,
    pub team: u8,
}

/// Scenario and session parameters, broadcast on demand (right after a
/// peer joins or whenever the lobby configuration changes). Also the shape
/// of the dedicated server's JSON scenario file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioParams {
    pub credits: u16,
    pub seed: u32,
    pub seed_mode: u32,
    pub lose_condition: u32,
    pub min_spice_fields: u32,
    pub max_spice_fields: u32,
    pub worm_count: u32,
    pub fog_of_war: bool,
    pub insatiable_worms: bool,
    pub houses: [HouseSlot; HOUSE_COUNT],
}

impl Default for ScenarioParams {
    fn default() -> Self {
        ScenarioParams {
            credits: 1500,
            seed: 0,
            seed_mode: 0,
            lose_condition: 0,
            min_spice_fields: 24,
            max_spice_fields: 64,
            worm_count: 2,
            fog_of_war: false,
            insatiable_worms: false,
            houses: [HouseSlot::default(); HOUSE_COUNT],
        }
    }
}

impl ScenarioParams {
    pub const WIRE_LEN: usize = 28 + 3 * HOUSE_COUNT;

    fn encode(&self, w: &mut Writer) -> Result<(), WireError> {
        w.put_u16(self.credits)?;
        w.put_u32(self.seed)?;
        w.put_u32(self.seed_mode)?;
        w.put_u32(self.lose_condition)?;
        w.put_u32(self.min_spice_fields)?;
        w.put_u32(self.max_spice_fields)?;
        w.put_u32(self.worm_count)?;
        w.put_u8(u8::from(self.fog_of_war))?;
        w.put_u8(u8::from(self.insatiable_worms))?;
        for slot in &self.houses {
            w.put_u8(slot.client.0)?;
            w.put_u8(slot.brain.to_wire())?;
            w.put_u8(slot.team)?;
        }
        Ok(())
    }

    fn decode(r: &mut Reader) -> Result<ScenarioParams, WireError> {
        let mut params = ScenarioParams {
            credits: r.take_u16()?,
            seed: r.take_u32()?,
            seed_mode: r.take_u32()?,
            lose_condition: r.take_u32()?,
            min_spice_fields: r.take_u32()?,
            max_spice_fields: r.take_u32()?,
            worm_count: r.take_u32()?,
            fog_of_war: r.take_u8()? != 0,
            insatiable_worms: r.take_u8()? != 0,
            ..ScenarioParams::default()
        };
        for slot in &mut params.houses {
            slot.client = PeerId(r.take_u8()?);
            slot.brain = Brain::from_wire(r.take_u8()?);
            slot.team = r.take_u8()?;
        }
        Ok(params)
    }
}

/// Commands sent by a client to the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientMessage {
    /// Concede the game and return to the lobby.
    ReturnToLobby,
    /// Toggle repair (or start an upgrade) on a structure.
    RepairUpgradeStructure { target: EntityRef },
    /// Set a production structure's rally point.
    SetRallyPoint { target: EntityRef, tile: PackedTile },
    /// Buy or resume a production item.
    PurchaseResumeItem { target: EntityRef, item: u8 },
    /// Pause or cancel a production item.
    PauseCancelItem { target: EntityRef, item: u8 },
    /// Enter placement mode for a finished structure; `None` leaves it.
    EnterLeavePlacementMode { target: EntityRef },
    /// Place the pending structure at a tile.
    PlaceStructure { tile: PackedTile },
    /// Activate a structure's special ability (starport order,
    /// superweapon launch, repair-facility eject).
    ActivateStructureAbility { target: EntityRef },
    /// Launch the house missile at a tile.
    LaunchMissile { tile: PackedTile },
    /// Order a unit: action id, encoded target, acting unit.
    IssueUnitAction { action: u8, target: u16, unit: EntityRef },
    /// Preferred display name (fixed-size zero-padded wire field).
    PreferredName { name: String },
    /// Preferred house selection; `HouseId::INVALID` deselects.
    PreferredHouse { house: HouseId },
    /// Chat line with a destination house mask.
    Chat { houses: u8, text: String },
}

impl ClientMessage {
    pub fn tag(&self) -> u8 {
        match self {
            ClientMessage::ReturnToLobby => CS_RETURN_TO_LOBBY,
            ClientMessage::RepairUpgradeStructure { .. } => CS_REPAIR_UPGRADE,
            ClientMessage::SetRallyPoint { .. } => CS_SET_RALLY_POINT,
            ClientMessage::PurchaseResumeItem { .. } => CS_PURCHASE_RESUME,
            ClientMessage::PauseCancelItem { .. } => CS_PAUSE_CANCEL,
            ClientMessage::EnterLeavePlacementMode { .. } => CS_PLACEMENT_MODE,
            ClientMessage::PlaceStructure { .. } => CS_PLACE_STRUCTURE,
            ClientMessage::ActivateStructureAbility { .. } => CS_ACTIVATE_ABILITY,
            ClientMessage::LaunchMissile { .. } => CS_LAUNCH_MISSILE,
            ClientMessage::IssueUnitAction { .. } => CS_UNIT_ACTION,
            ClientMessage::PreferredName { .. } => CS_PREF_NAME,
            ClientMessage::PreferredHouse { .. } => CS_PREF_HOUSE,
            ClientMessage::Chat { .. } => CS_CHAT,
        }
    }

    /// Payload length in bytes, excluding the tag.
    pub fn wire_len(&self) -> usize {
        match self {
            ClientMessage::ReturnToLobby => 0,
            ClientMessage::RepairUpgradeStructure { .. } => 2,
            ClientMessage::SetRallyPoint { .. } => 4,
            ClientMessage::PurchaseResumeItem { .. } => 3,
            ClientMessage::PauseCancelItem { .. } => 3,
            ClientMessage::EnterLeavePlacementMode { .. } => 2,
            ClientMessage::PlaceStructure { .. } => 2,
            ClientMessage::ActivateStructureAbility { .. } => 2,
            ClientMessage::LaunchMissile { .. } => 2,
            ClientMessage::IssueUnitAction { .. } => 5,
            ClientMessage::PreferredName { .. } => MAX_NAME_LEN + 1,
            ClientMessage::PreferredHouse { .. } => 1,
            ClientMessage::Chat { text, .. } => 2 + text.len().min(MAX_CHAT_LEN),
        }
    }

    /// Full framed length: tag byte plus payload.
    pub fn framed_len(&self) -> usize {
        1 + self.wire_len()
    }

    /// Append tag and payload to the writer.
    pub fn encode(&self, w: &mut Writer) -> Result<(), WireError> {
        w.put_u8(self.tag())?;
        match self {
            ClientMessage::ReturnToLobby => Ok(()),
            ClientMessage::RepairUpgradeStructure { target }
            | ClientMessage::EnterLeavePlacementMode { target }
            | ClientMessage::ActivateStructureAbility { target } => w.put_entity_ref(*target),
            ClientMessage::SetRallyPoint { target, tile } => {
                w.put_entity_ref(*target)?;
                w.put_u16(tile.0)
            }
            ClientMessage::PurchaseResumeItem { target, item }
            | ClientMessage::PauseCancelItem { target, item } => {
                w.put_entity_ref(*target)?;
                w.put_u8(*item)
            }
            ClientMessage::PlaceStructure { tile } | ClientMessage::LaunchMissile { tile } => {
                w.put_u16(tile.0)
            }
            ClientMessage::IssueUnitAction {
                action,
                target,
                unit,
            } => {
                w.put_u8(*action)?;
                w.put_u16(*target)?;
                w.put_entity_ref(*unit)
            }
            ClientMessage::PreferredName { name } => {
                let bytes = truncated(name, MAX_NAME_LEN);
                let mut field = [0u8; MAX_NAME_LEN + 1];
                field[..bytes.len()].copy_from_slice(bytes);
                w.put_bytes(&field)
            }
            ClientMessage::PreferredHouse { house } => w.put_u8(house.0),
            ClientMessage::Chat { houses, text } => {
                let bytes = truncated(text, MAX_CHAT_LEN);
                w.put_u8(*houses)?;
                w.put_u8(bytes.len() as u8)?;
                w.put_bytes(bytes)
            }
        }
    }

    /// Decode one message (tag byte first) from the reader.
    pub fn decode(r: &mut Reader) -> Result<ClientMessage, WireError> {
        let tag = r.take_u8()?;
        match tag {
            CS_RETURN_TO_LOBBY => Ok(ClientMessage::ReturnToLobby),
            CS_REPAIR_UPGRADE => Ok(ClientMessage::RepairUpgradeStructure {
                target: r.take_entity_ref()?,
            }),
            CS_SET_RALLY_POINT => Ok(ClientMessage::SetRallyPoint {
                target: r.take_entity_ref()?,
                tile: PackedTile(r.take_u16()?),
            }),
            CS_PURCHASE_RESUME => Ok(ClientMessage::PurchaseResumeItem {
                target: r.take_entity_ref()?,
                item: r.take_u8()?,
            }),
            CS_PAUSE_CANCEL => Ok(ClientMessage::PauseCancelItem {
                target: r.take_entity_ref()?,
                item: r.take_u8()?,
            }),
            CS_PLACEMENT_MODE => Ok(ClientMessage::EnterLeavePlacementMode {
                target: r.take_entity_ref()?,
            }),
            CS_PLACE_STRUCTURE => Ok(ClientMessage::PlaceStructure {
                tile: PackedTile(r.take_u16()?),
            }),
            CS_ACTIVATE_ABILITY => Ok(ClientMessage::ActivateStructureAbility {
                target: r.take_entity_ref()?,
            }),
            CS_LAUNCH_MISSILE => Ok(ClientMessage::LaunchMissile {
                tile: PackedTile(r.take_u16()?),
            }),
            CS_UNIT_ACTION => Ok(ClientMessage::IssueUnitAction {
                action: r.take_u8()?,
                target: r.take_u16()?,
                unit: r.take_entity_ref()?,
            }),
            CS_PREF_NAME => {
                let field = r.take_bytes(MAX_NAME_LEN + 1)?;
                let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
                Ok(ClientMessage::PreferredName {
                    name: String::from_utf8_lossy(&field[..end]).into_owned(),
                })
            }
            CS_PREF_HOUSE => Ok(ClientMessage::PreferredHouse {
                house: HouseId(r.take_u8()?),
            }),
            CS_CHAT => {
                let houses = r.take_u8()?;
                let len = r.take_u8()? as usize;
                let text = String::from_utf8_lossy(r.take_bytes(len)?).into_owned();
                Ok(ClientMessage::Chat { houses, text })
            }
            other => Err(WireError::UnknownTag(other)),
        }
    }
}

/// State deltas and events sent by the server to a client.
#[derive(Clone, Debug, PartialEq)]
pub enum ServerMessage {
    /// The server is closing this connection.
    Disconnect,
    /// Changed landscape tiles.
    UpdateLandscape { tiles: Vec<TileDelta> },
    /// Newly unveiled tiles for the receiving house.
    UpdateFogOfWar { reveals: Vec<FogReveal> },
    /// The receiving house's full network state.
    UpdateHouse(HouseUpdate),
    /// Starport availability and pricing seed.
    UpdateStarport(StarportUpdate),
    /// Changed structures.
    UpdateStructures { structures: Vec<StructureDelta> },
    /// Changed units.
    UpdateUnits { units: Vec<UnitDelta> },
    /// All active explosion slots.
    UpdateExplosions { explosions: Vec<ExplosionSlot> },
    /// Shake the viewport centred on a tile.
    ScreenShake { tile: PackedTile },
    /// Status-bar text: priority plus up to three string ids (0 = unset).
    StatusMessage {
        priority: u8,
        str1: u16,
        str2: u16,
        str3: u16,
    },
    /// Play a sound effect.
    PlaySound { sound: u8 },
    /// Play a sound effect at a world position.
    PlaySoundAtTile { sound: u8, pos_x: u16, pos_y: u16 },
    /// Play a voice cue at a tile.
    PlayVoice { voice: u8, tile: PackedTile },
    /// Switch to battle music.
    PlayBattleMusic,
    /// Game over for the receiving house.
    WinLose { won: bool },
    /// The receiving peer's server-assigned identity.
    Identity { id: PeerId },
    /// Connected-peer roster.
    ClientList { roster: Vec<RosterEntry> },
    /// Scenario and session parameters.
    Scenario(ScenarioParams),
    /// The game is starting.
    StartGame,
    /// Chat line; `from` is `PeerId::NONE` for server announcements.
    Chat { from: PeerId, text: String },
}

impl ServerMessage {
    pub fn tag(&self) -> u8 {
        match self {
            ServerMessage::Disconnect => SC_DISCONNECT,
            ServerMessage::UpdateLandscape { .. } => SC_LANDSCAPE,
            ServerMessage::UpdateFogOfWar { .. } => SC_FOG_OF_WAR,
            ServerMessage::UpdateHouse(_) => SC_HOUSE,
            ServerMessage::UpdateStarport(_) => SC_STARPORT,
            ServerMessage::UpdateStructures { .. } => SC_STRUCTURES,
            ServerMessage::UpdateUnits { .. } => SC_UNITS,
            ServerMessage::UpdateExplosions { .. } => SC_EXPLOSIONS,
            ServerMessage::ScreenShake { .. } => SC_SCREEN_SHAKE,
            ServerMessage::StatusMessage { .. } => SC_STATUS_MESSAGE,
            ServerMessage::PlaySound { .. } => SC_PLAY_SOUND,
            ServerMessage::PlaySoundAtTile { .. } => SC_PLAY_SOUND_AT_TILE,
            ServerMessage::PlayVoice { .. } => SC_PLAY_VOICE,
            ServerMessage::PlayBattleMusic => SC_BATTLE_MUSIC,
            ServerMessage::WinLose { .. } => SC_WIN_LOSE,
            ServerMessage::Identity { .. } => SC_IDENTITY,
            ServerMessage::ClientList { .. } => SC_CLIENT_LIST,
            ServerMessage::Scenario(_) => SC_SCENARIO,
            ServerMessage::StartGame => SC_START_GAME,
            ServerMessage::Chat { .. } => SC_CHAT,
        }
    }

    /// Payload length in bytes, excluding the tag.
    pub fn wire_len(&self) -> usize {
        match self {
            ServerMessage::Disconnect | ServerMessage::PlayBattleMusic | ServerMessage::StartGame => 0,
            ServerMessage::UpdateLandscape { tiles } => 2 + TileDelta::WIRE_LEN * tiles.len(),
            ServerMessage::UpdateFogOfWar { reveals } => 2 + FogReveal::WIRE_LEN * reveals.len(),
            ServerMessage::UpdateHouse(_) => HouseUpdate::WIRE_LEN,
            ServerMessage::UpdateStarport(_) => StarportUpdate::WIRE_LEN,
            ServerMessage::UpdateStructures { structures } => {
                1 + StructureDelta::WIRE_LEN * structures.len()
            }
            ServerMessage::UpdateUnits { units } => 1 + UnitDelta::WIRE_LEN * units.len(),
            ServerMessage::UpdateExplosions { explosions } => {
                1 + ExplosionSlot::WIRE_LEN * explosions.len()
            }
            ServerMessage::ScreenShake { .. } => 2,
            ServerMessage::StatusMessage { .. } => 7,
            ServerMessage::PlaySound { .. } => 1,
            ServerMessage::PlaySoundAtTile { .. } => 5,
            ServerMessage::PlayVoice { .. } => 3,
            ServerMessage::WinLose { .. } => 1,
            ServerMessage::Identity { .. } => 1,
            ServerMessage::ClientList { roster } => {
                1 + roster.iter().map(RosterEntry::wire_len).sum::<usize>()
            }
            ServerMessage::Scenario(_) => ScenarioParams::WIRE_LEN,
            ServerMessage::Chat { text, .. } => 2 + text.len().min(MAX_CHAT_LEN),
        }
    }

    /// Full framed length: tag byte plus payload.
    pub fn framed_len(&self) -> usize {
        1 + self.wire_len()
    }

    /// Append tag and payload to the writer.
    pub fn encode(&self, w: &mut Writer) -> Result<(), WireError> {
        w.put_u8(self.tag())?;
        match self {
            ServerMessage::Disconnect
            | ServerMessage::PlayBattleMusic
            | ServerMessage::StartGame => Ok(()),
            ServerMessage::UpdateLandscape { tiles } => {
                w.put_u16(tiles.len() as u16)?;
                for t in tiles {
                    t.encode(w)?;
                }
                Ok(())
            }
            ServerMessage::UpdateFogOfWar { reveals } => {
                w.put_u16(reveals.len() as u16)?;
                for f in reveals {
                    f.encode(w)?;
                }
                Ok(())
            }
            ServerMessage::UpdateHouse(h) => h.encode(w),
            ServerMessage::UpdateStarport(s) => s.encode(w),
            ServerMessage::UpdateStructures { structures } => {
                w.put_u8(structures.len() as u8)?;
                for s in structures {
                    s.encode(w)?;
                }
                Ok(())
            }
            ServerMessage::UpdateUnits { units } => {
                w.put_u8(units.len() as u8)?;
                for u in units {
                    u.encode(w)?;
                }
                Ok(())
            }
            ServerMessage::UpdateExplosions { explosions } => {
                w.put_u8(explosions.len() as u8)?;
                for e in explosions {
                    e.encode(w)?;
                }
                Ok(())
            }
            ServerMessage::ScreenShake { tile } => w.put_u16(tile.0),
            ServerMessage::StatusMessage {
                priority,
                str1,
                str2,
                str3,
            } => {
                w.put_u8(*priority)?;
                w.put_u16(*str1)?;
                w.put_u16(*str2)?;
                w.put_u16(*str3)
            }
            ServerMessage::PlaySound { sound } => w.put_u8(*sound),
            ServerMessage::PlaySoundAtTile { sound, pos_x, pos_y } => {
                w.put_u8(*sound)?;
                w.put_u16(*pos_x)?;
                w.put_u16(*pos_y)
            }
            ServerMessage::PlayVoice { voice, tile } => {
                w.put_u8(*voice)?;
                w.put_u16(tile.0)
            }
            ServerMessage::WinLose { won } => w.put_u8(if *won { b'W' } else { b'L' }),
            ServerMessage::Identity { id } => w.put_u8(id.0),
            ServerMessage::ClientList { roster } => {
                w.put_u8(roster.len() as u8)?;
                for entry in roster {
                    entry.encode(w)?;
                }
                Ok(())
            }
            ServerMessage::Scenario(params) => params.encode(w),
            ServerMessage::Chat { from, text } => {
                let bytes = truncated(text, MAX_CHAT_LEN);
                w.put_u8(from.0)?;
                w.put_u8(bytes.len() as u8)?;
                w.put_bytes(bytes)
            }
        }
    }

    /// Decode one message (tag byte first) from the reader.
    pub fn decode(r: &mut Reader) -> Result<ServerMessage, WireError> {
        let tag = r.take_u8()?;
        match tag {
            SC_DISCONNECT => Ok(ServerMessage::Disconnect),
            SC_LANDSCAPE => {
                let count = r.take_u16()? as usize;
                if count > MAP_TILE_COUNT {
                    return Err(WireError::BadCount(count));
                }
                let mut tiles = Vec::with_capacity(count);
                for _ in 0..count {
                    tiles.push(TileDelta::decode(r)?);
                }
                Ok(ServerMessage::UpdateLandscape { tiles })
            }
            SC_FOG_OF_WAR => {
                let count = r.take_u16()? as usize;
                if count > MAP_TILE_COUNT {
                    return Err(WireError::BadCount(count));
                }
                let mut reveals = Vec::with_capacity(count);
                for _ in 0..count {
                    reveals.push(FogReveal::decode(r)?);
                }
                Ok(ServerMessage::UpdateFogOfWar { reveals })
            }
            SC_HOUSE => Ok(ServerMessage::UpdateHouse(HouseUpdate::decode(r)?)),
            SC_STARPORT => Ok(ServerMessage::UpdateStarport(StarportUpdate::decode(r)?)),
            SC_STRUCTURES => {
                let count = r.take_u8()? as usize;
                let mut structures = Vec::with_capacity(count);
                for _ in 0..count {
                    structures.push(StructureDelta::decode(r)?);
                }
                Ok(ServerMessage::UpdateStructures { structures })
            }
            SC_UNITS => {
                let count = r.take_u8()? as usize;
                let mut units = Vec::with_capacity(count);
                for _ in 0..count {
                    units.push(UnitDelta::decode(r)?);
                }
                Ok(ServerMessage::UpdateUnits { units })
            }
            SC_EXPLOSIONS => {
                let count = r.take_u8()? as usize;
                if count > MAX_EXPLOSIONS {
                    return Err(WireError::BadCount(count));
                }
                let mut explosions = Vec::with_capacity(count);
                for _ in 0..count {
                    explosions.push(ExplosionSlot::decode(r)?);
                }
                Ok(ServerMessage::UpdateExplosions { explosions })
            }
            SC_SCREEN_SHAKE => Ok(ServerMessage::ScreenShake {
                tile: PackedTile(r.take_u16()?),
            }),
            SC_STATUS_MESSAGE => Ok(ServerMessage::StatusMessage {
                priority: r.take_u8()?,
                str1: r.take_u16()?,
                str2: r.take_u16()?,
                str3: r.take_u16()?,
            }),
            SC_PLAY_SOUND => Ok(ServerMessage::PlaySound {
                sound: r.take_u8()?,
            }),
            SC_PLAY_SOUND_AT_TILE => Ok(ServerMessage::PlaySoundAtTile {
                sound: r.take_u8()?,
                pos_x: r.take_u16()?,
                pos_y: r.take_u16()?,
            }),
            SC_PLAY_VOICE => Ok(ServerMessage::PlayVoice {
                voice: r.take_u8()?,
                tile: PackedTile(r.take_u16()?),
            }),
            SC_BATTLE_MUSIC => Ok(ServerMessage::PlayBattleMusic),
            SC_WIN_LOSE => Ok(ServerMessage::WinLose {
                won: r.take_u8()? == b'W',
            }),
            SC_IDENTITY => Ok(ServerMessage::Identity {
                id: PeerId(r.take_u8()?),
            }),
            SC_CLIENT_LIST => {
                let count = r.take_u8()? as usize;
                let mut roster = Vec::with_capacity(count.min(MAX_CLIENTS));
                for i in 0..count {
                    let entry = RosterEntry::decode(r)?;
                    // Entries beyond the peer-slot count are consumed but
                    // dropped: the declared name length makes the span
                    // skippable.
                    if i < MAX_CLIENTS {
                        roster.push(entry);
                    }
                }
                Ok(ServerMessage::ClientList { roster })
            }
            SC_SCENARIO => Ok(ServerMessage::Scenario(ScenarioParams::decode(r)?)),
            SC_START_GAME => Ok(ServerMessage::StartGame),
            SC_CHAT => {
                let from = PeerId(r.take_u8()?);
                let len = r.take_u8()? as usize;
                let text = String::from_utf8_lossy(r.take_bytes(len)?).into_owned();
                Ok(ServerMessage::Chat { from, text })
            }
            other => Err(WireError::UnknownTag(other)),
        }
    }
}

/// A message that knows its framed size and can append itself to a
/// writer. Both direction catalogs implement it, so outbound buffers can
/// carry either.
pub trait NetMessage {
    fn framed_len(&self) -> usize;
    fn encode(&self, w: &mut Writer) -> Result<(), WireError>;
}

impl NetMessage for ClientMessage {
    fn framed_len(&self) -> usize {
        ClientMessage::framed_len(self)
    }

    fn encode(&self, w: &mut Writer) -> Result<(), WireError> {
        ClientMessage::encode(self, w)
    }
}

impl NetMessage for ServerMessage {
    fn framed_len(&self) -> usize {
        ServerMessage::framed_len(self)
    }

    fn encode(&self, w: &mut Writer) -> Result<(), WireError> {
        ServerMessage::encode(self, w)
    }
}

/// Truncate a string to at most `max` bytes without splitting a UTF-8
/// character.
fn truncated(s: &str, max: usize) -> &[u8] {
    if s.len() <= max {
        return s.as_bytes();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s.as_bytes()[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_wire_lengths() {
        assert_eq!(TileDelta::WIRE_LEN, 6);
        assert_eq!(HouseUpdate::WIRE_LEN, 33);
        assert_eq!(StarportUpdate::WIRE_LEN, 12);
        assert_eq!(StructureDelta::WIRE_LEN, 49);
        assert_eq!(UnitDelta::WIRE_LEN, 24);
        assert_eq!(ExplosionSlot::WIRE_LEN, 7);
        assert_eq!(ScenarioParams::WIRE_LEN, 46);
    }

    #[test]
    fn encoded_length_matches_declared_length() {
        let msgs = [
            ServerMessage::Disconnect,
            ServerMessage::UpdateHouse(HouseUpdate::default()),
            ServerMessage::UpdateLandscape {
                tiles: vec![TileDelta::default(); 3],
            },
            ServerMessage::ClientList {
                roster: vec![RosterEntry {
                    id: PeerId(1),
                    name: "Atreya".into(),
                }],
            },
            ServerMessage::Chat {
                from: PeerId(2),
                text: "hello".into(),
            },
        ];
        for msg in msgs {
            let mut buf = [0u8; 512];
            let mut w = Writer::new(&mut buf);
            msg.encode(&mut w).unwrap();
            assert_eq!(w.written(), msg.framed_len(), "length mismatch for {msg:?}");
        }
    }

    #[test]
    fn chat_text_truncates_at_limit() {
        let msg = ClientMessage::Chat {
            houses: 0xFF,
            text: "x".repeat(200),
        };
        let mut buf = [0u8; 256];
        let mut w = Writer::new(&mut buf);
        msg.encode(&mut w).unwrap();
        assert_eq!(w.written(), 1 + 2 + MAX_CHAT_LEN);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        // "é" is two bytes; cutting at 3 must not split it.
        assert_eq!(truncated("aéé", 3), "aé".as_bytes());
        assert_eq!(truncated("abc", 3), b"abc");
    }

    #[test]
    fn unknown_tag_is_a_fault() {
        let buf = [0xEEu8, 0, 0];
        let err = ServerMessage::decode(&mut Reader::new(&buf)).unwrap_err();
        assert_eq!(err, WireError::UnknownTag(0xEE));
        let err = ClientMessage::decode(&mut Reader::new(&buf)).unwrap_err();
        assert_eq!(err, WireError::UnknownTag(0xEE));
    }

    #[test]
    fn oversized_explosion_count_rejected() {
        let mut buf = [0u8; 4];
        buf[0] = SC_EXPLOSIONS;
        buf[1] = (MAX_EXPLOSIONS + 1) as u8;
        let err = ServerMessage::decode(&mut Reader::new(&buf)).unwrap_err();
        assert_eq!(err, WireError::BadCount(MAX_EXPLOSIONS + 1));
    }

    #[test]
    fn roster_entries_beyond_slot_count_are_skipped() {
        let roster: Vec<RosterEntry> = (1..=(MAX_CLIENTS + 2) as u8)
            .map(|i| RosterEntry {
                id: PeerId(i),
                name: format!("p{i}"),
            })
            .collect();
        let msg = ServerMessage::ClientList { roster };
        let mut buf = [0u8; 256];
        let mut w = Writer::new(&mut buf);
        msg.encode(&mut w).unwrap();
        let written = w.written();

        let mut r = Reader::new(&buf[..written]);
        match ServerMessage::decode(&mut r).unwrap() {
            ServerMessage::ClientList { roster } => {
                assert_eq!(roster.len(), MAX_CLIENTS);
                assert_eq!(roster[0].id, PeerId(1));
            }
            other => panic!("expected ClientList, got {other:?}"),
        }
        // Skipped entries were still consumed.
        assert!(r.is_empty());
    }

    #[test]
    fn preferred_name_pads_and_strips() {
        let msg = ClientMessage::PreferredName {
            name: "Rook".into(),
        };
        let mut buf = [0u8; 32];
        let mut w = Writer::new(&mut buf);
        msg.encode(&mut w).unwrap();
        let written = w.written();
        assert_eq!(written, 1 + MAX_NAME_LEN + 1);
        assert_eq!(
            ClientMessage::decode(&mut Reader::new(&buf[..written])).unwrap(),
            msg
        );
    }

    #[test]
    fn tile_bitfields_roundtrip() {
        let t = TileDelta {
            packed: PackedTile::from_xy(40, 9),
            ground_sprite_id: 0x17F,
            overlay_sprite_id: 0x55,
            house: 5,
            has_unit: true,
            has_structure: false,
            index: 0xA1,
        };
        let mut buf = [0u8; TileDelta::WIRE_LEN];
        t.encode(&mut Writer::new(&mut buf)).unwrap();
        assert_eq!(TileDelta::decode(&mut Reader::new(&buf)).unwrap(), t);
    }

    #[test]
    fn fog_reveal_cause_bit() {
        for (cause, top_bit) in [(UnveilCause::Short, 0x8000u16), (UnveilCause::Long, 0)] {
            let f = FogReveal {
                packed: PackedTile(0x0123),
                cause,
            };
            let mut buf = [0u8; 2];
            f.encode(&mut Writer::new(&mut buf)).unwrap();
            let raw = u16::from_le_bytes(buf);
            assert_eq!(raw & 0x8000, top_bit);
            assert_eq!(FogReveal::decode(&mut Reader::new(&buf)).unwrap(), f);
        }
    }

    #[test]
    fn scenario_params_survive_json() {
        let mut params = ScenarioParams {
            seed: 0xDEAD_BEEF,
            fog_of_war: true,
            ..ScenarioParams::default()
        };
        params.houses[2].brain = Brain::Cpu;
        params.houses[2].team = 3;
        let text = serde_json::to_string(&params).unwrap();
        let back: ScenarioParams = serde_json::from_str(&text).unwrap();
        assert_eq!(back, params);
    }
}
