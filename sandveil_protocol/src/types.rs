// Core ID types and shared constants for the multiplayer protocol.
//
// These are lightweight newtypes used by both `message.rs` (the wire
// catalogs) and the networking crate's session management. They are
// protocol-scoped identifiers: the server assigns compact peer ids, houses
// are fixed slot indices, and map tiles travel as packed 16-bit
// coordinates. Entity references pack an entity kind together with a pool
// index into a single u16 for the wire.

use serde::{Deserialize, Serialize};

/// Number of playable house slots. Fixed at world creation; houses are
/// never allocated or freed, only marked active.
pub const HOUSE_COUNT: usize = 6;

/// Maximum peer slots on a server. One slot is taken by the host itself
/// when it plays, so at most `MAX_CLIENTS - 1` remote peers connect.
pub const MAX_CLIENTS: usize = HOUSE_COUNT;

/// Maximum display name length in bytes (excluding the padding byte the
/// fixed-size wire field carries).
pub const MAX_NAME_LEN: usize = 12;

/// Maximum chat message length in bytes.
pub const MAX_CHAT_LEN: usize = 60;

/// Chat destination mask meaning "every peer". Any narrower mask names
/// the houses to leave out of delivery.
pub const HOUSE_MASK_ALL: u8 = 0xFF;

/// Default server listen port.
pub const DEFAULT_PORT: u16 = 10700;

/// Map edge length in tiles. The map is square.
pub const MAP_SIZE: u16 = 64;

/// Total tile count; a packed tile coordinate is always below this.
pub const MAP_TILE_COUNT: usize = (MAP_SIZE as usize) * (MAP_SIZE as usize);

/// Maximum concurrent explosion slots carried on the wire.
pub const MAX_EXPLOSIONS: usize = 32;

/// Number of unit kinds purchasable at the starport (stock table length).
pub const STARPORT_ITEM_COUNT: usize = 10;

/// Producible-item slots per structure build queue.
pub const BUILD_SLOT_COUNT: usize = 24;

/// Server-assigned peer id (compact u8). Id 0 is reserved: it denotes the
/// server itself in chat attribution and "no peer" in house assignments.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u8);

impl PeerId {
    /// The reserved zero identity (server / unassigned).
    pub const NONE: PeerId = PeerId(0);

    /// True when this is a real, assigned peer identity.
    pub fn is_assigned(self) -> bool {
        self.0 != 0
    }
}

/// A house slot index. `HouseId::INVALID` marks "no house".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HouseId(pub u8);

impl HouseId {
    pub const INVALID: HouseId = HouseId(0xFF);

    pub fn is_valid(self) -> bool {
        (self.0 as usize) < HOUSE_COUNT
    }

    /// Iterate over all house slots in index order.
    pub fn all() -> impl Iterator<Item = HouseId> {
        (0..HOUSE_COUNT as u8).map(HouseId)
    }
}

/// A map tile coordinate packed into 12 bits (y * MAP_SIZE + x).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackedTile(pub u16);

impl PackedTile {
    pub fn from_xy(x: u16, y: u16) -> PackedTile {
        PackedTile(y * MAP_SIZE + x)
    }

    pub fn x(self) -> u16 {
        self.0 % MAP_SIZE
    }

    pub fn y(self) -> u16 {
        self.0 / MAP_SIZE
    }

    pub fn is_valid(self) -> bool {
        (self.0 as usize) < MAP_TILE_COUNT
    }
}

/// Why a tile was unveiled. Short-lived unveils (e.g. a passing unit's
/// sensor sweep) expire sooner than long-lived ones; the cause travels in
/// the top bit of a fog-of-war wire entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnveilCause {
    Short,
    Long,
}

/// The kinds of pooled entity an `EntityRef` can point at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityKind {
    Structure,
    Unit,
}

/// A reference to a pooled entity, packed for the wire as a single u16:
/// kind in the top two bits, pool index in the lower fourteen. The all-ones
/// value is the explicit "none" sentinel (e.g. leave-placement-mode).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityRef {
    None,
    Some { kind: EntityKind, index: u16 },
}

/// Wire form of `EntityRef::None`.
pub const ENTITY_REF_NONE: u16 = 0xFFFF;

const ENTITY_INDEX_MASK: u16 = 0x3FFF;

impl EntityRef {
    pub fn structure(index: u16) -> EntityRef {
        EntityRef::Some {
            kind: EntityKind::Structure,
            index,
        }
    }

    pub fn unit(index: u16) -> EntityRef {
        EntityRef::Some {
            kind: EntityKind::Unit,
            index,
        }
    }

    /// Pack into the 16-bit wire form.
    pub fn to_wire(self) -> u16 {
        match self {
            EntityRef::None => ENTITY_REF_NONE,
            EntityRef::Some { kind, index } => {
                let tag: u16 = match kind {
                    EntityKind::Structure => 0,
                    EntityKind::Unit => 1,
                };
                (tag << 14) | (index & ENTITY_INDEX_MASK)
            }
        }
    }

    /// Unpack from the 16-bit wire form. Unknown kind tags decode to
    /// `None`; the dispatcher treats a `None` where an entity is required
    /// as a no-op, matching the skip-malformed policy.
    pub fn from_wire(raw: u16) -> EntityRef {
        if raw == ENTITY_REF_NONE {
            return EntityRef::None;
        }
        let index = raw & ENTITY_INDEX_MASK;
        match raw >> 14 {
            0 => EntityRef::structure(index),
            1 => EntityRef::unit(index),
            _ => EntityRef::None,
        }
    }
}

/// Shared object flag bits for structures and units. Only the three
/// transition-relevant bits have named accessors; the rest of the word is
/// opaque simulation state carried through verbatim.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ObjectFlags(pub u32);

impl ObjectFlags {
    const USED: u32 = 1 << 0;
    const ALLOCATED: u32 = 1 << 1;
    const NOT_ON_MAP: u32 = 1 << 2;

    pub fn used(self) -> bool {
        self.0 & Self::USED != 0
    }

    pub fn allocated(self) -> bool {
        self.0 & Self::ALLOCATED != 0
    }

    pub fn is_not_on_map(self) -> bool {
        self.0 & Self::NOT_ON_MAP != 0
    }

    pub fn with_used(self, v: bool) -> ObjectFlags {
        self.set(Self::USED, v)
    }

    pub fn with_allocated(self, v: bool) -> ObjectFlags {
        self.set(Self::ALLOCATED, v)
    }

    pub fn with_not_on_map(self, v: bool) -> ObjectFlags {
        self.set(Self::NOT_ON_MAP, v)
    }

    fn set(self, bit: u32, v: bool) -> ObjectFlags {
        if v {
            ObjectFlags(self.0 | bit)
        } else {
            ObjectFlags(self.0 & !bit)
        }
    }
}
