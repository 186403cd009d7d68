// Trait seams between the network layer and the game simulation.
//
// The networking crate never runs the simulation. The server reads
// snapshots out of a `ServerWorld` and feeds validated commands into it;
// the client writes received state into a `ClientWorld` and forwards
// presentation one-shots to a `GameEvents` sink. Integration tests drive
// both ends with small in-memory implementations.

use sandveil_protocol::message::{
    ClientMessage, ExplosionSlot, FogReveal, HouseUpdate, ScenarioParams, StarportUpdate,
    StructureDelta, TileDelta, UnitDelta,
};
use sandveil_protocol::types::{HouseId, PackedTile, UnveilCause};

/// Snapshot source and command sink on the authoritative side.
pub trait ServerWorld {
    /// Current wire-visible state of one map tile.
    fn tile(&self, tile: PackedTile) -> TileDelta;

    /// Wire-visible state of every live structure, in pool-index order.
    fn structures(&self) -> Vec<StructureDelta>;

    /// Wire-visible state of every live unit, in pool-index order.
    fn units(&self) -> Vec<UnitDelta>;

    /// Every active explosion slot.
    fn explosions(&self) -> Vec<ExplosionSlot>;

    /// One house's full network state.
    fn house(&self, house: HouseId) -> HouseUpdate;

    /// Starport stock and pricing seed (shared by all houses).
    fn starport(&self) -> StarportUpdate;

    /// Whether a tile is currently unveiled for a house, and why. The
    /// sync layer tracks which unveils each client has already been told
    /// about; the world only reports the present fog state.
    fn unveiled(&self, house: HouseId, tile: PackedTile) -> Option<UnveilCause>;

    /// Apply a validated in-game command on behalf of a house. Only the
    /// acting variants arrive here; lobby traffic (names, house picks,
    /// chat) is consumed by the server itself.
    fn apply_command(&mut self, house: HouseId, command: &ClientMessage);

    /// A house's player conceded or dropped; return its assets to
    /// neutral or destroy them as the game rules dictate.
    fn house_departed(&mut self, house: HouseId);

    /// The lobby phase ended; build the world from the final parameters.
    fn start(&mut self, scenario: &ScenarioParams);
}

/// State sink on the client side.
pub trait ClientWorld {
    fn apply_landscape(&mut self, tiles: &[TileDelta]);
    fn apply_fog_of_war(&mut self, reveals: &[FogReveal]);
    fn apply_house(&mut self, update: &HouseUpdate);
    fn apply_starport(&mut self, update: &StarportUpdate);
    fn apply_structures(&mut self, structures: &[StructureDelta]);
    fn apply_units(&mut self, units: &[UnitDelta]);
    fn apply_explosions(&mut self, explosions: &[ExplosionSlot]);
}

/// Presentation one-shots and state-transition hooks on the client side.
/// The one-shots carry no state; a dropped event degrades the
/// presentation of one moment and nothing else, so none of them are
/// retried. The hooks fire when an applied update changes something the
/// interface renders indirectly (radar, selection mode, factory panels,
/// the selected-unit set); the client detects the transitions against
/// the previous snapshot so the game side does not have to.
pub trait GameEvents {
    fn screen_shake(&mut self, tile: PackedTile);
    fn status_message(&mut self, priority: u8, str1: u16, str2: u16, str3: u16);
    fn play_sound(&mut self, sound: u8);
    fn play_sound_at(&mut self, sound: u8, pos_x: u16, pos_y: u16);
    fn play_voice(&mut self, voice: u8, tile: PackedTile);
    fn play_battle_music(&mut self);
    fn win_lose(&mut self, won: bool);

    /// The owning house's state was applied; recompute radar activation.
    fn refresh_radar(&mut self);
    /// The house missile countdown moved to a new non-zero value.
    fn missile_countdown_ticked(&mut self);
    /// The active structure or house missile came or went; reevaluate
    /// the placement / targeting selection mode.
    fn change_selection_mode(&mut self);
    /// Purchasable production changed (starport stock or an upgrade
    /// level); rebuild any open factory window.
    fn invalidate_production(&mut self);
    /// Unit liveness changed somewhere; recount the unit roster.
    fn recount_units(&mut self);
    /// A unit that may be selected died, was freed, or left the map.
    fn unselect_unit(&mut self, index: u16);
}
