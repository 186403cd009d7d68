// sandveil_protocol — wire protocol for real-time game synchronization.
//
// This crate defines the message catalogs, binary codec, and outbound
// buffering used by the authoritative server (`sandveil_net`) and game
// clients to communicate over TCP. It is shared between both sides and
// has no dependency on the simulation itself.
//
// Module overview:
// - `types.rs`:   Core ID and packing types — `PeerId`, `HouseId`,
//                 `PackedTile`, `EntityRef`, `ObjectFlags` — plus the
//                 protocol-wide size constants.
// - `wire.rs`:    Checked little-endian byte cursors (`Writer`, `Reader`)
//                 and the `WireError` fault type.
// - `message.rs`: Client-to-server and server-to-client message enums,
//                 plus the snapshot structs (`TileDelta`, `StructureDelta`,
//                 `UnitDelta`, `HouseUpdate`, ...).
// - `buffer.rs`:  Fixed-capacity outbound buffers with commit-or-drop
//                 append and rewind support for per-recipient fan-out.
//
// Design decisions:
// - **Binary tag-plus-payload serialization.** Every message is one tag
//   byte followed by a payload whose length is statically known from the
//   tag (or a leading count). Packets are plain concatenations with no
//   outer markers; a decoder walks a packet to exactly zero bytes.
// - **Checked cursors.** A short read or a write past capacity is a hard
//   error, never silent truncation. Unknown tags poison the remainder of
//   the packet, so decoding stops there.
// - **No async runtime.** The transport above this crate uses plain
//   `std::net` sockets polled once per game tick.

pub mod buffer;
pub mod message;
pub mod types;
pub mod wire;

pub use buffer::{
    MAX_CLIENT_MESSAGE_LEN, MAX_HOUSE_MESSAGE_LEN, MAX_SERVER_BROADCAST_MESSAGE_LEN,
    OutboundBuffer,
};
pub use message::{
    Brain, ClientMessage, ExplosionSlot, FogReveal, HouseSlot, HouseUpdate, NetMessage,
    RosterEntry, ScenarioParams, ServerMessage, StarportUpdate, StructureDelta, TileDelta,
    UnitDelta,
};
pub use types::{
    BUILD_SLOT_COUNT, EntityKind, EntityRef, HOUSE_COUNT, HOUSE_MASK_ALL, HouseId, MAP_SIZE,
    MAP_TILE_COUNT, MAX_CHAT_LEN, MAX_CLIENTS, MAX_EXPLOSIONS, MAX_NAME_LEN, ObjectFlags,
    PackedTile, PeerId, STARPORT_ITEM_COUNT, UnveilCause,
};
pub use wire::{Reader, WireError, Writer};

#[cfg(test)]
mod tests {
    use super::*;

    /// Encode a client message into a fresh buffer and decode it back.
    fn client_roundtrip(msg: &ClientMessage) {
        let mut buf = [0u8; MAX_CLIENT_MESSAGE_LEN];
        let mut w = Writer::new(&mut buf);
        msg.encode(&mut w).unwrap();
        let written = w.written();
        assert_eq!(written, msg.framed_len());

        let mut r = Reader::new(&buf[..written]);
        let recovered = ClientMessage::decode(&mut r).unwrap();
        assert!(r.is_empty(), "trailing bytes after {msg:?}");
        assert_eq!(&recovered, msg);
    }

    /// Encode a server message into a fresh buffer and decode it back.
    fn server_roundtrip(msg: &ServerMessage) {
        let mut buf = [0u8; MAX_SERVER_BROADCAST_MESSAGE_LEN];
        let mut w = Writer::new(&mut buf);
        msg.encode(&mut w).unwrap();
        let written = w.written();
        assert_eq!(written, msg.framed_len());

        let mut r = Reader::new(&buf[..written]);
        let recovered = ServerMessage::decode(&mut r).unwrap();
        assert!(r.is_empty(), "trailing bytes after {msg:?}");
        assert_eq!(&recovered, msg);
    }

    #[test]
    fn roundtrip_return_to_lobby() {
        client_roundtrip(&ClientMessage::ReturnToLobby);
    }

    #[test]
    fn roundtrip_repair_upgrade() {
        client_roundtrip(&ClientMessage::RepairUpgradeStructure {
            target: EntityRef::Some {
                kind: EntityKind::Structure,
                index: 17,
            },
        });
    }

    #[test]
    fn roundtrip_set_rally_point() {
        client_roundtrip(&ClientMessage::SetRallyPoint {
            target: EntityRef::Some {
                kind: EntityKind::Structure,
                index: 3,
            },
            tile: PackedTile::from_xy(20, 41),
        });
    }

    #[test]
    fn roundtrip_purchase_resume() {
        client_roundtrip(&ClientMessage::PurchaseResumeItem {
            target: EntityRef::Some {
                kind: EntityKind::Structure,
                index: 9,
            },
            item: 4,
        });
    }

    #[test]
    fn roundtrip_pause_cancel() {
        client_roundtrip(&ClientMessage::PauseCancelItem {
            target: EntityRef::Some {
                kind: EntityKind::Structure,
                index: 9,
            },
            item: 6,
        });
    }

    #[test]
    fn roundtrip_placement_mode_leave() {
        client_roundtrip(&ClientMessage::EnterLeavePlacementMode {
            target: EntityRef::None,
        });
    }

    #[test]
    fn roundtrip_place_structure() {
        client_roundtrip(&ClientMessage::PlaceStructure {
            tile: PackedTile::from_xy(5, 60),
        });
    }

    #[test]
    fn roundtrip_activate_ability() {
        client_roundtrip(&ClientMessage::ActivateStructureAbility {
            target: EntityRef::Some {
                kind: EntityKind::Structure,
                index: 1,
            },
        });
    }

    #[test]
    fn roundtrip_launch_missile() {
        client_roundtrip(&ClientMessage::LaunchMissile {
            tile: PackedTile::from_xy(32, 32),
        });
    }

    #[test]
    fn roundtrip_unit_action() {
        client_roundtrip(&ClientMessage::IssueUnitAction {
            action: 11,
            target: 0x2041,
            unit: EntityRef::Some {
                kind: EntityKind::Unit,
                index: 87,
            },
        });
    }

    #[test]
    fn roundtrip_preferred_house() {
        client_roundtrip(&ClientMessage::PreferredHouse {
            house: HouseId(2),
        });
        client_roundtrip(&ClientMessage::PreferredHouse {
            house: HouseId::INVALID,
        });
    }

    #[test]
    fn roundtrip_client_chat() {
        client_roundtrip(&ClientMessage::Chat {
            houses: 0b0000_0101,
            text: "attack at dawn".into(),
        });
    }

    #[test]
    fn roundtrip_disconnect() {
        server_roundtrip(&ServerMessage::Disconnect);
    }

    #[test]
    fn roundtrip_landscape() {
        server_roundtrip(&ServerMessage::UpdateLandscape {
            tiles: vec![
                TileDelta {
                    packed: PackedTile::from_xy(1, 2),
                    ground_sprite_id: 300,
                    overlay_sprite_id: 12,
                    house: 3,
                    has_unit: false,
                    has_structure: true,
                    index: 40,
                },
                TileDelta::default(),
            ],
        });
    }

    #[test]
    fn roundtrip_landscape_empty() {
        server_roundtrip(&ServerMessage::UpdateLandscape { tiles: vec![] });
    }

    #[test]
    fn roundtrip_fog_of_war() {
        server_roundtrip(&ServerMessage::UpdateFogOfWar {
            reveals: vec![
                FogReveal {
                    packed: PackedTile::from_xy(8, 8),
                    cause: UnveilCause::Short,
                },
                FogReveal {
                    packed: PackedTile::from_xy(9, 8),
                    cause: UnveilCause::Long,
                },
            ],
        });
    }

    #[test]
    fn roundtrip_house_update() {
        server_roundtrip(&ServerMessage::UpdateHouse(HouseUpdate {
            structures_built: 0x0000_0413,
            credits: 2200,
            credits_storage: 3000,
            power_production: 150,
            power_usage: 90,
            windtrap_count: 3,
            starport_time_left: 12,
            starport_linked_id: 0xFFFF,
            structure_active: EntityRef::Some {
                kind: EntityKind::Structure,
                index: 5,
            },
            house_missile: EntityRef::None,
            house_missile_countdown: 0,
            starport_count: [0, 1, 0, 2, 0, 0, 0, 0, 0, 3],
        }));
    }

    #[test]
    fn roundtrip_starport() {
        server_roundtrip(&ServerMessage::UpdateStarport(StarportUpdate {
            seed: 0xBEEF,
            available: [2, -1, 0, 5, -1, 1, 0, 0, 3, -1],
        }));
    }

    #[test]
    fn roundtrip_structures() {
        server_roundtrip(&ServerMessage::UpdateStructures {
            structures: vec![StructureDelta {
                index: 12,
                structure_type: 4,
                linked_id: 0xFF,
                flags: ObjectFlags(0x0000_0003),
                house: 1,
                pos_x: 640,
                pos_y: 1024,
                hitpoints: 450,
                creator_house: 1,
                rotation_sprite_diff: 0,
                object_type: 7,
                upgrade_level: 1,
                upgrade_time_left: 0,
                count_down: 120,
                rally_point: 0x1820,
                build_queue: [0; BUILD_SLOT_COUNT],
            }],
        });
    }

    #[test]
    fn roundtrip_units() {
        server_roundtrip(&ServerMessage::UpdateUnits {
            units: vec![
                UnitDelta {
                    index: 44,
                    unit_type: 9,
                    flags: ObjectFlags(0x0000_0003),
                    house: 2,
                    pos_x: 320,
                    pos_y: 480,
                    hitpoints: 130,
                    action: 6,
                    next_action: 0xFF,
                    amount: 0,
                    deviated: 0,
                    deviation_house: 0,
                    orientation: [64, 64],
                    wobble_index: 3,
                    sprite_offset: 1,
                    blink_house: 0xFF,
                },
                UnitDelta::default(),
            ],
        });
    }

    #[test]
    fn roundtrip_explosions() {
        server_roundtrip(&ServerMessage::UpdateExplosions {
            explosions: vec![ExplosionSlot {
                sprite_id: 180,
                pos_x: 512,
                pos_y: 700,
                house: 4,
            }],
        });
    }

    #[test]
    fn roundtrip_screen_shake() {
        server_roundtrip(&ServerMessage::ScreenShake {
            tile: PackedTile::from_xy(30, 31),
        });
    }

    #[test]
    fn roundtrip_status_message() {
        server_roundtrip(&ServerMessage::StatusMessage {
            priority: 2,
            str1: 140,
            str2: 0,
            str3: 0,
        });
    }

    #[test]
    fn roundtrip_sounds_and_voice() {
        server_roundtrip(&ServerMessage::PlaySound { sound: 38 });
        server_roundtrip(&ServerMessage::PlaySoundAtTile {
            sound: 57,
            pos_x: 800,
            pos_y: 1200,
        });
        server_roundtrip(&ServerMessage::PlayVoice {
            voice: 24,
            tile: PackedTile::from_xy(10, 50),
        });
        server_roundtrip(&ServerMessage::PlayBattleMusic);
    }

    #[test]
    fn roundtrip_win_lose() {
        server_roundtrip(&ServerMessage::WinLose { won: true });
        server_roundtrip(&ServerMessage::WinLose { won: false });
    }

    #[test]
    fn roundtrip_identity() {
        server_roundtrip(&ServerMessage::Identity { id: PeerId(3) });
    }

    #[test]
    fn roundtrip_client_list() {
        server_roundtrip(&ServerMessage::ClientList {
            roster: vec![
                RosterEntry {
                    id: PeerId(1),
                    name: "Host".into(),
                },
                RosterEntry {
                    id: PeerId(2),
                    name: "Guest".into(),
                },
            ],
        });
    }

    #[test]
    fn roundtrip_scenario() {
        let mut params = ScenarioParams {
            credits: 2500,
            seed: 0x1234_5678,
            worm_count: 3,
            fog_of_war: true,
            ..ScenarioParams::default()
        };
        params.houses[0] = HouseSlot {
            client: PeerId(1),
            brain: Brain::Human,
            team: 1,
        };
        params.houses[1] = HouseSlot {
            client: PeerId::NONE,
            brain: Brain::Cpu,
            team: 2,
        };
        server_roundtrip(&ServerMessage::Scenario(params));
    }

    #[test]
    fn roundtrip_start_game() {
        server_roundtrip(&ServerMessage::StartGame);
    }

    #[test]
    fn roundtrip_server_chat() {
        server_roundtrip(&ServerMessage::Chat {
            from: PeerId::NONE,
            text: "Guest left the game".into(),
        });
    }

    /// Several messages concatenated in one packet decode back in order,
    /// consuming the packet exactly.
    #[test]
    fn packet_walk_consumes_exactly() {
        let msgs = [
            ServerMessage::Identity { id: PeerId(1) },
            ServerMessage::ClientList {
                roster: vec![RosterEntry {
                    id: PeerId(1),
                    name: "Host".into(),
                }],
            },
            ServerMessage::Scenario(ScenarioParams::default()),
            ServerMessage::StartGame,
        ];
        let mut buf = OutboundBuffer::new(MAX_SERVER_BROADCAST_MESSAGE_LEN);
        for msg in &msgs {
            assert!(buf.push(msg));
        }

        let mut r = Reader::new(buf.as_slice());
        for expected in &msgs {
            assert_eq!(&ServerMessage::decode(&mut r).unwrap(), expected);
        }
        assert!(r.is_empty());
    }

    /// A truncated packet fails with a length fault rather than producing
    /// a partial message.
    #[test]
    fn truncated_packet_is_a_fault() {
        let msg = ServerMessage::UpdateHouse(HouseUpdate::default());
        let mut buf = [0u8; 64];
        let mut w = Writer::new(&mut buf);
        msg.encode(&mut w).unwrap();
        let cut = w.written() - 1;

        let mut r = Reader::new(&buf[..cut]);
        assert!(matches!(
            ServerMessage::decode(&mut r),
            Err(WireError::UnexpectedEnd { .. })
        ));
    }
}
