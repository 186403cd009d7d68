// sandveil_net — authoritative server and client networking for Sandveil.
//
// This crate implements the transport and session layers on top of
// `sandveil_protocol`: the server owns the lobby, validates and routes
// client commands, and broadcasts per-tick state deltas; the client
// queues commands and applies received state into the game. It never runs
// the simulation — that stays behind the `ServerWorld` / `ClientWorld`
// trait seams.
//
// Module overview:
// - `transport.rs`: Non-blocking length-prefixed packet channels over
//                   `std::net` TCP, polled once per tick.
// - `session.rs`:   Peer slot table — id assignment, lifecycle states,
//                   house ownership, lobby-readiness predicate.
// - `server.rs`:    The authoritative server: connection lifecycle,
//                   command dispatch, delta building, per-house fan-out.
// - `client.rs`:    The game client: bounded connect handshake, command
//                   outbox, received-state dispatch.
// - `world.rs`:     Trait seams to the game simulation.
//
// Concurrency model: single-threaded and poll-driven on both ends. The
// only blocking wait in the crate is the client's identity handshake,
// bounded at one second.

pub mod client;
pub mod server;
pub mod session;
pub mod transport;
pub mod world;

pub use client::{Client, NetEvent};
pub use server::{Server, ServerConfig};
pub use session::{Peer, PeerState, Peers};
pub use world::{ClientWorld, GameEvents, ServerWorld};
