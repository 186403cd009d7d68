// CLI entry point for the Sandveil dedicated server.
//
// Hosts a lobby that game clients connect to: peers pick names and
// houses, and once the lobby is ready the server broadcasts the start
// signal. The dedicated binary carries no simulation of its own; it runs
// a headless world whose pools stay empty, which is enough for lobby
// hosting and protocol soak testing. A real game host embeds `Server`
// via the library API and passes its own `ServerWorld`.
//
// Usage:
//   sandveil_server [OPTIONS]
//     --port <PORT>          Listen port (default: 10700)
//     --scenario <FILE>      Scenario parameters as JSON (optional)
//     --tick-ms <N>          Tick interval in milliseconds (default: 33)

use std::time::Duration;

use sandveil_net::server::{Server, ServerConfig};
use sandveil_net::world::ServerWorld;
use sandveil_protocol::message::{
    ClientMessage, ExplosionSlot, HouseUpdate, ScenarioParams, StarportUpdate, StructureDelta,
    TileDelta, UnitDelta,
};
use sandveil_protocol::types::{HouseId, PackedTile, UnveilCause};

/// A world with nothing in it. The lobby flow never needs entity state,
/// and after start the sync layer simply finds no changes to send.
struct HeadlessWorld;

impl ServerWorld for HeadlessWorld {
    fn tile(&self, tile: PackedTile) -> TileDelta {
        TileDelta {
            packed: tile,
            ..TileDelta::default()
        }
    }

    fn structures(&self) -> Vec<StructureDelta> {
        Vec::new()
    }

    fn units(&self) -> Vec<UnitDelta> {
        Vec::new()
    }

    fn explosions(&self) -> Vec<ExplosionSlot> {
        Vec::new()
    }

    fn house(&self, _house: HouseId) -> HouseUpdate {
        HouseUpdate::default()
    }

    fn starport(&self) -> StarportUpdate {
        StarportUpdate::default()
    }

    fn unveiled(&self, _house: HouseId, _tile: PackedTile) -> Option<UnveilCause> {
        None
    }

    fn apply_command(&mut self, house: HouseId, command: &ClientMessage) {
        log::debug!("house {} command {:#04x} (headless, ignored)", house.0, command.tag());
    }

    fn house_departed(&mut self, _house: HouseId) {}

    fn start(&mut self, scenario: &ScenarioParams) {
        log::info!("scenario seed {} locked in", scenario.seed);
    }
}

struct Options {
    config: ServerConfig,
    tick: Duration,
}

fn main() {
    env_logger::init();
    let options = parse_args();

    let mut server = match Server::new(options.config) {
        Ok(server) => server,
        Err(e) => {
            eprintln!("Failed to start server: {e}");
            std::process::exit(1);
        }
    };
    match server.local_addr() {
        Ok(addr) => println!("Sandveil server listening on {addr}"),
        Err(e) => {
            eprintln!("Failed to read listen address: {e}");
            std::process::exit(1);
        }
    }
    println!("Press Ctrl+C to stop.");

    let mut world = HeadlessWorld;
    loop {
        server.tick(&mut world);
        if !server.is_game_started() && server.peer_count() > 0 {
            server.try_start_game(&mut world);
        }
        std::thread::sleep(options.tick);
    }
}

/// Parse command-line arguments. Uses simple `std::env::args()` matching
/// — no clap dependency.
fn parse_args() -> Options {
    let mut options = Options {
        config: ServerConfig::default(),
        tick: Duration::from_millis(33),
    };
    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--port" => {
                i += 1;
                options.config.port =
                    args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                        eprintln!("--port requires a valid port number");
                        std::process::exit(1);
                    });
            }
            "--scenario" => {
                i += 1;
                let path = args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--scenario requires a file path");
                    std::process::exit(1);
                });
                options.config.scenario = load_scenario(&path);
            }
            "--tick-ms" => {
                i += 1;
                let ms: u64 = args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                    eprintln!("--tick-ms requires a valid number");
                    std::process::exit(1);
                });
                options.tick = Duration::from_millis(ms);
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    options
}

fn load_scenario(path: &str) -> ScenarioParams {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("Failed to read scenario file {path}: {e}");
            std::process::exit(1);
        }
    };
    match serde_json::from_str(&text) {
        Ok(scenario) => scenario,
        Err(e) => {
            eprintln!("Failed to parse scenario file {path}: {e}");
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    println!("Usage: sandveil_server [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --port <PORT>          Listen port (default: 10700)");
    println!("  --scenario <FILE>      Scenario parameters as JSON (optional)");
    println!("  --tick-ms <N>          Tick interval in milliseconds (default: 33)");
    println!("  --help, -h             Show this help");
}
