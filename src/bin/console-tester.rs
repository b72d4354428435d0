//! Interactive console harness for the balancing engine
//!
//! Runs the engine against the in-memory game server and a scripted rating
//! service, taking commands on stdin. Useful for poking at the deferred
//! operation flow without a live game server.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use team_balancer::config::AppConfig;
use team_balancer::engine::BalanceCore;
use team_balancer::lookup::MockRatingService;
use team_balancer::rating::InMemoryLocalStore;
use team_balancer::server::{GameServer, MockGameServer, ReplySink};
use team_balancer::types::{GameMode, GameState, PlayerId, Team};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

/// Team Balancer Console Tester - interactive engine harness
#[derive(Parser)]
#[command(
    name = "console-tester",
    version,
    about = "Interactive console harness for the team-balancing engine"
)]
struct Args {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Game mode to simulate
    #[arg(short, long, value_name = "MODE", default_value = "ca")]
    mode: GameMode,

    /// Log level override
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

/// Reply sink that prints to stdout, mimicking a chat channel
struct ConsoleSink;

impl ReplySink for ConsoleSink {
    fn reply(&self, message: &str) {
        println!(">> {}", message);
    }
}

fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;
    Ok(())
}

fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = if let Some(path) = &args.config {
        AppConfig::from_file(path)?
    } else {
        AppConfig::from_env()?
    };
    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }
    Ok(config)
}

fn print_help() {
    println!("Commands:");
    println!("  add <name> <red|blue|spec> [elo]  add a player, optionally with a service rating");
    println!("  elo <name> <value>                set the rating the mock service reports");
    println!("  teams                             average ratings and swap suggestion");
    println!("  balance                           even out and balance the rosters");
    println!("  a <name>                          agree to the suggested swap as <name>");
    println!("  do                                force the suggested swap");
    println!("  getrating <name>                  report one player's rating");
    println!("  setrating <name> <elo>            set a manual rating");
    println!("  remrating <name>                  remove a manual rating");
    println!("  ratings                           list every teamed player's rating");
    println!("  connect <name>                    simulate a player connecting");
    println!("  switch <name> <red|blue|spec>     simulate a team switch");
    println!("  countdown                         simulate a round countdown");
    println!("  end                               simulate the match ending");
    println!("  state <warmup|progress|ended>     set the game state");
    println!("  stats                             engine state snapshot");
    println!("  quit                              exit");
}

fn parse_team(word: &str) -> Option<Team> {
    match word {
        "red" => Some(Team::Red),
        "blue" => Some(Team::Blue),
        "spec" | "spectator" => Some(Team::Spectator),
        _ => None,
    }
}

async fn run_command(
    line: &str,
    core: &BalanceCore,
    server: &Arc<MockGameServer>,
    service: &Arc<MockRatingService>,
    mode: GameMode,
) -> Result<bool> {
    let sink: Arc<dyn ReplySink> = Arc::new(ConsoleSink);
    let words: Vec<&str> = line.split_whitespace().collect();
    match words.as_slice() {
        [] => {}
        ["quit"] | ["exit"] => return Ok(false),
        ["help"] => print_help(),
        ["add", name, team] => match parse_team(team) {
            Some(team) => server.add_player(name, team),
            None => println!("Unknown team: {}", team),
        },
        ["add", name, team, elo] => match (parse_team(team), elo.parse::<i32>()) {
            (Some(team), Ok(elo)) => {
                server.add_player(name, team);
                service.set_default_rating(name, elo, 1000);
            }
            _ => println!("Usage: add <name> <red|blue|spec> [elo]"),
        },
        ["elo", name, value] => match value.parse::<i32>() {
            Ok(elo) => service.set_default_rating(name, elo, 1000),
            Err(_) => println!("Usage: elo <name> <value>"),
        },
        ["teams"] => {
            core.request_teams_info(sink, mode).await?;
        }
        ["balance"] => {
            core.request_balance(sink, mode).await?;
        }
        ["a", name] => core.on_player_agree(name).await?,
        ["do"] => core.on_force_do().await?,
        ["getrating", name] => {
            core.request_rating(name, sink, mode).await?;
        }
        ["setrating", name, elo] => match elo.parse::<i32>() {
            Ok(elo) => core.set_manual_rating(name, mode, elo, Some(sink)).await?,
            Err(_) => println!("Usage: setrating <name> <elo>"),
        },
        ["remrating", name] => core.remove_manual_rating(name, mode, Some(sink)).await?,
        ["ratings"] => {
            core.request_roster_ratings(sink, mode).await?;
        }
        ["connect", name] => core.on_player_connect(name).await?,
        ["switch", name, team] => match parse_team(team) {
            Some(team) => {
                server.put(&PlayerId::new(name), team).await?;
                core.on_team_switch(name, team).await?;
            }
            None => println!("Unknown team: {}", team),
        },
        ["countdown"] => core.on_round_countdown().await?,
        ["end"] => core.on_match_end().await?,
        ["state", word] => {
            let state = match *word {
                "warmup" => Some(GameState::Warmup),
                "progress" => Some(GameState::InProgress),
                "ended" => Some(GameState::Ended),
                _ => None,
            };
            match state {
                Some(state) => server.set_game_state(state),
                None => println!("Unknown state: {}", word),
            }
        }
        ["stats"] => {
            let stats = core.stats();
            println!(
                "cached: {}  outstanding: {}  pending: {}  failures: {}",
                stats.cached_players,
                stats.outstanding_lookups,
                stats.pending_tasks,
                stats.consecutive_failures
            );
            let teams = server.teams().await?;
            println!("red: {:?}", teams.red);
            println!("blue: {:?}", teams.blue);
            println!("spectators: {:?}", teams.spectators);
        }
        _ => println!("Unknown command, try 'help'"),
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    init_logging(&config.service.log_level)?;

    let server = Arc::new(MockGameServer::new(args.mode));
    let local = Arc::new(InMemoryLocalStore::new());
    let service = Arc::new(MockRatingService::new());
    let core = BalanceCore::new(
        server.clone(),
        local,
        service.clone(),
        config,
    )?;

    info!(mode = %args.mode, "console tester ready, type 'help' for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if !run_command(&line, &core, &server, &service, args.mode).await? {
            break;
        }
    }

    info!("console tester exiting");
    Ok(())
}
