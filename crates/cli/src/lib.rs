pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use commands::{history::HistoryArgs, resolve::ResolveArgs};

#[derive(Debug, Parser)]
#[command(
    name = "payrail",
    about = "Payrail revenue-routing operator CLI",
    long_about = "Operate Payrail routing rules: migrations, demo seeds, one-shot booking \
                  resolutions, and audit-trail inspection.",
    after_help = "Examples:\n  payrail migrate\n  payrail seed\n  payrail resolve --booking-id bk-1 --property-id prop-17 --channel airbnb --net-payout 1000.00\n  payrail history --entity-kind booking --entity-id bk-1"
)]
pub struct Cli {
    /// Path to a payrail.toml config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations")]
    Migrate,
    #[command(about = "Load deterministic demo platform rules (idempotent)")]
    Seed,
    #[command(about = "Resolve one booking's payout split and audit it")]
    Resolve {
        #[arg(long)]
        booking_id: String,
        #[arg(long)]
        property_id: String,
        #[arg(long)]
        channel: String,
        #[arg(long, help = "Net payout amount, e.g. 1000.00")]
        net_payout: String,
        #[arg(long, default_value = "cli")]
        actor: String,
    },
    #[command(about = "Show the audit trail for an entity in write order")]
    History {
        #[arg(
            long,
            help = "One of: platform_rule, property_override, booking_override, booking"
        )]
        entity_kind: String,
        #[arg(long)]
        entity_id: String,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        #[arg(long, default_value_t = 100)]
        limit: u32,
    },
    #[command(about = "Validate config, database connectivity, and schema state")]
    Doctor,
}

fn init_logging() {
    use tracing_subscriber::EnvFilter;

    // Command output is a JSON envelope on stdout; tracing stays on stderr
    // and defaults to warnings unless RUST_LOG says otherwise.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(cli.config),
        Command::Seed => commands::seed::run(cli.config),
        Command::Resolve { booking_id, property_id, channel, net_payout, actor } => {
            commands::resolve::run(
                cli.config,
                ResolveArgs { booking_id, property_id, channel, net_payout, actor },
            )
        }
        Command::History { entity_kind, entity_id, offset, limit } => commands::history::run(
            cli.config,
            HistoryArgs { entity_kind, entity_id, offset, limit },
        ),
        Command::Doctor => commands::doctor::run(cli.config),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
