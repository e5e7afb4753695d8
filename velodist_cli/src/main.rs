use clap::{Parser, Subcommand};

use mimalloc::MiMalloc;

use crate::{
    analyze::AnalyzeArgs, generate::GenerateSubcommands, geodesic::GeodesicArgs,
    network::NetworkArgs,
};

mod analyze;
mod generate;
mod geodesic;
mod network;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the network distance matrix of a station table
    Network {
        #[command(flatten)]
        args: NetworkArgs,
    },
    /// Compute the geodesic distance matrix of a station table
    Geodesic {
        #[command(flatten)]
        args: GeodesicArgs,
    },
    /// Compare a network matrix against a geodesic matrix
    Analyze {
        #[command(flatten)]
        args: AnalyzeArgs,
    },
    #[command(visible_alias = "g")]
    Generate {
        #[command(subcommand)]
        commands: GenerateSubcommands,
    },
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    dotenvy::from_filename("./.env.local").ok();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(if cli.debug {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    match cli.command {
        Some(Commands::Network { args }) => network::run(args).await?,
        Some(Commands::Geodesic { args }) => geodesic::run(args)?,
        Some(Commands::Analyze { args }) => analyze::run(args)?,
        Some(Commands::Generate { commands }) => generate::run(commands)?,
        None => {}
    }

    Ok(())
}
