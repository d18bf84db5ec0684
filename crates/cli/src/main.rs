use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "chainview")]
#[command(about = "Chainview CLI - query a running chainview server")]
struct Cli {
    /// Server base URL.
    #[arg(long, global = true, default_value = "http://localhost:3011")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the network the server tracks
    Network,

    /// Print the current chain height
    Height,

    /// Print the current chain tip header
    Tip,

    /// Fetch one header by height or by hash
    Header {
        /// Block height
        #[arg(long, conflicts_with = "hash")]
        height: Option<u32>,

        /// Block hash (hex)
        #[arg(long)]
        hash: Option<String>,
    },

    /// Fetch a span of raw headers and print them as hex
    Headers {
        /// Starting block height
        #[arg(long)]
        height: u32,

        /// Number of headers
        #[arg(long, default_value = "10")]
        count: u32,
    },

    /// Follow tip updates from the server's event stream
    Watch,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = chainview_core::client::RemoteClient::new(&cli.url)?;

    match cli.command {
        Commands::Network => commands::network(&client).await,
        Commands::Height => commands::height(&client).await,
        Commands::Tip => commands::tip(&client).await,
        Commands::Header { height, hash } => commands::header(&client, height, hash).await,
        Commands::Headers { height, count } => commands::headers(&client, height, count).await,
        Commands::Watch => commands::watch(&client).await,
    }
}
