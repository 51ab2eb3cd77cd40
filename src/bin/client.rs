use anyhow::anyhow;
use clap::Parser;
use tracing::Level;

use facility_booking::client::{menu, BookingClient, ClientConfig};
use facility_booking::protocol::Semantics;

/// Interactive facility booking client.
#[derive(Parser)]
struct Args {
    /// server host name or address
    host: String,

    /// server UDP port
    port: u16,

    /// 'at-least-once' or 'at-most-once'
    semantics: String,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let semantics: Semantics = args.semantics.parse()?;
    let server = tokio::net::lookup_host((args.host.as_str(), args.port))
        .await?
        .next()
        .ok_or_else(|| anyhow!("cannot resolve '{}:{}'", args.host, args.port))?;

    let mut client = BookingClient::connect(ClientConfig::new(server, semantics)).await?;
    menu::run(&mut client).await
}
