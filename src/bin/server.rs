use std::net::SocketAddr;

use anyhow::anyhow;
use clap::Parser;
use tracing::Level;

use facility_booking::protocol::Semantics;
use facility_booking::server::loss::LossModel;
use facility_booking::server::Server;

/// Facility booking server over UDP with configurable invocation semantics
/// and simulated message loss.
#[derive(Parser)]
struct Args {
    /// UDP port to listen on
    port: u16,

    /// 'at-least-once' or 'at-most-once'
    semantics: String,

    /// probability in [0, 1] of dropping an incoming request; with no second
    /// value it applies to replies too
    p_req_loss: Option<f64>,

    /// probability in [0, 1] of dropping an outgoing reply or callback
    p_rep_loss: Option<f64>,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let semantics: Semantics = args.semantics.parse()?;
    let p_req = args.p_req_loss.unwrap_or(0.0);
    let p_rep = args.p_rep_loss.unwrap_or(p_req);
    for p in [p_req, p_rep] {
        if !(0.0..=1.0).contains(&p) {
            return Err(anyhow!("loss probability {} is outside [0, 1]", p));
        }
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let mut server = Server::bind(addr, semantics, LossModel::new(p_req, p_rep)).await?;
    server.run().await
}
