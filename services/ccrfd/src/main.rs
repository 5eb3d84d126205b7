// ccrfd: Serve one Cloud Chaser board to multiple clients.
//
// Owns the serial link exclusively and relays commands arriving on a local
// stream socket; unsolicited frames fan out to every connected client.
// Equivalent to opening `unix://<socket>@<device>` from the library.

use ccrf_link::Ccrf;
use clap::Parser;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "ccrfd", about = "Cloud Chaser proxy daemon")]
struct Args {
    /// Socket path to serve on.
    #[arg(short, long, default_value = "/tmp/ccrf.sock")]
    socket: String,

    /// Device spec of the board to own (tty path, serial, `any`, ...).
    #[arg(short, long, env = "CCRF_DEV")]
    device: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let ccrf = match Ccrf::open(&args.device).await {
        Ok(ccrf) => ccrf,
        Err(e) => {
            error!(device = %args.device, error = %e, "failed to open device");
            std::process::exit(1);
        }
    };

    if let Err(e) = ccrf.serve(&args.socket).await {
        error!(socket = %args.socket, error = %e, "failed to bind socket");
        ccrf.close().await;
        std::process::exit(1);
    }

    info!(socket = %args.socket, device = %args.device, "ccrfd serving");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "signal wait failed");
    }

    info!("shutting down");
    ccrf.close().await;
}
