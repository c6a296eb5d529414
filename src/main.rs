use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, bail};
use clap::Parser;
use clap_derive::Parser;
use tracing::Level;

use chatline::config::ClientConfig;
use chatline::console::{StderrSink, StdinSource, StdoutSink};
use chatline::session::session::Session;
use chatline::transport::TransportKind;

#[derive(Parser)]
#[clap(name = "chatline", about = "Dual-transport (TCP/UDP) client for a line-oriented chat protocol")]
struct Args {
    /// transport protocol: 'udp' or 'tcp'
    #[clap(short = 't')]
    transport: String,

    /// server host name or IP address
    #[clap(short = 's')]
    server: String,

    /// server port
    #[clap(short = 'p', default_value_t = 4567)]
    port: u16,

    /// UDP confirmation timeout in milliseconds
    #[clap(short = 'd', default_value_t = 250)]
    conf_timeout_ms: u64,

    /// maximum number of UDP transmission attempts per message
    #[clap(short = 'r', default_value_t = 3)]
    max_retries: u32,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("ERR: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::WARN,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();

    let transport = match args.transport.as_str() {
        "udp" => TransportKind::Udp,
        "tcp" => TransportKind::Tcp,
        other => bail!("invalid transport protocol {:?}, use 'udp' or 'tcp'", other),
    };

    let config = ClientConfig {
        transport,
        server: resolve(&args.server, args.port).await?,
        conf_timeout: Duration::from_millis(args.conf_timeout_ms),
        max_retries: args.max_retries,
    };

    let session = Session::new(
        config.connect().await?,
        Box::new(StdinSource::new()),
        Box::new(StdoutSink),
        Box::new(StderrSink),
    );
    session.run().await
}

async fn resolve(host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| anyhow!("could not resolve host {:?}", host))
}
