use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info};
use tunroute::{
    HostStack, NetworkContext, RoutineConfig,
    config::{Socks5Config, TcpClientTunnelConfig, TcpServerTunnelConfig},
};

#[derive(Parser, Debug)]
#[command(author, version, about = "SOCKS5 and TCP tunnel routines over a network stack", long_about = None)]
struct Args {
    /// SOCKS5 listener address
    #[arg(long, value_name = "BIND")]
    socks5: Option<String>,

    /// Username for SOCKS5 proxy
    #[arg(short, long)]
    username: Option<String>,

    /// Password for SOCKS5 proxy
    #[arg(short, long)]
    password: Option<String>,

    /// Local listener forwarded into the network, repeatable
    #[arg(long, value_name = "BIND=HOST:PORT")]
    tcp_client: Vec<TcpClientTunnelConfig>,

    /// Listener inside the network forwarded to the host, repeatable
    #[arg(long, value_name = "PORT=HOST:PORT")]
    tcp_server: Vec<TcpServerTunnelConfig>,

    /// Resolve names with the host resolver
    #[arg(long)]
    system_dns: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// routines collects every configured routine
    fn routines(self) -> Result<Vec<RoutineConfig>> {
        let mut routines = Vec::new();

        match (&self.socks5, &self.username, &self.password) {
            (Some(_), Some(_), None) | (Some(_), None, Some(_)) => {
                bail!("[ERR] must provide both username and password (or neither)")
            }
            (None, Some(_), _) | (None, _, Some(_)) => {
                bail!("[ERR] username/password only apply to --socks5")
            }
            _ => {}
        }

        if let Some(bind_address) = self.socks5 {
            routines.push(RoutineConfig::Socks5(Socks5Config {
                bind_address,
                username: self.username,
                password: self.password,
            }));
        }

        routines.extend(self.tcp_client.into_iter().map(RoutineConfig::TcpClientTunnel));
        routines.extend(self.tcp_server.into_iter().map(RoutineConfig::TcpServerTunnel));

        if routines.is_empty() {
            bail!("[ERR] no routine configured: use --socks5, --tcp-client or --tcp-server");
        }

        Ok(routines)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse args
    let args = Args::parse();

    // Initialize tracing subscriber
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt().with_max_level(level).init();

    // No user-space stack is linked into the binary, so the host stack
    // stands in for it
    let ctx = Arc::new(NetworkContext::new(Arc::new(HostStack)).with_system_dns(args.system_dns));

    let mut tasks = JoinSet::new();
    for config in args.routines()? {
        let mut routine = config
            .build(Arc::clone(&ctx))
            .context("[ERR] invalid routine configuration")?;
        tasks.spawn(async move {
            let name = routine.name();
            routine.run().await.map_err(|e| anyhow!("[ERR] {name}: {e}"))
        });
    }

    info!("{} routine(s) started", tasks.len());

    // Routines only return on listener failure, which takes the process down
    match tasks.join_next().await {
        Some(Ok(Ok(()))) | None => Ok(()),
        Some(Ok(Err(e))) => {
            error!("{:#}", e);
            Err(e)
        }
        Some(Err(e)) => Err(anyhow!("[ERR] routine task failed: {e}")),
    }
}
