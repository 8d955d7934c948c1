use geofabric::node::{launch, NodeEnvironment};
use std::net::TcpListener as StdTcpListener;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_PORT: u16 = 5555;
const DEFAULT_QUERY_TIMEOUT_MS: u64 = 30_000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!(
            "Usage: {} --topology <dir> --root <dir> [--port <port>]",
            args[0]
        );
        eprintln!(
            "Example: {} --topology /etc/geofabric/network --root /var/lib/geofabric",
            args[0]
        );
        std::process::exit(1);
    }

    let mut port = DEFAULT_PORT;
    let mut topology_dir: Option<PathBuf> = None;
    let mut root_dir: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" => {
                port = args[i + 1].parse()?;
                i += 2;
            }
            "--topology" => {
                topology_dir = Some(PathBuf::from(&args[i + 1]));
                i += 2;
            }
            "--root" => {
                root_dir = Some(PathBuf::from(&args[i + 1]));
                i += 2;
            }
            _ => {
                i += 1;
            }
        }
    }

    let topology_dir = topology_dir.ok_or_else(|| anyhow::anyhow!("--topology is required"))?;
    let root_dir = root_dir.ok_or_else(|| anyhow::anyhow!("--root is required"))?;

    // Fail fast on an occupied port before anything else comes up.
    if StdTcpListener::bind(("0.0.0.0", port)).is_err() {
        anyhow::bail!("could not bind to port {}", port);
    }

    let canonical_hostname = detect_hostname()?;
    let hostname = canonical_hostname
        .split('.')
        .next()
        .unwrap_or(&canonical_hostname)
        .to_string();

    let query_timeout = std::env::var("QUERY_TIMEOUT_MS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(DEFAULT_QUERY_TIMEOUT_MS);
    let allow_time_wildcards = std::env::var("ALLOW_TIME_WILDCARDS")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let pid_file = std::env::var("PID_FILE").ok().map(PathBuf::from);
    let admin_port = std::env::var("ADMIN_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .or(Some(port + 1000));

    tracing::info!("starting node {} on port {}", hostname, port);

    let env = NodeEnvironment {
        hostname,
        canonical_hostname,
        port,
        root_dir,
        topology_dir,
        query_timeout: Duration::from_millis(query_timeout),
        allow_time_wildcards,
        pid_file,
        admin_port,
    };

    let running = launch(env).await?;
    tracing::info!("Press Ctrl+C to shut down");
    tokio::signal::ctrl_c().await?;
    running.stop().await;

    Ok(())
}

/// `HOSTNAME` wins when set; otherwise ask the system.
fn detect_hostname() -> anyhow::Result<String> {
    if let Ok(name) = std::env::var("HOSTNAME") {
        let name = name.trim().to_lowercase();
        if !name.is_empty() {
            return Ok(name);
        }
    }
    let output = std::process::Command::new("hostname").output()?;
    let name = String::from_utf8_lossy(&output.stdout).trim().to_lowercase();
    if name.is_empty() {
        anyhow::bail!("could not determine this host's name; set HOSTNAME");
    }
    Ok(name)
}
