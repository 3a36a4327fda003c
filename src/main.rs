use clap::Parser;
use log::{info, warn};
use std::path::{Path, PathBuf};
use tokio::signal;
use veil_proxy::config::{Config, LoggingConfig};
use veil_proxy::{RelayServer, build_transformer, logging};

#[derive(Parser)]
#[clap(
    version,
    about = "A relaying HTTP proxy that blurs faces in JPEG images passing through it"
)]
struct Args {
    #[clap(
        value_name = "PORT",
        help = "TCP port to listen on; an unparseable value falls back to the configured port"
    )]
    port: Option<String>,

    #[clap(short, long, value_name = "ADDR", help = "Listen address (e.g., 127.0.0.1:20000)")]
    listen: Option<String>,

    #[clap(short, long, value_name = "FILE", help = "Configuration file path")]
    config: Option<String>,

    #[clap(long, value_name = "FILE", help = "Generate a sample configuration file and exit")]
    generate_config: Option<String>,

    #[clap(long, value_name = "DIR", help = "Directory for temporary image stores")]
    spool_dir: Option<PathBuf>,

    #[clap(
        long,
        value_name = "CMD",
        help = "Image transform command; {input} and {output} are replaced per image"
    )]
    transform_cmd: Option<String>,

    #[clap(long, value_name = "NUM", help = "Maximum concurrent client connections")]
    max_connections: Option<usize>,

    #[clap(
        long,
        value_name = "SECONDS",
        help = "Upstream connect timeout; no timeout when unset"
    )]
    connect_timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Handle generate-config flag
    if let Some(config_file) = args.generate_config {
        generate_sample_config(&config_file)?;
        println!("Sample configuration file generated: {}", config_file);
        return Ok(());
    }

    // Load configuration before logging so file-configured targets apply
    let mut config = if let Some(config_file) = &args.config {
        if !Path::new(config_file).exists() {
            return Err(format!("Configuration file not found: {}", config_file).into());
        }
        Config::from_file(config_file)?
    } else {
        Config::default()
    };

    logging::init(config.logging.as_ref())?;
    apply_cli_overrides(&mut config, &args)?;

    let transformer = build_transformer(&config.transform)?;

    info!("Starting relay proxy...");
    let server = RelayServer::bind(&config, transformer)
        .await
        .map_err(|e| format!("Could not listen on {}: {}", config.listen_addr, e))?;
    println!("Listening on: {}", server.local_addr());

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                eprintln!("Server error: {}", e);
                return Err(e.into());
            }
        }
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

fn apply_cli_overrides(config: &mut Config, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(listen) = &args.listen {
        config.listen_addr = listen.parse()?;
    }
    if let Some(port) = &args.port {
        match port.parse::<u16>() {
            Ok(port) => config.listen_addr.set_port(port),
            Err(_) => warn!(
                "Ignoring unparseable port argument {:?}; staying on port {}",
                port,
                config.listen_addr.port()
            ),
        }
    }
    if let Some(dir) = &args.spool_dir {
        config.spool_dir = Some(dir.clone());
    }
    if let Some(cmd) = &args.transform_cmd {
        config.transform.command = cmd.split_whitespace().map(str::to_string).collect();
    }
    if let Some(max) = args.max_connections {
        config.max_connections = max;
    }
    if let Some(secs) = args.connect_timeout {
        config.connect_timeout_secs = Some(secs);
    }
    Ok(())
}

fn generate_sample_config(file_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut sample = Config::default();
    sample.spool_dir = Some(PathBuf::from("/tmp"));
    sample.transform.command = vec![
        "face-blur".to_string(),
        "{input}".to_string(),
        "{output}".to_string(),
    ];
    sample.logging = Some(LoggingConfig::default());
    sample.to_file(file_path)?;
    Ok(())
}
