use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(about = "Switchboard CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and default files (config, packages/, data/).
    Init {
        /// Config file path (default: SWITCHBOARD_CONFIG_PATH or ~/.switchboard/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the gateway (HTTP front door + RPC listener). Registers every package with a package.yaml under the package root.
    Gateway {
        /// Config file path (default: SWITCHBOARD_CONFIG_PATH or ~/.switchboard/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// HTTP port (default from config or 15151). The RPC port follows unless configured.
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Send commands to a running gateway as a web caller (interactive).
    Chat {
        /// Config file path (default: SWITCHBOARD_CONFIG_PATH or ~/.switchboard/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Flex id to chat as (default: one per CLI process).
        #[arg(long, value_name = "ID")]
        flexid: Option<String>,
    },

    /// Teach the running gateway's classifier one example.
    Train {
        /// Config file path (default: SWITCHBOARD_CONFIG_PATH or ~/.switchboard/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Intent label
        label: String,

        /// Example text
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("switchboard {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Gateway { config, port }) => {
            if let Err(e) = run_gateway(config, port).await {
                log::error!("gateway failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Chat { config, flexid }) => {
            if let Err(e) = run_chat(config, flexid).await {
                log::error!("chat failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Train {
            config,
            label,
            text,
        }) => {
            if let Err(e) = run_train(config, label, text.join(" ")).await {
                log::error!("train failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(switchboard::config::default_config_path);
    let dir = switchboard::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_gateway(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, path) = switchboard::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    log::info!("starting gateway on {}:{}", config.gateway.bind, config.gateway.port);
    switchboard::gateway::run_gateway(config, path).await
}

/// Gateway front door URL from config. A wildcard bind is reached over loopback.
fn gateway_url(config_path: Option<std::path::PathBuf>) -> anyhow::Result<String> {
    let (config, _) = switchboard::config::load_config(config_path)?;
    let bind = match config.gateway.bind.trim() {
        "0.0.0.0" | "::" | "" => "127.0.0.1",
        b => b,
    };
    Ok(format!("http://{}:{}/", bind, config.gateway.port))
}

/// POST one command to the gateway as a web caller and return the reply body.
async fn send_command(
    client: &reqwest::Client,
    url: &str,
    flexid: &str,
    cmd: &str,
) -> anyhow::Result<String> {
    let res = client
        .post(url)
        .form(&[("cmd", cmd), ("flexid", flexid), ("flexidtype", "web")])
        .send()
        .await?;
    let status = res.status();
    let body = res.text().await?;
    if !status.is_success() {
        anyhow::bail!("{}: {}", status, body.trim());
    }
    Ok(body)
}

async fn run_chat(
    config_path: Option<std::path::PathBuf>,
    flexid: Option<String>,
) -> anyhow::Result<()> {
    use std::io::{self, Write};

    let url = gateway_url(config_path)?;
    let flexid = flexid.unwrap_or_else(|| format!("cli-{}", std::process::id()));
    let client = reqwest::Client::new();
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
            break;
        }

        match send_command(&client, &url, &flexid, input).await {
            Ok(reply) if reply.trim().is_empty() => println!("< (ok)"),
            Ok(reply) => println!("< {}", reply.trim()),
            Err(e) => eprintln!("chat error: {}", e),
        }
    }

    Ok(())
}

async fn run_train(
    config_path: Option<std::path::PathBuf>,
    label: String,
    text: String,
) -> anyhow::Result<()> {
    let (config, _) = switchboard::config::load_config(config_path.clone())?;
    let url = gateway_url(config_path)?;
    let cmd = format!("{} {}: {}", config.dispatch.training_keyword, label.trim(), text.trim());
    let client = reqwest::Client::new();
    send_command(&client, &url, "cli-train", &cmd).await?;
    println!("trained {}", label.trim());
    Ok(())
}
