use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use sbt_bridge::client::CommandSession;
use sbt_bridge::config::Config;
use sbt_bridge::kernel::{ExecuteReply, Kernel};
use sbt_bridge::presenter::StdoutPresenter;
use sbt_bridge::protocol::normalize_command;
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sbt-bridge")]
#[command(about = "Send commands to a running sbt server and render its event stream")]
struct Cli {
    /// Path to the config file (default: <config dir>/sbt-bridge/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ServerArgs {
    /// Host the sbt server listens on
    #[arg(long)]
    host: Option<String>,

    /// Port the sbt server listens on
    #[arg(short, long)]
    port: Option<u16>,

    /// Show every raw event line received from the server
    #[arg(long)]
    debug: bool,

    /// Print level headers without ANSI colors
    #[arg(long)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a single command on the sbt server
    Run {
        /// Command to execute, e.g. "compile"
        command: String,

        /// Suppress all output; only the exit code reports the verdict
        #[arg(short, long)]
        silent: bool,

        #[command(flatten)]
        server: ServerArgs,
    },

    /// Read commands from stdin, one per line, like notebook cells.
    /// Use "sbt-server [host port]" to connect first.
    Shell {
        #[command(flatten)]
        server: ServerArgs,
    },
}

impl ServerArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if self.debug {
            config.output.debug = true;
        }
        if self.no_color {
            config.output.color = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref()).context("Failed to load config")?;

    match cli.command {
        Commands::Run {
            command,
            silent,
            server,
        } => {
            server.apply(&mut config);
            config.validate()?;
            let ok = run_command(&config, &command, silent).await?;
            std::process::exit(if ok { 0 } else { 1 });
        }
        Commands::Shell { server } => {
            server.apply(&mut config);
            config.validate()?;
            run_shell(config).await?;
        }
    }

    Ok(())
}

async fn run_command(config: &Config, command: &str, silent: bool) -> Result<bool> {
    let mut session = CommandSession::connect(
        &config.server.host,
        config.server.port,
        config.connect_timeout(),
        config.session_options(),
    )
    .await
    .context(format!(
        "Failed to connect to sbt server on port {}. Is the server running?",
        config.server.port
    ))?;

    let mut presenter = StdoutPresenter::new(config.output.color);
    let verdict = session
        .execute(&normalize_command(command), silent, &mut presenter)
        .await
        .context("sbt command did not complete")?;
    Ok(verdict.ok)
}

async fn run_shell(config: Config) -> Result<()> {
    let mut presenter = StdoutPresenter::new(config.output.color);
    let mut kernel = Kernel::new(config);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("sbt> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        if let ExecuteReply::Error { ename, evalue } =
            kernel.do_execute(&line, false, &mut presenter).await
        {
            eprintln!("{}: {}", ename, evalue);
        }
    }

    Ok(())
}
