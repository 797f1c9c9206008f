use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use drover::config::{resolve_hosts, HostParams};
use drover::executor::Executor;
use drover::format::{format_json, Formatter};
use drover::grouper;
use drover::shutdown::install_shutdown_handler;
use drover::ssh::{ClientConfig, Pool, SshTransport};

#[derive(Parser, Debug)]
#[command(name = "drover")]
#[command(about = "Run a command across a fleet of SSH hosts and group identical output")]
struct Args {
    /// Host labels (comma-separated, e.g. "web-1,web-2,admin@db-1")
    #[arg(long, short = 'H', value_delimiter = ',', required = true)]
    hosts: Vec<String>,

    /// Maximum number of hosts executing at once
    #[arg(long, default_value = "20")]
    concurrency: usize,

    /// Per-host timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// SSH username override for all hosts
    #[arg(long, short = 'u')]
    user: Option<String>,

    /// SSH port override for all hosts
    #[arg(long, short = 'p')]
    port: Option<u16>,

    /// Private key file to authenticate with
    #[arg(long, short = 'i')]
    identity: Option<String>,

    /// Jump host chain (comma-separated "user@host:port" specs)
    #[arg(long, short = 'J')]
    jump: Option<String>,

    /// Skip host key verification
    #[arg(long)]
    insecure: bool,

    /// Emit results as a JSON array instead of grouped text
    #[arg(long)]
    json: bool,

    /// Only show groups with non-zero exit codes, failures, and timeouts
    #[arg(long)]
    errors_only: bool,

    /// Disable ANSI colors
    #[arg(long)]
    no_color: bool,

    /// The command to run on every host
    #[arg(trailing_var_arg = true, required = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let command = args.command.join(" ");

    let (labels, mut host_params) = resolve_hosts(&args.hosts);
    for params in host_params.values_mut() {
        apply_overrides(params, &args);
    }

    let base = ClientConfig {
        user: args.user.clone(),
        port: args.port,
        identity_files: args.identity.clone().into_iter().collect(),
        accept_unknown_hosts: args.insecure,
        ..Default::default()
    };

    let cancel = install_shutdown_handler();

    let pool = Arc::new(Pool::new(SshTransport::new(base, host_params)));
    let executor = Executor::new(pool.clone())
        .with_concurrency(args.concurrency)
        .with_timeout(Duration::from_secs(args.timeout));

    tracing::info!(hosts = labels.len(), command = %command, "starting fan-out");

    let results = executor.execute(&cancel, &labels, &command).await;
    pool.close().await;

    let all_ok = results.iter().all(|r| r.succeeded());

    if args.json {
        match format_json(&results) {
            Ok(json) => println!("{json}"),
            Err(err) => {
                eprintln!("failed to serialize results: {err}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        let formatter = Formatter::new(args.errors_only, !args.no_color);
        print!("{}", formatter.format(&grouper::group(results)));
    }

    if all_ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn apply_overrides(params: &mut HostParams, args: &Args) {
    if params.user.is_none() {
        params.user = args.user.clone();
    }
    if let Some(port) = args.port {
        params.port = Some(port);
    }
    if let Some(identity) = &args.identity {
        params.identity_file = Some(identity.clone());
    }
    if let Some(jump) = &args.jump {
        params.proxy_jump = Some(jump.clone());
    }
}
