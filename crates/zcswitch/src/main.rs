//! zcswitch - mDNS/DNS-SD service discovery from the command line.
//!
//! This is the main entry point for the zcswitch CLI.

mod format;

use clap::{Parser, Subcommand, ValueEnum};
use format::OutputFormat;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zcswitch_core::{BackendPreference, Config};
use zcswitch_discover::{
    expand_hosts, BackendKind, BrowseDomainsRequest, Capability, DiscoverError, MdnsSdResolver,
    ResolveRequest, ZeroconfSwitch,
};
use zcswitch_util::log::{LogConfig, LogLevel};

#[derive(Parser)]
#[command(name = "zcswitch")]
#[command(author, version, about = "mDNS/DNS-SD service discovery", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Scan window per protocol, in milliseconds
    #[arg(long, global = true)]
    scan_time_ms: Option<u64>,

    /// Attempts when the mDNS socket is busy
    #[arg(long, global = true)]
    retries: Option<u32>,

    /// Delay between attempts, in milliseconds
    #[arg(long, global = true)]
    retry_delay_ms: Option<u64>,

    /// Interface name or address to query on (repeatable)
    #[arg(short, long = "interface", global = true)]
    interfaces: Vec<String>,

    /// Discovery backend
    #[arg(long, value_enum, global = true)]
    backend: Option<BackendArg>,

    /// Subcommand
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve hosts advertising the given service types
    ///
    /// Without arguments, the configured service domains are browsed first
    /// and every domain found is resolved.
    Resolve {
        /// Service types, e.g. "_http._tcp.local."
        protocols: Vec<String>,
    },
    /// Browse service domains
    Browse {
        /// Service types to browse instead of the configured list
        protocols: Vec<String>,
    },
    /// Print service announcements until interrupted
    Listen,
    /// Re-query service types periodically and report hosts coming and going
    Watch {
        /// Service types, e.g. "_http._tcp.local."
        #[arg(required = true)]
        protocols: Vec<String>,
    },
    /// Show configuration
    Config,
    /// Print version information
    Version,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendArg {
    Auto,
    Native,
    Generic,
}

impl From<BackendArg> for BackendPreference {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Auto => BackendPreference::Auto,
            BackendArg::Native => BackendPreference::Native,
            BackendArg::Generic => BackendPreference::Generic,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cwd = std::env::current_dir()?;

    // Handle subcommands that need neither configuration nor the network
    match cli.command {
        Commands::Config => return show_config(&cwd).await,
        Commands::Version => {
            print_version();
            return Ok(());
        }
        _ => {}
    }

    let (mut config, sources) = Config::load(Some(&cwd)).await?;
    apply_overrides(&mut config, &cli);
    config.validate()?;

    init_logging(&config, cli.verbose);
    debug!(sources = ?sources, "Configuration loaded");

    let output = OutputFormat::from_json_flag(cli.json);
    let switch = build_switch(&config)?;
    let cancel = cancel_on_ctrl_c();

    let result = match cli.command {
        Commands::Resolve { protocols } => {
            run_resolve(&switch, &config, protocols, output, cancel).await
        }
        Commands::Browse { protocols } => {
            run_browse(&switch, &config, protocols, output, cancel).await
        }
        Commands::Listen => run_listen(&switch, output, cancel).await,
        Commands::Watch { protocols } => {
            run_watch(&switch, &config, protocols, output, cancel).await
        }
        Commands::Config | Commands::Version => Ok(()),
    };

    match result {
        Err(e) if is_cancelled(&e) => {
            eprintln!("Cancelled.");
            Ok(())
        }
        other => other,
    }
}

/// Initialize logging from the configured level. `--verbose` forces debug
/// output, including the mDNS backends.
fn init_logging(config: &Config, verbose: bool) {
    let level = if verbose {
        LogLevel::Debug
    } else {
        config.log_level.unwrap_or(LogLevel::Warn)
    };

    zcswitch_util::log::init(LogConfig {
        level,
        backend_debug: verbose,
        file: None,
    });
}

/// Command-line flags take precedence over every configuration file.
fn apply_overrides(config: &mut Config, cli: &Cli) {
    if cli.scan_time_ms.is_some() {
        config.scan_time_ms = cli.scan_time_ms;
    }
    if cli.retries.is_some() {
        config.retries = cli.retries;
    }
    if cli.retry_delay_ms.is_some() {
        config.retry_delay_ms = cli.retry_delay_ms;
    }
    if !cli.interfaces.is_empty() {
        config.interfaces = Some(cli.interfaces.clone());
    }
    if let Some(backend) = cli.backend {
        config.backend = Some(backend.into());
    }
}

/// Build the dispatcher for the configured backend preference.
fn build_switch(config: &Config) -> anyhow::Result<ZeroconfSwitch> {
    let resolver = Arc::new(MdnsSdResolver::new()?);
    let capability = match config.backend() {
        BackendPreference::Auto => Capability::detect(),
        BackendPreference::Native => Capability::native(),
        BackendPreference::Generic => Capability::generic(),
    };

    let builder = ZeroconfSwitch::builder(resolver).capability(capability);
    #[cfg(feature = "native")]
    let builder = builder.native_browser(zcswitch_discover::NativeBrowser::new());
    let switch = builder.build();

    if config.backend() == BackendPreference::Native && switch.backend() != BackendKind::Native {
        warn!("Native backend requested but not compiled in; using the generic resolver");
    }

    switch.set_browse_domain_protocols(Some(config.browse_domain_protocols()))?;
    Ok(switch)
}

/// Token cancelled on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted");
            token.cancel();
        }
    });
    cancel
}

fn is_cancelled(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<DiscoverError>()
        .is_some_and(DiscoverError::is_cancelled)
}

async fn run_resolve(
    switch: &ZeroconfSwitch,
    config: &Config,
    protocols: Vec<String>,
    output: OutputFormat,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let interfaces = config.interface_selectors()?;

    let protocols = if protocols.is_empty() {
        let mut request = BrowseDomainsRequest::new()
            .with_options(config.browse_options())
            .with_cancellation(cancel.clone());
        if let Some(interfaces) = interfaces.clone() {
            request = request.on_interfaces(interfaces);
        }
        let lookup = switch.browse_domains(request).await?;
        lookup.keys().map(String::from).collect()
    } else {
        protocols
    };

    if protocols.is_empty() {
        println!("{}", format::hosts(&[], output)?);
        return Ok(());
    }

    info!(protocols = ?protocols, "Resolving");
    let mut request =
        ResolveRequest::from_options(config.resolve_options(protocols)).with_cancellation(cancel);
    if let Some(interfaces) = interfaces {
        request = request.on_interfaces(interfaces);
    }

    let hosts = switch.resolve(request).await?;
    println!("{}", format::hosts(&hosts, output)?);
    Ok(())
}

async fn run_browse(
    switch: &ZeroconfSwitch,
    config: &Config,
    protocols: Vec<String>,
    output: OutputFormat,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let interfaces = config.interface_selectors()?;

    // The generic resolver browses through the meta-query, so an explicit
    // list is resolved directly and reshaped here.
    let lookup = if !protocols.is_empty() && switch.backend() == BackendKind::Generic {
        let mut request = ResolveRequest::from_options(config.resolve_options(protocols))
            .with_cancellation(cancel);
        if let Some(interfaces) = interfaces {
            request = request.on_interfaces(interfaces);
        }
        expand_hosts(&switch.resolve(request).await?, None)
    } else {
        let mut request = BrowseDomainsRequest::new()
            .with_options(config.browse_options())
            .with_cancellation(cancel);
        if !protocols.is_empty() {
            request = request.protocols(protocols);
        }
        if let Some(interfaces) = interfaces {
            request = request.on_interfaces(interfaces);
        }
        switch.browse_domains(request).await?
    };

    println!("{}", format::lookup(&lookup, output)?);
    Ok(())
}

async fn run_listen(
    switch: &ZeroconfSwitch,
    output: OutputFormat,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    eprintln!("Listening for announcements (Ctrl-C to stop)...");
    switch
        .listen_for_announcements(
            move |announcement| match format::announcement(&announcement, output) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, "Failed to format announcement"),
            },
            cancel,
        )
        .await?;
    Ok(())
}

async fn run_watch(
    switch: &ZeroconfSwitch,
    config: &Config,
    protocols: Vec<String>,
    output: OutputFormat,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let listener = switch.create_listener(config.listener_options(protocols))?;
    let mut events = listener.subscribe();
    eprintln!(
        "Watching every {} ms (Ctrl-C to stop)...",
        listener.options().query_interval.as_millis()
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Ok(event) => println!("{}", format::listener_event(&event, output)?),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Watch output fell behind");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    listener.stop();
    Ok(())
}

/// Show current configuration.
async fn show_config(cwd: &Path) -> anyhow::Result<()> {
    let (config, sources) = Config::load(Some(cwd)).await?;

    println!("Configuration sources:");
    if sources.is_empty() {
        println!("  (none)");
    } else {
        for source in &sources {
            println!("  {}", source.display());
        }
    }
    println!();

    println!("Current configuration:");
    println!("{}", serde_json::to_string_pretty(&config)?);
    println!();

    println!("Browse domain protocols:");
    for protocol in config.browse_domain_protocols() {
        println!("  {protocol}");
    }

    Ok(())
}

/// Print version information.
fn print_version() {
    println!("zcswitch {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("mDNS/DNS-SD service discovery over a generic resolver or the native browser.");
    println!();
    println!("https://github.com/wonop-io/zcswitch");
}
