mod cli;
mod config;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use call_router::{loader, CallRouter, RoutingRule};
use event_log::{EventLabel, EventLog, EventLogConfig};
use rpc_relay::{
    CallHook, DispatchConfig, DispatchQueue, HookChain, HookStage, InteractiveConsole, LineTarget,
    ProxyFrontend, RelayServer, RpcTarget, ScriptedHook, SimulatedRig, Target,
};

use crate::cli::Cli;
use crate::config::{Config, TargetKind};

/// How long to wait for the event log file to flush on the way out.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Parse CLI args.
    let cli = Cli::parse();

    // 2. Load config, then merge CLI overrides.
    let loaded = config::load(&cli.config)?;
    let config_missing = loaded.is_none();
    let mut cfg = loaded.unwrap_or_default();
    apply_overrides(&mut cfg, &cli);

    // 3. Diagnostics go to stderr; stdout belongs to the event log and
    //    the console.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.logging.level));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    if config_missing {
        warn!(
            path = %cli.config.display(),
            "configuration file not found; using defaults"
        );
    }

    let listen_addr: SocketAddr = cfg
        .listen_addr
        .parse()
        .with_context(|| format!("invalid listen address: {}", cfg.listen_addr))?;
    let listen_addr = match cli.proxy_port {
        Some(port) => SocketAddr::new(listen_addr.ip(), port),
        None => listen_addr,
    };

    info!(
        config_file = %cli.config.display(),
        listen = %listen_addr,
        target_kind = ?cfg.target.kind,
        target = %format!("{}:{}", cfg.target.host, cfg.target.port),
        "rig-relay starting"
    );

    // 4. Start the event log.
    let (events, writer_handle) = EventLog::start(EventLogConfig {
        echo: true,
        quiet: cfg.logging.quiet,
        history_capacity: cfg.logging.history,
        file: cfg.logging.file.clone(),
        file_format: cfg.logging.file_format,
    })
    .await
    .context("failed to start event log")?;

    // 5. Routing table: file rules first, then config rules, then CLI rules.
    let router = build_router(&cfg, &cli.method_map).context("failed to build routing table")?;
    info!(?router, "routing table loaded");

    // 6. Hooks, loaded once at startup.
    let hooks = build_hooks(&cfg, events.clone()).context("failed to load hooks")?;
    info!(stages = hooks.len(), batch_mode = ?cfg.hooks.batch_mode, "hook chain built");

    // 7. Downstream target and its dispatcher.
    let target = match cfg.target.kind {
        TargetKind::Rpc => Target::Rpc(RpcTarget::new(&cfg.target.host, cfg.target.port)),
        TargetKind::Line => Target::Line(LineTarget::new(&cfg.target.host, cfg.target.port)),
        TargetKind::Simulated => Target::Simulated(SimulatedRig::new()),
    };
    let dispatch_config = DispatchConfig {
        call_timeout: non_zero(cfg.target.call_timeout_secs).map(Duration::from_secs),
    };
    let (queue, dispatcher) = DispatchQueue::start(target, dispatch_config, events.clone());

    if cli.list_methods {
        print_methods(&queue, cli.verbose_methods).await;
    }

    // 8. Bind before announcing readiness so a bad address fails startup.
    let frontend = ProxyFrontend::new(
        Arc::new(router),
        Arc::new(hooks),
        queue.clone(),
        events.clone(),
        cfg.hooks.batch_mode,
    );
    let server = RelayServer::bind(listen_addr, Arc::new(frontend)).await?;

    // 9. Set up shutdown signal (ctrl_c + SIGTERM + console exit).
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    let server_shutdown = shutdown_tx.subscribe();

    let shutdown_tx_signal = shutdown_tx.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx_signal.send(());
    });

    if cli.interactive {
        let console = InteractiveConsole::new(queue.clone(), events.clone());
        let shutdown_tx_console = shutdown_tx.clone();
        tokio::spawn(async move {
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            if let Err(err) = console.run(stdin, tokio::io::stdout()).await {
                warn!(%err, "console stopped");
            }
            info!("console closed");
            let _ = shutdown_tx_console.send(());
        });
    }

    // 10. Serve until shutdown.
    let served = server.serve(server_shutdown).await;

    // 11. Drain the dispatcher, then flush the event log.
    info!("rig-relay shutting down");
    dispatcher.shutdown().await;
    events.record(EventLabel::Shell, "relay stopped");
    events.close();
    if let Some(handle) = writer_handle {
        match tokio::time::timeout(FLUSH_TIMEOUT, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(%err, "event log writer failed"),
            Err(_) => warn!("event log writer did not finish flushing"),
        }
    }

    served?;

    // A blocking stdin read would otherwise hold the runtime open.
    if cli.interactive {
        std::process::exit(0);
    }
    Ok(())
}

fn apply_overrides(cfg: &mut Config, cli: &Cli) {
    if let Some(ref host) = cli.target_host {
        cfg.target.host = host.clone();
    }
    if let Some(port) = cli.target_port {
        cfg.target.port = port;
    }
    if let Some(kind) = cli.target_kind {
        cfg.target.kind = kind;
    }
    if let Some(secs) = cli.call_timeout_secs {
        cfg.target.call_timeout_secs = secs;
    }
    if let Some(ref file) = cli.routing_file {
        cfg.routing_file = Some(file.clone());
    }
    if let Some(ref path) = cli.on_request {
        cfg.hooks.on_request = Some(path.clone());
    }
    if let Some(ref path) = cli.on_response {
        cfg.hooks.on_response = Some(path.clone());
    }
    if let Some(ms) = cli.hook_timeout_ms {
        cfg.hooks.timeout_ms = ms;
    }
    if let Some(ref file) = cli.logfile {
        cfg.logging.file = Some(file.clone());
    }
    if cli.quiet {
        cfg.logging.quiet = true;
    }
}

fn build_router(cfg: &Config, cli_rules: &[String]) -> Result<CallRouter> {
    let mut rules: Vec<RoutingRule> = Vec::new();
    if let Some(ref path) = cfg.routing_file {
        rules.extend(loader::load_routes(path)?.routes);
    }
    rules.extend(loader::parse_rules(&cfg.routes[..])?);
    rules.extend(loader::parse_rules(cli_rules)?);
    Ok(CallRouter::new(rules))
}

/// One stage per distinct hook file. A file named for both sides is loaded
/// once and runs as both a pre-call and a post-call hook.
fn build_hooks(cfg: &Config, events: EventLog) -> Result<HookChain> {
    let mut stages = Vec::new();
    let request = cfg.hooks.on_request.as_ref();
    let response = cfg.hooks.on_response.as_ref();

    match (request, response) {
        (Some(pre), Some(post)) if pre == post => {
            stages.push(load_stage(pre, true, true)?);
        }
        (pre, post) => {
            if let Some(path) = pre {
                stages.push(load_stage(path, true, false)?);
            }
            if let Some(path) = post {
                stages.push(load_stage(path, false, true)?);
            }
        }
    }

    let timeout = non_zero(cfg.hooks.timeout_ms).map(Duration::from_millis);
    Ok(HookChain::new(stages, timeout, events))
}

fn load_stage(path: &Path, pre: bool, post: bool) -> Result<HookStage> {
    let hook = ScriptedHook::load(path)?;
    info!(hook = hook.name(), path = %path.display(), pre, post, "hook loaded");
    Ok(HookStage {
        hook: Arc::new(hook),
        pre,
        post,
    })
}

async fn print_methods(queue: &DispatchQueue, verbose: bool) {
    match rpc_relay::list_methods(queue, verbose).await {
        Ok(methods) => {
            println!("{} methods:", methods.len());
            for method in methods {
                println!("  {}", method.render());
            }
        }
        Err(err) => println!("could not list methods: {err:#}"),
    }
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate());
        match sigterm {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {
                        info!("received SIGINT (ctrl-c)");
                    }
                    _ = sigterm.recv() => {
                        info!("received SIGTERM");
                    }
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler");
                ctrl_c.await.ok();
                info!("received SIGINT (ctrl-c)");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("received SIGINT (ctrl-c)");
    }
}

fn non_zero(value: u64) -> Option<u64> {
    (value > 0).then_some(value)
}
