use clap::Parser;
use std::path::PathBuf;

use crate::config::TargetKind;

#[derive(Parser, Debug)]
#[command(
    name = "rig-relay",
    version,
    about = "Serializing relay between rig-control clients and one rig server"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "rig-relay.yaml")]
    pub config: PathBuf,

    /// Downstream server host
    #[arg(long)]
    pub target_host: Option<String>,

    /// Downstream server port [default: 7363]
    #[arg(long)]
    pub target_port: Option<u16>,

    /// Downstream protocol
    #[arg(long, value_enum)]
    pub target_kind: Option<TargetKind>,

    /// Port the relay listens on [default: 7362]
    #[arg(short = 'p', long)]
    pub proxy_port: Option<u16>,

    /// Routing rule `method=BLOCK`, `method=PASS` or `method=new.name`
    /// (repeatable, applied after the routing file)
    #[arg(short = 'm', long = "method-map", value_name = "RULE")]
    pub method_map: Vec<String>,

    /// YAML routing table
    #[arg(long)]
    pub routing_file: Option<PathBuf>,

    /// Hook file run before each call is dispatched
    #[arg(long)]
    pub on_request: Option<PathBuf>,

    /// Hook file run after each result arrives
    #[arg(long)]
    pub on_response: Option<PathBuf>,

    /// Hook time limit in milliseconds (0 disables)
    #[arg(long)]
    pub hook_timeout_ms: Option<u64>,

    /// Downstream call time limit in seconds (0 disables)
    #[arg(long)]
    pub call_timeout_secs: Option<u64>,

    /// Read operator commands from stdin
    #[arg(short, long)]
    pub interactive: bool,

    /// Also write the event log to this file
    #[arg(short, long)]
    pub logfile: Option<PathBuf>,

    /// Only print console output to stdout
    #[arg(short, long)]
    pub quiet: bool,

    /// Print the downstream method list before serving
    #[arg(long)]
    pub list_methods: bool,

    /// With --list-methods, include signatures and help text
    #[arg(long, requires = "list_methods")]
    pub verbose_methods: bool,
}
