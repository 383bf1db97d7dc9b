//! Command-line interface for Switchyard
//!
//! Provides argument parsing and subcommand handling for the Switchyard binary.

use clap::{Parser, Subcommand};

/// Routing core for an LLM API gateway
#[derive(Parser)]
#[command(name = "switchyard")]
#[command(version)]
#[command(about = "Routing core for an LLM API gateway")]
#[command(
    long_about = "Switchyard decides which upstream provider and model serves each request. \
    It scores providers from observed outcomes, withdraws traffic from failing providers \
    and ramps it back gradually, and guards the intelligent-routing switch with a delayed \
    commit and a cooldown."
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Generate a template configuration file
    Config {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },
}

/// Generate template configuration content
pub fn generate_config_template() -> &'static str {
    r#"# Switchyard Configuration
# =========================
#
# Every section is optional; the values below are the defaults unless noted.

# ─────────────────────────────────────────────────────────────────────────────
# SERVER
# ─────────────────────────────────────────────────────────────────────────────

[server]
# IP address to bind to (0.0.0.0 for all interfaces, 127.0.0.1 for localhost only)
host = "0.0.0.0"
port = 3000

# ─────────────────────────────────────────────────────────────────────────────
# ROUTING SWITCH
# ─────────────────────────────────────────────────────────────────────────────
#
# Intelligent routing is turned on and off through POST /switch/toggle. A
# toggle takes effect after delay_seconds; a newer toggle supersedes a pending
# one. After a committed toggle, further toggles are refused for
# cooldown_seconds unless forced.

[switch]
# Used only when the store holds no saved state
initial_enabled = false
cooldown_seconds = 300
delay_seconds = 10
history_capacity = 1000
# Callers allowed to toggle; an empty list admits everyone
admins = ["ops-admin"]

# ─────────────────────────────────────────────────────────────────────────────
# ROUTING
# ─────────────────────────────────────────────────────────────────────────────

[routing]
# Candidates scoring within epsilon of the best share traffic by model weight
epsilon = 0.02
# Target used while intelligent routing is off. Without it the highest
# priority, highest weight pair is used.
default_provider = "openai"
default_model = "gpt-4o-mini"
catalog_refresh_seconds = 30
# Routing decisions queued for the audit store; overflow is dropped and counted
audit_queue_capacity = 1024

# ─────────────────────────────────────────────────────────────────────────────
# PERFORMANCE SCORING
# ─────────────────────────────────────────────────────────────────────────────

[performance]
# Smoothing factor applied to every score update, (0, 1]
alpha = 0.2
decay_interval_seconds = 60
# Outcomes kept for the rolling success rate
success_window = 100
success_horizon_seconds = 600

# ─────────────────────────────────────────────────────────────────────────────
# FAILOVER
# ─────────────────────────────────────────────────────────────────────────────

[failover]
# Consecutive failures that withdraw a provider
failure_threshold = 3
probe_interval_seconds = 30
probe_timeout_seconds = 10
# Minimum time spent on each recovery step
recovery_window_seconds = 60
# Traffic share per recovery step; strictly increasing, ending at 1.0
ramp_steps = [0.10, 0.25, 0.50, 0.75, 1.00]

# ─────────────────────────────────────────────────────────────────────────────
# PROVIDERS
# ─────────────────────────────────────────────────────────────────────────────
#
# Health probes send HEAD {base_url}/models.

[[providers]]
id = "openai"
type = "openai"
base_url = "https://api.openai.com/v1"
weight = 1.0
priority = 10

[[providers.models]]
id = "gpt-4o"
context_window = 128000
weight = 1.0
priority = 10
# Highest request complexity (0-100) this model should receive
max_complexity = 100.0

[[providers.models]]
id = "gpt-4o-mini"
context_window = 128000
weight = 3.0
priority = 5
max_complexity = 60.0

[[providers]]
id = "local"
base_url = "http://localhost:11434/v1"

[[providers.models]]
id = "llama3"

# ─────────────────────────────────────────────────────────────────────────────
# CUSTOM RULES
# ─────────────────────────────────────────────────────────────────────────────
#
# Evaluated by priority (highest first); the first match narrows the
# candidates to its target. Rules can also be managed over HTTP at /rules.

[[rules]]
name = "code goes to gpt-4o"
priority = 10
condition_type = "regex"            # "regex" or "complexity"
condition_value = "\\b(fn|class|def)\\b"
action_type = "use_model"           # "use_model" or "use_provider"
action_value = "openai/gpt-4o"

[[rules]]
name = "easy requests stay local"
priority = 1
condition_type = "complexity"
max_complexity = 20.0
action_type = "use_provider"
action_value = "local"

# ─────────────────────────────────────────────────────────────────────────────
# STORAGE
# ─────────────────────────────────────────────────────────────────────────────

[storage]
# Directory for switch state, history, decisions and rules.
# Remove to keep everything in memory.
path = "./switchyard-data"

# ─────────────────────────────────────────────────────────────────────────────
# OBSERVABILITY
# ─────────────────────────────────────────────────────────────────────────────

[observability]
# Log level: "trace", "debug", "info", "warn", "error"
log_level = "info"
# "text" or "json"
log_format = "text"

# Prometheus metrics are always available at /metrics on the server port
"#
}
