//! CLI command definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI arguments for toolbridge
#[derive(Parser, Debug)]
#[command(name = "toolbridge")]
#[command(author, version, about = "Tool gateway and dispatch daemon for LLM providers")]
#[command(long_about = r#"
toolbridge runs long-lived AI tool calls through a persistent daemon that
routes each request to the healthiest configured LLM provider.

Configuration is merged from (highest priority first):
1. TOOLBRIDGE_<SECTION>__<KEY>   Environment variables
2. --config <path>               Explicit config file
3. ./toolbridge.toml             Project-level config
4. ~/.config/toolbridge/config.toml   Global config

Example:
  toolbridge daemon
  toolbridge tools
  toolbridge call echo --args '{"x": 1}'
  toolbridge call chat --args '{"prompt": "Explain Pin in one paragraph"}'
"#)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbosity level (-v = info, -vv = debug, -vvv = trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Disable loading of configuration files
    #[arg(long, global = true)]
    pub no_config: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the dispatch daemon in the foreground
    Daemon {
        /// Override daemon.host
        #[arg(long)]
        host: Option<String>,

        /// Override daemon.port
        #[arg(long)]
        port: Option<u16>,

        /// Override daemon.auth_token
        #[arg(long, env = "TOOLBRIDGE_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },

    /// List the tools the daemon serves
    Tools,

    /// Call a tool through the daemon and print its result as JSON
    Call {
        /// Tool name or alias
        name: String,

        /// Tool arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,

        /// Suppress progress notes on stderr
        #[arg(short, long)]
        quiet: bool,
    },

    /// Replace the daemon's auth token
    RotateToken {
        /// Token currently accepted by the daemon
        #[arg(long)]
        old: String,

        /// Token to accept from now on
        #[arg(long)]
        new: String,
    },

    /// Report the daemon health file status
    Health,

    /// Show configuration file locations and the effective configuration
    ShowConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_call_with_global_flags() {
        let cli = Cli::try_parse_from([
            "toolbridge", "-vv", "call", "echo", "--args", r#"{"x":1}"#, "--no-config",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(cli.no_config);
        match cli.command {
            Command::Call { name, args, quiet } => {
                assert_eq!(name, "echo");
                assert_eq!(args, r#"{"x":1}"#);
                assert!(!quiet);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn daemon_overrides_are_optional() {
        let cli = Cli::try_parse_from(["toolbridge", "daemon", "--port", "9000"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Daemon { port: Some(9000), host: None, .. }
        ));
    }

    #[test]
    fn rotate_token_requires_both_tokens() {
        assert!(Cli::try_parse_from(["toolbridge", "rotate-token", "--old", "a"]).is_err());
    }
}
