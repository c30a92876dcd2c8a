// CLI commands for the message vault

use crate::vault::config::{
    ServerConfig, DEFAULT_DELIMITER, DEFAULT_MAX_MESSAGE_LEN, DEFAULT_PREVIEW_LEN, DEFAULT_WORKERS,
};
use clap::{Parser, Subcommand};
use std::net::{IpAddr, SocketAddr};

/// Message vault CLI
#[derive(Debug, Parser)]
#[command(name = "msgvault")]
#[command(about = "Multi-client message board that keeps messages encrypted at rest")]
pub struct MsgVaultCli {
    /// Log debug output from msgvault (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: MsgVaultCommand,
}

impl MsgVaultCli {
    /// Default tracing filter when RUST_LOG is not set
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "msgvault=debug,warn"
        } else {
            "msgvault=info,warn"
        }
    }
}

/// Message vault subcommands
#[derive(Debug, Subcommand)]
pub enum MsgVaultCommand {
    /// Start the message server
    Serve {
        /// TCP port to listen on
        #[arg(short, long)]
        port: u16,

        /// Encryption key, 64 hex characters (AES-256)
        #[arg(short, long)]
        key: String,

        /// Initialization vector, 32 hex characters, shared by all messages
        #[arg(short, long)]
        iv: String,

        /// Address to bind
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: IpAddr,

        /// Number of workers (also the number of connections accepted at once)
        #[arg(short, long, default_value_t = DEFAULT_WORKERS)]
        workers: usize,

        /// Maximum message length in bytes
        #[arg(short = 'm', long, default_value_t = DEFAULT_MAX_MESSAGE_LEN)]
        max_message_len: usize,

        /// Character that ends a composed message
        #[arg(short, long, default_value_t = DEFAULT_DELIMITER)]
        delimiter: char,

        /// Characters of each message shown when listing
        #[arg(long, default_value_t = DEFAULT_PREVIEW_LEN)]
        preview_len: usize,
    },

    /// Generate a random key and IV for `serve`
    Keygen,
}

impl MsgVaultCommand {
    /// Build the server configuration for `serve`
    pub fn server_config(&self) -> Option<ServerConfig> {
        match self {
            MsgVaultCommand::Serve {
                port,
                bind,
                workers,
                max_message_len,
                delimiter,
                preview_len,
                ..
            } => {
                let mut config = ServerConfig::new(SocketAddr::new(*bind, *port));
                config.workers = *workers;
                config.max_message_len = *max_message_len;
                // Non-ASCII delimiters fail validation
                config.delimiter = if delimiter.is_ascii() { *delimiter as u8 } else { 0 };
                config.preview_len = *preview_len;
                Some(config)
            }
            MsgVaultCommand::Keygen => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";
    const IV: &str = "0f0e0d0c0b0a09080706050403020100";

    #[test]
    fn test_cli_parsing() {
        let args = vec!["msgvault", "serve", "--port", "60000", "--key", KEY, "--iv", IV];

        let cli = MsgVaultCli::try_parse_from(args).unwrap();
        let config = cli.command.server_config().unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:60000".parse().unwrap());
        assert_eq!(config.workers, DEFAULT_WORKERS);
        assert_eq!(config.delimiter, b'~');
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cli_overrides() {
        let args = vec![
            "msgvault", "serve", "-p", "7000", "-k", KEY, "-i", IV, "--bind", "0.0.0.0", "-w", "8",
            "-m", "512", "-d", "#",
        ];

        let cli = MsgVaultCli::try_parse_from(args).unwrap();
        let config = cli.command.server_config().unwrap();
        assert_eq!(config.listen_addr.port(), 7000);
        assert!(config.listen_addr.ip().is_unspecified());
        assert_eq!(config.workers, 8);
        assert_eq!(config.max_message_len, 512);
        assert_eq!(config.delimiter, b'#');
    }

    #[test]
    fn test_key_and_iv_are_required() {
        assert!(MsgVaultCli::try_parse_from(["msgvault", "serve", "--port", "1"]).is_err());
        assert!(MsgVaultCli::try_parse_from(["msgvault", "serve", "--key", KEY, "--iv", IV]).is_err());
    }

    #[test]
    fn test_non_ascii_delimiter_fails_validation() {
        let args = vec!["msgvault", "serve", "-p", "1", "-k", KEY, "-i", IV, "-d", "é"];
        let cli = MsgVaultCli::try_parse_from(args).unwrap();
        assert!(cli.command.server_config().unwrap().validate().is_err());
    }

    #[test]
    fn test_verbose_flag() {
        let cli = MsgVaultCli::try_parse_from(["msgvault", "keygen"]).unwrap();
        assert_eq!(cli.log_filter(), "msgvault=info,warn");

        let cli = MsgVaultCli::try_parse_from(["msgvault", "keygen", "-v"]).unwrap();
        assert_eq!(cli.log_filter(), "msgvault=debug,warn");
    }

    #[test]
    fn test_keygen() {
        let cli = MsgVaultCli::try_parse_from(["msgvault", "keygen"]).unwrap();
        assert!(matches!(cli.command, MsgVaultCommand::Keygen));
        assert!(cli.command.server_config().is_none());
    }
}
