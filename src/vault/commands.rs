// Command implementations for the message vault CLI

use crate::vault::cipher::{generate_key_material, MessageCipher};
use crate::vault::cli::MsgVaultCommand;
use crate::vault::config::ServerConfig;
use crate::vault::server::MessageServer;
use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

/// Execute a CLI command
pub async fn execute_command(command: MsgVaultCommand) -> Result<()> {
    match &command {
        MsgVaultCommand::Keygen => {
            let (key, iv) = generate_key_material();
            println!("key: {}", key);
            println!("iv:  {}", iv);
            Ok(())
        }
        MsgVaultCommand::Serve { key, iv, .. } => {
            let config = command
                .server_config()
                .context("Missing server configuration")?;
            serve(config, key, iv).await
        }
    }
}

async fn serve(config: ServerConfig, key: &str, iv: &str) -> Result<()> {
    let cipher = MessageCipher::from_hex(key, iv, config.max_message_len)
        .context("Invalid encryption parameters")?;

    let server = MessageServer::bind(config, cipher).await?;

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    server.run(shutdown).await
}

/// Cancel `token` on Ctrl-C or SIGTERM
async fn wait_for_signal(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("Received shutdown signal");
    token.cancel();
}
