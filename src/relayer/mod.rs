//! Relayer Orchestration
//!
//! Wires the long-lived tasks together: the ZMQ reader feeding a bounded
//! channel, the follower consuming it (scanner inline), the withdrawal
//! co-signer/broadcaster loop on its own timer, and a signal handler that
//! cancels everything through a shared token. Startup fails fast when the
//! relayer is not an authorized sender.

pub mod follower;
pub mod scanner;
pub mod withdrawal;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::bitcoin::rpc::{BitcoinReader, BitcoinRpcClient};
use crate::bitcoin::zmq;
use crate::config::{Config, INTERNAL_KEY_NAME};
use crate::error::RelayerError;
use crate::keyring::{Keyring, VaultKeys};
use crate::side::client::{SideBridge, SideClient};
use crate::side::proto::Params;

use follower::HeaderFollower;
use scanner::VaultScanner;
use withdrawal::WithdrawalProcessor;

/// Capacity of the ZMQ notification channel.
const BLOCK_CHANNEL_CAPACITY: usize = 64;

/// The relayer daemon.
pub struct Relayer {
    config: Config,
    home: PathBuf,
}

impl Relayer {
    pub fn new(config: Config, home: PathBuf) -> Self {
        Self { config, home }
    }

    /// Run until interrupted or a fatal error. Startup and header
    /// submission failures are fatal by policy; everything else is
    /// logged and retried.
    pub async fn run(self) -> Result<(), RelayerError> {
        self.config.validate()?;
        let network = self.config.network()?;

        info!("connecting to the side and bitcoin networks...");

        let keyring = Keyring::open(&self.home);
        let account_key = keyring.load(INTERNAL_KEY_NAME)?;

        let side = Arc::new(
            SideClient::connect(
                &self.config.side.grpc,
                self.config.side.sender.clone(),
                self.config.side.chain_id.clone(),
                self.config.side.gas,
                self.config.side.retries,
                account_key.secret_key,
            )
            .await?,
        );

        // The sidechain rejects every submission from an unknown sender,
        // so refuse to start before opening any Bitcoin connection.
        let params = side.query_params().await?;
        authorize_sender(&params, &self.config.side.sender)?;

        let btc: Arc<dyn BitcoinReader> = Arc::new(BitcoinRpcClient::new(
            self.config.bitcoin_rpc_url(),
            &self.config.bitcoin.rpcuser,
            &self.config.bitcoin.rpcpassword,
        ));

        let vault_keys = if self.config.bitcoin.local_signing {
            Arc::new(VaultKeys::load(
                &keyring,
                &self.config.bitcoin.vaults,
                network,
            )?)
        } else {
            Arc::new(VaultKeys::empty())
        };

        let cancel = CancellationToken::new();
        spawn_signal_handler(cancel.clone());

        let (block_tx, mut block_rx) = mpsc::channel(BLOCK_CHANNEL_CAPACITY);
        let zmq_task = tokio::spawn(zmq::subscribe_hashblock(
            self.config.zmq_endpoint(),
            block_tx,
            cancel.clone(),
        ));

        let side_bridge: Arc<dyn SideBridge> = side.clone();
        let scanner = VaultScanner::new(btc.clone(), side_bridge.clone(), params, network);
        let mut follower = HeaderFollower::new(btc.clone(), side_bridge.clone(), scanner);

        let processor = WithdrawalProcessor::new(
            btc.clone(),
            side_bridge,
            vault_keys,
            self.config.bitcoin.local_signing,
        );
        let frequency = self.config.side.frequency.max(1);
        let withdrawal_task = tokio::spawn(withdrawal_loop(processor, frequency, cancel.clone()));

        let result = follower_loop(&mut follower, &mut block_rx, &cancel).await;

        cancel.cancel();
        let _ = withdrawal_task.await;

        // A dead ZMQ subscription closes the block channel; surface its
        // error instead of reporting a clean exit.
        if let Ok(Err(e)) = zmq_task.await {
            if result.is_ok() {
                return Err(e.into());
            }
        }

        result
    }
}

/// Fail fast when this relayer's address is not in the authorized sender
/// set of the bridge params.
pub fn authorize_sender(params: &Params, sender: &str) -> Result<(), RelayerError> {
    if params.authorized_relayers.iter().any(|s| s == sender) {
        Ok(())
    } else {
        Err(RelayerError::Unauthorized(sender.to_string()))
    }
}

async fn follower_loop(
    follower: &mut HeaderFollower,
    block_rx: &mut mpsc::Receiver<bitcoin::BlockHash>,
    cancel: &CancellationToken,
) -> Result<(), RelayerError> {
    follower.fast_sync().await?;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            maybe_hash = block_rx.recv() => match maybe_hash {
                Some(hash) => {
                    if let Err(e) = follower.on_new_block(&hash.to_string()).await {
                        if e.is_fatal() {
                            return Err(e.into());
                        }
                        error!(error = %e, "failed to process block notification");
                    }
                }
                None => return Ok(()),
            },
        }
    }
}

async fn withdrawal_loop(
    processor: WithdrawalProcessor,
    frequency_secs: u64,
    cancel: CancellationToken,
) {
    let mut ticker = interval(Duration::from_secs(frequency_secs));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                processor.sign_pass().await;
                processor.broadcast_pass().await;
            }
        }
    }
}

/// Cancel all tasks on interrupt or termination (SIGINT or SIGTERM).
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "failed to install termination signal handler");
                let _ = ctrl_c.await;
            }
        }
        info!("exiting...");
        cancel.cancel();
    });
}
