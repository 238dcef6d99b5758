//! Header Follower
//!
//! Keeps the sidechain light-client tip equal to the Bitcoin tip. Fast-sync
//! walks forward from the sidechain tip until it reaches the Bitcoin best
//! block, then ZMQ notifications drive the live path: normal extension,
//! gap fill when the light client fell behind, and the single supported
//! one-block-deep reorg. Anything deeper halts for operator attention.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::bitcoin::rpc::{BitcoinReader, BitcoinRpcError, HeaderInfo};
use crate::side::client::{SideBridge, SideError};
use crate::side::proto;

use super::scanner::VaultScanner;

/// Follower errors
#[derive(Debug, Error)]
pub enum FollowerError {
    #[error("bitcoin error: {0}")]
    Bitcoin(#[from] BitcoinRpcError),

    #[error("sidechain error: {0}")]
    Side(#[from] SideError),

    #[error("broken linkage at height {height}: last hash {last_hash}, new previous hash {prev_hash}")]
    BrokenLinkage {
        height: u64,
        last_hash: String,
        prev_hash: String,
    },

    #[error("reorg deeper than one block at height {height} ({hash})")]
    ReorgTooDeep { height: u64, hash: String },
}

impl FollowerError {
    /// Bitcoin RPC failures abort the current step only; the live loop
    /// continues with the next notification. Everything else halts the
    /// follower.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, FollowerError::Bitcoin(_))
    }
}

/// Mutable follower state, owned exclusively by the follower task.
#[derive(Debug, Default)]
pub struct FollowerState {
    /// Highest header acknowledged by the sidechain.
    pub last_submitted: Option<HeaderInfo>,
    /// Flips false -> true exactly once, when fast-sync reaches the
    /// Bitcoin tip.
    pub synced: bool,
}

/// State machine keeping the sidechain light client at the Bitcoin tip.
pub struct HeaderFollower {
    btc: Arc<dyn BitcoinReader>,
    side: Arc<dyn SideBridge>,
    scanner: VaultScanner,
    state: FollowerState,
}

impl HeaderFollower {
    pub fn new(
        btc: Arc<dyn BitcoinReader>,
        side: Arc<dyn SideBridge>,
        scanner: VaultScanner,
    ) -> Self {
        Self {
            btc,
            side,
            scanner,
            state: FollowerState::default(),
        }
    }

    pub fn state(&self) -> &FollowerState {
        &self.state
    }

    /// Walk the light client forward from the sidechain tip until the
    /// Bitcoin best block is reached.
    pub async fn fast_sync(&mut self) -> Result<(), FollowerError> {
        let tip = self.side.query_chain_tip().await?;
        info!(height = tip.height, hash = %tip.hash, "start syncing light client");

        let best = self.btc.best_block_hash().await?;
        if best == tip.hash {
            self.state.last_submitted = Some(self.btc.block_header_info(&best).await?);
            self.state.synced = true;
            info!("light client already at the best block");
            return Ok(());
        }

        let mut height = tip.height + 1;
        loop {
            let hash = self.btc.block_hash(height).await?;
            if self
                .state
                .last_submitted
                .as_ref()
                .is_some_and(|last| last.hash == hash)
            {
                self.state.synced = true;
                info!("reached the last block");
                return Ok(());
            }

            let header = self.btc.block_header_info(&hash).await?;
            if let Some(last) = &self.state.last_submitted {
                if last.hash != header.prev_hash() {
                    error!(
                        last_hash = %last.hash,
                        prev_hash = %header.prev_hash(),
                        "there must be a forked branch"
                    );
                    return Err(FollowerError::BrokenLinkage {
                        height: header.height,
                        last_hash: last.hash.clone(),
                        prev_hash: header.prev_hash().to_string(),
                    });
                }
            }

            let header_hash = header.hash.clone();
            self.submit_header(header).await?;

            let best = self.btc.best_block_hash().await?;
            if best == header_hash {
                self.state.synced = true;
                info!("reached the best block");
                return Ok(());
            }

            height += 1;
        }
    }

    /// Handle one ZMQ `hashblock` notification.
    pub async fn on_new_block(&mut self, hash: &str) -> Result<(), FollowerError> {
        if !self.state.synced {
            info!(%hash, "not synced yet, skipping block");
            return Ok(());
        }

        let header = self.btc.block_header_info(hash).await?;

        let Some(last) = self.state.last_submitted.clone() else {
            // Synced with nothing on record: trust this header.
            return self.submit_header(header).await;
        };

        if header.hash == last.hash {
            return Ok(());
        }

        // The light client fell behind: fill the intermediate heights
        // before handling the notifying header itself.
        if header.height > last.height + 1 {
            info!(
                behind = header.height - last.height,
                "light client is behind the bitcoin network"
            );

            for h in (last.height + 1)..header.height {
                let hash_i = self.btc.block_hash(h).await?;
                let intermediate = self.btc.block_header_info(&hash_i).await?;

                let last_hash = self
                    .state
                    .last_submitted
                    .as_ref()
                    .map(|l| l.hash.clone())
                    .unwrap_or_default();
                if last_hash != intermediate.prev_hash() {
                    error!(
                        last_hash = %last_hash,
                        prev_hash = %intermediate.prev_hash(),
                        "there must be a forked branch"
                    );
                    return Err(FollowerError::BrokenLinkage {
                        height: intermediate.height,
                        last_hash,
                        prev_hash: intermediate.prev_hash().to_string(),
                    });
                }

                self.submit_header(intermediate).await?;
            }
        }

        let last = match &self.state.last_submitted {
            Some(l) => l.clone(),
            None => return self.submit_header(header).await,
        };

        if last.hash != header.prev_hash() {
            error!(
                height = header.height,
                last_hash = %last.hash,
                last_prev = %last.prev_hash(),
                new_hash = %header.hash,
                new_prev = %header.prev_hash(),
                "forked branch detected"
            );

            // Only a one-block-deep reorg is supported: the new header is
            // a sibling of the last submitted one and replaces it.
            if last.prev_hash() == header.prev_hash() {
                warn!(height = header.height, "replacing the last header with the new one");
                return self.submit_header(header).await;
            }

            return Err(FollowerError::ReorgTooDeep {
                height: header.height,
                hash: header.hash,
            });
        }

        self.submit_header(header).await
    }

    /// Submit one header to the sidechain, advance the local state and
    /// trigger the vault scanner for the lagged confirmed height. The
    /// state only advances after the sidechain acknowledged the header.
    async fn submit_header(&mut self, header: HeaderInfo) -> Result<(), FollowerError> {
        self.side
            .submit_block_headers(vec![to_proto_header(&header)])
            .await?;

        debug!(
            height = header.height,
            hash = %header.hash,
            prev = %header.prev_hash(),
            "block submitted"
        );

        let height = header.height;
        self.state.last_submitted = Some(header);

        if let Err(e) = self.scanner.scan(height).await {
            warn!(error = %e, height, "vault scan failed");
        }

        Ok(())
    }
}

fn to_proto_header(header: &HeaderInfo) -> proto::BlockHeader {
    proto::BlockHeader {
        version: header.version as u64,
        hash: header.hash.clone(),
        height: header.height,
        previous_block_hash: header.prev_hash().to_string(),
        merkle_root: header.merkle_root.clone(),
        nonce: header.nonce,
        bits: header.bits.clone(),
        time: header.time,
        ntx: header.n_tx,
    }
}
