//! Sidechain gRPC Client
//!
//! Queries the bridge module (chain tip, params, signing requests) and
//! submits relayer messages wrapped in signed sidechain transactions.
//! Sequence numbers are tracked in an account cursor guarded by a mutex;
//! submissions are serialized through it so the sidechain's auth module
//! observes contiguous sequences.

use std::time::Duration;

use async_trait::async_trait;
use bitcoin::secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};
use cosmos_sdk_proto::cosmos::auth::v1beta1::query_client::QueryClient as AuthQueryClient;
use cosmos_sdk_proto::cosmos::auth::v1beta1::{BaseAccount, QueryAccountRequest};
use cosmos_sdk_proto::cosmos::base::v1beta1::Coin;
use cosmos_sdk_proto::cosmos::crypto::secp256k1::PubKey;
use cosmos_sdk_proto::cosmos::tx::signing::v1beta1::SignMode;
use cosmos_sdk_proto::cosmos::tx::v1beta1::service_client::ServiceClient as TxServiceClient;
use cosmos_sdk_proto::cosmos::tx::v1beta1::{
    mode_info, AuthInfo, BroadcastMode, BroadcastTxRequest, Fee, ModeInfo, SignDoc, SignerInfo,
    TxBody, TxRaw,
};
use cosmos_sdk_proto::Any;
use prost::Message as ProstMessage;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::Mutex;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info, warn};

use super::proto::{
    BitcoinSigningRequest, BlockHeader, MsgSubmitBlockHeaderRequest,
    MsgSubmitDepositTransactionRequest, MsgSubmitWithdrawSignaturesRequest,
    MsgSubmitWithdrawStatusRequest, MsgSubmitWithdrawTransactionRequest, Params,
    QueryBlockHeaderByHashRequest, QueryBlockHeaderByHashResponse, QueryChainTipRequest,
    QueryChainTipResponse, QueryParamsRequest, QueryParamsResponse, QuerySigningRequestRequest,
    QuerySigningRequestResponse, SigningStatus,
};

/// Deadline applied to every sidechain query and broadcast.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(100);

/// Fee attached to every sidechain transaction.
const FEE_DENOM: &str = "uside";
const FEE_AMOUNT: u64 = 2000;

/// ABCI code the auth module returns on a stale sequence.
const WRONG_SEQUENCE_CODE: u32 = 32;

const QUERY_CHAIN_TIP: &str = "/side.btcbridge.Query/QueryChainTip";
const QUERY_PARAMS: &str = "/side.btcbridge.Query/QueryParams";
const QUERY_SIGNING_REQUEST: &str = "/side.btcbridge.Query/QuerySigningRequest";
const QUERY_BLOCK_HEADER_BY_HASH: &str = "/side.btcbridge.Query/QueryBlockHeaderByHash";

const TYPE_SUBMIT_BLOCK_HEADER: &str = "/side.btcbridge.MsgSubmitBlockHeaderRequest";
const TYPE_SUBMIT_DEPOSIT_TX: &str = "/side.btcbridge.MsgSubmitDepositTransactionRequest";
const TYPE_SUBMIT_WITHDRAW_TX: &str = "/side.btcbridge.MsgSubmitWithdrawTransactionRequest";
const TYPE_SUBMIT_WITHDRAW_SIGNATURES: &str =
    "/side.btcbridge.MsgSubmitWithdrawSignaturesRequest";
const TYPE_SUBMIT_WITHDRAW_STATUS: &str = "/side.btcbridge.MsgSubmitWithdrawStatusRequest";

/// Sidechain client errors
#[derive(Debug, Error)]
pub enum SideError {
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("grpc error: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("sidechain query timed out")]
    Timeout,

    #[error("message rejected with code {code}: {log}")]
    Rejected { code: u32, log: String },

    #[error("account sequence mismatch: {log}")]
    SequenceMismatch { log: String },

    #[error("account {0} not found on the sidechain")]
    AccountNotFound(String),

    #[error("failed to decode response: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("empty response from sidechain")]
    EmptyResponse,
}

impl SideError {
    /// Transient errors that the bounded retry policy may try again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SideError::Transport(_)
                | SideError::Grpc(_)
                | SideError::Timeout
                | SideError::SequenceMismatch { .. }
        )
    }
}

/// Light-client chain tip as reported by the bridge module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTip {
    pub hash: String,
    pub height: u64,
}

/// Relayer account position in the sidechain auth module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountCursor {
    pub account_number: u64,
    pub sequence: u64,
}

/// Operations the follower, scanner and withdrawal tasks perform against
/// the sidechain.
#[async_trait]
pub trait SideBridge: Send + Sync {
    async fn query_chain_tip(&self) -> Result<ChainTip, SideError>;

    async fn query_params(&self) -> Result<Params, SideError>;

    async fn query_signing_requests(
        &self,
        status: SigningStatus,
    ) -> Result<Vec<BitcoinSigningRequest>, SideError>;

    /// Height lookup for a block the sidechain light client has accepted.
    async fn query_block_header_by_hash(
        &self,
        hash: &str,
    ) -> Result<Option<BlockHeader>, SideError>;

    async fn submit_block_headers(&self, headers: Vec<BlockHeader>) -> Result<(), SideError>;

    async fn submit_deposit_tx(
        &self,
        blockhash: String,
        prev_tx_bytes: String,
        tx_bytes: String,
        proof: Vec<String>,
    ) -> Result<(), SideError>;

    async fn submit_withdraw_tx(
        &self,
        blockhash: String,
        tx_bytes: String,
        proof: Vec<String>,
    ) -> Result<(), SideError>;

    async fn submit_withdraw_signatures(
        &self,
        txid: String,
        psbt: String,
    ) -> Result<(), SideError>;

    async fn submit_withdraw_status(
        &self,
        txid: String,
        status: SigningStatus,
    ) -> Result<(), SideError>;
}

/// gRPC client for the sidechain bridge module.
pub struct SideClient {
    channel: Channel,
    sender: String,
    chain_id: String,
    gas: u64,
    retries: u32,
    secp: Secp256k1<All>,
    secret_key: SecretKey,
    public_key: PublicKey,
    cursor: Mutex<Option<AccountCursor>>,
}

impl SideClient {
    /// Connect to the sidechain gRPC endpoint. The secret key signs every
    /// outbound transaction on behalf of `sender`.
    pub async fn connect(
        grpc: &str,
        sender: String,
        chain_id: String,
        gas: u64,
        retries: u32,
        secret_key: SecretKey,
    ) -> Result<Self, SideError> {
        let endpoint = Endpoint::from_shared(format!("http://{grpc}"))?;
        let channel = endpoint.connect().await?;

        let secp = Secp256k1::new();
        let public_key = secret_key.public_key(&secp);

        Ok(Self {
            channel,
            sender,
            chain_id,
            gas,
            retries,
            secp,
            secret_key,
            public_key,
            cursor: Mutex::new(None),
        })
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    async fn query<Req, Resp>(&self, path: &'static str, request: Req) -> Result<Resp, SideError>
    where
        Req: ProstMessage + 'static,
        Resp: ProstMessage + Default + 'static,
    {
        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        let call = async {
            grpc.ready().await.map_err(SideError::Transport)?;
            let codec: tonic::codec::ProstCodec<Req, Resp> = tonic::codec::ProstCodec::default();
            let path = tonic::codegen::http::uri::PathAndQuery::from_static(path);
            let response = grpc.unary(tonic::Request::new(request), path, codec).await?;
            Ok::<Resp, SideError>(response.into_inner())
        };

        tokio::time::timeout(DEFAULT_TIMEOUT, call)
            .await
            .map_err(|_| SideError::Timeout)?
    }

    /// Query the relayer account's number and sequence from the auth module.
    async fn fetch_cursor(&self) -> Result<AccountCursor, SideError> {
        let mut client = AuthQueryClient::new(self.channel.clone());
        let request = QueryAccountRequest {
            address: self.sender.clone(),
        };
        let response = tokio::time::timeout(DEFAULT_TIMEOUT, client.account(request))
            .await
            .map_err(|_| SideError::Timeout)??;

        let any = response
            .into_inner()
            .account
            .ok_or_else(|| SideError::AccountNotFound(self.sender.clone()))?;
        let account = BaseAccount::decode(any.value.as_slice())?;

        debug!(
            account = account.account_number,
            sequence = account.sequence,
            "fetched account cursor"
        );
        Ok(AccountCursor {
            account_number: account.account_number,
            sequence: account.sequence,
        })
    }

    async fn broadcast_envelope(&self, tx_bytes: Vec<u8>) -> Result<(), SideError> {
        let mut client = TxServiceClient::new(self.channel.clone());
        let request = BroadcastTxRequest {
            tx_bytes,
            mode: BroadcastMode::Sync as i32,
        };
        let response = tokio::time::timeout(DEFAULT_TIMEOUT, client.broadcast_tx(request))
            .await
            .map_err(|_| SideError::Timeout)??;

        let tx_response = response
            .into_inner()
            .tx_response
            .ok_or(SideError::EmptyResponse)?;

        if tx_response.code == 0 {
            info!(txhash = %tx_response.txhash, "transaction broadcasted");
            return Ok(());
        }

        if tx_response.code == WRONG_SEQUENCE_CODE
            || tx_response.raw_log.contains("account sequence mismatch")
        {
            return Err(SideError::SequenceMismatch {
                log: tx_response.raw_log,
            });
        }

        Err(SideError::Rejected {
            code: tx_response.code,
            log: tx_response.raw_log,
        })
    }

    /// Build, sign and broadcast a transaction carrying exactly one
    /// message. The sequence advances only after the sidechain accepts
    /// the broadcast; a network failure reuses the same sequence.
    pub async fn send_side_tx<M: ProstMessage>(
        &self,
        type_url: &str,
        msg: &M,
    ) -> Result<(), SideError> {
        let mut guard = self.cursor.lock().await;
        if guard.is_none() {
            *guard = Some(self.fetch_cursor().await?);
        }
        let cursor = (*guard).ok_or(SideError::EmptyResponse)?;

        let tx_bytes = sign_tx_envelope(
            &self.secp,
            &self.secret_key,
            &self.public_key,
            &self.chain_id,
            self.gas,
            &cursor,
            type_url,
            msg.encode_to_vec(),
        );

        match self.broadcast_envelope(tx_bytes).await {
            Ok(()) => {
                *guard = Some(AccountCursor {
                    account_number: cursor.account_number,
                    sequence: cursor.sequence + 1,
                });
                Ok(())
            }
            Err(SideError::SequenceMismatch { log }) => {
                warn!(log = %log, "account sequence mismatch, cursor will be refetched");
                *guard = None;
                Err(SideError::SequenceMismatch { log })
            }
            Err(e) => Err(e),
        }
    }

    /// Submission with the configured bounded retry policy and linear
    /// backoff. A sequence mismatch retries immediately with a refetched
    /// cursor; other retryable failures back off first.
    pub async fn send_side_tx_with_retry<M: ProstMessage>(
        &self,
        type_url: &str,
        msg: &M,
    ) -> Result<(), SideError> {
        let attempts = self.retries.max(1);
        let mut last_err = SideError::Timeout;

        for attempt in 1..=attempts {
            match self.send_side_tx(type_url, msg).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(error = %e, attempt, "sidechain submission failed, retrying");
                    if !matches!(e, SideError::SequenceMismatch { .. }) {
                        tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
                    }
                    last_err = e;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err)
    }
}

#[async_trait]
impl SideBridge for SideClient {
    async fn query_chain_tip(&self) -> Result<ChainTip, SideError> {
        let resp: QueryChainTipResponse = self
            .query(QUERY_CHAIN_TIP, QueryChainTipRequest {})
            .await?;
        Ok(ChainTip {
            hash: resp.hash,
            height: resp.height,
        })
    }

    async fn query_params(&self) -> Result<Params, SideError> {
        let resp: QueryParamsResponse = self.query(QUERY_PARAMS, QueryParamsRequest {}).await?;
        resp.params.ok_or(SideError::EmptyResponse)
    }

    async fn query_signing_requests(
        &self,
        status: SigningStatus,
    ) -> Result<Vec<BitcoinSigningRequest>, SideError> {
        let resp: QuerySigningRequestResponse = self
            .query(
                QUERY_SIGNING_REQUEST,
                QuerySigningRequestRequest {
                    status: status as i32,
                    pagination: None,
                },
            )
            .await?;
        Ok(resp.requests)
    }

    async fn query_block_header_by_hash(
        &self,
        hash: &str,
    ) -> Result<Option<BlockHeader>, SideError> {
        let resp: QueryBlockHeaderByHashResponse = self
            .query(
                QUERY_BLOCK_HEADER_BY_HASH,
                QueryBlockHeaderByHashRequest {
                    hash: hash.to_string(),
                },
            )
            .await?;
        Ok(resp.block_header)
    }

    async fn submit_block_headers(&self, headers: Vec<BlockHeader>) -> Result<(), SideError> {
        let msg = MsgSubmitBlockHeaderRequest {
            sender: self.sender.clone(),
            block_headers: headers,
        };
        self.send_side_tx_with_retry(TYPE_SUBMIT_BLOCK_HEADER, &msg)
            .await
    }

    async fn submit_deposit_tx(
        &self,
        blockhash: String,
        prev_tx_bytes: String,
        tx_bytes: String,
        proof: Vec<String>,
    ) -> Result<(), SideError> {
        let msg = MsgSubmitDepositTransactionRequest {
            sender: self.sender.clone(),
            blockhash,
            prev_tx_bytes,
            tx_bytes,
            proof,
        };
        self.send_side_tx_with_retry(TYPE_SUBMIT_DEPOSIT_TX, &msg)
            .await
    }

    async fn submit_withdraw_tx(
        &self,
        blockhash: String,
        tx_bytes: String,
        proof: Vec<String>,
    ) -> Result<(), SideError> {
        let msg = MsgSubmitWithdrawTransactionRequest {
            sender: self.sender.clone(),
            blockhash,
            tx_bytes,
            proof,
        };
        self.send_side_tx_with_retry(TYPE_SUBMIT_WITHDRAW_TX, &msg)
            .await
    }

    async fn submit_withdraw_signatures(
        &self,
        txid: String,
        psbt: String,
    ) -> Result<(), SideError> {
        let msg = MsgSubmitWithdrawSignaturesRequest {
            sender: self.sender.clone(),
            txid,
            psbt,
        };
        self.send_side_tx_with_retry(TYPE_SUBMIT_WITHDRAW_SIGNATURES, &msg)
            .await
    }

    async fn submit_withdraw_status(
        &self,
        txid: String,
        status: SigningStatus,
    ) -> Result<(), SideError> {
        let msg = MsgSubmitWithdrawStatusRequest {
            sender: self.sender.clone(),
            txid,
            status: status as i32,
        };
        self.send_side_tx_with_retry(TYPE_SUBMIT_WITHDRAW_STATUS, &msg)
            .await
    }
}

/// Build and sign a single-message transaction envelope (SIGN_MODE_DIRECT)
/// and return the encoded `TxRaw` bytes.
#[allow(clippy::too_many_arguments)]
pub(crate) fn sign_tx_envelope(
    secp: &Secp256k1<All>,
    secret_key: &SecretKey,
    public_key: &PublicKey,
    chain_id: &str,
    gas: u64,
    cursor: &AccountCursor,
    type_url: &str,
    msg_bytes: Vec<u8>,
) -> Vec<u8> {
    let body = TxBody {
        messages: vec![Any {
            type_url: type_url.to_string(),
            value: msg_bytes,
        }],
        ..Default::default()
    };
    let body_bytes = body.encode_to_vec();

    let pub_key = PubKey {
        key: public_key.serialize().to_vec(),
    };
    let signer_info = SignerInfo {
        public_key: Some(Any {
            type_url: "/cosmos.crypto.secp256k1.PubKey".to_string(),
            value: pub_key.encode_to_vec(),
        }),
        mode_info: Some(ModeInfo {
            sum: Some(mode_info::Sum::Single(mode_info::Single {
                mode: SignMode::Direct as i32,
            })),
        }),
        sequence: cursor.sequence,
    };
    let auth_info = AuthInfo {
        signer_infos: vec![signer_info],
        fee: Some(Fee {
            amount: vec![Coin {
                denom: FEE_DENOM.to_string(),
                amount: FEE_AMOUNT.to_string(),
            }],
            gas_limit: gas,
            payer: String::new(),
            granter: String::new(),
        }),
        ..Default::default()
    };
    let auth_info_bytes = auth_info.encode_to_vec();

    let sign_doc = SignDoc {
        body_bytes: body_bytes.clone(),
        auth_info_bytes: auth_info_bytes.clone(),
        chain_id: chain_id.to_string(),
        account_number: cursor.account_number,
    };
    let digest: [u8; 32] = Sha256::digest(sign_doc.encode_to_vec()).into();
    let signature = secp.sign_ecdsa(&Message::from_digest(digest), secret_key);

    TxRaw {
        body_bytes,
        auth_info_bytes,
        signatures: vec![signature.serialize_compact().to_vec()],
    }
    .encode_to_vec()
}
