//! `side.btcbridge` Message Definitions
//!
//! Hand-vendored prost mirror of the bridge module schema, trimmed to the
//! messages the relayer exchanges. Field tags match the module's proto
//! definitions exactly; do not renumber.

use cosmos_sdk_proto::cosmos;

/// Bitcoin Block Header
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BlockHeader {
    #[prost(uint64, tag = "1")]
    pub version: u64,
    #[prost(string, tag = "2")]
    pub hash: ::prost::alloc::string::String,
    #[prost(uint64, tag = "3")]
    pub height: u64,
    #[prost(string, tag = "4")]
    pub previous_block_hash: ::prost::alloc::string::String,
    #[prost(string, tag = "5")]
    pub merkle_root: ::prost::alloc::string::String,
    #[prost(uint64, tag = "6")]
    pub nonce: u64,
    #[prost(string, tag = "7")]
    pub bits: ::prost::alloc::string::String,
    #[prost(uint64, tag = "8")]
    pub time: u64,
    #[prost(uint64, tag = "9")]
    pub ntx: u64,
}

/// Bitcoin Signing Request
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BitcoinSigningRequest {
    #[prost(string, tag = "1")]
    pub address: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub txid: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub psbt: ::prost::alloc::string::String,
    #[prost(enumeration = "SigningStatus", tag = "4")]
    pub status: i32,
    #[prost(uint64, tag = "5")]
    pub sequence: u64,
    /// The vault address that the request is associated with
    #[prost(string, tag = "6")]
    pub vault_address: ::prost::alloc::string::String,
}

/// Bitcoin Signing Status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum SigningStatus {
    /// Default value, should not be used
    Unspecified = 0,
    /// The signing request is created
    Created = 1,
    /// The signing request is signed
    Signed = 2,
    /// The signing request is broadcasted
    Broadcasted = 3,
    /// The signing request is confirmed
    Confirmed = 4,
    /// The signing request is rejected
    Rejected = 5,
}

impl SigningStatus {
    /// String value of the enum field names used in the ProtoBuf definition.
    pub fn as_str_name(&self) -> &'static str {
        match self {
            SigningStatus::Unspecified => "SIGNING_STATUS_UNSPECIFIED",
            SigningStatus::Created => "SIGNING_STATUS_CREATED",
            SigningStatus::Signed => "SIGNING_STATUS_SIGNED",
            SigningStatus::Broadcasted => "SIGNING_STATUS_BROADCASTED",
            SigningStatus::Confirmed => "SIGNING_STATUS_CONFIRMED",
            SigningStatus::Rejected => "SIGNING_STATUS_REJECTED",
        }
    }
}

/// Params defines the parameters for the module.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Params {
    /// Only accept blocks sent from these addresses
    #[prost(string, repeated, tag = "1")]
    pub authorized_relayers: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    /// The minimum number of confirmations required for a block to be accepted
    #[prost(int32, tag = "2")]
    pub confirmations: i32,
    /// Maximum depth from the latest block up to which transactions are accepted
    #[prost(uint64, tag = "3")]
    pub max_acceptable_block_depth: u64,
    /// The denomination of the voucher
    #[prost(string, tag = "4")]
    pub btc_voucher_denom: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "5")]
    pub vaults: ::prost::alloc::vec::Vec<Vault>,
}

/// Vault defines the parameters for the module.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Vault {
    /// The depositor should send their btc to this address
    #[prost(string, tag = "1")]
    pub address: ::prost::alloc::string::String,
    /// The pub key to which the voucher is sent
    #[prost(string, tag = "2")]
    pub pub_key: ::prost::alloc::string::String,
    /// The address to which the voucher is sent
    #[prost(enumeration = "AssetType", tag = "4")]
    pub asset_type: i32,
}

/// AssetType defines the type of asset
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum AssetType {
    /// Unspecified asset type
    Unspecified = 0,
    /// BTC
    Btc = 1,
    /// BRC20: ordi, sats
    Brc20 = 2,
    /// RUNE, dog*go*to*the*moon
    Rune = 3,
}

impl AssetType {
    /// String value of the enum field names used in the ProtoBuf definition.
    pub fn as_str_name(&self) -> &'static str {
        match self {
            AssetType::Unspecified => "ASSET_TYPE_UNSPECIFIED",
            AssetType::Btc => "ASSET_TYPE_BTC",
            AssetType::Brc20 => "ASSET_TYPE_BRC20",
            AssetType::Rune => "ASSET_TYPE_RUNE",
        }
    }
}

/// QuerySigningRequestRequest is request type for the Query/SigningRequest RPC method.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QuerySigningRequestRequest {
    #[prost(enumeration = "SigningStatus", tag = "1")]
    pub status: i32,
    #[prost(message, optional, tag = "2")]
    pub pagination: ::core::option::Option<cosmos::base::query::v1beta1::PageResponse>,
}

/// QuerySigningRequestResponse is response type for the Query/SigningRequest RPC method.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QuerySigningRequestResponse {
    #[prost(message, repeated, tag = "1")]
    pub requests: ::prost::alloc::vec::Vec<BitcoinSigningRequest>,
    #[prost(message, optional, tag = "2")]
    pub pagination: ::core::option::Option<cosmos::base::query::v1beta1::PageResponse>,
}

/// QueryParamsRequest is request type for the Query/Params RPC method.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryParamsRequest {}

/// QueryParamsResponse is response type for the Query/Params RPC method.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryParamsResponse {
    /// params holds all the parameters of this module.
    #[prost(message, optional, tag = "1")]
    pub params: ::core::option::Option<Params>,
}

/// QueryChainTipRequest is request type for the Query/ChainTip RPC method.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryChainTipRequest {}

/// QueryChainTipResponse is response type for the Query/ChainTip RPC method.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryChainTipResponse {
    #[prost(string, tag = "1")]
    pub hash: ::prost::alloc::string::String,
    #[prost(uint64, tag = "2")]
    pub height: u64,
}

/// QueryBlockHeaderByHashRequest is the request type for the Query/BlockHeaderByHash RPC method.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryBlockHeaderByHashRequest {
    #[prost(string, tag = "1")]
    pub hash: ::prost::alloc::string::String,
}

/// QueryBlockHeaderByHashResponse is the response type for the Query/BlockHeaderByHash RPC method.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryBlockHeaderByHashResponse {
    #[prost(message, optional, tag = "1")]
    pub block_header: ::core::option::Option<BlockHeader>,
}

/// MsgSubmitBlockHeaderRequest defines the Msg/SubmitBlockHeaders request type.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MsgSubmitBlockHeaderRequest {
    #[prost(string, tag = "1")]
    pub sender: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "2")]
    pub block_headers: ::prost::alloc::vec::Vec<BlockHeader>,
}

/// MsgSubmitBlockHeadersResponse defines the Msg/SubmitBlockHeaders response type.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MsgSubmitBlockHeadersResponse {}

/// MsgSubmitDepositTransactionRequest defines the Msg/SubmitDepositTransaction request type.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MsgSubmitDepositTransactionRequest {
    /// The relayer address submitting the bitcoin transaction to the side chain
    #[prost(string, tag = "1")]
    pub sender: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub blockhash: ::prost::alloc::string::String,
    /// The tx bytes in base64 format,
    /// used for parsing the sender of the transaction
    #[prost(string, tag = "3")]
    pub prev_tx_bytes: ::prost::alloc::string::String,
    /// The tx bytes in base64 format
    #[prost(string, tag = "4")]
    pub tx_bytes: ::prost::alloc::string::String,
    #[prost(string, repeated, tag = "5")]
    pub proof: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

/// MsgSubmitDepositTransactionResponse defines the Msg/SubmitDepositTransaction response type.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MsgSubmitDepositTransactionResponse {}

/// MsgSubmitWithdrawTransactionRequest defines the Msg/SubmitWithdrawTransaction request type.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MsgSubmitWithdrawTransactionRequest {
    /// The relayer address submitting the bitcoin transaction to the side chain
    #[prost(string, tag = "1")]
    pub sender: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub blockhash: ::prost::alloc::string::String,
    /// The tx bytes in base64 format
    #[prost(string, tag = "4")]
    pub tx_bytes: ::prost::alloc::string::String,
    #[prost(string, repeated, tag = "5")]
    pub proof: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

/// MsgSubmitWithdrawTransactionResponse defines the Msg/SubmitWithdrawTransaction response type.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MsgSubmitWithdrawTransactionResponse {}

/// MsgSubmitWithdrawSignaturesRequest defines the Msg/SubmitWithdrawSignatures request type.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MsgSubmitWithdrawSignaturesRequest {
    #[prost(string, tag = "1")]
    pub sender: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub txid: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub psbt: ::prost::alloc::string::String,
}

/// MsgSubmitWithdrawSignaturesResponse defines the Msg/SubmitWithdrawSignatures response type.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MsgSubmitWithdrawSignaturesResponse {}

/// MsgSubmitWithdrawStatusRequest defines the Msg/SubmitWithdrawStatus request type.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MsgSubmitWithdrawStatusRequest {
    #[prost(string, tag = "1")]
    pub sender: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub txid: ::prost::alloc::string::String,
    #[prost(enumeration = "SigningStatus", tag = "3")]
    pub status: i32,
}

/// MsgSubmitWithdrawStatusResponse defines the Msg/SubmitWithdrawStatus response type.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MsgSubmitWithdrawStatusResponse {}

/// Look up a vault entry by its bitcoin address.
pub fn select_vault_by_address<'a>(vaults: &'a [Vault], address: &str) -> Option<&'a Vault> {
    vaults.iter().find(|v| v.address == address)
}

/// Look up a vault entry by its hex-encoded public key.
pub fn select_vault_by_pub_key<'a>(vaults: &'a [Vault], pub_key: &str) -> Option<&'a Vault> {
    vaults.iter().find(|v| v.pub_key == pub_key)
}
