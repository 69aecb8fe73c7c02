use thiserror::Error;

/// Longest slice of a remote body that is ever copied into an error or a log line.
pub const PREVIEW_LEN: usize = 256;

/// Truncate `s` to at most `max` bytes without splitting a UTF-8 sequence.
pub fn preview(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[derive(Error, Debug)]
pub enum TradeError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    TransportError(String),

    /// Non-2xx reply. The body is kept whole so callers can look for an
    /// error envelope inside it.
    #[error("HTTP {status}: {}", preview(body, PREVIEW_LEN))]
    HttpStatus { status: u16, body: String },

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("RPC error: {code} - {message}")]
    RpcError {
        code: i64,
        message: String,
        data: Option<String>,
    },

    #[error("{method}_failed")]
    RpcCallFailed { method: String },

    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),

    #[error("insufficient_eth_for_gas: have {have} wei, want {want} wei")]
    InsufficientEthForGas { have: u128, want: u128 },

    #[error("amount_exceeds_available: have {have}, want {want}")]
    AmountExceedsAvailable { have: u128, want: u128 },

    #[error("missing_rpc_or_address")]
    MissingRpcOrAddress,

    #[error("transaction {hash} reverted")]
    TxReverted { hash: String },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("cancelled")]
    Cancelled,

    #[error("Exchange rejected request: {0}")]
    ExchangeError(String),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::core::config::ConfigError),

    #[error("Other error: {0}")]
    Other(String),
}

impl TradeError {
    /// Stable machine-readable code, used by callers to pick a user-facing message.
    pub fn code(&self) -> String {
        match self {
            Self::HttpError(_) | Self::TransportError(_) | Self::HttpStatus { .. } => "transport".to_string(),
            Self::JsonError(_) | Self::ProtocolError(_) => "protocol".to_string(),
            Self::RpcError { .. } => "rpc_error".to_string(),
            Self::RpcCallFailed { method } => format!("{}_failed", method),
            Self::CryptoError(e) => e.code().to_string(),
            Self::InsufficientEthForGas { .. } => "insufficient_eth_for_gas".to_string(),
            Self::AmountExceedsAvailable { .. } => "amount_exceeds_available".to_string(),
            Self::MissingRpcOrAddress => "missing_rpc_or_address".to_string(),
            Self::TxReverted { .. } => "tx_reverted".to_string(),
            Self::Timeout(_) => "timeout".to_string(),
            Self::Cancelled => "cancelled".to_string(),
            Self::ExchangeError(_) => "exchange_error".to_string(),
            Self::ConfigError(_) => "config".to_string(),
            Self::Other(_) => "other".to_string(),
        }
    }

    /// Transport failures are the only ones worth retrying locally.
    pub const fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::HttpError(_) | Self::TransportError(_) | Self::HttpStatus { .. }
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid_private_key")]
    InvalidPrivateKey,

    #[error("sign_failed: {0}")]
    SignFailed(String),

    #[error("recid_not_found")]
    RecidNotFound,

    #[error("recover_mismatch")]
    RecoverMismatch,

    #[error("invalid_signature: {0}")]
    InvalidSignature(String),
}

impl CryptoError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidPrivateKey => "invalid_private_key",
            Self::SignFailed(_) => "sign_failed",
            Self::RecidNotFound => "recid_not_found",
            Self::RecoverMismatch => "recover_mismatch",
            Self::InvalidSignature(_) => "invalid_signature",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_call_failed_code_carries_method() {
        let err = TradeError::RpcCallFailed {
            method: "eth_getTransactionCount".to_string(),
        };
        assert_eq!(err.code(), "eth_getTransactionCount_failed");
        assert_eq!(err.to_string(), "eth_getTransactionCount_failed");
    }

    #[test]
    fn test_http_status_is_transport_with_bounded_display() {
        let err = TradeError::HttpStatus {
            status: 502,
            body: "x".repeat(1000),
        };
        assert!(err.is_transport());
        assert_eq!(err.code(), "transport");
        assert_eq!(err.to_string().len(), "HTTP 502: ".len() + PREVIEW_LEN);
    }

    #[test]
    fn test_preview_respects_char_boundaries() {
        let s = "héllo";
        assert_eq!(preview(s, 2), "h");
        assert_eq!(preview(s, 64), s);
    }
}
