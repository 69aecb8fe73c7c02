use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::chains::arbitrum::transaction::erc20_balance_of_data;
use crate::core::config::ServiceConfig;
use crate::core::errors::{preview, TradeError, PREVIEW_LEN};
use crate::core::kernel::rest::RestClient;
use crate::core::types::{parse_hex_quantity, Address};

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// Subset of a transaction receipt needed to count confirmations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub block_number: u128,
    /// `Some(false)` when the transaction reverted
    pub success: Option<bool>,
}

/// Interpret one JSON-RPC response body, returning its `result`.
///
/// A `null` result is returned as-is; a body with neither member is a protocol error.
pub fn parse_rpc_response(text: &str) -> Result<Value, TradeError> {
    let mut envelope: Value = serde_json::from_str(text)?;
    if let Some(err) = envelope.get("error").filter(|e| !e.is_null()) {
        let err: RpcErrorObject = serde_json::from_value(err.clone())?;
        return Err(TradeError::RpcError {
            code: err.code,
            message: preview(&err.message, PREVIEW_LEN).to_string(),
            data: err
                .data
                .map(|d| preview(&d.to_string(), PREVIEW_LEN).to_string()),
        });
    }
    envelope
        .get_mut("result")
        .map(Value::take)
        .ok_or_else(|| TradeError::ProtocolError("response has neither result nor error".to_string()))
}

/// Whether `text` is a JSON-RPC envelope with a non-null `error` member.
fn carries_rpc_error(text: &str) -> bool {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|v| v.get("error").map(|e| !e.is_null()))
        .unwrap_or(false)
}

fn as_quantity(value: &Value, what: &str) -> Result<u128, TradeError> {
    let s = value
        .as_str()
        .ok_or_else(|| TradeError::ProtocolError(format!("{} is not a hex string", what)))?;
    parse_hex_quantity(s)
}

/// JSON-RPC 2.0 client for an Ethereum-compatible node.
///
/// Transport failures (no response, empty body) are retried with a fixed delay;
/// an explicit error object from the node is returned immediately, whatever
/// the HTTP status it arrived with.
pub struct JsonRpcClient<R: RestClient> {
    rest: R,
    attempts: u32,
    retry_delay: Duration,
    next_id: AtomicU64,
}

impl<R: RestClient> JsonRpcClient<R> {
    pub fn new(rest: R, config: &ServiceConfig) -> Self {
        Self {
            rest,
            attempts: config.rpc_attempts.max(1),
            retry_delay: config.rpc_retry_delay,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn transport(&self) -> &R {
        &self.rest
    }

    #[instrument(skip_all, fields(method = %method))]
    pub fn call(&self, method: &str, params: Value) -> Result<Value, TradeError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        })
        .to_string();

        for attempt in 1..=self.attempts {
            match self.rest.post_raw("", &body) {
                Ok(text) if !text.trim().is_empty() => return parse_rpc_response(&text),
                Ok(_) => debug!(attempt, "empty response"),
                // Nodes report rate limits and bad params with an error object
                // under a 4xx/5xx status.
                Err(TradeError::HttpStatus { status, body }) if carries_rpc_error(&body) => {
                    debug!(attempt, status, "rpc error object in http error reply");
                    return parse_rpc_response(&body);
                }
                Err(e) if e.is_transport() => debug!(attempt, error = %e, "transport failure"),
                Err(e) => return Err(e),
            }
            if attempt < self.attempts && !self.retry_delay.is_zero() {
                thread::sleep(self.retry_delay);
            }
        }

        warn!(attempts = self.attempts, "rpc call exhausted retries");
        Err(TradeError::RpcCallFailed {
            method: method.to_string(),
        })
    }

    fn call_quantity(&self, method: &str, params: Value) -> Result<u128, TradeError> {
        let result = self.call(method, params)?;
        as_quantity(&result, method)
    }

    pub fn get_balance(&self, address: &Address) -> Result<u128, TradeError> {
        self.call_quantity("eth_getBalance", json!([address.to_string(), "latest"]))
    }

    pub fn gas_price(&self) -> Result<u128, TradeError> {
        self.call_quantity("eth_gasPrice", json!([]))
    }

    /// Nonce for the next transaction, counting pending ones.
    pub fn transaction_count(&self, address: &Address) -> Result<u128, TradeError> {
        self.call_quantity(
            "eth_getTransactionCount",
            json!([address.to_string(), "pending"]),
        )
    }

    pub fn block_number(&self) -> Result<u128, TradeError> {
        self.call_quantity("eth_blockNumber", json!([]))
    }

    pub fn erc20_balance_of(&self, token: &Address, owner: &Address) -> Result<u128, TradeError> {
        let data = format!("0x{}", hex::encode(erc20_balance_of_data(owner)));
        self.call_quantity(
            "eth_call",
            json!([{ "to": token.to_string(), "data": data }, "latest"]),
        )
    }

    /// `baseFeePerGas` of the latest block; `None` on chains without one.
    pub fn latest_base_fee(&self) -> Result<Option<u128>, TradeError> {
        let block = self.call("eth_getBlockByNumber", json!(["latest", false]))?;
        match block.get("baseFeePerGas") {
            Some(fee) if !fee.is_null() => Ok(Some(as_quantity(fee, "baseFeePerGas")?)),
            _ => Ok(None),
        }
    }

    /// Submit a signed transaction and return its hash as reported by the node.
    pub fn send_raw_transaction(&self, raw_hex: &str) -> Result<String, TradeError> {
        let result = self.call("eth_sendRawTransaction", json!([raw_hex]))?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| TradeError::ProtocolError("transaction hash is not a string".to_string()))
    }

    pub fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>, TradeError> {
        let result = self.call("eth_getTransactionReceipt", json!([tx_hash]))?;
        if result.is_null() {
            return Ok(None);
        }
        let Some(block) = result.get("blockNumber").filter(|b| !b.is_null()) else {
            return Ok(None);
        };
        let success = match result.get("status").and_then(Value::as_str) {
            Some(s) => Some(parse_hex_quantity(s)? == 1),
            None => None,
        };
        Ok(Some(TxReceipt {
            block_number: as_quantity(block, "blockNumber")?,
            success,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Scripted {
        replies: Mutex<Vec<Result<String, TradeError>>>,
        bodies: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(mut replies: Vec<Result<String, TradeError>>) -> Self {
            replies.reverse();
            Self {
                replies: Mutex::new(replies),
                bodies: Mutex::new(Vec::new()),
            }
        }
    }

    impl RestClient for Scripted {
        fn post_raw(&self, _endpoint: &str, body: &str) -> Result<String, TradeError> {
            self.bodies.lock().unwrap().push(body.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(String::new()))
        }
    }

    fn client(replies: Vec<Result<String, TradeError>>) -> JsonRpcClient<Scripted> {
        JsonRpcClient::new(Scripted::new(replies), &ServiceConfig::immediate())
    }

    #[test]
    fn test_result_quantity() {
        let rpc = client(vec![Ok(r#"{"jsonrpc":"2.0","id":1,"result":"0x2386f26fc10000"}"#.into())]);
        assert_eq!(rpc.gas_price().unwrap(), 10_000_000_000_000_000);
    }

    #[test]
    fn test_rpc_error_not_retried() {
        let rpc = client(vec![
            Ok(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"nonce too low","data":{"x":1}}}"#.into()),
            Ok(r#"{"jsonrpc":"2.0","id":2,"result":"0x1"}"#.into()),
        ]);
        match rpc.send_raw_transaction("0x00").unwrap_err() {
            TradeError::RpcError { code, message, data } => {
                assert_eq!(code, -32000);
                assert_eq!(message, "nonce too low");
                assert_eq!(data.as_deref(), Some(r#"{"x":1}"#));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(rpc.rest.bodies.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_error_object_under_http_error_not_retried() {
        let rpc = client(vec![
            Err(TradeError::HttpStatus {
                status: 429,
                body: r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32005,"message":"rate limited"}}"#.into(),
            }),
            Ok(r#"{"jsonrpc":"2.0","id":2,"result":"0x7"}"#.into()),
        ]);
        match rpc.transaction_count(&Address([0x11; 20])).unwrap_err() {
            TradeError::RpcError { code, message, data } => {
                assert_eq!(code, -32005);
                assert_eq!(message, "rate limited");
                assert_eq!(data, None);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(rpc.rest.bodies.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_http_error_without_envelope_is_retried() {
        let rpc = client(vec![
            Err(TradeError::HttpStatus {
                status: 502,
                body: "<html>bad gateway</html>".into(),
            }),
            Err(TradeError::HttpStatus {
                status: 503,
                body: r#"{"jsonrpc":"2.0","id":1,"error":null}"#.into(),
            }),
            Err(TradeError::HttpStatus {
                status: 503,
                body: String::new(),
            }),
        ]);
        assert_eq!(rpc.gas_price().unwrap_err().code(), "eth_gasPrice_failed");
        assert_eq!(rpc.rest.bodies.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_transport_failure_then_success() {
        let rpc = client(vec![
            Err(TradeError::TransportError("connection reset".into())),
            Ok(String::new()),
            Ok(r#"{"jsonrpc":"2.0","id":1,"result":"0x10"}"#.into()),
        ]);
        assert_eq!(rpc.block_number().unwrap(), 16);
        assert_eq!(rpc.rest.bodies.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_base_fee_from_block() {
        let rpc = client(vec![
            Ok(r#"{"jsonrpc":"2.0","id":1,"result":{"number":"0x1","baseFeePerGas":"0x989680"}}"#.into()),
            Ok(r#"{"jsonrpc":"2.0","id":2,"result":{"number":"0x2"}}"#.into()),
        ]);
        assert_eq!(rpc.latest_base_fee().unwrap(), Some(10_000_000));
        assert_eq!(rpc.latest_base_fee().unwrap(), None);
    }

    #[test]
    fn test_balance_of_request_shape() {
        let rpc = client(vec![Ok(format!(
            r#"{{"jsonrpc":"2.0","id":1,"result":"0x{:064x}"}}"#,
            6_000_000u64
        ))]);
        let owner: Address = "0x1111111111111111111111111111111111111111".parse().unwrap();
        let token: Address = "0x2222222222222222222222222222222222222222".parse().unwrap();
        assert_eq!(rpc.erc20_balance_of(&token, &owner).unwrap(), 6_000_000);

        let body: Value = serde_json::from_str(&rpc.rest.bodies.lock().unwrap()[0]).unwrap();
        assert_eq!(body["method"], "eth_call");
        assert_eq!(body["params"][0]["to"], token.to_string());
        assert!(body["params"][0]["data"]
            .as_str()
            .unwrap()
            .starts_with("0x70a08231000000000000000000000000"));
        assert_eq!(body["params"][1], "latest");
    }

    #[test]
    fn test_receipt_pending_and_mined() {
        let rpc = client(vec![
            Ok(r#"{"jsonrpc":"2.0","id":1,"result":null}"#.into()),
            Ok(r#"{"jsonrpc":"2.0","id":2,"result":{"blockNumber":"0x64","status":"0x1"}}"#.into()),
        ]);
        assert_eq!(rpc.transaction_receipt("0xabc").unwrap(), None);
        assert_eq!(
            rpc.transaction_receipt("0xabc").unwrap(),
            Some(TxReceipt {
                block_number: 100,
                success: Some(true)
            })
        );
    }
}
