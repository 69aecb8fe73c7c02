use serde::Serialize;
use serde_json::Value;

use super::types::InfoRequest;
use crate::core::errors::TradeError;
use crate::core::kernel::codec::WsCodec;

/// Streams the terminal subscribes to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum Subscription {
    #[serde(rename = "allMids")]
    AllMids,
    #[serde(rename = "webData3")]
    WebData3 { user: String },
}

#[derive(Serialize)]
struct SubscribeEnvelope<'a> {
    method: &'static str,
    subscription: &'a Subscription,
}

#[derive(Serialize)]
struct PostEnvelope<'a> {
    method: &'static str,
    id: u64,
    request: PostRequest<'a>,
}

#[derive(Serialize)]
struct PostRequest<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    payload: &'a InfoRequest,
}

/// Inbound messages the feed cares about. Payloads stay as raw JSON text so
/// the cache hands back exactly what the venue sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HyperliquidWsMessage {
    /// The `mids` object of an `allMids` push
    AllMids(String),
    /// The `data` object of a `webData3` push
    WebData3(String),
    /// Reply to a correlated `post` request
    PostResponse {
        id: u64,
        /// `payload.type` of an info reply, e.g. `spotClearinghouseState`
        kind: Option<String>,
        data: String,
    },
}

/// Hyperliquid WebSocket codec
#[derive(Debug, Clone, Copy, Default)]
pub struct HyperliquidCodec;

impl HyperliquidCodec {
    pub const fn new() -> Self {
        Self
    }

    /// `{"method":"post","id":N,"request":{"type":"info","payload":{...}}}`
    pub fn encode_post(&self, id: u64, payload: &InfoRequest) -> Result<String, TradeError> {
        Ok(serde_json::to_string(&PostEnvelope {
            method: "post",
            id,
            request: PostRequest { kind: "info", payload },
        })?)
    }
}

impl WsCodec for HyperliquidCodec {
    type Message = HyperliquidWsMessage;
    type Subscription = Subscription;

    fn encode_subscription(&self, subscription: &Subscription) -> Result<String, TradeError> {
        Ok(serde_json::to_string(&SubscribeEnvelope {
            method: "subscribe",
            subscription,
        })?)
    }

    fn decode_message(&self, text: &str) -> Result<Option<HyperliquidWsMessage>, TradeError> {
        let value: Value = serde_json::from_str(text)?;
        let Some(channel) = value.get("channel").and_then(Value::as_str) else {
            return Ok(None);
        };
        let data = value.get("data");

        match channel {
            "allMids" => {
                let mids = data
                    .and_then(|d| d.get("mids"))
                    .and_then(Value::as_object)
                    .ok_or_else(|| TradeError::ProtocolError("allMids push without mids".to_string()))?;
                if mids.is_empty() {
                    return Ok(None);
                }
                Ok(Some(HyperliquidWsMessage::AllMids(serde_json::to_string(mids)?)))
            }
            "webData3" => {
                let data = data
                    .filter(|d| d.is_object())
                    .ok_or_else(|| TradeError::ProtocolError("webData3 push without data".to_string()))?;
                Ok(Some(HyperliquidWsMessage::WebData3(data.to_string())))
            }
            "post" => {
                let data = data
                    .ok_or_else(|| TradeError::ProtocolError("post reply without data".to_string()))?;
                let id = data
                    .get("id")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| TradeError::ProtocolError("post reply without id".to_string()))?;
                let kind = data
                    .pointer("/response/payload/type")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                Ok(Some(HyperliquidWsMessage::PostResponse {
                    id,
                    kind,
                    data: data.to_string(),
                }))
            }
            // subscriptionResponse, pong and channels nobody asked for
            _ => Ok(None),
        }
    }
}
