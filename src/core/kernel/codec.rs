use crate::core::errors::TradeError;

/// Codec trait for a venue's WebSocket text protocol
///
/// The transport in `ws` only moves frames; a codec turns venue requests into
/// text frames and classifies inbound text into typed messages.
pub trait WsCodec: Send + Sync + 'static {
    /// The type representing parsed messages from this venue
    type Message: Send;

    /// A channel the venue can stream
    type Subscription;

    /// Encode a subscription request into a text frame body
    fn encode_subscription(&self, subscription: &Self::Subscription) -> Result<String, TradeError>;

    /// Decode one inbound text frame
    ///
    /// # Returns
    /// - `Ok(Some(message))` - a message this codec understands
    /// - `Ok(None)` - the frame was ignored (acks, unknown channels)
    /// - `Err(error)` - the frame claimed a known shape but was malformed
    fn decode_message(&self, text: &str) -> Result<Option<Self::Message>, TradeError>;
}
