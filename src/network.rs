//! Network URL constants.

/// Default REST API base URL for history requests.
pub const DEFAULT_API_URL: &str = "https://api.candles.local";

/// Default WebSocket URL for live candle updates.
pub const DEFAULT_WS_URL: &str = "wss://stream.candles.local/ws";
