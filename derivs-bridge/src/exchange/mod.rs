/// `Okx` public WebSocket and REST integration.
pub mod okx;
