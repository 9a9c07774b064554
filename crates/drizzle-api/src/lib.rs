// drizzle-api: Async client for the cloud irrigation service (REST pull + websocket push)

pub mod error;
pub mod rest;
pub mod token;
pub mod transport;
pub mod websocket;
pub mod wire;

pub use error::Error;
pub use rest::ApiClient;
pub use token::{SessionToken, StaticToken, TokenProvider};
pub use transport::TransportConfig;
pub use websocket::{PushClient, PushConfig, ReconnectConfig};
