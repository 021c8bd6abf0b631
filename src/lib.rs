/// Client: reconnect loop, connection hand-off, publish and ping.
pub mod client;
/// Connection abstraction and its TCP implementation (dial, handshake, run).
pub mod connection;
/// Flexible logging (formatting, filters, sinks).
pub mod logging;
/// Wire protocol: frames, encoder and decoder.
pub mod protocol;
/// Subscriptions and the registry that routes messages to them.
pub mod subscription;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Client, its configuration and reconnect policy.
pub use client::{
    Backoff, Client, ClientConfig, ClientSettings, ClientState, ConnectionHandoff,
    ReconnectPolicy, StopSignal,
};
/// Connection traits and the TCP implementation.
pub use connection::{
    Connection, ConnectionOptions, DefaultHandshaker, Dialer, Handshaker, InboundFrames,
    TcpDialer, TcpTransport, Transport,
};
/// Operation errors and result types.
pub use nimbus_error::{ClientError, NimbusResult, StackError, StatusCode, SubscriptionError};
/// Protocol frames.
pub use protocol::{ClientFrame, ConnectInfo, Message, ServerFrame, ServerInfo, Sid};
/// Subscription API.
pub use subscription::{Subscription, SubscriptionHandle, SubscriptionRegistry};
