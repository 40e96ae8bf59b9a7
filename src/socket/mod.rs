//! Real-time channels to the `/rides` and `/planner` namespaces.

pub mod connection;
pub mod hub;
pub mod packet;
pub mod subscriptions;
pub mod transport;

pub use connection::{
    Connection, ConnectionManager, ConnectionOptions, ConnectionState, EventSubscription,
    Namespace, SocketError, SocketEvent,
};
pub use hub::SocketHub;
pub use transport::{Transport, WsTransport};
