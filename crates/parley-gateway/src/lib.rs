pub mod connection;
pub mod delivery;
pub mod registry;

pub use delivery::{DeliveryDispatcher, Origin};
pub use registry::{ConnectionId, SessionRegistry};
