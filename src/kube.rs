pub mod apis;
pub mod client;
pub mod store;

pub use client::KubeClient;
pub use store::GatewayStore;
