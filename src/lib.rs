pub mod app;
pub mod backup;
pub mod cmd;
pub mod config;
pub mod error;
pub mod kube;
pub mod logging;
pub mod release;
pub mod resolve;
pub mod template;
pub mod upgrade;
pub mod values;
