pub mod config;
pub mod error;
pub mod headers;
pub mod logging;
pub mod relay;
pub mod request;
pub mod server;
pub mod session;
pub mod spool;
pub mod transform;
pub mod upstream;

pub use config::Config;
pub use error::ProxyError;
pub use server::RelayServer;
pub use transform::{ImageTransformer, build_transformer};
