pub mod api;
pub mod host;
pub mod metrics;
pub mod model;
pub mod session;
pub mod settings;
pub mod transport;

pub use api::Error;
