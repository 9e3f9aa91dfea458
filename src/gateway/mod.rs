mod error;
pub use error::*;

#[allow(clippy::module_inception)]
mod gateway;
pub use gateway::*;

mod http;
pub use http::*;

mod validation;
pub use validation::*;
