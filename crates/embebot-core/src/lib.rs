pub mod errors;
pub mod ids;
pub mod model;
pub mod protocol;
pub mod session;

pub use errors::RestError;
pub use session::SessionState;
