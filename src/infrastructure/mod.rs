pub mod config;
pub mod crypto;
pub mod exchange;
pub mod identity;
pub mod store;

pub use self::config::*;
pub use crypto::*;
pub use exchange::*;
pub use identity::*;
pub use store::*;
