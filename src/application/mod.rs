pub mod events;
pub mod executor;
pub mod orchestrator;
pub mod quota;
pub mod retry;
pub mod worker;

pub use events::*;
pub use executor::*;
pub use orchestrator::*;
pub use retry::*;
pub use worker::*;
