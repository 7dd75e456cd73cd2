pub mod app_config;
pub mod executor;
pub mod jobs;
pub mod leader_election;
pub mod observability;
pub mod resilience;
pub mod scheduler;
pub mod state;

pub use app_config::*;
pub use executor::*;
pub use jobs::*;
pub use leader_election::*;
pub use observability::*;
pub use resilience::*;
pub use scheduler::*;
pub use state::*;
