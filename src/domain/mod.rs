pub mod bet;
pub mod outcome;
pub mod prediction;
pub mod race;
pub mod state;
pub mod stats;

pub use bet::*;
pub use outcome::*;
pub use prediction::*;
pub use race::*;
pub use state::*;
pub use stats::*;
