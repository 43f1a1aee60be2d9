//! Core engine: the fetch → fit → predict → publish cycle and the
//! scheduler that drives it.

pub mod bot;
pub mod scheduler;

pub use bot::{Bot, BotState, CyclePhase};
pub use scheduler::{Schedule, Scheduler};
