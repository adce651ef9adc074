pub mod core;
pub mod gateways;
pub mod remote;
pub mod store;
pub mod strategies;
pub mod utils;

pub use crate::core::{config::*, error::*, types::*};
pub use store::StrategyStore;
