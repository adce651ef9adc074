//! 策略仓库：远端版本化文档之上的领域操作
pub mod codec;
pub mod strategy_store;

pub use strategy_store::StrategyStore;
