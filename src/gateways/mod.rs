//! 行情数据源
pub mod eastmoney;

use async_trait::async_trait;

use crate::core::types::{NavSeries, Result};

pub use eastmoney::EastmoneyGateway;

#[async_trait]
pub trait MarketDataGateway: Send + Sync {
    /// 最近 `window` 个净值点，按时间升序
    ///
    /// 基金不存在返回 `NotFound`，网络或接口异常返回 `Unavailable`。
    async fn get_series(&self, fund_code: &str, window: usize) -> Result<NavSeries>;
}
