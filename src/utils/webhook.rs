//! Webhook通知模块
//! 把决策报告推送到企业微信群机器人

use async_trait::async_trait;
use chrono::FixedOffset;
use log::{info, warn};
use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::config::WeComConfig;
use crate::core::error::MonitorError;
use crate::core::types::Result;
use crate::strategies::report::{DecisionReport, Notifier};

/// 企业微信 markdown 内容上限（字节）
const MARKDOWN_LIMIT: usize = 4096;

/// 企业微信消息格式
#[derive(Debug, Serialize)]
struct WeChatWorkMessage {
    msgtype: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    markdown: Option<MarkdownContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<TextContent>,
}

#[derive(Debug, Serialize)]
struct MarkdownContent {
    content: String,
}

/// markdown 消息不支持 @手机号，提醒单独用 text 消息发送
#[derive(Debug, Serialize)]
struct TextContent {
    content: String,
    mentioned_list: Vec<String>,
    mentioned_mobile_list: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WeChatWorkResponse {
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

/// 企业微信群机器人通知器
pub struct WeComNotifier {
    config: WeComConfig,
    client: Client,
    offset: FixedOffset,
}

impl WeComNotifier {
    pub fn new(config: WeComConfig, timeout: Duration, offset: FixedOffset) -> Result<Self> {
        let client = ClientBuilder::new()
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()
            .map_err(|e| MonitorError::ConfigError(format!("创建HTTP客户端失败: {}", e)))?;
        Ok(Self {
            config,
            client,
            offset,
        })
    }

    fn has_mentions(&self) -> bool {
        !self.config.mentioned_list.is_empty() || !self.config.mentioned_mobile_list.is_empty()
    }

    /// 发送到企业微信，HTTP 200 但 errcode 非零同样视为失败
    async fn send_to_wechat_work(&self, message: &WeChatWorkMessage) -> Result<()> {
        let response = self
            .client
            .post(&self.config.webhook_url)
            .json(message)
            .send()
            .await
            .map_err(|e| MonitorError::NotificationError(format!("企业微信请求失败: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(MonitorError::NotificationError(format!(
                "企业微信返回异常: {} - {}",
                status, text
            )));
        }

        let body: WeChatWorkResponse = response
            .json()
            .await
            .map_err(|e| MonitorError::NotificationError(format!("解析企业微信响应失败: {}", e)))?;
        if body.errcode != 0 {
            return Err(MonitorError::NotificationError(format!(
                "企业微信拒绝消息: errcode={} errmsg={}",
                body.errcode, body.errmsg
            )));
        }

        Ok(())
    }
}

/// 按字节上限截断，保证不切断 UTF-8 字符
pub fn truncate_markdown(content: &str, limit: usize) -> String {
    if content.len() <= limit {
        return content.to_string();
    }

    const ELLIPSIS: &str = "\n...(内容过长已截断)";
    let budget = limit.saturating_sub(ELLIPSIS.len());
    let mut end = budget;
    while end > 0 && !content.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &content[..end], ELLIPSIS)
}

#[async_trait]
impl Notifier for WeComNotifier {
    fn name(&self) -> &str {
        "wecom"
    }

    async fn send(&self, report: &DecisionReport) -> Result<()> {
        let content = truncate_markdown(&report.render_markdown(self.offset), MARKDOWN_LIMIT);
        let message = WeChatWorkMessage {
            msgtype: "markdown".to_string(),
            markdown: Some(MarkdownContent { content }),
            text: None,
        };
        self.send_to_wechat_work(&message).await?;
        info!("✅ 决策报告已推送到企业微信: {}", report.title());

        // 报告本身已送达，提醒失败不影响结果
        if self.has_mentions() {
            let reminder = WeChatWorkMessage {
                msgtype: "text".to_string(),
                markdown: None,
                text: Some(TextContent {
                    content: format!(
                        "【{}】{}只基金触发，请查看上方报告",
                        report.title(),
                        report.fired.len()
                    ),
                    mentioned_list: self.config.mentioned_list.clone(),
                    mentioned_mobile_list: self.config.mentioned_mobile_list.clone(),
                }),
            };
            if let Err(e) = self.send_to_wechat_work(&reminder).await {
                warn!("⚠️ 企业微信提醒消息发送失败: {}", e);
            }
        }

        Ok(())
    }
}
