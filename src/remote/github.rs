//! GitHub contents API 作为共享文档
//!
//! 文件的 blob sha 就是版本号：PUT 时携带旧 sha，远端已被改写则返回 409。

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::{Client, ClientBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use super::{RemoteDocument, RemoteDocumentClient};
use crate::core::config::GithubStoreConfig;
use crate::core::error::MonitorError;
use crate::core::retry_policy::{ExponentialBackoffRetry, RetryConfig, RetryPolicy};
use crate::core::types::{Result, VersionToken};

const USER_AGENT: &str = "fundwatch";
const API_VERSION: &str = "2022-11-28";

#[derive(Debug, Deserialize)]
struct ContentResponse {
    sha: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Serialize)]
struct PutRequest<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    content: PutContent,
}

#[derive(Debug, Deserialize)]
struct PutContent {
    sha: String,
}

pub struct GithubDocumentClient {
    client: Client,
    config: GithubStoreConfig,
    token: String,
    contents_url: Url,
    read_retry: ExponentialBackoffRetry,
}

impl GithubDocumentClient {
    pub fn new(config: GithubStoreConfig, token: String, timeout: Duration) -> Result<Self> {
        let contents_url = Self::build_contents_url(&config)?;
        let client = ClientBuilder::new()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| MonitorError::ConfigError(format!("创建HTTP客户端失败: {}", e)))?;

        Ok(Self {
            client,
            config,
            token,
            contents_url,
            read_retry: ExponentialBackoffRetry::new(RetryConfig::for_transport(2)),
        })
    }

    /// 从环境变量读取访问令牌（支持 .env 文件）
    pub fn from_env(config: GithubStoreConfig, timeout: Duration) -> Result<Self> {
        dotenv::dotenv().ok();

        let token = std::env::var(&config.token_env).map_err(|_| {
            MonitorError::ConfigError(format!("未找到环境变量 {}", config.token_env))
        })?;
        Self::new(config, token, timeout)
    }

    fn build_contents_url(config: &GithubStoreConfig) -> Result<Url> {
        let mut url = Url::parse(&config.api_base)
            .map_err(|e| MonitorError::ConfigError(format!("非法的API地址 {}: {}", config.api_base, e)))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| MonitorError::ConfigError(format!("API地址不能作为基础路径: {}", config.api_base)))?;
            segments
                .pop_if_empty()
                .extend(["repos", config.owner.as_str(), config.repo.as_str(), "contents"])
                .extend(config.path.split('/').filter(|s| !s.is_empty()));
        }
        Ok(url)
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    async fn fetch_once(&self) -> Result<RemoteDocument> {
        let response = self
            .request(self.client.get(self.contents_url.clone()))
            .query(&[("ref", self.config.branch.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body, &self.describe()));
        }

        let payload: ContentResponse = response
            .json()
            .await
            .map_err(|e| MonitorError::Unavailable(format!("解析GitHub响应失败: {}", e)))?;
        let content = decode_content(&payload)?;

        Ok(RemoteDocument {
            content,
            version: VersionToken::new(payload.sha),
        })
    }

    async fn put(&self, content: &str, sha: Option<&str>) -> Result<VersionToken> {
        let body = PutRequest {
            message: &self.config.commit_message,
            content: BASE64.encode(content.as_bytes()),
            branch: &self.config.branch,
            sha,
        };

        let response = self
            .request(self.client.put(self.contents_url.clone()))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(
                status,
                &text,
                sha.unwrap_or("<absent>"),
            ));
        }

        let payload: PutResponse = response
            .json()
            .await
            .map_err(|e| MonitorError::Unavailable(format!("解析GitHub写入响应失败: {}", e)))?;
        Ok(VersionToken::new(payload.content.sha))
    }
}

/// GitHub 返回的内容是带换行的 base64
fn decode_content(payload: &ContentResponse) -> Result<String> {
    match payload.encoding.as_deref() {
        Some("base64") | None => {}
        Some(other) => {
            return Err(MonitorError::CorruptStore(format!(
                "不支持的内容编码: {}（文件可能超过1MB）",
                other
            )))
        }
    }

    let raw: String = payload
        .content
        .as_deref()
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let bytes = BASE64
        .decode(raw.as_bytes())
        .map_err(|e| MonitorError::CorruptStore(format!("base64解码失败: {}", e)))?;
    String::from_utf8(bytes)
        .map_err(|e| MonitorError::CorruptStore(format!("文档不是合法的UTF-8: {}", e)))
}

fn mentions_sha(body: &str) -> bool {
    let body = body.to_lowercase();
    body.contains("sha") || body.contains("does not match")
}

/// HTTP 状态码到错误分类的映射；`context` 为期望版本或文档位置
fn classify_status(status: StatusCode, body: &str, context: &str) -> MonitorError {
    match status {
        StatusCode::NOT_FOUND => MonitorError::NotFound(context.to_string()),
        StatusCode::CONFLICT => MonitorError::VersionConflict {
            expected: context.to_string(),
        },
        // 422 只有在提示 sha 不匹配或缺少 sha（创建时文件已存在）时才算冲突
        StatusCode::UNPROCESSABLE_ENTITY if mentions_sha(body) => MonitorError::VersionConflict {
            expected: context.to_string(),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            MonitorError::Unavailable(format!("GitHub认证失败或被限流: {} {}", status, body))
        }
        _ => MonitorError::Unavailable(format!("GitHub返回异常: {} {}", status, body)),
    }
}

#[async_trait]
impl RemoteDocumentClient for GithubDocumentClient {
    fn describe(&self) -> String {
        format!(
            "github://{}/{}/{}@{}",
            self.config.owner, self.config.repo, self.config.path, self.config.branch
        )
    }

    async fn fetch(&self) -> Result<RemoteDocument> {
        self.read_retry.execute_with_retry(|| self.fetch_once()).await
    }

    async fn update(&self, content: &str, expected: &VersionToken) -> Result<VersionToken> {
        self.put(content, Some(expected.as_str())).await
    }

    async fn create(&self, content: &str) -> Result<VersionToken> {
        self.put(content, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> GithubStoreConfig {
        GithubStoreConfig {
            api_base: "https://api.github.com".to_string(),
            owner: "someone".to_string(),
            repo: "fund-config".to_string(),
            path: "data/fund_strategies.json".to_string(),
            branch: "main".to_string(),
            token_env: "GITHUB_TOKEN".to_string(),
            commit_message: "update".to_string(),
        }
    }

    #[test]
    fn test_contents_url() {
        let url = GithubDocumentClient::build_contents_url(&sample_config()).unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.github.com/repos/someone/fund-config/contents/data/fund_strategies.json"
        );
    }

    #[test]
    fn test_decode_content_with_line_breaks() {
        let encoded = BASE64.encode("{\"161725\":{}}".as_bytes());
        let (a, b) = encoded.split_at(6);
        let payload = ContentResponse {
            sha: "abc".to_string(),
            content: Some(format!("{}\n{}\n", a, b)),
            encoding: Some("base64".to_string()),
        };
        assert_eq!(decode_content(&payload).unwrap(), "{\"161725\":{}}");

        let too_large = ContentResponse {
            sha: "abc".to_string(),
            content: Some(String::new()),
            encoding: Some("none".to_string()),
        };
        assert!(matches!(
            decode_content(&too_large),
            Err(MonitorError::CorruptStore(_))
        ));
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify_status(StatusCode::CONFLICT, "", "sha1"),
            MonitorError::VersionConflict { .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, "", "doc"),
            MonitorError::NotFound(_)
        ));
        assert!(matches!(
            classify_status(
                StatusCode::UNPROCESSABLE_ENTITY,
                r#"{"message":"Invalid request.\n\n\"sha\" wasn't supplied."}"#,
                "<absent>"
            ),
            MonitorError::VersionConflict { .. }
        ));
        assert!(matches!(
            classify_status(
                StatusCode::UNPROCESSABLE_ENTITY,
                r#"{"message":"data/x.json does not match 3f2a9c"}"#,
                "3f2a9c"
            ),
            MonitorError::VersionConflict { .. }
        ));
        // 分支或路径非法之类的校验错误不能当作冲突重试
        let invalid_branch = classify_status(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"message":"Branch not-a-branch not found"}"#,
            "sha1",
        );
        assert!(matches!(invalid_branch, MonitorError::Unavailable(_)));
        assert!(classify_status(StatusCode::BAD_GATEWAY, "", "doc").is_retryable());
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, "rate limit", "doc"),
            MonitorError::Unavailable(_)
        ));
    }
}
