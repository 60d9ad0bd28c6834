//! # 背景去除协作方
//!
//! ## 设计思路
//!
//! 背景去除本身不在流水线内计算，而是交给外部服务。这里只定义调用契约
//! `BackgroundRemover`，并提供一个走 HTTP 的默认实现。
//! 调用被视为“慢且可能失败”，流水线不强加超时，失败按普通阶段失败上报。
//!
//! ## 实现思路
//!
//! - 请求：`POST <endpoint>`，multipart 字段 `image`，可选 Bearer Token。
//! - 响应：`{"status":"success","image":"<base64>"}` 或 `{"status":"error","message":"…"}`。
//! - 响应体分块读取并限制总大小；解码后的图片尺寸由 `VariantManager` 按解码上限再检查。
//! - 日志中的地址去掉 query / fragment，避免泄露凭据。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use serde::Deserialize;

use super::{ImageConfig, ImageError};

/// 外部背景去除能力：输入原图字节，返回去除背景后的编码字节。
pub trait BackgroundRemover: Send + Sync {
    fn remove(&self, bytes: Bytes, media_type: String) -> impl Future<Output = Result<Bytes, ImageError>> + Send;
}

impl<T: BackgroundRemover> BackgroundRemover for Arc<T> {
    fn remove(&self, bytes: Bytes, media_type: String) -> impl Future<Output = Result<Bytes, ImageError>> + Send {
        (**self).remove(bytes, media_type)
    }
}

#[derive(Debug, Deserialize)]
struct RemoveBgResponse {
    status: String,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    warning: Option<String>,
}

/// 通过 HTTP 调用背景去除服务。
pub struct HttpBackgroundRemover {
    client: reqwest::Client,
    endpoint: String,
    auth_token: Option<String>,
    max_response_bytes: u64,
}

impl HttpBackgroundRemover {
    pub fn new(config: &ImageConfig) -> Result<Self, ImageError> {
        reqwest::Url::parse(&config.remove_bg_endpoint)
            .map_err(|e| ImageError::InvalidConfig(format!("背景去除服务地址无效：{}", e)))?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.remove_bg_connect_timeout))
            .build()
            .map_err(|e| ImageError::InvalidConfig(format!("无法创建 HTTP 客户端：{}", e)))?;

        Ok(Self {
            client,
            endpoint: config.remove_bg_endpoint.clone(),
            auth_token: config.remove_bg_auth_token.clone(),
            max_response_bytes: config.remove_bg_max_response_bytes,
        })
    }

    fn redact_url_for_log(url: &str) -> String {
        let Ok(parsed) = reqwest::Url::parse(url) else {
            return "<invalid-url>".to_string();
        };

        let host = parsed.host_str().unwrap_or("<unknown-host>");
        let port = parsed.port().map(|p| format!(":{}", p)).unwrap_or_default();
        format!("{}://{}{}{}", parsed.scheme(), host, port, parsed.path())
    }

    fn status_message(code: u16) -> &'static str {
        match code {
            400 => "请求无效",
            401 => "未登录或凭据失效",
            403 => "访问被拒绝",
            404 => "未找到",
            413 => "图片过大",
            500..=599 => "服务器错误",
            _ => "请求失败",
        }
    }

    fn file_name_for(media_type: &str) -> &'static str {
        match media_type {
            "image/png" => "image.png",
            "image/webp" => "image.webp",
            "image/gif" => "image.gif",
            _ => "image.jpg",
        }
    }

    fn response_too_large(size: u64, limit: u64) -> ImageError {
        ImageError::BackgroundRemovalFailed(format!(
            "响应过大：{:.2} MB（限制：{:.2} MB）",
            size as f64 / 1024.0 / 1024.0,
            limit as f64 / 1024.0 / 1024.0
        ))
    }

    /// 分块读取响应体，累计超过 `max_response_bytes` 立即中止。
    async fn read_body(&self, mut response: reqwest::Response) -> Result<Vec<u8>, ImageError> {
        let limit = self.max_response_bytes;
        if let Some(declared) = response.content_length() {
            if declared > limit {
                return Err(Self::response_too_large(declared, limit));
            }
        }

        let initial_capacity = response.content_length().unwrap_or(0).min(limit) as usize;
        let mut body = Vec::with_capacity(initial_capacity);
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ImageError::BackgroundRemovalFailed(format!("读取响应失败：{}", e)))?
        {
            let total = (body.len() + chunk.len()) as u64;
            if total > limit {
                return Err(Self::response_too_large(total, limit));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }

    fn decode_image_payload(payload: &str) -> Result<Bytes, ImageError> {
        let trimmed = payload.trim();
        let data = match trimmed.split_once(";base64,") {
            Some((prefix, data)) if prefix.starts_with("data:") => data,
            _ => trimmed,
        };

        let bytes = general_purpose::STANDARD
            .decode(data)
            .map_err(|e| ImageError::BackgroundRemovalFailed(format!("返回的图片不是合法 Base64：{}", e)))?;
        if bytes.is_empty() {
            return Err(ImageError::BackgroundRemovalFailed("返回的图片为空".to_string()));
        }
        Ok(Bytes::from(bytes))
    }
}

impl BackgroundRemover for HttpBackgroundRemover {
    async fn remove(&self, bytes: Bytes, media_type: String) -> Result<Bytes, ImageError> {
        let endpoint = Self::redact_url_for_log(&self.endpoint);
        log::info!("🪄 请求背景去除 - {} {}KB", endpoint, bytes.len() / 1024);

        let part = reqwest::multipart::Part::bytes(bytes.to_vec())
            .file_name(Self::file_name_for(&media_type))
            .mime_str(&media_type)
            .map_err(|e| ImageError::BackgroundRemovalFailed(format!("媒体类型无效：{}", e)))?;
        let form = reqwest::multipart::Form::new().part("image", part);

        let mut request = self.client.post(&self.endpoint).multipart(form);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            let message = e.to_string().replace(&self.endpoint, &endpoint);
            if e.is_connect() {
                ImageError::BackgroundRemovalFailed(format!("无法连接：{}", message))
            } else {
                ImageError::BackgroundRemovalFailed(format!("请求失败：{}", message))
            }
        })?;

        let status = response.status();
        let body = self.read_body(response).await?;

        let parsed: RemoveBgResponse = match serde_json::from_slice(&body) {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => {
                return Err(ImageError::BackgroundRemovalFailed(format!(
                    "HTTP {}: {}",
                    status.as_u16(),
                    Self::status_message(status.as_u16())
                )));
            }
            Err(e) => {
                return Err(ImageError::BackgroundRemovalFailed(format!("响应格式错误：{}", e)));
            }
        };

        if parsed.status != "success" {
            let message = parsed
                .message
                .unwrap_or_else(|| format!("HTTP {}: {}", status.as_u16(), Self::status_message(status.as_u16())));
            return Err(ImageError::BackgroundRemovalFailed(message));
        }

        if let Some(warning) = &parsed.warning {
            log::warn!("⚠️ 背景去除服务返回警告：{}", warning);
        }

        let image = parsed
            .image
            .ok_or_else(|| ImageError::BackgroundRemovalFailed("响应中缺少图片数据".to_string()))?;
        let result = Self::decode_image_payload(&image)?;

        log::info!("✅ 背景去除完成 - {}KB", result.len() / 1024);
        Ok(result)
    }
}
