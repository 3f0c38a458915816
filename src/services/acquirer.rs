//! 数据获取服务 - 业务能力层
//!
//! 只负责"把一个 DataReference 变成 Payload"，失败如何降级由流程层决定

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tracing::debug;

use crate::config::PayloadLimits;
use crate::error::AcquisitionError;
use crate::models::{DataReference, Payload, ReferenceKind};
use crate::services::decoder;

/// 数据来源能力
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn acquire(&self, reference: &DataReference) -> Result<Payload, AcquisitionError>;
}

/// 基于 HTTP 的数据获取服务
pub struct DataAcquirer {
    client: reqwest::Client,
    limits: PayloadLimits,
}

impl DataAcquirer {
    /// 创建新的数据获取服务
    pub fn new(limits: PayloadLimits, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client, limits }
    }

    async fn fetch(&self, reference: &DataReference) -> Result<Payload, AcquisitionError> {
        let locator = reference.locator.clone();
        let mut request = self.client.get(&locator);
        if reference.kind == ReferenceKind::Api {
            request = request.header(ACCEPT, "application/json");
        }

        let mut response = request.send().await.map_err(|source| {
            if source.is_timeout() {
                AcquisitionError::Timeout { locator: locator.clone() }
            } else {
                AcquisitionError::RequestFailed {
                    locator: locator.clone(),
                    source,
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AcquisitionError::BadStatus {
                locator,
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let (bytes, cut) = self.read_capped(&mut response, &locator).await?;

        debug!(
            "已下载 {} ({} 字节{}, {:?})",
            locator,
            bytes.len(),
            if cut { "，已截断" } else { "" },
            content_type
        );

        let mut payload = decoder::decode_body(reference.clone(), &bytes, content_type.as_deref(), &self.limits)
            .map_err(|reason| AcquisitionError::DecodeFailed { locator, reason })?;
        if cut {
            payload.meta.truncated = true;
        }
        Ok(payload)
    }

    /// 分块读取响应体，超过 `max_download_bytes` 后停止读取
    async fn read_capped(
        &self,
        response: &mut reqwest::Response,
        locator: &str,
    ) -> Result<(Vec<u8>, bool), AcquisitionError> {
        let cap = self.limits.max_download_bytes;
        let mut body = Vec::new();

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|source| AcquisitionError::RequestFailed {
                locator: locator.to_string(),
                source,
            })?
        {
            let room = cap.saturating_sub(body.len());
            if chunk.len() > room {
                body.extend_from_slice(&chunk[..room]);
                return Ok((body, true));
            }
            body.extend_from_slice(&chunk);
        }

        Ok((body, false))
    }
}

#[async_trait]
impl DataSource for DataAcquirer {
    async fn acquire(&self, reference: &DataReference) -> Result<Payload, AcquisitionError> {
        match reference.kind {
            ReferenceKind::Inline => Ok(decoder::decode_inline(
                reference.clone(),
                &reference.locator,
                &self.limits,
            )),
            ReferenceKind::Url | ReferenceKind::Api => self.fetch(reference).await,
        }
    }
}
