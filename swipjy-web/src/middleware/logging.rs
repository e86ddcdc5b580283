//! 请求日志中间件

use std::time::Instant;

use async_trait::async_trait;

use super::{Middleware, Next};
use crate::context::RequestContext;
use crate::error::WebResult;

/// 每个请求完成后输出一行日志
///
/// 放在 [`RequestId`](super::RequestId) 之后才能带上请求 ID。
/// 下游返回错误时状态码取错误对应的状态码
#[derive(Debug, Clone, Default)]
pub struct RequestLogging;

impl RequestLogging {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Middleware for RequestLogging {
    fn name(&self) -> &str {
        "request-logging"
    }

    async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> WebResult<()> {
        let start = Instant::now();
        let result = next.run(ctx).await;
        let elapsed = start.elapsed();

        let status = match &result {
            Ok(()) => ctx.status(),
            Err(e) => e.status_code(),
        };

        tracing::info!(
            method = %ctx.method(),
            path = ctx.path(),
            status = status.as_u16(),
            elapsed = ?elapsed,
            request_id = ctx.request_id().unwrap_or("-"),
            "Request completed"
        );

        result
    }
}
