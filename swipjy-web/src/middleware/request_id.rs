//! 请求 ID 中间件

use async_trait::async_trait;

use super::{Middleware, Next};
use crate::constants::REQUEST_ID_HEADER;
use crate::context::RequestContext;
use crate::error::WebResult;

/// 复用请求中的 `x-request-id`，没有时生成 UUID v4；写入上下文并回显到响应
#[derive(Debug, Clone, Default)]
pub struct RequestId;

impl RequestId {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Middleware for RequestId {
    fn name(&self) -> &str {
        "request-id"
    }

    async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> WebResult<()> {
        let request_id = ctx
            .header(REQUEST_ID_HEADER)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(String::from)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        ctx.set_request_id(request_id.as_str());
        ctx.set_header(REQUEST_ID_HEADER, &request_id);

        next.run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::MiddlewareChain;
    use crate::router::handler_fn;
    use http::Method;

    async fn run(ctx: &mut RequestContext) {
        let mut chain = MiddlewareChain::new();
        chain.push(RequestId::new());
        let endpoint = handler_fn(|ctx| {
            Box::pin(async move {
                let id = ctx.request_id().unwrap_or_default().to_string();
                ctx.text(id);
                Ok(())
            })
        });
        chain.run(ctx, &endpoint).await.unwrap();
    }

    #[tokio::test]
    async fn test_generates_id() {
        let mut ctx = RequestContext::new(Method::GET, "/");
        run(&mut ctx).await;

        let id = ctx.request_id().unwrap().to_string();
        assert!(uuid::Uuid::parse_str(&id).is_ok());
        assert_eq!(ctx.response_header(REQUEST_ID_HEADER), Some(id.as_str()));
    }

    #[tokio::test]
    async fn test_reuses_incoming_id() {
        let mut ctx = RequestContext::new(Method::GET, "/").with_header("X-Request-ID", "abc-123");
        run(&mut ctx).await;

        assert_eq!(ctx.request_id(), Some("abc-123"));
        assert_eq!(ctx.response_header(REQUEST_ID_HEADER), Some("abc-123"));
    }
}
