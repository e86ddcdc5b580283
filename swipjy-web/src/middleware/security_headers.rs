//! 安全响应头中间件

use async_trait::async_trait;

use super::{Middleware, Next};
use crate::context::RequestContext;
use crate::error::WebResult;

const HEADERS: [(&str, &str); 6] = [
    ("X-Content-Type-Options", "nosniff"),
    ("X-Frame-Options", "SAMEORIGIN"),
    ("Referrer-Policy", "no-referrer-when-downgrade"),
    ("Cross-Origin-Opener-Policy", "same-origin"),
    ("Cross-Origin-Resource-Policy", "same-origin"),
    ("X-XSS-Protection", "0"),
];

/// 在进入下游之前写入一组固定的安全响应头，下游可以覆盖
#[derive(Debug, Clone, Default)]
pub struct SecurityHeaders;

impl SecurityHeaders {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Middleware for SecurityHeaders {
    fn name(&self) -> &str {
        "security-headers"
    }

    async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> WebResult<()> {
        for (name, value) in HEADERS {
            ctx.set_header(name, value);
        }
        next.run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::MiddlewareChain;
    use crate::router::handler_fn;
    use http::Method;

    #[tokio::test]
    async fn test_headers_are_set_and_overridable() {
        let mut chain = MiddlewareChain::new();
        chain.push(SecurityHeaders::new());
        let endpoint = handler_fn(|ctx| {
            Box::pin(async move {
                ctx.set_header("X-Frame-Options", "DENY");
                Ok(())
            })
        });

        let mut ctx = RequestContext::new(Method::GET, "/");
        chain.run(&mut ctx, &endpoint).await.unwrap();

        assert_eq!(ctx.response_header("x-content-type-options"), Some("nosniff"));
        assert_eq!(ctx.response_header("x-xss-protection"), Some("0"));
        assert_eq!(ctx.response_header("cross-origin-opener-policy"), Some("same-origin"));
        assert_eq!(ctx.response_header("x-frame-options"), Some("DENY"));
    }
}
