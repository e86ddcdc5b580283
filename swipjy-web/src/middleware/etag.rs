//! ETag 中间件
//!
//! 下游完成后根据响应体计算强 ETag；GET/HEAD 请求的 `If-None-Match`
//! 命中时改写为 304 并清空响应体。

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use http::{Method, StatusCode};
use sha2::{Digest, Sha256};

use super::{Middleware, Next};
use crate::context::{RequestContext, ResponseBody};
use crate::error::WebResult;

#[derive(Debug, Clone, Default)]
pub struct ETag;

impl ETag {
    pub fn new() -> Self {
        Self
    }
}

/// 计算强 ETag（带引号）
pub fn strong_tag(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    format!("\"{}\"", STANDARD_NO_PAD.encode(digest))
}

fn none_match(header: &str, tag: &str) -> bool {
    header.split(',').map(str::trim).any(|candidate| {
        candidate == "*" || candidate == tag || candidate.strip_prefix("W/") == Some(tag)
    })
}

#[async_trait]
impl Middleware for ETag {
    fn name(&self) -> &str {
        "etag"
    }

    async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> WebResult<()> {
        next.run(ctx).await?;

        if !ctx.status().is_success() || ctx.response_body().is_empty() {
            return Ok(());
        }
        let Some(body) = ctx.response_body().as_bytes() else {
            return Ok(());
        };

        let tag = strong_tag(&body);
        ctx.set_header("ETag", &tag);

        let cacheable = matches!(*ctx.method(), Method::GET | Method::HEAD);
        let hit = ctx
            .header("if-none-match")
            .is_some_and(|header| none_match(header, &tag));

        if cacheable && hit {
            tracing::debug!(path = ctx.path(), etag = %tag, "ETag matched, responding 304");
            ctx.set_status(StatusCode::NOT_MODIFIED).set_body(ResponseBody::Empty);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::MiddlewareChain;
    use crate::router::{handler_fn, Handler};

    fn page() -> impl Handler {
        handler_fn(|ctx| {
            Box::pin(async move {
                ctx.html("<p>hello</p>");
                Ok(())
            })
        })
    }

    async fn run(ctx: &mut RequestContext) {
        let mut chain = MiddlewareChain::new();
        chain.push(ETag::new());
        chain.run(ctx, &page()).await.unwrap();
    }

    #[tokio::test]
    async fn test_tag_is_set() {
        let mut ctx = RequestContext::new(Method::GET, "/");
        run(&mut ctx).await;

        let tag = ctx.response_header("etag").unwrap();
        assert_eq!(tag, strong_tag(b"<p>hello</p>"));
        assert!(tag.starts_with('"') && tag.ends_with('"'));
        assert_eq!(ctx.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_matching_tag_gives_304() {
        let tag = strong_tag(b"<p>hello</p>");
        let mut ctx = RequestContext::new(Method::GET, "/").with_header("If-None-Match", &tag);
        run(&mut ctx).await;

        assert_eq!(ctx.status(), StatusCode::NOT_MODIFIED);
        assert!(ctx.response_body().is_empty());
        assert_eq!(ctx.response_header("etag"), Some(tag.as_str()));
    }

    #[tokio::test]
    async fn test_post_is_not_revalidated() {
        let tag = strong_tag(b"<p>hello</p>");
        let mut ctx = RequestContext::new(Method::POST, "/").with_header("If-None-Match", &tag);
        run(&mut ctx).await;
        assert_eq!(ctx.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_stale_tag_keeps_body() {
        let mut ctx = RequestContext::new(Method::GET, "/").with_header("If-None-Match", "\"old\"");
        run(&mut ctx).await;
        assert_eq!(ctx.status(), StatusCode::OK);
        assert!(!ctx.response_body().is_empty());
    }

    #[test]
    fn test_none_match_lists() {
        assert!(none_match("\"a\", \"b\"", "\"b\""));
        assert!(none_match("W/\"b\"", "\"b\""));
        assert!(none_match("*", "\"b\""));
        assert!(!none_match("\"a\"", "\"b\""));
    }
}
