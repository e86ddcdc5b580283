//! Bearer 令牌鉴权中间件

use std::sync::Arc;

use async_trait::async_trait;

use super::{Middleware, Next};
use crate::context::RequestContext;
use crate::error::{HttpError, WebResult};
use crate::token::TokenStore;

/// 鉴权通过后写入请求扩展的主体信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject: String,
    pub token: String,
}

/// 要求 `Authorization: Bearer <token>` 且令牌由 [`TokenStore`] 签发，否则返回 401
pub struct BearerAuth {
    store: Arc<TokenStore>,
}

impl BearerAuth {
    pub fn new(store: Arc<TokenStore>) -> Self {
        Self { store }
    }
}

fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[async_trait]
impl Middleware for BearerAuth {
    fn name(&self) -> &str {
        "bearer-auth"
    }

    async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> WebResult<()> {
        let token = ctx.header("authorization").and_then(bearer_token).map(String::from);

        let Some(token) = token else {
            return Err(HttpError::unauthorized("Missing bearer token")
                .hint("Send an 'Authorization: Bearer <token>' header")
                .into());
        };

        let Some(subject) = self.store.subject(&token) else {
            tracing::warn!(path = ctx.path(), "Rejected unknown bearer token");
            return Err(HttpError::unauthorized("Invalid or expired token").into());
        };

        ctx.extensions_mut().insert(Principal { subject, token });
        next.run(ctx).await
    }
}
