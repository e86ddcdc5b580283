//! 请求校验
//!
//! [`Validated`] 包住一个处理器，在调用前依次检查路径参数、查询参数与请求体。
//! 任一检查失败时不调用处理器，返回 400 `VALIDATION_ERROR`，
//! `details` 形如 `{"params": ..., "query": ..., "body": ...}`，通过的部分为 `null`。

use std::collections::HashMap;

use async_trait::async_trait;
use http::StatusCode;
use serde_json::{json, Map, Value};

use crate::context::RequestContext;
use crate::error::{HttpError, WebResult};
use crate::matcher::Params;
use crate::router::Handler;

pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";

type Check<T> = Box<dyn Fn(&T) -> Result<(), Value> + Send + Sync>;

/// 三个位置的检查函数；未设置的位置总是通过
#[derive(Default)]
pub struct Validation {
    params: Option<Check<Params>>,
    query: Option<Check<HashMap<String, String>>>,
    body: Option<Check<Value>>,
}

impl Validation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn params<F, E>(mut self, check: F) -> Self
    where
        F: Fn(&Params) -> Result<(), E> + Send + Sync + 'static,
        E: Into<Value>,
    {
        self.params = Some(Box::new(move |params| check(params).map_err(Into::into)));
        self
    }

    pub fn query<F, E>(mut self, check: F) -> Self
    where
        F: Fn(&HashMap<String, String>) -> Result<(), E> + Send + Sync + 'static,
        E: Into<Value>,
    {
        self.query = Some(Box::new(move |query| check(query).map_err(Into::into)));
        self
    }

    /// 没有请求体时按空对象检查
    pub fn body<F, E>(mut self, check: F) -> Self
    where
        F: Fn(&Value) -> Result<(), E> + Send + Sync + 'static,
        E: Into<Value>,
    {
        self.body = Some(Box::new(move |body| check(body).map_err(Into::into)));
        self
    }

    /// 运行所有检查；全部通过返回 `None`，否则返回错误详情
    pub fn check(&self, ctx: &RequestContext) -> Option<Value> {
        let params = run(&self.params, ctx.params());
        let query = run(&self.query, ctx.query());
        let empty = Value::Object(Map::new());
        let body = run(&self.body, ctx.body().unwrap_or(&empty));

        if params.is_none() && query.is_none() && body.is_none() {
            return None;
        }
        Some(json!({ "params": params, "query": query, "body": body }))
    }

    /// 包住处理器
    pub fn wrap<H: Handler + 'static>(self, handler: H) -> Validated<H> {
        Validated {
            validation: self,
            handler,
        }
    }
}

fn run<T>(check: &Option<Check<T>>, value: &T) -> Option<Value> {
    check.as_ref().and_then(|check| check(value).err())
}

/// 先校验再调用内部处理器
pub struct Validated<H> {
    validation: Validation,
    handler: H,
}

/// `validated(Validation::new().body(..), handler)`
pub fn validated<H: Handler + 'static>(validation: Validation, handler: H) -> Validated<H> {
    validation.wrap(handler)
}

#[async_trait]
impl<H: Handler> Handler for Validated<H> {
    async fn call(&self, ctx: &mut RequestContext) -> WebResult<()> {
        if let Some(details) = self.validation.check(ctx) {
            tracing::debug!(path = ctx.path(), details = %details, "Request failed validation");
            return Err(HttpError::new(StatusCode::BAD_REQUEST)
                .message("Invalid request")
                .code(VALIDATION_ERROR)
                .details(details)
                .into());
        }
        self.handler.call(ctx).await
    }
}
