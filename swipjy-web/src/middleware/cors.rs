//! CORS 中间件

use async_trait::async_trait;
use http::{Method, StatusCode};
use regex::Regex;
use swipjy_core::Environment;

use super::{Middleware, Next};
use crate::constants::{
    CORS_ALLOWED_HEADERS, CORS_CREDENTIALS, CORS_EXPOSE_HEADERS, CORS_MAX_AGE, CORS_METHODS,
    CORS_ORIGIN, CORS_PREFLIGHT_CONTINUE,
};
use crate::context::{RequestContext, ResponseBody};
use crate::error::WebResult;

/// 允许的来源
#[derive(Debug, Clone)]
pub enum CorsOrigin {
    /// 任意来源；开启凭证时回显请求来源
    Any,
    /// 固定来源，总是原样返回
    Exact(String),
    /// 请求来源在列表中时回显
    List(Vec<String>),
    /// 请求来源匹配正则时回显
    Regex(Regex),
}

impl CorsOrigin {
    /// 解析配置值：`*`、以 `^` 开头的正则、逗号分隔的列表或单个来源
    pub fn parse(value: &str) -> Result<Self, regex::Error> {
        let value = value.trim();
        if value.is_empty() || value == "*" {
            return Ok(CorsOrigin::Any);
        }
        if value.starts_with('^') {
            return Regex::new(value).map(CorsOrigin::Regex);
        }

        let list: Vec<String> = value
            .split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect();
        Ok(match <[String; 1]>::try_from(list) {
            Ok([single]) => CorsOrigin::Exact(single),
            Err(list) => CorsOrigin::List(list),
        })
    }
}

/// CORS 中间件
#[derive(Debug, Clone)]
pub struct Cors {
    origin: CorsOrigin,
    methods: Vec<String>,
    allowed_headers: Vec<String>,
    expose_headers: Vec<String>,
    credentials: bool,
    max_age: u64,
    preflight_continue: bool,
}

impl Default for Cors {
    fn default() -> Self {
        Self {
            origin: CorsOrigin::Any,
            methods: ["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"]
                .into_iter()
                .map(String::from)
                .collect(),
            allowed_headers: vec!["Content-Type".to_string(), "Authorization".to_string()],
            expose_headers: Vec::new(),
            credentials: false,
            max_age: 600,
            preflight_continue: false,
        }
    }
}

impl Cors {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 `cors.*` 配置读取，未配置的项使用默认值
    pub fn from_environment(env: &Environment) -> Self {
        let defaults = Self::default();

        let origin = match env.get_string(CORS_ORIGIN) {
            Some(value) => CorsOrigin::parse(&value).unwrap_or_else(|e| {
                tracing::warn!(value = %value, error = %e, "Invalid CORS origin pattern, allowing any origin");
                CorsOrigin::Any
            }),
            None => defaults.origin,
        };

        Self {
            origin,
            methods: env.get_string_array(CORS_METHODS).unwrap_or(defaults.methods),
            allowed_headers: env
                .get_string_array(CORS_ALLOWED_HEADERS)
                .unwrap_or(defaults.allowed_headers),
            expose_headers: env
                .get_string_array(CORS_EXPOSE_HEADERS)
                .unwrap_or(defaults.expose_headers),
            credentials: env.get_bool_or(CORS_CREDENTIALS, defaults.credentials),
            max_age: env
                .get_i64(CORS_MAX_AGE)
                .and_then(|age| u64::try_from(age).ok())
                .unwrap_or(defaults.max_age),
            preflight_continue: env.get_bool_or(CORS_PREFLIGHT_CONTINUE, defaults.preflight_continue),
        }
    }

    pub fn origin(mut self, origin: CorsOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub fn methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.methods = methods.into_iter().map(Into::into).collect();
        self
    }

    pub fn allowed_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_headers = headers.into_iter().map(Into::into).collect();
        self
    }

    pub fn expose_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expose_headers = headers.into_iter().map(Into::into).collect();
        self
    }

    pub fn credentials(mut self, credentials: bool) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn max_age(mut self, seconds: u64) -> Self {
        self.max_age = seconds;
        self
    }

    pub fn preflight_continue(mut self, preflight_continue: bool) -> Self {
        self.preflight_continue = preflight_continue;
        self
    }

    fn resolve_origin(&self, request_origin: Option<&str>) -> Option<String> {
        match &self.origin {
            CorsOrigin::Any if self.credentials => request_origin.map(String::from),
            CorsOrigin::Any => Some("*".to_string()),
            CorsOrigin::Exact(origin) => Some(origin.clone()),
            CorsOrigin::List(list) => request_origin
                .filter(|origin| list.iter().any(|allowed| allowed == origin))
                .map(String::from),
            CorsOrigin::Regex(regex) => request_origin
                .filter(|origin| regex.is_match(origin))
                .map(String::from),
        }
    }
}

#[async_trait]
impl Middleware for Cors {
    fn name(&self) -> &str {
        "cors"
    }

    async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> WebResult<()> {
        if let Some(origin) = self.resolve_origin(ctx.header("origin")) {
            ctx.set_header("Access-Control-Allow-Origin", &origin);
            if self.credentials {
                ctx.set_header("Access-Control-Allow-Credentials", "true");
            }
            if !self.expose_headers.is_empty() {
                ctx.set_header("Access-Control-Expose-Headers", &self.expose_headers.join(", "));
            }
            ctx.append_header("Vary", "Origin");
        }

        if ctx.method() != Method::OPTIONS {
            return next.run(ctx).await;
        }

        ctx.set_header("Access-Control-Allow-Methods", &self.methods.join(", "));
        if !self.allowed_headers.is_empty() {
            ctx.set_header("Access-Control-Allow-Headers", &self.allowed_headers.join(", "));
        }
        if self.max_age > 0 {
            ctx.set_header("Access-Control-Max-Age", &self.max_age.to_string());
        }

        if self.preflight_continue {
            return next.run(ctx).await;
        }

        ctx.set_status(StatusCode::NO_CONTENT).set_body(ResponseBody::Empty);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::MiddlewareChain;
    use crate::router::handler_fn;
    use swipjy_core::{ConfigValue, MapPropertySource};

    fn ok() -> impl crate::router::Handler {
        handler_fn(|ctx| {
            Box::pin(async move {
                ctx.text("ok");
                Ok(())
            })
        })
    }

    async fn run(cors: Cors, ctx: &mut RequestContext) {
        let mut chain = MiddlewareChain::new();
        chain.push(cors);
        chain.run(ctx, &ok()).await.unwrap();
    }

    #[tokio::test]
    async fn test_simple_request_gets_wildcard_origin() {
        let mut ctx = RequestContext::new(Method::GET, "/").with_header("Origin", "https://a.test");
        run(Cors::new(), &mut ctx).await;

        assert_eq!(ctx.response_header("access-control-allow-origin"), Some("*"));
        assert_eq!(ctx.response_header("vary"), Some("Origin"));
        assert!(ctx.response_header("access-control-allow-methods").is_none());
        assert!(matches!(ctx.response_body(), ResponseBody::Text(_)));
    }

    #[tokio::test]
    async fn test_preflight_short_circuits() {
        let mut ctx = RequestContext::new(Method::OPTIONS, "/api");
        run(Cors::new(), &mut ctx).await;

        assert_eq!(ctx.status(), StatusCode::NO_CONTENT);
        assert!(ctx.response_body().is_empty());
        assert_eq!(
            ctx.response_header("access-control-allow-methods"),
            Some("GET, POST, PUT, PATCH, DELETE, OPTIONS")
        );
        assert_eq!(
            ctx.response_header("access-control-allow-headers"),
            Some("Content-Type, Authorization")
        );
        assert_eq!(ctx.response_header("access-control-max-age"), Some("600"));
    }

    #[tokio::test]
    async fn test_preflight_continue() {
        let mut ctx = RequestContext::new(Method::OPTIONS, "/api");
        run(Cors::new().preflight_continue(true), &mut ctx).await;

        assert_eq!(ctx.status(), StatusCode::OK);
        assert!(matches!(ctx.response_body(), ResponseBody::Text(_)));
    }

    #[tokio::test]
    async fn test_credentials_reflect_origin() {
        let mut ctx = RequestContext::new(Method::GET, "/").with_header("Origin", "https://a.test");
        run(Cors::new().credentials(true), &mut ctx).await;

        assert_eq!(ctx.response_header("access-control-allow-origin"), Some("https://a.test"));
        assert_eq!(ctx.response_header("access-control-allow-credentials"), Some("true"));
    }

    #[tokio::test]
    async fn test_headers_are_kept_separate() {
        let cors = Cors::new()
            .allowed_headers(["X-Custom"])
            .expose_headers(["X-Total-Count"]);
        let mut ctx = RequestContext::new(Method::OPTIONS, "/");
        run(cors, &mut ctx).await;

        assert_eq!(ctx.response_header("access-control-allow-headers"), Some("X-Custom"));
        assert_eq!(ctx.response_header("access-control-expose-headers"), Some("X-Total-Count"));
    }

    #[tokio::test]
    async fn test_list_and_regex_origins() {
        let list = Cors::new().origin(CorsOrigin::parse("https://a.test, https://b.test").unwrap());
        let mut allowed = RequestContext::new(Method::GET, "/").with_header("Origin", "https://b.test");
        run(list.clone(), &mut allowed).await;
        assert_eq!(allowed.response_header("access-control-allow-origin"), Some("https://b.test"));

        let mut denied = RequestContext::new(Method::GET, "/").with_header("Origin", "https://c.test");
        run(list, &mut denied).await;
        assert!(denied.response_header("access-control-allow-origin").is_none());
        assert!(denied.response_header("vary").is_none());

        let regex = Cors::new().origin(CorsOrigin::parse(r"^https://.*\.example\.com$").unwrap());
        let mut ctx = RequestContext::new(Method::GET, "/").with_header("Origin", "https://app.example.com");
        run(regex, &mut ctx).await;
        assert_eq!(
            ctx.response_header("access-control-allow-origin"),
            Some("https://app.example.com")
        );
    }

    #[tokio::test]
    async fn test_vary_is_appended() {
        let mut ctx = RequestContext::new(Method::GET, "/");
        ctx.set_header("Vary", "Accept-Encoding");
        run(Cors::new(), &mut ctx).await;
        assert_eq!(ctx.response_header("vary"), Some("Accept-Encoding, Origin"));
    }

    #[test]
    fn test_origin_parsing() {
        assert!(matches!(CorsOrigin::parse("*"), Ok(CorsOrigin::Any)));
        assert!(matches!(CorsOrigin::parse("https://a.test"), Ok(CorsOrigin::Exact(_))));
        assert!(matches!(CorsOrigin::parse("a, b"), Ok(CorsOrigin::List(ref l)) if l.len() == 2));
        assert!(CorsOrigin::parse("^(unclosed").is_err());
    }

    #[test]
    fn test_from_environment() {
        let env = Environment::new().with_property_source(Box::new(
            MapPropertySource::new("test")
                .with_property(CORS_ORIGIN, ConfigValue::String("https://a.test".into()))
                .with_property(CORS_METHODS, ConfigValue::String("GET, POST".into()))
                .with_property(CORS_MAX_AGE, ConfigValue::Int(60))
                .with_property(CORS_CREDENTIALS, ConfigValue::Bool(true)),
        ));
        let cors = Cors::from_environment(&env);

        assert!(matches!(cors.origin, CorsOrigin::Exact(ref o) if o == "https://a.test"));
        assert_eq!(cors.methods, vec!["GET", "POST"]);
        assert_eq!(cors.max_age, 60);
        assert!(cors.credentials);
        assert_eq!(cors.allowed_headers, vec!["Content-Type", "Authorization"]);
    }
}
