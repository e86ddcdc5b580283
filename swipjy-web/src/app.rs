//! 请求派发
//!
//! `App` 把路由表、中间件链和渲染管线组合在一起：
//!
//! 请求 -> 中间件链 -> 路由查找 -> 路由级中间件 -> 处理器 -> 渲染待定视图 -> 响应
//!
//! 处理器或中间件返回的错误（包括 panic）只在这里被捕获一次，转换为 JSON 错误响应。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use http::header::{ALLOW, CONTENT_TYPE};
use http::{Method, StatusCode};
use swipjy_core::Environment;
use swipjy_view::RenderPipeline;

use crate::constants::APP_MODE;
use crate::context::{RequestContext, Response, ResponseBody};
use crate::error::{ErrorResponse, WebError, WebResult};
use crate::matcher::PatternError;
use crate::middleware::{Middleware, MiddlewareChain, ScopedMiddleware};
use crate::router::{Handler, RouteTable};

/// 运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppMode {
    Development,
    #[default]
    Production,
}

impl AppMode {
    pub fn is_development(self) -> bool {
        self == AppMode::Development
    }
}

impl std::str::FromStr for AppMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(AppMode::Development),
            "production" | "prod" => Ok(AppMode::Production),
            _ => Err(format!("Invalid app mode: {}", s)),
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Default)]
pub struct AppProperties {
    /// 开发模式下错误响应包含 `trace`
    pub mode: AppMode,
}

impl AppProperties {
    pub fn from_environment(env: &Environment) -> Self {
        let mode = match env.get_string(APP_MODE) {
            Some(value) => value.parse().unwrap_or_else(|e: String| {
                tracing::warn!(error = %e, "Falling back to production mode");
                AppMode::Production
            }),
            None => AppMode::default(),
        };
        Self { mode }
    }
}

/// 应用：派发入口
pub struct App {
    routes: RouteTable,
    middleware: MiddlewareChain,
    pipeline: Arc<RenderPipeline>,
    properties: AppProperties,
}

impl App {
    pub fn new(pipeline: RenderPipeline) -> Self {
        Self::with_pipeline(Arc::new(pipeline))
    }

    pub fn with_pipeline(pipeline: Arc<RenderPipeline>) -> Self {
        Self {
            routes: RouteTable::new(),
            middleware: MiddlewareChain::new(),
            pipeline,
            properties: AppProperties::default(),
        }
    }

    /// 从 Environment 创建（视图配置与运行模式）
    pub fn from_environment(env: &Environment) -> Self {
        Self::new(RenderPipeline::from_environment(env)).with_properties(AppProperties::from_environment(env))
    }

    pub fn with_properties(mut self, properties: AppProperties) -> Self {
        self.properties = properties;
        self
    }

    pub fn properties(&self) -> &AppProperties {
        &self.properties
    }

    pub fn pipeline(&self) -> &Arc<RenderPipeline> {
        &self.pipeline
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn routes_mut(&mut self) -> &mut RouteTable {
        &mut self.routes
    }

    /// 追加中间件，按追加顺序执行
    pub fn use_middleware(&mut self, unit: impl Middleware + 'static) -> &mut Self {
        self.middleware.push(unit);
        self
    }

    /// 追加只对匹配路径生效的中间件
    pub fn use_scoped(
        &mut self,
        pattern: &str,
        unit: impl Middleware + 'static,
    ) -> Result<&mut Self, PatternError> {
        self.middleware.push(ScopedMiddleware::new(pattern, unit)?);
        Ok(self)
    }

    pub fn route(
        &mut self,
        method: Method,
        pattern: &str,
        handler: impl Handler + 'static,
    ) -> Result<&mut Self, PatternError> {
        self.routes.register(method, pattern, handler)?;
        Ok(self)
    }

    /// 注册带路由级中间件的路由；这些中间件短路时只影响本路由
    pub fn route_with(
        &mut self,
        method: Method,
        pattern: &str,
        units: Vec<Arc<dyn Middleware>>,
        handler: impl Handler + 'static,
    ) -> Result<&mut Self, PatternError> {
        self.routes.register_with(method, pattern, units, handler)?;
        Ok(self)
    }

    pub fn get(&mut self, pattern: &str, handler: impl Handler + 'static) -> Result<&mut Self, PatternError> {
        self.route(Method::GET, pattern, handler)
    }

    pub fn post(&mut self, pattern: &str, handler: impl Handler + 'static) -> Result<&mut Self, PatternError> {
        self.route(Method::POST, pattern, handler)
    }

    pub fn put(&mut self, pattern: &str, handler: impl Handler + 'static) -> Result<&mut Self, PatternError> {
        self.route(Method::PUT, pattern, handler)
    }

    pub fn patch(&mut self, pattern: &str, handler: impl Handler + 'static) -> Result<&mut Self, PatternError> {
        self.route(Method::PATCH, pattern, handler)
    }

    pub fn delete(&mut self, pattern: &str, handler: impl Handler + 'static) -> Result<&mut Self, PatternError> {
        self.route(Method::DELETE, pattern, handler)
    }

    pub fn head(&mut self, pattern: &str, handler: impl Handler + 'static) -> Result<&mut Self, PatternError> {
        self.route(Method::HEAD, pattern, handler)
    }

    pub fn options(&mut self, pattern: &str, handler: impl Handler + 'static) -> Result<&mut Self, PatternError> {
        self.route(Method::OPTIONS, pattern, handler)
    }

    /// 处理一个请求，总是产生响应
    pub async fn handle(&self, mut ctx: RequestContext) -> Response {
        let endpoint = RouteEndpoint {
            routes: &self.routes,
            pipeline: &self.pipeline,
        };

        let outcome = AssertUnwindSafe(self.middleware.run(&mut ctx, &endpoint))
            .catch_unwind()
            .await;

        let result = match outcome {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(path = ctx.path(), error = %message, "Handler panicked");
                Err(WebError::Internal(anyhow::anyhow!("Handler panicked: {}", message)))
            }
        };

        // 中间件短路时也可能留下待渲染的视图
        let result = match result {
            Ok(()) => render_pending(&self.pipeline, &mut ctx).await,
            Err(e) => Err(e),
        };

        if let Err(error) = result {
            self.write_error(&mut ctx, &error);
        }
        ctx.into_response()
    }

    /// 关闭：清空模板缓存
    pub fn shutdown(&self) {
        tracing::info!(templates = self.pipeline.cache().len(), "Shutting down, clearing template cache");
        self.pipeline.shutdown();
    }

    fn write_error(&self, ctx: &mut RequestContext, error: &WebError) {
        let status = error.status_code();
        if status.is_server_error() {
            tracing::error!(
                method = %ctx.method(),
                path = ctx.path(),
                code = error.code(),
                error = %error,
                "Request failed"
            );
        } else {
            tracing::debug!(
                method = %ctx.method(),
                path = ctx.path(),
                status = status.as_u16(),
                error = %error,
                "Request rejected"
            );
        }

        if let WebError::MethodNotAllowed { allowed, .. } = error {
            ctx.set_header(ALLOW.as_str(), &join_methods(allowed));
        }

        let mut body = ErrorResponse::from_error(error, ctx.path());
        if self.properties.mode.is_development() {
            body = body.with_trace(format!("{:?}", error));
        }

        ctx.response_headers_mut().remove(CONTENT_TYPE);
        ctx.set_status(status);
        if let Err(e) = ctx.json(&body) {
            tracing::error!(error = %e, "Failed to serialize error response");
            ctx.text(error.to_string());
        }
    }
}

/// 路由端点：中间件链的最后一步
struct RouteEndpoint<'a> {
    routes: &'a RouteTable,
    pipeline: &'a RenderPipeline,
}

#[async_trait]
impl<'a> Handler for RouteEndpoint<'a> {
    async fn call(&self, ctx: &mut RequestContext) -> WebResult<()> {
        let method = ctx.method().clone();

        let found = self.routes.resolve(&method, ctx.path()).or_else(|| {
            if method == Method::HEAD {
                self.routes.resolve(&Method::GET, ctx.path())
            } else {
                None
            }
        });

        let Some(found) = found else {
            let allowed = allowed_methods(self.routes, ctx.path());
            if allowed.is_empty() {
                return Err(WebError::RouteNotFound {
                    method,
                    path: ctx.path().to_string(),
                });
            }
            if method == Method::OPTIONS {
                ctx.set_header(ALLOW.as_str(), &join_methods(&allowed));
                ctx.set_status(StatusCode::NO_CONTENT).set_body(ResponseBody::Empty);
                return Ok(());
            }
            return Err(WebError::MethodNotAllowed {
                method,
                path: ctx.path().to_string(),
                allowed,
            });
        };

        tracing::trace!(method = %method, pattern = %found.pattern, "Route matched");
        ctx.set_params(found.params);
        found.middleware.run(ctx, found.handler.as_ref()).await?;
        render_pending(self.pipeline, ctx).await
    }
}

/// 路径注册过的方法，加上隐含的 HEAD（有 GET 时）与 OPTIONS
fn allowed_methods(routes: &RouteTable, path: &str) -> Vec<Method> {
    let mut allowed = routes.allowed_methods_for(path);
    if allowed.is_empty() {
        return allowed;
    }
    if allowed.contains(&Method::GET) && !allowed.contains(&Method::HEAD) {
        allowed.push(Method::HEAD);
    }
    if !allowed.contains(&Method::OPTIONS) {
        allowed.push(Method::OPTIONS);
    }
    allowed
}

fn join_methods(methods: &[Method]) -> String {
    methods.iter().map(Method::as_str).collect::<Vec<_>>().join(", ")
}

async fn render_pending(pipeline: &RenderPipeline, ctx: &mut RequestContext) -> WebResult<()> {
    match ctx.take_body() {
        ResponseBody::View { name, data } => {
            let markup = pipeline.render(&name, &data).await?;
            ctx.html(markup);
        }
        other => {
            ctx.set_body(other);
        }
    }
    Ok(())
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "Unknown panic occurred".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HttpError;
    use crate::middleware::{middleware_fn, BearerAuth, ETag};
    use crate::router::handler_fn;
    use crate::token::TokenStore;
    use swipjy_core::{ConfigValue, MapPropertySource};
    use swipjy_view::{ViewData, ViewProperties};
    use tempfile::TempDir;

    fn app(dir: &TempDir) -> App {
        App::new(RenderPipeline::new(ViewProperties::default().with_dir(dir.path())))
    }

    fn reply(text: &'static str) -> impl Handler {
        handler_fn(move |ctx| {
            Box::pin(async move {
                ctx.text(text);
                Ok(())
            })
        })
    }

    fn json_body(response: &Response) -> serde_json::Value {
        serde_json::from_slice(&response.body).unwrap()
    }

    fn body_text(response: &Response) -> String {
        String::from_utf8(response.body.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_route_with_params() {
        let dir = TempDir::new().unwrap();
        let mut app = app(&dir);
        app.get(
            "/users/:id",
            handler_fn(|ctx| {
                Box::pin(async move {
                    let id = ctx.param("id").unwrap_or_default().to_string();
                    ctx.json(&serde_json::json!({ "id": id }))?;
                    Ok(())
                })
            }),
        )
        .unwrap();

        let response = app.handle(RequestContext::new(Method::GET, "/users/42")).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(json_body(&response)["id"], "42");
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir);

        let response = app.handle(RequestContext::new(Method::GET, "/nowhere")).await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        let body = json_body(&response);
        assert_eq!(body["code"], "NOT_FOUND");
        assert_eq!(body["path"], "/nowhere");
        assert!(body.get("trace").is_none());
    }

    #[tokio::test]
    async fn test_wrong_method_is_405_with_allow() {
        let dir = TempDir::new().unwrap();
        let mut app = app(&dir);
        app.get("/x", reply("get")).unwrap().post("/x", reply("post")).unwrap();

        let response = app.handle(RequestContext::new(Method::DELETE, "/x")).await;
        assert_eq!(response.status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers.get(ALLOW).unwrap(), "GET, POST, HEAD, OPTIONS");
        assert_eq!(json_body(&response)["details"]["allowed"][1], "POST");
    }

    #[tokio::test]
    async fn test_options_is_answered_automatically() {
        let dir = TempDir::new().unwrap();
        let mut app = app(&dir);
        app.get("/x", reply("get")).unwrap().post("/x", reply("post")).unwrap();

        let response = app.handle(RequestContext::new(Method::OPTIONS, "/x")).await;
        assert_eq!(response.status, StatusCode::NO_CONTENT);
        assert_eq!(response.headers.get(ALLOW).unwrap(), "GET, POST, HEAD, OPTIONS");
        assert!(response.body.is_empty());
    }

    #[tokio::test]
    async fn test_head_uses_get_route() {
        let dir = TempDir::new().unwrap();
        let mut app = app(&dir);
        app.get("/x", reply("hello")).unwrap();

        let response = app.handle(RequestContext::new(Method::HEAD, "/x")).await;
        assert_eq!(response.status, StatusCode::OK);
        assert!(response.body.is_empty());
        assert_eq!(response.headers.get(CONTENT_TYPE).unwrap(), "text/plain; charset=utf-8");
    }

    #[tokio::test]
    async fn test_view_is_rendered() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("hello.jsx"),
            "export default function Hello({ name }) { return <h1>Hello {name}</h1>; }",
        )
        .unwrap();

        let mut app = app(&dir);
        app.get(
            "/hello/:name",
            handler_fn(|ctx| {
                Box::pin(async move {
                    let name = ctx.param("name").unwrap_or_default().to_string();
                    ctx.render("hello", ViewData::new().with("name", name));
                    Ok(())
                })
            }),
        )
        .unwrap();

        let response = app.handle(RequestContext::new(Method::GET, "/hello/Ada")).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(body_text(&response), "<!DOCTYPE html><h1>Hello Ada</h1>");
        assert_eq!(response.headers.get(CONTENT_TYPE).unwrap(), "text/html; charset=utf-8");
    }

    #[tokio::test]
    async fn test_missing_view_falls_back() {
        let dir = TempDir::new().unwrap();
        let mut app = app(&dir);
        app.get(
            "/about",
            handler_fn(|ctx| {
                Box::pin(async move {
                    ctx.render("about", ViewData::new());
                    Ok(())
                })
            }),
        )
        .unwrap();

        let response = app.handle(RequestContext::new(Method::GET, "/about")).await;
        assert_eq!(response.status, StatusCode::OK);
        assert!(body_text(&response).contains("<h1>about page</h1>"));
    }

    #[tokio::test]
    async fn test_render_error_without_fallback_is_500() {
        let dir = TempDir::new().unwrap();
        let mut properties = ViewProperties::default().with_dir(dir.path());
        properties.fallback = false;
        let mut app = App::new(RenderPipeline::new(properties));
        app.get(
            "/",
            handler_fn(|ctx| {
                Box::pin(async move {
                    ctx.render("home", ViewData::new());
                    Ok(())
                })
            }),
        )
        .unwrap();

        let response = app.handle(RequestContext::new(Method::GET, "/")).await;
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(&response);
        assert_eq!(body["code"], "RENDER_FAILED");
        assert_eq!(body["details"]["kind"], "TemplateNotFound");
    }

    #[tokio::test]
    async fn test_http_error_keeps_status_and_code() {
        let dir = TempDir::new().unwrap();
        let mut app = app(&dir);
        app.post(
            "/posts",
            handler_fn(|ctx| {
                Box::pin(async move {
                    ctx.set_header("X-Trace", "kept");
                    Err(HttpError::new(StatusCode::UNPROCESSABLE_ENTITY)
                        .message("Title is required")
                        .into())
                })
            }),
        )
        .unwrap();

        let response = app.handle(RequestContext::new(Method::POST, "/posts")).await;
        assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(response.headers.get("x-trace").unwrap(), "kept");
        let body = json_body(&response);
        assert_eq!(body["message"], "Title is required");
        assert_eq!(body["code"], "UNPROCESSABLE_ENTITY");
    }

    #[tokio::test]
    async fn test_panic_becomes_500() {
        let dir = TempDir::new().unwrap();
        let mut app = app(&dir).with_properties(AppProperties {
            mode: AppMode::Development,
        });
        app.get(
            "/boom",
            handler_fn(|ctx| {
                Box::pin(async move {
                    let value = ctx.query_param("missing").expect("kaboom").to_string();
                    ctx.text(value);
                    Ok(())
                })
            }),
        )
        .unwrap();

        let response = app.handle(RequestContext::new(Method::GET, "/boom")).await;
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(&response);
        assert_eq!(body["code"], "INTERNAL_ERROR");
        assert!(body["trace"].as_str().unwrap().contains("kaboom"));
    }

    #[tokio::test]
    async fn test_middleware_short_circuit_skips_route() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(TokenStore::new());
        let mut app = app(&dir);
        app.use_scoped("/admin/*", BearerAuth::new(Arc::clone(&store)))
            .unwrap()
            .get("/admin/panel", reply("secret"))
            .unwrap()
            .get("/public", reply("hello"))
            .unwrap();

        let denied = app.handle(RequestContext::new(Method::GET, "/admin/panel")).await;
        assert_eq!(denied.status, StatusCode::UNAUTHORIZED);

        let open = app.handle(RequestContext::new(Method::GET, "/public")).await;
        assert_eq!(body_text(&open), "hello");

        let token = store.issue("root");
        let allowed = app
            .handle(
                RequestContext::new(Method::GET, "/admin/panel")
                    .with_header("Authorization", &format!("Bearer {}", token)),
            )
            .await;
        assert_eq!(body_text(&allowed), "secret");
    }

    #[tokio::test]
    async fn test_route_middleware_short_circuits_only_its_route() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(TokenStore::new());
        let mut app = app(&dir);
        let auth: Arc<dyn Middleware> = Arc::new(BearerAuth::new(Arc::clone(&store)));
        let closed: Arc<dyn Middleware> = Arc::new(middleware_fn("closed", |ctx, _next| {
            Box::pin(async move {
                ctx.set_status(StatusCode::SERVICE_UNAVAILABLE).text("closed");
                Ok(())
            })
        }));
        app.use_middleware(middleware_fn("global", |ctx, next| {
            Box::pin(async move {
                next.run(ctx).await?;
                ctx.set_header("x-global", "1");
                Ok(())
            })
        }));
        app.route_with(Method::GET, "/reports", vec![auth], reply("report"))
            .unwrap()
            .route_with(Method::GET, "/maintenance", vec![closed], reply("never"))
            .unwrap()
            .get("/reports/summary", reply("summary"))
            .unwrap();

        let denied = app.handle(RequestContext::new(Method::GET, "/reports")).await;
        assert_eq!(denied.status, StatusCode::UNAUTHORIZED);

        let closed = app.handle(RequestContext::new(Method::GET, "/maintenance")).await;
        assert_eq!(closed.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_text(&closed), "closed");
        assert_eq!(closed.headers.get("x-global").unwrap(), "1");

        let open = app.handle(RequestContext::new(Method::GET, "/reports/summary")).await;
        assert_eq!(open.status, StatusCode::OK);
        assert_eq!(body_text(&open), "summary");

        let token = store.issue("analyst");
        let allowed = app
            .handle(
                RequestContext::new(Method::GET, "/reports")
                    .with_header("Authorization", &format!("Bearer {}", token)),
            )
            .await;
        assert_eq!(body_text(&allowed), "report");
    }

    #[tokio::test]
    async fn test_validation_failure_is_json_400() {
        let dir = TempDir::new().unwrap();
        let mut app = app(&dir);
        let check = crate::validate::Validation::new().body(|body: &serde_json::Value| {
            body["title"].as_str().map(|_| ()).ok_or("title is required")
        });
        app.post("/posts", check.wrap(reply("saved"))).unwrap();

        let rejected = app.handle(RequestContext::new(Method::POST, "/posts")).await;
        assert_eq!(rejected.status, StatusCode::BAD_REQUEST);
        let body = json_body(&rejected);
        assert_eq!(body["code"], "VALIDATION_ERROR");
        assert_eq!(body["details"]["body"], "title is required");

        let accepted = app
            .handle(RequestContext::new(Method::POST, "/posts").with_body(serde_json::json!({ "title": "x" })))
            .await;
        assert_eq!(body_text(&accepted), "saved");
    }

    #[tokio::test]
    async fn test_continuation_misuse_is_500() {
        let dir = TempDir::new().unwrap();
        let mut app = app(&dir);
        app.use_middleware(middleware_fn("twice", |ctx, next| {
            Box::pin(async move {
                next.run(ctx).await?;
                next.run(ctx).await
            })
        }));
        app.get("/", reply("once")).unwrap();

        let response = app.handle(RequestContext::new(Method::GET, "/")).await;
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(&response)["code"], "CONTINUATION_MISUSE");
    }

    #[tokio::test]
    async fn test_etag_sees_rendered_markup() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("page.jsx"), "export default () => <p>cached</p>;").unwrap();

        let mut app = app(&dir);
        app.use_middleware(ETag::new());
        app.get(
            "/",
            handler_fn(|ctx| {
                Box::pin(async move {
                    ctx.render("page", ViewData::new());
                    Ok(())
                })
            }),
        )
        .unwrap();

        let first = app.handle(RequestContext::new(Method::GET, "/")).await;
        let tag = first.headers.get("etag").unwrap().to_str().unwrap().to_string();
        assert_eq!(tag, crate::middleware::etag::strong_tag(b"<!DOCTYPE html><p>cached</p>"));

        let second = app
            .handle(RequestContext::new(Method::GET, "/").with_header("If-None-Match", &tag))
            .await;
        assert_eq!(second.status, StatusCode::NOT_MODIFIED);
        assert!(second.body.is_empty());
        assert_eq!(app.pipeline().cache().compilations(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_clears_cache() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("page.jsx"), "export default () => <p>x</p>;").unwrap();
        let app = app(&dir);
        app.pipeline().render("page", &ViewData::new()).await.unwrap();
        assert_eq!(app.pipeline().cache().len(), 1);

        app.shutdown();
        assert!(app.pipeline().cache().is_empty());
    }

    #[test]
    fn test_properties_from_environment() {
        let env = Environment::new().with_property_source(Box::new(
            MapPropertySource::new("test").with_property(APP_MODE, ConfigValue::String("development".into())),
        ));
        assert_eq!(AppProperties::from_environment(&env).mode, AppMode::Development);
        assert_eq!(AppProperties::from_environment(&Environment::new()).mode, AppMode::Production);
    }
}
