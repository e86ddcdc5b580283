//! Web 服务器模块
//!
//! 基于 Axum 的传输层：把 HTTP 请求转换为 [`RequestContext`] 交给 [`App`]，
//! 再把 [`Response`] 写回连接。

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::handler::Handler as _;
use axum::response::IntoResponse;
use axum::Router;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{request::Parts, Method, StatusCode};
use serde::{Deserialize, Serialize};
use swipjy_core::{ApplicationError, ApplicationResult, Environment};
use tokio::net::TcpListener;
use tower_http::compression::CompressionLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::app::App;
use crate::constants::*;
use crate::context::{RequestContext, Response};
use crate::error::{ErrorResponse, HttpError, WebError};

/// Web 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerProperties {
    /// 服务器监听地址
    pub host: String,

    /// 服务器监听端口
    pub port: u16,

    /// 静态文件目录，存在的文件优先于路由
    pub static_dir: Option<PathBuf>,

    /// 请求体最大字节数
    pub max_body_size: usize,

    /// 是否启用响应压缩
    pub compression: bool,

    /// 是否启用 HTTP 追踪日志
    pub request_logging: bool,
}

impl Default for ServerProperties {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            static_dir: None,
            max_body_size: 1024 * 1024,
            compression: true,
            request_logging: true,
        }
    }
}

impl ServerProperties {
    /// 从 Environment 加载配置
    pub fn from_environment(env: &Environment) -> Self {
        let defaults = Self::default();
        Self {
            host: env.get_string(SERVER_HOST).unwrap_or(defaults.host),
            port: env
                .get_i64(SERVER_PORT)
                .and_then(|port| u16::try_from(port).ok())
                .unwrap_or(defaults.port),
            static_dir: env
                .get_string(SERVER_STATIC_DIR)
                .filter(|dir| !dir.is_empty())
                .map(PathBuf::from),
            max_body_size: env
                .get_i64(SERVER_MAX_BODY_SIZE)
                .and_then(|size| usize::try_from(size).ok())
                .unwrap_or(defaults.max_body_size),
            compression: env.get_bool_or(SERVER_COMPRESSION, defaults.compression),
            request_logging: env.get_bool_or(SERVER_REQUEST_LOGGING, defaults.request_logging),
        }
    }

    /// 获取服务器地址
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Clone)]
struct ServerState {
    app: Arc<App>,
    max_body_size: usize,
}

/// Swipjy Web 服务器
pub struct SwipjyServer {
    properties: ServerProperties,
    app: Arc<App>,
}

impl SwipjyServer {
    pub fn new(app: App, properties: ServerProperties) -> Self {
        Self {
            properties,
            app: Arc::new(app),
        }
    }

    pub fn from_environment(app: App, env: &Environment) -> Self {
        Self::new(app, ServerProperties::from_environment(env))
    }

    pub fn properties(&self) -> &ServerProperties {
        &self.properties
    }

    pub fn app(&self) -> &Arc<App> {
        &self.app
    }

    /// 构建 Axum 路由：所有请求进入同一个派发处理器
    pub fn router(&self) -> Router {
        let state = ServerState {
            app: Arc::clone(&self.app),
            max_body_size: self.properties.max_body_size,
        };

        let mut router = match &self.properties.static_dir {
            Some(dir) => {
                tracing::info!(dir = %dir.display(), "Serving static files");
                let serve_dir = ServeDir::new(dir).fallback(dispatch.with_state(state));
                Router::new().fallback_service(serve_dir)
            }
            None => Router::new().fallback(dispatch).with_state(state),
        };

        if self.properties.compression {
            router = router.layer(CompressionLayer::new());
        }
        if self.properties.request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }
        router
    }

    /// 绑定配置的地址并运行，直到收到 Ctrl-C
    pub async fn run(self) -> ApplicationResult<()> {
        let addr = self.properties.address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ApplicationError::Other(format!("Failed to bind to {}: {}", addr, e)))?;
        self.serve(listener, shutdown_signal()).await
    }

    /// 在给定的监听器上运行，`shutdown` 完成后优雅退出并关闭应用
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> ApplicationResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.router();
        let addr = listener
            .local_addr()
            .map_err(|e| ApplicationError::Other(format!("Failed to read local address: {}", e)))?;

        tracing::info!(address = %addr, "Server listening on http://{}", addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ApplicationError::Other(format!("Server error: {}", e)))?;

        self.app.shutdown();
        tracing::info!("Server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        return;
    }
    tracing::info!("Shutdown signal received");
}

async fn dispatch(State(state): State<ServerState>, request: Request) -> axum::response::Response {
    let (parts, body) = request.into_parts();

    let bytes = match axum::body::to_bytes(body, state.max_body_size).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(path = parts.uri.path(), error = %e, "Failed to read request body");
            let status = if exceeds_length_limit(&e) {
                StatusCode::PAYLOAD_TOO_LARGE
            } else {
                StatusCode::BAD_REQUEST
            };
            let error = WebError::from(HttpError::new(status));
            let body = ErrorResponse::from_error(&error, parts.uri.path());
            return (error.status_code(), axum::Json(body)).into_response();
        }
    };

    let ctx = into_context(parts, &bytes);
    into_axum_response(state.app.handle(ctx).await)
}

/// 只有超出 `max_body_size` 才是 413，连接中断等读取失败是 400
fn exceeds_length_limit(error: &axum::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(error);
    while let Some(current) = source {
        if current.is::<http_body_util::LengthLimitError>() {
            return true;
        }
        source = current.source();
    }
    false
}

fn into_context(parts: Parts, bytes: &Bytes) -> RequestContext {
    let target = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let body = parse_body(&parts.method, parts.headers.get(CONTENT_TYPE), bytes);

    let ctx = RequestContext::new(parts.method.clone(), target).with_headers(parts.headers);
    match body {
        Some(body) => ctx.with_body(body),
        None => ctx,
    }
}

/// 解析 POST/PUT/PATCH 的 JSON 或表单请求体，解析失败时为空对象
fn parse_body(
    method: &Method,
    content_type: Option<&http::HeaderValue>,
    bytes: &Bytes,
) -> Option<serde_json::Value> {
    if !matches!(*method, Method::POST | Method::PUT | Method::PATCH) {
        return None;
    }

    let content_type = content_type
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
        .unwrap_or_default();

    let empty = || serde_json::Value::Object(serde_json::Map::new());

    let parsed = match content_type.as_str() {
        _ if bytes.is_empty() => Ok(empty()),
        "application/json" => serde_json::from_slice(bytes).map_err(|e| e.to_string()),
        "application/x-www-form-urlencoded" => serde_urlencoded::from_bytes::<Vec<(String, String)>>(bytes)
            .map(|pairs| {
                serde_json::Value::Object(
                    pairs
                        .into_iter()
                        .map(|(key, value)| (key, serde_json::Value::String(value)))
                        .collect(),
                )
            })
            .map_err(|e| e.to_string()),
        _ => return None,
    };

    Some(parsed.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Malformed request body, using empty object");
        empty()
    }))
}

fn into_axum_response(response: Response) -> axum::response::Response {
    let mut out = axum::response::Response::new(Body::from(response.body));
    *out.status_mut() = response.status;
    *out.headers_mut() = response.headers;
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::handler_fn;
    use swipjy_view::{RenderPipeline, ViewProperties};
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn app(dir: &TempDir) -> App {
        let mut app = App::new(RenderPipeline::new(ViewProperties::default().with_dir(dir.path())));
        app.post(
            "/echo",
            handler_fn(|ctx| {
                Box::pin(async move {
                    let body = ctx.body().cloned().unwrap_or(serde_json::Value::Null);
                    ctx.json(&body)?;
                    Ok(())
                })
            }),
        )
        .unwrap()
        .get(
            "/search",
            handler_fn(|ctx| {
                Box::pin(async move {
                    let q = ctx.query_param("q").unwrap_or_default().to_string();
                    ctx.text(q);
                    Ok(())
                })
            }),
        )
        .unwrap();
        app
    }

    fn server(dir: &TempDir, properties: ServerProperties) -> SwipjyServer {
        SwipjyServer::new(app(dir), properties)
    }

    fn plain() -> ServerProperties {
        ServerProperties {
            compression: false,
            request_logging: false,
            ..ServerProperties::default()
        }
    }

    async fn send(router: Router, request: http::Request<Body>) -> (StatusCode, String) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    fn post(uri: &str, content_type: &str, body: &str) -> http::Request<Body> {
        http::Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(CONTENT_TYPE, content_type)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_json_body_is_parsed() {
        let dir = TempDir::new().unwrap();
        let router = server(&dir, plain()).router();
        let (status, body) = send(router, post("/echo", "application/json", r#"{"a":1}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"a":1}"#);
    }

    #[tokio::test]
    async fn test_form_body_is_parsed() {
        let dir = TempDir::new().unwrap();
        let router = server(&dir, plain()).router();
        let (_, body) = send(
            router,
            post("/echo", "application/x-www-form-urlencoded; charset=utf-8", "name=ann&x=1"),
        )
        .await;
        assert_eq!(body, r#"{"name":"ann","x":"1"}"#);
    }

    #[tokio::test]
    async fn test_malformed_body_becomes_empty_object() {
        let dir = TempDir::new().unwrap();
        let router = server(&dir, plain()).router();
        let (status, body) = send(router, post("/echo", "application/json", "{oops")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "{}");
    }

    #[tokio::test]
    async fn test_oversized_body_is_413() {
        let dir = TempDir::new().unwrap();
        let properties = ServerProperties {
            max_body_size: 4,
            ..plain()
        };
        let router = server(&dir, properties).router();
        let (status, body) = send(router, post("/echo", "application/json", r#"{"long":true}"#)).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(body.contains("PAYLOAD_TOO_LARGE"));
    }

    #[tokio::test]
    async fn test_broken_body_stream_is_400() {
        let dir = TempDir::new().unwrap();
        let router = server(&dir, plain()).router();
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"{\"a\"")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset")),
        ];
        let request = http::Request::builder()
            .method(Method::POST)
            .uri("/echo")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from_stream(futures::stream::iter(chunks)))
            .unwrap();

        let (status, body) = send(router, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("BAD_REQUEST"));
    }

    #[tokio::test]
    async fn test_query_reaches_handler() {
        let dir = TempDir::new().unwrap();
        let router = server(&dir, plain()).router();
        let request = http::Request::builder().uri("/search?q=rust").body(Body::empty()).unwrap();
        let (status, body) = send(router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "rust");
    }

    #[tokio::test]
    async fn test_static_files_take_precedence() {
        let views = TempDir::new().unwrap();
        let public = TempDir::new().unwrap();
        std::fs::write(public.path().join("robots.txt"), "User-agent: *").unwrap();

        let properties = ServerProperties {
            static_dir: Some(public.path().to_path_buf()),
            ..plain()
        };
        let server = server(&views, properties);

        let request = http::Request::builder().uri("/robots.txt").body(Body::empty()).unwrap();
        let (status, body) = send(server.router(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "User-agent: *");

        let request = http::Request::builder().uri("/search?q=x").body(Body::empty()).unwrap();
        let (_, body) = send(server.router(), request).await;
        assert_eq!(body, "x");
    }

    #[tokio::test]
    async fn test_serve_shuts_down_gracefully() {
        let dir = TempDir::new().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let server = server(&dir, plain());
        let handle = tokio::spawn(server.serve(listener, async move {
            let _ = rx.await;
        }));

        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[test]
    fn test_properties_from_environment() {
        use swipjy_core::{ConfigValue, MapPropertySource};

        let env = Environment::new().with_property_source(Box::new(
            MapPropertySource::new("test")
                .with_property(SERVER_PORT, ConfigValue::Int(8081))
                .with_property(SERVER_STATIC_DIR, ConfigValue::String("public".into()))
                .with_property(SERVER_COMPRESSION, ConfigValue::Bool(false)),
        ));
        let properties = ServerProperties::from_environment(&env);
        assert_eq!(properties.address(), "0.0.0.0:8081");
        assert_eq!(properties.static_dir, Some(PathBuf::from("public")));
        assert!(!properties.compression);
        assert!(properties.request_logging);
    }
}
