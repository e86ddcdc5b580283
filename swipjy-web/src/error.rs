//! Web 层错误处理
//!
//! ## 错误分类
//!
//! 1. **路由层级** - 没有匹配的路由（404）或方法不允许（405）
//! 2. **中间件层级** - 中间件返回的错误或续体误用
//! 3. **处理器层级** - 显式状态码的 `HttpError`
//! 4. **渲染层级** - 关闭兜底时的视图错误
//! 5. **框架底层** - 其它内部错误（包括被捕获的 panic）

use http::{Method, StatusCode};
use serde::Serialize;
use serde_json::Value;
use swipjy_view::TemplateError;
use thiserror::Error;

/// 显式状态码的错误
///
/// # 示例
///
/// ```ignore
/// return Err(HttpError::new(StatusCode::UNPROCESSABLE_ENTITY)
///     .message("Title is required")
///     .details(json!({ "field": "title" }))
///     .hint("Send a non-empty title")
///     .into());
/// ```
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HttpError {
    status: StatusCode,
    message: String,
    code: String,
    details: Option<Value>,
    hints: Vec<String>,
}

impl HttpError {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            message: default_message(status).to_string(),
            code: default_code(status).to_string(),
            details: None,
            hints: Vec::new(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST).message(message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED).message(message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN).message(message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND).message(message)
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn hint(mut self, hint: impl Into<String>) -> Self {
        self.hints.push(hint.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn error_code(&self) -> &str {
        &self.code
    }
}

fn default_message(status: StatusCode) -> &'static str {
    match status.as_u16() {
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        415 => "Unsupported Media Type",
        422 => "Unprocessable Entity",
        429 => "Too Many Requests",
        s if s >= 500 => "Internal Server Error",
        _ => "Error",
    }
}

fn default_code(status: StatusCode) -> &'static str {
    match status.as_u16() {
        400 => "BAD_REQUEST",
        401 => "UNAUTHORIZED",
        403 => "FORBIDDEN",
        404 => "NOT_FOUND",
        405 => "METHOD_NOT_ALLOWED",
        413 => "PAYLOAD_TOO_LARGE",
        415 => "UNSUPPORTED_MEDIA_TYPE",
        422 => "UNPROCESSABLE_ENTITY",
        429 => "RATE_LIMITED",
        s if s >= 500 => "INTERNAL_ERROR",
        _ => "ERROR",
    }
}

/// Web 层错误类型
#[derive(Error, Debug)]
pub enum WebError {
    /// 没有匹配的路由 - 404 Not Found
    #[error("The route \"{method} {path}\" does not exist")]
    RouteNotFound { method: Method, path: String },

    /// 路径匹配但方法不允许 - 405 Method Not Allowed
    #[error("Method {method} is not allowed for \"{path}\"")]
    MethodNotAllowed {
        method: Method,
        path: String,
        allowed: Vec<Method>,
    },

    /// 续体在同一步骤中被调用多次 - 500
    #[error("Continuation invoked twice in middleware '{unit}' (step {step})")]
    ContinuationMisuse { unit: String, step: usize },

    /// 显式状态码错误
    #[error(transparent)]
    Http(#[from] HttpError),

    /// 视图渲染失败（仅在关闭兜底时出现）- 500
    #[error("Failed to render view: {0}")]
    Render(#[from] TemplateError),

    /// 内部服务器错误 - 500 Internal Server Error
    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type WebResult<T> = Result<T, WebError>;

impl From<serde_json::Error> for WebError {
    fn from(e: serde_json::Error) -> Self {
        WebError::Internal(e.into())
    }
}

impl WebError {
    /// 获取错误对应的 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebError::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            WebError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            WebError::ContinuationMisuse { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            WebError::Http(e) => e.status,
            WebError::Render(_) => StatusCode::INTERNAL_SERVER_ERROR,
            WebError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 机器可读的错误码
    pub fn code(&self) -> &str {
        match self {
            WebError::RouteNotFound { .. } => "NOT_FOUND",
            WebError::MethodNotAllowed { .. } => "METHOD_NOT_ALLOWED",
            WebError::ContinuationMisuse { .. } => "CONTINUATION_MISUSE",
            WebError::Http(e) => &e.code,
            WebError::Render(_) => "RENDER_FAILED",
            WebError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 获取错误详情（用于 JSON 响应）
    pub fn details(&self) -> Option<Value> {
        match self {
            WebError::Http(e) => e.details.clone(),
            WebError::MethodNotAllowed { allowed, .. } => Some(serde_json::json!({
                "allowed": allowed.iter().map(Method::as_str).collect::<Vec<_>>(),
            })),
            WebError::Render(e) => Some(serde_json::json!({ "kind": e.kind() })),
            _ => None,
        }
    }

    /// 修复建议
    pub fn hints(&self) -> Vec<String> {
        match self {
            WebError::RouteNotFound { .. } => vec![
                "Check if the route is registered on the app".to_string(),
                "Verify the HTTP method (GET, POST, etc.)".to_string(),
                "Check for typos in the URL path".to_string(),
            ],
            WebError::Http(e) => e.hints.clone(),
            WebError::Render(_) => vec![
                "Check the markup syntax in the view file".to_string(),
                "Verify the view exports a component function".to_string(),
            ],
            _ => Vec::new(),
        }
    }
}

/// 标准错误响应格式
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub timestamp: String,
    pub status: u16,
    pub code: String,
    pub error: String,
    pub message: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>, // 额外错误详情
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>, // 开发环境显示错误链
}

impl ErrorResponse {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            status: status.as_u16(),
            code: code.into(),
            error: status.canonical_reason().unwrap_or("Unknown Error").to_string(),
            message: message.into(),
            path: path.into(),
            details: None,
            hints: Vec::new(),
            trace: None,
        }
    }

    /// 由 `WebError` 构造
    pub fn from_error(error: &WebError, path: &str) -> Self {
        let mut response = Self::new(error.status_code(), error.code(), error.to_string(), path);
        response.details = error.details();
        response.hints = error.hints();
        response
    }

    pub fn with_trace(mut self, trace: String) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}
