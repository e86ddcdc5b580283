//! 请求上下文
//!
//! 每个请求独占一个 `RequestContext`，中间件和处理器通过它读取请求、写入响应。

use std::collections::HashMap;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{Extensions, HeaderMap, Method, StatusCode};
use swipjy_view::ViewData;

use crate::matcher::Params;

/// 响应体
#[derive(Debug, Clone, Default)]
pub enum ResponseBody {
    #[default]
    Empty,
    Text(String),
    Html(String),
    Json(serde_json::Value),
    Bytes(Bytes),
    /// 待渲染的视图，由路由端点在处理器返回后渲染
    View { name: String, data: ViewData },
}

impl ResponseBody {
    pub fn is_empty(&self) -> bool {
        matches!(self, ResponseBody::Empty)
    }

    /// 文本或字节形式的响应体（视图未渲染时返回 `None`）
    pub fn as_bytes(&self) -> Option<Bytes> {
        match self {
            ResponseBody::Empty => Some(Bytes::new()),
            ResponseBody::Text(text) | ResponseBody::Html(text) => Some(Bytes::from(text.clone())),
            ResponseBody::Json(value) => serde_json::to_vec(value).ok().map(Bytes::from),
            ResponseBody::Bytes(bytes) => Some(bytes.clone()),
            ResponseBody::View { .. } => None,
        }
    }

    fn default_content_type(&self) -> Option<&'static str> {
        match self {
            ResponseBody::Text(_) => Some("text/plain; charset=utf-8"),
            ResponseBody::Html(_) => Some("text/html; charset=utf-8"),
            ResponseBody::Json(_) => Some("application/json; charset=utf-8"),
            ResponseBody::Bytes(_) => Some("application/octet-stream"),
            ResponseBody::Empty | ResponseBody::View { .. } => None,
        }
    }
}

/// 最终响应：交给传输层发送
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// 请求上下文
#[derive(Debug)]
pub struct RequestContext {
    method: Method,
    path: String,
    query: HashMap<String, String>,
    params: Params,
    headers: HeaderMap,
    body: Option<serde_json::Value>,
    request_id: Option<String>,
    status: StatusCode,
    response_headers: HeaderMap,
    response_body: ResponseBody,
    extensions: Extensions,
}

impl RequestContext {
    /// 由方法与请求目标（路径加可选查询串）创建
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, parse_query(query)),
            None => (target, HashMap::new()),
        };
        let path = if path.is_empty() { "/" } else { path };

        Self {
            method,
            path: path.to_string(),
            query,
            params: Params::new(),
            headers: HeaderMap::new(),
            body: None,
            request_id: None,
            status: StatusCode::OK,
            response_headers: HeaderMap::new(),
            response_body: ResponseBody::Empty,
            extensions: Extensions::new(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            self.headers.append(name, value);
        }
        self
    }

    /// 设置解析后的请求体（由传输层的请求体解析器填充）
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    // ---- 请求 ----

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &HashMap<String, String> {
        &self.query
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub(crate) fn set_params(&mut self, params: Params) {
        self.params = params;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// 读取请求头（非 UTF-8 值视为不存在）
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn body(&self) -> Option<&serde_json::Value> {
        self.body.as_ref()
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn set_request_id(&mut self, id: impl Into<String>) {
        self.request_id = Some(id.into());
    }

    /// 请求级扩展数据（中间件之间传递状态）
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    // ---- 响应 ----

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self
    }

    pub fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    pub fn response_headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.response_headers
    }

    pub fn response_header(&self, name: &str) -> Option<&str> {
        self.response_headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// 设置响应头，覆盖已有值；非法的名字或值会被忽略并记录日志
    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                self.response_headers.insert(name, value);
            }
            _ => tracing::warn!(header = name, "Ignoring invalid response header"),
        }
        self
    }

    /// 追加到逗号分隔的响应头（如 `Vary`），不覆盖已有值
    pub fn append_header(&mut self, name: &str, value: &str) -> &mut Self {
        let merged = match self.response_header(name) {
            Some(existing) if !existing.is_empty() => {
                let present = existing
                    .split(',')
                    .any(|item| item.trim().eq_ignore_ascii_case(value));
                if present {
                    return self;
                }
                format!("{}, {}", existing, value)
            }
            _ => value.to_string(),
        };
        self.set_header(name, &merged)
    }

    pub fn response_body(&self) -> &ResponseBody {
        &self.response_body
    }

    pub fn set_body(&mut self, body: ResponseBody) -> &mut Self {
        self.response_body = body;
        self
    }

    pub(crate) fn take_body(&mut self) -> ResponseBody {
        std::mem::take(&mut self.response_body)
    }

    pub fn text(&mut self, text: impl Into<String>) -> &mut Self {
        self.set_body(ResponseBody::Text(text.into()))
    }

    pub fn html(&mut self, html: impl Into<String>) -> &mut Self {
        self.set_body(ResponseBody::Html(html.into()))
    }

    /// JSON 响应；序列化失败时返回错误
    pub fn json<T: serde::Serialize + ?Sized>(&mut self, value: &T) -> Result<&mut Self, serde_json::Error> {
        let value = serde_json::to_value(value)?;
        Ok(self.set_body(ResponseBody::Json(value)))
    }

    pub fn bytes(&mut self, bytes: impl Into<Bytes>) -> &mut Self {
        self.set_body(ResponseBody::Bytes(bytes.into()))
    }

    /// 渲染视图
    pub fn render(&mut self, view: impl Into<String>, data: ViewData) -> &mut Self {
        self.set_body(ResponseBody::View {
            name: view.into(),
            data,
        })
    }

    /// 生成最终响应，缺少 `Content-Type` 时按响应体类型补齐
    ///
    /// 未渲染的视图在这里按空响应处理，调用方应先完成渲染
    pub fn into_response(self) -> Response {
        let mut headers = self.response_headers;
        if !headers.contains_key(CONTENT_TYPE) {
            if let Some(content_type) = self.response_body.default_content_type() {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
            }
        }

        let body = self.response_body.as_bytes().unwrap_or_default();
        let body = if self.method == Method::HEAD { Bytes::new() } else { body };

        Response {
            status: self.status,
            headers,
            body,
        }
    }
}

fn parse_query(query: &str) -> HashMap<String, String> {
    serde_urlencoded::from_str::<Vec<(String, String)>>(query)
        .map(|pairs| pairs.into_iter().collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_target_is_split_into_path_and_query() {
        let ctx = RequestContext::new(Method::GET, "/search?q=rust+lang&page=2");
        assert_eq!(ctx.path(), "/search");
        assert_eq!(ctx.query_param("q"), Some("rust lang"));
        assert_eq!(ctx.query_param("page"), Some("2"));
    }

    #[test]
    fn test_append_header_does_not_clobber() {
        let mut ctx = RequestContext::new(Method::GET, "/");
        ctx.set_header("Vary", "Accept-Encoding");
        ctx.append_header("Vary", "Origin");
        ctx.append_header("Vary", "origin");
        assert_eq!(ctx.response_header("vary"), Some("Accept-Encoding, Origin"));
    }

    #[test]
    fn test_content_type_defaults() {
        let mut ctx = RequestContext::new(Method::GET, "/");
        ctx.json(&json!({"ok": true})).unwrap();
        let response = ctx.into_response();
        assert_eq!(
            response.headers.get(CONTENT_TYPE).unwrap(),
            "application/json; charset=utf-8"
        );
        assert_eq!(&response.body[..], br#"{"ok":true}"#);

        let mut ctx = RequestContext::new(Method::GET, "/");
        ctx.set_header("Content-Type", "text/csv").text("a,b");
        let response = ctx.into_response();
        assert_eq!(response.headers.get(CONTENT_TYPE).unwrap(), "text/csv");
    }

    #[test]
    fn test_head_response_has_no_body() {
        let mut ctx = RequestContext::new(Method::HEAD, "/");
        ctx.html("<p>hi</p>");
        let response = ctx.into_response();
        assert!(response.body.is_empty());
        assert_eq!(response.headers.get(CONTENT_TYPE).unwrap(), "text/html; charset=utf-8");
    }
}
