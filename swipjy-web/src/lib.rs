//! # Swipjy Web
//!
//! 路由、中间件链与请求派发，基于 Axum 提供传输层
//!
//! ## 核心特性
//!
//! - **路径匹配** - 字面量段、`:name`、`:name?` 与末尾通配符，注册时编译为正则
//! - **中间件链** - 续体只能调用一次，误用会被报告为错误
//! - **统一错误响应** - 错误在派发边界被捕获一次并转换为 JSON
//! - **视图渲染** - 处理器设置的视图在返回后由渲染管线渲染
//! - **请求校验** - 处理器之前检查路径参数、查询参数与请求体，失败返回 400
//! - **内置中间件** - CORS、请求 ID、请求日志、安全头、ETag、Bearer 鉴权

pub mod app;
pub mod constants;
pub mod context;
pub mod error;
pub mod matcher;
pub mod middleware;
pub mod router;
pub mod server;
pub mod token;
pub mod validate;

pub use app::{App, AppMode, AppProperties};
pub use context::{RequestContext, Response, ResponseBody};
pub use error::{ErrorResponse, HttpError, WebError, WebResult};
pub use matcher::{normalize_path, Params, PathPattern, PatternError};
pub use middleware::{compose, middleware_fn, Middleware, MiddlewareChain, Next, ScopedMiddleware};
pub use router::{handler_fn, Handler, RouteMatch, RouteTable};
pub use server::{ServerProperties, SwipjyServer};
pub use token::TokenStore;
pub use validate::{validated, Validated, Validation};

pub mod prelude {
    //! 预导入模块

    pub use crate::app::*;
    pub use crate::context::*;
    pub use crate::error::*;
    pub use crate::middleware::*;
    pub use crate::router::*;
    pub use crate::server::*;
    pub use crate::token::*;
    pub use crate::validate::*;

    pub use futures::future::BoxFuture;
    pub use http::{Method, StatusCode};
    pub use swipjy_view::ViewData;
}
