//! 路由表
//!
//! 按注册顺序保存 (方法, 模式, 路由级中间件, 处理器)。模式在注册时编译一次，之后只读。

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use http::Method;

use crate::context::RequestContext;
use crate::error::WebResult;
use crate::matcher::{Params, PathPattern, PatternError};
use crate::middleware::{compose, Middleware, MiddlewareChain};

/// 请求处理器
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, ctx: &mut RequestContext) -> WebResult<()>;
}

/// 由闭包构成的处理器，见 [`handler_fn`]
pub struct HandlerFn<F>(F);

#[async_trait]
impl<F> Handler for HandlerFn<F>
where
    F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, WebResult<()>> + Send + Sync,
{
    async fn call(&self, ctx: &mut RequestContext) -> WebResult<()> {
        (self.0)(ctx).await
    }
}

/// 用闭包创建处理器
///
/// ```ignore
/// app.get("/hello/:name", handler_fn(|ctx| Box::pin(async move {
///     let name = ctx.param("name").unwrap_or("world").to_string();
///     ctx.text(format!("Hello, {}!", name));
///     Ok(())
/// })))?;
/// ```
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, WebResult<()>> + Send + Sync,
{
    HandlerFn(f)
}

/// 路由
pub struct Route {
    method: Method,
    pattern: PathPattern,
    /// 只对这条路由生效，在全局中间件之后、处理器之前运行
    middleware: Arc<MiddlewareChain>,
    handler: Arc<dyn Handler>,
}

impl Route {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn pattern(&self) -> &str {
        self.pattern.pattern()
    }

    pub fn middleware(&self) -> &MiddlewareChain {
        &self.middleware
    }
}

/// 一次成功的路由查找
pub struct RouteMatch {
    pub middleware: Arc<MiddlewareChain>,
    pub handler: Arc<dyn Handler>,
    pub params: Params,
    pub pattern: String,
}

/// 路由表
#[derive(Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册路由；相同 (方法, 模式) 允许重复，先注册者优先
    pub fn register(
        &mut self,
        method: Method,
        pattern: &str,
        handler: impl Handler + 'static,
    ) -> Result<&mut Self, PatternError> {
        self.register_arc(method, pattern, Arc::new(handler))
    }

    pub fn register_arc(
        &mut self,
        method: Method,
        pattern: &str,
        handler: Arc<dyn Handler>,
    ) -> Result<&mut Self, PatternError> {
        self.insert(method, pattern, Vec::new(), handler)
    }

    /// 注册带路由级中间件的路由，中间件按给定顺序包住处理器
    pub fn register_with(
        &mut self,
        method: Method,
        pattern: &str,
        units: Vec<Arc<dyn Middleware>>,
        handler: impl Handler + 'static,
    ) -> Result<&mut Self, PatternError> {
        self.insert(method, pattern, units, Arc::new(handler))
    }

    fn insert(
        &mut self,
        method: Method,
        pattern: &str,
        units: Vec<Arc<dyn Middleware>>,
        handler: Arc<dyn Handler>,
    ) -> Result<&mut Self, PatternError> {
        let pattern = PathPattern::compile(pattern)?;
        tracing::debug!(
            method = %method,
            pattern = pattern.pattern(),
            middleware = units.len(),
            "Route registered"
        );
        self.routes.push(Route {
            method,
            pattern,
            middleware: Arc::new(compose(units)),
            handler,
        });
        Ok(self)
    }

    pub fn get(&mut self, pattern: &str, handler: impl Handler + 'static) -> Result<&mut Self, PatternError> {
        self.register(Method::GET, pattern, handler)
    }

    pub fn post(&mut self, pattern: &str, handler: impl Handler + 'static) -> Result<&mut Self, PatternError> {
        self.register(Method::POST, pattern, handler)
    }

    pub fn put(&mut self, pattern: &str, handler: impl Handler + 'static) -> Result<&mut Self, PatternError> {
        self.register(Method::PUT, pattern, handler)
    }

    pub fn patch(&mut self, pattern: &str, handler: impl Handler + 'static) -> Result<&mut Self, PatternError> {
        self.register(Method::PATCH, pattern, handler)
    }

    pub fn delete(&mut self, pattern: &str, handler: impl Handler + 'static) -> Result<&mut Self, PatternError> {
        self.register(Method::DELETE, pattern, handler)
    }

    pub fn head(&mut self, pattern: &str, handler: impl Handler + 'static) -> Result<&mut Self, PatternError> {
        self.register(Method::HEAD, pattern, handler)
    }

    pub fn options(&mut self, pattern: &str, handler: impl Handler + 'static) -> Result<&mut Self, PatternError> {
        self.register(Method::OPTIONS, pattern, handler)
    }

    /// 按注册顺序查找第一个方法相同且路径匹配的路由
    pub fn resolve(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        self.routes
            .iter()
            .filter(|route| route.method == *method)
            .find_map(|route| {
                route.pattern.matches(path).map(|params| RouteMatch {
                    middleware: Arc::clone(&route.middleware),
                    handler: Arc::clone(&route.handler),
                    params,
                    pattern: route.pattern.pattern().to_string(),
                })
            })
    }

    /// 路径匹配的所有方法（按注册顺序去重）
    pub fn allowed_methods_for(&self, path: &str) -> Vec<Method> {
        let mut methods: Vec<Method> = Vec::new();
        for route in &self.routes {
            if !methods.contains(&route.method) && route.pattern.is_match(path) {
                methods.push(route.method.clone());
            }
        }
        methods
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
