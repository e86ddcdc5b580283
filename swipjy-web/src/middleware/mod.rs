//! 中间件链
//!
//! 每个中间件收到共享的上下文和一个续体 [`Next`]，调用续体进入下一个中间件，
//! 链的末尾是路由端点。不调用续体即短路。
//!
//! 续体状态按一次派发单独保存（见 [`Cursor`]），链对象本身在请求之间不变。
//! 每个步骤的状态只能 未开始 -> 进行中 -> 已完成 单向推进：
//! 同一步骤的续体被调用第二次，或在所属中间件结束后才调用，都会报告为
//! [`WebError::ContinuationMisuse`]。

pub mod auth;
pub mod cors;
pub mod etag;
pub mod logging;
pub mod request_id;
pub mod security_headers;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::context::RequestContext;
use crate::error::{WebError, WebResult};
use crate::matcher::{PathPattern, PatternError};
use crate::router::Handler;

pub use auth::{BearerAuth, Principal};
pub use cors::{Cors, CorsOrigin};
pub use etag::ETag;
pub use logging::RequestLogging;
pub use request_id::RequestId;
pub use security_headers::SecurityHeaders;

/// 中间件
#[async_trait]
pub trait Middleware: Send + Sync {
    /// 名称，用于日志与错误信息
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> WebResult<()>;
}

const NOT_STARTED: u8 = 0;
const IN_PROGRESS: u8 = 1;
const COMPLETED: u8 = 2;

/// 一次派发的续体状态
struct Cursor {
    steps: Vec<AtomicU8>,
    misuse: Mutex<Option<(String, usize)>>,
}

impl Cursor {
    fn new(len: usize) -> Self {
        Self {
            steps: (0..len).map(|_| AtomicU8::new(NOT_STARTED)).collect(),
            misuse: Mutex::new(None),
        }
    }

    fn state(&self, step: usize) -> u8 {
        self.steps[step].load(Ordering::SeqCst)
    }

    fn try_start(&self, step: usize) -> bool {
        self.steps[step]
            .compare_exchange(NOT_STARTED, IN_PROGRESS, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn finish(&self, step: usize) {
        self.steps[step].store(COMPLETED, Ordering::SeqCst);
    }

    fn report(&self, unit: &str, step: usize) -> WebError {
        let mut misuse = self.misuse.lock();
        if misuse.is_none() {
            *misuse = Some((unit.to_string(), step));
        }
        WebError::ContinuationMisuse {
            unit: unit.to_string(),
            step,
        }
    }

    fn take_misuse(&self) -> Option<WebError> {
        self.misuse
            .lock()
            .take()
            .map(|(unit, step)| WebError::ContinuationMisuse { unit, step })
    }
}

/// 续体：进入链中的下一步
#[derive(Clone, Copy)]
pub struct Next<'a> {
    units: &'a [Arc<dyn Middleware>],
    endpoint: &'a dyn Handler,
    cursor: &'a Cursor,
    /// 调用后进入的步骤（`units.len()` 表示端点）
    step: usize,
}

impl<'a> Next<'a> {
    /// 运行链的剩余部分
    pub async fn run(&self, ctx: &mut RequestContext) -> WebResult<()> {
        let owner = self.step - 1;
        let unit = self.units[owner].name();

        if self.cursor.state(owner) != IN_PROGRESS || !self.cursor.try_start(self.step) {
            tracing::error!(middleware = unit, step = self.step, "Continuation invoked twice");
            return Err(self.cursor.report(unit, self.step));
        }

        enter(self.units, self.endpoint, self.cursor, self.step, ctx).await
    }
}

fn enter<'a>(
    units: &'a [Arc<dyn Middleware>],
    endpoint: &'a dyn Handler,
    cursor: &'a Cursor,
    step: usize,
    ctx: &'a mut RequestContext,
) -> BoxFuture<'a, WebResult<()>> {
    Box::pin(async move {
        let result = match units.get(step) {
            Some(unit) => {
                let next = Next {
                    units,
                    endpoint,
                    cursor,
                    step: step + 1,
                };
                unit.handle(ctx, next).await
            }
            None => endpoint.call(ctx).await,
        };
        cursor.finish(step);
        result
    })
}

/// 中间件链
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    units: Vec<Arc<dyn Middleware>>,
}

/// 组合中间件
pub fn compose(units: Vec<Arc<dyn Middleware>>) -> MiddlewareChain {
    MiddlewareChain { units }
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, unit: impl Middleware + 'static) -> &mut Self {
        self.units.push(Arc::new(unit));
        self
    }

    pub fn push_arc(&mut self, unit: Arc<dyn Middleware>) -> &mut Self {
        self.units.push(unit);
        self
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// 依次运行中间件，最后进入端点
    ///
    /// 中间件返回的错误会停止推进并原样返回；被中间件吞掉的续体误用仍会被报告
    pub async fn run(&self, ctx: &mut RequestContext, endpoint: &dyn Handler) -> WebResult<()> {
        let cursor = Cursor::new(self.units.len() + 1);
        cursor.try_start(0);
        let result = enter(&self.units, endpoint, &cursor, 0, ctx).await;

        match cursor.take_misuse() {
            Some(misuse) => Err(misuse),
            None => result,
        }
    }
}

// ---- 闭包中间件 ----

/// 由闭包构成的中间件，见 [`middleware_fn`]
pub struct MiddlewareFn<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F> Middleware for MiddlewareFn<F>
where
    F: for<'a> Fn(&'a mut RequestContext, Next<'a>) -> BoxFuture<'a, WebResult<()>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> WebResult<()> {
        (self.f)(ctx, next).await
    }
}

/// 用闭包创建中间件
///
/// ```ignore
/// app.use_middleware(middleware_fn("timing", |ctx, next| Box::pin(async move {
///     let start = std::time::Instant::now();
///     next.run(ctx).await?;
///     ctx.set_header("x-elapsed-ms", &start.elapsed().as_millis().to_string());
///     Ok(())
/// })));
/// ```
pub fn middleware_fn<F>(name: impl Into<String>, f: F) -> MiddlewareFn<F>
where
    F: for<'a> Fn(&'a mut RequestContext, Next<'a>) -> BoxFuture<'a, WebResult<()>> + Send + Sync,
{
    MiddlewareFn {
        name: name.into(),
        f,
    }
}

// ---- 路径作用域 ----

/// 只在路径匹配时运行的中间件
///
/// 模式与路由使用同一套匹配规则；路径不匹配时直接进入下一步
pub struct ScopedMiddleware {
    pattern: PathPattern,
    inner: Arc<dyn Middleware>,
    name: String,
}

impl ScopedMiddleware {
    pub fn new(pattern: &str, inner: impl Middleware + 'static) -> Result<Self, PatternError> {
        let pattern = PathPattern::compile(pattern)?;
        let name = format!("{}@{}", inner.name(), pattern.pattern());
        Ok(Self {
            pattern,
            inner: Arc::new(inner),
            name,
        })
    }
}

#[async_trait]
impl Middleware for ScopedMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> WebResult<()> {
        if self.pattern.is_match(ctx.path()) {
            self.inner.handle(ctx, next).await
        } else {
            next.run(ctx).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HttpError;
    use crate::router::handler_fn;
    use http::{Method, StatusCode};

    type Log = Arc<Mutex<Vec<String>>>;

    /// 记录进入与退出的中间件
    struct Recorder {
        label: &'static str,
        log: Log,
        call_next: bool,
    }

    #[async_trait]
    impl Middleware for Recorder {
        fn name(&self) -> &str {
            self.label
        }

        async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> WebResult<()> {
            self.log.lock().push(format!("{}:in", self.label));
            if self.call_next {
                next.run(ctx).await?;
            }
            self.log.lock().push(format!("{}:out", self.label));
            Ok(())
        }
    }

    fn recorder(label: &'static str, log: &Log, call_next: bool) -> Recorder {
        Recorder {
            label,
            log: Arc::clone(log),
            call_next,
        }
    }

    fn endpoint(log: &Log) -> impl Handler {
        let log = Arc::clone(log);
        handler_fn(move |ctx| {
            let log = Arc::clone(&log);
            Box::pin(async move {
                log.lock().push("endpoint".to_string());
                ctx.text("done");
                Ok(())
            })
        })
    }

    fn ctx() -> RequestContext {
        RequestContext::new(Method::GET, "/")
    }

    #[tokio::test]
    async fn test_units_run_in_order() {
        let log = Log::default();
        let mut chain = MiddlewareChain::new();
        chain.push(recorder("a", &log, true)).push(recorder("b", &log, true));

        chain.run(&mut ctx(), &endpoint(&log)).await.unwrap();

        assert_eq!(*log.lock(), vec!["a:in", "b:in", "endpoint", "b:out", "a:out"]);
    }

    #[tokio::test]
    async fn test_short_circuit_skips_rest() {
        let log = Log::default();
        let chain = compose(vec![
            Arc::new(recorder("a", &log, true)),
            Arc::new(recorder("b", &log, false)),
            Arc::new(recorder("c", &log, true)),
        ]);

        chain.run(&mut ctx(), &endpoint(&log)).await.unwrap();

        assert_eq!(*log.lock(), vec!["a:in", "b:in", "b:out", "a:out"]);
    }

    #[tokio::test]
    async fn test_double_continuation_is_reported() {
        let log = Log::default();
        let mut chain = MiddlewareChain::new();
        chain
            .push(middleware_fn("twice", |ctx, next| {
                Box::pin(async move {
                    next.run(ctx).await?;
                    next.run(ctx).await
                })
            }))
            .push(recorder("b", &log, true));

        let err = chain.run(&mut ctx(), &endpoint(&log)).await.unwrap_err();

        assert!(matches!(err, WebError::ContinuationMisuse { ref unit, step: 1 } if unit == "twice"));
        assert_eq!(*log.lock(), vec!["b:in", "endpoint", "b:out"]);
    }

    #[tokio::test]
    async fn test_swallowed_misuse_is_still_reported() {
        let log = Log::default();
        let mut chain = MiddlewareChain::new();
        chain.push(middleware_fn("swallow", |ctx, next| {
            Box::pin(async move {
                next.run(ctx).await?;
                let _ = next.run(ctx).await;
                Ok(())
            })
        }));

        let err = chain.run(&mut ctx(), &endpoint(&log)).await.unwrap_err();
        assert_eq!(err.code(), "CONTINUATION_MISUSE");
        assert_eq!(*log.lock(), vec!["endpoint"]);
    }

    #[tokio::test]
    async fn test_error_stops_the_chain() {
        let log = Log::default();
        let mut chain = MiddlewareChain::new();
        chain
            .push(recorder("a", &log, true))
            .push(middleware_fn("reject", |_ctx, _next| {
                Box::pin(async move { Err(HttpError::new(StatusCode::TOO_MANY_REQUESTS).into()) })
            }))
            .push(recorder("c", &log, true));

        let err = chain.run(&mut ctx(), &endpoint(&log)).await.unwrap_err();

        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
        // a 的 `?` 直接返回，不记录 out
        assert_eq!(*log.lock(), vec!["a:in"]);
    }

    #[tokio::test]
    async fn test_chain_is_reusable() {
        let log = Log::default();
        let mut chain = MiddlewareChain::new();
        chain.push(recorder("a", &log, true));
        let endpoint = endpoint(&log);

        for _ in 0..3 {
            chain.run(&mut ctx(), &endpoint).await.unwrap();
        }
        assert_eq!(log.lock().iter().filter(|entry| *entry == "endpoint").count(), 3);
    }

    #[tokio::test]
    async fn test_scoped_middleware() {
        let log = Log::default();
        let mut chain = MiddlewareChain::new();
        chain.push(ScopedMiddleware::new("/admin/*", recorder("admin", &log, false)).unwrap());

        chain
            .run(&mut RequestContext::new(Method::GET, "/public"), &endpoint(&log))
            .await
            .unwrap();
        chain
            .run(&mut RequestContext::new(Method::GET, "/admin/users"), &endpoint(&log))
            .await
            .unwrap();

        assert_eq!(*log.lock(), vec!["endpoint", "admin:in", "admin:out"]);
    }
}
