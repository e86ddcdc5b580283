//! 框架启动层错误类型
//!
//! 配置加载、日志初始化和数据库驱动选择失败时使用 `ApplicationError`；
//! 胶水代码仍然可以直接使用 `anyhow::Result` 并通过 `.context()` 附加上下文。

pub use anyhow::Result;

/// 应用启动错误
#[derive(Debug, thiserror::Error)]
pub enum ApplicationError {
    #[error("Failed to load configuration: {0}")]
    ConfigLoadFailed(String),

    #[error("Failed to initialize logging: {0}")]
    LoggingInitFailed(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("{0}")]
    Other(String),
}

pub type ApplicationResult<T> = std::result::Result<T, ApplicationError>;
