//! 日志初始化
//!
//! 优先级：`logging.*` 配置 > `LOG_LEVEL` / `LOG_FORMAT` / `RUST_LOG` 环境变量 > 默认值。
//! 显式的过滤指令（`logging.filter` 或 `RUST_LOG`）优先于单一级别。

use std::fmt;
use std::str::FromStr;

use tracing_subscriber::EnvFilter;

use crate::config::Environment;
use crate::error::{ApplicationError, ApplicationResult};

pub const LOGGING_LEVEL: &str = "logging.level";
pub const LOGGING_FORMAT: &str = "logging.format";
pub const LOGGING_FILTER: &str = "logging.filter";
pub const LOGGING_SHOW_TARGET: &str = "logging.show-target";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let level = match s.trim().to_ascii_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            other => return Err(format!("Unknown log level '{}'", other)),
        };
        Ok(level)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    /// 带时间、级别与目标的完整行
    Full,
    /// 每行一个 JSON 对象
    Json,
    /// 多行，适合本地开发
    Pretty,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            LogFormat::Compact => "compact",
            LogFormat::Full => "full",
            LogFormat::Json => "json",
            LogFormat::Pretty => "pretty",
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [LogFormat::Compact, LogFormat::Full, LogFormat::Json, LogFormat::Pretty]
            .into_iter()
            .find(|format| format.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown log format '{}'", s.trim()))
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 日志配置
#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    /// 是否输出模块路径
    pub show_target: bool,
    /// tracing 过滤指令，如 "swipjy_view=debug,tower_http=warn"
    pub filter: Option<String>,
}

impl LoggingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn show_target(mut self, show: bool) -> Self {
        self.show_target = show;
        self
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// 只读取进程环境变量
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|value| !value.is_empty());
        let defaults = Self::default();

        Self {
            level: var("LOG_LEVEL")
                .and_then(|value| value.parse().ok())
                .unwrap_or(defaults.level),
            format: var("LOG_FORMAT")
                .and_then(|value| value.parse().ok())
                .unwrap_or(defaults.format),
            filter: var("RUST_LOG"),
            ..defaults
        }
    }

    /// 在环境变量的基础上叠加 `logging.*` 配置
    pub fn from_environment(env: &Environment) -> Self {
        let base = Self::from_env();

        let level = parse_option(env, LOGGING_LEVEL).unwrap_or(base.level);
        let format = parse_option(env, LOGGING_FORMAT).unwrap_or(base.format);

        Self {
            level,
            format,
            show_target: env.get_bool_or(LOGGING_SHOW_TARGET, base.show_target),
            filter: env.get_string(LOGGING_FILTER).or(base.filter),
        }
    }

    fn build_filter(&self) -> EnvFilter {
        self.filter
            .as_deref()
            .and_then(|directive| EnvFilter::try_new(directive).ok())
            .unwrap_or_else(|| EnvFilter::new(self.level.as_str()))
    }

    /// 安装全局 subscriber；重复安装返回错误
    pub fn init(self) -> ApplicationResult<()> {
        let builder = tracing_subscriber::fmt()
            .with_env_filter(self.build_filter())
            .with_target(self.show_target);

        let installed = match self.format {
            LogFormat::Compact => builder.compact().try_init(),
            LogFormat::Full => builder.try_init(),
            LogFormat::Json => builder.json().try_init(),
            LogFormat::Pretty => builder.pretty().try_init(),
        };
        installed.map_err(|e| ApplicationError::LoggingInitFailed(e.to_string()))
    }
}

/// 读取并解析一个日志选项；无法解析时记录警告并忽略
fn parse_option<T: FromStr<Err = String>>(env: &Environment, key: &str) -> Option<T> {
    let raw = env.get_string(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Ignoring invalid logging option");
            None
        }
    }
}
