//! Swipjy 基础设施：分层配置、日志初始化、应用启动与数据库驱动接口。

pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;

pub use app::SwipjyApplication;
pub use config::{
    ConfigValue, Environment, EnvironmentPropertySource, MapPropertySource, PropertySource,
    TomlPropertySource,
};
pub use db::{DatabaseDriver, DatabaseProperties, DriverRegistry, MemoryDriver, Query, QueryResult};
pub use error::{ApplicationError, ApplicationResult, Result};
pub use logging::{LogFormat, LogLevel, LoggingConfig};

pub mod prelude {
    pub use crate::app::SwipjyApplication;
    pub use crate::config::{
        ConfigValue, Environment, EnvironmentPropertySource, MapPropertySource, PropertySource,
        TomlPropertySource,
    };
    pub use crate::db::{DatabaseDriver, DatabaseProperties, DriverRegistry, Query, QueryResult};
    pub use crate::error::{ApplicationError, ApplicationResult, Result};
    pub use crate::logging::{LogFormat, LogLevel, LoggingConfig};
    pub use anyhow::{anyhow, Context};
}
