//! 应用启动器：加载配置、安装日志，产出共享的 `Environment`

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::config::{Environment, EnvironmentPropertySource, TomlPropertySource};
use crate::error::ApplicationResult;
use crate::logging::LoggingConfig;

const BANNER: &str = r"
  ____          _       _
 / ___|_      _(_)_ __ (_)_   _
 \___ \ \ /\ / / | '_ \| | | | |
  ___) \ V  V /| | |_) | | |_| |
 |____/ \_/\_/ |_| .__// |\__, |
                 |_| |__/ |___/
";

/// profile 文件的起始优先级，第 n 个 profile 为 `PROFILE_PRIORITY + n`
const PROFILE_PRIORITY: i32 = 10;

pub struct SwipjyApplication {
    name: String,
    config_files: Vec<PathBuf>,
    env_prefix: String,
    profiles: Vec<String>,
    show_banner: bool,
    /// 测试中通常关闭，全局 subscriber 只能安装一次
    init_logging: bool,
    logging: Option<LoggingConfig>,
}

impl SwipjyApplication {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config_files: vec![PathBuf::from("application.toml")],
            env_prefix: "SWIPJY_".to_owned(),
            profiles: Vec::new(),
            show_banner: true,
            init_logging: true,
            logging: None,
        }
    }

    /// 替换默认的 `application.toml`
    pub fn config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_files = vec![path.into()];
        self
    }

    pub fn env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// 显式设置后忽略 `{prefix}PROFILES_ACTIVE`
    pub fn profiles(mut self, profiles: Vec<String>) -> Self {
        self.profiles = profiles;
        self
    }

    pub fn banner(mut self, show: bool) -> Self {
        self.show_banner = show;
        self
    }

    pub fn init_logging(mut self, init: bool) -> Self {
        self.init_logging = init;
        self
    }

    /// 不设置时从 `logging.*` 与环境变量推导
    pub fn logging(mut self, config: LoggingConfig) -> Self {
        self.logging = Some(config);
        self
    }

    pub fn bootstrap(self) -> ApplicationResult<Arc<Environment>> {
        let started = Instant::now();
        let profiles = self.active_profiles();

        let environment = Environment::new();
        for (path, priority) in self.candidate_files(&profiles) {
            load_optional(&environment, &path, priority)?;
        }
        environment.add_property_source(Box::new(EnvironmentPropertySource::new(
            self.env_prefix.as_str(),
        )));
        environment.set_active_profiles(profiles.clone());

        if self.init_logging {
            self.logging
                .clone()
                .unwrap_or_else(|| LoggingConfig::from_environment(&environment))
                .init()?;
        }
        if self.show_banner {
            println!("{}", BANNER);
            println!("  :: Swipjy ::        (v{})\n", env!("CARGO_PKG_VERSION"));
        }

        tracing::info!(
            application = %self.name,
            profiles = ?profiles,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Application bootstrapped"
        );
        Ok(Arc::new(environment))
    }

    fn active_profiles(&self) -> Vec<String> {
        if !self.profiles.is_empty() {
            return self.profiles.clone();
        }
        let Ok(list) = std::env::var(format!("{}PROFILES_ACTIVE", self.env_prefix)) else {
            return Vec::new();
        };
        list.split(',')
            .map(str::trim)
            .filter(|profile| !profile.is_empty())
            .map(String::from)
            .collect()
    }

    /// 主配置文件在前（优先级 0），随后是每个 profile 的变体
    fn candidate_files(&self, profiles: &[String]) -> Vec<(PathBuf, i32)> {
        let mut files: Vec<(PathBuf, i32)> = self
            .config_files
            .iter()
            .map(|path| (path.clone(), 0))
            .collect();
        for (offset, profile) in profiles.iter().enumerate() {
            let priority = PROFILE_PRIORITY + offset as i32;
            files.extend(
                self.config_files
                    .iter()
                    .map(|path| (profile_variant(path, profile), priority)),
            );
        }
        files
    }
}

impl Default for SwipjyApplication {
    fn default() -> Self {
        Self::new("swipjy")
    }
}

/// 不存在的文件跳过，存在但无法解析的文件是启动错误
fn load_optional(environment: &Environment, path: &Path, priority: i32) -> ApplicationResult<()> {
    if !path.is_file() {
        tracing::debug!(path = %path.display(), "Configuration file absent, skipping");
        return Ok(());
    }
    let source = TomlPropertySource::from_file(path)?.with_priority(priority);
    tracing::debug!(path = %path.display(), priority, "Configuration file loaded");
    environment.add_property_source(Box::new(source));
    Ok(())
}

/// `config/application.toml` + `dev` -> `config/application-dev.toml`
fn profile_variant(path: &Path, profile: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = match path.extension() {
        Some(ext) => format!("{}-{}.{}", stem, profile, ext.to_string_lossy()),
        None => format!("{}-{}", stem, profile),
    };
    path.with_file_name(file_name)
}
