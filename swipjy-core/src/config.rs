//! 分层配置
//!
//! 配置键统一为点分形式（`server.port`、`views.dir`）。多个配置源按优先级从高到低查询，
//! 第一个给出值的源生效：环境变量(100) > 内存(50) > profile 文件(1..) > 主配置文件(0)。

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use parking_lot::RwLock;

use crate::error::{ApplicationError, ApplicationResult};

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Array(Vec<ConfigValue>),
    Object(HashMap<String, ConfigValue>),
}

impl ConfigValue {
    pub fn as_str(&self) -> Option<&str> {
        if let ConfigValue::String(s) = self {
            Some(s)
        } else {
            None
        }
    }

    /// 标量的字符串形式；数组与对象没有
    pub fn to_scalar_string(&self) -> Option<String> {
        match self {
            ConfigValue::String(s) => Some(s.clone()),
            ConfigValue::Int(i) => Some(i.to_string()),
            ConfigValue::Float(f) => Some(f.to_string()),
            ConfigValue::Bool(b) => Some(b.to_string()),
            ConfigValue::Array(_) | ConfigValue::Object(_) => None,
        }
    }

    /// 环境变量总是字符串，所以数字与布尔都接受字符串形式
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(i) => Some(*i),
            ConfigValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConfigValue::Float(f) => Some(*f),
            ConfigValue::Int(i) => Some(*i as f64),
            ConfigValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            ConfigValue::String(s) => {
                let s = s.trim();
                if ["true", "yes", "on", "1"].iter().any(|t| s.eq_ignore_ascii_case(t)) {
                    Some(true)
                } else if ["false", "no", "off", "0"].iter().any(|f| s.eq_ignore_ascii_case(f)) {
                    Some(false)
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

impl From<toml::Value> for ConfigValue {
    fn from(value: toml::Value) -> Self {
        match value {
            toml::Value::String(s) => ConfigValue::String(s),
            toml::Value::Integer(i) => ConfigValue::Int(i),
            toml::Value::Float(f) => ConfigValue::Float(f),
            toml::Value::Boolean(b) => ConfigValue::Bool(b),
            toml::Value::Datetime(dt) => ConfigValue::String(dt.to_string()),
            toml::Value::Array(items) => {
                ConfigValue::Array(items.into_iter().map(ConfigValue::from).collect())
            }
            toml::Value::Table(table) => ConfigValue::Object(
                table
                    .into_iter()
                    .map(|(k, v)| (k, ConfigValue::from(v)))
                    .collect(),
            ),
        }
    }
}

/// 一个可查询的配置源
pub trait PropertySource: Send + Sync {
    fn name(&self) -> &str;

    fn get(&self, key: &str) -> Option<ConfigValue>;

    fn keys(&self) -> Vec<String>;

    /// 越大越先被查询
    fn priority(&self) -> i32 {
        0
    }
}

fn missing(key: &str) -> ApplicationError {
    ApplicationError::ConfigLoadFailed(format!("Missing required config: {}", key))
}

/// 配置管理器
#[derive(Default)]
pub struct Environment {
    sources: RwLock<Vec<Box<dyn PropertySource>>>,
    profiles: RwLock<Vec<String>>,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .sources
            .read()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        f.debug_struct("Environment")
            .field("sources", &names)
            .field("profiles", &*self.profiles.read())
            .finish()
    }
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入到同优先级源的后面，先加入的同级源先被查询
    pub fn add_property_source(&self, source: Box<dyn PropertySource>) {
        let mut sources = self.sources.write();
        let priority = source.priority();
        let at = sources.partition_point(|existing| existing.priority() >= priority);
        tracing::debug!(source = %source.name(), priority, "Property source registered");
        sources.insert(at, source);
    }

    pub fn with_property_source(self, source: Box<dyn PropertySource>) -> Self {
        self.add_property_source(source);
        self
    }

    pub fn get(&self, key: &str) -> Option<ConfigValue> {
        let sources = self.sources.read();
        let found = sources
            .iter()
            .find_map(|source| source.get(key).map(|value| (source.name().to_string(), value)));
        match found {
            Some((source, value)) => {
                tracing::trace!(key, source = %source, "Config resolved");
                Some(value)
            }
            None => None,
        }
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key)?.to_scalar_string()
    }

    pub fn get_string_or(&self, key: &str, default: &str) -> String {
        self.get_string(key).unwrap_or_else(|| default.to_owned())
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key)?.as_i64()
    }

    pub fn get_i64_or(&self, key: &str, default: i64) -> i64 {
        self.get_i64(key).unwrap_or(default)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key)?.as_f64()
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key)?.as_bool()
    }

    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).unwrap_or(default)
    }

    /// TOML 数组或逗号分隔的字符串，空项被丢弃
    pub fn get_string_array(&self, key: &str) -> Option<Vec<String>> {
        let items = match self.get(key)? {
            ConfigValue::Array(items) => items
                .iter()
                .filter_map(ConfigValue::to_scalar_string)
                .collect(),
            ConfigValue::String(list) => list
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(String::from)
                .collect(),
            _ => return None,
        };
        Some(items)
    }

    pub fn require_string(&self, key: &str) -> ApplicationResult<String> {
        self.get_string(key)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| missing(key))
    }

    pub fn require_i64(&self, key: &str) -> ApplicationResult<i64> {
        self.get(key)
            .ok_or_else(|| missing(key))?
            .as_i64()
            .ok_or_else(|| ApplicationError::ConfigLoadFailed(format!("{} must be a number", key)))
    }

    pub fn set_active_profiles(&self, profiles: Vec<String>) {
        *self.profiles.write() = profiles;
    }

    pub fn get_active_profiles(&self) -> Vec<String> {
        self.profiles.read().clone()
    }

    pub fn accepts_profiles(&self, profile: &str) -> bool {
        self.profiles.read().iter().any(|active| active == profile)
    }
}

/// 进程环境变量，`SWIPJY_SERVER_STATIC_DIR` 对应 `server.static-dir`
pub struct EnvironmentPropertySource {
    prefix: String,
}

impl EnvironmentPropertySource {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn variable_for(&self, key: &str) -> String {
        let mut name = self.prefix.clone();
        name.extend(key.chars().map(|c| match c {
            '.' | '-' => '_',
            c => c.to_ascii_uppercase(),
        }));
        name
    }

    fn key_for(&self, variable: &str) -> Option<String> {
        variable
            .strip_prefix(self.prefix.as_str())
            .map(|rest| rest.to_ascii_lowercase().replace('_', "."))
    }
}

impl PropertySource for EnvironmentPropertySource {
    fn name(&self) -> &str {
        "environment"
    }

    fn get(&self, key: &str) -> Option<ConfigValue> {
        std::env::var(self.variable_for(key))
            .ok()
            .map(ConfigValue::String)
    }

    fn keys(&self) -> Vec<String> {
        std::env::vars()
            .filter_map(|(variable, _)| self.key_for(&variable))
            .collect()
    }

    fn priority(&self) -> i32 {
        100
    }
}

/// TOML 文档，嵌套表被展开为点分键
pub struct TomlPropertySource {
    name: String,
    properties: HashMap<String, ConfigValue>,
    priority: i32,
}

impl TomlPropertySource {
    pub fn from_file(path: impl AsRef<Path>) -> ApplicationResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ApplicationError::ConfigLoadFailed(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&content, path.display().to_string())
    }

    pub fn parse(content: &str, name: impl Into<String>) -> ApplicationResult<Self> {
        let name = name.into();
        let document: toml::Table = content.parse().map_err(|e| {
            ApplicationError::ConfigLoadFailed(format!("Invalid TOML in {}: {}", name, e))
        })?;

        // 只展开表；数组保持为 ConfigValue::Array
        let mut properties = HashMap::new();
        let mut pending: Vec<(String, toml::Value)> = document.into_iter().collect();
        while let Some((key, value)) = pending.pop() {
            match value {
                toml::Value::Table(table) => pending.extend(
                    table
                        .into_iter()
                        .map(|(child, value)| (format!("{}.{}", key, child), value)),
                ),
                scalar => {
                    properties.insert(key, ConfigValue::from(scalar));
                }
            }
        }

        Ok(Self {
            name,
            properties,
            priority: 0,
        })
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl PropertySource for TomlPropertySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> Option<ConfigValue> {
        self.properties.get(key).cloned()
    }

    fn keys(&self) -> Vec<String> {
        self.properties.keys().cloned().collect()
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}

/// 内存配置，测试与运行时覆盖用
pub struct MapPropertySource {
    name: String,
    properties: HashMap<String, ConfigValue>,
    priority: i32,
}

impl MapPropertySource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: HashMap::new(),
            priority: 50,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: ConfigValue) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl PropertySource for MapPropertySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> Option<ConfigValue> {
        self.properties.get(key).cloned()
    }

    fn keys(&self) -> Vec<String> {
        self.properties.keys().cloned().collect()
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, ConfigValue)]) -> Box<MapPropertySource> {
        let source = entries
            .iter()
            .fold(MapPropertySource::new("map"), |source, (key, value)| {
                source.with_property(*key, value.clone())
            });
        Box::new(source)
    }

    #[test]
    fn test_nested_tables_become_dotted_keys() {
        let source = TomlPropertySource::parse(
            r#"
            [server]
            port = 3000
            static-dir = "public"

            [views]
            hydration = false

            [cors]
            methods = ["GET", "POST"]
            "#,
            "inline",
        )
        .unwrap();

        assert_eq!(source.get("server.port"), Some(ConfigValue::Int(3000)));
        assert_eq!(
            source.get("server.static-dir"),
            Some(ConfigValue::String("public".to_string()))
        );
        assert_eq!(source.get("views.hydration"), Some(ConfigValue::Bool(false)));
        assert!(matches!(source.get("cors.methods"), Some(ConfigValue::Array(items)) if items.len() == 2));
        assert_eq!(source.keys().len(), 4);
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        let err = TomlPropertySource::parse("[server\nport = ", "broken.toml")
            .err()
            .unwrap();
        assert!(err.to_string().contains("broken.toml"));
    }

    #[test]
    fn test_higher_priority_wins() {
        let env = Environment::new()
            .with_property_source(Box::new(
                MapPropertySource::new("low")
                    .with_property("app.mode", ConfigValue::String("production".into()))
                    .with_priority(1),
            ))
            .with_property_source(Box::new(
                MapPropertySource::new("high")
                    .with_property("app.mode", ConfigValue::String("development".into()))
                    .with_priority(10),
            ));

        assert_eq!(env.get_string("app.mode").as_deref(), Some("development"));
    }

    #[test]
    fn test_equal_priority_keeps_insertion_order() {
        let env = Environment::new()
            .with_property_source(map(&[("db.url", ConfigValue::String("first".into()))]))
            .with_property_source(map(&[("db.url", ConfigValue::String("second".into()))]));

        assert_eq!(env.get_string("db.url").as_deref(), Some("first"));
    }

    #[test]
    fn test_typed_getters_accept_strings() {
        let env = Environment::new().with_property_source(map(&[
            ("server.port", ConfigValue::String(" 8080 ".into())),
            ("server.compression", ConfigValue::String("off".into())),
            ("views.hydration", ConfigValue::String("YES".into())),
        ]));

        assert_eq!(env.get_i64("server.port"), Some(8080));
        assert!(!env.get_bool_or("server.compression", true));
        assert!(env.get_bool_or("views.hydration", false));
        assert_eq!(env.get_string_or("server.host", "0.0.0.0"), "0.0.0.0");
    }

    #[test]
    fn test_string_array_from_comma_list() {
        let env = Environment::new().with_property_source(map(&[(
            "cors.methods",
            ConfigValue::String("GET, POST,,PUT".into()),
        )]));

        assert_eq!(
            env.get_string_array("cors.methods").unwrap(),
            vec!["GET", "POST", "PUT"]
        );
    }

    #[test]
    fn test_require_reports_missing_key() {
        let env = Environment::new();
        let err = env.require_string("db.url").unwrap_err();
        assert!(err.to_string().contains("db.url"));

        let env = Environment::new()
            .with_property_source(map(&[("server.port", ConfigValue::String("abc".into()))]));
        assert!(env.require_i64("server.port").is_err());
    }

    #[test]
    fn test_env_key_mapping() {
        let source = EnvironmentPropertySource::new("SWIPJY_");
        assert_eq!(source.variable_for("server.static-dir"), "SWIPJY_SERVER_STATIC_DIR");
        assert_eq!(source.key_for("SWIPJY_SERVER_PORT").as_deref(), Some("server.port"));
        assert_eq!(source.key_for("PATH"), None);
    }
}
