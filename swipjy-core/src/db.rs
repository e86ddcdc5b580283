//! 数据库驱动能力接口
//!
//! 框架本身不实现任何网络数据库协议，只定义 `connect / query / disconnect`
//! 三个能力，由配置项 `db.driver` 在 [`DriverRegistry`] 中选择具体实现。
//! 内置 `memory` 文档驱动，便于开发与测试。

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Environment;
use crate::error::{ApplicationError, ApplicationResult};

/// 数据库配置
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct DatabaseProperties {
    /// 驱动名称（默认 "memory"）
    pub driver: String,
    /// 连接地址
    pub url: Option<String>,
    /// 数据库名称
    pub database: Option<String>,
}

impl DatabaseProperties {
    /// 从 Environment 加载配置
    pub fn from_environment(env: &Environment) -> Self {
        Self {
            driver: env.get_string_or("db.driver", "memory"),
            url: env.get_string("db.url"),
            database: env.get_string("db.database"),
        }
    }
}

/// 驱动无关的查询描述
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// 查找集合中与过滤条件所有字段相等的文档
    Find { collection: String, filter: Map<String, Value> },
    Insert { collection: String, document: Map<String, Value> },
    /// 将 `set` 中的字段合并到第一个匹配的文档
    Update {
        collection: String,
        filter: Map<String, Value>,
        set: Map<String, Value>,
    },
    Delete { collection: String, filter: Map<String, Value> },
    /// 交给底层驱动解释的原始语句（SQL 等）
    Raw { statement: String, params: Vec<Value> },
}

/// 查询结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub rows: Vec<Map<String, Value>>,
    pub affected: u64,
}

/// 数据库驱动能力
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    fn name(&self) -> &str;

    async fn connect(&self, props: &DatabaseProperties) -> ApplicationResult<()>;

    async fn query(&self, query: Query) -> ApplicationResult<QueryResult>;

    async fn disconnect(&self) -> ApplicationResult<()>;
}

type DriverFactory = Box<dyn Fn() -> Arc<dyn DatabaseDriver> + Send + Sync>;

/// 驱动注册表：名称 -> 工厂
pub struct DriverRegistry {
    factories: HashMap<String, DriverFactory>,
}

impl DriverRegistry {
    /// 创建包含内置驱动的注册表
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("memory", || Arc::new(MemoryDriver::new()) as Arc<dyn DatabaseDriver>);
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn DatabaseDriver> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    /// 按配置选择驱动并建立连接
    pub async fn connect(&self, props: &DatabaseProperties) -> ApplicationResult<Arc<dyn DatabaseDriver>> {
        let factory = self.factories.get(&props.driver).ok_or_else(|| {
            ApplicationError::Database(format!("Unsupported DB driver: {}", props.driver))
        })?;

        let driver = factory();
        driver.connect(props).await?;
        tracing::info!(driver = %props.driver, "Database connected");
        Ok(driver)
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// 内存文档驱动
#[derive(Default)]
pub struct MemoryDriver {
    connected: RwLock<bool>,
    collections: RwLock<HashMap<String, Vec<Map<String, Value>>>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_connected(&self) -> ApplicationResult<()> {
        if *self.connected.read() {
            Ok(())
        } else {
            Err(ApplicationError::Database("DB not connected".to_string()))
        }
    }
}

fn matches(document: &Map<String, Value>, filter: &Map<String, Value>) -> bool {
    filter.iter().all(|(k, v)| document.get(k) == Some(v))
}

#[async_trait]
impl DatabaseDriver for MemoryDriver {
    fn name(&self) -> &str {
        "memory"
    }

    async fn connect(&self, _props: &DatabaseProperties) -> ApplicationResult<()> {
        *self.connected.write() = true;
        Ok(())
    }

    async fn query(&self, query: Query) -> ApplicationResult<QueryResult> {
        self.ensure_connected()?;

        let mut collections = self.collections.write();
        let result = match query {
            Query::Find { collection, filter } => {
                let rows: Vec<_> = collections
                    .get(&collection)
                    .map(|docs| docs.iter().filter(|d| matches(d, &filter)).cloned().collect())
                    .unwrap_or_default();
                QueryResult {
                    affected: 0,
                    rows,
                }
            }
            Query::Insert { collection, document } => {
                collections.entry(collection).or_default().push(document);
                QueryResult {
                    rows: Vec::new(),
                    affected: 1,
                }
            }
            Query::Update { collection, filter, set } => {
                let target = collections
                    .get_mut(&collection)
                    .and_then(|docs| docs.iter_mut().find(|d| matches(d, &filter)));
                match target {
                    Some(doc) => {
                        doc.extend(set);
                        QueryResult {
                            rows: Vec::new(),
                            affected: 1,
                        }
                    }
                    None => QueryResult::default(),
                }
            }
            Query::Delete { collection, filter } => {
                let docs = collections.entry(collection).or_default();
                match docs.iter().position(|d| matches(d, &filter)) {
                    Some(index) => {
                        docs.remove(index);
                        QueryResult {
                            rows: Vec::new(),
                            affected: 1,
                        }
                    }
                    None => QueryResult::default(),
                }
            }
            Query::Raw { .. } => {
                return Err(ApplicationError::Database(
                    "Raw statements are not supported by the memory driver".to_string(),
                ))
            }
        };

        Ok(result)
    }

    async fn disconnect(&self) -> ApplicationResult<()> {
        *self.connected.write() = false;
        self.collections.write().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[tokio::test]
    async fn test_registry_selects_memory_driver() {
        let registry = DriverRegistry::new();
        let driver = registry.connect(&DatabaseProperties {
            driver: "memory".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
        assert_eq!(driver.name(), "memory");
    }

    #[tokio::test]
    async fn test_unknown_driver_is_rejected() {
        let registry = DriverRegistry::new();
        let err = registry
            .connect(&DatabaseProperties {
                driver: "oracle".to_string(),
                ..Default::default()
            })
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("oracle"));
    }

    #[tokio::test]
    async fn test_memory_crud() {
        let driver = MemoryDriver::new();
        driver.connect(&DatabaseProperties::default()).await.unwrap();

        driver
            .query(Query::Insert {
                collection: "users".into(),
                document: object(json!({"id": 1, "name": "Alice"})),
            })
            .await
            .unwrap();

        let updated = driver
            .query(Query::Update {
                collection: "users".into(),
                filter: object(json!({"id": 1})),
                set: object(json!({"name": "Alicia"})),
            })
            .await
            .unwrap();
        assert_eq!(updated.affected, 1);

        let found = driver
            .query(Query::Find {
                collection: "users".into(),
                filter: object(json!({"id": 1})),
            })
            .await
            .unwrap();
        assert_eq!(found.rows[0]["name"], json!("Alicia"));

        let deleted = driver
            .query(Query::Delete {
                collection: "users".into(),
                filter: object(json!({"id": 1})),
            })
            .await
            .unwrap();
        assert_eq!(deleted.affected, 1);
    }

    #[tokio::test]
    async fn test_query_requires_connection() {
        let driver = MemoryDriver::new();
        let result = driver
            .query(Query::Find {
                collection: "users".into(),
                filter: Map::new(),
            })
            .await;
        assert!(result.is_err());
    }
}
