//! 视图数据与清洗
//!
//! 进入渲染函数前的数据会先经过清洗：UI 树节点替换为占位字符串，
//! 函数被丢弃，无法往返序列化的值替换为其字符串形式。

use serde::Serialize;

use crate::value::{Object, Value, NODE_PLACEHOLDER};

/// 嵌套深度上限，超过后整体转为字符串
const MAX_DEPTH: usize = 256;

/// 传给模板的数据记录
///
/// # 示例
///
/// ```
/// use swipjy_view::ViewData;
///
/// let data = ViewData::new()
///     .with("title", "Home")
///     .with("count", 3);
/// assert_eq!(data.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewData {
    entries: Object,
}

impl ViewData {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加一个变量
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries.insert(key.into(), value.into());
    }

    /// 添加一个可序列化的变量
    pub fn with_serialize<T: Serialize + ?Sized>(
        mut self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<Self, serde_json::Error> {
        self.entries.insert(key.into(), Value::from_serialize(value)?);
        Ok(self)
    }

    /// 从序列化为对象的值构造
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        match Value::from_serialize(value)? {
            Value::Object(map) => Ok(Self {
                entries: (*map).clone(),
            }),
            Value::Null => Ok(Self::new()),
            other => Err(<serde_json::Error as serde::ser::Error>::custom(format!(
                "view data must serialize to an object, got {}",
                other.type_of()
            ))),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    pub fn into_value(self) -> Value {
        Value::object(self.entries)
    }
}

impl From<Object> for ViewData {
    fn from(entries: Object) -> Self {
        Self { entries }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ViewData {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// 清洗视图数据，得到传给渲染函数的 props 对象
pub fn sanitize(data: &ViewData) -> Value {
    let mut props = Object::new();

    for (key, value) in data.iter() {
        let Some(clean) = sanitize_value(key, value, 0) else {
            continue;
        };
        let clean = if round_trips(&clean) {
            clean
        } else {
            tracing::warn!(prop = %key, "Prop is not serializable, converting to string");
            Value::from(clean.to_string())
        };
        props.insert(key.clone(), clean);
    }

    Value::object(props)
}

/// `None` 表示该值应从对象中移除
fn sanitize_value(path: &str, value: &Value, depth: usize) -> Option<Value> {
    if depth > MAX_DEPTH {
        tracing::warn!(prop = %path, "Prop is nested too deeply, converting to string");
        return Some(Value::from(value.to_string()));
    }

    match value {
        Value::Node(_) => {
            tracing::warn!(prop = %path, "Prop contains a UI tree node, converting to placeholder");
            Some(Value::from(NODE_PLACEHOLDER))
        }
        Value::Function(_) => {
            tracing::warn!(prop = %path, "Prop contains a function, skipping");
            None
        }
        Value::Undefined => None,
        Value::Array(items) => Some(Value::array(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    sanitize_value(&format!("{}[{}]", path, i), item, depth + 1)
                        .unwrap_or(Value::Null)
                })
                .collect(),
        )),
        Value::Object(map) => Some(Value::object(
            map.iter()
                .filter_map(|(key, item)| {
                    sanitize_value(&format!("{}.{}", path, key), item, depth + 1)
                        .map(|clean| (key.clone(), clean))
                })
                .collect(),
        )),
        other => Some(other.clone()),
    }
}

/// 序列化后再读回是否保持不变
fn round_trips(value: &Value) -> bool {
    match serde_json::to_value(value) {
        Ok(json) => Value::from(json) == *value,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Element, Node};
    use serde_json::json;

    #[test]
    fn test_functions_are_omitted() {
        let data = ViewData::new()
            .with("title", "Home")
            .with("onClick", Value::function(|_| Ok(Value::Undefined)));
        let props = sanitize(&data);
        assert_eq!(props, Value::from(json!({"title": "Home"})));
    }

    #[test]
    fn test_nodes_become_placeholders() {
        let node: Node = Element::new("b").text("x").into();
        let data = ViewData::new()
            .with("banner", node.clone())
            .with("list", vec![Value::node(node), Value::from(1)]);
        let props = sanitize(&data);
        assert_eq!(
            props,
            Value::from(json!({"banner": "[Element]", "list": ["[Element]", 1]}))
        );
    }

    #[test]
    fn test_nested_values_are_cleaned() {
        let mut user = Object::new();
        user.insert("name".into(), Value::from("ann"));
        user.insert("save".into(), Value::function(|_| Ok(Value::Null)));
        user.insert("nickname".into(), Value::Undefined);
        let data = ViewData::new()
            .with("user", user)
            .with("tags", vec![Value::Undefined, Value::from("a")]);
        assert_eq!(
            sanitize(&data),
            Value::from(json!({"user": {"name": "ann"}, "tags": [null, "a"]}))
        );
    }

    #[test]
    fn test_unserializable_numbers_become_strings() {
        let data = ViewData::new()
            .with("ratio", f64::NAN)
            .with("limit", f64::INFINITY)
            .with("ok", 1.5);
        assert_eq!(
            sanitize(&data),
            Value::from(json!({"ratio": "NaN", "limit": "Infinity", "ok": 1.5}))
        );
    }

    #[test]
    fn test_from_serialize() {
        #[derive(Serialize)]
        struct Page {
            title: &'static str,
            views: u32,
        }
        let data = ViewData::from_serialize(&Page { title: "t", views: 2 }).unwrap();
        assert_eq!(data.get("views"), Some(&Value::from(2)));
        assert!(ViewData::from_serialize(&[1, 2]).is_err());
    }
}
