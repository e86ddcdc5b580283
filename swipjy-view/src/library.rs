//! 注入给模板的树构建库
//!
//! 模板代码里的标记最终都变成对 [`TreeLibrary`] 的调用，
//! 模板能访问的唯一外部能力就是这个对象。

use crate::node::{is_valid_attribute_name, is_valid_tag_name, Element, Node};
use crate::value::{Object, Value};

/// 树构建库
pub trait TreeLibrary: Send + Sync {
    /// `import` / `require` 能解析的模块名
    fn module_names(&self) -> &[&'static str];

    /// 模块作用域内预先绑定的名字
    fn binding_name(&self) -> &'static str;

    /// 构建一个内建元素（`div`、`span` ...）
    fn create_element(&self, tag: &str, props: &Object, children: Vec<Node>) -> Result<Node, String>;

    fn fragment(&self, children: Vec<Node>) -> Node {
        Node::Fragment(children)
    }

    fn text(&self, text: String) -> Node {
        Node::Text(text)
    }

    fn provides(&self, module: &str) -> bool {
        self.module_names().contains(&module)
    }
}

/// 生成静态 HTML 的默认实现
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlLibrary;

const MODULE_NAMES: &[&str] = &["react", "react/jsx-runtime"];

/// 不追加 `px` 的样式属性
const UNITLESS_STYLES: &[&str] = &[
    "animation-iteration-count",
    "column-count",
    "flex",
    "flex-grow",
    "flex-shrink",
    "font-weight",
    "grid-column",
    "grid-row",
    "line-height",
    "opacity",
    "order",
    "orphans",
    "tab-size",
    "widows",
    "z-index",
    "zoom",
];

impl TreeLibrary for HtmlLibrary {
    fn module_names(&self) -> &[&'static str] {
        MODULE_NAMES
    }

    fn binding_name(&self) -> &'static str {
        "React"
    }

    fn create_element(&self, tag: &str, props: &Object, children: Vec<Node>) -> Result<Node, String> {
        if !is_valid_tag_name(tag) {
            return Err(format!("Invalid tag: <{}>", tag));
        }
        let mut element = Element::new(tag);

        for (name, value) in props {
            match name.as_str() {
                "children" | "key" | "ref" => continue,
                "dangerouslySetInnerHTML" => {
                    let html = value.get("__html");
                    if !html.is_nullish() {
                        element.inner_html = Some(html.to_string());
                    }
                    continue;
                }
                _ => {}
            }

            let attr = match name.as_str() {
                "className" => "class".to_string(),
                "htmlFor" => "for".to_string(),
                other => other.to_string(),
            };
            if !is_valid_attribute_name(&attr) {
                tracing::warn!(tag, attribute = %attr, "Dropping invalid attribute name");
                continue;
            }

            match value {
                Value::Undefined | Value::Null | Value::Bool(false) | Value::Function(_) => {}
                Value::Bool(true) => element.attributes.push((attr, String::new())),
                Value::Object(style) if attr == "style" => {
                    let css = style_to_css(style);
                    if !css.is_empty() {
                        element.attributes.push((attr, css));
                    }
                }
                other => element.attributes.push((attr, other.to_string())),
            }
        }

        if element.inner_html.is_none() {
            element.children = children;
        }
        Ok(Node::Element(element))
    }
}

/// `{ fontSize: 12, color: "red" }` -> `font-size:12px;color:red`
pub fn style_to_css(style: &Object) -> String {
    let mut declarations = Vec::new();
    for (name, value) in style {
        if value.is_nullish() || matches!(value, Value::Bool(_) | Value::Function(_)) {
            continue;
        }
        let property = kebab_case(name);
        let text = match value {
            Value::Number(n) if *n != 0.0 && !UNITLESS_STYLES.contains(&property.as_str()) => {
                format!("{}px", value)
            }
            other => other.to_string(),
        };
        if text.is_empty() {
            continue;
        }
        declarations.push(format!("{}:{}", property, text));
    }
    declarations.join(";")
}

fn kebab_case(name: &str) -> String {
    if name.starts_with("--") {
        return name.to_string();
    }
    let mut out = String::with_capacity(name.len() + 4);
    for ch in name.chars() {
        if ch.is_ascii_uppercase() {
            out.push('-');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    if out.starts_with("ms-") {
        out.insert(0, '-');
    }
    out
}

/// 把子节点值展开成节点列表
///
/// 数组递归展开，`null`/`undefined`/布尔值/函数不产生输出，
/// 普通对象不能作为子节点。
pub fn collect_children(values: Vec<Value>, library: &dyn TreeLibrary) -> Result<Vec<Node>, String> {
    let mut nodes = Vec::with_capacity(values.len());
    for value in values {
        push_child(value, library, &mut nodes)?;
    }
    Ok(nodes)
}

fn push_child(value: Value, library: &dyn TreeLibrary, out: &mut Vec<Node>) -> Result<(), String> {
    match value {
        Value::Undefined | Value::Null | Value::Bool(_) | Value::Function(_) => {}
        Value::String(s) => out.push(library.text(s.to_string())),
        Value::Number(_) => out.push(library.text(value.to_string())),
        Value::Node(node) => out.push(std::sync::Arc::try_unwrap(node).unwrap_or_else(|n| (*n).clone())),
        Value::Array(items) => {
            for item in items.iter() {
                push_child(item.clone(), library, out)?;
            }
        }
        Value::Object(map) => {
            let keys: Vec<&str> = map.keys().map(String::as_str).collect();
            return Err(format!(
                "Objects are not valid as a child (found: object with keys {{{}}})",
                keys.join(", ")
            ));
        }
    }
    Ok(())
}

/// 组件返回值转换为单个节点
pub fn into_node(value: Value, library: &dyn TreeLibrary) -> Result<Node, String> {
    match value {
        Value::Node(node) => Ok(std::sync::Arc::try_unwrap(node).unwrap_or_else(|n| (*n).clone())),
        other => {
            let mut children = collect_children(vec![other], library)?;
            if children.len() == 1 {
                Ok(children.remove(0))
            } else {
                Ok(library.fragment(children))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::render_to_static_markup;
    use serde_json::json;

    fn props(value: serde_json::Value) -> Object {
        match Value::from(value) {
            Value::Object(map) => (*map).clone(),
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_attribute_mapping() {
        let mut attrs = props(json!({
            "className": "card",
            "htmlFor": "name",
            "disabled": true,
            "hidden": false,
            "key": "k1",
            "style": {"fontSize": 12, "zIndex": 3, "backgroundColor": "red"}
        }));
        attrs.insert("onClick".into(), Value::function(|_| Ok(Value::Null)));

        let node = HtmlLibrary
            .create_element("label", &attrs, vec![Node::text("Name")])
            .unwrap();

        assert_eq!(
            render_to_static_markup(&node),
            r#"<label class="card" for="name" disabled="" style="font-size:12px;z-index:3;background-color:red">Name</label>"#
        );
    }

    #[test]
    fn test_inner_html_replaces_children() {
        let attrs = props(json!({"dangerouslySetInnerHTML": {"__html": "<b>hi</b>"}}));
        let node = HtmlLibrary
            .create_element("div", &attrs, vec![Node::text("ignored")])
            .unwrap();
        assert_eq!(render_to_static_markup(&node), "<div><b>hi</b></div>");
    }

    #[test]
    fn test_children_flatten_and_skip_empty_values() {
        let values = vec![
            Value::from(vec![Value::string("a"), Value::Null, Value::Bool(false)]),
            Value::from(3),
            Value::Undefined,
        ];
        let nodes = collect_children(values, &HtmlLibrary).unwrap();
        assert_eq!(nodes, vec![Node::text("a"), Node::text("3")]);
    }

    #[test]
    fn test_plain_object_child_is_rejected() {
        let err = collect_children(vec![Value::from(json!({"a": 1}))], &HtmlLibrary).unwrap_err();
        assert!(err.contains("Objects are not valid"));
    }
}
