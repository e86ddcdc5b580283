//! 兜底渲染
//!
//! 模板缺失或加载失败时使用的内置渲染函数。这些函数本身不会失败。

use std::collections::HashMap;
use std::sync::Arc;

use crate::node::{Element, Node};
use crate::value::Value;

/// 兜底渲染函数：(模板名, props) -> UI 树
pub type FallbackFn = Arc<dyn Fn(&str, &Value) -> Node + Send + Sync>;

const HOME_STYLES: &str = "
body { font-family: Arial, sans-serif; padding: 2rem; background: #f8f9fa; }
.error-container { max-width: 600px; margin: 0 auto; background: white; padding: 2rem; border-radius: 8px; box-shadow: 0 2px 10px rgba(0,0,0,0.1); }
.error-title { color: #dc3545; margin-bottom: 1rem; }
.error-message { color: #6c757d; margin-bottom: 1rem; }
.code-block { background: #f8f9fa; padding: 1rem; border-radius: 4px; font-family: monospace; margin: 1rem 0; }
.suggestions { background: #d4edda; padding: 1rem; border-radius: 4px; border-left: 4px solid #28a745; }
";

/// 兜底注册表
///
/// 已注册名字使用对应函数，其余名字使用通用占位页
pub struct FallbackRegistry {
    fallbacks: HashMap<String, FallbackFn>,
}

impl Default for FallbackRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("home", home_fallback);
        registry
    }
}

impl FallbackRegistry {
    /// 不含任何内置项的注册表
    pub fn empty() -> Self {
        Self {
            fallbacks: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, name: impl Into<String>, fallback: F)
    where
        F: Fn(&str, &Value) -> Node + Send + Sync + 'static,
    {
        self.fallbacks.insert(name.into(), Arc::new(fallback));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fallbacks.contains_key(name)
    }

    pub fn render(&self, name: &str, props: &Value) -> Node {
        match self.fallbacks.get(name) {
            Some(fallback) => fallback(name, props),
            None => placeholder(name, props),
        }
    }
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn pretty_props(props: &Value) -> String {
    serde_json::to_string_pretty(props).unwrap_or_else(|_| "{}".to_string())
}

/// 首页缺失时的帮助页
pub fn home_fallback(name: &str, props: &Value) -> Node {
    let component = capitalize(name);
    let snippet = format!(
        "mkdir -p views\n\
         cat > views/{name}.jsx << 'EOF'\n\
         export default function {component}(props) {{\n  \
           return (\n    \
             <html>\n      \
               <head><title>{name}</title></head>\n      \
               <body>\n        \
                 <h1>Hello from {name}!</h1>\n        \
                 <p>Props: {{JSON.stringify(props)}}</p>\n      \
               </body>\n    \
             </html>\n  \
           );\n\
         }}\n\
         EOF"
    );

    Element::new("html")
        .child(
            Element::new("head")
                .child(Element::new("title").text("Swipjy - View Missing"))
                .child(Element::new("style").inner_html(HOME_STYLES)),
        )
        .child(
            Element::new("body").child(
                Element::new("div")
                    .attr("class", "error-container")
                    .child(Element::new("h1").attr("class", "error-title").text("View File Missing"))
                    .child(
                        Element::new("p")
                            .attr("class", "error-message")
                            .text(format!("The view file \"views/{}.jsx\" was not found.", name)),
                    )
                    .child(
                        Element::new("div")
                            .attr("class", "suggestions")
                            .child(Element::new("h3").text("Quick Fix:"))
                            .child(Element::new("p").text("Create the missing view file:"))
                            .child(Element::new("pre").attr("class", "code-block").text(snippet))
                            .child(Element::new("p").text("Then reload the page.")),
                    )
                    .child(Element::new("p").text(format!("Passed props: {}", pretty_props(props)))),
            ),
        )
        .into()
}

/// 通用占位页
pub fn placeholder(name: &str, _props: &Value) -> Node {
    Element::new("html")
        .child(Element::new("head").child(Element::new("title").text(format!("{} - Swipjy", name))))
        .child(
            Element::new("body")
                .child(Element::new("h1").text(format!("{} page", name)))
                .child(
                    Element::new("p")
                        .text(format!("Create a views/{}.jsx file to customize this page.", name)),
                )
                .child(Element::new("div").attr("id", "root")),
        )
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::render_to_static_markup;
    use serde_json::json;

    #[test]
    fn test_generic_placeholder() {
        let registry = FallbackRegistry::default();
        let html = render_to_static_markup(&registry.render("about", &Value::Null));
        assert_eq!(
            html,
            "<html><head><title>about - Swipjy</title></head><body><h1>about page</h1>\
             <p>Create a views/about.jsx file to customize this page.</p><div id=\"root\"></div></body></html>"
        );
    }

    #[test]
    fn test_home_fallback_shows_props() {
        let registry = FallbackRegistry::default();
        let props = Value::from(json!({"user": "<ann>"}));
        let html = render_to_static_markup(&registry.render("home", &props));
        assert!(html.contains("View File Missing"));
        assert!(html.contains("views/home.jsx"));
        assert!(html.contains("export default function Home(props)"));
        assert!(html.contains("&lt;ann&gt;"));
    }

    #[test]
    fn test_custom_fallback() {
        let mut registry = FallbackRegistry::empty();
        registry.register("status", |name, _| Element::new("p").text(name).into());
        assert!(registry.contains("status"));
        assert!(!registry.contains("home"));
        assert_eq!(render_to_static_markup(&registry.render("status", &Value::Null)), "<p>status</p>");
    }
}
