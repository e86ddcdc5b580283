//! 内存中的 UI 树与静态序列化
//!
//! 序列化结果是纯字符串，不包含任何事件绑定。除 `inner_html` 外，
//! 所有文本（包括 `script` / `style` 的内容）都会转义。

use once_cell::sync::Lazy;
use regex::Regex;

static TAG_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][-A-Za-z0-9_:.]*$").expect("valid regex"));

static ATTRIBUTE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_:][-A-Za-z0-9_:.]*$").expect("valid regex"));

pub fn is_valid_tag_name(tag: &str) -> bool {
    TAG_NAME.is_match(tag)
}

pub fn is_valid_attribute_name(name: &str) -> bool {
    ATTRIBUTE_NAME.is_match(name)
}

/// 树节点
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
    Fragment(Vec<Node>),
}

/// 元素节点，属性在构建时已经解析为最终的字符串
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub tag: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
    /// 原样输出的内部 HTML（dangerouslySetInnerHTML）
    pub inner_html: Option<String>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attributes: Vec::new(),
            children: Vec::new(),
            inner_html: None,
        }
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    pub fn child(mut self, child: impl Into<Node>) -> Self {
        self.children.push(child.into());
        self
    }

    pub fn text(self, text: impl Into<String>) -> Self {
        self.child(Node::Text(text.into()))
    }

    /// 原样输出的内容，只用于可信的常量
    pub fn inner_html(mut self, html: impl Into<String>) -> Self {
        self.inner_html = Some(html.into());
        self
    }
}

impl From<Element> for Node {
    fn from(element: Element) -> Self {
        Node::Element(element)
    }
}

impl Node {
    pub fn text(text: impl Into<String>) -> Self {
        Node::Text(text.into())
    }

    pub fn empty() -> Self {
        Node::Fragment(Vec::new())
    }
}

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// 将树序列化为静态 HTML
pub fn render_to_static_markup(node: &Node) -> String {
    let mut out = String::new();
    write_node(node, &mut out);
    out
}

fn write_node(node: &Node, out: &mut String) {
    match node {
        Node::Text(text) => escape_into(text, out),
        Node::Fragment(children) => {
            for child in children {
                write_node(child, out);
            }
        }
        Node::Element(element) => write_element(element, out),
    }
}

fn write_element(element: &Element, out: &mut String) {
    out.push('<');
    out.push_str(&element.tag);
    // 非法属性名在构建时已被丢弃，这里再挡一次手工构建的元素
    for (name, value) in element
        .attributes
        .iter()
        .filter(|(name, _)| is_valid_attribute_name(name))
    {
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        escape_into(value, out);
        out.push('"');
    }

    if VOID_ELEMENTS.contains(&element.tag.as_str()) {
        out.push_str("/>");
        return;
    }
    out.push('>');

    match &element.inner_html {
        Some(html) => out.push_str(html),
        None => {
            for child in &element.children {
                write_node(child, out);
            }
        }
    }

    out.push_str("</");
    out.push_str(&element.tag);
    out.push('>');
}

/// HTML 转义
pub fn escape_into(text: &str, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            other => out.push(other),
        }
    }
}

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    escape_into(text, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_markup() {
        let tree: Node = Element::new("div")
            .attr("class", "box")
            .child(Element::new("h1").text("Hi & bye"))
            .child(Element::new("br"))
            .into();

        assert_eq!(
            render_to_static_markup(&tree),
            r#"<div class="box"><h1>Hi &amp; bye</h1><br/></div>"#
        );
    }

    #[test]
    fn test_attribute_escaping() {
        let tree: Node = Element::new("a").attr("title", "\"quoted\" <b>").into();
        assert_eq!(
            render_to_static_markup(&tree),
            r#"<a title="&quot;quoted&quot; &lt;b&gt;"></a>"#
        );
    }

    #[test]
    fn test_script_text_is_escaped() {
        let tree: Node = Element::new("script")
            .text("window.__DATA__ = \"</script><img src=x onerror=alert(2)>\"")
            .into();
        let markup = render_to_static_markup(&tree);
        assert!(!markup.contains("</script><img"));
        assert!(markup.ends_with("&lt;img src=x onerror=alert(2)&gt;&quot;</script>"));
    }

    #[test]
    fn test_inner_html_is_raw() {
        let tree: Node = Element::new("style").inner_html("a > b { color: red }").into();
        assert_eq!(
            render_to_static_markup(&tree),
            "<style>a > b { color: red }</style>"
        );
    }

    #[test]
    fn test_invalid_attribute_names_are_skipped() {
        let tree: Node = Element::new("div")
            .attr("x\" onmouseover=\"alert(1)", "y")
            .attr("data-id", "7")
            .into();
        assert_eq!(render_to_static_markup(&tree), r#"<div data-id="7"></div>"#);
    }

    #[test]
    fn test_name_rules() {
        assert!(is_valid_tag_name("my-widget"));
        assert!(!is_valid_tag_name("div onclick=x"));
        assert!(!is_valid_tag_name("1div"));
        assert!(is_valid_attribute_name("aria-label"));
        assert!(is_valid_attribute_name("xlink:href"));
        assert!(!is_valid_attribute_name("a\"b"));
        assert!(!is_valid_attribute_name(""));
    }

    #[test]
    fn test_fragments_flatten() {
        let tree = Node::Fragment(vec![Node::text("a"), Node::Fragment(vec![Node::text("b")])]);
        assert_eq!(render_to_static_markup(&tree), "ab");
    }
}
