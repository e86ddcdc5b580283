//! 导出语句改写
//!
//! 把模板源码里的 ES 导出写法统一改写为 `module.exports` / `exports.key`
//! 形式。这是文本层面的改写，不做完整的语言转换。

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static DEFAULT_FUNCTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bexport\s+default\s+function\s+([A-Za-z_$][\w$]*)").expect("valid regex")
});

static DEFAULT_ANONYMOUS_FUNCTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bexport\s+default\s+function\b").expect("valid regex"));

static DEFAULT_EXPRESSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bexport\s+default\s+").expect("valid regex"));

static NAMED_DECLARATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^(\s*)export\s+(function|const|let|var)\s+([A-Za-z_$][\w$]*)")
        .expect("valid regex")
});

static EXPORT_LIST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bexport\s*\{([^}]*)\}\s*;?").expect("valid regex"));

/// 改写导出语句
///
/// - `export default function Name(...)` 保留函数声明，在末尾追加 `module.exports = Name;`
/// - `export default <expr>` 改为 `module.exports = <expr>`
/// - `export { Name as default }` 改为 `module.exports = Name;`
/// - `export const|let|var|function name` 去掉 `export`，在末尾追加 `exports.name = name;`
/// - `export { a, b as c }` 改为对应的 `exports.*` 赋值
pub fn rewrite_exports(source: &str) -> String {
    let mut trailer: Vec<String> = Vec::new();

    let rewritten = EXPORT_LIST.replace_all(source, |caps: &Captures| {
        let mut lines = Vec::new();
        for item in caps[1].split(',') {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            let (local, exported) = match item.split_once(" as ") {
                Some((local, exported)) => (local.trim(), exported.trim()),
                None => (item, item),
            };
            if exported == "default" {
                lines.push(format!("module.exports = {};", local));
            } else {
                lines.push(format!("exports.{} = {};", exported, local));
            }
        }
        lines.join(" ")
    });

    let rewritten = DEFAULT_FUNCTION.replace_all(&rewritten, |caps: &Captures| {
        trailer.push(format!("module.exports = {};", &caps[1]));
        format!("function {}", &caps[1])
    });

    let rewritten = DEFAULT_ANONYMOUS_FUNCTION.replace_all(&rewritten, "module.exports = function");
    let rewritten = DEFAULT_EXPRESSION.replace_all(&rewritten, "module.exports = ");

    let rewritten = NAMED_DECLARATION.replace_all(&rewritten, |caps: &Captures| {
        trailer.push(format!("exports.{0} = {0};", &caps[3]));
        format!("{}{} {}", &caps[1], &caps[2], &caps[3])
    });

    let mut output = rewritten.into_owned();
    for line in trailer {
        output.push('\n');
        output.push_str(&line);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_identifier() {
        let out = rewrite_exports("const Home = () => null;\nexport default Home;\n");
        assert!(out.contains("module.exports = Home;"));
        assert!(!out.contains("export"));
    }

    #[test]
    fn test_default_function_declaration() {
        let out = rewrite_exports("export default function Home(props) {\n  return null;\n}\n");
        assert!(out.starts_with("function Home(props)"));
        assert!(out.trim_end().ends_with("module.exports = Home;"));
    }

    #[test]
    fn test_anonymous_default_function() {
        let out = rewrite_exports("export default function (props) { return null; }");
        assert_eq!(out, "module.exports = function (props) { return null; }");
    }

    #[test]
    fn test_alias_as_default() {
        let out = rewrite_exports("function Page() {}\nexport { Page as default };\n");
        assert!(out.contains("module.exports = Page;"));
        assert!(!out.contains("export {"));
    }

    #[test]
    fn test_named_exports() {
        let out = rewrite_exports("export const title = 'x';\nexport function helper() {}\n");
        assert!(out.starts_with("const title = 'x';\nfunction helper() {}"));
        assert!(out.contains("exports.title = title;"));
        assert!(out.contains("exports.helper = helper;"));
    }

    #[test]
    fn test_export_list() {
        let out = rewrite_exports("export { a, b as c };");
        assert_eq!(out, "exports.a = a; exports.c = b;");
    }

    #[test]
    fn test_commonjs_source_untouched() {
        let source = "module.exports = function Home() { return null; };";
        assert_eq!(rewrite_exports(source), source);
    }
}
