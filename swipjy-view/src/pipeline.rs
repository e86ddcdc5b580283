//! 渲染管线
//!
//! 数据清洗 -> 获取编译好的模板 -> 渲染 UI 树 -> 序列化为静态标记 -> 加上文档声明。
//! 加载失败时按配置使用兜底页面。

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use swipjy_core::Environment;

use crate::cache::TemplateCache;
use crate::compiler::Compiler;
use crate::constants::*;
use crate::error::{TemplateError, TemplateResult};
use crate::fallback::FallbackRegistry;
use crate::library::{HtmlLibrary, TreeLibrary};
use crate::node::{render_to_static_markup, Node};
use crate::sanitize::{sanitize, ViewData};
use crate::value::Value;

/// 视图配置
#[derive(Debug, Clone, PartialEq)]
pub struct ViewProperties {
    /// 模板目录（默认 "views"）
    pub dir: PathBuf,

    /// 模板扩展名（默认 "jsx"）
    pub extension: String,

    /// 存在 `<name>.hydrate.<ext>` 时是否注入脚本（默认 true）
    pub hydration: bool,

    /// 脚本地址模板（默认 "/{name}.bundle.js"）
    pub bundle_path: String,

    /// 是否启用兜底页面（默认 true）
    pub fallback: bool,
}

impl Default for ViewProperties {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("views"),
            extension: "jsx".to_string(),
            hydration: true,
            bundle_path: "/{name}.bundle.js".to_string(),
            fallback: true,
        }
    }
}

impl ViewProperties {
    /// 从 Environment 加载配置
    pub fn from_environment(env: &Environment) -> Self {
        let defaults = Self::default();
        Self {
            dir: env
                .get_string(VIEWS_DIR)
                .map(PathBuf::from)
                .unwrap_or(defaults.dir),
            extension: env
                .get_string(VIEWS_EXTENSION)
                .map(|ext| ext.trim_start_matches('.').to_string())
                .unwrap_or(defaults.extension),
            hydration: env.get_bool_or(VIEWS_HYDRATION, defaults.hydration),
            bundle_path: env
                .get_string(VIEWS_BUNDLE_PATH)
                .unwrap_or(defaults.bundle_path),
            fallback: env.get_bool_or(VIEWS_FALLBACK, defaults.fallback),
        }
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    /// 视图源文件路径
    pub fn view_path(&self, name: &str) -> TemplateResult<PathBuf> {
        let relative = Path::new(name);
        let valid = !name.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        let path = self.dir.join(format!("{}.{}", name, self.extension));
        if valid {
            Ok(path)
        } else {
            Err(TemplateError::NotFound {
                name: name.to_string(),
                path,
            })
        }
    }

    fn hydration_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.hydrate.{}", name, self.extension))
    }

    fn bundle_src(&self, name: &str) -> String {
        self.bundle_path.replace("{name}", name)
    }
}

/// 渲染管线
pub struct RenderPipeline {
    cache: Arc<TemplateCache>,
    properties: ViewProperties,
    fallbacks: FallbackRegistry,
}

impl RenderPipeline {
    /// 使用 HTML 树构建库创建
    pub fn new(properties: ViewProperties) -> Self {
        Self::with_library(properties, Arc::new(HtmlLibrary))
    }

    pub fn with_library(properties: ViewProperties, library: Arc<dyn TreeLibrary>) -> Self {
        Self::with_cache(properties, Arc::new(TemplateCache::new(Compiler::new(library))))
    }

    pub fn with_cache(properties: ViewProperties, cache: Arc<TemplateCache>) -> Self {
        Self {
            cache,
            properties,
            fallbacks: FallbackRegistry::default(),
        }
    }

    pub fn from_environment(env: &Environment) -> Self {
        Self::new(ViewProperties::from_environment(env))
    }

    /// 注册一个兜底渲染函数
    pub fn with_fallback<F>(mut self, name: impl Into<String>, fallback: F) -> Self
    where
        F: Fn(&str, &Value) -> Node + Send + Sync + 'static,
    {
        self.fallbacks.register(name, fallback);
        self
    }

    pub fn fallbacks_mut(&mut self) -> &mut FallbackRegistry {
        &mut self.fallbacks
    }

    pub fn cache(&self) -> &Arc<TemplateCache> {
        &self.cache
    }

    pub fn properties(&self) -> &ViewProperties {
        &self.properties
    }

    /// 渲染视图
    ///
    /// 加载、编译或执行失败时记录日志并使用兜底页面；
    /// 只有关闭了兜底（`views.fallback = false`）时才返回错误
    pub async fn render(&self, name: &str, data: &ViewData) -> TemplateResult<String> {
        let props = sanitize(data);
        let markup = match self.render_props(name, &props).await {
            Ok(markup) => markup,
            Err(e) if self.properties.fallback => {
                tracing::warn!(
                    template = name,
                    kind = e.kind(),
                    error = %e,
                    "Could not load view, using fallback"
                );
                render_to_static_markup(&self.fallbacks.render(name, &props))
            }
            Err(e) => return Err(e),
        };
        Ok(self.finish(name, markup).await)
    }

    /// 渲染视图，不使用兜底页面
    pub async fn try_render(&self, name: &str, data: &ViewData) -> TemplateResult<String> {
        let markup = self.render_props(name, &sanitize(data)).await?;
        Ok(self.finish(name, markup).await)
    }

    /// 关闭时清空缓存
    pub fn shutdown(&self) {
        self.cache.clear();
    }

    async fn render_props(&self, name: &str, props: &Value) -> TemplateResult<String> {
        let path = self.properties.view_path(name)?;
        let template = self.cache.get(name, &path).await?;
        let node = template.render(props)?;
        Ok(render_to_static_markup(&node))
    }

    async fn finish(&self, name: &str, markup: String) -> String {
        let markup = if self.properties.hydration && self.has_hydration_entry(name).await {
            inject_script(markup, &self.properties.bundle_src(name))
        } else {
            markup
        };
        format!("{}{}", DOCTYPE, markup)
    }

    async fn has_hydration_entry(&self, name: &str) -> bool {
        if self.properties.view_path(name).is_err() {
            return false;
        }
        tokio::fs::try_exists(self.properties.hydration_path(name))
            .await
            .unwrap_or(false)
    }
}

/// 在 `</body>` 前（没有则在末尾）插入模块脚本，已引用时不重复插入
fn inject_script(mut markup: String, src: &str) -> String {
    if markup.contains(&format!("src=\"{}\"", src)) {
        return markup;
    }
    let tag = format!(
        "<script type=\"module\" src=\"{}\"></script>",
        crate::node::escape(src)
    );
    match markup.rfind("</body>") {
        Some(index) => markup.insert_str(index, &tag),
        None => markup.push_str(&tag),
    }
    markup
}

#[cfg(test)]
mod tests {
    use super::*;
    use swipjy_core::{ConfigValue, MapPropertySource};
    use tempfile::TempDir;

    fn pipeline(dir: &TempDir) -> RenderPipeline {
        RenderPipeline::new(ViewProperties::default().with_dir(dir.path()))
    }

    fn write_view(dir: &TempDir, file: &str, source: &str) {
        std::fs::write(dir.path().join(file), source).unwrap();
    }

    #[tokio::test]
    async fn test_render_prefixes_doctype() {
        let dir = TempDir::new().unwrap();
        write_view(&dir, "hello.jsx", "export default ({ name }) => <p>Hello {name}</p>;");
        let html = pipeline(&dir)
            .render("hello", &ViewData::new().with("name", "Ann"))
            .await
            .unwrap();
        assert_eq!(html, "<!DOCTYPE html><p>Hello Ann</p>");
    }

    #[tokio::test]
    async fn test_function_props_are_not_passed() {
        let dir = TempDir::new().unwrap();
        write_view(
            &dir,
            "props.jsx",
            "export default (props) => <p>{Object.keys(props).join(',')}</p>;",
        );
        let data = ViewData::new()
            .with("a", 1)
            .with("callback", Value::function(|_| Ok(Value::Null)));
        let html = pipeline(&dir).render("props", &data).await.unwrap();
        assert_eq!(html, "<!DOCTYPE html><p>a</p>");
    }

    #[tokio::test]
    async fn test_missing_view_uses_placeholder() {
        let dir = TempDir::new().unwrap();
        let html = pipeline(&dir).render("about", &ViewData::new()).await.unwrap();
        assert!(html.starts_with("<!DOCTYPE html><html>"));
        assert!(html.contains("<h1>about page</h1>"));
    }

    #[tokio::test]
    async fn test_broken_view_uses_fallback() {
        let dir = TempDir::new().unwrap();
        write_view(&dir, "home.jsx", "export default () => <div>");
        let html = pipeline(&dir)
            .render("home", &ViewData::new().with("user", "ann"))
            .await
            .unwrap();
        assert!(html.contains("View File Missing"));
        assert!(html.contains("ann"));
    }

    #[tokio::test]
    async fn test_try_render_reports_errors() {
        let dir = TempDir::new().unwrap();
        let err = pipeline(&dir).try_render("nope", &ViewData::new()).await.unwrap_err();
        assert_eq!(err.kind(), "TemplateNotFound");
    }

    #[tokio::test]
    async fn test_disabled_fallback_returns_error() {
        let dir = TempDir::new().unwrap();
        let mut properties = ViewProperties::default().with_dir(dir.path());
        properties.fallback = false;
        let err = RenderPipeline::new(properties)
            .render("nope", &ViewData::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "TemplateNotFound");
    }

    #[tokio::test]
    async fn test_path_traversal_is_rejected() {
        let dir = TempDir::new().unwrap();
        let err = pipeline(&dir)
            .try_render("../secret", &ViewData::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "TemplateNotFound");
    }

    #[tokio::test]
    async fn test_hydration_script_injected() {
        let dir = TempDir::new().unwrap();
        write_view(&dir, "home.jsx", "export default () => <html><body><div id=\"root\"></div></body></html>;");
        write_view(&dir, "home.hydrate.jsx", "export default () => null;");
        let html = pipeline(&dir).render("home", &ViewData::new()).await.unwrap();
        assert_eq!(
            html,
            "<!DOCTYPE html><html><body><div id=\"root\"></div>\
             <script type=\"module\" src=\"/home.bundle.js\"></script></body></html>"
        );
    }

    #[test]
    fn test_inject_script_is_idempotent() {
        let markup = "<body><script type=\"module\" src=\"/a.js\"></script></body>".to_string();
        assert_eq!(inject_script(markup.clone(), "/a.js"), markup);
        assert_eq!(inject_script("<p></p>".into(), "/a.js"), "<p></p><script type=\"module\" src=\"/a.js\"></script>");
    }

    #[test]
    fn test_properties_from_environment() {
        let env = Environment::new().with_property_source(Box::new(
            MapPropertySource::new("test")
                .with_property(VIEWS_DIR, ConfigValue::String("templates".into()))
                .with_property(VIEWS_EXTENSION, ConfigValue::String(".tsx".into()))
                .with_property(VIEWS_HYDRATION, ConfigValue::Bool(false)),
        ));
        let properties = ViewProperties::from_environment(&env);
        assert_eq!(properties.dir, PathBuf::from("templates"));
        assert_eq!(properties.extension, "tsx");
        assert!(!properties.hydration);
        assert!(properties.fallback);
    }
}
