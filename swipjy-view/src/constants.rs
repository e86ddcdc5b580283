//! 视图配置键

/// 模板目录
pub const VIEWS_DIR: &str = "views.dir";

/// 模板文件扩展名
pub const VIEWS_EXTENSION: &str = "views.extension";

/// 是否注入 hydration 脚本
pub const VIEWS_HYDRATION: &str = "views.hydration";

/// hydration 脚本地址，`{name}` 会被替换为视图名
pub const VIEWS_BUNDLE_PATH: &str = "views.bundle-path";

/// 加载失败时是否使用兜底页面
pub const VIEWS_FALLBACK: &str = "views.fallback";

/// 文档类型声明
pub const DOCTYPE: &str = "<!DOCTYPE html>";
