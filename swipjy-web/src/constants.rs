//! 框架配置常量定义
//!
//! 定义 Web 层使用的配置键名称

// ==================== Server 配置 ====================

/// 服务器监听地址
pub const SERVER_HOST: &str = "server.host";

/// 服务器监听端口
pub const SERVER_PORT: &str = "server.port";

/// 静态文件目录
pub const SERVER_STATIC_DIR: &str = "server.static-dir";

/// 请求体最大字节数
pub const SERVER_MAX_BODY_SIZE: &str = "server.max-body-size";

/// 是否启用响应压缩
pub const SERVER_COMPRESSION: &str = "server.compression";

/// 是否启用请求日志
pub const SERVER_REQUEST_LOGGING: &str = "server.request-logging";

// ==================== App 配置 ====================

/// 运行模式（development / production）
pub const APP_MODE: &str = "app.mode";

// ==================== CORS 配置 ====================

/// 允许的来源（"*"、单个来源或逗号分隔的列表）
pub const CORS_ORIGIN: &str = "cors.origin";

/// 允许的方法
pub const CORS_METHODS: &str = "cors.methods";

/// 允许的请求头
pub const CORS_ALLOWED_HEADERS: &str = "cors.allowed-headers";

/// 暴露给浏览器的响应头
pub const CORS_EXPOSE_HEADERS: &str = "cors.expose-headers";

/// 是否允许携带凭证
pub const CORS_CREDENTIALS: &str = "cors.credentials";

/// 预检结果缓存秒数
pub const CORS_MAX_AGE: &str = "cors.max-age";

/// 预检请求是否继续传递给后续中间件
pub const CORS_PREFLIGHT_CONTINUE: &str = "cors.preflight-continue";

// ==================== 请求头 ====================

/// 请求 ID 头
pub const REQUEST_ID_HEADER: &str = "x-request-id";
