//! # Swipjy View
//!
//! 服务端标记模板引擎
//!
//! ## 核心特性
//!
//! - **标记编译** - 模板中的标记被编译为对注入的树构建库的调用
//! - **受限执行** - 模块体只能访问树构建库、`module`/`exports` 与少量平台原语
//! - **编译缓存** - 按 (路径, 修改时间) 缓存，同一键只编译一次
//! - **兜底页面** - 模板缺失或出错时渲染内置页面
//! - **Hydration** - 存在 `<name>.hydrate.jsx` 时自动注入客户端脚本

mod ast;
mod builtins;
mod interpreter;
mod parser;

pub mod cache;
pub mod compiler;
pub mod constants;
pub mod error;
pub mod exports;
pub mod fallback;
pub mod library;
pub mod node;
pub mod pipeline;
pub mod sanitize;
pub mod value;

pub use builtins::Builtin;
pub use cache::TemplateCache;
pub use compiler::{CompiledTemplate, Compiler};
pub use error::{TemplateError, TemplateResult};
pub use fallback::{FallbackFn, FallbackRegistry};
pub use interpreter::Closure;
pub use library::{HtmlLibrary, TreeLibrary};
pub use node::{render_to_static_markup, Element, Node};
pub use parser::ParseError;
pub use pipeline::{RenderPipeline, ViewProperties};
pub use sanitize::{sanitize, ViewData};
pub use value::{Function, Object, Value};

pub mod prelude {
    //! 预导入模块

    pub use crate::error::{TemplateError, TemplateResult};
    pub use crate::node::{Element, Node};
    pub use crate::pipeline::{RenderPipeline, ViewProperties};
    pub use crate::sanitize::ViewData;
    pub use crate::value::Value;
}
