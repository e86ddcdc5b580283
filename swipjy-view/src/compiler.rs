//! 模板编译
//!
//! 编译流程：导出改写 -> 解析（标记编译为树构建调用）-> 在受限作用域中执行模块体，
//! 得到渲染函数。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{TemplateError, TemplateResult};
use crate::exports::rewrite_exports;
use crate::interpreter::{instantiate, Globals, Interpreter};
use crate::library::TreeLibrary;
use crate::node::Node;
use crate::parser::parse;
use crate::value::{Function, Value};

/// 模板编译器
pub struct Compiler {
    library: Arc<dyn TreeLibrary>,
}

impl Compiler {
    pub fn new(library: Arc<dyn TreeLibrary>) -> Self {
        Self { library }
    }

    pub fn library(&self) -> &Arc<dyn TreeLibrary> {
        &self.library
    }

    /// 编译模板源码
    pub fn compile(&self, name: &str, path: &Path, source: &str) -> TemplateResult<CompiledTemplate> {
        if source.trim().is_empty() {
            return Err(TemplateError::Compile {
                path: path.to_path_buf(),
                line: 1,
                column: 1,
                message: "View file is empty".to_string(),
            });
        }

        let rewritten = rewrite_exports(source);
        let program = parse(&rewritten).map_err(|e| TemplateError::Compile {
            path: path.to_path_buf(),
            line: e.line,
            column: e.column,
            message: e.message,
        })?;

        let module = instantiate(&program, self.library.as_ref(), name)
            .map_err(|message| TemplateError::execution(name, message))?;

        tracing::debug!(template = name, path = %path.display(), "Template compiled");

        Ok(CompiledTemplate {
            name: name.to_string(),
            path: path.to_path_buf(),
            globals: module.globals,
            entry: module.entry,
            library: Arc::clone(&self.library),
        })
    }
}

/// 编译结果：模块作用域加入口渲染函数
pub struct CompiledTemplate {
    name: String,
    path: PathBuf,
    globals: Globals,
    entry: Function,
    library: Arc<dyn TreeLibrary>,
}

impl std::fmt::Debug for CompiledTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledTemplate")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("entry", &self.entry)
            .finish()
    }
}

impl CompiledTemplate {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 调用渲染函数得到 UI 树
    pub fn render(&self, props: &Value) -> TemplateResult<Node> {
        Interpreter::new(&self.globals, self.library.as_ref(), &self.name)
            .render(&self.entry, props.clone())
            .map_err(|message| TemplateError::execution(&self.name, message))
    }
}
