use std::path::PathBuf;

/// 模板错误类型
///
/// 需要 `Clone`：同一次编译的结果会被多个并发等待者共享
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TemplateError {
    #[error("View file not found: {}", path.display())]
    NotFound { name: String, path: PathBuf },

    #[error("Failed to compile {}:{line}:{column}: {message}", path.display())]
    Compile {
        path: PathBuf,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("Failed to execute template '{template}': {message}")]
    Execution { template: String, message: String },

    #[error("I/O error on {}: {message}", path.display())]
    Io { path: PathBuf, message: String },
}

impl TemplateError {
    pub(crate) fn execution(template: &str, message: impl Into<String>) -> Self {
        Self::Execution {
            template: template.to_string(),
            message: message.into(),
        }
    }

    /// 错误种类标识，用于日志
    pub fn kind(&self) -> &'static str {
        match self {
            TemplateError::NotFound { .. } => "TemplateNotFound",
            TemplateError::Compile { .. } => "CompileError",
            TemplateError::Execution { .. } => "ExecutionError",
            TemplateError::Io { .. } => "IoError",
        }
    }
}

pub type TemplateResult<T> = Result<T, TemplateError>;
