//! 编译缓存
//!
//! 以 (路径, 修改时间) 为键缓存编译结果。同一键同时只有一次编译在进行，
//! 并发请求共享同一个编译 future 的结果（包括失败结果）。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use crate::compiler::{CompiledTemplate, Compiler};
use crate::error::{TemplateError, TemplateResult};

type CompileFuture = Shared<BoxFuture<'static, TemplateResult<Arc<CompiledTemplate>>>>;

struct CacheEntry {
    modified: SystemTime,
    compiled: CompileFuture,
}

/// 模板缓存
pub struct TemplateCache {
    compiler: Arc<Compiler>,
    entries: Mutex<HashMap<PathBuf, CacheEntry>>,
    compilations: Arc<AtomicU64>,
}

impl TemplateCache {
    pub fn new(compiler: Compiler) -> Self {
        Self {
            compiler: Arc::new(compiler),
            entries: Mutex::new(HashMap::new()),
            compilations: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 获取编译好的模板，文件修改时间变化时重新编译
    pub async fn get(&self, name: &str, path: &Path) -> TemplateResult<Arc<CompiledTemplate>> {
        let modified = match self.modified(name, path).await {
            Ok(modified) => modified,
            Err(e) => {
                self.entries.lock().remove(path);
                return Err(e);
            }
        };

        let compiled = self.entry_for(name, path, modified);
        compiled.await
    }

    /// 按修改时间选出编译 future
    ///
    /// 已有条目不比本次读到的修改时间旧时直接复用：并发请求里先读到旧时间的一方
    /// 不会用旧文件的编译覆盖更新的条目
    fn entry_for(&self, name: &str, path: &Path, modified: SystemTime) -> CompileFuture {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(path) {
            if entry.modified >= modified {
                return entry.compiled.clone();
            }
            tracing::debug!(template = name, path = %path.display(), "View file changed, recompiling");
        }

        let compiled = self.spawn_compile(name, path);
        entries.insert(
            path.to_path_buf(),
            CacheEntry {
                modified,
                compiled: compiled.clone(),
            },
        );
        compiled
    }

    /// 实际发生的编译次数
    pub fn compilations(&self) -> u64 {
        self.compilations.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// 清空缓存
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        let count = entries.len();
        entries.clear();
        tracing::debug!(count, "Template cache cleared");
    }

    async fn modified(&self, name: &str, path: &Path) -> TemplateResult<SystemTime> {
        let not_found = || TemplateError::NotFound {
            name: name.to_string(),
            path: path.to_path_buf(),
        };
        let io = |e: std::io::Error| TemplateError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        };

        match tokio::fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => metadata.modified().map_err(io),
            Ok(_) => Err(not_found()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(not_found()),
            Err(e) => Err(io(e)),
        }
    }

    // 编译任务立即在运行时上启动，不依赖调用方持续 poll
    fn spawn_compile(&self, name: &str, path: &Path) -> CompileFuture {
        let compiler = Arc::clone(&self.compiler);
        let compilations = Arc::clone(&self.compilations);
        let template = name.to_string();
        let path = path.to_path_buf();

        let task = {
            let template = template.clone();
            tokio::spawn(async move {
                compilations.fetch_add(1, Ordering::SeqCst);
                let source = tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| TemplateError::Io {
                        path: path.clone(),
                        message: e.to_string(),
                    })?;
                compiler.compile(&template, &path, &source).map(Arc::new)
            })
        };

        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(TemplateError::execution(
                    &template,
                    format!("Compilation task failed: {}", e),
                )),
            }
        }
        .boxed()
        .shared()
    }
}
