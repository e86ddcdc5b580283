//! 路径匹配
//!
//! 把路由声明编译为锚定的正则表达式：
//!
//! - 字面量段：转义后逐字匹配
//! - `:name`：捕获一个不含 `/` 的段
//! - `:name?`：可选段，缺失时不出现在参数表中
//! - `*` / `*rest`：最后一段的通配符，捕获剩余路径（可为空）
//! - `*` / `/*`：匹配所有路径

use std::collections::HashMap;

use percent_encoding::percent_decode_str;
use regex::Regex;

/// 路径模式编译错误
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PatternError {
    #[error("Invalid parameter name '{name}' in pattern '{pattern}'")]
    InvalidParameterName { pattern: String, name: String },

    #[error("Duplicate parameter '{name}' in pattern '{pattern}'")]
    DuplicateParameter { pattern: String, name: String },

    #[error("Wildcard must be the last segment in pattern '{pattern}'")]
    WildcardNotLast { pattern: String },

    #[error("Failed to compile pattern '{pattern}': {message}")]
    Regex { pattern: String, message: String },
}

/// 路径参数
pub type Params = HashMap<String, String>;

/// 编译后的路径模式
#[derive(Debug, Clone)]
pub struct PathPattern {
    pattern: String,
    regex: Regex,
    param_names: Vec<String>,
}

fn valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// 去掉查询串与片段，并去掉末尾的 `/`（根路径除外）
pub fn normalize_path(path: &str) -> &str {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    let path = &path[..end];
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

impl PathPattern {
    /// 编译路径模式
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        let pattern = pattern.trim();
        let mut param_names: Vec<String> = Vec::new();
        let mut source = String::from("^");

        if pattern == "*" || pattern == "/*" {
            source.push_str("(?:/(.*))?");
            param_names.push("*".to_string());
        } else {
            let segments: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();

            for (index, segment) in segments.iter().enumerate() {
                let last = index + 1 == segments.len();

                let name = if let Some(rest) = segment.strip_prefix('*') {
                    if !last {
                        return Err(PatternError::WildcardNotLast {
                            pattern: pattern.to_string(),
                        });
                    }
                    let name = if rest.is_empty() { "*" } else { rest };
                    if rest.is_empty() || valid_name(rest) {
                        source.push_str("(?:/(.*))?");
                        Some(name)
                    } else {
                        return Err(PatternError::InvalidParameterName {
                            pattern: pattern.to_string(),
                            name: name.to_string(),
                        });
                    }
                } else if let Some(param) = segment.strip_prefix(':') {
                    let (name, optional) = match param.strip_suffix('?') {
                        Some(name) => (name, true),
                        None => (param, false),
                    };
                    if !valid_name(name) {
                        return Err(PatternError::InvalidParameterName {
                            pattern: pattern.to_string(),
                            name: name.to_string(),
                        });
                    }
                    source.push_str(if optional { "(?:/([^/]+))?" } else { "/([^/]+)" });
                    Some(name)
                } else {
                    source.push('/');
                    source.push_str(&regex::escape(segment));
                    None
                };

                if let Some(name) = name {
                    if param_names.iter().any(|existing| existing == name) {
                        return Err(PatternError::DuplicateParameter {
                            pattern: pattern.to_string(),
                            name: name.to_string(),
                        });
                    }
                    param_names.push(name.to_string());
                }
            }
        }

        source.push_str("/?$");

        let regex = Regex::new(&source).map_err(|e| PatternError::Regex {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;

        debug_assert_eq!(regex.captures_len() - 1, param_names.len());

        Ok(Self {
            pattern: pattern.to_string(),
            regex,
            param_names,
        })
    }

    /// 原始模式
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// 按出现顺序排列的参数名
    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    /// 是否匹配（不提取参数）
    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(normalize_path(path))
    }

    /// 匹配路径并提取参数，参数值经过 URL 解码
    pub fn matches(&self, path: &str) -> Option<Params> {
        let captures = self.regex.captures(normalize_path(path))?;
        let params = self
            .param_names
            .iter()
            .enumerate()
            .filter_map(|(index, name)| {
                captures.get(index + 1).map(|raw| {
                    let raw = raw.as_str();
                    let value = percent_decode_str(raw)
                        .decode_utf8()
                        .map(|decoded| decoded.into_owned())
                        .unwrap_or_else(|_| raw.to_string());
                    (name.clone(), value)
                })
            })
            .collect();
        Some(params)
    }
}
