//! 令牌存储
//!
//! 保存已签发的不透明令牌及其所属主体。进程内有效，重启后失效。

use std::collections::HashMap;

use parking_lot::RwLock;

/// 已签发令牌的集合
#[derive(Debug, Default)]
pub struct TokenStore {
    tokens: RwLock<HashMap<String, String>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为主体签发新令牌（64 位十六进制字符）
    pub fn issue(&self, subject: impl Into<String>) -> String {
        let token = format!(
            "{}{}",
            uuid::Uuid::new_v4().simple(),
            uuid::Uuid::new_v4().simple()
        );
        let subject = subject.into();
        tracing::debug!(subject = %subject, "Token issued");
        self.tokens.write().insert(token.clone(), subject);
        token
    }

    pub fn verify(&self, token: &str) -> bool {
        self.tokens.read().contains_key(token)
    }

    /// 令牌所属主体
    pub fn subject(&self, token: &str) -> Option<String> {
        self.tokens.read().get(token).cloned()
    }

    /// 撤销令牌，返回令牌此前是否有效
    pub fn revoke(&self, token: &str) -> bool {
        self.tokens.write().remove(token).is_some()
    }

    pub fn clear(&self) {
        self.tokens.write().clear();
    }

    pub fn len(&self) -> usize {
        self.tokens.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_verify() {
        let store = TokenStore::new();
        let token = store.issue("alice");

        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(store.verify(&token));
        assert_eq!(store.subject(&token).as_deref(), Some("alice"));
        assert!(!store.verify("forged"));
    }

    #[test]
    fn test_tokens_are_unique() {
        let store = TokenStore::new();
        let a = store.issue("alice");
        let b = store.issue("alice");
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_revoke_and_clear() {
        let store = TokenStore::new();
        let a = store.issue("alice");
        let b = store.issue("bob");

        assert!(store.revoke(&a));
        assert!(!store.revoke(&a));
        assert!(!store.verify(&a));
        assert!(store.verify(&b));

        store.clear();
        assert!(store.is_empty());
    }
}
