//! 输出脱敏

use std::borrow::Cow;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

/// 脱敏规则
#[derive(Clone, Debug)]
pub struct SanitizeRule {
    pattern: Regex,
    replacement: String,
}

impl SanitizeRule {
    fn new(pattern: Regex, replacement: impl Into<String>) -> Self {
        Self {
            pattern,
            replacement: replacement.into(),
        }
    }
}

/// 输出脱敏器
#[derive(Clone, Debug)]
pub struct OutputSanitizer {
    rules: Vec<SanitizeRule>,
}

fn rule(pattern: &str, replacement: &str) -> SanitizeRule {
    SanitizeRule::new(
        Regex::new(pattern).expect("built-in sanitize pattern must compile"),
        replacement,
    )
}

impl OutputSanitizer {
    /// 默认规则：密码、API Key、Token、私钥、JWT
    pub fn new_default() -> Self {
        Self {
            rules: vec![
                rule(r"(?i)(password|passwd|pwd)[\s=:]+[^\s]+", "$1=***"),
                rule(r"(?i)(api[_-]?key|apikey)[\s=:]+[^\s]+", "$1=***"),
                rule(r"(?i)(token|access[_-]?token|refresh[_-]?token)[\s=:]+[^\s]+", "$1=***"),
                rule(r"(?i)(secret|secret[_-]?key)[\s=:]+[^\s]+", "$1=***"),
                rule(
                    r"-----BEGIN [A-Z ]*PRIVATE KEY-----[\s\S]*?(-----END [A-Z ]*PRIVATE KEY-----|$)",
                    "[private key redacted]",
                ),
                rule(r"eyJ[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+", "eyJ***.***.***"),
            ],
        }
    }

    /// 脱敏一段输出
    pub fn sanitize<'a>(&self, output: &'a str) -> Cow<'a, str> {
        let mut result = Cow::Borrowed(output);
        for rule in &self.rules {
            if rule.pattern.is_match(&result) {
                result = Cow::Owned(
                    rule.pattern
                        .replace_all(&result, rule.replacement.as_str())
                        .into_owned(),
                );
            }
        }
        result
    }

}

static DEFAULT_SANITIZER: Lazy<Arc<OutputSanitizer>> =
    Lazy::new(|| Arc::new(OutputSanitizer::new_default()));

/// 获取默认脱敏器
pub fn default_sanitizer() -> Arc<OutputSanitizer> {
    Arc::clone(&DEFAULT_SANITIZER)
}
