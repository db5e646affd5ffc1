//! Secret redaction applied to every piece of run output before it is shown or
//! persisted.
//!
//! Rules form a registry: each rule is a pattern plus the placeholder written
//! over the match. A rule whose pattern has a `secret` capture group only
//! replaces that group (so `WEBPASSWORD=hunter2` becomes
//! `WEBPASSWORD=[REDACTED]`); otherwise the whole match is replaced. Matches are
//! never replaced partially.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Captures;
use regex::Regex;

use crate::config::RedactionConfig;
use crate::config::DEFAULT_TOKEN_MIN_LENGTH;
use crate::config::REDACTION_PLACEHOLDER;

/// Paths whose segments are all shorter than this read as paths, not tokens.
const PATH_SEGMENT_MAX: usize = 24;

// Built-in patterns are literals; only operator-supplied patterns can fail.
static DEFAULT_REDACTOR: LazyLock<Redactor> = LazyLock::new(|| Redactor {
    rules: vec![
        RedactionRule::builtin(
            "password_assignment",
            r#"(?i)[A-Z0-9_.-]*PASSWORD[A-Z0-9_.-]*[ \t]*=[ \t]*(?P<secret>(?:"[^"\n]*"|'[^'\n]*'|\S)+)"#,
            None,
        ),
        RedactionRule::builtin(
            "credential_path",
            r"(?i)[\w.~@/\\-]*credential[\w.~@/\\-]*",
            Some(MatchGuard::Path),
        ),
        RedactionRule::builtin(
            "long_token",
            r"[A-Za-z0-9_\-+/.]+={0,2}",
            Some(MatchGuard::Token {
                min_length: DEFAULT_TOKEN_MIN_LENGTH,
            }),
        ),
    ],
});

#[derive(Debug, thiserror::Error)]
pub enum RedactionError {
    #[error("invalid redaction pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Extra check a candidate match must pass before it is replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchGuard {
    Path,
    Token { min_length: usize },
}

impl MatchGuard {
    fn admits(self, candidate: &str) -> bool {
        match self {
            Self::Path => candidate.contains('/') || candidate.contains('\\'),
            Self::Token { min_length } => {
                candidate.chars().count() >= min_length && looks_like_token(candidate)
            }
        }
    }
}

/// Hex runs always count. Anything else must not read as a path, a rule of
/// punctuation, or a plain word.
fn looks_like_token(candidate: &str) -> bool {
    let total = candidate.chars().count();
    let alphanumeric = candidate.chars().filter(char::is_ascii_alphanumeric).count();
    if alphanumeric * 4 < total * 3 {
        return false;
    }
    if candidate.chars().all(|c| c.is_ascii_hexdigit()) {
        return true;
    }
    // base64 alphabet or padding
    if candidate.contains(['+', '=']) {
        return true;
    }
    if looks_like_path(candidate) {
        return false;
    }
    if candidate.chars().any(|c| c.is_ascii_digit()) {
        return true;
    }
    !is_plain_word(candidate)
}

fn looks_like_path(candidate: &str) -> bool {
    let mut segments = candidate.split('/').filter(|segment| !segment.is_empty());
    let short = |segment: &str| segment.len() < PATH_SEGMENT_MAX;
    match (segments.next(), segments.next()) {
        (Some(first), Some(second)) => short(first) && short(second) && segments.all(short),
        _ => false,
    }
}

/// Every alphabetic run is lower case, upper case or capitalized.
fn is_plain_word(candidate: &str) -> bool {
    candidate
        .split(|c: char| !c.is_ascii_alphabetic())
        .all(|part| {
            part.chars().all(|c| c.is_ascii_uppercase())
                || part.chars().skip(1).all(|c| c.is_ascii_lowercase())
        })
}

#[derive(Debug, Clone)]
pub struct RedactionRule {
    name: String,
    pattern: Regex,
    placeholder: String,
    guard: Option<MatchGuard>,
}

impl RedactionRule {
    pub fn new(
        name: impl Into<String>,
        pattern: &str,
        placeholder: impl Into<String>,
    ) -> Result<Self, RedactionError> {
        let pattern = Regex::new(pattern).map_err(|source| RedactionError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            name: name.into(),
            pattern,
            placeholder: placeholder.into(),
            guard: None,
        })
    }

    fn builtin(name: &str, pattern: &str, guard: Option<MatchGuard>) -> Self {
        Self {
            name: name.to_string(),
            pattern: Regex::new(pattern).expect("built-in redaction pattern is a valid literal"),
            placeholder: REDACTION_PLACEHOLDER.to_string(),
            guard,
        }
    }

    /// Copy of a built-in rule with the configured placeholder and threshold.
    fn configured(&self, config: &RedactionConfig) -> Self {
        let guard = match self.guard {
            Some(MatchGuard::Token { .. }) => Some(MatchGuard::Token {
                min_length: config.token_min_length.max(1),
            }),
            other => other,
        };
        Self {
            name: self.name.clone(),
            pattern: self.pattern.clone(),
            placeholder: config.placeholder.clone(),
            guard,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn apply<'t>(&self, text: &'t str) -> (Cow<'t, str>, bool) {
        let mut fired = false;
        let out = self.pattern.replace_all(text, |caps: &Captures<'_>| {
            let Some(whole) = caps.get(0) else {
                return String::new();
            };
            if let Some(guard) = self.guard {
                if !guard.admits(whole.as_str()) {
                    return whole.as_str().to_string();
                }
            }
            fired = true;
            match caps.name("secret") {
                Some(secret) => {
                    let head = &text[whole.start()..secret.start()];
                    let tail = &text[secret.end()..whole.end()];
                    format!("{head}{}{tail}", self.placeholder)
                }
                None => self.placeholder.clone(),
            }
        });
        (out, fired)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redacted {
    pub text: String,
    /// True iff the output differs from the input.
    pub changed: bool,
}

#[derive(Debug, Clone)]
pub struct Redactor {
    rules: Vec<RedactionRule>,
}

impl Default for Redactor {
    fn default() -> Self {
        DEFAULT_REDACTOR.clone()
    }
}

impl Redactor {
    /// Built-in rules with the configured placeholder and token threshold,
    /// followed by `extra_patterns`. Only the extra patterns can fail.
    pub fn from_config(config: &RedactionConfig) -> Result<Self, RedactionError> {
        let mut rules: Vec<RedactionRule> = DEFAULT_REDACTOR
            .rules
            .iter()
            .map(|rule| rule.configured(config))
            .collect();
        for (index, pattern) in config.extra_patterns.iter().enumerate() {
            rules.push(RedactionRule::new(
                format!("extra_{index}"),
                pattern,
                config.placeholder.as_str(),
            )?);
        }
        Ok(Self { rules })
    }

    pub fn with_rule(mut self, rule: RedactionRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[RedactionRule] {
        &self.rules
    }

    pub fn redact(&self, text: &str) -> Redacted {
        let mut current = text.to_string();
        let mut fired = Vec::new();
        for rule in &self.rules {
            let (next, hit) = rule.apply(&current);
            if hit {
                fired.push(rule.name());
                current = next.into_owned();
            }
        }
        let changed = current != text;
        if changed {
            tracing::debug!(rules = ?fired, "redacted run output");
        }
        Redacted {
            text: current,
            changed,
        }
    }
}

/// Redacts with the built-in rule set.
pub fn redact_text(text: &str) -> Redacted {
    DEFAULT_REDACTOR.redact(text)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn password_values_are_replaced_whole() {
        let out = redact_text("docker run -e WEBPASSWORD=topsecret -e TZ=UTC pihole");
        assert!(out.changed);
        assert_eq!(out.text, "docker run -e WEBPASSWORD=[REDACTED] -e TZ=UTC pihole");
    }

    #[test]
    fn password_keys_match_case_insensitively_and_quoted_values() {
        let out = redact_text("db_password=\"two words\" next");
        assert_eq!(out.text, "db_password=[REDACTED] next");
        assert!(!out.text.contains("two"));
    }

    #[test]
    fn long_tokens_are_replaced() {
        let token = "a1b2c3d4e5f60718293a4b5c6d7e8f90a1b2c3d4";
        let out = redact_text(&format!("tunnel token {token} accepted"));
        assert!(out.changed);
        assert_eq!(out.text, "tunnel token [REDACTED] accepted");
    }

    #[test]
    fn short_or_plain_words_are_left_alone() {
        let text = "cloudflared ok; resolver 192.168.64.2; supercalifragilisticexpialidociouswords";
        let out = redact_text(text);
        assert!(!out.changed);
        assert_eq!(out.text, text);
    }

    #[test]
    fn credential_paths_are_replaced() {
        let out = redact_text("reading /Users/ops/.cloudflared/credentials.json now");
        assert_eq!(out.text, "reading [REDACTED] now");

        let out = redact_text("see ~/.aws/Credentials");
        assert_eq!(out.text, "see [REDACTED]");
    }

    #[test]
    fn bare_credential_word_is_not_a_path() {
        let out = redact_text("missing credentials for tunnel");
        assert!(!out.changed);
    }

    #[test]
    fn token_threshold_is_configurable() {
        let redactor = Redactor::from_config(&RedactionConfig {
            token_min_length: 12,
            ..RedactionConfig::default()
        })
        .expect("rules");
        assert_eq!(redactor.redact("key abc123def456").text, "key [REDACTED]");
        assert!(!redact_text("key abc123def456").changed);
    }

    #[test]
    fn extra_patterns_and_placeholder_come_from_config() {
        let redactor = Redactor::from_config(&RedactionConfig {
            placeholder: "***".to_string(),
            extra_patterns: vec![r"(?i)bearer\s+(?P<secret>\S+)".to_string()],
            ..RedactionConfig::default()
        })
        .expect("rules");
        assert_eq!(redactor.redact("Authorization: Bearer abc").text, "Authorization: Bearer ***");
        assert_eq!(redactor.rules().len(), 4);
    }

    #[test]
    fn invalid_extra_pattern_is_an_error() {
        let err = Redactor::from_config(&RedactionConfig {
            extra_patterns: vec!["(".to_string()],
            ..RedactionConfig::default()
        })
        .expect_err("invalid");
        assert!(matches!(err, RedactionError::InvalidPattern { .. }));
    }

    #[test]
    fn custom_rules_extend_the_registry() {
        let redactor = Redactor::default().with_rule(
            RedactionRule::new("pihole_api", r"api_token=(?P<secret>\S+)", "<hidden>")
                .expect("rule"),
        );
        let out = redactor.redact("GET /admin/api.php?api_token=abc");
        assert_eq!(out.text, "GET /admin/api.php?api_token=<hidden>");
        assert_eq!(redactor.rules().last().map(RedactionRule::name), Some("pihole_api"));
    }

    #[test]
    fn already_redacted_text_reports_no_change() {
        let out = redact_text("WEBPASSWORD=[REDACTED]");
        assert!(!out.changed);
    }

    #[test]
    fn quotes_inside_unquoted_passwords_do_not_end_the_value() {
        for (input, expected) in [
            ("WEBPASSWORD=top\"secret9", "WEBPASSWORD=[REDACTED]"),
            ("PASSWORD=it'ssecret9 done", "PASSWORD=[REDACTED] done"),
            ("DB_PASSWORD=ab\"cd ef\"", "DB_PASSWORD=[REDACTED]"),
        ] {
            let out = redact_text(input);
            assert_eq!(out.text, expected, "{input}");
        }
    }

    #[test]
    fn empty_password_does_not_reach_the_next_line() {
        let text = "WEBPASSWORD=\nnext_line_value ok";
        let out = redact_text(text);
        assert!(!out.changed);
        assert_eq!(out.text, text);
    }

    #[test]
    fn hex_tokens_without_digits_are_replaced() {
        let out = redact_text("token deadbeefdeadbeefdeadbeefdeadbeefcafe");
        assert_eq!(out.text, "token [REDACTED]");
    }

    #[test]
    fn base64_keys_are_replaced_whole() {
        let out = redact_text("key sk-AbCdEfGhIjKlMnOpQrStUvWx/Yz0123+456789abcdEFGH== loaded");
        assert_eq!(out.text, "key [REDACTED] loaded");
    }

    #[test]
    fn bearer_jwt_is_replaced_as_one_span() {
        let jwt = "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9.eyJzdWIiOiIxMjM0NTY3ODkwIn0.\
SflKxwRJSMeKKF2QT4fwpMeJf36POk6yJV_adQssw5c";
        let out = redact_text(&format!("Authorization: Bearer {jwt}"));
        assert_eq!(out.text, "Authorization: Bearer [REDACTED]");
        assert!(!out.text.contains("eyJzdWIi"));
    }

    #[test]
    fn mixed_case_letter_tokens_are_replaced() {
        let out = redact_text("secret AbCdEfGhIjKlMnOpQrStUvWxYzAbCdEfGh");
        assert_eq!(out.text, "secret [REDACTED]");
    }

    #[test]
    fn paths_and_separator_rules_are_left_alone() {
        let text = "/usr/local/lib/python3.11/site-packages/nlx/core.py\n\
================================================";
        let out = redact_text(text);
        assert!(!out.changed);
    }

    #[test]
    fn config_changes_placeholder_of_builtin_rules() {
        let redactor = Redactor::from_config(&RedactionConfig {
            placeholder: "<secret>".to_string(),
            ..RedactionConfig::default()
        })
        .expect("rules");
        assert_eq!(
            redactor.redact("WEBPASSWORD=hunter2").text,
            "WEBPASSWORD=<secret>"
        );
        assert_eq!(redactor.rules().len(), Redactor::default().rules().len());
    }
}
