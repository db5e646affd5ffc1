//! Parser for the canonical one-line summary printed by `nlx diagnose`.
//!
//! The line is a run of space separated `KEY=value` tokens; only `NOTES`
//! carries a double-quoted value:
//!
//! ```text
//! DNS_MODE=local-private RESOLVER=192.168.64.2 PIHOLE=running PIHOLE_UPSTREAM=host.docker.internal#5053 CLOUDFLARED=ok PLAINTEXT_DNS=no NOTES="ok"
//! ```
//!
//! Parsing is fail-loud: the tool is expected to emit well-formed lines, so a
//! missing key is reported rather than papered over.

use serde::Deserialize;
use serde::Serialize;

pub const EXPECTED_RESOLVER: &str = "192.168.64.2";

pub const REQUIRED_DIAGNOSE_KEYS: [&str; 5] =
    ["DNS_MODE", "RESOLVER", "PIHOLE", "CLOUDFLARED", "PLAINTEXT_DNS"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiagnoseParseError {
    #[error("diagnose line is missing required field {field}")]
    MissingField { field: &'static str },
    #[error("diagnose line has an unterminated quoted value for {field}")]
    UnterminatedQuote { field: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnoseFields {
    pub dns_mode: String,
    pub resolver: String,
    pub pihole: String,
    pub cloudflared: String,
    pub plaintext_dns: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pihole_upstream: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnoseHealth {
    Healthy,
    Degraded,
    Broken,
}

impl DiagnoseHealth {
    /// Maps the diagnose command's exit status (0 ok, 1 degraded, 2 broken).
    pub fn from_exit_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Healthy),
            1 => Some(Self::Degraded),
            2 => Some(Self::Broken),
            _ => None,
        }
    }

    pub fn exit_code(self) -> i32 {
        match self {
            Self::Healthy => 0,
            Self::Degraded => 1,
            Self::Broken => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Broken => "broken",
        }
    }
}

impl DiagnoseFields {
    /// Recomputes the tool's verdict from the reported fields.
    pub fn health(&self) -> DiagnoseHealth {
        let vpn = self.dns_mode == "vpn-authoritative";
        let broken = (!vpn && self.resolver != EXPECTED_RESOLVER && self.pihole == "missing")
            || self.plaintext_dns == "yes";
        if broken {
            return DiagnoseHealth::Broken;
        }

        let pihole_not_ready = matches!(self.pihole.as_str(), "unknown" | "missing")
            && self.dns_mode == "local-private";
        if (self.cloudflared == "down" && !vpn) || pihole_not_ready || self.resolver == "unknown" {
            return DiagnoseHealth::Degraded;
        }
        DiagnoseHealth::Healthy
    }

    /// `NOTES` is a `;` separated tag list, `ok` when nothing was flagged.
    pub fn note_tags(&self) -> Vec<&str> {
        self.notes
            .split(';')
            .map(str::trim)
            .filter(|tag| !tag.is_empty() && *tag != "ok")
            .collect()
    }

    pub fn render(&self) -> String {
        let mut out = format!(
            "DNS_MODE={} RESOLVER={} PIHOLE={}",
            self.dns_mode, self.resolver, self.pihole
        );
        if let Some(upstream) = &self.pihole_upstream {
            out.push_str(&format!(" PIHOLE_UPSTREAM={upstream}"));
        }
        out.push_str(&format!(
            " CLOUDFLARED={} PLAINTEXT_DNS={} NOTES=\"{}\"",
            self.cloudflared, self.plaintext_dns, self.notes
        ));
        out
    }
}

pub fn parse_diagnose_line(line: &str) -> Result<DiagnoseFields, DiagnoseParseError> {
    let tokens = tokenize(line)?;
    let lookup = |key: &str| {
        tokens
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.clone())
    };
    let required = |key: &'static str| {
        lookup(key).ok_or(DiagnoseParseError::MissingField { field: key })
    };

    Ok(DiagnoseFields {
        dns_mode: required("DNS_MODE")?,
        resolver: required("RESOLVER")?,
        pihole: required("PIHOLE")?,
        cloudflared: required("CLOUDFLARED")?,
        plaintext_dns: required("PLAINTEXT_DNS")?,
        notes: lookup("NOTES").unwrap_or_default(),
        pihole_upstream: lookup("PIHOLE_UPSTREAM"),
    })
}

/// Returns the first line of `text` that looks like a diagnose summary.
pub fn find_diagnose_line(text: &str) -> Option<&str> {
    text.lines()
        .map(str::trim)
        .find(|line| line.starts_with("DNS_MODE="))
}

fn tokenize(line: &str) -> Result<Vec<(String, String)>, DiagnoseParseError> {
    let mut tokens = Vec::new();
    let mut chars = line.trim().chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.peek().is_none() {
            break;
        }

        let mut raw = String::new();
        let mut in_quotes = false;
        while let Some(c) = chars.next_if(|c| in_quotes || !c.is_whitespace()) {
            if c == '"' {
                in_quotes = !in_quotes;
            } else {
                raw.push(c);
            }
        }
        if in_quotes {
            let field = raw.split('=').next().unwrap_or_default().to_string();
            return Err(DiagnoseParseError::UnterminatedQuote { field });
        }

        if let Some((key, value)) = raw.split_once('=') {
            tokens.push((key.to_string(), value.to_string()));
        }
    }

    Ok(tokens)
}
