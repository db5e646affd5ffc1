//! Deep-link state carried in the dashboard's query string.
//!
//! Parameters: `view`, `event`, `session`, `compare`, `severity`, `panel`, `q`.
//! Fields equal to their default are never written, so
//! `parse_url_state(&to_url_search(&parse_url_state(s)))` equals
//! `parse_url_state(s)` for any `s`.

use serde::Deserialize;
use serde::Serialize;
use url::form_urlencoded;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DashboardView {
    #[default]
    Dashboard,
    Tasks,
    Output,
}

impl DashboardView {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dashboard => "dashboard",
            Self::Tasks => "tasks",
            Self::Output => "output",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "dashboard" => Some(Self::Dashboard),
            "tasks" => Some(Self::Tasks),
            "output" => Some(Self::Output),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SeverityFilter {
    #[default]
    All,
    Pass,
    Warn,
    Fail,
}

impl SeverityFilter {
    /// Query-string spelling; `None` for the default.
    pub fn alias(self) -> Option<&'static str> {
        match self {
            Self::All => None,
            Self::Pass => Some("info"),
            Self::Warn => Some("warn"),
            Self::Fail => Some("error"),
        }
    }

    pub fn from_alias(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "info" => Self::Pass,
            "warn" => Self::Warn,
            "error" => Self::Fail,
            _ => Self::All,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InspectorSection {
    #[default]
    Summary,
    Events,
    Stdout,
    Stderr,
    Diagnose,
}

impl InspectorSection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::Events => "events",
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
            Self::Diagnose => "diagnose",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "summary" => Some(Self::Summary),
            "events" => Some(Self::Events),
            "stdout" => Some(Self::Stdout),
            "stderr" => Some(Self::Stderr),
            "diagnose" => Some(Self::Diagnose),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UrlStateView {
    pub view: DashboardView,
    pub event_id: Option<String>,
    pub session_id: Option<String>,
    pub compare_session_id: Option<String>,
    pub severity: SeverityFilter,
    pub inspector_section: InspectorSection,
    pub q: String,
}

/// Never fails; unknown or blank parameters fall back to their defaults.
pub fn parse_url_state(search: &str) -> UrlStateView {
    let query = search.trim().trim_start_matches('?');
    let pairs: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    let param = |name: &str| {
        pairs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.trim())
            .filter(|value| !value.is_empty())
    };

    UrlStateView {
        view: param("view")
            .and_then(DashboardView::parse)
            .unwrap_or_default(),
        event_id: param("event").map(str::to_string),
        session_id: param("session").map(str::to_string),
        compare_session_id: param("compare").map(str::to_string),
        severity: param("severity")
            .map(SeverityFilter::from_alias)
            .unwrap_or_default(),
        inspector_section: param("panel")
            .and_then(InspectorSection::parse)
            .unwrap_or_default(),
        q: param("q").map(str::to_string).unwrap_or_default(),
    }
}

/// Canonical search string (with leading `?`), empty when every field is default.
pub fn to_url_search(state: &UrlStateView) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    let mut written = false;
    let mut append = |key: &str, value: &str| {
        serializer.append_pair(key, value);
        written = true;
    };

    if state.view != DashboardView::default() {
        append("view", state.view.as_str());
    }
    for (key, value) in [
        ("event", &state.event_id),
        ("session", &state.session_id),
        ("compare", &state.compare_session_id),
    ] {
        if let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            append(key, value);
        }
    }
    if let Some(alias) = state.severity.alias() {
        append("severity", alias);
    }
    if state.inspector_section != InspectorSection::default() {
        append("panel", state.inspector_section.as_str());
    }
    let q = state.q.trim();
    if !q.is_empty() {
        append("q", q);
    }

    if !written {
        return String::new();
    }
    format!("?{}", serializer.finish())
}
