//! Keyboard shortcut reducer.
//!
//! The only state is the timestamp of a pending `g` press. The caller owns it
//! and threads it through every call; expiry is recomputed from `now_ms` on
//! each evaluation instead of by a timer.

use serde::Deserialize;
use serde::Serialize;

use crate::config::ShortcutConfig;
use crate::url_state::DashboardView;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortcutState {
    pub go_prefix_at: Option<i64>,
}

impl ShortcutState {
    fn reset(&mut self) {
        self.go_prefix_at = None;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Escape,
    Named(String),
}

impl Key {
    /// Maps a DOM `KeyboardEvent.key` value.
    pub fn parse(raw: &str) -> Self {
        let mut chars = raw.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Self::Char(c),
            _ if raw == "Escape" || raw == "Esc" => Self::Escape,
            _ => Self::Named(raw.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPress {
    pub key: Key,
    pub meta: bool,
    pub ctrl: bool,
    pub alt: bool,
}

impl KeyPress {
    pub fn plain(key: Key) -> Self {
        Self {
            key,
            meta: false,
            ctrl: false,
            alt: false,
        }
    }

    pub fn has_modifier(&self) -> bool {
        self.meta || self.ctrl || self.alt
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShortcutContext {
    pub help_open: bool,
    /// Focus is inside a text input, textarea or contenteditable.
    pub typing_target: bool,
    pub view: DashboardView,
    pub has_search_input: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShortcutAction {
    OpenHelp,
    CloseHelp,
    FocusSearch,
    ViewDashboard,
    ViewTasks,
    ViewOutput,
}

impl ShortcutAction {
    pub fn target_view(self) -> Option<DashboardView> {
        match self {
            Self::ViewDashboard => Some(DashboardView::Dashboard),
            Self::ViewTasks => Some(DashboardView::Tasks),
            Self::ViewOutput => Some(DashboardView::Output),
            Self::OpenHelp | Self::CloseHelp | Self::FocusSearch => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Shortcuts {
    config: ShortcutConfig,
}

impl Shortcuts {
    pub fn new(config: ShortcutConfig) -> Self {
        Self { config }
    }

    pub fn evaluate(
        &self,
        state: &mut ShortcutState,
        press: &KeyPress,
        context: &ShortcutContext,
        now_ms: i64,
    ) -> Option<ShortcutAction> {
        if let Some(armed_at) = state.go_prefix_at {
            if now_ms.saturating_sub(armed_at) > self.config.go_prefix_timeout_ms {
                state.reset();
            }
        }

        if context.help_open {
            if press.key == Key::Escape {
                state.reset();
                return Some(ShortcutAction::CloseHelp);
            }
            return None;
        }
        if press.has_modifier() || context.typing_target {
            return None;
        }

        match press.key {
            Key::Char('?') => {
                state.reset();
                return Some(ShortcutAction::OpenHelp);
            }
            Key::Char('/') if context.view == DashboardView::Output && context.has_search_input => {
                state.reset();
                return Some(ShortcutAction::FocusSearch);
            }
            Key::Char('g') => {
                state.go_prefix_at = Some(now_ms);
                return None;
            }
            _ => {}
        }

        if state.go_prefix_at.is_none() {
            return None;
        }
        // Any key while the prefix is armed consumes it.
        state.reset();
        match press.key {
            Key::Char('d') => Some(ShortcutAction::ViewDashboard),
            Key::Char('t') => Some(ShortcutAction::ViewTasks),
            Key::Char('o') => Some(ShortcutAction::ViewOutput),
            _ => None,
        }
    }
}

/// Evaluates one key press with the default go-prefix timeout.
pub fn evaluate_shortcut(
    state: &mut ShortcutState,
    press: &KeyPress,
    context: &ShortcutContext,
    now_ms: i64,
) -> Option<ShortcutAction> {
    Shortcuts::default().evaluate(state, press, context, now_ms)
}

#[cfg(test)]
mod tests;
