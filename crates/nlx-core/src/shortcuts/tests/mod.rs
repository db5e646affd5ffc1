use pretty_assertions::assert_eq;

pub(super) use super::evaluate_shortcut;
pub(super) use super::Key;
pub(super) use super::KeyPress;
pub(super) use super::ShortcutAction;
pub(super) use super::ShortcutContext;
pub(super) use super::ShortcutState;
pub(super) use super::Shortcuts;
pub(super) use crate::config::ShortcutConfig;
pub(super) use crate::url_state::DashboardView;


fn press(key: char) -> KeyPress {
    KeyPress::plain(Key::Char(key))
}

fn idle() -> ShortcutContext {
    ShortcutContext::default()
}

/// Feeds `(key, at_ms)` presses through one state and collects the actions.
fn replay(
    state: &mut ShortcutState,
    context: &ShortcutContext,
    presses: &[(char, i64)],
) -> Vec<Option<ShortcutAction>> {
    presses
        .iter()
        .map(|(key, at)| evaluate_shortcut(state, &press(*key), context, *at))
        .collect()
}

#[test]
fn dom_key_names_parse() {
    assert_eq!(Key::parse("g"), Key::Char('g'));
    assert_eq!(Key::parse("?"), Key::Char('?'));
    assert_eq!(Key::parse("Escape"), Key::Escape);
    assert_eq!(Key::parse("Esc"), Key::Escape);
    assert_eq!(Key::parse("ArrowUp"), Key::Named("ArrowUp".to_string()));
}

#[test]
fn navigation_actions_name_their_view() {
    assert_eq!(
        ShortcutAction::ViewTasks.target_view(),
        Some(DashboardView::Tasks)
    );
    assert_eq!(ShortcutAction::OpenHelp.target_view(), None);
}
