use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

/// How printable keys should be read in the current mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyContext {
    /// Letters are shortcuts (`hjkl`, `/`).
    Navigation,
    /// Letters are text for a line buffer or search prompt.
    TextEntry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Msg {
    Quit,
    Submit,
    Cancel,
    Up,
    Down,
    Left,
    Right,
    PageUp,
    PageDown,
    Home,
    End,
    Tab,
    BackTab,
    Input(char),
    Backspace,
    Delete,
    Newline,
    Refresh,
    ToggleLayout,
    OpenQuery,
    NewItem,
    DeleteItem,
    Reload,
    StartSearch,
    Tick,
}

pub fn map_key_event(key: KeyEvent, context: KeyContext) -> Option<Msg> {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return match key.code {
            KeyCode::Char('x' | 'c') => Some(Msg::Quit),
            KeyCode::Char('q') => Some(Msg::OpenQuery),
            KeyCode::Char('n') => Some(Msg::NewItem),
            KeyCode::Char('d') => Some(Msg::DeleteItem),
            KeyCode::Char('r') => Some(Msg::Reload),
            KeyCode::Char('j') => Some(Msg::Newline),
            _ => None,
        };
    }

    match key.code {
        KeyCode::Enter => Some(Msg::Submit),
        KeyCode::Esc => Some(Msg::Cancel),
        KeyCode::Up => Some(Msg::Up),
        KeyCode::Down => Some(Msg::Down),
        KeyCode::Left => Some(Msg::Left),
        KeyCode::Right => Some(Msg::Right),
        KeyCode::PageUp => Some(Msg::PageUp),
        KeyCode::PageDown => Some(Msg::PageDown),
        KeyCode::Home => Some(Msg::Home),
        KeyCode::End => Some(Msg::End),
        KeyCode::Tab => Some(Msg::Tab),
        KeyCode::BackTab => Some(Msg::BackTab),
        KeyCode::Backspace => Some(Msg::Backspace),
        KeyCode::Delete => Some(Msg::Delete),
        KeyCode::F(5) => Some(Msg::Refresh),
        KeyCode::F(2) => Some(Msg::ToggleLayout),
        KeyCode::Char(ch) => match context {
            KeyContext::TextEntry => Some(Msg::Input(ch)),
            KeyContext::Navigation => match ch {
                'k' => Some(Msg::Up),
                'j' => Some(Msg::Down),
                'h' => Some(Msg::Left),
                'l' => Some(Msg::Right),
                '/' => Some(Msg::StartSearch),
                ' ' => Some(Msg::Input(' ')),
                _ => None,
            },
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

    use super::{map_key_event, KeyContext, Msg};

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn ctrl(ch: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(ch), KeyModifiers::CONTROL)
    }

    #[test]
    fn control_shortcuts_work_in_every_context() {
        for context in [KeyContext::Navigation, KeyContext::TextEntry] {
            assert_eq!(map_key_event(ctrl('x'), context), Some(Msg::Quit));
            assert_eq!(map_key_event(ctrl('q'), context), Some(Msg::OpenQuery));
            assert_eq!(map_key_event(ctrl('n'), context), Some(Msg::NewItem));
            assert_eq!(map_key_event(ctrl('d'), context), Some(Msg::DeleteItem));
            assert_eq!(map_key_event(ctrl('r'), context), Some(Msg::Reload));
            assert_eq!(map_key_event(ctrl('j'), context), Some(Msg::Newline));
        }
    }

    #[test]
    fn letters_navigate_only_outside_text_entry() {
        assert_eq!(
            map_key_event(key(KeyCode::Char('j')), KeyContext::Navigation),
            Some(Msg::Down)
        );
        assert_eq!(
            map_key_event(key(KeyCode::Char('j')), KeyContext::TextEntry),
            Some(Msg::Input('j'))
        );
        assert_eq!(
            map_key_event(key(KeyCode::Char('/')), KeyContext::Navigation),
            Some(Msg::StartSearch)
        );
        assert_eq!(
            map_key_event(key(KeyCode::Char('z')), KeyContext::Navigation),
            None
        );
    }

    #[test]
    fn function_and_editing_keys_are_mapped() {
        assert_eq!(
            map_key_event(key(KeyCode::F(5)), KeyContext::Navigation),
            Some(Msg::Refresh)
        );
        assert_eq!(
            map_key_event(key(KeyCode::F(2)), KeyContext::Navigation),
            Some(Msg::ToggleLayout)
        );
        assert_eq!(
            map_key_event(key(KeyCode::Enter), KeyContext::TextEntry),
            Some(Msg::Submit)
        );
        assert_eq!(
            map_key_event(key(KeyCode::Esc), KeyContext::TextEntry),
            Some(Msg::Cancel)
        );
        assert_eq!(
            map_key_event(key(KeyCode::Backspace), KeyContext::TextEntry),
            Some(Msg::Backspace)
        );
    }
}
