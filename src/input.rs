use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

#[derive(Debug, PartialEq, Eq)]
pub enum Action {
    Quit,
    DismissError,
    MoveUp,
    MoveDown,
    QuickSelect(usize),
    PullToRefresh,
    Refresh,
    LoadOlder,
    FillGap,
    Abort,
    OpenTrigger,
    ShowDetails,
    Confirm,
    CloseOverlay,
    // Trigger form
    FormNextField,
    FormPrevField,
    FormCycle { forward: bool },
    FormSuggestion { forward: bool },
    FormChar(char),
    FormBackspace,
    FormDelete,
    FormEnter,
    None,
}

/// Which overlay (if any) is currently displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverlayMode {
    #[default]
    None,
    Detail,
    Confirm,
    Alert,
    Trigger,
}

/// Captures the UI state needed to interpret a key press.
#[derive(Debug, Clone, Default)]
pub struct InputContext {
    pub has_error: bool,
    pub is_busy: bool,
    pub overlay: OverlayMode,
}

pub fn map_key(key: KeyEvent, ctx: &InputContext) -> Action {
    if key.kind != KeyEventKind::Press {
        return Action::None;
    }

    // Ctrl+C always quits
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return Action::Quit;
    }

    match ctx.overlay {
        OverlayMode::Trigger => return map_form_key(key),
        OverlayMode::Confirm => {
            return match key.code {
                KeyCode::Char('y' | 'Y') => Action::Confirm,
                KeyCode::Char('n' | 'N' | 'q') | KeyCode::Esc => Action::CloseOverlay,
                _ => Action::None,
            };
        }
        OverlayMode::Alert => {
            return match key.code {
                KeyCode::Enter | KeyCode::Esc | KeyCode::Char('q' | ' ') => Action::CloseOverlay,
                _ => Action::None,
            };
        }
        OverlayMode::Detail => {
            return match key.code {
                KeyCode::Char('q' | 'd') | KeyCode::Esc => Action::CloseOverlay,
                _ => Action::None,
            };
        }
        OverlayMode::None => {}
    }

    match key.code {
        KeyCode::Char('q') => Action::Quit,
        KeyCode::Esc => {
            if ctx.has_error {
                Action::DismissError
            } else {
                Action::Quit
            }
        }
        KeyCode::Up | KeyCode::Char('k') => Action::MoveUp,
        KeyCode::Down | KeyCode::Char('j') => Action::MoveDown,
        KeyCode::Char('r') if !ctx.is_busy => Action::PullToRefresh,
        KeyCode::Char('R') => Action::Refresh,
        KeyCode::Char('m') => Action::LoadOlder,
        KeyCode::Char('g') => Action::FillGap,
        KeyCode::Char('a') => Action::Abort,
        KeyCode::Char('t') => Action::OpenTrigger,
        KeyCode::Char('d') | KeyCode::Enter => Action::ShowDetails,
        KeyCode::Char(c) if c.is_ascii_digit() && c != '0' => {
            Action::QuickSelect((c as u8 - b'0') as usize)
        }
        _ => Action::None,
    }
}

/// Every printable key is text while the form is open.
fn map_form_key(key: KeyEvent) -> Action {
    match key.code {
        KeyCode::Esc => Action::CloseOverlay,
        KeyCode::Tab => Action::FormNextField,
        KeyCode::BackTab => Action::FormPrevField,
        KeyCode::Left => Action::FormCycle { forward: false },
        KeyCode::Right => Action::FormCycle { forward: true },
        KeyCode::Up => Action::FormSuggestion { forward: false },
        KeyCode::Down => Action::FormSuggestion { forward: true },
        KeyCode::Enter => Action::FormEnter,
        KeyCode::Backspace => Action::FormBackspace,
        KeyCode::Delete => Action::FormDelete,
        KeyCode::Char(c)
            if !key
                .modifiers
                .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT) =>
        {
            Action::FormChar(c)
        }
        _ => Action::None,
    }
}
