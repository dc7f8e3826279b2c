use crate::sync::SyncState;

const BRAILLE_FRAMES: &[char] = &['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];

pub fn frame(idx: usize) -> char {
    BRAILLE_FRAMES[idx % BRAILLE_FRAMES.len()]
}

/// Word shown next to the spinner while a request is in flight.
pub fn activity_label(state: &SyncState) -> Option<String> {
    match state {
        SyncState::Idle => None,
        SyncState::FetchingInitial => Some("loading".to_string()),
        SyncState::FetchingNewer => Some("checking for new builds".to_string()),
        SyncState::FetchingOlder => Some("loading older".to_string()),
        SyncState::AbortingBuild(slug) => Some(format!("aborting {slug}")),
    }
}
