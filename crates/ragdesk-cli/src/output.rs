//! Terminal presentation of notices.

use ragdesk_core::{Notice, NoticeKind, Notifier};

/// Prints notices to stderr, keeping stdout for command output.
pub struct TerminalNotifier;

impl TerminalNotifier {
    pub fn render(notice: &Notice) -> String {
        let mark = match notice.kind {
            NoticeKind::Success => '✓',
            NoticeKind::Error => '✗',
        };
        format!("{} {}: {}", mark, notice.title, notice.message)
    }
}

impl Notifier for TerminalNotifier {
    fn notify(&self, notice: &Notice) {
        eprintln!("{}", Self::render(notice));
    }
}
