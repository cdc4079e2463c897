//! Notification list helpers: summary counts, tab filtering, row text.

use codblog_protocol::{NotificationKind, NotificationRecord};

use super::UnreadCount;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotificationSummary {
    pub total: usize,
    pub likes: usize,
    pub comments: usize,
    pub follows: usize,
    pub unread: usize,
}

impl NotificationSummary {
    pub fn from_records(records: &[NotificationRecord]) -> Self {
        records.iter().fold(Self::default(), |mut summary, record| {
            summary.total += 1;
            match record.notification_type {
                NotificationKind::Like => summary.likes += 1,
                NotificationKind::Comment => summary.comments += 1,
                NotificationKind::Follow => summary.follows += 1,
                NotificationKind::Other => {}
            }
            if !record.is_read {
                summary.unread += 1;
            }
            summary
        })
    }

    /// Badge count shown on a tab.
    pub fn tab_count(&self, tab: NotificationTab) -> usize {
        match tab {
            NotificationTab::All => self.total,
            NotificationTab::General => self.likes + self.comments,
            NotificationTab::Followers => self.follows,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotificationTab {
    #[default]
    All,
    /// Likes and comments.
    General,
    Followers,
}

impl NotificationTab {
    pub const ALL: [NotificationTab; 3] = [
        NotificationTab::All,
        NotificationTab::General,
        NotificationTab::Followers,
    ];

    pub fn label(self) -> &'static str {
        match self {
            NotificationTab::All => "All",
            NotificationTab::General => "General",
            NotificationTab::Followers => "Followers",
        }
    }

    pub fn includes(self, kind: NotificationKind) -> bool {
        match self {
            NotificationTab::All => true,
            NotificationTab::General => {
                matches!(kind, NotificationKind::Like | NotificationKind::Comment)
            }
            NotificationTab::Followers => kind == NotificationKind::Follow,
        }
    }

    pub fn filter<'a>(self, records: &'a [NotificationRecord]) -> Vec<&'a NotificationRecord> {
        records
            .iter()
            .filter(|record| self.includes(record.notification_type))
            .collect()
    }
}

/// One-line description of a record, e.g. `bo commented on your post "Ownership"`.
pub fn describe(record: &NotificationRecord) -> String {
    let title = record.post_title.as_deref().unwrap_or("");
    let action = match record.notification_type {
        NotificationKind::Like => format!("liked your post \"{}\"", title),
        NotificationKind::Comment => format!("commented on your post \"{}\"", title),
        NotificationKind::Follow => "started following you".to_string(),
        NotificationKind::Other => "sent you a notification".to_string(),
    };
    format!("{} {}", record.sender.username, action)
}

/// Marks every record read locally and zeroes the unread counter.
pub fn mark_all_read(unread: &UnreadCount, records: &mut [NotificationRecord]) {
    for record in records.iter_mut() {
        record.is_read = true;
    }
    unread.reset();
}
