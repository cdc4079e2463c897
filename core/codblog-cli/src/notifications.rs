use std::time::Duration;

use codblog_core::notifications::{
    describe, mark_all_read as mark_all_read_locally, NotificationSummary, NotificationTab,
};
use codblog_core::{CoreError, GuardDecision, NotificationsApi, Result, SessionContext};
use codblog_protocol::{NotificationAction, UserIdentity};

/// Minimum remaining lifetime of the access credential before a request.
const REQUEST_MARGIN: Duration = Duration::from_secs(60);

/// Resolves the session through the route guard and makes sure the access
/// credential will outlive the next request.
pub async fn require_user(context: &SessionContext) -> Result<UserIdentity> {
    context.start().await;
    match context.route_guard().resolve().await {
        GuardDecision::Render => {}
        GuardDecision::Redirect { notice, .. } => {
            if let Some(notice) = notice {
                eprintln!("{}", notice);
            }
            return Err(CoreError::NotAuthenticated);
        }
        GuardDecision::Loading => return Err(CoreError::NotAuthenticated),
    }

    context.session().fresh_access_token(REQUEST_MARGIN).await?;
    context.session().user().ok_or(CoreError::NotAuthenticated)
}

pub async fn list(context: &SessionContext, tab: NotificationTab) -> Result<()> {
    let user = require_user(context).await?;
    let list = context.gateway().list_notifications(user.id).await?;
    let summary = NotificationSummary::from_records(&list.notification_data);

    let tabs: Vec<String> = NotificationTab::ALL
        .iter()
        .map(|t| {
            let label = format!("{} ({})", t.label(), summary.tab_count(*t));
            if *t == tab {
                format!("[{}]", label)
            } else {
                label
            }
        })
        .collect();
    println!("{}   unread: {}", tabs.join("  "), summary.unread);

    for record in tab.filter(&list.notification_data) {
        let marker = if record.is_read { ' ' } else { '*' };
        let when = record
            .created_at
            .map(|at| at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!("{} #{:<6} {:<16} {}", marker, record.id, when, describe(record));
        if let Some(comment) = record.comment_content.as_deref() {
            println!("           \"{}\"", comment);
        }
    }
    Ok(())
}

pub async fn act(context: &SessionContext, id: u64, action: NotificationAction) -> Result<()> {
    require_user(context).await?;
    context.gateway().notification_action(id, action).await?;
    let verb = match action {
        NotificationAction::MarkRead => "marked read",
        NotificationAction::MarkUnread => "marked unread",
        NotificationAction::Delete => "deleted",
    };
    println!("Notification #{} {}", id, verb);
    Ok(())
}

pub async fn mark_all_read(context: &SessionContext) -> Result<()> {
    let user = require_user(context).await?;
    let mut records = context
        .gateway()
        .list_notifications(user.id)
        .await?
        .notification_data;

    let mut marked = 0;
    for record in records.iter().filter(|record| !record.is_read) {
        context
            .gateway()
            .notification_action(record.id, NotificationAction::MarkRead)
            .await?;
        marked += 1;
    }
    mark_all_read_locally(context.unread(), &mut records);
    println!("Marked {} notification(s) read", marked);
    Ok(())
}
