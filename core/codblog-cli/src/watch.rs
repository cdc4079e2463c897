use std::sync::Arc;

use codblog_core::guard::LOGIN_NOTICE;
use codblog_core::{AlertKind, ChannelAlerts, Result, SessionContext, SessionState, WsConnector};

use crate::notifications::require_user;

/// Prints alerts and unread-count changes until Ctrl-C or until the session
/// ends. The channel and the periodic refresh are torn down on every exit.
pub async fn run(context: &SessionContext) -> Result<()> {
    let user = require_user(context).await?;

    let (alerts, mut alert_rx) = ChannelAlerts::new();
    let channel = context.notification_channel(Arc::new(WsConnector), Arc::new(alerts))?;

    match channel.resync_unread(context.gateway(), user.id).await {
        Ok(unread) => println!("Watching notifications for {} (unread: {})", user.username, unread),
        Err(err) => {
            tracing::warn!(error = %err, "Unread resync failed; waiting for the channel");
            println!("Watching notifications for {}", user.username);
        }
    }

    let mut unread_rx = context.unread().subscribe();
    let mut session_rx = context.session().subscribe();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            Some(alert) = alert_rx.recv() => {
                println!("{} {}", symbol(alert.kind), alert.message);
            }
            Ok(()) = unread_rx.changed() => {
                println!("unread: {}", *unread_rx.borrow_and_update());
            }
            changed = session_rx.changed() => {
                let ended = changed.is_err()
                    || *session_rx.borrow_and_update() == SessionState::Unauthenticated;
                if ended {
                    eprintln!("{}", LOGIN_NOTICE);
                    break;
                }
            }
        }
    }

    channel.teardown();
    Ok(())
}

fn symbol(kind: AlertKind) -> &'static str {
    match kind {
        AlertKind::Like => "♥",
        AlertKind::Comment => "✎",
        AlertKind::Follow => "+",
        AlertKind::Other => "•",
    }
}
