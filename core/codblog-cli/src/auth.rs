use codblog_core::{CoreError, Result, SessionContext, SessionState};

use crate::notifications::require_user;

pub async fn login(context: &SessionContext, email: &str, password: &str) -> Result<()> {
    let user = context.login(email, password).await?;
    println!("Signed in as {} (id {})", user.username, user.id);
    Ok(())
}

pub async fn register(
    context: &SessionContext,
    username: &str,
    email: &str,
    password: &str,
) -> Result<()> {
    context
        .gateway()
        .register(username, email, password, password)
        .await?;
    println!("Account created for {}. Sign in with `codblog login`.", username);
    Ok(())
}

pub async fn logout(context: &SessionContext) -> Result<()> {
    match context.logout().await {
        Ok(()) => println!("Signed out"),
        // Local credentials are already gone at this point.
        Err(err) => println!("Signed out locally (server logout failed: {})", err),
    }
    Ok(())
}

pub async fn whoami(context: &SessionContext) -> Result<()> {
    require_user(context).await?;
    let user = context.gateway().get_user().await?;
    match user.email.as_deref() {
        Some(email) => println!("{} <{}> (id {})", user.username, email, user.id),
        None => println!("{} (id {})", user.username, user.id),
    }
    Ok(())
}

pub async fn status(context: &SessionContext) -> Result<()> {
    let state = context.start().await;
    let status = serde_json::json!({
        "state": state,
        "user": context.session().user().map(|user| serde_json::json!({
            "id": user.id,
            "username": user.username,
        })),
        "api_base_url": context.config().api_base_url,
        "ws_base_url": context.config().ws_base_url,
    });
    println!("{:#}", status);

    if state == SessionState::Authenticated {
        Ok(())
    } else {
        Err(CoreError::NotAuthenticated)
    }
}
