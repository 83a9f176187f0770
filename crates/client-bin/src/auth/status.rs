//! Session status commands.

use super::print_json;
use crate::app::App;
use serde_json::json;

/// Resolve the stored session and print a snapshot of it.
pub async fn status(app: &App) -> Result<(), Box<dyn std::error::Error>> {
    app.session.hydrate().await;
    let snapshot = app.session.snapshot();
    let credentials = app.session.transport().credentials();

    print_json(&json!({
        "session": snapshot,
        "user_id": credentials.user_id()?,
        "refresh": app.session.transport().refresh_phase(),
    }))?;
    Ok(())
}

/// Fetch the signed-in user, refreshing the access token if needed.
pub async fn whoami(app: &App) -> Result<(), Box<dyn std::error::Error>> {
    if app.session.hydrate().await != client_auth::SessionPhase::Authenticated {
        print_json(&json!({ "status": "anonymous" }))?;
        return Ok(());
    }

    let user = app.session.fetch_current_user().await?;
    print_json(&user)?;
    Ok(())
}
