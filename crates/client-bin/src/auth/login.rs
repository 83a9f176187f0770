//! Sign-in commands.

use super::print_json;
use crate::app::App;
use client_auth::{AuthResult, ExchangeTransport, User};
use serde_json::json;
use tracing::info;

fn print_signed_in(app: &App, user: &User) -> Result<(), Box<dyn std::error::Error>> {
    print_json(&json!({
        "status": "signed_in",
        "user": user,
        "storage": app.paths.storage_file(),
    }))?;
    Ok(())
}

fn finish(app: &App, result: AuthResult<User>) -> Result<(), Box<dyn std::error::Error>> {
    let user = result?;
    info!(user_id = ?user.id, "Signed in");
    print_signed_in(app, &user)
}

/// Sign in with email and password.
pub async fn sign_in(app: &App, email: &str, password: &str) -> Result<(), Box<dyn std::error::Error>> {
    app.session.hydrate().await;
    let result = app.session.sign_in(email, password).await;
    finish(app, result)
}

/// Sign in with an identity token.
pub async fn exchange(
    app: &App,
    via: ExchangeTransport,
    id_token: &str,
    lang: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    app.session.hydrate().await;
    let result = app.session.sign_in_with_exchange(via, id_token, lang).await;
    finish(app, result)
}
