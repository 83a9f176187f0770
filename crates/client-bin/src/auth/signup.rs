//! Sign-up command.

use super::print_json;
use crate::app::App;
use client_auth::SignUpRequest;
use tracing::warn;

/// Register an account. The acknowledgment is printed; no session is created.
pub async fn sign_up(
    app: &App,
    email: String,
    password: String,
    name: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut request = SignUpRequest::new(email, password);
    request.name = name;

    let ack = app.session.sign_up(&request).await?;
    if ack.offline {
        warn!("API unreachable; sign-up recorded locally only");
    }
    print_json(&ack)?;
    Ok(())
}
