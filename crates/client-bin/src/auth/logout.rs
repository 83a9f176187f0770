//! Sign-out command.

use super::print_json;
use crate::app::App;
use serde_json::json;

/// Forget the stored session. Works offline and may be repeated.
pub fn sign_out(app: &App) -> Result<(), Box<dyn std::error::Error>> {
    app.session.sign_out();
    print_json(&json!({ "status": "signed_out" }))?;
    Ok(())
}
