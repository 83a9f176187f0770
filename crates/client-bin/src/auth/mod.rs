//! Authentication commands.
//!
//! Each command prints its result as pretty JSON on stdout.

mod login;
mod logout;
mod signup;
mod status;

pub use login::{exchange, sign_in};
pub use logout::sign_out;
pub use signup::sign_up;
pub use status::{status, whoami};

use serde::Serialize;

fn print_json<T: Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
