//! Credential input: flags and environment first, then an interactive prompt.

use std::io::{self, Write};

use anyhow::{bail, Result};

/// Environment variable pre-filling the username
pub const ENV_USERNAME: &str = "RAGDESK_USERNAME";

/// Environment variable supplying the password non-interactively
pub const ENV_PASSWORD: &str = "RAGDESK_PASSWORD";

/// Pick the username from the flag, the environment, or a prompt
/// offering the last username as default.
pub fn username(flag: Option<String>, last_username: Option<&str>) -> Result<String> {
    if let Some(name) = flag.or_else(|| std::env::var(ENV_USERNAME).ok()) {
        return Ok(name);
    }

    match last_username {
        Some(last) => print!("Username [{}]: ", last),
        None => print!("Username: "),
    }
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(choose_username(input.trim(), last_username))
}

fn choose_username(input: &str, last_username: Option<&str>) -> String {
    match (input.is_empty(), last_username) {
        (true, Some(last)) => last.to_string(),
        _ => input.to_string(),
    }
}

pub fn password() -> Result<String> {
    if let Ok(password) = std::env::var(ENV_PASSWORD) {
        return Ok(password);
    }
    Ok(rpassword::prompt_password("Password: ")?)
}

/// Password for a new account, typed twice when interactive
pub fn new_password() -> Result<String> {
    if let Ok(password) = std::env::var(ENV_PASSWORD) {
        return Ok(password);
    }
    let first = rpassword::prompt_password("Password: ")?;
    let second = rpassword::prompt_password("Confirm password: ")?;
    if first != second {
        bail!("Passwords do not match");
    }
    Ok(first)
}
