//! Password prompting.
//!
//! On a terminal the password is read without echo. When stdin is piped (as in
//! scripts and tests) each password is simply the next line of input.

use std::io::{self, BufRead, IsTerminal, Write};

use anyhow::{bail, Context, Result};

/// Ask for an existing password.
pub fn read_password(prompt: &str) -> Result<String> {
    if io::stdin().is_terminal() {
        rpassword::prompt_password(prompt).context("reading password")
    } else {
        read_piped_line(prompt)
    }
}

/// Ask for a new password twice until both entries match and are non-empty.
///
/// Piped input gets one attempt, since a mismatch there would loop forever.
pub fn read_new_password() -> Result<String> {
    let interactive = io::stdin().is_terminal();
    loop {
        let password = read_password("Enter password below:\n>")?;
        let confirm = read_password("Confirm password below:\n>")?;
        match check_new_password(&password, &confirm) {
            Ok(()) => return Ok(password),
            Err(reason) if interactive => eprintln!("{reason}, try again"),
            Err(reason) => bail!(reason),
        }
    }
}

fn check_new_password(password: &str, confirm: &str) -> std::result::Result<(), &'static str> {
    if password.is_empty() {
        Err("password must not be empty")
    } else if password != confirm {
        Err("passwords do not match")
    } else {
        Ok(())
    }
}

fn read_piped_line(prompt: &str) -> Result<String> {
    let mut stderr = io::stderr();
    write!(stderr, "{prompt}")?;
    stderr.flush()?;
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        bail!("stdin closed while waiting for a password");
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
