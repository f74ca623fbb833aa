use std::io::{self, BufRead, Write};

use anyhow::{bail, Context, Result};

/// Asks for one line of input; an empty reply falls back to `default`.
pub(crate) fn prompt_line(
    reader: &mut dyn BufRead,
    label: &str,
    default: Option<&str>,
) -> Result<String> {
    match default {
        Some(default) => print!("{label} [{default}]: "),
        None => print!("{label}: "),
    }
    io::stdout().flush().context("failed to flush stdout")?;

    let mut reply = String::new();
    reader.read_line(&mut reply).context("failed to read input")?;
    let reply = reply.trim();

    if reply.is_empty() {
        Ok(default.unwrap_or_default().to_string())
    } else {
        Ok(reply.to_string())
    }
}

pub(crate) fn prompt_required(reader: &mut dyn BufRead, label: &str) -> Result<String> {
    let reply = prompt_line(reader, label, None)?;
    if reply.is_empty() {
        bail!("a value for {label} is required");
    }
    Ok(reply)
}

pub(crate) fn prompt_confirm(
    reader: &mut dyn BufRead,
    question: &str,
    default_yes: bool,
) -> Result<bool> {
    let suffix = if default_yes { "(Y/n)" } else { "(y/N)" };
    print!("{question} {suffix}: ");
    io::stdout().flush().context("failed to flush stdout")?;

    let mut reply = String::new();
    reader.read_line(&mut reply).context("failed to read input")?;
    Ok(parse_confirm_reply(&reply, default_yes))
}

pub(crate) fn parse_confirm_reply(input: &str, default_yes: bool) -> bool {
    match input.trim().to_ascii_lowercase().as_str() {
        "" => default_yes,
        "y" | "yes" => true,
        _ => false,
    }
}
