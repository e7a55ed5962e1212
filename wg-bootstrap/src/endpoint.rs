// Endpoint directive rewrite

//! Endpoint normalization for served peer configs
//!
//! The `Endpoint` written by the config generator is whatever address the
//! container detected for itself, which is often not what a client can dial.
//! [`rewrite_endpoint`] fixes up the first `Endpoint` directive so that the QR
//! payload is directly usable.

use crate::types::EndpointTarget;

const DIRECTIVE: &str = "Endpoint";

/// Normalize the first `Endpoint` directive in `conf`.
///
/// - With a known public target, the directive becomes `Endpoint = <host>:<port>`.
/// - Otherwise an unbracketed IPv6 literal with a port is wrapped as `[host]:port`.
/// - In every other case `conf` is returned unchanged.
///
/// Only one line is ever modified; leading whitespace of that line is kept.
pub fn rewrite_endpoint(conf: &str, target: Option<&EndpointTarget>) -> String {
    let mut lines: Vec<&str> = conf.split('\n').collect();

    let Some(index) = lines.iter().position(|line| is_endpoint_directive(line)) else {
        return conf.to_string();
    };
    let line = lines[index];

    let replacement = match target {
        Some(target) => format!("{} = {}", DIRECTIVE, target),
        None => match bracket_ipv6(directive_value(line)) {
            Some(value) => format!("{} = {}", DIRECTIVE, value),
            None => return conf.to_string(),
        },
    };

    let indent_len = line.len() - line.trim_start_matches([' ', '\t']).len();
    let cr = if line.ends_with('\r') { "\r" } else { "" };
    let rewritten = format!("{}{}{}", &line[..indent_len], replacement, cr);

    lines[index] = &rewritten;
    lines.join("\n")
}

fn is_endpoint_directive(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with("Endpoint ") || trimmed.starts_with("Endpoint=")
}

/// Text after the keyword, with the `=` separator and surrounding blanks removed
fn directive_value(line: &str) -> &str {
    let trimmed = line.trim();
    trimmed
        .strip_prefix(DIRECTIVE)
        .unwrap_or(trimmed)
        .trim()
        .trim_start_matches([' ', '='])
}

/// `2a02:1234::1:51820` -> `[2a02:1234::1]:51820`
fn bracket_ipv6(value: &str) -> Option<String> {
    if value.matches(':').count() <= 1 || value.contains(['[', ']']) {
        return None;
    }

    let (host, port) = value.rsplit_once(':')?;
    if host.is_empty() || port.is_empty() {
        return None;
    }

    Some(format!("[{}]:{}", host, port))
}
