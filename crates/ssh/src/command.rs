//! Parser for user-supplied `ssh …` command lines.
//!
//! Tokenization is quote-aware (`shlex`), so pasted commands with quoted
//! identity paths parse the way a shell would split them. Only the flags the
//! gateway acts on are interpreted; anything else is logged and skipped so
//! newer client flags do not break older gateways.

use crate::error::SshError;

/// `-L [bind:]port:host:port` — listen locally, dial through the transport.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalForward {
    pub bind_host: Option<String>,
    pub bind_port: u16,
    pub target_host: String,
    pub target_port: u16,
}

/// `-R [bind:]port:host:port` — listen on the peer, dial locally.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteForward {
    pub bind_host: Option<String>,
    pub bind_port: u16,
    pub target_host: String,
    pub target_port: u16,
}

/// `-D [bind:]port` — local SOCKS5 with per-request dial-through.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicForward {
    pub bind_host: Option<String>,
    pub bind_port: u16,
}

/// The parsed command. Fields the command line did not supply stay `None`;
/// callers resolve them from saved hosts or explicit input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SshCommand {
    pub host: Option<String>,
    pub user: Option<String>,
    pub port: Option<u16>,
    pub identity_file: Option<String>,
    pub local_forwards: Vec<LocalForward>,
    pub remote_forwards: Vec<RemoteForward>,
    pub dynamic_forwards: Vec<DynamicForward>,
}

/// Parse a free-form `ssh …` string.
pub fn parse_ssh_command(input: &str) -> Result<SshCommand, SshError> {
    let tokens = shlex::split(input.trim()).ok_or(SshError::NotSshCommand)?;
    let mut iter = tokens.into_iter();

    if iter.next().as_deref() != Some("ssh") {
        return Err(SshError::NotSshCommand);
    }

    let mut cmd = SshCommand::default();
    let mut rest: Vec<String> = iter.collect();
    let mut i = 0;

    while i < rest.len() {
        let token = std::mem::take(&mut rest[i]);
        i += 1;

        if let Some(flag) = token.strip_prefix('-').filter(|f| !f.is_empty()) {
            // First char is the flag name; anything glued on is its value.
            let split = flag.chars().next().map_or(0, char::len_utf8);
            let (name, attached) = flag.split_at(split);
            let mut value_for = |name: &str| -> Result<String, SshError> {
                if !attached.is_empty() {
                    return Ok(attached.to_string());
                }
                if i < rest.len() {
                    let v = std::mem::take(&mut rest[i]);
                    i += 1;
                    return Ok(v);
                }
                Err(SshError::MissingFlagValue(format!("-{name}")))
            };

            match name {
                "p" => {
                    let value = value_for("p")?;
                    cmd.port = Some(parse_port(&value)?);
                },
                "i" => cmd.identity_file = Some(value_for("i")?),
                "L" => {
                    let value = value_for("L")?;
                    let (bind_host, bind_port, target_host, target_port) =
                        parse_forward_spec(&value)?;
                    cmd.local_forwards.push(LocalForward {
                        bind_host,
                        bind_port,
                        target_host,
                        target_port,
                    });
                },
                "R" => {
                    let value = value_for("R")?;
                    let (bind_host, bind_port, target_host, target_port) =
                        parse_forward_spec(&value)?;
                    cmd.remote_forwards.push(RemoteForward {
                        bind_host,
                        bind_port,
                        target_host,
                        target_port,
                    });
                },
                "D" => {
                    let value = value_for("D")?;
                    let (bind_host, bind_port) = parse_dynamic_spec(&value)?;
                    cmd.dynamic_forwards.push(DynamicForward {
                        bind_host,
                        bind_port,
                    });
                },
                _ => {
                    tracing::debug!(flag = %token, "ignoring unsupported ssh flag");
                },
            }
            continue;
        }

        // First positional is the destination; the remainder would be a
        // remote command, which the gateway does not take from here.
        if cmd.host.is_none() {
            match token.split_once('@') {
                Some((user, host)) => {
                    if !user.is_empty() {
                        cmd.user = Some(user.to_string());
                    }
                    cmd.host = Some(host.to_string());
                },
                None => cmd.host = Some(token),
            }
        }
    }

    Ok(cmd)
}

fn parse_port(value: &str) -> Result<u16, SshError> {
    value
        .parse::<u16>()
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| SshError::InvalidPort(value.to_string()))
}

/// `[bind:]port:host:port` for `-L` / `-R`.
fn parse_forward_spec(
    spec: &str,
) -> Result<(Option<String>, u16, String, u16), SshError> {
    let parts: Vec<&str> = spec.split(':').collect();
    match parts.as_slice() {
        [port, host, target_port] => Ok((
            None,
            parse_port(port)?,
            (*host).to_string(),
            parse_port(target_port)?,
        )),
        [bind, port, host, target_port] => Ok((
            Some((*bind).to_string()),
            parse_port(port)?,
            (*host).to_string(),
            parse_port(target_port)?,
        )),
        _ => Err(SshError::InvalidForwardSpec(spec.to_string())),
    }
}

/// `[bind:]port` for `-D`.
fn parse_dynamic_spec(spec: &str) -> Result<(Option<String>, u16), SshError> {
    let parts: Vec<&str> = spec.split(':').collect();
    match parts.as_slice() {
        [port] => Ok((None, parse_port(port)?)),
        [bind, port] => Ok((Some((*bind).to_string()), parse_port(port)?)),
        _ => Err(SshError::InvalidForwardSpec(spec.to_string())),
    }
}
