use clap::{
    builder::{NonEmptyStringValueParser, StyledStr, TypedValueParser},
    error::{ContextKind, ContextValue, ErrorKind},
    Arg, Command, Error,
};
use std::{ffi::OsStr, fmt::Display};
use url::Host;

/// Parse as a non-empty string
pub fn string() -> NonEmptyStringValueParser {
    NonEmptyStringValueParser::default()
}

/// Parse a registry reference, `host[:port]` optionally followed by a `/namespace`
pub fn registry_host() -> RegistryHostValueParser {
    RegistryHostValueParser::default()
}

#[derive(Clone, Debug, Default)]
pub struct RegistryHostValueParser {
    inner: NonEmptyStringValueParser,
}

impl TypedValueParser for RegistryHostValueParser {
    type Value = String;

    fn parse_ref(
        &self,
        cmd: &Command,
        arg: Option<&Arg>,
        value: &OsStr,
    ) -> Result<Self::Value, Error> {
        let raw = self.inner.parse_ref(cmd, arg, value)?;
        let trimmed = raw.trim().trim_end_matches('/');
        let invalid = |reason: &dyn Display| invalid_value(cmd, arg, &raw, reason);

        if trimmed.contains("://") {
            return Err(invalid(&"the registry must not include a scheme"));
        }

        let (authority, namespace) = match trimmed.split_once('/') {
            Some((authority, namespace)) => (authority, Some(namespace)),
            None => (trimmed, None),
        };

        if namespace.is_some_and(|namespace| namespace.split('/').any(str::is_empty)) {
            return Err(invalid(&"the namespace must not contain empty path segments"));
        }

        let (host, port) = match authority.rsplit_once(':') {
            // Bracketed IPv6 literals contain colons of their own
            Some((host, port)) if !port.contains(']') => (host, Some(port)),
            _ => (authority, None),
        };

        if let Some(port) = port {
            port.parse::<u16>()
                .map_err(|_| invalid(&format!("invalid port {port:?}")))?;
        }

        Host::parse(host).map_err(|e| invalid(&e))?;

        Ok(trimmed.to_owned())
    }
}

/// Report a value that parsed but is not acceptable, naming the offending flag
fn invalid_value(cmd: &Command, arg: Option<&Arg>, value: &str, reason: &dyn Display) -> Error {
    let flag = match arg.and_then(Arg::get_long) {
        Some(long) => format!("--{long}"),
        None => String::from("..."),
    };

    let mut error = Error::new(ErrorKind::ValueValidation).with_cmd(cmd);
    error.insert(ContextKind::InvalidArg, ContextValue::String(flag));
    error.insert(ContextKind::InvalidValue, ContextValue::String(value.to_owned()));
    error.insert(
        ContextKind::Usage,
        ContextValue::StyledStr(StyledStr::from(format!("  reason: {reason}"))),
    );

    error
}
