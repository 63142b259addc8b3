use crate::error::{ProtocolError, Result};

/// A text response from a SEEDLink server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    Ok,
    Error {
        description: String,
    },
    /// The two-line HELLO banner.
    Hello {
        software: String,
        version: String,
        extra: String,
        organization: String,
    },
}

impl Response {
    /// Parse a single-line response: OK or ERROR.
    pub fn parse_line(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\n', '\r']);

        if line.eq_ignore_ascii_case("OK") {
            return Ok(Self::Ok);
        }
        if line.to_uppercase().starts_with("ERROR") {
            return Ok(Self::Error {
                description: line[5..].trim_start().to_owned(),
            });
        }

        Err(ProtocolError::InvalidResponse(format!(
            "unrecognized response: {line:?}"
        )))
    }

    /// Parse the two-line HELLO banner.
    ///
    /// Line 1: `"SeedLink v3.1 (2020.075) :: SLPROTO:4.0 SLPROTO:3.1"`.
    /// Line 2: the organization name. Everything after software and version
    /// on line 1 lands in `extra` for capability extraction.
    pub fn parse_hello(line1: &str, line2: &str) -> Result<Self> {
        let line1 = line1.trim_end_matches(['\n', '\r']);
        let line2 = line2.trim_end_matches(['\n', '\r']);

        let (main_part, capabilities) = match line1.find("::") {
            Some(idx) => (line1[..idx].trim(), line1[idx + 2..].trim()),
            None => (line1.trim(), ""),
        };

        let mut parts = main_part.split_whitespace();
        let software = parts.next().unwrap_or("").to_owned();
        let version = parts.next().unwrap_or("").to_owned();
        let remainder = parts.collect::<Vec<_>>().join(" ");

        let extra = match (remainder.is_empty(), capabilities.is_empty()) {
            (true, _) => capabilities.to_owned(),
            (false, true) => remainder,
            (false, false) => format!("{remainder} :: {capabilities}"),
        };

        Ok(Self::Hello {
            software,
            version,
            extra,
            organization: line2.to_owned(),
        })
    }
}

/// Extract capability tokens from a HELLO `extra` field.
///
/// Tokens are whitespace-separated entries containing a `:` (for example
/// `SLPROTO:4.0`), found to the right of a `::` separator when one exists.
pub fn parse_capabilities(extra: &str) -> Vec<String> {
    let source = match extra.find("::") {
        Some(idx) => &extra[idx + 2..],
        None => extra,
    };
    source
        .split_whitespace()
        .filter(|token| token.contains(':'))
        .map(str::to_owned)
        .collect()
}

/// True when the advertised capabilities include SEEDLink v4.
pub fn supports_v4(capabilities: &[String]) -> bool {
    capabilities.iter().any(|c| c == "SLPROTO:4.0")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ok() {
        assert_eq!(Response::parse_line("OK\r\n").unwrap(), Response::Ok);
        assert_eq!(Response::parse_line("ok").unwrap(), Response::Ok);
    }

    #[test]
    fn parse_error_with_description() {
        let response = Response::parse_line("ERROR ARGUMENTS bad station\r\n").unwrap();
        assert_eq!(
            response,
            Response::Error {
                description: "ARGUMENTS bad station".into()
            }
        );
    }

    #[test]
    fn parse_bare_error() {
        assert_eq!(
            Response::parse_line("ERROR\r\n").unwrap(),
            Response::Error {
                description: String::new()
            }
        );
    }

    #[test]
    fn parse_garbage() {
        assert!(Response::parse_line("GARBAGE\r\n").is_err());
    }

    #[test]
    fn parse_hello_with_capabilities() {
        let response = Response::parse_hello(
            "SeedLink v3.1 (2020.075) :: SLPROTO:4.0 SLPROTO:3.1\r\n",
            "IRIS DMC\r\n",
        )
        .unwrap();
        let Response::Hello {
            software,
            version,
            extra,
            organization,
        } = response
        else {
            panic!("expected Hello");
        };
        assert_eq!(software, "SeedLink");
        assert_eq!(version, "v3.1");
        assert_eq!(organization, "IRIS DMC");
        let caps = parse_capabilities(&extra);
        assert_eq!(caps, vec!["SLPROTO:4.0", "SLPROTO:3.1"]);
        assert!(supports_v4(&caps));
    }

    #[test]
    fn parse_hello_without_capabilities() {
        let response = Response::parse_hello("SeedLink v3.1 (2020.075)", "Mock Server").unwrap();
        let Response::Hello { extra, .. } = response else {
            panic!("expected Hello");
        };
        assert_eq!(extra, "(2020.075)");
        let caps = parse_capabilities(&extra);
        assert!(caps.is_empty());
        assert!(!supports_v4(&caps));
    }

    #[test]
    fn capabilities_without_separator() {
        let caps = parse_capabilities("SLPROTO:4.0 CAP:AUTH");
        assert_eq!(caps, vec!["SLPROTO:4.0", "CAP:AUTH"]);
        assert!(supports_v4(&caps));
    }

    #[test]
    fn capabilities_empty_right_side() {
        assert!(parse_capabilities("(2020.075) ::  ").is_empty());
        assert!(!supports_v4(&[]));
    }
}
