use std::fmt;
use std::str::FromStr;

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct HostAndPort {
    host: String,
    port: u16,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HostAndPortParseError {
    #[error("'{0}' is not of the form host:port")]
    MissingPort(String),
    #[error("'{0}' has an invalid port")]
    InvalidPort(String),
    #[error("empty host")]
    EmptyHost,
}

impl HostAndPort {
    pub fn new<H: Into<String>>(host: H, port: u16) -> Self {
        HostAndPort {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for HostAndPort {
    type Err = HostAndPortParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = match s.rfind(':') {
            Some(idx) => (&s[..idx], &s[idx + 1..]),
            None => return Err(HostAndPortParseError::MissingPort(s.to_string())),
        };
        if host.is_empty() {
            return Err(HostAndPortParseError::EmptyHost);
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| HostAndPortParseError::InvalidPort(s.to_string()))?;

        Ok(HostAndPort::new(host, port))
    }
}

impl fmt::Debug for HostAndPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl fmt::Display for HostAndPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse() {
        assert_eq!("a:1".parse::<HostAndPort>(), Ok(HostAndPort::new("a", 1)));
        assert_eq!(
            "a".parse::<HostAndPort>(),
            Err(HostAndPortParseError::MissingPort("a".into()))
        );
        assert_eq!(
            "a:port".parse::<HostAndPort>(),
            Err(HostAndPortParseError::InvalidPort("a:port".into()))
        );
        assert_eq!(":1".parse::<HostAndPort>(), Err(HostAndPortParseError::EmptyHost));
    }
}
