use std::convert::TryFrom;
use tokio::time::Duration;

#[derive(Clone, Debug, Default)]
pub struct ConnectionPoolOptions {
    pub min_connections: Option<usize>,
    pub max_connections: Option<usize>,
    pub max_connecting: Option<usize>,
    pub host_timeout: Option<Duration>,
    pub refresh_requirement: Option<Duration>,
    pub refresh_timeout: Option<Duration>,
}

#[derive(Clone, Debug)]
pub struct ConnectionPoolOptionsValidated {
    pub min_connections: usize,
    pub max_connections: usize,
    pub max_connecting: usize,
    pub host_timeout: Duration,
    pub refresh_requirement: Duration,
    pub refresh_timeout: Duration,
}

impl ConnectionPoolOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.min_connections > self.max_connections {
            return Err("min_connections must not exceed max_connections");
        }
        if self.max_connecting < 1 {
            return Err("max_connecting must be at least 1");
        }
        if self.refresh_timeout >= self.refresh_requirement {
            return Err("refresh_timeout must be shorter than refresh_requirement");
        }
        if self.host_timeout == Duration::from_secs(0) {
            return Err("host_timeout must be positive");
        }

        Ok(())
    }
}

impl TryFrom<ConnectionPoolOptions> for ConnectionPoolOptionsValidated {
    type Error = &'static str;

    fn try_from(options: ConnectionPoolOptions) -> Result<Self, Self::Error> {
        let values = ConnectionPoolOptionsValidated {
            min_connections: options.min_connections.unwrap_or(1),
            max_connections: options.max_connections.unwrap_or(usize::MAX),
            max_connecting: options.max_connecting.unwrap_or(usize::MAX),
            host_timeout: options.host_timeout.unwrap_or(Duration::from_secs(5 * 60)),
            refresh_requirement: options.refresh_requirement.unwrap_or(Duration::from_secs(60)),
            refresh_timeout: options.refresh_timeout.unwrap_or(Duration::from_secs(20)),
        };

        values.validate()?;
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(expected: Result<(), &'static str>, options: ConnectionPoolOptions) {
        let result = ConnectionPoolOptionsValidated::try_from(options).map(|_| ());
        assert_eq!(result, expected);
    }

    #[test]
    fn defaults() {
        let options = ConnectionPoolOptionsValidated::try_from(ConnectionPoolOptions::default()).unwrap();

        assert_eq!(options.min_connections, 1);
        assert_eq!(options.max_connections, usize::MAX);
        assert_eq!(options.host_timeout, Duration::from_secs(300));
        assert_eq!(options.refresh_requirement, Duration::from_secs(60));
        assert_eq!(options.refresh_timeout, Duration::from_secs(20));
    }

    #[test]
    fn validation() {
        run(Ok(()), ConnectionPoolOptions::default());
        run(
            Err("min_connections must not exceed max_connections"),
            ConnectionPoolOptions {
                min_connections: Some(3),
                max_connections: Some(2),
                ..Default::default()
            },
        );
        run(
            Err("max_connecting must be at least 1"),
            ConnectionPoolOptions {
                max_connecting: Some(0),
                ..Default::default()
            },
        );
        run(
            Err("refresh_timeout must be shorter than refresh_requirement"),
            ConnectionPoolOptions {
                refresh_timeout: Some(Duration::from_secs(60)),
                ..Default::default()
            },
        );
    }
}
