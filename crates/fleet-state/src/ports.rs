//! Port specification strings as stored on deployment targets.
//!
//! Accepted forms, comma separated: `"8080:80"` (host:container), `"80"`
//! (container port, host port chosen at deploy time) and `"8000-8002"`
//! (each port published on the same host port).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest range accepted in a single `a-b` item.
pub const MAX_RANGE_LEN: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    /// `None` means "pick a free host port".
    pub host_port: Option<u16>,
    pub container_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortSpecError {
    #[error("empty port specification")]
    Empty,

    #[error("invalid port '{0}'")]
    InvalidPort(String),

    #[error("invalid port range '{0}'")]
    InvalidRange(String),
}

fn port(raw: &str) -> Result<u16, PortSpecError> {
    match raw.trim().parse::<u16>() {
        Ok(0) | Err(_) => Err(PortSpecError::InvalidPort(raw.trim().to_string())),
        Ok(p) => Ok(p),
    }
}

pub fn parse_port_spec(spec: &str) -> Result<Vec<PortMapping>, PortSpecError> {
    let mut out = Vec::new();
    for item in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        // Strip an optional protocol suffix such as "/tcp".
        let item = item.split('/').next().unwrap_or(item);

        if let Some((host, container)) = item.split_once(':') {
            out.push(PortMapping {
                host_port: Some(port(host)?),
                container_port: port(container)?,
            });
        } else if let Some((start, end)) = item.split_once('-') {
            let (start, end) = (port(start)?, port(end)?);
            if end < start || (end - start) as u32 >= MAX_RANGE_LEN {
                return Err(PortSpecError::InvalidRange(item.to_string()));
            }
            out.extend((start..=end).map(|p| PortMapping {
                host_port: Some(p),
                container_port: p,
            }));
        } else {
            out.push(PortMapping {
                host_port: None,
                container_port: port(item)?,
            });
        }
    }

    if out.is_empty() {
        return Err(PortSpecError::Empty);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_form() {
        let parsed = parse_port_spec("8080:80, 443, 9000-9001/tcp").unwrap();
        assert_eq!(
            parsed,
            vec![
                PortMapping { host_port: Some(8080), container_port: 80 },
                PortMapping { host_port: None, container_port: 443 },
                PortMapping { host_port: Some(9000), container_port: 9000 },
                PortMapping { host_port: Some(9001), container_port: 9001 },
            ]
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_port_spec(" , "), Err(PortSpecError::Empty));
        assert!(matches!(parse_port_spec("http"), Err(PortSpecError::InvalidPort(_))));
        assert!(matches!(parse_port_spec("0"), Err(PortSpecError::InvalidPort(_))));
        assert!(matches!(parse_port_spec("70000:80"), Err(PortSpecError::InvalidPort(_))));
        assert!(matches!(parse_port_spec("9000-8000"), Err(PortSpecError::InvalidRange(_))));
        assert!(matches!(parse_port_spec("1000-5000"), Err(PortSpecError::InvalidRange(_))));
    }
}
