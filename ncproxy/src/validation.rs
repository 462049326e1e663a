//! Request field validation.

use std::net::IpAddr;

use ipnet::IpNet;
use ncproxy_hcn::IpConfig;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("received empty field in request: {0}")]
    EmptyField(&'static str),

    #[error("invalid subnet prefix `{0}`")]
    InvalidSubnet(String),

    #[error("invalid default gateway `{0}`")]
    InvalidGateway(String),

    #[error("invalid IP address `{0}`")]
    InvalidIpAddress(String),

    #[error("prefix length {prefix} out of range for `{address}`")]
    InvalidPrefixLength { address: String, prefix: u32 },

    #[error("policy settings do not match policy type {0}")]
    PolicyMismatch(String),

    #[error("unknown value {value} for {field}")]
    UnknownEnum { field: &'static str, value: i32 },
}

/// Fail with [`ValidationError::EmptyField`] naming the first empty field.
pub fn require_fields(fields: &[(&'static str, &str)]) -> Result<(), ValidationError> {
    match fields.iter().find(|(_, value)| value.is_empty()) {
        Some((name, _)) => Err(ValidationError::EmptyField(name)),
        None => Ok(()),
    }
}

pub fn subnet(prefix: &str) -> Result<IpNet, ValidationError> {
    prefix
        .parse::<IpNet>()
        .map_err(|_| ValidationError::InvalidSubnet(prefix.to_string()))
}

/// An empty gateway is allowed and yields `None`.
pub fn gateway(gateway: &str) -> Result<Option<IpAddr>, ValidationError> {
    if gateway.is_empty() {
        return Ok(None);
    }
    gateway
        .parse::<IpAddr>()
        .map(Some)
        .map_err(|_| ValidationError::InvalidGateway(gateway.to_string()))
}

pub fn ip_config(address: &str, prefix: u32) -> Result<IpConfig, ValidationError> {
    let ip = address
        .parse::<IpAddr>()
        .map_err(|_| ValidationError::InvalidIpAddress(address.to_string()))?;
    let max = match ip {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    };
    if prefix > max {
        return Err(ValidationError::InvalidPrefixLength {
            address: address.to_string(),
            prefix,
        });
    }
    Ok(IpConfig {
        ip_address: ip.to_string(),
        prefix_length: prefix as u8,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_fields_names_first_empty() {
        assert!(require_fields(&[("container_id", "c1"), ("nic_id", "n1")]).is_ok());
        assert_eq!(
            require_fields(&[("container_id", "c1"), ("nic_id", ""), ("endpoint_name", "")]),
            Err(ValidationError::EmptyField("nic_id"))
        );
    }

    #[test]
    fn test_subnet_and_gateway() {
        assert!(subnet("10.0.0.0/24").is_ok());
        assert!(subnet("fd00::/64").is_ok());
        assert!(matches!(subnet("10.0.0.0"), Err(ValidationError::InvalidSubnet(_))));

        assert_eq!(gateway("").unwrap(), None);
        assert!(gateway("10.0.0.1").unwrap().is_some());
        assert!(matches!(gateway("gw"), Err(ValidationError::InvalidGateway(_))));
    }

    #[test]
    fn test_ip_config_prefix_bounds() {
        let cfg = ip_config("192.168.1.10", 24).unwrap();
        assert_eq!(cfg.ip_address, "192.168.1.10");
        assert_eq!(cfg.prefix_length, 24);

        assert!(ip_config("fd00::10", 64).is_ok());
        assert!(matches!(
            ip_config("192.168.1.10", 33),
            Err(ValidationError::InvalidPrefixLength { .. })
        ));
        assert!(matches!(
            ip_config("not-an-ip", 24),
            Err(ValidationError::InvalidIpAddress(_))
        ));
    }
}
