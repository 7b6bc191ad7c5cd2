use crate::StateError;
use std::net::Ipv4Addr;

/// Parse a candidate DNS server address with strict textual validation.
///
/// Stricter than `Ipv4Addr::from_str` error messages alone: the failure
/// reason names which rule broke so the operator can fix the input.
/// Rules: exactly four dot-separated octets, each 0-255, decimal digits
/// only, and no leading zeros (`01.2.3.4` is rejected, not reinterpreted
/// as octal).
pub fn parse_ipv4(s: &str) -> Result<Ipv4Addr, StateError> {
    let err = |reason: &str| StateError::InvalidIpv4 {
        addr: s.to_owned(),
        reason: reason.to_owned(),
    };

    let parts: Vec<&str> = s.split('.').collect();
    if parts.len() != 4 {
        return Err(err("expected four dot-separated octets"));
    }

    let mut octets = [0u8; 4];
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
            return Err(err("octets must be decimal digits"));
        }
        if part.len() > 1 && part.starts_with('0') {
            return Err(err("leading zeros are not allowed"));
        }
        octets[i] = part
            .parse::<u16>()
            .ok()
            .and_then(|v| u8::try_from(v).ok())
            .ok_or_else(|| err("octet out of range 0-255"))?;
    }

    Ok(Ipv4Addr::from(octets))
}

/// Reject SSH listening ports outside the unprivileged range.
pub fn validate_port(port: u16) -> Result<(), StateError> {
    if port < 1024 {
        return Err(StateError::PortOutOfRange(port));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_addresses() {
        assert_eq!(
            parse_ipv4("192.168.1.1").unwrap(),
            Ipv4Addr::new(192, 168, 1, 1)
        );
        assert_eq!(parse_ipv4("8.8.8.8").unwrap(), Ipv4Addr::new(8, 8, 8, 8));
        assert_eq!(parse_ipv4("0.0.0.0").unwrap(), Ipv4Addr::new(0, 0, 0, 0));
        assert_eq!(
            parse_ipv4("255.255.255.255").unwrap(),
            Ipv4Addr::new(255, 255, 255, 255)
        );
    }

    #[test]
    fn octet_out_of_range_rejected() {
        assert!(parse_ipv4("256.1.1.1").is_err());
        assert!(parse_ipv4("1.1.1.999").is_err());
    }

    #[test]
    fn wrong_octet_count_rejected() {
        assert!(parse_ipv4("1.2.3").is_err());
        assert!(parse_ipv4("1.2.3.4.5").is_err());
        assert!(parse_ipv4("").is_err());
    }

    #[test]
    fn leading_zeros_rejected() {
        assert!(parse_ipv4("01.2.3.4").is_err());
        assert!(parse_ipv4("1.2.3.04").is_err());
    }

    #[test]
    fn non_decimal_rejected() {
        assert!(parse_ipv4("a.b.c.d").is_err());
        assert!(parse_ipv4("1.2.3.-4").is_err());
        assert!(parse_ipv4("1..2.3").is_err());
    }

    #[test]
    fn port_range() {
        assert!(validate_port(1024).is_ok());
        assert!(validate_port(65535).is_ok());
        assert!(validate_port(22).is_err());
        assert!(validate_port(80).is_err());
        assert!(validate_port(443).is_err());
        assert!(validate_port(1023).is_err());
    }
}
