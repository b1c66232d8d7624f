use crate::error::ConfigError;

/// Maximum number of addresses a single range may expand to (256 * 256).
pub const MAX_RANGE: u64 = 65_536;

/// Strict dotted-quad check: four decimal octets 0-255, single dots, nothing else.
///
/// Leading zeros are tolerated up to three digits (`"010.0.0.1"`), signs and
/// whitespace are not.
pub fn is_valid(ip: &str) -> bool {
    octets(ip).is_some()
}

/// Parse a dotted-quad into its big-endian `u32` form.
pub fn parse(ip: &str) -> Result<u32, ConfigError> {
    octets(ip)
        .map(u32::from_be_bytes)
        .ok_or_else(|| ConfigError::InvalidAddressFormat(ip.to_string()))
}

/// Inverse of [`parse`].
pub fn format_ipv4(ip: u32) -> String {
    let [a, b, c, d] = ip.to_be_bytes();
    format!("{a}.{b}.{c}.{d}")
}

/// Expand an inclusive `start..=end` range into ascending dotted-quad strings.
pub fn enumerate(start_ip: &str, end_ip: &str) -> Result<Vec<String>, ConfigError> {
    let start = parse(start_ip)?;
    let end = parse(end_ip)?;

    if start > end {
        return Err(ConfigError::InvalidRange {
            start: start_ip.to_string(),
            end: end_ip.to_string(),
        });
    }

    let count = u64::from(end - start) + 1;
    if count > MAX_RANGE {
        return Err(ConfigError::RangeTooLarge {
            count,
            max: MAX_RANGE,
        });
    }

    Ok((start..=end).map(format_ipv4).collect())
}

fn octets(ip: &str) -> Option<[u8; 4]> {
    let mut out = [0u8; 4];
    let mut parts = ip.split('.');
    for slot in out.iter_mut() {
        let part = parts.next()?;
        if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        *slot = part.parse::<u8>().ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_addresses() {
        for ip in ["192.168.1.1", "0.0.0.0", "255.255.255.255", "010.0.0.1"] {
            assert!(is_valid(ip), "{ip} should be valid");
        }
    }

    #[test]
    fn rejects_malformed_addresses() {
        for ip in [
            "256.1.1.1",
            "1.2.3",
            "1.2.3.4.5",
            "abc.def.gh.i",
            "",
            "1..2.3",
            " 1.2.3.4",
            "1.2.3.4 ",
            "1.2.3.4\n",
            "+1.2.3.4",
            "1.2.3.0004",
            "1.2.3.4.",
        ] {
            assert!(!is_valid(ip), "{ip:?} should be rejected");
        }
    }

    #[test]
    fn parse_is_big_endian() {
        assert_eq!(parse("1.2.3.4").unwrap(), 0x0102_0304);
        assert_eq!(parse("255.255.255.255").unwrap(), u32::MAX);
        assert_eq!(format_ipv4(0xC0A8_0101), "192.168.1.1");
    }

    #[test]
    fn enumerate_crosses_octet_boundaries() {
        let ips = enumerate("10.0.0.254", "10.0.1.1").unwrap();
        assert_eq!(ips, vec!["10.0.0.254", "10.0.0.255", "10.0.1.0", "10.0.1.1"]);
    }

    #[test]
    fn enumerate_single_address() {
        assert_eq!(enumerate("10.1.1.1", "10.1.1.1").unwrap(), vec!["10.1.1.1"]);
    }

    #[test]
    fn enumerate_errors() {
        assert!(matches!(
            enumerate("10.0.0.2", "10.0.0.1"),
            Err(ConfigError::InvalidRange { .. })
        ));
        assert!(matches!(
            enumerate("10.0.0.300", "10.0.0.1"),
            Err(ConfigError::InvalidAddressFormat(ip)) if ip == "10.0.0.300"
        ));
        assert_eq!(
            enumerate("0.0.0.0", "1.0.0.0"),
            Err(ConfigError::RangeTooLarge {
                count: 16_777_217,
                max: MAX_RANGE
            })
        );
    }

    #[test]
    fn enumerate_cap_is_inclusive() {
        assert_eq!(enumerate("10.0.0.0", "10.0.255.255").unwrap().len(), 65_536);
        assert!(matches!(
            enumerate("10.0.0.0", "10.1.0.0"),
            Err(ConfigError::RangeTooLarge { count: 65_537, .. })
        ));
    }

    #[test]
    fn full_u32_span_does_not_overflow() {
        assert!(matches!(
            enumerate("0.0.0.0", "255.255.255.255"),
            Err(ConfigError::RangeTooLarge { count: 4_294_967_296, .. })
        ));
    }
}
