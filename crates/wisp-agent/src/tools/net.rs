//! Outbound URL boundary: scheme allow-list, IP normalisation, private-range
//! rejection, and DNS pinning.
//!
//! The validated address is the one the request is pinned to — revalidation
//! happens again on every redirect hop in `web_fetch`.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use url::{Host, Url};

/// Outcome of validating one URL: the parsed URL plus the single resolved,
/// vetted address the request must connect to.
#[derive(Debug, Clone)]
pub struct ValidatedUrl {
    pub url: Url,
    pub pinned: IpAddr,
    pub host: String,
    pub port: u16,
}

/// Parse and vet a URL for outbound fetching.
///
/// Only `http`/`https` pass. IP-literal hosts are normalised first — octal
/// (`0177.0.0.1`), hex (`0x7f.0.0.1`), and bare-decimal (`2130706433`) forms
/// all collapse to dotted-quad before the private-range predicate runs, so
/// encoding tricks cannot slip a loopback past a naive string check.
/// Hostnames are resolved and *every* address is checked; the first vetted
/// address becomes the pin.
pub async fn validate_url(raw: &str) -> Result<ValidatedUrl, String> {
    let url = Url::parse(raw).map_err(|e| format!("invalid URL: {e}"))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(format!("scheme '{other}' is not allowed")),
    }

    let host = url
        .host()
        .ok_or_else(|| "URL has no host".to_string())?
        .to_owned();
    let port = url
        .port_or_known_default()
        .ok_or_else(|| "URL has no port".to_string())?;

    let addrs: Vec<IpAddr> = match &host {
        Host::Ipv4(ip) => vec![IpAddr::V4(*ip)],
        Host::Ipv6(ip) => vec![IpAddr::V6(*ip)],
        Host::Domain(name) => {
            // A domain that is actually a creatively-encoded IPv4 literal
            // must be normalised, not resolved.
            if let Some(ip) = parse_ipv4_lenient(name) {
                vec![IpAddr::V4(ip)]
            } else {
                let resolved = tokio::net::lookup_host((name.as_str(), port))
                    .await
                    .map_err(|e| format!("cannot resolve '{name}': {e}"))?
                    .map(|sa| sa.ip())
                    .collect::<Vec<_>>();
                if resolved.is_empty() {
                    return Err(format!("'{name}' resolved to no addresses"));
                }
                resolved
            }
        }
    };

    for addr in &addrs {
        if is_private(addr) {
            return Err(format!(
                "address {addr} for '{}' is private or otherwise not routable",
                host
            ));
        }
    }

    Ok(ValidatedUrl {
        host: host.to_string(),
        port,
        pinned: addrs[0],
        url,
    })
}

/// Parse an IPv4 address accepting the inet_aton forms: each octet may be
/// decimal, octal (leading 0), or hex (0x); fewer than four parts widen the
/// final part (`127.1` == `127.0.0.1`, `2130706433` == `127.0.0.1`).
pub fn parse_ipv4_lenient(s: &str) -> Option<Ipv4Addr> {
    if s.is_empty() {
        return None;
    }
    let parts: Vec<&str> = s.split('.').collect();
    if parts.len() > 4 {
        return None;
    }
    let mut values: Vec<u64> = Vec::with_capacity(parts.len());
    for part in &parts {
        values.push(parse_ipv4_part(part)?);
    }

    let (head, tail) = values.split_at(values.len() - 1);
    let tail = tail[0];
    for v in head {
        if *v > 255 {
            return None;
        }
    }
    // The final part covers the remaining bytes.
    let tail_bytes = 4 - head.len();
    if tail >= 1u64 << (8 * tail_bytes) {
        return None;
    }

    let mut value: u64 = 0;
    for v in head {
        value = (value << 8) | v;
    }
    value = (value << (8 * tail_bytes)) | tail;
    Some(Ipv4Addr::from(value as u32))
}

fn parse_ipv4_part(part: &str) -> Option<u64> {
    if part.is_empty() {
        return None;
    }
    let (radix, digits) = if let Some(hex) = part.strip_prefix("0x").or_else(|| part.strip_prefix("0X")) {
        (16, hex)
    } else if part.len() > 1 && part.starts_with('0') {
        (8, &part[1..])
    } else {
        (10, part)
    };
    if digits.is_empty() {
        // "0x" alone and "0" — "0" lands here via the octal branch guard.
        return if radix == 8 { Some(0) } else { None };
    }
    u64::from_str_radix(digits, radix).ok()
}

/// Is this address private, loopback, link-local, or otherwise not a public
/// destination the agent should be fetching from?
pub fn is_private(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => is_private_v6(v6),
    }
}

fn is_private_v4(v4: &Ipv4Addr) -> bool {
    v4.is_loopback()
        || v4.is_private()
        || v4.is_link_local()
        || v4.is_unspecified()
        || v4.is_broadcast()
        || v4.is_multicast()
        || v4.is_documentation()
        // Carrier-grade NAT, 100.64.0.0/10.
        || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        // 0.0.0.0/8 beyond the unspecified address itself.
        || v4.octets()[0] == 0
}

fn is_private_v6(v6: &Ipv6Addr) -> bool {
    if let Some(mapped) = v6.to_ipv4_mapped() {
        return is_private_v4(&mapped);
    }
    v6.is_loopback()
        || v6.is_unspecified()
        || v6.is_multicast()
        // Unique-local fc00::/7.
        || (v6.segments()[0] & 0xFE00) == 0xFC00
        // Link-local fe80::/10.
        || (v6.segments()[0] & 0xFFC0) == 0xFE80
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn octal_loopback_normalises_and_rejects() {
        assert_eq!(
            parse_ipv4_lenient("0177.0.0.1"),
            Some(Ipv4Addr::new(127, 0, 0, 1))
        );
    }

    #[test]
    fn hex_and_dword_forms_normalise() {
        assert_eq!(
            parse_ipv4_lenient("0x7f.0.0.1"),
            Some(Ipv4Addr::new(127, 0, 0, 1))
        );
        assert_eq!(
            parse_ipv4_lenient("2130706433"),
            Some(Ipv4Addr::new(127, 0, 0, 1))
        );
        assert_eq!(
            parse_ipv4_lenient("127.1"),
            Some(Ipv4Addr::new(127, 0, 0, 1))
        );
    }

    #[test]
    fn plain_names_do_not_parse_as_ipv4() {
        assert_eq!(parse_ipv4_lenient("example.com"), None);
        assert_eq!(parse_ipv4_lenient("256.0.0.1"), None);
        assert_eq!(parse_ipv4_lenient(""), None);
    }

    #[test]
    fn private_ranges_are_private() {
        assert!(is_private(&"127.0.0.1".parse().unwrap()));
        assert!(is_private(&"10.1.2.3".parse().unwrap()));
        assert!(is_private(&"172.16.0.1".parse().unwrap()));
        assert!(is_private(&"192.168.1.1".parse().unwrap()));
        assert!(is_private(&"169.254.169.254".parse().unwrap()));
        assert!(is_private(&"100.64.0.1".parse().unwrap()));
        assert!(is_private(&"0.0.0.0".parse().unwrap()));
        assert!(is_private(&"::1".parse().unwrap()));
        assert!(is_private(&"fe80::1".parse().unwrap()));
        assert!(is_private(&"fd00::1".parse().unwrap()));
        assert!(!is_private(&"93.184.216.34".parse().unwrap()));
        assert!(!is_private(&"2606:2800:220:1::1".parse().unwrap()));
    }

    #[tokio::test]
    async fn octal_ssrf_is_rejected() {
        let err = validate_url("http://0177.0.0.1/x").await.unwrap_err();
        assert!(err.contains("private"), "got: {err}");
    }

    #[tokio::test]
    async fn non_http_schemes_are_rejected() {
        assert!(validate_url("ftp://example.com/").await.is_err());
        assert!(validate_url("file:///etc/passwd").await.is_err());
        assert!(validate_url("gopher://example.com/").await.is_err());
    }

    #[tokio::test]
    async fn ip_literal_loopback_is_rejected() {
        assert!(validate_url("http://127.0.0.1:8080/admin").await.is_err());
        assert!(validate_url("http://[::1]/").await.is_err());
    }
}
