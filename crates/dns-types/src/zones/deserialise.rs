use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use bytes::Bytes;

use crate::protocol::types::*;
use crate::zones::types::*;

impl Zone {
    /// Parse a string of zone data (RFC 1035 §5).
    ///
    /// This is a line-oriented parser: each master-file entry is
    /// resolved to a single logical line first (honouring `(`...`)`
    /// continuation), then tokenised, then classified positionally.
    /// The owner name column is present or absent according to
    /// whether the line starts with whitespace, never by guessing
    /// from a token's shape; once the owner name is accounted for,
    /// at most two more tokens (TTL and class, in either order) are
    /// consumed before the always-required, always-last-fixed-column
    /// `<type>` token.
    ///
    /// `$INCLUDE` and non-`IN` record classes are not supported, and
    /// will raise an error.
    ///
    /// # Errors
    ///
    /// If the string cannot be parsed.
    pub fn deserialise(data: &str) -> Result<Self, Error> {
        let mut rrs = Vec::new();
        let mut apex_and_soa = None;
        let mut origin: Option<DomainName> = None;
        let mut default_ttl: Option<u32> = None;
        let mut previous_domain: Option<DomainName> = None;
        let mut previous_ttl: Option<u32> = None;

        for (has_owner_column, logical_line) in logical_lines(data) {
            let tokens = match tokenise(logical_line.trim()) {
                Ok(tokens) => tokens,
                Err(err) => {
                    tracing::warn!(line = %logical_line, %err, "skipping unparseable zone line");
                    continue;
                }
            };
            if tokens.is_empty() {
                continue;
            }

            if tokens[0].text == "$ORIGIN" {
                match parse_origin_directive(&tokens, &origin, &logical_line) {
                    Ok(new_origin) => origin = Some(new_origin),
                    Err(err) => {
                        tracing::warn!(line = %logical_line, %err, "skipping bad $ORIGIN directive");
                    }
                }
                continue;
            }

            if tokens[0].text == "$TTL" {
                match parse_ttl_directive(&tokens, &logical_line) {
                    Ok(ttl) => default_ttl = Some(ttl),
                    Err(err) => {
                        tracing::warn!(line = %logical_line, %err, "skipping bad $TTL directive");
                    }
                }
                continue;
            }

            if tokens[0].text == "$INCLUDE" {
                return Err(Error::IncludeNotSupported);
            }

            match parse_record_line(
                &tokens,
                has_owner_column,
                &origin,
                &previous_domain,
                previous_ttl,
                default_ttl,
            ) {
                Ok((name, ttl, rtype_with_data)) => {
                    previous_domain = Some(name.clone());
                    previous_ttl = Some(ttl);

                    if let RecordTypeWithData::SOA {
                        mname,
                        rname,
                        serial,
                        refresh,
                        retry,
                        expire,
                        minimum,
                    } = rtype_with_data
                    {
                        if name.labels.first().map(|l| l.octets().as_ref()) == Some(&b"*"[..]) {
                            return Err(Error::WildcardSOA);
                        }
                        if apex_and_soa.is_some() {
                            return Err(Error::MultipleSOA);
                        }
                        apex_and_soa = Some((
                            name,
                            SOA {
                                mname,
                                rname,
                                serial,
                                refresh,
                                retry,
                                expire,
                                minimum,
                            },
                        ));
                    } else {
                        rrs.push((name, rtype_with_data, ttl));
                    }
                }
                Err(err) => {
                    tracing::warn!(line = %logical_line, %err, "skipping unparseable zone record");
                }
            }
        }

        let mut zone = if let Some((apex, soa)) = apex_and_soa {
            Zone::new(apex, Some(soa))
        } else {
            Zone::default()
        };

        for (name, rtype_with_data, ttl) in rrs {
            if !name.is_subdomain_of(zone.get_apex()) {
                return Err(Error::NotSubdomainOfApex {
                    apex: zone.get_apex().clone(),
                    name,
                });
            }
            zone.insert(name, rtype_with_data, ttl);
        }

        Ok(zone)
    }
}

fn parse_origin_directive(
    tokens: &[Token],
    origin: &Option<DomainName>,
    logical_line: &str,
) -> Result<DomainName, Error> {
    if tokens.len() != 2 {
        return Err(Error::WrongLen {
            line: logical_line.to_string(),
        });
    }
    parse_domain(origin, &tokens[1])
}

/// `$TTL <duration>` (RFC 2308 §4): sets the default TTL used by any
/// subsequent record line which omits its own TTL column and has no
/// previous record to inherit one from.
fn parse_ttl_directive(tokens: &[Token], logical_line: &str) -> Result<u32, Error> {
    if tokens.len() != 2 {
        return Err(Error::WrongLen {
            line: logical_line.to_string(),
        });
    }
    tokens[1].text.parse::<u32>().map_err(|_| Error::Unexpected {
        expected: "TTL".to_string(),
        got: tokens[1].text.clone(),
    })
}

#[allow(clippy::too_many_arguments)]
fn parse_record_line(
    tokens: &[Token],
    has_owner_column: bool,
    origin: &Option<DomainName>,
    previous_domain: &Option<DomainName>,
    previous_ttl: Option<u32>,
    default_ttl: Option<u32>,
) -> Result<(DomainName, u32, RecordTypeWithData), Error> {
    let (name, ttl, rtype, rdata_tokens) = classify(
        tokens,
        has_owner_column,
        origin,
        previous_domain,
        previous_ttl,
        default_ttl,
    )?;
    let rtype_with_data = parse_rdata(rtype, origin, rdata_tokens)?;
    Ok((name, ttl, rtype_with_data))
}

/// Join `(`...`)` continuations into single logical lines, and strip
/// unquoted `;` comments and trailing `\r`.  Each logical line is
/// paired with whether its first raw source line began with
/// whitespace: that is the sole signal for whether the owner-name
/// column was omitted, per RFC 1035 §5.1.
fn logical_lines(data: &str) -> Vec<(bool, String)> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut has_owner_column = true;
    let mut depth = 0usize;
    let mut in_quotes = false;

    for raw_line in data.split('\n') {
        let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);

        if current.is_empty() && depth == 0 {
            has_owner_column = !line.starts_with(|c: char| c == ' ' || c == '\t');
        }

        let mut stripped = String::with_capacity(line.len());
        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\\' {
                stripped.push(c);
                if let Some(n) = chars.next() {
                    stripped.push(n);
                }
                continue;
            }
            if c == '"' {
                in_quotes = !in_quotes;
                stripped.push(c);
                continue;
            }
            if !in_quotes && c == ';' {
                break;
            }
            if !in_quotes && c == '(' {
                depth += 1;
                continue;
            }
            if !in_quotes && c == ')' {
                depth = depth.saturating_sub(1);
                continue;
            }
            stripped.push(c);
        }

        if current.is_empty() {
            current = stripped.trim().to_string();
        } else {
            current.push(' ');
            current.push_str(stripped.trim());
        }

        if depth == 0 {
            if !current.trim().is_empty() {
                out.push((has_owner_column, std::mem::take(&mut current)));
            } else {
                current.clear();
            }
        }
    }

    out
}

#[derive(Debug, Clone)]
struct Token {
    text: String,
    raw: Bytes,
}

fn tokenise(line: &str) -> Result<Vec<Token>, Error> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c == ' ' || c == '\t' {
            chars.next();
            continue;
        }

        if c == '"' {
            chars.next();
            let mut raw = Vec::new();
            loop {
                match chars.next() {
                    Some('"') => break,
                    Some('\\') => {
                        raw.push(parse_escape(&mut chars)?);
                    }
                    Some(c) => {
                        let mut buf = [0u8; 4];
                        raw.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                    }
                    None => {
                        return Err(Error::Unexpected {
                            expected: "closing '\"'".to_string(),
                            got: line.to_string(),
                        })
                    }
                }
            }
            let text = String::from_utf8_lossy(&raw).to_string();
            tokens.push(Token {
                text,
                raw: Bytes::from(raw),
            });
            continue;
        }

        let mut raw = Vec::new();
        while let Some(&c) = chars.peek() {
            if c == ' ' || c == '\t' {
                break;
            }
            if c == '\\' {
                chars.next();
                raw.push(parse_escape(&mut chars)?);
            } else {
                chars.next();
                let mut buf = [0u8; 4];
                raw.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
        let text = String::from_utf8_lossy(&raw).to_string();
        tokens.push(Token {
            text,
            raw: Bytes::from(raw),
        });
    }

    Ok(tokens)
}

fn parse_escape<I: Iterator<Item = char>>(chars: &mut std::iter::Peekable<I>) -> Result<u8, Error> {
    match chars.next() {
        Some(c) if c.is_ascii_digit() => {
            let mut digits = vec![c];
            for _ in 0..2 {
                match chars.peek() {
                    Some(d) if d.is_ascii_digit() => digits.push(chars.next().unwrap()),
                    _ => break,
                }
            }
            let s: String = digits.into_iter().collect();
            s.parse::<u16>()
                .ok()
                .and_then(|n| u8::try_from(n).ok())
                .ok_or_else(|| Error::Unexpected {
                    expected: "decimal octet escape".to_string(),
                    got: s,
                })
        }
        Some(c) => Ok(c as u8),
        None => Err(Error::Unexpected {
            expected: "character after '\\'".to_string(),
            got: String::new(),
        }),
    }
}

/// Work out the owner name, TTL, and type for an RR line, and return
/// the remaining tokens as RDATA.
fn classify<'t>(
    tokens: &'t [Token],
    has_owner_column: bool,
    origin: &Option<DomainName>,
    previous_domain: &Option<DomainName>,
    previous_ttl: Option<u32>,
    default_ttl: Option<u32>,
) -> Result<(DomainName, u32, RecordType, &'t [Token]), Error> {
    let mut i = 0;

    let name = if has_owner_column {
        let tok = tokens.get(i).ok_or_else(|| Error::WrongLen {
            line: String::new(),
        })?;
        i += 1;
        parse_domain(origin, tok)?
    } else {
        previous_domain.clone().ok_or(Error::MissingPreviousOwner)?
    };

    let mut ttl = previous_ttl.or(default_ttl);
    let mut saw_class = false;

    // at most two of (ttl, class) precede the anchored <type> token
    for _ in 0..2 {
        let Some(tok) = tokens.get(i) else { break };
        if !saw_class && matches!(tok.text.as_str(), "IN" | "CH" | "HS") {
            saw_class = true;
            i += 1;
        } else if let Ok(t) = tok.text.parse::<u32>() {
            ttl = Some(t);
            i += 1;
        } else {
            break;
        }
    }

    let ttl = ttl.ok_or(Error::MissingPreviousTtl)?;

    let type_tok = tokens.get(i).ok_or_else(|| Error::WrongLen {
        line: String::new(),
    })?;
    let rtype = RecordType::from_str(&type_tok.text.to_ascii_uppercase()).map_err(|_| {
        Error::UnsupportedType {
            rtype: type_tok.text.clone(),
        }
    })?;
    i += 1;

    Ok((name, ttl, rtype, &tokens[i..]))
}

fn parse_domain(origin: &Option<DomainName>, tok: &Token) -> Result<DomainName, Error> {
    if tok.text == "@" {
        origin.clone().ok_or(Error::MissingOrigin)
    } else if tok.text.ends_with('.') {
        DomainName::from_dotted_string(&tok.text).ok_or_else(|| Error::Unexpected {
            expected: "domain name".to_string(),
            got: tok.text.clone(),
        })
    } else {
        let origin = origin.as_ref().ok_or(Error::MissingOrigin)?;
        DomainName::from_relative_dotted_string(origin, &tok.text).ok_or_else(|| {
            Error::Unexpected {
                expected: "domain name".to_string(),
                got: tok.text.clone(),
            }
        })
    }
}

fn parse_rdata(
    rtype: RecordType,
    origin: &Option<DomainName>,
    tokens: &[Token],
) -> Result<RecordTypeWithData, Error> {
    let domain = |tok: &Token| parse_domain(origin, tok);
    let u8_field = |tok: &Token| {
        tok.text.parse::<u8>().map_err(|_| Error::Unexpected {
            expected: "8-bit integer".to_string(),
            got: tok.text.clone(),
        })
    };
    let u16_field = |tok: &Token| {
        tok.text.parse::<u16>().map_err(|_| Error::Unexpected {
            expected: "16-bit integer".to_string(),
            got: tok.text.clone(),
        })
    };
    let u32_field = |tok: &Token| {
        tok.text.parse::<u32>().map_err(|_| Error::Unexpected {
            expected: "32-bit integer".to_string(),
            got: tok.text.clone(),
        })
    };

    match (rtype, tokens) {
        (RecordType::A, [addr]) => Ok(RecordTypeWithData::A {
            address: Ipv4Addr::from_str(&addr.text).map_err(|_| Error::Unexpected {
                expected: "IPv4 address".to_string(),
                got: addr.text.clone(),
            })?,
        }),
        (RecordType::AAAA, [addr]) => Ok(RecordTypeWithData::AAAA {
            address: Ipv6Addr::from_str(&addr.text).map_err(|_| Error::Unexpected {
                expected: "IPv6 address".to_string(),
                got: addr.text.clone(),
            })?,
        }),
        (RecordType::NS, [name]) => Ok(RecordTypeWithData::NS {
            nsdname: domain(name)?,
        }),
        (RecordType::MD, [name]) => Ok(RecordTypeWithData::MD {
            madname: domain(name)?,
        }),
        (RecordType::MF, [name]) => Ok(RecordTypeWithData::MF {
            madname: domain(name)?,
        }),
        (RecordType::CNAME, [name]) => Ok(RecordTypeWithData::CNAME {
            cname: domain(name)?,
        }),
        (RecordType::MB, [name]) => Ok(RecordTypeWithData::MB {
            madname: domain(name)?,
        }),
        (RecordType::MG, [name]) => Ok(RecordTypeWithData::MG {
            mdmname: domain(name)?,
        }),
        (RecordType::MR, [name]) => Ok(RecordTypeWithData::MR {
            newname: domain(name)?,
        }),
        (RecordType::PTR, [name]) => Ok(RecordTypeWithData::PTR {
            ptrdname: domain(name)?,
        }),
        (RecordType::SOA, [mname, rname, serial, refresh, retry, expire, minimum]) => {
            Ok(RecordTypeWithData::SOA {
                mname: domain(mname)?,
                rname: domain(rname)?,
                serial: u32_field(serial)?,
                refresh: u32_field(refresh)?,
                retry: u32_field(retry)?,
                expire: u32_field(expire)?,
                minimum: u32_field(minimum)?,
            })
        }
        (RecordType::MINFO, [rmailbx, emailbx]) => Ok(RecordTypeWithData::MINFO {
            rmailbx: domain(rmailbx)?,
            emailbx: domain(emailbx)?,
        }),
        (RecordType::MX, [preference, exchange]) => Ok(RecordTypeWithData::MX {
            preference: u16_field(preference)?,
            exchange: domain(exchange)?,
        }),
        (RecordType::TXT, rest) if !rest.is_empty() => {
            let mut octets = Vec::new();
            for tok in rest {
                octets.extend_from_slice(&tok.raw);
            }
            Ok(RecordTypeWithData::TXT {
                octets: Bytes::from(octets),
            })
        }
        (RecordType::NULL, [tok]) => Ok(RecordTypeWithData::NULL {
            octets: tok.raw.clone(),
        }),
        (RecordType::HINFO, [cpu, os]) => {
            let mut octets = Vec::new();
            octets.extend_from_slice(&cpu.raw);
            octets.push(b' ');
            octets.extend_from_slice(&os.raw);
            Ok(RecordTypeWithData::HINFO {
                octets: Bytes::from(octets),
            })
        }
        (RecordType::WKS, [tok]) => Ok(RecordTypeWithData::WKS {
            octets: tok.raw.clone(),
        }),
        (RecordType::SRV, [priority, weight, port, target]) => Ok(RecordTypeWithData::SRV {
            priority: u16_field(priority)?,
            weight: u16_field(weight)?,
            port: u16_field(port)?,
            target: domain(target)?,
        }),
        (RecordType::CAA, [flags, tag, value]) => Ok(RecordTypeWithData::CAA {
            flags: u8_field(flags)?,
            tag: Bytes::from(tag.text.clone().into_bytes()),
            value: value.raw.clone(),
        }),
        (rtype, _) => Err(Error::UnsupportedType {
            rtype: rtype.to_string(),
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    IncludeNotSupported,
    MultipleSOA,
    WildcardSOA,
    NotSubdomainOfApex {
        apex: DomainName,
        name: DomainName,
    },
    MissingOrigin,
    MissingPreviousOwner,
    MissingPreviousTtl,
    UnsupportedType {
        rtype: String,
    },
    WrongLen {
        line: String,
    },
    Unexpected {
        expected: String,
        got: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::IncludeNotSupported => write!(f, "'$INCLUDE' directive not supported"),
            Error::MultipleSOA => write!(f, "multiple SOA records, expected one or zero"),
            Error::WildcardSOA => write!(f, "wildcard SOA record not allowed"),
            Error::NotSubdomainOfApex { apex, name } => write!(
                f,
                "{name} is not a subdomain of the zone apex {apex}",
                name = name.to_dotted_string(),
                apex = apex.to_dotted_string(),
            ),
            Error::MissingOrigin => write!(f, "relative domain name used before '$ORIGIN'"),
            Error::MissingPreviousOwner => write!(f, "owner name omitted on the first record"),
            Error::MissingPreviousTtl => write!(f, "TTL omitted on the first record"),
            Error::UnsupportedType { rtype } => write!(f, "unsupported record type '{rtype}'"),
            Error::WrongLen { line } => write!(f, "malformed line: {line:?}"),
            Error::Unexpected { expected, got } => {
                write!(f, "expected {expected}, got {got:?}")
            }
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialise_simple_zone() {
        let data = "\
$ORIGIN example.com.
@ 3600 IN SOA ns1.example.com. hostmaster.example.com. 1 7200 3600 1209600 300
@ 3600 IN NS ns1.example.com.
ns1 3600 IN A 192.0.2.1
www 3600 IN A 192.0.2.2
www 3600 IN AAAA 2001:db8::2
";
        let zone = Zone::deserialise(data).unwrap();
        assert_eq!(&DomainName::from_dotted_string("example.com.").unwrap(), zone.get_apex());
        assert!(zone.is_authoritative());
        assert_eq!(
            Some(ZoneResult::Answer {
                rrs: vec![zone.soa_rr().unwrap()]
            }),
            zone.resolve(
                &DomainName::from_dotted_string("example.com.").unwrap(),
                QueryType::Record(RecordType::SOA)
            )
        );
    }

    #[test]
    fn deserialise_omitted_owner_and_ttl_reuse_previous() {
        let data = "\
$ORIGIN example.com.
www 300 IN A 192.0.2.1
    IN AAAA 2001:db8::1
";
        let zone = Zone::deserialise(data).unwrap();
        let name = DomainName::from_dotted_string("www.example.com.").unwrap();
        match zone.resolve(&name, QueryType::Record(RecordType::AAAA)) {
            Some(ZoneResult::Answer { rrs }) => assert_eq!(1, rrs.len()),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn deserialise_rejects_multiple_soa() {
        let data = "\
$ORIGIN example.com.
@ 3600 IN SOA ns1.example.com. hostmaster.example.com. 1 7200 3600 1209600 300
@ 3600 IN SOA ns1.example.com. hostmaster.example.com. 2 7200 3600 1209600 300
";
        assert_eq!(Err(Error::MultipleSOA), Zone::deserialise(data));
    }

    #[test]
    fn deserialise_rejects_out_of_zone_record() {
        let data = "\
$ORIGIN example.com.
@ 3600 IN SOA ns1.example.com. hostmaster.example.com. 1 7200 3600 1209600 300
www.elsewhere.net. 3600 IN A 192.0.2.1
";
        assert!(matches!(
            Zone::deserialise(data),
            Err(Error::NotSubdomainOfApex { .. })
        ));
    }

    #[test]
    fn deserialise_multiline_soa() {
        let data = "\
$ORIGIN example.com.
@ 3600 IN SOA ns1.example.com. hostmaster.example.com. (
    1          ; serial
    7200       ; refresh
    3600       ; retry
    1209600    ; expire
    300 )      ; minimum
";
        let zone = Zone::deserialise(data).unwrap();
        assert!(zone.is_authoritative());
    }

    #[test]
    fn deserialise_wildcard() {
        let data = "\
$ORIGIN example.com.
@ 3600 IN SOA ns1.example.com. hostmaster.example.com. 1 7200 3600 1209600 300
*.example.com. 3600 IN A 192.0.2.9
";
        let zone = Zone::deserialise(data).unwrap();
        let name = DomainName::from_dotted_string("anything.example.com.").unwrap();
        assert!(matches!(
            zone.resolve(&name, QueryType::Record(RecordType::A)),
            Some(ZoneResult::Answer { .. })
        ));
    }

    #[test]
    fn deserialise_ttl_directive_sets_default() {
        let data = "\
$ORIGIN example.com.
$TTL 900
@ IN SOA ns1.example.com. hostmaster.example.com. 1 7200 3600 1209600 300
www IN A 192.0.2.1
";
        let zone = Zone::deserialise(data).unwrap();
        let name = DomainName::from_dotted_string("www.example.com.").unwrap();
        match zone.resolve(&name, QueryType::Record(RecordType::A)) {
            Some(ZoneResult::Answer { rrs }) => assert_eq!(900, rrs[0].ttl),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn deserialise_skips_bad_line_and_keeps_going() {
        let data = "\
$ORIGIN example.com.
@ 3600 IN SOA ns1.example.com. hostmaster.example.com. 1 7200 3600 1209600 300
www 3600 IN BOGUSTYPE this is nonsense
good 3600 IN A 192.0.2.7
";
        let zone = Zone::deserialise(data).unwrap();
        let name = DomainName::from_dotted_string("good.example.com.").unwrap();
        assert!(matches!(
            zone.resolve(&name, QueryType::Record(RecordType::A)),
            Some(ZoneResult::Answer { .. })
        ));
        let bad_name = DomainName::from_dotted_string("www.example.com.").unwrap();
        assert_eq!(Some(ZoneResult::NameError), zone.resolve(&bad_name, QueryType::Record(RecordType::A)));
    }
}
