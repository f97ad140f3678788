//! Answers a single query against a set of authoritative zones.
//!
//! There is no cache and no recursion here: every query is answered
//! directly out of the `ZoneStore` that's handed in, which is exactly
//! what an authoritative-only nameserver needs. The entry point,
//! [`resolve`], is a pure function: same question plus same zones
//! always gives the same message back, which makes it trivial to
//! drive from any transport.

use std::collections::HashSet;

use bytes::Bytes;

use dns_types::protocol::edns::Edns;
use dns_types::protocol::types::*;
use dns_types::zones::types::*;

/// Maximum number of `CNAME`s to chase before giving up. RFC 1034
/// doesn't mandate a specific limit, but an unbounded chase is a
/// denial-of-service vector if zone data is ever attacker-influenced.
pub const MAX_CNAME_CHAIN: usize = 16;

/// The EDNS version this core understands. Any other requested
/// version gets `BADVERS` (RFC 6891 §6.1.3).
const SUPPORTED_EDNS_VERSION: u8 = 0;

/// Our own advertised UDP payload size, put into responding OPT
/// records regardless of what the requestor sent.
const RESPONDER_UDP_PAYLOAD_SIZE: u16 = 1232;

/// Answer a single question against a zone store.
///
/// This corresponds to the standard nameserver algorithm of RFC 1034
/// §4.3.2, restricted to step 3 (there is no recursion here, so steps
/// 1 and 4 don't apply): look up the zone, walk down through it
/// following delegations and wildcards, chase any `CNAME`s found
/// along the way, and turn whatever's left into a response message.
#[must_use]
pub fn resolve(query: &Message, zones: &ZoneStore) -> Message {
    let mut response = query.make_response();

    let Some(question) = query.questions.first().cloned() else {
        response.header.rcode = Rcode::FormatError;
        return response;
    };
    let _span = tracing::error_span!("resolve", %question).entered();
    response.questions = vec![question.clone()];

    let edns = query.edns();
    if let Some(edns) = &edns {
        if edns.is_unsupported_version() {
            tracing::debug!(version = edns.version, "unsupported EDNS version");
            response.additional.push(bad_version_opt(edns));
            return response;
        }
    }

    let outcome = chase(zones, &question);

    response.header.is_authoritative = outcome.is_authoritative;
    response.answers = outcome.answers;
    response.authority = outcome.authority;
    response.additional = outcome.additional;
    response.header.rcode = outcome.rcode;

    if let Some(edns) = edns {
        response.additional.push(Edns {
            udp_payload_size: RESPONDER_UDP_PAYLOAD_SIZE,
            extended_rcode_high: 0,
            version: SUPPORTED_EDNS_VERSION,
            dnssec_ok: edns.dnssec_ok,
            options: Bytes::new(),
        }
        .to_rr());
    }

    response
}

fn bad_version_opt(requested: &Edns) -> ResourceRecord {
    Edns {
        udp_payload_size: requested.udp_payload_size,
        // BADVERS is extended RCODE 16 = 0b0001_0000; the low 4 bits
        // live in the header's RCODE (left as NOERROR), so only the
        // high byte needs setting here.
        extended_rcode_high: 1,
        version: SUPPORTED_EDNS_VERSION,
        dnssec_ok: false,
        options: Bytes::new(),
    }
    .to_rr()
}

/// The result of walking a question down through the zone store:
/// answers, any CNAMEs chased along the way, and enough authority and
/// additional data to make the response self-contained.
struct Outcome {
    answers: Vec<ResourceRecord>,
    authority: Vec<ResourceRecord>,
    additional: Vec<ResourceRecord>,
    is_authoritative: bool,
    rcode: Rcode,
}

/// Resolve a question, following `CNAME`s (up to `MAX_CNAME_CHAIN`
/// hops, and bailing out early on a cycle) until an answer,
/// delegation, or negative result is reached.
fn chase(zones: &ZoneStore, question: &Question) -> Outcome {
    let mut answers = Vec::new();
    let mut current_name = question.name.clone();
    let mut authoritative = true;
    let mut visited = HashSet::new();

    for _ in 0..=MAX_CNAME_CHAIN {
        if !visited.insert(current_name.clone()) {
            tracing::debug!(%current_name, "CNAME cycle detected");
            break;
        }

        let Some((zone, zone_result)) = zones.resolve(&current_name, question.qtype) else {
            tracing::debug!(%current_name, "no zone covers this name");
            return Outcome {
                answers,
                authority: Vec::new(),
                additional: Vec::new(),
                is_authoritative: false,
                rcode: Rcode::Refused,
            };
        };

        authoritative = authoritative && zone.is_authoritative();

        match zone_result {
            ZoneResult::Answer { rrs } => {
                answers.extend(rrs);
                let ns_rrs = zone.apex_ns_rrs();
                let additional = glue(zones, &ns_rrs);
                return Outcome {
                    answers,
                    authority: ns_rrs,
                    additional,
                    is_authoritative: authoritative,
                    rcode: Rcode::NoError,
                };
            }
            ZoneResult::CNAME { cname, rr } => {
                answers.push(rr);
                current_name = cname;
            }
            ZoneResult::Delegation { ns_rrs } => {
                let additional = glue(zones, &ns_rrs);
                return Outcome {
                    answers,
                    authority: ns_rrs,
                    additional,
                    is_authoritative: false,
                    rcode: Rcode::NoError,
                };
            }
            ZoneResult::NoData => {
                return Outcome {
                    answers,
                    authority: zone.soa_rr().into_iter().collect(),
                    additional: Vec::new(),
                    is_authoritative: authoritative,
                    rcode: Rcode::NoError,
                };
            }
            ZoneResult::NameError => {
                return Outcome {
                    answers,
                    authority: zone.soa_rr().into_iter().collect(),
                    additional: Vec::new(),
                    is_authoritative: authoritative,
                    rcode: Rcode::NameError,
                };
            }
        }
    }

    tracing::debug!("gave up chasing CNAMEs");
    Outcome {
        answers,
        authority: Vec::new(),
        additional: Vec::new(),
        is_authoritative: authoritative,
        rcode: Rcode::NoError,
    }
}

/// Look up glue (A/AAAA) records for a set of delegated nameservers,
/// so the additional section is self-contained when the glue lives
/// in a zone we're authoritative for.
fn glue(zones: &ZoneStore, ns_rrs: &[ResourceRecord]) -> Vec<ResourceRecord> {
    let mut additional = Vec::new();

    for rr in ns_rrs {
        let RecordTypeWithData::NS { nsdname } = &rr.rtype_with_data else {
            continue;
        };

        for qtype in [RecordType::A, RecordType::AAAA] {
            if let Some((_, ZoneResult::Answer { rrs })) =
                zones.resolve(nsdname, QueryType::Record(qtype))
            {
                additional.extend(rrs);
            }
        }
    }

    additional
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use dns_types::protocol::types::test_util::*;

    use super::*;

    fn query_for(name: &str, qtype: QueryType) -> Message {
        Message::from_question(
            1,
            Question {
                name: domain(name),
                qtype,
                qclass: QueryClass::Record(RecordClass::IN),
            },
        )
    }

    fn store() -> ZoneStore {
        let mut store = ZoneStore::new();
        store.insert(
            Zone::deserialise(
                r"
$ORIGIN example.com.

@       300 IN SOA ns1.example.com. hostmaster.example.com. 1 7200 3600 1209600 300
@       300 IN NS  ns1.example.com.
ns1     300 IN A   192.0.2.1
www     300 IN A   192.0.2.2
alias   300 IN CNAME www.example.com.
deep    300 IN NS  ns.delegated.example.com.
ns.delegated 300 IN A 192.0.2.53
",
            )
            .unwrap(),
        );
        store
    }

    #[test]
    fn answers_a_record() {
        let response = resolve(
            &query_for("www.example.com.", QueryType::Record(RecordType::A)),
            &store(),
        );
        assert_eq!(Rcode::NoError, response.header.rcode);
        assert!(response.header.is_authoritative);
        assert_eq!(
            vec![a_record("www.example.com.", Ipv4Addr::new(192, 0, 2, 2))],
            response.answers
        );
    }

    #[test]
    fn answer_carries_apex_ns_in_authority() {
        let response = resolve(
            &query_for("www.example.com.", QueryType::Record(RecordType::A)),
            &store(),
        );
        assert_eq!(Rcode::NoError, response.header.rcode);
        assert_eq!(
            vec![ns_record("example.com.", "ns1.example.com.")],
            response.authority
        );
        assert_eq!(
            vec![a_record("ns1.example.com.", Ipv4Addr::new(192, 0, 2, 1))],
            response.additional
        );
    }

    #[test]
    fn chases_cname() {
        let response = resolve(
            &query_for("alias.example.com.", QueryType::Record(RecordType::A)),
            &store(),
        );
        assert_eq!(Rcode::NoError, response.header.rcode);
        assert_eq!(2, response.answers.len());
        assert_eq!(RecordType::CNAME, response.answers[0].rtype_with_data.rtype());
        assert_eq!(RecordType::A, response.answers[1].rtype_with_data.rtype());
    }

    #[test]
    fn name_error_carries_soa() {
        let response = resolve(
            &query_for("nope.example.com.", QueryType::Record(RecordType::A)),
            &store(),
        );
        assert_eq!(Rcode::NameError, response.header.rcode);
        assert_eq!(1, response.authority.len());
        assert_eq!(RecordType::SOA, response.authority[0].rtype_with_data.rtype());
    }

    #[test]
    fn delegation_includes_glue() {
        let response = resolve(
            &query_for(
                "somewhere.deep.example.com.",
                QueryType::Record(RecordType::A),
            ),
            &store(),
        );
        assert_eq!(Rcode::NoError, response.header.rcode);
        assert!(!response.header.is_authoritative);
        assert_eq!(1, response.authority.len());
        assert_eq!(
            vec![a_record("ns.delegated.example.com.", Ipv4Addr::new(192, 0, 2, 53))],
            response.additional
        );
    }

    #[test]
    fn bad_edns_version_yields_badvers() {
        let mut query = query_for("www.example.com.", QueryType::Record(RecordType::A));
        query.additional.push(
            Edns {
                udp_payload_size: 4096,
                extended_rcode_high: 0,
                version: 1,
                dnssec_ok: false,
                options: Bytes::new(),
            }
            .to_rr(),
        );

        let response = resolve(&query, &store());
        let opt = response.edns().expect("OPT record in response");
        assert_eq!(16, opt.extended_rcode(response.header.rcode));
    }
}
