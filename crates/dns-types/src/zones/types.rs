use std::collections::HashMap;

use crate::protocol::types::*;

/// A collection of zones, each independently authoritative.
///
/// Unlike a resolver with a cache, every zone held here is
/// authoritative: there is no merging of authoritative data with
/// cached non-authoritative data, so at most one zone exists per
/// apex.
#[derive(Debug, Clone, Default)]
pub struct ZoneStore {
    zones: HashMap<DomainName, Zone>,
}

impl ZoneStore {
    pub fn new() -> Self {
        Self {
            zones: HashMap::new(),
        }
    }

    /// Find the zone responsible for a domain: the zone whose apex is
    /// the longest suffix of `name`, if any.
    pub fn find_zone(&self, name: &DomainName) -> Option<&Zone> {
        for i in 0..name.labels.len() {
            let labels = &name.labels[i..];
            if let Some(candidate) = DomainName::from_labels(labels.into()) {
                if let Some(zone) = self.zones.get(&candidate) {
                    return Some(zone);
                }
            }
        }

        None
    }

    /// Resolve a query against the appropriate zone.  Returns `None`
    /// if no zone in this store covers the name.
    #[allow(clippy::missing_panics_doc)]
    pub fn resolve(&self, name: &DomainName, qtype: QueryType) -> Option<(&Zone, ZoneResult)> {
        let zone = self.find_zone(name)?;
        // safe because `find_zone` only returns zones which are a
        // suffix match for `name`
        let result = zone.resolve(name, qtype).unwrap();
        Some((zone, result))
    }

    /// Replace (or add) a zone, keyed by its apex.
    pub fn insert(&mut self, zone: Zone) {
        self.zones.insert(zone.apex.clone(), zone);
    }

    /// All zones currently loaded, keyed by apex.
    pub fn zones(&self) -> &HashMap<DomainName, Zone> {
        &self.zones
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

/// A zone: a flat collection of records all belonging to the same
/// origin, as parsed from a single master file.
///
/// Unlike a resolver cache, a zone here has no notion of partial or
/// merged data: it is either a complete, authoritative copy of the
/// zone's contents (has a `SOA`) or (for the rare non-authoritative
/// stub case) has none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zone {
    /// The domain name which the records all belong to.
    apex: DomainName,

    /// The SOA record for this zone, if it is authoritative.
    soa: Option<SOA>,

    /// Every record in the zone, including the SOA (if present) and
    /// wildcard owner names (e.g. `*.example.com.`) verbatim as they
    /// appeared in the zone file.
    records: Vec<ResourceRecord>,

    /// Path this zone was most recently loaded from, and the mtime
    /// observed at load time, for hot-reload.
    source: Option<ZoneSource>,
}

/// Bookkeeping for mtime-based hot-reload: where a zone came from and
/// when it was last loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneSource {
    pub path: std::path::PathBuf,
    pub loaded_mtime: std::time::SystemTime,
}

impl Default for Zone {
    fn default() -> Self {
        Self::new(DomainName::root_domain(), None)
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for Zone {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        let mut zone = if u.arbitrary()? {
            Self::new(u.arbitrary()?, Some(u.arbitrary()?))
        } else {
            Self::new(DomainName::root_domain(), None)
        };

        let apex = zone.get_apex().clone();

        let len = u.int_in_range::<usize>(0..=128)?;
        for _ in 0..len {
            let mut rr: ResourceRecord = u.arbitrary()?;
            let mut combined_labels = rr.name.labels;
            combined_labels.pop();
            // crude shrinking to fit in the 255 octet limit -
            // generated labels are up to 20 characters long,
            // `num_labels * 21 <= 255` has to hold
            while (combined_labels.len() + apex.labels.len()) * 21 > DOMAINNAME_MAX_LEN {
                combined_labels.pop();
            }
            combined_labels.append(&mut apex.labels.clone());
            rr.name = DomainName::from_labels(combined_labels).unwrap();

            if rr.rtype_with_data.rtype() == RecordType::SOA
                || rr.rtype_with_data.rtype().is_unknown()
            {
                rr.rtype_with_data = RecordTypeWithData::A {
                    address: u.arbitrary()?,
                };
            }

            zone.insert(rr.name, rr.rtype_with_data, rr.ttl);
        }

        assert!(
            zone.get_apex() == &DomainName::root_domain() || zone.is_authoritative(),
            "non-authoritative zone with apex!\n\n{:?}\n\n",
            zone.get_apex()
        );

        Ok(zone)
    }
}

impl Zone {
    /// Construct a new, empty zone.
    ///
    /// If there is a `SOA` value, it is inserted as a record at the
    /// apex.
    pub fn new(apex: DomainName, soa: Option<SOA>) -> Self {
        let mut records = Vec::new();
        if let Some(soa) = &soa {
            records.push(soa.to_rr(&apex));
        }

        Self {
            apex,
            soa,
            records,
            source: None,
        }
    }

    pub fn get_apex(&self) -> &DomainName {
        &self.apex
    }

    pub fn get_soa(&self) -> &Option<SOA> {
        &self.soa
    }

    pub fn is_authoritative(&self) -> bool {
        self.soa.is_some()
    }

    pub fn soa_rr(&self) -> Option<ResourceRecord> {
        self.soa.as_ref().map(|soa| soa.to_rr(&self.apex))
    }

    /// The zone's own NS records, i.e. the ones advertising who is
    /// authoritative for it. Every authoritative zone carries these at
    /// its apex; used to populate the authority section of positive
    /// answers.
    pub fn apex_ns_rrs(&self) -> Vec<ResourceRecord> {
        self.records
            .iter()
            .filter(|rr| rr.name == self.apex && rr.rtype_with_data.rtype() == RecordType::NS)
            .cloned()
            .collect()
    }

    pub fn source(&self) -> Option<&ZoneSource> {
        self.source.as_ref()
    }

    pub fn set_source(&mut self, path: std::path::PathBuf, loaded_mtime: std::time::SystemTime) {
        self.source = Some(ZoneSource { path, loaded_mtime });
    }

    pub fn records(&self) -> &[ResourceRecord] {
        &self.records
    }

    /// Insert a record.  `name` MUST be a subdomain of the apex (or
    /// a wildcard owner name under it, e.g. `*.example.com.`).
    ///
    /// For authoritative zones, the SOA `minimum` field is a lower
    /// bound on the TTL of any RR in the zone; if this TTL is lower,
    /// it will be raised.
    pub fn insert(&mut self, name: DomainName, rtype_with_data: RecordTypeWithData, ttl: u32) {
        let rr = ResourceRecord {
            name,
            rtype_with_data,
            rclass: RecordClass::IN,
            ttl: self.actual_ttl(ttl),
        };
        if !self.records.contains(&rr) {
            self.records.push(rr);
        }
    }

    /// If this zone is authoritative, and the given TTL is below the
    /// SOA `minimum` field, returns the SOA `minimum` field.
    /// Otherwise returns the given TTL.
    pub fn actual_ttl(&self, ttl: u32) -> u32 {
        if let Some(soa) = &self.soa {
            std::cmp::max(soa.minimum, ttl)
        } else {
            ttl
        }
    }

    /// Resolve a query.  Returns `None` if the domain is not a
    /// subdomain of the apex.
    ///
    /// This corresponds to step 3 of the standard nameserver
    /// algorithm (see section 4.3.2 of RFC 1034), including the
    /// wildcard synthesis of section 4.3.3.
    pub fn resolve(&self, name: &DomainName, qtype: QueryType) -> Option<ZoneResult> {
        if !name.is_subdomain_of(&self.apex) {
            return None;
        }

        let apex_len = self.apex.labels.len();
        let depth = name.labels.len() - apex_len;

        // Walk from the apex towards `name`, stopping at the first
        // ancestor (other than `name` itself) which delegates
        // elsewhere via NS records.
        for d in (1..depth).rev() {
            let ancestor = suffix_at_depth(name, apex_len, d);
            let ns_rrs: Vec<ResourceRecord> = self
                .records
                .iter()
                .filter(|rr| rr.name == ancestor && rr.rtype_with_data.rtype() == RecordType::NS)
                .cloned()
                .collect();
            if !ns_rrs.is_empty() {
                return Some(ZoneResult::Delegation { ns_rrs });
            }
        }

        Some(self.resolve_at_name(name, qtype, depth, apex_len))
    }

    fn resolve_at_name(
        &self,
        name: &DomainName,
        qtype: QueryType,
        depth: usize,
        apex_len: usize,
    ) -> ZoneResult {
        let exact: Vec<ResourceRecord> = self
            .records
            .iter()
            .filter(|rr| rr.name == *name)
            .cloned()
            .collect();

        if !exact.is_empty() {
            return terminal(qtype, &exact, depth == 0);
        }

        // No exact match: try wildcard synthesis, from the closest
        // enclosing ancestor outwards (RFC 1034 §4.3.3).
        for d in (0..depth).rev() {
            let ancestor = suffix_at_depth(name, apex_len, d);
            let mut wildcard_labels = vec![Label::try_from(&b"*"[..]).unwrap()];
            wildcard_labels.extend(ancestor.labels.clone());
            let Some(wildcard_name) = DomainName::from_labels(wildcard_labels) else {
                continue;
            };

            let matched: Vec<ResourceRecord> = self
                .records
                .iter()
                .filter(|rr| rr.name == wildcard_name)
                .map(|rr| ResourceRecord {
                    name: name.clone(),
                    rtype_with_data: rr.rtype_with_data.clone(),
                    rclass: rr.rclass,
                    ttl: rr.ttl,
                })
                .collect();

            if !matched.is_empty() {
                // wildcard synthesis only ever fills in for a query
                // name strictly below the apex (d < depth <= name's
                // own depth, and depth == 0 already returned above),
                // so the synthesised owner is never the apex itself.
                return terminal(qtype, &matched, false);
            }

            // A closer ancestor which has ANY record (even of a
            // different name/type) but no wildcard match means we
            // must not fall through to a more distant wildcard: that
            // ancestor is itself present in the zone, so there is no
            // "empty non-terminal" gap for the wildcard to fill.
            if self.records.iter().any(|rr| rr.name == ancestor) {
                break;
            }
        }

        if self.records.iter().any(|rr| rr.name.is_subdomain_of(name)) {
            ZoneResult::NoData
        } else {
            ZoneResult::NameError
        }
    }

    /// Every record in the zone, grouped by owner name.
    pub fn all_records(&self) -> HashMap<&DomainName, Vec<&ResourceRecord>> {
        let mut map: HashMap<&DomainName, Vec<&ResourceRecord>> = HashMap::new();
        for rr in &self.records {
            map.entry(&rr.name).or_default().push(rr);
        }
        map
    }
}

/// The ancestor of `name` which has exactly `depth` labels below the
/// apex (whose own label count is `apex_len`).
fn suffix_at_depth(name: &DomainName, apex_len: usize, depth: usize) -> DomainName {
    let start = name.labels.len() - apex_len - depth;
    DomainName::from_labels(name.labels[start..].to_vec()).unwrap()
}

/// The result of looking up a name in a zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZoneResult {
    /// One or more records answer the question directly.
    Answer { rrs: Vec<ResourceRecord> },
    /// The name exists, but there's a `CNAME` here and the qtype
    /// doesn't match `CNAME`: the caller should chase it.
    CNAME {
        cname: DomainName,
        rr: ResourceRecord,
    },
    /// The name is delegated to another nameserver.
    Delegation { ns_rrs: Vec<ResourceRecord> },
    /// The name exists somewhere in the zone (has descendants) but
    /// has no records of the requested type.
    NoData,
    /// The name does not exist in the zone at all.
    NameError,
}

/// Handles the terminal cases of step 3 of the standard nameserver
/// algorithm.  If we're here, we've got a domain and records which
/// are associated with it exactly (whether directly or via wildcard
/// synthesis). The possible cases are:
///
/// - There are `NS` record(s) delegating this name elsewhere, and the
///   qtype is not *exactly equal to* `NS`, and the name is not the
///   zone apex. Every authoritative zone has `NS` records at its own
///   apex (that's what makes it authoritative, not delegated), so
///   apex `NS` must never be read as a self-referral — only `NS` set
///   on a name strictly between the apex and the qname delegates. In
///   that case we should return those as a delegation.
///
/// - There's a `CNAME` record on this name, and the qtype does *not*
///   match `CNAME`.  In which case we return a `CNAME` response, and
///   the caller resolves that name in turn.
///
/// - Otherwise, return all RRs which match the query: this answers
///   the question (possibly with no records at all, i.e. NODATA).
fn terminal(qtype: QueryType, records: &[ResourceRecord], is_apex: bool) -> ZoneResult {
    if !is_apex && QueryType::Record(RecordType::NS) != qtype {
        let ns_rrs: Vec<ResourceRecord> = records
            .iter()
            .filter(|rr| rr.rtype_with_data.rtype() == RecordType::NS)
            .cloned()
            .collect();
        if !ns_rrs.is_empty() {
            return ZoneResult::Delegation { ns_rrs };
        }
    }

    if !RecordType::CNAME.matches(qtype) {
        if let Some(rr) = records
            .iter()
            .find(|rr| rr.rtype_with_data.rtype() == RecordType::CNAME)
        {
            if let RecordTypeWithData::CNAME { cname } = &rr.rtype_with_data {
                return ZoneResult::CNAME {
                    cname: cname.clone(),
                    rr: rr.clone(),
                };
            }
        }
    }

    let rrs: Vec<ResourceRecord> = match qtype {
        QueryType::Wildcard => records.to_vec(),
        QueryType::Record(rtype) => records
            .iter()
            .filter(|rr| rr.rtype_with_data.rtype() == rtype)
            .cloned()
            .collect(),
        _ => Vec::new(),
    };

    if rrs.is_empty() {
        ZoneResult::NoData
    } else {
        ZoneResult::Answer { rrs }
    }
}

/// A SOA record.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(any(feature = "test-util", test), derive(arbitrary::Arbitrary))]
pub struct SOA {
    pub mname: DomainName,
    pub rname: DomainName,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
}

impl SOA {
    /// Convert it into a SOA RR.
    pub fn to_rr(&self, name: &DomainName) -> ResourceRecord {
        ResourceRecord {
            name: name.clone(),
            rtype_with_data: self.to_rdata(),
            rclass: RecordClass::IN,
            ttl: self.minimum,
        }
    }

    /// Convert it into SOA RDATA.
    pub fn to_rdata(&self) -> RecordTypeWithData {
        RecordTypeWithData::SOA {
            mname: self.mname.clone(),
            rname: self.rname.clone(),
            serial: self.serial,
            refresh: self.refresh,
            retry: self.retry,
            expire: self.expire,
            minimum: self.minimum,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::protocol::types::test_util::*;

    #[test]
    fn zonestore_longest_suffix_match() {
        let apex = domain("example.com.");
        let a_rr = a_record("foo.bar.baz.example.com.", Ipv4Addr::new(1, 1, 1, 1));

        let mut zone = Zone::new(apex, None);
        zone.insert(a_rr.name.clone(), a_rr.rtype_with_data.clone(), a_rr.ttl);

        let mut store = ZoneStore::new();
        store.insert(zone.clone());

        assert_eq!(None, store.find_zone(&domain(".")));
        assert_eq!(None, store.find_zone(&domain("com.")));
        assert_eq!(Some(&zone), store.find_zone(&domain("example.com.")));
        assert_eq!(Some(&zone), store.find_zone(&domain("www.example.com.")));
    }

    #[test]
    fn zone_authoritative_minimum_ttl() {
        let zone = Zone::new(
            domain("example.com."),
            Some(SOA {
                mname: domain("mname."),
                rname: domain("rname."),
                serial: 1,
                refresh: 2,
                retry: 3,
                expire: 4,
                minimum: 300,
            }),
        );

        assert_eq!(300, zone.actual_ttl(30));
        assert_eq!(301, zone.actual_ttl(301));
    }

    #[test]
    fn zone_resolve_soa() {
        let apex = domain("example.com.");
        let soa = SOA {
            mname: domain("mname."),
            rname: domain("rname."),
            serial: 1,
            refresh: 2,
            retry: 3,
            expire: 4,
            minimum: 5,
        };
        let soa_rr = soa.to_rr(&apex);

        let zone = Zone::new(apex.clone(), Some(soa));

        assert_eq!(
            Some(ZoneResult::Answer { rrs: vec![soa_rr] }),
            zone.resolve(&apex, QueryType::Record(RecordType::SOA))
        );
    }

    #[test]
    fn zone_insert_resolve() {
        let mut zone = Zone::new(domain("example.com."), None);
        let rr = a_record("www.example.com.", Ipv4Addr::new(1, 1, 1, 1));
        zone.insert(rr.name.clone(), rr.rtype_with_data.clone(), rr.ttl);

        let expected = Some(ZoneResult::Answer {
            rrs: vec![rr.clone()],
        });

        assert_eq!(
            expected,
            zone.resolve(&rr.name, QueryType::Record(RecordType::A))
        );
        assert_eq!(expected, zone.resolve(&rr.name, QueryType::Wildcard));
    }

    #[test]
    fn zone_insert_wildcard_resolve() {
        let mut zone = Zone::new(domain("example.com."), None);
        let wildcard_rr = a_record("*.example.com.", Ipv4Addr::new(1, 1, 1, 1));
        zone.insert(
            wildcard_rr.name.clone(),
            wildcard_rr.rtype_with_data.clone(),
            wildcard_rr.ttl,
        );

        let expected_name = domain("foo.example.com.");
        let expected_rr = a_record("foo.example.com.", Ipv4Addr::new(1, 1, 1, 1));

        assert_eq!(
            Some(ZoneResult::Answer {
                rrs: vec![expected_rr]
            }),
            zone.resolve(&expected_name, QueryType::Record(RecordType::A))
        );
    }

    #[test]
    fn zone_resolve_cname() {
        let mut zone = Zone::new(domain("example.com."), None);
        let rr = cname_record("www.example.com.", "example.com.");
        zone.insert(rr.name.clone(), rr.rtype_with_data.clone(), rr.ttl);

        assert_eq!(
            Some(ZoneResult::CNAME {
                cname: domain("example.com."),
                rr: rr.clone()
            }),
            zone.resolve(&rr.name, QueryType::Record(RecordType::A))
        );
        assert_eq!(
            Some(ZoneResult::Answer {
                rrs: vec![rr.clone()]
            }),
            zone.resolve(&rr.name, QueryType::Record(RecordType::CNAME))
        );
    }

    #[test]
    fn zone_resolve_delegation() {
        let mut zone = Zone::new(domain("example.com."), None);
        let rr = ns_record("www.example.com.", "ns.example.com.");
        zone.insert(rr.name.clone(), rr.rtype_with_data.clone(), rr.ttl);

        assert_eq!(
            Some(ZoneResult::Delegation {
                ns_rrs: vec![rr.clone()]
            }),
            zone.resolve(&rr.name, QueryType::Record(RecordType::A))
        );
        assert_eq!(
            Some(ZoneResult::Answer {
                rrs: vec![rr.clone()]
            }),
            zone.resolve(&rr.name, QueryType::Record(RecordType::NS))
        );

        assert_eq!(
            Some(ZoneResult::Delegation {
                ns_rrs: vec![rr.clone()]
            }),
            zone.resolve(&domain("deep.www.example.com."), QueryType::Record(RecordType::A))
        );
    }

    #[test]
    fn zone_resolve_apex_ns_is_not_a_delegation() {
        let apex = domain("example.com.");
        let soa = SOA {
            mname: domain("mname."),
            rname: domain("rname."),
            serial: 1,
            refresh: 2,
            retry: 3,
            expire: 4,
            minimum: 5,
        };
        let mut zone = Zone::new(apex.clone(), Some(soa));
        let ns_rr = ns_record("example.com.", "ns1.example.com.");
        zone.insert(ns_rr.name.clone(), ns_rr.rtype_with_data.clone(), ns_rr.ttl);
        let a_rr = a_record("example.com.", Ipv4Addr::new(1, 1, 1, 1));
        zone.insert(a_rr.name.clone(), a_rr.rtype_with_data.clone(), a_rr.ttl);

        assert_eq!(
            Some(ZoneResult::Answer {
                rrs: vec![ns_rr.clone()]
            }),
            zone.resolve(&apex, QueryType::Record(RecordType::NS))
        );
        assert_eq!(
            Some(ZoneResult::Answer { rrs: vec![a_rr] }),
            zone.resolve(&apex, QueryType::Record(RecordType::A))
        );
        assert_eq!(
            Some(ZoneResult::Answer {
                rrs: vec![zone.soa_rr().unwrap()]
            }),
            zone.resolve(&apex, QueryType::Record(RecordType::SOA))
        );
        assert_eq!(
            Some(ZoneResult::NoData),
            zone.resolve(&apex, QueryType::Record(RecordType::MX))
        );
    }

    #[test]
    fn zone_resolve_nameerror() {
        let mut zone = Zone::new(domain("example.com."), None);
        let rr = a_record("www.example.com.", Ipv4Addr::new(1, 1, 1, 1));
        zone.insert(rr.name, rr.rtype_with_data, rr.ttl);

        assert_eq!(
            Some(ZoneResult::NameError),
            zone.resolve(&domain("sibling.example.com."), QueryType::Wildcard)
        );
    }

    #[test]
    fn zone_resolve_nodata_for_existing_subdomain() {
        let mut zone = Zone::new(domain("example.com."), None);
        let rr = a_record(
            "long.chain.of.subdomains.example.com.",
            Ipv4Addr::new(1, 1, 1, 1),
        );
        zone.insert(rr.name, rr.rtype_with_data, rr.ttl);

        assert_eq!(
            Some(ZoneResult::NoData),
            zone.resolve(
                &domain("chain.of.subdomains.example.com."),
                QueryType::Wildcard,
            )
        );
        assert_eq!(
            Some(ZoneResult::NoData),
            zone.resolve(&domain("example.com."), QueryType::Wildcard)
        );
    }
}
