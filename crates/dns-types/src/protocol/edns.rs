//! The EDNS0 OPT pseudo-record (RFC 6891 §6.1).
//!
//! `OPT` is never a "real" record: it never appears in a question, its
//! owner name is always the root, and two of its fixed fields are
//! reinterpreted rather than meaning what they say for every other RR
//! type. This module bridges that reinterpretation to and from the plain
//! `ResourceRecord` the wire codec produces, the same way `zones::types::SOA`
//! bridges a typed record to a `ResourceRecord` via `to_rr`/`to_rdata`.

use crate::protocol::types::{
    DomainName, Rcode, RecordClass, RecordTypeWithData, ResourceRecord,
};
use bytes::Bytes;

/// Bit within the reinterpreted TTL field that marks "DNSSEC OK".
const EDNS_FLAG_DO: u32 = 0b1000_0000_0000_0000;

/// A requestor or responder's EDNS0 OPT record, decoded from the wire
/// shape into its actual fields.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Edns {
    /// The sender's UDP payload size, carried in the RR's `CLASS` field.
    pub udp_payload_size: u16,

    /// Upper 8 bits of the 12-bit extended RCODE, carried in the
    /// top octet of the RR's `TTL` field.  Combine with the low 4 bits
    /// of the message header's RCODE to get the full code: a value of
    /// 16 means `BADVERS`.
    pub extended_rcode_high: u8,

    /// EDNS version.  This core implements version 0 only; any other
    /// value must result in a `BADVERS` response.
    pub version: u8,

    /// The `DO` bit: the requestor can accept DNSSEC resource records.
    pub dnssec_ok: bool,

    /// Raw EDNS options (OPT RDATA), uninterpreted.
    pub options: Bytes,
}

impl Edns {
    /// The full, 12-bit extended RCODE: `extended_rcode_high << 4 | low`.
    pub fn extended_rcode(&self, low: Rcode) -> u16 {
        (u16::from(self.extended_rcode_high) << 4) | u16::from(u8::from(low))
    }

    /// Whether this indicates a version this core can't process
    /// (anything other than 0).
    pub fn is_unsupported_version(&self) -> bool {
        self.version != 0
    }

    /// Convert into the OPT resource record that is placed in a
    /// message's additional section.
    pub fn to_rr(&self) -> ResourceRecord {
        let mut ttl = u32::from(self.extended_rcode_high) << 24 | u32::from(self.version) << 16;
        if self.dnssec_ok {
            ttl |= EDNS_FLAG_DO;
        }

        ResourceRecord {
            name: DomainName::root_domain(),
            rtype_with_data: RecordTypeWithData::OPT {
                options: self.options.clone(),
            },
            rclass: RecordClass::from(self.udp_payload_size),
            ttl,
        }
    }

    /// Recover an `Edns` from a resource record, if it is a
    /// well-formed `OPT` pseudo-record.
    pub fn from_rr(rr: &ResourceRecord) -> Option<Self> {
        let RecordTypeWithData::OPT { options } = &rr.rtype_with_data else {
            return None;
        };

        let udp_payload_size: u16 = rr.rclass.into();
        let ttl = rr.ttl;
        let extended_rcode_high = (ttl >> 24) as u8;
        let version = (ttl >> 16) as u8;
        let dnssec_ok = ttl & EDNS_FLAG_DO != 0;

        Some(Edns {
            udp_payload_size,
            extended_rcode_high,
            version,
            dnssec_ok,
            options: options.clone(),
        })
    }
}
