//! The DNS wire protocol: message types, and their serialisation to and
//! deserialisation from the wire format defined by RFC 1035 §4 (plus the
//! EDNS0 extensions of RFC 6891).

pub mod deserialise;
pub mod edns;
pub mod serialise;
pub mod types;
