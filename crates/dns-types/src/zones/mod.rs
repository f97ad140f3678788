//! Zone files: master files of resource records for a single origin,
//! as defined by RFC 1035 §5, and the in-memory store built from them.

pub mod deserialise;
pub mod serialise;
pub mod types;
