//! DNS wire types and codec for multicast DNS (RFC 6762) and DNS-based
//! service discovery (RFC 6763).
//!
//! The `protocol` module has the message model plus serialisation to,
//! and deserialisation from, the format DNS uses on the wire.  Compared
//! to plain RFC 1035 DNS there are two twists: the top bit of the class
//! field is a flag (cache-flush on records, unicast-response on
//! questions), and packets can be up to 9000 octets.

pub mod protocol;
