use bytes::Bytes;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Maximum encoded length of a domain name, including all the length
/// octets and the terminating zero octet.
pub const DOMAINNAME_MAX_LEN: usize = 255;

/// Maximum length of a single label within a domain name.
pub const LABEL_MAX_LEN: usize = 63;

/// Maximum length of a character-string in a TXT record.
pub const CHARACTER_STRING_MAX_LEN: usize = 255;

/// Maximum size of a packet we will emit or accept.  RFC 6762 section
/// 17 limits multicast DNS messages to what fits in a 9000-octet
/// Ethernet jumbo frame.
pub const PACKET_MAX_LEN: usize = 9000;

/// The UDP port multicast DNS uses, for queriers and responders both.
pub const MDNS_PORT: u16 = 5353;

/// The IPv4 multicast group.
pub const MULTICAST_GROUP_V4: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);

/// How many compression pointers a single name may traverse before the
/// parser gives up on it.
pub const POINTER_MAX_HOPS: u8 = 20;

/// Top bit of the class field: on a resource record this is the
/// cache-flush flag, on a question it asks for a unicast response.
pub const CLASS_MASK_FLAG: u16 = 0b1000_0000_0000_0000;

pub const HEADER_MASK_QR: u8 = 0b1000_0000;
pub const HEADER_MASK_OPCODE: u8 = 0b0111_1000;
pub const HEADER_OFFSET_OPCODE: u8 = 3;
pub const HEADER_MASK_AA: u8 = 0b0000_0100;
pub const HEADER_MASK_TC: u8 = 0b0000_0010;
pub const HEADER_MASK_RD: u8 = 0b0000_0001;
pub const HEADER_MASK_RA: u8 = 0b1000_0000;
pub const HEADER_MASK_RCODE: u8 = 0b0000_1111;
pub const HEADER_OFFSET_RCODE: u8 = 0;

/// Basic DNS message format, used for both queries and responses.
///
/// ```text
///     +---------------------+
///     |        Header       |
///     +---------------------+
///     |       Question      | the question for the name server
///     +---------------------+
///     |        Answer       | RRs answering the question
///     +---------------------+
///     |      Authority      | RRs pointing toward an authority
///     +---------------------+
///     |      Additional     | RRs holding additional information
///     +---------------------+
/// ```
///
/// See section 4.1 of RFC 1035.  Multicast DNS reuses the format
/// unchanged (RFC 6762 section 18) but fixes the ID at zero and puts
/// proposed records in the authority section while probing.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(any(feature = "test-util", test), derive(arbitrary::Arbitrary))]
pub struct Message {
    pub header: Header,
    pub questions: Vec<Question>,
    pub answers: Vec<ResourceRecord>,
    pub authority: Vec<ResourceRecord>,
    pub additional: Vec<ResourceRecord>,
}

impl Message {
    /// An empty query message, ID zero as RFC 6762 section 18.1 wants.
    pub fn query(questions: Vec<Question>) -> Self {
        Self {
            header: Header {
                id: 0,
                is_response: false,
                opcode: Opcode::Standard,
                is_authoritative: false,
                is_truncated: false,
                recursion_desired: false,
                recursion_available: false,
                rcode: Rcode::NoError,
            },
            questions,
            answers: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
        }
    }

    /// An empty response message: ID zero, QR and AA set, everything
    /// else clear (RFC 6762 section 18).
    pub fn response() -> Self {
        Self {
            header: Header {
                id: 0,
                is_response: true,
                opcode: Opcode::Standard,
                is_authoritative: true,
                is_truncated: false,
                recursion_desired: false,
                recursion_available: false,
                rcode: Rcode::NoError,
            },
            questions: Vec::new(),
            answers: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
        }
    }
}

/// Common header type for all messages.
///
/// ```text
///                                     1  1  1  1  1  1
///       0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                      ID                       |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |QR|   Opcode  |AA|TC|RD|RA|   Z    |   RCODE   |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                    QDCOUNT                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                    ANCOUNT                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                    NSCOUNT                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                    ARCOUNT                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// ```
///
/// See section 4.1.1 of RFC 1035.  The RD, RA, and RCODE fields are
/// meaningless in multicast DNS but are still carried so that any
/// message can be round-tripped.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(any(feature = "test-util", test), derive(arbitrary::Arbitrary))]
pub struct Header {
    /// Query identifier.  Always zero in messages we originate; kept
    /// from the wire on inbound messages.
    pub id: u16,

    /// Whether this is a response (QR).
    pub is_response: bool,

    /// What sort of query this is.  Anything other than `Standard` is
    /// silently ignored by a multicast DNS responder.
    pub opcode: Opcode,

    /// Authoritative answer (AA).  Set on every response we send.
    pub is_authoritative: bool,

    /// Truncation (TC).  On a response: more records follow in another
    /// packet.  On a query: more known answers follow.
    pub is_truncated: bool,

    pub recursion_desired: bool,

    pub recursion_available: bool,

    /// Response code.  Multicast DNS has no use for error responses,
    /// and responses with a nonzero rcode are dropped on receipt.
    pub rcode: Rcode,
}

/// A `Header` as it appears on the network, with the section counts.
/// This type is used for serialisation and deserialisation only:
/// including the count fields in the normal `Header` type would
/// require keeping them consistent with the section vectors.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct WireHeader {
    pub header: Header,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

/// A single question from the question section.
///
/// ```text
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                                               |
///     /                     QNAME                     /
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                     QTYPE                     |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |UR|                  QCLASS                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// ```
///
/// The UR bit is the RFC 6762 section 5.4 unicast-response flag,
/// split off from the class on the way in and merged back on the way
/// out.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(any(feature = "test-util", test), derive(arbitrary::Arbitrary))]
pub struct Question {
    pub name: DomainName,
    pub qtype: QueryType,
    pub qclass: QueryClass,

    /// The querier would accept a unicast response.
    pub unicast_response: bool,
}

/// The answer, authority, and additional sections are all the same
/// format: a variable number of resource records.
///
/// ```text
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                                               |
///     /                      NAME                     /
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                      TYPE                     |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |CF|                   CLASS                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                      TTL                      |
///     |                                               |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                   RDLENGTH                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--|
///     /                     RDATA                     /
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// ```
///
/// The CF bit is the RFC 6762 section 10.2 cache-flush flag.  A TTL
/// of zero on a response record is a goodbye: the record is going
/// away and caches holding it should drop it.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(any(feature = "test-util", test), derive(arbitrary::Arbitrary))]
pub struct ResourceRecord {
    pub name: DomainName,

    /// A combination of the RTYPE and RDATA fields.
    pub rtype_with_data: RecordTypeWithData,

    pub rclass: RecordClass,

    /// Cache-flush flag: the sender claims this record set as its
    /// alone, and caches should evict older entries for the key.
    pub cache_flush: bool,

    /// Remaining lifetime in seconds.
    pub ttl: u32,
}

impl ResourceRecord {
    pub fn rtype(&self) -> RecordType {
        self.rtype_with_data.rtype()
    }

    pub fn matches(&self, question: &Question) -> bool {
        self.name == question.name
            && self.rtype_with_data.matches(question.qtype)
            && self.rclass.matches(question.qclass)
    }
}

/// A record type with its associated, deserialised, data.  Only the
/// types service discovery traffics in are interpreted; anything else
/// is carried as opaque octets and round-trips losslessly.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum RecordTypeWithData {
    /// A 32-bit IPv4 address.
    A { address: Ipv4Addr },

    /// A nameserver for the owner name.
    NS { nsdname: DomainName },

    /// The canonical name of an alias.
    CNAME { cname: DomainName },

    /// A name pointed to by the owner name.  Service discovery hangs
    /// enumeration off these: `_ipp._tcp.local.` PTR records point at
    /// the service instances.
    PTR { ptrdname: DomainName },

    /// Location of a service instance (RFC 2782): the host and port
    /// to connect to.
    SRV {
        priority: u16,
        weight: u16,
        port: u16,
        target: DomainName,
    },

    /// One or more character-strings.  Service discovery (RFC 6763
    /// section 6) uses them as `key=value` attributes.
    TXT { strings: Vec<CharacterString> },

    /// A 128-bit IPv6 address.
    AAAA { address: Ipv6Addr },

    /// Any other record, uninterpreted.
    Unknown {
        tag: RecordTypeUnknown,
        octets: Bytes,
    },
}

impl RecordTypeWithData {
    pub fn rtype(&self) -> RecordType {
        match self {
            RecordTypeWithData::A { .. } => RecordType::A,
            RecordTypeWithData::NS { .. } => RecordType::NS,
            RecordTypeWithData::CNAME { .. } => RecordType::CNAME,
            RecordTypeWithData::PTR { .. } => RecordType::PTR,
            RecordTypeWithData::SRV { .. } => RecordType::SRV,
            RecordTypeWithData::TXT { .. } => RecordType::TXT,
            RecordTypeWithData::AAAA { .. } => RecordType::AAAA,
            RecordTypeWithData::Unknown { tag, .. } => RecordType::Unknown(*tag),
        }
    }

    pub fn matches(&self, qtype: QueryType) -> bool {
        self.rtype().matches(qtype)
    }

    /// The RDATA in uncompressed wire form.  This is what the RFC 6762
    /// section 8.2 probe tiebreaker compares, octet by octet.
    pub fn to_octets(&self) -> Vec<u8> {
        fn write_name(out: &mut Vec<u8>, name: &DomainName) {
            for label in &name.labels {
                out.push(label.len());
                out.extend_from_slice(label.octets());
            }
        }

        let mut out = Vec::new();
        match self {
            RecordTypeWithData::A { address } => out.extend_from_slice(&address.octets()),
            RecordTypeWithData::NS { nsdname } => write_name(&mut out, nsdname),
            RecordTypeWithData::CNAME { cname } => write_name(&mut out, cname),
            RecordTypeWithData::PTR { ptrdname } => write_name(&mut out, ptrdname),
            RecordTypeWithData::SRV {
                priority,
                weight,
                port,
                target,
            } => {
                out.extend_from_slice(&priority.to_be_bytes());
                out.extend_from_slice(&weight.to_be_bytes());
                out.extend_from_slice(&port.to_be_bytes());
                write_name(&mut out, target);
            }
            RecordTypeWithData::TXT { strings } => {
                for string in strings {
                    out.push(string.len());
                    out.extend_from_slice(string.octets());
                }
            }
            RecordTypeWithData::AAAA { address } => out.extend_from_slice(&address.octets()),
            RecordTypeWithData::Unknown { octets, .. } => out.extend_from_slice(octets),
        }
        out
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for RecordTypeWithData {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        let rtype_with_data = match u.arbitrary::<RecordType>()? {
            RecordType::A => RecordTypeWithData::A {
                address: u.arbitrary()?,
            },
            RecordType::NS => RecordTypeWithData::NS {
                nsdname: u.arbitrary()?,
            },
            RecordType::CNAME => RecordTypeWithData::CNAME {
                cname: u.arbitrary()?,
            },
            RecordType::PTR => RecordTypeWithData::PTR {
                ptrdname: u.arbitrary()?,
            },
            RecordType::SRV => RecordTypeWithData::SRV {
                priority: u.arbitrary()?,
                weight: u.arbitrary()?,
                port: u.arbitrary()?,
                target: u.arbitrary()?,
            },
            RecordType::TXT => {
                let num_strings = u.int_in_range(0..=3)?;
                let mut strings = Vec::with_capacity(num_strings);
                for _ in 0..num_strings {
                    strings.push(u.arbitrary()?);
                }
                RecordTypeWithData::TXT { strings }
            }
            RecordType::AAAA => RecordTypeWithData::AAAA {
                address: u.arbitrary()?,
            },
            RecordType::Unknown(tag) => {
                let len = u.int_in_range(0..=128)?;
                RecordTypeWithData::Unknown {
                    tag,
                    octets: Bytes::copy_from_slice(u.bytes(len)?),
                }
            }
        };
        Ok(rtype_with_data)
    }
}

/// What sort of query this is.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Opcode {
    Standard,
    Inverse,
    Status,
    Reserved(OpcodeReserved),
}

/// A struct with a private constructor, to ensure invalid `Opcode`s
/// cannot be created.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct OpcodeReserved(u8);

impl From<u8> for Opcode {
    fn from(octet: u8) -> Self {
        match octet & 0b0000_1111 {
            0 => Opcode::Standard,
            1 => Opcode::Inverse,
            2 => Opcode::Status,
            other => Opcode::Reserved(OpcodeReserved(other)),
        }
    }
}

impl From<Opcode> for u8 {
    fn from(value: Opcode) -> Self {
        match value {
            Opcode::Standard => 0,
            Opcode::Inverse => 1,
            Opcode::Status => 2,
            Opcode::Reserved(OpcodeReserved(octet)) => octet,
        }
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for Opcode {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        Ok(Self::from(u.arbitrary::<u8>()?))
    }
}

/// What sort of response this is.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Rcode {
    NoError,
    FormatError,
    ServerFailure,
    NameError,
    NotImplemented,
    Refused,
    Reserved(RcodeReserved),
}

/// A struct with a private constructor, to ensure invalid `Rcode`s
/// cannot be created.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct RcodeReserved(u8);

impl From<u8> for Rcode {
    fn from(octet: u8) -> Self {
        match octet & 0b0000_1111 {
            0 => Rcode::NoError,
            1 => Rcode::FormatError,
            2 => Rcode::ServerFailure,
            3 => Rcode::NameError,
            4 => Rcode::NotImplemented,
            5 => Rcode::Refused,
            other => Rcode::Reserved(RcodeReserved(other)),
        }
    }
}

impl From<Rcode> for u8 {
    fn from(value: Rcode) -> Self {
        match value {
            Rcode::NoError => 0,
            Rcode::FormatError => 1,
            Rcode::ServerFailure => 2,
            Rcode::NameError => 3,
            Rcode::NotImplemented => 4,
            Rcode::Refused => 5,
            Rcode::Reserved(RcodeReserved(octet)) => octet,
        }
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for Rcode {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        Ok(Self::from(u.arbitrary::<u8>()?))
    }
}

/// A domain name is a sequence of labels, where each label is a
/// length octet followed by that number of octets.
///
/// A label must be 63 octets or shorter.  A name must be 255 octets
/// or shorter in total, including both length and label octets.
/// Labels are lowercased on construction, so all comparisons are
/// case-insensitive (RFC 6762 section 16).
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DomainName {
    pub labels: Vec<Label>,
    // INVARIANT: len == len(labels) + sum(map(len, labels))
    pub len: usize,
}

impl DomainName {
    pub fn root_domain() -> Self {
        DomainName {
            labels: vec![Label::new()],
            len: 1,
        }
    }

    pub fn is_root(&self) -> bool {
        self.len == 1 && self.labels[0].is_empty()
    }

    pub fn to_dotted_string(&self) -> String {
        if self.is_root() {
            return ".".to_string();
        }

        let mut out = String::with_capacity(self.len);
        let mut first = true;
        for label in &self.labels {
            if first {
                first = false;
            } else {
                out.push('.');
            }
            for octet in label.octets() {
                out.push(*octet as char);
            }
        }

        out
    }

    pub fn from_dotted_string(s: &str) -> Option<Self> {
        if s == "." {
            return Some(Self::root_domain());
        }

        let chunks = s.split('.').collect::<Vec<_>>();
        let mut labels = Vec::with_capacity(chunks.len() + 1);

        for (i, label_chars) in chunks.iter().enumerate() {
            if label_chars.is_empty() && i != chunks.len() - 1 {
                return None;
            }

            match label_chars.as_bytes().try_into() {
                Ok(label) => labels.push(label),
                Err(_) => return None,
            }
        }

        if !matches!(labels.last(), Some(l) if Label::is_empty(l)) {
            labels.push(Label::new());
        }

        Self::from_labels(labels)
    }

    pub fn from_labels(labels: Vec<Label>) -> Option<Self> {
        if labels.is_empty() {
            return None;
        }

        let mut len = labels.len();
        let mut blank_label = false;

        for label in &labels {
            if blank_label {
                return None;
            }

            blank_label |= label.is_empty();
            len += label.len() as usize;
        }

        if blank_label && len <= DOMAINNAME_MAX_LEN {
            Some(Self { labels, len })
        } else {
            None
        }
    }

    /// Prefix this name with one more label, e.g. to build the
    /// instance name `printer._ipp._tcp.local.` from a service type
    /// and an instance label.  `None` if the result would be too
    /// long.
    pub fn prepend(&self, label: Label) -> Option<Self> {
        if label.is_empty() {
            return None;
        }
        let mut labels = Vec::with_capacity(self.labels.len() + 1);
        labels.push(label);
        labels.extend(self.labels.iter().cloned());
        Self::from_labels(labels)
    }
}

impl fmt::Debug for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainName")
            .field("to_dotted_string()", &self.to_dotted_string())
            .finish()
    }
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", &self.to_dotted_string())
    }
}

impl FromStr for DomainName {
    type Err = DomainNameFromStr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(domain) = DomainName::from_dotted_string(s) {
            Ok(domain)
        } else {
            Err(DomainNameFromStr::NoParse)
        }
    }
}

/// Errors that can arise when converting a `&str` into a `DomainName`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DomainNameFromStr {
    NoParse,
}

impl fmt::Display for DomainNameFromStr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "could not parse string to domain name")
    }
}

impl std::error::Error for DomainNameFromStr {}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for DomainName {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        let num_labels = u.int_in_range::<usize>(0..=5)?;
        let mut labels = Vec::new();
        for _ in 0..num_labels {
            labels.push(u.arbitrary()?);
        }
        labels.push(Label::new());
        Ok(DomainName::from_labels(labels).unwrap())
    }
}

/// A label is just a sequence of octets, which are compared as
/// case-insensitive ASCII.  A label can be no longer than 63 octets.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Label {
    /// Private to this module so constructing an invalid `Label` is
    /// impossible.
    octets: Bytes,
}

impl Label {
    /// Create a new, empty, label.
    pub fn new() -> Self {
        Self {
            octets: Bytes::new(),
        }
    }

    #[allow(clippy::missing_panics_doc)]
    pub fn len(&self) -> u8 {
        // safe as the `TryFrom` ensures a label is <= 63 bytes
        self.octets.len().try_into().unwrap()
    }

    pub fn is_empty(&self) -> bool {
        self.octets.is_empty()
    }

    pub fn octets(&self) -> &Bytes {
        &self.octets
    }
}

impl Default for Label {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<&[u8]> for Label {
    type Error = LabelTryFromOctetsError;

    fn try_from(mixed_case_octets: &[u8]) -> Result<Self, Self::Error> {
        if mixed_case_octets.len() > LABEL_MAX_LEN {
            return Err(LabelTryFromOctetsError::TooLong);
        }

        Ok(Self {
            octets: Bytes::from(mixed_case_octets.to_ascii_lowercase()),
        })
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for Label {
    // only generates non-empty labels
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Label> {
        use bytes::{BufMut, BytesMut};

        let label_len = u.int_in_range::<u8>(1..=20)?;
        let mut octets = BytesMut::with_capacity(label_len.into());
        let bs = u.bytes(label_len.into())?;
        for b in bs {
            let ascii_byte = if b.is_ascii() { *b } else { *b % 128 };
            octets.put_u8(
                if ascii_byte == b'.' || (ascii_byte as char).is_whitespace() {
                    b'x'
                } else {
                    ascii_byte.to_ascii_lowercase()
                },
            );
        }
        Ok(Self {
            octets: octets.freeze(),
        })
    }
}

/// Errors that can arise when converting a `[u8]` into a `Label`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum LabelTryFromOctetsError {
    TooLong,
}

/// A length-prefixed string of at most 255 octets, as used in TXT
/// record data (RFC 1035 section 3.3).
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct CharacterString {
    /// Private so an oversized `CharacterString` cannot be created.
    octets: Bytes,
}

impl CharacterString {
    #[allow(clippy::missing_panics_doc)]
    pub fn len(&self) -> u8 {
        // safe as the `TryFrom` ensures a string is <= 255 bytes
        self.octets.len().try_into().unwrap()
    }

    pub fn is_empty(&self) -> bool {
        self.octets.is_empty()
    }

    pub fn octets(&self) -> &Bytes {
        &self.octets
    }
}

impl TryFrom<&[u8]> for CharacterString {
    type Error = CharacterStringTryFromOctetsError;

    fn try_from(octets: &[u8]) -> Result<Self, Self::Error> {
        if octets.len() > CHARACTER_STRING_MAX_LEN {
            return Err(CharacterStringTryFromOctetsError::TooLong);
        }

        Ok(Self {
            octets: Bytes::copy_from_slice(octets),
        })
    }
}

impl TryFrom<&str> for CharacterString {
    type Error = CharacterStringTryFromOctetsError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.as_bytes().try_into()
    }
}

impl fmt::Display for CharacterString {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for octet in &self.octets {
            write!(f, "{}", *octet as char)?;
        }
        Ok(())
    }
}

/// Errors that can arise when converting a `[u8]` into a
/// `CharacterString`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum CharacterStringTryFromOctetsError {
    TooLong,
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for CharacterString {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        let len = u.int_in_range(0..=20)?;
        Ok(Self {
            octets: Bytes::copy_from_slice(u.bytes(len)?),
        })
    }
}

/// Query types are a superset of record types: ANY (255) matches
/// every record type.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum QueryType {
    Record(RecordType),
    Wildcard,
}

impl From<u16> for QueryType {
    fn from(value: u16) -> Self {
        match value {
            255 => QueryType::Wildcard,
            _ => QueryType::Record(RecordType::from(value)),
        }
    }
}

impl From<QueryType> for u16 {
    fn from(value: QueryType) -> Self {
        match value {
            QueryType::Wildcard => 255,
            QueryType::Record(rtype) => rtype.into(),
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QueryType::Wildcard => write!(f, "ANY"),
            QueryType::Record(rtype) => write!(f, "{rtype}"),
        }
    }
}

impl FromStr for QueryType {
    type Err = UnknownTypeName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("ANY") {
            Ok(QueryType::Wildcard)
        } else {
            Ok(QueryType::Record(RecordType::from_str(s)?))
        }
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for QueryType {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        Ok(Self::from(u.arbitrary::<u16>()?))
    }
}

/// Query classes are a superset of record classes.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum QueryClass {
    Record(RecordClass),
    Wildcard,
}

impl From<u16> for QueryClass {
    fn from(value: u16) -> Self {
        match value {
            255 => QueryClass::Wildcard,
            _ => QueryClass::Record(RecordClass::from(value)),
        }
    }
}

impl From<QueryClass> for u16 {
    fn from(value: QueryClass) -> Self {
        match value {
            QueryClass::Wildcard => 255,
            QueryClass::Record(rclass) => rclass.into(),
        }
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for QueryClass {
    // the top bit is not part of the class on the wire, so an
    // arbitrary class never has it set
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        Ok(Self::from(u.arbitrary::<u16>()? & !CLASS_MASK_FLAG))
    }
}

/// Record types are used by resource records and by queries.  The
/// interpreted set is what service discovery needs; everything else
/// is `Unknown`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum RecordType {
    A,
    NS,
    CNAME,
    PTR,
    TXT,
    AAAA,
    SRV,
    Unknown(RecordTypeUnknown),
}

/// A struct with a private constructor, to ensure invalid
/// `RecordType`s cannot be created.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RecordTypeUnknown(u16);

impl RecordType {
    pub fn matches(&self, qtype: QueryType) -> bool {
        match qtype {
            QueryType::Wildcard => true,
            QueryType::Record(rtype) => rtype == *self,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RecordType::A => write!(f, "A"),
            RecordType::NS => write!(f, "NS"),
            RecordType::CNAME => write!(f, "CNAME"),
            RecordType::PTR => write!(f, "PTR"),
            RecordType::TXT => write!(f, "TXT"),
            RecordType::AAAA => write!(f, "AAAA"),
            RecordType::SRV => write!(f, "SRV"),
            RecordType::Unknown(RecordTypeUnknown(n)) => write!(f, "TYPE{n}"),
        }
    }
}

impl FromStr for RecordType {
    type Err = UnknownTypeName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "A" => Ok(RecordType::A),
            "NS" => Ok(RecordType::NS),
            "CNAME" => Ok(RecordType::CNAME),
            "PTR" => Ok(RecordType::PTR),
            "TXT" => Ok(RecordType::TXT),
            "AAAA" => Ok(RecordType::AAAA),
            "SRV" => Ok(RecordType::SRV),
            _ => match s.parse::<u16>() {
                Ok(n) => Ok(RecordType::from(n)),
                Err(_) => Err(UnknownTypeName),
            },
        }
    }
}

/// Error for parsing a record type name that is neither a known
/// mnemonic nor a bare number.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct UnknownTypeName;

impl fmt::Display for UnknownTypeName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "not a record type name or number")
    }
}

impl std::error::Error for UnknownTypeName {}

impl From<u16> for RecordType {
    fn from(value: u16) -> Self {
        match value {
            1 => RecordType::A,
            2 => RecordType::NS,
            5 => RecordType::CNAME,
            12 => RecordType::PTR,
            16 => RecordType::TXT,
            28 => RecordType::AAAA,
            33 => RecordType::SRV,
            _ => RecordType::Unknown(RecordTypeUnknown(value)),
        }
    }
}

impl From<RecordType> for u16 {
    fn from(value: RecordType) -> Self {
        match value {
            RecordType::A => 1,
            RecordType::NS => 2,
            RecordType::CNAME => 5,
            RecordType::PTR => 12,
            RecordType::TXT => 16,
            RecordType::AAAA => 28,
            RecordType::SRV => 33,
            RecordType::Unknown(RecordTypeUnknown(value)) => value,
        }
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for RecordType {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        Ok(Self::from(u.arbitrary::<u16>()?))
    }
}

/// Record classes are used by resource records and by queries.
/// Multicast DNS only ever uses the Internet class.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum RecordClass {
    IN,
    Unknown(RecordClassUnknown),
}

/// A struct with a private constructor, to ensure invalid
/// `RecordClass`es cannot be created.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct RecordClassUnknown(u16);

impl RecordClass {
    pub fn matches(&self, qclass: QueryClass) -> bool {
        match qclass {
            QueryClass::Wildcard => true,
            QueryClass::Record(rclass) => rclass == *self,
        }
    }
}

impl From<u16> for RecordClass {
    fn from(value: u16) -> Self {
        match value {
            1 => RecordClass::IN,
            _ => RecordClass::Unknown(RecordClassUnknown(value)),
        }
    }
}

impl From<RecordClass> for u16 {
    fn from(value: RecordClass) -> Self {
        match value {
            RecordClass::IN => 1,
            RecordClass::Unknown(RecordClassUnknown(value)) => value,
        }
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for RecordClass {
    // the top bit is not part of the class on the wire, so an
    // arbitrary class never has it set
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        Ok(Self::from(u.arbitrary::<u16>()? & !CLASS_MASK_FLAG))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u8_opcode_roundtrip() {
        for i in 0..15 {
            assert_eq!(u8::from(Opcode::from(i)), i);
        }
    }

    #[test]
    fn u8_rcode_roundtrip() {
        for i in 0..15 {
            assert_eq!(u8::from(Rcode::from(i)), i);
        }
    }

    #[test]
    fn u16_querytype_roundtrip() {
        for i in 0..300 {
            assert_eq!(u16::from(QueryType::from(i)), i);
        }
    }

    #[test]
    fn u16_recordtype_roundtrip() {
        for i in 0..300 {
            assert_eq!(u16::from(RecordType::from(i)), i);
        }
    }

    #[test]
    fn u16_recordclass_roundtrip() {
        for i in 0..300 {
            assert_eq!(u16::from(RecordClass::from(i)), i);
        }
    }

    #[test]
    fn recordtype_name_roundtrip() {
        for name in ["A", "NS", "CNAME", "PTR", "TXT", "AAAA", "SRV"] {
            let rtype = RecordType::from_str(name).unwrap();
            assert_eq!(name, rtype.to_string());
        }
    }

    #[test]
    fn domainname_root_conversions() {
        assert_eq!(
            Some(DomainName::root_domain()),
            DomainName::from_dotted_string(".")
        );

        assert_eq!(
            Some(DomainName::root_domain()),
            DomainName::from_labels(vec![Label::new()])
        );

        assert_eq!(".", DomainName::root_domain().to_dotted_string());
    }

    #[test]
    fn domainname_lowercases() {
        assert_eq!(
            DomainName::from_dotted_string("Printer._IPP._tcp.Local."),
            DomainName::from_dotted_string("printer._ipp._tcp.local.")
        );
    }

    #[test]
    fn domainname_accepts_trailing_dot_or_not() {
        assert_eq!(
            DomainName::from_dotted_string("host.local."),
            DomainName::from_dotted_string("host.local")
        );
    }

    #[test]
    fn domainname_len_counts_wire_octets() {
        let name = DomainName::from_dotted_string("printer._ipp._tcp.local.").unwrap();
        // 1+7 + 1+4 + 1+4 + 1+5 + 1
        assert_eq!(25, name.len);
    }

    #[test]
    fn domainname_rejects_oversize() {
        let label = "x".repeat(63);
        let long = format!("{label}.{label}.{label}.{label}.");
        assert_eq!(None, DomainName::from_dotted_string(&long));

        // 3 * 64 + 62 + 1 + 1 == 256: one octet over
        let last = "x".repeat(62);
        let over = format!("{label}.{label}.{label}.{last}.");
        assert_eq!(None, DomainName::from_dotted_string(&over));

        // 3 * 64 + 61 + 1 + 1 == 255: exactly at the limit
        let last = "x".repeat(61);
        let max = format!("{label}.{label}.{label}.{last}.");
        let name = DomainName::from_dotted_string(&max).unwrap();
        assert_eq!(DOMAINNAME_MAX_LEN, name.len);
    }

    #[test]
    fn prepend_builds_instance_names() {
        let service = DomainName::from_dotted_string("_ipp._tcp.local.").unwrap();
        let instance = service
            .prepend(Label::try_from(&b"printer"[..]).unwrap())
            .unwrap();
        assert_eq!("printer._ipp._tcp.local.", instance.to_dotted_string());
    }

    #[test]
    fn character_string_limits() {
        assert!(CharacterString::try_from(&[0u8; 255][..]).is_ok());
        assert_eq!(
            Err(CharacterStringTryFromOctetsError::TooLong),
            CharacterString::try_from(&[0u8; 256][..])
        );
    }
}

#[cfg(any(feature = "test-util", test))]
pub mod test_util {
    use super::*;

    use arbitrary::{Arbitrary, Unstructured};

    pub fn arbitrary_resourcerecord() -> ResourceRecord {
        // try a few entropy pool sizes, the smaller ones may not be
        // enough for a large record
        for size in [128, 256, 512, 1024, 2048, 4096] {
            let mut buf = Vec::with_capacity(size);
            for i in 0..size {
                buf.push((i % 255) as u8 ^ (i / 3) as u8);
            }

            if let Ok(rr) = ResourceRecord::arbitrary(&mut Unstructured::new(&buf)) {
                return rr;
            }
        }

        panic!("could not generate arbitrary value!");
    }

    pub fn domain(name: &str) -> DomainName {
        DomainName::from_dotted_string(name).unwrap()
    }

    pub fn a_record(name: &str, address: Ipv4Addr) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rtype_with_data: RecordTypeWithData::A { address },
            rclass: RecordClass::IN,
            cache_flush: false,
            ttl: 120,
        }
    }

    pub fn aaaa_record(name: &str, address: Ipv6Addr) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rtype_with_data: RecordTypeWithData::AAAA { address },
            rclass: RecordClass::IN,
            cache_flush: false,
            ttl: 120,
        }
    }

    pub fn ptr_record(name: &str, target_name: &str) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rtype_with_data: RecordTypeWithData::PTR {
                ptrdname: domain(target_name),
            },
            rclass: RecordClass::IN,
            cache_flush: false,
            ttl: 4500,
        }
    }

    pub fn srv_record(name: &str, port: u16, target_name: &str) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rtype_with_data: RecordTypeWithData::SRV {
                priority: 0,
                weight: 0,
                port,
                target: domain(target_name),
            },
            rclass: RecordClass::IN,
            cache_flush: false,
            ttl: 120,
        }
    }

    pub fn txt_record(name: &str, strings: &[&str]) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rtype_with_data: RecordTypeWithData::TXT {
                strings: strings
                    .iter()
                    .map(|s| CharacterString::try_from(*s).unwrap())
                    .collect(),
            },
            rclass: RecordClass::IN,
            cache_flush: false,
            ttl: 4500,
        }
    }

    pub fn question(name: &str, qtype: QueryType) -> Question {
        Question {
            name: domain(name),
            qtype,
            qclass: QueryClass::Record(RecordClass::IN),
            unicast_response: false,
        }
    }
}
