//! Deserialisation of DNS messages from the network.  See the `types`
//! module for details of the format.
//!
//! Everything here is reachable from a raw multicast datagram, so the
//! parser must fail cleanly on any input: no panics, no reads out of
//! bounds, no unbounded pointer chasing.

use bytes::Bytes;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::protocol::types::*;

impl Message {
    /// # Errors
    ///
    /// If the message cannot be parsed.
    pub fn from_octets(octets: &[u8]) -> Result<Self, Error> {
        Self::deserialise(&mut ConsumableBuffer::new(octets))
    }

    /// # Errors
    ///
    /// If the message cannot be parsed.
    pub fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let wire_header = WireHeader::deserialise(buffer)?;
        let mut questions = Vec::with_capacity(wire_header.qdcount.into());
        let mut answers = Vec::with_capacity(wire_header.ancount.into());
        let mut authority = Vec::with_capacity(wire_header.nscount.into());
        let mut additional = Vec::with_capacity(wire_header.arcount.into());

        for _ in 0..wire_header.qdcount {
            questions.push(Question::deserialise(buffer)?);
        }
        for _ in 0..wire_header.ancount {
            answers.push(ResourceRecord::deserialise(buffer)?);
        }
        for _ in 0..wire_header.nscount {
            authority.push(ResourceRecord::deserialise(buffer)?);
        }
        for _ in 0..wire_header.arcount {
            additional.push(ResourceRecord::deserialise(buffer)?);
        }

        Ok(Self {
            header: wire_header.header,
            questions,
            answers,
            authority,
            additional,
        })
    }
}

impl WireHeader {
    /// # Errors
    ///
    /// If the header is too short.
    pub fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let id = buffer.next_u16().ok_or(Error::HeaderTooShort)?;
        let flags1 = buffer.next_u8().ok_or(Error::HeaderTooShort)?;
        let flags2 = buffer.next_u8().ok_or(Error::HeaderTooShort)?;
        let qdcount = buffer.next_u16().ok_or(Error::HeaderTooShort)?;
        let ancount = buffer.next_u16().ok_or(Error::HeaderTooShort)?;
        let nscount = buffer.next_u16().ok_or(Error::HeaderTooShort)?;
        let arcount = buffer.next_u16().ok_or(Error::HeaderTooShort)?;

        Ok(Self {
            header: Header {
                id,
                is_response: flags1 & HEADER_MASK_QR != 0,
                opcode: Opcode::from((flags1 & HEADER_MASK_OPCODE) >> HEADER_OFFSET_OPCODE),
                is_authoritative: flags1 & HEADER_MASK_AA != 0,
                is_truncated: flags1 & HEADER_MASK_TC != 0,
                recursion_desired: flags1 & HEADER_MASK_RD != 0,
                recursion_available: flags2 & HEADER_MASK_RA != 0,
                rcode: Rcode::from((flags2 & HEADER_MASK_RCODE) >> HEADER_OFFSET_RCODE),
            },
            qdcount,
            ancount,
            nscount,
            arcount,
        })
    }
}

impl Question {
    /// # Errors
    ///
    /// If the question cannot be parsed.
    pub fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let name = DomainName::deserialise(buffer)?;
        let qtype = buffer
            .next_u16()
            .map(QueryType::from)
            .ok_or(Error::QuestionTooShort)?;
        let qclass_octets = buffer.next_u16().ok_or(Error::QuestionTooShort)?;

        Ok(Self {
            name,
            qtype,
            qclass: QueryClass::from(qclass_octets & !CLASS_MASK_FLAG),
            unicast_response: qclass_octets & CLASS_MASK_FLAG != 0,
        })
    }
}

impl ResourceRecord {
    /// # Errors
    ///
    /// If the record cannot be parsed.
    pub fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let name = DomainName::deserialise(buffer)?;
        let rtype = buffer
            .next_u16()
            .map(RecordType::from)
            .ok_or(Error::ResourceRecordTooShort)?;
        let rclass_octets = buffer.next_u16().ok_or(Error::ResourceRecordTooShort)?;
        let ttl = buffer.next_u32().ok_or(Error::ResourceRecordTooShort)?;
        let rdlength = buffer.next_u16().ok_or(Error::ResourceRecordTooShort)?;

        let rdata_start = buffer.position;

        // for records whose data includes domain names, deserialise
        // them through the name parser, so compression pointers get
        // expanded.
        let rtype_with_data = match rtype {
            RecordType::A => RecordTypeWithData::A {
                address: Ipv4Addr::from(
                    buffer.next_u32().ok_or(Error::ResourceRecordTooShort)?,
                ),
            },
            RecordType::NS => RecordTypeWithData::NS {
                nsdname: DomainName::deserialise(buffer)?,
            },
            RecordType::CNAME => RecordTypeWithData::CNAME {
                cname: DomainName::deserialise(buffer)?,
            },
            RecordType::PTR => RecordTypeWithData::PTR {
                ptrdname: DomainName::deserialise(buffer)?,
            },
            RecordType::SRV => RecordTypeWithData::SRV {
                priority: buffer.next_u16().ok_or(Error::ResourceRecordTooShort)?,
                weight: buffer.next_u16().ok_or(Error::ResourceRecordTooShort)?,
                port: buffer.next_u16().ok_or(Error::ResourceRecordTooShort)?,
                target: DomainName::deserialise(buffer)?,
            },
            RecordType::TXT => RecordTypeWithData::TXT {
                strings: deserialise_character_strings(buffer, rdlength)?,
            },
            RecordType::AAAA => {
                let mut groups = [0u16; 8];
                for group in &mut groups {
                    *group = buffer.next_u16().ok_or(Error::ResourceRecordTooShort)?;
                }
                RecordTypeWithData::AAAA {
                    address: Ipv6Addr::new(
                        groups[0], groups[1], groups[2], groups[3], groups[4], groups[5],
                        groups[6], groups[7],
                    ),
                }
            }
            RecordType::Unknown(tag) => {
                let octets = buffer
                    .take(rdlength as usize)
                    .ok_or(Error::ResourceRecordTooShort)?;
                RecordTypeWithData::Unknown {
                    tag,
                    octets: Bytes::copy_from_slice(octets),
                }
            }
        };

        if buffer.position != rdata_start + (rdlength as usize) {
            return Err(Error::ResourceRecordInvalid);
        }

        Ok(Self {
            name,
            rtype_with_data,
            rclass: RecordClass::from(rclass_octets & !CLASS_MASK_FLAG),
            cache_flush: rclass_octets & CLASS_MASK_FLAG != 0,
            ttl,
        })
    }
}

/// TXT record data: character-strings back to back filling exactly
/// `rdlength` octets.
fn deserialise_character_strings(
    buffer: &mut ConsumableBuffer,
    rdlength: u16,
) -> Result<Vec<CharacterString>, Error> {
    let end = buffer.position + rdlength as usize;
    let mut strings = Vec::new();

    while buffer.position < end {
        let len = buffer.next_u8().ok_or(Error::ResourceRecordTooShort)?;
        if buffer.position + len as usize > end {
            return Err(Error::ResourceRecordInvalid);
        }
        let octets = buffer
            .take(len as usize)
            .ok_or(Error::ResourceRecordTooShort)?;
        // safe because of the bounds check above
        strings.push(CharacterString::try_from(octets).unwrap());
    }

    Ok(strings)
}

impl DomainName {
    /// # Errors
    ///
    /// If the domain cannot be parsed.
    #[allow(clippy::missing_panics_doc)]
    pub fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        Self::deserialise_bounded(buffer, 0)
    }

    fn deserialise_bounded(buffer: &mut ConsumableBuffer, hops: u8) -> Result<Self, Error> {
        let mut labels = Vec::<Label>::with_capacity(5);
        let mut len = 0;
        let start = buffer.position;

        loop {
            let size = buffer.next_u8().ok_or(Error::DomainTooShort)?;

            if usize::from(size) <= LABEL_MAX_LEN {
                len += 1;

                if size == 0 {
                    labels.push(Label::new());
                    break;
                }

                len += usize::from(size);
                if len > DOMAINNAME_MAX_LEN {
                    return Err(Error::DomainTooLong);
                }

                if let Some(os) = buffer.take(size as usize) {
                    // safe because of the bounds check above
                    labels.push(Label::try_from(os).unwrap());
                } else {
                    return Err(Error::DomainTooShort);
                }
            } else if size >= 0b1100_0000 {
                // compression pointer: the rest of the name lives
                // earlier in the packet.
                if hops == POINTER_MAX_HOPS {
                    return Err(Error::DomainPointerLoop);
                }

                let hi = size & 0b0011_1111;
                let lo = buffer.next_u8().ok_or(Error::DomainTooShort)?;
                let ptr = usize::from(u16::from_be_bytes([hi, lo]));

                // pointers must go strictly backwards (RFC 1035
                // section 4.1.4), which also bounds chains of them.
                if ptr >= start {
                    return Err(Error::DomainPointerInvalid);
                }

                let mut rest =
                    DomainName::deserialise_bounded(&mut buffer.at_offset(ptr), hops + 1)?;
                len += rest.len;
                if len > DOMAINNAME_MAX_LEN {
                    return Err(Error::DomainTooLong);
                }
                labels.append(&mut rest.labels);
                break;
            } else {
                // high bits 10 and 01 are reserved
                return Err(Error::DomainLabelInvalid);
            }
        }

        if len <= DOMAINNAME_MAX_LEN {
            Ok(DomainName { labels, len })
        } else {
            Err(Error::DomainTooLong)
        }
    }
}

/// Errors encountered when parsing a datagram.  A failed parse tells
/// us nothing trustworthy about the sender, so these all amount to
/// "drop the packet" - they are distinguished for logging and tests.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Error {
    /// The header is missing one or more required fields.
    HeaderTooShort,

    /// A question ends with an incomplete field.
    QuestionTooShort,

    /// A resource record ends with an incomplete field.
    ResourceRecordTooShort,

    /// A resource record's data does not fill its RDLENGTH exactly.
    ResourceRecordInvalid,

    /// A domain is incomplete.
    DomainTooShort,

    /// A domain expands to over 255 octets.
    DomainTooLong,

    /// A domain pointer points at or after its own position.
    DomainPointerInvalid,

    /// A domain pointer chain exceeds the hop limit.
    DomainPointerLoop,

    /// A domain label length has the reserved high bits 10 or 01.
    DomainLabelInvalid,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::HeaderTooShort => write!(f, "header too short"),
            Error::QuestionTooShort => write!(f, "question too short"),
            Error::ResourceRecordTooShort => write!(f, "resource record too short"),
            Error::ResourceRecordInvalid => write!(f, "resource record data length mismatch"),
            Error::DomainTooShort => write!(f, "domain name too short"),
            Error::DomainTooLong => write!(f, "domain name over 255 octets"),
            Error::DomainPointerInvalid => write!(f, "domain compression pointer not backwards"),
            Error::DomainPointerLoop => write!(f, "domain compression pointer chain too long"),
            Error::DomainLabelInvalid => write!(f, "domain label has reserved length bits"),
        }
    }
}

impl std::error::Error for Error {}

/// A buffer which will be consumed by the parsing process.
pub struct ConsumableBuffer<'a> {
    octets: &'a [u8],
    pub position: usize,
}

impl<'a> ConsumableBuffer<'a> {
    pub fn new(octets: &'a [u8]) -> Self {
        Self {
            octets,
            position: 0,
        }
    }

    pub fn next_u8(&mut self) -> Option<u8> {
        if self.octets.len() > self.position {
            let a = self.octets[self.position];
            self.position += 1;
            Some(a)
        } else {
            None
        }
    }

    pub fn next_u16(&mut self) -> Option<u16> {
        if self.octets.len() > self.position + 1 {
            let a = self.octets[self.position];
            let b = self.octets[self.position + 1];
            self.position += 2;
            Some(u16::from_be_bytes([a, b]))
        } else {
            None
        }
    }

    pub fn next_u32(&mut self) -> Option<u32> {
        if self.octets.len() > self.position + 3 {
            let a = self.octets[self.position];
            let b = self.octets[self.position + 1];
            let c = self.octets[self.position + 2];
            let d = self.octets[self.position + 3];
            self.position += 4;
            Some(u32::from_be_bytes([a, b, c, d]))
        } else {
            None
        }
    }

    pub fn take(&mut self, size: usize) -> Option<&'a [u8]> {
        if self.octets.len() >= self.position + size {
            let slice = &self.octets[self.position..self.position + size];
            self.position += size;
            Some(slice)
        } else {
            None
        }
    }

    pub fn at_offset(&self, position: usize) -> ConsumableBuffer<'a> {
        Self {
            octets: self.octets,
            position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::test_util::*;

    #[test]
    #[rustfmt::skip]
    fn deserialise_expands_pointers() {
        let octets = [
            // an unrelated name at offset 0 for pointers to target
            5, b'l', b'o', b'c', b'a', b'l', 0,
            // "host" + pointer to "local."
            4, b'h', b'o', b's', b't', 0b1100_0000, 0,
        ];

        let name = DomainName::deserialise(&mut ConsumableBuffer::new(&octets).at_offset(7))
            .unwrap();
        assert_eq!(domain("host.local."), name);
    }

    #[test]
    #[rustfmt::skip]
    fn deserialise_rejects_forward_pointer() {
        // pointer to 0xfff, way beyond its own position
        let octets = [0b1100_1111, 0b1111_1111];
        assert_eq!(
            Err(Error::DomainPointerInvalid),
            DomainName::deserialise(&mut ConsumableBuffer::new(&octets)),
        );
    }

    #[test]
    #[rustfmt::skip]
    fn deserialise_rejects_self_pointer() {
        let octets = [0b1100_0000, 0];
        assert_eq!(
            Err(Error::DomainPointerInvalid),
            DomainName::deserialise(&mut ConsumableBuffer::new(&octets)),
        );
    }

    #[test]
    fn deserialise_rejects_long_pointer_chain() {
        // each name is a label plus a pointer to the previous name,
        // forming a backwards chain longer than the hop limit
        let mut octets = vec![1, b'a', 0];
        let mut offsets = vec![0u16];
        for _ in 0..30 {
            let offset = octets.len() as u16;
            let prev = *offsets.last().unwrap();
            let [hi, lo] = prev.to_be_bytes();
            octets.extend_from_slice(&[1, b'a', 0b1100_0000 | hi, lo]);
            offsets.push(offset);
        }

        let last = *offsets.last().unwrap() as usize;
        assert_eq!(
            Err(Error::DomainPointerLoop),
            DomainName::deserialise(&mut ConsumableBuffer::new(&octets).at_offset(last)),
        );
    }

    #[test]
    fn deserialise_rejects_reserved_length_bits() {
        for size in [0b0100_0000u8, 0b1000_0000] {
            let octets = [size, 0, 0];
            assert_eq!(
                Err(Error::DomainLabelInvalid),
                DomainName::deserialise(&mut ConsumableBuffer::new(&octets)),
            );
        }
    }

    #[test]
    fn deserialise_name_length_boundary() {
        // 3 x 63-octet labels + 1 x 61-octet label + terminator = 255
        let mut max = Vec::new();
        for _ in 0..3 {
            max.push(63);
            max.extend_from_slice(&[b'x'; 63]);
        }
        max.push(61);
        max.extend_from_slice(&[b'x'; 61]);
        max.push(0);

        let name = DomainName::deserialise(&mut ConsumableBuffer::new(&max)).unwrap();
        assert_eq!(DOMAINNAME_MAX_LEN, name.len);

        // one more octet tips it over
        let mut over = Vec::new();
        for _ in 0..3 {
            over.push(63);
            over.extend_from_slice(&[b'x'; 63]);
        }
        over.push(62);
        over.extend_from_slice(&[b'x'; 62]);
        over.push(0);

        assert_eq!(
            Err(Error::DomainTooLong),
            DomainName::deserialise(&mut ConsumableBuffer::new(&over)),
        );
    }

    #[test]
    #[rustfmt::skip]
    fn deserialise_question_splits_unicast_response_flag() {
        let octets = [
            4, b'h', b'o', b's', b't', 5, b'l', b'o', b'c', b'a', b'l', 0,
            0, 1, // A
            0b1000_0000, 1, // IN with the top bit set
        ];

        let q = Question::deserialise(&mut ConsumableBuffer::new(&octets)).unwrap();
        assert_eq!(domain("host.local."), q.name);
        assert_eq!(QueryType::Record(RecordType::A), q.qtype);
        assert_eq!(QueryClass::Record(RecordClass::IN), q.qclass);
        assert!(q.unicast_response);
    }

    #[test]
    #[rustfmt::skip]
    fn deserialise_record_splits_cache_flush_flag() {
        let octets = [
            4, b'h', b'o', b's', b't', 5, b'l', b'o', b'c', b'a', b'l', 0,
            0, 1, // A
            0b1000_0000, 1, // IN with the top bit set
            0, 0, 0, 120, // TTL
            0, 4, // RDLENGTH
            192, 0, 2, 5,
        ];

        let rr = ResourceRecord::deserialise(&mut ConsumableBuffer::new(&octets)).unwrap();
        assert_eq!(domain("host.local."), rr.name);
        assert_eq!(RecordClass::IN, rr.rclass);
        assert!(rr.cache_flush);
        assert_eq!(120, rr.ttl);
        assert_eq!(
            RecordTypeWithData::A { address: "192.0.2.5".parse().unwrap() },
            rr.rtype_with_data,
        );
    }

    #[test]
    #[rustfmt::skip]
    fn deserialise_rejects_rdlength_mismatch() {
        let octets = [
            4, b'h', b'o', b's', b't', 5, b'l', b'o', b'c', b'a', b'l', 0,
            0, 1, // A
            0, 1, // IN
            0, 0, 0, 120, // TTL
            0, 6, // RDLENGTH, but an A address is 4 octets
            192, 0, 2, 5, 0, 0,
        ];

        assert_eq!(
            Err(Error::ResourceRecordInvalid),
            ResourceRecord::deserialise(&mut ConsumableBuffer::new(&octets)),
        );
    }

    #[test]
    #[rustfmt::skip]
    fn deserialise_txt_splits_strings() {
        let octets = [
            1, b'x', 0,
            0, 16, // TXT
            0, 1, // IN
            0, 0, 17, 148, // TTL
            0, 13, // RDLENGTH
            6, b'p', b'a', b'p', b'e', b'r', b'=',
            5, b'a', b'4', b'=', b'o', b'k',
        ];

        let rr = ResourceRecord::deserialise(&mut ConsumableBuffer::new(&octets)).unwrap();
        match rr.rtype_with_data {
            RecordTypeWithData::TXT { strings } => {
                assert_eq!(2, strings.len());
                assert_eq!("paper=", strings[0].to_string());
                assert_eq!("a4=ok", strings[1].to_string());
            }
            other => panic!("expected TXT, got {other:?}"),
        }
    }

    #[test]
    fn deserialise_txt_rejects_string_past_rdlength() {
        let octets = [
            1, b'x', 0, //
            0, 16, // TXT
            0, 1, // IN
            0, 0, 17, 148, // TTL
            0, 3,  // RDLENGTH
            9, b'a', b'b', // string claims 9 octets, rdata has 2
        ];

        assert_eq!(
            Err(Error::ResourceRecordInvalid),
            ResourceRecord::deserialise(&mut ConsumableBuffer::new(&octets)),
        );
    }

    #[test]
    fn deserialise_arbitrary_octets_never_panics() {
        // not a substitute for the fuzz targets, just a smoke test
        // over structured-ish garbage
        for seed in 0..500u32 {
            let mut octets = Vec::with_capacity(64);
            let mut x = seed.wrapping_mul(2_654_435_761);
            for _ in 0..64 {
                x ^= x << 13;
                x ^= x >> 17;
                x ^= x << 5;
                octets.push((x & 0xff) as u8);
            }
            let _ = Message::from_octets(&octets);
        }
    }
}
