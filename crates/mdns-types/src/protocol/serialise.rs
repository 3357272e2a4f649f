//! Serialisation of DNS messages to the wire format.  See the `types`
//! module for details of the format.

use bytes::{BufMut, BytesMut};
use std::collections::HashMap;

use crate::protocol::types::*;

impl Message {
    /// # Errors
    ///
    /// If the message is invalid (the `Message` type permits more
    /// states than strictly allowed), or does not fit in a packet.
    pub fn to_octets(&self) -> Result<BytesMut, Error> {
        let mut buffer = WritableBuffer::default();
        self.serialise(&mut buffer)?;

        if buffer.octets.len() > PACKET_MAX_LEN {
            return Err(Error::Oversize {
                len: buffer.octets.len(),
            });
        }

        Ok(buffer.octets)
    }

    /// # Errors
    ///
    /// If the message is invalid (the `Message` type permits more
    /// states than strictly allowed).
    pub fn serialise(&self, buffer: &mut WritableBuffer) -> Result<(), Error> {
        let wire_header = WireHeader {
            header: self.header,
            qdcount: usize_to_u16(self.questions.len())?,
            ancount: usize_to_u16(self.answers.len())?,
            nscount: usize_to_u16(self.authority.len())?,
            arcount: usize_to_u16(self.additional.len())?,
        };

        wire_header.serialise(buffer);

        for question in &self.questions {
            question.serialise(buffer);
        }
        for rr in &self.answers {
            rr.serialise(buffer)?;
        }
        for rr in &self.authority {
            rr.serialise(buffer)?;
        }
        for rr in &self.additional {
            rr.serialise(buffer)?;
        }

        Ok(())
    }
}

impl WireHeader {
    pub fn serialise(&self, buffer: &mut WritableBuffer) {
        self.header.serialise(buffer);
        buffer.write_u16(self.qdcount);
        buffer.write_u16(self.ancount);
        buffer.write_u16(self.nscount);
        buffer.write_u16(self.arcount);
    }
}

impl Header {
    pub fn serialise(&self, buffer: &mut WritableBuffer) {
        // octet 1
        let flag_qr = if self.is_response { HEADER_MASK_QR } else { 0 };
        let field_opcode = HEADER_MASK_OPCODE & (u8::from(self.opcode) << HEADER_OFFSET_OPCODE);
        let flag_aa = if self.is_authoritative {
            HEADER_MASK_AA
        } else {
            0
        };
        let flag_tc = if self.is_truncated { HEADER_MASK_TC } else { 0 };
        let flag_rd = if self.recursion_desired {
            HEADER_MASK_RD
        } else {
            0
        };
        // octet 2
        let flag_ra = if self.recursion_available {
            HEADER_MASK_RA
        } else {
            0
        };
        let field_rcode = HEADER_MASK_RCODE & (u8::from(self.rcode) << HEADER_OFFSET_RCODE);

        buffer.write_u16(self.id);
        buffer.write_u8(flag_qr | field_opcode | flag_aa | flag_tc | flag_rd);
        buffer.write_u8(flag_ra | field_rcode);
    }
}

impl Question {
    pub fn serialise(&self, buffer: &mut WritableBuffer) {
        let flag = if self.unicast_response {
            CLASS_MASK_FLAG
        } else {
            0
        };

        self.name.serialise(buffer, true);
        buffer.write_u16(self.qtype.into());
        buffer.write_u16((u16::from(self.qclass) & !CLASS_MASK_FLAG) | flag);
    }
}

impl ResourceRecord {
    /// # Errors
    ///
    /// If the RDATA is too long.
    pub fn serialise(&self, buffer: &mut WritableBuffer) -> Result<(), Error> {
        let flag = if self.cache_flush { CLASS_MASK_FLAG } else { 0 };

        self.name.serialise(buffer, true);
        buffer.write_u16(self.rtype().into());
        buffer.write_u16((u16::from(self.rclass) & !CLASS_MASK_FLAG) | flag);
        buffer.write_u32(self.ttl);

        // filled in below
        let rdlength_index = buffer.index();
        buffer.write_u16(0);

        match &self.rtype_with_data {
            RecordTypeWithData::A { address } => buffer.write_octets(&address.octets()),
            RecordTypeWithData::NS { nsdname } => nsdname.serialise(buffer, true),
            RecordTypeWithData::CNAME { cname } => cname.serialise(buffer, true),
            RecordTypeWithData::PTR { ptrdname } => ptrdname.serialise(buffer, true),
            RecordTypeWithData::SRV {
                priority,
                weight,
                port,
                target,
            } => {
                buffer.write_u16(*priority);
                buffer.write_u16(*weight);
                buffer.write_u16(*port);
                target.serialise(buffer, true);
            }
            RecordTypeWithData::TXT { strings } => {
                for string in strings {
                    buffer.write_u8(string.len());
                    buffer.write_octets(string.octets());
                }
            }
            RecordTypeWithData::AAAA { address } => buffer.write_octets(&address.octets()),
            RecordTypeWithData::Unknown { octets, .. } => buffer.write_octets(octets),
        };

        // -2 so we don't also include the 2 octets for the rdlength
        let rdlength = usize_to_u16(buffer.index() - rdlength_index - 2)?;
        buffer.set_u16(rdlength_index, rdlength);

        Ok(())
    }
}

impl DomainName {
    /// Write out a name, compressing against anything already in the
    /// buffer: labels are emitted up to the longest suffix which has
    /// been written before, then a pointer to it.  Every suffix of
    /// this name becomes a candidate target for later names.
    pub fn serialise(&self, buffer: &mut WritableBuffer, compress: bool) {
        let mut i = 0;
        // the final label is the empty terminator, which is never
        // pointed at
        while i + 1 < self.labels.len() {
            let suffix = &self.labels[i..];

            if compress {
                if let Some(offset) = buffer.suffix_pointer(suffix) {
                    buffer.write_u16(POINTER_TAG | offset);
                    return;
                }
            }

            buffer.memoise_suffix(suffix);
            let label = &self.labels[i];
            buffer.write_u8(label.len());
            buffer.write_octets(label.octets());
            i += 1;
        }

        buffer.write_u8(0);
    }
}

const POINTER_TAG: u16 = 0b1100_0000_0000_0000;

/// The largest buffer offset a 14-bit compression pointer can target.
const POINTER_MAX_OFFSET: usize = 0b0011_1111_1111_1111;

/// Errors encountered when serialising a message.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Error {
    /// A counter does not fit in the desired width.
    CounterTooLarge { counter: usize, bits: u32 },

    /// The message does not fit in a packet, even compressed.  The
    /// caller has to split it and try again.
    Oversize { len: usize },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::CounterTooLarge { counter, bits } => {
                write!(f, "'{counter}' cannot be converted to a u{bits}")
            }
            Error::Oversize { len } => {
                write!(f, "message is {len} octets, over the {PACKET_MAX_LEN} limit")
            }
        }
    }
}

impl std::error::Error for Error {}

/// A buffer which can be written to, for serialisation purposes.
pub struct WritableBuffer {
    pub octets: BytesMut,
    suffix_offsets: HashMap<Vec<Label>, u16>,
}

impl Default for WritableBuffer {
    fn default() -> Self {
        Self {
            octets: BytesMut::with_capacity(512),
            suffix_offsets: HashMap::new(),
        }
    }
}

impl WritableBuffer {
    pub fn index(&self) -> usize {
        self.octets.len()
    }

    /// Snapshot the current write position, for `rollback_to`.
    pub fn mark(&self) -> usize {
        self.octets.len()
    }

    /// Discard everything written since `mark`, including any name
    /// suffixes memoised in the discarded region.  Used when packing
    /// records into a size-limited packet and the latest one does not
    /// fit.
    pub fn rollback_to(&mut self, mark: usize) {
        self.octets.truncate(mark);
        self.suffix_offsets
            .retain(|_, offset| (*offset as usize) < mark);
    }

    fn memoise_suffix(&mut self, suffix: &[Label]) {
        let index = self.index();
        if index <= POINTER_MAX_OFFSET && !self.suffix_offsets.contains_key(suffix) {
            // the key set never grows beyond the name octets already
            // written, so this clone is bounded by the packet size
            self.suffix_offsets.insert(suffix.to_vec(), index as u16);
        }
    }

    fn suffix_pointer(&self, suffix: &[Label]) -> Option<u16> {
        self.suffix_offsets.get(suffix).copied()
    }

    pub fn write_u8(&mut self, octet: u8) {
        self.octets.put_u8(octet);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.write_octets(&value.to_be_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write_octets(&value.to_be_bytes());
    }

    pub fn write_octets(&mut self, octets: &[u8]) {
        self.octets.put_slice(octets);
    }

    /// Overwrite two octets written earlier, e.g. an RDLENGTH or a
    /// section count known only after the fact.
    pub fn set_u16(&mut self, index: usize, value: u16) {
        let [hi, lo] = value.to_be_bytes();
        self.octets[index] = hi;
        self.octets[index + 1] = lo;
    }
}

/// Helper function to convert a `usize` into a `u16` (or return an error).
///
/// # Errors
///
/// If the value cannot be converted.
fn usize_to_u16(counter: usize) -> Result<u16, Error> {
    if let Ok(t) = u16::try_from(counter) {
        Ok(t)
    } else {
        Err(Error::CounterTooLarge {
            counter,
            bits: u16::BITS,
        })
    }
}
