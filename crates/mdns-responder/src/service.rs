//! DNS-based service discovery on top of the responder: turning "I
//! run a printer on port 631" into the PTR / SRV / TXT / address
//! record set RFC 6763 prescribes.

use std::fmt;
use std::net::IpAddr;

use mdns_types::protocol::types::*;

use crate::responder::Responder;
use crate::store::RecordHandle;

/// TTL for records tied to the host: addresses and SRV (RFC 6762
/// section 10 recommends 120 seconds).
pub const HOST_RECORD_TTL: u32 = 120;

/// TTL for the more stable records: PTR and TXT (75 minutes).
pub const SERVICE_RECORD_TTL: u32 = 4500;

/// One service to advertise: which type it is, what this instance is
/// called, and where it lives.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ServiceRegistration {
    /// The service type, e.g. `_ipp._tcp.local.`.
    pub service: DomainName,

    /// The instance label, e.g. `printer` - a single label, prefixed
    /// onto the service type to form the instance name.
    pub instance: Label,

    /// The port the service listens on.
    pub port: u16,

    /// TXT attributes, `key=value` each.
    pub txt: Vec<CharacterString>,

    /// The host the SRV record points at, e.g. `host.local.`.
    pub target: DomainName,

    /// Addresses to publish for the target host.
    pub addresses: Vec<IpAddr>,
}

impl ServiceRegistration {
    /// The full instance name, e.g. `printer._ipp._tcp.local.`.
    ///
    /// # Errors
    ///
    /// If the instance label does not fit in front of the service
    /// type.
    pub fn instance_name(&self) -> Result<DomainName, ServiceError> {
        self.service
            .prepend(self.instance.clone())
            .ok_or(ServiceError::NameTooLong)
    }
}

/// Handles to the records a registration published.
#[derive(Debug, Clone)]
pub struct ServiceHandles {
    pub ptr: RecordHandle,
    pub srv: RecordHandle,
    pub txt: RecordHandle,
    pub addresses: Vec<RecordHandle>,
}

/// Errors from expanding a registration into records.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ServiceError {
    /// Instance label plus service type exceed the name length limit.
    NameTooLong,
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ServiceError::NameTooLong => write!(f, "instance name does not fit in 255 octets"),
        }
    }
}

impl std::error::Error for ServiceError {}

impl Responder {
    /// Publish the record set for one service instance: a shared PTR
    /// from the service type to the instance, a unique SRV and TXT
    /// for the instance, and a unique address record per address of
    /// the target host.
    ///
    /// The records go through the usual lifecycle - the unique ones
    /// probe first - so the service becomes visible only if nobody
    /// else owns the instance name.
    ///
    /// # Errors
    ///
    /// If the instance name would be too long.
    pub fn register_service(
        &mut self,
        registration: &ServiceRegistration,
        now: u64,
    ) -> Result<ServiceHandles, ServiceError> {
        let instance = registration.instance_name()?;
        tracing::info!(service = %registration.service, %instance, port = registration.port, "registering service");

        let ptr = self.publish(
            ResourceRecord {
                name: registration.service.clone(),
                rtype_with_data: RecordTypeWithData::PTR {
                    ptrdname: instance.clone(),
                },
                rclass: RecordClass::IN,
                cache_flush: false,
                ttl: SERVICE_RECORD_TTL,
            },
            false,
            now,
        );

        let srv = self.publish(
            ResourceRecord {
                name: instance.clone(),
                rtype_with_data: RecordTypeWithData::SRV {
                    priority: 0,
                    weight: 0,
                    port: registration.port,
                    target: registration.target.clone(),
                },
                rclass: RecordClass::IN,
                cache_flush: false,
                ttl: HOST_RECORD_TTL,
            },
            true,
            now,
        );

        let txt = self.publish(
            ResourceRecord {
                name: instance,
                rtype_with_data: RecordTypeWithData::TXT {
                    strings: registration.txt.clone(),
                },
                rclass: RecordClass::IN,
                cache_flush: false,
                ttl: SERVICE_RECORD_TTL,
            },
            true,
            now,
        );

        let mut addresses = Vec::with_capacity(registration.addresses.len());
        for address in &registration.addresses {
            let rtype_with_data = match address {
                IpAddr::V4(address) => RecordTypeWithData::A { address: *address },
                IpAddr::V6(address) => RecordTypeWithData::AAAA { address: *address },
            };
            addresses.push(self.publish(
                ResourceRecord {
                    name: registration.target.clone(),
                    rtype_with_data,
                    rclass: RecordClass::IN,
                    cache_flush: false,
                    ttl: HOST_RECORD_TTL,
                },
                true,
                now,
            ));
        }

        Ok(ServiceHandles {
            ptr,
            srv,
            txt,
            addresses,
        })
    }

    /// Withdraw a service's record set, with goodbyes for whatever
    /// had reached the network.
    ///
    /// # Errors
    ///
    /// If the instance name would be too long.
    pub fn unregister_service(
        &mut self,
        registration: &ServiceRegistration,
        now: u64,
    ) -> Result<(), ServiceError> {
        let instance = registration.instance_name()?;
        tracing::info!(service = %registration.service, %instance, "unregistering service");

        self.withdraw(&registration.service, RecordType::PTR, now);
        self.withdraw(&instance, RecordType::SRV, now);
        self.withdraw(&instance, RecordType::TXT, now);
        self.withdraw(&registration.target, RecordType::A, now);
        self.withdraw(&registration.target, RecordType::AAAA, now);
        Ok(())
    }
}
