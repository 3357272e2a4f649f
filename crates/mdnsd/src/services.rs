//! Reading `.service` files: one advertised service per file, in a
//! line-oriented `key value` format.
//!
//! ```text
//! # an IPP printer
//! service _ipp._tcp.local.
//! instance printer
//! port 631
//! txt paper=a4
//! txt duplex=yes
//! target host.local.
//! address 192.0.2.5
//! ```
//!
//! `service`, `instance`, and `port` are required.  `txt` and
//! `address` may repeat.  `target` and `address` are optional; the
//! daemon fills them in from its own hostname and interface address.

use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;
use tokio::fs::read_to_string;

use mdns_responder::ServiceRegistration;
use mdns_types::protocol::types::*;

/// A parsed `.service` file, before the daemon's defaults are
/// applied.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ServiceFile {
    pub service: DomainName,
    pub instance: Label,
    pub port: u16,
    pub txt: Vec<CharacterString>,
    pub target: Option<DomainName>,
    pub addresses: Vec<IpAddr>,
}

impl ServiceFile {
    /// Read and parse a service file.
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        match read_to_string(path).await {
            Ok(data) => Self::deserialise(&data),
            Err(error) => Err(Error::IO { error }),
        }
    }

    /// Parse a string of service data.
    pub fn deserialise(data: &str) -> Result<Self, Error> {
        let mut service = None;
        let mut instance = None;
        let mut port = None;
        let mut txt = Vec::new();
        let mut target = None;
        let mut addresses = Vec::new();

        for (i, line) in data.lines().enumerate() {
            let line_number = i + 1;
            let line = match line.find('#') {
                Some(idx) => &line[..idx],
                None => line,
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let (key, value) = match line.split_once(char::is_whitespace) {
                Some((key, value)) => (key, value.trim()),
                None => {
                    return Err(Error::MissingValue {
                        line_number,
                        key: line.to_string(),
                    })
                }
            };

            match key {
                "service" => match DomainName::from_str(value) {
                    Ok(name) => service = Some(name),
                    Err(_) => {
                        return Err(Error::CouldNotParseName {
                            line_number,
                            name: value.to_string(),
                        })
                    }
                },
                "instance" => match Label::try_from(value.as_bytes()) {
                    Ok(label) if !label.is_empty() => instance = Some(label),
                    _ => {
                        return Err(Error::CouldNotParseInstance {
                            line_number,
                            instance: value.to_string(),
                        })
                    }
                },
                "port" => match value.parse::<u16>() {
                    Ok(p) => port = Some(p),
                    Err(_) => {
                        return Err(Error::CouldNotParsePort {
                            line_number,
                            port: value.to_string(),
                        })
                    }
                },
                "txt" => match CharacterString::try_from(value) {
                    Ok(string) => txt.push(string),
                    Err(_) => {
                        return Err(Error::CouldNotParseTxt {
                            line_number,
                            txt: value.to_string(),
                        })
                    }
                },
                "target" => match DomainName::from_str(value) {
                    Ok(name) => target = Some(name),
                    Err(_) => {
                        return Err(Error::CouldNotParseName {
                            line_number,
                            name: value.to_string(),
                        })
                    }
                },
                "address" => match IpAddr::from_str(value) {
                    Ok(address) => addresses.push(address),
                    Err(_) => {
                        return Err(Error::CouldNotParseAddress {
                            line_number,
                            address: value.to_string(),
                        })
                    }
                },
                _ => {
                    return Err(Error::UnknownKey {
                        line_number,
                        key: key.to_string(),
                    })
                }
            }
        }

        Ok(Self {
            service: service.ok_or(Error::MissingField { field: "service" })?,
            instance: instance.ok_or(Error::MissingField { field: "instance" })?,
            port: port.ok_or(Error::MissingField { field: "port" })?,
            txt,
            target,
            addresses,
        })
    }

    /// Apply the daemon's defaults, producing something the responder
    /// can publish.
    pub fn into_registration(
        self,
        default_target: &DomainName,
        default_address: Option<IpAddr>,
    ) -> ServiceRegistration {
        let addresses = if self.addresses.is_empty() {
            default_address.into_iter().collect()
        } else {
            self.addresses
        };

        ServiceRegistration {
            service: self.service,
            instance: self.instance,
            port: self.port,
            txt: self.txt,
            target: self.target.unwrap_or_else(|| default_target.clone()),
            addresses,
        }
    }
}

/// An error that can occur reading a service file.
#[derive(Debug)]
pub enum Error {
    IO { error: std::io::Error },
    MissingField { field: &'static str },
    MissingValue { line_number: usize, key: String },
    UnknownKey { line_number: usize, key: String },
    CouldNotParseName { line_number: usize, name: String },
    CouldNotParseInstance { line_number: usize, instance: String },
    CouldNotParsePort { line_number: usize, port: String },
    CouldNotParseTxt { line_number: usize, txt: String },
    CouldNotParseAddress { line_number: usize, address: String },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::IO { error } => write!(f, "could not read file: {error}"),
            Error::MissingField { field } => write!(f, "missing required field '{field}'"),
            Error::MissingValue { line_number, key } => {
                write!(f, "line {line_number}: no value for '{key}'")
            }
            Error::UnknownKey { line_number, key } => {
                write!(f, "line {line_number}: unknown key '{key}'")
            }
            Error::CouldNotParseName { line_number, name } => {
                write!(f, "line {line_number}: not a domain name: '{name}'")
            }
            Error::CouldNotParseInstance {
                line_number,
                instance,
            } => write!(f, "line {line_number}: not an instance label: '{instance}'"),
            Error::CouldNotParsePort { line_number, port } => {
                write!(f, "line {line_number}: not a port number: '{port}'")
            }
            Error::CouldNotParseTxt { line_number, txt } => {
                write!(f, "line {line_number}: txt value too long: '{txt}'")
            }
            Error::CouldNotParseAddress {
                line_number,
                address,
            } => write!(f, "line {line_number}: not an address: '{address}'"),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_file() {
        let parsed = ServiceFile::deserialise(
            "# an IPP printer\n\
             service _ipp._tcp.local.\n\
             instance printer\n\
             port 631\n\
             txt paper=a4\n\
             txt duplex=yes   # double-sided\n\
             target host.local.\n\
             address 192.0.2.5\n",
        )
        .unwrap();

        assert_eq!("_ipp._tcp.local.", parsed.service.to_dotted_string());
        assert_eq!(b"printer", &parsed.instance.octets()[..]);
        assert_eq!(631, parsed.port);
        assert_eq!(2, parsed.txt.len());
        assert_eq!("duplex=yes", parsed.txt[1].to_string());
        assert_eq!(
            Some("host.local.".to_string()),
            parsed.target.map(|name| name.to_dotted_string())
        );
        assert_eq!(vec!["192.0.2.5".parse::<IpAddr>().unwrap()], parsed.addresses);
    }

    #[test]
    fn target_and_address_default() {
        let parsed = ServiceFile::deserialise(
            "service _http._tcp.local.\n\
             instance web\n\
             port 80\n",
        )
        .unwrap();

        let target = DomainName::from_str("host.local.").unwrap();
        let address: IpAddr = "192.0.2.5".parse().unwrap();
        let registration = parsed.into_registration(&target, Some(address));

        assert_eq!(target, registration.target);
        assert_eq!(vec![address], registration.addresses);
    }

    #[test]
    fn missing_required_field() {
        let result = ServiceFile::deserialise("service _http._tcp.local.\nport 80\n");
        assert!(matches!(
            result,
            Err(Error::MissingField { field: "instance" })
        ));
    }

    #[test]
    fn unknown_key_is_an_error() {
        let result = ServiceFile::deserialise("service _http._tcp.local.\nflavour vanilla\n");
        assert!(matches!(
            result,
            Err(Error::UnknownKey { line_number: 2, .. })
        ));
    }

    #[test]
    fn bad_port_is_an_error() {
        let result = ServiceFile::deserialise(
            "service _http._tcp.local.\ninstance web\nport eighty\n",
        );
        assert!(matches!(
            result,
            Err(Error::CouldNotParsePort { line_number: 3, .. })
        ));
    }
}
