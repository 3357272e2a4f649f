use clap::Parser;
use std::cell::RefCell;
use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::process;
use std::rc::Rc;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::EnvFilter;

use mdns_responder::{Responder, ServiceRegistration};
use mdns_types::protocol::types::*;

use crate::services::ServiceFile;

mod services;

/// Load every `.service` file, bailing out on the first bad one so a
/// typo does not silently unpublish a service.
async fn load_services(args: &Args) -> Option<Vec<ServiceRegistration>> {
    let mut paths = args.service_file.clone();

    for dir in &args.services_dir {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(error) => {
                tracing::error!(?dir, ?error, "could not read services directory");
                return None;
            }
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "service") {
                paths.push(path);
            }
        }
    }

    let default_target = match DomainName::from_str(&format!("{}.local.", args.hostname)) {
        Ok(name) => name,
        Err(_) => {
            tracing::error!(hostname = %args.hostname, "hostname does not form a valid domain name");
            return None;
        }
    };
    let default_address = if args.interface == Ipv4Addr::UNSPECIFIED {
        None
    } else {
        Some(IpAddr::V4(args.interface))
    };

    let mut registrations = Vec::with_capacity(paths.len());
    for path in &paths {
        match ServiceFile::from_file(path).await {
            Ok(parsed) => {
                registrations.push(parsed.into_registration(&default_target, default_address));
            }
            Err(error) => {
                tracing::error!(?path, %error, "could not load service file");
                return None;
            }
        }
    }

    Some(registrations)
}

/// A UDP socket bound to the multicast DNS port and joined to the
/// group on one interface, loopback off so we never hear ourselves.
fn open_socket(interface: Ipv4Addr) -> std::io::Result<std::net::UdpSocket> {
    use socket2::{Domain, Protocol, Socket, Type};

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, MDNS_PORT)).into())?;
    socket.join_multicast_v4(&MULTICAST_GROUP_V4, &interface)?;
    socket.set_multicast_ttl_v4(1)?;
    socket.set_multicast_loop_v4(false)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Transmit everything the responder has queued.
async fn drain(responder: &mut Responder, socket: &UdpSocket, now: u64) {
    while let Some((message, destination)) = responder.output(now) {
        match message.to_octets() {
            Ok(octets) => {
                if let Err(error) = socket.send_to(&octets, SocketAddr::V4(destination)).await {
                    tracing::debug!(%destination, ?error, "UDP send error");
                }
            }
            Err(error) => {
                tracing::warn!(?message, %error, "could not serialise message");
            }
        }
    }
}

/// An instance label with a numeric suffix bumped: `printer` becomes
/// `printer-2`, `printer-2` becomes `printer-3`.
fn bump_instance(label: &Label) -> Option<Label> {
    let octets = label.octets();
    let text = String::from_utf8_lossy(octets);

    let bumped = match text.rsplit_once('-') {
        Some((stem, suffix)) => match suffix.parse::<u32>() {
            Ok(n) => format!("{stem}-{}", n + 1),
            Err(_) => format!("{text}-2"),
        },
        None => format!("{text}-2"),
    };

    Label::try_from(bumped.as_bytes()).ok()
}

struct Daemon {
    responder: Responder,
    registrations: Vec<ServiceRegistration>,
    conflicts: Rc<RefCell<Vec<(DomainName, RecordType)>>>,
    rename_on_conflict: bool,
}

impl Daemon {
    fn new(args: &Args, registrations: Vec<ServiceRegistration>, now: u64) -> Self {
        let mut responder = Responder::new(args.interface);

        let conflicts = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&conflicts);
        responder.on_conflict(Box::new(move |name, rtype| {
            sink.borrow_mut().push((name.clone(), rtype));
        }));

        let mut daemon = Self {
            responder,
            registrations: Vec::new(),
            conflicts,
            rename_on_conflict: args.rename_on_conflict,
        };
        daemon.apply_registrations(registrations, now);
        daemon
    }

    /// Register the given services, withdrawing any currently
    /// registered ones that are no longer wanted.
    fn apply_registrations(&mut self, registrations: Vec<ServiceRegistration>, now: u64) {
        let old = std::mem::take(&mut self.registrations);
        for registration in &old {
            if !registrations.contains(registration) {
                if let Err(error) = self.responder.unregister_service(registration, now) {
                    tracing::warn!(%error, "could not unregister service");
                }
            }
        }

        for registration in registrations {
            if old.contains(&registration) {
                self.registrations.push(registration);
                continue;
            }
            match self.responder.register_service(&registration, now) {
                Ok(_) => self.registrations.push(registration),
                Err(error) => tracing::error!(%error, "could not register service"),
            }
        }
    }

    /// Act on any conflicts the last `input` call reported: either
    /// rename the affected instances and try again, or just log and
    /// stay withdrawn.
    fn handle_conflicts(&mut self, now: u64) {
        let lost: Vec<(DomainName, RecordType)> = self.conflicts.borrow_mut().drain(..).collect();

        for (name, rtype) in lost {
            let affected = self
                .registrations
                .iter()
                .position(|registration| {
                    registration.instance_name().map(|n| n == name).unwrap_or(false)
                        || registration.target == name
                });

            let Some(index) = affected else {
                tracing::warn!(%name, %rtype, "conflict on unmanaged record");
                continue;
            };

            if !self.rename_on_conflict {
                tracing::error!(%name, %rtype, "name conflict, withdrawing service");
                let registration = self.registrations.remove(index);
                let _ = self.responder.unregister_service(&registration, now);
                continue;
            }

            let mut renamed = self.registrations.remove(index);
            let _ = self.responder.unregister_service(&renamed, now);
            match bump_instance(&renamed.instance) {
                Some(instance) => {
                    renamed.instance = instance;
                    tracing::warn!(%name, new_instance = %String::from_utf8_lossy(renamed.instance.octets()), "name conflict, renaming");
                    match self.responder.register_service(&renamed, now) {
                        Ok(_) => self.registrations.push(renamed),
                        Err(error) => tracing::error!(%error, "could not re-register renamed service"),
                    }
                }
                None => tracing::error!(%name, "conflict but instance name cannot be renamed"),
            }
        }
    }
}

/// Set up tracing, filtered by `RUST_LOG` as usual.  `RUST_LOG_FORMAT`
/// is a comma-separated list of `json`, `no-time`, and `no-ansi`; a
/// daemon writing to a journal has no use for the interactive pretty
/// formats.
fn begin_logging() {
    let mut json = false;
    let mut timestamps = true;
    let mut ansi = true;

    if let Ok(var) = env::var("RUST_LOG_FORMAT") {
        for option in var.split(',') {
            match option.trim() {
                "json" => json = true,
                "no-time" => timestamps = false,
                "no-ansi" => ansi = false,
                _ => (),
            }
        }
    }

    let logger = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(ansi);

    match (json, timestamps) {
        (true, true) => logger.json().init(),
        (true, false) => logger.json().without_time().init(),
        (false, true) => logger.init(),
        (false, false) => logger.without_time().init(),
    }
}

// the doc comments for this struct turn into the CLI help text
#[derive(Debug, Parser)]
/// A multicast DNS responder for advertising services on the local
/// link.
///
/// mdnsd publishes the record sets described by ".service" files: a
/// PTR for browsing, SRV and TXT for the instance, and address
/// records for the host, probing for ownership of the unique names
/// first.
///
/// Send SIGHUP to reload the service files; removed services get
/// goodbye announcements.  SIGTERM or SIGINT says goodbye to
/// everything and exits.
#[derive(Clone)]
struct Args {
    /// Interface address to join the multicast group on
    #[clap(short, long, value_parser, default_value_t = Ipv4Addr::UNSPECIFIED)]
    interface: Ipv4Addr,

    /// Hostname to advertise; "<hostname>.local." is the default SRV
    /// target
    #[clap(long, value_parser, env = "HOSTNAME", default_value = "mdns")]
    hostname: String,

    /// Path to a service file, can be specified more than once
    #[clap(short = 's', long, value_parser)]
    service_file: Vec<PathBuf>,

    /// Path to a directory to read *.service files from, can be
    /// specified more than once
    #[clap(short = 'S', long, value_parser)]
    services_dir: Vec<PathBuf>,

    /// On a name conflict, rename the instance (printer, printer-2,
    /// ...) and republish instead of withdrawing it
    #[clap(short, long, action(clap::ArgAction::SetTrue))]
    rename_on_conflict: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();

    begin_logging();

    let registrations = match load_services(&args).await {
        Some(registrations) => registrations,
        None => {
            tracing::error!("could not load configuration");
            process::exit(1);
        }
    };

    tracing::info!(interface = %args.interface, group = %MULTICAST_GROUP_V4, port = %MDNS_PORT, "joining multicast group");
    let socket = match open_socket(args.interface) {
        Ok(socket) => socket,
        Err(error) => {
            tracing::error!(?error, "could not open multicast socket");
            process::exit(1);
        }
    };
    let socket = match UdpSocket::from_std(socket) {
        Ok(socket) => socket,
        Err(error) => {
            tracing::error!(?error, "could not register socket with the runtime");
            process::exit(1);
        }
    };

    let signals = (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
        signal(SignalKind::hangup()),
    );
    let (mut sigterm, mut sigint, mut sighup) = match signals {
        (Ok(sigterm), Ok(sigint), Ok(sighup)) => (sigterm, sigint, sighup),
        _ => {
            tracing::error!("could not subscribe to signals");
            process::exit(1);
        }
    };

    let epoch = Instant::now();
    let now_ms = move || u64::try_from(epoch.elapsed().as_millis()).unwrap_or(u64::MAX);

    let mut daemon = Daemon::new(&args, registrations, now_ms());
    let mut buf = vec![0u8; PACKET_MAX_LEN];

    loop {
        let now = now_ms();
        drain(&mut daemon.responder, &socket, now).await;

        let deadline = daemon.responder.sleep(now);
        let pause = Duration::from_millis(match deadline {
            Some(deadline) => deadline.saturating_sub(now),
            // nothing scheduled: sleep until a packet or signal
            None => 60_000,
        });

        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((size, SocketAddr::V4(src))) => {
                        let now = now_ms();
                        match Message::from_octets(&buf[..size]) {
                            Ok(message) => {
                                daemon.responder.input(&message, src, now);
                                daemon.handle_conflicts(now);
                            }
                            Err(error) => {
                                tracing::debug!(%src, %error, "dropping malformed packet");
                                daemon.responder.note_malformed_packet();
                            }
                        }
                    }
                    Ok((_, SocketAddr::V6(src))) => {
                        tracing::debug!(%src, "ignoring packet from IPv6 source");
                    }
                    Err(error) => {
                        tracing::debug!(?error, "UDP receive error");
                    }
                }
            }

            () = tokio::time::sleep(pause) => {}

            _ = sighup.recv() => {
                tracing::info!("SIGHUP: reloading service files");
                match load_services(&args).await {
                    Some(registrations) => daemon.apply_registrations(registrations, now_ms()),
                    None => tracing::error!("reload failed, keeping the old services"),
                }
            }

            _ = sigterm.recv() => break,
            _ = sigint.recv() => break,
        }
    }

    // say goodbye to everything before exiting
    tracing::info!("shutting down");
    daemon.responder.shutdown(now_ms());
    loop {
        let now = now_ms();
        drain(&mut daemon.responder, &socket, now).await;
        match daemon.responder.sleep(now) {
            Some(deadline) => {
                tokio::time::sleep(Duration::from_millis(deadline.saturating_sub(now))).await;
            }
            None => break,
        }
    }

    let stats = daemon.responder.stats();
    tracing::info!(
        received = stats.packets_received,
        sent = stats.packets_sent,
        malformed = stats.malformed_packets,
        conflicts = stats.conflicts,
        "done"
    );
}
