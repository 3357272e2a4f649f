use clap::Parser;
use std::cell::RefCell;
use std::net::{Ipv4Addr, SocketAddr};
use std::process;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;

use mdns_responder::Responder;
use mdns_types::protocol::types::*;

/// Render a record the way a zone file would, one line per record.
fn show(record: &ResourceRecord) -> String {
    let rdata = match &record.rtype_with_data {
        RecordTypeWithData::A { address } => address.to_string(),
        RecordTypeWithData::NS { nsdname } => nsdname.to_dotted_string(),
        RecordTypeWithData::CNAME { cname } => cname.to_dotted_string(),
        RecordTypeWithData::PTR { ptrdname } => ptrdname.to_dotted_string(),
        RecordTypeWithData::SRV {
            priority,
            weight,
            port,
            target,
        } => format!("{priority} {weight} {port} {}", target.to_dotted_string()),
        RecordTypeWithData::TXT { strings } => strings
            .iter()
            .map(|string| format!("\"{string}\""))
            .collect::<Vec<String>>()
            .join(" "),
        RecordTypeWithData::AAAA { address } => address.to_string(),
        RecordTypeWithData::Unknown { octets, .. } => format!("({} octets)", octets.len()),
    };

    format!(
        "{}\t{}\tIN\t{}\t{}",
        record.name.to_dotted_string(),
        record.ttl,
        record.rtype(),
        rdata,
    )
}

/// A socket on the multicast DNS port, so multicast responses reach
/// us as well as unicast ones.
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

// the doc comments for this struct turn into the CLI help text
#[derive(Debug, Parser)]
/// Ask a question on the local link and print the answers.
///
/// Queries are retransmitted on the standard backoff schedule until
/// the timeout, so slow responders still get heard.  Answers arriving
/// by multicast from unrelated queriers' traffic count too - that is
/// the nature of the protocol.
struct Args {
    /// Name to query for, e.g. "_ipp._tcp.local."
    #[clap(value_parser)]
    name: DomainName,

    /// Record type to query for: A, PTR, SRV, TXT, AAAA, ANY, ...
    #[clap(default_value = "PTR", value_parser)]
    rtype: QueryType,

    /// Interface address to join the multicast group on
    #[clap(short, long, value_parser, default_value_t = Ipv4Addr::UNSPECIFIED)]
    interface: Ipv4Addr,

    /// How long to listen for answers, in seconds
    #[clap(short, long, value_parser, default_value_t = 3)]
    timeout: u64,

    /// Exit as soon as the first answer arrives
    #[clap(short, long, action(clap::ArgAction::SetTrue))]
    one_shot: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();

    let socket = match open_socket(args.interface).and_then(UdpSocket::from_std) {
        Ok(socket) => socket,
        Err(error) => {
            eprintln!("could not open multicast socket: {error}");
            process::exit(1);
        }
    };

    let epoch = Instant::now();
    let now_ms = move || u64::try_from(epoch.elapsed().as_millis()).unwrap_or(u64::MAX);
    let stop_at = args.timeout * 1000;

    let mut responder = Responder::new(args.interface);
    let answers = Rc::new(RefCell::new(0u32));
    let seen = Rc::clone(&answers);
    responder.query(
        args.name.clone(),
        args.rtype,
        Box::new(move |record| {
            println!("{}", show(record));
            *seen.borrow_mut() += 1;
        }),
        now_ms(),
    );

    let mut buf = vec![0u8; PACKET_MAX_LEN];
    loop {
        let now = now_ms();
        if now >= stop_at || (args.one_shot && *answers.borrow() > 0) {
            break;
        }

        while let Some((message, destination)) = responder.output(now) {
            if let Ok(octets) = message.to_octets() {
                let _ = socket.send_to(&octets, SocketAddr::V4(destination)).await;
            }
        }

        let deadline = responder
            .sleep(now)
            .map_or(stop_at, |deadline| deadline.min(stop_at));
        let pause = Duration::from_millis(deadline.saturating_sub(now).max(1));

        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                if let Ok((size, SocketAddr::V4(src))) = result {
                    match Message::from_octets(&buf[..size]) {
                        Ok(message) => responder.input(&message, src, now_ms()),
                        Err(_) => responder.note_malformed_packet(),
                    }
                }
            }
            () = tokio::time::sleep(pause) => {}
        }
    }

    if *answers.borrow() == 0 {
        process::exit(1);
    }
}
