use std::net::{IpAddr, SocketAddr};
use std::ops::Deref;
use std::sync::Arc;

use hickory_proto::op::{Header, Message, MessageType, OpCode, ResponseCode};
use hickory_proto::rr::{rdata, Name, RData, Record, RecordType};
use hickory_proto::serialize::binary::BinDecodable;
use tokio::net::UdpSocket;
use tracing::{debug, instrument, warn};

use crate::backend::MAX_RECEIVE_BUFFER_SIZE;
use crate::resolver::RecursiveResolver;

/// TTL stamped on every answer this front-end packs. The resolver's own
/// cache entries expire independently; this is just what goes out the wire.
const ANSWER_RECORD_TTL: u32 = 600;

/// Runs the UDP/53 front-end (component F) until the socket errors out.
/// Each datagram is handled on its own spawned task so a slow recursive
/// walk for one client never blocks another.
pub async fn serve(bind: IpAddr, port: u16, resolver: Arc<RecursiveResolver>) -> anyhow::Result<()> {
    let socket = UdpSocket::bind(SocketAddr::new(bind, port)).await?;
    let socket = Arc::new(socket);
    debug!(%bind, port, "dns front-end listening");

    let mut buf = vec![0u8; MAX_RECEIVE_BUFFER_SIZE];
    loop {
        let (read_count, peer) = socket.recv_from(&mut buf).await?;
        let Ok(message) = Message::from_bytes(&buf[..read_count]) else {
            warn!(%peer, "dropping undecodable datagram");
            continue;
        };
        tokio::spawn(handle(socket.clone(), message, peer, resolver.clone()));
    }
}

async fn handle(
    socket: Arc<UdpSocket>,
    request: Message,
    peer: SocketAddr,
    resolver: Arc<RecursiveResolver>,
) -> anyhow::Result<()> {
    let response = respond(&request, resolver.deref()).await;
    socket.send_to(response.to_vec()?.as_slice(), peer).await?;
    Ok(())
}

#[instrument(skip(request, resolver))]
async fn respond(request: &Message, resolver: &RecursiveResolver) -> Message {
    if let Some(rejection) = reject(request) {
        return rejection;
    }

    // `reject` already guaranteed exactly one question of a supported type.
    let query = request.query().expect("validated single question");
    let name = query.name().clone();
    let record_type = query.query_type();

    match resolver.resolve(&name, record_type, false).await {
        Ok(addrs) => {
            let mut response = echo_header(request, ResponseCode::NoError);
            for addr in addrs {
                response.add_answer(pack_answer(&name, record_type, addr));
            }
            response
        }
        Err(e) => {
            debug!(%name, %record_type, "resolution failed: {e}");
            echo_header(request, ResponseCode::NXDomain)
        }
    }
}

/// Validates `request` against the checks the front-end performs before
/// ever invoking the resolver. Returns `Some(rejection)` carrying the RCODE
/// to send back, or `None` if the request should be resolved.
fn reject(request: &Message) -> Option<Message> {
    let header = request.header();
    if header.message_type() == MessageType::Response || header.op_code() != OpCode::Query {
        return Some(echo_header(request, ResponseCode::Refused));
    }
    if request.queries().len() != 1 {
        return Some(echo_header(request, ResponseCode::Refused));
    }

    let query = request.query()?;
    let name = query.name().to_string().to_ascii_lowercase();
    // Substring checks, matching the original verbatim (`strings.Contains`):
    // a name like "evil-in-addr.arpa.attacker.com." is NOTIMP'd too.
    if name.contains("in-addr.arpa") {
        return Some(echo_header(request, ResponseCode::NotImp));
    }
    if name.contains(".fritz.box") {
        return Some(echo_header(request, ResponseCode::Refused));
    }
    if !matches!(query.query_type(), RecordType::A | RecordType::AAAA) {
        return Some(echo_header(request, ResponseCode::NotImp));
    }

    None
}

fn echo_header(request: &Message, code: ResponseCode) -> Message {
    let mut header = Header::new();
    header.set_id(request.id());
    header.set_message_type(MessageType::Response);
    header.set_op_code(OpCode::Query);
    header.set_authoritative(true);
    header.set_response_code(code);

    let mut response = Message::new();
    response.set_header(header);
    if let Some(query) = request.query() {
        response.add_query(query.clone());
    }
    response
}

fn pack_answer(name: &Name, record_type: RecordType, addr: IpAddr) -> Record {
    match (record_type, addr) {
        (RecordType::AAAA, IpAddr::V6(v6)) => {
            let octets = expand_ipv6(&v6.to_string()).unwrap_or_else(|| v6.octets());
            Record::from_rdata(
                name.clone(),
                ANSWER_RECORD_TTL,
                RData::AAAA(rdata::AAAA(octets.into())),
            )
        }
        (_, IpAddr::V4(v4)) => {
            Record::from_rdata(name.clone(), ANSWER_RECORD_TTL, RData::A(rdata::A(v4)))
        }
        // family mismatch between the query and what the resolver returned;
        // the resolver's per-family caches make this unreachable in practice.
        (_, addr) => Record::from_rdata(name.clone(), ANSWER_RECORD_TTL, RData::A(rdata::A(
            match addr {
                IpAddr::V4(v4) => v4,
                IpAddr::V6(_) => std::net::Ipv4Addr::UNSPECIFIED,
            },
        ))),
    }
}

/// Expands any valid compressed IPv6 textual form into its eight 16-bit
/// groups and packs them into the 16-byte wire representation, without
/// delegating to a typed parser for the actual byte assembly.
fn expand_ipv6(input: &str) -> Option<[u8; 16]> {
    let groups: Vec<&str> = if let Some(idx) = input.find("::") {
        let (left, right) = (&input[..idx], &input[idx + 2..]);
        let left_groups: Vec<&str> = if left.is_empty() { vec![] } else { left.split(':').collect() };
        let right_groups: Vec<&str> =
            if right.is_empty() { vec![] } else { right.split(':').collect() };
        let missing = 8usize.checked_sub(left_groups.len() + right_groups.len())?;
        let mut full = left_groups;
        full.extend(std::iter::repeat("0").take(missing));
        full.extend(right_groups);
        full
    } else {
        input.split(':').collect()
    };

    if groups.len() != 8 {
        return None;
    }
    let mut bytes = [0u8; 16];
    for (i, group) in groups.iter().enumerate() {
        let value = u16::from_str_radix(group, 16).ok()?;
        bytes[i * 2] = (value >> 8) as u8;
        bytes[i * 2 + 1] = (value & 0xff) as u8;
    }
    Some(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;
    use std::str::FromStr;

    #[test]
    fn test_expand_unspecified() {
        assert_eq!(expand_ipv6("::"), Some([0u8; 16]));
    }

    #[test]
    fn test_expand_loopback() {
        let mut expected = [0u8; 16];
        expected[15] = 1;
        assert_eq!(expand_ipv6("::1"), Some(expected));
    }

    #[test]
    fn test_expand_matches_std_parser() {
        for literal in ["2001:503:ba3e::2:30", "2001:500:200::b", "fe80::1ff:fe23:4567:890a"] {
            let expanded = expand_ipv6(literal).unwrap();
            let parsed = Ipv6Addr::from_str(literal).unwrap();
            assert_eq!(expanded, parsed.octets(), "mismatch for {literal}");
        }
    }

    #[test]
    fn test_expand_rejects_malformed() {
        assert_eq!(expand_ipv6("not:an:address"), None);
        assert_eq!(expand_ipv6("1:2:3:4:5:6:7:8:9"), None);
    }

    fn query(name: &str, record_type: RecordType) -> hickory_proto::op::Query {
        let mut query = hickory_proto::op::Query::new();
        query.set_name(name.parse().unwrap()).set_query_type(record_type);
        query
    }

    #[test]
    fn test_reject_rejects_in_addr_arpa() {
        let mut request = Message::new();
        request.add_query(query("1.0.0.127.in-addr.arpa.", RecordType::PTR));
        let rejection = reject(&request).expect("should be rejected");
        assert_eq!(rejection.response_code(), ResponseCode::NotImp);
    }

    #[test]
    fn test_reject_rejects_in_addr_arpa_substring_anywhere() {
        let mut request = Message::new();
        request.add_query(query("evil-in-addr.arpa.attacker.com.", RecordType::A));
        let rejection = reject(&request).expect("should be rejected");
        assert_eq!(rejection.response_code(), ResponseCode::NotImp);
    }

    #[test]
    fn test_reject_rejects_fritz_box() {
        let mut request = Message::new();
        request.add_query(query("fritzbox.fritz.box.", RecordType::A));
        let rejection = reject(&request).expect("should be rejected");
        assert_eq!(rejection.response_code(), ResponseCode::Refused);
    }

    #[test]
    fn test_reject_rejects_multi_question() {
        let mut request = Message::new();
        request.add_query(query("a.b.", RecordType::A));
        request.add_query(query("c.d.", RecordType::A));
        let rejection = reject(&request).expect("should be rejected");
        assert_eq!(rejection.response_code(), ResponseCode::Refused);
    }

    #[test]
    fn test_reject_allows_plain_a_query() {
        let mut request = Message::new();
        request.add_query(query("example.com.", RecordType::A));
        assert!(reject(&request).is_none());
    }
}
