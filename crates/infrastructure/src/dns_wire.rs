//! Wire-format helpers shared by the upstream pool, the safety client and
//! the server handler. Everything goes through `hickory-proto`; no
//! hand-rolled packet code.

use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::{DNSClass, Name, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable, BinEncoder};
use std::str::FromStr;
use warden_dns_domain::WardenError;

/// Build a recursive query for `host`/`rtype` with a fresh transaction ID.
/// Returns the ID alongside the wire bytes for response matching.
pub fn build_query(host: &str, rtype: RecordType) -> Result<(u16, Vec<u8>), WardenError> {
    let name = Name::from_str(host)
        .map_err(|e| WardenError::InvalidDomainName(format!("{}: {}", host, e)))?;

    let mut query = Query::new();
    query.set_name(name);
    query.set_query_type(rtype);
    query.set_query_class(DNSClass::IN);

    let id = fastrand::u16(..);
    let mut message = Message::new(id, MessageType::Query, OpCode::Query);
    message.metadata.recursion_desired = true;
    message.add_query(query);

    let bytes = encode_message(&message)?;
    Ok((id, bytes))
}

pub fn encode_message(message: &Message) -> Result<Vec<u8>, WardenError> {
    let mut buf = Vec::with_capacity(512);
    let mut encoder = BinEncoder::new(&mut buf);
    message
        .emit(&mut encoder)
        .map_err(|e| WardenError::InvalidDnsResponse(format!("encode failed: {}", e)))?;
    Ok(buf)
}

pub fn decode_message(bytes: &[u8]) -> Result<Message, WardenError> {
    Message::from_bytes(bytes)
        .map_err(|e| WardenError::InvalidDnsResponse(format!("decode failed: {}", e)))
}
