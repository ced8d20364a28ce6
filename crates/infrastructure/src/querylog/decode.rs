use crate::dns_wire;
use hickory_proto::rr::RData;

/// One resource record rendered for presentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedAnswer {
    pub rtype: String,
    pub ttl: u32,
    pub value: String,
}

/// Decode a packed DNS response into per-RR display items.
///
/// Unknown record types surface with an empty value rather than being
/// dropped, so the log view never under-reports what was answered.
pub fn decode_answer(wire: &[u8]) -> Vec<DecodedAnswer> {
    let Ok(message) = dns_wire::decode_message(wire) else {
        return Vec::new();
    };

    message
        .answers
        .iter()
        .map(|record| {
            let (rtype, value) = render_rdata(&record.data);
            DecodedAnswer {
                rtype: rtype.unwrap_or_else(|| record.record_type().to_string()),
                ttl: record.ttl,
                value,
            }
        })
        .collect()
}

/// Type-specific rendering. The label override slot exists for types
/// whose wire code alone reads wrong in the UI; everything common renders
/// through its natural form and the rest falls back to hickory's Display.
fn render_rdata(data: &RData) -> (Option<String>, String) {
    match data {
        RData::A(a) => (None, a.0.to_string()),
        RData::AAAA(aaaa) => (None, aaaa.0.to_string()),
        RData::CNAME(name) => (None, name.to_string()),
        RData::NS(name) => (None, name.to_string()),
        RData::PTR(name) => (None, name.to_string()),
        RData::MX(mx) => (None, format!("{} {}", mx.preference, mx.exchange)),
        RData::TXT(txt) => {
            let joined: Vec<String> = txt
                .txt_data
                .iter()
                .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
                .collect();
            (None, joined.join(""))
        }
        RData::SOA(soa) => (
            None,
            format!(
                "{} {} {} {} {} {} {}",
                soa.mname,
                soa.rname,
                soa.serial,
                soa.refresh,
                soa.retry,
                soa.expire,
                soa.minimum
            ),
        ),
        RData::CAA(caa) => (
            None,
            format!(
                "{} {} \"{}\"",
                u8::from(caa.issuer_critical),
                caa.tag.as_str(),
                String::from_utf8_lossy(&caa.value)
            ),
        ),
        RData::HINFO(hinfo) => (
            None,
            format!(
                "\"{}\" \"{}\"",
                String::from_utf8_lossy(&hinfo.cpu),
                String::from_utf8_lossy(&hinfo.os)
            ),
        ),
        RData::SRV(srv) => (
            None,
            format!(
                "{} {} {} {}",
                srv.priority, srv.weight, srv.port, srv.target
            ),
        ),
        other => (None, format!("{}", other)),
    }
}
