use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;
use warden_dns_domain::{ClientProtocol, DnsQuestion, FilterReason, RecordClass, RecordType};
use warden_dns_application::ports::QueryLogRecord;

/// Verdict block of one log line. Field names are part of the on-disk
/// format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogResult {
    #[serde(rename = "IsFiltered")]
    pub is_filtered: bool,
    #[serde(rename = "Reason")]
    pub reason: i32,
    #[serde(rename = "Rule", default, skip_serializing_if = "String::is_empty")]
    pub rule: String,
    #[serde(rename = "FilterID", default, skip_serializing_if = "is_zero")]
    pub filter_id: i64,
    #[serde(rename = "ServiceName", default, skip_serializing_if = "String::is_empty")]
    pub service_name: String,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

/// One JSON line of the query log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(rename = "IP")]
    pub ip: String,
    /// RFC3339 with nanosecond precision.
    #[serde(rename = "T")]
    pub time: String,
    #[serde(rename = "QH")]
    pub qhost: String,
    #[serde(rename = "QT")]
    pub qtype: String,
    #[serde(rename = "QC")]
    pub qclass: String,
    #[serde(rename = "CP", default)]
    pub client_proto: String,
    /// Base64 of the packed DNS response sent to the client.
    #[serde(rename = "Answer", default, skip_serializing_if = "String::is_empty")]
    pub answer: String,
    /// Base64 of the upstream response that was replaced by a rewrite.
    #[serde(rename = "OrigAnswer", default, skip_serializing_if = "Option::is_none")]
    pub orig_answer: Option<String>,
    #[serde(rename = "Result")]
    pub result: LogResult,
    /// Nanoseconds.
    #[serde(rename = "Elapsed")]
    pub elapsed_ns: i64,
    #[serde(rename = "Upstream", default, skip_serializing_if = "String::is_empty")]
    pub upstream: String,
}

impl LogEntry {
    pub fn from_record(record: &QueryLogRecord, anonymize: bool) -> Self {
        let ip = if anonymize {
            anonymize_ip(record.client_ip)
        } else {
            record.client_ip
        };
        Self {
            ip: ip.to_string(),
            time: record
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Nanos, true),
            qhost: record.question.host.clone(),
            qtype: record.question.qtype.to_string(),
            qclass: record.question.qclass.to_string(),
            client_proto: record.client_proto.as_str().to_string(),
            answer: if record.answer.is_empty() {
                String::new()
            } else {
                BASE64.encode(&record.answer)
            },
            orig_answer: record.orig_answer.as_ref().map(|bytes| BASE64.encode(bytes)),
            result: LogResult {
                is_filtered: record.reason.is_filtered(),
                reason: record.reason.code(),
                rule: record.rule.clone().unwrap_or_default(),
                filter_id: record.filter_list_id.unwrap_or(0),
                service_name: record.service_name.clone().unwrap_or_default(),
            },
            elapsed_ns: record.elapsed.as_nanos() as i64,
            upstream: record.upstream.clone(),
        }
    }

    pub fn to_record(&self) -> Option<QueryLogRecord> {
        let timestamp: DateTime<Utc> = DateTime::parse_from_rfc3339(&self.time).ok()?.into();
        let qtype = RecordType::from_str(&self.qtype).unwrap_or(RecordType::Other(0));
        let mut question = DnsQuestion::new(self.qhost.clone(), qtype);
        if self.qclass != "IN" {
            question.qclass = RecordClass::Other(0);
        }
        Some(QueryLogRecord {
            client_ip: self.ip.parse().ok()?,
            timestamp,
            question,
            client_proto: ClientProtocol::from_tag(&self.client_proto),
            answer: if self.answer.is_empty() {
                Vec::new()
            } else {
                BASE64.decode(&self.answer).ok()?
            },
            orig_answer: match &self.orig_answer {
                Some(encoded) => Some(BASE64.decode(encoded).ok()?),
                None => None,
            },
            reason: FilterReason::from_code(self.reason_code())
                .unwrap_or(FilterReason::NotFiltered),
            rule: if self.result.rule.is_empty() {
                None
            } else {
                Some(self.result.rule.clone())
            },
            filter_list_id: if self.result.filter_id == 0 {
                None
            } else {
                Some(self.result.filter_id)
            },
            service_name: if self.result.service_name.is_empty() {
                None
            } else {
                Some(self.result.service_name.clone())
            },
            elapsed: Duration::from_nanos(self.elapsed_ns.max(0) as u64),
            upstream: self.upstream.clone(),
        })
    }

    pub fn reason_code(&self) -> i32 {
        self.result.reason
    }

    /// Timestamp in UNIX nanoseconds; `None` for a corrupt line.
    pub fn timestamp_ns(&self) -> Option<i64> {
        let dt = DateTime::parse_from_rfc3339(&self.time).ok()?;
        dt.timestamp_nanos_opt()
    }
}

/// Mask a client address for storage: /24 for IPv4, /112 for IPv6.
/// Idempotent: masking a masked address is a no-op.
pub fn anonymize_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(v4) => {
            let mut octets = v4.octets();
            octets[3] = 0;
            IpAddr::V4(octets.into())
        }
        IpAddr::V6(v6) => {
            let mut segments = v6.segments();
            segments[7] = 0;
            IpAddr::V6(segments.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record() -> QueryLogRecord {
        QueryLogRecord {
            client_ip: "192.168.1.42".parse().unwrap(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
                + chrono::Duration::nanoseconds(123456789),
            question: DnsQuestion::new("ads.example", RecordType::A),
            client_proto: ClientProtocol::Plain,
            answer: vec![0xde, 0xad, 0xbe, 0xef],
            orig_answer: None,
            reason: FilterReason::FilteredBlockList,
            rule: Some("||ads.example.^".to_string()),
            filter_list_id: Some(3),
            service_name: None,
            elapsed: Duration::from_micros(250),
            upstream: String::new(),
        }
    }

    #[test]
    fn test_serialized_field_names() {
        let entry = LogEntry::from_record(&record(), false);
        let json = serde_json::to_string(&entry).unwrap();
        for key in ["\"IP\":", "\"T\":", "\"QH\":", "\"QT\":", "\"QC\":", "\"CP\":", "\"Answer\":", "\"Result\":", "\"Elapsed\":"] {
            assert!(json.contains(key), "missing {} in {}", key, json);
        }
        assert!(json.contains("\"Reason\":3"));
        assert!(json.contains("\"IsFiltered\":true"));
        assert!(json.contains("\"FilterID\":3"));
        assert!(!json.contains("OrigAnswer"));
    }

    #[test]
    fn test_roundtrip() {
        let original = record();
        let entry = LogEntry::from_record(&original, false);
        let json = serde_json::to_string(&entry).unwrap();
        let parsed: LogEntry = serde_json::from_str(&json).unwrap();
        let back = parsed.to_record().unwrap();

        assert_eq!(back.client_ip, original.client_ip);
        assert_eq!(back.timestamp, original.timestamp);
        assert_eq!(back.question.host, "ads.example");
        assert_eq!(back.question.qtype, RecordType::A);
        assert_eq!(back.answer, original.answer);
        assert_eq!(back.reason, FilterReason::FilteredBlockList);
        assert_eq!(back.rule.as_deref(), Some("||ads.example.^"));
        assert_eq!(back.filter_list_id, Some(3));
    }

    #[test]
    fn test_time_is_rfc3339_nanos() {
        let entry = LogEntry::from_record(&record(), false);
        assert!(entry.time.contains(".123456789"));
        assert!(entry.time.ends_with('Z'));
    }

    #[test]
    fn test_anonymize_v4() {
        let ip: IpAddr = "192.168.1.42".parse().unwrap();
        let masked = anonymize_ip(ip);
        assert_eq!(masked, "192.168.1.0".parse::<IpAddr>().unwrap());
        // Idempotent
        assert_eq!(anonymize_ip(masked), masked);
    }

    #[test]
    fn test_anonymize_v6() {
        let ip: IpAddr = "2001:db8::1234:5678".parse().unwrap();
        let masked = anonymize_ip(ip);
        assert_eq!(masked, "2001:db8::1234:0".parse::<IpAddr>().unwrap());
        assert_eq!(anonymize_ip(masked), masked);
    }
}
