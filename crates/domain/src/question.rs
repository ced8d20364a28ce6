use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// DNS record types the engine understands by name.
///
/// Anything else travels through as `Other(u16)` so unusual queries are
/// forwarded and logged rather than rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    A,
    AAAA,
    CNAME,
    MX,
    NS,
    TXT,
    PTR,
    SOA,
    SRV,
    CAA,
    HINFO,
    RRSIG,
    SPF,
    HTTPS,
    ANY,
    Other(u16),
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::AAAA => "AAAA",
            RecordType::CNAME => "CNAME",
            RecordType::MX => "MX",
            RecordType::NS => "NS",
            RecordType::TXT => "TXT",
            RecordType::PTR => "PTR",
            RecordType::SOA => "SOA",
            RecordType::SRV => "SRV",
            RecordType::CAA => "CAA",
            RecordType::HINFO => "HINFO",
            RecordType::RRSIG => "RRSIG",
            RecordType::SPF => "SPF",
            RecordType::HTTPS => "HTTPS",
            RecordType::ANY => "ANY",
            RecordType::Other(_) => "TYPE",
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            RecordType::A => 1,
            RecordType::NS => 2,
            RecordType::CNAME => 5,
            RecordType::SOA => 6,
            RecordType::PTR => 12,
            RecordType::HINFO => 13,
            RecordType::MX => 15,
            RecordType::TXT => 16,
            RecordType::AAAA => 28,
            RecordType::SRV => 33,
            RecordType::RRSIG => 46,
            RecordType::HTTPS => 65,
            RecordType::SPF => 99,
            RecordType::ANY => 255,
            RecordType::CAA => 257,
            RecordType::Other(n) => n,
        }
    }

    pub fn from_u16(value: u16) -> Self {
        match value {
            1 => RecordType::A,
            2 => RecordType::NS,
            5 => RecordType::CNAME,
            6 => RecordType::SOA,
            12 => RecordType::PTR,
            13 => RecordType::HINFO,
            15 => RecordType::MX,
            16 => RecordType::TXT,
            28 => RecordType::AAAA,
            33 => RecordType::SRV,
            46 => RecordType::RRSIG,
            65 => RecordType::HTTPS,
            99 => RecordType::SPF,
            255 => RecordType::ANY,
            257 => RecordType::CAA,
            other => RecordType::Other(other),
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordType::Other(n) => write!(f, "TYPE{}", n),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

impl FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "A" => Ok(RecordType::A),
            "AAAA" => Ok(RecordType::AAAA),
            "CNAME" => Ok(RecordType::CNAME),
            "MX" => Ok(RecordType::MX),
            "NS" => Ok(RecordType::NS),
            "TXT" => Ok(RecordType::TXT),
            "PTR" => Ok(RecordType::PTR),
            "SOA" => Ok(RecordType::SOA),
            "SRV" => Ok(RecordType::SRV),
            "CAA" => Ok(RecordType::CAA),
            "HINFO" => Ok(RecordType::HINFO),
            "RRSIG" => Ok(RecordType::RRSIG),
            "SPF" => Ok(RecordType::SPF),
            "HTTPS" => Ok(RecordType::HTTPS),
            "ANY" => Ok(RecordType::ANY),
            other => {
                if let Some(num) = other.strip_prefix("TYPE") {
                    num.parse::<u16>()
                        .map(RecordType::Other)
                        .map_err(|_| format!("Invalid record type: {}", s))
                } else {
                    Err(format!("Invalid record type: {}", s))
                }
            }
        }
    }
}

impl Serialize for RecordType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for RecordType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// DNS record class. Almost always `IN`; the rest exists for the log only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordClass {
    #[default]
    In,
    Ch,
    Hs,
    Other(u16),
}

impl RecordClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordClass::In => "IN",
            RecordClass::Ch => "CH",
            RecordClass::Hs => "HS",
            RecordClass::Other(_) => "CLASS",
        }
    }

    pub fn from_u16(value: u16) -> Self {
        match value {
            1 => RecordClass::In,
            3 => RecordClass::Ch,
            4 => RecordClass::Hs,
            other => RecordClass::Other(other),
        }
    }
}

impl fmt::Display for RecordClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordClass::Other(n) => write!(f, "CLASS{}", n),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

/// Transport the client used to reach us. The empty tag is plain UDP/TCP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientProtocol {
    #[default]
    Plain,
    Doh,
    Dot,
    Doq,
}

impl ClientProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientProtocol::Plain => "",
            ClientProtocol::Doh => "doh",
            ClientProtocol::Dot => "dot",
            ClientProtocol::Doq => "doq",
        }
    }

    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "doh" => ClientProtocol::Doh,
            "dot" => ClientProtocol::Dot,
            "doq" => ClientProtocol::Doq,
            _ => ClientProtocol::Plain,
        }
    }
}

/// A single decoded DNS question: lower-cased host with the trailing dot
/// trimmed, plus type and class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuestion {
    pub host: String,
    pub qtype: RecordType,
    pub qclass: RecordClass,
}

impl DnsQuestion {
    pub fn new(host: impl Into<String>, qtype: RecordType) -> Self {
        let mut host = host.into().to_ascii_lowercase();
        if host.ends_with('.') && host.len() > 1 {
            host.pop();
        }
        Self {
            host,
            qtype,
            qclass: RecordClass::In,
        }
    }
}
