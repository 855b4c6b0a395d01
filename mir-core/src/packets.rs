use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::name::Name;

/// Opaque identity of a logical face (endpoint) attached to the forwarder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FaceId(pub u64);

impl fmt::Display for FaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "face#{}", self.0)
    }
}

/// Interest packet structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interest {
    pub name: Name,
    pub nonce: u32,
    pub lifetime: Option<Duration>,
    pub must_be_fresh: bool,
    pub can_be_prefix: bool,
    pub hop_limit: Option<u8>,
    pub application_parameters: Option<Vec<u8>>,
}

impl Interest {
    /// Create a new Interest with a random nonce
    pub fn new(name: Name) -> Self {
        Self {
            name,
            nonce: rand::random(),
            lifetime: None,
            must_be_fresh: false,
            can_be_prefix: false,
            hop_limit: None,
            application_parameters: None,
        }
    }

    pub fn with_nonce(mut self, nonce: u32) -> Self {
        self.nonce = nonce;
        self
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    pub fn with_must_be_fresh(mut self, must_be_fresh: bool) -> Self {
        self.must_be_fresh = must_be_fresh;
        self
    }

    pub fn with_can_be_prefix(mut self, can_be_prefix: bool) -> Self {
        self.can_be_prefix = can_be_prefix;
        self
    }

    pub fn with_hop_limit(mut self, hop_limit: u8) -> Self {
        self.hop_limit = Some(hop_limit);
        self
    }

    pub fn with_application_parameters(mut self, params: Vec<u8>) -> Self {
        self.application_parameters = Some(params);
        self
    }

    /// Replace the nonce with a freshly drawn one.
    pub fn refresh_nonce(&mut self) {
        self.nonce = rand::random();
    }

    /// Check if the Interest can be satisfied by the given Data.
    ///
    /// Names must be equal unless the Interest allows prefix matching.
    pub fn matches_data(&self, data: &Data) -> bool {
        if self.can_be_prefix {
            self.name.is_prefix_of(&data.name)
        } else {
            self.name == data.name
        }
    }
}

/// Data packet structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Data {
    pub name: Name,
    pub content: Vec<u8>,
    pub freshness_period: Option<Duration>,
}

impl Data {
    pub fn new(name: Name, content: Vec<u8>) -> Self {
        Self {
            name,
            content,
            freshness_period: None,
        }
    }

    pub fn with_freshness_period(mut self, freshness_period: Duration) -> Self {
        self.freshness_period = Some(freshness_period);
        self
    }
}

/// Machine-readable reason carried by a Nack.
///
/// Severity increases from `Congestion` to `NoRoute`; `None` is reserved for
/// "no reason recorded" and sorts below every real reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NackReason {
    None,
    Congestion,
    Duplicate,
    NoRoute,
}

impl NackReason {
    /// Reason code as used by the NDN link protocol.
    pub fn code(self) -> u64 {
        match self {
            NackReason::None => 0,
            NackReason::Congestion => 50,
            NackReason::Duplicate => 100,
            NackReason::NoRoute => 150,
        }
    }

    pub fn is_less_severe_than(self, other: NackReason) -> bool {
        self.code() < other.code()
    }
}

impl fmt::Display for NackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            NackReason::None => "None",
            NackReason::Congestion => "Congestion",
            NackReason::Duplicate => "Duplicate",
            NackReason::NoRoute => "NoRoute",
        };
        f.write_str(text)
    }
}

/// Negative response to an Interest; carries the Interest it rejects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nack {
    pub interest: Interest,
    pub reason: NackReason,
}

impl Nack {
    pub fn new(interest: Interest, reason: NackReason) -> Self {
        Self { interest, reason }
    }

    pub fn name(&self) -> &Name {
        &self.interest.name
    }
}

/// Fire-and-forget packet routed by plain FIB lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPacket {
    pub name: Name,
    pub payload: Vec<u8>,
}

impl PushPacket {
    pub fn new(name: Name, payload: Vec<u8>) -> Self {
        Self { name, payload }
    }
}

/// Packet kinds exchanged between the forwarder and its faces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Packet {
    Interest(Interest),
    Data(Data),
    Nack(Nack),
    Push(PushPacket),
}

impl Packet {
    pub fn name(&self) -> &Name {
        match self {
            Packet::Interest(interest) => &interest.name,
            Packet::Data(data) => &data.name,
            Packet::Nack(nack) => nack.name(),
            Packet::Push(packet) => &packet.name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Packet::Interest(_) => "Interest",
            Packet::Data(_) => "Data",
            Packet::Nack(_) => "Nack",
            Packet::Push(_) => "Push",
        }
    }
}

impl From<Interest> for Packet {
    fn from(interest: Interest) -> Self {
        Packet::Interest(interest)
    }
}

impl From<Data> for Packet {
    fn from(data: Data) -> Self {
        Packet::Data(data)
    }
}

impl From<Nack> for Packet {
    fn from(nack: Nack) -> Self {
        Packet::Nack(nack)
    }
}

impl From<PushPacket> for Packet {
    fn from(packet: PushPacket) -> Self {
        Packet::Push(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interest_creation() {
        let interest = Interest::new(Name::from_str("/test/interest"))
            .with_nonce(7)
            .with_lifetime(Duration::from_millis(4000))
            .with_must_be_fresh(true);

        assert_eq!(interest.nonce, 7);
        assert_eq!(interest.lifetime, Some(Duration::from_millis(4000)));
        assert!(interest.must_be_fresh);
        assert!(!interest.can_be_prefix);
    }

    #[test]
    fn test_interest_data_matching() {
        let data = Data::new(Name::from_str("/video/seg/1"), b"x".to_vec());

        let exact = Interest::new(Name::from_str("/video/seg/1"));
        let prefix = Interest::new(Name::from_str("/video")).with_can_be_prefix(true);
        let no_prefix = Interest::new(Name::from_str("/video"));

        assert!(exact.matches_data(&data));
        assert!(prefix.matches_data(&data));
        assert!(!no_prefix.matches_data(&data));
    }

    #[test]
    fn test_nack_severity() {
        assert!(NackReason::Congestion.is_less_severe_than(NackReason::Duplicate));
        assert!(NackReason::Duplicate.is_less_severe_than(NackReason::NoRoute));
        assert!(!NackReason::NoRoute.is_less_severe_than(NackReason::Congestion));
        assert!(NackReason::None.is_less_severe_than(NackReason::Congestion));
    }

    #[test]
    fn test_packet_enum() {
        let interest = Interest::new(Name::from_str("/a"));
        let nack = Nack::new(interest.clone(), NackReason::NoRoute);
        let packet: Packet = nack.into();

        assert_eq!(packet.kind(), "Nack");
        assert_eq!(packet.name(), &interest.name);
    }
}
