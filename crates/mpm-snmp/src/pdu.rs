//! SNMP PDU and variable binding assembly/parsing.

use std::fmt::Write as _;
use std::net::Ipv4Addr;

use crate::ber::{self, *};
use crate::error::{Result, SnmpError};
use crate::oid::Oid;

/// Prefix of the standard SNMPv2 trap OIDs.
const STD_TRAP_PREFIX: [u32; 9] = [1, 3, 6, 1, 6, 3, 1, 1, 5];

/// SNMP protocol version, as carried in the packet version field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SnmpVersion {
    V1 = 0,
    V2c = 1,
}

/// PDU command kind. The version 1 and version 2 trap shapes both parse
/// into [`SnmpCommand::Trap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnmpCommand {
    GetRequest,
    GetNextRequest,
    SetRequest,
    GetResponse,
    Trap,
}

/// A decoded variable value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnmpValue {
    Null,
    Integer(i32),
    Counter32(u32),
    Gauge32(u32),
    TimeTicks(u32),
    UInteger32(u32),
    Counter64(u64),
    OctetString(Vec<u8>),
    IpAddress(Ipv4Addr),
    ObjectId(Oid),
    Opaque(Vec<u8>),
    /// Content of a type outside the recognized set, kept verbatim.
    Unknown(u8, Vec<u8>),
}

impl SnmpValue {
    pub fn tag(&self) -> u8 {
        match self {
            SnmpValue::Null => ASN_NULL,
            SnmpValue::Integer(_) => ASN_INTEGER,
            SnmpValue::Counter32(_) => ASN_COUNTER32,
            SnmpValue::Gauge32(_) => ASN_GAUGE32,
            SnmpValue::TimeTicks(_) => ASN_TIMETICKS,
            SnmpValue::UInteger32(_) => ASN_UINTEGER32,
            SnmpValue::Counter64(_) => ASN_COUNTER64,
            SnmpValue::OctetString(_) => ASN_OCTET_STRING,
            SnmpValue::IpAddress(_) => ASN_IP_ADDR,
            SnmpValue::ObjectId(_) => ASN_OBJECT_ID,
            SnmpValue::Opaque(_) => ASN_OPAQUE,
            SnmpValue::Unknown(tag, _) => *tag,
        }
    }

    fn content(&self) -> Vec<u8> {
        match self {
            SnmpValue::Null => Vec::new(),
            SnmpValue::Integer(v) => {
                let (buf, len) = encode_int32_content(*v as u32);
                buf[..len].to_vec()
            }
            SnmpValue::Counter32(v)
            | SnmpValue::Gauge32(v)
            | SnmpValue::TimeTicks(v)
            | SnmpValue::UInteger32(v) => {
                let (buf, len) = encode_uint32_content(*v);
                buf[..len].to_vec()
            }
            SnmpValue::Counter64(v) => {
                let (buf, len) = encode_uint64_content(*v);
                buf[..len].to_vec()
            }
            SnmpValue::OctetString(data) | SnmpValue::Opaque(data) => data.clone(),
            SnmpValue::IpAddress(addr) => addr.octets().to_vec(),
            SnmpValue::ObjectId(oid) => encode_oid_content(oid.arcs()),
            SnmpValue::Unknown(_, data) => data.clone(),
        }
    }

    fn decode(tag: u8, content: &[u8]) -> Result<SnmpValue> {
        Ok(match tag {
            ASN_NULL => SnmpValue::Null,
            ASN_INTEGER => SnmpValue::Integer(decode_int32(content)? as i32),
            ASN_COUNTER32 => SnmpValue::Counter32(decode_int32(content)?),
            ASN_GAUGE32 => SnmpValue::Gauge32(decode_int32(content)?),
            ASN_TIMETICKS => SnmpValue::TimeTicks(decode_int32(content)?),
            ASN_UINTEGER32 => SnmpValue::UInteger32(decode_int32(content)?),
            ASN_COUNTER64 => SnmpValue::Counter64(decode_int64(content)?),
            ASN_OCTET_STRING => SnmpValue::OctetString(content.to_vec()),
            ASN_OBJECT_ID => SnmpValue::ObjectId(Oid::new(decode_oid(content)?)),
            ASN_OPAQUE => SnmpValue::Opaque(content.to_vec()),
            ASN_IP_ADDR if content.len() == 4 => SnmpValue::IpAddress(Ipv4Addr::new(
                content[0], content[1], content[2], content[3],
            )),
            other => SnmpValue::Unknown(other, content.to_vec()),
        })
    }
}

/// One (OID, value) binding of a PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnmpVariable {
    pub name: Oid,
    pub value: SnmpValue,
}

impl SnmpVariable {
    pub fn new(name: Oid, value: SnmpValue) -> SnmpVariable {
        SnmpVariable { name, value }
    }

    /// A null-valued binding, as used in GET/GET-NEXT requests.
    pub fn null(name: Oid) -> SnmpVariable {
        SnmpVariable {
            name,
            value: SnmpValue::Null,
        }
    }

    /// Parses one binding from the content of its SEQUENCE wrapper.
    pub fn parse(data: &[u8]) -> Result<SnmpVariable> {
        let (tag, content, rest) = next_tlv(data)?;
        if tag != ASN_OBJECT_ID {
            return Err(SnmpError::Parse("variable binding does not start with an OID"));
        }
        let name = Oid::new(decode_oid(content)?);

        let (tag, content, _) = next_tlv(rest)?;
        Ok(SnmpVariable {
            name,
            value: SnmpValue::decode(tag, content)?,
        })
    }

    /// Appends the binding (SEQUENCE-wrapped) to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        let mut inner = Vec::with_capacity(self.name.len() * 5 + 16);
        ber::encode_vec(ASN_OBJECT_ID, &encode_oid_content(self.name.arcs()), &mut inner);
        ber::encode_vec(self.value.tag(), &self.value.content(), &mut inner);
        ber::encode_vec(ASN_SEQUENCE, &inner, out);
    }

    /// Value as a signed integer, for the integer-like types.
    pub fn as_i32(&self) -> Option<i32> {
        match &self.value {
            SnmpValue::Integer(v) => Some(*v),
            SnmpValue::Counter32(v)
            | SnmpValue::Gauge32(v)
            | SnmpValue::TimeTicks(v)
            | SnmpValue::UInteger32(v) => Some(*v as i32),
            SnmpValue::IpAddress(a) => Some(u32::from(*a) as i32),
            _ => None,
        }
    }

    /// Value as an unsigned integer, for the integer-like types.
    pub fn as_u32(&self) -> Option<u32> {
        self.as_i32().map(|v| v as u32)
    }

    pub fn as_u64(&self) -> Option<u64> {
        match &self.value {
            SnmpValue::Counter64(v) => Some(*v),
            _ => self.as_u32().map(u64::from),
        }
    }

    /// Value formatted as text: decimal for integers, dotted quad for IP
    /// addresses, dotted arcs for OIDs, lossy UTF-8 for octet strings.
    pub fn as_string(&self) -> String {
        match &self.value {
            SnmpValue::Integer(v) => v.to_string(),
            SnmpValue::Counter32(v)
            | SnmpValue::Gauge32(v)
            | SnmpValue::TimeTicks(v)
            | SnmpValue::UInteger32(v) => v.to_string(),
            SnmpValue::Counter64(v) => v.to_string(),
            SnmpValue::IpAddress(a) => a.to_string(),
            SnmpValue::ObjectId(oid) => oid.to_string(),
            SnmpValue::OctetString(data) => String::from_utf8_lossy(data).into_owned(),
            _ => String::new(),
        }
    }

    /// Octet strings of six or more bytes formatted as a MAC address.
    pub fn as_mac_address(&self) -> String {
        match &self.value {
            SnmpValue::OctetString(data) if data.len() >= 6 => {
                let mut out = String::with_capacity(17);
                for (i, b) in data[..6].iter().enumerate() {
                    if i > 0 {
                        out.push(':');
                    }
                    let _ = write!(out, "{b:02X}");
                }
                out
            }
            _ => "00:00:00:00:00:00".to_owned(),
        }
    }

    pub fn as_ip_address(&self) -> Option<Ipv4Addr> {
        match &self.value {
            SnmpValue::IpAddress(a) => Some(*a),
            _ => None,
        }
    }

    pub fn as_oid(&self) -> Option<&Oid> {
        match &self.value {
            SnmpValue::ObjectId(oid) => Some(oid),
            _ => None,
        }
    }

    /// Replaces the value, parsing `text` according to the requested BER
    /// type.
    pub fn set_value_from_string(&mut self, tag: u8, text: &str) -> Result<()> {
        self.value = match tag {
            ASN_INTEGER => SnmpValue::Integer(
                text.trim()
                    .parse()
                    .map_err(|_| SnmpError::Parameter("invalid integer text"))?,
            ),
            ASN_COUNTER32 | ASN_GAUGE32 | ASN_TIMETICKS | ASN_UINTEGER32 => {
                let v = text
                    .trim()
                    .parse()
                    .map_err(|_| SnmpError::Parameter("invalid unsigned integer text"))?;
                match tag {
                    ASN_COUNTER32 => SnmpValue::Counter32(v),
                    ASN_GAUGE32 => SnmpValue::Gauge32(v),
                    ASN_TIMETICKS => SnmpValue::TimeTicks(v),
                    _ => SnmpValue::UInteger32(v),
                }
            }
            ASN_COUNTER64 => SnmpValue::Counter64(
                text.trim()
                    .parse()
                    .map_err(|_| SnmpError::Parameter("invalid counter64 text"))?,
            ),
            ASN_IP_ADDR => SnmpValue::IpAddress(
                text.trim()
                    .parse()
                    .map_err(|_| SnmpError::Parameter("invalid IP address text"))?,
            ),
            ASN_OBJECT_ID => SnmpValue::ObjectId(text.parse()?),
            ASN_OCTET_STRING => SnmpValue::OctetString(text.as_bytes().to_vec()),
            _ => return Err(SnmpError::Parameter("type not settable from text")),
        };
        Ok(())
    }
}

/// An SNMP v1/v2c PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnmpPdu {
    pub version: SnmpVersion,
    pub community: String,
    pub command: SnmpCommand,
    pub request_id: u32,
    pub error_code: u32,
    pub error_index: u32,
    variables: Vec<SnmpVariable>,

    // Trap-only fields.
    pub enterprise: Option<Oid>,
    pub agent_addr: Option<Ipv4Addr>,
    pub generic_trap: u32,
    pub specific_trap: u32,
    pub timestamp: u32,
}

impl SnmpPdu {
    pub fn new(
        version: SnmpVersion,
        command: SnmpCommand,
        community: &str,
        request_id: u32,
    ) -> SnmpPdu {
        SnmpPdu {
            version,
            community: community.to_owned(),
            command,
            request_id,
            error_code: 0,
            error_index: 0,
            variables: Vec::new(),
            enterprise: None,
            agent_addr: None,
            generic_trap: 0,
            specific_trap: 0,
            timestamp: 0,
        }
    }

    pub fn bind(&mut self, variable: SnmpVariable) {
        self.variables.push(variable);
    }

    pub fn variables(&self) -> &[SnmpVariable] {
        &self.variables
    }

    /// Parses a complete SNMP datagram.
    pub fn parse(data: &[u8]) -> Result<SnmpPdu> {
        let (tag, packet, _) = next_tlv(data)?;
        if tag != ASN_SEQUENCE {
            return Err(SnmpError::Parse("packet does not start with SEQUENCE"));
        }

        let (tag, content, rest) = next_tlv(packet)?;
        if tag != ASN_INTEGER {
            return Err(SnmpError::Parse("version field is not an INTEGER"));
        }
        let version = match decode_int32(content)? {
            0 => SnmpVersion::V1,
            1 => SnmpVersion::V2c,
            _ => return Err(SnmpError::Parse("unsupported SNMP version")),
        };

        let (tag, content, rest) = next_tlv(rest)?;
        if tag != ASN_OCTET_STRING {
            return Err(SnmpError::Parse("community field is not an OCTET STRING"));
        }
        let community = String::from_utf8(content.to_vec())
            .map_err(|_| SnmpError::Parse("community is not valid text"))?;

        let (tag, content, _) = next_tlv(rest)?;
        let command = match tag {
            ASN_TRAP_V1_PDU | ASN_TRAP_V2_PDU => SnmpCommand::Trap,
            ASN_GET_REQUEST_PDU => SnmpCommand::GetRequest,
            ASN_GET_NEXT_REQUEST_PDU => SnmpCommand::GetNextRequest,
            ASN_GET_RESPONSE_PDU => SnmpCommand::GetResponse,
            ASN_SET_REQUEST_PDU => SnmpCommand::SetRequest,
            _ => return Err(SnmpError::Parse("unknown PDU type")),
        };

        let mut pdu = SnmpPdu::new(version, command, &community, 0);
        match tag {
            ASN_TRAP_V1_PDU => pdu.parse_trap_v1(content)?,
            ASN_TRAP_V2_PDU => pdu.parse_trap_v2(content)?,
            _ => pdu.parse_generic(content)?,
        }
        Ok(pdu)
    }

    fn parse_generic(&mut self, data: &[u8]) -> Result<()> {
        let (tag, content, rest) = next_tlv(data)?;
        if tag != ASN_INTEGER {
            return Err(SnmpError::Parse("request id is not an INTEGER"));
        }
        self.request_id = decode_int32(content)?;

        let (tag, content, rest) = next_tlv(rest)?;
        if tag != ASN_INTEGER {
            return Err(SnmpError::Parse("error code is not an INTEGER"));
        }
        self.error_code = decode_int32(content)?;

        let (tag, content, rest) = next_tlv(rest)?;
        if tag != ASN_INTEGER {
            return Err(SnmpError::Parse("error index is not an INTEGER"));
        }
        self.error_index = decode_int32(content)?;

        self.parse_varbinds(rest)
    }

    fn parse_varbinds(&mut self, data: &[u8]) -> Result<()> {
        let (tag, mut bindings, _) = next_tlv(data)?;
        if tag != ASN_SEQUENCE {
            return Err(SnmpError::Parse("variable bindings are not a SEQUENCE"));
        }
        while !bindings.is_empty() {
            let (tag, content, rest) = next_tlv(bindings)?;
            if tag != ASN_SEQUENCE {
                return Err(SnmpError::Parse("variable binding is not a SEQUENCE"));
            }
            self.variables.push(SnmpVariable::parse(content)?);
            bindings = rest;
        }
        Ok(())
    }

    fn parse_trap_v1(&mut self, data: &[u8]) -> Result<()> {
        let (tag, content, rest) = next_tlv(data)?;
        if tag != ASN_OBJECT_ID {
            return Err(SnmpError::Parse("trap enterprise is not an OID"));
        }
        let mut enterprise = Oid::new(decode_oid(content)?);

        let (tag, content, rest) = next_tlv(rest)?;
        if tag != ASN_IP_ADDR || content.len() != 4 {
            return Err(SnmpError::Parse("trap agent address is not an IpAddress"));
        }
        self.agent_addr = Some(Ipv4Addr::new(content[0], content[1], content[2], content[3]));

        let (tag, content, rest) = next_tlv(rest)?;
        if tag != ASN_INTEGER {
            return Err(SnmpError::Parse("generic trap type is not an INTEGER"));
        }
        self.generic_trap = decode_int32(content)?;

        let (tag, content, rest) = next_tlv(rest)?;
        if tag != ASN_INTEGER {
            return Err(SnmpError::Parse("specific trap type is not an INTEGER"));
        }
        self.specific_trap = decode_int32(content)?;

        let (tag, content, rest) = next_tlv(rest)?;
        if tag != ASN_TIMETICKS {
            return Err(SnmpError::Parse("trap timestamp is not TimeTicks"));
        }
        self.timestamp = decode_int32(content)?;

        self.parse_varbinds(rest)?;

        // Standard generic traps map onto the SNMPv2 standard trap OIDs;
        // enterprise-specific ones extend the enterprise with 0.<specific>.
        if self.generic_trap < 6 {
            let mut oid = Oid::from_slice(&STD_TRAP_PREFIX);
            oid.extend(self.generic_trap + 1);
            enterprise = oid;
        } else {
            enterprise.extend(0);
            enterprise.extend(self.specific_trap);
        }
        self.enterprise = Some(enterprise);
        Ok(())
    }

    fn parse_trap_v2(&mut self, data: &[u8]) -> Result<()> {
        self.parse_generic(data)?;

        // By SNMPv2 convention the second binding is snmpTrapOID.0.
        let trap_oid = self
            .variables
            .get(1)
            .and_then(|v| v.as_oid())
            .ok_or(SnmpError::Parse("v2 trap without snmpTrapOID binding"))?;

        if trap_oid.starts_with(&STD_TRAP_PREFIX) && trap_oid.len() == 10 {
            self.generic_trap = trap_oid.last().unwrap().saturating_sub(1);
            self.specific_trap = 0;
            self.enterprise = Some(trap_oid.truncated(STD_TRAP_PREFIX.len()));
        } else {
            self.generic_trap = 6;
            self.specific_trap = trap_oid.last().unwrap_or(0);
            self.enterprise = Some(trap_oid.clone());
        }
        Ok(())
    }

    fn pdu_tag(&self) -> u8 {
        match self.command {
            SnmpCommand::GetRequest => ASN_GET_REQUEST_PDU,
            SnmpCommand::GetNextRequest => ASN_GET_NEXT_REQUEST_PDU,
            SnmpCommand::SetRequest => ASN_SET_REQUEST_PDU,
            SnmpCommand::GetResponse => ASN_GET_RESPONSE_PDU,
            SnmpCommand::Trap => match self.version {
                SnmpVersion::V1 => ASN_TRAP_V1_PDU,
                SnmpVersion::V2c => ASN_TRAP_V2_PDU,
            },
        }
    }

    /// Builds the complete SNMP datagram.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut varbinds = Vec::new();
        for variable in &self.variables {
            variable.encode(&mut varbinds);
        }

        let mut block = Vec::with_capacity(varbinds.len() + 64);
        let tag = self.pdu_tag();
        if tag == ASN_TRAP_V1_PDU {
            let enterprise = self
                .enterprise
                .as_ref()
                .ok_or(SnmpError::Parameter("v1 trap without enterprise OID"))?;
            ber::encode_vec(ASN_OBJECT_ID, &encode_oid_content(enterprise.arcs()), &mut block);
            let addr = self.agent_addr.unwrap_or(Ipv4Addr::UNSPECIFIED);
            ber::encode_vec(ASN_IP_ADDR, &addr.octets(), &mut block);
            for value in [self.generic_trap, self.specific_trap] {
                let (buf, len) = encode_int32_content(value);
                ber::encode_vec(ASN_INTEGER, &buf[..len], &mut block);
            }
            let (buf, len) = encode_uint32_content(self.timestamp);
            ber::encode_vec(ASN_TIMETICKS, &buf[..len], &mut block);
        } else {
            for value in [self.request_id, self.error_code, self.error_index] {
                let (buf, len) = encode_int32_content(value);
                ber::encode_vec(ASN_INTEGER, &buf[..len], &mut block);
            }
        }
        ber::encode_vec(ASN_SEQUENCE, &varbinds, &mut block);

        let mut packet = Vec::with_capacity(block.len() + self.community.len() + 16);
        let (buf, len) = encode_int32_content(self.version as u32);
        ber::encode_vec(ASN_INTEGER, &buf[..len], &mut packet);
        ber::encode_vec(ASN_OCTET_STRING, self.community.as_bytes(), &mut packet);
        ber::encode_vec(tag, &block, &mut packet);

        let mut datagram = Vec::with_capacity(packet.len() + 6);
        ber::encode_vec(ASN_SEQUENCE, &packet, &mut datagram);
        Ok(datagram)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(text: &str) -> Oid {
        text.parse().unwrap()
    }

    #[test]
    fn get_request_roundtrip() {
        let mut pdu = SnmpPdu::new(SnmpVersion::V2c, SnmpCommand::GetRequest, "public", 0x1234);
        pdu.bind(SnmpVariable::null(oid("1.3.6.1.2.1.1.1.0")));
        pdu.bind(SnmpVariable::null(oid("1.3.6.1.2.1.1.5.0")));

        let bytes = pdu.encode().unwrap();
        let parsed = SnmpPdu::parse(&bytes).unwrap();
        assert_eq!(parsed, pdu);
    }

    #[test]
    fn get_response_value_types_roundtrip() {
        let mut pdu =
            SnmpPdu::new(SnmpVersion::V2c, SnmpCommand::GetResponse, "private", 99);
        pdu.error_code = 2;
        pdu.error_index = 1;
        pdu.bind(SnmpVariable::new(oid("1.3.6.1.2.1.1.3.0"), SnmpValue::TimeTicks(123456)));
        pdu.bind(SnmpVariable::new(oid("1.3.6.1.2.1.2.2.1.10.1"), SnmpValue::Counter32(42)));
        pdu.bind(SnmpVariable::new(
            oid("1.3.6.1.2.1.31.1.1.1.6.1"),
            SnmpValue::Counter64(0x1_0000_0000),
        ));
        pdu.bind(SnmpVariable::new(oid("1.3.6.1.2.1.1.7.0"), SnmpValue::Integer(-5)));
        pdu.bind(SnmpVariable::new(
            oid("1.3.6.1.2.1.1.5.0"),
            SnmpValue::OctetString(b"core-switch".to_vec()),
        ));
        pdu.bind(SnmpVariable::new(
            oid("1.3.6.1.2.1.4.20.1.1.10.0.0.1"),
            SnmpValue::IpAddress(Ipv4Addr::new(10, 0, 0, 1)),
        ));
        pdu.bind(SnmpVariable::new(
            oid("1.3.6.1.2.1.1.2.0"),
            SnmpValue::ObjectId(oid("1.3.6.1.4.1.9.1.1")),
        ));

        let parsed = SnmpPdu::parse(&pdu.encode().unwrap()).unwrap();
        assert_eq!(parsed, pdu);
        assert_eq!(parsed.variables()[0].as_u32(), Some(123456));
        assert_eq!(parsed.variables()[3].as_i32(), Some(-5));
        assert_eq!(parsed.variables()[4].as_string(), "core-switch");
        assert_eq!(parsed.variables()[5].as_ip_address(), Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(parsed.variables()[6].as_string(), "1.3.6.1.4.1.9.1.1");
    }

    #[test]
    fn v1_trap_enterprise_specific_normalization() {
        let mut trap = SnmpPdu::new(SnmpVersion::V1, SnmpCommand::Trap, "public", 0);
        trap.enterprise = Some(oid("1.3.6.1.4.1.9"));
        trap.agent_addr = Some(Ipv4Addr::new(10, 0, 0, 1));
        trap.generic_trap = 6;
        trap.specific_trap = 100;
        trap.timestamp = 123456;
        trap.bind(SnmpVariable::new(oid("1.3.6.1.2.1.1.3.0"), SnmpValue::TimeTicks(123456)));

        let parsed = SnmpPdu::parse(&trap.encode().unwrap()).unwrap();
        assert_eq!(parsed.command, SnmpCommand::Trap);
        assert_eq!(parsed.community, "public");
        assert_eq!(parsed.agent_addr, Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(parsed.generic_trap, 6);
        assert_eq!(parsed.specific_trap, 100);
        assert_eq!(parsed.timestamp, 123456);
        assert_eq!(parsed.enterprise.as_ref().unwrap().to_string(), "1.3.6.1.4.1.9.0.100");
    }

    #[test]
    fn v1_trap_standard_type_normalization() {
        let mut trap = SnmpPdu::new(SnmpVersion::V1, SnmpCommand::Trap, "public", 0);
        trap.enterprise = Some(oid("1.3.6.1.4.1.9"));
        trap.agent_addr = Some(Ipv4Addr::new(192, 168, 0, 2));
        trap.generic_trap = 2; // linkDown
        trap.timestamp = 7;

        let parsed = SnmpPdu::parse(&trap.encode().unwrap()).unwrap();
        assert_eq!(parsed.enterprise.as_ref().unwrap().to_string(), "1.3.6.1.6.3.1.1.5.3");
    }

    #[test]
    fn v2_trap_standard_oid_normalization() {
        let mut trap = SnmpPdu::new(SnmpVersion::V2c, SnmpCommand::Trap, "public", 7);
        trap.bind(SnmpVariable::new(oid("1.3.6.1.2.1.1.3.0"), SnmpValue::TimeTicks(100)));
        trap.bind(SnmpVariable::new(
            oid("1.3.6.1.6.3.1.1.4.1.0"),
            SnmpValue::ObjectId(oid("1.3.6.1.6.3.1.1.5.3")), // linkDown
        ));

        let parsed = SnmpPdu::parse(&trap.encode().unwrap()).unwrap();
        assert_eq!(parsed.generic_trap, 2);
        assert_eq!(parsed.specific_trap, 0);
        assert_eq!(parsed.enterprise.as_ref().unwrap().to_string(), "1.3.6.1.6.3.1.1.5");
    }

    #[test]
    fn v2_trap_enterprise_specific() {
        let mut trap = SnmpPdu::new(SnmpVersion::V2c, SnmpCommand::Trap, "public", 8);
        trap.bind(SnmpVariable::new(oid("1.3.6.1.2.1.1.3.0"), SnmpValue::TimeTicks(100)));
        trap.bind(SnmpVariable::new(
            oid("1.3.6.1.6.3.1.1.4.1.0"),
            SnmpValue::ObjectId(oid("1.3.6.1.4.1.9.9.41.2.0.1")),
        ));

        let parsed = SnmpPdu::parse(&trap.encode().unwrap()).unwrap();
        assert_eq!(parsed.generic_trap, 6);
        assert_eq!(parsed.specific_trap, 1);
        assert_eq!(parsed.enterprise.as_ref().unwrap().to_string(), "1.3.6.1.4.1.9.9.41.2.0.1");
    }

    #[test]
    fn values_from_text() {
        let mut variable = SnmpVariable::null(oid("1.3.6.1.2.1.1.7.0"));
        variable.set_value_from_string(ASN_INTEGER, "-12").unwrap();
        assert_eq!(variable.value, SnmpValue::Integer(-12));

        variable.set_value_from_string(ASN_GAUGE32, "4000000000").unwrap();
        assert_eq!(variable.value, SnmpValue::Gauge32(4_000_000_000));

        variable.set_value_from_string(ASN_IP_ADDR, "192.168.1.1").unwrap();
        assert_eq!(variable.value, SnmpValue::IpAddress(Ipv4Addr::new(192, 168, 1, 1)));

        variable.set_value_from_string(ASN_OBJECT_ID, "1.3.6.1").unwrap();
        assert_eq!(variable.value, SnmpValue::ObjectId(oid("1.3.6.1")));

        assert!(variable.set_value_from_string(ASN_INTEGER, "twelve").is_err());
        assert!(variable.set_value_from_string(ASN_SEQUENCE, "x").is_err());
    }

    #[test]
    fn mac_address_formatting() {
        let variable = SnmpVariable::new(
            oid("1.3.6.1.2.1.2.2.1.6.1"),
            SnmpValue::OctetString(vec![0x00, 0x1B, 0x2C, 0x3D, 0x4E, 0x5F]),
        );
        assert_eq!(variable.as_mac_address(), "00:1B:2C:3D:4E:5F");

        let short = SnmpVariable::new(oid("1.3"), SnmpValue::OctetString(vec![1, 2]));
        assert_eq!(short.as_mac_address(), "00:00:00:00:00:00");
    }

    #[test]
    fn malformed_packets_are_rejected() {
        // Not a SEQUENCE.
        assert!(SnmpPdu::parse(&[0x02, 0x01, 0x00]).is_err());

        // Valid packet, truncated.
        let mut pdu = SnmpPdu::new(SnmpVersion::V2c, SnmpCommand::GetRequest, "public", 1);
        pdu.bind(SnmpVariable::null(oid("1.3.6.1.2.1.1.1.0")));
        let bytes = pdu.encode().unwrap();
        assert!(SnmpPdu::parse(&bytes[..bytes.len() - 3]).is_err());

        // Unsupported version.
        let mut bad = SnmpPdu::new(SnmpVersion::V2c, SnmpCommand::GetRequest, "public", 1)
            .encode()
            .unwrap();
        // The version INTEGER content is at offset 4 of the datagram.
        bad[4] = 3;
        assert!(SnmpPdu::parse(&bad).is_err());
    }
}
