//! On-wire layouts: the RPC event header, the response header, and the MML
//! record header. Hand-rolled with `bytes`' `BufMut`/`Buf`, matching the
//! fixed binary layouts these formats specify rather than going through
//! `serde`.

use bytes::{Buf, BufMut};

use crate::error::GridError;

/// Header carried by every inbound RPC event.
///
/// `group_id` is derived, not carried on the wire: `(fd << 32) | gid`,
/// guaranteeing ordered handling per logical sender group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcEventHeader {
    pub command: i32,
    pub gid: u32,
    pub id: u32,
    pub timeout_ms: u32,
    pub flags: u32,
}

impl RpcEventHeader {
    pub const WIRE_LEN: usize = 4 + 4 + 4 + 4 + 4;

    #[must_use]
    pub fn group_id(&self, fd: u32) -> u64 {
        (u64::from(fd) << 32) | u64::from(self.gid)
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_i32(self.command);
        buf.put_u32(self.gid);
        buf.put_u32(self.id);
        buf.put_u32(self.timeout_ms);
        buf.put_u32(self.flags);
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, GridError> {
        if buf.remaining() < Self::WIRE_LEN {
            return Err(GridError::CommandParseError("truncated rpc event header".into()));
        }
        Ok(Self {
            command: buf.get_i32(),
            gid: buf.get_u32(),
            id: buf.get_u32(),
            timeout_ms: buf.get_u32(),
            flags: buf.get_u32(),
        })
    }
}

/// Response header: completed-with-error is distinguished from
/// completed-ok purely by `error_code` (0 means success).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeader {
    pub error_code: i32,
    pub error_message: String,
}

impl ResponseHeader {
    #[must_use]
    pub fn ok() -> Self {
        Self { error_code: 0, error_message: String::new() }
    }

    #[must_use]
    pub fn from_error(err: &GridError) -> Self {
        Self { error_code: err.code(), error_message: err.to_string() }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.error_code == 0
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_i32(self.error_code);
        let bytes = self.error_message.as_bytes();
        buf.put_u32(bytes.len() as u32);
        buf.put_slice(bytes);
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, GridError> {
        if buf.remaining() < 8 {
            return Err(GridError::CommandParseError("truncated response header".into()));
        }
        let error_code = buf.get_i32();
        let len = buf.get_u32() as usize;
        if buf.remaining() < len {
            return Err(GridError::CommandParseError("truncated response message".into()));
        }
        let mut raw = vec![0u8; len];
        buf.copy_to_slice(&mut raw);
        let error_message = String::from_utf8(raw)
            .map_err(|e| GridError::CommandParseError(e.to_string()))?;
        Ok(Self { error_code, error_message })
    }
}

/// Fixed header prefix shared by every MML record, entity-specific payload
/// follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmlRecordHeader {
    pub entity_type: u16,
    pub version: u16,
    pub length: u32,
    pub id: u64,
    pub flags: u8,
}

impl MmlRecordHeader {
    pub const WIRE_LEN: usize = 2 + 2 + 4 + 8 + 1;
    pub const FLAG_TOMBSTONE: u8 = 0x01;

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u16(self.entity_type);
        buf.put_u16(self.version);
        buf.put_u32(self.length);
        buf.put_u64(self.id);
        buf.put_u8(self.flags);
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, GridError> {
        if buf.remaining() < Self::WIRE_LEN {
            return Err(GridError::CommandParseError("truncated mml record header".into()));
        }
        Ok(Self {
            entity_type: buf.get_u16(),
            version: buf.get_u16(),
            length: buf.get_u32(),
            id: buf.get_u64(),
            flags: buf.get_u8(),
        })
    }

    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.flags & Self::FLAG_TOMBSTONE != 0
    }
}

/// Writes a length-prefixed UTF-8 string (`vstr` in the MML payload tables).
pub fn put_vstr(buf: &mut impl BufMut, s: &str) {
    let bytes = s.as_bytes();
    buf.put_u32(bytes.len() as u32);
    buf.put_slice(bytes);
}

/// Reads a length-prefixed UTF-8 string.
pub fn get_vstr(buf: &mut impl Buf) -> Result<String, GridError> {
    if buf.remaining() < 4 {
        return Err(GridError::CommandParseError("truncated vstr length".into()));
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(GridError::CommandParseError("truncated vstr body".into()));
    }
    let mut raw = vec![0u8; len];
    buf.copy_to_slice(&mut raw);
    String::from_utf8(raw).map_err(|e| GridError::CommandParseError(e.to_string()))
}

/// Writes an optional `vstr`: a presence byte followed by the string when
/// present.
pub fn put_vstr_opt(buf: &mut impl BufMut, s: Option<&str>) {
    match s {
        Some(s) => {
            buf.put_u8(1);
            put_vstr(buf, s);
        }
        None => buf.put_u8(0),
    }
}

/// Reads an optional `vstr`.
pub fn get_vstr_opt(buf: &mut impl Buf) -> Result<Option<String>, GridError> {
    if buf.remaining() < 1 {
        return Err(GridError::CommandParseError("truncated vstr-opt tag".into()));
    }
    match buf.get_u8() {
        0 => Ok(None),
        _ => Ok(Some(get_vstr(buf)?)),
    }
}

/// Writes a length-prefixed list of `vstr`s (`vstr[]` in the MML payload
/// tables).
pub fn put_vstr_list(buf: &mut impl BufMut, items: &[String]) {
    buf.put_u32(items.len() as u32);
    for item in items {
        put_vstr(buf, item);
    }
}

/// Reads a length-prefixed list of `vstr`s.
pub fn get_vstr_list(buf: &mut impl Buf) -> Result<Vec<String>, GridError> {
    if buf.remaining() < 4 {
        return Err(GridError::CommandParseError("truncated vstr-list length".into()));
    }
    let count = buf.get_u32() as usize;
    let mut out = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        out.push(get_vstr(buf)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn rpc_event_header_round_trips() {
        let header = RpcEventHeader { command: 7, gid: 42, id: 9, timeout_ms: 5_000, flags: 1 };
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        let decoded = RpcEventHeader::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn group_id_combines_fd_and_gid() {
        let header = RpcEventHeader { command: 0, gid: 0x1234, id: 0, timeout_ms: 0, flags: 0 };
        assert_eq!(header.group_id(1), (1u64 << 32) | 0x1234);
    }

    #[test]
    fn response_header_ok_round_trips() {
        let header = ResponseHeader::ok();
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        let decoded = ResponseHeader::decode(&mut buf.freeze()).unwrap();
        assert!(decoded.is_ok());
    }

    #[test]
    fn response_header_from_error_carries_code_and_message() {
        let err = GridError::TableNotFound("/a/t".into());
        let header = ResponseHeader::from_error(&err);
        assert_eq!(header.error_code, err.code());
        assert!(!header.is_ok());
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        let decoded = ResponseHeader::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn mml_record_header_round_trips_and_flags_tombstone() {
        let header = MmlRecordHeader {
            entity_type: 3,
            version: 2,
            length: 128,
            id: 99,
            flags: MmlRecordHeader::FLAG_TOMBSTONE,
        };
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        let decoded = MmlRecordHeader::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, header);
        assert!(decoded.is_tombstone());
    }

    #[test]
    fn vstr_round_trips() {
        let mut buf = BytesMut::new();
        put_vstr(&mut buf, "/tables/foo");
        let decoded = get_vstr(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, "/tables/foo");
    }

    #[test]
    fn decode_truncated_header_errs() {
        let mut buf = BytesMut::new();
        buf.put_u16(1);
        assert!(RpcEventHeader::decode(&mut buf.freeze()).is_err());
    }

    #[test]
    fn vstr_opt_round_trips_present_and_absent() {
        let mut buf = BytesMut::new();
        put_vstr_opt(&mut buf, Some("id-1"));
        put_vstr_opt(&mut buf, None);
        let mut frozen = buf.freeze();
        assert_eq!(get_vstr_opt(&mut frozen).unwrap(), Some("id-1".to_string()));
        assert_eq!(get_vstr_opt(&mut frozen).unwrap(), None);
    }

    #[test]
    fn vstr_list_round_trips_empty_and_populated() {
        let mut buf = BytesMut::new();
        put_vstr_list(&mut buf, &[]);
        put_vstr_list(&mut buf, &["a".to_string(), "bb".to_string()]);
        let mut frozen = buf.freeze();
        assert_eq!(get_vstr_list(&mut frozen).unwrap(), Vec::<String>::new());
        assert_eq!(get_vstr_list(&mut frozen).unwrap(), vec!["a".to_string(), "bb".to_string()]);
    }
}
