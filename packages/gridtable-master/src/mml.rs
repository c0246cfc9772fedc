//! The Metalog (MML): an append-only journal of operation-state snapshots
//! and tombstones. Writes are linearized on a single mutex (§5); replay at
//! startup applies the latest snapshot per operation id and discards any id
//! with a tombstone.
//!
//! Each record is hand-rolled per entity kind rather than a single generic
//! envelope: `MmlRecordHeader.entity_type` is `OperationKind::entity_tag()`
//! and `version` is `OperationKind::encoding_version()`, so a future payload
//! shape change for one kind (e.g. DropTable's v3 rename) only bumps that
//! kind's version rather than forcing every record ever written to decode
//! through one format.

use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut, BytesMut};
use gridtable_types::error::GridError;
use gridtable_types::wire::{get_vstr, get_vstr_list, get_vstr_opt, put_vstr, put_vstr_list, put_vstr_opt, MmlRecordHeader};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};

use crate::error::MasterError;
use crate::operation::{Operation, OperationKind, OperationPayload, OperationState};

fn encode_state(buf: &mut BytesMut, state: &OperationState) {
    match state {
        OperationState::Initial => buf.put_u8(0),
        OperationState::InProgress(label) => {
            buf.put_u8(1);
            put_vstr(buf, label);
        }
        OperationState::Complete => buf.put_u8(2),
        OperationState::Error => buf.put_u8(3),
    }
}

fn decode_state(buf: &mut impl Buf, id: u64) -> Result<OperationState, MasterError> {
    if buf.remaining() < 1 {
        return Err(MasterError::MmlCorrupt(id));
    }
    match buf.get_u8() {
        0 => Ok(OperationState::Initial),
        1 => Ok(OperationState::InProgress(
            get_vstr(buf).map_err(|_| MasterError::MmlCorrupt(id))?,
        )),
        2 => Ok(OperationState::Complete),
        3 => Ok(OperationState::Error),
        _ => Err(MasterError::MmlCorrupt(id)),
    }
}

fn put_u64_opt(buf: &mut BytesMut, v: Option<u64>) {
    match v {
        Some(v) => {
            buf.put_u8(1);
            buf.put_u64(v);
        }
        None => buf.put_u8(0),
    }
}

fn get_u64_opt(buf: &mut impl Buf, id: u64) -> Result<Option<u64>, MasterError> {
    if buf.remaining() < 1 {
        return Err(MasterError::MmlCorrupt(id));
    }
    match buf.get_u8() {
        0 => Ok(None),
        _ => {
            if buf.remaining() < 8 {
                return Err(MasterError::MmlCorrupt(id));
            }
            Ok(Some(buf.get_u64()))
        }
    }
}

/// Encodes the per-kind payload fields. Several kinds carry fields beyond
/// their literal wire table (documented in DESIGN.md): CreateTable's
/// `idempotent`, RecreateIndexTables' `schema`/`servers`/`step`. These are
/// implementation-necessary state the source's payload tables don't list,
/// not a format deviation from anything they do list.
fn encode_payload(buf: &mut BytesMut, payload: &OperationPayload) {
    match payload {
        OperationPayload::CreateTable { name, schema, id, location, parts, idempotent } => {
            put_vstr(buf, name);
            put_vstr(buf, schema);
            put_vstr_opt(buf, id.as_deref());
            put_vstr_opt(buf, location.as_deref());
            buf.put_u8(*parts);
            buf.put_u8(u8::from(*idempotent));
        }
        OperationPayload::DropTable { if_exists, name, id, completed, servers, parts } => {
            buf.put_u8(u8::from(*if_exists));
            put_vstr(buf, name);
            put_vstr_opt(buf, id.as_deref());
            put_vstr_list(buf, completed);
            put_vstr_list(buf, servers);
            buf.put_u8(*parts);
        }
        OperationPayload::AlterTable { name, schema, id, completed, servers } => {
            put_vstr(buf, name);
            put_vstr(buf, schema);
            put_vstr_opt(buf, id.as_deref());
            put_vstr_list(buf, completed);
            put_vstr_list(buf, servers);
        }
        OperationPayload::RecreateIndexTables { table_name, schema, parts, servers, subop_hash, step } => {
            put_vstr(buf, table_name);
            put_vstr(buf, schema);
            buf.put_u8(*parts);
            put_vstr_list(buf, servers);
            put_u64_opt(buf, *subop_hash);
            buf.put_u8(*step);
        }
        OperationPayload::SuspendMaintenance { name, id, label, resume, servers, completed } => {
            put_vstr(buf, name);
            put_vstr_opt(buf, id.as_deref());
            put_vstr(buf, label);
            buf.put_u8(u8::from(*resume));
            put_vstr_list(buf, servers);
            put_vstr_list(buf, completed);
        }
        OperationPayload::Recover { location, barrier_deadline_millis } => {
            put_vstr(buf, location);
            buf.put_u64(*barrier_deadline_millis);
        }
        OperationPayload::RegisterServerBlocker { location } => {
            put_vstr(buf, location);
        }
        OperationPayload::RegisterServer { location } => {
            put_vstr(buf, location);
        }
        OperationPayload::ToggleTableMaintenance { name, disable } => {
            put_vstr(buf, name);
            buf.put_u8(u8::from(*disable));
        }
        OperationPayload::None => {}
    }
}

fn decode_payload(kind: OperationKind, buf: &mut impl Buf, id: u64) -> Result<OperationPayload, MasterError> {
    let corrupt = |_: GridError| MasterError::MmlCorrupt(id);
    Ok(match kind {
        OperationKind::CreateTable => OperationPayload::CreateTable {
            name: get_vstr(buf).map_err(corrupt)?,
            schema: get_vstr(buf).map_err(corrupt)?,
            id: get_vstr_opt(buf).map_err(corrupt)?,
            location: get_vstr_opt(buf).map_err(corrupt)?,
            parts: {
                if buf.remaining() < 1 {
                    return Err(MasterError::MmlCorrupt(id));
                }
                buf.get_u8()
            },
            idempotent: {
                if buf.remaining() < 1 {
                    return Err(MasterError::MmlCorrupt(id));
                }
                buf.get_u8() != 0
            },
        },
        OperationKind::DropTable => OperationPayload::DropTable {
            if_exists: {
                if buf.remaining() < 1 {
                    return Err(MasterError::MmlCorrupt(id));
                }
                buf.get_u8() != 0
            },
            name: get_vstr(buf).map_err(corrupt)?,
            id: get_vstr_opt(buf).map_err(corrupt)?,
            completed: get_vstr_list(buf).map_err(corrupt)?,
            servers: get_vstr_list(buf).map_err(corrupt)?,
            parts: {
                if buf.remaining() < 1 {
                    return Err(MasterError::MmlCorrupt(id));
                }
                buf.get_u8()
            },
        },
        OperationKind::AlterTable => OperationPayload::AlterTable {
            name: get_vstr(buf).map_err(corrupt)?,
            schema: get_vstr(buf).map_err(corrupt)?,
            id: get_vstr_opt(buf).map_err(corrupt)?,
            completed: get_vstr_list(buf).map_err(corrupt)?,
            servers: get_vstr_list(buf).map_err(corrupt)?,
        },
        OperationKind::RecreateIndexTables => OperationPayload::RecreateIndexTables {
            table_name: get_vstr(buf).map_err(corrupt)?,
            schema: get_vstr(buf).map_err(corrupt)?,
            parts: {
                if buf.remaining() < 1 {
                    return Err(MasterError::MmlCorrupt(id));
                }
                buf.get_u8()
            },
            servers: get_vstr_list(buf).map_err(corrupt)?,
            subop_hash: get_u64_opt(buf, id)?,
            step: {
                if buf.remaining() < 1 {
                    return Err(MasterError::MmlCorrupt(id));
                }
                buf.get_u8()
            },
        },
        OperationKind::SuspendMaintenance => OperationPayload::SuspendMaintenance {
            name: get_vstr(buf).map_err(corrupt)?,
            id: get_vstr_opt(buf).map_err(corrupt)?,
            label: get_vstr(buf).map_err(corrupt)?,
            resume: {
                if buf.remaining() < 1 {
                    return Err(MasterError::MmlCorrupt(id));
                }
                buf.get_u8() != 0
            },
            servers: get_vstr_list(buf).map_err(corrupt)?,
            completed: get_vstr_list(buf).map_err(corrupt)?,
        },
        OperationKind::Recover => OperationPayload::Recover {
            location: get_vstr(buf).map_err(corrupt)?,
            barrier_deadline_millis: {
                if buf.remaining() < 8 {
                    return Err(MasterError::MmlCorrupt(id));
                }
                buf.get_u64()
            },
        },
        OperationKind::RegisterServerBlocker => {
            OperationPayload::RegisterServerBlocker { location: get_vstr(buf).map_err(corrupt)? }
        }
        OperationKind::RegisterServer => {
            OperationPayload::RegisterServer { location: get_vstr(buf).map_err(corrupt)? }
        }
        OperationKind::ToggleTableMaintenance => OperationPayload::ToggleTableMaintenance {
            name: get_vstr(buf).map_err(corrupt)?,
            disable: {
                if buf.remaining() < 1 {
                    return Err(MasterError::MmlCorrupt(id));
                }
                buf.get_u8() != 0
            },
        },
        OperationKind::Status | OperationKind::TimedBarrier => OperationPayload::None,
    })
}

fn encode_record(op: &Operation) -> Result<BytesMut, MasterError> {
    let mut body = BytesMut::new();
    encode_state(&mut body, &op.state);
    put_vstr_list(&mut body, &op.dependencies);
    put_vstr_list(&mut body, &op.obstructions);
    put_vstr_list(&mut body, &op.exclusivities);
    body.put_u32(op.remove_approval_mask);
    body.put_u8(u8::from(op.marked_for_removal));
    put_vstr_opt(&mut body, op.error_message.as_deref());
    encode_payload(&mut body, &op.payload);

    let header = MmlRecordHeader {
        entity_type: op.kind.entity_tag(),
        version: op.kind.encoding_version(),
        length: body.len() as u32,
        id: op.id,
        flags: 0,
    };
    let mut buf = BytesMut::with_capacity(MmlRecordHeader::WIRE_LEN + body.len());
    header.encode(&mut buf);
    buf.extend_from_slice(&body);
    Ok(buf)
}

fn encode_tombstone(op_id: u64) -> BytesMut {
    // `entity_type` is never consulted for a tombstone record -- decode_record
    // returns before reading it -- so a placeholder value is fine here.
    let header = MmlRecordHeader {
        entity_type: 0,
        version: 0,
        length: 0,
        id: op_id,
        flags: MmlRecordHeader::FLAG_TOMBSTONE,
    };
    let mut buf = BytesMut::with_capacity(MmlRecordHeader::WIRE_LEN);
    header.encode(&mut buf);
    buf
}

enum Record {
    Snapshot(Operation),
    Tombstone(u64),
}

fn decode_record(buf: &mut impl Buf) -> Result<Option<Record>, MasterError> {
    if buf.remaining() == 0 {
        return Ok(None);
    }
    if buf.remaining() < MmlRecordHeader::WIRE_LEN {
        // Partial trailing record: truncated, not an error.
        return Ok(None);
    }
    let header = MmlRecordHeader::decode(buf).map_err(MasterError::Grid)?;
    if header.is_tombstone() {
        return Ok(Some(Record::Tombstone(header.id)));
    }
    let len = header.length as usize;
    if buf.remaining() < len {
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    buf.copy_to_slice(&mut payload);
    let mut cursor = &payload[..];

    let kind = OperationKind::from_entity_tag(header.entity_type)
        .ok_or(MasterError::MmlCorrupt(header.id))?;
    let state = decode_state(&mut cursor, header.id)?;
    let dependencies = get_vstr_list(&mut cursor).map_err(|_| MasterError::MmlCorrupt(header.id))?;
    let obstructions = get_vstr_list(&mut cursor).map_err(|_| MasterError::MmlCorrupt(header.id))?;
    let exclusivities = get_vstr_list(&mut cursor).map_err(|_| MasterError::MmlCorrupt(header.id))?;
    if cursor.remaining() < 5 {
        return Err(MasterError::MmlCorrupt(header.id));
    }
    let remove_approval_mask = cursor.get_u32();
    let marked_for_removal = cursor.get_u8() != 0;
    let error_message = get_vstr_opt(&mut cursor).map_err(|_| MasterError::MmlCorrupt(header.id))?;
    let op_payload = decode_payload(kind, &mut cursor, header.id)?;

    let op = Operation {
        id: header.id,
        kind,
        state,
        dependencies,
        obstructions,
        exclusivities,
        ephemeral: false,
        remove_approval_mask,
        marked_for_removal,
        error_message,
        payload: op_payload,
    };
    Ok(Some(Record::Snapshot(op)))
}

/// The persistent operation log. `record_state` and `tombstone` append
/// under a single writer mutex (linearized, per §5); `replay` reconstructs
/// the live set from the file on master startup.
pub struct Mml {
    path: PathBuf,
    writer: Mutex<File>,
}

impl Mml {
    /// Opens (creating if absent) the MML file at `path`.
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let writer = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, writer: Mutex::new(writer) })
    }

    /// Appends a single operation's current state.
    pub fn record_state(&self, op: &Operation) -> Result<(), MasterError> {
        if op.ephemeral {
            return Ok(());
        }
        let buf = encode_record(op)?;
        let mut writer = self.writer.lock();
        writer.write_all(&buf).map_err(|e| anyhow::Error::new(e).context("mml record_state write"))?;
        writer.flush().map_err(|e| anyhow::Error::new(e).context("mml record_state flush"))?;
        Ok(())
    }

    /// Appends a batch of snapshots/tombstones as one atomic write: either
    /// all records land before the writer is released, or (on crash) none
    /// of them are observed as a coherent unit at replay, since a partial
    /// trailing write is truncated.
    pub fn record_batch(&self, ops: &[&Operation], tombstones: &[u64]) -> Result<(), MasterError> {
        let mut combined = BytesMut::new();
        for op in ops {
            if op.ephemeral {
                continue;
            }
            combined.extend_from_slice(&encode_record(op)?);
        }
        for id in tombstones {
            combined.extend_from_slice(&encode_tombstone(*id));
        }
        let mut writer = self.writer.lock();
        writer.write_all(&combined).map_err(|e| anyhow::Error::new(e).context("mml record_batch write"))?;
        writer.flush().map_err(|e| anyhow::Error::new(e).context("mml record_batch flush"))?;
        Ok(())
    }

    pub fn tombstone(&self, op_id: u64) -> Result<(), MasterError> {
        let buf = encode_tombstone(op_id);
        let mut writer = self.writer.lock();
        writer.write_all(&buf).map_err(|e| anyhow::Error::new(e).context("mml tombstone write"))?;
        writer.flush().map_err(|e| anyhow::Error::new(e).context("mml tombstone flush"))?;
        Ok(())
    }

    /// Replays the log, applying the latest snapshot per operation id and
    /// discarding any id with a tombstone. A partial trailing record is
    /// silently truncated; corruption mid-file is fatal.
    pub fn replay(&self) -> Result<Vec<Operation>, MasterError> {
        let bytes = std::fs::read(&self.path)
            .map_err(|e| anyhow::Error::new(e).context("mml replay read"))?;
        replay_bytes(&bytes)
    }
}

fn replay_bytes(bytes: &[u8]) -> Result<Vec<Operation>, MasterError> {
    let mut live: HashMap<u64, Operation> = HashMap::new();
    let mut tombstoned: std::collections::HashSet<u64> = std::collections::HashSet::new();
    let mut cursor = bytes;
    loop {
        match decode_record(&mut cursor) {
            Ok(Some(Record::Snapshot(op))) => {
                tombstoned.remove(&op.id);
                live.insert(op.id, op);
            }
            Ok(Some(Record::Tombstone(id))) => {
                live.remove(&id);
                tombstoned.insert(id);
            }
            Ok(None) => break,
            Err(MasterError::MmlCorrupt(id)) => return Err(MasterError::MmlCorrupt(id)),
            Err(e) => return Err(e),
        }
    }
    Ok(live.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{OperationKind, OperationPayload};
    use gridtable_types::schema::TableParts;
    use tempfile::tempdir;

    fn op(id: u64) -> Operation {
        Operation::new(id, OperationKind::DropTable, OperationPayload::None)
    }

    #[test]
    fn record_and_replay_round_trips_single_operation() {
        let dir = tempdir().unwrap();
        let mml = Mml::open(dir.path().join("mml.log")).unwrap();
        let mut o = op(1);
        o.transition("SCAN_METADATA");
        mml.record_state(&o).unwrap();

        let live = mml.replay().unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, 1);
        assert_eq!(live[0].state, crate::operation::OperationState::InProgress("SCAN_METADATA".into()));
    }

    #[test]
    fn replay_applies_latest_snapshot_per_id() {
        let dir = tempdir().unwrap();
        let mml = Mml::open(dir.path().join("mml.log")).unwrap();
        let mut o = op(1);
        mml.record_state(&o).unwrap();
        o.transition("ISSUE_REQUESTS");
        mml.record_state(&o).unwrap();

        let live = mml.replay().unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].state, crate::operation::OperationState::InProgress("ISSUE_REQUESTS".into()));
    }

    #[test]
    fn tombstone_removes_operation_from_replay() {
        let dir = tempdir().unwrap();
        let mml = Mml::open(dir.path().join("mml.log")).unwrap();
        mml.record_state(&op(1)).unwrap();
        mml.record_state(&op(2)).unwrap();
        mml.tombstone(1).unwrap();

        let live = mml.replay().unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, 2);
    }

    #[test]
    fn ephemeral_operations_are_never_persisted() {
        let dir = tempdir().unwrap();
        let mml = Mml::open(dir.path().join("mml.log")).unwrap();
        let mut o = op(1);
        o.ephemeral = true;
        mml.record_state(&o).unwrap();

        let live = mml.replay().unwrap();
        assert!(live.is_empty());
    }

    #[test]
    fn truncated_trailing_record_is_discarded_not_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mml.log");
        let mml = Mml::open(&path).unwrap();
        mml.record_state(&op(1)).unwrap();
        // Simulate a crash mid-write: append a few stray bytes shorter than
        // a full header.
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[1, 2, 3]).unwrap();
        }
        let live = mml.replay().unwrap();
        assert_eq!(live.len(), 1);
    }

    #[test]
    fn record_batch_is_visible_atomically_at_replay() {
        let dir = tempdir().unwrap();
        let mml = Mml::open(dir.path().join("mml.log")).unwrap();
        let parent = op(1);
        let subop = op(2);
        mml.record_batch(&[&parent, &subop], &[3]).unwrap();

        let live = mml.replay().unwrap();
        let mut ids: Vec<u64> = live.iter().map(|o| o.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn create_table_payload_round_trips_through_encode_decode() {
        let dir = tempdir().unwrap();
        let mml = Mml::open(dir.path().join("mml.log")).unwrap();
        let mut o = Operation::new(
            9,
            OperationKind::CreateTable,
            OperationPayload::CreateTable {
                name: "/a/t".into(),
                schema: "schema-v1".into(),
                id: Some("7".into()),
                location: Some("rs1".into()),
                parts: TableParts::PRIMARY.0,
                idempotent: true,
            },
        );
        o.transition("LOAD_RANGE");
        mml.record_state(&o).unwrap();

        let live = mml.replay().unwrap();
        assert_eq!(live.len(), 1);
        let OperationPayload::CreateTable { name, schema, id, location, parts, idempotent } =
            &live[0].payload
        else {
            panic!("expected CreateTable payload");
        };
        assert_eq!(name, "/a/t");
        assert_eq!(schema, "schema-v1");
        assert_eq!(id.as_deref(), Some("7"));
        assert_eq!(location.as_deref(), Some("rs1"));
        assert_eq!(*parts, TableParts::PRIMARY.0);
        assert!(*idempotent);
    }

    #[test]
    fn recreate_index_tables_payload_round_trips_servers_and_hash() {
        let dir = tempdir().unwrap();
        let mml = Mml::open(dir.path().join("mml.log")).unwrap();
        let o = Operation::new(
            4,
            OperationKind::RecreateIndexTables,
            crate::operations::recreate_index_tables::new_payload(
                "/a/t",
                "{}",
                TableParts::VALUE_INDEX,
                vec!["rs1".into(), "rs2".into()],
            ),
        );
        mml.record_state(&o).unwrap();

        let live = mml.replay().unwrap();
        let OperationPayload::RecreateIndexTables { table_name, servers, subop_hash, .. } =
            &live[0].payload
        else {
            panic!("expected RecreateIndexTables payload");
        };
        assert_eq!(table_name, "/a/t");
        assert_eq!(servers, &vec!["rs1".to_string(), "rs2".to_string()]);
        assert_eq!(*subop_hash, None);
    }
}
