//! Schema revision tracking for stored rows.
//!
//! Only the chunk `state` column changed layout between revisions (V2 added
//! `resource_creating`). A keyspace with chunk rows but no recorded revision
//! predates revision tracking and is treated as V1. A recorded revision that
//! does not parse fails the open.

use tracing::{error, info};

use crate::model::{ChunkState, SchemaRevision};

use super::error::{LedgerError, Result};
use super::partitions::{CHUNK_PREFIX, encode_chunk_key, encode_meta_key};
use super::records::ChunkRow;
use super::store::{LedgerStore, decode_rows, encode_row};

pub const META_SCHEMA_VERSION: &str = "schema_version";

impl LedgerStore {
    /// Bring stored rows up to [`SchemaRevision::CURRENT`].
    pub(super) fn migrate(&self) -> Result<SchemaRevision> {
        let mut tx = self.keyspace.write_tx();
        let version_key = encode_meta_key(META_SCHEMA_VERSION);

        let stored = match tx.get(&self.metadata, &version_key)? {
            Some(raw) => {
                let text = String::from_utf8_lossy(&raw).to_string();
                match text.parse::<u32>() {
                    Ok(version) => Some(version),
                    Err(_) => {
                        error!(value = %text, "Unreadable schema version, refusing to open");
                        return Err(LedgerError::CorruptSchemaVersion(text));
                    }
                }
            }
            None => None,
        };

        let from = match stored {
            Some(version) => SchemaRevision::from_version(version)
                .ok_or(LedgerError::UnsupportedSchema(version))?,
            None => {
                let has_chunks = match tx.prefix(&self.chunks, CHUNK_PREFIX).next() {
                    Some(item) => {
                        item?;
                        true
                    }
                    None => false,
                };
                if has_chunks {
                    SchemaRevision::V1
                } else {
                    SchemaRevision::CURRENT
                }
            }
        };

        if stored == Some(SchemaRevision::CURRENT.version()) {
            return Ok(SchemaRevision::CURRENT);
        }

        if from == SchemaRevision::V1 {
            let rows: Vec<ChunkRow> = decode_rows(tx.prefix(&self.chunks, CHUNK_PREFIX))?;
            let migrated = rows.len();
            for mut row in rows {
                row.state = ChunkState::from_revision(row.state, SchemaRevision::V1)?.code();
                tx.insert(
                    &self.chunks,
                    encode_chunk_key(&row.task_id, row.chunk_index),
                    encode_row(&row)?,
                );
            }
            info!(
                from = from.version(),
                to = SchemaRevision::CURRENT.version(),
                chunks = migrated,
                "Migrated chunk state codes"
            );
        }

        tx.insert(
            &self.metadata,
            version_key,
            SchemaRevision::CURRENT.version().to_string().into_bytes(),
        );
        tx.commit()?;
        Ok(SchemaRevision::CURRENT)
    }
}
