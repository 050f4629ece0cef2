/// Key layout for the Fjall partitions
///
/// Partition structure:
/// - `tasks`: task:{task_id} -> TaskRow (JSON)
/// - `chunks`: chunk:{task_id}:{chunk_index:010} -> ChunkRow (JSON)
/// - `pods`: pod:{name} -> PodRow (JSON)
/// - `reservations`: resv:{task_id}:{reservation_id} -> ReservationRow (JSON)
/// - `metadata`: meta:{key} -> value (string)
///
/// Identifiers never contain `:` (see `model::codec::validate_identifier`), so
/// a task's chunk and reservation prefixes cannot overlap another task's.

pub const TASK_PREFIX: &[u8] = b"task:";
pub const CHUNK_PREFIX: &[u8] = b"chunk:";
pub const POD_PREFIX: &[u8] = b"pod:";
pub const RESERVATION_PREFIX: &[u8] = b"resv:";

pub fn encode_task_key(task_id: &str) -> Vec<u8> {
    format!("task:{}", task_id).into_bytes()
}

pub fn encode_chunk_key(task_id: &str, chunk_index: u32) -> Vec<u8> {
    format!("chunk:{}:{:010}", task_id, chunk_index).into_bytes()
}

/// Prefix covering every chunk of one task, in index order.
pub fn encode_chunk_prefix(task_id: &str) -> Vec<u8> {
    format!("chunk:{}:", task_id).into_bytes()
}

pub fn encode_pod_key(name: &str) -> Vec<u8> {
    format!("pod:{}", name).into_bytes()
}

pub fn encode_reservation_key(task_id: &str, reservation_id: &str) -> Vec<u8> {
    format!("resv:{}:{}", task_id, reservation_id).into_bytes()
}

pub fn encode_reservation_prefix(task_id: &str) -> Vec<u8> {
    format!("resv:{}:", task_id).into_bytes()
}

pub fn encode_meta_key(key: &str) -> Vec<u8> {
    format!("meta:{}", key).into_bytes()
}
