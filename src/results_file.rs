//! The persisted operation results, format "BOR" version 2.
//!
//! Layout, all integers little-endian, strings u32-length-prefixed:
//!   "BOR\0" u32:version
//!   "FIS\0" u32:count, then per file: u32:id, string:path
//!   "RTS\0" u32:count, then per result:
//!     u32:operation id, u32:was successful (0/1), i64:evaluate time,
//!     u32-counted observed input ids, u32-counted observed output ids
//!
//! Times are stored the way the original toolchain wrote them: 100ns
//! ticks since 0001-01-01T00:00:00Z. Same cache rules as the graph file:
//! load returns None for anything it cannot use.

use crate::codec::{ParseResult, Reader, Writer};
use crate::fs_state::{remap_file_ids, FileId, FileSystemState};
use crate::graph::OperationId;
use crate::results::{OperationResult, OperationResults};
use anyhow::anyhow;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, TimeZone, Utc};
use rustc_hash::{FxHashMap, FxHashSet};

const FILE_MAGIC: &[u8; 4] = b"BOR\0";
const FILE_VERSION: u32 = 2;
const FILES_TAG: &[u8; 4] = b"FIS\0";
const RESULTS_TAG: &[u8; 4] = b"RTS\0";

const TICKS_PER_SECOND: i64 = 10_000_000;
const NANOS_PER_TICK: i64 = 100;
/// Ticks at 1970-01-01T00:00:00Z.
const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;
/// Ticks at 9999-12-31T23:59:59.9999999Z, the top of the tick calendar.
const MAX_TICKS: i64 = 3_155_378_975_999_999_999;

fn ticks_to_time(ticks: i64) -> Option<DateTime<Utc>> {
    if !(0..=MAX_TICKS).contains(&ticks) {
        return None;
    }
    let unix_ticks = ticks - UNIX_EPOCH_TICKS;
    let secs = unix_ticks.div_euclid(TICKS_PER_SECOND);
    let nanos = (unix_ticks.rem_euclid(TICKS_PER_SECOND) * NANOS_PER_TICK) as u32;
    Utc.timestamp_opt(secs, nanos).single()
}

fn time_to_ticks(time: DateTime<Utc>) -> i64 {
    let secs = time.timestamp();
    let sub_ticks = time.timestamp_subsec_nanos() as i64 / NANOS_PER_TICK;
    UNIX_EPOCH_TICKS
        .saturating_add(secs.saturating_mul(TICKS_PER_SECOND))
        .saturating_add(sub_ticks)
}

/// Decode stored results; file ids are still the stored ones.
pub fn read(buf: &[u8]) -> ParseResult<OperationResults> {
    let mut r = Reader::new(buf);
    r.expect_tag(FILE_MAGIC)?;
    let version = r.read_u32()?;
    if version != FILE_VERSION {
        return r.parse_error(format!("unsupported operation results version {}", version));
    }

    let mut results = OperationResults::new();

    r.expect_tag(FILES_TAG)?;
    let file_count = r.read_u32()?;
    let mut files = Vec::new();
    let mut seen = FxHashSet::default();
    for _ in 0..file_count {
        let id = FileId(r.read_u32()?);
        if !seen.insert(id) {
            return r.parse_error(format!("duplicate file id {}", id.0));
        }
        let path = Utf8PathBuf::from(r.read_string()?);
        files.push((id, path));
    }
    results.set_referenced_files(files);

    r.expect_tag(RESULTS_TAG)?;
    let result_count = r.read_u32()?;
    for _ in 0..result_count {
        let id = OperationId(r.read_u32()?);
        if results.results().contains_key(&id) {
            return r.parse_error(format!("duplicate result for operation {}", id));
        }
        let was_successful_run = r.read_u32()? != 0;
        let ticks = r.read_i64()?;
        let evaluate_time = match ticks_to_time(ticks) {
            Some(time) => time,
            None => return r.parse_error(format!("evaluate time {} out of range", ticks)),
        };
        let observed_input = read_file_ids(&mut r)?;
        let observed_output = read_file_ids(&mut r)?;
        results.set_result(
            id,
            OperationResult {
                was_successful_run,
                evaluate_time,
                observed_input,
                observed_output,
            },
        );
    }
    r.expect_eof()?;
    Ok(results)
}

fn read_file_ids(r: &mut Reader) -> ParseResult<Vec<FileId>> {
    let count = r.read_u32()?;
    let mut ids = Vec::new();
    for _ in 0..count {
        ids.push(FileId(r.read_u32()?));
    }
    Ok(ids)
}

/// Encode results in ascending operation id order.
pub fn write(results: &OperationResults) -> Vec<u8> {
    let mut w = Writer::new();
    w.write_tag(FILE_MAGIC);
    w.write_u32(FILE_VERSION);

    w.write_tag(FILES_TAG);
    w.write_u32(results.referenced_files().len() as u32);
    for (id, path) in results.referenced_files() {
        w.write_u32(id.0);
        w.write_string(path.as_str());
    }

    w.write_tag(RESULTS_TAG);
    let ids = results.sorted_operation_ids();
    w.write_u32(ids.len() as u32);
    for id in ids {
        let result = &results.results()[&id];
        w.write_u32(id.0);
        w.write_u32(if result.was_successful_run { 1 } else { 0 });
        w.write_i64(time_to_ticks(result.evaluate_time));
        write_file_ids(&mut w, &result.observed_input);
        write_file_ids(&mut w, &result.observed_output);
    }
    w.finish()
}

fn write_file_ids(w: &mut Writer, ids: &[FileId]) {
    w.write_u32(ids.len() as u32);
    for id in ids {
        w.write_u32(id.0);
    }
}

/// Load the results cache, remapping file ids into `state`. None means
/// no usable results; the run proceeds as if nothing had ever built.
pub fn load(path: &Utf8Path, state: &mut FileSystemState) -> Option<OperationResults> {
    let buf = match std::fs::read(path) {
        Ok(buf) => buf,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            log::info!("no operation results at {}, starting fresh", path);
            return None;
        }
        Err(err) => {
            log::error!("read {}: {}", path, err);
            return None;
        }
    };
    let mut results = match read(&buf) {
        Ok(results) => results,
        Err(err) => {
            log::error!("corrupt operation results {}: {}; discarding them", path, err);
            return None;
        }
    };
    remap(&mut results, state);
    Some(results)
}

fn remap(results: &mut OperationResults, state: &mut FileSystemState) {
    let mut map = FxHashMap::default();
    let mut files = Vec::with_capacity(results.referenced_files().len());
    for (stored, path) in results.referenced_files() {
        let current = state.file_id(path);
        map.insert(*stored, current);
        files.push((current, path.clone()));
    }
    for result in results.results_mut().values_mut() {
        remap_file_ids(&mut result.observed_input, &map);
        remap_file_ids(&mut result.observed_output, &map);
    }
    results.set_referenced_files(files);
}

/// Write the results cache, recomputing the stored file table from the
/// observed file lists.
pub fn save(
    path: &Utf8Path,
    results: &mut OperationResults,
    state: &FileSystemState,
) -> anyhow::Result<()> {
    let mut used = FxHashSet::default();
    for result in results.results().values() {
        used.extend(result.observed_input.iter().copied());
        used.extend(result.observed_output.iter().copied());
    }
    let mut ids: Vec<FileId> = used.into_iter().collect();
    ids.sort();
    let files = ids
        .into_iter()
        .map(|id| (id, state.path(id).to_owned()))
        .collect();
    results.set_referenced_files(files);

    let buf = write(results);
    if let Some(parent) = path.parent() {
        if !parent.as_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|err| anyhow!("create {}: {}", parent, err))?;
        }
    }
    std::fs::write(path, buf).map_err(|err| anyhow!("write {}: {}", path, err))?;
    log::debug!("wrote operation results {} ({} results)", path, results.len());
    Ok(())
}
