use crate::errors::StoreError;
use crate::models::CutoffRecord;
use chrono::Utc;
use dashmap::DashMap;
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const PRIMARY_SUFFIX: &str = ".json";
const STAGING_SUFFIX: &str = ".json.staging";
const BACKUP_MARKER: &str = ".json.";
const BACKUP_SUFFIX: &str = ".bak";
const MAX_BACKUPS_PER_MARKET: usize = 5;

/// Durable key-value store of cutoff records: one JSON file per market plus
/// timestamped backups of superseded copies.
///
/// Writes go through a staging file that is parse-verified before being
/// promoted over the primary, so a crash mid-write never leaves a partial
/// record as the only durable copy. Operations on the same market are
/// serialized by a per-market lock; distinct markets never contend.
pub struct CutoffStore {
    dir: PathBuf,
    records: DashMap<String, CutoffRecord>,
    market_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl CutoffStore {
    /// Opens (or creates) the store directory and loads every record it can,
    /// falling back to backups for markets whose primary copy is corrupted.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| StoreError::io("create store directory", &dir, e))?;

        let store = Self {
            dir,
            records: DashMap::new(),
            market_locks: DashMap::new(),
        };
        store.load_existing()?;
        Ok(store)
    }

    pub fn get(&self, market_id: &str) -> Option<CutoffRecord> {
        self.records.get(market_id).map(|entry| entry.clone())
    }

    pub fn all(&self) -> Vec<CutoffRecord> {
        let mut records: Vec<CutoffRecord> = self
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| a.market_id.cmp(&b.market_id));
        records
    }

    /// Persists a record, superseding (not deleting) any prior copy: the old
    /// primary becomes a timestamped backup before the new one is promoted.
    pub fn put(&self, record: CutoffRecord) -> Result<(), StoreError> {
        let lock = self.market_lock(&record.market_id);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let stem = file_stem(&record.market_id);
        let primary = self.dir.join(format!("{}{}", stem, PRIMARY_SUFFIX));
        let staging = self.dir.join(format!("{}{}", stem, STAGING_SUFFIX));

        let encoded =
            serde_json::to_vec_pretty(&record).map_err(|source| StoreError::Encode {
                market_id: record.market_id.clone(),
                source,
            })?;
        fs::write(&staging, &encoded)
            .map_err(|e| StoreError::io("write staging record to", &staging, e))?;

        // Read the staged copy back before promoting it; a record that does
        // not parse must never replace a good primary.
        let staged_bytes =
            fs::read(&staging).map_err(|e| StoreError::io("read staged record from", &staging, e))?;
        if serde_json::from_slice::<CutoffRecord>(&staged_bytes).is_err() {
            let _ = fs::remove_file(&staging);
            return Err(StoreError::StagingVerification {
                market_id: record.market_id.clone(),
                path: staging.display().to_string(),
            });
        }

        if primary.exists() {
            let backup = self.backup_path(&stem);
            fs::rename(&primary, &backup)
                .map_err(|e| StoreError::io("back up prior record at", &primary, e))?;
            debug!(
                "Backed up previous cutoff record for {} to {}",
                record.market_id,
                backup.display()
            );
        }
        fs::rename(&staging, &primary)
            .map_err(|e| StoreError::io("promote staged record to", &primary, e))?;

        self.prune_backups(&stem);
        self.records.insert(record.market_id.clone(), record);
        Ok(())
    }

    /// Writes all records as a JSON array for operator inspection/migration.
    pub fn export_to<P: AsRef<Path>>(&self, path: P) -> Result<usize, StoreError> {
        let path = path.as_ref();
        let records = self.all();
        let encoded = serde_json::to_vec_pretty(&records).map_err(|source| StoreError::Encode {
            market_id: "<export>".to_string(),
            source,
        })?;
        fs::write(path, encoded).map_err(|e| StoreError::io("write export to", path, e))?;
        Ok(records.len())
    }

    /// Imports records from a JSON array file; last-writer-wins per market.
    pub fn import_from<P: AsRef<Path>>(&self, path: P) -> Result<usize, StoreError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| StoreError::io("read import from", path, e))?;
        let records: Vec<CutoffRecord> =
            serde_json::from_slice(&bytes).map_err(|source| StoreError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        let count = records.len();
        for record in records {
            self.put(record)?;
        }
        Ok(count)
    }

    fn market_lock(&self, market_id: &str) -> Arc<Mutex<()>> {
        self.market_locks
            .entry(market_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn backup_path(&self, stem: &str) -> PathBuf {
        let mut ts = Utc::now().timestamp_millis();
        loop {
            let candidate = self
                .dir
                .join(format!("{}{}{}{}", stem, BACKUP_MARKER, ts, BACKUP_SUFFIX));
            if !candidate.exists() {
                return candidate;
            }
            ts += 1;
        }
    }

    fn load_existing(&self) -> Result<(), StoreError> {
        let entries =
            fs::read_dir(&self.dir).map_err(|e| StoreError::io("read store directory", &self.dir, e))?;

        let mut stems: Vec<String> = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(stem) = name.strip_suffix(STAGING_SUFFIX) {
                // Leftover staging file from an interrupted write; the
                // primary or its backup is authoritative.
                debug!("Ignoring leftover staging file for {}", stem);
                continue;
            }
            if let Some(stem) = name.strip_suffix(PRIMARY_SUFFIX) {
                push_unique(&mut stems, stem);
            } else if name.ends_with(BACKUP_SUFFIX) {
                if let Some(idx) = name.find(BACKUP_MARKER) {
                    push_unique(&mut stems, &name[..idx]);
                }
            }
        }

        for stem in stems {
            if let Some(record) = self.load_market(&stem) {
                self.records.insert(record.market_id.clone(), record);
            }
        }
        info!(
            "Cutoff store loaded {} record(s) from {}",
            self.records.len(),
            self.dir.display()
        );
        Ok(())
    }

    /// Loads one market's record, preferring the primary and falling back to
    /// the newest parseable backup. Corruption is recovered and logged, never
    /// propagated.
    fn load_market(&self, stem: &str) -> Option<CutoffRecord> {
        let primary = self.dir.join(format!("{}{}", stem, PRIMARY_SUFFIX));
        match read_record(&primary) {
            Ok(Some(record)) => return Some(record),
            Ok(None) => {}
            Err(error) => {
                warn!(
                    "Primary cutoff record at {} is unreadable ({}); trying backups",
                    primary.display(),
                    error
                );
            }
        }

        for backup in self.backups_newest_first(stem) {
            match read_record(&backup) {
                Ok(Some(record)) => {
                    warn!(
                        "Recovered cutoff record for {} from backup {}",
                        record.market_id,
                        backup.display()
                    );
                    // Self-heal: rewrite the primary from the recovered copy.
                    if let Err(error) = fs::copy(&backup, &primary) {
                        warn!(
                            "Failed to restore primary at {} from backup: {}",
                            primary.display(),
                            error
                        );
                    }
                    return Some(record);
                }
                Ok(None) => continue,
                Err(error) => {
                    warn!(
                        "Backup {} is unreadable ({}); trying older backups",
                        backup.display(),
                        error
                    );
                }
            }
        }

        warn!(
            "No parseable copy found for store entry {}; starting without it",
            stem
        );
        None
    }

    fn backups_newest_first(&self, stem: &str) -> Vec<PathBuf> {
        let prefix = format!("{}{}", stem, BACKUP_MARKER);
        let mut backups: Vec<(i64, PathBuf)> = Vec::new();
        if let Ok(entries) = fs::read_dir(&self.dir) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().to_string();
                let Some(rest) = name.strip_prefix(&prefix) else {
                    continue;
                };
                let Some(ts_raw) = rest.strip_suffix(BACKUP_SUFFIX) else {
                    continue;
                };
                if let Ok(ts) = ts_raw.parse::<i64>() {
                    backups.push((ts, entry.path()));
                }
            }
        }
        backups.sort_by(|a, b| b.0.cmp(&a.0));
        backups.into_iter().map(|(_, path)| path).collect()
    }

    fn prune_backups(&self, stem: &str) {
        let backups = self.backups_newest_first(stem);
        for stale in backups.iter().skip(MAX_BACKUPS_PER_MARKET) {
            if let Err(error) = fs::remove_file(stale) {
                debug!("Failed to prune backup {}: {}", stale.display(), error);
            }
        }
    }
}

fn read_record(path: &Path) -> Result<Option<CutoffRecord>, StoreError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(StoreError::io("read record from", path, error)),
    };
    let record = serde_json::from_slice(&bytes).map_err(|source| StoreError::Parse {
        path: path.display().to_string(),
        source,
    })?;
    Ok(Some(record))
}

/// Maps a market id onto a filesystem-safe file stem.
fn file_stem(market_id: &str) -> String {
    market_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn push_unique(stems: &mut Vec<String>, stem: &str) {
    if !stems.iter().any(|existing| existing == stem) {
        stems.push(stem.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceConfidence;
    use chrono::TimeZone;

    fn temp_store_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("cutoff-store-{}-{}", tag, fastrand::u64(..)))
    }

    fn record(market_id: &str, day: u32) -> CutoffRecord {
        CutoffRecord {
            market_id: market_id.to_string(),
            cutoff_timestamp: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
            precision_seconds: 3600,
            discovered_at: Utc::now(),
            probe_count: 9,
            source_confidence: SourceConfidence::Exact,
        }
    }

    #[test]
    fn put_then_get_round_trips() {
        let dir = temp_store_dir("roundtrip");
        let store = CutoffStore::open(&dir).unwrap();
        let rec = record("BINANCE_BTC_USDT_PERPETUAL", 5);
        store.put(rec.clone()).unwrap();
        assert_eq!(store.get("BINANCE_BTC_USDT_PERPETUAL"), Some(rec.clone()));

        // Survives a fresh open from the same directory.
        let reopened = CutoffStore::open(&dir).unwrap();
        assert_eq!(reopened.get("BINANCE_BTC_USDT_PERPETUAL"), Some(rec));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn second_put_supersedes_and_keeps_backup() {
        let dir = temp_store_dir("supersede");
        let store = CutoffStore::open(&dir).unwrap();
        store.put(record("M1", 5)).unwrap();
        store.put(record("M1", 9)).unwrap();

        assert_eq!(store.get("M1").unwrap().cutoff_timestamp.format("%d").to_string(), "09");
        let backups = store.backups_newest_first("M1");
        assert_eq!(backups.len(), 1);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn corrupted_primary_falls_back_to_backup() {
        let dir = temp_store_dir("corrupt");
        let store = CutoffStore::open(&dir).unwrap();
        let first = record("M1", 5);
        store.put(first.clone()).unwrap();
        store.put(record("M1", 9)).unwrap();
        drop(store);

        fs::write(dir.join("M1.json"), b"{ not json").unwrap();

        let reopened = CutoffStore::open(&dir).unwrap();
        let recovered = reopened.get("M1").expect("record should be recovered");
        assert_eq!(recovered.cutoff_timestamp, first.cutoff_timestamp);
        // Self-healed primary parses again.
        assert!(read_record(&dir.join("M1.json")).unwrap().is_some());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn crash_between_backup_and_promotion_recovers() {
        let dir = temp_store_dir("crash");
        let store = CutoffStore::open(&dir).unwrap();
        let rec = record("M1", 5);
        store.put(rec.clone()).unwrap();
        drop(store);

        // Simulate a crash mid-put: the primary was renamed to a backup and
        // the staged copy never got promoted.
        fs::rename(dir.join("M1.json"), dir.join("M1.json.123.bak")).unwrap();
        fs::write(dir.join("M1.json.staging"), b"partial").unwrap();

        let reopened = CutoffStore::open(&dir).unwrap();
        assert_eq!(reopened.get("M1"), Some(rec));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn unparseable_everything_starts_empty() {
        let dir = temp_store_dir("empty");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("M1.json"), b"garbage").unwrap();
        fs::write(dir.join("M1.json.111.bak"), b"also garbage").unwrap();

        let store = CutoffStore::open(&dir).unwrap();
        assert!(store.get("M1").is_none());
        assert!(store.all().is_empty());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn backups_are_pruned() {
        let dir = temp_store_dir("prune");
        let store = CutoffStore::open(&dir).unwrap();
        for day in 1..=9 {
            store.put(record("M1", day)).unwrap();
        }
        assert!(store.backups_newest_first("M1").len() <= MAX_BACKUPS_PER_MARKET);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn export_import_round_trips() {
        let dir = temp_store_dir("export");
        let store = CutoffStore::open(&dir).unwrap();
        store.put(record("M1", 3)).unwrap();
        store.put(record("M2", 7)).unwrap();

        let export_path = dir.join("export.json");
        assert_eq!(store.export_to(&export_path).unwrap(), 2);

        let other_dir = temp_store_dir("import");
        let other = CutoffStore::open(&other_dir).unwrap();
        assert_eq!(other.import_from(&export_path).unwrap(), 2);
        assert_eq!(other.all().len(), 2);
        assert_eq!(other.get("M2"), store.get("M2"));
        fs::remove_dir_all(&dir).unwrap();
        fs::remove_dir_all(&other_dir).unwrap();
    }

    #[test]
    fn file_stem_sanitizes_market_ids() {
        assert_eq!(file_stem("BINANCE/BTC:USDT"), "BINANCE_BTC_USDT");
        assert_eq!(file_stem("OKX_ETH-USD_SWAP"), "OKX_ETH-USD_SWAP");
    }
}
