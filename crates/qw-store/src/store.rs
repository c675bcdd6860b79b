//! The pattern store: single writer, many lock-free readers.
//!
//! The current state is an immutable [`Snapshot`] behind an `Arc`. Readers
//! clone the pointer and work on that; the writer path (ingest, import) is
//! serialized by one mutex, builds the next snapshot off to the side, and
//! swaps the pointer in. A reader therefore never sees a half-fused pattern.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use qw_core::{
    Embedding, MonotonicClock, PatternRecord, WaveCodec, WavePattern, export_json, fuse,
    now_unix_millis, parse_snapshot, score, should_absorb,
};
use serde::Serialize;
use uuid::Uuid;

use crate::backend::{SnapshotBackend, open_backend};
use crate::config::StoreConfig;
use crate::error::{AppliedWrite, Result, StoreError};
use crate::index::FrequencyBands;
use crate::sqlite::SqliteBackend;

/// Provenance id given to search queries; never stored.
const QUERY_SOURCE: &str = "query";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    pub pattern_id: Uuid,
    pub fused: bool,
    pub depth: u32,
    /// Best resonance found against the stored patterns, 0 when none.
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub pattern_id: Uuid,
    pub score: f64,
    pub depth: u32,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    /// Ids of records that broke an invariant, in input order.
    pub rejected: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub patterns: usize,
    pub active: usize,
    pub dormant: usize,
    pub fused: usize,
    pub max_depth: u32,
    pub total_sources: usize,
    pub frequency_bands: usize,
    pub absorption_threshold: f64,
    pub backend: String,
    /// Newest `updated_at` in the store, Unix milliseconds.
    pub last_updated: Option<i64>,
    pub version: u64,
    pub dirty: bool,
}

/// One immutable generation of the store.
struct Snapshot {
    version: u64,
    patterns: Vec<Arc<WavePattern>>,
    slots: HashMap<Uuid, usize>,
    bands: FrequencyBands,
}

impl Snapshot {
    fn from_patterns(version: u64, patterns: Vec<WavePattern>) -> Self {
        let bands = FrequencyBands::build(&patterns);
        let slots = patterns
            .iter()
            .enumerate()
            .map(|(slot, p)| (p.id, slot))
            .collect();
        Snapshot {
            version,
            patterns: patterns.into_iter().map(Arc::new).collect(),
            slots,
            bands,
        }
    }

    fn push(&mut self, pattern: WavePattern) {
        let slot = self.patterns.len();
        self.slots.insert(pattern.id, slot);
        self.bands.insert(slot, &pattern);
        self.patterns.push(Arc::new(pattern));
    }

    /// Copy of this generation sharing every pattern allocation.
    fn next_generation(&self) -> Self {
        Snapshot {
            version: self.version + 1,
            patterns: self.patterns.clone(),
            slots: self.slots.clone(),
            bands: self.bands.clone(),
        }
    }

    fn records(&self) -> Vec<PatternRecord> {
        self.patterns
            .iter()
            .map(|p| PatternRecord::from_pattern(p))
            .collect()
    }

    /// Highest-resonance active pattern for `incoming`, stored side first.
    /// Earlier slots win exact ties.
    fn best_match(&self, incoming: &WavePattern, cutoff: f64) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;
        for slot in self
            .bands
            .candidates(incoming.frequency, incoming.amplitude, cutoff)
        {
            let s = score(&self.patterns[slot], incoming);
            match best {
                Some((b_slot, b)) if s < b || (s == b && slot > b_slot) => {}
                _ => best = Some((slot, s)),
            }
        }
        best
    }
}

struct Writer {
    clock: MonotonicClock,
}

pub struct PatternStore {
    config: StoreConfig,
    backend: Box<dyn SnapshotBackend>,
    current: RwLock<Arc<Snapshot>>,
    writer: Mutex<Writer>,
    durable_version: AtomicU64,
}

impl PatternStore {
    /// Open the backend named by `config` and load its last durable snapshot.
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let backend = open_backend(&config)?;
        Self::with_backend(config, backend)
    }

    /// Default config over a private in-memory SQLite database.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_backend(
            StoreConfig::default(),
            Box::new(SqliteBackend::open_in_memory()?),
        )
    }

    pub fn with_backend(config: StoreConfig, backend: Box<dyn SnapshotBackend>) -> Result<Self> {
        config.validate()?;
        let records = backend.load()?;
        let (patterns, rejected) = validate_records(records);
        for id in &rejected {
            tracing::warn!("skipping invalid stored pattern {id}");
        }

        let newest = patterns.iter().map(|p| p.updated_at).max().unwrap_or(0);
        tracing::info!(
            "opened pattern store {} ({} patterns)",
            backend.describe(),
            patterns.len()
        );

        Ok(Self {
            config,
            backend,
            current: RwLock::new(Arc::new(Snapshot::from_patterns(0, patterns))),
            writer: Mutex::new(Writer {
                clock: MonotonicClock::starting_after(newest),
            }),
            durable_version: AtomicU64::new(0),
        })
    }

    /// Persist if anything changed since the last durable write, then drop.
    pub fn close(self) -> Result<()> {
        if self.is_dirty() {
            self.persist()?;
        }
        tracing::info!("closed pattern store {}", self.backend.describe());
        Ok(())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn absorption_threshold(&self) -> f64 {
        self.config.absorption_threshold
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current.read())
    }

    fn install(&self, next: Snapshot) -> Arc<Snapshot> {
        let next = Arc::new(next);
        *self.current.write() = Arc::clone(&next);
        next
    }

    // --- Writes ---

    /// Encode `embedding` and either fuse it into the most resonant stored
    /// pattern (score at or above the absorption threshold) or store it as a
    /// new pattern.
    ///
    /// With `persist_on_write`, a failed durable write is returned as
    /// `StoreError::NotDurable` carrying the outcome of the ingest, which has
    /// already happened in memory.
    pub fn ingest(&self, embedding: &Embedding, source_id: &str) -> Result<IngestOutcome> {
        let components = WaveCodec::encode(embedding);

        let mut writer = self.writer.lock();
        let now = writer.clock.tick();
        let incoming = WavePattern::from_components(components, source_id, now);
        incoming.validate()?;

        let current = self.snapshot();
        let threshold = self.config.absorption_threshold;
        let best = if incoming.is_dormant() {
            None
        } else {
            current.best_match(&incoming, threshold)
        };

        let mut next = current.next_generation();
        let outcome = match best {
            Some((slot, s)) if should_absorb(s, threshold) => {
                let existing = &current.patterns[slot];
                let fused = fuse(existing, &incoming, now)?;
                fused.validate()?;
                next.bands.replace(slot, existing, &fused);
                let outcome = IngestOutcome {
                    pattern_id: fused.id,
                    fused: true,
                    depth: fused.depth,
                    score: s,
                };
                next.patterns[slot] = Arc::new(fused);
                outcome
            }
            _ => {
                let outcome = IngestOutcome {
                    pattern_id: incoming.id,
                    fused: false,
                    depth: 0,
                    score: best.map_or(0.0, |(_, s)| s),
                };
                next.push(incoming);
                outcome
            }
        };
        tracing::debug!(
            "ingest from '{source_id}': {} {} (score {:.4}, depth {})",
            if outcome.fused { "fused into" } else { "new pattern" },
            outcome.pattern_id,
            outcome.score,
            outcome.depth
        );

        let installed = self.install(next);
        self.persist_applied(&installed, outcome.clone().into())?;
        Ok(outcome)
    }

    /// Replace the store contents with the valid `records`.
    ///
    /// Records that break an invariant (or repeat an earlier id) are
    /// rejected individually and reported; the rest are imported. With
    /// `persist_on_write`, a failed durable write is returned as
    /// `StoreError::NotDurable` carrying the report.
    pub fn import(&self, records: Vec<PatternRecord>) -> Result<ImportReport> {
        self.import_records(records, false)
    }

    /// Like [`import`](Self::import), but any rejected record fails the whole
    /// import with `StoreError::StoreCorruption` before the store is touched.
    pub fn import_strict(&self, records: Vec<PatternRecord>) -> Result<ImportReport> {
        self.import_records(records, true)
    }

    fn import_records(&self, records: Vec<PatternRecord>, strict: bool) -> Result<ImportReport> {
        let (patterns, rejected) = validate_records(records);
        for id in &rejected {
            tracing::warn!("import rejected pattern {id}");
        }
        if strict && !rejected.is_empty() {
            return Err(StoreError::StoreCorruption { rejected });
        }

        let mut writer = self.writer.lock();
        if let Some(newest) = patterns.iter().map(|p| p.updated_at).max() {
            writer.clock.observe(newest);
        }

        let report = ImportReport {
            imported: patterns.len(),
            rejected,
        };
        let version = self.snapshot().version + 1;
        let installed = self.install(Snapshot::from_patterns(version, patterns));
        tracing::info!(
            "imported {} patterns ({} rejected)",
            report.imported,
            report.rejected.len()
        );

        self.persist_applied(&installed, report.clone().into())?;
        Ok(report)
    }

    /// Import a snapshot file or a bare array of records.
    pub fn import_json(&self, json: &str) -> Result<ImportReport> {
        let records = parse_snapshot(json)
            .map_err(|e| StoreError::InvalidArgument(format!("invalid snapshot JSON: {e}")))?;
        self.import(records)
    }

    // --- Durability ---

    /// Honor `persist_on_write` after a mutation. Caller holds the writer lock.
    fn persist_applied(&self, installed: &Snapshot, applied: AppliedWrite) -> Result<()> {
        if !self.config.persist_on_write {
            return Ok(());
        }
        self.persist_snapshot(installed)
            .map_err(|e| StoreError::NotDurable {
                applied: Box::new(applied),
                source: Box::new(e),
            })
    }

    /// Write the current snapshot through the backend.
    pub fn persist(&self) -> Result<()> {
        let _writer = self.writer.lock();
        let current = self.snapshot();
        self.persist_snapshot(&current)
    }

    /// Caller holds the writer lock.
    fn persist_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        match self.backend.save(&snapshot.records()) {
            Ok(()) => {
                self.durable_version.store(snapshot.version, Ordering::Release);
                tracing::info!(
                    "persisted {} patterns to {}",
                    snapshot.patterns.len(),
                    self.backend.describe()
                );
                Ok(())
            }
            Err(e) => {
                tracing::warn!("failed to persist to {}: {e}", self.backend.describe());
                Err(match e {
                    StoreError::Persistence(msg) => StoreError::Persistence(msg),
                    other => StoreError::Persistence(other.to_string()),
                })
            }
        }
    }

    /// Whether the in-memory state has changes not yet durable.
    pub fn is_dirty(&self) -> bool {
        self.snapshot().version != self.durable_version.load(Ordering::Acquire)
    }

    // --- Reads ---

    /// Rank stored patterns by resonance with `embedding`.
    ///
    /// Results have `score >= min_score`, descending; equal scores order by
    /// `updated_at` descending, then id ascending. At most `top_k` hits.
    pub fn search(
        &self,
        embedding: &Embedding,
        top_k: usize,
        min_score: f64,
    ) -> Result<Vec<SearchHit>> {
        if top_k == 0 {
            return Err(StoreError::InvalidArgument(
                "top_k must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&min_score) {
            return Err(StoreError::InvalidArgument(format!(
                "min_score must be in [0, 1], got {min_score}"
            )));
        }

        let query =
            WavePattern::from_components(WaveCodec::encode(embedding), QUERY_SOURCE, 0);
        let current = self.snapshot();

        let mut scored: Vec<(f64, &WavePattern)> = current
            .bands
            .candidates(query.frequency, query.amplitude, min_score)
            .map(|slot| {
                let pattern = current.patterns[slot].as_ref();
                (score(pattern, &query), pattern)
            })
            .filter(|(s, _)| *s >= min_score)
            .collect();

        scored.sort_by(|(sa, a), (sb, b)| {
            sb.total_cmp(sa)
                .then_with(|| b.updated_at.cmp(&a.updated_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(score, p)| SearchHit {
                pattern_id: p.id,
                score,
                depth: p.depth,
                sources: p.sources.clone(),
            })
            .collect())
    }

    pub fn get(&self, id: Uuid) -> Option<WavePattern> {
        let current = self.snapshot();
        current
            .slots
            .get(&id)
            .map(|&slot| current.patterns[slot].as_ref().clone())
    }

    pub fn len(&self) -> usize {
        self.snapshot().patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> StoreStats {
        let current = self.snapshot();
        let patterns = &current.patterns;
        StoreStats {
            patterns: patterns.len(),
            active: current.bands.active(),
            dormant: patterns.iter().filter(|p| p.is_dormant()).count(),
            fused: patterns.iter().filter(|p| p.depth > 0).count(),
            max_depth: patterns.iter().map(|p| p.depth).max().unwrap_or(0),
            total_sources: patterns.iter().map(|p| p.sources.len()).sum(),
            frequency_bands: current.bands.band_count(),
            absorption_threshold: self.config.absorption_threshold,
            backend: self.backend.describe(),
            last_updated: patterns.iter().map(|p| p.updated_at).max(),
            version: current.version,
            dirty: current.version != self.durable_version.load(Ordering::Acquire),
        }
    }

    /// Every stored pattern as a wire record, in insertion order.
    pub fn export(&self) -> Vec<PatternRecord> {
        self.snapshot().records()
    }

    pub fn export_json(&self) -> Result<String> {
        export_json(self.export(), now_unix_millis())
            .map_err(|e| StoreError::Persistence(format!("JSON export failed: {e}")))
    }
}

/// Split records into valid patterns and the ids of rejected ones.
fn validate_records(records: Vec<PatternRecord>) -> (Vec<WavePattern>, Vec<String>) {
    let mut seen = HashSet::new();
    let mut patterns = Vec::with_capacity(records.len());
    let mut rejected = Vec::new();

    for record in records {
        let id = record.id.clone();
        match record.into_pattern() {
            Ok(pattern) if seen.insert(pattern.id) => patterns.push(pattern),
            Ok(_) => {
                tracing::debug!("duplicate pattern id {id}");
                rejected.push(id);
            }
            Err(e) => {
                tracing::debug!("invalid pattern {id}: {e}");
                rejected.push(id);
            }
        }
    }
    (patterns, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use qw_core::Quaternion;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    fn rng() -> SmallRng {
        SmallRng::seed_from_u64(42)
    }

    fn embedding(values: Vec<f64>) -> Embedding {
        Embedding::new(values).unwrap()
    }

    fn random_embedding(rng: &mut SmallRng, dim: usize) -> Embedding {
        embedding((0..dim).map(|_| rng.random_range(-1.0..1.0)).collect())
    }

    fn store_with_threshold(threshold: f64) -> PatternStore {
        let config = StoreConfig::default().with_threshold(threshold).unwrap();
        PatternStore::with_backend(config, Box::new(SqliteBackend::open_in_memory().unwrap()))
            .unwrap()
    }

    #[test]
    fn test_first_ingest_creates_pattern() {
        let store = PatternStore::open_in_memory().unwrap();
        let out = store
            .ingest(&random_embedding(&mut rng(), 64), "doc-1")
            .unwrap();
        assert!(!out.fused);
        assert_eq!(out.depth, 0);
        assert_eq!(out.score, 0.0);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(out.pattern_id).unwrap().sources, vec!["doc-1"]);
    }

    #[test]
    fn test_duplicate_ingest_fuses() {
        let store = PatternStore::open_in_memory().unwrap();
        let e = random_embedding(&mut rng(), 64);
        let first = store.ingest(&e, "doc-1").unwrap();
        let second = store.ingest(&e, "doc-2").unwrap();

        assert!(second.fused);
        assert_eq!(second.pattern_id, first.pattern_id);
        assert_eq!(second.depth, 1);
        assert!(second.score > 0.99);
        assert_eq!(store.len(), 1);

        let stored = store.get(first.pattern_id).unwrap();
        assert_eq!(stored.sources, vec!["doc-1", "doc-2"]);
        assert!(stored.updated_at > stored.created_at);
    }

    #[test]
    fn test_threshold_one_never_fuses_distinct_embeddings() {
        let store = store_with_threshold(1.0);
        let mut rng = rng();
        for i in 0..5 {
            let out = store
                .ingest(&random_embedding(&mut rng, 32), &format!("doc-{i}"))
                .unwrap();
            assert!(!out.fused);
        }
        assert_eq!(store.len(), 5);
    }

    #[test]
    fn test_zero_embedding_stored_dormant() {
        let store = PatternStore::open_in_memory().unwrap();
        let live = store.ingest(&embedding(vec![0.5; 16]), "tone").unwrap();
        let silent = store.ingest(&embedding(vec![0.0; 16]), "silence").unwrap();
        assert!(!silent.fused);
        assert_ne!(silent.pattern_id, live.pattern_id);

        let stats = store.stats();
        assert_eq!(stats.patterns, 2);
        assert_eq!(stats.dormant, 1);
        assert_eq!(stats.active, 1);

        // Dormant patterns never match a search.
        let hits = store.search(&embedding(vec![0.0; 16]), 10, 0.0).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].pattern_id, live.pattern_id);
    }

    #[test]
    fn test_search_rejects_bad_arguments() {
        let store = PatternStore::open_in_memory().unwrap();
        let e = embedding(vec![1.0, 2.0]);
        assert!(matches!(
            store.search(&e, 0, 0.5),
            Err(StoreError::InvalidArgument(_))
        ));
        assert!(store.search(&e, 1, 1.5).is_err());
        assert!(store.search(&e, 1, -0.1).is_err());
        assert!(store.search(&e, 1, f64::NAN).is_err());
        assert!(store.search(&e, 1, 1.0).unwrap().is_empty());
    }

    #[test]
    fn test_search_on_empty_store() {
        let store = PatternStore::open_in_memory().unwrap();
        assert!(store.search(&embedding(vec![1.0; 8]), 5, 0.0).unwrap().is_empty());
    }

    #[test]
    fn test_import_replaces_contents_and_reports_rejects() {
        let store = PatternStore::open_in_memory().unwrap();
        store.ingest(&embedding(vec![0.3; 8]), "old").unwrap();

        let source = store_with_threshold(1.0);
        let mut rng = rng();
        for i in 0..3 {
            source
                .ingest(&random_embedding(&mut rng, 16), &format!("doc-{i}"))
                .unwrap();
        }
        let mut records = source.export();
        records[1].w = 2.0;
        let bad_id = records[1].id.clone();
        let first_id = records[0].id.clone();
        records.push(records[0].clone());

        let report = store.import(records).unwrap();
        assert_eq!(report.imported, 2);
        assert_eq!(report.rejected, vec![bad_id, first_id]);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_strict_import_leaves_store_untouched() {
        let store = PatternStore::open_in_memory().unwrap();
        let kept = store.ingest(&embedding(vec![0.3; 8]), "old").unwrap();
        let version = store.stats().version;

        let source = store_with_threshold(1.0);
        let mut rng = rng();
        for i in 0..3 {
            source
                .ingest(&random_embedding(&mut rng, 16), &format!("doc-{i}"))
                .unwrap();
        }
        let mut records = source.export();
        records[2].frequency = -1.0;
        let bad_id = records[2].id.clone();

        match store.import_strict(records.clone()) {
            Err(StoreError::StoreCorruption { rejected }) => assert_eq!(rejected, vec![bad_id]),
            other => panic!("expected StoreCorruption, got {other:?}"),
        }
        assert_eq!(store.len(), 1);
        assert!(store.get(kept.pattern_id).is_some());
        assert_eq!(store.stats().version, version);

        records.pop();
        assert_eq!(store.import_strict(records).unwrap().imported, 2);
        assert!(store.get(kept.pattern_id).is_none());
    }

    #[test]
    fn test_huge_embedding_is_stored_finite() {
        let store = PatternStore::open_in_memory().unwrap();
        let out = store.ingest(&embedding(vec![1e200, 1.0]), "big").unwrap();
        let stored = store.get(out.pattern_id).unwrap();
        assert!(stored.amplitude.is_finite());
        stored.validate().unwrap();

        let json = store.export_json().unwrap();
        let other = PatternStore::open_in_memory().unwrap();
        assert_eq!(other.import_json(&json).unwrap().imported, 1);
    }

    #[test]
    fn test_import_json_rejects_garbage() {
        let store = PatternStore::open_in_memory().unwrap();
        assert!(matches!(
            store.import_json("{ nope"),
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_dirty_tracking() {
        let store = PatternStore::open_in_memory().unwrap();
        assert!(!store.is_dirty());
        store.ingest(&embedding(vec![1.0, -1.0, 0.5]), "a").unwrap();
        assert!(store.is_dirty());
        store.persist().unwrap();
        assert!(!store.is_dirty());
        assert!(!store.stats().dirty);
    }

    #[test]
    fn test_persist_on_write() {
        let mut config = StoreConfig::default();
        config.persist_on_write = true;
        let store = PatternStore::with_backend(
            config,
            Box::new(SqliteBackend::open_in_memory().unwrap()),
        )
        .unwrap();
        store.ingest(&embedding(vec![1.0, 2.0, 3.0]), "a").unwrap();
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_fusion_keeps_orientation_unit() {
        let store = PatternStore::open_in_memory().unwrap();
        let mut rng = rng();
        let base: Vec<f64> = (0..64).map(|_| rng.random_range(-1.0..1.0)).collect();
        for i in 0..50 {
            let mut v = base.clone();
            v[i % 64] += 0.001;
            store.ingest(&embedding(v), &format!("doc-{i}")).unwrap();
        }
        for rec in store.export() {
            let q = Quaternion::from_raw(rec.w, rec.x, rec.y, rec.z);
            assert!(q.is_unit(1e-9));
        }
    }

    #[test]
    fn test_export_json_is_importable() {
        let store = PatternStore::open_in_memory().unwrap();
        store.ingest(&embedding(vec![0.1, 0.9, -0.3]), "a").unwrap();
        let json = store.export_json().unwrap();

        let other = PatternStore::open_in_memory().unwrap();
        let report = other.import_json(&json).unwrap();
        assert_eq!(report.imported, 1);
        assert_eq!(other.export(), store.export());
    }

    #[test]
    fn test_clock_moves_past_imported_timestamps() {
        let source = PatternStore::open_in_memory().unwrap();
        source.ingest(&embedding(vec![1.0, 0.5, 0.25]), "a").unwrap();
        let mut records = source.export();
        let future = now_unix_millis() + 10_000_000;
        records[0].created_at = future;
        records[0].updated_at = future;

        let store = PatternStore::open_in_memory().unwrap();
        store.import(records).unwrap();
        let out = store.ingest(&embedding(vec![9.0, -3.0, 0.0, 1.0]), "b").unwrap();
        assert!(store.get(out.pattern_id).unwrap().updated_at > future);
    }
}
