//! The store facade
//!
//! [`Store`] wires the layers together and exposes the stable
//! programmatic contract: open/close, insert/delete, query,
//! materialize, snapshots, statistics, backup/restore. The statistics
//! server, cache sweeper and snapshot sweeper start with the store and
//! stop with it.

use crate::backup::{self, Manifest};
use rustc_hash::FxHashSet;
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use triad_core::{Error, Limits, Result, Term, TermId, Triple};
use triad_query::{
    cache_key, execute, is_cacheable, CacheConfig, CacheStats, CachedValue, CostModel,
    CostWeights, ExecParams, Pattern, Planner, QueryForm, QueryGuard, ResultCache, TermOrVar,
    VarTable,
};
use triad_reason::{MaterializeOutcome, RuleProfile};
use triad_stats::{StatsConfig, StatsServer, Statistics};
use triad_storage::{
    Backend, Cf, Dictionary, SnapshotHandle, SnapshotRegistry, TripleIndexes, WriteOpts,
};

/// Default bound on materialisation rounds.
pub const DEFAULT_MATERIALIZE_ROUNDS: u32 = 100;

/// Options controlling `Store::open`.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Create the database when missing (default: true)
    pub create_if_missing: bool,
    /// Dictionary shard count; 0 uses the hardware thread count
    pub shard_count: usize,
    /// Predicates (IRIs) registered for the numeric-range index
    pub range_predicates: Vec<Term>,
    /// Resource bounds
    pub limits: Limits,
    /// Root directory all paths (store, backup, cache persistence)
    /// must stay inside; unset disables the containment check
    pub root_dir: Option<PathBuf>,
    /// Enable the query result cache (default: true)
    pub enable_cache: bool,
    /// Result-cache entry capacity
    pub cache_capacity: usize,
    /// Result-cache memory budget
    pub cache_max_memory: Option<usize>,
    /// Optional result-cache persistence file (requires `root_dir`)
    pub cache_persist_path: Option<PathBuf>,
    /// Snapshot sweeper interval
    pub snapshot_sweep_interval: Duration,
    /// Minimum patterns sharing a join variable before the leapfrog
    /// strategy is considered
    pub leapfrog_min_patterns: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        StoreOptions {
            create_if_missing: true,
            shard_count: 0,
            range_predicates: Vec::new(),
            limits: Limits::default(),
            root_dir: None,
            enable_cache: true,
            cache_capacity: 1_000,
            cache_max_memory: None,
            cache_persist_path: None,
            snapshot_sweep_interval: Duration::from_secs(60),
            leapfrog_min_patterns: 2,
        }
    }
}

impl StoreOptions {
    fn validate(&self) -> Result<()> {
        self.limits.validate()?;
        if self.shard_count > 1024 {
            return Err(Error::invalid_input("shard_count must be at most 1024"));
        }
        if self.cache_capacity == 0 {
            return Err(Error::invalid_input("cache_capacity must be positive"));
        }
        if self.leapfrog_min_patterns == 0 {
            return Err(Error::invalid_input(
                "leapfrog_min_patterns must be positive",
            ));
        }
        Ok(())
    }
}

/// Per-query options.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Wall-clock budget; defaults to the store's `default_deadline_ms`
    pub deadline: Option<Duration>,
    /// Consult and populate the result cache (default: false here —
    /// use [`QueryOptions::cached`] for the caching preset)
    pub use_cache: bool,
    /// Leapfrog iteration budget; defaults to the store limit
    pub max_iterations: Option<u64>,
    /// Cost-model weight override for plan experiments
    pub weights: Option<CostWeights>,
}

impl QueryOptions {
    /// The caching preset.
    pub fn cached() -> QueryOptions {
        QueryOptions {
            use_cache: true,
            ..QueryOptions::default()
        }
    }
}

/// Aggregate counts surfaced by [`Store::stats`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoreStats {
    /// Total triples
    pub triple_count: u64,
    /// Distinct subjects
    pub distinct_subjects: u64,
    /// Distinct predicates
    pub distinct_predicates: u64,
    /// Distinct objects
    pub distinct_objects: u64,
    /// Result cache counters, when the cache is enabled
    pub cache: Option<CacheStats>,
}

struct Inner {
    backend: Arc<Backend>,
    dict: Dictionary,
    indexes: TripleIndexes,
    stats: StatsServer,
    cache: Option<ResultCache>,
    snapshots: SnapshotRegistry,
    limits: Limits,
    root_dir: Option<PathBuf>,
    path: PathBuf,
    leapfrog_min_patterns: usize,
    closed: AtomicBool,
}

/// An open triple store.
pub struct Store {
    inner: Arc<Inner>,
}

impl Store {
    /// Open (or create) a store at `path`.
    pub fn open(path: &Path, options: StoreOptions) -> Result<Store> {
        options.validate()?;
        validate_path(path, options.root_dir.as_deref())?;
        if !options.create_if_missing && !path.exists() {
            return Err(Error::not_found(format!("database {}", path.display())));
        }

        let backend = Arc::new(Backend::open(path, options.create_if_missing)?);
        let dict = Dictionary::open(
            Arc::clone(&backend),
            options.shard_count,
            options.limits.id_block_size,
            options.limits.id_safety_margin,
        )?;
        let indexes = TripleIndexes::open(Arc::clone(&backend))?;
        for term in &options.range_predicates {
            let id = dict.encode(term)?;
            indexes.register_range_predicate(id)?;
        }

        let stats = StatsServer::start(
            Arc::clone(&backend),
            StatsConfig {
                modification_threshold: options.limits.stats_modification_threshold,
                tick_interval: Duration::from_secs(options.limits.stats_tick_secs),
                bucket_count: options.limits.histogram_buckets,
            },
        )?;

        let cache = if options.enable_cache {
            Some(ResultCache::start(CacheConfig {
                capacity: options.cache_capacity,
                max_memory_bytes: options.cache_max_memory,
                ttl: Duration::from_secs(options.limits.cache_ttl_secs),
                max_result_size: options.limits.max_result_size,
                sweep_interval: Duration::from_secs(60),
                persist_path: options.cache_persist_path.clone(),
                persist_root: options.root_dir.clone(),
            })?)
        } else {
            None
        };

        let snapshots = SnapshotRegistry::start(
            Arc::clone(&backend),
            Duration::from_secs(options.limits.snapshot_ttl_secs),
            options.snapshot_sweep_interval,
        );

        info!(path = %path.display(), "store opened");
        Ok(Store {
            inner: Arc::new(Inner {
                backend,
                dict,
                indexes,
                stats,
                cache,
                snapshots,
                limits: options.limits,
                root_dir: options.root_dir,
                path: path.to_path_buf(),
                leapfrog_min_patterns: options.leapfrog_min_patterns,
                closed: AtomicBool::new(false),
            }),
        })
    }

    fn inner(&self) -> Result<&Inner> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(&self.inner)
    }

    /// The store's directory.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// True once `close` has run.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Stop background workers, persist statistics and cache state, and
    /// mark the store closed. Fails with `closed` when already closed.
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::Closed);
        }
        self.inner.stats.terminate();
        if let Some(cache) = &self.inner.cache {
            cache.shutdown();
        }
        self.inner.snapshots.shutdown();
        self.inner.backend.flush()?;
        info!(path = %self.inner.path.display(), "store closed");
        Ok(())
    }

    /// Register one more predicate for range indexing, backfilling
    /// existing triples.
    pub fn register_range_predicate(&self, predicate: &Term) -> Result<()> {
        let inner = self.inner()?;
        let id = inner.dict.encode(predicate)?;
        inner.indexes.register_range_predicate(id)
    }

    /// Insert raw term triples. Returns the number actually added.
    pub fn insert(&self, triples: &[(Term, Term, Term)]) -> Result<usize> {
        self.insert_opts(triples, WriteOpts::default())
    }

    /// Insert with explicit write options. Bulk mode commits unsynced
    /// batches and issues a single WAL sync at the end.
    pub fn insert_opts(&self, triples: &[(Term, Term, Term)], opts: WriteOpts) -> Result<usize> {
        let inner = self.inner()?;
        if triples.is_empty() {
            return Ok(0);
        }
        let mut flat = Vec::with_capacity(triples.len() * 3);
        for (s, p, o) in triples {
            flat.push(s.clone());
            flat.push(p.clone());
            flat.push(o.clone());
        }
        let ids = inner.dict.encode_many(&flat)?;
        let encoded: Vec<Triple> = ids
            .chunks_exact(3)
            .map(|c| Triple::new(c[0], c[1], c[2]))
            .collect();
        let count = inner.indexes.insert_batch(&encoded, &opts)?;
        if opts.bulk {
            inner.backend.sync_wal()?;
            if let Some(cache) = &inner.cache {
                cache.invalidate_all();
            }
        } else if let Some(cache) = &inner.cache {
            let predicates: Vec<TermId> = encoded
                .iter()
                .map(|t| t.p)
                .collect::<FxHashSet<_>>()
                .into_iter()
                .collect();
            cache.invalidate_by_predicates(&predicates);
        }
        inner.stats.notify_modifications(count as u64);
        debug!(inserted = count, "insert batch");
        Ok(count)
    }

    /// Load triples from a parser seam. Blank node labels are scoped to
    /// this load: the same label always maps to the same node within
    /// the call and never collides with blank nodes from other loads.
    pub fn load(
        &self,
        triples: impl IntoIterator<Item = (Term, Term, Term)>,
        opts: WriteOpts,
    ) -> Result<usize> {
        let scope = uuid::Uuid::new_v4().simple().to_string();
        let mut renamed: rustc_hash::FxHashMap<String, String> = rustc_hash::FxHashMap::default();
        let mut scope_blank = |term: Term| -> Term {
            match term {
                Term::Blank(label) => {
                    let fresh = renamed
                        .entry(label.clone())
                        .or_insert_with(|| format!("{scope}-{label}"))
                        .clone();
                    Term::Blank(fresh)
                }
                other => other,
            }
        };
        let scoped: Vec<(Term, Term, Term)> = triples
            .into_iter()
            .map(|(s, p, o)| (scope_blank(s), scope_blank(p), scope_blank(o)))
            .collect();
        self.insert_opts(&scoped, opts)
    }

    /// Delete raw term triples. Returns the number that existed.
    pub fn delete(&self, triples: &[(Term, Term, Term)]) -> Result<usize> {
        let inner = self.inner()?;
        let mut encoded = Vec::with_capacity(triples.len());
        for (s, p, o) in triples {
            // Unknown terms cannot appear in any stored triple.
            let (Some(s), Some(p), Some(o)) = (
                inner.dict.get_if_present(s)?,
                inner.dict.get_if_present(p)?,
                inner.dict.get_if_present(o)?,
            ) else {
                continue;
            };
            encoded.push(Triple::new(s, p, o));
        }
        let count = inner.indexes.delete_batch(&encoded, &WriteOpts::default())?;
        if let Some(cache) = &inner.cache {
            let predicates: Vec<TermId> = encoded
                .iter()
                .map(|t| t.p)
                .collect::<FxHashSet<_>>()
                .into_iter()
                .collect();
            cache.invalidate_by_predicates(&predicates);
        }
        inner.stats.notify_modifications(count as u64);
        Ok(count)
    }

    /// Run a query against a consistent snapshot of the store.
    pub fn query(&self, form: &QueryForm, opts: &QueryOptions) -> Result<QueryResults> {
        let inner = self.inner()?;
        let cacheable = opts.use_cache && inner.cache.is_some() && is_cacheable(form);
        let key = cacheable.then(|| cache_key(form));

        if let (Some(key), Some(cache)) = (&key, &inner.cache) {
            if let Some(value) = cache.get(key) {
                debug!(%key, "query served from cache");
                return Ok(QueryResults {
                    inner: Arc::clone(&self.inner),
                    value,
                });
            }
        }

        let vars = Rc::new(VarTable::from_names(form.algebra().variables()));
        let deadline = Instant::now()
            + opts
                .deadline
                .unwrap_or(Duration::from_millis(inner.limits.default_deadline_ms));
        let guard = Rc::new(QueryGuard::new(
            deadline,
            opts.max_iterations.unwrap_or(inner.limits.max_iterations),
        ));

        let model = match opts.weights {
            Some(w) => CostModel::with_weights(inner.stats.snapshot(), w),
            None => CostModel::new(inner.stats.snapshot()),
        };
        let planner = Planner::new(model, &inner.dict, &inner.indexes)
            .with_max_variables(inner.limits.max_query_variables)
            .with_leapfrog_min_patterns(inner.leapfrog_min_patterns);
        let plan = planner.plan(form.algebra(), &vars)?;

        // The whole query reads from one snapshot taken here. The exec
        // params (and their iterators) must not outlive it, hence the
        // block.
        let snapshot = inner.snapshots.create(None)?;
        let value = {
            let view = snapshot.view()?;
            let params = ExecParams {
                view,
                dict: &inner.dict,
                indexes: &inner.indexes,
                guard,
                vars: Rc::clone(&vars),
            };
            self.run_form(inner, form, &params, &plan, &vars)?
        };
        drop(snapshot);
        if let (Some(key), Some(cache)) = (key, &inner.cache) {
            if let Some(predicates) = self.cache_predicates(inner, form)? {
                cache.insert(key, value.clone(), predicates);
            }
        }
        Ok(QueryResults {
            inner: Arc::clone(&self.inner),
            value,
        })
    }

    fn run_form(
        &self,
        inner: &Inner,
        form: &QueryForm,
        params: &ExecParams<'_>,
        plan: &triad_query::Planned,
        vars: &VarTable,
    ) -> Result<CachedValue> {
        Ok(match form {
            QueryForm::Select(_) => {
                let mut rows = Vec::new();
                for row in execute(params, plan)? {
                    rows.push(row?.into_vec());
                }
                CachedValue::Solutions {
                    vars: vars.names().to_vec(),
                    rows,
                }
            }
            QueryForm::Ask(_) => {
                let mut stream = execute(params, plan)?;
                CachedValue::Boolean(stream.next().transpose()?.is_some())
            }
            QueryForm::Construct { template, .. } => {
                let mut triples = Vec::new();
                let mut seen = FxHashSet::default();
                for row in execute(params, plan)? {
                    let row = row?;
                    for pattern in template {
                        if let Some(triple) =
                            self.instantiate_template(inner, pattern, vars, &row)?
                        {
                            if seen.insert(triple) {
                                triples.push(triple);
                            }
                        }
                    }
                }
                CachedValue::Graph(triples)
            }
        })
    }

    fn instantiate_template(
        &self,
        inner: &Inner,
        pattern: &Pattern,
        vars: &VarTable,
        row: &triad_query::Row,
    ) -> Result<Option<Triple>> {
        let mut ids = [TermId::default(); 3];
        for (i, slot) in [&pattern.s, &pattern.p, &pattern.o].into_iter().enumerate() {
            let id = match slot {
                TermOrVar::Term(term) => Some(inner.dict.encode(term)?),
                TermOrVar::Var(name) => vars
                    .index_of(name)
                    .and_then(|ix| row.get(ix).copied().flatten()),
            };
            match id {
                Some(id) => ids[i] = id,
                // Rows with unbound template variables produce nothing.
                None => return Ok(None),
            }
        }
        Ok(Some(Triple::new(ids[0], ids[1], ids[2])))
    }

    /// Predicate ids the cache entry should register. `None` when any
    /// constant predicate is unknown — those results must not be cached
    /// because a later insert would mint an id the entry never
    /// registered for invalidation.
    fn cache_predicates(&self, inner: &Inner, form: &QueryForm) -> Result<Option<Vec<TermId>>> {
        let mut ids = Vec::new();
        for term in form.algebra().constant_predicates() {
            match inner.dict.get_if_present(term)? {
                Some(id) => ids.push(id),
                None => return Ok(None),
            }
        }
        Ok(Some(ids))
    }

    /// Render the chosen plan for a query: strategy, operator tree and
    /// per-node cardinality estimates.
    pub fn explain_plan(&self, form: &QueryForm) -> Result<String> {
        let inner = self.inner()?;
        let vars = VarTable::from_names(form.algebra().variables());
        let planner = Planner::new(
            CostModel::new(inner.stats.snapshot()),
            &inner.dict,
            &inner.indexes,
        )
        .with_max_variables(inner.limits.max_query_variables);
        let plan = planner.plan(form.algebra(), &vars)?;
        Ok(plan.explain(&vars))
    }

    /// Render the cost breakdown of a query under optional weights.
    pub fn explain_cost(&self, form: &QueryForm, weights: Option<CostWeights>) -> Result<String> {
        let inner = self.inner()?;
        let vars = VarTable::from_names(form.algebra().variables());
        let model = match weights {
            Some(w) => CostModel::with_weights(inner.stats.snapshot(), w),
            None => CostModel::new(inner.stats.snapshot()),
        };
        let planner = Planner::new(model.clone(), &inner.dict, &inner.indexes)
            .with_max_variables(inner.limits.max_query_variables);
        let plan = planner.plan(form.algebra(), &vars)?;
        let mut out = String::new();
        collect_bgp_nodes(&plan, &mut |node| {
            out.push_str(&model.explain_cost(node, &vars));
        });
        Ok(out)
    }

    /// Materialise the rule profile to fixpoint through the normal
    /// insert path.
    pub fn materialize(&self, profile: RuleProfile) -> Result<MaterializeOutcome> {
        self.materialize_rounds(profile, DEFAULT_MATERIALIZE_ROUNDS)
    }

    /// Materialise with an explicit round bound.
    pub fn materialize_rounds(
        &self,
        profile: RuleProfile,
        max_rounds: u32,
    ) -> Result<MaterializeOutcome> {
        let inner = self.inner()?;
        let outcome = triad_reason::materialize(
            &inner.dict,
            &inner.indexes,
            profile,
            max_rounds,
            &WriteOpts::default(),
        )?;
        if outcome.derived > 0 {
            if let Some(cache) = &inner.cache {
                cache.invalidate_all();
            }
            inner.stats.notify_modifications(outcome.derived as u64);
        }
        Ok(outcome)
    }

    /// Take a TTL-tracked snapshot.
    pub fn snapshot(&self, ttl: Option<Duration>) -> Result<SnapshotHandle> {
        self.inner()?.snapshots.create(ttl)
    }

    /// Scoped snapshot: released on every exit path.
    pub fn with_snapshot<T>(
        &self,
        ttl: Option<Duration>,
        f: impl FnOnce(&SnapshotHandle) -> Result<T>,
    ) -> Result<T> {
        self.inner()?.snapshots.with_snapshot(ttl, f)
    }

    /// Snapshots currently registered.
    pub fn active_snapshots(&self) -> usize {
        self.inner.snapshots.active_count()
    }

    /// The cached statistics counts.
    pub fn stats(&self) -> Result<StoreStats> {
        let inner = self.inner()?;
        Ok(to_store_stats(
            &inner.stats.snapshot(),
            inner.cache.as_ref().map(|c| c.stats()),
        ))
    }

    /// Rebuild statistics synchronously under a timeout (default 60 s).
    pub fn refresh_stats(&self, timeout: Option<Duration>) -> Result<StoreStats> {
        let inner = self.inner()?;
        let timeout =
            timeout.unwrap_or(Duration::from_millis(inner.limits.stats_timeout_ms));
        let snapshot = inner.stats.refresh(timeout)?;
        Ok(to_store_stats(
            &snapshot,
            inner.cache.as_ref().map(|c| c.stats()),
        ))
    }

    /// Write a backup: a consistent checkpoint plus a verified manifest.
    pub fn backup(&self, dir: &Path) -> Result<()> {
        let inner = self.inner()?;
        validate_path(dir, inner.root_dir.as_deref())?;
        if dir.exists() {
            return Err(Error::invalid_input(format!(
                "backup target {} already exists",
                dir.display()
            )));
        }
        std::fs::create_dir_all(dir)?;
        inner.backend.flush()?;
        inner.backend.checkpoint(&dir.join(backup::DATA_DIR))?;
        let manifest = Manifest::new(count_triples(inner)?);
        manifest.write(dir)?;
        info!(dir = %dir.display(), triples = manifest.triple_count, "backup written");
        Ok(())
    }

    /// Restore a backup into `dest` and open it. The restored data is
    /// verified against the manifest triple count.
    pub fn restore(backup_dir: &Path, dest: &Path, options: StoreOptions) -> Result<Store> {
        validate_path(backup_dir, options.root_dir.as_deref())?;
        validate_path(dest, options.root_dir.as_deref())?;
        let manifest = Manifest::read(backup_dir, options.root_dir.as_deref())?;
        if dest.exists() {
            return Err(Error::invalid_input(format!(
                "restore target {} already exists",
                dest.display()
            )));
        }
        backup::copy_dir(&backup_dir.join(backup::DATA_DIR), dest)?;
        let store = Store::open(dest, options)?;
        let actual = count_triples(&store.inner)?;
        if actual != manifest.triple_count {
            let _ = store.close();
            return Err(Error::verification_failed(format!(
                "restored store has {actual} triples, manifest says {}",
                manifest.triple_count
            )));
        }
        Ok(store)
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if !self.is_closed() {
            let _ = self.close();
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.inner.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Results of one query: bindings, a boolean, or a graph.
pub struct QueryResults {
    inner: Arc<Inner>,
    value: CachedValue,
}

impl QueryResults {
    /// Number of rows (or graph triples; 1 for booleans).
    pub fn len(&self) -> usize {
        self.value.row_count()
    }

    /// True when no results exist.
    pub fn is_empty(&self) -> bool {
        match &self.value {
            CachedValue::Boolean(_) => false,
            other => other.row_count() == 0,
        }
    }

    /// The boolean result of an ASK query.
    pub fn as_bool(&self) -> Option<bool> {
        match &self.value {
            CachedValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Variable names of a SELECT result.
    pub fn var_names(&self) -> &[String] {
        match &self.value {
            CachedValue::Solutions { vars, .. } => vars,
            _ => &[],
        }
    }

    /// Raw encoded rows of a SELECT result.
    pub fn rows(&self) -> &[Vec<Option<TermId>>] {
        match &self.value {
            CachedValue::Solutions { rows, .. } => rows,
            _ => &[],
        }
    }

    /// Decode one binding by row index and variable name.
    pub fn binding(&self, row: usize, var: &str) -> Result<Option<Term>> {
        let CachedValue::Solutions { vars, rows } = &self.value else {
            return Ok(None);
        };
        let Some(col) = vars.iter().position(|v| v == var) else {
            return Ok(None);
        };
        match rows.get(row).and_then(|r| r.get(col)).copied().flatten() {
            Some(id) => Ok(Some(self.inner.dict.decode(id)?)),
            None => Ok(None),
        }
    }

    /// Decode every row into terms, in result order.
    pub fn decoded_rows(&self) -> Result<Vec<Vec<Option<Term>>>> {
        let CachedValue::Solutions { rows, .. } = &self.value else {
            return Ok(Vec::new());
        };
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut decoded = Vec::with_capacity(row.len());
            for id in row {
                decoded.push(match id {
                    Some(id) => Some(self.inner.dict.decode(*id)?),
                    None => None,
                });
            }
            out.push(decoded);
        }
        Ok(out)
    }

    /// Decode a CONSTRUCT graph into term triples.
    pub fn graph(&self) -> Result<Vec<(Term, Term, Term)>> {
        let CachedValue::Graph(triples) = &self.value else {
            return Ok(Vec::new());
        };
        let mut out = Vec::with_capacity(triples.len());
        for t in triples {
            out.push((
                self.inner.dict.decode(t.s)?,
                self.inner.dict.decode(t.p)?,
                self.inner.dict.decode(t.o)?,
            ));
        }
        Ok(out)
    }
}

impl std::fmt::Debug for QueryResults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryResults")
            .field("rows", &self.len())
            .finish()
    }
}

fn to_store_stats(stats: &Statistics, cache: Option<CacheStats>) -> StoreStats {
    StoreStats {
        triple_count: stats.triple_count,
        distinct_subjects: stats.distinct_subjects,
        distinct_predicates: stats.distinct_predicates,
        distinct_objects: stats.distinct_objects,
        cache,
    }
}

fn collect_bgp_nodes(plan: &triad_query::Planned, f: &mut impl FnMut(&triad_query::PlanNode)) {
    use triad_query::Planned;
    match plan {
        Planned::Bgp(node) => f(node),
        Planned::Join(a, b) | Planned::Union(a, b) | Planned::Minus(a, b) => {
            collect_bgp_nodes(a, f);
            collect_bgp_nodes(b, f);
        }
        Planned::LeftJoin { left, right, .. } => {
            collect_bgp_nodes(left, f);
            collect_bgp_nodes(right, f);
        }
        Planned::Filter { input, .. }
        | Planned::Extend { input, .. }
        | Planned::Project { input, .. }
        | Planned::Distinct(input)
        | Planned::OrderBy { input, .. }
        | Planned::Slice { input, .. }
        | Planned::Group { input, .. } => collect_bgp_nodes(input, f),
    }
}

/// Count triples by scanning SPO. Authoritative, unlike the cached
/// statistics.
fn count_triples(inner: &Inner) -> Result<u64> {
    let mut iter = inner.backend.prefix_iter(Cf::Spo, &[])?;
    let mut count = 0u64;
    while iter.key().is_some() {
        count += 1;
        iter.next()?;
    }
    Ok(count)
}

/// Reject paths with `..` components or escaping the configured root.
pub fn validate_path(path: &Path, root: Option<&Path>) -> Result<()> {
    if path
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(Error::traversal(path.display().to_string()));
    }
    if let Some(root) = root {
        if !path.starts_with(root) {
            return Err(Error::traversal(path.display().to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use triad_query::algebra::build::*;
    use triad_query::Algebra;

    fn iri(name: &str) -> Term {
        Term::iri(format!("http://example.org/{name}"))
    }

    fn open_store(dir: &TempDir) -> Store {
        Store::open(&dir.path().join("db"), StoreOptions::default()).unwrap()
    }

    fn select(patterns: Vec<Pattern>) -> QueryForm {
        QueryForm::Select(Algebra::Bgp(patterns))
    }

    #[test]
    fn test_open_insert_query_close() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let n = store
            .insert(&[
                (iri("a"), iri("knows"), iri("b")),
                (iri("b"), iri("knows"), iri("c")),
            ])
            .unwrap();
        assert_eq!(n, 2);

        let q = select(vec![pat(v("x"), t(iri("knows")), v("y"))]);
        let results = store.query(&q, &QueryOptions::default()).unwrap();
        assert_eq!(results.len(), 2);

        store.close().unwrap();
        assert!(matches!(store.close(), Err(Error::Closed)));
        assert!(matches!(
            store.insert(&[(iri("a"), iri("p"), iri("b"))]),
            Err(Error::Closed)
        ));
    }

    #[test]
    fn test_insert_is_idempotent_on_count() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let triple = (iri("a"), iri("p"), iri("b"));
        assert_eq!(store.insert(&[triple.clone()]).unwrap(), 1);
        assert_eq!(store.insert(&[triple]).unwrap(), 0);
    }

    #[test]
    fn test_delete_removes_results() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let triple = (iri("a"), iri("p"), iri("b"));
        store.insert(&[triple.clone()]).unwrap();
        assert_eq!(store.delete(&[triple.clone()]).unwrap(), 1);
        assert_eq!(store.delete(&[triple]).unwrap(), 0);

        let q = select(vec![pat(v("x"), t(iri("p")), v("y"))]);
        assert!(store.query(&q, &QueryOptions::default()).unwrap().is_empty());
    }

    #[test]
    fn test_load_scopes_blank_nodes() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let doc = |label: &str| {
            vec![
                (Term::blank(label), iri("p"), iri("target")),
                (Term::blank(label), iri("q"), iri("other")),
            ]
        };
        // Two loads using the same blank label must not merge
        store.load(doc("b0"), WriteOpts::default()).unwrap();
        store.load(doc("b0"), WriteOpts::default()).unwrap();

        let q = select(vec![pat(v("x"), t(iri("p")), t(iri("target")))]);
        let results = store.query(&q, &QueryOptions::default()).unwrap();
        assert_eq!(results.len(), 2, "blank nodes must stay load-scoped");

        // Within one load, the label is one node
        let joined = select(vec![
            pat(v("x"), t(iri("p")), t(iri("target"))),
            pat(v("x"), t(iri("q")), t(iri("other"))),
        ]);
        let results = store.query(&joined, &QueryOptions::default()).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_delete_of_unknown_terms_is_zero() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        assert_eq!(
            store
                .delete(&[(iri("never"), iri("seen"), iri("terms"))])
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_query_cache_transparent() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store
            .insert(&[(iri("a"), iri("p"), iri("b")), (iri("c"), iri("p"), iri("d"))])
            .unwrap();
        let q = select(vec![pat(v("x"), t(iri("p")), v("y"))]);

        let uncached = store.query(&q, &QueryOptions::default()).unwrap();
        let first = store.query(&q, &QueryOptions::cached()).unwrap();
        let second = store.query(&q, &QueryOptions::cached()).unwrap();

        let to_set = |r: &QueryResults| -> FxHashSet<Vec<Option<TermId>>> {
            r.rows().iter().cloned().collect()
        };
        assert_eq!(to_set(&uncached), to_set(&first));
        assert_eq!(to_set(&first), to_set(&second));
        let stats = store.stats().unwrap();
        assert!(stats.cache.unwrap().hits >= 1);
    }

    #[test]
    fn test_ask_and_construct_forms() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store.insert(&[(iri("a"), iri("p"), iri("b"))]).unwrap();

        let ask_hit = QueryForm::Ask(Algebra::Bgp(vec![pat(v("x"), t(iri("p")), v("y"))]));
        assert_eq!(
            store.query(&ask_hit, &QueryOptions::default()).unwrap().as_bool(),
            Some(true)
        );
        let ask_miss = QueryForm::Ask(Algebra::Bgp(vec![pat(v("x"), t(iri("q")), v("y"))]));
        assert_eq!(
            store.query(&ask_miss, &QueryOptions::default()).unwrap().as_bool(),
            Some(false)
        );

        let construct = QueryForm::Construct {
            template: vec![pat(v("y"), t(iri("knownBy")), v("x"))],
            algebra: Algebra::Bgp(vec![pat(v("x"), t(iri("p")), v("y"))]),
        };
        let graph = store
            .query(&construct, &QueryOptions::default())
            .unwrap()
            .graph()
            .unwrap();
        assert_eq!(graph, vec![(iri("b"), iri("knownBy"), iri("a"))]);
    }

    #[test]
    fn test_binding_decode() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store
            .insert(&[(iri("a"), iri("age"), Term::integer(30))])
            .unwrap();
        let q = select(vec![pat(v("x"), t(iri("age")), v("n"))]);
        let results = store.query(&q, &QueryOptions::default()).unwrap();
        assert_eq!(results.binding(0, "x").unwrap(), Some(iri("a")));
        assert_eq!(results.binding(0, "n").unwrap(), Some(Term::integer(30)));
        assert_eq!(results.binding(0, "missing").unwrap(), None);
    }

    #[test]
    fn test_path_traversal_rejected() {
        let err = Store::open(
            Path::new("/tmp/triad/../escape"),
            StoreOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "traversal");

        let dir = TempDir::new().unwrap();
        let err = Store::open(
            &dir.path().join("db"),
            StoreOptions {
                root_dir: Some(PathBuf::from("/somewhere/else")),
                ..StoreOptions::default()
            },
        )
        .unwrap_err();
        assert_eq!(err.code(), "traversal");
    }

    #[test]
    fn test_open_missing_without_create() {
        let dir = TempDir::new().unwrap();
        let err = Store::open(
            &dir.path().join("absent"),
            StoreOptions {
                create_if_missing: false,
                ..StoreOptions::default()
            },
        )
        .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_invalid_options_rejected() {
        let dir = TempDir::new().unwrap();
        let mut options = StoreOptions::default();
        options.limits.max_iterations = 0;
        let err = Store::open(&dir.path().join("db"), options).unwrap_err();
        assert_eq!(err.code(), "invalid_input");

        let err = Store::open(
            &dir.path().join("db"),
            StoreOptions {
                shard_count: 4096,
                ..StoreOptions::default()
            },
        )
        .unwrap_err();
        assert_eq!(err.code(), "invalid_input");
    }

    #[test]
    fn test_refresh_stats() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store
            .insert(&[
                (iri("a"), iri("p"), iri("b")),
                (iri("c"), iri("q"), iri("d")),
            ])
            .unwrap();
        let stats = store.refresh_stats(None).unwrap();
        assert_eq!(stats.triple_count, 2);
        assert_eq!(stats.distinct_predicates, 2);
    }

    #[test]
    fn test_explain_plan_output() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store
            .insert(&[
                (iri("a"), iri("knows"), iri("b")),
                (iri("b"), iri("knows"), iri("c")),
            ])
            .unwrap();
        let q = select(vec![
            pat(v("x"), t(iri("knows")), v("y")),
            pat(v("y"), t(iri("knows")), v("z")),
        ]);
        let text = store.explain_plan(&q).unwrap();
        assert!(text.contains("leapfrog") || text.contains("hash-join"), "{text}");
        let cost = store.explain_cost(&q, None).unwrap();
        assert!(cost.contains("total cost"), "{cost}");
    }

    #[test]
    fn test_materialize_through_store() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store
            .insert(&[
                (
                    iri("Cat"),
                    Term::iri(triad_reason::vocab::RDFS_SUB_CLASS_OF),
                    iri("Animal"),
                ),
                (
                    iri("felix"),
                    Term::iri(triad_reason::vocab::RDF_TYPE),
                    iri("Cat"),
                ),
            ])
            .unwrap();
        let outcome = store.materialize(RuleProfile::RdfsPlus).unwrap();
        assert!(outcome.derived >= 1);
        let q = QueryForm::Ask(Algebra::Bgp(vec![pat(
            t(iri("felix")),
            t(Term::iri(triad_reason::vocab::RDF_TYPE)),
            t(iri("Animal")),
        )]));
        assert_eq!(
            store.query(&q, &QueryOptions::default()).unwrap().as_bool(),
            Some(true)
        );
    }

    #[test]
    fn test_backup_restore_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("db"), StoreOptions::default()).unwrap();
        store
            .insert(&[
                (iri("a"), iri("p"), iri("b")),
                (iri("c"), iri("p"), Term::integer(5)),
            ])
            .unwrap();
        let backup_dir = dir.path().join("backup");
        store.backup(&backup_dir).unwrap();
        store.close().unwrap();

        let restored = Store::restore(
            &backup_dir,
            &dir.path().join("restored"),
            StoreOptions::default(),
        )
        .unwrap();
        let q = select(vec![pat(v("x"), t(iri("p")), v("y"))]);
        assert_eq!(restored.query(&q, &QueryOptions::default()).unwrap().len(), 2);
    }

    #[test]
    fn test_restore_rejects_tampered_backup() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("db"), StoreOptions::default()).unwrap();
        store.insert(&[(iri("a"), iri("p"), iri("b"))]).unwrap();
        let backup_dir = dir.path().join("backup");
        store.backup(&backup_dir).unwrap();
        store.close().unwrap();

        // Corrupt the manifest
        let manifest_path = backup_dir.join(backup::MANIFEST_FILE);
        let mut manifest: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&manifest_path).unwrap()).unwrap();
        manifest["triple_count"] = serde_json::json!(999);
        std::fs::write(&manifest_path, serde_json::to_vec(&manifest).unwrap()).unwrap();

        let err = Store::restore(
            &backup_dir,
            &dir.path().join("restored"),
            StoreOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "verification_failed");
    }
}
