//! The two materialization passes surrounding plan rewriting.
//!
//! Before optimization, sub-plans whose results already sit in the cache are
//! cut away and replaced by a binary load. After optimization, the Markov
//! model nominates operators whose outputs are worth persisting for future
//! runs, and the plan is patched with stores (and optional cache hints).

use petgraph::graph::NodeIndex;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use common::{CacheMode, FileService, MaterializationSettings};
use dataflow::{DataflowPlan, OpKind, Operator, PlanError};
use profiler::MarkovModel;

use crate::catalogue::CacheCatalogue;
use crate::error::CacheError;
use crate::point::{select, write_penalty_ms, MaterializationPoint};

/// Name of the binary loader/storer pair used for cached artifacts.
const BIN_STORAGE: &str = "BinStorage";

/// Owns the cache catalogue and performs the plan surgery of both passes.
pub struct MaterializationManager {
    settings: MaterializationSettings,
    catalogue: CacheCatalogue,
}

impl MaterializationManager {
    /// Load the catalogue found under the configured base directory.
    pub fn new(settings: MaterializationSettings) -> Self {
        let catalogue = CacheCatalogue::load(&settings.base_dir);
        Self {
            settings,
            catalogue,
        }
    }

    pub fn with_catalogue(settings: MaterializationSettings, catalogue: CacheCatalogue) -> Self {
        Self {
            settings,
            catalogue,
        }
    }

    pub fn catalogue(&self) -> &CacheCatalogue {
        &self.catalogue
    }

    pub fn save_catalogue(&self) -> Result<(), CacheError> {
        self.catalogue.save(&self.settings.base_dir)
    }

    /// Pass (a): walk bottom-up and replace every operator whose signature
    /// has a cached artifact with a binary `LOAD` of that artifact, cutting
    /// away its upstream cone. Consumer input order is preserved, which
    /// matters for JOIN whose emitted code is positional.
    pub fn load_cached(
        &mut self,
        plan: &mut DataflowPlan,
        fs: &dyn FileService,
    ) -> Result<usize, PlanError> {
        let order = plan.topo_order()?;
        let signatures: HashMap<NodeIndex, String> = order
            .iter()
            .map(|&idx| (idx, plan.signature_of(idx)))
            .collect();

        let mut replaced = 0;
        for &idx in order.iter().rev() {
            if !plan.contains(idx) {
                continue;
            }
            let op = plan.node(idx);
            if op.is_sink() || op.is_source() {
                continue;
            }
            let signature = &signatures[&idx];
            let Some(entry) = self.catalogue.lookup(signature) else {
                continue;
            };
            if !fs.exists(&entry.uri) {
                warn!(
                    "{}",
                    CacheError::Corrupt(signature.clone(), entry.uri.display().to_string())
                );
                self.catalogue.remove(signature);
                continue;
            }

            let schema = op.schema().cloned();
            let uri = entry.uri.clone();
            let mut load = Operator::load("", &uri.display().to_string(), schema);
            if let OpKind::Load { loader, .. } = load.kind_mut() {
                *loader = Some(BIN_STORAGE.to_string());
            }
            plan.replace_with_source(idx, load)?;
            info!("short-circuited {} from {}", signature, uri.display());
            replaced += 1;
        }
        Ok(replaced)
    }

    /// Pass (b): honor explicit MATERIALIZE hints, then let the Markov model
    /// nominate new materialization points and patch the plan with stores.
    pub fn insert_points(
        &mut self,
        plan: &mut DataflowPlan,
        markov: &MarkovModel,
        created_at: u64,
    ) -> Result<Vec<MaterializationPoint>, PlanError> {
        // Explicit user hints are unconditional; the marker itself is
        // rewritten away.
        let hints: Vec<NodeIndex> = plan
            .operators()
            .filter(|(_, op)| matches!(op.kind(), OpKind::Materialize))
            .map(|(idx, _)| idx)
            .collect();
        for hint in hints {
            let input = match plan.node(hint).inputs() {
                [single] => single.clone(),
                _ => continue,
            };
            let Some(producer) = plan.find_operator_for_alias(&input) else {
                continue;
            };
            plan.remove(hint, false)?;
            self.materialize_at(plan, producer, created_at)?;
        }

        let mut candidates = Vec::new();
        for idx in plan.topo_order()? {
            let op = plan.node(idx);
            if op.is_sink() || op.is_source() {
                continue;
            }
            if matches!(
                op.kind(),
                OpKind::TimingOp { .. } | OpKind::Cache { .. } | OpKind::Store { .. }
            ) {
                continue;
            }
            let signature = plan.signature_of(idx);
            if self.catalogue.contains(&signature) {
                continue;
            }
            let Some((cost_ms, prob)) = markov.total_cost(
                &signature,
                self.settings.prob_strategy,
                self.settings.cost_strategy,
            ) else {
                continue;
            };
            let Some(bytes) = size_estimate(markov, &signature) else {
                debug!("no size estimate for {}, skipping", signature);
                continue;
            };
            let benefit_ms = cost_ms - write_penalty_ms(bytes, self.settings.write_throughput_mibs);
            candidates.push(MaterializationPoint {
                lineage: signature,
                cost_ms,
                prob,
                bytes,
                benefit_ms,
            });
        }

        let selected = select(candidates, &self.settings);
        for point in &selected {
            if let Some(idx) = plan.get(&point.lineage) {
                self.materialize_at(plan, idx, created_at)?;
                info!("materializing {}", point);
            }
        }
        Ok(selected)
    }

    /// Patch the plan at `idx`: optional cache shim toward the consumers,
    /// a binary store of the output, and a catalogue entry.
    fn materialize_at(
        &mut self,
        plan: &mut DataflowPlan,
        idx: NodeIndex,
        created_at: u64,
    ) -> Result<(), PlanError> {
        let signature = plan.signature_of(idx);
        if self.catalogue.contains(&signature) {
            return Ok(());
        }
        let path = self.settings.base_dir.join(&signature);

        // The cache shim first, so the store still reads the raw pipe.
        if self.settings.cache_mode != CacheMode::None
            && plan.node(idx).outputs().len() == 1
            && !plan
                .consumers_of(&plan.node(idx).outputs()[0].clone())
                .is_empty()
        {
            plan.insert_after(idx, Operator::cache("cache", "", self.settings.cache_mode))?;
        }
        let mut store = Operator::store("", &path.display().to_string());
        if let OpKind::Store { storer, .. } = store.kind_mut() {
            *storer = Some(BIN_STORAGE.to_string());
        }
        plan.insert_after(idx, store)?;
        self.catalogue.insert(&signature, &path, created_at);
        Ok(())
    }
}

/// Estimated artifact size: records times bytes-per-record when both were
/// observed, otherwise the raw output byte count.
fn size_estimate(markov: &MarkovModel, signature: &str) -> Option<u64> {
    match (
        markov.result_records(signature),
        markov.bytes_per_record(signature),
    ) {
        (Some(records), Some(bpr)) => Some(records * bpr),
        _ => markov.output_bytes(signature),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{GlobalStrategy, LocalFileService};
    use dataflow::{CmpOp, Expr, Field, FieldType, Literal, Predicate, Ref, Schema};
    use profiler::START_NODE;
    use std::path::Path;

    fn xy() -> Schema {
        Schema::from_fields(vec![
            Field::new("x", FieldType::Int),
            Field::new("y", FieldType::Int),
        ])
    }

    fn gt_zero() -> Predicate {
        Predicate::Cmp(
            CmpOp::Gt,
            Expr::named("x"),
            Expr::Ref(Ref::Value(Literal::Int(0))),
        )
    }

    fn chain_plan() -> DataflowPlan {
        DataflowPlan::new(vec![
            Operator::load("a", "f", Some(xy())),
            Operator::filter("b", "a", gt_zero()),
            Operator::store("b", "out"),
        ])
        .unwrap()
    }

    fn settings_at(base: &Path) -> MaterializationSettings {
        MaterializationSettings {
            base_dir: base.to_path_buf(),
            min_benefit_ms: 0,
            prob_threshold: 0.0,
            global_strategy: GlobalStrategy::AllAboveThreshold,
            cache_mode: CacheMode::MemoryOnly,
            ..Default::default()
        }
    }

    #[test]
    fn load_cached_short_circuits_the_filter() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = chain_plan();
        let filter = plan.find_operator_for_alias("b").unwrap();
        let sig = plan.signature_of(filter);

        let artifact = dir.path().join(&sig);
        std::fs::create_dir_all(&artifact).unwrap();
        let mut catalogue = CacheCatalogue::new();
        catalogue.insert(&sig, &artifact, 1);

        let mut manager =
            MaterializationManager::with_catalogue(settings_at(dir.path()), catalogue);
        let replaced = manager.load_cached(&mut plan, &LocalFileService).unwrap();
        assert_eq!(replaced, 1);
        assert_eq!(plan.operator_count(), 2);

        let source = plan.source_nodes()[0];
        assert!(matches!(
            plan.node(source).kind(),
            OpKind::Load { loader: Some(l), .. } if l == "BinStorage"
        ));
        // The store still reads pipe b.
        let sink = plan.sink_nodes()[0];
        assert_eq!(plan.node(sink).inputs(), ["b"]);

        // Idempotent: a second pass changes nothing.
        let again = manager.load_cached(&mut plan, &LocalFileService).unwrap();
        assert_eq!(again, 0);
        assert_eq!(plan.operator_count(), 2);
    }

    #[test]
    fn unreadable_artifact_is_a_cache_miss() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = chain_plan();
        let filter = plan.find_operator_for_alias("b").unwrap();
        let sig = plan.signature_of(filter);

        let mut catalogue = CacheCatalogue::new();
        catalogue.insert(&sig, &dir.path().join("missing"), 1);

        let mut manager =
            MaterializationManager::with_catalogue(settings_at(dir.path()), catalogue);
        let replaced = manager.load_cached(&mut plan, &LocalFileService).unwrap();
        assert_eq!(replaced, 0);
        assert_eq!(plan.operator_count(), 3);
        assert!(!manager.catalogue().contains(&sig));
    }

    #[test]
    fn join_input_order_survives_the_swap() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = DataflowPlan::new(vec![
            Operator::load("a", "f", Some(xy())),
            Operator::filter("fa", "a", gt_zero()),
            Operator::load("b", "g", Some(xy())),
            Operator::join(
                "j",
                vec!["fa", "b"],
                vec![vec![Ref::named("x")], vec![Ref::named("x")]],
            ),
            Operator::store("j", "out"),
        ])
        .unwrap();
        let filter = plan.find_operator_for_alias("fa").unwrap();
        let sig = plan.signature_of(filter);
        let artifact = dir.path().join(&sig);
        std::fs::create_dir_all(&artifact).unwrap();
        let mut catalogue = CacheCatalogue::new();
        catalogue.insert(&sig, &artifact, 1);

        let mut manager =
            MaterializationManager::with_catalogue(settings_at(dir.path()), catalogue);
        manager.load_cached(&mut plan, &LocalFileService).unwrap();

        let join = plan.find_operator_for_alias("j").unwrap();
        assert_eq!(plan.node(join).inputs(), ["fa", "b"]);
    }

    #[test]
    fn insert_points_patches_plan_and_catalogue() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = chain_plan();
        let filter = plan.find_operator_for_alias("b").unwrap();
        let sig = plan.signature_of(filter);

        let mut markov = MarkovModel::new();
        markov.start_run();
        markov.add(START_NODE, &sig);
        markov.update_cost(&sig, 10_000);
        markov.update_records(&sig, 1000);
        markov.update_size(&sig, 1000 * 64);

        let mut manager = MaterializationManager::with_catalogue(
            settings_at(dir.path()),
            CacheCatalogue::new(),
        );
        let selected = manager.insert_points(&mut plan, &markov, 7).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].lineage, sig);
        assert!(manager.catalogue().contains(&sig));

        // Filter -> cache shim -> original store, plus the new binary store.
        let caches = plan
            .operators()
            .filter(|(_, op)| matches!(op.kind(), OpKind::Cache { .. }))
            .count();
        assert_eq!(caches, 1);
        let stores = plan
            .operators()
            .filter(|(_, op)| matches!(op.kind(), OpKind::Store { .. }))
            .count();
        assert_eq!(stores, 2);
    }

    #[test]
    fn no_profile_data_means_no_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = chain_plan();
        let mut manager = MaterializationManager::with_catalogue(
            settings_at(dir.path()),
            CacheCatalogue::new(),
        );
        let selected = manager
            .insert_points(&mut plan, &MarkovModel::new(), 1)
            .unwrap();
        assert!(selected.is_empty());
        assert_eq!(plan.operator_count(), 3);
    }

    #[test]
    fn materialize_hint_is_rewritten_away() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = DataflowPlan::new(vec![
            Operator::load("a", "f", Some(xy())),
            Operator::filter("b", "a", gt_zero()),
            Operator::materialize_hint("m", "b"),
            Operator::store("m", "out"),
        ])
        .unwrap();

        let mut manager = MaterializationManager::with_catalogue(
            settings_at(dir.path()),
            CacheCatalogue::new(),
        );
        manager
            .insert_points(&mut plan, &MarkovModel::new(), 1)
            .unwrap();

        let hints = plan
            .operators()
            .filter(|(_, op)| matches!(op.kind(), OpKind::Materialize))
            .count();
        assert_eq!(hints, 0);
        // The filter gained a binary store and a catalogue entry.
        let stores = plan
            .operators()
            .filter(|(_, op)| matches!(op.kind(), OpKind::Store { .. }))
            .count();
        assert_eq!(stores, 2);
        assert_eq!(manager.catalogue().len(), 1);
    }
}
