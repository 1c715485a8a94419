//! Module index and name-based import resolution.
//!
//! Resolution for a raw reference `r` from module `S`:
//! 1. exact: the module named `r`;
//! 2. suffix: the first module (index order) whose name ends in `.r`;
//! 3. otherwise unresolved.
//!
//! Index order is lexicographic by module name, so results are
//! reproducible from run to run.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use tracing::debug;

use crate::discover::{DiscoveryWarning, WarningKind};
use crate::extract::ModuleRecord;

/// Module name → extracted record, iterated in name order.
#[derive(Debug, Default)]
pub struct ModuleIndex {
    modules: BTreeMap<String, ModuleRecord>,
    /// Every proper dotted suffix → names ending in it, in index order.
    suffixes: HashMap<String, Vec<String>>,
}

impl ModuleIndex {
    /// Build the index from every record of a run.
    ///
    /// When two files map to the same module name the one with the
    /// lexicographically smaller path wins; each loser is reported.
    pub fn build(mut records: Vec<ModuleRecord>) -> (Self, Vec<DiscoveryWarning>) {
        records.sort_by(|a, b| a.path.cmp(&b.path));

        let mut modules: BTreeMap<String, ModuleRecord> = BTreeMap::new();
        let mut warnings = Vec::new();
        for record in records {
            if let Some(existing) = modules.get(&record.name) {
                warnings.push(DiscoveryWarning {
                    kind: WarningKind::DuplicateModule,
                    message: format!(
                        "module `{}` already provided by {}",
                        record.name,
                        existing.path.display()
                    ),
                    path: Some(record.path),
                });
                continue;
            }
            modules.insert(record.name.clone(), record);
        }

        let mut suffixes: HashMap<String, Vec<String>> = HashMap::new();
        for name in modules.keys() {
            for (i, _) in name.match_indices('.') {
                suffixes
                    .entry(name[i + 1..].to_string())
                    .or_default()
                    .push(name.clone());
            }
        }

        (Self { modules, suffixes }, warnings)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Records in index order.
    pub fn records(&self) -> impl Iterator<Item = &ModuleRecord> {
        self.modules.values()
    }

    pub fn path_of(&self, name: &str) -> Option<&Path> {
        self.modules.get(name).map(|r| r.path.as_path())
    }

    /// Resolve one reference made by `source`.
    pub fn resolve(&self, source: &str, reference: &str) -> Resolution<'_> {
        if let Some((name, _)) = self.modules.get_key_value(reference) {
            return if name == source {
                Resolution::SelfImport
            } else {
                Resolution::Module(name)
            };
        }

        match self.suffixes.get(reference) {
            Some(candidates) => match candidates.iter().find(|name| name.as_str() != source) {
                Some(name) => Resolution::Module(name.as_str()),
                // Only the importing module itself matched.
                None if !candidates.is_empty() => Resolution::SelfImport,
                None => Resolution::Unresolved,
            },
            None => Resolution::Unresolved,
        }
    }
}

/// Outcome of resolving one reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution<'a> {
    Module(&'a str),
    /// The reference names the importing module itself; no edge.
    SelfImport,
    Unresolved,
}

/// A directed module dependency: `source` imports `target`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ImportEdge {
    pub source: String,
    pub target: String,
}

/// A raw reference that matched no discovered module.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnresolvedImport {
    pub module: String,
    pub reference: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedImports {
    /// Sorted by (source, target), no duplicates, no self-loops.
    pub edges: Vec<ImportEdge>,
    /// Sorted by (module, reference).
    pub unresolved: Vec<UnresolvedImport>,
}

impl ResolvedImports {
    /// Edges grouped by source module, in source order.
    pub fn by_source(&self) -> BTreeMap<&str, Vec<&str>> {
        let mut grouped: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for edge in &self.edges {
            grouped
                .entry(edge.source.as_str())
                .or_default()
                .push(edge.target.as_str());
        }
        grouped
    }
}

/// Resolve every module's raw references against the index.
pub fn resolve_all(index: &ModuleIndex) -> ResolvedImports {
    let records: Vec<&ModuleRecord> = index.records().collect();

    let per_module: Vec<(BTreeSet<ImportEdge>, Vec<UnresolvedImport>)> = records
        .par_iter()
        .map(|record| resolve_module(index, record))
        .collect();

    let mut resolved = ResolvedImports::default();
    for (edges, unresolved) in per_module {
        resolved.edges.extend(edges);
        resolved.unresolved.extend(unresolved);
    }
    resolved.edges.sort();
    resolved.unresolved.sort();

    debug!(
        edges = resolved.edges.len(),
        unresolved = resolved.unresolved.len(),
        "imports resolved"
    );
    resolved
}

fn resolve_module(
    index: &ModuleIndex,
    record: &ModuleRecord,
) -> (BTreeSet<ImportEdge>, Vec<UnresolvedImport>) {
    let mut edges = BTreeSet::new();
    let mut unresolved = Vec::new();

    for reference in &record.imports {
        match index.resolve(&record.name, reference) {
            Resolution::Module(target) => {
                edges.insert(ImportEdge {
                    source: record.name.clone(),
                    target: target.to_string(),
                });
            }
            Resolution::SelfImport => {}
            Resolution::Unresolved => unresolved.push(UnresolvedImport {
                module: record.name.clone(),
                reference: reference.clone(),
            }),
        }
    }

    (edges, unresolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn record(name: &str, imports: &[&str]) -> ModuleRecord {
        ModuleRecord {
            path: PathBuf::from(format!("/proj/{}.py", name.replace('.', "/"))),
            name: name.to_string(),
            imports: imports.iter().map(|s| s.to_string()).collect(),
            classes: Vec::new(),
        }
    }

    fn edge(source: &str, target: &str) -> ImportEdge {
        ImportEdge {
            source: source.to_string(),
            target: target.to_string(),
        }
    }

    #[test]
    fn test_exact_match_wins_over_suffix() {
        let (index, _) = ModuleIndex::build(vec![
            record("util", &[]),
            record("pkg.util", &[]),
            record("app", &["util"]),
        ]);
        assert_eq!(index.resolve("app", "util"), Resolution::Module("util"));
    }

    #[test]
    fn test_suffix_match_takes_first_in_name_order() {
        let (index, _) = ModuleIndex::build(vec![
            record("zeta.models", &[]),
            record("alpha.models", &[]),
            record("app", &[]),
        ]);
        assert_eq!(index.resolve("app", "models"), Resolution::Module("alpha.models"));
    }

    #[test]
    fn test_suffix_must_be_dotted() {
        let (index, _) = ModuleIndex::build(vec![record("pkg.mymodels", &[]), record("app", &[])]);
        assert_eq!(index.resolve("app", "models"), Resolution::Unresolved);
    }

    #[test]
    fn test_self_import_is_never_an_edge() {
        let (index, _) = ModuleIndex::build(vec![record("pkg.a", &["pkg.a", "a"])]);
        let resolved = resolve_all(&index);
        assert!(resolved.edges.is_empty());
        assert!(resolved.unresolved.is_empty());
    }

    #[test]
    fn test_sole_suffix_match_on_self_is_self_import() {
        let (index, _) = ModuleIndex::build(vec![record("pkg.a", &[]), record("app", &[])]);
        assert_eq!(index.resolve("pkg.a", "a"), Resolution::SelfImport);
        assert_eq!(index.resolve("app", "a"), Resolution::Module("pkg.a"));
    }

    #[test]
    fn test_suffix_skips_importing_module() {
        let (index, _) = ModuleIndex::build(vec![
            record("a.config", &["config"]),
            record("b.config", &[]),
        ]);
        let resolved = resolve_all(&index);
        assert_eq!(resolved.edges, vec![edge("a.config", "b.config")]);
    }

    #[test]
    fn test_resolve_all_dedups_and_reports_unresolved() {
        let (index, _) = ModuleIndex::build(vec![
            record("a", &[]),
            record("b", &["a", "numpy", "a"]),
            record("pkg.c", &["a", "b"]),
        ]);
        let resolved = resolve_all(&index);
        assert_eq!(
            resolved.edges,
            vec![edge("b", "a"), edge("pkg.c", "a"), edge("pkg.c", "b")]
        );
        assert_eq!(
            resolved.unresolved,
            vec![UnresolvedImport {
                module: "b".to_string(),
                reference: "numpy".to_string(),
            }]
        );

        let grouped = resolved.by_source();
        assert_eq!(grouped["pkg.c"], vec!["a", "b"]);
    }

    #[test]
    fn test_duplicate_module_name_keeps_first_path() {
        let mut first = record("a", &[]);
        first.path = PathBuf::from("/proj/a.py");
        let mut second = record("a", &["os"]);
        second.path = PathBuf::from("/proj/a.pyi");

        let (index, warnings) = ModuleIndex::build(vec![second, first]);
        assert_eq!(index.len(), 1);
        assert_eq!(index.path_of("a"), Some(Path::new("/proj/a.py")));
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, WarningKind::DuplicateModule);
        assert_eq!(warnings[0].path.as_deref(), Some(Path::new("/proj/a.pyi")));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let records = vec![
            record("x.models", &[]),
            record("y.models", &[]),
            record("app", &["models"]),
        ];
        let (one, _) = ModuleIndex::build(records.clone());
        let (two, _) = ModuleIndex::build(records.into_iter().rev().collect());
        assert_eq!(resolve_all(&one), resolve_all(&two));
    }
}
