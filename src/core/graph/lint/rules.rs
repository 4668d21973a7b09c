use super::{DatasetLintRule, LintResult, LintSeverity};
use crate::core::graph::address::CollectionAddress;
use crate::core::graph::config::Dataset;
use petgraph::algo::{has_path_connecting, tarjan_scc};
use petgraph::graph::{DiGraph, NodeIndex, UnGraph};
use std::collections::{BTreeSet, HashMap, HashSet};

pub fn built_in_rules() -> Vec<Box<dyn DatasetLintRule>> {
    vec![
        Box::new(UnknownAfterTargetsRule),
        Box::new(AfterCycleRule),
        Box::new(UnreachableCollectionsRule),
        Box::new(IsolatedDatasetRule),
        Box::new(UntypedReferenceRule),
    ]
}

fn addresses(datasets: &[Dataset]) -> Vec<CollectionAddress> {
    datasets
        .iter()
        .flat_map(|dataset| {
            dataset
                .collections
                .iter()
                .map(|collection| CollectionAddress::new(&dataset.name, &collection.name))
        })
        .collect()
}

struct UnknownAfterTargetsRule;

impl DatasetLintRule for UnknownAfterTargetsRule {
    fn validate(&self, datasets: &[Dataset]) -> Vec<LintResult> {
        let known: HashSet<CollectionAddress> = addresses(datasets).into_iter().collect();
        let dataset_names: HashSet<&str> = datasets.iter().map(|d| d.name.as_str()).collect();
        let mut out = Vec::new();

        for dataset in datasets {
            for name in &dataset.after {
                if !dataset_names.contains(name.as_str()) {
                    out.push(LintResult::new(
                        "DSR-LINT-001",
                        LintSeverity::Error,
                        format!("dataset '{}' runs after unknown dataset '{}'", dataset.name, name),
                        Some(dataset.name.clone()),
                        Some("reference a dataset declared in the same document set".to_string()),
                    ));
                }
            }
            for collection in &dataset.collections {
                let here = CollectionAddress::new(&dataset.name, &collection.name);
                for target in &collection.after {
                    if !known.contains(target) {
                        out.push(LintResult::new(
                            "DSR-LINT-001",
                            LintSeverity::Error,
                            format!("collection {} runs after unknown collection {}", here, target),
                            Some(here.to_string()),
                            Some("reference an existing <dataset>.<collection>".to_string()),
                        ));
                    }
                }
            }
        }
        out
    }
}

/// `after` constraints expanded to a collection-level graph; any strongly
/// connected component is a guaranteed traversal deadlock.
struct AfterCycleRule;

impl DatasetLintRule for AfterCycleRule {
    fn validate(&self, datasets: &[Dataset]) -> Vec<LintResult> {
        let mut graph: DiGraph<CollectionAddress, ()> = DiGraph::new();
        let mut index: HashMap<CollectionAddress, NodeIndex> = HashMap::new();
        for address in addresses(datasets) {
            let idx = graph.add_node(address.clone());
            index.insert(address, idx);
        }

        for dataset in datasets {
            for collection in &dataset.collections {
                let here = index[&CollectionAddress::new(&dataset.name, &collection.name)];
                for target in &collection.after {
                    if let Some(before) = index.get(target) {
                        graph.update_edge(*before, here, ());
                    }
                }
                for prerequisite in datasets.iter().filter(|d| dataset.after.contains(&d.name)) {
                    for other in &prerequisite.collections {
                        let before =
                            index[&CollectionAddress::new(&prerequisite.name, &other.name)];
                        graph.update_edge(before, here, ());
                    }
                }
            }
        }

        let mut out = Vec::new();
        for component in tarjan_scc(&graph) {
            let is_cycle = if component.len() > 1 {
                true
            } else {
                let idx = component[0];
                graph.find_edge(idx, idx).is_some()
            };
            if !is_cycle {
                continue;
            }
            let mut members: Vec<String> =
                component.iter().map(|idx| graph[*idx].to_string()).collect();
            members.sort();
            out.push(LintResult::new(
                "DSR-LINT-002",
                LintSeverity::Error,
                format!("`after` constraints form a cycle: [{}]", members.join(", ")),
                members.first().cloned(),
                Some("remove one of the `after` constraints in the cycle".to_string()),
            ));
        }
        out
    }
}

/// Collections with no path of references back to an identity field can
/// never be seeded.
struct UnreachableCollectionsRule;

impl DatasetLintRule for UnreachableCollectionsRule {
    fn validate(&self, datasets: &[Dataset]) -> Vec<LintResult> {
        let mut graph: UnGraph<CollectionAddress, ()> = UnGraph::new_undirected();
        let mut index: HashMap<CollectionAddress, NodeIndex> = HashMap::new();
        let mut seeded: Vec<NodeIndex> = Vec::new();
        for dataset in datasets {
            for collection in &dataset.collections {
                let here = CollectionAddress::new(&dataset.name, &collection.name);
                let here_idx = node_index(&mut graph, &mut index, &here);
                for (_, field) in collection.field_paths() {
                    if field.identity.is_some() && !seeded.contains(&here_idx) {
                        seeded.push(here_idx);
                    }
                    for reference in &field.references {
                        let there_idx =
                            node_index(&mut graph, &mut index, &reference.field.collection);
                        graph.update_edge(here_idx, there_idx, ());
                    }
                }
            }
        }

        addresses(datasets)
            .into_iter()
            .filter(|address| match index.get(address) {
                Some(&target) => !seeded
                    .iter()
                    .any(|&start| has_path_connecting(&graph, start, target, None)),
                None => true,
            })
            .map(|address| {
                LintResult::new(
                    "DSR-LINT-003",
                    LintSeverity::Warning,
                    format!("collection {} is not reachable from any identity field", address),
                    Some(address.to_string()),
                    Some("add an identity field or a reference to a reachable collection".to_string()),
                )
            })
            .collect()
    }
}

fn node_index(
    graph: &mut UnGraph<CollectionAddress, ()>,
    index: &mut HashMap<CollectionAddress, NodeIndex>,
    address: &CollectionAddress,
) -> NodeIndex {
    if let Some(idx) = index.get(address) {
        return *idx;
    }
    let idx = graph.add_node(address.clone());
    index.insert(address.clone(), idx);
    idx
}

struct IsolatedDatasetRule;

impl DatasetLintRule for IsolatedDatasetRule {
    fn validate(&self, datasets: &[Dataset]) -> Vec<LintResult> {
        let referenced: BTreeSet<&str> = datasets
            .iter()
            .flat_map(|d| d.collections.iter())
            .flat_map(|c| c.field_paths())
            .flat_map(|(_, field)| {
                field
                    .references
                    .iter()
                    .map(|r| r.field.collection.dataset.as_str())
                    .collect::<Vec<_>>()
            })
            .collect();

        let mut out = Vec::new();
        for dataset in datasets {
            let fields: Vec<_> = dataset
                .collections
                .iter()
                .flat_map(|c| c.field_paths())
                .collect();
            let has_identity = fields.iter().any(|(_, f)| f.identity.is_some());
            let has_references = fields.iter().any(|(_, f)| !f.references.is_empty());
            if !has_identity && !has_references && !referenced.contains(dataset.name.as_str()) {
                out.push(LintResult::new(
                    "DSR-LINT-004",
                    LintSeverity::Warning,
                    format!(
                        "dataset '{}' declares no identity fields and no references",
                        dataset.name
                    ),
                    Some(dataset.name.clone()),
                    None,
                ));
            }
        }
        out
    }
}

struct UntypedReferenceRule;

impl DatasetLintRule for UntypedReferenceRule {
    fn validate(&self, datasets: &[Dataset]) -> Vec<LintResult> {
        let mut out = Vec::new();
        for dataset in datasets {
            for collection in &dataset.collections {
                let here = CollectionAddress::new(&dataset.name, &collection.name);
                for (path, field) in collection.field_paths() {
                    if field.references.is_empty() || field.data_type.is_some() {
                        continue;
                    }
                    let location = here.field(path).to_string();
                    out.push(LintResult::new(
                        "DSR-LINT-005",
                        LintSeverity::Info,
                        format!("field {} has references but no data_type", location),
                        Some(location),
                        Some("set data_type so incoming values are cast before querying".to_string()),
                    ));
                }
            }
        }
        out
    }
}
