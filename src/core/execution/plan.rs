//! Materialises a traversal into the per-action task records of one request.

use crate::core::execution::request::PrivacyRequest;
use crate::core::execution::task::{ActionType, InputEdge, RequestTask};
use crate::core::graph::address::CollectionAddress;
use crate::core::graph::traversal::Traversal;
use indexmap::IndexMap;

#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub request: PrivacyRequest,
    pub tasks: Vec<RequestTask>,
}

impl ExecutionPlan {
    /// Build ROOT, node and TERMINATOR tasks for every requested action.
    ///
    /// Access and erasure tasks follow the traversal's wired edges; consent
    /// tasks hang directly between ROOT and TERMINATOR. Each action's ROOT
    /// waits for the previous action's TERMINATOR.
    pub fn build(traversal: &Traversal, mut request: PrivacyRequest) -> Self {
        request.graph_hash = Some(traversal.graph().hash.clone());
        let mut tasks = Vec::new();
        let mut sequence = 0u32;
        let mut previous_terminator: Option<String> = None;

        for action in request.actions.clone() {
            let mut action_tasks = match action {
                ActionType::Access | ActionType::Erasure => {
                    wired_tasks(traversal, &request.id, action, &mut sequence)
                }
                ActionType::Consent => fan_out_tasks(traversal, &request.id, action, &mut sequence),
            };
            let root_id = RequestTask::task_id(action, &CollectionAddress::root());
            if let (Some(previous), Some(root)) = (&previous_terminator, action_tasks.get_mut(&root_id)) {
                root.upstream_tasks.push(previous.clone());
            }
            previous_terminator = Some(RequestTask::task_id(action, &CollectionAddress::terminator()));
            tasks.extend(action_tasks.into_values());
        }

        tracing::debug!(
            request_id = %request.id,
            tasks = tasks.len(),
            actions = request.actions.len(),
            "execution plan built"
        );
        ExecutionPlan { request, tasks }
    }

    pub fn task(&self, id: &str) -> Option<&RequestTask> {
        self.tasks.iter().find(|task| task.id == id)
    }
}

fn next_task(
    request_id: &str,
    action: ActionType,
    address: CollectionAddress,
    sequence: &mut u32,
) -> RequestTask {
    *sequence += 1;
    RequestTask::new(request_id, action, address, *sequence)
}

fn wired_tasks(
    traversal: &Traversal,
    request_id: &str,
    action: ActionType,
    sequence: &mut u32,
) -> IndexMap<String, RequestTask> {
    let root = CollectionAddress::root();
    let terminator = CollectionAddress::terminator();
    let terminator_id = RequestTask::task_id(action, &terminator);
    let mut tasks = IndexMap::new();

    let mut addresses = vec![root.clone()];
    addresses.extend(traversal.nodes().map(|node| node.address.clone()));

    for address in addresses {
        let mut task = next_task(request_id, action, address.clone(), sequence);
        if !address.is_root() {
            let parents = traversal.parent_addresses(&address);
            task.upstream_tasks = if parents.is_empty() {
                vec![RequestTask::task_id(action, &root)]
            } else {
                parents
                    .iter()
                    .map(|parent| RequestTask::task_id(action, parent))
                    .collect()
            };
            task.input_edges = traversal
                .incoming_edges(&address)
                .into_iter()
                .map(|edge| InputEdge {
                    parent: edge.parent.clone(),
                    parent_field: edge.parent_field.clone(),
                    child_field: edge.child_field.clone(),
                })
                .collect();
        }
        let children = traversal.child_addresses(&address);
        task.downstream_tasks = if children.is_empty() {
            vec![terminator_id.clone()]
        } else {
            children
                .iter()
                .map(|child| RequestTask::task_id(action, child))
                .collect()
        };
        tasks.insert(task.id.clone(), task);
    }

    // Nodes with no wired parent depend on ROOT, so ROOT must list them downstream.
    let root_id = RequestTask::task_id(action, &root);
    let orphans: Vec<String> = tasks
        .values()
        .filter(|task| !task.is_root_task() && task.upstream_tasks == [root_id.clone()])
        .filter(|task| !traversal.parent_addresses(&task.collection_address).contains(&root))
        .map(|task| task.id.clone())
        .collect();
    if let Some(root_task) = tasks.get_mut(&root_id) {
        if !orphans.is_empty() {
            root_task.downstream_tasks.retain(|id| id != &terminator_id);
            root_task.downstream_tasks.extend(orphans);
        }
    }

    order_after_constraints(traversal, action, &mut tasks);

    let mut terminator_task = next_task(request_id, action, terminator, sequence);
    terminator_task.upstream_tasks = feeding_terminator(&tasks, &terminator_id);
    tasks.insert(terminator_task.id.clone(), terminator_task);
    tasks
}

fn fan_out_tasks(
    traversal: &Traversal,
    request_id: &str,
    action: ActionType,
    sequence: &mut u32,
) -> IndexMap<String, RequestTask> {
    let root_id = RequestTask::task_id(action, &CollectionAddress::root());
    let terminator_id = RequestTask::task_id(action, &CollectionAddress::terminator());
    let mut tasks = IndexMap::new();

    let mut root_task = next_task(request_id, action, CollectionAddress::root(), sequence);
    let mut node_ids = Vec::new();
    let mut node_tasks = Vec::new();
    for node in traversal.nodes() {
        let mut task = next_task(request_id, action, node.address.clone(), sequence);
        task.upstream_tasks = vec![root_id.clone()];
        task.downstream_tasks = vec![terminator_id.clone()];
        node_ids.push(task.id.clone());
        node_tasks.push(task);
    }
    root_task.downstream_tasks = if node_ids.is_empty() {
        vec![terminator_id.clone()]
    } else {
        node_ids
    };

    tasks.insert(root_task.id.clone(), root_task);
    for task in node_tasks {
        tasks.insert(task.id.clone(), task);
    }
    order_after_constraints(traversal, action, &mut tasks);

    let mut terminator_task =
        next_task(request_id, action, CollectionAddress::terminator(), sequence);
    terminator_task.upstream_tasks = feeding_terminator(&tasks, &terminator_id);
    tasks.insert(terminator_task.id.clone(), terminator_task);
    tasks
}

/// Make each node task wait for the tasks its `after` constraints name.
///
/// A predecessor that only fed TERMINATOR now feeds its successor instead;
/// TERMINATOR still waits for it through the successor.
fn order_after_constraints(
    traversal: &Traversal,
    action: ActionType,
    tasks: &mut IndexMap<String, RequestTask>,
) {
    let terminator_id = RequestTask::task_id(action, &CollectionAddress::terminator());
    for node in traversal.nodes() {
        let task_id = RequestTask::task_id(action, &node.address);
        for before in traversal.ordering_predecessors(&node.address) {
            let before_id = RequestTask::task_id(action, &before);
            if !tasks.contains_key(&before_id) {
                continue;
            }
            if let Some(task) = tasks.get_mut(&task_id) {
                if !task.upstream_tasks.contains(&before_id) {
                    task.upstream_tasks.push(before_id.clone());
                }
            }
            if let Some(predecessor) = tasks.get_mut(&before_id) {
                predecessor.downstream_tasks.retain(|id| id != &terminator_id);
                if !predecessor.downstream_tasks.contains(&task_id) {
                    predecessor.downstream_tasks.push(task_id.clone());
                }
            }
        }
    }
}

fn feeding_terminator(tasks: &IndexMap<String, RequestTask>, terminator_id: &str) -> Vec<String> {
    tasks
        .values()
        .filter(|task| task.downstream_tasks.iter().any(|id| id == terminator_id))
        .map(|task| task.id.clone())
        .collect()
}
