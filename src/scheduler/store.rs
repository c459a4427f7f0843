use std::collections::HashMap;

use uuid::Uuid;

use crate::scheduler::job::Job;
use crate::scheduler::node::Node;

/// In-memory repository for every Job and Node, keyed by id.
///
/// Listing order is insertion order for both entity kinds; node iteration
/// order doubles as the placement tie-break order.
#[derive(Debug, Default, Clone)]
pub struct ClusterState {
    pub(crate) jobs: HashMap<Uuid, Job>,
    job_order: Vec<Uuid>,
    pub(crate) nodes: HashMap<Uuid, Node>,
    node_order: Vec<Uuid>,
}

impl ClusterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_job(&mut self, job: Job) {
        let id = job.id;
        if self.jobs.insert(id, job).is_none() {
            self.job_order.push(id);
        }
    }

    pub fn job(&self, id: &Uuid) -> Option<&Job> {
        self.jobs.get(id)
    }

    pub fn job_mut(&mut self, id: &Uuid) -> Option<&mut Job> {
        self.jobs.get_mut(id)
    }

    pub fn remove_job(&mut self, id: &Uuid) -> Option<Job> {
        let job = self.jobs.remove(id)?;
        self.job_order.retain(|j| j != id);
        Some(job)
    }

    /// All jobs in submission order
    pub fn jobs(&self) -> Vec<&Job> {
        self.job_order
            .iter()
            .filter_map(|id| self.jobs.get(id))
            .collect()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    pub fn insert_node(&mut self, node: Node) {
        let id = node.id;
        if self.nodes.insert(id, node).is_none() {
            self.node_order.push(id);
        }
    }

    /// Put a previously removed node back at its original listing position.
    pub fn restore_node(&mut self, position: usize, node: Node) {
        let id = node.id;
        if self.nodes.insert(id, node).is_none() {
            let position = position.min(self.node_order.len());
            self.node_order.insert(position, id);
        }
    }

    pub fn node(&self, id: &Uuid) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &Uuid) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    /// Remove a node, returning it with its former listing position.
    pub fn remove_node(&mut self, id: &Uuid) -> Option<(usize, Node)> {
        let node = self.nodes.remove(id)?;
        let position = self.node_order.iter().position(|n| n == id).unwrap_or(0);
        self.node_order.remove(position);
        Some((position, node))
    }

    /// All nodes in provisioning order
    pub fn nodes(&self) -> Vec<&Node> {
        self.node_order
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .collect()
    }

    pub fn node_ids(&self) -> &[Uuid] {
        &self.node_order
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::JobSpec;
    use crate::scheduler::node::NodeSpec;

    #[test]
    fn jobs_list_in_insertion_order() {
        let mut state = ClusterState::new();
        let jobs: Vec<Job> = (0..5)
            .map(|i| Job::new(JobSpec::new(100 + i, 1, 128)))
            .collect();
        for job in &jobs {
            state.insert_job(job.clone());
        }
        let listed: Vec<Uuid> = state.jobs().iter().map(|j| j.id).collect();
        let expected: Vec<Uuid> = jobs.iter().map(|j| j.id).collect();
        assert_eq!(listed, expected);

        state.remove_job(&expected[2]);
        assert_eq!(state.job_count(), 4);
        assert!(state.jobs().iter().all(|j| j.id != expected[2]));
    }

    #[test]
    fn reinserting_a_job_keeps_single_listing() {
        let mut state = ClusterState::new();
        let mut job = Job::new(JobSpec::new(100, 1, 128));
        state.insert_job(job.clone());
        job.thread_id = Some(3);
        state.insert_job(job.clone());
        assert_eq!(state.jobs().len(), 1);
        assert_eq!(state.job(&job.id).unwrap().thread_id, Some(3));
    }

    #[test]
    fn removed_node_restores_at_same_position() {
        let mut state = ClusterState::new();
        let nodes: Vec<Node> = (0..3)
            .map(|_| Node::new(NodeSpec::new(1, 1, 1, 1024)))
            .collect();
        for node in &nodes {
            state.insert_node(node.clone());
        }

        let (position, removed) = state.remove_node(&nodes[1].id).unwrap();
        assert_eq!(position, 1);
        assert_eq!(state.node_ids(), &[nodes[0].id, nodes[2].id]);

        state.restore_node(position, removed);
        assert_eq!(
            state.node_ids(),
            &[nodes[0].id, nodes[1].id, nodes[2].id]
        );
    }

    #[test]
    fn remove_unknown_node_is_none() {
        let mut state = ClusterState::new();
        assert!(state.remove_node(&Uuid::new_v4()).is_none());
    }
}
