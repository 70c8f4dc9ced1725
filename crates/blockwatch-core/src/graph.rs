//! The blockwatch control facade.
//!
//! [`BlockGraph`] owns every node by name together with the event bus their
//! crossing events go to, and exposes the control commands a management
//! client would issue: set and query thresholds, open filters, resize and
//! remove devices.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use blockwatch_block::{BlockNode, MemDevice, WriteThresholdFilter};
use blockwatch_threshold::{EventBus, Transition, WriteThresholdEvent};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::{
    config::{BlockwatchConfig, NodeConfig},
    error::ControlError,
    Result,
};

/// Driver-specific handle kept next to each node.
#[derive(Debug, Clone)]
enum Backing {
    Memory(Arc<MemDevice>),
    Filter(Arc<WriteThresholdFilter>),
}

#[derive(Debug, Clone)]
struct Entry {
    node: Arc<BlockNode>,
    backing: Backing,
}

/// Named block nodes plus the bus their events are published on.
///
/// # Example
///
/// ```rust
/// use blockwatch_core::{BlockGraph, RequestFlags, Transition};
///
/// let graph = BlockGraph::new(16);
/// let mut events = graph.subscribe();
///
/// graph.add_memory_device("disk0", 8 << 20)?;
/// assert_eq!(graph.block_set_write_threshold("disk0", 4 << 20)?, Transition::Armed);
///
/// let disk = graph.find_node("disk0")?;
/// disk.pwrite((4 << 20) - 1024, &[0u8; 2048], RequestFlags::empty())?;
///
/// let event = events.try_recv().unwrap();
/// assert_eq!(event.amount_exceeded, 1024);
/// assert_eq!(graph.query_write_threshold("disk0")?, 0);
/// # Ok::<(), blockwatch_core::ControlError>(())
/// ```
#[derive(Debug)]
pub struct BlockGraph {
    bus: Arc<EventBus>,
    nodes: RwLock<BTreeMap<String, Entry>>,
}

impl BlockGraph {
    /// Creates an empty graph whose bus buffers `event_capacity` events per
    /// subscriber.
    #[must_use]
    pub fn new(event_capacity: usize) -> Self {
        Self {
            bus: Arc::new(EventBus::new(event_capacity)),
            nodes: RwLock::new(BTreeMap::new()),
        }
    }

    /// Builds a graph from a validated config, creating nodes in order.
    ///
    /// # Errors
    ///
    /// Any validation error, and any error from creating a node. Nodes
    /// created before the failure are dropped with the partial graph.
    pub fn from_config(config: &BlockwatchConfig) -> Result<Self> {
        config.validate()?;
        let graph = Self::new(config.events.capacity);

        for node in &config.nodes {
            match node {
                NodeConfig::Memory {
                    node_name,
                    size,
                    write_threshold,
                } => {
                    let node = graph.add_memory_device(node_name, *size)?;
                    if *write_threshold != 0 {
                        node.set_write_threshold(*write_threshold);
                    }
                }
                NodeConfig::WriteThreshold {
                    node_name,
                    file,
                    options,
                } => {
                    graph.open_write_threshold_filter(node_name, file, options)?;
                }
            }
        }

        info!(nodes = config.nodes.len(), "block graph built from config");
        Ok(graph)
    }

    /// The bus every node in this graph publishes on.
    #[must_use]
    pub fn events(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Subscribes to `BLOCK_WRITE_THRESHOLD` events from every node.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<WriteThresholdEvent> {
        self.bus.subscribe()
    }

    /// Adds a sparse in-memory device.
    pub fn add_memory_device(&self, name: &str, size: u64) -> Result<Arc<BlockNode>> {
        let mut nodes = self.write_nodes();
        if nodes.contains_key(name) {
            return Err(ControlError::DuplicateNode(name.to_string()));
        }

        let device = Arc::new(MemDevice::new(size));
        let node = BlockNode::new(name, device.clone(), self.bus.clone());
        nodes.insert(
            name.to_string(),
            Entry {
                node: node.clone(),
                backing: Backing::Memory(device),
            },
        );

        info!(node = name, size, "memory device added");
        Ok(node)
    }

    /// Opens a `write-threshold` filter named `name` over the node `child`.
    ///
    /// # Errors
    ///
    /// [`ControlError::DuplicateNode`], [`ControlError::DeviceNotFound`] for
    /// an unknown child, and [`ControlError::Block`] for bad options. The
    /// graph is unchanged on error.
    pub fn open_write_threshold_filter(
        &self,
        name: &str,
        child: &str,
        options: &Map<String, Value>,
    ) -> Result<Arc<BlockNode>> {
        let mut nodes = self.write_nodes();
        if nodes.contains_key(name) {
            return Err(ControlError::DuplicateNode(name.to_string()));
        }
        let child_node = nodes
            .get(child)
            .map(|entry| entry.node.clone())
            .ok_or_else(|| ControlError::DeviceNotFound(child.to_string()))?;

        let filter = Arc::new(WriteThresholdFilter::open(
            child_node,
            options,
            self.bus.clone(),
        )?);
        let node = BlockNode::new(name, filter.clone(), self.bus.clone());
        nodes.insert(
            name.to_string(),
            Entry {
                node: node.clone(),
                backing: Backing::Filter(filter.clone()),
            },
        );

        info!(
            node = name,
            child,
            threshold = filter.threshold(),
            "write-threshold filter opened"
        );
        Ok(node)
    }

    /// Looks up a node by name.
    pub fn find_node(&self, name: &str) -> Result<Arc<BlockNode>> {
        Ok(self.entry(name)?.node)
    }

    /// Names of all nodes, sorted.
    #[must_use]
    pub fn node_names(&self) -> Vec<String> {
        self.read_nodes().keys().cloned().collect()
    }

    /// Sets the device-attached write threshold of `node_name`. `0`
    /// disables it.
    ///
    /// # Errors
    ///
    /// [`ControlError::DeviceNotFound`] if no such node exists; nothing is
    /// changed in that case.
    pub fn block_set_write_threshold(
        &self,
        node_name: &str,
        threshold_bytes: u64,
    ) -> Result<Transition> {
        let node = self.find_node(node_name)?;
        Ok(node.set_write_threshold(threshold_bytes))
    }

    /// Device-attached write threshold of `node_name`, `0` when none.
    pub fn query_write_threshold(&self, node_name: &str) -> Result<u64> {
        Ok(self.find_node(node_name)?.write_threshold())
    }

    /// Threshold held by the `write-threshold` filter `node_name`.
    pub fn filter_threshold(&self, node_name: &str) -> Result<u64> {
        Ok(self.filter(node_name)?.threshold())
    }

    /// Re-arms, moves or disables the threshold of a filter node.
    pub fn set_filter_threshold(
        &self,
        node_name: &str,
        threshold_bytes: u64,
    ) -> Result<Transition> {
        Ok(self.filter(node_name)?.set_threshold(threshold_bytes))
    }

    /// Grows or shrinks a memory device. Thresholds are left as they are.
    pub fn resize(&self, node_name: &str, size: u64) -> Result<()> {
        match self.entry(node_name)?.backing {
            Backing::Memory(device) => {
                device.resize(size)?;
                info!(node = node_name, size, "memory device resized");
                Ok(())
            }
            Backing::Filter(_) => Err(ControlError::NotAMemoryDevice(node_name.to_string())),
        }
    }

    /// Removes a node. Its device-attached threshold is disabled first so
    /// the notifier registration goes with it.
    ///
    /// # Errors
    ///
    /// [`ControlError::NodeInUse`] while a filter still wraps the node.
    pub fn remove_node(&self, node_name: &str) -> Result<()> {
        let mut nodes = self.write_nodes();
        let target = nodes
            .get(node_name)
            .map(|entry| entry.node.clone())
            .ok_or_else(|| ControlError::DeviceNotFound(node_name.to_string()))?;

        let user = nodes.iter().find_map(|(name, entry)| match &entry.backing {
            Backing::Filter(filter) if Arc::ptr_eq(filter.child(), &target) => Some(name.clone()),
            _ => None,
        });
        if let Some(user) = user {
            return Err(ControlError::NodeInUse {
                node: node_name.to_string(),
                user,
            });
        }

        if target.is_write_threshold_set() {
            target.set_write_threshold(0);
        }
        nodes.remove(node_name);
        debug!(node = node_name, "node removed");
        Ok(())
    }

    fn entry(&self, name: &str) -> Result<Entry> {
        self.read_nodes()
            .get(name)
            .cloned()
            .ok_or_else(|| ControlError::DeviceNotFound(name.to_string()))
    }

    fn filter(&self, name: &str) -> Result<Arc<WriteThresholdFilter>> {
        match self.entry(name)?.backing {
            Backing::Filter(filter) => Ok(filter),
            Backing::Memory(_) => Err(ControlError::NotAFilter(name.to_string())),
        }
    }

    // Each critical section is a single map lookup, insert or remove, so a
    // poisoned map is still consistent.
    fn read_nodes(&self) -> RwLockReadGuard<'_, BTreeMap<String, Entry>> {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_nodes(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Entry>> {
        self.nodes.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for BlockGraph {
    fn default() -> Self {
        Self::new(crate::config::EventConfig::default().capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockwatch_block::RequestFlags;
    use serde_json::json;

    const MIB: u64 = 1024 * 1024;

    fn opts(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_from_config_rejects_oversized_event_capacity() {
        let config: BlockwatchConfig =
            serde_json::from_value(json!({ "events": { "capacity": usize::MAX } })).unwrap();
        assert!(matches!(
            BlockGraph::from_config(&config),
            Err(ControlError::Config(_))
        ));
    }

    #[test]
    fn test_set_write_threshold_unknown_device() {
        let graph = BlockGraph::default();
        graph.add_memory_device("disk0", MIB).unwrap();

        let err = graph.block_set_write_threshold("disk1", 4096).unwrap_err();
        assert!(matches!(err, ControlError::DeviceNotFound(name) if name == "disk1"));
        assert_eq!(graph.query_write_threshold("disk0").unwrap(), 0);
    }

    #[test]
    fn test_set_and_query_write_threshold() {
        let graph = BlockGraph::default();
        graph.add_memory_device("disk0", 8 * MIB).unwrap();

        assert_eq!(
            graph.block_set_write_threshold("disk0", 4 * MIB).unwrap(),
            Transition::Armed
        );
        assert_eq!(
            graph.block_set_write_threshold("disk0", 6 * MIB).unwrap(),
            Transition::Updated
        );
        assert_eq!(graph.query_write_threshold("disk0").unwrap(), 6 * MIB);
        assert_eq!(
            graph.block_set_write_threshold("disk0", 0).unwrap(),
            Transition::Disarmed
        );
        assert_eq!(
            graph.block_set_write_threshold("disk0", 0).unwrap(),
            Transition::Ignored
        );
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let graph = BlockGraph::default();
        graph.add_memory_device("disk0", MIB).unwrap();
        assert!(matches!(
            graph.add_memory_device("disk0", MIB),
            Err(ControlError::DuplicateNode(_))
        ));
        assert!(matches!(
            graph.open_write_threshold_filter("disk0", "disk0", &Map::new()),
            Err(ControlError::DuplicateNode(_))
        ));
    }

    #[test]
    fn test_filter_commands() {
        let graph = BlockGraph::default();
        graph.add_memory_device("disk0", 8 * MIB).unwrap();
        graph
            .open_write_threshold_filter("wt0", "disk0", &opts(json!({ "write-threshold": MIB })))
            .unwrap();

        assert_eq!(graph.filter_threshold("wt0").unwrap(), MIB);
        assert_eq!(
            graph.set_filter_threshold("wt0", 2 * MIB).unwrap(),
            Transition::Updated
        );
        assert_eq!(graph.filter_threshold("wt0").unwrap(), 2 * MIB);
        assert!(matches!(
            graph.filter_threshold("disk0"),
            Err(ControlError::NotAFilter(_))
        ));
        assert!(matches!(
            graph.resize("wt0", MIB),
            Err(ControlError::NotAMemoryDevice(_))
        ));
    }

    #[test]
    fn test_bad_filter_options_leave_graph_unchanged() {
        let graph = BlockGraph::default();
        graph.add_memory_device("disk0", MIB).unwrap();

        let err = graph
            .open_write_threshold_filter("wt0", "disk0", &opts(json!({ "write-threshold": -1 })))
            .unwrap_err();
        assert!(matches!(err, ControlError::Block(_)));
        assert!(matches!(
            graph.open_write_threshold_filter("wt1", "disk9", &Map::new()),
            Err(ControlError::DeviceNotFound(_))
        ));
        assert_eq!(graph.node_names(), vec!["disk0".to_string()]);
    }

    #[test]
    fn test_remove_node() {
        let graph = BlockGraph::default();
        let disk = graph.add_memory_device("disk0", MIB).unwrap();
        graph
            .open_write_threshold_filter("wt0", "disk0", &Map::new())
            .unwrap();
        graph.block_set_write_threshold("disk0", 4096).unwrap();

        assert!(matches!(
            graph.remove_node("disk0"),
            Err(ControlError::NodeInUse { user, .. }) if user == "wt0"
        ));

        graph.remove_node("wt0").unwrap();
        graph.remove_node("disk0").unwrap();
        assert!(graph.node_names().is_empty());
        assert!(!disk.is_write_threshold_set());
        assert_eq!(disk.before_write_notifier_count(), 0);
        assert!(matches!(
            graph.remove_node("disk0"),
            Err(ControlError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn test_resize_then_write_past_old_end() {
        let graph = BlockGraph::default();
        let mut events = graph.subscribe();
        let disk = graph.add_memory_device("disk0", MIB).unwrap();
        graph.block_set_write_threshold("disk0", MIB).unwrap();

        assert!(disk.pwrite(MIB, &[1u8; 512], RequestFlags::empty()).is_err());
        graph.resize("disk0", 2 * MIB).unwrap();
        disk.pwrite(MIB, &[1u8; 512], RequestFlags::empty()).unwrap();

        assert_eq!(events.try_recv().unwrap().amount_exceeded, 512);
    }
}
