//! In-memory store with scripted faults, shared by the integration tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dc_core::{
    CloneConfig, Config, Error, ListOptions, ListPage, NodeKind, RemoteNode, RemoteStore,
    Result, RetryBuilder, RetrySettings,
};

/// Id of the folder every test tree hangs off
pub const ROOT: &str = "root";

/// Which store call a fault applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// Keyed by `"{folder_id}@{offset}"`, see [`list_key`]
    List,
    /// Keyed by node id
    Get,
    /// Keyed by source id
    Copy,
    /// Keyed by folder name
    CreateFolder,
    /// Keyed by node id
    Transfer,
}

pub fn list_key(folder_id: &str, offset: usize) -> String {
    format!("{folder_id}@{offset}")
}

struct Fault {
    remaining: usize,
    make: fn(&str) -> Error,
}

#[derive(Debug, Clone)]
struct Entry {
    node: RemoteNode,
    seq: u64,
    owner: Option<String>,
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
    next_seq: u64,
    next_id: u64,
    faults: HashMap<(Op, String), VecDeque<Fault>>,
    restricted: HashSet<String>,
    calls: HashMap<(Op, String), usize>,
}

impl State {
    fn insert(&mut self, node: RemoteNode) {
        self.next_seq += 1;
        let entry = Entry {
            node,
            seq: self.next_seq,
            owner: None,
        };
        self.entries.insert(entry.node.id.clone(), entry);
    }

    fn fresh_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    /// Count the call and pop the next scripted fault for it
    fn intercept(&mut self, op: Op, key: &str) -> Result<()> {
        *self.calls.entry((op, key.to_string())).or_default() += 1;

        let Some(queue) = self.faults.get_mut(&(op, key.to_string())) else {
            return Ok(());
        };
        let Some(fault) = queue.front_mut() else {
            return Ok(());
        };
        let error = (fault.make)(key);
        fault.remaining -= 1;
        if fault.remaining == 0 {
            queue.pop_front();
        }
        Err(error)
    }

    fn children(&self, folder_id: &str) -> Vec<RemoteNode> {
        let mut children: Vec<&Entry> = self
            .entries
            .values()
            .filter(|e| e.node.parents.iter().any(|p| p == folder_id))
            .collect();
        children.sort_by_key(|e| e.seq);
        children.into_iter().map(|e| e.node.clone()).collect()
    }
}

/// Counts copies in flight; decremented on drop so cancelled calls are released
struct InFlight<'a>(&'a MemoryStore);

impl<'a> InFlight<'a> {
    fn enter(store: &'a MemoryStore) -> Self {
        let now = store.copies_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        store.peak_copies.fetch_max(now, Ordering::SeqCst);
        Self(store)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.copies_in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct MemoryStore {
    state: Mutex<State>,
    copy_delay: Duration,
    list_delay: Duration,
    copies_in_flight: AtomicUsize,
    peak_copies: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let mut state = State::default();
        state.insert(RemoteNode::folder(ROOT, "My Drive"));
        Self {
            state: Mutex::new(state),
            copy_delay: Duration::ZERO,
            list_delay: Duration::ZERO,
            copies_in_flight: AtomicUsize::new(0),
            peak_copies: AtomicUsize::new(0),
        }
    }

    /// Make every copy take at least `delay`
    pub fn with_copy_delay(mut self, delay: Duration) -> Self {
        self.copy_delay = delay;
        self
    }

    /// Make every list call take at least `delay`
    pub fn with_list_delay(mut self, delay: Duration) -> Self {
        self.list_delay = delay;
        self
    }

    pub fn add_folder(&self, id: &str, name: &str, parent: &str) -> &Self {
        let node = RemoteNode::folder(id, name).with_parent(parent);
        self.state.lock().unwrap().insert(node);
        self
    }

    pub fn add_object(&self, id: &str, name: &str, size: u64, parent: &str) -> &Self {
        let node = RemoteNode::object(id, name, size).with_parent(parent);
        self.state.lock().unwrap().insert(node);
        self
    }

    /// Add another parent to an existing node
    pub fn link(&self, id: &str, parent: &str) -> &Self {
        let mut state = self.state.lock().unwrap();
        let entry = state.entries.get_mut(id).expect("link target exists");
        entry.node.parents.push(parent.to_string());
        self
    }

    /// Copies of `id` are refused for permission reasons
    pub fn restrict(&self, id: &str) -> &Self {
        self.state.lock().unwrap().restricted.insert(id.to_string());
        self
    }

    /// Fail the next `times` calls of `op` on `key` with `make(key)`
    pub fn fail(&self, op: Op, key: &str, times: usize, make: fn(&str) -> Error) -> &Self {
        self.state
            .lock()
            .unwrap()
            .faults
            .entry((op, key.to_string()))
            .or_default()
            .push_back(Fault {
                remaining: times,
                make,
            });
        self
    }

    /// Fail every call of `op` on `key`
    pub fn fail_always(&self, op: Op, key: &str, make: fn(&str) -> Error) -> &Self {
        self.fail(op, key, usize::MAX, make)
    }

    pub fn calls(&self, op: Op, key: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(&(op, key.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn peak_copies(&self) -> usize {
        self.peak_copies.load(Ordering::SeqCst)
    }

    pub fn children_of(&self, folder_id: &str) -> Vec<RemoteNode> {
        self.state.lock().unwrap().children(folder_id)
    }

    pub fn child_named(&self, folder_id: &str, name: &str) -> Option<RemoteNode> {
        self.children_of(folder_id)
            .into_iter()
            .find(|n| n.name == name)
    }

    /// Names of the children of `folder_id`, sorted
    pub fn names_in(&self, folder_id: &str) -> Vec<String> {
        let mut names: Vec<_> = self
            .children_of(folder_id)
            .into_iter()
            .map(|n| n.name)
            .collect();
        names.sort();
        names
    }

    pub fn count(&self, kind: NodeKind) -> usize {
        self.state
            .lock()
            .unwrap()
            .entries
            .values()
            .filter(|e| e.node.kind == kind)
            .count()
    }

    pub fn owner_of(&self, id: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .entries
            .get(id)
            .and_then(|e| e.owner.clone())
    }
}

/// Extract the folder id from a `'<id>' in parents...` query
fn parent_in_query(query: &str) -> Option<String> {
    let rest = query.strip_prefix('\'')?;
    let mut id = String::new();
    let mut chars = rest.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => id.push(chars.next()?),
            '\'' => return Some(id),
            c => id.push(c),
        }
    }
    None
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn list_children(&self, query: &str, options: ListOptions) -> Result<ListPage> {
        let folder_id = parent_in_query(query)
            .ok_or_else(|| Error::Unclassified(format!("unsupported query: {query}")))?;
        let offset: usize = match options.page_token.as_deref() {
            Some(token) => token
                .parse()
                .map_err(|_| Error::Unclassified(format!("bad page token: {token}")))?,
            None => 0,
        };
        if !self.list_delay.is_zero() {
            tokio::time::sleep(self.list_delay).await;
        }

        let mut state = self.state.lock().unwrap();
        state.intercept(Op::List, &list_key(&folder_id, offset))?;

        let children = state.children(&folder_id);
        let end = (offset + options.page_size as usize).min(children.len());
        let items = children.get(offset..end).unwrap_or_default().to_vec();
        let next_page_token = (end < children.len()).then(|| end.to_string());
        Ok(ListPage {
            items,
            next_page_token,
        })
    }

    async fn get_node(&self, id: &str) -> Result<RemoteNode> {
        let mut state = self.state.lock().unwrap();
        state.intercept(Op::Get, id)?;
        state
            .entries
            .get(id)
            .map(|e| e.node.clone())
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn copy_node(
        &self,
        id: &str,
        destination_parent_id: &str,
        name: &str,
    ) -> Result<RemoteNode> {
        let _in_flight = InFlight::enter(self);
        if !self.copy_delay.is_zero() {
            tokio::time::sleep(self.copy_delay).await;
        }

        let mut state = self.state.lock().unwrap();
        state.intercept(Op::Copy, id)?;
        if state.restricted.contains(id) {
            return Err(Error::PermissionRestricted(format!(
                "{id} cannot be copied by the user"
            )));
        }
        let source = state
            .entries
            .get(id)
            .map(|e| e.node.clone())
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        if !state.entries.contains_key(destination_parent_id) {
            return Err(Error::NotFound(destination_parent_id.to_string()));
        }

        let copy = RemoteNode {
            id: state.fresh_id("copy"),
            name: name.to_string(),
            parents: vec![destination_parent_id.to_string()],
            ..source
        };
        state.insert(copy.clone());
        Ok(copy)
    }

    async fn create_folder(&self, name: &str, destination_parent_id: &str) -> Result<RemoteNode> {
        let mut state = self.state.lock().unwrap();
        state.intercept(Op::CreateFolder, name)?;
        if !state.entries.contains_key(destination_parent_id) {
            return Err(Error::NotFound(destination_parent_id.to_string()));
        }

        let id = state.fresh_id("dir");
        let folder = RemoteNode::folder(id, name).with_parent(destination_parent_id);
        state.insert(folder.clone());
        Ok(folder)
    }

    async fn transfer_ownership(&self, id: &str, new_owner: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.intercept(Op::Transfer, id)?;
        let entry = state
            .entries
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        entry.owner = Some(new_owner.to_string());
        Ok(())
    }
}

/// Configuration with millisecond backoffs so retry paths run quickly
pub fn fast_config() -> Config {
    Config {
        clone: CloneConfig {
            list_retry_delay_ms: 1,
            ..CloneConfig::default()
        },
        retry: RetrySettings::uniform(
            RetryBuilder::new()
                .max_attempts(3)
                .initial_backoff_ms(1)
                .max_backoff_ms(4)
                .build(),
        ),
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("dc_core=debug")
        .try_init();
}
