//! Referral forest built from `(wallet, parent)` rows.
//!
//! Records live in an arena indexed by normalized address. Every traversal
//! is iterative and carries its own visited set, so malformed parent data
//! (self references, loops through ancestors) cannot hang a computation.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::address::{parent_reference, WalletAddress};

/// One stored `(wallet, parent_wallet)` pair, exactly as read from the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentLink {
    pub wallet: String,
    pub parent: Option<String>,
}

impl ParentLink {
    pub fn new(wallet: impl Into<String>, parent: Option<&str>) -> Self {
        Self {
            wallet: wallet.into(),
            parent: parent.map(str::to_string),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamSize {
    pub address: WalletAddress,
    pub size: u64,
}

/// Materialized step of the referral tree. `depth` counts how far the
/// wallet sits below its topmost ancestor (a root's child has depth 1).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyEdge {
    pub wallet: WalletAddress,
    pub parent: WalletAddress,
    pub depth: u32,
}

/// Descendants found at one depth below a wallet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelStat {
    pub depth: u32,
    pub members: u64,
    pub balance: Decimal,
}

/// Generation-stamped visited set; resetting is O(1).
struct Visited {
    stamps: Vec<u32>,
    generation: u32,
}

impl Visited {
    fn new(len: usize) -> Self {
        Self {
            stamps: vec![0; len],
            generation: 0,
        }
    }

    fn reset(&mut self) {
        if self.generation == u32::MAX {
            self.stamps.iter_mut().for_each(|s| *s = 0);
            self.generation = 0;
        }
        self.generation += 1;
    }

    /// Returns false when the slot was already seen in this generation.
    fn insert(&mut self, slot: usize) -> bool {
        if self.stamps[slot] == self.generation {
            return false;
        }
        self.stamps[slot] = self.generation;
        true
    }
}

#[derive(Clone, Debug, Default)]
pub struct ReferralForest {
    index: HashMap<WalletAddress, usize>,
    addresses: Vec<WalletAddress>,
    parents: Vec<Option<usize>>,
    children: Vec<Vec<usize>>,
    // Slots of the wallets that were present as rows, in input order.
    members: Vec<usize>,
    self_references: Vec<WalletAddress>,
    rejected: Vec<String>,
}

impl ReferralForest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the forest. The first row for a wallet wins; sentinel parents
    /// are treated as roots; self references are dropped and recorded.
    pub fn from_links(links: impl IntoIterator<Item = ParentLink>) -> Self {
        let mut forest = Self::new();
        let mut pending = Vec::new();

        for link in links {
            let wallet = match WalletAddress::parse(&link.wallet) {
                Ok(wallet) => wallet,
                Err(_) => {
                    forest.rejected.push(link.wallet);
                    continue;
                }
            };
            if forest.index.contains_key(&wallet) {
                continue;
            }
            let slot = forest.intern(wallet);
            forest.members.push(slot);
            pending.push((slot, parent_reference(link.parent.as_deref())));
        }

        for (slot, parent) in pending {
            let Some(parent) = parent else { continue };
            if parent == forest.addresses[slot] {
                forest.self_references.push(parent);
                continue;
            }
            let parent_slot = forest.intern(parent);
            forest.parents[slot] = Some(parent_slot);
            forest.children[parent_slot].push(slot);
        }

        forest
    }

    fn intern(&mut self, address: WalletAddress) -> usize {
        if let Some(slot) = self.index.get(&address) {
            return *slot;
        }
        let slot = self.addresses.len();
        self.index.insert(address.clone(), slot);
        self.addresses.push(address);
        self.parents.push(None);
        self.children.push(Vec::new());
        slot
    }

    fn slot(&self, address: &str) -> Option<usize> {
        let normalized = WalletAddress::parse(address).ok()?;
        self.index.get(&normalized).copied()
    }

    /// Number of wallets that were supplied as rows.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.slot(address).is_some()
    }

    pub fn members(&self) -> impl Iterator<Item = &WalletAddress> {
        self.members.iter().map(|slot| &self.addresses[*slot])
    }

    pub fn self_references(&self) -> &[WalletAddress] {
        &self.self_references
    }

    pub fn rejected(&self) -> &[String] {
        &self.rejected
    }

    pub fn parent_of(&self, address: &str) -> Option<&WalletAddress> {
        let parent = self.parents[self.slot(address)?]?;
        Some(&self.addresses[parent])
    }

    pub fn direct_children(&self, address: &str) -> Vec<&WalletAddress> {
        match self.slot(address) {
            Some(slot) => self.children[slot]
                .iter()
                .map(|child| &self.addresses[*child])
                .collect(),
            None => Vec::new(),
        }
    }

    fn count_descendants(&self, root: usize, visited: &mut Visited, stack: &mut Vec<usize>) -> u64 {
        visited.reset();
        visited.insert(root);
        stack.clear();
        stack.extend_from_slice(&self.children[root]);

        let mut count = 0u64;
        while let Some(slot) = stack.pop() {
            if !visited.insert(slot) {
                continue;
            }
            count += 1;
            stack.extend_from_slice(&self.children[slot]);
        }
        count
    }

    /// Total transitive downline of `address`; `None` if it is unknown.
    pub fn team_size(&self, address: &str) -> Option<u64> {
        let slot = self.slot(address)?;
        let mut visited = Visited::new(self.addresses.len());
        Some(self.count_descendants(slot, &mut visited, &mut Vec::new()))
    }

    /// Team size of every row wallet, in input order.
    pub fn team_sizes(&self) -> Vec<TeamSize> {
        let mut visited = Visited::new(self.addresses.len());
        let mut stack = Vec::new();
        self.members
            .iter()
            .map(|slot| TeamSize {
                address: self.addresses[*slot].clone(),
                size: self.count_descendants(*slot, &mut visited, &mut stack),
            })
            .collect()
    }

    /// Upline of `address`, nearest first, at most `limit` entries.
    pub fn ancestry(&self, address: &str, limit: usize) -> Vec<WalletAddress> {
        let Some(start) = self.slot(address) else {
            return Vec::new();
        };
        let mut chain = Vec::new();
        let mut visited = Visited::new(self.addresses.len());
        visited.reset();
        visited.insert(start);
        let mut current = start;
        while chain.len() < limit {
            let Some(parent) = self.parents[current] else { break };
            if !visited.insert(parent) {
                break;
            }
            chain.push(self.addresses[parent].clone());
            current = parent;
        }
        chain
    }

    fn depth_of_slot(&self, start: usize, visited: &mut Visited) -> u32 {
        visited.reset();
        visited.insert(start);
        let mut depth = 0;
        let mut current = start;
        while let Some(parent) = self.parents[current] {
            if !visited.insert(parent) {
                break;
            }
            depth += 1;
            current = parent;
        }
        depth
    }

    /// Distance below the topmost ancestor; roots have depth 0.
    pub fn depth_of(&self, address: &str) -> Option<u32> {
        let slot = self.slot(address)?;
        let mut visited = Visited::new(self.addresses.len());
        Some(self.depth_of_slot(slot, &mut visited))
    }

    /// One edge per row wallet that has a parent.
    pub fn hierarchy_edges(&self) -> Vec<HierarchyEdge> {
        let mut visited = Visited::new(self.addresses.len());
        self.members
            .iter()
            .filter_map(|slot| {
                let parent = self.parents[*slot]?;
                Some(HierarchyEdge {
                    wallet: self.addresses[*slot].clone(),
                    parent: self.addresses[parent].clone(),
                    depth: self.depth_of_slot(*slot, &mut visited),
                })
            })
            .collect()
    }

    /// True when making `parent` the parent of `wallet` would close a loop.
    pub fn creates_cycle(&self, wallet: &WalletAddress, parent: &WalletAddress) -> bool {
        if wallet == parent {
            return true;
        }
        if !self.index.contains_key(wallet) {
            return false;
        }
        self.ancestry(parent.as_str(), self.addresses.len())
            .iter()
            .any(|ancestor| ancestor == wallet)
    }

    /// Groups the downline of `address` by depth, `1..=max_depth`.
    /// Trailing empty levels are omitted.
    pub fn team_levels<F>(&self, address: &str, max_depth: u32, balance_of: F) -> Vec<LevelStat>
    where
        F: Fn(&WalletAddress) -> Decimal,
    {
        let Some(root) = self.slot(address) else {
            return Vec::new();
        };
        let mut visited = Visited::new(self.addresses.len());
        visited.reset();
        visited.insert(root);

        let mut levels = Vec::new();
        let mut frontier = vec![root];
        for depth in 1..=max_depth {
            let mut next = Vec::new();
            for slot in &frontier {
                for child in &self.children[*slot] {
                    if visited.insert(*child) {
                        next.push(*child);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            levels.push(LevelStat {
                depth,
                members: next.len() as u64,
                balance: next
                    .iter()
                    .map(|slot| balance_of(&self.addresses[*slot]))
                    .sum(),
            });
            frontier = next;
        }
        levels
    }
}
