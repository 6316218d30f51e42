//! Level-compressed trie for IPv4 longest-prefix match
//!
//! Internal branch nodes index `bits` key bits starting at `pos` and may skip
//! any number of bits above `pos`. Leaves hold every prefix length that
//! shares the same masked key, longest first. Nodes live in an arena and
//! refer to each other by index; freed slots are recycled.
//!
//! Branches are resized after every mutation: doubled while enough children
//! are themselves full branches, halved while too many slots are empty, and
//! dropped in favour of their only child.

use crate::{Error, Result};

pub type NodeId = usize;

const KEY_BITS: u32 = 32;

/// Fill percentage above which a branch is doubled
const INFLATE_THRESHOLD: u64 = 50;
const INFLATE_THRESHOLD_ROOT: u64 = 30;
/// Fill percentage below which a branch is halved
const HALVE_THRESHOLD: u64 = 25;
const HALVE_THRESHOLD_ROOT: u64 = 15;
/// Resize steps allowed per node per mutation
const MAX_WORK: u32 = 10;

/// One prefix length stored at a leaf
#[derive(Debug, Clone)]
pub struct LeafEntry<V> {
    pub prefix_len: u8,
    pub mask: u32,
    pub value: V,
}

#[derive(Debug)]
struct Leaf<V> {
    key: u32,
    parent: Option<NodeId>,
    /// Sorted by prefix length, longest first
    entries: Vec<LeafEntry<V>>,
}

#[derive(Debug)]
struct Branch {
    key: u32,
    parent: Option<NodeId>,
    pos: u32,
    bits: u32,
    full_children: u32,
    empty_children: u32,
    children: Vec<Option<NodeId>>,
}

#[derive(Debug)]
enum Node<V> {
    Leaf(Leaf<V>),
    Branch(Branch),
}

/// Arena-backed LC-trie keyed on host-order IPv4 addresses
#[derive(Debug)]
pub struct LcTrie<V> {
    nodes: Vec<Option<Node<V>>>,
    free: Vec<NodeId>,
    root: Option<NodeId>,
    len: usize,
}

pub fn mask(prefix_len: u8) -> u32 {
    crate::protocol::prefix_mask(prefix_len)
}

/// `bits` bits of `key` starting `offset` bits from the top.
fn extract_bits(key: u32, offset: u32, bits: u32) -> u32 {
    if bits == 0 || offset >= KEY_BITS {
        0
    } else {
        (key << offset) >> (KEY_BITS - bits.min(KEY_BITS))
    }
}

/// True if `a` and `b` agree on `bits` bits starting at `offset`.
fn sub_equals(a: u32, offset: u32, bits: u32, b: u32) -> bool {
    if bits == 0 || offset >= KEY_BITS {
        return true;
    }
    let bits = bits.min(KEY_BITS);
    ((a ^ b) << offset) >> (KEY_BITS - bits) == 0
}

/// First bit position at or after `offset` where `a` and `b` differ.
fn mismatch(a: u32, offset: u32, b: u32) -> u32 {
    let diff = a ^ b;
    if diff == 0 {
        return 0;
    }
    let shifted = if offset >= KEY_BITS { 0 } else { diff << offset };
    if shifted == 0 {
        return KEY_BITS - 1;
    }
    offset + shifted.leading_zeros()
}

/// Keep only the top `len` bits of `key`.
fn mask_pfx(key: u32, len: u32) -> u32 {
    if len == 0 {
        0
    } else if len >= KEY_BITS {
        key
    } else {
        key >> (KEY_BITS - len) << (KEY_BITS - len)
    }
}

impl<V> Default for LcTrie<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> LcTrie<V> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            root: None,
            len: 0,
        }
    }

    /// Number of stored entries (not nodes)
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    // ========================================================================
    // Arena helpers
    // ========================================================================

    fn alloc(&mut self, node: Node<V>) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.nodes[id] = Some(node);
                id
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, id: NodeId) {
        self.nodes[id] = None;
        self.free.push(id);
    }

    fn node(&self, id: NodeId) -> &Node<V> {
        match &self.nodes[id] {
            Some(node) => node,
            None => unreachable!("trie node {} used after free", id),
        }
    }

    fn branch(&self, id: NodeId) -> &Branch {
        match self.node(id) {
            Node::Branch(b) => b,
            Node::Leaf(_) => unreachable!("trie node {} is not a branch", id),
        }
    }

    fn branch_mut(&mut self, id: NodeId) -> &mut Branch {
        match &mut self.nodes[id] {
            Some(Node::Branch(b)) => b,
            _ => unreachable!("trie node {} is not a branch", id),
        }
    }

    fn leaf(&self, id: NodeId) -> &Leaf<V> {
        match self.node(id) {
            Node::Leaf(l) => l,
            Node::Branch(_) => unreachable!("trie node {} is not a leaf", id),
        }
    }

    fn leaf_mut(&mut self, id: NodeId) -> &mut Leaf<V> {
        match &mut self.nodes[id] {
            Some(Node::Leaf(l)) => l,
            _ => unreachable!("trie node {} is not a leaf", id),
        }
    }

    fn is_leaf(&self, id: NodeId) -> bool {
        matches!(self.node(id), Node::Leaf(_))
    }

    fn key_of(&self, id: NodeId) -> u32 {
        match self.node(id) {
            Node::Leaf(l) => l.key,
            Node::Branch(b) => b.key,
        }
    }

    fn parent(&self, id: NodeId) -> Option<NodeId> {
        match self.node(id) {
            Node::Leaf(l) => l.parent,
            Node::Branch(b) => b.parent,
        }
    }

    fn set_parent(&mut self, id: NodeId, parent: Option<NodeId>) {
        match &mut self.nodes[id] {
            Some(Node::Leaf(l)) => l.parent = parent,
            Some(Node::Branch(b)) => b.parent = parent,
            None => unreachable!("trie node {} used after free", id),
        }
    }

    fn child(&self, tn: NodeId, index: u32) -> Option<NodeId> {
        self.branch(tn).children[index as usize]
    }

    fn new_branch(&mut self, key: u32, pos: u32, bits: u32) -> NodeId {
        let len = 1usize << bits;
        self.alloc(Node::Branch(Branch {
            key,
            parent: None,
            pos,
            bits,
            full_children: 0,
            empty_children: len as u32,
            children: vec![None; len],
        }))
    }

    /// A child is "full" when it is a branch that skips no bits below `tn`.
    fn is_full(&self, tn: NodeId, child: Option<NodeId>) -> bool {
        let b = self.branch(tn);
        let end = b.pos + b.bits;
        match child.and_then(|c| self.nodes[c].as_ref()) {
            Some(Node::Branch(c)) => c.pos == end,
            _ => false,
        }
    }

    fn put_child(&mut self, tn: NodeId, index: u32, n: Option<NodeId>) {
        self.put_child_reorg(tn, index, n, None);
    }

    /// Set child `index` of `tn`, keeping the empty/full counts current.
    fn put_child_reorg(&mut self, tn: NodeId, index: u32, n: Option<NodeId>, wasfull: Option<bool>) {
        let old = self.child(tn, index);
        let wasfull = wasfull.unwrap_or_else(|| self.is_full(tn, old));
        let isfull = self.is_full(tn, n);

        let b = self.branch_mut(tn);
        match (old.is_some(), n.is_some()) {
            (true, false) => b.empty_children += 1,
            (false, true) => b.empty_children -= 1,
            _ => {}
        }
        if wasfull && !isfull {
            b.full_children -= 1;
        } else if !wasfull && isfull {
            b.full_children += 1;
        }
        b.children[index as usize] = n;

        if let Some(n) = n {
            self.set_parent(n, Some(tn));
        }
    }

    // ========================================================================
    // Resizing
    // ========================================================================

    fn inflate(&mut self, old: NodeId) -> NodeId {
        let (key, pos, bits) = {
            let b = self.branch(old);
            (b.key, b.pos, b.bits)
        };
        let olen = 1u32 << bits;
        let tn = self.new_branch(key, pos, bits + 1);

        // Split targets for full children wider than one bit
        for i in 0..olen {
            let Some(c) = self.child(old, i) else { continue };
            if let Node::Branch(inode) = self.node(c) {
                if inode.pos == pos + bits && inode.bits > 1 {
                    let m = 0x8000_0000u32 >> inode.pos;
                    let (ikey, ipos, ibits) = (inode.key, inode.pos, inode.bits);
                    let left = self.new_branch(ikey & !m, ipos + 1, ibits - 1);
                    let right = self.new_branch(ikey | m, ipos + 1, ibits - 1);
                    self.put_child(tn, 2 * i, Some(left));
                    self.put_child(tn, 2 * i + 1, Some(right));
                }
            }
        }

        for i in 0..olen {
            let Some(node) = self.child(old, i) else { continue };

            let skips = match self.node(node) {
                Node::Leaf(_) => true,
                Node::Branch(b) => b.pos > pos + bits,
            };
            if skips {
                let bit = extract_bits(self.key_of(node), pos + bits, 1);
                self.put_child(tn, 2 * i + bit, Some(node));
                continue;
            }

            let (ibits, ichildren) = {
                let inode = self.branch(node);
                (inode.bits, inode.children.clone())
            };

            if ibits == 1 {
                self.put_child(tn, 2 * i, ichildren[0]);
                self.put_child(tn, 2 * i + 1, ichildren[1]);
                self.release(node);
                continue;
            }

            let (Some(left), Some(right)) = (self.child(tn, 2 * i), self.child(tn, 2 * i + 1))
            else {
                unreachable!("inflate split nodes missing");
            };
            self.put_child(tn, 2 * i, None);
            self.put_child(tn, 2 * i + 1, None);

            let size = ichildren.len() / 2;
            for j in 0..size {
                self.put_child(left, j as u32, ichildren[j]);
                self.put_child(right, j as u32, ichildren[j + size]);
            }
            let left = self.resize(left);
            self.put_child(tn, 2 * i, left);
            let right = self.resize(right);
            self.put_child(tn, 2 * i + 1, right);

            self.release(node);
        }

        self.set_parent(tn, self.parent(old));
        self.release(old);
        tn
    }

    fn halve(&mut self, old: NodeId) -> NodeId {
        let (key, pos, bits) = {
            let b = self.branch(old);
            (b.key, b.pos, b.bits)
        };
        let olen = 1u32 << bits;
        let tn = self.new_branch(key, pos, bits - 1);
        let new_end = pos + bits - 1;

        for i in (0..olen).step_by(2) {
            if let (Some(left), Some(_)) = (self.child(old, i), self.child(old, i + 1)) {
                let bin = self.new_branch(self.key_of(left), new_end, 1);
                self.put_child(tn, i / 2, Some(bin));
            }
        }

        for i in (0..olen).step_by(2) {
            match (self.child(old, i), self.child(old, i + 1)) {
                (None, None) => {}
                (None, Some(only)) | (Some(only), None) => {
                    self.put_child(tn, i / 2, Some(only));
                }
                (Some(left), Some(right)) => {
                    let Some(bin) = self.child(tn, i / 2) else {
                        unreachable!("halve binary node missing");
                    };
                    self.put_child(tn, i / 2, None);
                    self.put_child(bin, 0, Some(left));
                    self.put_child(bin, 1, Some(right));
                    let resized = self.resize(bin);
                    self.put_child(tn, i / 2, resized);
                }
            }
        }

        self.set_parent(tn, self.parent(old));
        self.release(old);
        tn
    }

    fn resize(&mut self, tn: NodeId) -> Option<NodeId> {
        let (len, empty) = {
            let b = self.branch(tn);
            (1u64 << b.bits, b.empty_children as u64)
        };
        if empty == len {
            self.release(tn);
            return None;
        }
        if empty == len - 1 {
            return Some(self.collapse(tn));
        }

        let (inflate_thr, halve_thr) = if self.branch(tn).parent.is_none() {
            (INFLATE_THRESHOLD_ROOT, HALVE_THRESHOLD_ROOT)
        } else {
            (INFLATE_THRESHOLD, HALVE_THRESHOLD)
        };

        let mut tn = tn;
        let mut work = MAX_WORK;
        loop {
            let b = self.branch(tn);
            if b.full_children == 0 || work == 0 {
                break;
            }
            work -= 1;
            let len = 1u64 << b.bits;
            let used = b.full_children as u64 + len - b.empty_children as u64;
            if 50 * used < inflate_thr * len {
                break;
            }
            tn = self.inflate(tn);
        }

        // At least one inflate was attempted
        if work != MAX_WORK {
            return Some(tn);
        }

        let mut work = MAX_WORK;
        loop {
            let b = self.branch(tn);
            if b.bits <= 1 || work == 0 {
                break;
            }
            work -= 1;
            let len = 1u64 << b.bits;
            if 100 * (len - b.empty_children as u64) >= halve_thr * len {
                break;
            }
            tn = self.halve(tn);
        }

        let b = self.branch(tn);
        if b.empty_children as u64 == (1u64 << b.bits) - 1 {
            return Some(self.collapse(tn));
        }
        Some(tn)
    }

    /// Replace a branch by its only child.
    fn collapse(&mut self, tn: NodeId) -> NodeId {
        let only = self.branch(tn).children.iter().flatten().copied().next();
        let Some(child) = only else {
            unreachable!("collapse on empty branch");
        };
        self.set_parent(child, None);
        self.release(tn);
        child
    }

    fn rebalance(&mut self, start: NodeId) {
        let key = self.key_of(start);
        let mut tn = start;

        while let Some(tp) = self.parent(tn) {
            let (ppos, pbits) = {
                let b = self.branch(tp);
                (b.pos, b.bits)
            };
            let cindex = extract_bits(key, ppos, pbits);
            let wasfull = self.is_full(tp, self.child(tp, cindex));
            let resized = if self.is_leaf(tn) {
                Some(tn)
            } else {
                self.resize(tn)
            };
            self.put_child_reorg(tp, cindex, resized, Some(wasfull));
            tn = tp;
        }

        let root = if self.is_leaf(tn) {
            Some(tn)
        } else {
            self.resize(tn)
        };
        if let Some(r) = root {
            self.set_parent(r, None);
        }
        self.root = root;
    }

    // ========================================================================
    // Public operations
    // ========================================================================

    /// Leaf holding exactly `key`, if any
    fn find_leaf(&self, key: u32) -> Option<NodeId> {
        let mut pos = 0;
        let mut n = self.root;
        while let Some(id) = n {
            match self.node(id) {
                Node::Leaf(l) => return (l.key == key).then_some(id),
                Node::Branch(b) => {
                    if !sub_equals(b.key, pos, b.pos.saturating_sub(pos), key) {
                        return None;
                    }
                    pos = b.pos + b.bits;
                    n = b.children[extract_bits(key, b.pos, b.bits) as usize];
                }
            }
        }
        None
    }

    /// Store `value` under `key/prefix_len`; `key` must already be masked.
    ///
    /// Entries of equal length keep insertion order.
    pub fn insert(&mut self, key: u32, prefix_len: u8, value: V) -> Result<()> {
        if prefix_len > 32 {
            return Err(Error::InvalidArgument(format!(
                "prefix length {} exceeds 32",
                prefix_len
            )));
        }
        let entry = LeafEntry {
            prefix_len,
            mask: mask(prefix_len),
            value,
        };

        let mut pos = 0;
        let mut tp: Option<NodeId> = None;
        let mut n = self.root;
        while let Some(id) = n {
            let Node::Branch(b) = self.node(id) else { break };
            if !sub_equals(b.key, pos, b.pos.saturating_sub(pos), key) {
                break;
            }
            tp = Some(id);
            pos = b.pos + b.bits;
            n = b.children[extract_bits(key, b.pos, b.bits) as usize];
        }

        // Same key: add another length to the existing leaf
        if let Some(id) = n {
            if let Node::Leaf(l) = self.node(id) {
                if l.key == key {
                    let leaf = self.leaf_mut(id);
                    let at = leaf
                        .entries
                        .iter()
                        .position(|e| e.prefix_len < prefix_len)
                        .unwrap_or(leaf.entries.len());
                    leaf.entries.insert(at, entry);
                    self.len += 1;
                    return Ok(());
                }
            }
        }

        let leaf = self.alloc(Node::Leaf(Leaf {
            key,
            parent: None,
            entries: vec![entry],
        }));

        let rebalance_from = match (self.root, n, tp) {
            // Empty slot under an existing branch
            (Some(_), None, Some(tp)) => {
                let (ppos, pbits) = {
                    let b = self.branch(tp);
                    (b.pos, b.bits)
                };
                self.put_child(tp, extract_bits(key, ppos, pbits), Some(leaf));
                tp
            }
            (Some(_), None, None) => {
                self.release(leaf);
                return Err(Error::Internal("trie descent lost its parent".into()));
            }
            // Mismatching leaf or branch (or empty trie): split with a 1-bit branch
            _ => {
                let pos = tp
                    .map(|t| {
                        let b = self.branch(t);
                        b.pos + b.bits
                    })
                    .unwrap_or(0);
                let (newpos, tn) = match n {
                    Some(n) => {
                        let nkey = self.key_of(n);
                        let newpos = mismatch(key, pos, nkey);
                        (newpos, self.new_branch(nkey, newpos, 1))
                    }
                    None => (0, self.new_branch(key, 0, 1)),
                };
                self.set_parent(tn, tp);
                let missbit = extract_bits(key, newpos, 1);
                self.put_child(tn, missbit, Some(leaf));
                self.put_child(tn, 1 - missbit, n);

                match tp {
                    Some(tp) => {
                        let (ppos, pbits) = {
                            let b = self.branch(tp);
                            (b.pos, b.bits)
                        };
                        self.put_child(tp, extract_bits(key, ppos, pbits), Some(tn));
                        tp
                    }
                    None => {
                        self.root = Some(tn);
                        tn
                    }
                }
            }
        };

        self.len += 1;
        self.rebalance(rebalance_from);
        Ok(())
    }

    /// Exact-match entry for `key/prefix_len` accepted by `pred`.
    pub fn get(&self, key: u32, prefix_len: u8, pred: impl Fn(&V) -> bool) -> Option<&V> {
        let leaf = self.find_leaf(key)?;
        self.leaf(leaf)
            .entries
            .iter()
            .find(|e| e.prefix_len == prefix_len && pred(&e.value))
            .map(|e| &e.value)
    }

    pub fn get_mut(
        &mut self,
        key: u32,
        prefix_len: u8,
        pred: impl Fn(&V) -> bool,
    ) -> Option<&mut V> {
        let leaf = self.find_leaf(key)?;
        self.leaf_mut(leaf)
            .entries
            .iter_mut()
            .find(|e| e.prefix_len == prefix_len && pred(&e.value))
            .map(|e| &mut e.value)
    }

    /// Remove the first entry for `key/prefix_len` accepted by `pred`.
    pub fn remove(&mut self, key: u32, prefix_len: u8, pred: impl Fn(&V) -> bool) -> Option<V> {
        let leaf = self.find_leaf(key)?;
        let entries = &mut self.leaf_mut(leaf).entries;
        let idx = entries
            .iter()
            .position(|e| e.prefix_len == prefix_len && pred(&e.value))?;
        let removed = entries.remove(idx);
        let now_empty = entries.is_empty();
        self.len -= 1;

        if now_empty {
            match self.leaf(leaf).parent {
                Some(tp) => {
                    let (ppos, pbits) = {
                        let b = self.branch(tp);
                        (b.pos, b.bits)
                    };
                    self.put_child(tp, extract_bits(key, ppos, pbits), None);
                    self.release(leaf);
                    self.rebalance(tp);
                }
                None => {
                    self.release(leaf);
                    self.root = None;
                }
            }
        }
        Some(removed.value)
    }

    /// Longest-prefix match for `addr` among entries accepted by `pred`.
    ///
    /// Descends by the address bits; on a dead end it clears the lowest set
    /// index bit of the current branch (shortening the candidate prefix) and
    /// retries, walking up to the parent once all bits are chopped.
    pub fn lookup(&self, addr: u32, pred: impl Fn(&V) -> bool) -> Option<&LeafEntry<V>> {
        let root = self.root?;
        if let Node::Leaf(l) = self.node(root) {
            return Self::check_leaf(l, addr, &pred);
        }

        let mut pn = root;
        let mut chopped_off: u32 = 0;
        let mut cindex: u32 = 0;
        let mut cpl: u32 = KEY_BITS;

        loop {
            let b = self.branch(pn);
            let (pos, bits) = (b.pos, b.bits);

            if chopped_off == 0 {
                cindex = extract_bits(mask_pfx(addr, cpl), pos, bits);
            }

            let mut dead_end = true;
            if let Some(n) = b.children[cindex as usize] {
                match self.node(n) {
                    Node::Leaf(l) => {
                        if let Some(found) = Self::check_leaf(l, addr, &pred) {
                            return Some(found);
                        }
                    }
                    Node::Branch(cn) => {
                        let mut viable = true;
                        if cpl < pos + bits
                            && (extract_bits(cn.key, cpl, cn.pos - cpl) != 0
                                || cn.children[0].is_none())
                        {
                            viable = false;
                        }
                        if viable {
                            let pref_mismatch = mask_pfx(cn.key ^ addr, cn.pos);
                            if pref_mismatch != 0 {
                                let mp = pref_mismatch.leading_zeros();
                                if extract_bits(cn.key, mp, cn.pos - mp) != 0 {
                                    viable = false;
                                } else if cpl >= cn.pos {
                                    cpl = mp;
                                }
                            }
                        }
                        if viable {
                            pn = n;
                            chopped_off = 0;
                            dead_end = false;
                        }
                    }
                }
            }
            if !dead_end {
                continue;
            }

            // Backtrack
            loop {
                chopped_off += 1;
                let b = self.branch(pn);
                while chopped_off <= b.bits && cindex & (1 << (chopped_off - 1)) == 0 {
                    chopped_off += 1;
                }

                let limit = (b.pos + b.bits) as i64 - chopped_off as i64;
                if limit >= 0 && cpl as i64 > limit {
                    cpl = limit as u32;
                }

                if chopped_off <= b.bits {
                    cindex &= !(1 << (chopped_off - 1));
                    break;
                }

                let parent = b.parent?;
                let pb = self.branch(parent);
                cindex = extract_bits(b.key, pb.pos, pb.bits);
                pn = parent;
                chopped_off = 0;
            }
        }
    }

    fn check_leaf<'a>(
        leaf: &'a Leaf<V>,
        addr: u32,
        pred: &impl Fn(&V) -> bool,
    ) -> Option<&'a LeafEntry<V>> {
        leaf.entries
            .iter()
            .find(|e| leaf.key == addr & e.mask && pred(&e.value))
    }

    /// All entries with their keys, in key order.
    pub fn entries(&self) -> Vec<(u32, &LeafEntry<V>)> {
        let mut out = Vec::with_capacity(self.len);
        let mut stack: Vec<NodeId> = self.root.into_iter().collect();
        while let Some(id) = stack.pop() {
            match self.node(id) {
                Node::Leaf(l) => out.extend(l.entries.iter().map(|e| (l.key, e))),
                Node::Branch(b) => stack.extend(b.children.iter().rev().flatten().copied()),
            }
        }
        out
    }

    /// Verify structural invariants; used by tests.
    #[cfg(test)]
    fn check_invariants(&self) {
        let Some(root) = self.root else {
            assert_eq!(self.len, 0);
            return;
        };
        assert!(self.parent(root).is_none(), "root has a parent");

        let mut count = 0;
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            match self.node(id) {
                Node::Leaf(l) => {
                    assert!(!l.entries.is_empty(), "empty leaf kept");
                    assert!(l
                        .entries
                        .windows(2)
                        .all(|w| w[0].prefix_len >= w[1].prefix_len));
                    for e in &l.entries {
                        assert_eq!(l.key & !e.mask, 0, "unmasked key in leaf");
                    }
                    count += l.entries.len();
                }
                Node::Branch(b) => {
                    assert!(b.pos + b.bits <= KEY_BITS);
                    let mut empty = 0;
                    let mut full = 0;
                    for (i, c) in b.children.iter().enumerate() {
                        let Some(c) = *c else {
                            empty += 1;
                            continue;
                        };
                        assert_eq!(self.parent(c), Some(id), "stale parent link");
                        let ckey = self.key_of(c);
                        assert_eq!(extract_bits(ckey, b.pos, b.bits) as usize, i);
                        assert!(sub_equals(b.key, 0, b.pos, ckey), "child outside branch");
                        if self.is_full(id, Some(c)) {
                            full += 1;
                        }
                        stack.push(c);
                    }
                    assert_eq!(b.empty_children, empty);
                    assert_eq!(b.full_children, full);
                }
            }
        }
        assert_eq!(count, self.len);
    }
}
