//! Compressed prefix trie.
//!
//! Keys are stored as chains of segments. Each segment holds its first character separately
//! so siblings can be found with a binary search, plus the rest of its text. After every
//! mutation the trie is maximally compressed: below the root there is no segment without a
//! payload that has fewer than two children.

use compact_str::CompactString;
use std::mem;

#[derive(Debug, Clone, PartialEq)]
pub struct TrieSegment<T> {
    first: char,
    tail: CompactString,
    data: Option<T>,
    /// Sorted by `first`, no duplicates.
    children: Vec<TrieSegment<T>>,
}

impl<T> TrieSegment<T> {
    fn root() -> Self {
        Self { first: '\0', tail: CompactString::default(), data: None, children: Vec::new() }
    }

    fn leaf(first: char, tail: &str) -> Self {
        Self { first, tail: tail.into(), data: None, children: Vec::new() }
    }

    pub fn first(&self) -> char {
        self.first
    }

    pub fn tail(&self) -> &str {
        &self.tail
    }

    /// Byte length of the segment's text.
    pub fn text_len(&self) -> usize {
        self.first.len_utf8() + self.tail.len()
    }

    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    pub fn children(&self) -> &[TrieSegment<T>] {
        &self.children
    }

    fn child_index(&self, c: char) -> Result<usize, usize> {
        self.children.binary_search_by_key(&c, |s| s.first)
    }

    pub fn child(&self, c: char) -> Option<&TrieSegment<T>> {
        self.child_index(c).ok().map(|i| &self.children[i])
    }

    /// Cut the tail after `at` bytes; the remainder moves into a single child.
    fn split(&mut self, at: usize) {
        let rest = CompactString::from(&self.tail[at..]);
        self.tail.truncate(at);
        let mut chars = rest.chars();
        let Some(first) = chars.next() else {
            return;
        };
        let lower = Self {
            first,
            tail: chars.as_str().into(),
            data: self.data.take(),
            children: mem::take(&mut self.children),
        };
        self.children = vec![lower];
    }

    /// Absorb the only child. The caller guarantees there is exactly one and no payload here.
    fn merge_child(&mut self) {
        if let Some(child) = self.children.pop() {
            self.tail.push(child.first);
            self.tail.push_str(&child.tail);
            self.data = child.data;
            self.children = child.children;
        }
    }

    fn is_prunable(&self) -> bool {
        self.data.is_none() && self.children.is_empty()
    }

    fn is_mergeable(&self) -> bool {
        self.data.is_none() && self.children.len() == 1
    }

    fn count(&self) -> usize {
        self.children.iter().map(|c| 1 + c.count()).sum()
    }

    fn compressed_below(&self) -> bool {
        self.children.windows(2).all(|w| w[0].first < w[1].first)
            && self.children.iter().all(|c| !c.is_prunable() && !c.is_mergeable() && c.compressed_below())
    }
}

fn common_prefix(a: &str, b: &str) -> usize {
    a.char_indices().zip(b.chars()).find(|((_, x), y)| x != y).map_or_else(
        || a.len().min(b.len()),
        |((i, _), _)| i,
    )
}

/// A compressed trie mapping string keys to payloads.
#[derive(Debug, Clone, PartialEq)]
pub struct Trie<T> {
    root: TrieSegment<T>,
    len: usize,
}

impl<T> Default for Trie<T> {
    fn default() -> Self {
        Self { root: TrieSegment::root(), len: 0 }
    }
}

impl<T> Trie<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Segments below the root.
    pub fn segment_count(&self) -> usize {
        self.root.count()
    }

    pub fn is_compressed(&self) -> bool {
        self.root.compressed_below()
    }

    pub fn root(&self) -> &TrieSegment<T> {
        &self.root
    }

    /// Store `value` under `key`, returning the value it replaces.
    pub fn insert(&mut self, key: &str, value: T) -> Option<T> {
        let previous = Self::insert_at(&mut self.root, key).data.replace(value);
        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    /// Payload under `key`, created with `default` if the key is new.
    pub fn add(&mut self, key: &str, default: impl FnOnce() -> T) -> &mut T {
        let segment = Self::insert_at(&mut self.root, key);
        if segment.data.is_none() {
            self.len += 1;
        }
        segment.data.get_or_insert_with(default)
    }

    fn insert_at<'s>(segment: &'s mut TrieSegment<T>, key: &str) -> &'s mut TrieSegment<T> {
        let Some(c) = key.chars().next() else {
            return segment;
        };
        let rest = &key[c.len_utf8()..];
        let index = match segment.child_index(c) {
            Ok(index) => index,
            Err(index) => {
                segment.children.insert(index, TrieSegment::leaf(c, rest));
                return &mut segment.children[index];
            }
        };
        let child = &mut segment.children[index];
        let common = common_prefix(&child.tail, rest);
        if common < child.tail.len() {
            child.split(common);
        }
        Self::insert_at(child, &rest[common..])
    }

    fn find_segment(&self, key: &str) -> Option<&TrieSegment<T>> {
        let mut segment = &self.root;
        let mut rest = key;
        while let Some(c) = rest.chars().next() {
            segment = segment.child(c)?;
            rest = rest[c.len_utf8()..].strip_prefix(segment.tail.as_str())?;
        }
        Some(segment)
    }

    /// Payload stored under exactly `key`.
    pub fn find(&self, key: &str) -> Option<&T> {
        self.find_segment(key)?.data.as_ref()
    }

    pub fn find_mut(&mut self, key: &str) -> Option<&mut T> {
        let mut segment = &mut self.root;
        let mut rest = key;
        while let Some(c) = rest.chars().next() {
            let index = segment.child_index(c).ok()?;
            segment = &mut segment.children[index];
            rest = rest[c.len_utf8()..].strip_prefix(segment.tail.as_str())?;
        }
        segment.data.as_mut()
    }

    /// Detach the payload under `key`, pruning and merging segments on the way back up.
    pub fn remove(&mut self, key: &str) -> Option<T> {
        let removed = Self::remove_at(&mut self.root, key)?;
        self.len -= 1;
        Some(removed)
    }

    fn remove_at(segment: &mut TrieSegment<T>, key: &str) -> Option<T> {
        let Some(c) = key.chars().next() else {
            return segment.data.take();
        };
        let index = segment.child_index(c).ok()?;
        let child = &mut segment.children[index];
        let rest = key[c.len_utf8()..].strip_prefix(child.tail.as_str())?;
        let removed = Self::remove_at(child, rest)?;
        if child.is_prunable() {
            segment.children.remove(index);
        } else if child.is_mergeable() {
            child.merge_child();
        }
        Some(removed)
    }

    /// Drop every key.
    pub fn clear(&mut self) {
        self.root = TrieSegment::root();
        self.len = 0;
    }

    /// Every stored key that is a prefix of `input`, shortest first.
    pub fn collect_prefixes<'i>(&self, input: &'i str) -> Vec<(&'i str, &T)> {
        let mut found = Vec::new();
        let mut traverser = TrieTraverser::new(self, input);
        loop {
            if let Some(data) = traverser.segment().data() {
                found.push((traverser.consumed(), data));
            }
            if !traverser.move_next() {
                return found;
            }
        }
    }
}

/// Walks a trie along an input string, one segment at a time.
#[derive(Debug, Clone)]
pub struct TrieTraverser<'t, 'i, T> {
    segment: &'t TrieSegment<T>,
    input: &'i str,
    offset: usize,
}

impl<'t, 'i, T> TrieTraverser<'t, 'i, T> {
    pub fn new(trie: &'t Trie<T>, input: &'i str) -> Self {
        Self { segment: &trie.root, input, offset: 0 }
    }

    pub fn segment(&self) -> &'t TrieSegment<T> {
        self.segment
    }

    /// Input matched so far.
    pub fn consumed(&self) -> &'i str {
        &self.input[..self.offset]
    }

    pub fn remaining(&self) -> &'i str {
        &self.input[self.offset..]
    }

    /// Enter the child whose whole text continues the input.
    pub fn move_next(&mut self) -> bool {
        let (segment, offset) = (self.segment, self.offset);
        if !self.move_next_by_first_char() {
            return false;
        }
        match self.remaining().strip_prefix(self.segment.tail.as_str()) {
            Some(_) => {
                self.offset += self.segment.tail.len();
                true
            }
            None => {
                self.segment = segment;
                self.offset = offset;
                false
            }
        }
    }

    /// Enter the child selected by the next input character alone. Only that character is
    /// consumed; the segment's tail is left for the caller to check against [`remaining`].
    ///
    /// [`remaining`]: Self::remaining
    pub fn move_next_by_first_char(&mut self) -> bool {
        let Some(c) = self.remaining().chars().next() else {
            return false;
        };
        let Some(child) = self.segment.child(c) else {
            return false;
        };
        self.segment = child;
        self.offset += c.len_utf8();
        true
    }
}
