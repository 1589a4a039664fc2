use super::{FilterTable, Hit, mismatch};
use crate::error::{FilterError, Result};
use crate::filter::{AddressHeader, Filter, FilterKind, normalize_address};
use crate::message::MatchTarget;
use compact_str::CompactString;
use smallvec::{SmallVec, smallvec};
use std::collections::HashMap;
use tracing::debug;
use url::Url;

const TABLE: &str = "endpoint-address";

type QName = (CompactString, CompactString);

/// One bit per distinct (name, value, occurrence) assertion within an address bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Mask(SmallVec<[u64; 2]>);

impl Mask {
    fn set(&mut self, bit: usize) {
        let word = bit / 64;
        if self.0.len() <= word {
            self.0.resize(word + 1, 0);
        }
        self.0[word] |= 1 << (bit % 64);
    }

    /// Every bit of `self` is also set in `other`.
    fn is_subset_of(&self, other: &Self) -> bool {
        self.0.iter().enumerate().all(|(i, &w)| w & !other.0.get(i).copied().unwrap_or(0) == 0)
    }
}

#[derive(Debug)]
struct Candidate {
    filter: Filter,
    mask: Mask,
    counts: SmallVec<[(QName, usize); 2]>,
}

/// Filters sharing one normalized address.
#[derive(Debug, Default)]
struct Bucket {
    bits: HashMap<(QName, CompactString, usize), usize>,
    bit_refs: Vec<usize>,
    free_bits: Vec<usize>,
    names: HashMap<QName, usize>,
    candidates: Vec<Candidate>,
}

impl Bucket {
    fn insert(&mut self, filter: Filter, headers: &[AddressHeader]) {
        let mut mask = Mask::default();
        let mut counts: SmallVec<[(QName, usize); 2]> = smallvec![];
        for (i, header) in headers.iter().enumerate() {
            let name = (header.namespace.clone(), header.local_name.clone());
            let occurrence = headers[..i].iter().filter(|h| *h == header).count();
            let bit = self.bit(name.clone(), header.value.clone(), occurrence);
            mask.set(bit);
            match counts.iter_mut().find(|(n, _)| *n == name) {
                Some((_, count)) => *count += 1,
                None => {
                    *self.names.entry(name.clone()).or_default() += 1;
                    counts.push((name, 1));
                }
            }
        }
        self.candidates.push(Candidate { filter, mask, counts });
    }

    fn bit(&mut self, name: QName, value: CompactString, occurrence: usize) -> usize {
        let key = (name, value, occurrence);
        if let Some(&bit) = self.bits.get(&key) {
            self.bit_refs[bit] += 1;
            return bit;
        }
        let bit = if let Some(bit) = self.free_bits.pop() {
            self.bit_refs[bit] = 1;
            bit
        } else {
            self.bit_refs.push(1);
            self.bit_refs.len() - 1
        };
        self.bits.insert(key, bit);
        bit
    }

    fn erase(&mut self, filter: &Filter, headers: &[AddressHeader]) {
        self.candidates.retain(|c| c.filter != *filter);
        for (i, header) in headers.iter().enumerate() {
            let occurrence = headers[..i].iter().filter(|h| *h == header).count();
            let key = ((header.namespace.clone(), header.local_name.clone()), header.value.clone(), occurrence);
            if let Some(&bit) = self.bits.get(&key) {
                self.bit_refs[bit] -= 1;
                if self.bit_refs[bit] == 0 {
                    self.bits.remove(&key);
                    self.free_bits.push(bit);
                }
            }
        }
        let mut seen: SmallVec<[QName; 2]> = smallvec![];
        for header in headers {
            let name = (header.namespace.clone(), header.local_name.clone());
            if seen.contains(&name) {
                continue;
            }
            if let Some(count) = self.names.get_mut(&name) {
                *count -= 1;
                if *count == 0 {
                    self.names.remove(&name);
                }
            }
            seen.push(name);
        }
    }

    fn collect<'a, M: MatchTarget>(&'a self, target: &M, hits: &mut Vec<&'a Filter>) -> Result<()> {
        if self.names.is_empty() {
            hits.extend(self.candidates.iter().map(|c| &c.filter));
            return Ok(());
        }
        let headers = target.headers()?;
        let mut mask = Mask::default();
        let mut counts: HashMap<QName, usize> = HashMap::new();
        let mut occurrences: HashMap<(QName, CompactString), usize> = HashMap::new();
        for header in headers.iter() {
            let name = (header.namespace.clone(), header.local_name.clone());
            if !self.names.contains_key(&name) {
                continue;
            }
            *counts.entry(name.clone()).or_default() += 1;
            let seen = occurrences.entry((name.clone(), header.value.clone())).or_default();
            if let Some(&bit) = self.bits.get(&(name, header.value.clone(), *seen)) {
                mask.set(bit);
            }
            *seen += 1;
        }
        for candidate in &self.candidates {
            let counted = candidate.counts.iter().all(|(name, n)| counts.get(name).copied().unwrap_or(0) == *n);
            if counted && candidate.mask.is_subset_of(&mask) {
                hits.push(&candidate.filter);
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Entry<T> {
    data: T,
    key: String,
    seq: u64,
}

/// Indexes endpoint-address filters by normalized address.
///
/// A message's `To` is normalized twice (with and without the host) and each form selects
/// one bucket. Inside a bucket, header assertions are bits of a mask: a filter matches when
/// all of its bits are present in the message and, for each asserted name, the message
/// carries exactly as many headers of that name as the filter asserts.
#[derive(Debug)]
pub struct EndpointAddressFilterTable<T> {
    buckets: HashMap<String, Bucket>,
    entries: HashMap<Filter, Entry<T>>,
    next_seq: u64,
}

impl<T> Default for EndpointAddressFilterTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EndpointAddressFilterTable<T> {
    pub fn new() -> Self {
        debug!("endpoint address filter table created");
        Self { buckets: HashMap::new(), entries: HashMap::new(), next_seq: 0 }
    }

    /// Distinct normalized addresses in use.
    pub fn address_count(&self) -> usize {
        self.buckets.len()
    }

    fn seq(&self, filter: &Filter) -> u64 {
        self.entries.get(filter).map_or(u64::MAX, |e| e.seq)
    }
}

/// Bucket key: host-sensitive and host-insensitive filters never share a bucket.
fn bucket_key(uri: &Url, include_host_name: bool) -> String {
    let tag = if include_host_name { 'h' } else { 'n' };
    format!("{tag} {}", normalize_address(uri, include_host_name))
}

impl<T> FilterTable<T> for EndpointAddressFilterTable<T> {
    fn add(&mut self, filter: Filter, data: T) -> Result<()> {
        let FilterKind::EndpointAddress(address) = filter.kind() else {
            return Err(mismatch(TABLE, &filter));
        };
        if self.entries.contains_key(&filter) {
            return Err(FilterError::DuplicateFilter);
        }
        let key = bucket_key(address.address(), address.include_host_name());
        self.buckets.entry(key.clone()).or_default().insert(filter.clone(), address.headers());
        debug!(%filter, bucket = %key, "endpoint address filter added");
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(filter, Entry { data, key, seq });
        Ok(())
    }

    fn remove(&mut self, filter: &Filter) -> Result<Option<T>> {
        let Some(entry) = self.entries.remove(filter) else {
            return Ok(None);
        };
        if let (FilterKind::EndpointAddress(address), Some(bucket)) = (filter.kind(), self.buckets.get_mut(&entry.key)) {
            bucket.erase(filter, address.headers());
            if bucket.candidates.is_empty() {
                self.buckets.remove(&entry.key);
            }
        }
        debug!(%filter, "endpoint address filter removed");
        Ok(Some(entry.data))
    }

    fn clear(&mut self) {
        self.buckets.clear();
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn get(&self, filter: &Filter) -> Option<&T> {
        self.entries.get(filter).map(|e| &e.data)
    }

    fn collect_matching<'a, M: MatchTarget>(&'a self, target: &M, out: &mut Vec<Hit<'a, T>>) -> Result<()> {
        if self.entries.is_empty() {
            return Ok(());
        }
        let addressing = target.addressing()?;
        let Some(to) = addressing.to.as_deref().and_then(|to| Url::parse(to).ok()) else {
            return Ok(());
        };
        let mut hits = Vec::new();
        for include_host_name in [true, false] {
            if let Some(bucket) = self.buckets.get(&bucket_key(&to, include_host_name)) {
                bucket.collect(target, &mut hits)?;
            }
        }
        hits.sort_by_key(|f| self.seq(f));
        out.extend(hits.into_iter().filter_map(|f| self.entries.get(f).map(|e| (f, &e.data))));
        Ok(())
    }
}
