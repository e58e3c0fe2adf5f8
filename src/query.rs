//! Partial-match query scanning, reshaped into an `Iterator` over candidate
//! buckets and their overflow chains.

use crate::bits::{self, Bits, MAXBITS};
use crate::error::{RelnError, Result};
use crate::hash;
use crate::page::{Page, PageID, NO_PAGE};
use crate::relation::Relation;

/// Which page within a bucket's chain the scan is currently reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    Data(PageID),
    Ovflow(PageID),
}

/// An in-progress partial-match scan over a relation.
///
/// Built once via [`Query::start`]; every `Iterator::next()` call returns
/// the next matching tuple (as a raw byte string) or `None` once every
/// candidate bucket and its overflow chain has been exhausted.
pub struct Query<'a> {
    rel: &'a Relation,
    /// Owned copy of the query's per-attribute values (`None` = `?`).
    /// Released automatically when `Query` drops.
    pattern: Vec<Option<Vec<u8>>>,

    /// Base address bits, already resolved through the `d`/`d+1`/`sp`
    /// bucket-address selection.
    known: Bits,
    /// Ascending composite-hash bit positions left unconstrained within the
    /// addressing window, pre-extracted into an ordered list.
    unknown_positions: Vec<u32>,
    nstars: u32,
    /// Index, in `[0, 2^nstars)`, of the currently loaded candidate bucket.
    buck_ind: u32,
    /// Set once a candidate bucket id has overrun `npages - 1`: the whole
    /// scan stops there rather than skipping to the next candidate.
    done: bool,

    cursor: Option<Cursor>,
    /// Overflow link of the page currently loaded into `tuples_cache`,
    /// cached at load time so chain advancement doesn't re-read the page.
    cursor_ovflow: PageID,
    tuples_cache: Vec<Vec<u8>>,
    tup_index: usize,
}

impl<'a> Query<'a> {
    /// Starts a partial-match query. `pattern` holds one entry per
    /// attribute: `Some(value)` pins that attribute, `None` leaves it
    /// unconstrained (a `?` wildcard).
    pub fn start(rel: &'a Relation, pattern: &[Option<&[u8]>]) -> Result<Query<'a>> {
        if pattern.len() != rel.nattrs() as usize {
            return Err(RelnError::Configuration(format!(
                "query has {} attributes, relation has {}",
                pattern.len(),
                rel.nattrs()
            )));
        }

        let (known_bits, known_mask) = compute_known(rel, pattern);
        let d = rel.depth();
        let sp = rel.splitp();

        // `stp` always spans the full `d+1`-bit window regardless of which
        // of `d`/`d+1` ends up addressing this particular seed bucket — any
        // overshoot this causes is pruned by the `npages` bound in
        // `advance_bucket`.
        let (known, stp) = if d == 0 {
            (0, 0)
        } else {
            let window = (d + 1).min(MAXBITS);
            let stp = bits::get_lower(!known_mask, window);
            let mut p = bits::get_lower(known_bits, d);
            if p < sp {
                p = bits::get_lower(known_bits, d + 1);
            }
            (p, stp)
        };

        let mut unknown_positions = Vec::new();
        for i in 0..MAXBITS {
            if bits::bit_is_set(stp, i) {
                unknown_positions.push(i);
            }
        }
        let nstars = unknown_positions.len() as u32;

        let owned_pattern: Vec<Option<Vec<u8>>> =
            pattern.iter().map(|v| v.map(|s| s.to_vec())).collect();

        let mut q = Query {
            rel,
            pattern: owned_pattern,
            known,
            unknown_positions,
            nstars,
            buck_ind: 0,
            done: false,
            cursor: None,
            cursor_ovflow: NO_PAGE,
            tuples_cache: Vec::new(),
            tup_index: 0,
        };

        // The seed bucket (`buck_ind == 0`, empty mask) is always valid: it
        // is constructed the same way a real tuple's bucket address is, so
        // it is guaranteed to lie in `[0, npages)`.
        let page = rel.get_data_page(q.known as PageID)?;
        q.load_page(page);
        q.cursor = Some(Cursor::Data(q.known as PageID));

        Ok(q)
    }

    fn total_candidates(&self) -> u64 {
        1u64 << self.nstars
    }

    /// Advances to the next not-yet-visited candidate bucket. Returns
    /// `false` once candidates are exhausted or a candidate bucket id
    /// overruns `npages - 1`, which permanently ends the scan.
    fn advance_bucket(&mut self) -> Result<bool> {
        if self.done {
            return Ok(false);
        }
        if (self.buck_ind as u64) == self.total_candidates() - 1 {
            return Ok(false);
        }
        self.buck_ind += 1;

        let mut mask: Bits = 0;
        for (j, &pos) in self.unknown_positions.iter().enumerate() {
            if bits::bit_is_set(self.buck_ind, j as u32) {
                mask = bits::set_bit(mask, pos);
            }
        }
        let candidate = self.known | mask;

        if (candidate as u64) >= self.rel.npages() as u64 {
            self.done = true;
            return Ok(false);
        }

        let page = self.rel.get_data_page(candidate as PageID)?;
        self.load_page(page);
        self.cursor = Some(Cursor::Data(candidate as PageID));
        Ok(true)
    }

    fn advance_chain(&mut self) -> Result<bool> {
        if self.cursor_ovflow == NO_PAGE {
            return Ok(false);
        }
        let next = self.cursor_ovflow;
        let page = self.rel.get_ovflow_page(next)?;
        self.load_page(page);
        self.cursor = Some(Cursor::Ovflow(next));
        Ok(true)
    }

    fn load_page(&mut self, page: Page) {
        self.cursor_ovflow = page.ovflow();
        self.tuples_cache = page.tuples().map(|t| t.to_vec()).collect();
        self.tup_index = 0;
    }

    /// A tuple matches iff every attribute the query pins equals the
    /// tuple's corresponding attribute string exactly — literal string
    /// comparison, not a hash check, so composite-hash collisions never
    /// produce a false match.
    fn matches(&self, tuple: &[u8]) -> bool {
        let parts: Vec<&[u8]> = tuple.split(|&b| b == b',').collect();
        if parts.len() != self.pattern.len() {
            return false;
        }
        self.pattern
            .iter()
            .zip(parts.iter())
            .all(|(field, part)| field.as_deref().map_or(true, |v| v == *part))
    }

    fn next_from_current_page(&mut self) -> Option<Vec<u8>> {
        while self.tup_index < self.tuples_cache.len() {
            let tuple = self.tuples_cache[self.tup_index].clone();
            self.tup_index += 1;
            if self.matches(&tuple) {
                return Some(tuple);
            }
        }
        None
    }
}

impl<'a> Iterator for Query<'a> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.cursor.is_none() {
                match self.advance_bucket() {
                    Ok(true) => {}
                    Ok(false) => return None,
                    Err(e) => return Some(Err(e)),
                }
            }

            if let Some(tuple) = self.next_from_current_page() {
                return Some(Ok(tuple));
            }

            match self.advance_chain() {
                Ok(true) => continue,
                Ok(false) => {
                    self.cursor = None;
                    continue;
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Builds the composite hash's known bits and known-position mask from a
/// query pattern: for every choice-vector position assigned to a pinned
/// attribute, the corresponding bit of `known_mask` is set, and
/// `known_bits` carries that attribute's hash bit. Positions assigned to a
/// `?` attribute are left unset in both.
fn compute_known(rel: &Relation, pattern: &[Option<&[u8]>]) -> (Bits, Bits) {
    let mut known_bits: Bits = 0;
    let mut known_mask: Bits = 0;
    let attr_hashes: Vec<Option<Bits>> = pattern.iter().map(|v| v.map(hash::hash)).collect();

    for i in 0..MAXBITS {
        let item = rel.choice_vector().get(i as usize);
        if let Some(Some(h)) = attr_hashes.get(item.att as usize) {
            known_mask = bits::set_bit(known_mask, i);
            if bits::bit_is_set(*h, item.bit) {
                known_bits = bits::set_bit(known_bits, i);
            }
        }
    }
    (known_bits, known_mask)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::relation::{Mode, Relation, RelationConfig};

    struct CleanUp(String);
    impl Drop for CleanUp {
        fn drop(&mut self) {
            for ext in ["info", "data", "ovflow"] {
                let _ = std::fs::remove_file(format!("{}.{ext}", self.0));
            }
        }
    }

    fn blocked_chvec(nattrs: u32) -> String {
        (0..crate::chvec::MAXCHVEC as u32)
            .map(|i| format!("{}:{}", (i / 8) % nattrs, i % 8))
            .collect::<Vec<_>>()
            .join(",")
    }

    #[test]
    fn s1_partial_match_on_second_attribute() {
        let name = "test_query_s1";
        let _cleanup = CleanUp(name.into());
        let mut rel = Relation::create(
            name,
            RelationConfig { nattrs: 4, depth: 2, choice_vector: blocked_chvec(4), split_divisor: 10 },
        )
        .unwrap();

        rel.insert("1,a,x,10").unwrap();
        rel.insert("2,b,y,20").unwrap();
        rel.insert("3,a,z,30").unwrap();

        let pattern = [None, Some(b"a".as_slice()), None, None];
        let q = Query::start(&rel, &pattern).unwrap();
        let mut found: Vec<Vec<u8>> = q.collect::<Result<Vec<_>>>().unwrap();
        found.sort();
        assert_eq!(found, vec![b"1,a,x,10".to_vec(), b"3,a,z,30".to_vec()]);

        let pattern2 = [Some(b"2".as_slice()), None, None, None];
        let q2 = Query::start(&rel, &pattern2).unwrap();
        let found2: Vec<Vec<u8>> = q2.collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(found2, vec![b"2,b,y,20".to_vec()]);
    }

    #[test]
    fn s3_query_with_one_fixed_attribute_finds_inserted_tuple() {
        let name = "test_query_s3";
        let _cleanup = CleanUp(name.into());
        let mut rel = Relation::create(
            name,
            RelationConfig { nattrs: 4, depth: 2, choice_vector: blocked_chvec(4), split_divisor: 10 },
        )
        .unwrap();

        for i in 0..100 {
            rel.insert(&format!("{i},a{i},b{i},c{i}")).unwrap();
        }
        rel.insert("target,x,y,z").unwrap();

        let pattern = [Some(b"target".as_slice()), None, None, None];
        let q = Query::start(&rel, &pattern).unwrap();
        let found: Vec<Vec<u8>> = q.collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(found, vec![b"target,x,y,z".to_vec()]);
    }

    #[test]
    fn distinct_values_hashing_to_the_same_bits_never_false_match() {
        // Literal matching must reject a tuple whose fixed attribute
        // merely *hashes* the same as the query's value.
        let name = "test_query_literal";
        let _cleanup = CleanUp(name.into());
        let mut rel = Relation::create(
            name,
            RelationConfig { nattrs: 2, depth: 0, choice_vector: blocked_chvec(2), split_divisor: 1_000_000 },
        )
        .unwrap();
        rel.insert("alpha,1").unwrap();
        rel.insert("beta,2").unwrap();

        let pattern = [Some(b"alpha".as_slice()), None];
        let q = Query::start(&rel, &pattern).unwrap();
        let found: Vec<Vec<u8>> = q.collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(found, vec![b"alpha,1".to_vec()]);
    }

    #[test]
    fn fully_wildcard_query_returns_every_tuple() {
        let name = "test_query_wildcard";
        let _cleanup = CleanUp(name.into());
        let mut rel = Relation::create(
            name,
            RelationConfig { nattrs: 2, depth: 1, choice_vector: blocked_chvec(2), split_divisor: 10 },
        )
        .unwrap();

        for i in 0..40 {
            rel.insert(&format!("{i},v{i}")).unwrap();
        }

        let pattern = [None, None];
        let q = Query::start(&rel, &pattern).unwrap();
        let found: Vec<Vec<u8>> = q.collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(found.len(), 40);
    }

    #[test]
    fn fully_wildcard_query_after_splits_still_covers_every_bucket() {
        // Forces several splits (small split_divisor => low threshold) so
        // `npages` is not a power of two, exercising the `done` overrun
        // path in `advance_bucket`.
        let name = "test_query_wildcard_splits";
        let _cleanup = CleanUp(name.into());
        let mut rel = Relation::create(
            name,
            RelationConfig { nattrs: 4, depth: 2, choice_vector: blocked_chvec(4), split_divisor: 1 },
        )
        .unwrap();

        for i in 0..300 {
            rel.insert(&format!("{i},v{i},w{i},{i}")).unwrap();
        }
        assert_eq!(rel.ntuples(), 300);

        let pattern = [None, None, None, None];
        let q = Query::start(&rel, &pattern).unwrap();
        let found: Vec<Vec<u8>> = q.collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(found.len(), 300);
    }

    #[test]
    fn query_rejects_wrong_attribute_count() {
        let name = "test_query_bad_attrs";
        let _cleanup = CleanUp(name.into());
        let rel = Relation::create(
            name,
            RelationConfig { nattrs: 3, depth: 0, choice_vector: blocked_chvec(3), split_divisor: 10 },
        )
        .unwrap();

        let pattern = [None, None];
        assert!(Query::start(&rel, &pattern).is_err());
    }

    #[test]
    fn query_after_reopen_read_only_still_scans() {
        let name = "test_query_reopen";
        let _cleanup = CleanUp(name.into());
        {
            let mut rel = Relation::create(
                name,
                RelationConfig { nattrs: 2, depth: 0, choice_vector: blocked_chvec(2), split_divisor: 10 },
            )
            .unwrap();
            for i in 0..10 {
                rel.insert(&format!("k{i},v{i}")).unwrap();
            }
            rel.close().unwrap();
        }

        let rel = Relation::open(name, Mode::Read).unwrap();
        let pattern = [None, None];
        let q = Query::start(&rel, &pattern).unwrap();
        assert_eq!(q.collect::<Result<Vec<_>>>().unwrap().len(), 10);
    }
}
