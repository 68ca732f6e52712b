/*! LDPC outer decoder (§4.8).

Recovers missing systematic blocks from a partially-received set of `n`
coded blocks (`k` systematic, `n - k` parity), given the code's
parity-check structure. Implemented as Gauss-Jordan elimination over
GF(2), with each "bit" carrying a whole block-sized payload: row
operations XOR block buffers rather than individual bits (§4.8 step 5),
and elimination is a strict generalization of the spec's informally
described iterative-peeling procedure — peeling is just the common case
where some row happens to have a single remaining unknown; this routine
also covers the "all-parity arrival" edge case that requires full
elimination (§4.8's "Edge cases").

Grounded on the teacher's `xor.rs`/`xor_const.rs` GF(2) XOR-over-buffers
primitive, generalized from "XOR a stream by a constant" to "XOR one
block buffer into another in place" for row reduction.

## Code table

§9 explicitly defers the real LDPC code table to cross-checking against
recorded captures this build does not have. In their place, a
deterministic construction keyed by `(code_id, k, n)` is used (see
`DESIGN.md` for the rationale): parity row `p` (`0 <= p < n-k`) covers
every systematic column except one, chosen by `p` and `code_id`, with
row `0` covering all columns. This is *not* claimed to interoperate with
any real broadcast; it exists so the erasure-decoding algorithm has a
concrete, testable structure to run against.
*/

use crate::error::DecodeOutcome;

/// A parameterised LDPC-style parity-check structure.
#[derive(Debug, Clone)]
pub struct LdpcCode {
    k: u32,
    n: u32,
    /// `parity_sets[p]` lists the systematic column indices XORed by
    /// parity row `p` (transmitted at coded index `k + p`).
    parity_sets: Vec<Vec<u32>>,
}

impl LdpcCode {
    /// Derive the code for `(code_id, k, n)`.
    ///
    /// # Panics
    /// Panics if `n < k` or `k == 0`; callers validate this at the
    /// announcement-parsing boundary (§4.5) before reaching here.
    #[must_use]
    pub fn new(code_id: u32, k: u32, n: u32) -> Self {
        assert!(k > 0 && n >= k, "invalid LDPC shape: k={k} n={n}");
        let num_parity = n - k;
        let mut parity_sets = Vec::with_capacity(num_parity as usize);
        for p in 0..num_parity {
            let excluded = if p == 0 {
                None
            } else {
                Some((k - (p % k) + code_id) % k)
            };
            let cols = (0..k).filter(|&i| Some(i) != excluded).collect();
            parity_sets.push(cols);
        }
        Self { k, n, parity_sets }
    }

    /// Number of systematic blocks.
    #[must_use]
    pub fn k(&self) -> u32 {
        self.k
    }

    /// Total number of transmitted blocks.
    #[must_use]
    pub fn n(&self) -> u32 {
        self.n
    }

    /// Compute the parity payload for row `p`, given all `k` systematic
    /// block payloads (used by tests and by anything that wants to
    /// synthesize a valid capture).
    #[must_use]
    pub fn encode_parity(&self, p: usize, systematic: &[Vec<u8>]) -> Vec<u8> {
        let mut acc = vec![0u8; systematic[0].len()];
        for &col in &self.parity_sets[p] {
            xor_into(&mut acc, &systematic[col as usize]);
        }
        acc
    }
}

fn xor_into(dst: &mut [u8], src: &[u8]) {
    debug_assert_eq!(dst.len(), src.len());
    for (d, s) in dst.iter_mut().zip(src.iter()) {
        *d ^= s;
    }
}

/// Attempt to recover the full set of `k` systematic block payloads.
///
/// `received` holds every coded block seen so far, keyed by its index
/// in `[0, n)`; systematic indices are `[0, k)`, parity indices are
/// `[k, n)`. All payloads (systematic and parity) must be the same
/// length (`block_size`, possibly padded for a short terminal block —
/// truncation to the announced file length happens at emission time,
/// not here).
#[must_use]
pub fn decode(code: &LdpcCode, received: &std::collections::HashMap<u32, Vec<u8>>) -> DecodeOutcome {
    let k = code.k as usize;
    let unknown: Vec<u32> = (0..code.k).filter(|i| !received.contains_key(i)).collect();
    if unknown.is_empty() {
        let blocks = (0..code.k)
            .map(|i| received[&i].clone())
            .collect::<Vec<_>>();
        return DecodeOutcome::Recovered(blocks);
    }
    let block_size = received.values().next().map(|v| v.len()).unwrap_or(0);
    let col_index: std::collections::HashMap<u32, usize> = unknown
        .iter()
        .enumerate()
        .map(|(idx, &col)| (col, idx))
        .collect();
    let m = unknown.len();

    let mut rows: Vec<(Vec<bool>, Vec<u8>)> = Vec::new();
    for p in 0..code.parity_sets.len() {
        let parity_index = code.k + p as u32;
        let Some(parity_payload) = received.get(&parity_index) else {
            continue;
        };
        let mut rhs = parity_payload.clone();
        let mut mask = vec![false; m];
        for &col in &code.parity_sets[p] {
            match received.get(&col) {
                Some(known) => xor_into(&mut rhs, known),
                None => mask[col_index[&col]] = true,
            }
        }
        if mask.iter().any(|&b| b) {
            rows.push((mask, rhs));
        }
    }

    match gf2_solve(rows, m, block_size) {
        Some(solved) => {
            let mut blocks = Vec::with_capacity(k);
            for i in 0..code.k {
                if let Some(known) = received.get(&i) {
                    blocks.push(known.clone());
                } else {
                    blocks.push(solved[col_index[&i]].clone());
                }
            }
            DecodeOutcome::Recovered(blocks)
        }
        None => DecodeOutcome::Insufficient,
    }
}

/// Gauss-Jordan elimination over GF(2). Each row is a boolean mask over
/// the `m` unknown columns plus a right-hand-side byte buffer; row
/// addition is XOR. Returns the solved value for each of the `m`
/// columns if the system has full column rank, else `None`.
fn gf2_solve(
    mut rows: Vec<(Vec<bool>, Vec<u8>)>,
    m: usize,
    block_size: usize,
) -> Option<Vec<Vec<u8>>> {
    let mut pivot_for_col = vec![None; m];
    let mut rank = 0;
    for col in 0..m {
        let Some(found) = (rank..rows.len()).find(|&r| rows[r].0[col]) else {
            continue;
        };
        rows.swap(rank, found);
        let (pivot_mask, pivot_rhs) = rows[rank].clone();
        for (i, row) in rows.iter_mut().enumerate() {
            if i == rank || !row.0[col] {
                continue;
            }
            for c in 0..m {
                row.0[c] ^= pivot_mask[c];
            }
            xor_into(&mut row.1, &pivot_rhs);
        }
        pivot_for_col[col] = Some(rank);
        rank += 1;
    }
    if rank < m {
        return None;
    }
    let mut out = vec![vec![0u8; block_size]; m];
    for (col, row) in pivot_for_col.into_iter().enumerate() {
        out[col] = rows[row.unwrap()].1.clone();
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn block(byte: u8, len: usize) -> Vec<u8> {
        vec![byte; len]
    }

    #[test]
    fn all_systematic_present_is_trivially_recovered() {
        let code = LdpcCode::new(0, 4, 6);
        let mut received = HashMap::new();
        for i in 0..4u32 {
            received.insert(i, block(i as u8, 8));
        }
        match decode(&code, &received) {
            DecodeOutcome::Recovered(blocks) => {
                assert_eq!(blocks, (0..4u32).map(|i| block(i as u8, 8)).collect::<Vec<_>>());
            }
            DecodeOutcome::Insufficient => panic!("expected recovery"),
        }
    }

    #[test]
    fn recovers_two_missing_systematic_blocks_from_parity() {
        // Scenario 5 from §8: K=4, N=6, receive systematic 0,2 and both
        // parity blocks; expect 1 and 3 reconstructed.
        let code = LdpcCode::new(0, 4, 6);
        let systematic: Vec<Vec<u8>> = (0..4u32).map(|i| block(i as u8 + 1, 8)).collect();
        let mut received = HashMap::new();
        received.insert(0, systematic[0].clone());
        received.insert(2, systematic[2].clone());
        received.insert(4, code.encode_parity(0, &systematic));
        received.insert(5, code.encode_parity(1, &systematic));

        match decode(&code, &received) {
            DecodeOutcome::Recovered(blocks) => assert_eq!(blocks, systematic),
            DecodeOutcome::Insufficient => panic!("expected recovery"),
        }
    }

    #[test]
    fn insufficient_when_equations_dont_determine_all_unknowns() {
        let code = LdpcCode::new(0, 4, 5); // only one parity block
        let systematic: Vec<Vec<u8>> = (0..4u32).map(|i| block(i as u8, 8)).collect();
        let mut received = HashMap::new();
        received.insert(0, systematic[0].clone());
        // Missing 1, 2, 3, with only one parity equation: can't determine 3 unknowns.
        received.insert(4, code.encode_parity(0, &systematic));
        assert_eq!(decode(&code, &received), DecodeOutcome::Insufficient);
    }

    #[test]
    fn k_less_than_received_systematic_count_skips_decoding() {
        // All systematic present plus a spurious parity: still just recovers directly.
        let code = LdpcCode::new(0, 2, 3);
        let mut received = HashMap::new();
        received.insert(0, block(1, 4));
        received.insert(1, block(2, 4));
        received.insert(2, block(9, 4)); // parity, unused since nothing missing
        match decode(&code, &received) {
            DecodeOutcome::Recovered(blocks) => assert_eq!(blocks, vec![block(1, 4), block(2, 4)]),
            DecodeOutcome::Insufficient => panic!("expected recovery"),
        }
    }

    #[test]
    fn duplicate_parity_equations_are_idempotent() {
        let code = LdpcCode::new(0, 4, 6);
        let systematic: Vec<Vec<u8>> = (0..4u32).map(|i| block(i as u8 + 10, 8)).collect();
        let mut received = HashMap::new();
        received.insert(0, systematic[0].clone());
        received.insert(2, systematic[2].clone());
        let p0 = code.encode_parity(0, &systematic);
        received.insert(4, p0.clone());
        received.insert(5, code.encode_parity(1, &systematic));
        let first = decode(&code, &received);
        // Re-running decode with the same (duplicate) data is idempotent.
        let second = decode(&code, &received);
        assert_eq!(first, second);
    }
}
