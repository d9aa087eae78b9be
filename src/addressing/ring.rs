//! HRW (Highest Random Weight) endpoint assignment
//!
//! BLAKE3-based rendezvous hashing: each key is weighted against every
//! endpoint in a pool, and the heaviest endpoint owns the key. Adding or
//! removing an endpoint only relocates the keys that hashed to it.

/// Rank endpoint ids for a key, heaviest first. Deterministic for a fixed
/// pool.
pub fn hrw_rank(key: &str, endpoint_ids: &[String]) -> Vec<String> {
    let mut weights: Vec<(String, u64)> = endpoint_ids
        .iter()
        .map(|id| {
            let combined = format!("{}{}", key, id);
            let hash = blake3::hash(combined.as_bytes());
            let weight = u64::from_le_bytes(hash.as_bytes()[0..8].try_into().unwrap());
            (id.clone(), weight)
        })
        .collect();

    // Sort by weight (descending); tie-break on id for full determinism
    weights.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    weights.into_iter().map(|(id, _)| id).collect()
}

/// The owning endpoint id for a key, if the pool is non-empty
pub fn hrw_owner(key: &str, endpoint_ids: &[String]) -> Option<String> {
    endpoint_ids
        .iter()
        .map(|id| {
            let combined = format!("{}{}", key, id);
            let hash = blake3::hash(combined.as_bytes());
            let weight = u64::from_le_bytes(hash.as_bytes()[0..8].try_into().unwrap());
            (id, weight)
        })
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(id, _)| id.clone())
}
