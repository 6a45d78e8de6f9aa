//! Multi-pass collision detection and merging.
//!
//! Each pass walks the active droplets in ascending key order. The current
//! droplet absorbs every later droplet it overlaps, one at a time in key
//! order, and the growing merged droplet is re-tested against the remaining
//! ones. Merged droplets receive fresh arena keys and join the next pass,
//! where they may collide with droplets that were not adjacent before.
//! Passes repeat until one performs no merge or the pass cap is reached.

use crate::droplet::{DropletArena, DropletKey};

/// Outcome of collision resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Keys of the surviving droplets, ascending.
    pub survivors: Vec<DropletKey>,
    /// Number of passes run, the final merge-free pass included.
    pub passes: usize,
    /// Total number of pairwise merges.
    pub merges: usize,
    /// `false` when the pass cap was hit while merges were still happening.
    pub converged: bool,
}

/// Merge overlapping droplets among `candidates` until no pair collides.
///
/// At most `max_passes` passes are run; if the cap is hit the last computed
/// state is returned with `converged == false`.
#[must_use]
pub fn resolve(arena: &mut DropletArena, candidates: &[DropletKey], max_passes: usize) -> Resolution {
    let mut active = candidates.to_vec();
    active.sort_unstable();
    active.dedup();

    let mut passes = 0;
    let mut merges = 0;
    let mut converged = active.len() < 2;

    while !converged && passes < max_passes {
        passes += 1;
        let mut consumed = vec![false; active.len()];
        let mut next = Vec::with_capacity(active.len());
        let mut merged_this_pass = 0;

        for (i, &start) in active.iter().enumerate() {
            if consumed[i] {
                continue;
            }
            let mut current = start;
            for (j, &other) in active.iter().enumerate().skip(i + 1) {
                if consumed[j] || !arena[current].collides_with(&arena[other]) {
                    continue;
                }
                current = arena.merge(current, other);
                consumed[j] = true;
                merged_this_pass += 1;
            }
            next.push(current);
        }

        next.sort_unstable();
        active = next;
        merges += merged_this_pass;
        converged = merged_this_pass == 0;
        log::debug!(
            "collision pass {passes}: {merged_this_pass} merges, {} droplets remain",
            active.len()
        );
    }

    Resolution {
        survivors: active,
        passes,
        merges,
        converged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::ShapeKind;

    fn arena_with(drops: &[((f64, f64), u32)]) -> (DropletArena, Vec<DropletKey>) {
        let mut arena = DropletArena::new();
        let keys = drops
            .iter()
            .map(|&(center, radius)| arena.insert(center, radius, ShapeKind::Round, 0))
            .collect();
        (arena, keys)
    }

    fn assert_disjoint(arena: &DropletArena, keys: &[DropletKey]) {
        for (n, &a) in keys.iter().enumerate() {
            for &b in &keys[n + 1..] {
                assert!(
                    !arena[a].collides_with(&arena[b]),
                    "droplets {a} and {b} still overlap"
                );
            }
        }
    }

    #[test]
    fn separated_droplets_are_untouched() {
        let (mut arena, keys) = arena_with(&[((0.0, 0.0), 5), ((100.0, 0.0), 5), ((0.0, 100.0), 5)]);
        let res = resolve(&mut arena, &keys, 10);
        assert_eq!(res.survivors, keys);
        assert_eq!(res.merges, 0);
        assert_eq!(res.passes, 1);
        assert!(res.converged);
        assert!(keys.iter().all(|&k| !arena[k].collided()));
    }

    #[test]
    fn overlapping_pair_merges_with_conserved_area() {
        let (mut arena, keys) = arena_with(&[((0.0, 0.0), 20), ((25.0, 0.0), 10)]);
        let res = resolve(&mut arena, &keys, 10);
        assert_eq!(res.survivors.len(), 1);
        assert_eq!(res.merges, 1);

        let merged = &arena[res.survivors[0]];
        let expected = (20.0_f64 * 20.0 + 10.0 * 10.0).sqrt();
        assert!((f64::from(merged.radius()) - expected).abs() <= 0.5);
        let (cx, _) = merged.center();
        assert!(cx > 0.0 && cx < 12.5, "center {cx} not nearer the larger droplet");
        assert!(arena[keys[0]].collided() && arena[keys[1]].collided());
    }

    #[test]
    fn merges_cascade_across_passes() {
        // C (key 0) touches neither A nor B, but the merge of A and B grows
        // toward it and is absorbed on the next pass.
        let (mut arena, keys) = arena_with(&[((9.0, 16.0), 5), ((0.0, 0.0), 10), ((18.0, 0.0), 10)]);
        assert!(!arena[keys[0]].collides_with(&arena[keys[1]]));
        assert!(!arena[keys[0]].collides_with(&arena[keys[2]]));

        let res = resolve(&mut arena, &keys, 10);
        assert_eq!(res.survivors, vec![4]);
        assert_eq!(res.merges, 2);
        assert_eq!(res.passes, 3);
        assert!(res.converged);
        assert_eq!(arena[4].merged_from(), &[0, 1, 2, 3]);
    }

    #[test]
    fn multiple_partners_merge_in_key_order() {
        let (mut arena, keys) = arena_with(&[((50.0, 50.0), 10), ((60.0, 50.0), 4), ((40.0, 50.0), 4)]);
        let res = resolve(&mut arena, &keys, 10);
        assert_eq!(res.survivors.len(), 1);
        // 0 absorbs 1 first (key 3), then that absorbs 2 (key 4)
        assert_eq!(res.survivors, vec![4]);
        assert_eq!(arena[3].merged_from(), &[0, 1]);
    }

    #[test]
    fn clustered_input_converges_within_the_cap() {
        let mut drops = Vec::new();
        for i in 0..12_u32 {
            for j in 0..12_u32 {
                drops.push(((f64::from(i) * 7.0, f64::from(j) * 7.0), 4));
            }
        }
        let (mut arena, keys) = arena_with(&drops);
        let res = resolve(&mut arena, &keys, 64);
        assert!(res.passes <= 64);
        assert!(res.converged);
        assert!(!res.survivors.is_empty());
        assert_disjoint(&arena, &res.survivors);
    }

    #[test]
    fn pass_cap_returns_last_state() {
        let drops: Vec<_> = (0..30_u32)
            .map(|i| ((f64::from(i) * 9.0, 0.0), 5))
            .collect();
        let (mut arena, keys) = arena_with(&drops);
        let res = resolve(&mut arena, &keys, 1);
        assert_eq!(res.passes, 1);
        assert!(res.merges > 0);
        assert!(!res.converged);
        assert!(res.survivors.len() < keys.len());
    }

    #[test]
    fn empty_and_single_inputs_converge_immediately() {
        let (mut arena, _) = arena_with(&[]);
        let res = resolve(&mut arena, &[], 5);
        assert!(res.survivors.is_empty() && res.converged && res.passes == 0);

        let (mut arena, keys) = arena_with(&[((1.0, 1.0), 3)]);
        let res = resolve(&mut arena, &keys, 5);
        assert_eq!(res.survivors, keys);
        assert!(res.converged);
    }
}
