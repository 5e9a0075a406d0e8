use std::collections::HashSet;

/// Output of [`compute_targets`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecycleResult {
    /// Feed index each slot should hold; `None` leaves the slot idle.
    pub targets: Vec<Option<usize>>,
    /// Slot hosting the active item. `None` when the active item is not
    /// playable, or when there are no slots at all.
    pub active_slot: Option<usize>,
}

/// Assigns the active, next and previous playable items to pool slots.
///
/// An item already sitting in some slot stays there, so small back-and-forth
/// scrolls never reload a player. The active item otherwise takes the first
/// empty slot, falling back to slot 0.
pub fn compute_targets(
    active_feed_index: usize,
    playable: &[usize],
    prior: &[Option<usize>],
    pool_size: usize,
) -> RecycleResult {
    let prior_at = |slot: usize| prior.get(slot).copied().flatten();

    let current = playable
        .binary_search(&active_feed_index)
        .ok()
        .map(|_| active_feed_index);
    let next = playable.iter().copied().find(|&idx| idx > active_feed_index);
    let prev = playable.iter().rev().copied().find(|&idx| idx < active_feed_index);

    let active_slot = current.and_then(|current| {
        (0..pool_size)
            .find(|&slot| prior_at(slot) == Some(current))
            .or_else(|| (0..pool_size).find(|&slot| prior_at(slot).is_none()))
            .or((pool_size > 0).then_some(0))
    });

    let mut targets = vec![None; pool_size];
    let mut used = HashSet::new();
    if let (Some(slot), Some(current)) = (active_slot, current) {
        targets[slot] = Some(current);
        used.insert(current);
    }

    let mut remaining: Vec<usize> = Vec::with_capacity(2);
    for idx in [next, prev].into_iter().flatten() {
        if Some(idx) != current && !remaining.contains(&idx) {
            remaining.push(idx);
        }
    }

    // Keep neighbours that are already loaded where they are.
    for slot in 0..pool_size {
        if Some(slot) == active_slot {
            continue;
        }
        if let Some(existing) = prior_at(slot) {
            if remaining.contains(&existing) && used.insert(existing) {
                targets[slot] = Some(existing);
            }
        }
    }

    for target in targets.iter_mut().filter(|t| t.is_none()) {
        if let Some(idx) = remaining.iter().copied().find(|idx| !used.contains(idx)) {
            *target = Some(idx);
            used.insert(idx);
        }
    }

    RecycleResult {
        targets,
        active_slot,
    }
}
