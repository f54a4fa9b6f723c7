use log::warn;

/// One concrete choice of a value for every prerequisite and other parameter.
///
/// `id` is the position in emission order and doubles as the priority rank:
/// lower ids are more likely to activate the target function.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentTuple {
    pub id: usize,
    pub assignments: Vec<(String, String)>,
}

/// A value group: all candidate `(key, value)` pairs for one parameter,
/// ordered by descending priority.
type ValueGroup = Vec<(String, String)>;

/// Expansion space for one mutation target: prerequisite groups plus
/// de-prioritized other-parameter groups.
///
/// Enumeration is a priority-graded product: combinations are ordered by
/// ascending sum of per-group value indices (lexicographic index vector as a
/// stable tiebreak), so the all-best combination comes first and truncation
/// at any cap keeps a prefix of the order. Other-parameter variation is the
/// outermost axis: the best-guess other combination is paired with every
/// prerequisite combination before any other-parameter alternative is tried.
#[derive(Debug, Clone)]
pub struct ValueSpace {
    prereq_groups: Vec<ValueGroup>,
    other_groups: Vec<ValueGroup>,
}

impl ValueSpace {
    /// Builds a space from oracle-shaped specs: one inner list of `key=value`
    /// strings per parameter, priority-ordered. Empty strings and empty
    /// groups contribute nothing (an implicit single choice) rather than
    /// collapsing the product.
    pub fn from_specs(prerequisites: &[Vec<String>], other_param: &[Vec<String>]) -> Self {
        Self {
            prereq_groups: parse_groups(prerequisites),
            other_groups: parse_groups(other_param),
        }
    }

    /// Size of the untruncated product.
    pub fn full_size(&self) -> usize {
        let prereq: usize = self.prereq_groups.iter().map(|g| g.len()).product();
        let other: usize = self.other_groups.iter().map(|g| g.len()).product();
        prereq.max(1) * other.max(1)
    }

    /// Lazy, restartable sequence of assignment tuples, truncated at `cap`.
    /// Calling this again yields an identical fresh sequence.
    pub fn tuples(&self, cap: usize) -> Tuples {
        if self.full_size() > cap {
            warn!(
                "capacity exceeded: value space has {} combinations, truncating to {}",
                self.full_size(),
                cap
            );
        }
        let prereq_combos = graded_indices(&sizes(&self.prereq_groups), cap);
        let other_combos = graded_indices(&sizes(&self.other_groups), cap);
        Tuples {
            space: self,
            prereq_combos,
            other_combos,
            prereq_pos: 0,
            other_pos: 0,
            emitted: 0,
            cap,
        }
    }
}

fn sizes(groups: &[ValueGroup]) -> Vec<usize> {
    groups.iter().map(|g| g.len()).collect()
}

fn parse_groups(specs: &[Vec<String>]) -> Vec<ValueGroup> {
    let mut groups = Vec::new();
    for spec in specs {
        let group: ValueGroup = spec
            .iter()
            .filter(|kv| !kv.is_empty())
            .map(|kv| match kv.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (kv.clone(), String::new()),
            })
            .collect();
        if !group.is_empty() {
            groups.push(group);
        }
    }
    groups
}

/// All index vectors over `sizes`, graded order, at most `cap` of them.
///
/// Level-by-level enumeration: every vector with index sum `s` is emitted
/// before any vector with sum `s + 1`; within a level, vectors come out in
/// ascending lexicographic order. With no groups the single empty vector is
/// returned, matching the implicit-empty-choice rule.
fn graded_indices(sizes: &[usize], cap: usize) -> Vec<Vec<usize>> {
    if cap == 0 {
        return Vec::new();
    }
    if sizes.is_empty() {
        return vec![Vec::new()];
    }
    let max_sum: usize = sizes.iter().map(|s| s - 1).sum();
    let mut out = Vec::new();
    let mut current = vec![0usize; sizes.len()];
    for level in 0..=max_sum {
        fill_level(sizes, level, 0, &mut current, &mut out, cap);
        if out.len() >= cap {
            break;
        }
    }
    out
}

/// Emits, in lexicographic order, every completion of `current[pos..]` whose
/// remaining indices sum to `remaining`.
fn fill_level(
    sizes: &[usize],
    remaining: usize,
    pos: usize,
    current: &mut Vec<usize>,
    out: &mut Vec<Vec<usize>>,
    cap: usize,
) {
    if out.len() >= cap {
        return;
    }
    if pos == sizes.len() {
        if remaining == 0 {
            out.push(current.clone());
        }
        return;
    }
    let tail_max: usize = sizes[pos + 1..].iter().map(|s| s - 1).sum();
    let lo = remaining.saturating_sub(tail_max);
    let hi = (sizes[pos] - 1).min(remaining);
    for idx in lo..=hi {
        current[pos] = idx;
        fill_level(sizes, remaining - idx, pos + 1, current, out, cap);
        if out.len() >= cap {
            return;
        }
    }
}

/// Iterator over a [`ValueSpace`]'s assignment tuples.
pub struct Tuples<'a> {
    space: &'a ValueSpace,
    prereq_combos: Vec<Vec<usize>>,
    other_combos: Vec<Vec<usize>>,
    prereq_pos: usize,
    other_pos: usize,
    emitted: usize,
    cap: usize,
}

impl Iterator for Tuples<'_> {
    type Item = AssignmentTuple;

    fn next(&mut self) -> Option<AssignmentTuple> {
        if self.emitted >= self.cap
            || self.other_pos >= self.other_combos.len()
            || self.prereq_combos.is_empty()
        {
            return None;
        }

        let mut assignments = Vec::new();
        for (group, &idx) in self
            .space
            .prereq_groups
            .iter()
            .zip(&self.prereq_combos[self.prereq_pos])
        {
            assignments.push(group[idx].clone());
        }
        for (group, &idx) in self
            .space
            .other_groups
            .iter()
            .zip(&self.other_combos[self.other_pos])
        {
            assignments.push(group[idx].clone());
        }

        let tuple = AssignmentTuple {
            id: self.emitted,
            assignments,
        };
        self.emitted += 1;

        self.prereq_pos += 1;
        if self.prereq_pos >= self.prereq_combos.len() {
            self.prereq_pos = 0;
            self.other_pos += 1;
        }
        Some(tuple)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(groups: &[&[&str]]) -> Vec<Vec<String>> {
        groups
            .iter()
            .map(|g| g.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_cartesian_count() {
        let space = ValueSpace::from_specs(
            &spec(&[&["a=1", "a=2"], &["b=1", "b=2", "b=3"]]),
            &spec(&[&["c=1", "c=2"]]),
        );
        assert_eq!(space.full_size(), 12);
        assert_eq!(space.tuples(100).count(), 12);
    }

    #[test]
    fn test_first_tuple_uses_highest_priority_everywhere() {
        let space = ValueSpace::from_specs(
            &spec(&[&["hideSsid=0", "hideSsid=1"]]),
            &spec(&[&["security=none", "security=wpapsk"], &["wrlPwd=@Ydid8711"]]),
        );
        let first = space.tuples(100).next().unwrap();
        assert_eq!(
            first.assignments,
            vec![
                ("hideSsid".to_string(), "0".to_string()),
                ("security".to_string(), "none".to_string()),
                ("wrlPwd".to_string(), "@Ydid8711".to_string()),
            ]
        );
    }

    #[test]
    fn test_best_other_guess_pairs_with_all_prereqs_first() {
        let space = ValueSpace::from_specs(
            &spec(&[&["hideSsid=0", "hideSsid=1"]]),
            &spec(&[&["security=none", "security=wpapsk"]]),
        );
        let all: Vec<AssignmentTuple> = space.tuples(100).collect();
        assert_eq!(all.len(), 4);
        // Both prerequisite values with security=none come before any
        // security=wpapsk combination.
        assert_eq!(all[0].assignments[1].1, "none");
        assert_eq!(all[1].assignments[1].1, "none");
        assert_eq!(all[2].assignments[1].1, "wpapsk");
        assert_eq!(all[3].assignments[1].1, "wpapsk");
        assert_eq!(all[0].assignments[0].1, "0");
        assert_eq!(all[1].assignments[0].1, "1");
    }

    #[test]
    fn test_truncation_is_a_prefix() {
        let space = ValueSpace::from_specs(
            &spec(&[&["a=1", "a=2", "a=3"], &["b=1", "b=2"]]),
            &spec(&[&["c=1", "c=2"]]),
        );
        let full: Vec<AssignmentTuple> = space.tuples(1000).collect();
        for cap in 1..full.len() {
            let truncated: Vec<AssignmentTuple> = space.tuples(cap).collect();
            assert_eq!(truncated.len(), cap);
            assert_eq!(&full[..cap], &truncated[..]);
        }
    }

    #[test]
    fn test_deterministic() {
        let space = ValueSpace::from_specs(
            &spec(&[&["a=1", "a=2"], &["b=1", "b=2"]]),
            &spec(&[&["c=1", "c=2"]]),
        );
        let a: Vec<AssignmentTuple> = space.tuples(5).collect();
        let b: Vec<AssignmentTuple> = space.tuples(5).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_group_is_implicit_single_choice() {
        let space = ValueSpace::from_specs(&spec(&[&[], &["a=1", "a=2"]]), &[]);
        assert_eq!(space.full_size(), 2);
        let all: Vec<AssignmentTuple> = space.tuples(10).collect();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].assignments, vec![("a".to_string(), "1".to_string())]);
    }

    #[test]
    fn test_no_groups_yields_one_empty_tuple() {
        let space = ValueSpace::from_specs(&[], &[]);
        let all: Vec<AssignmentTuple> = space.tuples(10).collect();
        assert_eq!(all.len(), 1);
        assert!(all[0].assignments.is_empty());
    }

    #[test]
    fn test_graded_order_within_prereqs() {
        // Sizes (2, 2): sum-0 combo, then the two sum-1 combos in
        // lexicographic order, then sum-2.
        let order = graded_indices(&[2, 2], 100);
        assert_eq!(order, vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]);
    }

    #[test]
    fn test_graded_order_three_groups() {
        let order = graded_indices(&[2, 2, 2], 100);
        assert_eq!(order[0], vec![0, 0, 0]);
        // All sum-1 vectors precede any sum-2 vector.
        let sums: Vec<usize> = order.iter().map(|v| v.iter().sum()).collect();
        let mut sorted = sums.clone();
        sorted.sort_unstable();
        assert_eq!(sums, sorted);
        assert_eq!(order.len(), 8);
    }

    #[test]
    fn test_restartable_after_partial_consumption() {
        let space = ValueSpace::from_specs(&spec(&[&["a=1", "a=2", "a=3"]]), &[]);
        let mut iter = space.tuples(10);
        iter.next();
        drop(iter);
        let again: Vec<AssignmentTuple> = space.tuples(10).collect();
        assert_eq!(again.len(), 3);
        assert_eq!(again[0].id, 0);
    }
}
