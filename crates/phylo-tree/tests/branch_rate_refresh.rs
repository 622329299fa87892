use phylo_core::TreeNodeId;
use phylo_tree::{AugmentedTree, BranchRateSummary, RatePair};
use proptest::prelude::*;

/// Five-tip tree: ((A,B),(C,(D,E))).
fn five_taxon() -> AugmentedTree {
    AugmentedTree::from_parents(
        &[None, Some(0), Some(0), Some(1), Some(1), Some(2), Some(2), Some(6), Some(6)],
        &[4.0, 2.0, 3.0, 0.0, 0.0, 0.0, 1.5, 0.0, 0.0],
        &[],
    )
    .unwrap()
}

fn assert_close(a: &BranchRateSummary, b: &BranchRateSummary) {
    assert_eq!(a.branches().len(), b.branches().len());
    for (x, y) in a.branches().iter().zip(b.branches()) {
        assert_eq!(x.num_events, y.num_events);
        assert!((x.mean.speciation - y.mean.speciation).abs() < 1e-12);
        assert!((x.mean.extinction - y.mean.extinction).abs() < 1e-12);
        assert_eq!(x.top, y.top);
        assert_eq!(x.bottom, y.bottom);
    }
}

#[test]
fn mean_rates_are_time_weighted() {
    let mut tree = five_taxon();
    let root = RatePair::new(1.0, 0.5);
    let branch = TreeNodeId::from_raw(5);
    tree.add_event(branch, 1.0, RatePair::new(2.0, 0.5)).unwrap();
    let summary = BranchRateSummary::compute(&tree, root).unwrap();
    let rates = summary.branch(branch).unwrap();
    assert!((rates.mean.speciation - (1.0 + 2.0 * 2.0) / 3.0).abs() < 1e-12);
    assert!((rates.mean.extinction - (0.5 + 0.25 * 2.0) / 3.0).abs() < 1e-12);
    assert_eq!(rates.bottom, RatePair::new(2.0, 0.25));
    assert_eq!(rates.num_events, 1);
}

#[test]
fn shifts_are_inherited_by_descendant_branches() {
    let mut tree = five_taxon();
    let root = RatePair::new(1.0, 0.5);
    tree.add_event(TreeNodeId::from_raw(2), 0.5, RatePair::new(3.0, 2.0)).unwrap();
    let summary = BranchRateSummary::compute(&tree, root).unwrap();
    for below in [5u32, 6, 7, 8] {
        let rates = summary.branch(TreeNodeId::from_raw(below)).unwrap();
        assert_eq!(rates.mean, RatePair::new(3.0, 1.0));
    }
    assert_eq!(summary.branch(TreeNodeId::from_raw(3)).unwrap().mean, root);
}

#[test]
fn refresh_only_touches_the_edited_subtree() {
    let mut tree = five_taxon();
    let root = RatePair::new(1.0, 0.5);
    let mut summary = BranchRateSummary::compute(&tree, root).unwrap();
    tree.add_event(TreeNodeId::from_raw(7), 0.7, RatePair::new(1.5, 1.5)).unwrap();
    assert_eq!(summary.refresh(&tree, root).unwrap(), 1);
    tree.add_event(TreeNodeId::from_raw(6), 0.7, RatePair::new(1.5, 1.5)).unwrap();
    assert_eq!(summary.refresh(&tree, root).unwrap(), 3);
    assert_eq!(summary.refresh(&tree, root).unwrap(), 0);
    assert_close(&summary, &BranchRateSummary::compute(&tree, root).unwrap());
}

#[test]
fn refresh_recomputes_everything_when_the_root_rates_change() {
    let tree = five_taxon();
    let mut summary = BranchRateSummary::compute(&tree, RatePair::new(1.0, 0.5)).unwrap();
    let updated = RatePair::new(2.0, 0.5);
    assert_eq!(summary.refresh(&tree, updated).unwrap(), tree.num_vertices());
    assert_eq!(summary.root(), updated);
}

proptest! {
    #[test]
    fn incremental_refresh_matches_full_recompute(
        edits in prop::collection::vec((0.0..1.0f64, 0.2..4.0f64, any::<bool>()), 1..40)
    ) {
        let mut tree = five_taxon();
        let root = RatePair::new(0.8, 0.3);
        let total = tree.tree_length();
        let mut summary = BranchRateSummary::compute(&tree, root).unwrap();
        for (position, multiplier, remove) in edits {
            let live = tree.event_ids().to_vec();
            if remove && !live.is_empty() {
                let pick = (position * live.len() as f64) as usize % live.len();
                tree.remove_event(live[pick]).unwrap();
            } else {
                let (branch, offset) = tree.locate(position * total).unwrap();
                let _ = tree.add_event(branch, offset, RatePair::new(multiplier, 1.0 / multiplier));
            }
            summary.refresh(&tree, root).unwrap();
            assert_close(&summary, &BranchRateSummary::compute(&tree, root).unwrap());
            prop_assert_eq!(summary.revision(), tree.revision());
        }
    }
}
