use phylo_core::rng::RngHandle;
use phylo_core::TreeNodeId;
use phylo_tree::{resimulate_events, AugmentedTree, BranchRateSummary, RatePair, ShiftProcess};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn balanced_tree(depth: u32) -> AugmentedTree {
    let mut tree = AugmentedTree::new(depth as f64).unwrap();
    let mut frontier = vec![tree.root()];
    for level in 1..=depth {
        let age = (depth - level) as f64;
        let mut next: Vec<TreeNodeId> = Vec::new();
        for parent in frontier {
            next.push(tree.add_child(parent, age, None).unwrap());
            next.push(tree.add_child(parent, age, None).unwrap());
        }
        frontier = next;
    }
    tree
}

fn branch_rate_bench(c: &mut Criterion) {
    let mut tree = balanced_tree(8);
    let mut rng = RngHandle::from_seed(42);
    let process = ShiftProcess::new(0.05, 0.5).unwrap();
    resimulate_events(&mut tree, &process, &mut rng).unwrap();
    let root = RatePair::new(1.0, 0.4);

    c.bench_function("branch_rates_full_256_tips", |b| {
        b.iter(|| black_box(BranchRateSummary::compute(&tree, root).unwrap()));
    });

    let mut summary = BranchRateSummary::compute(&tree, root).unwrap();
    let tips = tree.tips();
    c.bench_function("branch_rates_refresh_single_tip", |b| {
        b.iter(|| {
            let tip = tips[rng.index(tips.len())];
            let length = tree.branch_length(tip).unwrap();
            let id = tree
                .add_event(tip, 0.5 * length, RatePair::new(1.1, 0.9))
                .unwrap();
            black_box(summary.refresh(&tree, root).unwrap());
            tree.remove_event(id).unwrap();
            black_box(summary.refresh(&tree, root).unwrap());
        });
    });
}

criterion_group!(benches, branch_rate_bench);
criterion_main!(benches);
