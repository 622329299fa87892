use phylo_core::{PhyloError, TreeNodeId};
use phylo_tree::{
    birth_death_log_likelihood, integrate_segment, shift_process_log_prior, AugmentedTree,
    RatePair, SegmentState,
};

fn three_taxon() -> AugmentedTree {
    AugmentedTree::from_parents(
        &[None, Some(0), Some(0), Some(1), Some(1)],
        &[2.0, 1.0, 0.0, 0.0, 0.0],
        &[None, None, Some("C".into()), Some("A".into()), Some("B".into())],
    )
    .unwrap()
}

/// Fourth-order Runge-Kutta on (E, ln D).
fn reference_segment(state: SegmentState, rates: RatePair, duration: f64) -> SegmentState {
    let (lambda, mu) = (rates.speciation, rates.extinction);
    let deriv = |e: f64| -> (f64, f64) {
        (
            mu - (lambda + mu) * e + lambda * e * e,
            -(lambda + mu) + 2.0 * lambda * e,
        )
    };
    let steps = 20_000;
    let h = duration / steps as f64;
    let (mut e, mut log_d) = (state.extinction, state.log_density);
    for _ in 0..steps {
        let k1 = deriv(e);
        let k2 = deriv(e + 0.5 * h * k1.0);
        let k3 = deriv(e + 0.5 * h * k2.0);
        let k4 = deriv(e + h * k3.0);
        e += h / 6.0 * (k1.0 + 2.0 * k2.0 + 2.0 * k3.0 + k4.0);
        log_d += h / 6.0 * (k1.1 + 2.0 * k2.1 + 2.0 * k3.1 + k4.1);
    }
    SegmentState {
        extinction: e,
        log_density: log_d,
    }
}

#[test]
fn closed_form_segments_match_numerical_integration() {
    let start = SegmentState {
        extinction: 0.2,
        log_density: -0.3,
    };
    for rates in [
        RatePair::new(1.3, 0.6),
        RatePair::new(0.4, 0.9),
        RatePair::new(2.0, 0.0),
        RatePair::new(0.8, 0.8),
    ] {
        let closed = integrate_segment(start, rates, 2.0).unwrap();
        let numeric = reference_segment(start, rates, 2.0);
        assert!(
            (closed.extinction - numeric.extinction).abs() < 1e-8,
            "E mismatch for {rates:?}"
        );
        assert!(
            (closed.log_density - numeric.log_density).abs() < 1e-8,
            "D mismatch for {rates:?}"
        );
    }
}

#[test]
fn pure_birth_reduces_to_yule() {
    let tree = three_taxon();
    let lambda = 0.7;
    let log_l = birth_death_log_likelihood(&tree, RatePair::new(lambda, 0.0), 1.0).unwrap();
    let expected = lambda.ln() - lambda * tree.tree_length();
    assert!((log_l - expected).abs() < 1e-12);
}

#[test]
fn neutral_events_do_not_change_the_likelihood() {
    let mut tree = three_taxon();
    let root = RatePair::new(1.1, 0.4);
    let base = birth_death_log_likelihood(&tree, root, 0.8).unwrap();
    tree.add_event(TreeNodeId::from_raw(1), 0.3, RatePair::unit()).unwrap();
    tree.add_event(TreeNodeId::from_raw(2), 1.2, RatePair::unit()).unwrap();
    let with_events = birth_death_log_likelihood(&tree, root, 0.8).unwrap();
    assert!((base - with_events).abs() < 1e-10);
}

#[test]
fn shifted_segment_uses_the_multiplied_rate() {
    let mut tree = three_taxon();
    let lambda = 0.5;
    tree.add_event(TreeNodeId::from_raw(2), 0.5, RatePair::new(2.0, 1.0)).unwrap();
    let log_l = birth_death_log_likelihood(&tree, RatePair::new(lambda, 0.0), 1.0).unwrap();
    // A and B and the internal branch keep lambda; C spends 1.5 time units at 2 * lambda.
    let expected = lambda.ln() - lambda * 3.0 - (lambda * 0.5 + 2.0 * lambda * 1.5);
    assert!((log_l - expected).abs() < 1e-12);
}

#[test]
fn shifted_internal_branch_changes_the_daughter_speciation_term() {
    let mut tree = three_taxon();
    let lambda = 0.5;
    tree.add_event(TreeNodeId::from_raw(1), 0.5, RatePair::new(3.0, 1.0)).unwrap();
    let log_l = birth_death_log_likelihood(&tree, RatePair::new(lambda, 0.0), 1.0).unwrap();
    let shifted = 3.0 * lambda;
    let expected = shifted.ln() - 2.0 * shifted - (lambda * 0.5 + shifted * 0.5) - 2.0 * lambda;
    assert!((log_l - expected).abs() < 1e-12);
}

#[test]
fn invalid_parameters_are_numerical_errors() {
    let tree = three_taxon();
    for (root, rho) in [
        (RatePair::new(0.0, 0.1), 1.0),
        (RatePair::new(1.0, -0.1), 1.0),
        (RatePair::new(1.0, 0.1), 0.0),
        (RatePair::new(1.0, 0.1), 1.5),
        (RatePair::new(f64::NAN, 0.1), 1.0),
    ] {
        let err = birth_death_log_likelihood(&tree, root, rho).unwrap_err();
        assert!(matches!(err, PhyloError::Numerical(_)), "{root:?} {rho}");
    }
}

#[test]
fn polytomies_are_rejected() {
    let tree = AugmentedTree::from_parents(
        &[None, Some(0), Some(0), Some(0)],
        &[1.0, 0.0, 0.0, 0.0],
        &[],
    )
    .unwrap();
    let err = birth_death_log_likelihood(&tree, RatePair::new(1.0, 0.2), 1.0).unwrap_err();
    assert_eq!(err.info().code, "non-binary-tree");
}

#[test]
fn shift_prior_counts_events_and_multipliers() {
    let mut tree = three_taxon();
    let rate = 0.2;
    let sigma = 0.5;
    let empty = shift_process_log_prior(&tree, rate, sigma).unwrap();
    assert!((empty + rate * 5.0).abs() < 1e-12);
    tree.add_event(TreeNodeId::from_raw(3), 0.5, RatePair::unit()).unwrap();
    let one = shift_process_log_prior(&tree, rate, sigma).unwrap();
    let unit_density = -(sigma.ln()) - 0.5 * (2.0 * std::f64::consts::PI).ln();
    assert!((one - (empty + rate.ln() + 2.0 * unit_density)).abs() < 1e-12);
}
