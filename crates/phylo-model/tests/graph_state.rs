use phylo_core::rng::RngHandle;
use phylo_core::{NodeId, PhyloError};
use phylo_model::distributions::{Exponential, Normal};
use phylo_model::functions::{Arithmetic, ArithmeticOp, Exp};
use phylo_model::{Model, ModelBuilder, NodeKind, Value};
use proptest::prelude::*;

struct Fixture {
    model: Model,
    mu: NodeId,
    scale: NodeId,
    x: NodeId,
    shifted: NodeId,
    w: NodeId,
}

/// mu ~ N(0, 1); scale = exp(mu); x ~ N(mu, scale) clamped; shifted = mu + scale; w ~ Exp(1).
fn fixture() -> Fixture {
    let mut builder = ModelBuilder::new();
    let zero = builder.add_constant("zero", 0.0).unwrap();
    let one = builder.add_constant("one", 1.0).unwrap();
    let mu = builder.add_stochastic("mu", Normal, &[zero, one]).unwrap();
    let scale = builder.add_deterministic("scale", Exp, &[mu]).unwrap();
    let x = builder.add_stochastic("x", Normal, &[mu, scale]).unwrap();
    let shifted = builder
        .add_deterministic("shifted", Arithmetic::new(ArithmeticOp::Add), &[mu, scale])
        .unwrap();
    let w = builder.add_stochastic("w", Exponential, &[one]).unwrap();
    builder.set_initial(mu, 0.3).unwrap();
    builder.set_initial(w, 2.0).unwrap();
    builder.clamp(x, 0.5).unwrap();
    let model = builder.build(&mut RngHandle::from_seed(1)).unwrap();
    Fixture {
        model,
        mu,
        scale,
        x,
        shifted,
        w,
    }
}

fn values(model: &Model) -> Vec<Value> {
    model.node_ids().map(|id| model.value(id).unwrap().clone()).collect()
}

fn densities(model: &Model) -> Vec<u64> {
    model
        .node_ids()
        .map(|id| model.node(id).unwrap().cached_log_density().to_bits())
        .collect()
}

#[test]
fn build_evaluates_deterministic_nodes() {
    let mut f = fixture();
    assert_eq!(f.model.node(f.mu).unwrap().kind(), NodeKind::Stochastic);
    assert_eq!(f.model.node(f.scale).unwrap().kind(), NodeKind::Deterministic);
    assert!(f.model.node(f.x).unwrap().is_clamped());
    let scale = f.model.current_value(f.scale).unwrap().as_real().unwrap();
    assert!((scale - 0.3f64.exp()).abs() < 1e-12);
    let shifted = f.model.current_value(f.shifted).unwrap().as_real().unwrap();
    assert!((shifted - (0.3 + 0.3f64.exp())).abs() < 1e-12);
    assert_eq!(f.model.node_id("w").unwrap(), f.w);
}

#[test]
fn touch_dirties_exactly_the_descendants() {
    let mut f = fixture();
    let before = f.model.log_posterior().unwrap();
    for id in f.model.node_ids().collect::<Vec<_>>() {
        assert!(!f.model.is_dirty(id).unwrap());
    }
    f.model.touch(f.mu).unwrap();
    for id in [f.mu, f.scale, f.x, f.shifted] {
        assert!(f.model.is_dirty(id).unwrap(), "{id} should be dirty");
    }
    assert!(!f.model.is_dirty(f.w).unwrap());
    let after = f.model.log_posterior().unwrap();
    assert_eq!(before.to_bits(), after.to_bits());
    f.model.keep_all().unwrap();
}

#[test]
fn writes_change_the_posterior_only_through_reachable_nodes() {
    let mut f = fixture();
    f.model.log_posterior().unwrap();
    let w_density = f.model.log_density(f.w).unwrap();
    f.model.set_value(f.mu, Value::Real(-0.4)).unwrap();
    let posterior = f.model.log_posterior().unwrap();
    assert_eq!(f.model.log_density(f.w).unwrap().to_bits(), w_density.to_bits());
    let expected = f.model.log_density(f.mu).unwrap() + f.model.log_density(f.x).unwrap() + w_density;
    assert!((posterior - expected).abs() < 1e-12);
    f.model.keep(f.mu).unwrap();
    assert!(!f.model.has_pending_changes());
}

#[test]
fn keep_twice_is_idempotent() {
    let mut f = fixture();
    f.model.log_posterior().unwrap();
    f.model.set_value(f.mu, Value::Real(1.1)).unwrap();
    f.model.log_posterior().unwrap();
    f.model.keep(f.mu).unwrap();
    let values_once = values(&f.model);
    let densities_once = densities(&f.model);
    f.model.keep(f.mu).unwrap();
    assert_eq!(values(&f.model), values_once);
    assert_eq!(densities(&f.model), densities_once);
}

#[test]
fn restore_reverts_bit_for_bit() {
    let mut f = fixture();
    let posterior = f.model.log_posterior().unwrap();
    let before_values = values(&f.model);
    let before_densities = densities(&f.model);
    f.model.set_value(f.mu, Value::Real(-2.5)).unwrap();
    f.model.log_posterior().unwrap();
    f.model.restore(f.mu).unwrap();
    assert_eq!(values(&f.model), before_values);
    assert_eq!(densities(&f.model), before_densities);
    assert!(!f.model.is_dirty(f.scale).unwrap());
    assert_eq!(f.model.log_posterior().unwrap().to_bits(), posterior.to_bits());
}

#[test]
fn restore_after_touch_without_evaluation() {
    let mut f = fixture();
    f.model.log_posterior().unwrap();
    let before_values = values(&f.model);
    f.model.touch(f.mu).unwrap();
    f.model.restore_all();
    assert_eq!(values(&f.model), before_values);
    assert!(!f.model.is_dirty(f.x).unwrap());
    assert!(!f.model.has_pending_changes());
}

#[test]
fn cached_posterior_refuses_stale_nodes() {
    let mut f = fixture();
    let posterior = f.model.log_posterior().unwrap();
    assert_eq!(f.model.cached_log_posterior().unwrap().to_bits(), posterior.to_bits());
    f.model.set_value(f.mu, Value::Real(0.9)).unwrap();
    match f.model.cached_log_posterior().unwrap_err() {
        PhyloError::Graph(info) => assert_eq!(info.code, "stale-node"),
        other => panic!("unexpected error {other:?}"),
    }
    let updated = f.model.log_posterior().unwrap();
    assert_eq!(f.model.cached_log_posterior().unwrap().to_bits(), updated.to_bits());
    f.model.keep_all().unwrap();
}

struct Shared {
    model: Model,
    a: NodeId,
    b: NodeId,
    d: NodeId,
    y: NodeId,
}

/// a ~ N(0, 1); b ~ N(0, 1); d = a + b; y ~ N(d, 1) clamped.
fn shared_descendant() -> Shared {
    let mut builder = ModelBuilder::new();
    let zero = builder.add_constant("zero", 0.0).unwrap();
    let one = builder.add_constant("one", 1.0).unwrap();
    let a = builder.add_stochastic("a", Normal, &[zero, one]).unwrap();
    let b = builder.add_stochastic("b", Normal, &[zero, one]).unwrap();
    let d = builder
        .add_deterministic("d", Arithmetic::new(ArithmeticOp::Add), &[a, b])
        .unwrap();
    let y = builder.add_stochastic("y", Normal, &[d, one]).unwrap();
    builder.set_initial(a, 0.5).unwrap();
    builder.set_initial(b, 0.5).unwrap();
    builder.clamp(y, 0.2).unwrap();
    let mut model = builder.build(&mut RngHandle::from_seed(1)).unwrap();
    model.log_posterior().unwrap();
    Shared { model, a, b, d, y }
}

fn real(model: &Model, id: NodeId) -> f64 {
    model.value(id).unwrap().as_real().unwrap()
}

fn expected_posterior(a: f64, b: f64) -> f64 {
    let log_normal =
        |x: f64, mean: f64| -0.5 * (x - mean).powi(2) - 0.5 * (2.0 * std::f64::consts::PI).ln();
    log_normal(a, 0.0) + log_normal(b, 0.0) + log_normal(0.2, a + b)
}

#[test]
fn keeping_one_write_and_restoring_another_settles_the_shared_child() {
    let mut s = shared_descendant();
    s.model.set_value(s.a, Value::Real(1.0)).unwrap();
    s.model.set_value(s.b, Value::Real(2.0)).unwrap();
    s.model.log_posterior().unwrap();
    s.model.keep(s.a).unwrap();
    assert!(s.model.has_pending_changes());
    assert!(s.model.is_dirty(s.d).unwrap());
    s.model.restore(s.b).unwrap();
    assert!(!s.model.has_pending_changes());
    assert_eq!(real(&s.model, s.b), 0.5);
    assert!(!s.model.is_dirty(s.d).unwrap());
    assert!((real(&s.model, s.d) - 1.5).abs() < 1e-12);
    assert!((s.model.cached_log_posterior().unwrap() - expected_posterior(1.0, 0.5)).abs() < 1e-12);
    let observed = -0.5 * (0.2f64 - 1.5).powi(2) - 0.5 * (2.0 * std::f64::consts::PI).ln();
    assert!((s.model.log_density(s.y).unwrap() - observed).abs() < 1e-12);
}

#[test]
fn restoring_one_write_before_keeping_another_keeps_the_shared_child_consistent() {
    let mut s = shared_descendant();
    s.model.set_value(s.a, Value::Real(1.0)).unwrap();
    s.model.set_value(s.b, Value::Real(2.0)).unwrap();
    s.model.log_posterior().unwrap();
    s.model.restore(s.b).unwrap();
    assert_eq!(real(&s.model, s.b), 0.5);
    assert!(s.model.is_dirty(s.d).unwrap());
    s.model.keep(s.a).unwrap();
    assert!(!s.model.has_pending_changes());
    assert!(!s.model.is_dirty(s.d).unwrap());
    assert!((real(&s.model, s.d) - 1.5).abs() < 1e-12);
    assert!((s.model.log_posterior().unwrap() - expected_posterior(1.0, 0.5)).abs() < 1e-12);
}

#[test]
fn restoring_both_writes_one_at_a_time_is_exact() {
    let mut s = shared_descendant();
    let before_values = values(&s.model);
    let before_densities = densities(&s.model);
    s.model.set_value(s.a, Value::Real(1.0)).unwrap();
    s.model.set_value(s.b, Value::Real(2.0)).unwrap();
    s.model.log_posterior().unwrap();
    s.model.restore(s.a).unwrap();
    s.model.restore(s.b).unwrap();
    assert!(!s.model.has_pending_changes());
    assert_eq!(values(&s.model), before_values);
    assert_eq!(densities(&s.model), before_densities);
    for id in s.model.node_ids().collect::<Vec<_>>() {
        assert!(!s.model.is_dirty(id).unwrap());
    }
}

#[test]
fn keeping_an_unrelated_write_leaves_the_other_revertible() {
    let mut f = fixture();
    f.model.log_posterior().unwrap();
    let mu_before = f.model.value(f.mu).unwrap().clone();
    f.model.set_value(f.mu, Value::Real(0.8)).unwrap();
    f.model.set_value(f.w, Value::Real(1.5)).unwrap();
    f.model.log_posterior().unwrap();
    f.model.keep(f.w).unwrap();
    f.model.restore(f.mu).unwrap();
    assert_eq!(f.model.value(f.mu).unwrap(), &mu_before);
    assert_eq!(f.model.value(f.w).unwrap(), &Value::Real(1.5));
    assert!(!f.model.has_pending_changes());
    let scale = f.model.current_value(f.scale).unwrap().as_real().unwrap();
    assert!((scale - 0.3f64.exp()).abs() < 1e-12);
}

#[test]
fn clamped_and_deterministic_nodes_reject_writes() {
    let mut f = fixture();
    let err = f.model.set_value(f.x, Value::Real(1.0)).unwrap_err();
    assert!(matches!(err, PhyloError::Configuration(_)));
    assert_eq!(err.info().code, "clamped-node");
    let err = f.model.set_value(f.scale, Value::Real(1.0)).unwrap_err();
    assert_eq!(err.info().code, "not-stochastic");
    assert!(!f.model.has_pending_changes());
}

#[test]
fn out_of_support_values_are_numerical_errors() {
    let mut f = fixture();
    f.model.log_posterior().unwrap();
    f.model.set_value(f.w, Value::Real(-1.0)).unwrap();
    let err = f.model.log_posterior().unwrap_err();
    assert!(!err.is_fatal());
    f.model.restore_all();
    assert!(f.model.log_posterior().is_ok());
}

#[test]
fn redraw_and_reset_leave_no_snapshots() {
    let mut f = fixture();
    let mut rng = RngHandle::from_seed(99);
    f.model.redraw(f.w, &mut rng).unwrap();
    assert!(!f.model.has_pending_changes());
    assert!(f.model.is_dirty(f.w).unwrap());
    assert!(f.model.reset_to_initial(f.w).unwrap());
    assert_eq!(f.model.value(f.w).unwrap(), &Value::Real(2.0));
    assert!(f.model.redraw(f.x, &mut rng).is_err());
}

proptest! {
    #[test]
    fn random_write_sequences_restore_exactly(writes in prop::collection::vec((-3.0..3.0f64, 0.1..5.0f64, any::<bool>()), 1..20)) {
        let mut f = fixture();
        f.model.log_posterior().unwrap();
        for (mu, w, accept) in writes {
            let committed_values = values(&f.model);
            let committed_densities = densities(&f.model);
            f.model.set_value(f.mu, Value::Real(mu)).unwrap();
            f.model.set_value(f.w, Value::Real(w)).unwrap();
            f.model.log_posterior().unwrap();
            if accept {
                f.model.keep_all().unwrap();
                prop_assert_eq!(f.model.value(f.mu).unwrap(), &Value::Real(mu));
            } else {
                f.model.restore_all();
                prop_assert_eq!(values(&f.model), committed_values);
                prop_assert_eq!(densities(&f.model), committed_densities);
            }
            prop_assert!(!f.model.has_pending_changes());
        }
    }
}
