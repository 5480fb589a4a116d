//! Generated checks for binding hashing and expression binding.

use proptest::prelude::*;
use sitewise_core::binding::{Binding, BindingMap};
use sitewise_operators::expr::ChoiceNodes;
use sitewise_operators::{Expr, Operator};

fn scalar_binding() -> impl Strategy<Value = Binding> {
    prop_oneof![
        (0i64..4).prop_map(Binding::Index),
        any::<i64>().prop_map(Binding::Int),
        (-4000i32..4000).prop_map(|q| Binding::Float(f64::from(q) / 4.0)),
        any::<bool>().prop_map(Binding::Bool),
        "[a-z]{0,6}".prop_map(Binding::String),
    ]
}

fn binding_entries() -> impl Strategy<Value = Vec<(String, Binding)>> {
    prop::collection::vec(("[a-e]", scalar_binding()), 0..6)
}

proptest! {
    #[test]
    fn prop_hash_ignores_insertion_order(entries in binding_entries()) {
        let forward: BindingMap = entries.clone().into_iter().collect();
        let mut reversed_entries = entries;
        reversed_entries.reverse();
        // Later duplicates win on collect, so dedupe on key first.
        let mut seen = std::collections::HashSet::new();
        let deduped: Vec<(String, Binding)> = reversed_entries
            .into_iter()
            .filter(|(k, _)| seen.insert(k.clone()))
            .collect();
        let backward: BindingMap = deduped.into_iter().rev().collect();
        prop_assert_eq!(&forward, &backward);
        prop_assert_eq!(forward.structural_hash(), backward.structural_hash());
    }

    #[test]
    fn prop_different_ints_hash_differently(a in any::<i64>(), b in any::<i64>()) {
        prop_assume!(a != b);
        let x = BindingMap::from([("k", Binding::Int(a))]);
        let y = BindingMap::from([("k", Binding::Int(b))]);
        prop_assert_ne!(x.structural_hash(), y.structural_hash());
    }

    #[test]
    fn prop_json_round_trip_preserves_hash(entries in binding_entries()) {
        let map: BindingMap = entries.into_iter().collect();
        let back = BindingMap::from_json(&map.to_json().unwrap()).unwrap();
        prop_assert_eq!(map.structural_hash(), back.structural_hash());
    }

    #[test]
    fn prop_binding_removes_choice_nodes(pick in 0i64..3, v in any::<i64>(), reps in 0usize..4) {
        let expr = Expr::op(
            Operator::And,
            vec![
                Expr::op(
                    Operator::Gt,
                    vec![
                        Expr::column("a"),
                        Expr::Any {
                            id: "any".into(),
                            choices: vec![
                                Expr::IntConst(1),
                                Expr::Val { id: "inner".into(), domain: Box::new(Expr::column("a")) },
                                Expr::FloatConst(2.5),
                            ],
                        },
                    ],
                ),
                Expr::op(
                    Operator::In,
                    vec![
                        Expr::column("b"),
                        Expr::Multi {
                            id: "many".into(),
                            begin: "(".into(),
                            end: ")".into(),
                            delim: ",".into(),
                            child: Box::new(Expr::Val {
                                id: "x".into(),
                                domain: Box::new(Expr::column("b")),
                            }),
                        },
                    ],
                ),
            ],
        );
        let subs = (0..reps)
            .map(|i| BindingMap::from([("x", Binding::Int(i as i64))]))
            .collect();
        let binding = BindingMap::from([
            ("any", Binding::Index(pick)),
            ("inner", Binding::Int(v)),
            ("many", Binding::Multi(subs)),
        ]);
        let bound = expr.bind(&binding).unwrap();
        prop_assert!(bound.is_bound());
        let mut nodes = ChoiceNodes::new();
        bound.collect_choice_nodes(&mut nodes).unwrap();
        prop_assert!(nodes.is_empty());
    }
}

#[test]
fn signed_zero_floats_share_a_hash() {
    let pos = BindingMap::from([("x", Binding::Float(0.0))]);
    let neg = BindingMap::from([("x", Binding::Float(-0.0))]);
    assert_eq!(pos, neg);
    assert_eq!(pos.structural_hash(), neg.structural_hash());

    let nested = |v: f64| {
        let inner = BindingMap::from([("x", Binding::Float(v))]);
        BindingMap::from([("m", Binding::Multi(vec![inner]))])
    };
    assert_eq!(nested(0.0).structural_hash(), nested(-0.0).structural_hash());
}
