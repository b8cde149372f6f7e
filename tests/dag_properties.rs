use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;

use proptest::prelude::*;

use dagflow::dag::Dag;

type TestDag = Dag<usize, (), ()>;

fn position_map(order: &[usize]) -> HashMap<usize, usize> {
    order.iter().enumerate().map(|(i, n)| (*n, i)).collect()
}

// Arbitrary edge attempts over a small node set; many are rejected.
fn edge_attempts(max_nodes: usize) -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
    (1..=max_nodes).prop_flat_map(|n| {
        (
            Just(n),
            proptest::collection::vec((0..n, 0..n), 0..(n * 3)),
        )
    })
}

proptest! {
    #[test]
    fn topological_order_respects_every_accepted_edge((n, attempts) in edge_attempts(12)) {
        let dag = TestDag::new();
        for node in 0..n {
            dag.add_node(node, ());
        }

        let mut accepted = Vec::new();
        for (from, to) in attempts {
            let before = dag.edges_count();
            match dag.add_edge(from, to, (), false) {
                Ok(()) => accepted.push((from, to)),
                Err(_) => prop_assert_eq!(dag.edges_count(), before),
            }

            let order = dag.topological_sort().unwrap();
            let pos = position_map(&order);
            for (a, b) in &accepted {
                prop_assert!(pos[a] < pos[b], "{} must precede {}", a, b);
            }
        }
        prop_assert!(!dag.has_cycle());
    }

    #[test]
    fn forest_sorts_to_all_nodes_once(parents in proptest::collection::vec(any::<prop::sample::Index>(), 1..40)) {
        let dag = TestDag::new();
        dag.add_node(0, ());
        for (i, parent) in parents.iter().enumerate() {
            let child = i + 1;
            dag.add_node(child, ());
            // Parent chosen among earlier nodes: acyclic by construction.
            let parent = parent.index(child);
            dag.add_edge(parent, child, (), false).unwrap();
        }

        let order = dag.topological_sort().unwrap();
        prop_assert_eq!(order.len(), parents.len() + 1);
        let unique: HashSet<_> = order.iter().collect();
        prop_assert_eq!(unique.len(), order.len());
    }

    #[test]
    fn reverse_edge_is_rejected_without_change(a in 0usize..50, b in 0usize..50) {
        prop_assume!(a != b);
        let dag = TestDag::new();
        dag.add_edge(a, b, (), true).unwrap();

        prop_assert!(dag.add_edge(b, a, (), true).is_err());
        prop_assert_eq!(dag.edges_count(), 1);
        prop_assert!(!dag.contains_edge(&b, &a));
        prop_assert!(dag.contains_edge(&a, &b));
    }
}

#[test]
fn isolated_node_is_both_begin_and_end() {
    let dag = TestDag::new();
    dag.add_node(7, ());

    assert_eq!(dag.get_begin_nodes(), vec![7]);
    assert_eq!(dag.get_end_nodes(), vec![7]);
}

#[test]
fn auto_created_endpoints_have_no_info() {
    let dag: Dag<&str, u32, &str> = Dag::new();
    dag.add_node("a", 1);
    dag.add_edge("a", "b", "a->b", true).unwrap();

    assert_eq!(dag.get_node(&"a"), Some(1));
    assert!(dag.contains_node(&"b"));
    assert_eq!(dag.get_node(&"b"), None);
    assert_eq!(dag.get_edge(&"a", &"b"), Some("a->b"));
    assert_eq!(dag.get_indegree(&"b"), 1);
}

#[test]
fn concurrent_writers_and_readers_keep_graph_consistent() {
    const NODES: usize = 24;
    let dag = Arc::new(TestDag::new());
    for node in 0..NODES {
        dag.add_node(node, ());
    }

    let handles: Vec<_> = (0..8u64)
        .map(|seed| {
            let dag = Arc::clone(&dag);
            thread::spawn(move || {
                let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
                let mut next = move || {
                    state = state
                        .wrapping_mul(6364136223846793005)
                        .wrapping_add(1442695040888963407);
                    (state >> 33) as usize % NODES
                };
                let mut accepted = Vec::new();
                for _ in 0..200 {
                    let (from, to) = (next(), next());
                    if dag.add_edge(from, to, (), false).is_ok() {
                        accepted.push((from, to));
                    }
                    assert!(dag.topological_sort().is_ok(), "graph became cyclic");
                }
                accepted
            })
        })
        .collect();

    let accepted: Vec<(usize, usize)> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();

    assert!(!dag.has_cycle());
    let order = dag.topological_sort().unwrap();
    let pos = position_map(&order);
    for (from, to) in &accepted {
        assert!(dag.contains_edge(from, to));
        assert!(pos[from] < pos[to]);
    }

    let mut forward = 0;
    let mut backward = 0;
    for node in 0..NODES {
        let next = dag.get_subsequent_nodes(&node);
        let prev = dag.get_previous_nodes(&node);
        forward += next.len();
        backward += prev.len();
        for succ in &next {
            assert!(dag.get_previous_nodes(succ).contains(&node), "{node}->{succ} has no mirror");
        }
        for pred in &prev {
            assert!(dag.get_subsequent_nodes(pred).contains(&node), "{pred}->{node} has no mirror");
        }
    }
    assert_eq!(forward, backward);
    assert_eq!(forward, dag.edges_count());
}
