//! Duplicated instances, shared globals, and channel plumbing.

use sprig::{Interp, Value};

fn run_expr(source: &str) -> Value {
    let mut interp = Interp::new();
    interp.eval(source).expect("source should run")
}

#[test]
fn spawn_runs_on_duplicated_instance() {
    assert_eq!(
        run_expr("(defn work [a b] (* a b)) (recv! (spawn work 6 7))"),
        Value::Int(42)
    );
}

#[test]
fn spawned_task_reads_shared_globals() {
    assert_eq!(
        run_expr("(def base 40) (defn job [] (+ base 2)) (recv! (spawn job))"),
        Value::Int(42)
    );
}

#[test]
fn spawned_task_writes_shared_globals() {
    assert_eq!(
        run_expr(
            "(def flag 0)
             (defn job [] (set flag 1))
             (recv! (spawn job))
             flag"
        ),
        Value::Int(1)
    );
}

#[test]
fn bounded_channel_backpressure() {
    // the producer can buffer at most 2 items, so it must block until the
    // consumer drains; the sum proves all five values arrived in order
    assert_eq!(
        run_expr(
            "(def ch (chan 2))
             (defn produce []
               (for [(def i 0) (< i 5) (def i (+ i 1))]
                 (send! ch i))
               0)
             (spawn produce)
             (def total 0)
             (for [(def k 0) (< k 5) (def k (+ k 1))]
               (set total (+ total (recv! ch))))
             total"
        ),
        Value::Int(10)
    );
}

#[test]
fn channel_values_cross_instances_by_reference() {
    // the array travels through the channel as a shared reference; a
    // mutation on the receiving side is visible to the sender's copy
    assert_eq!(
        run_expr(
            "(def a [1 2 3])
             (def ch (chan))
             (defn sender [] (send! ch a) 0)
             (recv! (spawn sender))
             (def got (recv! ch))
             (aset! got 0 99)
             (aget a 0)"
        ),
        Value::Int(99)
    );
}

#[test]
fn duplicate_has_fresh_stacks_but_shared_globals() {
    let mut parent = Interp::new();
    parent.eval("(def g 1)").unwrap();
    let mut child = parent.duplicate();
    assert_eq!(child.eval("g").unwrap(), Value::Int(1));
    child.eval("(set g 2)").unwrap();
    assert_eq!(parent.eval("g").unwrap(), Value::Int(2));
}

#[test]
fn duplicate_does_not_share_loaded_program() {
    let mut parent = Interp::new();
    parent.load("(+ 1 2)").unwrap();
    let mut child = parent.duplicate();
    assert!(child.run().is_err());
    assert_eq!(parent.run().unwrap(), Value::Int(3));
}

#[test]
fn tasks_park_on_empty_channel_until_send() {
    assert_eq!(
        run_expr(
            "(def req (chan))
             (def resp (chan))
             (defn echo [] (send! resp (+ 1 (recv! req))) 0)
             (spawn echo)
             (send! req 41)
             (recv! resp)"
        ),
        Value::Int(42)
    );
}
