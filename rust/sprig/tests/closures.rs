//! Closure-model tests: capture-by-reference snapshots of the scope
//! stack and the bounded two-phase lookup walk.

use sprig::{Interp, Value};

fn run_expr(source: &str) -> Value {
    let mut interp = Interp::new();
    interp.eval(source).expect("source should run")
}

#[test]
fn closure_counter_keeps_private_state() {
    assert_eq!(
        run_expr(
            "(defn make-counter []
               (let [n (ref 0)]
                 (fn [] (ptr-set! n (+ (deref n) 1)))))
             (def c (make-counter))
             (c) (c) (c)"
        ),
        Value::Int(3)
    );
}

#[test]
fn two_counters_do_not_share_state() {
    assert_eq!(
        run_expr(
            "(defn make-counter []
               (let [n (ref 0)]
                 (fn [] (ptr-set! n (+ (deref n) 1)))))
             (def a (make-counter))
             (def b (make-counter))
             (a) (a)
             (b)"
        ),
        Value::Int(1)
    );
}

#[test]
fn copying_a_function_does_not_resnapshot() {
    // `g` shares f's snapshot; both observe the same captured cell
    assert_eq!(
        run_expr(
            "(defn make [] (let [n (ref 10)] (fn [] (deref n))))
             (def f (make))
             (def g f)
             (g)"
        ),
        Value::Int(10)
    );
}

#[test]
fn capture_is_shared_not_copied() {
    assert_eq!(
        run_expr("(def x 1) (def f (fn [] x)) (set x 2) (f)"),
        Value::Int(2)
    );
}

#[test]
fn closure_ignores_caller_locals() {
    // lookup above the call frame goes through the snapshot, not the
    // caller's live scopes
    assert_eq!(
        run_expr(
            "(def y 5)
             (defn probe [] y)
             (defn caller [] (let [y 1000] (probe)))
             (caller)"
        ),
        Value::Int(5)
    );
}

#[test]
fn nested_closures_capture_each_level() {
    assert_eq!(
        run_expr(
            "(defn adder [a]
               (fn [b] (+ a b)))
             (def add3 (adder 3))
             (add3 4)"
        ),
        Value::Int(7)
    );
}

#[test]
fn parameters_shadow_captured_bindings() {
    assert_eq!(
        run_expr("(def v 1) (defn f [v] v) (f 2)"),
        Value::Int(2)
    );
}

#[test]
fn globals_resolve_through_shared_scope() {
    // the global is defined after the closure is created; the snapshot
    // shares the scope map, so the late binding is visible
    assert_eq!(
        run_expr("(defn f [] late) (def late 9) (f)"),
        Value::Int(9)
    );
}
