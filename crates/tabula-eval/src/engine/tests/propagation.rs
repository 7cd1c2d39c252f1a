//! Waves: ordering, once-per-wave evaluation, and manual recalculation.
use super::common::*;
use crate::config::EngineConfig;

#[test]
fn test_chain_updates_transitively() {
    let e = engine();
    let t = e.create_table(None, 1, 4);
    e.set_derivation(column(&e, t, 2), "col 1 + 1").unwrap();
    e.set_derivation(column(&e, t, 3), "col 2 * 2").unwrap();
    e.set_derivation(column(&e, t, 4), "col 3 - 1").unwrap();

    let summary = e.set_value(cell(&e, t, 1, 1), 4.0).unwrap();
    assert_eq!(summary.evaluated, 3);
    assert_eq!(summary.changed, 4);
    assert_eq!(number(&e, t, 1, 4), Some(9.0));
}

#[test]
fn test_diamond_evaluates_each_node_once() {
    let e = engine();
    let t = e.create_table(None, 1, 4);
    e.set_derivation(column(&e, t, 4), "col 2 + col 3").unwrap();
    e.set_derivation(column(&e, t, 2), "col 1 + 1").unwrap();
    e.set_derivation(column(&e, t, 3), "col 1 * 2").unwrap();

    let summary = e.set_value(cell(&e, t, 1, 1), 10.0).unwrap();
    assert_eq!(summary.evaluated, 3);
    assert!(summary.cyclic.is_empty());
    assert_eq!(number(&e, t, 1, 2), Some(11.0));
    assert_eq!(number(&e, t, 1, 3), Some(20.0));
    assert_eq!(number(&e, t, 1, 4), Some(31.0));
}

#[test]
fn test_unchanged_results_stop_the_wave() {
    let e = engine();
    let t = e.create_table(None, 1, 3);
    e.set_derivation(column(&e, t, 2), "col 1 > 0").unwrap();
    e.set_derivation(column(&e, t, 3), "if(col 2, 1, -1)").unwrap();
    e.set_value(cell(&e, t, 1, 1), 1.0).unwrap();
    assert_eq!(number(&e, t, 1, 3), Some(1.0));

    // col 2 stays true, so col 3 is not revisited
    let summary = e.set_value(cell(&e, t, 1, 1), 2.0).unwrap();
    assert_eq!(summary.evaluated, 1);
    assert_eq!(summary.changed, 1);
}

#[test]
fn test_stat_readers_follow_any_cell_of_their_range() {
    let e = engine();
    let t = e.create_table(None, 3, 2);
    fill_column(&e, t, 1, &[1.0, 2.0, 3.0]);
    e.set_derivation(cell(&e, t, 1, 2), "sum(col 1)").unwrap();
    assert_eq!(number(&e, t, 1, 2), Some(6.0));

    e.set_value(cell(&e, t, 3, 1), 10.0).unwrap();
    assert_eq!(number(&e, t, 1, 2), Some(13.0));
}

#[test]
fn test_recalculate_is_idempotent() {
    let e = engine_with(EngineConfig::default().with_auto_recalculate(false));
    let t = e.create_table(None, 2, 3);
    fill_column(&e, t, 1, &[1.0, 2.0]);
    e.set_derivation(column(&e, t, 2), "col 1 * 3").unwrap();
    e.set_derivation(column(&e, t, 3), "col 2 + col 1").unwrap();
    fill_column(&e, t, 1, &[5.0, 6.0]);

    let first = e.recalculate_table(t).unwrap();
    assert_eq!(first.evaluated, 2);
    let snapshot: Vec<Option<f64>> = (1..=2).flat_map(|r| (1..=3).map(move |c| (r, c))).map(|(r, c)| number(&e, t, r, c)).collect();
    assert_eq!(number(&e, t, 2, 3), Some(24.0));

    let second = e.recalculate_table(t).unwrap();
    assert_eq!(second.changed, 0);
    assert!(second.assembly > first.assembly);
    let again: Vec<Option<f64>> = (1..=2).flat_map(|r| (1..=3).map(move |c| (r, c))).map(|(r, c)| number(&e, t, r, c)).collect();
    assert_eq!(snapshot, again);
}

#[test]
fn test_turning_auto_recalculate_on_catches_up() {
    let e = engine();
    let t = e.create_table(None, 1, 2);
    e.set_derivation(column(&e, t, 2), "col 1 + 1").unwrap();
    e.set_auto_recalculate(t, false).unwrap();
    e.set_value(cell(&e, t, 1, 1), 1.0).unwrap();
    assert_eq!(value(&e, t, 1, 2), None);

    e.set_auto_recalculate(t, true).unwrap();
    assert_eq!(number(&e, t, 1, 2), Some(2.0));
}

#[test]
fn test_recalculating_an_input_cell_refreshes_its_readers() {
    let e = engine_with(EngineConfig::default().with_auto_recalculate(false));
    let t = e.create_table(None, 1, 3);
    e.set_derivation(column(&e, t, 2), "col 1 + 1").unwrap();
    e.set_derivation(column(&e, t, 3), "col 2 + 1").unwrap();
    e.set_value(cell(&e, t, 1, 1), 1.0).unwrap();

    e.recalculate(cell(&e, t, 1, 1)).unwrap();
    assert_eq!(number(&e, t, 1, 3), Some(3.0));
}

#[test]
fn test_edges_are_reported_both_ways() {
    let e = engine();
    let t = e.create_table(None, 1, 3);
    let (c1, c2, c3) = (column(&e, t, 1), column(&e, t, 2), column(&e, t, 3));
    e.set_derivation(c3, "col 1 + col 2").unwrap();
    assert_eq!(e.affected_by(c3).unwrap(), vec![c1, c2]);
    assert_eq!(e.affects(c1).unwrap(), vec![c3]);

    e.clear_derivation(c3).unwrap();
    assert!(e.affects(c1).unwrap().is_empty());
    assert!(e.affected_by(c3).unwrap().is_empty());
}

#[test]
fn test_wave_size_limit_truncates() {
    let e = engine_with(EngineConfig::default().with_max_wave_nodes(2));
    let t = e.create_table(None, 1, 4);
    e.set_derivation(column(&e, t, 2), "col 1 + 1").unwrap();
    e.set_derivation(column(&e, t, 3), "col 2 + 1").unwrap();
    e.set_derivation(column(&e, t, 4), "col 3 + 1").unwrap();

    let summary = e.set_value(cell(&e, t, 1, 1), 1.0).unwrap();
    assert_eq!(summary.evaluated, 2);
    assert_eq!(number(&e, t, 1, 3), Some(3.0));
    assert_eq!(value(&e, t, 1, 4), None);
}
