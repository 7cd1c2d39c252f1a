use tabula_common::{ElementKind, ElementRef, ErrorCode, Value};

use super::common::*;
use crate::engine::EngineError;

#[test]
fn test_added_rows_are_computed_by_covering_derivations() {
    let e = engine();
    let t = e.create_table(None, 2, 2);
    e.set_derivation(column(&e, t, 2), "5").unwrap();
    e.set_derivation(cell(&e, t, 1, 1), "sum(col 2)").unwrap();
    assert_eq!(number(&e, t, 1, 1), Some(10.0));

    let added = e.add_row(t, Some("Extra")).unwrap();
    assert_eq!(row(&e, t, 3), added);
    assert_eq!(number(&e, t, 3, 2), Some(5.0));
    assert_eq!(number(&e, t, 1, 1), Some(15.0));
    assert_eq!(e.find(t, ElementKind::Row, "extra").unwrap(), Some(added));
}

#[test]
fn test_added_columns_are_computed_by_row_derivations() {
    let e = engine();
    let t = e.create_table(None, 2, 1);
    e.set_derivation(row(&e, t, 2), "7").unwrap();
    let added = e.add_column(t, None).unwrap();
    assert_eq!(column(&e, t, 2), added);
    assert_eq!(number(&e, t, 2, 2), Some(7.0));
    assert_eq!(value(&e, t, 1, 2), None);
}

#[test]
fn test_deleted_rows_break_their_readers() {
    let e = engine();
    let t = e.create_table(None, 3, 2);
    let third = row(&e, t, 3);
    e.set_value(cell(&e, t, 3, 1), 4.0).unwrap();
    e.set_derivation(cell(&e, t, 1, 2), "sum(row 3)").unwrap();
    e.set_derivation(cell(&e, t, 3, 2), "1").unwrap();
    assert_eq!(number(&e, t, 1, 2), Some(5.0));

    e.delete_element(third).unwrap();
    assert_eq!(
        e.value(cell(&e, t, 1, 2)).unwrap(),
        Some(Value::Error(ErrorCode::InvalidTableOperand))
    );
    // the cell derivation went with its row
    assert_eq!(e.with_table(t, |t| t.derivations.len()).unwrap(), 1);
    let gone = ElementRef::Cell(t, third.row().unwrap(), column(&e, t, 1).column().unwrap());
    assert!(matches!(e.value(gone), Err(EngineError::UnknownElement(_))));
}

#[test]
fn test_deleted_columns_take_their_derivations() {
    let e = engine();
    let t = e.create_table(None, 1, 3);
    let doomed = column(&e, t, 2);
    e.set_derivation(doomed, "col 1 + 1").unwrap();
    e.set_derivation(column(&e, t, 3), "col 1 * 2").unwrap();
    e.delete_element(doomed).unwrap();
    assert_eq!(e.with_table(t, |t| t.column_count()).unwrap(), 2);
    assert!(e.affected_by(doomed).unwrap().is_empty());

    e.set_value(cell(&e, t, 1, 1), 3.0).unwrap();
    assert_eq!(number(&e, t, 1, 2), Some(6.0));
}

#[test]
fn test_subset_members_trigger_their_readers() {
    let e = engine();
    let t = e.create_table(None, 3, 2);
    let top = e.add_subset(t, Some("Top"), &[row(&e, t, 1)]).unwrap();
    e.set_value(cell(&e, t, 1, 1), 1.0).unwrap();
    e.set_derivation(cell(&e, t, 3, 2), "sum(subset \"Top\")").unwrap();
    assert_eq!(number(&e, t, 3, 2), Some(1.0));

    e.set_value(cell(&e, t, 1, 2), 10.0).unwrap();
    assert_eq!(number(&e, t, 3, 2), Some(11.0));
    // outside the subset
    let summary = e.set_value(cell(&e, t, 2, 1), 99.0).unwrap();
    assert_eq!(summary.evaluated, 0);

    e.delete_element(top).unwrap();
    assert_eq!(
        e.value(cell(&e, t, 3, 2)).unwrap(),
        Some(Value::Error(ErrorCode::InvalidTableOperand))
    );
}

#[test]
fn test_structural_errors() {
    let e = engine();
    let t = e.create_table(Some("Sheet"), 1, 1);
    assert!(matches!(
        e.delete_element(ElementRef::Table(t)),
        Err(EngineError::NotDeletable(_))
    ));
    assert!(matches!(
        e.add_subset(t, None, &[ElementRef::Table(t)]),
        Err(EngineError::UnknownElement(_))
    ));

    let other = e.create_table(None, 1, 1);
    assert_eq!(e.tables(), vec![t, other]);
    e.delete_table(other).unwrap();
    assert!(matches!(e.value(cell(&e, t, 1, 1)), Ok(None)));
    assert!(matches!(e.row(other, 1), Err(EngineError::UnknownTable(_))));
    assert!(matches!(e.delete_table(other), Err(EngineError::UnknownTable(_))));
}
