//! End-to-end scenarios against a live MAPI server. Ignored by default since
//! they need a running `monetdbd`-style server; point `MAPI_TEST_*` env vars
//! at one and run with `cargo test -- --ignored`.

use std::collections::HashMap;
use std::env;

use mapi_driver::{Pool, PoolConfig, QueryResult, TxOutcome, Value};

fn test_config(pool_size: usize) -> PoolConfig {
    let mut options = HashMap::new();
    options.insert("host".to_string(), env::var("MAPI_TEST_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()));
    options.insert("port".to_string(), env::var("MAPI_TEST_PORT").unwrap_or_else(|_| "50000".to_string()));
    options.insert("database".to_string(), env::var("MAPI_TEST_DATABASE").unwrap_or_else(|_| "monetdb".to_string()));
    options.insert("username".to_string(), env::var("MAPI_TEST_USER").unwrap_or_else(|_| "monetdb".to_string()));
    options.insert("password".to_string(), env::var("MAPI_TEST_PASSWORD").unwrap_or_else(|_| "monetdb".to_string()));
    options.insert("pool_size".to_string(), pool_size.to_string());
    options.insert("name".to_string(), "integration".to_string());
    PoolConfig::from_options(&options).expect("valid test config")
}

#[test]
#[ignore]
fn select_false_literal_yields_empty_rows() {
    let pool = Pool::start(test_config(2));
    let mut conn = pool.checkout().expect("checkout");

    let result = conn.query("select 1 where false").expect("query");
    match result {
        QueryResult::Rows { rows, row_count, types, .. } => {
            assert_eq!(row_count, 0);
            assert!(rows.is_empty());
            assert_eq!(types.len(), 1);
        }
        other => panic!("expected Rows, got {other:?}"),
    }
}

#[test]
#[ignore]
fn prepared_arithmetic_with_string_literal() {
    let pool = Pool::start(test_config(2));
    let mut conn = pool.checkout().expect("checkout");

    let result = conn
        .query_with_args("select 1 - ?, 'a'", &[Value::Int(1)])
        .expect("query");
    match result {
        QueryResult::Rows { rows, .. } => {
            assert_eq!(rows, vec![vec![Value::Int(0), Value::Str("a".to_string())]]);
        }
        other => panic!("expected Rows, got {other:?}"),
    }

    assert_no_prepared_statements(&mut conn);
}

#[test]
#[ignore]
fn select_star_orders_rows_as_inserted() {
    let pool = Pool::start(test_config(1));
    let mut conn = pool.checkout().expect("checkout");

    conn.query("drop table if exists result_test").expect("drop");
    conn.query("create table result_test (id int, name varchar(32))").expect("create");
    conn.query_with_args("insert into result_test values (?, ?)", &[Value::Int(1), Value::Str("Leto".into())])
        .expect("insert 1");
    conn.query_with_args("insert into result_test values (?, ?)", &[Value::Int(2), Value::Str("Jessica".into())])
        .expect("insert 2");
    conn.query_with_args("insert into result_test values (?, ?)", &[Value::Int(3), Value::Str("Paul".into())])
        .expect("insert 3");

    let result = conn.query("select * from result_test order by id").expect("select");
    match result {
        QueryResult::Rows { rows, .. } => {
            assert_eq!(
                rows,
                vec![
                    vec![Value::Int(1), Value::Str("Leto".to_string())],
                    vec![Value::Int(2), Value::Str("Jessica".to_string())],
                    vec![Value::Int(3), Value::Str("Paul".to_string())],
                ]
            );
        }
        other => panic!("expected Rows, got {other:?}"),
    }

    conn.query("drop table result_test").expect("cleanup");
}

#[test]
#[ignore]
fn transaction_commit_path_makes_rows_visible() {
    let pool = Pool::start(test_config(1));
    let mut conn = pool.checkout().expect("checkout");

    conn.query("drop table if exists tx_test").expect("drop");
    conn.query("create table tx_test (value int)").expect("create");

    let outcome = conn.transaction(|tx| -> mapi_driver::Result<TxOutcome<QueryResult, QueryResult>> {
        tx.query_with_args("insert into tx_test values (?)", &[Value::Int(3)])?;
        let rows = tx.query("select * from tx_test")?;
        Ok(TxOutcome::Commit(rows))
    });

    match outcome {
        Ok(QueryResult::Rows { rows, .. }) => assert_eq!(rows, vec![vec![Value::Int(3)]]),
        other => panic!("expected committed Rows, got {other:?}"),
    }

    let after = conn.query("select * from tx_test").expect("select after commit");
    match after {
        QueryResult::Rows { row_count, .. } => assert_eq!(row_count, 1),
        other => panic!("expected Rows, got {other:?}"),
    }

    conn.query("drop table tx_test").expect("cleanup");
}

#[test]
#[ignore]
fn transaction_rollback_path_leaves_table_empty() {
    let pool = Pool::start(test_config(1));
    let mut conn = pool.checkout().expect("checkout");

    conn.query("drop table if exists tx_test").expect("drop");
    conn.query("create table tx_test (value int)").expect("create");

    let outcome = conn.transaction(|tx| {
        tx.query_with_args("insert into tx_test values (?)", &[Value::Int(3)])?;
        Ok::<TxOutcome<(), &str>, mapi_driver::Error>(TxOutcome::Rollback("fail"))
    });

    match outcome {
        Err(err) => assert_eq!(err.rolled(), Some("fail")),
        Ok(_) => panic!("expected rollback"),
    }

    let after = conn.query("select * from tx_test").expect("select after rollback");
    match after {
        QueryResult::Rows { row_count, .. } => assert_eq!(row_count, 0),
        other => panic!("expected Rows, got {other:?}"),
    }

    conn.query("drop table tx_test").expect("cleanup");
}

#[test]
#[ignore]
fn named_prepared_statements_are_deallocated_at_transaction_end() {
    let pool = Pool::start(test_config(1));
    let mut conn = pool.checkout().expect("checkout");

    let outcome = conn.transaction(|tx| -> mapi_driver::Result<TxOutcome<QueryResult, QueryResult>> {
        tx.prepare("stmt_a", "select 1")?;
        let result = tx.exec_prepared("stmt_a", &[])?;
        Ok(TxOutcome::Commit(result))
    });
    assert!(outcome.is_ok());

    assert_no_prepared_statements(&mut conn);
}

fn assert_no_prepared_statements(conn: &mut mapi_driver::PooledConnection) {
    let result = conn.query("select count(*) from sys.prepared_statements").expect("count query");
    match result {
        QueryResult::Rows { rows, .. } => assert_eq!(rows, vec![vec![Value::Int(0)]]),
        other => panic!("expected Rows, got {other:?}"),
    }
}
