//! Integration tests for session binding, cursor admission and completion.

mod common;

use common::{Event, MockDriver, Reply, Script, rows, settle, source};
use data_engine::db::Session;
use data_engine::error::DataError;
use data_engine::models::{Statement, StatementKind, Value};
use std::sync::Arc;
use std::time::Duration;

fn session(driver: MockDriver) -> Arc<Session> {
    Session::new(Arc::new(source()), Arc::new(driver), None)
}

fn execute(text: &str) -> Statement {
    Statement::new(StatementKind::Execute, text)
}

fn select(text: &str) -> Statement {
    Statement::new(StatementKind::Select, text)
}

#[tokio::test]
async fn test_commands_share_one_connection_and_transaction() {
    let script = Script::new();
    let session = session(MockDriver::new(&script));

    let a = session.build_command(&execute("UPDATE a")).unwrap();
    let b = session.build_command(&execute("UPDATE b")).unwrap();
    let c = session.build_command(&execute("UPDATE c")).unwrap();
    assert_eq!(script.opens(), 0, "building a command must not connect");

    let (ra, rb, rc) = tokio::join!(a.execute(), b.execute(), c.execute());
    assert_eq!((ra.unwrap(), rb.unwrap(), rc.unwrap()), (1, 1, 1));

    let events = script.events();
    assert_eq!(events[0], Event::Open("c1".to_string()));
    assert_eq!(events[1], Event::Begin("c1".to_string()));
    assert_eq!(script.opens(), 1);
    assert_eq!(script.count(|e| matches!(e, Event::Begin(_))), 1);
    assert!(
        events
            .iter()
            .filter(|e| e.sql().is_some())
            .all(|e| e.connection() == "c1")
    );

    session.commit().await.unwrap();
    assert_eq!(script.commits(), 1);
    assert!(script.events().contains(&Event::Close("c1".to_string())));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_completion_runs_exactly_once() {
    let script = Script::new();
    let session = session(MockDriver::new(&script));
    session
        .build_command(&execute("UPDATE a"))
        .unwrap()
        .execute()
        .await
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                if i % 2 == 0 {
                    session.commit().await
                } else {
                    session.rollback().await
                }
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(script.commits() + script.rollbacks(), 1);
    assert!(session.is_completed());
}

#[tokio::test]
async fn test_completed_session_rejects_commands() {
    let script = Script::new();
    let session = session(MockDriver::new(&script));
    session.commit().await.unwrap();

    let err = session
        .build_command(&execute("UPDATE a"))
        .unwrap()
        .execute()
        .await
        .unwrap_err();
    assert!(matches!(err, DataError::SessionCompleted { .. }));
    assert!(err.is_fatal());
    assert_eq!(script.opens(), 0);
}

#[tokio::test]
async fn test_concurrent_read_without_mars_uses_private_connection() {
    let script = Script::new();
    script.reply("SELECT a", rows(["n"], vec![vec![Value::Int(1)]]));
    script.reply("SELECT b", rows(["n"], vec![vec![Value::Int(2)]]));
    let session = session(MockDriver::new(&script));

    let first = session.build_command(&select("SELECT a")).unwrap();
    let second = session.build_command(&select("SELECT b")).unwrap();

    let mut shared = first.query().await.unwrap();
    let mut private = second.query().await.unwrap();
    assert!(shared.is_shared());
    assert!(!private.is_shared());
    assert_eq!(session.readers(), 1);

    assert_eq!(shared.next_values().await.unwrap(), Some(vec![Value::Int(1)]));
    assert_eq!(private.next_values().await.unwrap(), Some(vec![Value::Int(2)]));

    let queries: Vec<_> = script
        .events()
        .into_iter()
        .filter(|e| matches!(e, Event::Query { .. }))
        .collect();
    assert_eq!(queries[0].connection(), "c1");
    assert_eq!(queries[1].connection(), "c2");

    drop(private);
    settle().await;
    assert!(script.events().contains(&Event::Close("c2".to_string())));

    drop(shared);
    assert_eq!(session.readers(), 0);

    // With the shared cursor gone the session connection is free again
    let mut again = first.query().await.unwrap();
    assert!(again.is_shared());
    assert!(again.next_values().await.unwrap().is_some());
}

#[tokio::test]
async fn test_mars_reads_share_the_session_connection() {
    let script = Script::new();
    script.reply("SELECT a", rows(["n"], vec![vec![Value::Int(1)]]));
    let session = session(MockDriver::new(&script).with_mars());

    let command = session.build_command(&select("SELECT a")).unwrap();
    let one = command.query().await.unwrap();
    let two = command.query().await.unwrap();
    assert!(one.is_shared() && two.is_shared());
    assert_eq!(session.readers(), 2);
    assert_eq!(script.opens(), 1);
    assert!(
        script
            .events()
            .iter()
            .filter(|e| e.sql().is_some())
            .all(|e| e.connection() == "c1")
    );
}

#[tokio::test]
async fn test_cancelled_read_leaves_the_read_slot() {
    let script = Script::new();
    script.reply("SELECT slow", Reply::Slow(Duration::from_secs(5)));
    script.reply("SELECT a", rows(["n"], vec![vec![Value::Int(1)]]));
    let session = session(MockDriver::new(&script));

    let slow = session.build_command(&select("SELECT slow")).unwrap();
    let timed_out = tokio::time::timeout(Duration::from_millis(20), slow.query()).await;
    assert!(timed_out.is_err());
    assert_eq!(session.readers(), 0);

    let mut cursor = session
        .build_command(&select("SELECT a"))
        .unwrap()
        .query()
        .await
        .unwrap();
    assert!(cursor.is_shared());
    assert_eq!(session.readers(), 1);
    assert_eq!(cursor.next_values().await.unwrap(), Some(vec![Value::Int(1)]));
    assert_eq!(script.opens(), 1);
}

#[tokio::test]
async fn test_dropped_read_future_leaves_the_read_slot() {
    let script = Script::new();
    script.reply("SELECT slow", Reply::Slow(Duration::from_secs(5)));
    let session = session(MockDriver::new(&script));
    let slow = session.build_command(&select("SELECT slow")).unwrap();

    tokio::select! {
        _ = slow.query() => panic!("slow query should not finish"),
        _ = tokio::time::sleep(Duration::from_millis(20)) => {}
    }
    assert_eq!(session.readers(), 0);

    let again = session.build_command(&select("SELECT a")).unwrap();
    assert!(again.query().await.unwrap().is_shared());
}

#[tokio::test]
async fn test_bound_query_stays_on_session_transaction() {
    let script = Script::new();
    script.reply("SELECT a", rows(["n"], vec![vec![Value::Int(1)]]));
    script.reply("INSERT a RETURNING", rows(["Id"], vec![vec![Value::Int(7)]]));
    let session = session(MockDriver::new(&script));

    let held = session
        .build_command(&select("SELECT a"))
        .unwrap()
        .query()
        .await
        .unwrap();
    assert_eq!(session.readers(), 1);

    let insert = Statement::new(StatementKind::Insert, "INSERT a RETURNING");
    let mut returned = session.build_command(&insert).unwrap().query_bound().await.unwrap();
    assert!(returned.is_shared());
    assert_eq!(returned.next_values().await.unwrap(), Some(vec![Value::Int(7)]));
    assert_eq!(session.readers(), 1, "bound reads skip admission");
    drop((held, returned));

    session.rollback().await.unwrap();
    assert_eq!(script.opens(), 1);
    assert_eq!(script.rollbacks(), 1);
    assert!(
        script
            .events()
            .iter()
            .filter(|e| e.sql().is_some())
            .all(|e| e.connection() == "c1")
    );
}

#[tokio::test]
async fn test_read_after_completion_opens_private_connection() {
    let script = Script::new();
    script.reply("SELECT a", rows(["n"], vec![vec![Value::Int(1)]]));
    let session = session(MockDriver::new(&script));

    session
        .build_command(&execute("UPDATE a"))
        .unwrap()
        .execute()
        .await
        .unwrap();
    session.commit().await.unwrap();

    let mut cursor = session
        .build_command(&select("SELECT a"))
        .unwrap()
        .query()
        .await
        .unwrap();
    assert!(!cursor.is_shared());
    assert_eq!(cursor.next_values().await.unwrap(), Some(vec![Value::Int(1)]));
    assert_eq!(script.opens(), 2);
}

#[tokio::test]
async fn test_connection_released_when_last_reader_leaves() {
    let script = Script::new();
    script.reply("SELECT a", rows(["n"], vec![vec![Value::Int(1)]]));
    let session = session(MockDriver::new(&script));

    let cursor = session
        .build_command(&select("SELECT a"))
        .unwrap()
        .query()
        .await
        .unwrap();
    session.commit().await.unwrap();
    assert_eq!(script.commits(), 1);
    assert!(!script.events().contains(&Event::Close("c1".to_string())));

    drop(cursor);
    settle().await;
    assert!(script.events().contains(&Event::Close("c1".to_string())));
}

#[tokio::test]
async fn test_dropping_uncompleted_session_rolls_back() {
    let script = Script::new();
    let session = session(MockDriver::new(&script));
    let command = session.build_command(&execute("UPDATE a")).unwrap();
    command.execute().await.unwrap();

    drop(command);
    drop(session);
    settle().await;

    assert_eq!(script.rollbacks(), 1);
    assert_eq!(script.commits(), 0);
    assert!(script.events().contains(&Event::Close("c1".to_string())));
}

#[tokio::test]
async fn test_driver_error_reaches_caller() {
    let script = Script::new();
    script.reply("UPDATE broken", Reply::Fail("syntax error".to_string()));
    let session = session(MockDriver::new(&script));

    let err = session
        .build_command(&execute("UPDATE broken"))
        .unwrap()
        .execute()
        .await
        .unwrap_err();
    assert!(matches!(err, DataError::Database { .. }));
    assert!(!err.is_fatal());
}
