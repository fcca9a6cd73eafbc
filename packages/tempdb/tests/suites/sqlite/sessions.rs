//! Cached session factories.
//!
//! The factory cache is process-wide, so these tests run serially.

use std::sync::Arc;

use sea_orm::{ConnectionTrait, Statement};
use serial_test::serial;
use tempdb::{
    cached_factory_count, clear_session_factories, create_database, session, session_factory,
    with_session, DbUrl, SessionOptions, TempDbError,
};
use tempfile::TempDir;

use crate::common::sqlite_url;

async fn prepared_db(dir: &TempDir, file: &str) -> DbUrl {
    let url = sqlite_url(dir, file);
    create_database(&url, None, false).await.unwrap();
    with_session(&url, &SessionOptions::default(), |txn| {
        Box::pin(async move {
            txn.execute_unprepared("create table items (id integer primary key, name text)")
                .await?;
            Ok(())
        })
    })
    .await
    .unwrap();
    url
}

async fn item_count(url: &DbUrl) -> i64 {
    with_session(url, &SessionOptions::default(), |txn| {
        Box::pin(async move {
            let row = txn
                .query_one(Statement::from_string(
                    txn.get_database_backend(),
                    "select count(*) as n from items",
                ))
                .await?
                .expect("count query returns a row");
            Ok(row.try_get::<i64>("", "n")?)
        })
    })
    .await
    .unwrap()
}

#[tokio::test]
#[serial]
async fn same_arguments_share_one_factory() {
    clear_session_factories().await;
    assert_eq!(cached_factory_count().await, 0);

    let dir = TempDir::new().expect("Should create temp dir");
    let url = sqlite_url(&dir, "shared.db");
    create_database(&url, None, false).await.unwrap();

    let opts = SessionOptions::default();
    let first = session_factory(&url, &opts).await.unwrap();
    let second = session_factory(&url.clone(), &opts).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(cached_factory_count().await, 1);

    let other_opts = SessionOptions {
        max_connections: Some(2),
        ..SessionOptions::default()
    };
    let third = session_factory(&url, &other_opts).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &third));
    assert_eq!(cached_factory_count().await, 2);

    clear_session_factories().await;
    assert_eq!(cached_factory_count().await, 0);
}

#[tokio::test]
#[serial]
async fn concurrent_first_use_builds_once() {
    clear_session_factories().await;
    let dir = TempDir::new().expect("Should create temp dir");
    let url = sqlite_url(&dir, "concurrent.db");
    create_database(&url, None, false).await.unwrap();

    let opts = SessionOptions::default();
    let (a, b) = tokio::join!(session_factory(&url, &opts), session_factory(&url, &opts));
    assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
    assert_eq!(cached_factory_count().await, 1);

    clear_session_factories().await;
}

#[tokio::test]
#[serial]
async fn with_session_commits_and_rolls_back() {
    let dir = TempDir::new().expect("Should create temp dir");
    let url = prepared_db(&dir, "scoped.db").await;

    with_session(&url, &SessionOptions::default(), |txn| {
        Box::pin(async move {
            txn.execute_unprepared("insert into items (name) values ('a')")
                .await?;
            Ok(())
        })
    })
    .await
    .unwrap();
    assert_eq!(item_count(&url).await, 1);

    let result = with_session(&url, &SessionOptions::default(), |txn| {
        Box::pin(async move {
            txn.execute_unprepared("insert into items (name) values ('b')")
                .await?;
            Err::<(), _>(TempDbError::Config {
                message: "rollback please".to_string(),
            })
        })
    })
    .await;
    assert!(result.is_err());
    assert_eq!(item_count(&url).await, 1);

    clear_session_factories().await;
}

#[tokio::test]
#[serial]
async fn session_guard_commit_and_implicit_rollback() {
    let dir = TempDir::new().expect("Should create temp dir");
    let url = prepared_db(&dir, "guard.db").await;
    let opts = SessionOptions::default();

    let s = session(&url, &opts).await.unwrap();
    s.execute_unprepared("insert into items (name) values ('committed')")
        .await
        .unwrap();
    s.commit().await.unwrap();
    assert_eq!(item_count(&url).await, 1);

    {
        let s = session(&url, &opts).await.unwrap();
        s.execute_unprepared("insert into items (name) values ('dropped')")
            .await
            .unwrap();
    }
    assert_eq!(item_count(&url).await, 1, "dropped session must roll back");

    let s = session(&url, &opts).await.unwrap();
    s.execute_unprepared("insert into items (name) values ('rolled back')")
        .await
        .unwrap();
    s.rollback().await.unwrap();
    assert_eq!(item_count(&url).await, 1);

    clear_session_factories().await;
}
