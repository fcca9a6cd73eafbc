//! Temporary SQLite databases.

use std::path::Path;
use std::sync::Mutex;

use sea_orm::ConnectionTrait;
use tempdb::{
    drop_database, with_connection, with_temporary_database, Dialect, TempDbError,
    TemporaryDatabase,
};
use tempdb_test_support::unique_helpers::unique_identifier;

#[tokio::test]
async fn guard_creates_and_drops() {
    let db = TemporaryDatabase::create(Dialect::Sqlite).await.unwrap();
    let path = db.url().database().unwrap().to_string();
    assert!(Path::new(&path).exists());

    assert!(db.close().await.unwrap());
    assert!(!Path::new(&path).exists());
}

#[tokio::test]
async fn kept_guard_leaves_database() {
    let mut db = TemporaryDatabase::create(Dialect::Sqlite).await.unwrap();
    db.keep();
    assert!(db.is_kept());
    let url = db.url().clone();

    assert!(!db.close().await.unwrap());
    assert!(Path::new(url.database().unwrap()).exists());

    assert!(drop_database(&url).await.unwrap());
}

#[tokio::test]
async fn create_with_refuses_existing_database() {
    let db = TemporaryDatabase::create(Dialect::Sqlite).await.unwrap();
    let err = TemporaryDatabase::create_with(db.url().clone())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already exists"));
    db.close().await.unwrap();
}

#[tokio::test]
async fn scoped_database_is_usable_then_removed() {
    let table = unique_identifier("t");
    let url = with_temporary_database(Dialect::Sqlite, false, |url| async move {
        with_connection(&url, move |txn| {
            Box::pin(async move {
                txn.execute_unprepared(&format!("create table {table} (id integer)"))
                    .await?;
                Ok(())
            })
        })
        .await?;
        Ok(url)
    })
    .await
    .unwrap();

    assert!(url.database().unwrap().contains("tempdb_tmp_"));
    assert!(!Path::new(url.database().unwrap()).exists());
}

#[tokio::test]
async fn scoped_database_is_removed_when_body_fails() {
    let seen = Mutex::new(None);

    let err = with_temporary_database(Dialect::Sqlite, false, |url| {
        *seen.lock().unwrap() = Some(url);
        async {
            Err::<(), _>(TempDbError::Config {
                message: "body failed".to_string(),
            })
        }
    })
    .await
    .unwrap_err();
    assert!(err.to_string().contains("body failed"));

    let url = seen.lock().unwrap().take().expect("body saw the url");
    assert!(!Path::new(url.database().unwrap()).exists());
}

#[tokio::test]
async fn do_not_delete_keeps_scoped_database() {
    let url = with_temporary_database(Dialect::Sqlite, true, |url| async move { Ok(url) })
        .await
        .unwrap();
    assert!(Path::new(url.database().unwrap()).exists());
    drop_database(&url).await.unwrap();
}
