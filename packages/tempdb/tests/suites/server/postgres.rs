//! Postgres server tests (need TEMPDB_TEST_POSTGRES_URL).

use sea_orm::{ConnectionTrait, Statement};
use tempdb::{
    admin_connection, can_select, connect, create_database, database_exists, database_exists_on,
    drop_database, kill_other_connections, temporary_database_name, with_connection,
    ConnectSettings, DbUrl, TemporaryDatabase,
};
use tempdb_test_support::servers::postgres_url;

use crate::common::server_url;

fn scratch(server: &DbUrl) -> DbUrl {
    server.clone().with_database(Some(temporary_database_name()))
}

#[tokio::test]
async fn create_exists_drop_roundtrip() {
    let Some(raw) = postgres_url() else { return };
    let target = scratch(&server_url(&raw));

    assert!(!database_exists(&target, false).await.unwrap());
    assert!(!can_select(&target).await.unwrap());

    assert!(create_database(&target, None, false).await.unwrap());
    assert!(database_exists(&target, false).await.unwrap());
    assert!(can_select(&target).await.unwrap());
    assert!(!create_database(&target, None, false).await.unwrap());

    assert!(drop_database(&target).await.unwrap());
    assert!(!database_exists(&target, false).await.unwrap());
    assert!(!drop_database(&target).await.unwrap());
}

#[tokio::test]
async fn drop_terminates_open_connections() {
    let Some(raw) = postgres_url() else { return };
    let target = scratch(&server_url(&raw));
    create_database(&target, None, false).await.unwrap();

    let holder = connect(&target, &ConnectSettings::default()).await.unwrap();
    holder
        .execute(Statement::from_string(holder.get_database_backend(), "select 1"))
        .await
        .unwrap();

    assert!(drop_database(&target).await.unwrap());
    assert!(!database_exists(&target, false).await.unwrap());
    let _ = holder.close().await;
}

#[tokio::test]
async fn soft_kill_targets_idle_sessions_of_one_database() {
    let Some(raw) = postgres_url() else { return };
    let target = scratch(&server_url(&raw));
    create_database(&target, None, false).await.unwrap();

    let idle = connect(&target, &ConnectSettings::default()).await.unwrap();
    idle.execute(Statement::from_string(idle.get_database_backend(), "select 1"))
        .await
        .unwrap();

    let admin = admin_connection(&target).await.unwrap();
    let killed = kill_other_connections(admin.connection(), target.database(), false)
        .await
        .unwrap();
    assert!(killed >= 1, "the idle session should have been terminated");
    admin.close().await.unwrap();

    let _ = idle.close().await;
    drop_database(&target).await.unwrap();
}

#[tokio::test]
async fn template_copies_schema() {
    let Some(raw) = postgres_url() else { return };
    let server = server_url(&raw);
    let template = scratch(&server);
    let copy = scratch(&server);

    create_database(&template, None, false).await.unwrap();
    with_connection(&template, |txn| {
        Box::pin(async move {
            txn.execute_unprepared("create table seeded (id int)").await?;
            Ok(())
        })
    })
    .await
    .unwrap();

    assert!(create_database(&copy, template.database(), false)
        .await
        .unwrap());

    let found = with_connection(&copy, |txn| {
        Box::pin(async move {
            let row = txn
                .query_one(Statement::from_string(
                    txn.get_database_backend(),
                    "select count(*)::int as n from information_schema.tables where table_name = 'seeded'",
                ))
                .await?
                .expect("count query returns a row");
            Ok(row.try_get::<i32>("", "n")?)
        })
    })
    .await
    .unwrap();
    assert_eq!(found, 1);

    drop_database(&copy).await.unwrap();
    drop_database(&template).await.unwrap();
}

#[tokio::test]
async fn catalog_lookup_through_a_transaction() {
    let Some(raw) = postgres_url() else { return };
    let server = server_url(&raw);
    let current = server
        .database()
        .unwrap_or("postgres")
        .to_string();

    let exists = with_connection(&server, move |txn| {
        Box::pin(async move { database_exists_on(txn, &current).await })
    })
    .await
    .unwrap();
    assert!(exists);
}

#[tokio::test]
async fn temporary_guard_on_server() {
    let Some(raw) = postgres_url() else { return };
    let db = TemporaryDatabase::create_with(scratch(&server_url(&raw)))
        .await
        .unwrap();
    let url = db.url().clone();
    assert!(database_exists(&url, false).await.unwrap());

    assert!(db.close().await.unwrap());
    assert!(!database_exists(&url, false).await.unwrap());
}
