//! Integration tests against a live PostgreSQL database.
//!
//! Set DATABASE_URL to point at a scratch database, then run:
//! cargo test -p pgsail --test test_datastore -- --ignored

use pgsail::{
    AdapterConfig, AdapterError, Attribute, AttributeType, Connection, Criteria, Datastore,
    JoinSpec, QueryExecutor, Schema, SortDirection, SqlValue, TableSchema, TransactionOptions,
};
use std::sync::Arc;

fn get_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgresql://localhost/test_db".to_string())
}

fn users(table: &str, posts: &str) -> TableSchema {
    TableSchema::new(
        table,
        vec![
            Attribute::new("id", AttributeType::Integer).primary_key().auto_increment(),
            Attribute::new("name", AttributeType::String),
            Attribute::collection("posts", posts, Some("user_id")),
        ],
    )
}

fn posts(table: &str, users: &str) -> TableSchema {
    TableSchema::new(
        table,
        vec![
            Attribute::new("id", AttributeType::Integer).primary_key().auto_increment(),
            Attribute::new("title", AttributeType::String),
            Attribute::new("user_id", AttributeType::Integer).model(users),
        ],
    )
}

async fn setup(users_table: &str, posts_table: &str) -> (Connection, Datastore) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let config = AdapterConfig::default();
    let conn = Connection::new(&get_database_url(), config.pool.clone(), config.executor.clone())
        .await
        .expect("connect");

    let store = Datastore::new("it", Schema::new(), Arc::new(conn.clone()), config).expect("store");
    for table in [posts_table, users_table] {
        store.drop_table(table, None).await.expect("drop");
    }
    (conn, store)
}

/// The users collection needs the posts table, so it is added last.
async fn define_pair(store: &Datastore, users_table: &str, posts_table: &str) {
    let plain_users = TableSchema::new(
        users_table,
        vec![
            Attribute::new("id", AttributeType::Integer).primary_key().auto_increment(),
            Attribute::new("name", AttributeType::String),
        ],
    );
    store.define(plain_users, None).await.expect("define users");
    store
        .define(posts(posts_table, users_table), None)
        .await
        .expect("define posts");
    store
        .add_attribute(users_table, users(users_table, posts_table).attributes()[2].clone(), None)
        .await
        .expect("add collection");
}

fn name(value: &str) -> Vec<(String, SqlValue)> {
    vec![("name".to_string(), SqlValue::String(value.to_string()))]
}

#[tokio::test]
#[ignore] // Only run with --ignored flag when database is available
async fn test_crud_round_trip() {
    let (_conn, store) = setup("pgsail_it_users", "pgsail_it_posts").await;
    define_pair(&store, "pgsail_it_users", "pgsail_it_posts").await;

    let alice = store.create("pgsail_it_users", &name("Alice"), None).await.unwrap();
    let id = alice.get("id").cloned().unwrap();
    store.create("pgsail_it_users", &name("Bob"), None).await.unwrap();

    let by_id = Criteria::new().where_eq("id", id.clone());
    let updated = store
        .update("pgsail_it_users", &by_id, &name("Alicia"), None)
        .await
        .unwrap();
    assert_eq!(updated[0].get("name"), Some(&SqlValue::String("Alicia".to_string())));

    assert_eq!(store.count("pgsail_it_users", &Criteria::new(), None).await.unwrap(), 2);
    store.destroy("pgsail_it_users", &by_id, None).await.unwrap();
    assert_eq!(store.count("pgsail_it_users", &Criteria::new(), None).await.unwrap(), 1);

    store.drop_table("pgsail_it_posts", None).await.unwrap();
    store.drop_table("pgsail_it_users", None).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_association_limit() {
    let (_conn, store) = setup("pgsail_it_authors", "pgsail_it_articles").await;
    define_pair(&store, "pgsail_it_authors", "pgsail_it_articles").await;

    let author = store.create("pgsail_it_authors", &name("Ann"), None).await.unwrap();
    let author_id = author.get("id").cloned().unwrap();
    for title in ["one", "two", "three", "four"] {
        store
            .create(
                "pgsail_it_articles",
                &[
                    ("title".to_string(), SqlValue::String(title.to_string())),
                    ("user_id".to_string(), author_id.clone()),
                ],
                None,
            )
            .await
            .unwrap();
    }

    let criteria = Criteria::new().join(
        JoinSpec::new("pgsail_it_authors", "id", "pgsail_it_articles", "user_id", "posts")
            .criteria(Criteria::new().sort("id", SortDirection::Asc).limit(2).skip(1)),
    );
    let records = store.find("pgsail_it_authors", &criteria, None).await.unwrap();
    let titles: Vec<_> = records[0]
        .association("posts")
        .iter()
        .map(|p| p.get("title").cloned())
        .collect();
    assert_eq!(
        titles,
        vec![
            Some(SqlValue::String("two".to_string())),
            Some(SqlValue::String("three".to_string())),
        ]
    );

    store.drop_table("pgsail_it_articles", None).await.unwrap();
    store.drop_table("pgsail_it_authors", None).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_transaction_rollback_discards_writes() {
    let (conn, store) = setup("pgsail_it_tx_users", "pgsail_it_tx_posts").await;
    define_pair(&store, "pgsail_it_tx_users", "pgsail_it_tx_posts").await;

    let tx = conn.begin_transaction(TransactionOptions::default()).await.unwrap();
    store.create("pgsail_it_tx_users", &name("Temp"), Some(&tx)).await.unwrap();
    assert_eq!(
        store.count("pgsail_it_tx_users", &Criteria::new(), Some(&tx)).await.unwrap(),
        1
    );
    tx.rollback().await.unwrap();

    assert_eq!(store.count("pgsail_it_tx_users", &Criteria::new(), None).await.unwrap(), 0);
    let after = tx
        .execute(&pgsail::CompiledQuery::new("SELECT 1", Vec::new()).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(after, AdapterError::Database(_)));

    store.drop_table("pgsail_it_tx_posts", None).await.unwrap();
    store.drop_table("pgsail_it_tx_users", None).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_unique_violation_is_conflict() {
    let (_conn, store) = setup("pgsail_it_unique", "pgsail_it_unique_posts").await;
    let table = TableSchema::new(
        "pgsail_it_unique",
        vec![
            Attribute::new("id", AttributeType::Integer).primary_key().auto_increment(),
            Attribute::new("email", AttributeType::String).unique(),
        ],
    );
    store.define(table, None).await.unwrap();

    let email = vec![("email".to_string(), SqlValue::String("a@b.c".to_string()))];
    store.create("pgsail_it_unique", &email, None).await.unwrap();
    let err = store.create("pgsail_it_unique", &email, None).await.unwrap_err();
    assert!(err.is_constraint_violation());

    store.drop_table("pgsail_it_unique", None).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_many_to_many_limit_and_skip() {
    let (_conn, store) = setup("pgsail_it_m2m_members", "pgsail_it_m2m_groups").await;
    store.drop_table("pgsail_it_m2m_links", None).await.expect("drop");

    let plain = |table: &str, extra: &str| {
        TableSchema::new(
            table,
            vec![
                Attribute::new("id", AttributeType::Integer).primary_key().auto_increment(),
                Attribute::new(extra, AttributeType::String),
            ],
        )
    };
    store.define(plain("pgsail_it_m2m_members", "name"), None).await.unwrap();
    store.define(plain("pgsail_it_m2m_groups", "label"), None).await.unwrap();
    let links = TableSchema::new(
        "pgsail_it_m2m_links",
        vec![
            Attribute::new("id", AttributeType::Integer).primary_key().auto_increment(),
            Attribute::new("member_id", AttributeType::Integer),
            Attribute::new("group_id", AttributeType::Integer),
        ],
    );
    store.define(links, None).await.unwrap();

    let member = store.create("pgsail_it_m2m_members", &name("Ann"), None).await.unwrap();
    let member_id = member.get("id").cloned().unwrap();
    for n in 1..=5 {
        let group = store
            .create(
                "pgsail_it_m2m_groups",
                &[("label".to_string(), SqlValue::String(format!("g{}", n)))],
                None,
            )
            .await
            .unwrap();
        store
            .create(
                "pgsail_it_m2m_links",
                &[
                    ("member_id".to_string(), member_id.clone()),
                    ("group_id".to_string(), group.get("id").cloned().unwrap()),
                ],
                None,
            )
            .await
            .unwrap();
    }

    let labels = |limit: i64, skip: i64| {
        Criteria::new()
            .join(
                JoinSpec::new("pgsail_it_m2m_members", "id", "pgsail_it_m2m_links", "member_id", "groups")
                    .hidden(),
            )
            .join(
                JoinSpec::new("pgsail_it_m2m_links", "group_id", "pgsail_it_m2m_groups", "id", "groups")
                    .junction()
                    .criteria(Criteria::new().sort("id", SortDirection::Asc).limit(limit).skip(skip)),
            )
    };
    let label = |s: &str| Some(SqlValue::String(s.to_string()));

    for (limit, skip, expected) in [
        (2, 0, vec![label("g1"), label("g2")]),
        (2, 1, vec![label("g2"), label("g3")]),
        (10, 4, vec![label("g5")]),
    ] {
        let records = store
            .find("pgsail_it_m2m_members", &labels(limit, skip), None)
            .await
            .unwrap();
        let got: Vec<_> = records[0]
            .association("groups")
            .iter()
            .map(|g| g.get("label").cloned())
            .collect();
        assert_eq!(got, expected, "limit={} skip={}", limit, skip);
    }

    for table in ["pgsail_it_m2m_links", "pgsail_it_m2m_groups", "pgsail_it_m2m_members"] {
        store.drop_table(table, None).await.unwrap();
    }
}
