//! Compilation and casting through the public API, no database needed.

use pgsail::query::AggregateWindow;
use pgsail::{
    AdapterError, Attribute, AttributeType, Criteria, CriteriaCompiler, JoinSpec, RawRow,
    ResultCaster, Schema, SchemaCompiler, SortDirection, SqlValue, TableSchema, TypeMappingMode,
    WhereParser,
};
use serde_json::json;

fn schema() -> Schema {
    Schema::new()
        .table(TableSchema::new(
            "users",
            vec![
                Attribute::new("id", AttributeType::Integer).primary_key().auto_increment(),
                Attribute::new("name", AttributeType::String),
                Attribute::new("tags", AttributeType::Array(None)),
                Attribute::collection("posts", "posts", Some("user_id")),
            ],
        ))
        .table(TableSchema::new(
            "posts",
            vec![
                Attribute::new("id", AttributeType::Integer).primary_key().auto_increment(),
                Attribute::new("title", AttributeType::String),
                Attribute::new("user_id", AttributeType::Integer).model("users"),
            ],
        ))
}

fn posts_join(limit: i64) -> JoinSpec {
    JoinSpec::new("users", "id", "posts", "user_id", "posts")
        .criteria(Criteria::new().sort("id", SortDirection::Asc).limit(limit))
}

#[test]
fn test_alice_criteria() {
    let schema = schema();
    let criteria = Criteria::from_json(&json!({
        "name": "Alice",
        "sort": {"name": 1},
        "limit": 10,
        "skip": 5
    }))
    .unwrap();

    let query = CriteriaCompiler::new(&schema, &WhereParser)
        .compile("users", &criteria)
        .unwrap();

    assert_eq!(
        query.sql,
        "SELECT * FROM \"users\" WHERE \"users\".\"name\" = $1 ORDER BY \"users\".\"name\" LIMIT $2 OFFSET $3"
    );
    assert_eq!(
        query.params,
        vec![
            SqlValue::String("Alice".to_string()),
            SqlValue::BigInt(10),
            SqlValue::BigInt(5),
        ]
    );
}

#[test]
fn test_users_with_two_posts_each() {
    let schema = schema();
    let criteria = Criteria::new().join(posts_join(2));
    let query = CriteriaCompiler::new(&schema, &WhereParser)
        .compile("users", &criteria)
        .unwrap();

    assert!(query.sql.contains("[1:2]"));
    assert!(query.sql.contains("LIMIT $1 OFFSET $2) AS \"postsposts\" ON TRUE"));
    assert_eq!(query.params[0], SqlValue::BigInt(2));

    // What PostgreSQL hands back: a JSON array per user, already windowed
    let window = AggregateWindow::for_join(Some(2), 1).unwrap();
    let all_posts: Vec<_> = (1..=5)
        .map(|id| json!({"id": id, "title": format!("post {}", id), "user_id": 1}))
        .collect();
    let aggregated = window.apply(&all_posts);

    let mut row = RawRow::new();
    row.insert("id".to_string(), SqlValue::Int(1));
    row.insert("name".to_string(), SqlValue::String("Ann".to_string()));
    row.insert("posts".to_string(), SqlValue::Json(json!(aggregated)));

    let records = ResultCaster::new(&schema)
        .cast_rows("users", vec![row], &criteria.joins)
        .unwrap();
    let posts = records[0].association("posts");
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0].get("id"), Some(&SqlValue::BigInt(1)));
    assert_eq!(posts[1].get("id"), Some(&SqlValue::BigInt(2)));
    assert!(records[0].get("posts").is_none());
}

#[test]
fn test_fanned_out_rows_merge_by_primary_key() {
    let schema = schema();
    let joins = vec![posts_join(10)];

    let make_row = |posts: serde_json::Value| {
        let mut row = RawRow::new();
        row.insert("id".to_string(), SqlValue::Int(7));
        row.insert("name".to_string(), SqlValue::String("Gus".to_string()));
        row.insert("posts".to_string(), SqlValue::Json(posts));
        row
    };
    let rows = vec![
        make_row(json!([{"id": 1, "title": "a", "user_id": 7}, null, {"id": 1, "title": "a", "user_id": 7}])),
        make_row(json!([{"id": 2, "title": "b", "user_id": 7}])),
    ];

    let records = ResultCaster::new(&schema).cast_rows("users", rows, &joins).unwrap();
    assert_eq!(records.len(), 1);
    let ids: Vec<_> = records[0]
        .association("posts")
        .iter()
        .map(|p| p.get("id").cloned())
        .collect();
    assert_eq!(ids, vec![Some(SqlValue::BigInt(1))]);
}

#[test]
fn test_bracketed_array_round_trip() {
    let schema = schema();
    let tags = SqlValue::Array(vec![
        SqlValue::String("a".to_string()),
        SqlValue::String("b".to_string()),
    ]);
    let insert = CriteriaCompiler::new(&schema, &WhereParser)
        .compile_insert("users", &[("tags".to_string(), tags.clone())])
        .unwrap();
    let stored = insert.params[0].clone();
    assert!(matches!(stored, SqlValue::String(ref s) if s.starts_with('[')));

    let cast = pgsail::cast_value(&AttributeType::Array(None), stored);
    assert_eq!(cast, tags);
}

#[test]
fn test_made_up_type_best_effort() {
    let attr = Attribute::from_json(
        "payload",
        &json!({"type": "made-up-type"}),
        TypeMappingMode::BestEffort,
    )
    .unwrap();
    let table = TableSchema::new(
        "events",
        vec![Attribute::new("id", AttributeType::Integer).primary_key(), attr],
    );

    let plan = SchemaCompiler::new(TypeMappingMode::BestEffort)
        .compile_table(&table)
        .unwrap();
    assert_eq!(plan.diagnostics.len(), 1);
    assert!(plan.to_sql()[0].contains("\"payload\" TEXT"));

    let strict = Attribute::from_json("payload", &json!({"type": "made-up-type"}), TypeMappingMode::Strict);
    assert!(matches!(strict, Err(AdapterError::Schema(_))));
}

#[test]
fn test_every_query_numbers_all_params() {
    let schema = schema();
    let compiler = CriteriaCompiler::new(&schema, &WhereParser);
    let criteria = Criteria::from_json(&json!({
        "where": {"or": [{"name": {"startsWith": "A"}}, {"id": [1, 2, 3]}]},
        "sort": "name desc",
        "limit": 3
    }))
    .unwrap();

    let queries = vec![
        compiler.compile("users", &criteria).unwrap(),
        compiler
            .compile("users", &criteria.clone().join(posts_join(1)))
            .unwrap(),
        compiler.compile_count("users", &criteria).unwrap(),
        compiler.compile_destroy("users", &criteria).unwrap(),
        compiler
            .compile_update(
                "users",
                &criteria,
                &[("name".to_string(), SqlValue::String("Z".to_string()))],
            )
            .unwrap(),
    ];
    for query in queries {
        query.check_placeholders().unwrap();
    }
}
