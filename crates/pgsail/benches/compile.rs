//! Criterion benchmarks for query compilation and result casting.
//!
//! Pure CPU work, no database needed:
//!   cargo bench -p pgsail

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pgsail::{
    Attribute, AttributeType, Criteria, CriteriaCompiler, JoinSpec, RawRow, ResultCaster, Schema,
    SchemaCompiler, SortDirection, SqlValue, TableSchema, TypeMappingMode, WhereParser,
};
use serde_json::json;

fn schema() -> Schema {
    Schema::new()
        .table(TableSchema::new(
            "users",
            vec![
                Attribute::new("id", AttributeType::Integer).primary_key().auto_increment(),
                Attribute::new("name", AttributeType::String).index(),
                Attribute::new("age", AttributeType::Integer),
                Attribute::new("tags", AttributeType::Array(None)),
                Attribute::new("created_at", AttributeType::DateTime),
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

fn bench_compile_select(c: &mut Criterion) {
    let schema = schema();
    let compiler = CriteriaCompiler::new(&schema, &WhereParser);
    let criteria = Criteria::from_json(&json!({
        "where": {
            "or": [{"name": {"startsWith": "A"}}, {"age": {">=": 30}}],
            "id": [1, 2, 3, 4, 5]
        },
        "sort": "name desc, id",
        "limit": 25,
        "skip": 50
    }))
    .expect("criteria");

    c.bench_function("compile_select", |b| {
        b.iter(|| compiler.compile(black_box("users"), black_box(&criteria)).unwrap())
    });
}

fn bench_compile_join(c: &mut Criterion) {
    let schema = schema();
    let compiler = CriteriaCompiler::new(&schema, &WhereParser);
    let criteria = Criteria::new().where_eq("age", SqlValue::Int(30)).join(
        JoinSpec::new("users", "id", "posts", "user_id", "posts")
            .criteria(Criteria::new().sort("id", SortDirection::Desc).limit(5)),
    );

    c.bench_function("compile_lateral_join", |b| {
        b.iter(|| compiler.compile(black_box("users"), black_box(&criteria)).unwrap())
    });
}

fn bench_compile_table(c: &mut Criterion) {
    let schema = schema();
    let compiler = SchemaCompiler::new(TypeMappingMode::Strict);
    let users = schema.require("users").expect("users");

    c.bench_function("compile_table", |b| {
        b.iter(|| compiler.compile_table(black_box(users)).unwrap())
    });
}

fn bench_cast_rows(c: &mut Criterion) {
    let schema = schema();
    let caster = ResultCaster::new(&schema);
    let joins = vec![JoinSpec::new("users", "id", "posts", "user_id", "posts")];

    let mut group = c.benchmark_group("cast_rows");
    for size in [100usize, 1_000] {
        let rows: Vec<RawRow> = (0..size)
            .map(|i| {
                let mut row = RawRow::new();
                row.insert("id".to_string(), SqlValue::Int(i as i32));
                row.insert("name".to_string(), SqlValue::String(format!("user {}", i)));
                row.insert("age".to_string(), SqlValue::String("42".to_string()));
                row.insert("tags".to_string(), SqlValue::String("[\"a\",\"b\"]".to_string()));
                row.insert(
                    "created_at".to_string(),
                    SqlValue::String("2024-01-02T03:04:05Z".to_string()),
                );
                row.insert(
                    "posts".to_string(),
                    SqlValue::Json(json!([
                        {"id": i * 2, "title": "x", "user_id": i},
                        {"id": i * 2 + 1, "title": "y", "user_id": i}
                    ])),
                );
                row
            })
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(size), &rows, |b, rows| {
            b.iter(|| caster.cast_rows("users", rows.clone(), &joins).unwrap())
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_compile_select,
    bench_compile_join,
    bench_compile_table,
    bench_cast_rows
);
criterion_main!(benches);
