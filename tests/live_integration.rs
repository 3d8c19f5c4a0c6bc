use std::time::{SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use serde_json::json;
use surrealdb_ws::{ClientOptions, Database, DatabaseConfig, DriverError, QueryBuilder};

#[derive(Debug, Deserialize)]
struct Person {
    name: String,
    age: u32,
}

fn unique_suffix() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock must be after epoch")
        .as_millis()
}

#[tokio::test]
async fn live_roundtrip_and_batch_indexing() {
    let config = match DatabaseConfig::from_env() {
        Ok(config) => config,
        Err(_) => {
            eprintln!("skipping live test: SURREAL_* environment variables not set");
            return;
        }
    };

    let db = Database::connect(config, ClientOptions::default())
        .await
        .expect("connect must succeed");
    db.health().await.expect("server must be healthy");

    let table = format!("person_live_{}", unique_suffix());

    let created: Vec<Person> = db
        .create(table.as_str(), &json!({"name": "Kit", "age": 31}))
        .await
        .expect("create must succeed");
    assert_eq!(created.len(), 1);

    let inserted: Vec<Person> = db
        .insert(
            &table,
            &json!([{"name": "Ada", "age": 36}, {"name": "Tobie", "age": 29}]),
        )
        .await
        .expect("insert must succeed");
    assert_eq!(inserted.len(), 2);

    let query = QueryBuilder::table(table.as_str())
        .where_eq("name", "Kit")
        .or_group(|q| q.filter("age", surrealdb_ws::Operator::GreaterThan, 30))
        .order_by_asc("name");
    let people: Vec<Person> = db.get(&query).await.expect("query must succeed");
    let names: Vec<&str> = people.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, ["Ada", "Kit"]);
    assert!(people.iter().all(|p| p.age > 30));

    let batch = db
        .query_batch::<Person, _, _>(
            [
                "LET $min = 30".to_owned(),
                format!("SELECT * FROM {table} WHERE age > $min ORDER BY name"),
            ],
            (),
        )
        .await
        .expect("batch must succeed");
    assert!(batch.all_ok().expect("must parse"));
    assert_eq!(batch.nth_statement(1).expect("must parse").len(), 2);

    let cleanup = db.query::<serde_json::Value>(&format!("REMOVE TABLE {table}"), ()).await;
    if let Err(DriverError::Transport(message)) = cleanup {
        panic!("cleanup failed with transport error: {message}");
    }
    db.close().await;
}
