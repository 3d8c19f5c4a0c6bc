use surrealdb_ws::{ClientOptions, Database, DatabaseConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let db = Database::connect(DatabaseConfig::from_env()?, ClientOptions::default()).await?;

    let response = db
        .query_batch::<serde_json::Value, _, _>(
            [
                "LET $since = time::now() - 1d",
                "SELECT * FROM person WHERE created > $since",
                "SELECT count() FROM person GROUP ALL",
            ],
            (),
        )
        .await?;

    for (index, statement) in response.parse()?.iter().enumerate() {
        match statement.error() {
            Some(message) => eprintln!("statement {index} failed: {message}"),
            None => println!(
                "statement {index}: {} row(s) in {}",
                statement.items().len(),
                statement.time
            ),
        }
    }

    println!("recent people: {:?}", response.nth_statement(1)?);

    db.close().await;
    Ok(())
}
