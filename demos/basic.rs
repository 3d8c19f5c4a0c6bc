use serde::Deserialize;
use serde_json::json;
use surrealdb_ws::{ClientOptions, Database, DatabaseConfig, GeoDistance, GeoPoint, QueryBuilder};

#[derive(Debug, Deserialize)]
struct Venue {
    name: String,
    #[serde(default)]
    distance: Option<f64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let db = Database::connect(DatabaseConfig::from_env()?, ClientOptions::default()).await?;

    let _: Vec<Venue> = db
        .create(
            "venue",
            &json!({"name": "Borough Market", "location": [-0.0909, 51.5055]}),
        )
        .await?;

    let query = QueryBuilder::table("venue")
        .select("name")
        .geo_distance(
            GeoDistance::new("location", GeoPoint::new(51.5072, -0.1276)).max(5.0),
            Some("distance"),
        );
    println!("{}", query.to_sql()?);

    for venue in db.get::<Venue>(&query).await? {
        println!("{} ({:?} mi)", venue.name, venue.distance);
    }

    db.close().await;
    Ok(())
}
