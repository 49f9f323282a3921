use config::Config;
use sea_orm_migration::prelude::*;
use std::env;

#[tokio::main]
async fn main() {
    // DATABASE_URL wins; otherwise read it from config.yaml
    if env::var("DATABASE_URL").is_err() {
        match Config::builder()
            .add_source(config::File::with_name("config.yaml"))
            .build()
            .and_then(|settings| settings.get_string("database_url"))
        {
            Ok(url) => env::set_var("DATABASE_URL", url),
            Err(e) => eprintln!("DATABASE_URL not set and config.yaml unusable: {e}"),
        }
    }
    cli::run_cli(migration::Migrator).await;
}
