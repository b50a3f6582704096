use std::sync::Arc;

use actix_web::{App, HttpServer};

use hub::OpSetMerge;
use server::handlers;
use server::registry::RoomRegistry;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init();

    let registry = RoomRegistry::new(Arc::new(OpSetMerge));

    let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(8080);

    log::info!("sync hub listening on {}:{}", host, port);

    HttpServer::new(move || {
        App::new()
            .data(registry.clone())
            .configure(handlers::root)
    })
    .bind((host.as_str(), port))?
    .run()
    .await
}
