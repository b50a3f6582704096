use actix_web::{web, HttpResponse, Responder};
use hub::serde_json::json;

use crate::registry::RoomRegistry;

pub fn configure_room_handlers(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/rooms").route(web::get().to(get)));
}

async fn get(registry: web::Data<RoomRegistry>) -> impl Responder {
    let rooms = registry
        .overview()
        .into_iter()
        .map(|info| json!({ "name": info.name, "connections": info.connections }))
        .collect::<Vec<_>>();
    HttpResponse::Ok().json(json!(rooms))
}
