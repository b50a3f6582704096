use actix_web::web;

use crate::connection::ws_index;
use crate::handlers::rooms::configure_room_handlers;

mod rooms;

pub fn root(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/ws").route(web::get().to(ws_index)))
        .service(web::resource("/ws/{room}").route(web::get().to(ws_index)));

    configure_room_handlers(cfg);
}
