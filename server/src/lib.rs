pub extern crate actix_web;

pub mod connection;
pub mod fanout;
pub mod handlers;
pub mod registry;
pub mod room;
