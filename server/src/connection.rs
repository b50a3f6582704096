use actix::{Actor, ActorContext, AsyncContext, Handler, Message, Running, StreamHandler};
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;

use hub::{bincode, ClientFrame, ConnectionId, ServerFrame};

use crate::registry::{RoomRegistry, DEFAULT_ROOM};
use crate::room::{RoomCommand, RoomTx};

#[derive(Debug)]
enum ConnectionEvent {
    Frame(ServerFrame),
    Closed,
}

#[derive(Message)]
#[rtype(result = "()")]
struct ConnectionActorMessage(ConnectionEvent);

enum ConnectionState {
    Idle,
    Joined {
        connection_id: ConnectionId,
        room_tx: RoomTx,
    },
}

struct ConnectionActor {
    registry: RoomRegistry,
    room_name: String,
    state: ConnectionState,
}

impl Actor for ConnectionActor {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<ServerFrame>(64);
        let (connection_id, room_tx) = self.registry.join(&self.room_name, tx);
        self.state = ConnectionState::Joined {
            connection_id,
            room_tx,
        };

        let addr = ctx.address().recipient();

        tokio::spawn(async move {
            let addr = addr;
            log::debug!("connection {} egress - started", connection_id);
            while let Some(frame) = rx.recv().await {
                if addr
                    .try_send(ConnectionActorMessage(ConnectionEvent::Frame(frame)))
                    .is_err()
                {
                    break;
                }
            }
            // the room dropped our sink; tell the actor to close the socket
            let _ = addr.try_send(ConnectionActorMessage(ConnectionEvent::Closed));
            log::debug!("connection {} egress - terminated", connection_id);
        });
    }

    fn stopping(&mut self, _: &mut Self::Context) -> Running {
        if let ConnectionState::Joined {
            connection_id,
            ref room_tx,
        } = self.state
        {
            // the room may already be gone; leaving twice is a no-op anyway
            let _ = room_tx.send(RoomCommand::Leave {
                from: connection_id,
            });
        }
        Running::Stop
    }
}

/// Ingress
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ConnectionActor {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => ctx.pong(&msg),
            Ok(ws::Message::Binary(bin)) => {
                log::debug!("ingress size: {}", bin.len());
                if let ConnectionState::Joined {
                    connection_id,
                    ref room_tx,
                } = self.state
                {
                    match bincode::deserialize::<ClientFrame>(&bin) {
                        Ok(frame) => {
                            log::debug!("ingress {:?}", frame);
                            let _ = room_tx.send(RoomCommand::Frame {
                                from: connection_id,
                                frame,
                            });
                        }
                        Err(e) => {
                            // a malformed frame is dropped; the connection
                            // and the room stay up
                            log::warn!(
                                "dropping malformed frame from connection {}: {}",
                                connection_id,
                                e
                            );
                        }
                    }
                }
            }
            Ok(ws::Message::Close(_)) => {
                ctx.stop();
            }
            Err(e) => {
                log::warn!("websocket protocol error: {}", e);
                ctx.stop();
            }
            _ => (),
        }
    }
}

/// Egress
impl Handler<ConnectionActorMessage> for ConnectionActor {
    type Result = ();

    fn handle(
        &mut self,
        msg: ConnectionActorMessage,
        ctx: &mut ws::WebsocketContext<Self>,
    ) -> Self::Result {
        match msg.0 {
            ConnectionEvent::Frame(frame) => {
                log::debug!("egress {:?}", frame);
                let serialized = bincode::serialize(&frame).expect("must succeed");
                ctx.binary(serialized);
            }
            ConnectionEvent::Closed => {
                ctx.close(None);
                ctx.stop();
            }
        }
    }
}

pub async fn ws_index(
    req: HttpRequest,
    stream: web::Payload,
    registry: web::Data<RoomRegistry>,
) -> Result<HttpResponse, Error> {
    let room_name = req
        .match_info()
        .get("room")
        .unwrap_or(DEFAULT_ROOM)
        .to_string();
    ws::start(
        ConnectionActor {
            registry: registry.get_ref().clone(),
            room_name,
            state: ConnectionState::Idle,
        },
        &req,
        stream,
    )
}
