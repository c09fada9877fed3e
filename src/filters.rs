use serde::Serialize;
use std::convert::Infallible;
use warp::{
    http::StatusCode,
    reject::{self, Reject},
    Filter, Rejection, Reply,
};

use crate::controllers::GameController;
use crate::models::SessionId;

#[derive(Debug)]
struct Unauthorized;

impl Reject for Unauthorized {}

#[derive(Serialize)]
struct RejectionReply {
    error: &'static str,
}

pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, error) = if err.find::<Unauthorized>().is_some() {
        (StatusCode::UNAUTHORIZED, "Unauthorized")
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "NotFound")
    } else if err.find::<warp::filters::body::BodyDeserializeError>().is_some() {
        (StatusCode::BAD_REQUEST, "BadRequest")
    } else if err.find::<reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "MethodNotAllowed")
    } else {
        log::warn!("unhandled rejection: {:?}", err);
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal")
    };

    let reply = warp::reply::json(&RejectionReply { error });
    Ok(warp::reply::with_status(reply, status))
}

pub fn with_game_controller(
    game_controller: GameController,
) -> impl Filter<Extract = (GameController,), Error = Infallible> + Clone {
    warp::any().map(move || game_controller.clone())
}

/// Reads `Authorization: Session <token>`, or starts a new session.
pub fn session(
    game_controller: GameController,
) -> impl Filter<Extract = (SessionId,), Error = Rejection> + Clone {
    warp::header::optional("Authorization")
        .and(with_game_controller(game_controller))
        .and_then(
            move |auth: Option<String>, game_controller: GameController| async move {
                match auth {
                    None => Ok(game_controller.create_session()),
                    Some(auth) => {
                        let mut parts = auth.splitn(2, ' ');
                        let kind = parts.next().ok_or_else(|| reject::custom(Unauthorized))?;
                        let value = parts.next().ok_or_else(|| reject::custom(Unauthorized))?;

                        if !kind.eq_ignore_ascii_case("session") {
                            return Err(reject::custom(Unauthorized));
                        }

                        game_controller.decode_session(value).map_err(|err| {
                            log::debug!("rejected session token: {}", err);
                            reject::custom(Unauthorized)
                        })
                    }
                }
            },
        )
}
