use anyhow::{Error, Result};
use rand::prelude::*;
use ring::{digest, hmac};
use serde::{Deserialize, Serialize};
use std::{env, io::ErrorKind, net::SocketAddr, sync::Arc};
use tokio::fs;
use warp::{
    http,
    reply::{self, Reply, Response},
    Filter,
};

use controllers::{GameController, ResultWriter};
use effects::LogEffects;
use models::{Config, Difficulty, GameMode, Gender, SessionId, StudentId, TeamMode};
use quiz::QuizView;
use storage::{DocumentStore, FileStore, Persistence};
use timer::SystemClock;

mod controllers;
mod effects;
mod filters;
mod models;
mod quiz;
mod roulette;
mod rps;
mod scoreboard;
mod storage;
mod teams;
mod timer;
mod turns;

#[derive(Clone, Debug, Deserialize, Serialize)]
struct TagRequest {
    mode: GameMode,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct StudentRequest {
    name: String,
    gender: Gender,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct ConditionRequest {
    student_ids: Vec<StudentId>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct TeamsRequest {
    mode: TeamMode,
    #[serde(default)]
    absent: Vec<StudentId>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct SliceRequest {
    label: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct NewQuizRequest {
    team_count: usize,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct ScoreboardRequest {
    team_count: usize,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct DeltaRequest {
    delta: i32,
}

#[derive(Clone, Debug, Serialize)]
struct QuizReply<'a> {
    #[serde(flatten)]
    quiz: QuizView,
    token: &'a str,
}

#[derive(Clone, Debug, Serialize)]
struct TopicReply<'a> {
    id: &'a str,
    title: &'a str,
    difficulty: Difficulty,
    words: usize,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct ErrorReply {
    error: ErrorCode,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
enum ErrorCode {
    NotFound,
    Internal,
}

fn error_reply(error: ErrorCode, status: http::StatusCode) -> Response {
    reply::with_status(reply::json(&ErrorReply { error }), status).into_response()
}

fn json_reply<T: Serialize>(value: Result<T>) -> Response {
    match value {
        Ok(value) => reply::json(&value).into_response(),
        Err(err) => {
            log::error!("request failed: {}", err);
            error_reply(ErrorCode::Internal, http::StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn json_or_not_found<T: Serialize>(value: Result<Option<T>>) -> Response {
    match value {
        Ok(None) => error_reply(ErrorCode::NotFound, http::StatusCode::NOT_FOUND),
        Ok(Some(value)) => json_reply(Ok(value)),
        Err(err) => json_reply::<()>(Err(err)),
    }
}

fn quiz_reply(
    game_controller: &GameController,
    session: &SessionId,
    quiz: Result<Option<QuizView>>,
) -> Response {
    let reply = quiz.and_then(|quiz| {
        let token = game_controller.encode_session(session)?;
        Ok(quiz.map(|quiz| (quiz, token)))
    });

    match reply {
        Ok(Some((quiz, token))) => reply::json(&QuizReply {
            quiz,
            token: &token,
        })
        .into_response(),
        Ok(None) => error_reply(ErrorCode::NotFound, http::StatusCode::NOT_FOUND),
        Err(err) => json_reply::<()>(Err(err)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let bind_addr = env::var("BIND").unwrap_or_else(|_err| "127.0.0.1:3030".into());
    let bind_addr: SocketAddr = bind_addr.parse()?;

    let cors_origin = env::var("CORS_ORIGIN").unwrap_or_else(|_err| "http://localhost:1313".into());

    let secret_key = env::var("SECRET_KEY")
        .map_err(|err| Error::new(err))
        .and_then(|env| {
            let mut secret_key = [0u8; digest::SHA256_OUTPUT_LEN];
            hex::decode_to_slice(env, &mut secret_key)?;
            Ok(secret_key)
        })
        .or_else(|_err| -> Result<_> {
            let mut secret_key = [0u8; digest::SHA256_OUTPUT_LEN];
            rand::rngs::OsRng.fill(&mut secret_key);

            log::warn!("No secret key was specified, generated a new secret key.");
            log::warn!("Rerun with SECRET_KEY={}", hex::encode(secret_key));

            Ok(secret_key)
        })?;

    let secret_key = hmac::Key::new(hmac::HMAC_SHA256, secret_key.as_ref());

    let config_path = env::var("CONFIG").unwrap_or_else(|_err| "classroom.toml".into());
    let config = match fs::read_to_string(&config_path).await {
        Ok(config) => config,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            log::warn!("{} not found, using defaults", config_path);
            String::new()
        }
        Err(err) => return Err(err.into()),
    };
    let config: Config = toml::de::from_str(&config)?;

    let local = Arc::new(FileStore::new(&config.storage.local_dir));
    let remote = config
        .storage
        .remote_dir
        .as_ref()
        .map(|dir| Arc::new(FileStore::new(dir)) as Arc<dyn DocumentStore>);
    let persistence = Persistence::new(local, remote);

    let result_writer = ResultWriter::new(&config.storage.results_csv)?;

    let game_controller = GameController::new(
        secret_key,
        &config,
        persistence,
        Arc::new(LogEffects),
        Arc::new(SystemClock),
        result_writer,
    );

    let with_controller = filters::with_game_controller(game_controller.clone());
    let with_session = filters::session(game_controller.clone());

    let get_tag = warp::path!("tag")
        .and(warp::get())
        .and(with_controller.clone())
        .map(|game_controller: GameController| json_reply(game_controller.tag()));

    let post_tag = warp::path!("tag")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_controller.clone())
        .map(|body: TagRequest, game_controller: GameController| {
            json_reply(game_controller.take_turn(body.mode))
        });

    let delete_tag = warp::path!("tag")
        .and(warp::delete())
        .and(with_controller.clone())
        .map(|game_controller: GameController| json_reply(game_controller.reset_tag()));

    let get_rps = warp::path!("rps")
        .and(warp::get())
        .and(with_controller.clone())
        .map(|game_controller: GameController| json_reply(game_controller.rps_history()));

    let post_rps = warp::path!("rps")
        .and(warp::post())
        .and(with_controller.clone())
        .map(|game_controller: GameController| json_reply(game_controller.throw_move()));

    let delete_rps = warp::path!("rps")
        .and(warp::delete())
        .and(with_controller.clone())
        .map(|game_controller: GameController| json_reply(game_controller.clear_rps()));

    let get_roster = warp::path!("roster")
        .and(warp::get())
        .and(with_controller.clone())
        .map(|game_controller: GameController| json_reply(game_controller.roster()));

    let post_student = warp::path!("roster" / "students")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_controller.clone())
        .map(|body: StudentRequest, game_controller: GameController| {
            json_or_not_found(game_controller.add_student(&body.name, body.gender))
        });

    let delete_student = warp::path!("roster" / "students" / String)
        .and(warp::delete())
        .and(with_controller.clone())
        .map(|id: String, game_controller: GameController| {
            json_or_not_found(game_controller.remove_student(&StudentId(id)))
        });

    let post_pair = warp::path!("roster" / "pairs")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_controller.clone())
        .map(|body: ConditionRequest, game_controller: GameController| {
            json_or_not_found(game_controller.add_pair(&body.student_ids))
        });

    let post_group = warp::path!("roster" / "groups")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_controller.clone())
        .map(|body: ConditionRequest, game_controller: GameController| {
            json_or_not_found(game_controller.add_group(&body.student_ids))
        });

    let delete_condition = warp::path!("roster" / "conditions" / String)
        .and(warp::delete())
        .and(with_controller.clone())
        .map(|id: String, game_controller: GameController| {
            let removed = game_controller
                .remove_condition(&id)
                .map(|removed| if removed { Some(id) } else { None });
            json_or_not_found(removed)
        });

    let post_teams = warp::path!("teams")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_controller.clone())
        .map(|body: TeamsRequest, game_controller: GameController| {
            json_reply(game_controller.assign_teams(body.mode, &body.absent))
        });

    let get_wheel = warp::path!("wheel")
        .and(warp::get())
        .and(with_controller.clone())
        .map(|game_controller: GameController| json_reply(game_controller.wheel()));

    let post_slice = warp::path!("wheel" / "slices")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_controller.clone())
        .map(|body: SliceRequest, game_controller: GameController| {
            json_or_not_found(game_controller.add_slice(&body.label))
        });

    let delete_slice = warp::path!("wheel" / "slices" / usize)
        .and(warp::delete())
        .and(with_controller.clone())
        .map(|index: usize, game_controller: GameController| {
            json_or_not_found(game_controller.remove_slice(index))
        });

    let post_spin = warp::path!("wheel" / "spin")
        .and(warp::post())
        .and(with_controller.clone())
        .map(|game_controller: GameController| json_or_not_found(game_controller.spin()));

    let get_scoreboard = warp::path!("scoreboard")
        .and(warp::get())
        .and(with_controller.clone())
        .map(|game_controller: GameController| json_or_not_found(game_controller.scoreboard()));

    let post_scoreboard = warp::path!("scoreboard")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_controller.clone())
        .map(|body: ScoreboardRequest, game_controller: GameController| {
            json_reply(game_controller.new_scoreboard(body.team_count))
        });

    let post_score = warp::path!("scoreboard" / "teams" / usize / "score")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_controller.clone())
        .map(
            |team: usize, body: DeltaRequest, game_controller: GameController| {
                json_or_not_found(game_controller.add_score(team, body.delta))
            },
        );

    let delete_score = warp::path!("scoreboard" / "teams" / usize / "score")
        .and(warp::delete())
        .and(with_controller.clone())
        .map(|team: usize, game_controller: GameController| {
            json_or_not_found(game_controller.reset_score(team))
        });

    let post_set = warp::path!("scoreboard" / "teams" / usize / "set")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_controller.clone())
        .map(
            |team: usize, body: DeltaRequest, game_controller: GameController| {
                json_or_not_found(game_controller.add_set(team, body.delta))
            },
        );

    let get_topics = warp::path!("quiz" / "topics")
        .and(warp::get())
        .and(with_controller.clone())
        .map(|game_controller: GameController| {
            let topics = game_controller
                .topics()
                .into_iter()
                .map(|topic| TopicReply {
                    id: &topic.id,
                    title: &topic.title,
                    difficulty: topic.difficulty,
                    words: topic.words.len(),
                })
                .collect::<Vec<_>>();
            reply::json(&topics).into_response()
        });

    let get_quiz = warp::path!("quiz")
        .and(warp::get())
        .and(with_session.clone())
        .and(with_controller.clone())
        .map(|session: SessionId, game_controller: GameController| {
            quiz_reply(&game_controller, &session, game_controller.quiz(&session))
        });

    let post_quiz = warp::path!("quiz")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_session.clone())
        .and(with_controller.clone())
        .map(
            |body: NewQuizRequest, session: SessionId, game_controller: GameController| {
                let quiz = game_controller.new_quiz(&session, body.team_count).map(Some);
                quiz_reply(&game_controller, &session, quiz)
            },
        );

    let post_topic = warp::path!("quiz" / "topic" / String)
        .and(warp::post())
        .and(with_session.clone())
        .and(with_controller.clone())
        .map(
            |topic_id: String, session: SessionId, game_controller: GameController| {
                let quiz = game_controller.select_topic(&session, &topic_id);
                quiz_reply(&game_controller, &session, quiz)
            },
        );

    let post_quiz_action = warp::path!("quiz" / String)
        .and(warp::post())
        .and(with_session.clone())
        .and(with_controller.clone())
        .map(
            |action: String, session: SessionId, game_controller: GameController| {
                let quiz = match action.as_str() {
                    "start" => game_controller.start_round(&session),
                    "correct" => game_controller.answer_correct(&session),
                    "pass" => game_controller.pass(&session),
                    "swap" => game_controller.swap(&session),
                    "next" => game_controller.next_team(&session),
                    _ => Ok(None),
                };
                quiz_reply(&game_controller, &session, quiz)
            },
        );

    let cors = warp::cors()
        .allow_origin(cors_origin.as_str())
        .allow_methods(vec!["GET", "POST", "DELETE"])
        .allow_headers(vec!["Authorization", "Content-Type"]);

    let tag = get_tag.or(post_tag).or(delete_tag);
    let rps = get_rps.or(post_rps).or(delete_rps);
    let roster = get_roster
        .or(post_student)
        .or(delete_student)
        .or(post_pair)
        .or(post_group)
        .or(delete_condition)
        .or(post_teams);
    let wheel = get_wheel.or(post_slice).or(delete_slice).or(post_spin);
    let scoreboard = get_scoreboard
        .or(post_scoreboard)
        .or(post_score)
        .or(delete_score)
        .or(post_set);
    let quiz = get_topics
        .or(get_quiz)
        .or(post_quiz)
        .or(post_topic)
        .or(post_quiz_action);

    let server = tag
        .or(rps)
        .or(roster)
        .or(wheel)
        .or(scoreboard)
        .or(quiz)
        .recover(filters::handle_rejection)
        .with(cors);

    log::info!("listening on {}", bind_addr);
    warp::serve(server).run(bind_addr).await;

    Ok(())
}
