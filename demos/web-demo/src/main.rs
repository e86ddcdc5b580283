//! Swipjy web demo
//!
//! 运行：`cargo run -p web-demo`，然后访问 http://127.0.0.1:3000

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use swipjy_core::prelude::*;
use swipjy_view::{RenderPipeline, ViewProperties};
use swipjy_web::middleware::{Cors, Principal, RequestId, RequestLogging, SecurityHeaders, ETag, BearerAuth};
use swipjy_web::prelude::*;

const MANIFEST_DIR: &str = env!("CARGO_MANIFEST_DIR");

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
}

#[derive(Debug, Deserialize)]
struct NoteRequest {
    text: String,
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// 读取请求体为指定类型，失败时返回 400
fn read_body<T: serde::de::DeserializeOwned>(ctx: &RequestContext) -> WebResult<T> {
    let body = ctx.body().cloned().unwrap_or(Value::Null);
    serde_json::from_value(body).map_err(|e| HttpError::bad_request(e.to_string()).into())
}

fn build_app(env: &Environment, db: Arc<dyn DatabaseDriver>, tokens: Arc<TokenStore>) -> anyhow::Result<App> {
    let mut views = ViewProperties::from_environment(env);
    if views.dir.is_relative() {
        views.dir = Path::new(MANIFEST_DIR).join(&views.dir);
    }

    let mut app = App::new(RenderPipeline::new(views)).with_properties(AppProperties::from_environment(env));

    app.use_middleware(RequestId::new())
        .use_middleware(RequestLogging::new())
        .use_middleware(SecurityHeaders::new())
        .use_middleware(Cors::from_environment(env))
        .use_middleware(ETag::new());
    app.use_scoped("/api/*", BearerAuth::new(Arc::clone(&tokens)))?;

    let home_db = Arc::clone(&db);
    app.get(
        "/",
        handler_fn(move |ctx| {
            let db = Arc::clone(&home_db);
            Box::pin(async move {
                let notes = db
                    .query(Query::Find {
                        collection: "notes".into(),
                        filter: Map::new(),
                    })
                    .await
                    .map_err(anyhow::Error::from)?;
                ctx.render(
                    "home",
                    ViewData::new()
                        .with("title", "Swipjy demo")
                        .with_serialize("notes", &notes.rows)?,
                );
                Ok(())
            })
        }),
    )?
    .get(
        "/about",
        handler_fn(|ctx| {
            Box::pin(async move {
                ctx.render("about", ViewData::new().with("version", env!("CARGO_PKG_VERSION")));
                Ok(())
            })
        }),
    )?
    .get(
        "/missing",
        handler_fn(|ctx| {
            Box::pin(async move {
                ctx.render("missing", ViewData::new());
                Ok(())
            })
        }),
    )?
    .get(
        "/users/:id",
        handler_fn(|ctx| {
            Box::pin(async move {
                let id: u32 = ctx
                    .param("id")
                    .and_then(|id| id.parse().ok())
                    .ok_or_else(|| HttpError::bad_request("User id must be a number"))?;
                ctx.json(&json!({ "id": id, "name": format!("user-{}", id) }))?;
                Ok(())
            })
        }),
    )?;

    let login_tokens = Arc::clone(&tokens);
    app.post(
        "/login",
        handler_fn(move |ctx| {
            let tokens = Arc::clone(&login_tokens);
            Box::pin(async move {
                let request: LoginRequest = read_body(ctx)?;
                if request.username.trim().is_empty() {
                    return Err(HttpError::bad_request("Missing username").into());
                }
                let token = tokens.issue(request.username);
                ctx.set_status(StatusCode::CREATED).json(&json!({ "token": token }))?;
                Ok(())
            })
        }),
    )?;

    app.get(
        "/api/me",
        handler_fn(|ctx| {
            Box::pin(async move {
                let subject = ctx.extensions().get::<Principal>().map(|p| p.subject.clone());
                ctx.json(&json!({ "subject": subject }))?;
                Ok(())
            })
        }),
    )?;

    let notes_db = Arc::clone(&db);
    app.post(
        "/api/notes",
        handler_fn(move |ctx| {
            let db = Arc::clone(&notes_db);
            Box::pin(async move {
                let request: NoteRequest = read_body(ctx)?;
                let id = ctx.request_id().unwrap_or_default().to_string();
                db.query(Query::Insert {
                    collection: "notes".into(),
                    document: object(json!({ "id": id, "text": request.text })),
                })
                .await
                .map_err(anyhow::Error::from)?;
                ctx.set_status(StatusCode::CREATED).json(&json!({ "id": id }))?;
                Ok(())
            })
        }),
    )?;

    Ok(app)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = SwipjyApplication::new("web-demo")
        .config_file(format!("{}/application.toml", MANIFEST_DIR))
        .bootstrap()
        .context("Failed to bootstrap application")?;

    let db = DriverRegistry::new()
        .connect(&DatabaseProperties::from_environment(&env))
        .await?;
    let tokens = Arc::new(TokenStore::new());

    let app = build_app(&env, Arc::clone(&db), Arc::clone(&tokens))?;
    SwipjyServer::from_environment(app, &env).run().await?;

    db.disconnect().await?;
    tokens.clear();
    Ok(())
}
