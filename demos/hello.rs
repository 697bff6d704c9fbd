//! Hello World
//!
//! A small JSON API with a route group, request ids, CORS, access logging,
//! a token-protected endpoint, response compression and graceful shutdown.
//!
//! Run with:
//! ```bash
//! cargo run --example hello
//! TRELLIS_ADDR=0.0.0.0:9000 cargo run --example hello
//! ```
//!
//! Try:
//! ```bash
//! curl http://localhost:8080/
//! curl http://localhost:8080/api/users/42
//! curl -X POST 'http://localhost:8080/api/users?role=admin' \
//!      -H 'Content-Type: application/json' -d '{"name": "ada"}'
//! curl -H 'Authorization: Bearer <HS256 token signed with $TRELLIS_JWT_SECRET>' \
//!      http://localhost:8080/api/me
//! ```

use serde::{Deserialize, Serialize};
use trellis::logging::{LogConfig, LogFormat, info};
use trellis::prelude::*;

#[derive(Debug, Deserialize, Serialize)]
struct NewUser {
    name: String,
    #[serde(default)]
    role: Option<String>,
}

impl Validate for NewUser {
    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(BasicError::new(422, "name is required")
                .with_code("EMPTY_NAME")
                .into());
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let _guard = LogConfig::new().format(LogFormat::Compact).init()?;

    let mut config = Config::from_env()?;
    config.graceful_shutdown = true;
    config.compress = true;
    let secret = std::env::var("TRELLIS_JWT_SECRET").unwrap_or_else(|_| "dev-secret".to_string());

    let mut engine = Engine::new(config);
    engine.use_middleware(request_id());
    engine.use_middleware(access_log());
    engine.use_middleware(Cors::permissive().into_middleware());
    engine.validate(trellis::SelfValidator::<NewUser>::new());

    engine.get("/", |ctx| ctx.text("Hello from trellis", 200));

    let api = engine.new_group("/api");
    api.get("/users/:id", |ctx| {
        let id: u64 = ctx
            .param("id")
            .and_then(|id| id.parse().ok())
            .ok_or_else(|| ctx.basic_error(400, "id must be a number"))?;
        ctx.json(&serde_json::json!({ "id": id, "name": format!("user-{}", id) }))
    });
    api.post("/users", |ctx| {
        let user: NewUser = ctx.bind()?;
        ctx.validate(&user)?;
        ctx.set_status(201);
        ctx.json(&user)
    });

    let private = api.new_group("/");
    private.use_middleware(jwt(JwtConfig::new(secret))?);
    private.get("/me", |ctx| {
        let claims = ctx.locals().get::<Claims>().cloned().unwrap_or_default();
        ctx.json(&claims)
    });

    let service = engine.handler()?;
    info!(addr = %service.config().addr, "Starting hello demo");
    service.listen_and_serve().await?;
    Ok(())
}
