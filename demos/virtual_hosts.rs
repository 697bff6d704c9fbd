//! Virtual Hosts
//!
//! Two sites on one listener, selected by the `Host` header.
//!
//! Run with:
//! ```bash
//! cargo run --example virtual_hosts
//! ```
//!
//! Try:
//! ```bash
//! curl -H 'Host: blog.localhost:8080' http://localhost:8080/
//! curl -H 'Host: shop.localhost:8080' http://localhost:8080/cart
//! curl http://localhost:8080/
//! ```

use trellis::logging::{LogConfig, info, warn};
use trellis::prelude::*;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let _guard = LogConfig::default().init()?;

    let mut engine = Engine::new(Config::from_env()?);
    engine.get("/", |ctx| ctx.text("no site for this host", 200));
    engine.on_not_found(|ctx| {
        warn!(host = ctx.host().unwrap_or("-"), path = %ctx.path(), "Unknown page");
        ctx.text("nothing here", 404)
    });

    let blog = engine.virtual_host("blog.localhost:8080");
    blog.use_middleware(access_log());
    blog.get("/", |ctx| ctx.text("blog index", 200));
    blog.get("/posts/:slug", |ctx| {
        let slug = ctx.param("slug").unwrap_or_default().to_string();
        ctx.text(format!("post {}", slug), 200)
    });

    let shop = engine.virtual_host("shop.localhost:8080");
    shop.get("/cart", |ctx| ctx.json(&serde_json::json!({ "items": [] })));

    let service = engine.handler()?;
    info!(
        hosts = ?service.virtual_hosts().hostnames().collect::<Vec<_>>(),
        "Starting virtual host demo"
    );
    service.listen_and_serve().await?;
    Ok(())
}
