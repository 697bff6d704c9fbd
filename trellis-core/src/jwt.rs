//! Bearer token authentication.
//!
//! [`jwt`] verifies an HMAC-signed token taken from a request header or a
//! cookie and stores the decoded [`Claims`] in the request's locals:
//!
//! ```
//! use trellis_core::{Claims, Engine, JwtConfig, jwt};
//!
//! let mut engine = Engine::default();
//! let api = engine.new_group("/api");
//! api.use_middleware(jwt(JwtConfig::new("secret")).unwrap());
//! api.get("/me", |ctx| {
//!     let sub = ctx.locals().get::<Claims>().and_then(|c| c.sub.clone());
//!     ctx.text(sub.unwrap_or_default(), 200)
//! });
//! ```
//!
//! Missing tokens and tokens that fail verification end the chain with a
//! 401 [`BasicError`](crate::BasicError).

use crate::{Context, Error, Result};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Where the token is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenLookup {
    /// `<name>: <scheme> <token>`
    Header(String),
    /// `Cookie: <name>=<token>`
    Cookie(String),
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub lookup: TokenLookup,
    /// Authorization scheme expected before the token, compared case-insensitively.
    pub scheme: String,
    pub secret: Vec<u8>,
    /// One of HS256, HS384 or HS512.
    pub algorithm: Algorithm,
    pub issuer: Option<String>,
    pub audience: Option<Vec<String>>,
    /// Clock skew tolerated on `exp`/`nbf`, in seconds.
    pub leeway: u64,
}

impl JwtConfig {
    /// HS256 with `Authorization: Bearer <token>`.
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            lookup: TokenLookup::Header("authorization".to_string()),
            scheme: "Bearer".to_string(),
            secret: secret.into(),
            algorithm: Algorithm::HS256,
            issuer: None,
            audience: None,
            leeway: 0,
        }
    }

    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn from_header(mut self, name: impl Into<String>, scheme: impl Into<String>) -> Self {
        self.lookup = TokenLookup::Header(name.into().to_ascii_lowercase());
        self.scheme = scheme.into();
        self
    }

    pub fn from_cookie(mut self, name: impl Into<String>) -> Self {
        self.lookup = TokenLookup::Cookie(name.into());
        self
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    pub fn with_audience(mut self, audience: Vec<String>) -> Self {
        self.audience = Some(audience);
        self
    }

    pub fn with_leeway(mut self, leeway: u64) -> Self {
        self.leeway = leeway;
        self
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = self.leeway;
        validation.required_spec_claims.clear();

        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &self.audience {
            Some(audience) => validation.set_audience(audience.as_slice()),
            None => validation.validate_aud = false,
        }
        validation
    }

    fn extract(&self, ctx: &Context) -> Option<String> {
        match &self.lookup {
            TokenLookup::Header(name) => {
                let mut parts = ctx.header(name)?.split_whitespace();
                let (scheme, token) = (parts.next()?, parts.next()?);
                if parts.next().is_some() || !scheme.eq_ignore_ascii_case(&self.scheme) {
                    return None;
                }
                Some(token.to_string())
            }
            TokenLookup::Cookie(name) => ctx
                .header("cookie")?
                .split(';')
                .filter_map(|pair| pair.trim().split_once('='))
                .find(|(key, _)| *key == name.as_str())
                .map(|(_, value)| value.to_string())
                .filter(|token| !token.is_empty()),
        }
    }
}

/// Registered claims plus whatever else the token carries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Claims {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.extra.get(name)
    }
}

/// Token middleware storing [`Claims`] in the request locals.
pub fn jwt(
    config: JwtConfig,
) -> Result<impl Fn(&mut Context) -> Result<()> + Send + Sync + 'static> {
    jwt_with_claims(config, |_: &Claims| Ok(()))
}

/// Token middleware decoding a caller-defined claims type.
///
/// `check` runs after signature and time checks pass; its error is returned
/// unchanged so callers choose the status.
pub fn jwt_with_claims<C, F>(
    config: JwtConfig,
    check: F,
) -> Result<impl Fn(&mut Context) -> Result<()> + Send + Sync + 'static>
where
    C: DeserializeOwned + Send + Sync + 'static,
    F: Fn(&C) -> Result<()> + Send + Sync + 'static,
{
    if !matches!(
        config.algorithm,
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
    ) {
        return Err(Error::Config(format!(
            "unsupported token algorithm {:?}, expected HS256, HS384 or HS512",
            config.algorithm
        )));
    }
    if config.secret.is_empty() {
        return Err(Error::Config("token secret must not be empty".to_string()));
    }

    let key = DecodingKey::from_secret(&config.secret);
    let validation = config.validation();

    Ok(move |ctx: &mut Context| {
        let Some(token) = config.extract(ctx) else {
            return Err(ctx.basic_error(401, "missing token"));
        };

        let claims = match decode::<C>(token.as_str(), &key, &validation) {
            Ok(data) => data.claims,
            Err(e) => {
                debug!(error = %e, path = %ctx.path(), "Rejected token");
                return Err(ctx.basic_error(401, "malformed token"));
            }
        };
        check(&claims)?;

        ctx.locals_mut().insert(claims);
        ctx.next()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HttpRequest;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use std::time::{SystemTime, UNIX_EPOCH};

    const SECRET: &[u8] = b"correct horse battery staple";

    fn now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
    }

    fn sign<T: Serialize>(claims: &T, secret: &[u8]) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret),
        )
        .unwrap()
    }

    fn user_claims(exp: i64) -> Claims {
        let mut claims = Claims {
            sub: Some("user-7".to_string()),
            exp: Some(exp),
            ..Claims::default()
        };
        claims.extra.insert("role".to_string(), Value::from("admin"));
        claims
    }

    fn bearer(token: &str) -> Context {
        Context::new(
            HttpRequest::new("GET", "/me").with_header("Authorization", format!("Bearer {}", token)),
        )
    }

    #[test]
    fn test_valid_bearer_token_stores_claims() {
        let mw = jwt(JwtConfig::new(SECRET)).unwrap();
        let mut ctx = bearer(&sign(&user_claims(now() + 600), SECRET));

        mw(&mut ctx).unwrap();
        assert!(ctx.is_next());

        let claims = ctx.locals().get::<Claims>().unwrap();
        assert_eq!(claims.sub.as_deref(), Some("user-7"));
        assert_eq!(claims.get("role"), Some(&Value::from("admin")));
    }

    #[test]
    fn test_missing_or_wrong_scheme_is_401() {
        let mw = jwt(JwtConfig::new(SECRET)).unwrap();

        let mut ctx = Context::new(HttpRequest::new("GET", "/me"));
        let err = mw(&mut ctx).unwrap_err();
        assert_eq!(err.status_code(), 401);
        assert_eq!(err.as_basic().unwrap().message, "missing token");

        let token = sign(&user_claims(now() + 600), SECRET);
        let mut ctx = Context::new(
            HttpRequest::new("GET", "/me").with_header("Authorization", format!("Basic {}", token)),
        );
        assert_eq!(mw(&mut ctx).unwrap_err().status_code(), 401);
        assert!(!ctx.is_next());
    }

    #[test]
    fn test_bad_signature_and_expired_are_401() {
        let mw = jwt(JwtConfig::new(SECRET)).unwrap();

        let mut forged = bearer(&sign(&user_claims(now() + 600), b"another secret"));
        let err = mw(&mut forged).unwrap_err();
        assert_eq!(err.as_basic().unwrap().message, "malformed token");
        assert!(forged.locals().get::<Claims>().is_none());

        let mut expired = bearer(&sign(&user_claims(now() - 3600), SECRET));
        assert_eq!(mw(&mut expired).unwrap_err().status_code(), 401);

        let mut garbage = bearer("not.a.token");
        assert_eq!(mw(&mut garbage).unwrap_err().status_code(), 401);
    }

    #[test]
    fn test_token_from_cookie() {
        let mw = jwt(JwtConfig::new(SECRET).from_cookie("session")).unwrap();
        let token = sign(&user_claims(now() + 600), SECRET);

        let mut ctx = Context::new(
            HttpRequest::new("GET", "/me")
                .with_header("Cookie", format!("theme=dark; session={}", token)),
        );
        mw(&mut ctx).unwrap();
        assert!(ctx.locals().contains::<Claims>());
    }

    #[test]
    fn test_issuer_checked() {
        let mw = jwt(JwtConfig::new(SECRET).with_issuer("trellis")).unwrap();

        let mut claims = user_claims(now() + 600);
        claims.iss = Some("someone-else".to_string());
        let mut ctx = bearer(&sign(&claims, SECRET));
        assert_eq!(mw(&mut ctx).unwrap_err().status_code(), 401);

        claims.iss = Some("trellis".to_string());
        let mut ctx = bearer(&sign(&claims, SECRET));
        assert!(mw(&mut ctx).is_ok());
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Session {
        user: u64,
        scopes: Vec<String>,
    }

    #[test]
    fn test_custom_claims_and_check() {
        let mw = jwt_with_claims(JwtConfig::new(SECRET), |s: &Session| {
            if s.scopes.iter().any(|scope| scope == "write") {
                Ok(())
            } else {
                Err(Error::basic(403, "write scope required"))
            }
        })
        .unwrap();

        let writer = Session {
            user: 9,
            scopes: vec!["read".into(), "write".into()],
        };
        let mut ctx = bearer(&sign(&writer, SECRET));
        mw(&mut ctx).unwrap();
        assert_eq!(ctx.locals().get::<Session>().unwrap().user, 9);

        let reader = Session {
            user: 10,
            scopes: vec!["read".into()],
        };
        let mut ctx = bearer(&sign(&reader, SECRET));
        assert_eq!(mw(&mut ctx).unwrap_err().status_code(), 403);
    }

    #[test]
    fn test_rejects_unusable_config() {
        assert!(matches!(
            jwt(JwtConfig::new(SECRET).with_algorithm(Algorithm::RS256)),
            Err(Error::Config(_))
        ));
        assert!(matches!(jwt(JwtConfig::new(Vec::new())), Err(Error::Config(_))));
    }
}
